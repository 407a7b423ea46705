//! Error types for the hydralink communication layer.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result type for all link operations.
pub type LinkResult<T> = Result<T, LinkError>;

/// Errors produced by transports, the failover manager, and the switcher.
///
/// `Timeout` is always distinguishable from other send/receive failures:
/// it feeds the timeout detector independently of the generic failure
/// counter, so transports must never fold a deadline expiry into a plain
/// `Send`/`Receive` error.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Establishing the underlying channel failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Releasing the underlying channel failed.
    #[error("disconnection failed: {0}")]
    Disconnection(String),

    /// A send operation failed for a reason other than a timeout.
    #[error("send failed: {0}")]
    Send(String),

    /// A receive operation failed for a reason other than a timeout.
    #[error("receive failed: {0}")]
    Receive(String),

    /// A transport configuration is syntactically or semantically invalid.
    /// Raised before any network I/O is attempted.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A blocking operation exceeded its configured deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The shared cancellation signal fired while the operation was
    /// blocked or sleeping.
    #[error("operation cancelled")]
    Cancelled,

    /// A transport switch could not be completed.
    #[error("transport switch failed: {0}")]
    TransportSwitch(String),
}

impl LinkError {
    /// Whether this error is a deadline expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, LinkError::Timeout(_))
    }

    /// Whether this error is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, LinkError::Cancelled)
    }

    /// Errors that no retry or switch can recover from within the
    /// current call. The agent runtime decides whether they are fatal
    /// to the process.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LinkError::Configuration(_) | LinkError::Cancelled | LinkError::TransportSwitch(_)
        )
    }

    /// Wrap an I/O error from a connect path, preserving timeouts.
    pub(crate) fn connect_io(err: io::Error, deadline: Duration) -> Self {
        if is_io_timeout(&err) {
            LinkError::Timeout(deadline)
        } else {
            LinkError::Connection(err.to_string())
        }
    }

    /// Wrap an I/O error from a send path, preserving timeouts.
    pub(crate) fn send_io(err: io::Error, deadline: Duration) -> Self {
        if is_io_timeout(&err) {
            LinkError::Timeout(deadline)
        } else {
            LinkError::Send(err.to_string())
        }
    }

    /// Wrap an I/O error from a receive path, preserving timeouts.
    pub(crate) fn receive_io(err: io::Error, deadline: Duration) -> Self {
        if is_io_timeout(&err) {
            LinkError::Timeout(deadline)
        } else {
            LinkError::Receive(err.to_string())
        }
    }
}

/// Blocking-socket deadline expiries surface as `WouldBlock` on some
/// platforms and `TimedOut` on others.
fn is_io_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_distinguishable() {
        let err = LinkError::Timeout(Duration::from_secs(5));
        assert!(err.is_timeout());
        assert!(!LinkError::Send("broken pipe".into()).is_timeout());
        assert!(!LinkError::Receive("reset".into()).is_timeout());
    }

    #[test]
    fn test_fatal_errors() {
        assert!(LinkError::Configuration("empty domain".into()).is_fatal());
        assert!(LinkError::Cancelled.is_fatal());
        assert!(LinkError::TransportSwitch("exhausted".into()).is_fatal());

        assert!(!LinkError::Timeout(Duration::from_secs(1)).is_fatal());
        assert!(!LinkError::Send("oops".into()).is_fatal());
    }

    #[test]
    fn test_io_timeout_mapping() {
        let deadline = Duration::from_millis(200);

        let err = io::Error::new(io::ErrorKind::TimedOut, "timed out");
        assert!(LinkError::receive_io(err, deadline).is_timeout());

        let err = io::Error::new(io::ErrorKind::WouldBlock, "would block");
        assert!(LinkError::receive_io(err, deadline).is_timeout());

        let err = io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe");
        assert!(matches!(
            LinkError::send_io(err, deadline),
            LinkError::Send(_)
        ));
    }
}
