//! Transport variants and the uniform capability wrapper.
//!
//! The five channels (stream, datagram, websocket, raw echo, name
//! query) are a closed set, modeled as one enum so the failover logic
//! can be checked exhaustively. [`Transport`] wraps a channel with the
//! shared lifecycle: status tracking, deadlines, bounded connect
//! retries, and cancellation.

mod datagram;
mod echo;
mod query;
mod stream;
mod websocket;

pub use datagram::DatagramChannel;
pub use echo::EchoChannel;
pub use query::QueryChannel;
pub use stream::StreamChannel;
pub use websocket::WebSocketChannel;

use std::fmt;

use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::{LinkError, LinkResult, TransportConfig, TransportKind};

/// Connection lifecycle state of a transport.
///
/// `Error` records a failed connect; it never blocks a later attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    /// No channel is open.
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// The channel is open and usable.
    Connected,
    /// The last connect attempt exhausted its retries.
    Error,
}

impl fmt::Display for TransportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportStatus::Disconnected => "disconnected",
            TransportStatus::Connecting => "connecting",
            TransportStatus::Connected => "connected",
            TransportStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// One concrete channel per transport kind.
#[derive(Debug)]
enum Channel {
    Stream(StreamChannel),
    Datagram(DatagramChannel),
    WebSocket(WebSocketChannel),
    RawEcho(EchoChannel),
    NameQuery(QueryChannel),
}

impl Channel {
    fn for_kind(kind: TransportKind) -> Self {
        match kind {
            TransportKind::Stream => Channel::Stream(StreamChannel::default()),
            TransportKind::Datagram => Channel::Datagram(DatagramChannel::default()),
            TransportKind::WebSocket => Channel::WebSocket(WebSocketChannel::default()),
            TransportKind::RawEcho => Channel::RawEcho(EchoChannel::default()),
            TransportKind::NameQuery => Channel::NameQuery(QueryChannel::default()),
        }
    }

    fn is_open(&self) -> bool {
        match self {
            Channel::Stream(c) => c.is_open(),
            Channel::Datagram(c) => c.is_open(),
            Channel::WebSocket(c) => c.is_open(),
            Channel::RawEcho(c) => c.is_open(),
            Channel::NameQuery(c) => c.is_open(),
        }
    }

    async fn open(&mut self, config: &TransportConfig) -> LinkResult<()> {
        match self {
            Channel::Stream(c) => c.open(config).await,
            Channel::Datagram(c) => c.open(config).await,
            Channel::WebSocket(c) => c.open(config).await,
            Channel::RawEcho(c) => c.open(config),
            Channel::NameQuery(c) => c.open(config).await,
        }
    }

    async fn close(&mut self) {
        match self {
            Channel::Stream(c) => c.close(),
            Channel::Datagram(c) => c.close(),
            Channel::WebSocket(c) => c.close().await,
            Channel::RawEcho(c) => c.close(),
            Channel::NameQuery(c) => c.close(),
        }
    }

    async fn send(&mut self, data: &[u8], config: &TransportConfig) -> LinkResult<usize> {
        match self {
            Channel::Stream(c) => c.send(data, config).await,
            Channel::Datagram(c) => c.send(data, config).await,
            Channel::WebSocket(c) => c.send(data, config).await,
            Channel::RawEcho(c) => c.send(data, config).await,
            Channel::NameQuery(c) => c.send(data, config).await,
        }
    }

    async fn receive(&mut self, config: &TransportConfig) -> LinkResult<Vec<u8>> {
        match self {
            Channel::Stream(c) => c.receive(config).await,
            Channel::Datagram(c) => c.receive(config).await,
            Channel::WebSocket(c) => c.receive(config).await,
            Channel::RawEcho(c) => c.receive(config).await,
            Channel::NameQuery(c) => c.receive(config).await,
        }
    }
}

/// A configured transport with its connection state.
///
/// All blocking operations are bounded by the configured deadlines,
/// and deadline expiry always surfaces as [`LinkError::Timeout`].
#[derive(Debug)]
pub struct Transport {
    kind: TransportKind,
    config: TransportConfig,
    status: TransportStatus,
    last_error: Option<String>,
    channel: Channel,
}

impl Transport {
    /// Build a disconnected transport of the given kind.
    pub fn new(kind: TransportKind, config: TransportConfig) -> Self {
        Transport {
            channel: Channel::for_kind(kind),
            kind,
            config,
            status: TransportStatus::Disconnected,
            last_error: None,
        }
    }

    /// The transport kind.
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Current lifecycle state.
    pub fn status(&self) -> TransportStatus {
        self.status
    }

    /// Human-readable description of the most recent failure.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Connected iff the status says so and the channel holds a live
    /// handle.
    pub fn is_connected(&self) -> bool {
        self.status == TransportStatus::Connected && self.channel.is_open()
    }

    /// Transport-specific syntax and precondition checks, performed
    /// without any network I/O.
    pub fn validate_config(&self) -> LinkResult<()> {
        match self.kind {
            TransportKind::Stream => StreamChannel::validate(&self.config),
            TransportKind::Datagram => DatagramChannel::validate(&self.config),
            TransportKind::WebSocket => WebSocketChannel::validate(&self.config),
            TransportKind::RawEcho => EchoChannel::validate(&self.config),
            TransportKind::NameQuery => QueryChannel::validate(&self.config),
        }
    }

    /// Replace the configuration. Refused while connected.
    pub fn update_config(&mut self, config: TransportConfig) -> LinkResult<()> {
        if self.status == TransportStatus::Connected {
            return Err(LinkError::Configuration(
                "configuration is immutable while connected".into(),
            ));
        }
        self.config = config;
        Ok(())
    }

    /// Open the channel, retrying up to `retry_count` times with
    /// `retry_interval` between attempts.
    ///
    /// Calling while already connected is an error, not a no-op.
    /// Cancellation is honored between attempts and aborts the loop
    /// with [`LinkError::Cancelled`].
    pub async fn connect(&mut self, cancel: &CancellationToken) -> LinkResult<()> {
        if self.is_connected() {
            return Err(LinkError::Connection(format!(
                "{} transport already connected",
                self.kind
            )));
        }
        self.validate_config()?;

        self.status = TransportStatus::Connecting;
        let attempts = self.config.retry_count.saturating_add(1);
        let mut last = LinkError::Connection("no connect attempt made".into());

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                self.status = TransportStatus::Disconnected;
                return Err(LinkError::Cancelled);
            }

            let result = timeout(self.config.connect_timeout, self.channel.open(&self.config)).await;
            match result {
                Ok(Ok(())) => {
                    debug!(transport = %self.kind, address = %self.config.address, "connected");
                    self.status = TransportStatus::Connected;
                    self.last_error = None;
                    return Ok(());
                }
                Ok(Err(e)) => last = e,
                Err(_) => last = LinkError::Timeout(self.config.connect_timeout),
            }

            warn!(
                transport = %self.kind,
                attempt,
                attempts,
                error = %last,
                "connect attempt failed"
            );
            self.last_error = Some(last.to_string());

            if attempt < attempts {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        self.status = TransportStatus::Disconnected;
                        return Err(LinkError::Cancelled);
                    }
                    _ = sleep(self.config.retry_interval) => {}
                }
            }
        }

        self.status = TransportStatus::Error;
        Err(last)
    }

    /// Release the channel. A no-op success when already disconnected.
    pub async fn disconnect(&mut self) -> LinkResult<()> {
        if self.channel.is_open() {
            debug!(transport = %self.kind, "disconnecting");
            self.channel.close().await;
        }
        self.status = TransportStatus::Disconnected;
        Ok(())
    }

    /// Send a payload, bounded by the configured write timeout.
    pub async fn send(&mut self, data: &[u8]) -> LinkResult<usize> {
        if !self.is_connected() {
            return Err(LinkError::Send(format!("{} transport not connected", self.kind)));
        }

        let deadline = self.config.write_timeout;
        let result = match timeout(deadline, self.channel.send(data, &self.config)).await {
            Ok(inner) => inner,
            Err(_) => Err(LinkError::Timeout(deadline)),
        };
        self.note_io_result(&result);
        result
    }

    /// Receive a payload, bounded by the configured read timeout.
    pub async fn receive(&mut self) -> LinkResult<Vec<u8>> {
        if !self.is_connected() {
            return Err(LinkError::Receive(format!(
                "{} transport not connected",
                self.kind
            )));
        }

        let deadline = self.config.read_timeout;
        let result = match timeout(deadline, self.channel.receive(&self.config)).await {
            Ok(inner) => inner,
            Err(_) => Err(LinkError::Timeout(deadline)),
        };
        self.note_io_result(&result);
        result
    }

    /// Record an I/O outcome: disconnections drop the status, other
    /// failures only update the last-error field.
    fn note_io_result<T>(&mut self, result: &LinkResult<T>) {
        if let Err(e) = result {
            self.last_error = Some(e.to_string());
            if matches!(e, LinkError::Disconnection(_)) {
                self.status = TransportStatus::Disconnected;
            }
        }
    }
}
