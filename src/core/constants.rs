//! Default values for transport and failover configuration.
//!
//! These are starting points, not protocol constants: every one of them
//! can be overridden per transport or per switcher at construction time.

use std::time::Duration;

// =============================================================================
// TRANSPORT DEFAULTS
// =============================================================================

/// Default deadline for a single connect attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default deadline for a blocking receive.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Default deadline for a blocking send.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of connect attempts before giving up.
pub const DEFAULT_RETRY_COUNT: u32 = 3;

/// Default sleep between connect attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Default receive buffer size.
pub const DEFAULT_BUFFER_SIZE: usize = 65535;

/// Default TCP keep-alive probe interval.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

// =============================================================================
// NAME-QUERY (DNS) DEFAULTS
// =============================================================================

/// Default maximum base64 fragment size per query.
///
/// Chosen to stay under the 255-byte TXT character-string limit with
/// headroom for record overhead.
pub const DEFAULT_MAX_DATA_SIZE: usize = 250;

/// Default resolver port when the address omits one.
pub const DEFAULT_RESOLVER_PORT: u16 = 53;

/// Reserved subdomain polled on the receive path.
pub const RESPONSE_LABEL: &str = "response";

// =============================================================================
// FAILOVER DEFAULTS
// =============================================================================

/// Consecutive send/receive failures before a switch is considered.
pub const DEFAULT_SWITCH_THRESHOLD: u32 = 3;

/// Minimum spacing between two transport switches.
pub const DEFAULT_MIN_SWITCH_INTERVAL: Duration = Duration::from_secs(60);

/// Consecutive timeouts before the detector fires.
pub const DEFAULT_TIMEOUT_THRESHOLD: u32 = 3;

/// Period of the background inactivity check.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Idle time after which the detector treats the channel as dead.
pub const DEFAULT_MAX_INACTIVITY: Duration = Duration::from_secs(300);

/// Lower bound of the pre-switch jitter window.
pub const DEFAULT_JITTER_MIN: Duration = Duration::from_secs(1);

/// Upper bound of the pre-switch jitter window.
pub const DEFAULT_JITTER_MAX: Duration = Duration::from_secs(30);
