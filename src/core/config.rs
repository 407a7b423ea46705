//! Configuration types for transports and the failover layer.
//!
//! All configuration is supplied once at construction by the agent
//! runtime. A transport's configuration is immutable while it is
//! connected; see [`crate::transport::Transport::update_config`].

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::codec::dns::RecordKind;
use crate::core::constants;
use crate::core::error::{LinkError, LinkResult};

/// The five wire transports the layer can run over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// TCP stream socket.
    Stream,
    /// UDP datagram socket.
    Datagram,
    /// WebSocket upgrade over TCP.
    WebSocket,
    /// Raw ICMP echo request/reply.
    RawEcho,
    /// DNS-tunneled TXT queries.
    NameQuery,
}

impl TransportKind {
    /// Short lowercase name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Stream => "stream",
            TransportKind::Datagram => "datagram",
            TransportKind::WebSocket => "websocket",
            TransportKind::RawEcho => "rawecho",
            TransportKind::NameQuery => "namequery",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable per-transport settings.
///
/// The `address` syntax is transport-specific:
///
/// - Stream / Datagram: `host:port`
/// - WebSocket: `ws://host:port/path` or `wss://…` (a bare `host:port`
///   is coerced to `ws://`)
/// - RawEcho: a literal IP address
/// - NameQuery: `domain@resolver` where `resolver` is `ip` or `ip:port`
///   (port defaults to 53)
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Destination address in the transport-specific syntax above.
    pub address: String,

    /// Deadline for a single connect attempt.
    pub connect_timeout: Duration,

    /// Deadline for a blocking receive.
    pub read_timeout: Duration,

    /// Deadline for a blocking send.
    pub write_timeout: Duration,

    /// Number of connect attempts before the last error is returned.
    pub retry_count: u32,

    /// Sleep between connect attempts.
    pub retry_interval: Duration,

    /// Receive buffer size in bytes.
    pub buffer_size: usize,

    /// Enable TCP keep-alive probes (stream transport only).
    pub keep_alive: bool,

    /// Keep-alive probe interval when `keep_alive` is set.
    pub keep_alive_interval: Duration,

    /// Maximum base64 fragment carried per query (name-query only).
    pub max_data_size: usize,

    /// Record type used for tunnel queries (name-query only).
    pub query_kind: RecordKind,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            connect_timeout: constants::DEFAULT_CONNECT_TIMEOUT,
            read_timeout: constants::DEFAULT_READ_TIMEOUT,
            write_timeout: constants::DEFAULT_WRITE_TIMEOUT,
            retry_count: constants::DEFAULT_RETRY_COUNT,
            retry_interval: constants::DEFAULT_RETRY_INTERVAL,
            buffer_size: constants::DEFAULT_BUFFER_SIZE,
            keep_alive: false,
            keep_alive_interval: constants::DEFAULT_KEEPALIVE_INTERVAL,
            max_data_size: constants::DEFAULT_MAX_DATA_SIZE,
            query_kind: RecordKind::Txt,
        }
    }
}

impl TransportConfig {
    /// Create a configuration for the given destination with defaults
    /// for everything else.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    /// Set connect, read, and write timeouts in one call.
    pub fn with_timeouts(mut self, connect: Duration, read: Duration, write: Duration) -> Self {
        self.connect_timeout = connect;
        self.read_timeout = read;
        self.write_timeout = write;
        self
    }

    /// Set the connect retry policy.
    pub fn with_retries(mut self, count: u32, interval: Duration) -> Self {
        self.retry_count = count;
        self.retry_interval = interval;
        self
    }

    /// Enable TCP keep-alive with the given probe interval.
    pub fn with_keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive = true;
        self.keep_alive_interval = interval;
        self
    }

    /// Set the name-query fragment limit.
    pub fn with_max_data_size(mut self, size: usize) -> Self {
        self.max_data_size = size;
        self
    }
}

/// Transport selection policy applied when a switch commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchPolicy {
    /// Next transport in the fallback order, wrapping at the end.
    Sequential,
    /// Uniform pick among registered transports excluding the current.
    Random,
    /// Reserved for success-rate weighting. Not yet implemented:
    /// degrades to `Random` and logs a warning when first exercised.
    Weighted,
}

/// Settings owned by the transport manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Name of the transport activated first.
    pub primary: String,

    /// Circular traversal order for sequential switching. Every name
    /// must refer to a registered transport; duplicates are dropped,
    /// keeping the first occurrence.
    pub fallback_order: Vec<String>,

    /// Consecutive send/receive failures that arm a switch.
    pub switch_threshold: u32,

    /// Minimum spacing between two committed switches.
    pub min_switch_interval: Duration,
}

impl ManagerConfig {
    /// Create a manager configuration with default thresholds.
    pub fn new(primary: impl Into<String>, fallback_order: Vec<String>) -> Self {
        Self {
            primary: primary.into(),
            fallback_order,
            switch_threshold: constants::DEFAULT_SWITCH_THRESHOLD,
            min_switch_interval: constants::DEFAULT_MIN_SWITCH_INTERVAL,
        }
    }
}

/// Settings owned by the timeout detector.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Consecutive timeout errors that fire a switch trigger.
    pub timeout_threshold: u32,

    /// Period of the background inactivity check.
    pub check_interval: Duration,

    /// Idle time after which the channel is treated as silently dead.
    pub max_inactivity: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            timeout_threshold: constants::DEFAULT_TIMEOUT_THRESHOLD,
            check_interval: constants::DEFAULT_CHECK_INTERVAL,
            max_inactivity: constants::DEFAULT_MAX_INACTIVITY,
        }
    }
}

/// Top-level settings for the transport switcher façade.
#[derive(Debug, Clone)]
pub struct SwitcherConfig {
    /// Registry and failover settings.
    pub manager: ManagerConfig,

    /// Timeout and inactivity detection settings.
    pub detector: DetectorConfig,

    /// Selection policy applied on switch.
    pub policy: SwitchPolicy,

    /// Lower bound of the uniform pre-switch jitter window.
    pub jitter_min: Duration,

    /// Upper bound of the uniform pre-switch jitter window.
    pub jitter_max: Duration,
}

impl SwitcherConfig {
    /// Create a switcher configuration with default detector settings,
    /// sequential policy, and default jitter bounds.
    pub fn new(manager: ManagerConfig) -> Self {
        Self {
            manager,
            detector: DetectorConfig::default(),
            policy: SwitchPolicy::Sequential,
            jitter_min: constants::DEFAULT_JITTER_MIN,
            jitter_max: constants::DEFAULT_JITTER_MAX,
        }
    }

    /// Set the selection policy.
    pub fn with_policy(mut self, policy: SwitchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the jitter window.
    pub fn with_jitter(mut self, min: Duration, max: Duration) -> Self {
        self.jitter_min = min;
        self.jitter_max = max;
        self
    }

    /// Set the detector configuration.
    pub fn with_detector(mut self, detector: DetectorConfig) -> Self {
        self.detector = detector;
        self
    }

    /// Check internal consistency: jitter bounds ordered, thresholds
    /// non-zero.
    pub fn validate(&self) -> LinkResult<()> {
        if self.jitter_min > self.jitter_max {
            return Err(LinkError::Configuration(format!(
                "jitter_min {:?} exceeds jitter_max {:?}",
                self.jitter_min, self.jitter_max
            )));
        }
        if self.manager.switch_threshold == 0 {
            return Err(LinkError::Configuration(
                "switch_threshold must be at least 1".into(),
            ));
        }
        if self.detector.timeout_threshold == 0 {
            return Err(LinkError::Configuration(
                "timeout_threshold must be at least 1".into(),
            ));
        }
        if self.detector.check_interval.is_zero() {
            return Err(LinkError::Configuration(
                "check_interval must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// ADDRESS PARSING
// =============================================================================

/// Parse a `host:port` destination for the stream and datagram
/// transports. Hostnames are resolved at connect time, so this only
/// checks the shape.
pub(crate) fn parse_host_port(address: &str) -> LinkResult<(String, u16)> {
    let (host, port) = address.rsplit_once(':').ok_or_else(|| {
        LinkError::Configuration(format!("address '{address}' must be host:port"))
    })?;
    if host.is_empty() {
        return Err(LinkError::Configuration(format!(
            "address '{address}' has an empty host"
        )));
    }
    let port: u16 = port.parse().map_err(|_| {
        LinkError::Configuration(format!("address '{address}' has an invalid port"))
    })?;
    Ok((host.to_string(), port))
}

/// Parse the raw-echo destination, which must be a literal IP address.
pub(crate) fn parse_echo_target(address: &str) -> LinkResult<IpAddr> {
    address.parse().map_err(|_| {
        LinkError::Configuration(format!(
            "raw echo address '{address}' must be a literal IP address"
        ))
    })
}

/// Parse a `domain@resolver` name-query destination.
///
/// Returns the tunnel domain and the resolver socket address. The
/// resolver must be a literal IP with an optional port (default 53).
pub(crate) fn parse_name_query(address: &str) -> LinkResult<(String, SocketAddr)> {
    let (domain, resolver) = address.split_once('@').ok_or_else(|| {
        LinkError::Configuration(format!(
            "name query address '{address}' must be domain@resolver"
        ))
    })?;
    if domain.is_empty() {
        return Err(LinkError::Configuration(
            "name query domain must be non-empty".into(),
        ));
    }
    if resolver.is_empty() {
        return Err(LinkError::Configuration(
            "name query resolver must be non-empty".into(),
        ));
    }

    let resolver_addr = if let Ok(addr) = resolver.parse::<SocketAddr>() {
        addr
    } else {
        let ip: IpAddr = resolver.parse().map_err(|_| {
            LinkError::Configuration(format!(
                "resolver '{resolver}' must be an IP address with optional port"
            ))
        })?;
        SocketAddr::new(ip, constants::DEFAULT_RESOLVER_PORT)
    };

    Ok((domain.to_string(), resolver_addr))
}

/// Normalize a WebSocket destination to a full URL.
pub(crate) fn parse_websocket_url(address: &str) -> LinkResult<String> {
    if address.is_empty() {
        return Err(LinkError::Configuration(
            "websocket address must be non-empty".into(),
        ));
    }
    if address.starts_with("ws://") || address.starts_with("wss://") {
        Ok(address.to_string())
    } else if address.contains("://") {
        Err(LinkError::Configuration(format!(
            "websocket address '{address}' must use ws:// or wss://"
        )))
    } else {
        Ok(format!("ws://{address}"))
    }
}
