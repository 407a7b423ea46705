//! Transport registry and failover bookkeeping.
//!
//! The manager owns every configured transport, the active one, the
//! consecutive-failure counter, and the fallback order. It decides
//! *whether* a switch is due; *which* transport comes next under a
//! non-sequential policy, and the jitter before committing, belong to
//! the switcher.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::{LinkError, LinkResult, ManagerConfig};
use crate::transport::{Transport, TransportStatus};

/// Per-transport activity counters, kept across switches.
#[derive(Debug, Default, Clone)]
pub struct TransportHealth {
    /// Successful sends.
    pub sends: u64,
    /// Successful receives.
    pub receives: u64,
    /// Failed sends and receives, timeouts included.
    pub failures: u64,
    /// Description of the most recent failure.
    pub last_error: Option<String>,
}

/// Registry of transports plus failover state.
#[derive(Debug)]
pub struct Manager {
    transports: HashMap<String, Transport>,
    health: HashMap<String, TransportHealth>,
    active: String,
    fallback_order: Vec<String>,
    switch_threshold: u32,
    min_switch_interval: Duration,
    failures: u32,
    last_switch: Option<Instant>,
}

impl Manager {
    /// Build an empty registry. The fallback order is de-duplicated
    /// preserving first occurrence.
    pub fn new(config: ManagerConfig) -> Self {
        let mut fallback_order: Vec<String> = Vec::with_capacity(config.fallback_order.len());
        for name in config.fallback_order {
            if !fallback_order.contains(&name) {
                fallback_order.push(name);
            }
        }

        Manager {
            transports: HashMap::new(),
            health: HashMap::new(),
            active: config.primary,
            fallback_order,
            switch_threshold: config.switch_threshold,
            min_switch_interval: config.min_switch_interval,
            failures: 0,
            last_switch: None,
        }
    }

    /// Register a transport under a unique name.
    pub fn register(&mut self, name: impl Into<String>, transport: Transport) -> LinkResult<()> {
        let name = name.into();
        if self.transports.contains_key(&name) {
            return Err(LinkError::Configuration(format!(
                "transport '{name}' registered twice"
            )));
        }
        self.health.insert(name.clone(), TransportHealth::default());
        self.transports.insert(name, transport);
        Ok(())
    }

    /// Check the registry is usable: at least one transport, the
    /// primary and every fallback name registered, and every
    /// transport's configuration valid. No network I/O.
    pub fn validate(&self) -> LinkResult<()> {
        if self.transports.is_empty() {
            return Err(LinkError::Configuration("no transports registered".into()));
        }
        if !self.transports.contains_key(&self.active) {
            return Err(LinkError::Configuration(format!(
                "primary transport '{}' not registered",
                self.active
            )));
        }
        for name in &self.fallback_order {
            if !self.transports.contains_key(name) {
                return Err(LinkError::Configuration(format!(
                    "fallback transport '{name}' not registered"
                )));
            }
        }
        for (name, transport) in &self.transports {
            transport
                .validate_config()
                .map_err(|e| LinkError::Configuration(format!("transport '{name}': {e}")))?;
        }
        Ok(())
    }

    /// Name of the active transport.
    pub fn active_name(&self) -> &str {
        &self.active
    }

    /// Whether the active transport is connected.
    pub fn is_connected(&self) -> bool {
        self.transports
            .get(&self.active)
            .map(Transport::is_connected)
            .unwrap_or(false)
    }

    /// Lifecycle state of the active transport.
    pub fn active_status(&self) -> Option<TransportStatus> {
        self.transports.get(&self.active).map(Transport::status)
    }

    /// Consecutive send/receive failures on the active transport.
    pub fn failure_count(&self) -> u32 {
        self.failures
    }

    /// Registered names, excluding the active transport.
    pub fn alternates(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .transports
            .keys()
            .filter(|name| **name != self.active)
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Health counters for one transport.
    pub fn health(&self, name: &str) -> Option<&TransportHealth> {
        self.health.get(name)
    }

    /// Connect the active transport.
    pub async fn connect_active(&mut self, cancel: &CancellationToken) -> LinkResult<()> {
        self.active_mut()?.connect(cancel).await
    }

    /// Disconnect every registered transport.
    pub async fn disconnect_all(&mut self) -> LinkResult<()> {
        for transport in self.transports.values_mut() {
            transport.disconnect().await?;
        }
        Ok(())
    }

    /// Send on the active transport, updating failure state.
    pub async fn send(&mut self, data: &[u8]) -> LinkResult<usize> {
        let active = self.active.clone();
        let result = self.active_mut()?.send(data).await;
        self.note_result(&active, result.is_ok(), result.as_ref().err());
        if result.is_ok() {
            if let Some(health) = self.health.get_mut(&active) {
                health.sends += 1;
            }
        }
        result
    }

    /// Receive on the active transport, updating failure state.
    pub async fn receive(&mut self) -> LinkResult<Vec<u8>> {
        let active = self.active.clone();
        let result = self.active_mut()?.receive().await;
        self.note_result(&active, result.is_ok(), result.as_ref().err());
        if result.is_ok() {
            if let Some(health) = self.health.get_mut(&active) {
                health.receives += 1;
            }
        }
        result
    }

    /// Whether the failure counter has reached the switch threshold.
    pub fn switch_due(&self) -> bool {
        self.failures >= self.switch_threshold
    }

    /// Whether enough time has passed since the last switch. A due
    /// switch attempted too early is skipped without resetting the
    /// counter, so it re-arms on the next failure.
    pub fn switch_allowed(&self) -> bool {
        self.last_switch
            .map_or(true, |at| at.elapsed() >= self.min_switch_interval)
    }

    /// The transport after the active one in fallback order, wrapping
    /// to the front. An active transport outside the order starts the
    /// traversal at the front.
    pub fn next_sequential(&self) -> LinkResult<String> {
        if self.fallback_order.is_empty() {
            return Err(LinkError::TransportSwitch("fallback order is empty".into()));
        }
        let next = match self.fallback_order.iter().position(|n| *n == self.active) {
            Some(at) => (at + 1) % self.fallback_order.len(),
            None => 0,
        };
        Ok(self.fallback_order[next].clone())
    }

    /// Disconnect the active transport and bring up `name` in its
    /// place. The new transport is connected before the handover; if
    /// it cannot connect, the old one stays active.
    pub async fn activate(
        &mut self,
        name: &str,
        cancel: &CancellationToken,
    ) -> LinkResult<(String, String)> {
        if !self.transports.contains_key(name) {
            return Err(LinkError::TransportSwitch(format!(
                "transport '{name}' not registered"
            )));
        }

        let old = self.active.clone();
        if let Some(transport) = self.transports.get_mut(&old) {
            transport.disconnect().await?;
        }

        let next = self
            .transports
            .get_mut(name)
            .ok_or_else(|| LinkError::TransportSwitch(format!("transport '{name}' not registered")))?;
        if let Err(e) = next.connect(cancel).await {
            return Err(LinkError::TransportSwitch(format!(
                "could not bring up '{name}': {e}"
            )));
        }

        self.active = name.to_string();
        self.failures = 0;
        self.last_switch = Some(Instant::now());
        info!(from = %old, to = %name, "switched active transport");
        Ok((old, self.active.clone()))
    }

    /// Direct access to a registered transport, for tests that need to
    /// sabotage a channel underneath the failover logic.
    #[cfg(test)]
    pub(crate) fn transport_mut(&mut self, name: &str) -> Option<&mut Transport> {
        self.transports.get_mut(name)
    }

    fn active_mut(&mut self) -> LinkResult<&mut Transport> {
        let name = &self.active;
        self.transports
            .get_mut(name)
            .ok_or_else(|| LinkError::Configuration(format!("active transport '{name}' not registered")))
    }

    fn note_result(&mut self, name: &str, ok: bool, err: Option<&LinkError>) {
        if ok {
            self.failures = 0;
            return;
        }
        self.failures += 1;
        debug!(
            transport = name,
            failures = self.failures,
            threshold = self.switch_threshold,
            "operation failed"
        );
        if let Some(health) = self.health.get_mut(name) {
            health.failures += 1;
            health.last_error = err.map(|e| e.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{TransportConfig, TransportKind};
    use tokio::net::UdpSocket;

    async fn udp_sink() -> String {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 256];
            loop {
                if socket.recv_from(&mut buf).await.is_err() {
                    return;
                }
            }
        });
        addr.to_string()
    }

    fn datagram(address: String) -> Transport {
        Transport::new(TransportKind::Datagram, TransportConfig::new(address))
    }

    fn manager_of(primary: &str, order: &[&str], threshold: u32) -> ManagerConfig {
        let mut config = ManagerConfig::new(primary, order.iter().map(|s| s.to_string()).collect());
        config.switch_threshold = threshold;
        config.min_switch_interval = Duration::ZERO;
        config
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let mut manager = Manager::new(manager_of("a", &["a"], 3));
        manager.register("a", datagram("127.0.0.1:1".into())).unwrap();
        assert!(manager.register("a", datagram("127.0.0.1:2".into())).is_err());
    }

    #[tokio::test]
    async fn test_validate_requires_registered_names() {
        let manager = Manager::new(manager_of("a", &["a", "b"], 3));
        assert!(matches!(manager.validate(), Err(LinkError::Configuration(_))));

        let mut manager = Manager::new(manager_of("a", &["a", "b"], 3));
        manager.register("a", datagram("127.0.0.1:1".into())).unwrap();
        // "b" is named in the fallback order but never registered.
        assert!(manager.validate().is_err());

        manager.register("b", datagram("127.0.0.1:2".into())).unwrap();
        manager.validate().unwrap();
    }

    #[test]
    fn test_fallback_order_deduplicated() {
        let manager = Manager::new(manager_of("a", &["a", "b", "a", "c", "b"], 3));
        assert_eq!(manager.fallback_order, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_failover_after_threshold() {
        let cancel = CancellationToken::new();
        let mut manager = Manager::new(manager_of("primary", &["primary", "backup"], 2));
        manager.register("primary", datagram(udp_sink().await)).unwrap();
        manager.register("backup", datagram(udp_sink().await)).unwrap();
        manager.connect_active(&cancel).await.unwrap();

        // Kill the active channel so sends fail without a network peer.
        manager.transports.get_mut("primary").unwrap().disconnect().await.unwrap();

        assert!(manager.send(b"x").await.is_err());
        assert!(!manager.switch_due(), "due after one failure, threshold is two");
        assert!(manager.send(b"x").await.is_err());
        assert!(manager.switch_due());
        assert!(manager.switch_allowed());

        let next = manager.next_sequential().unwrap();
        assert_eq!(next, "backup");
        let (old, new) = manager.activate(&next, &cancel).await.unwrap();
        assert_eq!((old.as_str(), new.as_str()), ("primary", "backup"));
        assert_eq!(manager.failure_count(), 0);
        assert_eq!(manager.active_name(), "backup");
        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn test_min_switch_interval_guard() {
        let cancel = CancellationToken::new();
        let mut config = manager_of("a", &["a", "b"], 1);
        config.min_switch_interval = Duration::from_secs(60);
        let mut manager = Manager::new(config);
        manager.register("a", datagram(udp_sink().await)).unwrap();
        manager.register("b", datagram(udp_sink().await)).unwrap();
        manager.connect_active(&cancel).await.unwrap();

        assert!(manager.switch_allowed(), "first switch is never gated");
        manager.activate("b", &cancel).await.unwrap();
        assert!(!manager.switch_allowed());
    }

    #[tokio::test]
    async fn test_sequential_wraparound() {
        let cancel = CancellationToken::new();
        let mut manager = Manager::new(manager_of("a", &["a", "b", "c"], 1));
        for name in ["a", "b", "c"] {
            manager.register(name, datagram(udp_sink().await)).unwrap();
        }
        manager.connect_active(&cancel).await.unwrap();

        let mut seen = Vec::new();
        for _ in 0..3 {
            let next = manager.next_sequential().unwrap();
            manager.activate(&next, &cancel).await.unwrap();
            seen.push(manager.active_name().to_string());
        }
        assert_eq!(seen, vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn test_activate_unregistered_fails() {
        let cancel = CancellationToken::new();
        let mut manager = Manager::new(manager_of("a", &["a"], 1));
        manager.register("a", datagram(udp_sink().await)).unwrap();
        assert!(matches!(
            manager.activate("ghost", &cancel).await,
            Err(LinkError::TransportSwitch(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_activation_keeps_old_active() {
        let cancel = CancellationToken::new();
        let mut manager = Manager::new(manager_of("a", &["a", "b"], 1));
        manager.register("a", datagram(udp_sink().await)).unwrap();

        // A stream transport with nothing listening cannot come up.
        let mut dead_config = TransportConfig::new("127.0.0.1:1");
        dead_config.retry_count = 0;
        manager.register("b", Transport::new(TransportKind::Stream, dead_config)).unwrap();
        manager.connect_active(&cancel).await.unwrap();

        assert!(matches!(
            manager.activate("b", &cancel).await,
            Err(LinkError::TransportSwitch(_))
        ));
        assert_eq!(manager.active_name(), "a");
    }

    #[tokio::test]
    async fn test_health_counters() {
        let cancel = CancellationToken::new();
        let mut manager = Manager::new(manager_of("a", &["a"], 5));
        manager.register("a", datagram(udp_sink().await)).unwrap();
        manager.connect_active(&cancel).await.unwrap();

        manager.send(b"one").await.unwrap();
        manager.send(b"two").await.unwrap();
        manager.transports.get_mut("a").unwrap().disconnect().await.unwrap();
        let _ = manager.send(b"three").await;

        let health = manager.health("a").unwrap();
        assert_eq!(health.sends, 2);
        assert_eq!(health.failures, 1);
        assert!(health.last_error.is_some());
    }
}
