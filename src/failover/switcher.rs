//! The switching façade the agent runtime drives.
//!
//! A [`Switcher`] composes the [`Manager`] and the [`Detector`],
//! adding the selection policy, the pre-switch jitter, and the
//! observer hooks. `connect` brings up the primary transport and
//! starts the background inactivity check; `disconnect` cancels the
//! shared signal once, waits for the background tasks, then releases
//! every transport. A disconnected switcher is done for good.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::{LinkError, LinkResult, SwitchPolicy, SwitcherConfig};
use crate::failover::detector::{Detector, SwitchTrigger};
use crate::failover::manager::{Manager, TransportHealth};
use crate::transport::{Transport, TransportStatus};

type ConnectHook = Box<dyn Fn() + Send + Sync>;
type DisconnectHook = Box<dyn Fn(&LinkError) + Send + Sync>;
type SwitchHook = Box<dyn Fn(&str, &str) + Send + Sync>;

#[derive(Default)]
struct Hooks {
    on_connect: Mutex<Option<ConnectHook>>,
    on_disconnect: Mutex<Option<DisconnectHook>>,
    on_switch: Mutex<Option<SwitchHook>>,
}

impl Hooks {
    fn connected(&self) {
        if let Some(hook) = &*self.on_connect.lock().unwrap_or_else(|e| e.into_inner()) {
            hook();
        }
    }

    fn disconnected(&self, err: &LinkError) {
        if let Some(hook) = &*self.on_disconnect.lock().unwrap_or_else(|e| e.into_inner()) {
            hook(err);
        }
    }

    fn switched(&self, old: &str, new: &str) {
        if let Some(hook) = &*self.on_switch.lock().unwrap_or_else(|e| e.into_inner()) {
            hook(old, new);
        }
    }
}

struct Inner {
    config: SwitcherConfig,
    manager: RwLock<Manager>,
    detector: Detector,
    hooks: Hooks,
    cancel: CancellationToken,
}

/// Multi-transport communication façade with automatic failover.
pub struct Switcher {
    inner: Arc<Inner>,
    triggers: Mutex<Option<mpsc::Receiver<SwitchTrigger>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Switcher {
    /// Build a switcher from a validated configuration. Transports are
    /// added with [`Switcher::register`] before [`Switcher::connect`].
    pub fn new(config: SwitcherConfig) -> LinkResult<Self> {
        config.validate()?;

        let (detector, receiver) = Detector::new(config.detector.clone());
        let manager = Manager::new(config.manager.clone());

        Ok(Switcher {
            inner: Arc::new(Inner {
                config,
                manager: RwLock::new(manager),
                detector,
                hooks: Hooks::default(),
                cancel: CancellationToken::new(),
            }),
            triggers: Mutex::new(Some(receiver)),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Register a transport under a unique name.
    pub async fn register(&self, name: impl Into<String>, transport: Transport) -> LinkResult<()> {
        self.inner.manager.write().await.register(name, transport)
    }

    /// Observer invoked after the primary transport comes up.
    pub fn on_connect(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.inner.hooks.on_connect.lock().unwrap_or_else(|e| e.into_inner()) = Some(Box::new(hook));
    }

    /// Observer invoked when the active transport reports a
    /// disconnection error.
    pub fn on_disconnect(&self, hook: impl Fn(&LinkError) + Send + Sync + 'static) {
        *self.inner.hooks.on_disconnect.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(Box::new(hook));
    }

    /// Observer invoked after every committed switch with the old and
    /// new transport names.
    pub fn on_switch(&self, hook: impl Fn(&str, &str) + Send + Sync + 'static) {
        *self.inner.hooks.on_switch.lock().unwrap_or_else(|e| e.into_inner()) = Some(Box::new(hook));
    }

    /// Validate the registry, bring up the primary transport, and
    /// start the background inactivity check.
    pub async fn connect(&self) -> LinkResult<()> {
        {
            let mut manager = self.inner.manager.write().await;
            manager.validate()?;
            manager.connect_active(&self.inner.cancel).await?;
        }
        self.inner.hooks.connected();

        let receiver = self
            .triggers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(mut receiver) = receiver {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.push(tokio::spawn(
                self.inner.detector.clone().run(self.inner.cancel.clone()),
            ));

            let inner = Arc::clone(&self.inner);
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = inner.cancel.cancelled() => return,
                        trigger = receiver.recv() => {
                            let Some(trigger) = trigger else { return };
                            if let Err(e) = inner.auto_switch(trigger).await {
                                warn!(error = %e, "automatic switch failed");
                            }
                        }
                    }
                }
            }));
        }

        Ok(())
    }

    /// Cancel the shared signal, wait for the background tasks to
    /// exit, then release every transport.
    pub async fn disconnect(&self) -> LinkResult<()> {
        self.inner.cancel.cancel();

        let tasks: Vec<JoinHandle<()>> = {
            let mut guard = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        for task in tasks {
            let _ = task.await;
        }

        self.inner.manager.write().await.disconnect_all().await
    }

    /// Send via the active transport, switching and retrying once when
    /// the failure threshold is crossed.
    pub async fn send(&self, data: &[u8]) -> LinkResult<usize> {
        self.inner.op_send(data).await
    }

    /// Receive via the active transport, switching and retrying once
    /// when the failure threshold is crossed.
    pub async fn receive(&self) -> LinkResult<Vec<u8>> {
        self.inner.op_receive().await
    }

    /// Switch to the next transport per the configured policy, right
    /// now. Operator-initiated, so the minimum switch interval does
    /// not apply; the jitter still does.
    pub async fn switch_now(&self) -> LinkResult<()> {
        let mut manager = self.inner.manager.write().await;
        self.inner.switch_locked(&mut manager).await
    }

    /// Name of the active transport.
    pub async fn active_transport_name(&self) -> String {
        self.inner.manager.read().await.active_name().to_string()
    }

    /// Whether the active transport is connected.
    pub async fn is_connected(&self) -> bool {
        self.inner.manager.read().await.is_connected()
    }

    /// Lifecycle state of the active transport.
    pub async fn active_status(&self) -> Option<TransportStatus> {
        self.inner.manager.read().await.active_status()
    }

    /// Health counters for one transport.
    pub async fn health(&self, name: &str) -> Option<TransportHealth> {
        self.inner.manager.read().await.health(name).cloned()
    }
}

impl Inner {
    async fn op_send(&self, data: &[u8]) -> LinkResult<usize> {
        let mut manager = self.manager.write().await;
        match manager.send(data).await {
            Ok(n) => {
                self.detector.record_activity();
                Ok(n)
            }
            Err(e) => {
                self.note_failure(&e);
                if e.is_fatal() || !(manager.switch_due() && manager.switch_allowed()) {
                    return Err(e);
                }
                match self.switch_locked(&mut manager).await {
                    Ok(()) => {
                        let retried = manager.send(data).await;
                        if retried.is_ok() {
                            self.detector.record_activity();
                        }
                        retried
                    }
                    Err(switch_err) => {
                        Err(LinkError::Send(format!("{e}; switch failed: {switch_err}")))
                    }
                }
            }
        }
    }

    async fn op_receive(&self) -> LinkResult<Vec<u8>> {
        let mut manager = self.manager.write().await;
        match manager.receive().await {
            Ok(data) => {
                self.detector.record_activity();
                Ok(data)
            }
            Err(e) => {
                self.note_failure(&e);
                if e.is_fatal() || !(manager.switch_due() && manager.switch_allowed()) {
                    return Err(e);
                }
                match self.switch_locked(&mut manager).await {
                    Ok(()) => {
                        let retried = manager.receive().await;
                        if retried.is_ok() {
                            self.detector.record_activity();
                        }
                        retried
                    }
                    Err(switch_err) => {
                        Err(LinkError::Receive(format!("{e}; switch failed: {switch_err}")))
                    }
                }
            }
        }
    }

    fn note_failure(&self, err: &LinkError) {
        if err.is_timeout() {
            self.detector.record_timeout();
        }
        if matches!(err, LinkError::Disconnection(_)) {
            self.hooks.disconnected(err);
        }
    }

    /// Detector-triggered switch. Skipped silently when the minimum
    /// switch interval has not elapsed.
    async fn auto_switch(&self, trigger: SwitchTrigger) -> LinkResult<()> {
        let mut manager = self.manager.write().await;
        if !manager.switch_allowed() {
            debug!(?trigger, "switch skipped: minimum interval not elapsed");
            return Ok(());
        }
        info!(?trigger, "detector requested a switch");
        self.switch_locked(&mut manager).await
    }

    /// Pick the next transport, sleep the jitter, hand over, notify.
    async fn switch_locked(&self, manager: &mut Manager) -> LinkResult<()> {
        let next = self.pick_next(manager)?;

        let delay = jitter_duration(self.config.jitter_min, self.config.jitter_max);
        debug!(?delay, to = %next, "jitter before switch");
        tokio::select! {
            _ = self.cancel.cancelled() => return Err(LinkError::Cancelled),
            _ = sleep(delay) => {}
        }

        let (old, new) = manager.activate(&next, &self.cancel).await?;
        self.detector.record_activity();
        self.hooks.switched(&old, &new);
        Ok(())
    }

    fn pick_next(&self, manager: &Manager) -> LinkResult<String> {
        match self.config.policy {
            SwitchPolicy::Sequential => manager.next_sequential(),
            SwitchPolicy::Random => pick_random(manager),
            SwitchPolicy::Weighted => {
                // Success-rate weighting is reserved and intentionally
                // unimplemented; it selects like Random until then.
                debug!("weighted policy not implemented, degrading to random");
                pick_random(manager)
            }
        }
    }
}

fn pick_random(manager: &Manager) -> LinkResult<String> {
    manager
        .alternates()
        .choose(&mut rand::thread_rng())
        .cloned()
        .ok_or_else(|| LinkError::TransportSwitch("no alternate transport registered".into()))
}

/// Uniform draw from `[min, max]` inclusive.
pub fn jitter_duration(min: Duration, max: Duration) -> Duration {
    if min >= max {
        return min;
    }
    rand::thread_rng().gen_range(min..=max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DetectorConfig, ManagerConfig, TransportConfig, TransportKind};
    use std::sync::atomic::{AtomicU32, Ordering};
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

    fn quick_config(primary: &str, order: &[&str], threshold: u32) -> SwitcherConfig {
        let mut manager = ManagerConfig::new(primary, order.iter().map(|s| s.to_string()).collect());
        manager.switch_threshold = threshold;
        manager.min_switch_interval = Duration::ZERO;
        SwitcherConfig::new(manager)
            .with_jitter(Duration::ZERO, Duration::ZERO)
            .with_detector(DetectorConfig {
                timeout_threshold: 100,
                check_interval: Duration::from_secs(60),
                max_inactivity: Duration::from_secs(600),
            })
    }

    async fn datagram_switcher(config: SwitcherConfig, names: &[&str]) -> Switcher {
        let switcher = Switcher::new(config).unwrap();
        for name in names {
            let transport =
                Transport::new(TransportKind::Datagram, TransportConfig::new(udp_sink().await));
            switcher.register(*name, transport).await.unwrap();
        }
        switcher
    }

    #[test]
    fn test_jitter_within_bounds() {
        let min = Duration::from_millis(100);
        let max = Duration::from_millis(900);
        for _ in 0..10_000 {
            let d = jitter_duration(min, max);
            assert!(d >= min && d <= max);
        }
        assert_eq!(jitter_duration(max, max), max);
    }

    #[tokio::test]
    async fn test_switch_now_follows_fallback_order() {
        let switcher = datagram_switcher(quick_config("a", &["a", "b"], 3), &["a", "b"]).await;

        let seen: Arc<Mutex<Vec<(String, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        switcher.on_switch(move |old, new| {
            sink.lock().unwrap().push((old.to_string(), new.to_string()));
        });

        switcher.connect().await.unwrap();
        assert_eq!(switcher.active_transport_name().await, "a");

        switcher.switch_now().await.unwrap();
        assert_eq!(switcher.active_transport_name().await, "b");
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[("a".to_string(), "b".to_string())]
        );

        switcher.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_weighted_policy_degrades_to_random() {
        let config = quick_config("a", &["a", "b"], 3).with_policy(SwitchPolicy::Weighted);
        let switcher = datagram_switcher(config, &["a", "b"]).await;
        switcher.connect().await.unwrap();

        // With a single alternate, random selection is deterministic.
        switcher.switch_now().await.unwrap();
        assert_eq!(switcher.active_transport_name().await, "b");

        switcher.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_fails_over_and_retries_once() {
        let switcher = datagram_switcher(quick_config("a", &["a", "b"], 2), &["a", "b"]).await;
        switcher.connect().await.unwrap();

        // Kill the active channel underneath the façade.
        {
            let mut manager = switcher.inner.manager.write().await;
            manager.transport_mut("a").unwrap().disconnect().await.unwrap();
        }

        // First failure stays on "a"; the second crosses the threshold,
        // switches, and the original call succeeds on "b".
        assert!(switcher.send(b"beacon").await.is_err());
        assert_eq!(switcher.send(b"beacon").await.unwrap(), 6);
        assert_eq!(switcher.active_transport_name().await, "b");
        assert_eq!(switcher.health("a").await.unwrap().failures, 2);

        switcher.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_hook_and_state_queries() {
        let switcher = datagram_switcher(quick_config("a", &["a"], 3), &["a"]).await;

        let connects = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&connects);
        switcher.on_connect(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!switcher.is_connected().await);
        switcher.connect().await.unwrap();
        assert!(switcher.is_connected().await);
        assert_eq!(switcher.active_status().await, Some(TransportStatus::Connected));
        assert_eq!(connects.load(Ordering::SeqCst), 1);

        switcher.disconnect().await.unwrap();
        assert!(!switcher.is_connected().await);
    }

    #[tokio::test]
    async fn test_connect_without_transports_is_configuration_error() {
        let switcher = Switcher::new(quick_config("a", &["a"], 3)).unwrap();
        assert!(matches!(
            switcher.connect().await,
            Err(LinkError::Configuration(_))
        ));
    }
}
