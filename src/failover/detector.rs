//! Timeout and inactivity detection.
//!
//! The detector owns two signals: a consecutive-timeout counter fed by
//! the send/receive path, and a last-activity timestamp checked by a
//! periodic background task. Either one crossing its threshold emits a
//! [`SwitchTrigger`] on a channel; the switcher decides whether a
//! switch actually happens. Keeping the trigger path on a channel
//! keeps the timer task off the I/O path's lock.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::DetectorConfig;

/// Why the detector asked for a switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchTrigger {
    /// `timeout_threshold` consecutive timeouts were recorded.
    TimeoutThreshold(u32),
    /// No activity for at least this long.
    Inactivity(Duration),
}

#[derive(Debug)]
struct DetectorState {
    consecutive_timeouts: u32,
    last_activity: Instant,
}

/// Shared handle to the detector state.
///
/// `record_activity` and `record_timeout` are synchronous so the
/// send/receive path can call them without awaiting; the critical
/// sections are a few loads and stores.
#[derive(Debug, Clone)]
pub struct Detector {
    config: DetectorConfig,
    state: Arc<Mutex<DetectorState>>,
    triggers: mpsc::Sender<SwitchTrigger>,
}

impl Detector {
    /// Build a detector and the channel its triggers arrive on.
    pub fn new(config: DetectorConfig) -> (Self, mpsc::Receiver<SwitchTrigger>) {
        let (triggers, receiver) = mpsc::channel(8);
        let detector = Detector {
            config,
            state: Arc::new(Mutex::new(DetectorState {
                consecutive_timeouts: 0,
                last_activity: Instant::now(),
            })),
            triggers,
        };
        (detector, receiver)
    }

    /// Reset both signals. Must be called on every successful send or
    /// receive, and after every transport switch.
    pub fn record_activity(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.consecutive_timeouts = 0;
        state.last_activity = Instant::now();
    }

    /// Count one timeout; fires a trigger the moment the threshold is
    /// met and restarts the count.
    pub fn record_timeout(&self) {
        let fired = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.consecutive_timeouts += 1;
            if state.consecutive_timeouts >= self.config.timeout_threshold {
                state.consecutive_timeouts = 0;
                true
            } else {
                false
            }
        };

        if fired {
            debug!(threshold = self.config.timeout_threshold, "timeout threshold reached");
            // A full queue means a switch is already pending; the
            // trigger can be dropped.
            let _ = self
                .triggers
                .try_send(SwitchTrigger::TimeoutThreshold(self.config.timeout_threshold));
        }
    }

    /// Run the periodic inactivity check until cancelled.
    ///
    /// After firing, the activity timestamp restarts so one lapse
    /// produces one trigger, not one per tick.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval(self.config.check_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("inactivity check stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let idle = {
                        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                        let idle = state.last_activity.elapsed();
                        if idle >= self.config.max_inactivity {
                            state.last_activity = Instant::now();
                            Some(idle)
                        } else {
                            None
                        }
                    };
                    if let Some(idle) = idle {
                        debug!(?idle, "inactivity threshold reached");
                        let _ = self.triggers.try_send(SwitchTrigger::Inactivity(idle));
                    }
                }
            }
        }
    }
}
