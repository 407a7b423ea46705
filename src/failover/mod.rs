//! Failure detection, transport registry, and switching policy.

mod detector;
mod manager;
mod switcher;

pub use detector::{Detector, SwitchTrigger};
pub use manager::{Manager, TransportHealth};
pub use switcher::{jitter_duration, Switcher};
