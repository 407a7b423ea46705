//! Core types shared by every layer: errors, configuration, defaults.

mod config;
pub mod constants;
mod error;

pub use config::{
    DetectorConfig, ManagerConfig, SwitchPolicy, SwitcherConfig, TransportConfig, TransportKind,
};
pub use error::{LinkError, LinkResult};

pub(crate) use config::{parse_echo_target, parse_host_port, parse_name_query, parse_websocket_url};
