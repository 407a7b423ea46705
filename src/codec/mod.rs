//! Wire codecs for the covert tunnels.
//!
//! These modules frame and parse bytes only; socket handling lives in
//! [`crate::transport`].

pub mod dns;
pub mod icmp;
