//! Raw ICMP echo channel.
//!
//! Payloads ride in echo requests; replies carrying this process's
//! identifier are the inbound path. Raw sockets require elevated
//! privilege, so [`EchoChannel::validate`] probes for it up front
//! instead of letting `connect` fail deep in socket setup.
//!
//! The socket is a blocking one driven through `spawn_blocking`: tokio
//! has no raw-socket type, and the OS-level read timeout bounds every
//! blocking call.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use socket2::{Domain, Protocol, Socket, Type};

use crate::codec::icmp::{process_identifier, strip_ipv4_header, EchoFrame, EchoSequence};
use crate::core::{parse_echo_target, LinkError, LinkResult, TransportConfig};

/// Raw echo channel. The address is a literal IPv4 address.
#[derive(Debug)]
pub struct EchoChannel {
    socket: Option<Arc<std::net::UdpSocket>>,
    sequence: EchoSequence,
    identifier: u16,
}

impl Default for EchoChannel {
    fn default() -> Self {
        EchoChannel {
            socket: None,
            sequence: EchoSequence::new(),
            identifier: process_identifier(),
        }
    }
}

impl EchoChannel {
    pub(super) fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    pub(super) fn open(&mut self, config: &TransportConfig) -> LinkResult<()> {
        let peer = parse_echo_target(&config.address)?;

        let socket = raw_icmp_socket()?;
        socket
            .set_read_timeout(Some(config.read_timeout))
            .map_err(|e| LinkError::Connection(e.to_string()))?;
        socket
            .connect(&SocketAddr::new(peer, 0).into())
            .map_err(|e| LinkError::connect_io(e, config.connect_timeout))?;

        self.socket = Some(Arc::new(socket.into()));
        Ok(())
    }

    pub(super) fn close(&mut self) {
        self.socket = None;
    }

    pub(super) async fn send(&mut self, data: &[u8], config: &TransportConfig) -> LinkResult<usize> {
        let socket = Arc::clone(
            self.socket
                .as_ref()
                .ok_or_else(|| LinkError::Send("echo socket not open".into()))?,
        );

        let frame = EchoFrame::request(self.identifier, self.sequence.next(), data);
        let bytes = frame.to_bytes();
        let write_timeout = config.write_timeout;
        let sent = data.len();

        tokio::task::spawn_blocking(move || {
            socket
                .send(&bytes)
                .map_err(|e| LinkError::send_io(e, write_timeout))
        })
        .await
        .map_err(|e| LinkError::Send(e.to_string()))??;

        Ok(sent)
    }

    pub(super) async fn receive(&mut self, config: &TransportConfig) -> LinkResult<Vec<u8>> {
        let socket = Arc::clone(
            self.socket
                .as_ref()
                .ok_or_else(|| LinkError::Receive("echo socket not open".into()))?,
        );

        let identifier = self.identifier;
        let read_timeout = config.read_timeout;
        let buffer_size = config.buffer_size;

        tokio::task::spawn_blocking(move || {
            let deadline = Instant::now() + read_timeout;
            let mut buf = vec![0u8; buffer_size];
            loop {
                let n = socket
                    .recv(&mut buf)
                    .map_err(|e| LinkError::receive_io(e, read_timeout))?;

                // Raw reads deliver the full IP packet. Anything that is
                // not a well-formed reply stamped with our identifier is
                // someone else's traffic; keep waiting until the read
                // timeout expires.
                if let Ok(message) = strip_ipv4_header(&buf[..n]) {
                    if let Ok(frame) = EchoFrame::from_bytes(message) {
                        if frame.is_reply() && frame.identifier == identifier {
                            return Ok(frame.payload);
                        }
                    }
                }

                if Instant::now() >= deadline {
                    return Err(LinkError::Timeout(read_timeout));
                }
            }
        })
        .await
        .map_err(|e| LinkError::Receive(e.to_string()))?
    }

    pub(super) fn validate(config: &TransportConfig) -> LinkResult<()> {
        parse_echo_target(&config.address)?;
        // Probe for raw-socket privilege so connect cannot fail late.
        raw_icmp_socket().map(|_| ())
    }
}

fn raw_icmp_socket() -> LinkResult<Socket> {
    Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).map_err(|e| {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            LinkError::Configuration("raw echo transport requires elevated privilege".into())
        } else {
            LinkError::Configuration(format!("raw socket unavailable: {e}"))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_hostname() {
        // Echo targets must be literal addresses; no resolver is involved.
        let config = TransportConfig::new("c2.example.com");
        assert!(matches!(
            EchoChannel::validate(&config),
            Err(LinkError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_send_before_open_fails() {
        let config = TransportConfig::new("192.0.2.1");
        let mut channel = EchoChannel::default();
        assert!(matches!(
            channel.send(b"x", &config).await,
            Err(LinkError::Send(_))
        ));
    }

    #[test]
    fn test_identifier_is_process_scoped() {
        let a = EchoChannel::default();
        let b = EchoChannel::default();
        assert_eq!(a.identifier, b.identifier);
        assert_eq!(a.identifier, (std::process::id() & 0xFFFF) as u16);
    }
}
