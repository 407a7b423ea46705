//! UDP datagram channel.

use tokio::net::UdpSocket;

use crate::core::{parse_host_port, LinkError, LinkResult, TransportConfig};

/// Connected UDP channel. The address is `host:port`.
///
/// "Connect" here only fixes the peer address on the socket; there is
/// no handshake, so a dead controller surfaces as receive timeouts,
/// not as a connect failure.
#[derive(Debug, Default)]
pub struct DatagramChannel {
    socket: Option<UdpSocket>,
}

impl DatagramChannel {
    pub(super) fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    pub(super) async fn open(&mut self, config: &TransportConfig) -> LinkResult<()> {
        let (host, port) = parse_host_port(&config.address)?;
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| LinkError::connect_io(e, config.connect_timeout))?;
        socket
            .connect((host.as_str(), port))
            .await
            .map_err(|e| LinkError::connect_io(e, config.connect_timeout))?;

        self.socket = Some(socket);
        Ok(())
    }

    pub(super) fn close(&mut self) {
        self.socket = None;
    }

    pub(super) async fn send(&mut self, data: &[u8], config: &TransportConfig) -> LinkResult<usize> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| LinkError::Send("socket not connected".into()))?;

        socket
            .send(data)
            .await
            .map_err(|e| LinkError::send_io(e, config.write_timeout))
    }

    pub(super) async fn receive(&mut self, config: &TransportConfig) -> LinkResult<Vec<u8>> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| LinkError::Receive("socket not connected".into()))?;

        let mut buf = vec![0u8; config.buffer_size];
        let n = socket
            .recv(&mut buf)
            .await
            .map_err(|e| LinkError::receive_io(e, config.read_timeout))?;
        buf.truncate(n);
        Ok(buf)
    }

    pub(super) fn validate(config: &TransportConfig) -> LinkResult<()> {
        parse_host_port(&config.address).map(|_| ())
    }
}
