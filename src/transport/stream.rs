//! TCP stream channel.

use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::core::{parse_host_port, LinkError, LinkResult, TransportConfig};

/// Plain TCP channel. The address is `host:port`.
#[derive(Debug, Default)]
pub struct StreamChannel {
    stream: Option<TcpStream>,
}

impl StreamChannel {
    pub(super) fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub(super) async fn open(&mut self, config: &TransportConfig) -> LinkResult<()> {
        let (host, port) = parse_host_port(&config.address)?;
        let stream = TcpStream::connect((host.as_str(), port))
            .await
            .map_err(|e| LinkError::connect_io(e, config.connect_timeout))?;

        stream
            .set_nodelay(true)
            .map_err(|e| LinkError::Connection(e.to_string()))?;

        if config.keep_alive {
            let keepalive = TcpKeepalive::new().with_time(config.keep_alive_interval);
            SockRef::from(&stream)
                .set_tcp_keepalive(&keepalive)
                .map_err(|e| LinkError::Connection(e.to_string()))?;
        }

        self.stream = Some(stream);
        Ok(())
    }

    pub(super) fn close(&mut self) {
        self.stream = None;
    }

    pub(super) async fn send(&mut self, data: &[u8], config: &TransportConfig) -> LinkResult<usize> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| LinkError::Send("stream not connected".into()))?;

        stream
            .write_all(data)
            .await
            .map_err(|e| LinkError::send_io(e, config.write_timeout))?;
        Ok(data.len())
    }

    pub(super) async fn receive(&mut self, config: &TransportConfig) -> LinkResult<Vec<u8>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| LinkError::Receive("stream not connected".into()))?;

        let mut buf = vec![0u8; config.buffer_size];
        let n = stream
            .read(&mut buf)
            .await
            .map_err(|e| LinkError::receive_io(e, config.read_timeout))?;
        if n == 0 {
            return Err(LinkError::Disconnection("peer closed the stream".into()));
        }
        buf.truncate(n);
        Ok(buf)
    }

    pub(super) fn validate(config: &TransportConfig) -> LinkResult<()> {
        parse_host_port(&config.address).map(|_| ())
    }
}
