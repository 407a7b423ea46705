//! WebSocket channel.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::core::{parse_websocket_url, LinkError, LinkResult, TransportConfig};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket channel. The address is a `ws://` or `wss://` URL; a bare
/// `host:port` is treated as `ws://host:port`.
#[derive(Debug, Default)]
pub struct WebSocketChannel {
    stream: Option<WsStream>,
}

impl WebSocketChannel {
    pub(super) fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub(super) async fn open(&mut self, config: &TransportConfig) -> LinkResult<()> {
        let url = parse_websocket_url(&config.address)?;
        let (stream, _response) = connect_async(&url)
            .await
            .map_err(|e| LinkError::Connection(format!("websocket handshake: {e}")))?;

        self.stream = Some(stream);
        Ok(())
    }

    pub(super) async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            // Courtesy close frame; the peer may already be gone.
            let _ = stream.close(None).await;
        }
    }

    pub(super) async fn send(&mut self, data: &[u8], _config: &TransportConfig) -> LinkResult<usize> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| LinkError::Send("websocket not connected".into()))?;

        stream
            .send(Message::Binary(data.to_vec()))
            .await
            .map_err(|e| LinkError::Send(e.to_string()))?;
        Ok(data.len())
    }

    pub(super) async fn receive(&mut self, _config: &TransportConfig) -> LinkResult<Vec<u8>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| LinkError::Receive("websocket not connected".into()))?;

        // Control frames are answered by the library; skip them and
        // wait for the next data frame.
        loop {
            match stream.next().await {
                Some(Ok(Message::Binary(data))) => return Ok(data),
                Some(Ok(Message::Text(text))) => return Ok(text.into_bytes()),
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Ok(Message::Close(_))) => {
                    self.stream = None;
                    return Err(LinkError::Disconnection("peer sent close frame".into()));
                }
                Some(Err(e)) => return Err(LinkError::Receive(e.to_string())),
                None => {
                    self.stream = None;
                    return Err(LinkError::Disconnection("websocket stream ended".into()));
                }
            }
        }
    }

    pub(super) fn validate(config: &TransportConfig) -> LinkResult<()> {
        parse_websocket_url(&config.address).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_schemes() {
        assert!(WebSocketChannel::validate(&TransportConfig::new("ws://c2.example.com:8080/ws")).is_ok());
        assert!(WebSocketChannel::validate(&TransportConfig::new("wss://c2.example.com/ws")).is_ok());
        assert!(WebSocketChannel::validate(&TransportConfig::new("10.0.0.5:8080")).is_ok());
    }

    #[test]
    fn test_validate_rejects_other_schemes() {
        assert!(matches!(
            WebSocketChannel::validate(&TransportConfig::new("http://c2.example.com")),
            Err(LinkError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_send_before_open_fails() {
        let config = TransportConfig::new("ws://127.0.0.1:9");
        let mut channel = WebSocketChannel::default();
        assert!(matches!(
            channel.send(b"x", &config).await,
            Err(LinkError::Send(_))
        ));
    }
}
