use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde_json::json;
use taskbot_slack::{
    events::SlackEnvelope,
    socket::{parse_socket_frame, SocketFrame, SocketTransport, TransportError},
};
use tokio::{net::TcpStream, sync::Mutex};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use crate::slack_api::HttpSlackApi;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Socket-mode websocket opened through `apps.connections.open`.
pub struct WebSocketTransport {
    api: Arc<HttpSlackApi>,
    sink: Mutex<Option<SplitSink<WsStream, WsMessage>>>,
    source: Mutex<Option<SplitStream<WsStream>>>,
}

impl WebSocketTransport {
    pub fn new(api: Arc<HttpSlackApi>) -> Self {
        Self { api, sink: Mutex::new(None), source: Mutex::new(None) }
    }
}

#[async_trait]
impl SocketTransport for WebSocketTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let url = self
            .api
            .open_socket_url()
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;
        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;
        let (sink, source) = stream.split();

        *self.sink.lock().await = Some(sink);
        *self.source.lock().await = Some(source);
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<SlackEnvelope>, TransportError> {
        let mut guard = self.source.lock().await;
        let source =
            guard.as_mut().ok_or_else(|| TransportError::Receive("not connected".to_owned()))?;

        loop {
            let Some(message) = source.next().await else {
                return Err(TransportError::Closed("websocket stream ended".to_owned()));
            };
            let text = match message.map_err(|error| TransportError::Receive(error.to_string()))? {
                WsMessage::Text(text) => text.to_string(),
                WsMessage::Binary(bytes) => String::from_utf8(bytes.to_vec())
                    .map_err(|error| TransportError::Receive(error.to_string()))?,
                WsMessage::Close(frame) => {
                    let reason = frame
                        .map(|frame| frame.reason.to_string())
                        .unwrap_or_else(|| "close frame".to_owned());
                    return Err(TransportError::Closed(reason));
                }
                WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => continue,
            };

            match parse_socket_frame(&text) {
                Ok(SocketFrame::Envelope(envelope)) => return Ok(Some(envelope)),
                Ok(SocketFrame::Hello) => info!("socket mode hello received"),
                Ok(SocketFrame::Disconnect { reason }) => {
                    return Err(TransportError::Closed(reason));
                }
                Ok(SocketFrame::Other { frame_type }) => {
                    debug!(frame_type = %frame_type, "ignoring socket mode frame");
                }
                Err(error) => warn!(error = %error, "dropping unreadable socket mode frame"),
            }
        }
    }

    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError> {
        let mut guard = self.sink.lock().await;
        let sink =
            guard.as_mut().ok_or_else(|| TransportError::Acknowledge("not connected".to_owned()))?;
        let ack = json!({ "envelope_id": envelope_id }).to_string();
        sink.send(WsMessage::Text(ack.into()))
            .await
            .map_err(|error| TransportError::Acknowledge(error.to_string()))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.source.lock().await.take();
        let Some(mut sink) = self.sink.lock().await.take() else {
            return Ok(());
        };
        sink.close().await.map_err(|error| TransportError::Disconnect(error.to_string()))
    }
}
