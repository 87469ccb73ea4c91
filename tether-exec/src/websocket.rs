//! WebSocket connector for terminal services that speak `{"data": "..."}`
//! text frames in both directions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use tether_core::EndpointDescriptor;

use crate::error::ExecError;
use crate::transport::{Channel, Connector};

/// One terminal frame on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalFrame {
    pub data: String,
}

/// Encode an outbound payload as a JSON text frame.
pub fn encode_frame(payload: &str) -> String {
    serde_json::json!({ "data": payload }).to_string()
}

/// Extract the payload of an inbound text frame. Anything that is not a
/// `{"data": ...}` object is passed through as raw terminal text.
pub fn decode_frame(text: &str) -> String {
    match serde_json::from_str::<TerminalFrame>(text) {
        Ok(frame) => frame.data,
        Err(_) => text.to_string(),
    }
}

/// Opens a WebSocket to the descriptor's address, authenticating with its
/// bearer token.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, endpoint: &EndpointDescriptor) -> Result<Channel, ExecError> {
        let mut request = endpoint
            .address
            .as_str()
            .into_client_request()
            .map_err(|e| ExecError::connection(&endpoint.id, e))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", endpoint.token))
            .map_err(|e| ExecError::connection(&endpoint.id, e))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (ws_stream, _response) = connect_async(request)
            .await
            .map_err(|e| ExecError::connection(&endpoint.id, e))?;
        tracing::debug!(endpoint = %endpoint.id, "terminal websocket open");

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
        let open = Arc::new(AtomicBool::new(true));

        let pump = {
            let open = open.clone();
            let endpoint = endpoint.id.clone();
            tokio::spawn(async move {
                pump_websocket(ws_stream, outbound_rx, inbound_tx).await;
                open.store(false, Ordering::Release);
                tracing::debug!(endpoint = %endpoint, "terminal websocket closed");
            })
        };

        Ok(Channel::from_parts(outbound_tx, inbound_rx, open, Some(pump)))
    }
}

async fn pump_websocket(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::UnboundedSender<String>,
) {
    let (mut sink, mut stream) = ws_stream.split();

    loop {
        tokio::select! {
            next = outbound.recv() => {
                let Some(payload) = next else {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };
                tracing::trace!(bytes = payload.len(), "terminal frame out");
                if sink.send(Message::Text(encode_frame(&payload))).await.is_err() {
                    break;
                }
            }
            message = stream.next() => {
                let payload = match message {
                    Some(Ok(Message::Text(text))) => decode_frame(&text),
                    Some(Ok(Message::Binary(bytes))) => String::from_utf8_lossy(&bytes).into_owned(),
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };
                tracing::trace!(bytes = payload.len(), "terminal frame in");
                if inbound.send(payload).is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_wrap_payload_in_data_field() {
        let encoded = encode_frame("echo \"hi\"\n");
        let value: serde_json::Value = serde_json::from_str(&encoded).expect("json");
        assert_eq!(value["data"], "echo \"hi\"\n");
        assert_eq!(decode_frame(&encoded), "echo \"hi\"\n");
    }

    #[test]
    fn non_frame_text_passes_through() {
        assert_eq!(decode_frame("plain output\r\n"), "plain output\r\n");
        assert_eq!(decode_frame("[1,2]"), "[1,2]");
    }
}
