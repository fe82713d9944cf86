//! Live transport over TCP with newline-delimited JSON frames.
//!
//! Outbound frames are `{"type":"subscribe","room_id":..}` and
//! `{"type":"unsubscribe","room_id":..}`. Inbound message frames are either
//! `{"type":"message","room_id":..,"message":{..}}` or a bare message object
//! carrying its own room field. Other frame types (pings, acks) are skipped.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, trace, warn};

use super::services::{LiveEvent, LiveTransport};
use crate::error::TransportError;
use crate::message::raw_room_id;

/// Longest accepted frame, in bytes
const MAX_FRAME_LENGTH: usize = 64 * 1024;

pub struct TcpTransport {
    addr: String,
    framed: Option<Framed<TcpStream, LinesCodec>>,
}

impl TcpTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            framed: None,
        }
    }

    async fn write_frame(&mut self, frame: Value) -> Result<(), TransportError> {
        let framed = self.framed.as_mut().ok_or(TransportError::NotConnected)?;
        framed.send(frame.to_string()).await?;
        Ok(())
    }
}

#[async_trait]
impl LiveTransport for TcpTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        debug!(addr = %self.addr, "connecting live transport");
        let stream = TcpStream::connect(&self.addr).await?;
        self.framed = Some(Framed::new(
            stream,
            LinesCodec::new_with_max_length(MAX_FRAME_LENGTH),
        ));
        Ok(())
    }

    async fn subscribe(&mut self, room_id: &str) -> Result<(), TransportError> {
        self.write_frame(json!({"type": "subscribe", "room_id": room_id}))
            .await
    }

    async fn unsubscribe(&mut self, room_id: &str) -> Result<(), TransportError> {
        self.write_frame(json!({"type": "unsubscribe", "room_id": room_id}))
            .await
    }

    async fn next_event(&mut self) -> Result<Option<LiveEvent>, TransportError> {
        let framed = self.framed.as_mut().ok_or(TransportError::NotConnected)?;
        loop {
            let line = match framed.next().await {
                Some(line) => line?,
                None => {
                    self.framed = None;
                    return Ok(None);
                }
            };
            match parse_frame(&line) {
                Ok(Some(event)) => return Ok(Some(event)),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "malformed frame skipped"),
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut framed) = self.framed.take() {
            let _ = SinkExt::<String>::close(&mut framed).await;
        }
    }
}

/// Parse one inbound line. `Ok(None)` for frames that carry no message.
pub fn parse_frame(line: &str) -> Result<Option<LiveEvent>, TransportError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let value: Value = serde_json::from_str(line)?;
    match value.get("type").and_then(Value::as_str) {
        Some("message") => {
            let room_id = raw_room_id(&value);
            let payload = value.get("message").cloned().unwrap_or(Value::Null);
            Ok(Some(LiveEvent { room_id, payload }))
        }
        None => Ok(Some(LiveEvent {
            room_id: raw_room_id(&value),
            payload: value,
        })),
        Some(other) => {
            trace!(frame_type = other, "skipping control frame");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_enveloped_frame() {
        let ev = parse_frame(r#"{"type":"message","room_id":"r1","message":{"content":"hi"}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(ev.room_id.as_deref(), Some("r1"));
        assert_eq!(ev.payload["content"], "hi");
    }

    #[test]
    fn test_parse_bare_frame_and_control_frames() {
        let ev = parse_frame(r#"{"roomId":5,"content":"hi"}"#).unwrap().unwrap();
        assert_eq!(ev.room_id.as_deref(), Some("5"));
        assert!(parse_frame(r#"{"type":"pong"}"#).unwrap().is_none());
        assert!(parse_frame("   ").unwrap().is_none());
        assert!(matches!(parse_frame("{oops"), Err(TransportError::Json(_))));
    }

    #[tokio::test]
    async fn test_tcp_transport_subscribe_and_receive() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();
            let sub = lines.next_line().await.unwrap().unwrap();
            write
                .write_all(b"{\"type\":\"pong\"}\n{oops\n{\"type\":\"message\",\"room_id\":\"r1\",\"message\":{\"content\":\"hi\"}}\n")
                .await
                .unwrap();
            sub
        });

        let mut transport = TcpTransport::new(addr);
        transport.connect().await.unwrap();
        transport.subscribe("r1").await.unwrap();
        let ev = transport.next_event().await.unwrap().unwrap();
        assert_eq!(ev.room_id.as_deref(), Some("r1"));

        let sub: Value = serde_json::from_str(&server.await.unwrap()).unwrap();
        assert_eq!(sub["type"], "subscribe");
        assert_eq!(sub["room_id"], "r1");

        // Server hung up.
        assert!(transport.next_event().await.unwrap().is_none());
        transport.close().await;
    }

    #[tokio::test]
    async fn test_not_connected() {
        let mut transport = TcpTransport::new("127.0.0.1:1");
        assert!(matches!(
            transport.subscribe("r1").await,
            Err(TransportError::NotConnected)
        ));
    }
}
