//! Seams to the external collaborators: history fetch, message send and the
//! live transport. In-memory implementations back the replay command and tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::{FetchError, SendError, TransportError};
use crate::protocol::SendRequest;

/// One raw message event from the live transport.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveEvent {
    /// Room from the frame envelope, when the transport provides one
    pub room_id: Option<String>,
    pub payload: Value,
}

/// One-shot history read per room.
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn fetch(&self, room_id: &str) -> Result<Vec<Value>, FetchError>;
}

/// Outbound send. `Ok` means the server acknowledged the message.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, request: &SendRequest) -> Result<(), SendError>;
}

/// Live publish/subscribe channel keyed by room.
///
/// `next_event` must be cancel safe: the session polls it under a timeout.
#[async_trait]
pub trait LiveTransport: Send {
    async fn connect(&mut self) -> Result<(), TransportError>;
    async fn subscribe(&mut self, room_id: &str) -> Result<(), TransportError>;
    async fn unsubscribe(&mut self, room_id: &str) -> Result<(), TransportError>;
    /// Next message event; `Ok(None)` when the peer closed the stream.
    async fn next_event(&mut self) -> Result<Option<LiveEvent>, TransportError>;
    async fn close(&mut self);
}

/// The collaborators a session runs against.
pub struct Services {
    pub history: Arc<dyn HistorySource>,
    pub sender: Arc<dyn MessageSender>,
    pub live: Box<dyn LiveTransport>,
}

// ============================================================================
// In-memory implementations
// ============================================================================

/// History served from memory, with an optional artificial latency.
#[derive(Default)]
pub struct MemoryHistory {
    rooms: Mutex<HashMap<String, Result<Vec<Value>, FetchError>>>,
    latency: Duration,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_room(self, room_id: impl Into<String>, messages: Vec<Value>) -> Self {
        if let Ok(mut rooms) = self.rooms.lock() {
            rooms.insert(room_id.into(), Ok(messages));
        }
        self
    }

    pub fn with_failure(self, room_id: impl Into<String>, error: FetchError) -> Self {
        if let Ok(mut rooms) = self.rooms.lock() {
            rooms.insert(room_id.into(), Err(error));
        }
        self
    }
}

#[async_trait]
impl HistorySource for MemoryHistory {
    async fn fetch(&self, room_id: &str) -> Result<Vec<Value>, FetchError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let rooms = self
            .rooms
            .lock()
            .map_err(|_| FetchError::Request("history store poisoned".into()))?;
        // Unknown rooms have no history yet.
        rooms.get(room_id).cloned().unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Scripted result of one send call.
#[derive(Debug, Clone)]
pub struct ScriptedSend {
    pub delay: Duration,
    pub outcome: Result<(), SendError>,
}

impl ScriptedSend {
    pub fn ok_after(delay: Duration) -> Self {
        Self {
            delay,
            outcome: Ok(()),
        }
    }

    pub fn fail_after(delay: Duration, reason: impl Into<String>) -> Self {
        Self {
            delay,
            outcome: Err(SendError::Rejected(reason.into())),
        }
    }
}

/// Sender that plays back scripted outcomes in call order and records
/// every request. Calls beyond the script succeed immediately.
#[derive(Default)]
pub struct MemorySender {
    script: Mutex<VecDeque<ScriptedSend>>,
    sent: Mutex<Vec<SendRequest>>,
}

impl MemorySender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted(outcomes: impl IntoIterator<Item = ScriptedSend>) -> Self {
        Self {
            script: Mutex::new(outcomes.into_iter().collect()),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<SendRequest> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl MessageSender for MemorySender {
    async fn send(&self, request: &SendRequest) -> Result<(), SendError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(request.clone());
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match next {
            Some(step) => {
                if !step.delay.is_zero() {
                    tokio::time::sleep(step.delay).await;
                }
                step.outcome
            }
            None => Ok(()),
        }
    }
}

/// Commands fed into a [`ChannelTransport`].
#[derive(Debug)]
enum Feed {
    Event(LiveEvent),
    Drop(String),
}

/// Test/replay side of a [`ChannelTransport`].
#[derive(Clone)]
pub struct ChannelFeed {
    tx: mpsc::UnboundedSender<Feed>,
    subscriptions: Arc<Mutex<HashSet<String>>>,
    connects: Arc<AtomicUsize>,
}

impl ChannelFeed {
    /// Deliver a message event for `room_id`.
    pub fn push(&self, room_id: impl Into<String>, payload: Value) {
        let _ = self.tx.send(Feed::Event(LiveEvent {
            room_id: Some(room_id.into()),
            payload,
        }));
    }

    /// Simulate a connection loss.
    pub fn drop_connection(&self, reason: impl Into<String>) {
        let _ = self.tx.send(Feed::Drop(reason.into()));
    }

    pub fn is_subscribed(&self, room_id: &str) -> bool {
        self.subscriptions
            .lock()
            .map(|s| s.contains(room_id))
            .unwrap_or(false)
    }

    /// Number of successful `connect` calls so far.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

/// Live transport fed from an in-process channel.
///
/// Only events for subscribed rooms are delivered, like a real server would.
pub struct ChannelTransport {
    rx: mpsc::UnboundedReceiver<Feed>,
    subscriptions: Arc<Mutex<HashSet<String>>>,
    connects: Arc<AtomicUsize>,
    connected: bool,
}

impl ChannelTransport {
    pub fn new() -> (Self, ChannelFeed) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscriptions = Arc::new(Mutex::new(HashSet::new()));
        let connects = Arc::new(AtomicUsize::new(0));
        let feed = ChannelFeed {
            tx,
            subscriptions: subscriptions.clone(),
            connects: connects.clone(),
        };
        let transport = Self {
            rx,
            subscriptions,
            connects,
            connected: false,
        };
        (transport, feed)
    }

    fn subscribed(&self, room_id: &str) -> bool {
        self.subscriptions
            .lock()
            .map(|s| s.contains(room_id))
            .unwrap_or(false)
    }
}

#[async_trait]
impl LiveTransport for ChannelTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.connected = true;
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(&mut self, room_id: &str) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        if let Ok(mut subs) = self.subscriptions.lock() {
            subs.insert(room_id.to_string());
        }
        Ok(())
    }

    async fn unsubscribe(&mut self, room_id: &str) -> Result<(), TransportError> {
        if let Ok(mut subs) = self.subscriptions.lock() {
            subs.remove(room_id);
        }
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<LiveEvent>, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        loop {
            match self.rx.recv().await {
                Some(Feed::Event(event)) => {
                    let room = event
                        .room_id
                        .clone()
                        .or_else(|| crate::message::raw_room_id(&event.payload));
                    if room.as_deref().is_some_and(|r| self.subscribed(r)) {
                        return Ok(Some(event));
                    }
                }
                Some(Feed::Drop(reason)) => {
                    self.connected = false;
                    if let Ok(mut subs) = self.subscriptions.lock() {
                        subs.clear();
                    }
                    return Err(TransportError::Io(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        reason,
                    )));
                }
                None => return Ok(None),
            }
        }
    }

    async fn close(&mut self) {
        self.connected = false;
        if let Ok(mut subs) = self.subscriptions.lock() {
            subs.clear();
        }
    }
}
