//! In-memory adapters for tests and offline runs.
//!
//! - [`LoopbackConnector`] plays the remote STOMP broker over channels
//! - [`RecordingPublisher`] captures intents instead of sending them
//! - [`InMemorySnapshotClient`] serves canned conversations

use crate::client::error::{ConnectionError, SnapshotError};
use crate::client::services::snapshot_client::SnapshotClient;
use crate::client::services::websocket_client::{Connector, IntentPublisher, Link};
use crate::common::models::*;
use crate::common::protocol::{ChannelKind, Intent};
use crate::common::stomp::{Command, Frame};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Default)]
struct LoopbackState {
    attempts: usize,
    refuse: bool,
    reject: Option<String>,
    handshake_delay: Option<Duration>,
    to_client: Option<mpsc::UnboundedSender<Frame>>,
    from_client: Option<mpsc::UnboundedReceiver<Frame>>,
    sent: Vec<Frame>,
}

/// Fake broker. Every `open` counts as one connection attempt.
#[derive(Default)]
pub struct LoopbackConnector {
    state: Mutex<LoopbackState>,
}

impl LoopbackConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> usize {
        self.state.lock().attempts
    }

    /// Makes the socket itself fail to open.
    pub fn set_refuse(&self, refuse: bool) {
        self.state.lock().refuse = refuse;
    }

    /// Answers the next CONNECT with an ERROR frame carrying `reason`.
    pub fn set_reject(&self, reason: Option<&str>) {
        self.state.lock().reject = reason.map(str::to_string);
    }

    /// Holds the handshake reply back for `delay` on later opens.
    pub fn set_handshake_delay(&self, delay: Option<Duration>) {
        self.state.lock().handshake_delay = delay;
    }

    /// Delivers a MESSAGE frame on `kind`'s subscription. Returns false when
    /// no link is open.
    pub fn push(&self, kind: ChannelKind, json: &str) -> bool {
        let state = self.state.lock();
        let Some(to_client) = &state.to_client else {
            return false;
        };
        let frame = Frame::new(Command::Message)
            .header("destination", kind.destination())
            .header("subscription", kind.subscription_id())
            .header("content-type", "application/json")
            .body(json);
        to_client.send(frame).is_ok()
    }

    pub fn push_frame(&self, frame: Frame) -> bool {
        match &self.state.lock().to_client {
            Some(to_client) => to_client.send(frame).is_ok(),
            None => false,
        }
    }

    /// Simulates the socket dropping.
    pub fn drop_link(&self) {
        let mut state = self.state.lock();
        state.to_client = None;
        Self::collect(&mut state);
        state.from_client = None;
    }

    /// Every frame the client has written so far, across links.
    pub fn sent_frames(&self) -> Vec<Frame> {
        let mut state = self.state.lock();
        Self::collect(&mut state);
        state.sent.clone()
    }

    pub fn sent_to(&self, destination: &str) -> Vec<Frame> {
        self.sent_frames()
            .into_iter()
            .filter(|f| f.get("destination") == Some(destination))
            .collect()
    }

    fn collect(state: &mut LoopbackState) {
        if let Some(rx) = state.from_client.as_mut() {
            while let Ok(frame) = rx.try_recv() {
                state.sent.push(frame);
            }
        }
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn open(&self) -> Result<Link, ConnectionError> {
        let mut state = self.state.lock();
        state.attempts += 1;
        if state.refuse {
            return Err(ConnectionError::ConnectionFailed("Connection refused".to_string()));
        }
        Self::collect(&mut state);

        let (to_client, client_rx) = mpsc::unbounded_channel();
        let (client_tx, from_client) = mpsc::unbounded_channel();
        let reply = match &state.reject {
            Some(reason) => Frame::new(Command::Error).header("message", reason.as_str()),
            None => Frame::new(Command::Connected).header("version", "1.2"),
        };
        match state.handshake_delay {
            Some(delay) => {
                let to_client = to_client.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = to_client.send(reply);
                });
            }
            None => {
                let _ = to_client.send(reply);
            }
        }
        state.to_client = Some(to_client);
        state.from_client = Some(from_client);
        Ok(Link { tx: client_tx, rx: client_rx })
    }

    fn host(&self) -> String {
        "loopback".to_string()
    }
}

/// Captures intents for assertions.
#[derive(Default)]
pub struct RecordingPublisher {
    intents: Mutex<Vec<Intent>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intents(&self) -> Vec<Intent> {
        self.intents.lock().clone()
    }

    /// The `isTyping` flags published so far, in order.
    pub fn typing_flags(&self) -> Vec<bool> {
        self.intents
            .lock()
            .iter()
            .filter_map(|i| match i {
                Intent::Typing { is_typing, .. } => Some(*is_typing),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.intents.lock().clear();
    }
}

impl IntentPublisher for RecordingPublisher {
    fn publish(&self, intent: Intent) {
        self.intents.lock().push(intent);
    }
}

#[derive(Default)]
struct SnapshotData {
    conversations: Vec<Conversation>,
    details: HashMap<ChatId, ConversationDetail>,
    online: HashSet<UserId>,
    delays: HashMap<ChatId, Duration>,
    failing: bool,
    next_chat_id: ChatId,
    calls: usize,
}

/// Canned snapshot service.
#[derive(Default)]
pub struct InMemorySnapshotClient {
    data: Mutex<SnapshotData>,
}

impl InMemorySnapshotClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_conversation(self, conversation: Conversation, messages: Vec<Message>) -> Self {
        {
            let mut data = self.data.lock();
            data.details.insert(
                conversation.chat_id,
                ConversationDetail {
                    chat_id: conversation.chat_id,
                    companion_name: conversation.companion.name.clone(),
                    companion_username: conversation.companion.username.clone(),
                    messages,
                },
            );
            data.next_chat_id = data.next_chat_id.max(conversation.chat_id + 1);
            data.conversations.push(conversation);
        }
        self
    }

    pub fn with_online(self, users: &[UserId]) -> Self {
        self.data.lock().online.extend(users.iter().copied());
        self
    }

    /// Every request fails with HTTP 500 while set.
    pub fn set_failing(&self, failing: bool) {
        self.data.lock().failing = failing;
    }

    /// Delays `open_conversation(chat_id)` by `delay`.
    pub fn set_delay(&self, chat_id: ChatId, delay: Duration) {
        self.data.lock().delays.insert(chat_id, delay);
    }

    pub fn set_unread(&self, chat_id: ChatId, unread: u32) {
        if let Some(c) = self.data.lock().conversations.iter_mut().find(|c| c.chat_id == chat_id) {
            c.unread_count = unread;
        }
    }

    pub fn calls(&self) -> usize {
        self.data.lock().calls
    }

    fn begin(&self) -> Result<(), SnapshotError> {
        let mut data = self.data.lock();
        data.calls += 1;
        if data.failing {
            return Err(SnapshotError::Status {
                status: 500,
                message: "Internal Server Error".to_string(),
            });
        }
        Ok(())
    }

    fn not_found(chat_id: ChatId) -> SnapshotError {
        SnapshotError::Status {
            status: 404,
            message: format!("Chat {} not found", chat_id),
        }
    }
}

#[async_trait]
impl SnapshotClient for InMemorySnapshotClient {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, SnapshotError> {
        self.begin()?;
        Ok(self.data.lock().conversations.clone())
    }

    async fn open_conversation(&self, chat_id: ChatId) -> Result<ConversationDetail, SnapshotError> {
        self.begin()?;
        let delay = self.data.lock().delays.get(&chat_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let detail = self.data.lock().details.get(&chat_id).cloned();
        detail.ok_or_else(|| Self::not_found(chat_id))
    }

    async fn create_conversation(&self, companion_username: &str) -> Result<CreatedConversation, SnapshotError> {
        self.begin()?;
        let mut data = self.data.lock();
        let chat_id = data.next_chat_id.max(1);
        data.next_chat_id = chat_id + 1;
        let companion = User {
            id: 1000 + chat_id,
            name: companion_username.to_string(),
            username: companion_username.to_string(),
        };
        data.details.insert(
            chat_id,
            ConversationDetail {
                chat_id,
                companion_name: companion.name.clone(),
                companion_username: companion.username.clone(),
                messages: Vec::new(),
            },
        );
        data.conversations.insert(
            0,
            Conversation {
                chat_id,
                companion: companion.clone(),
                last_message: MessagePreview::default(),
                unread_count: 0,
            },
        );
        Ok(CreatedConversation {
            chat_id,
            last_message: String::new(),
            participants: vec![companion],
        })
    }

    async fn delete_conversation(&self, chat_id: ChatId) -> Result<Vec<Conversation>, SnapshotError> {
        self.begin()?;
        let mut data = self.data.lock();
        if data.details.remove(&chat_id).is_none() {
            return Err(Self::not_found(chat_id));
        }
        data.conversations.retain(|c| c.chat_id != chat_id);
        Ok(data.conversations.clone())
    }

    async fn close_conversation(&self, chat_id: ChatId) -> Result<Vec<Conversation>, SnapshotError> {
        self.begin()?;
        let data = self.data.lock();
        if !data.details.contains_key(&chat_id) {
            return Err(Self::not_found(chat_id));
        }
        Ok(data.conversations.clone())
    }

    async fn list_online_users(&self) -> Result<HashSet<UserId>, SnapshotError> {
        self.begin()?;
        Ok(self.data.lock().online.clone())
    }

    async fn user_status(&self, user_id: UserId) -> Result<bool, SnapshotError> {
        self.begin()?;
        Ok(self.data.lock().online.contains(&user_id))
    }
}
