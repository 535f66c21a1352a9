//! Merges snapshots and streamed events into the client-side view.
//!
//! All state lives behind one lock and is only touched from short,
//! non-suspending sections. Intents are published after the lock is
//! released.

use crate::client::config::SyncConfig;
use crate::client::error::SyncError;
use crate::client::services::dispatcher::{EventDispatcher, Subscription};
use crate::client::services::snapshot_client::SnapshotClient;
use crate::client::services::typing::TypingEmitter;
use crate::client::services::websocket_client::IntentPublisher;
use crate::common::models::*;
use crate::common::protocol::*;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Result of an `open` that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    Applied,
    /// A later `open` was issued before this one completed; its response was dropped.
    Superseded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActiveConversation {
    pub chat_id: ChatId,
    pub companion_name: String,
    pub companion_username: String,
    pub messages: Vec<Message>,
    pub companion_typing: bool,
}

#[derive(Default)]
struct SyncState {
    conversations: Vec<Conversation>,
    active: Option<ActiveConversation>,
    online: HashSet<UserId>,
    last_seen: HashMap<UserId, DateTime<Utc>>,
    draft: String,
    // last issued open(); responses carrying an older number are stale
    open_seq: u64,
}

impl SyncState {
    fn active_chat(&self) -> Option<ChatId> {
        self.active.as_ref().map(|a| a.chat_id)
    }

    fn replace_conversations(&mut self, list: Vec<Conversation>) {
        self.conversations = list;
        // the open conversation stays read locally
        if let Some(chat_id) = self.active_chat() {
            self.zero_unread(chat_id);
        }
    }

    fn zero_unread(&mut self, chat_id: ChatId) {
        if let Some(c) = self.conversations.iter_mut().find(|c| c.chat_id == chat_id) {
            c.unread_count = 0;
        }
    }

    /// Drops the active conversation if it is `chat_id`. Returns whether it was.
    fn close_if_active(&mut self, chat_id: ChatId) -> bool {
        if self.active_chat() != Some(chat_id) {
            return false;
        }
        self.active = None;
        self.draft.clear();
        self.open_seq += 1;
        true
    }
}

#[derive(Clone)]
pub struct Reconciler {
    self_id: UserId,
    config: SyncConfig,
    snapshot: Arc<dyn SnapshotClient>,
    publisher: Arc<dyn IntentPublisher>,
    typing: TypingEmitter,
    state: Arc<Mutex<SyncState>>,
}

impl Reconciler {
    pub fn new(
        self_id: UserId,
        snapshot: Arc<dyn SnapshotClient>,
        publisher: Arc<dyn IntentPublisher>,
        config: SyncConfig,
    ) -> Self {
        Self {
            self_id,
            config,
            snapshot,
            typing: TypingEmitter::new(Arc::clone(&publisher), config.typing_idle),
            publisher,
            state: Arc::new(Mutex::new(SyncState::default())),
        }
    }

    /// Registers one handler per channel. Keep the returned subscriptions to
    /// detach later.
    pub fn attach(&self, dispatcher: &EventDispatcher) -> Vec<Subscription> {
        ChannelKind::ALL
            .into_iter()
            .map(|kind| {
                let reconciler = self.clone();
                dispatcher.subscribe(kind, move |event| reconciler.handle(event))
            })
            .collect()
    }

    pub fn handle(&self, event: &InboundEvent) {
        match event {
            InboundEvent::Message(e) => self.on_message(e),
            InboundEvent::Typing(e) => self.on_typing(e),
            InboundEvent::ReadReceipt(e) => self.on_read_receipt(e),
            InboundEvent::Presence(e) => self.on_presence(e),
        }
    }

    // ---- snapshots ----

    /// Loads `chat_id`'s history and the conversation list together, then
    /// makes `chat_id` the active conversation. On error nothing changes.
    pub async fn open(&self, chat_id: ChatId) -> Result<OpenOutcome, SyncError> {
        let seq = {
            let mut state = self.state.lock();
            state.open_seq += 1;
            state.open_seq
        };
        debug!("[SYNC] Opening chat {} (request {})", chat_id, seq);

        let (detail, list) = tokio::join!(
            self.snapshot.open_conversation(chat_id),
            self.snapshot.list_conversations()
        );
        if self.state.lock().open_seq != seq {
            debug!("[SYNC] Discarding stale snapshot for chat {} (request {})", chat_id, seq);
            return Ok(OpenOutcome::Superseded);
        }
        let detail = detail?;
        let list = list?;

        {
            let mut state = self.state.lock();
            if state.open_seq != seq {
                return Ok(OpenOutcome::Superseded);
            }
            state.active = Some(ActiveConversation {
                chat_id,
                companion_name: detail.companion_name,
                companion_username: detail.companion_username,
                messages: detail.messages,
                companion_typing: false,
            });
            state.draft.clear();
            state.replace_conversations(list);
        }
        self.typing.reset();
        info!("[SYNC] Chat {} opened", chat_id);
        Ok(OpenOutcome::Applied)
    }

    pub async fn refresh_conversations(&self) -> Result<(), SyncError> {
        let list = self.snapshot.list_conversations().await?;
        self.state.lock().replace_conversations(list);
        Ok(())
    }

    /// Bulk presence snapshot. Replaces the online set.
    pub async fn load_online_users(&self) -> Result<(), SyncError> {
        let online = self.snapshot.list_online_users().await?;
        debug!("[SYNC] {} users online", online.len());
        self.state.lock().online = online;
        Ok(())
    }

    /// Point lookup for one user; updates the online set and returns the status.
    pub async fn refresh_presence(&self, user_id: UserId) -> Result<bool, SyncError> {
        let online = self.snapshot.user_status(user_id).await?;
        let mut state = self.state.lock();
        if online {
            state.online.insert(user_id);
        } else {
            state.online.remove(&user_id);
        }
        Ok(online)
    }

    pub async fn create_conversation(&self, companion_username: &str) -> Result<ChatId, SyncError> {
        let created = self.snapshot.create_conversation(companion_username).await?;
        info!("[SYNC] Created chat {} with {}", created.chat_id, companion_username);
        self.refresh_conversations().await?;
        Ok(created.chat_id)
    }

    pub async fn delete_conversation(&self, chat_id: ChatId) -> Result<(), SyncError> {
        let list = self.snapshot.delete_conversation(chat_id).await?;
        self.closed_remotely(chat_id, list);
        info!("[SYNC] Chat {} deleted", chat_id);
        Ok(())
    }

    pub async fn close_conversation(&self, chat_id: ChatId) -> Result<(), SyncError> {
        let list = self.snapshot.close_conversation(chat_id).await?;
        self.closed_remotely(chat_id, list);
        Ok(())
    }

    fn closed_remotely(&self, chat_id: ChatId, list: Vec<Conversation>) {
        let was_active = {
            let mut state = self.state.lock();
            let was_active = state.close_if_active(chat_id);
            state.replace_conversations(list);
            was_active
        };
        if was_active {
            self.typing.reset();
        }
    }

    /// Logout. Everything is discarded and pending opens become stale.
    pub fn teardown(&self) {
        self.typing.reset();
        let mut state = self.state.lock();
        let open_seq = state.open_seq + 1;
        *state = SyncState { open_seq, ..SyncState::default() };
        info!("[SYNC] Session state discarded");
    }

    // ---- outgoing ----

    /// Stores the input buffer and counts it as a keystroke in the active
    /// conversation.
    pub fn update_draft(&self, text: &str) {
        let active = {
            let mut state = self.state.lock();
            state.draft = text.to_string();
            state.active_chat()
        };
        if let Some(chat_id) = active {
            self.typing.keystroke(chat_id);
        }
    }

    /// Publishes `content` to `chat_id`. The message shows up only when its
    /// echo comes back on the message channel.
    pub fn send_message(&self, content: &str, chat_id: ChatId) -> Result<(), SyncError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(SyncError::EmptyMessage);
        }
        self.publisher.publish(Intent::SendMessage {
            chat_id,
            content: content.to_string(),
        });
        {
            let mut state = self.state.lock();
            if state.active_chat() == Some(chat_id) {
                state.draft.clear();
            }
        }
        self.typing.message_sent(chat_id);
        Ok(())
    }

    /// Sends the current draft to the active conversation.
    pub fn send_draft(&self) -> Result<(), SyncError> {
        let (chat_id, draft) = {
            let state = self.state.lock();
            let chat_id = state.active_chat().ok_or(SyncError::NoActiveConversation)?;
            (chat_id, state.draft.clone())
        };
        self.send_message(&draft, chat_id)
    }

    // ---- inbound ----

    fn on_message(&self, event: &ChatMessageEvent) {
        let mut receipt = None;
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let dedup = self.config.dedup_messages;
            match state.active.as_mut() {
                Some(active) if active.chat_id == event.chat_id => {
                    if dedup && active.messages.iter().any(|m| m.id == event.id) {
                        debug!("[SYNC] Duplicate message {} in chat {}, skipped", event.id, event.chat_id);
                        return;
                    }
                    active.messages.push(Message::from(event));
                    if event.sender_id != self.self_id {
                        receipt = Some(Intent::ReadReceipt {
                            chat_id: event.chat_id,
                            message_ids: vec![event.id],
                        });
                    }
                }
                _ => match state.conversations.iter_mut().find(|c| c.chat_id == event.chat_id) {
                    Some(conversation) => {
                        conversation.last_message = MessagePreview {
                            text: event.content.clone(),
                            sent_at: Some(event.sending_time),
                        };
                        if event.sender_id != self.self_id {
                            conversation.unread_count += 1;
                        }
                    }
                    None => warn!("[SYNC] Message {} for unknown chat {}", event.id, event.chat_id),
                },
            }
        }
        if let Some(receipt) = receipt {
            self.publisher.publish(receipt);
        }
    }

    fn on_typing(&self, event: &TypingEvent) {
        if event.user_id == self.self_id {
            return;
        }
        let mut state = self.state.lock();
        if let Some(active) = state.active.as_mut().filter(|a| a.chat_id == event.chat_id) {
            active.companion_typing = event.is_typing;
        }
    }

    fn on_read_receipt(&self, event: &ReadReceiptEvent) {
        let mut state = self.state.lock();
        let Some(active) = state.active.as_mut().filter(|a| a.chat_id == event.chat_id) else {
            return;
        };
        let ids: HashSet<MessageId> = event.message_ids.iter().copied().collect();
        for message in active.messages.iter_mut().filter(|m| ids.contains(&m.id)) {
            message.is_read = true;
        }
    }

    fn on_presence(&self, event: &PresenceEvent) {
        let mut state = self.state.lock();
        if event.is_online {
            state.online.insert(event.user_id);
        } else {
            state.online.remove(&event.user_id);
        }
        if let Some(last_seen) = event.last_seen {
            state.last_seen.insert(event.user_id, last_seen);
        }
    }

    // ---- read side ----

    pub fn conversations(&self) -> Vec<Conversation> {
        self.state.lock().conversations.clone()
    }

    pub fn conversation(&self, chat_id: ChatId) -> Option<Conversation> {
        self.state.lock().conversations.iter().find(|c| c.chat_id == chat_id).cloned()
    }

    pub fn active_chat(&self) -> Option<ChatId> {
        self.state.lock().active_chat()
    }

    pub fn active(&self) -> Option<ActiveConversation> {
        self.state.lock().active.clone()
    }

    /// Messages of the active conversation, empty when none is open.
    pub fn active_messages(&self) -> Vec<Message> {
        self.state
            .lock()
            .active
            .as_ref()
            .map(|a| a.messages.clone())
            .unwrap_or_default()
    }

    /// Companion of the active conversation as the list knows them.
    pub fn active_companion(&self) -> Option<User> {
        let state = self.state.lock();
        let chat_id = state.active_chat()?;
        state
            .conversations
            .iter()
            .find(|c| c.chat_id == chat_id)
            .map(|c| c.companion.clone())
    }

    pub fn is_companion_typing(&self) -> bool {
        self.state
            .lock()
            .active
            .as_ref()
            .map(|a| a.companion_typing)
            .unwrap_or(false)
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.state.lock().online.contains(&user_id)
    }

    pub fn online_users(&self) -> HashSet<UserId> {
        self.state.lock().online.clone()
    }

    pub fn last_seen(&self, user_id: UserId) -> Option<DateTime<Utc>> {
        self.state.lock().last_seen.get(&user_id).copied()
    }

    pub fn draft(&self) -> String {
        self.state.lock().draft.clone()
    }
}
