use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ChatId = i64;
pub type UserId = i64;
pub type MessageId = i64;

/// Identity of a user. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub username: String,
}

/// Last message shown next to a conversation in the list.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MessagePreview {
    pub text: String,
    pub sent_at: Option<DateTime<Utc>>,
}

/// One entry of the conversation list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub chat_id: ChatId,
    pub companion: User,
    pub last_message: MessagePreview,
    pub unread_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub content: String,
    pub sending_time: DateTime<Utc>,
    pub sender_id: UserId,
    pub is_read: bool,
}

/// Full history of a conversation as returned by the snapshot service.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationDetail {
    pub chat_id: ChatId,
    pub companion_name: String,
    pub companion_username: String,
    pub messages: Vec<Message>,
}

/// Result of creating a conversation with a companion.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedConversation {
    pub chat_id: ChatId,
    pub last_message: String,
    pub participants: Vec<User>,
}

/// Session credential issued by the (external) login flow.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub user_id: UserId,
}

impl Credential {
    pub fn new(token: impl Into<String>, user_id: UserId) -> Self {
        Self { token: token.into(), user_id }
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

// never print the token
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("user_id", &self.user_id)
            .field("token", &"<redacted>")
            .finish()
    }
}
