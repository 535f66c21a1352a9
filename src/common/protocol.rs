use crate::common::models::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canali logici sottoscritti sulla connessione persistente
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Message,
    Typing,
    ReadReceipt,
    Presence,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 4] = [
        ChannelKind::Message,
        ChannelKind::Typing,
        ChannelKind::ReadReceipt,
        ChannelKind::Presence,
    ];

    pub fn destination(self) -> &'static str {
        match self {
            ChannelKind::Message => "/user/queue/chat-messages",
            ChannelKind::Typing => "/user/queue/typing-events",
            ChannelKind::ReadReceipt => "/user/queue/read-receipts",
            ChannelKind::Presence => "/topic/online-status",
        }
    }

    pub fn subscription_id(self) -> &'static str {
        match self {
            ChannelKind::Message => "sub-messages",
            ChannelKind::Typing => "sub-typing",
            ChannelKind::ReadReceipt => "sub-read-receipts",
            ChannelKind::Presence => "sub-presence",
        }
    }

    pub fn from_subscription_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.subscription_id() == id)
    }

    pub fn from_destination(destination: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.destination() == destination)
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ChannelKind::Message => "message",
            ChannelKind::Typing => "typing",
            ChannelKind::ReadReceipt => "read-receipt",
            ChannelKind::Presence => "presence",
        };
        f.write_str(name)
    }
}

/// Messaggio ricevuto sulla coda personale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageEvent {
    #[serde(alias = "messageId")]
    pub id: MessageId,
    pub content: String,
    pub sending_time: DateTime<Utc>,
    pub sender_id: UserId,
    #[serde(default)]
    pub recipient_id: Option<UserId>,
    pub chat_id: ChatId,
    #[serde(default)]
    pub is_read: bool,
}

impl From<&ChatMessageEvent> for Message {
    fn from(event: &ChatMessageEvent) -> Self {
        Message {
            id: event.id,
            content: event.content.clone(),
            sending_time: event.sending_time,
            sender_id: event.sender_id,
            is_read: event.is_read,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingEvent {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceiptEvent {
    pub chat_id: ChatId,
    pub message_ids: Vec<MessageId>,
    pub reader_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEvent {
    pub user_id: UserId,
    pub is_online: bool,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

/// Evento in arrivo dalla connessione, gia' decodificato
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Message(ChatMessageEvent),
    Typing(TypingEvent),
    ReadReceipt(ReadReceiptEvent),
    Presence(PresenceEvent),
}

impl InboundEvent {
    pub fn kind(&self) -> ChannelKind {
        match self {
            InboundEvent::Message(_) => ChannelKind::Message,
            InboundEvent::Typing(_) => ChannelKind::Typing,
            InboundEvent::ReadReceipt(_) => ChannelKind::ReadReceipt,
            InboundEvent::Presence(_) => ChannelKind::Presence,
        }
    }

    /// Decodes a JSON body received on `kind`'s channel.
    pub fn decode(kind: ChannelKind, body: &str) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            ChannelKind::Message => InboundEvent::Message(serde_json::from_str(body)?),
            ChannelKind::Typing => InboundEvent::Typing(serde_json::from_str(body)?),
            ChannelKind::ReadReceipt => InboundEvent::ReadReceipt(serde_json::from_str(body)?),
            ChannelKind::Presence => InboundEvent::Presence(serde_json::from_str(body)?),
        })
    }
}

/// Azione in uscita pubblicata dall'utente locale
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    SendMessage { chat_id: ChatId, content: String },
    Typing { chat_id: ChatId, is_typing: bool },
    ReadReceipt { chat_id: ChatId, message_ids: Vec<MessageId> },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageBody<'a> {
    content: &'a str,
    chat_id: ChatId,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TypingBody {
    chat_id: ChatId,
    is_typing: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReadReceiptBody<'a> {
    chat_id: ChatId,
    message_ids: &'a [MessageId],
}

impl Intent {
    pub fn destination(&self) -> &'static str {
        match self {
            Intent::SendMessage { .. } => "/app/chat.sendMessage",
            Intent::Typing { .. } => "/app/chat.typing",
            Intent::ReadReceipt { .. } => "/app/chat.readMessages",
        }
    }

    pub fn chat_id(&self) -> ChatId {
        match self {
            Intent::SendMessage { chat_id, .. }
            | Intent::Typing { chat_id, .. }
            | Intent::ReadReceipt { chat_id, .. } => *chat_id,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            Intent::SendMessage { chat_id, content } => serde_json::to_string(&SendMessageBody {
                content,
                chat_id: *chat_id,
            }),
            Intent::Typing { chat_id, is_typing } => serde_json::to_string(&TypingBody {
                chat_id: *chat_id,
                is_typing: *is_typing,
            }),
            Intent::ReadReceipt { chat_id, message_ids } => {
                serde_json::to_string(&ReadReceiptBody {
                    chat_id: *chat_id,
                    message_ids,
                })
            }
        }
    }
}
