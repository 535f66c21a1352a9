//! Request/response access to conversations and presence.
//!
//! The reconciler only sees the [`SnapshotClient`] port; [`HttpSnapshotClient`]
//! talks to the REST API with the session's bearer token.

use crate::client::error::SnapshotError;
use crate::common::models::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use reqwest::{RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use std::collections::HashSet;

#[async_trait]
pub trait SnapshotClient: Send + Sync {
    /// Conversation summaries, most recent first.
    async fn list_conversations(&self) -> Result<Vec<Conversation>, SnapshotError>;

    async fn open_conversation(&self, chat_id: ChatId) -> Result<ConversationDetail, SnapshotError>;

    async fn create_conversation(&self, companion_username: &str) -> Result<CreatedConversation, SnapshotError>;

    /// Returns the conversation list after the deletion.
    async fn delete_conversation(&self, chat_id: ChatId) -> Result<Vec<Conversation>, SnapshotError>;

    /// Returns the conversation list after the close.
    async fn close_conversation(&self, chat_id: ChatId) -> Result<Vec<Conversation>, SnapshotError>;

    async fn list_online_users(&self) -> Result<HashSet<UserId>, SnapshotError>;

    async fn user_status(&self, user_id: UserId) -> Result<bool, SnapshotError>;
}

// Payloads as the REST API spells them

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChatListItemDto {
    chat_id: ChatId,
    // null when the companion account is gone
    #[serde(default)]
    companion_id: Option<UserId>,
    #[serde(default)]
    companion_name: Option<String>,
    #[serde(default)]
    companion_username: Option<String>,
    #[serde(default)]
    last_message: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    last_message_sending_time: Option<DateTime<Utc>>,
    #[serde(default)]
    unread_messages_count: u32,
}

impl From<ChatListItemDto> for Conversation {
    fn from(dto: ChatListItemDto) -> Self {
        Conversation {
            chat_id: dto.chat_id,
            companion: User {
                id: dto.companion_id.unwrap_or_default(),
                name: dto.companion_name.unwrap_or_default(),
                username: dto.companion_username.unwrap_or_default(),
            },
            last_message: MessagePreview {
                text: dto.last_message.unwrap_or_default(),
                sent_at: dto.last_message_sending_time,
            },
            unread_count: dto.unread_messages_count,
        }
    }
}

/// Empty chats carry a sentinel far outside chrono's range
/// (`-1000000000-01-01T00:00:00Z`); anything unparseable reads as no time.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|t| t.with_timezone(&Utc)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MessageDto {
    id: MessageId,
    content: String,
    sending_time: DateTime<Utc>,
    sender_id: UserId,
    #[serde(default)]
    is_read: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChatDetailDto {
    chat_id: ChatId,
    companion_name: String,
    #[serde(default)]
    companion_username: String,
    #[serde(default)]
    messages: Vec<MessageDto>,
}

impl From<ChatDetailDto> for ConversationDetail {
    fn from(dto: ChatDetailDto) -> Self {
        ConversationDetail {
            chat_id: dto.chat_id,
            companion_name: dto.companion_name,
            companion_username: dto.companion_username,
            messages: dto
                .messages
                .into_iter()
                .map(|m| Message {
                    id: m.id,
                    content: m.content,
                    sending_time: m.sending_time,
                    sender_id: m.sender_id,
                    is_read: m.is_read,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChatCreateResponseDto {
    id: ChatId,
    #[serde(default)]
    last_message: Option<String>,
    #[serde(default, rename = "participantDTOList")]
    participants: Vec<User>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatCreateRequestDto<'a> {
    companion_username: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserStatusDto {
    is_online: bool,
}

pub struct HttpSnapshotClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpSnapshotClient {
    pub fn new(base_url: &str, credential: &Credential) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: credential.token.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, SnapshotError> {
        let response = request.bearer_auth(&self.token).send().await?;
        let response = check_status(response).await?;
        Ok(response.json::<T>().await?)
    }
}

async fn check_status(response: Response) -> Result<Response, SnapshotError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    debug!("[SNAPSHOT] {} {}: {}", url, status, body);
    Err(SnapshotError::Status {
        status: status.as_u16(),
        message: error_message(&body).unwrap_or_else(|| {
            status.canonical_reason().unwrap_or("Request failed").to_string()
        }),
    })
}

/// Pulls `message` out of a JSON error body, or uses the raw text.
fn error_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(value) => value
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .or_else(|| Some(trimmed.to_string())),
        Err(_) => Some(trimmed.to_string()),
    }
}

#[async_trait]
impl SnapshotClient for HttpSnapshotClient {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, SnapshotError> {
        let items: Vec<ChatListItemDto> = self.send(self.http.get(self.url("/chats"))).await?;
        Ok(items.into_iter().map(Conversation::from).collect())
    }

    async fn open_conversation(&self, chat_id: ChatId) -> Result<ConversationDetail, SnapshotError> {
        let detail: ChatDetailDto = self
            .send(self.http.get(self.url(&format!("/chats/{}", chat_id))))
            .await?;
        Ok(detail.into())
    }

    async fn create_conversation(&self, companion_username: &str) -> Result<CreatedConversation, SnapshotError> {
        let request = self
            .http
            .post(self.url("/chats"))
            .json(&ChatCreateRequestDto { companion_username });
        let created: ChatCreateResponseDto = self.send(request).await?;
        Ok(CreatedConversation {
            chat_id: created.id,
            last_message: created.last_message.unwrap_or_default(),
            participants: created.participants,
        })
    }

    async fn delete_conversation(&self, chat_id: ChatId) -> Result<Vec<Conversation>, SnapshotError> {
        let items: Vec<ChatListItemDto> = self
            .send(self.http.delete(self.url(&format!("/chats/{}", chat_id))))
            .await?;
        Ok(items.into_iter().map(Conversation::from).collect())
    }

    async fn close_conversation(&self, chat_id: ChatId) -> Result<Vec<Conversation>, SnapshotError> {
        let items: Vec<ChatListItemDto> = self
            .send(self.http.post(self.url(&format!("/chats/{}/close", chat_id))))
            .await?;
        Ok(items.into_iter().map(Conversation::from).collect())
    }

    async fn list_online_users(&self) -> Result<HashSet<UserId>, SnapshotError> {
        self.send(self.http.get(self.url("/status/online"))).await
    }

    async fn user_status(&self, user_id: UserId) -> Result<bool, SnapshotError> {
        let status: UserStatusDto = self
            .send(self.http.get(self.url(&format!("/status/{}", user_id))))
            .await?;
        Ok(status.is_online)
    }
}
