use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: String,
    pub websocket_url: String,
    pub reconnect_delay: Duration,
    pub handshake_timeout: Duration,
    pub typing_idle: Duration,
    pub dedup_messages: bool,
    pub log_level: String,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self {
            api_url: env::var("MESSENGER_API_URL").unwrap_or_else(|_| "http://127.0.0.1:8080/api".to_string()),
            websocket_url: env::var("MESSENGER_WS_URL")
                .unwrap_or_else(|_| "ws://127.0.0.1:8080/websocket/websocket".to_string()),
            reconnect_delay: Duration::from_millis(
                env::var("RECONNECT_DELAY_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(5000),
            ),
            handshake_timeout: Duration::from_secs(
                env::var("HANDSHAKE_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(10),
            ),
            typing_idle: Duration::from_millis(
                env::var("TYPING_IDLE_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(2000),
            ),
            dedup_messages: env::var("DEDUP_MESSAGES").map(|v| v == "true" || v == "1").unwrap_or(false),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        }
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            reconnect_delay: self.reconnect_delay,
            handshake_timeout: self.handshake_timeout,
        }
    }

    pub fn sync(&self) -> SyncConfig {
        SyncConfig {
            typing_idle: self.typing_idle,
            dedup_messages: self.dedup_messages,
        }
    }
}

/// Timing of the persistent connection.
#[derive(Debug, Clone, Copy)]
pub struct TransportConfig {
    /// Fixed delay between reconnect attempts. No backoff, no cap.
    pub reconnect_delay: Duration,
    pub handshake_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    pub typing_idle: Duration,
    pub dedup_messages: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            typing_idle: Duration::from_millis(2000),
            dedup_messages: false,
        }
    }
}
