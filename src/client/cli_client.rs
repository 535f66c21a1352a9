use crate::client::config::ClientConfig;
use crate::client::error::SyncError;
use crate::client::services::reconciler::OpenOutcome;
use crate::client::services::session::SyncSession;
use crate::common::models::{ChatId, Credential, UserId};
use crate::common::protocol::InboundEvent;
use anyhow::Context;
use clap::Parser;
use std::env;
use tokio::io::{stdin, AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(
    name = "ruggine-sync",
    version,
    about = "Terminal client for the real-time messenger sync layer"
)]
pub struct CliArgs {
    /// Bearer token from the login flow (falls back to MESSENGER_TOKEN)
    #[arg(long, value_name = "TOKEN")]
    pub token: Option<String>,
    /// Id of the logged-in user (falls back to MESSENGER_USER_ID)
    #[arg(long, value_name = "ID")]
    pub user_id: Option<UserId>,
    /// Overrides MESSENGER_API_URL
    #[arg(long, value_name = "URL")]
    pub api_url: Option<String>,
    /// Overrides MESSENGER_WS_URL
    #[arg(long, value_name = "URL")]
    pub ws_url: Option<String>,
}

impl CliArgs {
    pub fn apply(&self, config: &mut ClientConfig) {
        if let Some(url) = &self.api_url {
            config.api_url = url.clone();
        }
        if let Some(url) = &self.ws_url {
            config.websocket_url = url.clone();
        }
    }

    pub fn credential(&self) -> anyhow::Result<Credential> {
        let token = match &self.token {
            Some(token) => token.clone(),
            None => env::var("MESSENGER_TOKEN").context("missing --token (or MESSENGER_TOKEN)")?,
        };
        let user_id = match self.user_id {
            Some(id) => id,
            None => env::var("MESSENGER_USER_ID")
                .context("missing --user-id (or MESSENGER_USER_ID)")?
                .parse()
                .context("MESSENGER_USER_ID is not a number")?,
        };
        Ok(Credential::new(token, user_id))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CliCommand {
    Chats,
    Open(ChatId),
    New(String),
    Delete(ChatId),
    Close,
    Online,
    Help,
    Quit,
    /// Free text: becomes the draft and is sent
    Text(String),
    Invalid(String),
}

impl CliCommand {
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        if !line.starts_with('/') {
            return Some(CliCommand::Text(line.to_string()));
        }
        let mut parts = line.split_whitespace();
        let command = parts.next().unwrap_or("");
        let args: Vec<&str> = parts.collect();
        let chat_id = |args: &[&str]| args.first().and_then(|a| a.parse::<ChatId>().ok());

        Some(match (command, args.len()) {
            ("/chats", 0) => CliCommand::Chats,
            ("/open", 1) => match chat_id(&args) {
                Some(id) => CliCommand::Open(id),
                None => CliCommand::Invalid(format!("id chat non valido: {}", args[0])),
            },
            ("/new", 1) => CliCommand::New(args[0].to_string()),
            ("/delete", 1) => match chat_id(&args) {
                Some(id) => CliCommand::Delete(id),
                None => CliCommand::Invalid(format!("id chat non valido: {}", args[0])),
            },
            ("/close", 0) => CliCommand::Close,
            ("/online", 0) => CliCommand::Online,
            ("/help", _) => CliCommand::Help,
            ("/quit", _) => CliCommand::Quit,
            _ => CliCommand::Invalid(format!("Sintassi comando non valida: {}", line)),
        })
    }
}

const HELP: &str = "/chats | /open <id> | /new <username> | /delete <id> | /close | /online | /quit";

pub async fn run(config: ClientConfig, credential: Credential) -> anyhow::Result<()> {
    let mut session = SyncSession::from_config(&config, credential)?;
    session.start().await.context("initial snapshot failed")?;

    println!("[CLIENT] Benvenuto! Comandi: {}", HELP);
    print_chats(&session);

    let mut lines = BufReader::new(stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let Some(command) = CliCommand::parse(&line) else { continue };
                if !handle_command(&session, command).await {
                    break;
                }
            }
            event = session.process_next() => match event {
                Some(event) => render_event(&session, &event),
                None => break,
            },
        }
    }

    session.shutdown().await;
    println!("[CLIENT] Disconnessione e uscita.");
    Ok(())
}

/// Returns false when the loop should stop.
async fn handle_command(session: &SyncSession, command: CliCommand) -> bool {
    let sync = session.reconciler().clone();
    let result: Result<(), SyncError> = match command {
        CliCommand::Quit => return false,
        CliCommand::Help => {
            println!("[CLIENT] {}", HELP);
            Ok(())
        }
        CliCommand::Invalid(reason) => {
            println!("[CLIENT] {}", reason);
            Ok(())
        }
        CliCommand::Chats => sync.refresh_conversations().await.map(|_| print_chats(session)),
        CliCommand::Open(chat_id) => match sync.open(chat_id).await {
            Ok(OpenOutcome::Applied) => {
                print_history(session);
                Ok(())
            }
            Ok(OpenOutcome::Superseded) => Ok(()),
            Err(e) => Err(e),
        },
        CliCommand::New(username) => sync.create_conversation(&username).await.map(|chat_id| {
            println!("[CLIENT] Chat {} creata con {}", chat_id, username);
        }),
        CliCommand::Delete(chat_id) => sync.delete_conversation(chat_id).await.map(|_| {
            println!("[CLIENT] Chat {} eliminata", chat_id);
        }),
        CliCommand::Close => match sync.active_chat() {
            Some(chat_id) => sync.close_conversation(chat_id).await,
            None => Err(SyncError::NoActiveConversation),
        },
        CliCommand::Online => match sync.load_online_users().await {
            Ok(()) => {
                let mut online: Vec<UserId> = sync.online_users().into_iter().collect();
                online.sort_unstable();
                println!("[CLIENT] Utenti online: {:?}", online);
                match sync.active_companion() {
                    Some(companion) => sync.refresh_presence(companion.id).await.map(|is_online| {
                        let state = if is_online { "online" } else { "offline" };
                        println!("[CLIENT] {} e' {}", companion.name, state);
                    }),
                    None => Ok(()),
                }
            }
            Err(e) => Err(e),
        },
        CliCommand::Text(text) => {
            sync.update_draft(&text);
            sync.send_draft()
        }
    };

    match result {
        // silently ignored, nothing was sent
        Err(SyncError::EmptyMessage) => {}
        Err(SyncError::NoActiveConversation) => println!("[CLIENT] Apri prima una chat con /open <id>"),
        Err(e) => println!("[CLIENT][ERROR] {}", e),
        Ok(()) => {}
    }
    true
}

fn print_chats(session: &SyncSession) {
    let sync = session.reconciler();
    let conversations = sync.conversations();
    if conversations.is_empty() {
        println!("[CLIENT] Nessuna chat");
        return;
    }
    for c in conversations {
        let online = if sync.is_online(c.companion.id) { "*" } else { " " };
        let unread = if c.unread_count > 0 { format!(" ({})", c.unread_count) } else { String::new() };
        println!(
            "  {}{:>4}  {}{}  {}",
            online, c.chat_id, c.companion.name, unread, c.last_message.text
        );
    }
}

fn print_history(session: &SyncSession) {
    let sync = session.reconciler();
    let Some(active) = sync.active() else { return };
    println!("[CLIENT] --- {} (@{}) ---", active.companion_name, active.companion_username);
    for message in &active.messages {
        print_message(session.user_id(), &active.companion_name, message.sender_id, &message.content, message.is_read);
    }
}

fn print_message(self_id: UserId, companion: &str, sender_id: UserId, content: &str, is_read: bool) {
    if sender_id == self_id {
        println!("  tu: {}{}", content, if is_read { "  [letto]" } else { "" });
    } else {
        println!("  {}: {}", companion, content);
    }
}

fn render_event(session: &SyncSession, event: &InboundEvent) {
    let sync = session.reconciler();
    match event {
        InboundEvent::Message(m) if sync.active_chat() == Some(m.chat_id) => {
            let companion = sync.active().map(|a| a.companion_name).unwrap_or_default();
            print_message(session.user_id(), &companion, m.sender_id, &m.content, m.is_read);
        }
        InboundEvent::Message(m) => {
            if let Some(c) = sync.conversation(m.chat_id) {
                println!("[CLIENT] Nuovo messaggio da {} (chat {}, {} non letti)", c.companion.name, c.chat_id, c.unread_count);
            }
        }
        InboundEvent::Typing(t) if sync.active_chat() == Some(t.chat_id) && t.user_id != session.user_id() => {
            if sync.is_companion_typing() {
                println!("  ...sta scrivendo");
            }
        }
        InboundEvent::ReadReceipt(r) if sync.active_chat() == Some(r.chat_id) => {
            println!("[CLIENT] {} messaggi letti", r.message_ids.len());
        }
        InboundEvent::Presence(p) => {
            let state = if p.is_online { "online" } else { "offline" };
            println!("[CLIENT] Utente {} {}", p.user_id, state);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_text_is_a_draft() {
        assert_eq!(CliCommand::parse("  ciao Luigi "), Some(CliCommand::Text("ciao Luigi".into())));
        assert_eq!(CliCommand::parse("   "), None);
    }

    #[test]
    fn commands_take_their_arguments() {
        assert_eq!(CliCommand::parse("/open 42"), Some(CliCommand::Open(42)));
        assert_eq!(CliCommand::parse("/new anna"), Some(CliCommand::New("anna".into())));
        assert_eq!(CliCommand::parse("/delete 7"), Some(CliCommand::Delete(7)));
        assert_eq!(CliCommand::parse("/chats"), Some(CliCommand::Chats));
        assert_eq!(CliCommand::parse("/quit"), Some(CliCommand::Quit));
    }

    #[test]
    fn malformed_commands_are_reported() {
        assert!(matches!(CliCommand::parse("/open abc"), Some(CliCommand::Invalid(_))));
        assert!(matches!(CliCommand::parse("/open"), Some(CliCommand::Invalid(_))));
        assert!(matches!(CliCommand::parse("/frobnicate"), Some(CliCommand::Invalid(_))));
    }

    #[test]
    fn flags_override_config() {
        let args = CliArgs::parse_from([
            "ruggine-sync",
            "--token",
            "abc",
            "--user-id",
            "3",
            "--ws-url",
            "ws://example.org/ws",
        ]);
        let mut config = ClientConfig::from_env();
        args.apply(&mut config);

        assert_eq!(config.websocket_url, "ws://example.org/ws");
        assert_eq!(args.credential().unwrap(), Credential::new("abc", 3));
    }
}
