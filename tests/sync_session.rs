use chrono::{TimeZone, Utc};
use ruggine_sync::client::config::{SyncConfig, TransportConfig};
use ruggine_sync::client::error::ConnectionError;
use ruggine_sync::client::services::in_memory::{InMemorySnapshotClient, LoopbackConnector};
use ruggine_sync::client::services::{ConnectionStatus, StompTransport, SyncSession};
use ruggine_sync::common::models::*;
use ruggine_sync::common::protocol::{ChannelKind, InboundEvent, Intent};
use ruggine_sync::common::stomp::{Command, Frame};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

const ME: UserId = 1;
const LUIGI: UserId = 7;

fn snapshot() -> Arc<InMemorySnapshotClient> {
    let luigi = User { id: LUIGI, name: "Luigi".into(), username: "luigi".into() };
    let history = vec![Message {
        id: 1,
        content: "ciao".into(),
        sending_time: Utc.timestamp_opt(1_714_557_600, 0).unwrap(),
        sender_id: LUIGI,
        is_read: true,
    }];
    Arc::new(
        InMemorySnapshotClient::new()
            .with_conversation(
                Conversation {
                    chat_id: 42,
                    companion: luigi,
                    last_message: MessagePreview { text: "ciao".into(), sent_at: None },
                    unread_count: 2,
                },
                history,
            )
            .with_online(&[LUIGI]),
    )
}

fn session(connector: Arc<LoopbackConnector>) -> SyncSession {
    SyncSession::new(
        Credential::new("secret", ME),
        connector,
        snapshot(),
        TransportConfig::default(),
        SyncConfig::default(),
    )
}

fn message_json(id: MessageId, chat_id: ChatId, sender: UserId) -> String {
    format!(
        r#"{{"id":{},"content":"m{}","sendingTime":"2024-05-01T10:00:{:02}Z","senderId":{},"recipientId":{},"chatId":{},"isRead":false}}"#,
        id, id, id, sender, ME, chat_id
    )
}

async fn next(session: &mut SyncSession) -> InboundEvent {
    timeout(Duration::from_secs(1), session.process_next())
        .await
        .expect("no event within 1s")
        .expect("inbound channel closed")
}

#[tokio::test]
async fn start_connects_and_subscribes_four_channels() {
    let connector = Arc::new(LoopbackConnector::new());
    let mut session = session(connector.clone());
    session.start().await.unwrap();

    assert!(session.transport().is_connected());
    assert_eq!(*session.status().borrow(), ConnectionStatus::Connected);
    assert_eq!(session.reconciler().conversations().len(), 1);
    assert!(session.reconciler().is_online(LUIGI));

    let frames = connector.sent_frames();
    assert_eq!(frames[0].command, Command::Connect);
    assert_eq!(frames[0].get("Authorization"), Some("Bearer secret"));
    let subscribed: Vec<&str> = frames
        .iter()
        .filter(|f| f.command == Command::Subscribe)
        .filter_map(|f| f.get("destination"))
        .collect();
    assert_eq!(
        subscribed,
        vec![
            "/user/queue/chat-messages",
            "/user/queue/typing-events",
            "/user/queue/read-receipts",
            "/topic/online-status",
        ]
    );

    session.shutdown().await;
}

#[tokio::test]
async fn connect_twice_is_a_no_op() {
    let connector = Arc::new(LoopbackConnector::new());
    let (tx, _rx) = mpsc::unbounded_channel();
    let transport = StompTransport::new(connector.clone(), TransportConfig::default(), tx);
    let credential = Credential::new("secret", ME);

    transport.connect(&credential).await.unwrap();
    transport.connect(&credential).await.unwrap();

    assert_eq!(connector.attempts(), 1);
    assert_eq!(connector.sent_frames().iter().filter(|f| f.command == Command::Subscribe).count(), 4);
    transport.disconnect().await;
}

#[tokio::test]
async fn incoming_message_is_reconciled_and_acknowledged() {
    let connector = Arc::new(LoopbackConnector::new());
    let mut session = session(connector.clone());
    session.start().await.unwrap();
    session.reconciler().open(42).await.unwrap();

    assert!(connector.push(ChannelKind::Message, &message_json(2, 42, LUIGI)));
    let event = next(&mut session).await;
    assert!(matches!(event, InboundEvent::Message(ref m) if m.id == 2));

    let ids: Vec<MessageId> = session.reconciler().active_messages().iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![1, 2]);

    let receipts = connector.sent_to("/app/chat.readMessages");
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0].body, r#"{"chatId":42,"messageIds":[2]}"#);

    session.shutdown().await;
}

#[tokio::test]
async fn undecodable_payload_is_skipped() {
    let connector = Arc::new(LoopbackConnector::new());
    let mut session = session(connector.clone());
    session.start().await.unwrap();

    connector.push(ChannelKind::Presence, "{not json");
    connector.push(ChannelKind::Presence, r#"{"userId":5,"isOnline":true}"#);

    let event = next(&mut session).await;
    assert_eq!(event.kind(), ChannelKind::Presence);
    assert!(session.reconciler().is_online(5));
    assert!(session.transport().is_connected());

    session.shutdown().await;
}

#[tokio::test]
async fn sent_message_goes_out_and_becomes_visible_on_echo() {
    let connector = Arc::new(LoopbackConnector::new());
    let mut session = session(connector.clone());
    session.start().await.unwrap();
    session.reconciler().open(42).await.unwrap();

    session.reconciler().update_draft("come va?");
    session.reconciler().send_draft().unwrap();

    let sent = connector.sent_to("/app/chat.sendMessage");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].body, r#"{"content":"come va?","chatId":42}"#);
    let typing: Vec<String> = connector.sent_to("/app/chat.typing").into_iter().map(|f| f.body).collect();
    assert_eq!(
        typing,
        vec![
            r#"{"chatId":42,"isTyping":true}"#.to_string(),
            r#"{"chatId":42,"isTyping":false}"#.to_string(),
        ]
    );
    assert_eq!(session.reconciler().active_messages().len(), 1);

    connector.push(ChannelKind::Message, &message_json(3, 42, ME));
    next(&mut session).await;
    assert_eq!(session.reconciler().active_messages().len(), 2);
    assert!(connector.sent_to("/app/chat.readMessages").is_empty());

    session.shutdown().await;
}

#[tokio::test]
async fn empty_message_never_reaches_the_wire() {
    let connector = Arc::new(LoopbackConnector::new());
    let mut session = session(connector.clone());
    session.start().await.unwrap();
    session.reconciler().open(42).await.unwrap();
    let before = connector.sent_frames().len();

    assert!(session.reconciler().send_message("", 42).is_err());

    assert_eq!(connector.sent_frames().len(), before);
    assert_eq!(session.reconciler().active_messages().len(), 1);
    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reconnect_waits_the_fixed_delay() {
    let connector = Arc::new(LoopbackConnector::new());
    let mut session = session(connector.clone());
    session.start().await.unwrap();
    assert_eq!(connector.attempts(), 1);

    connector.drop_link();
    sleep(Duration::from_secs(3)).await;
    assert_eq!(connector.attempts(), 1);
    assert_eq!(*session.status().borrow(), ConnectionStatus::Reconnecting);
    assert!(!session.transport().is_connected());

    sleep(Duration::from_millis(2100)).await;
    assert_eq!(connector.attempts(), 2);
    assert_eq!(*session.status().borrow(), ConnectionStatus::Connected);

    // stays connected, no further attempts
    sleep(Duration::from_secs(30)).await;
    assert_eq!(connector.attempts(), 2);
    let resubscribed = connector
        .sent_frames()
        .iter()
        .filter(|f| f.command == Command::Subscribe)
        .count();
    assert_eq!(resubscribed, 8);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn error_frame_after_handshake_counts_as_loss() {
    let connector = Arc::new(LoopbackConnector::new());
    let mut session = session(connector.clone());
    session.start().await.unwrap();

    let error = Frame::new(Command::Error).header("message", "Session expired");
    assert!(connector.push_frame(error));
    sleep(Duration::from_millis(100)).await;
    assert_eq!(*session.status().borrow(), ConnectionStatus::Reconnecting);

    sleep(Duration::from_secs(5)).await;
    assert_eq!(connector.attempts(), 2);
    assert!(session.transport().is_connected());
    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn publish_while_disconnected_is_dropped() {
    let connector = Arc::new(LoopbackConnector::new());
    let mut session = session(connector.clone());
    session.start().await.unwrap();
    session.reconciler().open(42).await.unwrap();

    connector.drop_link();
    sleep(Duration::from_secs(1)).await;
    session.reconciler().send_message("perso", 42).unwrap();

    // the reconnect replays nothing
    sleep(Duration::from_secs(5)).await;
    assert!(session.transport().is_connected());
    assert!(connector.sent_to("/app/chat.sendMessage").is_empty());

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn rejected_handshake_keeps_retrying_every_delay() {
    let connector = Arc::new(LoopbackConnector::new());
    connector.set_reject(Some("Invalid token"));
    let (tx, _rx) = mpsc::unbounded_channel();
    let transport = StompTransport::new(connector.clone(), TransportConfig::default(), tx);

    let err = transport.connect(&Credential::new("bad", ME)).await.unwrap_err();
    assert_eq!(err, ConnectionError::AuthenticationFailed("Invalid token".into()));
    assert_eq!(*transport.status().borrow(), ConnectionStatus::Reconnecting);

    sleep(Duration::from_millis(15_100)).await;
    assert_eq!(connector.attempts(), 4);

    connector.set_reject(None);
    sleep(Duration::from_secs(5)).await;
    assert_eq!(connector.attempts(), 5);
    assert!(transport.is_connected());

    transport.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn refused_socket_is_a_connection_error() {
    let connector = Arc::new(LoopbackConnector::new());
    connector.set_refuse(true);
    let (tx, _rx) = mpsc::unbounded_channel();
    let transport = StompTransport::new(connector.clone(), TransportConfig::default(), tx);

    let err = transport.connect(&Credential::new("t", ME)).await.unwrap_err();
    assert!(matches!(err, ConnectionError::ConnectionFailed(_)));
    transport.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn disconnect_during_handshake_stops_the_connection() {
    let connector = Arc::new(LoopbackConnector::new());
    connector.set_handshake_delay(Some(Duration::from_secs(1)));
    let (tx, _rx) = mpsc::unbounded_channel();
    let transport = StompTransport::new(connector.clone(), TransportConfig::default(), tx);
    let credential = Credential::new("t", ME);

    let (connected, _) = tokio::join!(transport.connect(&credential), async {
        sleep(Duration::from_millis(10)).await;
        assert_eq!(*transport.status().borrow(), ConnectionStatus::Connecting);
        transport.disconnect().await;
    });
    assert!(connected.is_ok());

    assert_eq!(*transport.status().borrow(), ConnectionStatus::Disconnected);
    assert!(!transport.is_connected());
    sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempts(), 1);
    assert!(!transport.is_connected());
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_reconnecting_and_discards_state() {
    let connector = Arc::new(LoopbackConnector::new());
    let mut session = session(connector.clone());
    session.start().await.unwrap();
    session.reconciler().open(42).await.unwrap();

    session.shutdown().await;
    session.shutdown().await;

    assert_eq!(*session.status().borrow(), ConnectionStatus::Disconnected);
    assert!(session.reconciler().conversations().is_empty());
    assert_eq!(session.reconciler().active_chat(), None);
    assert!(connector.sent_frames().iter().any(|f| f.command == Command::Disconnect));

    let attempts = connector.attempts();
    sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempts(), attempts);

    // handlers are detached
    assert_eq!(session.dispatcher().handler_count(ChannelKind::Message), 0);
}

#[tokio::test]
async fn drain_dispatches_everything_queued() {
    let connector = Arc::new(LoopbackConnector::new());
    let mut session = session(connector.clone());
    session.start().await.unwrap();

    for user_id in 10..13 {
        connector.push(ChannelKind::Presence, &format!(r#"{{"userId":{},"isOnline":true}}"#, user_id));
    }
    // let the transport forward them
    sleep(Duration::from_millis(50)).await;

    assert_eq!(session.drain_pending(), 3);
    for user_id in 10..13 {
        assert!(session.reconciler().is_online(user_id));
    }
    assert_eq!(session.drain_pending(), 0);
    session.shutdown().await;
}

#[tokio::test]
async fn read_receipt_from_companion_marks_own_messages() {
    let connector = Arc::new(LoopbackConnector::new());
    let mut session = session(connector.clone());
    session.start().await.unwrap();
    session.reconciler().open(42).await.unwrap();

    connector.push(ChannelKind::Message, &message_json(5, 42, ME));
    next(&mut session).await;
    connector.push(
        ChannelKind::ReadReceipt,
        &format!(r#"{{"chatId":42,"messageIds":[5],"readerId":{}}}"#, LUIGI),
    );
    next(&mut session).await;

    let last = session.reconciler().active_messages().pop().unwrap();
    assert_eq!((last.id, last.is_read), (5, true));
    session.shutdown().await;
}

#[test]
fn intent_destinations_match_the_broker() {
    let intents = [
        Intent::SendMessage { chat_id: 1, content: "x".into() },
        Intent::Typing { chat_id: 1, is_typing: true },
        Intent::ReadReceipt { chat_id: 1, message_ids: vec![1] },
    ];
    let destinations: Vec<&str> = intents.iter().map(Intent::destination).collect();
    assert_eq!(destinations, vec!["/app/chat.sendMessage", "/app/chat.typing", "/app/chat.readMessages"]);
}
