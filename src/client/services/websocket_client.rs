use crate::client::config::TransportConfig;
use crate::client::error::ConnectionError;
use crate::common::models::Credential;
use crate::common::protocol::{ChannelKind, InboundEvent, Intent};
use crate::common::stomp::{Command, Frame};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

/// Raw frame pipe to the remote endpoint. When `rx` yields `None` the
/// underlying socket is gone.
pub struct Link {
    pub tx: mpsc::UnboundedSender<Frame>,
    pub rx: mpsc::UnboundedReceiver<Frame>,
}

/// Opens the socket under a [`Link`]; the STOMP handshake is done on top of it.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn open(&self) -> Result<Link, ConnectionError>;

    /// Value of the CONNECT `host` header.
    fn host(&self) -> String;
}

/// Anything that can take an outgoing intent. Fire-and-forget.
pub trait IntentPublisher: Send + Sync {
    fn publish(&self, intent: Intent);
}

pub struct WebSocketConnector {
    url: Url,
}

impl WebSocketConnector {
    pub fn new(url: &str) -> Result<Self, ConnectionError> {
        let url = Url::parse(url).map_err(|e| ConnectionError::ConnectionFailed(format!("Invalid URL {}: {}", url, e)))?;
        Ok(Self { url })
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self) -> Result<Link, ConnectionError> {
        debug!("[TRANSPORT] Connecting to {}", self.url);
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| ConnectionError::ConnectionFailed(format!("Failed to connect: {}", e)))?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<Frame>();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel::<Frame>();

        // Spawn task per i frame in uscita
        tokio::spawn(async move {
            while let Some(frame) = outgoing_rx.recv().await {
                if let Err(e) = ws_sender.send(Message::Text(frame.encode())).await {
                    warn!("[TRANSPORT] Failed to send frame: {}", e);
                    break;
                }
            }
            let _ = ws_sender.close().await;
            debug!("[TRANSPORT] Outgoing pump ended");
        });

        // Spawn task per i frame in arrivo
        tokio::spawn(async move {
            while let Some(message) = ws_receiver.next().await {
                match message {
                    Ok(Message::Text(text)) => match Frame::decode(&text) {
                        Ok(Some(frame)) => {
                            if incoming_tx.send(frame).is_err() {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => warn!("[TRANSPORT] Dropping undecodable frame: {}", e),
                    },
                    Ok(Message::Close(_)) => {
                        info!("[TRANSPORT] Connection closed by server");
                        break;
                    }
                    // binary, ping, pong
                    Ok(_) => {}
                    Err(e) => {
                        warn!("[TRANSPORT] WebSocket error: {}", e);
                        break;
                    }
                }
            }
            debug!("[TRANSPORT] Incoming pump ended");
        });

        Ok(Link { tx: outgoing_tx, rx: incoming_rx })
    }

    fn host(&self) -> String {
        self.url.host_str().unwrap_or("localhost").to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

struct Supervisor {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Shared {
    outgoing: Option<mpsc::UnboundedSender<Frame>>,
    supervisor: Option<Supervisor>,
}

/// Everything the background supervisor needs, cloned out of the transport.
#[derive(Clone)]
struct Wiring {
    connector: Arc<dyn Connector>,
    config: TransportConfig,
    shared: Arc<Mutex<Shared>>,
    status: Arc<watch::Sender<ConnectionStatus>>,
    inbound: mpsc::UnboundedSender<InboundEvent>,
}

impl Wiring {
    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_replace(status);
    }

    /// CONNECT, wait for CONNECTED, then subscribe the four channels.
    async fn handshake(&self, credential: &Credential) -> Result<Link, ConnectionError> {
        let mut link = self.connector.open().await?;
        let connect = Frame::connect(&self.connector.host(), &credential.bearer());
        link.tx.send(connect).map_err(|_| ConnectionError::Disconnected)?;

        let reply = tokio::time::timeout(self.config.handshake_timeout, link.rx.recv())
            .await
            .map_err(|_| ConnectionError::Timeout)?;
        match reply {
            Some(frame) if frame.command == Command::Connected => {}
            Some(frame) if frame.command == Command::Error => {
                let reason = match frame.get("message") {
                    Some(message) => message.to_string(),
                    None => frame.body.clone(),
                };
                return Err(ConnectionError::AuthenticationFailed(reason));
            }
            Some(frame) => {
                return Err(ConnectionError::AuthenticationFailed(format!(
                    "Unexpected {} frame during handshake",
                    frame.command.as_str()
                )));
            }
            None => return Err(ConnectionError::Disconnected),
        }

        for kind in ChannelKind::ALL {
            link.tx
                .send(Frame::subscribe(kind.subscription_id(), kind.destination()))
                .map_err(|_| ConnectionError::Disconnected)?;
        }
        info!("[TRANSPORT] Connected as user {}", credential.user_id);
        Ok(link)
    }

    /// Forwards MESSAGE frames until the link breaks. Returns the reason.
    async fn pump(&self, rx: &mut mpsc::UnboundedReceiver<Frame>) -> String {
        while let Some(frame) = rx.recv().await {
            match frame.command {
                Command::Message => self.forward(&frame),
                Command::Error => {
                    return frame
                        .get("message")
                        .map(str::to_string)
                        .unwrap_or_else(|| "ERROR frame".to_string());
                }
                other => debug!("[TRANSPORT] Ignoring {} frame", other.as_str()),
            }
        }
        "socket closed".to_string()
    }

    fn forward(&self, frame: &Frame) {
        let kind = frame
            .get("subscription")
            .and_then(ChannelKind::from_subscription_id)
            .or_else(|| frame.get("destination").and_then(ChannelKind::from_destination));
        let Some(kind) = kind else {
            debug!("[TRANSPORT] MESSAGE for unknown destination {:?}", frame.get("destination"));
            return;
        };
        match InboundEvent::decode(kind, &frame.body) {
            Ok(event) => {
                if self.inbound.send(event).is_err() {
                    debug!("[TRANSPORT] Inbound receiver dropped");
                }
            }
            Err(e) => warn!("[TRANSPORT] Bad {} payload: {} - Raw: {}", kind, e, frame.body),
        }
    }

    /// Background loop: pump the live link, and on loss retry the handshake
    /// every `reconnect_delay` until it succeeds or shutdown is requested.
    async fn supervise(self, mut link: Option<Link>, credential: Credential, mut shutdown: oneshot::Receiver<()>) {
        let mut attempt: u64 = 0;
        loop {
            if let Some(mut live) = link.take() {
                let reason = tokio::select! {
                    _ = &mut shutdown => {
                        let _ = live.tx.send(Frame::new(Command::Disconnect));
                        return;
                    }
                    reason = self.pump(&mut live.rx) => reason,
                };
                warn!("[TRANSPORT] Connection lost: {}", reason);
                self.shared.lock().outgoing = None;
                self.set_status(ConnectionStatus::Reconnecting);
            }

            tokio::select! {
                _ = &mut shutdown => return,
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            }
            attempt += 1;
            info!("[TRANSPORT] Reconnect attempt {}", attempt);
            let result = tokio::select! {
                _ = &mut shutdown => return,
                result = self.handshake(&credential) => result,
            };
            match result {
                Ok(fresh) => {
                    attempt = 0;
                    self.shared.lock().outgoing = Some(fresh.tx.clone());
                    self.set_status(ConnectionStatus::Connected);
                    link = Some(fresh);
                }
                Err(e) => warn!("[TRANSPORT] Reconnect attempt {} failed: {}", attempt, e),
            }
        }
    }
}

/// The one persistent, authenticated connection of a session.
pub struct StompTransport {
    wiring: Wiring,
    connect_gate: tokio::sync::Mutex<()>,
}

impl StompTransport {
    pub fn new(
        connector: Arc<dyn Connector>,
        config: TransportConfig,
        inbound: mpsc::UnboundedSender<InboundEvent>,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            wiring: Wiring {
                connector,
                config,
                shared: Arc::new(Mutex::new(Shared::default())),
                status: Arc::new(status),
                inbound,
            },
            connect_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Connects and subscribes. A no-op while a connection (or its reconnect
    /// loop) is alive. If the handshake fails the error is returned and the
    /// reconnect loop keeps trying in the background.
    pub async fn connect(&self, credential: &Credential) -> Result<(), ConnectionError> {
        let _gate = self.connect_gate.lock().await;
        if self.wiring.shared.lock().supervisor.is_some() {
            debug!("[TRANSPORT] connect() while already connected, ignoring");
            return Ok(());
        }

        self.wiring.set_status(ConnectionStatus::Connecting);
        let (link, result) = match self.wiring.handshake(credential).await {
            Ok(live) => {
                self.wiring.shared.lock().outgoing = Some(live.tx.clone());
                self.wiring.set_status(ConnectionStatus::Connected);
                (Some(live), Ok(()))
            }
            Err(e) => {
                error!("[TRANSPORT] Handshake failed: {}, retrying in {:?}", e, self.wiring.config.reconnect_delay);
                self.wiring.set_status(ConnectionStatus::Reconnecting);
                (None, Err(e))
            }
        };

        let (shutdown, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(self.wiring.clone().supervise(link, credential.clone(), shutdown_rx));
        self.wiring.shared.lock().supervisor = Some(Supervisor { shutdown, handle });
        result
    }

    /// Sends an intent. While disconnected the intent is dropped, not queued.
    pub fn publish(&self, intent: Intent) {
        let outgoing = self.wiring.shared.lock().outgoing.clone();
        let Some(outgoing) = outgoing else {
            debug!("[TRANSPORT] Not connected, dropping {:?}", intent);
            return;
        };
        let json = match intent.to_json() {
            Ok(json) => json,
            Err(e) => {
                error!("[TRANSPORT] Failed to serialize intent: {}", e);
                return;
            }
        };
        if outgoing.send(Frame::send(intent.destination(), json)).is_err() {
            debug!("[TRANSPORT] Link closed, dropping {:?}", intent);
        }
    }

    /// Tears the connection down and stops reconnecting. Safe to repeat.
    pub async fn disconnect(&self) {
        // waits out an in-flight connect so its supervisor is stopped too
        let _gate = self.connect_gate.lock().await;
        let supervisor = {
            let mut shared = self.wiring.shared.lock();
            shared.outgoing = None;
            shared.supervisor.take()
        };
        if let Some(supervisor) = supervisor {
            let _ = supervisor.shutdown.send(());
            if let Err(e) = supervisor.handle.await {
                warn!("[TRANSPORT] Supervisor ended abnormally: {}", e);
            }
            info!("[TRANSPORT] Disconnected");
        }
        self.wiring.set_status(ConnectionStatus::Disconnected);
    }

    pub fn is_connected(&self) -> bool {
        self.wiring.shared.lock().outgoing.is_some()
    }

    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.wiring.status.subscribe()
    }
}

impl IntentPublisher for StompTransport {
    fn publish(&self, intent: Intent) {
        StompTransport::publish(self, intent);
    }
}

impl Drop for StompTransport {
    fn drop(&mut self) {
        if let Some(supervisor) = self.wiring.shared.lock().supervisor.take() {
            let _ = supervisor.shutdown.send(());
        }
    }
}
