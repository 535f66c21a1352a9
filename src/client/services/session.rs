//! One logged-in session: owns the connection, the dispatcher and the
//! reconciler, and drives the inbound event loop.

use crate::client::config::{ClientConfig, SyncConfig, TransportConfig};
use crate::client::error::SyncError;
use crate::client::services::dispatcher::{EventDispatcher, Subscription};
use crate::client::services::reconciler::Reconciler;
use crate::client::services::snapshot_client::{HttpSnapshotClient, SnapshotClient};
use crate::client::services::websocket_client::{ConnectionStatus, Connector, StompTransport, WebSocketConnector};
use crate::common::models::{Credential, UserId};
use crate::common::protocol::InboundEvent;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

pub struct SyncSession {
    credential: Credential,
    transport: Arc<StompTransport>,
    dispatcher: EventDispatcher,
    reconciler: Reconciler,
    inbound: mpsc::UnboundedReceiver<InboundEvent>,
    subscriptions: Vec<Subscription>,
}

impl SyncSession {
    pub fn new(
        credential: Credential,
        connector: Arc<dyn Connector>,
        snapshot: Arc<dyn SnapshotClient>,
        transport_config: TransportConfig,
        sync_config: SyncConfig,
    ) -> Self {
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let transport = Arc::new(StompTransport::new(connector, transport_config, inbound_tx));
        let reconciler = Reconciler::new(credential.user_id, snapshot, transport.clone(), sync_config);
        Self {
            credential,
            transport,
            dispatcher: EventDispatcher::new(),
            reconciler,
            inbound,
            subscriptions: Vec::new(),
        }
    }

    /// Session against the real endpoints named in `config`.
    pub fn from_config(config: &ClientConfig, credential: Credential) -> Result<Self, SyncError> {
        let connector = Arc::new(WebSocketConnector::new(&config.websocket_url)?);
        let snapshot = Arc::new(HttpSnapshotClient::new(&config.api_url, &credential));
        Ok(Self::new(credential, connector, snapshot, config.transport(), config.sync()))
    }

    /// Loads the initial snapshots and opens the connection. A failed
    /// handshake is logged and left to the reconnect loop; snapshot errors are
    /// returned.
    pub async fn start(&mut self) -> Result<(), SyncError> {
        if self.subscriptions.is_empty() {
            self.subscriptions = self.reconciler.attach(&self.dispatcher);
        }
        self.reconciler.refresh_conversations().await?;
        self.reconciler.load_online_users().await?;

        match self.transport.connect(&self.credential).await {
            Ok(()) => info!("[SESSION] Started for user {}", self.credential.user_id),
            Err(e) => warn!("[SESSION] Started offline ({}), reconnecting in background", e),
        }
        Ok(())
    }

    /// Waits for the next inbound event and dispatches it. Returns the event
    /// once every handler has run, or `None` if the transport is gone.
    pub async fn process_next(&mut self) -> Option<InboundEvent> {
        let event = self.inbound.recv().await?;
        self.dispatcher.dispatch(&event);
        Some(event)
    }

    /// Dispatches whatever is already queued without waiting.
    pub fn drain_pending(&mut self) -> usize {
        let mut count = 0;
        while let Ok(event) = self.inbound.try_recv() {
            self.dispatcher.dispatch(&event);
            count += 1;
        }
        if count > 0 {
            debug!("[SESSION] Drained {} pending events", count);
        }
        count
    }

    /// Logout: detaches the handlers, drops all state and closes the connection.
    pub async fn shutdown(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            subscription.unsubscribe();
        }
        self.reconciler.teardown();
        self.transport.disconnect().await;
        info!("[SESSION] Shut down");
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    pub fn transport(&self) -> &StompTransport {
        &self.transport
    }

    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.transport.status()
    }

    pub fn user_id(&self) -> UserId {
        self.credential.user_id
    }
}
