pub mod dispatcher;
pub mod in_memory;
pub mod reconciler;
pub mod session;
pub mod snapshot_client;
pub mod typing;
pub mod websocket_client;

pub use dispatcher::{EventDispatcher, Subscription};
pub use reconciler::{ActiveConversation, OpenOutcome, Reconciler};
pub use session::SyncSession;
pub use snapshot_client::{HttpSnapshotClient, SnapshotClient};
pub use typing::{TypingEmitter, TypingState};
pub use websocket_client::{ConnectionStatus, Connector, IntentPublisher, Link, StompTransport, WebSocketConnector};
