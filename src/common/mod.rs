pub mod models;
pub mod protocol;
pub mod stomp;

pub use models::*;
pub use protocol::*;
