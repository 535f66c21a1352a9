pub mod cli_client;
pub mod config;
pub mod error;
pub mod services;

pub use config::*;
pub use error::*;
