// Public modules
pub mod auth;
pub mod chat;
pub mod client;
pub mod config;
pub mod error;
pub mod exchange;
pub mod history;
pub mod render;
pub mod transport;
pub mod types;

mod observability;

// Re-exports
pub use client::{SessionStats, Spark};
pub use config::{Credentials, SparkConfig};
pub use error::{Error, Result};
pub use exchange::{ExchangeState, PendingExchange};
pub use history::History;
pub use observability::register_biometrics;
pub use render::{PlainTextRenderer, Renderer, SharedRenderer, WriterRenderer, shared};
pub use transport::{Connection, Connector, Inbound, ScriptedConnector, Step, WebSocketConnector};
pub use types::*;
