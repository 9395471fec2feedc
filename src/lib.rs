//! peerdrop library
//!
//! Line-framed peer-to-peer file and folder transfer over one TCP
//! connection per session.

pub mod cli;
pub mod config;
pub mod error;
pub mod fs_enum;
pub mod logger;
pub mod logging;
pub mod net_async;
pub mod progress;
pub mod protocol;
pub mod protocol_core;

pub use config::{ConnectorConfig, ListenerConfig};
pub use error::{ErrorCategory, TransferError};
pub use net_async::client::{Connector, SendSummary};
pub use net_async::server::{Listener, SessionSummary};
