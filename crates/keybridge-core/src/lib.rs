use std::time::Duration;

use keybridge_proto::ProtoError;

pub mod authority;
pub mod bridge;
pub mod command;
pub mod config;
pub mod connect;
pub mod public_key;
pub mod registry;
pub mod service;

pub use authority::{
    AuthorityProvider, AuthorityRequest, AuthorityResponse, AuthoritySession, ConnectCallback,
};
pub use bridge::{Bridge, BridgeHost};
pub use command::{CommandAuthority, CommandConfig};
pub use config::{BridgeConfig, ConfigError, Timeouts};
pub use connect::connect_session;
pub use public_key::key_blob_from_text;
pub use registry::WorkerRegistry;
pub use service::{AgentService, ErrorReporter};

#[derive(thiserror::Error, Debug)]
pub enum BridgeError {
    #[error("could not connect to the signing authority")]
    ConnectFailed,
    #[error("signing authority dropped the connect callback")]
    ConnectAbandoned,
    #[error("signing authority connect timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("signing authority request timed out after {0:?}")]
    RequestTimeout(Duration),
    #[error("protocol error: {0}")]
    Proto(#[from] ProtoError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Whether the authority handshake failed, the one case surfaced to the user.
    pub fn is_connect_error(&self) -> bool {
        matches!(
            self,
            BridgeError::ConnectFailed | BridgeError::ConnectAbandoned | BridgeError::ConnectTimeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
