use mcproxy_config::ConfigError;
use mcproxy_protocol::{PacketError, SocketError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),

    #[error("Socket error: {0}")]
    Socket(#[from] SocketError),

    #[error("Catch-up error: {0}")]
    CatchUp(#[from] CatchUpError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Client {0} is not attached")]
    NotAttached(uuid::Uuid),
}

/// Reasons a catch-up sequence cannot be generated yet
#[derive(Debug, Error)]
pub enum CatchUpError {
    #[error("Bot entity not spawned yet")]
    NotSpawned,

    #[error("No login packet observed from upstream yet")]
    MissingLogin,
}
