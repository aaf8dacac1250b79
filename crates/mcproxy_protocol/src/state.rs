use std::fmt;

use serde::{Deserialize, Serialize};

/// Connection state as tracked by the codec layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolState {
    Handshaking,
    Status,
    Login,
    Play,
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolState::Handshaking => write!(f, "handshaking"),
            ProtocolState::Status => write!(f, "status"),
            ProtocolState::Login => write!(f, "login"),
            ProtocolState::Play => write!(f, "play"),
        }
    }
}

/// Direction a packet travels in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bound {
    /// Server to client
    Client,
    /// Client to server
    Server,
}

/// What the framing layer already knows about a packet before its fields
/// are parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketMeta {
    pub state: ProtocolState,
    pub name: String,
}

impl PacketMeta {
    pub fn new(state: ProtocolState, name: impl Into<String>) -> Self {
        Self {
            state,
            name: name.into(),
        }
    }

    pub fn play(name: impl Into<String>) -> Self {
        Self::new(ProtocolState::Play, name)
    }

    pub fn is_play(&self) -> bool {
        self.state == ProtocolState::Play
    }
}
