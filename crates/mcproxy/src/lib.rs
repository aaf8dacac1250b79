//! mcproxy core
//!
//! One upstream game session shared by any number of downstream clients.
//! Clients attach to receive the server's packet stream, at most one client
//! is linked and drives the upstream connection, and freshly attached
//! clients are brought up to date with a synthesized catch-up sequence.

pub mod catchup;
pub mod chunk;
pub mod conn;
pub mod error;
pub mod game;
pub mod middleware;
pub mod session;
pub mod telemetry;
pub mod transform;

pub use conn::{
    ClientMiddleware, Conn, ConnEvent, ConnOptions, Delivery, DownstreamClient, Upstream,
    UpstreamEvent,
};
pub use error::{CatchUpError, ProxyError};
pub use game::{GameSnapshot, GameState, SharedGameState};
pub use middleware::{MiddlewareAction, PacketContext, PacketMiddleware, RawPacket, from_fn};
pub use session::SessionState;
pub use transform::{CoordinateOffset, PositionTransformer, SimplePositionTransformer};
