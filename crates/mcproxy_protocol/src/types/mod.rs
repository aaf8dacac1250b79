pub mod traits;
pub mod var_numbers;

pub use traits::{ProtocolRead, ProtocolWrite};
pub use var_numbers::VarInt;
