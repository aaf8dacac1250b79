pub mod error;
pub mod models;

pub use error::ConfigError;
pub use models::logging::{LogType, LoggingConfig};
pub use models::proxy::{OffsetConfig, ProxyConfig, SyncMarkerConfig};
