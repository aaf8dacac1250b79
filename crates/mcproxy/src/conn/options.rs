use std::fmt;
use std::sync::Arc;

use mcproxy_config::{ProxyConfig, SyncMarkerConfig};

use crate::middleware::PacketMiddleware;
use crate::transform::{CoordinateOffset, PositionTransformer, SimplePositionTransformer};

/// Hub wide settings. The middleware here runs for every client, after the
/// built-in steps and before the middleware given at attach time.
#[derive(Clone)]
pub struct ConnOptions {
    pub optimize_packet_write: bool,
    pub to_client_middleware: Vec<Arc<dyn PacketMiddleware>>,
    pub to_server_middleware: Vec<Arc<dyn PacketMiddleware>>,
    pub transformer: Option<Arc<dyn PositionTransformer>>,
    pub sync_marker: SyncMarkerConfig,
    pub chunk_split_threshold: usize,
    pub keep_alive_whitelist: Vec<String>,
}

impl ConnOptions {
    pub fn with_transformer(mut self, transformer: Arc<dyn PositionTransformer>) -> Self {
        self.transformer = Some(transformer);
        self
    }

    pub fn with_offset(self, offset: CoordinateOffset) -> Self {
        self.with_transformer(SimplePositionTransformer::shared(offset))
    }

    pub fn with_to_client_middleware(mut self, middleware: Arc<dyn PacketMiddleware>) -> Self {
        self.to_client_middleware.push(middleware);
        self
    }

    pub fn with_to_server_middleware(mut self, middleware: Arc<dyn PacketMiddleware>) -> Self {
        self.to_server_middleware.push(middleware);
        self
    }

    pub fn with_optimize_packet_write(mut self, optimize: bool) -> Self {
        self.optimize_packet_write = optimize;
        self
    }

    pub fn with_sync_marker(mut self, sync_marker: SyncMarkerConfig) -> Self {
        self.sync_marker = sync_marker;
        self
    }
}

impl From<&ProxyConfig> for ConnOptions {
    fn from(config: &ProxyConfig) -> Self {
        Self {
            optimize_packet_write: config.optimize_packet_write,
            to_client_middleware: Vec::new(),
            to_server_middleware: Vec::new(),
            transformer: config
                .coordinate_offset
                .as_ref()
                .map(|offset| SimplePositionTransformer::shared(offset.into())),
            sync_marker: config.sync_marker.clone(),
            chunk_split_threshold: config.chunk_split_threshold,
            keep_alive_whitelist: config.keep_alive_whitelist.clone(),
        }
    }
}

impl Default for ConnOptions {
    fn default() -> Self {
        Self::from(&ProxyConfig::default())
    }
}

impl fmt::Debug for ConnOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnOptions")
            .field("optimize_packet_write", &self.optimize_packet_write)
            .field("to_client_middleware", &self.to_client_middleware.len())
            .field("to_server_middleware", &self.to_server_middleware.len())
            .field("transformer", &self.transformer.is_some())
            .field("sync_marker", &self.sync_marker)
            .field("chunk_split_threshold", &self.chunk_split_threshold)
            .field("keep_alive_whitelist", &self.keep_alive_whitelist)
            .finish()
    }
}

/// Middleware supplied for one client at attach or link time
#[derive(Clone, Default)]
pub struct ClientMiddleware {
    pub to_client: Vec<Arc<dyn PacketMiddleware>>,
    pub to_server: Vec<Arc<dyn PacketMiddleware>>,
}

impl ClientMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_client(mut self, middleware: Arc<dyn PacketMiddleware>) -> Self {
        self.to_client.push(middleware);
        self
    }

    pub fn to_server(mut self, middleware: Arc<dyn PacketMiddleware>) -> Self {
        self.to_server.push(middleware);
        self
    }
}

impl fmt::Debug for ClientMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientMiddleware")
            .field("to_client", &self.to_client.len())
            .field("to_server", &self.to_server.len())
            .finish()
    }
}
