use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default)]
    pub debug: bool,

    #[serde(default = "default_true")]
    pub use_color: bool,

    #[serde(default = "default_true")]
    pub show_timestamp: bool,

    #[serde(default)]
    pub show_target: bool,
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            debug: false,
            use_color: true,
            show_timestamp: true,
            show_target: false,
        }
    }
}

impl LoggingConfig {
    /// Level used for the `mcproxy` target when `RUST_LOG` is unset
    pub fn level(&self) -> &'static str {
        if self.debug || cfg!(debug_assertions) {
            "debug"
        } else {
            "info"
        }
    }
}

/// Tag attached to every log event as the `log_type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogType {
    Upstream,
    Downstream,
    Middleware,
    Session,
    CatchUp,
    Transform,
    Hub,
    Config,
}

impl LogType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogType::Upstream => "upstream",
            LogType::Downstream => "downstream",
            LogType::Middleware => "middleware",
            LogType::Session => "session",
            LogType::CatchUp => "catch_up",
            LogType::Transform => "transform",
            LogType::Hub => "hub",
            LogType::Config => "config",
        }
    }
}
