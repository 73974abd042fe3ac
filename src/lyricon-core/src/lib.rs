pub mod cache;
pub mod config;
pub mod listeners;
pub mod logging;
pub mod models;
pub mod paths;
pub mod player;
pub mod status;

pub use cache::{ActiveSource, CachedRemotePlayer, CachedState};
pub use config::{
    BridgeConfig, Config, ConfigError, LogLevel, LoggingConfig, ValidationError, DEFAULT_HOST_ID,
};
pub use listeners::ListenerSet;
pub use logging::{init_logging, LoggingError, LoggingGuard};
pub use models::{
    LogoKind, LyricLine, LyricWord, ModelError, ProviderCommand, ProviderInfo, ProviderLogo, Song,
};
pub use paths::{AppDirs, DirsError};
pub use player::{NoOpRemotePlayer, RemotePlayer};
pub use status::{AtomicConnectionStatus, ConnectionStatus};

pub const APP_NAME: &str = "Lyricon";
pub const APP_AUTHOR: &str = "proify";
pub const APP_QUALIFIER: &str = "io.github";
