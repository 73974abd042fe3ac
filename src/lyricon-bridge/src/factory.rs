use crate::boot::HostRestartSignal;
use crate::endpoint::{CommandHandler, IgnoreCommands};
use crate::facade::{EmptyProvider, LyriconProvider};
use crate::protocol::CodecError;
use lyricon_core::{AppDirs, BridgeConfig, ProviderInfo};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("invalid provider: {0}")]
    Codec(#[from] CodecError),
    #[error("failed to prepare runtime directory {path}: {source}")]
    RuntimeDir {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
}

/// Builds a provider for the host named in `config`, using the process-wide
/// host restart signal.
pub fn create_provider(
    config: &BridgeConfig,
    dirs: &AppDirs,
    info: ProviderInfo,
    command_handler: Option<Arc<dyn CommandHandler>>,
) -> Result<Arc<dyn LyriconProvider>, BridgeError> {
    create_provider_in(
        config,
        &config.resolve_runtime_dir(dirs),
        info,
        command_handler,
        HostRestartSignal::global(),
    )
}

/// Like [`create_provider`] with an explicit runtime directory and signal.
pub fn create_provider_in(
    config: &BridgeConfig,
    runtime_dir: &Path,
    info: ProviderInfo,
    command_handler: Option<Arc<dyn CommandHandler>>,
    signal: Arc<HostRestartSignal>,
) -> Result<Arc<dyn LyriconProvider>, BridgeError> {
    info.validate().map_err(CodecError::from)?;
    let handler = command_handler
        .unwrap_or_else(|| Arc::new(IgnoreCommands) as Arc<dyn CommandHandler>);
    build(config, runtime_dir, info, handler, signal)
}

#[cfg(unix)]
fn build(
    config: &BridgeConfig,
    runtime_dir: &Path,
    info: ProviderInfo,
    handler: Arc<dyn CommandHandler>,
    signal: Arc<HostRestartSignal>,
) -> Result<Arc<dyn LyriconProvider>, BridgeError> {
    use crate::boot::BootSource;
    use crate::facade::{BridgeProvider, ProviderOptions};
    use crate::socket::{BootSignalListener, RuntimeLayout, SocketDiscovery};

    let layout = RuntimeLayout::new(runtime_dir, config.host_id.clone());
    layout
        .ensure_dirs()
        .map_err(|source| BridgeError::RuntimeDir {
            path: runtime_dir.to_path_buf(),
            source,
        })?;

    let started = signal.start_once(|| {
        BootSignalListener::start(&layout, &signal).map(|l| Box::new(l) as Box<dyn BootSource>)
    });
    if let Err(err) = started {
        tracing::warn!(error = %err, "Host restart detection unavailable");
    }

    let discovery = Arc::new(SocketDiscovery::new(layout, config.call_timeout()));
    let options = ProviderOptions::from_config(config).with_command_handler(handler);
    let provider: Arc<dyn LyriconProvider> =
        BridgeProvider::new(info, options, discovery, signal)?;
    Ok(provider)
}

#[cfg(not(unix))]
fn build(
    _config: &BridgeConfig,
    _runtime_dir: &Path,
    info: ProviderInfo,
    _handler: Arc<dyn CommandHandler>,
    _signal: Arc<HostRestartSignal>,
) -> Result<Arc<dyn LyriconProvider>, BridgeError> {
    tracing::warn!("No bridge transport on this platform; provider will never connect");
    Ok(Arc::new(EmptyProvider::new(info)))
}

/// A provider that accepts every call and never connects.
pub fn empty_provider(info: ProviderInfo) -> Arc<dyn LyriconProvider> {
    Arc::new(EmptyProvider::new(info))
}
