use anyhow::Result;
use clap::{Parser, Subcommand};
use lyricon_bridge::{create_provider, LyriconProvider};
use lyricon_core::{
    init_logging, AppDirs, Config, ConnectionStatus, ModelError, ProviderInfo, RemotePlayer, Song,
};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

const TICK: Duration = Duration::from_millis(33);

#[derive(Debug, Parser)]
#[command(name = "lyricon", version, about = "Lyricon provider bridge")]
struct Cli {
    /// Host id override (takes precedence over config)
    #[arg(long, global = true)]
    host_id: Option<String>,
    /// Runtime directory override for sockets and segments
    #[arg(long, global = true)]
    runtime_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the reference host, printing whatever providers push
    Host(HostCommand),
    /// Register a provider and push a song or text to the host
    Provide(ProvideCommand),
    /// Print resolved directories
    Paths,
}

#[derive(Debug, Parser, Clone)]
struct HostCommand {
    /// Stop after this many seconds instead of running until interrupted
    #[arg(long)]
    for_secs: Option<u64>,
}

#[derive(Debug, Parser, Clone)]
struct ProvideCommand {
    /// Song JSON file to send
    #[arg(long)]
    song: Option<PathBuf>,
    /// Plain text to send instead of a song
    #[arg(long)]
    text: Option<String>,
    #[arg(long, default_value = "io.github.proify.lyricon.cli")]
    provider_id: String,
    #[arg(long, default_value = "io.github.proify.lyricon.cli.player")]
    player_id: String,
    /// How long to play and tick positions
    #[arg(long, default_value_t = 10)]
    play_secs: u64,
}

#[derive(Debug, Clone, PartialEq)]
enum LyricSource {
    Song(Song),
    Text(String),
}

#[derive(Debug, Error)]
enum ProvideError {
    #[error("provide requires --song or --text")]
    MissingSource,
    #[error("--song and --text cannot be combined")]
    SourceConflict,
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid song: {0}")]
    Invalid(#[from] ModelError),
}

impl ProvideCommand {
    fn source(&self) -> Result<LyricSource, ProvideError> {
        match (&self.song, &self.text) {
            (Some(_), Some(_)) => Err(ProvideError::SourceConflict),
            (None, None) => Err(ProvideError::MissingSource),
            (None, Some(text)) => Ok(LyricSource::Text(text.clone())),
            (Some(path), None) => load_song(path).map(LyricSource::Song),
        }
    }

    fn provider_info(&self) -> ProviderInfo {
        ProviderInfo::new(self.provider_id.clone(), self.player_id.clone())
            .with_metadata("client", "lyricon-cli")
    }
}

impl LyricSource {
    fn describe(&self) -> String {
        match self {
            LyricSource::Song(song) => {
                let mut parts = vec![format!("song id={}", song.id)];
                if let Some(name) = &song.name {
                    parts.push(format!("name=\"{name}\""));
                }
                if let Some(artist) = &song.artist {
                    parts.push(format!("artist=\"{artist}\""));
                }
                parts.push(format!("lines={}", song.lyrics.len()));
                parts.join(", ")
            }
            LyricSource::Text(text) => format!("text=\"{text}\""),
        }
    }

    fn push(&self, player: &dyn RemotePlayer) {
        match self {
            LyricSource::Song(song) => {
                player.set_song(Some(song));
            }
            LyricSource::Text(text) => {
                player.send_text(Some(text));
            }
        }
    }
}

fn load_song(path: &Path) -> Result<Song, ProvideError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ProvideError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let song: Song = serde_json::from_str(&contents).map_err(|source| ProvideError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    song.validate()?;
    Ok(song)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let dirs = AppDirs::discover()?;
    let mut config = Config::load_or_default(&dirs)?;
    if let Some(host_id) = cli.host_id {
        config.bridge.host_id = host_id;
    }
    if let Some(runtime_dir) = cli.runtime_dir {
        config.bridge.runtime_dir = Some(runtime_dir);
    }
    config.validate()?;
    let _logging = init_logging(&config.logging, &dirs)?;

    match cli.command {
        Command::Paths => print_paths(&config, &dirs),
        Command::Host(host) => run_host(&config, &dirs, &host)?,
        Command::Provide(provide) => run_provider(&config, &dirs, &provide)?,
    }

    Ok(())
}

fn print_paths(config: &Config, dirs: &AppDirs) {
    println!("config:  {}", Config::config_path(dirs).display());
    println!("data:    {}", dirs.data_dir().display());
    println!("logs:    {}", dirs.log_dir().display());
    println!("runtime: {}", config.bridge.resolve_runtime_dir(dirs).display());
    println!("host id: {}", config.bridge.host_id);
}

#[cfg(unix)]
fn run_host(config: &Config, dirs: &AppDirs, command: &HostCommand) -> Result<()> {
    use lyricon_bridge::socket::{BridgeHost, HostOptions, RuntimeLayout};

    let layout = RuntimeLayout::new(
        config.bridge.resolve_runtime_dir(dirs),
        config.bridge.host_id.clone(),
    );
    let host = BridgeHost::start(
        layout,
        HostOptions::from_config(&config.bridge),
        Arc::new(ConsoleRenderer::default()),
    )?;
    println!(
        "Host '{}' listening in {}",
        config.bridge.host_id,
        host.layout().root().display()
    );

    match command.for_secs {
        Some(secs) => thread::sleep(Duration::from_secs(secs)),
        None => loop {
            thread::park();
        },
    }

    for provider in host.providers() {
        tracing::info!(provider_id = %provider.info.provider_id, "Provider was registered");
    }
    host.shutdown();
    Ok(())
}

#[cfg(not(unix))]
fn run_host(_config: &Config, _dirs: &AppDirs, _command: &HostCommand) -> Result<()> {
    anyhow::bail!("the reference host needs Unix domain sockets")
}

fn run_provider(config: &Config, dirs: &AppDirs, command: &ProvideCommand) -> Result<()> {
    let source = command.source()?;
    let provider = create_provider(&config.bridge, dirs, command.provider_info(), None)?;
    tracing::info!(
        provider_id = %command.provider_id,
        host_id = %config.bridge.host_id,
        "Providing {}",
        source.describe()
    );

    // Calls made before registering are cached and replayed on connection.
    let player = provider.player();
    source.push(player.as_ref());
    player.set_playback_state(true);
    player.seek_to(0);

    provider.register();
    if !wait_for_connection(provider.as_ref(), config.bridge.register_timeout() + TICK) {
        println!(
            "Host '{}' did not answer ({})",
            config.bridge.host_id,
            provider.connection_status()
        );
        provider.destroy();
        return Ok(());
    }
    println!("Connected to '{}'", config.bridge.host_id);

    let started = Instant::now();
    let play_for = Duration::from_secs(command.play_secs);
    while started.elapsed() < play_for {
        player.set_position(started.elapsed().as_millis() as i64);
        thread::sleep(TICK);
    }

    player.set_playback_state(false);
    provider.unregister();
    provider.destroy();
    Ok(())
}

fn wait_for_connection(provider: &dyn LyriconProvider, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        match provider.connection_status() {
            ConnectionStatus::Connected => return true,
            ConnectionStatus::Connecting if Instant::now() < deadline => thread::sleep(TICK),
            _ => return false,
        }
    }
}

/// Host-side renderer that prints what providers push.
#[derive(Default)]
struct ConsoleRenderer {
    state: Mutex<RenderState>,
}

#[derive(Default)]
struct RenderState {
    song: Option<Song>,
    line: Option<usize>,
}

impl ConsoleRenderer {
    /// Returns the text of the lyric line at `position_ms` if it differs
    /// from the last one shown.
    fn advance(&self, position_ms: i64) -> Option<String> {
        let mut state = self.state.lock();
        let song = state.song.as_ref()?;
        let index = song.lyrics.iter().position(|l| l.contains(position_ms));
        let text = index.map(|i| song.lyrics[i].text.clone());
        if index == state.line {
            return None;
        }
        state.line = index;
        text
    }
}

impl RemotePlayer for ConsoleRenderer {
    fn is_active(&self) -> bool {
        true
    }

    fn set_song(&self, song: Option<&Song>) -> bool {
        match song {
            Some(song) => {
                tracing::info!(song_id = %song.id, lines = song.lyrics.len(), "Song");
                println!(
                    "♪ {} - {}",
                    song.name.as_deref().unwrap_or(&song.id),
                    song.artist.as_deref().unwrap_or("unknown artist")
                );
            }
            None => println!("♪ (no song)"),
        }
        let mut state = self.state.lock();
        state.song = song.cloned();
        state.line = None;
        true
    }

    fn set_playback_state(&self, playing: bool) -> bool {
        tracing::info!(playing, "Playback state");
        true
    }

    fn seek_to(&self, position_ms: i64) -> bool {
        tracing::info!(position_ms, "Seek");
        if let Some(text) = self.advance(position_ms) {
            println!("  {text}");
        }
        true
    }

    fn set_position(&self, position_ms: i64) -> bool {
        tracing::trace!(position_ms, "Position");
        if let Some(text) = self.advance(position_ms) {
            println!("  {text}");
        }
        true
    }

    fn set_position_update_interval(&self, interval_ms: i32) -> bool {
        tracing::debug!(interval_ms, "Position update interval");
        true
    }

    fn send_text(&self, text: Option<&str>) -> bool {
        println!("» {}", text.unwrap_or(""));
        self.state.lock().song = None;
        true
    }

    fn set_display_translation(&self, visible: bool) -> bool {
        tracing::info!(visible, "Display translation");
        true
    }

    fn set_display_roma(&self, visible: bool) -> bool {
        tracing::info!(visible, "Display roma");
        true
    }
}
