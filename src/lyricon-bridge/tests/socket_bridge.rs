#![cfg(unix)]

use lyricon_bridge::socket::{BridgeHost, HostOptions, RuntimeLayout};
use lyricon_bridge::{
    create_provider_in, CommandHandler, ConnectionListener, HostRestartSignal, LyriconProvider,
};
use lyricon_core::{BridgeConfig, ConnectionStatus, ProviderCommand, ProviderInfo, RemotePlayer, Song};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const HOST_ID: &str = "test.lyricon.host";

#[derive(Default)]
struct Renderer {
    calls: Mutex<Vec<String>>,
}

impl Renderer {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn push(&self, call: String) -> bool {
        self.calls.lock().push(call);
        true
    }
}

impl RemotePlayer for Renderer {
    fn is_active(&self) -> bool {
        true
    }
    fn set_song(&self, song: Option<&Song>) -> bool {
        self.push(format!("song {}", song.map_or("none", |s| s.id.as_str())))
    }
    fn set_playback_state(&self, playing: bool) -> bool {
        self.push(format!("playing {playing}"))
    }
    fn seek_to(&self, position_ms: i64) -> bool {
        self.push(format!("seek {position_ms}"))
    }
    fn set_position(&self, position_ms: i64) -> bool {
        self.push(format!("position {position_ms}"))
    }
    fn set_position_update_interval(&self, interval_ms: i32) -> bool {
        self.push(format!("interval {interval_ms}"))
    }
    fn send_text(&self, text: Option<&str>) -> bool {
        self.push(format!("text {}", text.unwrap_or("none")))
    }
    fn set_display_translation(&self, visible: bool) -> bool {
        self.push(format!("translation {visible}"))
    }
    fn set_display_roma(&self, visible: bool) -> bool {
        self.push(format!("roma {visible}"))
    }
}

#[derive(Default)]
struct Events(Mutex<Vec<&'static str>>);

impl Events {
    fn all(&self) -> Vec<&'static str> {
        self.0.lock().clone()
    }
}

impl ConnectionListener for Events {
    fn on_connected(&self) {
        self.0.lock().push("connected");
    }
    fn on_reconnected(&self) {
        self.0.lock().push("reconnected");
    }
    fn on_disconnected(&self) {
        self.0.lock().push("disconnected");
    }
    fn on_connect_timeout(&self) {
        self.0.lock().push("connect_timeout");
    }
}

struct Echo;

impl CommandHandler for Echo {
    fn on_command(&self, command: &ProviderCommand) -> Option<Vec<u8>> {
        command.payload.clone()
    }
}

fn config(register_timeout_ms: u64) -> BridgeConfig {
    BridgeConfig {
        host_id: HOST_ID.to_string(),
        register_timeout_ms,
        call_timeout_ms: 2000,
        position_poll_ms: 5,
        ..BridgeConfig::default()
    }
}

fn start_host(root: &Path) -> (BridgeHost, Arc<Renderer>) {
    let renderer = Arc::new(Renderer::default());
    let host = BridgeHost::start(
        RuntimeLayout::new(root, HOST_ID),
        HostOptions::from_config(&config(2000)),
        renderer.clone(),
    )
    .unwrap();
    (host, renderer)
}

fn provider(
    root: &Path,
    register_timeout_ms: u64,
) -> (Arc<dyn LyriconProvider>, Arc<Events>, Arc<HostRestartSignal>) {
    let signal = Arc::new(HostRestartSignal::new());
    let provider = create_provider_in(
        &config(register_timeout_ms),
        root,
        ProviderInfo::new("com.example.music", "com.example.player"),
        Some(Arc::new(Echo)),
        signal.clone(),
    )
    .unwrap();
    let events = Arc::new(Events::default());
    provider.add_connection_listener(events.clone());
    (provider, events, signal)
}

fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("timed out waiting for {what}");
}

#[test]
fn registers_and_delivers_cached_then_live_calls() {
    let tmp = tempfile::tempdir().unwrap();
    let (host, renderer) = start_host(tmp.path());
    let (provider, events, signal) = provider(tmp.path(), 2000);

    let player = provider.player();
    player.set_song(Some(&Song::new("track-1")));
    player.set_playback_state(true);
    player.seek_to(1500);

    assert!(provider.register());
    wait_until("connection", || events.all() == vec!["connected"]);
    assert_eq!(provider.connection_status(), ConnectionStatus::Connected);
    assert_eq!(host.providers().len(), 1);
    assert_eq!(host.providers()[0].info.provider_id, "com.example.music");

    wait_until("replay", || renderer.calls().len() >= 3);
    assert_eq!(
        renderer.calls()[..3],
        ["playing true", "song track-1", "seek 1500"]
    );

    assert!(player.send_text(Some("hello")));
    assert!(renderer.calls().contains(&"text hello".to_string()));

    assert!(player.set_position(4200));
    wait_until("position tick", || {
        renderer.calls().contains(&"position 4200".to_string())
    });

    let reply = host
        .run_command(
            "com.example.music",
            ProviderCommand {
                name: "echo".into(),
                payload: Some(vec![1, 2, 3]),
            },
        )
        .unwrap();
    assert_eq!(reply, Some(vec![1, 2, 3]));

    assert!(provider.unregister());
    assert_eq!(
        provider.connection_status(),
        ConnectionStatus::DisconnectedByUser
    );
    wait_until("session close", || host.session_count() == 0);
    assert!(!player.set_playback_state(false));

    assert!(provider.destroy());
    assert!(!provider.destroy());
    signal.stop();
}

#[test]
fn missing_host_times_out() {
    let tmp = tempfile::tempdir().unwrap();
    let (provider, events, signal) = provider(tmp.path(), 100);

    assert!(provider.register());
    wait_until("timeout", || !events.all().is_empty());
    assert_eq!(events.all(), vec!["connect_timeout"]);
    assert_eq!(provider.connection_status(), ConnectionStatus::Disconnected);

    provider.destroy();
    signal.stop();
}

#[test]
fn host_restart_reconnects_and_replays() {
    let tmp = tempfile::tempdir().unwrap();
    let (host, _) = start_host(tmp.path());
    let (provider, events, signal) = provider(tmp.path(), 2000);

    provider.player().set_song(Some(&Song::new("track-2")));
    provider.register();
    wait_until("connection", || {
        provider.connection_status() == ConnectionStatus::Connected
    });

    host.shutdown();
    wait_until("host death", || {
        provider.connection_status() == ConnectionStatus::DisconnectedByHost
    });
    assert!(!provider.player().is_active());
    drop(host);

    let (_restarted, renderer) = start_host(tmp.path());
    wait_until("reconnection", || events.all().len() == 3);
    assert_eq!(events.all(), vec!["connected", "disconnected", "reconnected"]);
    assert_eq!(provider.connection_status(), ConnectionStatus::Connected);
    wait_until("replay", || {
        renderer.calls().contains(&"song track-2".to_string())
    });

    provider.destroy();
    signal.stop();
}

#[test]
fn user_disconnect_survives_host_restart() {
    let tmp = tempfile::tempdir().unwrap();
    let (host, _) = start_host(tmp.path());
    let (provider, _, signal) = provider(tmp.path(), 2000);

    provider.register();
    wait_until("connection", || {
        provider.connection_status() == ConnectionStatus::Connected
    });
    provider.unregister();
    host.shutdown();
    drop(host);

    let (restarted, _) = start_host(tmp.path());
    thread::sleep(Duration::from_millis(200));
    assert_eq!(
        provider.connection_status(),
        ConnectionStatus::DisconnectedByUser
    );
    assert!(restarted.providers().is_empty());

    provider.destroy();
    signal.stop();
}
