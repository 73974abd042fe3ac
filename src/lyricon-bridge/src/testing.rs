//! In-process fakes for the transport seams.

use crate::endpoint::ProviderEndpoint;
use crate::protocol::decode_song;
use crate::supervisor::ConnectionListener;
use crate::transport::{
    DeathCallback, DiscoveryChannel, DiscoveryError, RemotePlayerHandle, RemoteService,
    SegmentDescriptor, TransportError, TransportResult,
};
use lyricon_core::Song;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
pub struct FakePlayerHandle {
    calls: Mutex<Vec<String>>,
    songs: Mutex<Vec<Option<Song>>>,
    fail: AtomicBool,
    segment: Option<SegmentDescriptor>,
}

impl FakePlayerHandle {
    pub fn with_segment(segment: SegmentDescriptor) -> Self {
        Self {
            segment: Some(segment),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn fail_calls(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn last_song(&self) -> Option<Option<Song>> {
        self.songs.lock().last().cloned()
    }

    fn record(&self, call: String) -> TransportResult<bool> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        self.calls.lock().push(call);
        Ok(true)
    }
}

impl RemotePlayerHandle for FakePlayerHandle {
    fn set_song(&self, payload: Option<&[u8]>) -> TransportResult<bool> {
        let song = payload.map(decode_song).transpose()?;
        let label = song.as_ref().map_or("none".to_string(), |s| s.id.clone());
        let accepted = self.record(format!("set_song({label})"))?;
        self.songs.lock().push(song);
        Ok(accepted)
    }

    fn set_playback_state(&self, playing: bool) -> TransportResult<bool> {
        self.record(format!("set_playback_state({playing})"))
    }

    fn seek_to(&self, position_ms: i64) -> TransportResult<bool> {
        self.record(format!("seek_to({position_ms})"))
    }

    fn set_position_update_interval(&self, interval_ms: i32) -> TransportResult<bool> {
        self.record(format!("set_position_update_interval({interval_ms})"))
    }

    fn send_text(&self, text: Option<&str>) -> TransportResult<bool> {
        self.record(format!("send_text({})", text.unwrap_or("none")))
    }

    fn set_display_translation(&self, visible: bool) -> TransportResult<bool> {
        self.record(format!("set_display_translation({visible})"))
    }

    fn set_display_roma(&self, visible: bool) -> TransportResult<bool> {
        self.record(format!("set_display_roma({visible})"))
    }

    fn position_segment(&self) -> Option<SegmentDescriptor> {
        self.segment.clone()
    }
}

pub struct FakeService {
    player: Arc<FakePlayerHandle>,
    alive: AtomicBool,
    death: Mutex<Option<DeathCallback>>,
    die_on_link: AtomicBool,
    disconnects: AtomicUsize,
}

impl FakeService {
    pub fn new() -> Self {
        Self {
            player: Arc::new(FakePlayerHandle::default()),
            alive: AtomicBool::new(true),
            death: Mutex::new(None),
            die_on_link: AtomicBool::new(false),
            disconnects: AtomicUsize::new(0),
        }
    }

    pub fn handle(&self) -> Arc<FakePlayerHandle> {
        Arc::clone(&self.player)
    }

    /// Simulates the host process dying.
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
        let callback = self.death.lock().take();
        if let Some(callback) = callback {
            callback();
        }
    }

    /// Makes the host die right after the next death link is installed.
    pub fn die_when_linked(&self) {
        self.die_on_link.store(true, Ordering::SeqCst);
    }

    pub fn is_linked(&self) -> bool {
        self.death.lock().is_some()
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl RemoteService for FakeService {
    fn player(&self) -> TransportResult<Arc<dyn RemotePlayerHandle>> {
        if !self.is_alive() {
            return Err(TransportError::Disconnected);
        }
        Ok(self.player.clone())
    }

    fn disconnect(&self) -> TransportResult<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn link_to_death(&self, callback: DeathCallback) -> TransportResult<()> {
        if !self.is_alive() {
            return Err(TransportError::Disconnected);
        }
        *self.death.lock() = Some(callback);
        if self.die_on_link.swap(false, Ordering::SeqCst) {
            self.kill();
        }
        Ok(())
    }

    fn unlink_to_death(&self) {
        self.death.lock().take();
    }
}

/// Discovery that keeps the announced endpoint so tests can answer for the
/// host.
#[derive(Default)]
pub struct FakeDiscovery {
    endpoint: Mutex<Option<Arc<ProviderEndpoint>>>,
    announcements: AtomicUsize,
    unreachable: AtomicBool,
    closed: AtomicBool,
}

impl FakeDiscovery {
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn announcements(&self) -> usize {
        self.announcements.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Hands `service` to the last announced endpoint, like a host would.
    pub fn respond(&self, service: Arc<dyn RemoteService>) -> bool {
        let endpoint = self.endpoint.lock().clone();
        endpoint.is_some_and(|endpoint| endpoint.on_registered(service))
    }
}

impl DiscoveryChannel for FakeDiscovery {
    fn announce(&self, endpoint: &Arc<ProviderEndpoint>) -> Result<(), DiscoveryError> {
        if self.is_closed() {
            return Err(DiscoveryError::Closed);
        }
        self.announcements.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(DiscoveryError::Unreachable {
                host_id: "fake".into(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }
        *self.endpoint.lock() = Some(Arc::clone(endpoint));
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.endpoint.lock().take();
    }
}

#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<&'static str>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().clone()
    }
}

impl ConnectionListener for RecordingListener {
    fn on_connected(&self) {
        self.events.lock().push("connected");
    }

    fn on_reconnected(&self) {
        self.events.lock().push("reconnected");
    }

    fn on_disconnected(&self) {
        self.events.lock().push("disconnected");
    }

    fn on_connect_timeout(&self) {
        self.events.lock().push("connect_timeout");
    }
}
