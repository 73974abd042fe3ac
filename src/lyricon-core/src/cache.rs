//! Write-through cache of the last playback state pushed to the host.
//!
//! The cache records every call before forwarding it, whether or not the
//! forward succeeds, so a freshly (re)connected host can be brought up to
//! date with a single [`CachedRemotePlayer::sync`].

use crate::models::Song;
use crate::player::RemotePlayer;
use parking_lot::Mutex;

/// Which lyric source was set most recently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActiveSource {
    #[default]
    None,
    Song,
    Text,
}

/// Last known value of every replayable field.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedState {
    pub last_song: Option<Song>,
    pub last_text: Option<String>,
    pub active_source: ActiveSource,
    pub last_playback_state: bool,
    pub last_position: i64,
    /// `-1` until set.
    pub last_position_update_interval: i32,
    pub last_display_translation: Option<bool>,
    pub last_display_roma: Option<bool>,
}

impl Default for CachedState {
    fn default() -> Self {
        Self {
            last_song: None,
            last_text: None,
            active_source: ActiveSource::None,
            last_playback_state: false,
            last_position: 0,
            last_position_update_interval: -1,
            last_display_translation: None,
            last_display_roma: None,
        }
    }
}

/// Decorator that remembers what was sent through the wrapped player.
pub struct CachedRemotePlayer<P> {
    inner: P,
    state: Mutex<CachedState>,
    /// Held across record-and-forward and across a whole replay, so a replay
    /// never sends a value older than one already forwarded.
    forward_lock: Mutex<()>,
}

impl<P: RemotePlayer> CachedRemotePlayer<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            state: Mutex::new(CachedState::default()),
            forward_lock: Mutex::new(()),
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// Copy of the cached state.
    pub fn snapshot(&self) -> CachedState {
        self.state.lock().clone()
    }

    /// Replays the cached state to the wrapped player.
    ///
    /// Order: playback state, update interval, display flags, active lyric
    /// source, then a seek to the last position. Calls issued during a sync
    /// wait for it to finish. The wrapped player must not call back into
    /// this cache.
    pub fn sync(&self) {
        let _guard = self.forward_lock.lock();
        let state = self.snapshot();

        tracing::debug!(
            source = ?state.active_source,
            playing = state.last_playback_state,
            position = state.last_position,
            "Replaying cached player state"
        );

        self.inner.set_playback_state(state.last_playback_state);

        if state.last_position_update_interval >= 0 {
            self.inner
                .set_position_update_interval(state.last_position_update_interval);
        }
        if let Some(visible) = state.last_display_translation {
            self.inner.set_display_translation(visible);
        }
        if let Some(visible) = state.last_display_roma {
            self.inner.set_display_roma(visible);
        }

        match state.active_source {
            ActiveSource::Song => {
                self.inner.set_song(state.last_song.as_ref());
            }
            ActiveSource::Text => {
                self.inner.send_text(state.last_text.as_deref());
            }
            ActiveSource::None => {}
        }

        self.inner.seek_to(state.last_position.max(0));
    }
}

impl<P: RemotePlayer> RemotePlayer for CachedRemotePlayer<P> {
    fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    fn set_song(&self, song: Option<&Song>) -> bool {
        let _guard = self.forward_lock.lock();
        {
            let mut state = self.state.lock();
            state.last_song = song.cloned();
            state.active_source = ActiveSource::Song;
        }
        self.inner.set_song(song)
    }

    fn set_playback_state(&self, playing: bool) -> bool {
        let _guard = self.forward_lock.lock();
        self.state.lock().last_playback_state = playing;
        self.inner.set_playback_state(playing)
    }

    fn seek_to(&self, position_ms: i64) -> bool {
        let _guard = self.forward_lock.lock();
        self.state.lock().last_position = position_ms.max(0);
        self.inner.seek_to(position_ms)
    }

    fn set_position(&self, position_ms: i64) -> bool {
        let _guard = self.forward_lock.lock();
        self.state.lock().last_position = position_ms.max(0);
        self.inner.set_position(position_ms)
    }

    fn set_position_update_interval(&self, interval_ms: i32) -> bool {
        let _guard = self.forward_lock.lock();
        self.state.lock().last_position_update_interval = interval_ms;
        self.inner.set_position_update_interval(interval_ms)
    }

    fn send_text(&self, text: Option<&str>) -> bool {
        let _guard = self.forward_lock.lock();
        {
            let mut state = self.state.lock();
            state.last_text = text.map(str::to_owned);
            state.active_source = ActiveSource::Text;
        }
        self.inner.send_text(text)
    }

    fn set_display_translation(&self, visible: bool) -> bool {
        let _guard = self.forward_lock.lock();
        self.state.lock().last_display_translation = Some(visible);
        self.inner.set_display_translation(visible)
    }

    fn set_display_roma(&self, visible: bool) -> bool {
        let _guard = self.forward_lock.lock();
        self.state.lock().last_display_roma = Some(visible);
        self.inner.set_display_roma(visible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Song(Option<String>),
        Playback(bool),
        Seek(i64),
        Position(i64),
        Interval(i32),
        Text(Option<String>),
        Translation(bool),
        Roma(bool),
    }

    type Hook = Box<dyn FnOnce() + Send>;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<Call>>,
        connected: AtomicBool,
        on_playback: Mutex<Option<Hook>>,
    }

    impl Recorder {
        fn record(&self, call: Call) -> bool {
            self.calls.lock().push(call);
            self.connected.load(Ordering::SeqCst)
        }

        fn take(&self) -> Vec<Call> {
            std::mem::take(&mut *self.calls.lock())
        }
    }

    impl RemotePlayer for Recorder {
        fn is_active(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
        fn set_song(&self, song: Option<&Song>) -> bool {
            self.record(Call::Song(song.map(|s| s.id.clone())))
        }
        fn set_playback_state(&self, playing: bool) -> bool {
            let hook = self.on_playback.lock().take();
            if let Some(hook) = hook {
                hook();
            }
            self.record(Call::Playback(playing))
        }
        fn seek_to(&self, position_ms: i64) -> bool {
            self.record(Call::Seek(position_ms))
        }
        fn set_position(&self, position_ms: i64) -> bool {
            self.record(Call::Position(position_ms))
        }
        fn set_position_update_interval(&self, interval_ms: i32) -> bool {
            self.record(Call::Interval(interval_ms))
        }
        fn send_text(&self, text: Option<&str>) -> bool {
            self.record(Call::Text(text.map(str::to_owned)))
        }
        fn set_display_translation(&self, visible: bool) -> bool {
            self.record(Call::Translation(visible))
        }
        fn set_display_roma(&self, visible: bool) -> bool {
            self.record(Call::Roma(visible))
        }
    }

    fn cached() -> (Arc<Recorder>, CachedRemotePlayer<Arc<Recorder>>) {
        let recorder = Arc::new(Recorder::default());
        (recorder.clone(), CachedRemotePlayer::new(recorder))
    }

    #[test]
    fn records_even_when_forwarding_fails() {
        let (recorder, player) = cached();
        assert!(!player.set_playback_state(true));
        assert!(!player.set_song(Some(&Song::new("s1"))));
        assert!(!player.set_position(4200));

        let state = player.snapshot();
        assert!(state.last_playback_state);
        assert_eq!(state.active_source, ActiveSource::Song);
        assert_eq!(state.last_position, 4200);
        assert_eq!(recorder.take().len(), 3);
    }

    #[test]
    fn sync_replays_in_fixed_order() {
        let (recorder, player) = cached();
        player.set_playback_state(true);
        player.set_song(Some(&Song::new("s1")));
        player.set_position(1500);
        recorder.take();

        recorder.connected.store(true, Ordering::SeqCst);
        player.sync();
        assert_eq!(
            recorder.take(),
            vec![
                Call::Playback(true),
                Call::Song(Some("s1".into())),
                Call::Seek(1500),
            ]
        );
    }

    #[test]
    fn sync_includes_only_explicitly_set_optionals() {
        let (recorder, player) = cached();
        player.set_position_update_interval(16);
        player.set_display_roma(false);
        player.send_text(Some("intermission"));
        recorder.take();

        player.sync();
        assert_eq!(
            recorder.take(),
            vec![
                Call::Playback(false),
                Call::Interval(16),
                Call::Roma(false),
                Call::Text(Some("intermission".into())),
                Call::Seek(0),
            ]
        );
    }

    #[test]
    fn latest_lyric_source_wins() {
        let (recorder, player) = cached();
        player.send_text(Some("hello"));
        player.set_song(Some(&Song::new("s2")));
        recorder.take();

        player.sync();
        let calls = recorder.take();
        assert!(calls.contains(&Call::Song(Some("s2".into()))));
        assert!(!calls.iter().any(|c| matches!(c, Call::Text(_))));

        player.send_text(None);
        recorder.take();
        player.sync();
        let calls = recorder.take();
        assert!(calls.contains(&Call::Text(None)));
        assert!(!calls.iter().any(|c| matches!(c, Call::Song(_))));
        // the song stays cached even though text is now the active source
        assert_eq!(
            player.snapshot().last_song.map(|s| s.id),
            Some("s2".to_string())
        );
    }

    #[test]
    fn negative_positions_clamp_to_zero() {
        let (recorder, player) = cached();
        player.seek_to(-50);
        assert_eq!(player.snapshot().last_position, 0);
        recorder.take();
        player.sync();
        assert_eq!(recorder.take().last(), Some(&Call::Seek(0)));
    }

    #[test]
    fn command_during_replay_is_not_overwritten() {
        let recorder = Arc::new(Recorder::default());
        let player = Arc::new(CachedRemotePlayer::new(Arc::clone(&recorder)));
        player.set_song(Some(&Song::new("stale")));
        recorder.take();

        let writer: Arc<Mutex<Option<JoinHandle<bool>>>> = Arc::default();
        let app = Arc::clone(&player);
        let slot = Arc::clone(&writer);
        *recorder.on_playback.lock() = Some(Box::new(move || {
            let handle = thread::spawn(move || app.set_song(Some(&Song::new("fresh"))));
            *slot.lock() = Some(handle);
            thread::sleep(Duration::from_millis(50));
        }));

        player.sync();
        let handle = writer.lock().take().expect("writer thread started");
        handle.join().unwrap();

        let songs: Vec<_> = recorder
            .take()
            .into_iter()
            .filter_map(|call| match call {
                Call::Song(id) => id,
                _ => None,
            })
            .collect();
        assert_eq!(songs, vec!["stale".to_string(), "fresh".to_string()]);
        assert_eq!(
            player.snapshot().last_song.map(|s| s.id),
            Some("fresh".to_string())
        );
    }
}
