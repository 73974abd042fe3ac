//! Outbound side of the bridge.
//!
//! Discrete calls go over the control channel; position ticks are stored in
//! the shared segment. Nothing is attempted unless sending is allowed, which
//! the supervisor ties to the `Connected` state.

use crate::protocol::encode_song;
use crate::shm::PositionSegment;
use crate::transport::{RemotePlayerHandle, TransportResult};
use lyricon_core::{RemotePlayer, Song};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Default)]
pub struct RemotePlayerProxy {
    allow_sending: AtomicBool,
    player: RwLock<Option<Arc<dyn RemotePlayerHandle>>>,
    segment: RwLock<Option<PositionSegment>>,
}

impl RemotePlayerProxy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_allow_sending(&self, allow: bool) {
        self.allow_sending.store(allow, Ordering::SeqCst);
    }

    pub fn allow_sending(&self) -> bool {
        self.allow_sending.load(Ordering::SeqCst)
    }

    /// Binds a freshly obtained player handle and maps its position segment.
    /// A segment that cannot be mapped only disables the position fast path.
    pub fn bind(&self, player: Arc<dyn RemotePlayerHandle>) {
        let segment = player.position_segment().and_then(|descriptor| {
            match PositionSegment::open(&descriptor) {
                Ok(segment) => Some(segment),
                Err(err) => {
                    tracing::warn!(
                        path = %descriptor.path.display(),
                        error = %err,
                        "Failed to map position segment; position updates disabled"
                    );
                    None
                }
            }
        });
        *self.segment.write() = segment;
        *self.player.write() = Some(player);
    }

    pub fn unbind(&self) {
        self.player.write().take();
        self.segment.write().take();
    }

    pub fn is_bound(&self) -> bool {
        self.player.read().is_some()
    }

    pub fn has_position_segment(&self) -> bool {
        self.segment.read().is_some()
    }

    fn call<F>(&self, name: &'static str, f: F) -> bool
    where
        F: FnOnce(&dyn RemotePlayerHandle) -> TransportResult<bool>,
    {
        if !self.allow_sending() {
            tracing::trace!(call = name, "Not connected; call dropped");
            return false;
        }
        let Some(player) = self.player.read().clone() else {
            return false;
        };
        match f(player.as_ref()) {
            Ok(accepted) => accepted,
            Err(err) => {
                tracing::warn!(call = name, error = %err, "Remote call failed");
                false
            }
        }
    }
}

impl RemotePlayer for RemotePlayerProxy {
    fn is_active(&self) -> bool {
        self.allow_sending() && self.is_bound()
    }

    fn set_song(&self, song: Option<&Song>) -> bool {
        if !self.allow_sending() {
            return false;
        }
        let payload = match song.map(encode_song).transpose() {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to encode song");
                return false;
            }
        };
        self.call("set_song", |player| player.set_song(payload.as_deref()))
    }

    fn set_playback_state(&self, playing: bool) -> bool {
        self.call("set_playback_state", |player| {
            player.set_playback_state(playing)
        })
    }

    fn seek_to(&self, position_ms: i64) -> bool {
        self.call("seek_to", |player| player.seek_to(position_ms.max(0)))
    }

    fn set_position(&self, position_ms: i64) -> bool {
        if !self.allow_sending() {
            return false;
        }
        match self.segment.read().as_ref() {
            Some(segment) => {
                segment.write_position(position_ms.max(0));
                true
            }
            None => false,
        }
    }

    fn set_position_update_interval(&self, interval_ms: i32) -> bool {
        if interval_ms < 0 {
            tracing::debug!(interval_ms, "Ignoring negative position update interval");
            return false;
        }
        self.call("set_position_update_interval", |player| {
            player.set_position_update_interval(interval_ms)
        })
    }

    fn send_text(&self, text: Option<&str>) -> bool {
        self.call("send_text", |player| player.send_text(text))
    }

    fn set_display_translation(&self, visible: bool) -> bool {
        self.call("set_display_translation", |player| {
            player.set_display_translation(visible)
        })
    }

    fn set_display_roma(&self, visible: bool) -> bool {
        self.call("set_display_roma", |player| player.set_display_roma(visible))
    }
}

impl std::fmt::Debug for RemotePlayerProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemotePlayerProxy")
            .field("allow_sending", &self.allow_sending())
            .field("bound", &self.is_bound())
            .field("position_segment", &self.has_position_segment())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::PositionSegment;
    use crate::testing::FakePlayerHandle;

    #[test]
    fn calls_are_gated_on_allow_sending() {
        let proxy = RemotePlayerProxy::new();
        let handle = Arc::new(FakePlayerHandle::default());
        proxy.bind(handle.clone());

        assert!(!proxy.set_playback_state(true));
        assert!(handle.calls().is_empty());

        proxy.set_allow_sending(true);
        assert!(proxy.set_playback_state(true));
        assert_eq!(handle.calls(), vec!["set_playback_state(true)".to_string()]);
    }

    #[test]
    fn transport_failures_become_false() {
        let proxy = RemotePlayerProxy::new();
        let handle = Arc::new(FakePlayerHandle::default());
        handle.fail_calls(true);
        proxy.bind(handle.clone());
        proxy.set_allow_sending(true);
        assert!(!proxy.seek_to(10));
        assert!(!proxy.send_text(Some("hi")));
    }

    #[test]
    fn unbound_proxy_drops_calls() {
        let proxy = RemotePlayerProxy::new();
        proxy.set_allow_sending(true);
        assert!(!proxy.is_active());
        assert!(!proxy.set_display_translation(true));
    }

    #[test]
    fn song_is_sent_compressed() {
        let proxy = RemotePlayerProxy::new();
        let handle = Arc::new(FakePlayerHandle::default());
        proxy.bind(handle.clone());
        proxy.set_allow_sending(true);

        let song = Song::new("abc");
        assert!(proxy.set_song(Some(&song)));
        assert_eq!(handle.last_song(), Some(Some(song)));
        assert!(proxy.set_song(None));
        assert_eq!(handle.last_song(), Some(None));
    }

    #[test]
    fn position_goes_through_segment_not_rpc() {
        let tmp = tempfile::tempdir().unwrap();
        let host_segment = PositionSegment::create(&tmp.path().join("pos")).unwrap();
        let handle = Arc::new(FakePlayerHandle::with_segment(host_segment.descriptor()));

        let proxy = RemotePlayerProxy::new();
        proxy.bind(handle.clone());
        assert!(proxy.has_position_segment());
        assert!(!proxy.set_position(500));

        proxy.set_allow_sending(true);
        assert!(proxy.set_position(500));
        assert!(proxy.set_position(-20));
        assert_eq!(host_segment.read_position(), 0);
        assert!(proxy.set_position(750));
        assert_eq!(host_segment.read_position(), 750);
        assert!(handle.calls().is_empty());
    }

    #[test]
    fn unmappable_segment_only_disables_positions() {
        let tmp = tempfile::tempdir().unwrap();
        let handle = Arc::new(FakePlayerHandle::with_segment(
            crate::transport::SegmentDescriptor {
                path: tmp.path().join("missing"),
                size: crate::shm::SEGMENT_SIZE,
            },
        ));
        let proxy = RemotePlayerProxy::new();
        proxy.bind(handle.clone());
        proxy.set_allow_sending(true);
        assert!(!proxy.has_position_segment());
        assert!(!proxy.set_position(10));
        assert!(proxy.set_playback_state(false));
    }
}
