use crate::models::Song;
use std::sync::Arc;

/// Command surface for pushing playback state to the host.
///
/// Every call reports whether it was delivered. Implementations never
/// surface transport errors: a call that cannot be delivered returns `false`.
pub trait RemotePlayer: Send + Sync {
    /// Whether calls are currently being delivered to a live host.
    fn is_active(&self) -> bool;

    /// Replace the current song. `None` clears it.
    fn set_song(&self, song: Option<&Song>) -> bool;

    fn set_playback_state(&self, playing: bool) -> bool;

    /// Jump to an absolute position. Unlike [`RemotePlayer::set_position`],
    /// this is a discrete event the renderer animates.
    fn seek_to(&self, position_ms: i64) -> bool;

    /// High-frequency position tick.
    fn set_position(&self, position_ms: i64) -> bool;

    /// How often the host should sample the position, in milliseconds.
    fn set_position_update_interval(&self, interval_ms: i32) -> bool;

    /// Show plain text instead of song lyrics. `None` clears it.
    fn send_text(&self, text: Option<&str>) -> bool;

    fn set_display_translation(&self, visible: bool) -> bool;

    fn set_display_roma(&self, visible: bool) -> bool;
}

impl<T: RemotePlayer + ?Sized> RemotePlayer for Arc<T> {
    fn is_active(&self) -> bool {
        (**self).is_active()
    }

    fn set_song(&self, song: Option<&Song>) -> bool {
        (**self).set_song(song)
    }

    fn set_playback_state(&self, playing: bool) -> bool {
        (**self).set_playback_state(playing)
    }

    fn seek_to(&self, position_ms: i64) -> bool {
        (**self).seek_to(position_ms)
    }

    fn set_position(&self, position_ms: i64) -> bool {
        (**self).set_position(position_ms)
    }

    fn set_position_update_interval(&self, interval_ms: i32) -> bool {
        (**self).set_position_update_interval(interval_ms)
    }

    fn send_text(&self, text: Option<&str>) -> bool {
        (**self).send_text(text)
    }

    fn set_display_translation(&self, visible: bool) -> bool {
        (**self).set_display_translation(visible)
    }

    fn set_display_roma(&self, visible: bool) -> bool {
        (**self).set_display_roma(visible)
    }
}

/// Player used where the bridge transport is unavailable. Drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpRemotePlayer;

impl RemotePlayer for NoOpRemotePlayer {
    fn is_active(&self) -> bool {
        false
    }

    fn set_song(&self, _song: Option<&Song>) -> bool {
        false
    }

    fn set_playback_state(&self, _playing: bool) -> bool {
        false
    }

    fn seek_to(&self, _position_ms: i64) -> bool {
        false
    }

    fn set_position(&self, _position_ms: i64) -> bool {
        false
    }

    fn set_position_update_interval(&self, _interval_ms: i32) -> bool {
        false
    }

    fn send_text(&self, _text: Option<&str>) -> bool {
        false
    }

    fn set_display_translation(&self, _visible: bool) -> bool {
        false
    }

    fn set_display_roma(&self, _visible: bool) -> bool {
        false
    }
}
