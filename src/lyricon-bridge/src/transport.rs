//! Transport-neutral handles exchanged between provider and host.
//!
//! A transport supplies three primitives: a control channel for discrete
//! calls, a liveness callback fired when the host goes away, and a
//! fixed-size mapped region for the position fast path.

use crate::endpoint::ProviderEndpoint;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("remote handle is no longer connected")]
    Disconnected,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec: {0}")]
    Codec(#[from] crate::protocol::CodecError),
    #[error("remote error: {0}")]
    Remote(String),
    #[error("call {call} timed out")]
    Timeout { call: &'static str },
    #[error("unexpected response to {call}")]
    UnexpectedResponse { call: &'static str },
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Location of a shared position segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentDescriptor {
    pub path: PathBuf,
    pub size: usize,
}

/// Callback fired once when the host owning a handle dies.
pub type DeathCallback = Box<dyn FnOnce() + Send>;

/// Service-level handle to the host.
pub trait RemoteService: Send + Sync {
    /// The player surface of this service.
    fn player(&self) -> TransportResult<Arc<dyn RemotePlayerHandle>>;

    /// Tells the host this provider is leaving.
    fn disconnect(&self) -> TransportResult<()>;

    fn is_alive(&self) -> bool;

    /// Installs the death callback. Fails with `Disconnected` if the host is
    /// already gone; the callback is then never invoked.
    fn link_to_death(&self, callback: DeathCallback) -> TransportResult<()>;

    /// Removes the death callback, if still installed.
    fn unlink_to_death(&self);
}

/// Player-level handle to the host. Each call reports whether the host
/// accepted it.
pub trait RemotePlayerHandle: Send + Sync {
    /// `payload` is an encoded song (see [`crate::protocol::encode_song`]).
    fn set_song(&self, payload: Option<&[u8]>) -> TransportResult<bool>;
    fn set_playback_state(&self, playing: bool) -> TransportResult<bool>;
    fn seek_to(&self, position_ms: i64) -> TransportResult<bool>;
    fn set_position_update_interval(&self, interval_ms: i32) -> TransportResult<bool>;
    fn send_text(&self, text: Option<&str>) -> TransportResult<bool>;
    fn set_display_translation(&self, visible: bool) -> TransportResult<bool>;
    fn set_display_roma(&self, visible: bool) -> TransportResult<bool>;
    /// Shared segment for position ticks, if the host offers one.
    fn position_segment(&self) -> Option<SegmentDescriptor>;
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("host {host_id} is not reachable: {source}")]
    Unreachable {
        host_id: String,
        source: std::io::Error,
    },
    #[error("failed to publish callback endpoint: {0}")]
    Endpoint(std::io::Error),
    #[error("codec: {0}")]
    Codec(#[from] crate::protocol::CodecError),
    #[error("discovery channel is closed")]
    Closed,
}

/// Out-of-band channel that tells the host a provider wants to register.
pub trait DiscoveryChannel: Send + Sync {
    /// Publishes a reference to `endpoint` to the host. Success only means
    /// the message left; the host answers through the endpoint, if at all.
    fn announce(&self, endpoint: &Arc<ProviderEndpoint>) -> Result<(), DiscoveryError>;

    /// Stops serving the endpoint. Further announcements fail with `Closed`.
    fn close(&self);
}
