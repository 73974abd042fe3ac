//! Provider-host bridge for Lyricon.
//!
//! A provider is an application that knows what is playing and which lyrics
//! belong to it. This crate lets it register with a Lyricon host and push
//! live playback state into it:
//! - A [`LyriconProvider`] facade with register/unregister/destroy and a
//!   connection state machine
//! - A player that caches every call and replays it whenever a connection
//!   is (re)established
//! - Automatic re-registration when the host restarts
//! - A Unix socket transport plus a reference [`socket::BridgeHost`]
//!
//! # Usage
//!
//! ```rust,ignore
//! use lyricon_bridge::create_provider;
//! use lyricon_core::{AppDirs, Config, ProviderInfo, Song};
//!
//! let dirs = AppDirs::discover()?;
//! let config = Config::load_or_default(&dirs)?;
//! let provider = create_provider(
//!     &config.bridge,
//!     &dirs,
//!     ProviderInfo::new("com.example.music", "com.example.player"),
//!     None,
//! )?;
//!
//! let player = provider.player();
//! player.set_song(Some(&Song::new("track-1")));
//! player.set_playback_state(true);
//! provider.register();
//! // on connection the song and playback state above are delivered
//! ```

pub mod boot;
pub mod endpoint;
mod facade;
mod factory;
pub mod protocol;
pub mod proxy;
pub mod shm;
#[cfg(unix)]
pub mod socket;
pub mod supervisor;
mod timer;
pub mod transport;

#[cfg(test)]
mod testing;

pub use boot::{HostReadyListener, HostRestartSignal};
pub use endpoint::{CommandHandler, IgnoreCommands, ProviderEndpoint};
pub use facade::{BridgeProvider, EmptyProvider, LyriconProvider, ProviderOptions};
pub use factory::{create_provider, create_provider_in, empty_provider, BridgeError};
pub use protocol::{CodecError, PROTOCOL_VERSION};
pub use supervisor::{ConnectionListener, DisconnectReason};
pub use transport::{DiscoveryChannel, DiscoveryError, RemoteService, TransportError};
