//! The provider's local callback endpoint.
//!
//! This is what the discovery message points at. The host reads the
//! provider's identity from it, may send provider-defined commands through
//! it, and completes registration by handing back its own service handle.

use crate::protocol::{encode_provider_info, CodecError};
use crate::transport::RemoteService;
use lyricon_core::{ProviderCommand, ProviderInfo};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Provider-defined handling of host commands.
pub trait CommandHandler: Send + Sync {
    /// Returns an optional reply payload for the host.
    fn on_command(&self, command: &ProviderCommand) -> Option<Vec<u8>>;
}

/// Handler used when the provider defines no commands.
#[derive(Debug, Default, Clone, Copy)]
pub struct IgnoreCommands;

impl CommandHandler for IgnoreCommands {
    fn on_command(&self, command: &ProviderCommand) -> Option<Vec<u8>> {
        tracing::debug!(command = %command.name, "Ignoring host command");
        None
    }
}

/// Single-assignment token shared by the registration callback and the
/// registration timeout. Whichever claims it first wins.
#[derive(Debug)]
pub struct RegistrationAttempt {
    id: u64,
    claimed: AtomicBool,
}

impl RegistrationAttempt {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            claimed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// True exactly once per attempt.
    pub fn claim(&self) -> bool {
        !self.claimed.swap(true, Ordering::SeqCst)
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::SeqCst)
    }
}

pub type RegisteredCallback = Box<dyn FnOnce(Arc<dyn RemoteService>) + Send>;

pub struct ProviderEndpoint {
    info: ProviderInfo,
    info_bytes: Vec<u8>,
    command_handler: Arc<dyn CommandHandler>,
    pending: Mutex<Option<RegisteredCallback>>,
}

impl ProviderEndpoint {
    pub fn new(
        info: ProviderInfo,
        command_handler: Arc<dyn CommandHandler>,
    ) -> Result<Self, CodecError> {
        let info_bytes = encode_provider_info(&info)?;
        Ok(Self {
            info,
            info_bytes,
            command_handler,
            pending: Mutex::new(None),
        })
    }

    pub fn provider_info(&self) -> &ProviderInfo {
        &self.info
    }

    /// Serialized [`ProviderInfo`], computed once at construction.
    pub fn provider_info_bytes(&self) -> &[u8] {
        &self.info_bytes
    }

    pub fn command_handler(&self) -> Arc<dyn CommandHandler> {
        Arc::clone(&self.command_handler)
    }

    /// Installs the one-shot registration callback, replacing any previous one.
    pub fn arm(&self, callback: RegisteredCallback) {
        *self.pending.lock() = Some(callback);
    }

    /// Removes the registration callback. Returns false if none was armed.
    pub fn disarm(&self) -> bool {
        self.pending.lock().take().is_some()
    }

    pub fn is_armed(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Called by the transport when the host hands back its service.
    ///
    /// The callback is removed before it runs, so duplicate deliveries are
    /// ignored. Returns whether a callback consumed the service.
    pub fn on_registered(&self, service: Arc<dyn RemoteService>) -> bool {
        let callback = self.pending.lock().take();
        match callback {
            Some(callback) => {
                callback(service);
                true
            }
            None => {
                tracing::debug!(
                    provider_id = %self.info.provider_id,
                    "Ignoring registration callback with no pending attempt"
                );
                false
            }
        }
    }
}

impl std::fmt::Debug for ProviderEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderEndpoint")
            .field("provider_id", &self.info.provider_id)
            .field("armed", &self.is_armed())
            .finish()
    }
}
