//! The provider-facing API.

use crate::boot::{HostReadyListener, HostRestartSignal};
use crate::endpoint::{CommandHandler, IgnoreCommands, ProviderEndpoint, RegistrationAttempt};
use crate::protocol::CodecError;
use crate::supervisor::{CachedPlayer, ConnectionListener, ConnectionSupervisor, DisconnectReason};
use crate::timer::Timeout;
use crate::transport::{DiscoveryChannel, RemoteService};
use lyricon_core::{
    BridgeConfig, ConnectionStatus, ListenerSet, NoOpRemotePlayer, ProviderInfo, RemotePlayer,
    DEFAULT_HOST_ID,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// What a lyric source application talks to.
pub trait LyriconProvider: Send + Sync {
    fn provider_info(&self) -> &ProviderInfo;

    /// The player to push state into. Always usable; calls made while
    /// disconnected are remembered and replayed on connection.
    fn player(&self) -> Arc<dyn RemotePlayer>;

    fn connection_status(&self) -> ConnectionStatus;

    /// Starts registering with the host. Returns false if an attempt is
    /// already running, the provider is connected, or it was destroyed.
    fn register(&self) -> bool;

    /// Leaves the host. Returns true only if this call moved the provider to
    /// `DisconnectedByUser`.
    fn unregister(&self) -> bool;

    /// Releases everything. Only the first call returns true.
    fn destroy(&self) -> bool;

    fn add_connection_listener(&self, listener: Arc<dyn ConnectionListener>) -> bool;

    fn remove_connection_listener(&self, listener: &Arc<dyn ConnectionListener>) -> bool;
}

#[derive(Clone)]
pub struct ProviderOptions {
    pub host_id: String,
    pub register_timeout: Duration,
    pub command_handler: Arc<dyn CommandHandler>,
}

impl ProviderOptions {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            host_id: config.host_id.clone(),
            register_timeout: config.register_timeout(),
            ..Self::default()
        }
    }

    pub fn with_command_handler(mut self, handler: Arc<dyn CommandHandler>) -> Self {
        self.command_handler = handler;
        self
    }
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            host_id: DEFAULT_HOST_ID.to_string(),
            register_timeout: Duration::from_millis(4000),
            command_handler: Arc::new(IgnoreCommands),
        }
    }
}

impl std::fmt::Debug for ProviderOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderOptions")
            .field("host_id", &self.host_id)
            .field("register_timeout", &self.register_timeout)
            .finish_non_exhaustive()
    }
}

struct PendingRegistration {
    attempt: Arc<RegistrationAttempt>,
    timeout: Timeout,
}

/// Replays the cache whenever a connection is established.
struct ReplayOnConnect {
    player: Arc<CachedPlayer>,
}

impl ConnectionListener for ReplayOnConnect {
    fn on_connected(&self) {
        self.player.sync();
    }

    fn on_reconnected(&self) {
        self.player.sync();
    }
}

/// Holds the provider weakly so the process-wide signal doesn't keep it alive.
struct RestartHook {
    provider: Weak<BridgeProvider>,
}

impl HostReadyListener for RestartHook {
    fn on_host_ready(&self, host_id: &str) {
        if let Some(provider) = self.provider.upgrade() {
            provider.on_host_ready(host_id);
        }
    }
}

pub struct BridgeProvider {
    options: ProviderOptions,
    endpoint: Arc<ProviderEndpoint>,
    discovery: Arc<dyn DiscoveryChannel>,
    supervisor: Arc<ConnectionSupervisor>,
    signal: Arc<HostRestartSignal>,
    restart_hook: Arc<dyn HostReadyListener>,
    pending: Mutex<Option<PendingRegistration>>,
    next_attempt: AtomicU64,
    destroyed: AtomicBool,
    weak_self: Weak<BridgeProvider>,
}

impl BridgeProvider {
    pub fn new(
        info: ProviderInfo,
        options: ProviderOptions,
        discovery: Arc<dyn DiscoveryChannel>,
        signal: Arc<HostRestartSignal>,
    ) -> Result<Arc<Self>, CodecError> {
        let endpoint = Arc::new(ProviderEndpoint::new(
            info,
            Arc::clone(&options.command_handler),
        )?);
        let supervisor = ConnectionSupervisor::new(endpoint.provider_info().provider_id.clone());
        supervisor.add_listener(Arc::new(ReplayOnConnect {
            player: Arc::clone(supervisor.player()),
        }));

        let provider = Arc::new_cyclic(|weak_self: &Weak<BridgeProvider>| Self {
            options,
            endpoint,
            discovery,
            supervisor,
            signal,
            restart_hook: Arc::new(RestartHook {
                provider: weak_self.clone(),
            }),
            pending: Mutex::new(None),
            next_attempt: AtomicU64::new(1),
            destroyed: AtomicBool::new(false),
            weak_self: weak_self.clone(),
        });
        provider
            .signal
            .add_listener(Arc::clone(&provider.restart_hook));

        tracing::debug!(
            provider_id = %provider.endpoint.provider_info().provider_id,
            host_id = %provider.options.host_id,
            "Provider created"
        );
        Ok(provider)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn supervisor(&self) -> &Arc<ConnectionSupervisor> {
        &self.supervisor
    }

    fn provider_id(&self) -> &str {
        &self.endpoint.provider_info().provider_id
    }

    fn complete_registration(&self, attempt: &RegistrationAttempt, service: Arc<dyn RemoteService>) {
        if !attempt.claim() {
            tracing::debug!(attempt = attempt.id(), "Registration already settled");
            return;
        }
        self.clear_pending(attempt.id());
        if self.supervisor.bind(service) {
            tracing::info!(provider_id = %self.provider_id(), "Registered with host");
        }
    }

    fn registration_timed_out(&self, attempt: &RegistrationAttempt) {
        if !attempt.claim() {
            return;
        }
        self.endpoint.disarm();
        self.clear_pending(attempt.id());
        self.supervisor.connect_timed_out();
    }

    fn clear_pending(&self, attempt_id: u64) {
        let mut pending = self.pending.lock();
        if pending
            .as_ref()
            .is_some_and(|p| p.attempt.id() == attempt_id)
        {
            if let Some(p) = pending.take() {
                p.timeout.cancel();
            }
        }
    }

    /// Settles any in-flight attempt so neither its callback nor its
    /// timeout can act any more.
    fn abort_pending(&self) {
        self.endpoint.disarm();
        let pending = self.pending.lock().take();
        if let Some(pending) = pending {
            pending.attempt.claim();
            pending.timeout.cancel();
        }
    }

    fn on_host_ready(&self, host_id: &str) {
        if self.is_destroyed() || host_id != self.options.host_id {
            return;
        }
        if self.supervisor.status() == ConnectionStatus::DisconnectedByHost {
            tracing::info!(provider_id = %self.provider_id(), host_id, "Host restarted; registering again");
            self.register();
        }
    }
}

impl LyriconProvider for BridgeProvider {
    fn provider_info(&self) -> &ProviderInfo {
        self.endpoint.provider_info()
    }

    fn player(&self) -> Arc<dyn RemotePlayer> {
        Arc::clone(self.supervisor.player()) as Arc<dyn RemotePlayer>
    }

    fn connection_status(&self) -> ConnectionStatus {
        self.supervisor.status()
    }

    fn register(&self) -> bool {
        if self.is_destroyed() {
            tracing::debug!(provider_id = %self.provider_id(), "Register called after destroy");
            return false;
        }
        if !self.supervisor.begin_connecting() {
            tracing::debug!(
                provider_id = %self.provider_id(),
                status = %self.supervisor.status(),
                "Register ignored"
            );
            return false;
        }

        let attempt = Arc::new(RegistrationAttempt::new(
            self.next_attempt.fetch_add(1, Ordering::SeqCst),
        ));

        let weak = self.weak_self.clone();
        let timed_out = Arc::clone(&attempt);
        let timeout = match Timeout::schedule("register-timeout", self.options.register_timeout, move || {
            if let Some(provider) = weak.upgrade() {
                provider.registration_timed_out(&timed_out);
            }
        }) {
            Ok(timeout) => timeout,
            Err(err) => {
                tracing::error!(error = %err, "Failed to start registration timer");
                attempt.claim();
                self.supervisor.connect_timed_out();
                return false;
            }
        };
        *self.pending.lock() = Some(PendingRegistration {
            attempt: Arc::clone(&attempt),
            timeout,
        });

        let weak = self.weak_self.clone();
        self.endpoint.arm(Box::new(move |service| {
            if let Some(provider) = weak.upgrade() {
                provider.complete_registration(&attempt, service);
            }
        }));

        // an unreachable host is reported through the timeout
        if let Err(err) = self.discovery.announce(&self.endpoint) {
            tracing::warn!(
                provider_id = %self.provider_id(),
                host_id = %self.options.host_id,
                error = %err,
                "Failed to announce provider"
            );
        } else {
            tracing::debug!(provider_id = %self.provider_id(), "Provider announced");
        }
        true
    }

    fn unregister(&self) -> bool {
        if self.is_destroyed() {
            return false;
        }
        match self.supervisor.status() {
            ConnectionStatus::Connected => {
                self.supervisor.disconnect(Some(DisconnectReason::User))
            }
            ConnectionStatus::Connecting => {
                self.abort_pending();
                self.supervisor.cancel_connecting()
            }
            _ => false,
        }
    }

    fn destroy(&self) -> bool {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.abort_pending();
        self.supervisor.shutdown();
        self.signal.remove_listener(&self.restart_hook);
        self.discovery.close();
        tracing::info!(provider_id = %self.provider_id(), "Provider destroyed");
        true
    }

    fn add_connection_listener(&self, listener: Arc<dyn ConnectionListener>) -> bool {
        if self.is_destroyed() {
            return false;
        }
        self.supervisor.add_listener(listener)
    }

    fn remove_connection_listener(&self, listener: &Arc<dyn ConnectionListener>) -> bool {
        self.supervisor.remove_listener(listener)
    }
}

impl Drop for BridgeProvider {
    fn drop(&mut self) {
        if !self.is_destroyed() {
            self.destroy();
        }
    }
}

impl std::fmt::Debug for BridgeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeProvider")
            .field("provider_id", &self.provider_id())
            .field("host_id", &self.options.host_id)
            .field("status", &self.supervisor.status())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

/// Stand-in used where no transport is available. Never connects.
pub struct EmptyProvider {
    info: ProviderInfo,
    player: Arc<NoOpRemotePlayer>,
    listeners: ListenerSet<dyn ConnectionListener>,
    destroyed: AtomicBool,
}

impl EmptyProvider {
    pub fn new(info: ProviderInfo) -> Self {
        Self {
            info,
            player: Arc::new(NoOpRemotePlayer),
            listeners: ListenerSet::new(),
            destroyed: AtomicBool::new(false),
        }
    }
}

impl LyriconProvider for EmptyProvider {
    fn provider_info(&self) -> &ProviderInfo {
        &self.info
    }

    fn player(&self) -> Arc<dyn RemotePlayer> {
        Arc::clone(&self.player) as Arc<dyn RemotePlayer>
    }

    fn connection_status(&self) -> ConnectionStatus {
        ConnectionStatus::Disconnected
    }

    fn register(&self) -> bool {
        false
    }

    fn unregister(&self) -> bool {
        false
    }

    fn destroy(&self) -> bool {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.listeners.clear();
        true
    }

    fn add_connection_listener(&self, listener: Arc<dyn ConnectionListener>) -> bool {
        self.listeners.add(listener)
    }

    fn remove_connection_listener(&self, listener: &Arc<dyn ConnectionListener>) -> bool {
        self.listeners.remove(listener)
    }
}
