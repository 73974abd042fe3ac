//! Connection supervisor.
//!
//! Owns the bound host service, the connection state machine and the
//! listener fan-out. The player it exposes is the write-through cache
//! wrapped around the outbound proxy, so every call is remembered whatever
//! the connection state.

use crate::proxy::RemotePlayerProxy;
use crate::transport::RemoteService;
use lyricon_core::{
    AtomicConnectionStatus, CachedRemotePlayer, ConnectionStatus, ListenerSet, RemotePlayer,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Connection lifecycle notifications. All methods default to no-ops.
pub trait ConnectionListener: Send + Sync {
    /// First successful connection of this provider.
    fn on_connected(&self) {}
    /// Any later successful connection.
    fn on_reconnected(&self) {}
    fn on_disconnected(&self) {}
    /// A registration attempt got no answer in time.
    fn on_connect_timeout(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Host,
    User,
}

pub type CachedPlayer = CachedRemotePlayer<Arc<RemotePlayerProxy>>;

struct Binding {
    service: Arc<dyn RemoteService>,
    generation: u64,
}

pub struct ConnectionSupervisor {
    provider_id: String,
    status: AtomicConnectionStatus,
    binding: Mutex<Option<Binding>>,
    proxy: Arc<RemotePlayerProxy>,
    player: Arc<CachedPlayer>,
    listeners: ListenerSet<dyn ConnectionListener>,
    ever_connected: AtomicBool,
    generation: AtomicU64,
    weak_self: Weak<ConnectionSupervisor>,
}

impl ConnectionSupervisor {
    pub fn new(provider_id: impl Into<String>) -> Arc<Self> {
        let proxy = Arc::new(RemotePlayerProxy::new());
        let player = Arc::new(CachedRemotePlayer::new(Arc::clone(&proxy)));
        let provider_id = provider_id.into();
        Arc::new_cyclic(|weak_self| Self {
            provider_id,
            status: AtomicConnectionStatus::new(ConnectionStatus::Disconnected),
            binding: Mutex::new(None),
            proxy,
            player,
            listeners: ListenerSet::new(),
            ever_connected: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            weak_self: weak_self.clone(),
        })
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.load()
    }

    pub fn is_active(&self) -> bool {
        self.player.is_active()
    }

    /// The cached player. Calls made while disconnected are recorded and
    /// replayed by [`CachedRemotePlayer::sync`].
    pub fn player(&self) -> &Arc<CachedPlayer> {
        &self.player
    }

    pub fn proxy(&self) -> &Arc<RemotePlayerProxy> {
        &self.proxy
    }

    pub fn add_listener(&self, listener: Arc<dyn ConnectionListener>) -> bool {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ConnectionListener>) -> bool {
        self.listeners.remove(listener)
    }

    fn set_status(&self, next: ConnectionStatus) {
        let previous = self.status.swap(next);
        self.proxy.set_allow_sending(next.is_connected());
        self.log_transition(previous, next);
    }

    fn transition_if(
        &self,
        allowed: impl Fn(ConnectionStatus) -> bool,
        next: ConnectionStatus,
    ) -> bool {
        match self.status.transition_if(allowed, next) {
            Ok(previous) => {
                self.proxy.set_allow_sending(next.is_connected());
                self.log_transition(previous, next);
                true
            }
            Err(_) => false,
        }
    }

    fn log_transition(&self, previous: ConnectionStatus, next: ConnectionStatus) {
        if previous != next {
            tracing::info!(
                provider_id = %self.provider_id,
                from = %previous,
                to = %next,
                "Connection status changed"
            );
        }
    }

    /// Starts a registration attempt. Only one attempt may be outstanding,
    /// so this fails while connecting or connected.
    pub fn begin_connecting(&self) -> bool {
        self.transition_if(ConnectionStatus::can_register, ConnectionStatus::Connecting)
    }

    /// Binds the service the host handed back and moves to `Connected`.
    ///
    /// A dead service or one whose player cannot be obtained fails the
    /// attempt: the status returns to `Disconnected` and listeners are told.
    pub fn bind(&self, service: Arc<dyn RemoteService>) -> bool {
        if !self.status().is_connecting() {
            tracing::debug!(
                provider_id = %self.provider_id,
                status = %self.status(),
                "Ignoring service handed back outside of a registration attempt"
            );
            return false;
        }

        let player = match service.is_alive().then(|| service.player()) {
            Some(Ok(player)) => player,
            Some(Err(err)) => {
                tracing::warn!(provider_id = %self.provider_id, error = %err, "Failed to obtain remote player");
                return self.fail_attempt();
            }
            None => {
                tracing::warn!(provider_id = %self.provider_id, "Host handed back a dead service");
                return self.fail_attempt();
            }
        };

        // The binding must be in place before the death link: the host can
        // die while linking and the callback looks the binding up.
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let previous = self.binding.lock().replace(Binding {
            service: Arc::clone(&service),
            generation,
        });
        if let Some(previous) = previous {
            previous.service.unlink_to_death();
        }
        self.proxy.bind(player);

        let weak = self.weak_self.clone();
        let linked = service.link_to_death(Box::new(move || {
            if let Some(supervisor) = weak.upgrade() {
                supervisor.on_service_died(generation);
            }
        }));
        if let Err(err) = linked {
            tracing::warn!(provider_id = %self.provider_id, error = %err, "Failed to watch host liveness");
            if self.take_binding(generation).is_some() {
                self.proxy.unbind();
            }
            return self.fail_attempt();
        }

        if !self.transition_if(ConnectionStatus::is_connecting, ConnectionStatus::Connected) {
            // either unregister() won the race or the host already died
            if let Some(binding) = self.take_binding(generation) {
                binding.service.unlink_to_death();
                self.proxy.unbind();
            }
            return false;
        }

        if self.ever_connected.swap(true, Ordering::SeqCst) {
            self.listeners.for_each(|l| l.on_reconnected());
        } else {
            self.listeners.for_each(|l| l.on_connected());
        }
        true
    }

    fn fail_attempt(&self) -> bool {
        if self.transition_if(ConnectionStatus::is_connecting, ConnectionStatus::Disconnected) {
            self.listeners.for_each(|l| l.on_disconnected());
        }
        false
    }

    fn take_binding(&self, generation: u64) -> Option<Binding> {
        let mut binding = self.binding.lock();
        match binding.as_ref() {
            Some(current) if current.generation == generation => binding.take(),
            _ => None,
        }
    }

    /// The registration window elapsed without a callback.
    pub fn connect_timed_out(&self) -> bool {
        if !self.transition_if(ConnectionStatus::is_connecting, ConnectionStatus::Disconnected) {
            return false;
        }
        tracing::warn!(provider_id = %self.provider_id, "Registration timed out");
        self.listeners.for_each(|l| l.on_connect_timeout());
        true
    }

    /// Abandons an in-flight registration on the provider's request.
    pub fn cancel_connecting(&self) -> bool {
        self.transition_if(
            ConnectionStatus::is_connecting,
            ConnectionStatus::DisconnectedByUser,
        )
    }

    /// Drops the bound service. Without a reason the host is assumed to
    /// have initiated it. Returns false if nothing was bound.
    pub fn disconnect(&self, reason: Option<DisconnectReason>) -> bool {
        let reason = reason.unwrap_or(DisconnectReason::Host);
        let Some(binding) = self.binding.lock().take() else {
            return false;
        };

        binding.service.unlink_to_death();
        if reason == DisconnectReason::User {
            if let Err(err) = binding.service.disconnect() {
                tracing::debug!(provider_id = %self.provider_id, error = %err, "Host did not acknowledge disconnect");
            }
        }
        self.proxy.unbind();
        self.set_status(match reason {
            DisconnectReason::User => ConnectionStatus::DisconnectedByUser,
            DisconnectReason::Host => ConnectionStatus::DisconnectedByHost,
        });
        self.listeners.for_each(|l| l.on_disconnected());
        true
    }

    fn on_service_died(&self, generation: u64) {
        let Some(binding) = self.take_binding(generation) else {
            tracing::debug!(provider_id = %self.provider_id, generation, "Ignoring death of a stale service");
            return;
        };
        drop(binding);

        self.proxy.unbind();
        // a user disconnect racing the death stays sticky
        if self.transition_if(
            |status| status.is_connected() || status.is_connecting(),
            ConnectionStatus::DisconnectedByHost,
        ) {
            tracing::warn!(provider_id = %self.provider_id, "Host died");
            self.listeners.for_each(|l| l.on_disconnected());
        }
    }

    /// Tears everything down: disconnects as the user and forgets listeners.
    pub fn shutdown(&self) {
        if !self.disconnect(Some(DisconnectReason::User)) {
            self.cancel_connecting();
        }
        self.listeners.clear();
    }
}

impl std::fmt::Debug for ConnectionSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSupervisor")
            .field("provider_id", &self.provider_id)
            .field("status", &self.status())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
