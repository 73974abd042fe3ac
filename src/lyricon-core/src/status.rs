use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Connection state between a provider and the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    /// The host went away (process death or host-side disconnect).
    DisconnectedByHost,
    /// The provider called `unregister()`.
    DisconnectedByUser,
    Connecting,
    Connected,
}

impl ConnectionStatus {
    pub fn is_connected(self) -> bool {
        self == ConnectionStatus::Connected
    }

    pub fn is_connecting(self) -> bool {
        self == ConnectionStatus::Connecting
    }

    /// True for every disconnected flavour.
    pub fn is_disconnected(self) -> bool {
        matches!(
            self,
            ConnectionStatus::Disconnected
                | ConnectionStatus::DisconnectedByHost
                | ConnectionStatus::DisconnectedByUser
        )
    }

    /// Whether a new registration attempt may start from this state.
    pub fn can_register(self) -> bool {
        self.is_disconnected()
    }

    fn to_u8(self) -> u8 {
        match self {
            ConnectionStatus::Disconnected => 0,
            ConnectionStatus::DisconnectedByHost => 1,
            ConnectionStatus::DisconnectedByUser => 2,
            ConnectionStatus::Connecting => 3,
            ConnectionStatus::Connected => 4,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionStatus::DisconnectedByHost,
            2 => ConnectionStatus::DisconnectedByUser,
            3 => ConnectionStatus::Connecting,
            4 => ConnectionStatus::Connected,
            _ => ConnectionStatus::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::DisconnectedByHost => "disconnected (host)",
            ConnectionStatus::DisconnectedByUser => "disconnected (user)",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
        };
        f.write_str(label)
    }
}

/// Lock-free cell holding a [`ConnectionStatus`], readable from any thread.
#[derive(Debug, Default)]
pub struct AtomicConnectionStatus(AtomicU8);

impl AtomicConnectionStatus {
    pub fn new(status: ConnectionStatus) -> Self {
        Self(AtomicU8::new(status.to_u8()))
    }

    pub fn load(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Stores `status` and returns the previous value.
    pub fn swap(&self, status: ConnectionStatus) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.0.swap(status.to_u8(), Ordering::SeqCst))
    }

    /// Moves to `next` only if the current value satisfies `allowed`.
    /// Returns the previous value on success.
    pub fn transition_if(
        &self,
        allowed: impl Fn(ConnectionStatus) -> bool,
        next: ConnectionStatus,
    ) -> Result<ConnectionStatus, ConnectionStatus> {
        let mut current = self.0.load(Ordering::SeqCst);
        loop {
            let status = ConnectionStatus::from_u8(current);
            if !allowed(status) {
                return Err(status);
            }
            match self.0.compare_exchange_weak(
                current,
                next.to_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Ok(status),
                Err(actual) => current = actual,
            }
        }
    }
}
