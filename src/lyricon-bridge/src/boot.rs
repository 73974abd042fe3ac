//! Host restart signal.
//!
//! When a host starts it broadcasts a "ready" notice to every provider
//! process. Providers whose last connection was dropped by the host use it
//! to register again. The signal is process-wide: [`HostRestartSignal::global`]
//! is what production code uses, while tests build private instances.

use lyricon_core::ListenerSet;
use parking_lot::Mutex;
use std::io;
use std::sync::{Arc, OnceLock};

pub trait HostReadyListener: Send + Sync {
    fn on_host_ready(&self, host_id: &str);
}

/// Whatever receives the broadcast for this process. Stopped when the
/// signal is torn down.
pub trait BootSource: Send + Sync {
    fn stop(&self);
}

#[derive(Default)]
pub struct HostRestartSignal {
    listeners: ListenerSet<dyn HostReadyListener>,
    source: Mutex<Option<Box<dyn BootSource>>>,
}

static GLOBAL: OnceLock<Arc<HostRestartSignal>> = OnceLock::new();

impl HostRestartSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide instance.
    pub fn global() -> Arc<HostRestartSignal> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(HostRestartSignal::new())))
    }

    pub fn add_listener(&self, listener: Arc<dyn HostReadyListener>) -> bool {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, listener: &Arc<dyn HostReadyListener>) -> bool {
        self.listeners.remove(listener)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn notify_host_ready(&self, host_id: &str) {
        tracing::info!(host_id, listeners = self.listeners.len(), "Host ready");
        self.listeners.for_each(|listener| listener.on_host_ready(host_id));
    }

    /// Starts the broadcast receiver the first time it's called. Later calls
    /// are no-ops and return `Ok(false)`; a failed start can be retried.
    pub fn start_once<F>(&self, start: F) -> io::Result<bool>
    where
        F: FnOnce() -> io::Result<Box<dyn BootSource>>,
    {
        let mut source = self.source.lock();
        if source.is_some() {
            return Ok(false);
        }
        *source = Some(start()?);
        Ok(true)
    }

    pub fn is_started(&self) -> bool {
        self.source.lock().is_some()
    }

    pub fn stop(&self) {
        let source = self.source.lock().take();
        if let Some(source) = source {
            source.stop();
        }
    }
}

impl std::fmt::Debug for HostRestartSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostRestartSignal")
            .field("listeners", &self.listeners.len())
            .field("started", &self.is_started())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Seen(Mutex<Vec<String>>);

    impl HostReadyListener for Seen {
        fn on_host_ready(&self, host_id: &str) {
            self.0.lock().push(host_id.to_string());
        }
    }

    struct CountingSource(Arc<AtomicUsize>);

    impl BootSource for CountingSource {
        fn stop(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn broadcast_reaches_current_listeners_only() {
        let signal = HostRestartSignal::new();
        let seen = Arc::new(Seen::default());
        let listener: Arc<dyn HostReadyListener> = seen.clone();
        signal.add_listener(listener.clone());
        signal.notify_host_ready("a");
        signal.remove_listener(&listener);
        signal.notify_host_ready("b");
        assert_eq!(*seen.0.lock(), vec!["a".to_string()]);
    }

    #[test]
    fn source_starts_once() {
        let signal = HostRestartSignal::new();
        let stops = Arc::new(AtomicUsize::new(0));
        let stops_for_source = stops.clone();
        assert!(signal
            .start_once(|| Ok(Box::new(CountingSource(stops_for_source))))
            .unwrap());
        assert!(!signal
            .start_once(|| panic!("second start must not run"))
            .unwrap());
        signal.stop();
        signal.stop();
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_start_can_be_retried() {
        let signal = HostRestartSignal::new();
        assert!(signal
            .start_once(|| Err(io::Error::other("busy")))
            .is_err());
        assert!(!signal.is_started());
        let stops = Arc::new(AtomicUsize::new(0));
        assert!(signal
            .start_once(|| Ok(Box::new(CountingSource(stops))))
            .unwrap());
    }

    #[test]
    fn global_is_shared() {
        assert!(Arc::ptr_eq(
            &HostRestartSignal::global(),
            &HostRestartSignal::global()
        ));
    }
}
