use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::thread;
use std::time::Duration;

/// A delayed task running on its own thread.
///
/// The task runs once `delay` elapses unless [`Timeout::cancel`] is called
/// first. Dropping the handle also cancels it.
#[derive(Debug)]
pub struct Timeout {
    cancel: Mutex<Option<Sender<()>>>,
}

impl Timeout {
    pub fn schedule<F>(name: &str, delay: Duration, task: F) -> std::io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (cancel_tx, cancel_rx) = bounded::<()>(1);
        thread::Builder::new()
            .name(format!("lyricon-{name}"))
            .spawn(move || match cancel_rx.recv_timeout(delay) {
                Err(RecvTimeoutError::Timeout) => task(),
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
            })?;
        Ok(Self {
            cancel: Mutex::new(Some(cancel_tx)),
        })
    }

    /// Returns false if the timeout was already cancelled.
    pub fn cancel(&self) -> bool {
        match self.cancel.lock().take() {
            Some(tx) => {
                let _ = tx.try_send(());
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn fires_after_delay() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let _timeout = Timeout::schedule("test", Duration::from_millis(20), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        thread::sleep(Duration::from_millis(200));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancelled_task_never_runs() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let timeout = Timeout::schedule("test", Duration::from_millis(50), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert!(timeout.cancel());
        assert!(!timeout.cancel());
        thread::sleep(Duration::from_millis(150));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
