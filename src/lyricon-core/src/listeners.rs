//! Copy-on-write listener collection.
//!
//! Mutations replace the backing vector; readers take a cheap snapshot and
//! iterate it without holding any lock, so a listener may add or remove
//! listeners (including itself) while being notified.

use parking_lot::RwLock;
use std::sync::Arc;

pub struct ListenerSet<T: ?Sized> {
    inner: RwLock<Arc<Vec<Arc<T>>>>,
}

impl<T: ?Sized> ListenerSet<T> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Adds `listener` unless the same instance is already present.
    pub fn add(&self, listener: Arc<T>) -> bool {
        let mut guard = self.inner.write();
        if guard.iter().any(|existing| same(existing, &listener)) {
            return false;
        }
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(listener);
        *guard = Arc::new(next);
        true
    }

    /// Removes `listener` by identity.
    pub fn remove(&self, listener: &Arc<T>) -> bool {
        let mut guard = self.inner.write();
        if !guard.iter().any(|existing| same(existing, listener)) {
            return false;
        }
        let next: Vec<Arc<T>> = guard
            .iter()
            .filter(|existing| !same(existing, listener))
            .cloned()
            .collect();
        *guard = Arc::new(next);
        true
    }

    pub fn clear(&self) {
        *self.inner.write() = Arc::new(Vec::new());
    }

    pub fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        Arc::clone(&self.inner.read())
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Calls `f` for each listener in a snapshot taken before the first call.
    pub fn for_each(&self, mut f: impl FnMut(&T)) {
        for listener in self.snapshot().iter() {
            f(listener);
        }
    }
}

impl<T: ?Sized> Default for ListenerSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> std::fmt::Debug for ListenerSet<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSet")
            .field("len", &self.len())
            .finish()
    }
}

// Compares data pointers only; vtable pointers of the same object may differ
// between codegen units.
fn same<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}
