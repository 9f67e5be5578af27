//! Callback registries for change notifications.
//!
//! A [`CallbackListeners`] holds a set of callbacks invoked with a shared key
//! (for table watchers, the set of changed table names). Registration returns a
//! [`ListenerHandle`]; dropping the handle unregisters the callback.
//!
//! Unregistration is strict: after [`ListenerHandle`] drop returns, the callback
//! is never invoked again, even if a notification pass on another thread is in
//! flight. Dropping a handle from inside its own callback is allowed and does
//! not deadlock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

type Callback<K> = Box<dyn Fn(&K) + Send + Sync + 'static>;

struct ListenerEntry<K> {
    deactivated: AtomicBool,
    callback: Callback<K>,
}

struct Inner<K> {
    listeners: Mutex<Vec<Arc<ListenerEntry<K>>>>,
    /// Held for the full duration of a notification pass.
    pass_lock: Mutex<()>,
    /// Thread currently running a notification pass, if any.
    notifying_on: Mutex<Option<ThreadId>>,
}

/// A set of callbacks notified with a shared key.
pub struct CallbackListeners<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Default for CallbackListeners<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Clone for CallbackListeners<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> CallbackListeners<K> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                listeners: Mutex::new(Vec::new()),
                pass_lock: Mutex::new(()),
                notifying_on: Mutex::new(None),
            }),
        }
    }

    /// Registers a callback. It stays active until the returned handle is dropped.
    #[must_use = "dropping the handle unregisters the callback"]
    pub fn register(&self, callback: impl Fn(&K) + Send + Sync + 'static) -> ListenerHandle<K> {
        let entry = Arc::new(ListenerEntry {
            deactivated: AtomicBool::new(false),
            callback: Box::new(callback),
        });
        self.inner.listeners.lock().push(Arc::clone(&entry));
        ListenerHandle {
            inner: Arc::clone(&self.inner),
            entry,
        }
    }

    /// Invokes every active callback with `key`. Passes from different threads
    /// serialize; each callback's deactivation flag is checked immediately before
    /// the call.
    pub fn notify(&self, key: &K) {
        let snapshot = self.inner.listeners.lock().clone();
        if snapshot.is_empty() {
            return;
        }

        let _pass = self.inner.pass_lock.lock();
        *self.inner.notifying_on.lock() = Some(thread::current().id());
        for entry in &snapshot {
            if !entry.deactivated.load(Ordering::Acquire) {
                (entry.callback)(key);
            }
        }
        *self.inner.notifying_on.lock() = None;
    }

    /// The number of registered callbacks.
    pub fn len(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    /// Whether no callbacks are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Type-erased registration handle returned by the database watch methods.
/// Dropping it unregisters the callback with the same guarantees as
/// [`ListenerHandle`].
#[must_use = "dropping the handle unregisters the callback"]
pub struct WatchHandle {
    _handle: Box<dyn std::any::Any + Send>,
}

impl WatchHandle {
    pub(crate) fn new<K: 'static>(handle: ListenerHandle<K>) -> Self {
        Self {
            _handle: Box::new(handle),
        }
    }
}

/// Keeps a callback registered in a [`CallbackListeners`]; dropping unregisters it.
pub struct ListenerHandle<K> {
    inner: Arc<Inner<K>>,
    entry: Arc<ListenerEntry<K>>,
}

impl<K> Drop for ListenerHandle<K> {
    fn drop(&mut self) {
        self.entry.deactivated.store(true, Ordering::Release);

        // If a pass is running on another thread it may already have passed the
        // flag check for this entry. Wait for that pass to complete so the
        // callback can't run after this drop returns. When the drop happens from
        // inside a callback the pass lock is held by this thread; skipping the
        // wait there is what makes in-callback drops safe.
        let in_own_callback =
            *self.inner.notifying_on.lock() == Some(thread::current().id());
        if !in_own_callback {
            drop(self.inner.pass_lock.lock());
        }

        self.inner
            .listeners
            .lock()
            .retain(|e| !Arc::ptr_eq(e, &self.entry));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn notifies_registered_callbacks() {
        let listeners = CallbackListeners::<u32>::new();
        let count = Arc::new(AtomicUsize::new(0));

        let count2 = Arc::clone(&count);
        let handle = listeners.register(move |key| {
            assert_eq!(*key, 7);
            count2.fetch_add(1, Ordering::SeqCst);
        });

        listeners.notify(&7);
        listeners.notify(&7);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        drop(handle);
    }

    #[test]
    fn dropping_handle_unregisters() {
        let listeners = CallbackListeners::<()>::new();
        let count = Arc::new(AtomicUsize::new(0));

        let count2 = Arc::clone(&count);
        let handle = listeners.register(move |()| {
            count2.fetch_add(1, Ordering::SeqCst);
        });

        listeners.notify(&());
        drop(handle);
        listeners.notify(&());

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(listeners.is_empty());
    }

    #[test]
    fn drop_inside_own_callback_does_not_deadlock() {
        let listeners = CallbackListeners::<()>::new();
        let slot: Arc<Mutex<Option<ListenerHandle<()>>>> = Arc::new(Mutex::new(None));

        let slot2 = Arc::clone(&slot);
        let handle = listeners.register(move |()| {
            // Drops the handle for this very callback.
            slot2.lock().take();
        });
        *slot.lock() = Some(handle);

        listeners.notify(&());
        assert!(listeners.is_empty());
    }

    #[test]
    fn unregister_waits_for_in_flight_pass() {
        let listeners = CallbackListeners::<()>::new();
        let running = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));

        let running2 = Arc::clone(&running);
        let finished2 = Arc::clone(&finished);
        let handle = listeners.register(move |()| {
            running2.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(100));
            finished2.store(true, Ordering::SeqCst);
        });

        let listeners2 = listeners.clone();
        let notifier = thread::spawn(move || listeners2.notify(&()));

        while !running.load(Ordering::SeqCst) {
            thread::yield_now();
        }
        drop(handle);
        // The slow callback must have completed before drop returned.
        assert!(finished.load(Ordering::SeqCst));

        notifier.join().unwrap();
    }

    #[test]
    fn other_listeners_survive_unregister() {
        let listeners = CallbackListeners::<()>::new();
        let count = Arc::new(AtomicUsize::new(0));

        let count2 = Arc::clone(&count);
        let keep = listeners.register(move |()| {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        let gone = listeners.register(|()| {});

        drop(gone);
        listeners.notify(&());

        assert_eq!(count.load(Ordering::SeqCst), 1);
        drop(keep);
    }
}
