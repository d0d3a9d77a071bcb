//! Watcher registry: tracks which keys have registered callbacks, and what
//! content those callbacks last saw, so the poller shards (see
//! [`poller`]) know what to long-poll for and when a callback is owed a
//! fresh notification.
//!
//! Grounded on the `HashMap<Uuid, JoinHandle<()>>` scheduler-state pattern
//! used for the probe scheduler elsewhere in this codebase, adapted from
//! one handle-per-task to one subscription-record-per-key with an arbitrary
//! number of callbacks attached.

pub mod dispatcher;
pub mod poller;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::types::{CallbackHandle, Content, Key};

pub use dispatcher::{CallbackDispatcher, ListenerCallback};
pub use poller::{ConfigFetcher, PollerContext, PollerShard};

/// One key's worth of watcher state: the content hash it was last known to
/// have (driving change detection), the callbacks registered against it,
/// and the shard it was assigned to at creation time.
struct Subscription {
    content_md5: String,
    callbacks: Vec<(CallbackHandle, ListenerCallback)>,
    /// Monotonic creation order, used only to keep a shard's key order
    /// stable; independent of how many subscriptions are currently live.
    position: u64,
    assigned_shard: usize,
}

/// Registry of active watches, shared between the poller shards and the
/// public `add_watcher`/`remove_watcher` API.
///
/// Shard assignment is intentionally non-rebalancing: `assigned_shard` is
/// computed once from a monotonically increasing creation counter and
/// `pulling_config_size`, and never recomputed as other subscriptions come
/// and go — recomputing from the current live count would let removals
/// shift a long-lived subscription into a different shard mid-session,
/// which would spuriously look like a brand-new (zero-md5) subscription to
/// a poller that had never seen it change shards.
#[derive(Clone)]
pub struct WatcherRegistry {
    inner: Arc<Mutex<Inner>>,
    pulling_config_size: usize,
}

struct Inner {
    subscriptions: HashMap<Key, Subscription>,
    handle_index: HashMap<CallbackHandle, Key>,
    next_position: u64,
}

impl WatcherRegistry {
    pub fn new(pulling_config_size: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                subscriptions: HashMap::new(),
                handle_index: HashMap::new(),
                next_position: 0,
            })),
            pulling_config_size: pulling_config_size.max(1),
        }
    }

    /// Register a callback against `key`, creating the subscription record
    /// (and assigning its shard) if this is the first watcher for it.
    /// `initial_md5` is the content hash of whatever's already cached for
    /// this key (empty string if nothing is cached yet), so the first
    /// long-poll cycle only fires the callback if the server actually
    /// reports a change.
    pub fn add(&self, key: Key, initial_md5: String, callback: ListenerCallback) -> CallbackHandle {
        let handle = CallbackHandle::next();
        let mut inner = self.inner.lock();

        if !inner.subscriptions.contains_key(&key) {
            let position = inner.next_position;
            inner.next_position += 1;
            inner.subscriptions.insert(
                key.clone(),
                Subscription {
                    content_md5: initial_md5,
                    callbacks: Vec::new(),
                    position,
                    assigned_shard: (position as usize) / self.pulling_config_size,
                },
            );
        }

        let sub = inner
            .subscriptions
            .get_mut(&key)
            .expect("just inserted or already present above");
        sub.callbacks.push((handle, callback));
        inner.handle_index.insert(handle, key);

        handle
    }

    /// Unregister a single callback by handle. Drops the subscription
    /// record entirely once its last callback is removed.
    pub fn remove(&self, handle: CallbackHandle) {
        let mut inner = self.inner.lock();
        let Some(key) = inner.handle_index.remove(&handle) else {
            return;
        };
        if let Some(sub) = inner.subscriptions.get_mut(&key) {
            sub.callbacks.retain(|(h, _)| *h != handle);
            if sub.callbacks.is_empty() {
                inner.subscriptions.remove(&key);
            }
        }
    }

    /// Unregister every callback watching `key`.
    pub fn remove_all_for_key(&self, key: &Key) {
        let mut inner = self.inner.lock();
        if let Some(sub) = inner.subscriptions.remove(key) {
            for (handle, _) in &sub.callbacks {
                inner.handle_index.remove(handle);
            }
        }
    }

    /// Number of distinct keys under watch.
    pub fn len(&self) -> usize {
        self.inner.lock().subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of shards with at least one live subscription.
    pub fn shard_count(&self) -> usize {
        let inner = self.inner.lock();
        inner
            .subscriptions
            .values()
            .map(|s| s.assigned_shard)
            .max()
            .map(|m| m + 1)
            .unwrap_or(0)
    }

    /// The `(key, content_md5)` pairs currently assigned to `shard_index`,
    /// in the order their subscriptions were first created.
    pub fn shard_keys(&self, shard_index: usize) -> Vec<(Key, String)> {
        let inner = self.inner.lock();
        let mut entries: Vec<(&Key, &Subscription)> = inner
            .subscriptions
            .iter()
            .filter(|(_, sub)| sub.assigned_shard == shard_index)
            .collect();
        entries.sort_by_key(|(_, sub)| sub.position);
        entries
            .into_iter()
            .map(|(key, sub)| (key.clone(), sub.content_md5.clone()))
            .collect()
    }

    /// Record a newly observed content hash for `key` and return the
    /// callbacks to notify, if the hash actually changed.
    pub fn record_change(&self, key: &Key, new_md5: String) -> Vec<ListenerCallback> {
        let mut inner = self.inner.lock();
        let Some(sub) = inner.subscriptions.get_mut(key) else {
            return Vec::new();
        };
        if sub.content_md5 == new_md5 {
            return Vec::new();
        }
        sub.content_md5 = new_md5;
        sub.callbacks.iter().map(|(_, cb)| cb.clone()).collect()
    }

    /// Unconditionally reset `key`'s content hash and return every
    /// registered callback, regardless of whether the hash actually moved.
    /// Used for the deletion sentinel: the server reporting a key as
    /// changed-and-now-gone is itself the notification, even if `last_md5`
    /// was already empty.
    pub fn force_reset(&self, key: &Key, new_md5: String) -> Vec<ListenerCallback> {
        let mut inner = self.inner.lock();
        let Some(sub) = inner.subscriptions.get_mut(key) else {
            return Vec::new();
        };
        sub.content_md5 = new_md5;
        sub.callbacks.iter().map(|(_, cb)| cb.clone()).collect()
    }
}

/// MD5 hash of config content, in the lowercase hex form the control plane
/// uses to detect change without shipping the full body.
pub fn content_md5(content: &Content) -> String {
    use md5::{Digest, Md5};
    let digest = Md5::digest(content.as_bytes());
    format!("{digest:x}")
}
