//! Fixed-size callback-dispatch worker pool.
//!
//! One logical worker per `callback_thread_num` config value, each with its
//! own unbounded channel. A key is always routed to the same worker (via a
//! hash of its components), so notifications for one key are delivered in
//! order even though different keys run concurrently across workers. Each
//! callback invocation is wrapped in `catch_unwind` so one panicking
//! callback can't take down a worker and silently starve every other key
//! hashed to it — the same call-isolation concern the mock HTTP client's
//! call recording exists to test for elsewhere in this codebase, applied
//! here to consumer-supplied closures instead of network calls.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::types::{Content, Key};

/// A user-supplied watcher callback: invoked with the key that changed and
/// its newly observed content.
pub type ListenerCallback = Arc<dyn Fn(&Key, &Content) + Send + Sync>;

struct Job {
    key: Key,
    content: Content,
    callback: ListenerCallback,
}

/// Dispatches change notifications to registered callbacks across a fixed
/// pool of worker tasks.
///
/// Dropping the dispatcher drops every worker's sender half; each worker's
/// channel then closes and the worker task exits on its own, so there's no
/// separate shutdown handshake to manage.
#[derive(Clone)]
pub struct CallbackDispatcher {
    senders: Arc<Vec<mpsc::UnboundedSender<Job>>>,
}

impl CallbackDispatcher {
    /// Spawn `worker_count` dispatch workers. `worker_count` is clamped to
    /// at least 1 — a pool of zero workers would silently drop every
    /// notification.
    pub fn new(worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let mut senders = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
            tokio::spawn(async move {
                while let Some(job) = rx.recv().await {
                    let key = job.key.clone();
                    let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
                        (job.callback)(&job.key, &job.content)
                    }));
                    if let Err(panic) = result {
                        let msg = panic
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| panic.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "non-string panic payload".to_string());
                        tracing::error!(worker_id, data_id = %key.data_id, panic = %msg, "watcher callback panicked");
                    }
                }
                tracing::debug!(worker_id, "callback dispatch worker stopped");
            });
            senders.push(tx);
        }

        Self {
            senders: Arc::new(senders),
        }
    }

    /// Route `callback` for `key`/`content` to the worker its key hashes to.
    /// Fire-and-forget: if that worker has already shut down (dispatcher
    /// dropped concurrently), the notification is silently lost.
    pub fn dispatch(&self, key: Key, content: Content, callback: ListenerCallback) {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let worker = (hasher.finish() as usize) % self.senders.len();

        let _ = self.senders[worker].send(Job { key, content, callback });
    }

    pub fn worker_count(&self) -> usize {
        self.senders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn dispatch_invokes_callback_with_key_and_content() {
        let dispatcher = CallbackDispatcher::new(4);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let callback: ListenerCallback = Arc::new(move |key: &Key, content: &Content| {
            let _ = tx.send((key.data_id.clone(), content.clone()));
        });

        dispatcher.dispatch(Key::simple("a", "G"), "new content".to_string(), callback);

        let (data_id, content) = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(data_id, "a");
        assert_eq!(content, "new content");
    }

    #[tokio::test]
    async fn same_key_always_routes_to_same_worker() {
        let dispatcher = CallbackDispatcher::new(8);
        let mut hasher = DefaultHasher::new();
        Key::simple("stable", "G").hash(&mut hasher);
        let expected_worker = (hasher.finish() as usize) % dispatcher.worker_count();

        for _ in 0..5 {
            let mut hasher = DefaultHasher::new();
            Key::simple("stable", "G").hash(&mut hasher);
            let worker = (hasher.finish() as usize) % dispatcher.worker_count();
            assert_eq!(worker, expected_worker);
        }
    }

    #[tokio::test]
    async fn panicking_callback_does_not_stop_the_worker() {
        let dispatcher = CallbackDispatcher::new(1);
        let panicking: ListenerCallback = Arc::new(|_key, _content| {
            panic!("boom");
        });
        dispatcher.dispatch(Key::simple("a", "G"), "x".to_string(), panicking);

        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        let counting: ListenerCallback = Arc::new(move |_key, _content| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });
        dispatcher.dispatch(Key::simple("b", "G"), "y".to_string(), counting);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn worker_count_is_clamped_to_at_least_one() {
        let dispatcher = CallbackDispatcher::new(0);
        assert_eq!(dispatcher.worker_count(), 1);
    }
}
