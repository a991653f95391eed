//! Deduped work queues with fairness guarantees.
//!
//! The channel only signals "there may be work"; the mutex-guarded queue
//! is the source of truth. The invariant maintained by every function:
//! if the queue is non-empty at function exit, the channel holds at
//! least one token. Guards keep a key reserved while a worker holds the
//! item, so the same position can never be worked on twice concurrently.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use async_channel::TrySendError;
use parking_lot::Mutex;

pub(crate) struct WorkItem<K: WorkKey, V> {
    pub(crate) key: K,
    pub(crate) value: V,
    /// Releases the key reservation when dropped.
    #[allow(dead_code)]
    pub(crate) guard: WorkGuard<K, V>,
}

pub(crate) trait WorkKey: Copy + Eq + Hash + Send + 'static {}
impl<T: Copy + Eq + Hash + Send + 'static> WorkKey for T {}

struct Queue<K, V> {
    fifo: VecDeque<(K, V)>,
    /// Everything queued or currently held by a worker.
    reserved: HashSet<K>,
    in_flight: usize,
}

impl<K, V> Default for Queue<K, V> {
    fn default() -> Self {
        Queue {
            fifo: VecDeque::new(),
            reserved: HashSet::new(),
            in_flight: 0,
        }
    }
}

impl<K: WorkKey, V> Queue<K, V> {
    fn push(&mut self, key: K, value: V) -> bool {
        assert_eq!(self.fifo.len() + self.in_flight, self.reserved.len());
        if self.reserved.contains(&key) {
            false
        } else {
            self.fifo.push_back((key, value));
            self.reserved.insert(key);
            true
        }
    }

    fn pop(&mut self) -> Option<(K, V, bool)> {
        assert_eq!(self.fifo.len() + self.in_flight, self.reserved.len());
        let (key, value) = self.fifo.pop_front()?;
        assert!(self.reserved.contains(&key));
        self.in_flight += 1;
        Some((key, value, !self.fifo.is_empty()))
    }
}

/// Sending side, cloned into every producer.
pub(crate) struct Trigger<K: WorkKey, V> {
    queue: Arc<Mutex<Queue<K, V>>>,
    send: async_channel::Sender<()>,
}

impl<K: WorkKey, V> Clone for Trigger<K, V> {
    fn clone(&self) -> Self {
        Trigger {
            queue: self.queue.clone(),
            send: self.send.clone(),
        }
    }
}

impl<K: WorkKey, V> Trigger<K, V> {
    /// Enqueue unless the key is already queued or held by a worker.
    /// Returns whether new work was added.
    pub(crate) fn push(&self, key: K, value: V) -> bool {
        let added = self.queue.lock().push(key, value);
        if added {
            match self.send.try_send(()) {
                Ok(()) => (),
                Err(TrySendError::Closed(())) => {
                    unreachable!("work queue channel closed while trigger still alive")
                }
                Err(TrySendError::Full(())) => {
                    tracing::warn!("Work queue signal channel full; relying on queued token")
                }
            }
        }
        added
    }

    pub(crate) fn queued(&self) -> usize {
        self.queue.lock().fifo.len()
    }
}

/// Releases the key reservation once the worker is done with the item.
pub(crate) struct WorkGuard<K: WorkKey, V> {
    queue: Arc<Mutex<Queue<K, V>>>,
    key: K,
}

impl<K: WorkKey, V> Drop for WorkGuard<K, V> {
    fn drop(&mut self) {
        let mut queue = self.queue.lock();
        let was_present = queue.reserved.remove(&self.key);
        assert!(was_present);
        assert!(queue.in_flight > 0);
        queue.in_flight -= 1;
    }
}

/// Receiving side, cloned into every worker.
pub(crate) struct Receiver<K: WorkKey, V> {
    pub(crate) trigger: Trigger<K, V>,
    recv: async_channel::Receiver<()>,
}

impl<K: WorkKey, V> Clone for Receiver<K, V> {
    fn clone(&self) -> Self {
        Receiver {
            trigger: self.trigger.clone(),
            recv: self.recv.clone(),
        }
    }
}

impl<K: WorkKey, V: Send + 'static> Receiver<K, V> {
    pub(crate) fn new() -> Self {
        let (send, recv) = async_channel::bounded(100);
        Receiver {
            trigger: Trigger {
                queue: Arc::new(Mutex::new(Queue::default())),
                send,
            },
            recv,
        }
    }

    /// Wait up to `timeout` for work. A token may have been consumed by
    /// a sibling worker; the queue is re-checked either way.
    pub(crate) async fn receive_with_timeout(
        &self,
        timeout: Duration,
    ) -> Option<WorkItem<K, V>> {
        let _ = tokio::time::timeout(timeout, self.recv.recv()).await;
        let popped = self.trigger.queue.lock().pop();
        let (key, value, more_work) = popped?;
        if more_work && self.recv.is_empty() {
            match self.trigger.send.try_send(()) {
                Ok(()) => (),
                Err(TrySendError::Closed(())) => {
                    unreachable!("work queue channel closed while receiver alive")
                }
                Err(TrySendError::Full(())) => {
                    tracing::warn!("Work queue signal channel unexpectedly full on resend")
                }
            }
        }
        Some(WorkItem {
            key,
            value,
            guard: WorkGuard {
                queue: self.trigger.queue.clone(),
                key,
            },
        })
    }
}
