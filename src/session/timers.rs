//! Cancellable one-shot timers that post a message when they fire.
//!
//! Each key holds at most one pending timer: scheduling again aborts the
//! previous task.  Aborting is only housekeeping; correctness comes from the
//! generation carried inside the message, which the receiver checks.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub struct TimerSet<K, M> {
    tx: mpsc::UnboundedSender<M>,
    pending: HashMap<K, JoinHandle<()>>,
}

impl<K, M> TimerSet<K, M>
where
    K: Eq + Hash,
    M: Send + 'static,
{
    pub fn new(tx: mpsc::UnboundedSender<M>) -> Self {
        Self {
            tx,
            pending: HashMap::new(),
        }
    }

    pub fn schedule(&mut self, key: K, delay: Duration, message: M) {
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(message);
        });
        if let Some(previous) = self.pending.insert(key, handle) {
            previous.abort();
        }
    }

    pub fn cancel(&mut self, key: &K) {
        if let Some(handle) = self.pending.remove(key) {
            handle.abort();
        }
    }

    pub fn cancel_where(&mut self, mut predicate: impl FnMut(&K) -> bool) {
        self.pending.retain(|key, handle| {
            if predicate(key) {
                handle.abort();
                false
            } else {
                true
            }
        });
    }

    pub fn cancel_all(&mut self) {
        for (_, handle) in self.pending.drain() {
            handle.abort();
        }
    }
}

impl<K, M> Drop for TimerSet<K, M> {
    fn drop(&mut self) {
        for handle in self.pending.values() {
            handle.abort();
        }
    }
}
