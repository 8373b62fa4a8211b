//! Process-local registry of blocked dequeuers
//!
//! Each blocked `dequeue` call registers a capacity-1 wake-up slot; the
//! notification listener broadcasts to every slot whenever the `tasks`
//! channel fires. Sends are non-blocking and coalesce: a slot that is
//! already signaled is skipped, because the signal only means "re-run the
//! claim query".

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

#[derive(Debug, Default)]
pub(crate) struct Dequeuers {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    // FIFO registration order; the DB's SKIP LOCKED does the real
    // serialization between dequeuers.
    slots: Vec<(u64, mpsc::Sender<()>)>,
}

impl Dequeuers {
    /// Register a wake-up slot for one blocked dequeuer. The slot is removed
    /// when the returned handle is dropped.
    pub fn register(self: &Arc<Self>) -> WakeupSlot {
        let (tx, rx) = mpsc::channel(1);
        let id = {
            let mut inner = self.inner.lock().unwrap();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.slots.push((id, tx));
            id
        };

        WakeupSlot {
            registry: Arc::clone(self),
            id,
            rx,
        }
    }

    /// Wake every registered dequeuer without blocking.
    pub fn notify_all(&self) {
        let inner = self.inner.lock().unwrap();
        for (_, tx) in &inner.slots {
            // full slot: the dequeuer is already signaled
            let _ = tx.try_send(());
        }
    }

    fn remove(&self, id: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.slots.retain(|(slot_id, _)| *slot_id != id);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap().slots.len()
    }
}

/// Handle to one registered wake-up slot.
pub(crate) struct WakeupSlot {
    registry: Arc<Dequeuers>,
    id: u64,
    rx: mpsc::Receiver<()>,
}

impl WakeupSlot {
    /// Wait until the slot is signaled.
    pub async fn notified(&mut self) {
        self.rx.recv().await;
    }
}

impl Drop for WakeupSlot {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}
