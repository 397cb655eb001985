// crates/server-jobs/src/delivery.rs
//! Hands worker results back to waiting requests.
//!
//! Workers never touch a request directly. Each deferred request gets a
//! [`CompletionSlot`]; the worker pushes its outcome into one shared queue,
//! and a single consumer task drains the queue and completes the waiting
//! requests in arrival order.

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

const DRAIN_BATCH: usize = 32;

struct Completion<T> {
    reply: oneshot::Sender<T>,
    outcome: T,
}

/// Producer side of the completion queue. Cheap to clone.
pub struct CompletionQueue<T> {
    tx: mpsc::UnboundedSender<Completion<T>>,
}

impl<T> Clone for CompletionQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Send + 'static> CompletionQueue<T> {
    /// Create the queue and spawn its consumer on the current runtime. The
    /// consumer exits once every producer handle has been dropped.
    pub fn start() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(drain(rx));
        Self { tx }
    }

    /// Register a deferred response. The receiver resolves once the slot is
    /// delivered and the consumer has processed it.
    pub fn defer(&self) -> (CompletionSlot<T>, oneshot::Receiver<T>) {
        let (reply, rx) = oneshot::channel();
        let slot = CompletionSlot {
            reply,
            queue: self.tx.clone(),
        };
        (slot, rx)
    }
}

/// A worker's one-shot right to complete a deferred response.
pub struct CompletionSlot<T> {
    reply: oneshot::Sender<T>,
    queue: mpsc::UnboundedSender<Completion<T>>,
}

impl<T> CompletionSlot<T> {
    pub fn deliver(self, outcome: T) {
        let completion = Completion {
            reply: self.reply,
            outcome,
        };
        if self.queue.send(completion).is_err() {
            debug!("completion queue closed, dropping result");
        }
    }
}

async fn drain<T>(mut rx: mpsc::UnboundedReceiver<Completion<T>>) {
    let mut batch = Vec::with_capacity(DRAIN_BATCH);
    while rx.recv_many(&mut batch, DRAIN_BATCH).await > 0 {
        for completion in batch.drain(..) {
            if completion.reply.send(completion.outcome).is_err() {
                debug!("deferred request went away before completion");
            }
        }
    }
    debug!("completion queue drained and closed");
}
