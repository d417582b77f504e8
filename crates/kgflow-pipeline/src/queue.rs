//! Bounded stage queues
//!
//! Every queue carries typed items followed by exactly one sentinel meaning
//! "no more items will ever be produced". Senders block when the queue is at
//! its maximum depth and receivers block while it is empty.
//!
//! A stage run by several workers shares one [`LiveWorkers`] counter; only
//! the worker that brings the counter to zero forwards the sentinel.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use kgflow_core::{KgError, Result};

enum Message<T> {
    Item(T),
    Done,
}

/// Create a queue holding at most `depth` messages
pub fn bounded<T>(depth: usize) -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = mpsc::channel(depth.max(1));
    let sender = QueueSender {
        tx,
        closed: Arc::new(AtomicBool::new(false)),
    };
    let receiver = QueueReceiver {
        rx: Arc::new(Mutex::new(rx)),
        finished: Arc::new(AtomicBool::new(false)),
        sentinels: Arc::new(AtomicUsize::new(0)),
    };
    (sender, receiver)
}

// ============================================================================
// Sender
// ============================================================================

/// Producer side of a stage queue. Clones share the sentinel state.
pub struct QueueSender<T> {
    tx: mpsc::Sender<Message<T>>,
    closed: Arc<AtomicBool>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            closed: Arc::clone(&self.closed),
        }
    }
}

impl<T> QueueSender<T> {
    /// Send an item, waiting while the queue is full
    pub async fn send(&self, item: T) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(KgError::Protocol("item sent after sentinel".to_string()));
        }
        self.tx
            .send(Message::Item(item))
            .await
            .map_err(|_| KgError::Cancelled)
    }

    /// Forward the sentinel. A second call is a protocol violation.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(KgError::Protocol("sentinel forwarded twice".to_string()));
        }
        self.tx
            .send(Message::Done)
            .await
            .map_err(|_| KgError::Cancelled)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Messages currently buffered
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_depth(&self) -> usize {
        self.tx.max_capacity()
    }
}

// ============================================================================
// Receiver
// ============================================================================

/// Consumer side of a stage queue, shared by all workers of a stage.
///
/// Once one worker observes the sentinel every clone reports completion.
pub struct QueueReceiver<T> {
    rx: Arc<Mutex<mpsc::Receiver<Message<T>>>>,
    finished: Arc<AtomicBool>,
    sentinels: Arc<AtomicUsize>,
}

impl<T> Clone for QueueReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            rx: Arc::clone(&self.rx),
            finished: Arc::clone(&self.finished),
            sentinels: Arc::clone(&self.sentinels),
        }
    }
}

impl<T> QueueReceiver<T> {
    /// Next item, or `None` once the sentinel has been observed
    pub async fn recv(&self) -> Option<T> {
        if self.is_finished() {
            return None;
        }

        let mut rx = self.rx.lock().await;
        if self.is_finished() {
            return None;
        }

        match rx.recv().await {
            Some(Message::Item(item)) => Some(item),
            Some(Message::Done) => {
                self.sentinels.fetch_add(1, Ordering::AcqRel);
                self.finished.store(true, Ordering::Release);
                None
            }
            // every sender dropped without a sentinel; only happens on teardown
            None => {
                self.finished.store(true, Ordering::Release);
                None
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Sentinels observed on this queue, including any found while draining
    pub fn sentinels_seen(&self) -> usize {
        self.sentinels.load(Ordering::Acquire)
    }

    /// Close the queue and discard everything buffered, releasing blocked
    /// producers. Returns the number of items dropped.
    pub async fn drain(&self) -> usize {
        let mut rx = self.rx.lock().await;
        rx.close();
        self.finished.store(true, Ordering::Release);

        let mut dropped = 0;
        while let Ok(message) = rx.try_recv() {
            match message {
                Message::Item(_) => dropped += 1,
                Message::Done => {
                    self.sentinels.fetch_add(1, Ordering::AcqRel);
                }
            }
        }
        dropped
    }
}

// ============================================================================
// Live-worker counter
// ============================================================================

/// Count of workers still running in a stage
#[derive(Debug)]
pub struct LiveWorkers {
    live: AtomicUsize,
}

impl LiveWorkers {
    pub fn new(count: usize) -> Self {
        Self {
            live: AtomicUsize::new(count),
        }
    }

    /// Mark one worker finished. Returns `true` for the last one.
    pub fn finish(&self) -> Result<bool> {
        match self
            .live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(previous) => Ok(previous == 1),
            Err(_) => Err(KgError::Protocol(
                "more workers finished than were started".to_string(),
            )),
        }
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }
}

/// Finish a worker and forward the sentinel downstream if it was the last
pub async fn finish_worker<T>(live: &LiveWorkers, downstream: &QueueSender<T>) -> Result<()> {
    if live.finish()? {
        downstream.close().await?;
    }
    Ok(())
}
