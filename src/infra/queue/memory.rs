//! In-memory FIFO inference queue.
//!
//! Competing consumers share one instance behind an `Arc`; every popped
//! message is handed to exactly one caller.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::core::{JobQueue, QueueError};

/// In-memory queue for development and testing.
#[derive(Debug)]
pub struct InMemoryJobQueue {
    items: Mutex<VecDeque<String>>,
    notify: Notify,
    available: AtomicBool,
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryJobQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the backend going away (`false`) or coming back.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), QueueError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(QueueError::Unavailable("in-memory queue disabled".into()))
        }
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn push(&self, raw: String) -> Result<(), QueueError> {
        self.ensure_available()?;
        self.items.lock().push_back(raw);
        self.notify.notify_one();
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<String>, QueueError> {
        self.ensure_available()?;
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(raw) = self.items.lock().pop_front() {
                return Ok(Some(raw));
            }
            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Ok(None);
                    }
                }
                None => notified.await,
            }
            self.ensure_available()?;
        }
    }

    async fn len(&self) -> Result<usize, QueueError> {
        self.ensure_available()?;
        Ok(self.items.lock().len())
    }
}
