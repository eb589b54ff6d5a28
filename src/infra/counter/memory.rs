//! In-memory expiring counters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::core::{CounterError, CounterStore};

/// Fixed-window counters: the expiry is set when a counter is created and
/// never extended by later increments.
#[derive(Debug)]
pub struct InMemoryCounterStore {
    counters: Mutex<HashMap<String, (u64, Instant)>>,
    available: AtomicBool,
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCounterStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the backend going away (`false`) or coming back.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), CounterError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CounterError::Unavailable("in-memory counter store disabled".into()))
        }
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn get_with_ttl(&self, key: &str) -> Result<Option<(u64, Option<Duration>)>, CounterError> {
        self.ensure_available()?;
        let now = Instant::now();
        let mut counters = self.counters.lock();
        match counters.get(key) {
            Some(&(count, expires_at)) if expires_at > now => Ok(Some((count, Some(expires_at - now)))),
            Some(_) => {
                counters.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn increment_with_expiry(&self, key: &str, window: Duration) -> Result<u64, CounterError> {
        self.ensure_available()?;
        let now = Instant::now();
        let expires_at = now
            .checked_add(window)
            .ok_or(CounterError::WindowOutOfRange(window))?;
        let mut counters = self.counters.lock();
        let entry = counters.entry(key.to_string()).or_insert((0, expires_at));
        if entry.1 <= now {
            *entry = (0, expires_at);
        }
        entry.0 += 1;
        Ok(entry.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn window_starts_at_first_increment() {
        let store = InMemoryCounterStore::new();
        let window = Duration::from_secs(300);
        assert_eq!(store.increment_with_expiry("k", window).await.unwrap(), 1);
        tokio::time::advance(Duration::from_secs(100)).await;
        assert_eq!(store.increment_with_expiry("k", window).await.unwrap(), 2);

        let (count, ttl) = store.get_with_ttl("k").await.unwrap().unwrap();
        assert_eq!(count, 2);
        assert_eq!(ttl, Some(Duration::from_secs(200)));

        tokio::time::advance(Duration::from_secs(200)).await;
        assert!(store.get_with_ttl("k").await.unwrap().is_none());
        assert_eq!(store.increment_with_expiry("k", window).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unrepresentable_window_is_an_error() {
        let store = InMemoryCounterStore::new();
        assert!(matches!(
            store.increment_with_expiry("k", Duration::MAX).await,
            Err(CounterError::WindowOutOfRange(w)) if w == Duration::MAX
        ));
        assert!(store.get_with_ttl("k").await.unwrap().is_none());
        assert_eq!(store.increment_with_expiry("k", Duration::from_secs(1)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unavailable_store_errors() {
        let store = InMemoryCounterStore::new();
        store.set_available(false);
        assert!(store.get_with_ttl("k").await.is_err());
        assert!(store.increment_with_expiry("k", Duration::from_secs(1)).await.is_err());
    }
}
