//! Block-rate limiting: stop repeated blocked requests from multiplying cost.
//!
//! Counts blocks per (tenant, deployment) in a fixed window that starts with
//! the first block. The limiter never rejects traffic because the counter
//! store is down; it logs and lets the request through.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::core::{CounterStore, DeploymentId, TenantId};

/// Key prefix for block counters.
pub const BLOCK_KEY_PREFIX: &str = "guardrail:blocks";
/// Minimum retry hint advertised when over the limit.
pub const DEFAULT_RETRY_AFTER_SECONDS: u64 = 60;

/// Result of a block-rate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRateStatus {
    /// The tenant may submit another request.
    pub within_limit: bool,
    /// Seconds until the window resets; 0 while within the limit.
    pub retry_after_seconds: u64,
    /// Blocks counted in the current window.
    pub blocks_in_window: u64,
    /// Configured maximum.
    pub max_blocks: u32,
}

impl BlockRateStatus {
    const fn allowed(blocks_in_window: u64, max_blocks: u32) -> Self {
        Self {
            within_limit: true,
            retry_after_seconds: 0,
            blocks_in_window,
            max_blocks,
        }
    }
}

/// Counter key for a tenant and deployment.
#[must_use]
pub fn block_key(tenant: TenantId, deployment: DeploymentId) -> String {
    format!("{BLOCK_KEY_PREFIX}:{tenant}:{deployment}")
}

/// Per-(tenant, deployment) block counter.
#[derive(Clone)]
pub struct BlockRateLimiter {
    store: Arc<dyn CounterStore>,
}

impl std::fmt::Debug for BlockRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockRateLimiter").finish_non_exhaustive()
    }
}

impl BlockRateLimiter {
    /// Create a limiter over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    /// Check whether the tenant is still within `max_blocks` for the window.
    ///
    /// When the store reports no remaining lifetime for an exhausted counter,
    /// the full `window` is advertised instead.
    pub async fn check(
        &self,
        tenant: TenantId,
        deployment: DeploymentId,
        max_blocks: u32,
        window: Duration,
    ) -> BlockRateStatus {
        let key = block_key(tenant, deployment);
        let (count, ttl) = match self.store.get_with_ttl(&key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return BlockRateStatus::allowed(0, max_blocks),
            Err(e) => {
                warn!(%tenant, %deployment, error = %e, "block rate check failed, allowing");
                return BlockRateStatus::allowed(0, max_blocks);
            }
        };

        if count < u64::from(max_blocks) {
            return BlockRateStatus::allowed(count, max_blocks);
        }

        let remaining = ttl.unwrap_or(window).as_secs();
        let retry_after_seconds = remaining.max(DEFAULT_RETRY_AFTER_SECONDS);
        debug!(%tenant, %deployment, count, retry_after_seconds, "block rate limit exceeded");
        BlockRateStatus {
            within_limit: false,
            retry_after_seconds,
            blocks_in_window: count,
            max_blocks,
        }
    }

    /// Record one block and return the new count, or 0 when the store is down.
    pub async fn increment(&self, tenant: TenantId, deployment: DeploymentId, window: Duration) -> u64 {
        let key = block_key(tenant, deployment);
        match self.store.increment_with_expiry(&key, window).await {
            Ok(count) => {
                debug!(%tenant, %deployment, count, "block count incremented");
                count
            }
            Err(e) => {
                warn!(%tenant, %deployment, error = %e, "block count increment failed");
                0
            }
        }
    }
}
