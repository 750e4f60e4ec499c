//! In-memory replay protection.
//!
//! A [`ReplayGuard`] remembers every `(payer, resource, nonce)` triple that
//! passed verification, together with the payload's expiry. Entries stay
//! until that expiry has passed; after that the payload is rejected as
//! expired anyway, so forgetting the nonce is safe.
//!
//! The guard is process-local. Two verifier instances behind a load balancer
//! do not see each other's nonces.

use alloy_primitives::{Address, B256};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::timestamp::{Clock, UnixTimestamp};

/// Identity of a consumed payment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReplayKey {
    /// Who paid.
    pub payer: Address,
    /// What was paid for.
    pub resource: String,
    /// The payer's nonce.
    pub nonce: B256,
}

/// The triple was already consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Nonce already used")]
pub struct NonceReplayed;

/// Shortest sweep interval; smaller values, including zero, are raised to it.
pub const MIN_EVICTION_INTERVAL: Duration = Duration::from_secs(1);

/// Settings for periodic eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReplayGuardConfig {
    /// Seconds between eviction sweeps.
    pub eviction_interval_secs: u64,
}

impl Default for ReplayGuardConfig {
    fn default() -> Self {
        Self {
            eviction_interval_secs: 60,
        }
    }
}

impl ReplayGuardConfig {
    /// Sweep interval as a [`Duration`], never below [`MIN_EVICTION_INTERVAL`].
    #[must_use]
    pub const fn eviction_interval(&self) -> Duration {
        if self.eviction_interval_secs == 0 {
            MIN_EVICTION_INTERVAL
        } else {
            Duration::from_secs(self.eviction_interval_secs)
        }
    }
}

/// Shared set of consumed payment nonces.
///
/// `check_and_insert` is atomic per key: of any number of concurrent calls
/// with the same triple, exactly one succeeds.
#[derive(Debug, Default)]
pub struct ReplayGuard {
    seen: DashMap<ReplayKey, UnixTimestamp>,
}

impl ReplayGuard {
    /// Creates an empty guard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `key` as consumed until `expires_at`.
    ///
    /// # Errors
    ///
    /// Returns [`NonceReplayed`] if the key is already present.
    pub fn check_and_insert(
        &self,
        key: ReplayKey,
        expires_at: UnixTimestamp,
    ) -> Result<(), NonceReplayed> {
        match self.seen.entry(key) {
            Entry::Occupied(_) => Err(NonceReplayed),
            Entry::Vacant(slot) => {
                slot.insert(expires_at);
                Ok(())
            }
        }
    }

    /// Whether `key` has been consumed and not yet evicted.
    #[must_use]
    pub fn contains(&self, key: &ReplayKey) -> bool {
        self.seen.contains_key(key)
    }

    /// Drops every entry whose expiry is strictly before `now`.
    ///
    /// Returns the number of entries removed.
    pub fn evict_expired(&self, now: UnixTimestamp) -> usize {
        let mut removed = 0usize;
        self.seen.retain(|_, expires_at| {
            let keep = *expires_at >= now;
            removed += usize::from(!keep);
            keep
        });
        #[cfg(feature = "telemetry")]
        if removed > 0 {
            tracing::debug!(removed, remaining = self.seen.len(), "evicted expired nonces");
        }
        removed
    }

    /// Number of remembered entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether the guard is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Runs [`evict_expired`](Self::evict_expired) every `interval` until
    /// `cancel` fires. An `interval` below [`MIN_EVICTION_INTERVAL`] is
    /// raised to it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_eviction(
        self: &Arc<Self>,
        interval: Duration,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let guard = Arc::clone(self);
        let interval = interval.max(MIN_EVICTION_INTERVAL);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        guard.evict_expired(clock.now());
                    }
                }
            }
            #[cfg(feature = "telemetry")]
            tracing::debug!("replay eviction stopped");
        })
    }
}
