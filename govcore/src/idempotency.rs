//! Check-and-record deduplication primitive for movement processing.
//!
//! `begin()` is a single atomic check-and-insert under one write lock, so
//! two concurrent callers sharing a key cannot both observe "fresh". The
//! loser of that race waits (bounded) for the winner's outcome on a watch
//! channel; a waiter that registers after completion still sees the
//! terminal value, closing the missed-wakeup window.
//!
//! A record exists iff the operation's side effects were materialized or
//! are in flight. Failed attempts `abandon()` the key so a corrected
//! retry is possible.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use govcore_common::{GovError, MovementRecord};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use tracing::debug;

/// Outcome of `begin()` for a fresh-or-duplicate key.
#[derive(Debug)]
pub enum Begin {
    /// Key is new; the caller owns the operation and must `complete` or
    /// `abandon` it.
    Fresh,
    /// Key was already completed; the stored result is returned without
    /// re-executing any side effect.
    Duplicate(MovementRecord),
}

enum Slot {
    InFlight { done: watch::Sender<bool> },
    Completed {
        record: MovementRecord,
        expires_at: DateTime<Utc>,
    },
}

/// Dedup guard with TTL'd completed records.
pub struct IdempotencyGuard {
    slots: RwLock<HashMap<String, Slot>>,
    ttl: ChronoDuration,
    /// Bound on waiting for another caller's in-flight operation.
    wait_timeout: Duration,
}

impl IdempotencyGuard {
    pub fn new(ttl: Duration, wait_timeout: Duration) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            ttl: ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::days(1)),
            wait_timeout,
        }
    }

    /// Atomically check-and-record the key.
    ///
    /// Returns `Fresh` when this caller owns the operation, `Duplicate`
    /// with the stored result when a prior operation completed, or
    /// `ConcurrencyTimeout` when an in-flight operation holding the key
    /// did not resolve within the bounded wait.
    pub async fn begin(&self, key: &str) -> Result<Begin, GovError> {
        let deadline = tokio::time::Instant::now() + self.wait_timeout;
        loop {
            let mut rx = {
                let mut slots = self.slots.write().await;
                match slots.get(key) {
                    None => {
                        let (done, _) = watch::channel(false);
                        slots.insert(key.to_string(), Slot::InFlight { done });
                        return Ok(Begin::Fresh);
                    }
                    Some(Slot::Completed { record, expires_at }) => {
                        if *expires_at > Utc::now() {
                            debug!("idempotency hit for key '{}'", key);
                            return Ok(Begin::Duplicate(record.clone()));
                        }
                        // Expired: reclaim the key.
                        let (done, _) = watch::channel(false);
                        slots.insert(key.to_string(), Slot::InFlight { done });
                        return Ok(Begin::Fresh);
                    }
                    Some(Slot::InFlight { done }) => done.subscribe(),
                }
            };

            // Another caller owns this key; wait for its outcome.
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(GovError::ConcurrencyTimeout {
                    resource: format!("idempotency:{}", key),
                    waited_ms: self.wait_timeout.as_millis() as u64,
                });
            }
            // changed() errors when the sender side dropped; either way the
            // slot resolved, so loop and re-read it.
            let _ = tokio::time::timeout(remaining, rx.changed()).await;
            if tokio::time::Instant::now() >= deadline
                && matches!(self.slots.read().await.get(key), Some(Slot::InFlight { .. }))
            {
                return Err(GovError::ConcurrencyTimeout {
                    resource: format!("idempotency:{}", key),
                    waited_ms: self.wait_timeout.as_millis() as u64,
                });
            }
        }
    }

    /// Store the final result for a key this caller began.
    pub async fn complete(&self, key: &str, record: MovementRecord) {
        let mut slots = self.slots.write().await;
        let previous = slots.insert(
            key.to_string(),
            Slot::Completed {
                record,
                expires_at: Utc::now() + self.ttl,
            },
        );
        if let Some(Slot::InFlight { done }) = previous {
            let _ = done.send(true);
        }
    }

    /// Free a key whose operation failed, allowing a retry.
    pub async fn abandon(&self, key: &str) {
        let mut slots = self.slots.write().await;
        if let Some(Slot::InFlight { done }) = slots.remove(key) {
            let _ = done.send(true);
        }
    }

    /// Drop completed records past their TTL.
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut slots = self.slots.write().await;
        let before = slots.len();
        slots.retain(|_, slot| match slot {
            Slot::InFlight { .. } => true,
            Slot::Completed { expires_at, .. } => *expires_at > now,
        });
        before - slots.len()
    }
}
