//! Per-note single-flight locks
//!
//! Relation replacement for a note must never interleave with another run for
//! the same note. Each note id maps to its own async mutex; acquisition is
//! bounded by a timeout and a small number of retries, after which the caller
//! gets a retryable [`IngestError::Transient`]. A note's entry leaves the map
//! when its last holder releases it with nobody waiting.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{IngestError, IngestResult};
use crate::LockConfig;

type LockMap = DashMap<Uuid, Arc<Mutex<()>>>;

/// Held while a note's relation set is being replaced
#[derive(Debug)]
pub struct NoteLockGuard {
    note_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockMap>,
}

impl Drop for NoteLockGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters and holders each keep a clone, so only the map's copy is left when idle
        self.locks
            .remove_if(&self.note_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[derive(Debug)]
pub struct NoteLocks {
    locks: Arc<LockMap>,
    timeout: Duration,
    retries: u32,
    retry_delay: Duration,
}

impl NoteLocks {
    pub fn new(config: &LockConfig) -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
            timeout: Duration::from_millis(config.timeout_ms),
            retries: config.retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }

    pub async fn acquire(&self, note_id: Uuid) -> IngestResult<NoteLockGuard> {
        let lock = self
            .locks
            .entry(note_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();

        for attempt in 0..=self.retries {
            match tokio::time::timeout(self.timeout, lock.clone().lock_owned()).await {
                Ok(guard) => {
                    debug!(note_id = %note_id, attempt, "Note lock acquired");
                    return Ok(NoteLockGuard {
                        note_id,
                        guard: Some(guard),
                        locks: self.locks.clone(),
                    });
                }
                Err(_) => {
                    warn!(note_id = %note_id, attempt, "Note lock busy");
                    if attempt < self.retries {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        drop(lock);
        self.locks
            .remove_if(&note_id, |_, lock| Arc::strong_count(lock) == 1);
        Err(IngestError::Transient(format!(
            "note {} is locked by another run",
            note_id
        )))
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locks(timeout_ms: u64, retries: u32) -> NoteLocks {
        NoteLocks::new(&LockConfig {
            timeout_ms,
            retries,
            retry_delay_ms: 5,
        })
    }

    #[tokio::test]
    async fn test_second_acquire_waits_for_release() {
        let locks = Arc::new(locks(1_000, 0));
        let note = Uuid::new_v4();
        let guard = locks.acquire(note).await.unwrap();

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.acquire(note).await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_contention_times_out_as_transient() {
        let locks = locks(10, 2);
        let note = Uuid::new_v4();
        let _guard = locks.acquire(note).await.unwrap();

        let err = locks.acquire(note).await.unwrap_err();
        assert!(matches!(err, IngestError::Transient(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_distinct_notes_do_not_block() {
        let locks = locks(10, 0);
        let _a = locks.acquire(Uuid::new_v4()).await.unwrap();
        let _b = locks.acquire(Uuid::new_v4()).await.unwrap();
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_released_locks_leave_the_map() {
        let locks = locks(10, 0);
        let held = Uuid::new_v4();
        let guard = locks.acquire(held).await.unwrap();
        drop(locks.acquire(Uuid::new_v4()).await.unwrap());
        assert_eq!(locks.len(), 1);

        // A timed-out waiter does not leave the entry behind either
        assert!(locks.acquire(held).await.is_err());
        assert_eq!(locks.len(), 1);

        drop(guard);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_entry_kept_while_someone_waits() {
        let locks = Arc::new(locks(1_000, 0));
        let note = Uuid::new_v4();
        let guard = locks.acquire(note).await.unwrap();

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let guard = locks.acquire(note).await?;
                tokio::time::sleep(Duration::from_millis(20)).await;
                drop(guard);
                IngestResult::Ok(())
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(guard);
        assert_eq!(locks.len(), 1);

        waiter.await.unwrap().unwrap();
        assert!(locks.is_empty());
    }
}
