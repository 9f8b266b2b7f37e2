//! Quota admission
//!
//! One decision per batch, taken before any payload is fingerprinted or
//! stored. Usage is charged at logical size: a user pays for every file they
//! own even when its blob is shared with someone else.

use serde::Serialize;
use sqlx::SqlitePool;

use crate::db::FileRepository;
use crate::error::Result;

/// A batch that would push its owner over quota
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("storage quota exceeded: {current} bytes used + {incoming} bytes incoming > {quota} bytes")]
pub struct QuotaExceeded {
    pub quota: u64,
    pub current: u64,
    pub incoming: u64,
}

/// An admitted batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Admission {
    pub quota: u64,
    pub current: u64,
    pub incoming: u64,
}

impl Admission {
    pub fn remaining_after(&self) -> u64 {
        self.quota.saturating_sub(self.current.saturating_add(self.incoming))
    }
}

/// Admit or reject a batch against a quota
pub fn evaluate(quota: u64, current: u64, incoming: u64) -> std::result::Result<Admission, QuotaExceeded> {
    match current.checked_add(incoming) {
        Some(total) if total <= quota => Ok(Admission {
            quota,
            current,
            incoming,
        }),
        _ => Err(QuotaExceeded {
            quota,
            current,
            incoming,
        }),
    }
}

/// Per-user quota gate for upload batches
#[derive(Clone)]
pub struct AdmissionController {
    pool: SqlitePool,
    quota: u64,
}

impl AdmissionController {
    pub fn new(pool: SqlitePool, quota: u64) -> Self {
        Self { pool, quota }
    }

    pub fn quota(&self) -> u64 {
        self.quota
    }

    /// Logical bytes currently committed by a user
    pub async fn usage(&self, owner_id: &str) -> Result<u64> {
        FileRepository::new(&self.pool).usage_for_owner(owner_id).await
    }

    /// Check a whole batch; nothing is admitted unless everything fits
    pub async fn admit(&self, owner_id: &str, sizes: &[u64]) -> Result<Admission> {
        let current = self.usage(owner_id).await?;
        let incoming = sizes.iter().fold(0u64, |acc, s| acc.saturating_add(*s));

        match evaluate(self.quota, current, incoming) {
            Ok(admission) => {
                tracing::debug!(
                    owner_id = %owner_id,
                    current,
                    incoming,
                    quota = self.quota,
                    "Batch admitted"
                );
                Ok(admission)
            }
            Err(exceeded) => {
                tracing::info!(
                    owner_id = %owner_id,
                    current,
                    incoming,
                    quota = self.quota,
                    payloads = sizes.len(),
                    "Batch rejected over quota"
                );
                Err(exceeded.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{insert_file, setup_test_db};
    use crate::db::UserRepository;
    use crate::error::AppError;

    #[test]
    fn test_evaluate_boundaries() {
        assert!(evaluate(1000, 900, 100).is_ok());
        assert_eq!(evaluate(1000, 900, 100).unwrap().remaining_after(), 0);
        assert!(evaluate(1000, 0, 0).is_ok());

        let rejected = evaluate(1000, 900, 150).unwrap_err();
        assert_eq!(
            rejected,
            QuotaExceeded {
                quota: 1000,
                current: 900,
                incoming: 150
            }
        );
    }

    #[test]
    fn test_evaluate_overflow_is_rejected() {
        assert!(evaluate(u64::MAX, u64::MAX, 1).is_err());
    }

    #[tokio::test]
    async fn test_admit_against_committed_usage() {
        let (_dir, pool) = setup_test_db().await;
        let alice = UserRepository::new(&pool).get_or_create("alice").await.unwrap();
        let bob = UserRepository::new(&pool).get_or_create("bob").await.unwrap();
        insert_file(&pool, &alice.id, "1", 900).await;

        let controller = AdmissionController::new(pool.clone(), 1000);

        match controller.admit(&alice.id, &[100, 50]).await {
            Err(AppError::QuotaExceeded(q)) => {
                assert_eq!((q.quota, q.current, q.incoming), (1000, 900, 150));
            }
            other => panic!("expected quota rejection, got {:?}", other.map(|_| ())),
        }

        assert!(controller.admit(&alice.id, &[60, 40]).await.is_ok());
        // Another user's usage is independent
        assert!(controller.admit(&bob.id, &[1000]).await.is_ok());
    }
}
