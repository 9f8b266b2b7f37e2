//! Application state management

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::dedup::{
    AdmissionController, DedupIndex, FingerprintLocks, GarbageCollector, UploadCoordinator,
};
use crate::error::Result;
use crate::events::EventHub;
use crate::storage::{BlobStore, StagingArea, StorageError};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    db: SqlitePool,
    store: BlobStore,
    staging: StagingArea,
    index: DedupIndex,
    coordinator: UploadCoordinator,
    collector: GarbageCollector,
    events: EventHub,
}

impl AppState {
    /// Wire up the dedup engine over an open database.
    ///
    /// Creates the storage directories and repairs any drifted reference
    /// counts before the server starts taking requests.
    pub async fn new(config: Config, db: SqlitePool) -> Result<Self> {
        let store = BlobStore::with_local_storage(config.storage.root.clone());
        Self::with_store(config, db, store).await
    }

    /// Open the configured database and build the state
    pub async fn from_config(config: Config) -> Result<Self> {
        let pool = db::create_pool(&config.database.url).await?;
        Self::new(config, pool).await
    }

    /// Build the state on top of a specific blob store
    pub async fn with_store(config: Config, db: SqlitePool, store: BlobStore) -> Result<Self> {
        tokio::fs::create_dir_all(&config.storage.root)
            .await
            .map_err(|e| StorageError::io("create", &config.storage.root, e))?;

        let staging = StagingArea::new(config.storage.staging.clone());
        staging.ensure().await?;

        let index = DedupIndex::new(db.clone());
        let repaired = index.reconcile_refcounts().await?;
        tracing::info!(repaired, "Reference counts reconciled");

        let locks = FingerprintLocks::new();
        let events = EventHub::default();

        let coordinator = UploadCoordinator::new(
            index.clone(),
            store.clone(),
            locks.clone(),
            config.upload.type_policy.clone(),
            AdmissionController::new(db.clone(), config.quota.per_user_bytes),
            events.clone(),
        );
        let collector = GarbageCollector::new(index.clone(), store.clone(), locks, events.clone());

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                db,
                store,
                staging,
                index,
                coordinator,
                collector,
                events,
            }),
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the database pool
    pub fn db(&self) -> &SqlitePool {
        &self.inner.db
    }

    pub fn store(&self) -> &BlobStore {
        &self.inner.store
    }

    pub fn staging(&self) -> &StagingArea {
        &self.inner.staging
    }

    pub fn index(&self) -> &DedupIndex {
        &self.inner.index
    }

    pub fn coordinator(&self) -> &UploadCoordinator {
        &self.inner.coordinator
    }

    pub fn collector(&self) -> &GarbageCollector {
        &self.inner.collector
    }

    pub fn events(&self) -> &EventHub {
        &self.inner.events
    }
}
