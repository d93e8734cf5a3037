//! Roost CLI support: wiring the engine from configuration.

use anyhow::Context;
use roost_core::Config;
use roost_db::{
    setup_database, EntityDirectory, EntityRepository, ImageRecordRepository, ImageRecordStore,
    InMemoryEntityDirectory, InMemoryImageStore, InMemorySessionStore, MigrationSessionRepository,
    MigrationSessionStore,
};
use roost_services::{MigrationCoordinator, StagingCleanupService, TempSessionStore, UploadStager};
use roost_storage::{create_storage, BlobTransfer, BlobUploader, Storage};
use roost_worker::{BulkMigrationJob, DirectorySource, JobRegistry, LegacyImageSource};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Every service a command needs, built from one [`Config`].
pub struct Engine {
    pub config: Config,
    pub storage: Arc<dyn Storage>,
    pub sessions: Arc<TempSessionStore>,
    pub stager: UploadStager,
    pub coordinator: Arc<MigrationCoordinator>,
    pub store: Arc<dyn MigrationSessionStore>,
    /// Set when repositories live in memory; nothing outlives the process.
    scratch_entities: Option<Arc<InMemoryEntityDirectory>>,
}

impl Engine {
    /// Postgres when `DATABASE_URL` is set, in-memory repositories otherwise.
    pub async fn from_config(config: Config) -> anyhow::Result<Self> {
        if config.database_url().is_some() {
            Self::connect(config).await
        } else {
            tracing::warn!("DATABASE_URL not set; using in-memory repositories");
            Self::in_memory(config).await
        }
    }

    /// Connect storage and Postgres, applying migrations.
    pub async fn connect(config: Config) -> anyhow::Result<Self> {
        let storage = create_storage(&config)
            .await
            .context("Failed to create storage backend")?;
        let pool = setup_database(&config).await?;

        Ok(Self::assemble(
            config,
            storage,
            Arc::new(ImageRecordRepository::new(pool.clone())),
            Arc::new(EntityRepository::new(pool.clone())),
            Arc::new(MigrationSessionRepository::new(pool)),
            None,
        ))
    }

    /// Storage from configuration, repositories kept in memory.
    pub async fn in_memory(config: Config) -> anyhow::Result<Self> {
        let storage = create_storage(&config)
            .await
            .context("Failed to create storage backend")?;

        let entities = Arc::new(InMemoryEntityDirectory::new());
        Ok(Self::assemble(
            config,
            storage,
            Arc::new(InMemoryImageStore::new()),
            entities.clone(),
            Arc::new(InMemorySessionStore::new()),
            Some(entities),
        ))
    }

    fn assemble(
        config: Config,
        storage: Arc<dyn Storage>,
        images: Arc<dyn ImageRecordStore>,
        entities: Arc<dyn EntityDirectory>,
        store: Arc<dyn MigrationSessionStore>,
        scratch_entities: Option<Arc<InMemoryEntityDirectory>>,
    ) -> Self {
        let sessions = Arc::new(TempSessionStore::from_config(&config));
        let uploader = BlobUploader::from_config(storage.clone(), &config);
        let transfer = BlobTransfer::from_config(storage.clone(), &config);
        let stager =
            UploadStager::from_config(sessions.clone(), uploader, transfer.clone(), &config);
        let coordinator = Arc::new(MigrationCoordinator::from_config(
            sessions.clone(),
            transfer,
            images,
            entities,
            &config,
        ));

        Self {
            config,
            storage,
            sessions,
            stager,
            coordinator,
            store,
            scratch_entities,
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.scratch_entities.is_none()
    }

    /// Register every entity found under `root` with the in-memory directory.
    ///
    /// A no-op against Postgres, where entities must already exist.
    pub async fn seed_entities(&self, root: &Path) -> anyhow::Result<usize> {
        let Some(directory) = &self.scratch_entities else {
            return Ok(0);
        };
        let items = DirectorySource::new(root).list().await?;
        let entities: HashSet<_> = items.iter().map(|item| item.entity).collect();
        for entity in &entities {
            directory.register(*entity);
        }
        Ok(entities.len())
    }

    /// The legacy root from `explicit`, falling back to `LEGACY_IMAGE_ROOT`.
    pub fn legacy_root(&self, explicit: Option<PathBuf>) -> anyhow::Result<PathBuf> {
        explicit
            .or_else(|| self.config.legacy_image_root().map(PathBuf::from))
            .context("No legacy image root: pass --root or set LEGACY_IMAGE_ROOT")
    }

    /// A job registry reading legacy images from `root`.
    pub fn registry(&self, root: PathBuf) -> JobRegistry {
        let job = BulkMigrationJob::from_config(
            Arc::new(DirectorySource::new(root)),
            self.sessions.clone(),
            self.stager.clone(),
            self.coordinator.clone(),
            self.store.clone(),
            &self.config,
        );
        JobRegistry::from_config(job, &self.config)
    }

    pub fn cleanup(&self) -> Arc<StagingCleanupService> {
        Arc::new(StagingCleanupService::from_config(
            self.storage.clone(),
            self.sessions.clone(),
            &self.config,
        ))
    }
}

pub fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize output")?;
    println!("{}", out);
    Ok(())
}
