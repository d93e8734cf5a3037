//! Staged uploads → permanent storage and metadata.
//!
//! A migration runs `Validate → PlanMoves → ExecuteMoves → PersistMetadata →
//! CleanupStaging`. Nothing is written to the metadata store unless every
//! object copy succeeded, and staged sources are only deleted once the
//! metadata is committed, so a failed call can simply be retried.

use chrono::Utc;
use futures::future::join_all;
use roost_core::{
    CategoryPolicies, Config, EntityId, EntityRef, EntityType, ImageCategory, ImageId, MimeKind,
    NewImageRecord, OrderingStrategy, Partition, PermanentImageRecord, PersistKind, StagedImage,
    Variant,
};
use roost_db::{DocumentDescriptor, EntityDirectory, ImageRecordStore};
use roost_storage::paths::{parse_permanent_key, permanent_key, staging_variant_key};
use roost_storage::BlobTransfer;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::error::{
    FailedMove, MigrationError, MigrationStage, OrderError, PartialMove, ValidationProblem,
};
use crate::ordering::{DisplayOrderEngine, OrderMap};
use crate::session::TempSessionStore;

#[derive(Debug, Clone)]
pub struct MigrationRequest {
    pub session_id: String,
    pub image_ids: Vec<Uuid>,
    pub entity: EntityRef,
    /// Preferred order for gallery images; ids not listed follow in upload order.
    pub order_hint: Option<Vec<Uuid>>,
    pub uploaded_by: Option<String>,
    pub strategy: OrderingStrategy,
}

/// Output of the validate stage.
#[derive(Debug, Clone, Default)]
pub struct ValidatedRequest {
    /// Staged and not yet migrated, in upload order.
    pub to_migrate: Vec<StagedImage>,
    /// Still staged although their metadata already exists; only cleanup remains.
    pub already_persisted: Vec<StagedImage>,
    /// No longer staged and already migrated.
    pub already_migrated: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedMove {
    pub variant: Variant,
    pub source: String,
    pub destination: String,
}

/// Every object move one staged image needs.
#[derive(Debug, Clone)]
pub struct ImageMovePlan {
    pub image: StagedImage,
    pub mime: MimeKind,
    pub moves: Vec<PlannedMove>,
}

impl ImageMovePlan {
    /// Permanent key of the `Original` variant, which the metadata points at.
    pub fn stored_path(&self) -> &str {
        self.moves
            .iter()
            .find(|m| m.variant == Variant::Original)
            .map(|m| m.destination.as_str())
            .unwrap_or_default()
    }

    /// Content type the permanent objects were written with.
    pub fn stored_mime(&self) -> &'static str {
        if self.mime.is_document() {
            self.mime.as_mime()
        } else {
            roost_core::constants::CANONICAL_IMAGE_MIME
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigratedImage {
    pub image_guid: Uuid,
    pub category: ImageCategory,
    /// Row id for gallery images; documents have none.
    pub image_id: Option<ImageId>,
    pub stored_path: String,
    pub display_order: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationSummary {
    pub migrated: Vec<MigratedImage>,
    pub already_migrated: Vec<Uuid>,
    pub moved_paths: Vec<String>,
    /// Positions after the migration, per gallery category touched.
    pub order: BTreeMap<ImageCategory, OrderMap>,
    /// Staged objects that could not be deleted; the sweep will get them.
    pub staging_leftovers: Vec<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RollbackReport {
    /// Images whose row or descriptor was withdrawn.
    pub withdrawn: Vec<Uuid>,
    pub deleted: Vec<String>,
    /// Kept for a later attempt, including every object of an image whose
    /// metadata could not be withdrawn.
    pub failed: Vec<String>,
}

pub struct MigrationCoordinator {
    sessions: Arc<TempSessionStore>,
    transfer: BlobTransfer,
    images: Arc<dyn ImageRecordStore>,
    entities: Arc<dyn EntityDirectory>,
    ordering: DisplayOrderEngine,
    policies: CategoryPolicies,
}

fn dedup_preserving_order(ids: &[Uuid]) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

impl MigrationCoordinator {
    pub fn new(
        sessions: Arc<TempSessionStore>,
        transfer: BlobTransfer,
        images: Arc<dyn ImageRecordStore>,
        entities: Arc<dyn EntityDirectory>,
        ordering: DisplayOrderEngine,
        policies: CategoryPolicies,
    ) -> Self {
        Self {
            sessions,
            transfer,
            images,
            entities,
            ordering,
            policies,
        }
    }

    pub fn from_config(
        sessions: Arc<TempSessionStore>,
        transfer: BlobTransfer,
        images: Arc<dyn ImageRecordStore>,
        entities: Arc<dyn EntityDirectory>,
        config: &Config,
    ) -> Self {
        let ordering = DisplayOrderEngine::from_config(images.clone(), entities.clone(), config);
        Self::new(
            sessions,
            transfer,
            images,
            entities,
            ordering,
            CategoryPolicies::standard(),
        )
    }

    pub fn ordering(&self) -> &DisplayOrderEngine {
        &self.ordering
    }

    /// Run the whole pipeline for one request.
    #[tracing::instrument(skip(self, request), fields(session_id = %request.session_id, entity = %request.entity, count = request.image_ids.len()))]
    pub async fn migrate(&self, request: &MigrationRequest) -> Result<MigrationSummary, MigrationError> {
        let start = Instant::now();

        let result = self.run_pipeline(request).await;
        match &result {
            Ok(summary) => tracing::info!(
                migrated = summary.migrated.len(),
                already_migrated = summary.already_migrated.len(),
                moved = summary.moved_paths.len(),
                duration_ms = start.elapsed().as_millis() as u64,
                stage = ?MigrationStage::Done,
                "Migration complete"
            ),
            Err(e) => tracing::warn!(
                stage = ?e.stage(),
                error = %e,
                leftover_paths = e.rollback_paths().len(),
                "Migration failed"
            ),
        }

        result.map(|mut summary| {
            summary.duration_ms = start.elapsed().as_millis() as u64;
            summary
        })
    }

    async fn run_pipeline(&self, request: &MigrationRequest) -> Result<MigrationSummary, MigrationError> {
        let validated = self.validate(request).await?;
        let plans = self.plan_moves(request.entity, &validated.to_migrate);
        let moved_paths = self.execute_moves(&plans).await?;

        let mut summary = self
            .persist_metadata(request, &plans)
            .await
            .map_err(|e| MigrationError::Persist {
                moved: moved_paths.clone(),
                source: Box::new(e),
            })?;
        summary.moved_paths = moved_paths;
        summary.already_migrated = validated.already_migrated.clone();
        summary
            .already_migrated
            .extend(validated.already_persisted.iter().map(|s| s.image_id));

        let finished: Vec<&StagedImage> = plans
            .iter()
            .map(|p| &p.image)
            .chain(validated.already_persisted.iter())
            .collect();
        summary.staging_leftovers = self.cleanup_staging(&request.session_id, &finished).await;

        Ok(summary)
    }

    /// Check everything a migration needs before any object moves.
    ///
    /// Every problem found is reported together.
    pub async fn validate(&self, request: &MigrationRequest) -> Result<ValidatedRequest, MigrationError> {
        let mut problems = Vec::new();

        if !self.entities.entity_exists(request.entity).await? {
            problems.push(ValidationProblem::EntityNotFound {
                entity: request.entity,
            });
        }
        if !self.sessions.is_valid(&request.session_id) {
            problems.push(ValidationProblem::SessionNotFound);
            return Err(MigrationError::Validation(problems));
        }

        let ids = dedup_preserving_order(&request.image_ids);
        let requested: HashSet<Uuid> = ids.iter().copied().collect();
        // Session lists are in upload order, which is also the default display order.
        let staged: Vec<StagedImage> = self
            .sessions
            .list(&request.session_id)
            .into_iter()
            .filter(|s| requested.contains(&s.image_id))
            .collect();
        let staged_ids: HashSet<Uuid> = staged.iter().map(|s| s.image_id).collect();
        let persisted = self.persisted_guids(request.entity, &ids).await?;

        let mut validated = ValidatedRequest::default();
        let mut to_check = Vec::new();

        for id in &ids {
            if !staged_ids.contains(id) {
                if persisted.contains(id) {
                    validated.already_migrated.push(*id);
                } else {
                    problems.push(ValidationProblem::NotStaged { image_id: *id });
                }
            }
        }

        for image in &staged {
            if persisted.contains(&image.image_id) {
                validated.already_persisted.push(image.clone());
                continue;
            }

            let accepted = image
                .mime_kind()
                .filter(|m| self.policies.get(image.category).accepts(*m));
            let Some(mime) = accepted else {
                problems.push(ValidationProblem::UnsupportedMime {
                    image_id: image.image_id,
                    mime_type: image.mime_type.clone(),
                });
                continue;
            };

            if let Some(staged_for) = image.target_entity_id {
                if staged_for != request.entity.entity_id {
                    problems.push(ValidationProblem::EntityMismatch {
                        image_id: image.image_id,
                        staged_for,
                    });
                }
            }

            for variant in mime.required_variants() {
                to_check.push((
                    image.image_id,
                    *variant,
                    staging_variant_key(&image.staging_base, *variant),
                ));
            }
            validated.to_migrate.push(image.clone());
        }

        let checks = join_all(to_check.into_iter().map(|(image_id, variant, path)| async move {
            let outcome = self.transfer.exists(&path).await;
            (image_id, variant, path, outcome)
        }))
        .await;

        for (image_id, variant, path, outcome) in checks {
            match outcome {
                Ok(true) => {}
                Ok(false) => problems.push(ValidationProblem::MissingVariant {
                    image_id,
                    variant,
                    path,
                }),
                Err(e) => problems.push(ValidationProblem::StagingUnreachable {
                    image_id,
                    path,
                    reason: e.to_string(),
                }),
            }
        }

        if problems.is_empty() {
            Ok(validated)
        } else {
            Err(MigrationError::Validation(problems))
        }
    }

    /// Guids among `ids` that already have live permanent metadata for `entity`.
    async fn persisted_guids(
        &self,
        entity: EntityRef,
        ids: &[Uuid],
    ) -> Result<HashSet<Uuid>, MigrationError> {
        let mut found: HashSet<Uuid> = self
            .images
            .find_by_guids(ids)
            .await?
            .into_iter()
            .filter(|r| r.is_active)
            .map(|r| r.image_guid)
            .collect();

        for category in ImageCategory::ALL {
            if self.policies.get(category).persist != PersistKind::Descriptor {
                continue;
            }
            if let Some(descriptor) = self.entities.document_descriptor(entity, category).await? {
                if ids.contains(&descriptor.image_guid) {
                    found.insert(descriptor.image_guid);
                }
            }
        }

        Ok(found)
    }

    /// Source → destination pairs for every variant of every image.
    pub fn plan_moves(&self, entity: EntityRef, images: &[StagedImage]) -> Vec<ImageMovePlan> {
        images
            .iter()
            .filter_map(|image| {
                let mime = image.mime_kind()?;
                let moves = mime
                    .required_variants()
                    .iter()
                    .map(|variant| PlannedMove {
                        variant: *variant,
                        source: staging_variant_key(&image.staging_base, *variant),
                        destination: permanent_key(
                            image.category,
                            entity.entity_id,
                            *variant,
                            image.image_id,
                            mime.stored_extension(),
                        ),
                    })
                    .collect();
                Some(ImageMovePlan {
                    image: image.clone(),
                    mime,
                    moves,
                })
            })
            .collect()
    }

    /// Copy every planned object, keeping the staged sources.
    ///
    /// Returns the destinations written. If any copy fails the call fails
    /// with exactly which destinations landed and which did not.
    pub async fn execute_moves(&self, plans: &[ImageMovePlan]) -> Result<Vec<String>, MigrationError> {
        let pairs: Vec<(String, String)> = plans
            .iter()
            .flat_map(|p| p.moves.iter())
            .map(|m| (m.source.clone(), m.destination.clone()))
            .collect();

        let mut outcomes = self.transfer.move_batch(&pairs, false).await;

        let mut partial = PartialMove::default();
        for (source, destination) in pairs {
            match outcomes.remove(&source) {
                Some(Ok(())) => partial.moved.push(destination),
                Some(Err(e)) => partial.failed.push(FailedMove {
                    source,
                    destination,
                    reason: e.to_string(),
                }),
                None => partial.failed.push(FailedMove {
                    source,
                    destination,
                    reason: "no outcome reported".to_string(),
                }),
            }
        }

        if partial.failed.is_empty() {
            Ok(partial.moved)
        } else {
            for failed in &partial.failed {
                tracing::warn!(
                    source = %failed.source,
                    destination = %failed.destination,
                    reason = %failed.reason,
                    "Object move failed"
                );
            }
            Err(MigrationError::PartialFailure(partial))
        }
    }

    /// Write gallery rows and document descriptors for moved images.
    ///
    /// On failure, rows this call inserted are deleted again and replaced
    /// descriptors are put back, leaving the metadata as it was.
    pub async fn persist_metadata(
        &self,
        request: &MigrationRequest,
        plans: &[ImageMovePlan],
    ) -> Result<MigrationSummary, MigrationError> {
        let (gallery, documents): (Vec<&ImageMovePlan>, Vec<&ImageMovePlan>) = plans
            .iter()
            .partition(|p| self.policies.get(p.image.category).persist == PersistKind::Gallery);

        let mut summary = MigrationSummary::default();

        let records: Vec<NewImageRecord> = gallery
            .iter()
            .map(|plan| NewImageRecord {
                image_guid: plan.image.image_id,
                entity_type: request.entity.entity_type,
                entity_id: request.entity.entity_id,
                category: plan.image.category,
                mime_type: plan.stored_mime().to_string(),
                original_file_name: plan.image.original_file_name.clone(),
                stored_path: plan.stored_path().to_string(),
                file_size_bytes: plan.image.file_size_bytes,
                width: plan.image.width,
                height: plan.image.height,
                uploaded_by: request.uploaded_by.clone(),
            })
            .collect();
        let inserted = if records.is_empty() {
            Vec::new()
        } else {
            self.images.insert_records(&records).await?
        };
        let row_ids: HashMap<Uuid, ImageId> =
            inserted.iter().map(|r| (r.image_guid, r.image_id)).collect();

        if let Err(e) = self
            .assign_positions(request, &gallery, &row_ids, &mut summary)
            .await
        {
            self.compensate(request.entity, &inserted, &[]).await;
            return Err(e.into());
        }

        let mut replaced: Vec<(ImageCategory, Option<DocumentDescriptor>)> = Vec::new();

        for plan in &documents {
            let descriptor = DocumentDescriptor {
                image_guid: plan.image.image_id,
                stored_path: plan.stored_path().to_string(),
                mime_type: plan.stored_mime().to_string(),
                original_file_name: plan.image.original_file_name.clone(),
                file_size_bytes: plan.image.file_size_bytes,
                uploaded_by: request.uploaded_by.clone(),
                uploaded_at: Utc::now(),
            };
            match self
                .entities
                .set_document_descriptor(request.entity, plan.image.category, &descriptor)
                .await
            {
                Ok(previous) => {
                    if let Some(previous) = &previous {
                        tracing::info!(
                            category = %plan.image.category,
                            replaced = %previous.stored_path,
                            "Document descriptor replaced"
                        );
                    }
                    replaced.push((plan.image.category, previous));
                }
                Err(e) => {
                    self.compensate(request.entity, &inserted, &replaced).await;
                    return Err(e.into());
                }
            }
            summary.migrated.push(MigratedImage {
                image_guid: plan.image.image_id,
                category: plan.image.category,
                image_id: None,
                stored_path: plan.stored_path().to_string(),
                display_order: None,
            });
        }

        Ok(summary)
    }

    async fn assign_positions(
        &self,
        request: &MigrationRequest,
        gallery: &[&ImageMovePlan],
        row_ids: &HashMap<Uuid, ImageId>,
        summary: &mut MigrationSummary,
    ) -> Result<(), OrderError> {
        let hint: HashMap<Uuid, usize> = request
            .order_hint
            .iter()
            .flatten()
            .enumerate()
            .map(|(i, id)| (*id, i))
            .collect();

        let mut by_category: BTreeMap<ImageCategory, Vec<&ImageMovePlan>> = BTreeMap::new();
        for plan in gallery {
            by_category.entry(plan.image.category).or_default().push(plan);
        }

        for (category, mut plans) in by_category {
            // Stable: unhinted images keep upload order after the hinted ones.
            plans.sort_by_key(|p| hint.get(&p.image.image_id).copied().unwrap_or(usize::MAX));
            let ids: Vec<ImageId> = plans
                .iter()
                .filter_map(|p| row_ids.get(&p.image.image_id).copied())
                .collect();

            let partition = Partition::new(request.entity, category);
            let order = self
                .ordering
                .assign_batch(partition, &ids, request.strategy)
                .await?;

            for plan in plans {
                let image_id = row_ids.get(&plan.image.image_id).copied();
                summary.migrated.push(MigratedImage {
                    image_guid: plan.image.image_id,
                    category,
                    image_id,
                    stored_path: plan.stored_path().to_string(),
                    display_order: image_id.and_then(|id| order.get(&id).copied()),
                });
            }
            summary.order.insert(category, order);
        }

        Ok(())
    }

    /// Undo what a failed `persist_metadata` wrote.
    ///
    /// Descriptors go back to what they held before. Inserted rows are first
    /// withdrawn so their partitions compact and covers move off them, then
    /// deleted outright so a retry inserts them afresh.
    async fn compensate(
        &self,
        entity: EntityRef,
        inserted: &[PermanentImageRecord],
        replaced: &[(ImageCategory, Option<DocumentDescriptor>)],
    ) {
        for (category, previous) in replaced.iter().rev() {
            let restored = match previous {
                Some(previous) => self
                    .entities
                    .set_document_descriptor(entity, *category, previous)
                    .await
                    .map(|_| ()),
                None => self
                    .entities
                    .clear_document_descriptor(entity, *category)
                    .await
                    .map(|_| ()),
            };
            if let Err(e) = restored {
                tracing::error!(
                    category = %category,
                    error = %e,
                    "Failed to restore document descriptor after metadata failure"
                );
            }
        }

        for record in inserted {
            if let Err(e) = self
                .ordering
                .remove_and_compact(record.image_id, OrderingStrategy::Pessimistic)
                .await
            {
                tracing::warn!(
                    image_id = record.image_id,
                    error = %e,
                    "Failed to compact partition after metadata failure"
                );
            }
        }

        if inserted.is_empty() {
            return;
        }
        let ids: Vec<ImageId> = inserted.iter().map(|r| r.image_id).collect();
        if let Err(e) = self.images.delete_records(&ids).await {
            tracing::error!(
                count = ids.len(),
                error = %e,
                "Failed to delete rows after metadata failure"
            );
        }
    }

    /// Delete staged objects and forget migrated ids in the session.
    ///
    /// Returns staged keys that could not be deleted.
    pub async fn cleanup_staging(&self, session_id: &str, images: &[&StagedImage]) -> Vec<String> {
        let keys: Vec<String> = images
            .iter()
            .flat_map(|image| {
                image
                    .required_variants()
                    .iter()
                    .map(move |v| staging_variant_key(&image.staging_base, *v))
            })
            .collect();

        let outcomes = self.transfer.delete_multiple(&keys).await;
        for image in images {
            self.sessions.remove(session_id, image.image_id);
        }

        let mut leftovers: Vec<String> = outcomes
            .into_iter()
            .filter(|(_, ok)| !ok)
            .map(|(key, _)| key)
            .collect();
        leftovers.sort();
        leftovers
    }

    /// Undo migrated objects: withdraw the metadata pointing at them, then
    /// delete them.
    ///
    /// Gallery rows are removed from their partition (which compacts and moves
    /// the cover); descriptors are cleared. Only metadata whose stored path is
    /// among `destinations` is touched. If an image's metadata cannot be
    /// withdrawn its objects are kept and reported as failed.
    #[tracing::instrument(skip(self, destinations), fields(count = destinations.len()))]
    pub async fn rollback(&self, destinations: &[String]) -> RollbackReport {
        let targets: HashSet<&str> = destinations.iter().map(String::as_str).collect();
        let mut by_image: BTreeMap<Uuid, (ImageCategory, EntityId, Vec<String>)> = BTreeMap::new();
        let mut deletable = Vec::new();

        for path in destinations {
            match parse_permanent_key(path) {
                Some((category, entity_id, _, guid)) => by_image
                    .entry(guid)
                    .or_insert_with(|| (category, entity_id, Vec::new()))
                    .2
                    .push(path.clone()),
                None => deletable.push(path.clone()),
            }
        }

        let mut report = RollbackReport::default();
        for (guid, (category, entity_id, paths)) in by_image {
            match self.withdraw(guid, category, entity_id, &targets).await {
                Ok(true) => {
                    report.withdrawn.push(guid);
                    deletable.extend(paths);
                }
                Ok(false) => deletable.extend(paths),
                Err(e) => {
                    tracing::warn!(
                        image_guid = %guid,
                        error = %e,
                        "Failed to withdraw metadata; keeping objects"
                    );
                    report.failed.extend(paths);
                }
            }
        }

        let outcomes = self.transfer.delete_multiple(&deletable).await;
        for path in deletable {
            if outcomes.get(&path).copied().unwrap_or(false) {
                report.deleted.push(path);
            } else {
                report.failed.push(path);
            }
        }
        tracing::info!(
            withdrawn = report.withdrawn.len(),
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            "Migration rolled back"
        );
        report
    }

    /// Withdraw whatever live metadata of `guid` points into `targets`.
    async fn withdraw(
        &self,
        guid: Uuid,
        category: ImageCategory,
        entity_id: EntityId,
        targets: &HashSet<&str>,
    ) -> Result<bool, MigrationError> {
        let mut withdrawn = false;
        match self.policies.get(category).persist {
            PersistKind::Gallery => {
                for record in self.images.find_by_guids(&[guid]).await? {
                    if record.is_active && targets.contains(record.stored_path.as_str()) {
                        self.ordering
                            .remove_and_compact(record.image_id, OrderingStrategy::Pessimistic)
                            .await?;
                        withdrawn = true;
                    }
                }
            }
            PersistKind::Descriptor => {
                // Document keys carry no entity type.
                for entity_type in EntityType::ALL {
                    let entity = EntityRef::new(entity_type, entity_id);
                    let Some(descriptor) = self.entities.document_descriptor(entity, category).await?
                    else {
                        continue;
                    };
                    if descriptor.image_guid == guid
                        && targets.contains(descriptor.stored_path.as_str())
                    {
                        self.entities.clear_document_descriptor(entity, category).await?;
                        withdrawn = true;
                    }
                }
            }
        }
        Ok(withdrawn)
    }

    /// Withdraw a permanent image from its partition and close the gap.
    pub async fn remove_image(
        &self,
        image_id: ImageId,
        strategy: OrderingStrategy,
    ) -> Result<OrderMap, OrderError> {
        self.ordering.remove_and_compact(image_id, strategy).await
    }
}
