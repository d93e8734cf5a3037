use roost_core::{Config, ImageId, OrderingStrategy, Partition, PermanentImageRecord};
use roost_db::{
    CoverImage, EntityDirectory, ImageRecordStore, OrderUpdate, RepositoryError, WriteGuard,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::plan::{max_order, plan_assign, plan_move, plan_remove, plan_reorder};
use crate::error::OrderError;

/// Image id → display position for the ordered rows of one partition.
pub type OrderMap = BTreeMap<ImageId, i32>;

fn order_map(rows: &[PermanentImageRecord]) -> OrderMap {
    rows.iter()
        .filter_map(|r| r.display_order.map(|o| (r.image_id, o)))
        .collect()
}

/// Maintains dense per-partition display positions.
///
/// Every operation is a pure plan over a partition snapshot, executed under
/// the caller's [`OrderingStrategy`]. Position 1 is mirrored into the
/// entity's cover reference after each change.
#[derive(Clone)]
pub struct DisplayOrderEngine {
    store: Arc<dyn ImageRecordStore>,
    directory: Arc<dyn EntityDirectory>,
    max_attempts: u32,
    backoff: Duration,
}

impl DisplayOrderEngine {
    pub fn new(
        store: Arc<dyn ImageRecordStore>,
        directory: Arc<dyn EntityDirectory>,
        max_attempts: u32,
        backoff: Duration,
    ) -> Self {
        Self {
            store,
            directory,
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn from_config(
        store: Arc<dyn ImageRecordStore>,
        directory: Arc<dyn EntityDirectory>,
        config: &Config,
    ) -> Self {
        Self::new(
            store,
            directory,
            config.order_max_retries(),
            config.order_retry_backoff(),
        )
    }

    async fn run<P>(
        &self,
        partition: &Partition,
        strategy: OrderingStrategy,
        planner: P,
    ) -> Result<Vec<OrderUpdate>, OrderError>
    where
        P: Fn(&[PermanentImageRecord]) -> Result<Vec<OrderUpdate>, RepositoryError> + Send + Sync,
    {
        match strategy {
            OrderingStrategy::Pessimistic => Ok(self
                .store
                .update_partition_locked(partition, &planner)
                .await?),
            OrderingStrategy::Optimistic => {
                let mut attempt: u32 = 0;
                loop {
                    attempt += 1;
                    let snapshot = self.store.load_partition(partition).await?;
                    let updates = planner(&snapshot)?;
                    let guard = WriteGuard::from_snapshot(&snapshot);

                    match self.store.apply_updates(partition, &updates, &guard).await {
                        Ok(_) => return Ok(updates),
                        Err(e) if e.is_conflict() => {
                            if attempt >= self.max_attempts {
                                tracing::warn!(
                                    partition = %partition,
                                    attempts = attempt,
                                    "Order update gave up after repeated conflicts"
                                );
                                return Err(OrderError::ConflictRetriesExhausted {
                                    partition: *partition,
                                    attempts: attempt,
                                });
                            }
                            tracing::debug!(
                                partition = %partition,
                                attempt,
                                "Order update conflicted, retrying"
                            );
                            tokio::time::sleep(self.backoff * attempt).await;
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
            OrderingStrategy::Unlocked => {
                tracing::warn!(
                    partition = %partition,
                    "Applying order updates without concurrency control"
                );
                let snapshot = self.store.load_partition(partition).await?;
                let updates = planner(&snapshot)?;
                self.store
                    .apply_updates(partition, &updates, &WriteGuard::Unchecked)
                    .await?;
                Ok(updates)
            }
        }
    }

    async fn active_record(&self, image_id: ImageId) -> Result<PermanentImageRecord, OrderError> {
        match self.store.get(image_id).await? {
            Some(record) if record.is_active => Ok(record),
            _ => Err(OrderError::NotFound(format!("image {}", image_id))),
        }
    }

    async fn finish(&self, partition: &Partition, changed: bool) -> Result<OrderMap, OrderError> {
        let rows = self.store.load_partition(partition).await?;
        if changed {
            self.sync_cover(partition, &rows).await;
        }
        Ok(order_map(&rows))
    }

    /// Give `new_ids` consecutive positions after the current last one, in order.
    #[tracing::instrument(skip(self, partition, new_ids), fields(partition = %partition, count = new_ids.len()))]
    pub async fn assign_batch(
        &self,
        partition: Partition,
        new_ids: &[ImageId],
        strategy: OrderingStrategy,
    ) -> Result<OrderMap, OrderError> {
        let updates = self
            .run(&partition, strategy, |snapshot| plan_assign(snapshot, new_ids))
            .await?;
        self.finish(&partition, !updates.is_empty()).await
    }

    /// Move one image; rows in between shift one slot toward the vacated position.
    #[tracing::instrument(skip(self))]
    pub async fn move_to(
        &self,
        image_id: ImageId,
        new_position: i32,
        strategy: OrderingStrategy,
    ) -> Result<OrderMap, OrderError> {
        let partition = self.active_record(image_id).await?.partition();
        let updates = self
            .run(&partition, strategy, |snapshot| {
                plan_move(snapshot, image_id, new_position)
            })
            .await?;
        self.finish(&partition, !updates.is_empty()).await
    }

    pub async fn set_primary(
        &self,
        image_id: ImageId,
        strategy: OrderingStrategy,
    ) -> Result<OrderMap, OrderError> {
        self.move_to(image_id, 1, strategy).await
    }

    /// Deactivate an image and close the gap it leaves.
    #[tracing::instrument(skip(self))]
    pub async fn remove_and_compact(
        &self,
        image_id: ImageId,
        strategy: OrderingStrategy,
    ) -> Result<OrderMap, OrderError> {
        let partition = self.active_record(image_id).await?.partition();
        self.run(&partition, strategy, |snapshot| plan_remove(snapshot, image_id))
            .await?;
        self.finish(&partition, true).await
    }

    /// Renumber the partition densely, keeping its current relative order.
    #[tracing::instrument(skip(self, partition), fields(partition = %partition))]
    pub async fn reorder(
        &self,
        partition: Partition,
        strategy: OrderingStrategy,
    ) -> Result<OrderMap, OrderError> {
        let updates = self.run(&partition, strategy, plan_reorder).await?;
        if !updates.is_empty() {
            tracing::info!(rewritten = updates.len(), "Partition renumbered");
        }
        self.finish(&partition, !updates.is_empty()).await
    }

    /// Position the next appended image would receive.
    pub async fn next_order(&self, partition: Partition) -> Result<i32, OrderError> {
        let rows = self.store.load_partition(&partition).await?;
        Ok(max_order(&rows) + 1)
    }

    pub async fn order_map(&self, partition: Partition) -> Result<OrderMap, OrderError> {
        let rows = self.store.load_partition(&partition).await?;
        Ok(order_map(&rows))
    }

    /// Point the entity's cover at whatever currently holds position 1.
    pub async fn refresh_cover(&self, partition: Partition) -> Result<(), OrderError> {
        let rows = self.store.load_partition(&partition).await?;
        self.write_cover(&partition, &rows).await?;
        Ok(())
    }

    async fn write_cover(
        &self,
        partition: &Partition,
        rows: &[PermanentImageRecord],
    ) -> Result<(), RepositoryError> {
        let cover = rows
            .iter()
            .find(|r| r.display_order == Some(1))
            .map(|r| CoverImage {
                image_id: r.image_id,
                stored_path: r.stored_path.clone(),
            });
        self.directory
            .set_cover_image(partition, cover.as_ref())
            .await
    }

    /// The order change already committed; a failed cover write is logged and
    /// can be repaired with [`DisplayOrderEngine::refresh_cover`].
    async fn sync_cover(&self, partition: &Partition, rows: &[PermanentImageRecord]) {
        if let Err(e) = self.write_cover(partition, rows).await {
            tracing::error!(partition = %partition, error = %e, "Failed to update cover image");
        }
    }
}
