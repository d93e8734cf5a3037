//! Pure planners over a partition snapshot.
//!
//! Each planner turns the active rows of one partition into the minimal set
//! of row updates that keeps positions dense (`1..=k`). They never touch
//! storage, so every concurrency strategy can run the same plan.

use roost_core::{ImageId, PermanentImageRecord};
use roost_db::{OrderUpdate, RepositoryError};
use std::collections::HashSet;

pub(crate) fn max_order(snapshot: &[PermanentImageRecord]) -> i32 {
    snapshot
        .iter()
        .filter_map(|r| r.display_order)
        .max()
        .unwrap_or(0)
}

fn ordered_count(snapshot: &[PermanentImageRecord]) -> i32 {
    snapshot.iter().filter(|r| r.display_order.is_some()).count() as i32
}

fn find(snapshot: &[PermanentImageRecord], id: ImageId) -> Result<&PermanentImageRecord, RepositoryError> {
    snapshot
        .iter()
        .find(|r| r.image_id == id)
        .ok_or_else(|| RepositoryError::NotFound(format!("image {}", id)))
}

/// Append `new_ids` after the current last position, in the given order.
///
/// Ids that already hold a position keep it.
pub fn plan_assign(
    snapshot: &[PermanentImageRecord],
    new_ids: &[ImageId],
) -> Result<Vec<OrderUpdate>, RepositoryError> {
    let mut next = max_order(snapshot);
    let mut seen = HashSet::new();
    let mut updates = Vec::with_capacity(new_ids.len());

    for id in new_ids {
        if !seen.insert(*id) {
            continue;
        }
        let row = find(snapshot, *id)?;
        if row.display_order.is_some() {
            continue;
        }
        next += 1;
        updates.push(OrderUpdate::position(*id, next));
    }

    Ok(updates)
}

/// Move `id` to `new_position`, shifting the rows between by one toward the vacated slot.
pub fn plan_move(
    snapshot: &[PermanentImageRecord],
    id: ImageId,
    new_position: i32,
) -> Result<Vec<OrderUpdate>, RepositoryError> {
    let row = find(snapshot, id)?;
    let current = row.display_order.ok_or_else(|| {
        RepositoryError::InvalidData(format!("image {} has no position yet", id))
    })?;

    let k = ordered_count(snapshot);
    if new_position < 1 || new_position > k {
        return Err(RepositoryError::InvalidData(format!(
            "position {} outside 1..={}",
            new_position, k
        )));
    }
    if new_position == current {
        return Ok(Vec::new());
    }

    let mut updates = vec![OrderUpdate::position(id, new_position)];
    for sibling in snapshot.iter().filter(|r| r.image_id != id) {
        let Some(order) = sibling.display_order else {
            continue;
        };
        if new_position < current && order >= new_position && order < current {
            updates.push(OrderUpdate::position(sibling.image_id, order + 1));
        } else if new_position > current && order > current && order <= new_position {
            updates.push(OrderUpdate::position(sibling.image_id, order - 1));
        }
    }

    Ok(updates)
}

/// Deactivate `id` and close the gap it leaves.
pub fn plan_remove(
    snapshot: &[PermanentImageRecord],
    id: ImageId,
) -> Result<Vec<OrderUpdate>, RepositoryError> {
    let row = find(snapshot, id)?;
    let mut updates = vec![OrderUpdate::deactivate(id)];

    if let Some(removed) = row.display_order {
        for sibling in snapshot.iter().filter(|r| r.image_id != id) {
            if let Some(order) = sibling.display_order.filter(|o| *o > removed) {
                updates.push(OrderUpdate::position(sibling.image_id, order - 1));
            }
        }
    }

    Ok(updates)
}

/// Renumber densely from the current relative order; unpositioned rows go
/// last, ties break by id. Only rows whose position changes are returned.
pub fn plan_reorder(snapshot: &[PermanentImageRecord]) -> Result<Vec<OrderUpdate>, RepositoryError> {
    let mut rows: Vec<&PermanentImageRecord> = snapshot.iter().collect();
    rows.sort_by_key(|r| (r.display_order.is_none(), r.display_order, r.image_id));

    Ok(rows
        .into_iter()
        .zip(1..)
        .filter(|(row, position)| row.display_order != Some(*position))
        .map(|(row, position)| OrderUpdate::position(row.image_id, position))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use roost_core::{EntityType, ImageCategory};
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn row(image_id: ImageId, display_order: Option<i32>) -> PermanentImageRecord {
        PermanentImageRecord {
            image_id,
            image_guid: Uuid::new_v4(),
            entity_type: EntityType::Property,
            entity_id: 1,
            category: ImageCategory::Gallery,
            mime_type: "image/webp".to_string(),
            original_file_name: format!("{}.jpg", image_id),
            stored_path: format!("gallery/1/original/{}.webp", image_id),
            file_size_bytes: 1,
            width: None,
            height: None,
            display_order,
            is_active: true,
            uploaded_by: None,
            uploaded_at: Utc::now(),
            concurrency_token: Uuid::new_v4(),
        }
    }

    /// Apply updates to a snapshot and return id → position for active rows.
    fn apply(snapshot: &[PermanentImageRecord], updates: &[OrderUpdate]) -> BTreeMap<ImageId, Option<i32>> {
        let mut state: BTreeMap<ImageId, Option<i32>> =
            snapshot.iter().map(|r| (r.image_id, r.display_order)).collect();
        for u in updates {
            if u.is_active {
                state.insert(u.image_id, u.display_order);
            } else {
                state.remove(&u.image_id);
            }
        }
        state
    }

    #[test]
    fn test_assign_appends_after_max() {
        let snapshot = vec![row(1, Some(1)), row(2, Some(2)), row(3, None), row(4, None)];
        let updates = plan_assign(&snapshot, &[4, 3]).unwrap();
        assert_eq!(
            updates,
            vec![OrderUpdate::position(4, 3), OrderUpdate::position(3, 4)]
        );
    }

    #[test]
    fn test_assign_skips_positioned_and_duplicate_ids() {
        let snapshot = vec![row(1, Some(1)), row(2, None)];
        let updates = plan_assign(&snapshot, &[1, 2, 2]).unwrap();
        assert_eq!(updates, vec![OrderUpdate::position(2, 2)]);
    }

    #[test]
    fn test_assign_unknown_id_is_not_found() {
        let snapshot = vec![row(1, None)];
        assert!(matches!(
            plan_assign(&snapshot, &[7]),
            Err(RepositoryError::NotFound(_))
        ));
    }

    #[test]
    fn test_move_up_shifts_intervening_rows_down() {
        let snapshot = vec![row(1, Some(1)), row(2, Some(2)), row(3, Some(3))];
        let state = apply(&snapshot, &plan_move(&snapshot, 2, 1).unwrap());
        assert_eq!(state[&1], Some(2));
        assert_eq!(state[&2], Some(1));
        assert_eq!(state[&3], Some(3));
    }

    #[test]
    fn test_move_down_shifts_intervening_rows_up() {
        let snapshot = vec![
            row(1, Some(1)),
            row(2, Some(2)),
            row(3, Some(3)),
            row(4, Some(4)),
        ];
        let updates = plan_move(&snapshot, 1, 3).unwrap();
        assert_eq!(updates.len(), 3);
        let state = apply(&snapshot, &updates);
        assert_eq!(
            state.values().copied().collect::<Vec<_>>(),
            vec![Some(3), Some(1), Some(2), Some(4)]
        );
    }

    #[test]
    fn test_move_to_same_position_is_noop() {
        let snapshot = vec![row(1, Some(1)), row(2, Some(2))];
        assert!(plan_move(&snapshot, 2, 2).unwrap().is_empty());
    }

    #[test]
    fn test_move_out_of_range_rejected() {
        let snapshot = vec![row(1, Some(1)), row(2, Some(2))];
        assert!(matches!(
            plan_move(&snapshot, 1, 3),
            Err(RepositoryError::InvalidData(_))
        ));
        assert!(matches!(
            plan_move(&snapshot, 1, 0),
            Err(RepositoryError::InvalidData(_))
        ));
    }

    #[test]
    fn test_remove_compacts_greater_positions() {
        let snapshot = vec![
            row(1, Some(1)),
            row(2, Some(2)),
            row(3, Some(3)),
            row(4, Some(4)),
        ];
        let state = apply(&snapshot, &plan_remove(&snapshot, 2).unwrap());
        assert_eq!(state.len(), 3);
        assert_eq!(state[&1], Some(1));
        assert_eq!(state[&3], Some(2));
        assert_eq!(state[&4], Some(3));
    }

    #[test]
    fn test_reorder_writes_only_changed_rows() {
        let snapshot = vec![
            row(1, Some(1)),
            row(5, Some(4)),
            row(3, Some(4)),
            row(2, Some(9)),
            row(6, None),
        ];
        let updates = plan_reorder(&snapshot).unwrap();
        assert_eq!(
            updates,
            vec![
                OrderUpdate::position(3, 2),
                OrderUpdate::position(5, 3),
                OrderUpdate::position(2, 4),
                OrderUpdate::position(6, 5),
            ]
        );

        let state = apply(&snapshot, &updates);
        let mut positions: Vec<i32> = state.values().map(|p| p.unwrap()).collect();
        positions.sort();
        assert_eq!(positions, vec![1, 2, 3, 4, 5]);
    }
}
