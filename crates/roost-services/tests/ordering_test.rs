mod helpers;

use helpers::{insert_gallery_rows, property, setup_engine, setup_engine_with_retries};
use roost_core::{ImageCategory, OrderingStrategy, Partition};
use roost_db::{EntityDirectory, ImageRecordStore, OrderUpdate, WriteGuard};
use roost_services::{OrderError, OrderMap};
use std::sync::Arc;

fn gallery() -> Partition {
    Partition::new(property(1), ImageCategory::Gallery)
}

fn positions(map: &OrderMap) -> Vec<i32> {
    let mut values: Vec<i32> = map.values().copied().collect();
    values.sort_unstable();
    values
}

#[tokio::test]
async fn test_assign_then_move_to_front() {
    let engine = setup_engine();
    let rows = insert_gallery_rows(&engine.images, property(1), 3).await;
    let ids: Vec<i64> = rows.iter().map(|r| r.image_id).collect();

    let assigned = engine
        .ordering()
        .assign_batch(gallery(), &ids, OrderingStrategy::Optimistic)
        .await
        .unwrap();
    assert_eq!(assigned[&ids[0]], 1);
    assert_eq!(assigned[&ids[1]], 2);
    assert_eq!(assigned[&ids[2]], 3);

    let moved = engine
        .ordering()
        .move_to(ids[1], 1, OrderingStrategy::Optimistic)
        .await
        .unwrap();
    assert_eq!(moved[&ids[0]], 2);
    assert_eq!(moved[&ids[1]], 1);
    assert_eq!(moved[&ids[2]], 3);

    let cover = engine.entities.cover_image(&gallery()).await.unwrap().unwrap();
    assert_eq!(cover.image_id, ids[1]);
    assert_eq!(cover.stored_path, rows[1].stored_path);
}

#[tokio::test]
async fn test_move_down_shifts_rows_up() {
    let engine = setup_engine();
    let rows = insert_gallery_rows(&engine.images, property(1), 4).await;
    let ids: Vec<i64> = rows.iter().map(|r| r.image_id).collect();
    engine
        .ordering()
        .assign_batch(gallery(), &ids, OrderingStrategy::Pessimistic)
        .await
        .unwrap();

    let moved = engine
        .ordering()
        .move_to(ids[0], 3, OrderingStrategy::Pessimistic)
        .await
        .unwrap();

    assert_eq!(moved[&ids[1]], 1);
    assert_eq!(moved[&ids[2]], 2);
    assert_eq!(moved[&ids[0]], 3);
    assert_eq!(moved[&ids[3]], 4);
    let cover = engine.entities.cover_image(&gallery()).await.unwrap().unwrap();
    assert_eq!(cover.image_id, ids[1]);
}

#[tokio::test]
async fn test_move_out_of_range_is_rejected() {
    let engine = setup_engine();
    let rows = insert_gallery_rows(&engine.images, property(1), 2).await;
    let ids: Vec<i64> = rows.iter().map(|r| r.image_id).collect();
    engine
        .ordering()
        .assign_batch(gallery(), &ids, OrderingStrategy::Optimistic)
        .await
        .unwrap();

    for position in [0, 3] {
        let result = engine
            .ordering()
            .move_to(ids[0], position, OrderingStrategy::Optimistic)
            .await;
        assert!(matches!(result, Err(OrderError::InvalidPosition(_))));
    }
    assert!(matches!(
        engine
            .ordering()
            .move_to(9999, 1, OrderingStrategy::Optimistic)
            .await,
        Err(OrderError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_remove_compacts_partition() {
    let engine = setup_engine();
    let rows = insert_gallery_rows(&engine.images, property(1), 4).await;
    let ids: Vec<i64> = rows.iter().map(|r| r.image_id).collect();
    engine
        .ordering()
        .assign_batch(gallery(), &ids, OrderingStrategy::Optimistic)
        .await
        .unwrap();

    let remaining = engine
        .ordering()
        .remove_and_compact(ids[1], OrderingStrategy::Optimistic)
        .await
        .unwrap();

    assert_eq!(remaining.len(), 3);
    assert_eq!(remaining[&ids[0]], 1);
    assert_eq!(remaining[&ids[2]], 2);
    assert_eq!(remaining[&ids[3]], 3);

    let removed = engine.images.get(ids[1]).await.unwrap().unwrap();
    assert!(!removed.is_active);
    assert_eq!(removed.display_order, None);
}

#[tokio::test]
async fn test_removing_cover_promotes_next() {
    let engine = setup_engine();
    let rows = insert_gallery_rows(&engine.images, property(1), 2).await;
    let ids: Vec<i64> = rows.iter().map(|r| r.image_id).collect();
    engine
        .ordering()
        .assign_batch(gallery(), &ids, OrderingStrategy::Optimistic)
        .await
        .unwrap();

    engine
        .ordering()
        .remove_and_compact(ids[0], OrderingStrategy::Optimistic)
        .await
        .unwrap();
    let cover = engine.entities.cover_image(&gallery()).await.unwrap().unwrap();
    assert_eq!(cover.image_id, ids[1]);

    engine
        .ordering()
        .remove_and_compact(ids[1], OrderingStrategy::Optimistic)
        .await
        .unwrap();
    assert_eq!(engine.entities.cover_image(&gallery()).await.unwrap(), None);
}

#[tokio::test]
async fn test_conflicts_are_retried() {
    let engine = setup_engine();
    let rows = insert_gallery_rows(&engine.images, property(1), 2).await;
    let ids: Vec<i64> = rows.iter().map(|r| r.image_id).collect();
    engine.images.inject_conflicts(2);

    let map = engine
        .ordering()
        .assign_batch(gallery(), &ids, OrderingStrategy::Optimistic)
        .await
        .unwrap();

    assert_eq!(positions(&map), vec![1, 2]);
    assert_eq!(engine.images.rows_written(), 2);
}

#[tokio::test]
async fn test_retries_give_up_after_max_attempts() {
    let engine = setup_engine_with_retries(3);
    let rows = insert_gallery_rows(&engine.images, property(1), 2).await;
    let ids: Vec<i64> = rows.iter().map(|r| r.image_id).collect();
    engine.images.inject_conflicts(100);

    let result = engine
        .ordering()
        .assign_batch(gallery(), &ids, OrderingStrategy::Optimistic)
        .await;

    assert!(matches!(
        result,
        Err(OrderError::ConflictRetriesExhausted { attempts: 3, .. })
    ));
    assert_eq!(engine.images.rows_written(), 0);
    let stored = engine.images.load_partition(&gallery()).await.unwrap();
    assert!(stored.iter().all(|r| r.display_order.is_none()));
}

#[tokio::test]
async fn test_pessimistic_ignores_token_conflicts() {
    let engine = setup_engine_with_retries(1);
    let rows = insert_gallery_rows(&engine.images, property(1), 2).await;
    let ids: Vec<i64> = rows.iter().map(|r| r.image_id).collect();
    engine.images.inject_conflicts(100);

    let map = engine
        .ordering()
        .assign_batch(gallery(), &ids, OrderingStrategy::Pessimistic)
        .await
        .unwrap();
    assert_eq!(positions(&map), vec![1, 2]);
}

async fn concurrent_assigns(strategy: OrderingStrategy, order_attempts: u32) {
    let engine = Arc::new(setup_engine_with_retries(order_attempts));
    let rows = insert_gallery_rows(&engine.images, property(1), 12).await;

    let mut tasks = Vec::new();
    for chunk in rows.chunks(3) {
        let engine = engine.clone();
        let ids: Vec<i64> = chunk.iter().map(|r| r.image_id).collect();
        tasks.push(tokio::spawn(async move {
            engine
                .ordering()
                .assign_batch(gallery(), &ids, strategy)
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let map = engine.ordering().order_map(gallery()).await.unwrap();
    assert_eq!(positions(&map), (1..=12).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_pessimistic_assigns_stay_dense() {
    concurrent_assigns(OrderingStrategy::Pessimistic, 1).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_optimistic_assigns_stay_dense() {
    concurrent_assigns(OrderingStrategy::Optimistic, 50).await;
}

#[tokio::test]
async fn test_next_order_follows_max() {
    let engine = setup_engine();
    assert_eq!(engine.ordering().next_order(gallery()).await.unwrap(), 1);

    let rows = insert_gallery_rows(&engine.images, property(1), 3).await;
    let ids: Vec<i64> = rows.iter().map(|r| r.image_id).collect();
    engine
        .ordering()
        .assign_batch(gallery(), &ids, OrderingStrategy::Optimistic)
        .await
        .unwrap();

    assert_eq!(engine.ordering().next_order(gallery()).await.unwrap(), 4);
}

#[tokio::test]
async fn test_assign_skips_already_positioned() {
    let engine = setup_engine();
    let rows = insert_gallery_rows(&engine.images, property(1), 3).await;
    let ids: Vec<i64> = rows.iter().map(|r| r.image_id).collect();
    engine
        .ordering()
        .assign_batch(gallery(), &ids[..2], OrderingStrategy::Optimistic)
        .await
        .unwrap();

    let map = engine
        .ordering()
        .assign_batch(gallery(), &ids, OrderingStrategy::Optimistic)
        .await
        .unwrap();

    assert_eq!(map[&ids[0]], 1);
    assert_eq!(map[&ids[1]], 2);
    assert_eq!(map[&ids[2]], 3);
}

#[tokio::test]
async fn test_reorder_closes_gaps() {
    let engine = setup_engine();
    let rows = insert_gallery_rows(&engine.images, property(1), 3).await;
    let ids: Vec<i64> = rows.iter().map(|r| r.image_id).collect();
    engine
        .images
        .apply_updates(
            &gallery(),
            &[
                OrderUpdate::position(ids[0], 7),
                OrderUpdate::position(ids[1], 2),
                OrderUpdate::position(ids[2], 4),
            ],
            &WriteGuard::Unchecked,
        )
        .await
        .unwrap();

    let map = engine
        .ordering()
        .reorder(gallery(), OrderingStrategy::Optimistic)
        .await
        .unwrap();

    assert_eq!(map[&ids[1]], 1);
    assert_eq!(map[&ids[2]], 2);
    assert_eq!(map[&ids[0]], 3);
    let cover = engine.entities.cover_image(&gallery()).await.unwrap().unwrap();
    assert_eq!(cover.image_id, ids[1]);
}

#[tokio::test]
async fn test_unlocked_strategy_still_applies() {
    let engine = setup_engine();
    let rows = insert_gallery_rows(&engine.images, property(1), 2).await;
    let ids: Vec<i64> = rows.iter().map(|r| r.image_id).collect();
    engine.images.inject_conflicts(5);

    let map = engine
        .ordering()
        .assign_batch(gallery(), &ids, OrderingStrategy::Unlocked)
        .await
        .unwrap();
    assert_eq!(positions(&map), vec![1, 2]);
}

#[tokio::test]
async fn test_set_primary_moves_to_front_and_sets_cover() {
    let engine = setup_engine();
    let rows = insert_gallery_rows(&engine.images, property(1), 3).await;
    let ids: Vec<i64> = rows.iter().map(|r| r.image_id).collect();
    engine
        .ordering()
        .assign_batch(gallery(), &ids, OrderingStrategy::Optimistic)
        .await
        .unwrap();

    let map = engine
        .ordering()
        .set_primary(ids[2], OrderingStrategy::Optimistic)
        .await
        .unwrap();

    assert_eq!(map[&ids[2]], 1);
    assert_eq!(map[&ids[0]], 2);
    assert_eq!(map[&ids[1]], 3);
    let cover = engine.entities.cover_image(&gallery()).await.unwrap().unwrap();
    assert_eq!(cover.image_id, ids[2]);
}

#[tokio::test]
async fn test_partitions_are_independent() {
    let engine = setup_engine();
    let first = insert_gallery_rows(&engine.images, property(1), 2).await;
    let second = insert_gallery_rows(&engine.images, property(2), 2).await;
    let other = Partition::new(property(2), ImageCategory::Gallery);

    engine
        .ordering()
        .assign_batch(
            gallery(),
            &first.iter().map(|r| r.image_id).collect::<Vec<_>>(),
            OrderingStrategy::Optimistic,
        )
        .await
        .unwrap();
    let map = engine
        .ordering()
        .assign_batch(
            other,
            &second.iter().map(|r| r.image_id).collect::<Vec<_>>(),
            OrderingStrategy::Optimistic,
        )
        .await
        .unwrap();

    assert_eq!(positions(&map), vec![1, 2]);
    assert_eq!(
        engine.entities.cover_image(&other).await.unwrap().unwrap().image_id,
        second[0].image_id
    );
}
