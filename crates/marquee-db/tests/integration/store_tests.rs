use chrono::{Duration, Utc};
use marquee_core::models::{InsertOutcome, NewSyncRun, RunStatus};

use crate::integration::common::{new_image, setup_test_db};

fn run(venue_id: i64, status: RunStatus, found: u32, new: u32) -> NewSyncRun {
    let completed_at = Utc::now();
    NewSyncRun {
        venue_id,
        started_at: completed_at - Duration::seconds(5),
        completed_at,
        images_found: found,
        images_new: new,
        status,
        error_message: (status != RunStatus::Success).then(|| "selector gone".to_string()),
    }
}

#[tokio::test]
async fn ensure_venue_is_create_once() {
    let (store, _dir) = setup_test_db().await;

    let first = store
        .ensure_venue("Creek and the Cave", "https://www.creekandcave.com")
        .await
        .unwrap();
    let again = store
        .ensure_venue("Creek and the Cave", "https://www.creekandcave.com")
        .await
        .unwrap();

    assert_eq!(first.id, again.id);
    assert_eq!(first.last_scraped, None);
    assert_eq!(store.venue_summaries().await.unwrap().len(), 1);
}

#[tokio::test]
async fn ensure_venue_leaves_existing_row_untouched() {
    let (store, _dir) = setup_test_db().await;

    let first = store
        .ensure_venue("Creek and the Cave", "https://www.creekandcave.com")
        .await
        .unwrap();
    let again = store
        .ensure_venue("Creek and the Cave", "https://moved.example")
        .await
        .unwrap();

    assert_eq!(again.id, first.id);
    assert_eq!(again.url, "https://www.creekandcave.com");
    let summaries = store.venue_summaries().await.unwrap();
    assert_eq!(summaries[0].venue.url, "https://www.creekandcave.com");
}

#[tokio::test]
async fn insert_then_reinsert_reports_already_present() {
    let (store, _dir) = setup_test_db().await;
    let venue = store.ensure_venue("Club", "https://club.example").await.unwrap();
    let image = new_image(venue.id, "https://cdn.example.com/a.jpg", &"a".repeat(64));

    assert!(!store.is_known_source_url(&image.source_url).await.unwrap());
    let first = store.try_insert_image(&image).await.unwrap();
    assert!(matches!(first, InsertOutcome::Inserted(id) if id > 0));
    assert!(store.is_known_source_url(&image.source_url).await.unwrap());

    let second = store.try_insert_image(&image).await.unwrap();
    assert_eq!(second, InsertOutcome::AlreadyPresent);
    assert_eq!(store.count_images().await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_inserts_of_one_url_persist_exactly_one_row() {
    let (store, _dir) = setup_test_db().await;
    let venue = store.ensure_venue("Club", "https://club.example").await.unwrap();
    let image = new_image(venue.id, "https://cdn.example.com/race.jpg", &"b".repeat(64));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            let image = image.clone();
            tokio::spawn(async move { store.try_insert_image(&image).await })
        })
        .collect();

    let mut inserted = 0;
    let mut already = 0;
    for result in futures::future::join_all(handles).await {
        match result.unwrap().unwrap() {
            InsertOutcome::Inserted(_) => inserted += 1,
            InsertOutcome::AlreadyPresent => already += 1,
        }
    }

    assert_eq!(inserted, 1);
    assert_eq!(already, 7);
    assert_eq!(store.count_images().await.unwrap(), 1);
}

#[tokio::test]
async fn same_hash_under_two_urls_keeps_both_rows() {
    let (store, _dir) = setup_test_db().await;
    let venue = store.ensure_venue("Club", "https://club.example").await.unwrap();
    let hash = "c".repeat(64);

    for url in ["https://cdn.example.com/one.jpg", "https://mirror.example.com/one.jpg"] {
        let outcome = store
            .try_insert_image(&new_image(venue.id, url, &hash))
            .await
            .unwrap();
        assert!(matches!(outcome, InsertOutcome::Inserted(_)));
    }

    let rows = store.images_by_hash(&hash).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_ne!(rows[0].source_url, rows[1].source_url);
    assert_eq!(rows[0].event_name.as_deref(), Some("Late Show"));

    let shared = store.shared_hashes(10).await.unwrap();
    assert_eq!(shared.len(), 1);
    assert_eq!(shared[0].image_hash, hash);
    assert_eq!(shared[0].copies, 2);
}

#[tokio::test]
async fn finalize_success_and_partial_advance_last_scraped() {
    let (store, _dir) = setup_test_db().await;
    let venue = store.ensure_venue("Club", "https://club.example").await.unwrap();

    let partial = run(venue.id, RunStatus::Partial, 3, 3);
    let saved = store.finalize_run(&partial).await.unwrap();
    assert!(saved.id > 0);
    assert_eq!(saved.status, RunStatus::Partial);

    let venue = store.ensure_venue("Club", "https://club.example").await.unwrap();
    let last = venue.last_scraped.expect("partial run should advance last_scraped");
    assert_eq!(last.timestamp(), partial.completed_at.timestamp());
}

#[tokio::test]
async fn finalize_failed_leaves_last_scraped_untouched() {
    let (store, _dir) = setup_test_db().await;
    let venue = store.ensure_venue("Club", "https://club.example").await.unwrap();

    store
        .finalize_run(&run(venue.id, RunStatus::Failed, 0, 0))
        .await
        .unwrap();

    let venue = store.ensure_venue("Club", "https://club.example").await.unwrap();
    assert_eq!(venue.last_scraped, None);

    let history = store.recent_runs(10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].venue_name, "Club");
    assert_eq!(history[0].run.status, RunStatus::Failed);
    assert_eq!(history[0].run.error_message.as_deref(), Some("selector gone"));
}

#[tokio::test]
async fn rows_from_partial_run_survive_finalize() {
    let (store, _dir) = setup_test_db().await;
    let venue = store.ensure_venue("Club", "https://club.example").await.unwrap();

    for i in 0..3 {
        store
            .try_insert_image(&new_image(
                venue.id,
                &format!("https://cdn.example.com/{i}.jpg"),
                &format!("{i}").repeat(64),
            ))
            .await
            .unwrap();
    }
    store
        .finalize_run(&run(venue.id, RunStatus::Partial, 3, 3))
        .await
        .unwrap();

    assert_eq!(store.count_images().await.unwrap(), 3);
    let summaries = store.venue_summaries().await.unwrap();
    assert_eq!(summaries[0].image_count, 3);
}

#[tokio::test]
async fn recent_runs_are_newest_first_and_limited() {
    let (store, _dir) = setup_test_db().await;
    let a = store.ensure_venue("Alpha", "https://a.example").await.unwrap();
    let b = store.ensure_venue("Bravo", "https://b.example").await.unwrap();

    store.finalize_run(&run(a.id, RunStatus::Success, 4, 4)).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    store.finalize_run(&run(b.id, RunStatus::Success, 2, 0)).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    store.finalize_run(&run(a.id, RunStatus::Partial, 1, 1)).await.unwrap();

    let history = store.recent_runs(2).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].venue_name, "Alpha");
    assert_eq!(history[0].run.status, RunStatus::Partial);
    assert_eq!(history[1].venue_name, "Bravo");
    assert_eq!(history[1].run.images_found, 2);
}

#[tokio::test]
async fn health_check_passes_on_open_database() {
    let (store, _dir) = setup_test_db().await;
    store.health_check().await.unwrap();
}
