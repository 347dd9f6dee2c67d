use marquee_core::models::NewImage;
use marquee_db::{Database, DatabaseConfig, SqliteImageStore};
use tempfile::TempDir;

/// Opens a fresh, migrated SQLite database in a temp directory.
///
/// The `TempDir` must be kept in scope for the test duration;
/// dropping it deletes the database file.
pub async fn setup_test_db() -> (SqliteImageStore, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let url = format!("sqlite://{}", dir.path().join("nested/marquee.db").display());
    let config = DatabaseConfig::new(url, 5).expect("Invalid test config");

    let db = Database::connect(&config)
        .await
        .expect("Failed to open database");
    db.migrate().await.expect("Failed to run migrations");

    (db.image_store(), dir)
}

pub fn new_image(venue_id: i64, url: &str, hash: &str) -> NewImage {
    NewImage {
        venue_id,
        source_url: url.to_string(),
        local_path: format!("images/club/{}.jpg", &hash[..hash.len().min(16)]),
        image_hash: hash.to_string(),
        event_name: Some("Late Show".into()),
        event_date: None,
    }
}
