use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime, TimeZone, Utc};
use gallery_migrator::config::{self, SourceDisposition};
use gallery_migrator::db::{repo, SqliteStore};
use gallery_migrator::delayed::MemorySchedule;
use gallery_migrator::migration::{Migration, MigrationSettings, MigrationState};
use gallery_migrator::model::{BatchCursor, PublishDate, RecordStatus, Taxonomy, DATE_FORMAT};
use gallery_migrator::repository::{
    AttachmentMeta, ContentRepository, NewRecord, RecordQuery, RecordUpdate, StoredRecord,
};
use gallery_migrator::worker;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::Mutex;

async fn setup_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

fn settings(disposition: SourceDisposition) -> MigrationSettings {
    let cfg = config::parse(config::example()).unwrap();
    let mut settings = MigrationSettings::from_config(&cfg);
    settings.batch_delay = Duration::zero();
    settings.source_disposition = disposition;
    settings
}

async fn seed_source(pool: &SqlitePool, title: &str, published: &str) -> i64 {
    let local = NaiveDateTime::parse_from_str(published, DATE_FORMAT).unwrap();
    let id = repo::insert_record(
        pool,
        &NewRecord {
            kind: "gallery".into(),
            title: title.into(),
            body: String::new(),
            status: RecordStatus::Publish,
            published: PublishDate::new(local, Utc.from_utc_datetime(&local)),
        },
    )
    .await
    .unwrap();
    repo::set_meta(pool, id, "_post_image_gallery", "a:0:{}")
        .await
        .unwrap();
    id
}

/// Delegates to the SQLite store but refuses to create records once
/// `creates_allowed` reaches zero. Every created title is recorded.
#[derive(Clone)]
struct FailingContent {
    inner: Arc<SqliteStore>,
    creates_allowed: Arc<Mutex<usize>>,
    created: Arc<Mutex<Vec<String>>>,
}

impl FailingContent {
    fn new(inner: Arc<SqliteStore>, creates_allowed: usize) -> Self {
        Self {
            inner,
            creates_allowed: Arc::new(Mutex::new(creates_allowed)),
            created: Arc::new(Mutex::new(Vec::new())),
        }
    }

    async fn created(&self) -> Vec<String> {
        self.created.lock().await.clone()
    }
}

#[async_trait]
impl ContentRepository for FailingContent {
    async fn count_records(&self, kind: &str, status: RecordStatus) -> Result<i64> {
        self.inner.count_records(kind, status).await
    }

    async fn list_records(&self, query: &RecordQuery) -> Result<Vec<StoredRecord>> {
        self.inner.list_records(query).await
    }

    async fn get_record(&self, id: i64) -> Result<Option<StoredRecord>> {
        self.inner.get_record(id).await
    }

    async fn find_by_title(&self, kind: &str, title: &str) -> Result<Option<StoredRecord>> {
        self.inner.find_by_title(kind, title).await
    }

    async fn create_record(&self, record: &NewRecord) -> Result<i64> {
        let mut allowed = self.creates_allowed.lock().await;
        if *allowed == 0 {
            return Err(anyhow!("store unavailable"));
        }
        *allowed -= 1;
        self.created.lock().await.push(record.title.clone());
        self.inner.create_record(record).await
    }

    async fn update_record(&self, id: i64, update: &RecordUpdate) -> Result<()> {
        self.inner.update_record(id, update).await
    }

    async fn set_status(&self, id: i64, status: RecordStatus) -> Result<()> {
        self.inner.set_status(id, status).await
    }

    async fn record_terms(&self, id: i64, taxonomy: Taxonomy) -> Result<Vec<i64>> {
        self.inner.record_terms(id, taxonomy).await
    }

    async fn set_record_terms(&self, id: i64, taxonomy: Taxonomy, term_ids: &[i64]) -> Result<()> {
        self.inner.set_record_terms(id, taxonomy, term_ids).await
    }

    async fn get_meta(&self, id: i64, key: &str) -> Result<Option<String>> {
        self.inner.get_meta(id, key).await
    }

    async fn set_meta(&self, id: i64, key: &str, value: &str) -> Result<()> {
        self.inner.set_meta(id, key, value).await
    }

    async fn delete_meta(&self, id: i64, key: &str) -> Result<()> {
        self.inner.delete_meta(id, key).await
    }

    async fn attachment(&self, id: i64) -> Result<Option<AttachmentMeta>> {
        self.inner.attachment(id).await
    }
}

#[tokio::test]
async fn write_failure_aborts_batch_without_rearming() {
    let pool = setup_pool().await;
    seed_source(&pool, "Older", "2020-01-01 10:00:00").await;
    seed_source(&pool, "Newer", "2020-01-02 10:00:00").await;

    let store = Arc::new(SqliteStore::new(pool.clone()));
    let content = FailingContent::new(store.clone(), 1);
    let m = Migration::new(
        Arc::new(content.clone()),
        store.clone(),
        store.clone(),
        settings(SourceDisposition::Unpublish),
    );

    let err = m.run_batch(BatchCursor::new(30, 0)).await.unwrap_err();
    assert!(format!("{:#}", err).contains("store unavailable"));

    // Newest first: the first record landed, the second never did.
    assert_eq!(content.created().await, vec!["Newer".to_string()]);
    assert!(store.find_by_title("post", "Older").await.unwrap().is_none());

    let status = m.status().await.unwrap();
    assert!(status.pending.is_empty());
    assert_eq!(status.state, MigrationState::Idle);
    assert_eq!(status.remaining, 1);
}

#[tokio::test]
async fn worker_runs_due_steps_and_stalls_on_failure() {
    let pool = setup_pool().await;
    seed_source(&pool, "Only", "2020-01-01 10:00:00").await;

    let store = Arc::new(SqliteStore::new(pool.clone()));
    let content = FailingContent::new(store.clone(), 0);
    let schedule = Arc::new(MemorySchedule::new());
    let m = Migration::new(
        Arc::new(content.clone()),
        store.clone(),
        schedule.clone(),
        settings(SourceDisposition::Unpublish),
    );

    assert_eq!(m.start().await.unwrap(), MigrationState::Scheduled);
    let later = Utc::now() + Duration::seconds(1);
    assert_eq!(worker::process_due(&m, later).await.unwrap(), 1);

    // The failed step was claimed and nothing replaced it.
    assert!(m.status().await.unwrap().pending.is_empty());
    assert_eq!(worker::process_due(&m, later).await.unwrap(), 0);
    assert!(content.created().await.is_empty());
}

#[tokio::test]
async fn worker_drives_chain_to_completion() {
    let pool = setup_pool().await;
    for day in 1..=3 {
        seed_source(&pool, &format!("Day {}", day), &format!("2020-01-0{} 10:00:00", day)).await;
    }

    let store = Arc::new(SqliteStore::new(pool.clone()));
    let mut settings = settings(SourceDisposition::Unpublish);
    settings.batch_size = 2;
    let m = Migration::new(store.clone(), store.clone(), store.clone(), settings);

    m.on_activate().await.unwrap();
    let mut started = 0;
    for _ in 0..5 {
        let now = Utc::now() + Duration::seconds(1);
        match worker::process_due(&m, now).await.unwrap() {
            0 => break,
            n => started += n,
        }
    }
    assert_eq!(started, 2);
    assert_eq!(store.count_records("post", RecordStatus::Publish).await.unwrap(), 3);
    assert_eq!(store.count_records("gallery", RecordStatus::Draft).await.unwrap(), 3);
}
