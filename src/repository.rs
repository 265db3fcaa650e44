//! Narrow interfaces over the external content and taxonomy stores.
//!
//! The migration only ever talks to storage through these traits; `db::SqliteStore`
//! is the durable implementation, tests substitute recording fakes.
use anyhow::Result;
use async_trait::async_trait;

use crate::model::{PublishDate, RecordStatus, Taxonomy, Term};

/// A content record as the store keeps it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub id: i64,
    pub kind: String,
    pub title: String,
    pub body: String,
    pub status: RecordStatus,
    pub published: PublishDate,
}

/// Fields written when a record is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    pub kind: String,
    pub title: String,
    pub body: String,
    pub status: RecordStatus,
    pub published: PublishDate,
}

/// Fields overwritten when an existing record is updated in place. The title
/// is never rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordUpdate {
    pub body: String,
    pub status: RecordStatus,
    pub published: PublishDate,
}

/// Paged listing of records of one kind in one status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordQuery {
    pub kind: String,
    pub status: RecordStatus,
    pub limit: u32,
    pub offset: u32,
}

/// Raw attachment metadata; every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachmentMeta {
    pub url: Option<String>,
    pub thumb_url: Option<String>,
    pub alt: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[async_trait]
pub trait ContentRepository: Send + Sync {
    async fn count_records(&self, kind: &str, status: RecordStatus) -> Result<i64>;

    /// Records ordered newest publish date first, then by descending id.
    async fn list_records(&self, query: &RecordQuery) -> Result<Vec<StoredRecord>>;

    async fn get_record(&self, id: i64) -> Result<Option<StoredRecord>>;

    /// First record of `kind` whose title equals `title` exactly, in ascending
    /// id order.
    async fn find_by_title(&self, kind: &str, title: &str) -> Result<Option<StoredRecord>>;

    async fn create_record(&self, record: &NewRecord) -> Result<i64>;

    async fn update_record(&self, id: i64, update: &RecordUpdate) -> Result<()>;

    async fn set_status(&self, id: i64, status: RecordStatus) -> Result<()>;

    async fn record_terms(&self, id: i64, taxonomy: Taxonomy) -> Result<Vec<i64>>;

    /// Replace the record's terms in `taxonomy` with `term_ids`, order kept.
    async fn set_record_terms(&self, id: i64, taxonomy: Taxonomy, term_ids: &[i64]) -> Result<()>;

    async fn get_meta(&self, id: i64, key: &str) -> Result<Option<String>>;

    async fn set_meta(&self, id: i64, key: &str, value: &str) -> Result<()>;

    /// Remove `key` from the record; absent keys are not an error.
    async fn delete_meta(&self, id: i64, key: &str) -> Result<()>;

    async fn attachment(&self, id: i64) -> Result<Option<AttachmentMeta>>;
}

#[async_trait]
pub trait TaxonomyRepository: Send + Sync {
    async fn term_by_slug(&self, taxonomy: Taxonomy, slug: &str) -> Result<Option<Term>>;

    async fn create_term(&self, taxonomy: Taxonomy, name: &str, slug: &str) -> Result<Term>;
}
