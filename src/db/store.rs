//! SQLite-backed implementation of the storage seams.
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, Offset, Utc};

use super::repo::{self, Pool};
use crate::delayed::{DelayedExecution, PendingInvocation};
use crate::model::{BatchCursor, RecordStatus, Taxonomy, Term};
use crate::repository::{
    AttachmentMeta, ContentRepository, NewRecord, RecordQuery, RecordUpdate, StoredRecord,
    TaxonomyRepository,
};

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: Pool,
    site_offset: FixedOffset,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            site_offset: Utc.fix(),
        }
    }

    /// Offset used to derive UTC dates for rows stored without one.
    pub fn with_site_offset(mut self, offset: FixedOffset) -> Self {
        self.site_offset = offset;
        self
    }
}

#[async_trait]
impl ContentRepository for SqliteStore {
    async fn count_records(&self, kind: &str, status: RecordStatus) -> Result<i64> {
        repo::count_records(&self.pool, kind, status).await
    }

    async fn list_records(&self, query: &RecordQuery) -> Result<Vec<StoredRecord>> {
        repo::list_records(&self.pool, query)
            .await?
            .into_iter()
            .map(|row| row.into_stored(self.site_offset))
            .collect()
    }

    async fn get_record(&self, id: i64) -> Result<Option<StoredRecord>> {
        repo::fetch_record(&self.pool, id)
            .await?
            .map(|row| row.into_stored(self.site_offset))
            .transpose()
    }

    async fn find_by_title(&self, kind: &str, title: &str) -> Result<Option<StoredRecord>> {
        repo::find_record_by_title(&self.pool, kind, title)
            .await?
            .map(|row| row.into_stored(self.site_offset))
            .transpose()
    }

    async fn create_record(&self, record: &NewRecord) -> Result<i64> {
        repo::insert_record(&self.pool, record).await
    }

    async fn update_record(&self, id: i64, update: &RecordUpdate) -> Result<()> {
        repo::update_record(&self.pool, id, update).await
    }

    async fn set_status(&self, id: i64, status: RecordStatus) -> Result<()> {
        repo::set_record_status(&self.pool, id, status).await
    }

    async fn record_terms(&self, id: i64, taxonomy: Taxonomy) -> Result<Vec<i64>> {
        repo::record_term_ids(&self.pool, id, taxonomy).await
    }

    async fn set_record_terms(&self, id: i64, taxonomy: Taxonomy, term_ids: &[i64]) -> Result<()> {
        repo::replace_record_terms(&self.pool, id, taxonomy, term_ids).await
    }

    async fn get_meta(&self, id: i64, key: &str) -> Result<Option<String>> {
        repo::get_meta(&self.pool, id, key).await
    }

    async fn set_meta(&self, id: i64, key: &str, value: &str) -> Result<()> {
        repo::set_meta(&self.pool, id, key, value).await
    }

    async fn delete_meta(&self, id: i64, key: &str) -> Result<()> {
        repo::delete_meta(&self.pool, id, key).await
    }

    async fn attachment(&self, id: i64) -> Result<Option<AttachmentMeta>> {
        repo::fetch_attachment(&self.pool, id).await
    }
}

#[async_trait]
impl TaxonomyRepository for SqliteStore {
    async fn term_by_slug(&self, taxonomy: Taxonomy, slug: &str) -> Result<Option<Term>> {
        repo::term_by_slug(&self.pool, taxonomy, slug).await
    }

    async fn create_term(&self, taxonomy: Taxonomy, name: &str, slug: &str) -> Result<Term> {
        repo::insert_term(&self.pool, taxonomy, name, slug).await
    }
}

#[async_trait]
impl DelayedExecution for SqliteStore {
    async fn schedule_once(
        &self,
        delay: Duration,
        hook: &str,
        args: BatchCursor,
    ) -> Result<PendingInvocation> {
        repo::enqueue_event(&self.pool, hook, args, Utc::now() + delay).await
    }

    async fn pending(&self) -> Result<Vec<PendingInvocation>> {
        repo::list_events(&self.pool).await
    }

    async fn remove_pending(&self, hook: &str) -> Result<usize> {
        let removed = repo::delete_events_for_hook(&self.pool, hook).await?;
        Ok(usize::try_from(removed).unwrap_or(usize::MAX))
    }

    async fn take_due(&self, hook: &str, now: DateTime<Utc>) -> Result<Vec<PendingInvocation>> {
        repo::claim_due_events(&self.pool, hook, now).await
    }
}
