//! Migration driver: one batch step at a time, re-armed through the
//! delayed-execution facility until no source records remain.
//!
//! The driver holds no progress between steps. Everything a step needs is
//! either passed in (the cursor) or read back from the stores.
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::config::{Config, SourceDisposition, MAX_BATCH_DELAY_SECONDS};
use crate::converter::{CategoryTerms, Conversion, RecordConverter};
use crate::delayed::{DelayedExecution, PendingInvocation};
use crate::gallery_block::{RandomIds, UniqueIdSource};
use crate::model::{BatchCursor, RecordStatus, SourceRecord, Taxonomy, Term};
use crate::reconciler::{DuplicateReconciler, Reconciled, FEATURED_IMAGE_META};
use crate::repository::{ContentRepository, RecordQuery, StoredRecord, TaxonomyRepository};
use crate::scheduler::{BatchScheduler, ScheduleSettings};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationSettings {
    pub source_type: String,
    pub target_type: String,
    pub gallery_meta_key: String,
    pub batch_size: u32,
    pub hook: String,
    pub batch_delay: Duration,
    pub source_disposition: SourceDisposition,
    pub destination_name: String,
    pub destination_slug: String,
    pub default_category_slug: String,
}

impl MigrationSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            source_type: cfg.migration.source_type.clone(),
            target_type: cfg.migration.target_type.clone(),
            gallery_meta_key: cfg.migration.gallery_meta_key.clone(),
            batch_size: cfg.migration.batch_size,
            hook: cfg.migration.hook.clone(),
            batch_delay: Duration::seconds(
                cfg.migration.batch_delay_seconds.min(MAX_BATCH_DELAY_SECONDS) as i64,
            ),
            source_disposition: cfg.migration.source_disposition,
            destination_name: cfg.taxonomy.destination_name.clone(),
            destination_slug: cfg.taxonomy.destination_slug.clone(),
            default_category_slug: cfg.taxonomy.default_category_slug.clone(),
        }
    }

    fn schedule(&self) -> ScheduleSettings {
        ScheduleSettings {
            source_type: self.source_type.clone(),
            hook: self.hook.clone(),
            delay: self.batch_delay,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    /// No batch step pending.
    Idle,
    /// A future batch step is pending in the facility.
    Scheduled,
    /// A batch step is executing.
    Running,
}

/// Outcome of one batch step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub cursor: BatchCursor,
    pub fetched: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub next: Option<BatchCursor>,
    pub state: MigrationState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    pub state: MigrationState,
    pub remaining: i64,
    pub pending: Vec<PendingInvocation>,
}

pub struct Migration {
    content: Arc<dyn ContentRepository>,
    taxonomy: Arc<dyn TaxonomyRepository>,
    facility: Arc<dyn DelayedExecution>,
    ids: Arc<dyn UniqueIdSource>,
    settings: MigrationSettings,
    schedule: ScheduleSettings,
}

impl Migration {
    pub fn new(
        content: Arc<dyn ContentRepository>,
        taxonomy: Arc<dyn TaxonomyRepository>,
        facility: Arc<dyn DelayedExecution>,
        settings: MigrationSettings,
    ) -> Self {
        let schedule = settings.schedule();
        Self {
            content,
            taxonomy,
            facility,
            ids: Arc::new(RandomIds),
            settings,
            schedule,
        }
    }

    /// Replace the gallery block identifier source.
    pub fn with_unique_ids(mut self, ids: Arc<dyn UniqueIdSource>) -> Self {
        self.ids = ids;
        self
    }

    fn scheduler(&self) -> BatchScheduler<'_> {
        BatchScheduler::new(&*self.content, &*self.facility, &self.schedule)
    }

    /// Look up the destination category, creating it when absent.
    #[instrument(skip(self))]
    pub async fn ensure_destination_term(&self) -> Result<Term> {
        let slug = &self.settings.destination_slug;
        if let Some(term) = self
            .taxonomy
            .term_by_slug(Taxonomy::Category, slug)
            .await
            .context("failed to look up destination term")?
        {
            return Ok(term);
        }
        let term = self
            .taxonomy
            .create_term(Taxonomy::Category, &self.settings.destination_name, slug)
            .await
            .context("failed to create destination term")?;
        info!(term_id = term.id, slug = %term.slug, "destination term created");
        Ok(term)
    }

    async fn category_terms(&self) -> Result<CategoryTerms> {
        let destination = self.ensure_destination_term().await?;
        let default_category = self
            .taxonomy
            .term_by_slug(Taxonomy::Category, &self.settings.default_category_slug)
            .await
            .context("failed to look up default category")?
            .map(|t| t.id);
        Ok(CategoryTerms {
            destination: destination.id,
            default_category,
        })
    }

    /// Ensure the destination term, then schedule the first batch step.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<MigrationState> {
        self.ensure_destination_term().await?;
        let next = self.scheduler().schedule_next(self.settings.batch_size).await?;
        Ok(match next {
            Some(_) => MigrationState::Scheduled,
            None => MigrationState::Idle,
        })
    }

    /// Gather a stored record's gallery field, relations and featured image.
    pub async fn load_source(&self, record: StoredRecord) -> Result<SourceRecord> {
        let id = record.id;
        let gallery_payload = self
            .content
            .get_meta(id, &self.settings.gallery_meta_key)
            .await
            .with_context(|| format!("failed to read gallery data of {}", id))?;
        let featured_image = self
            .content
            .get_meta(id, FEATURED_IMAGE_META)
            .await
            .with_context(|| format!("failed to read featured image of {}", id))?
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|v| *v > 0);
        let categories = self
            .content
            .record_terms(id, Taxonomy::Category)
            .await
            .with_context(|| format!("failed to read categories of {}", id))?;
        let tags = self
            .content
            .record_terms(id, Taxonomy::PostTag)
            .await
            .with_context(|| format!("failed to read tags of {}", id))?;
        Ok(SourceRecord {
            id,
            title: record.title,
            body: record.body,
            published: record.published,
            gallery_payload,
            categories,
            tags,
            featured_image,
        })
    }

    /// Convert one window of source records, then re-arm.
    ///
    /// Records are handled strictly one after another. A store failure aborts
    /// the rest of the window and skips re-arming; there is no retry.
    #[instrument(skip(self), fields(size = cursor.size, offset = cursor.offset))]
    pub async fn run_batch(&self, cursor: BatchCursor) -> Result<BatchReport> {
        info!(state = ?MigrationState::Running, "batch started");
        let terms = self.category_terms().await?;
        let query = RecordQuery {
            kind: self.settings.source_type.clone(),
            status: RecordStatus::Publish,
            limit: cursor.size,
            offset: cursor.offset,
        };
        let records = self
            .content
            .list_records(&query)
            .await
            .context("failed to fetch source batch")?;

        let converter = RecordConverter::new(&*self.content, &*self.ids, terms);
        let reconciler = DuplicateReconciler::new(&*self.content, &self.settings.target_type);

        let mut report = BatchReport {
            cursor,
            fetched: records.len(),
            created: 0,
            updated: 0,
            skipped: 0,
            next: None,
            state: MigrationState::Idle,
        };

        for record in records {
            let source = self.load_source(record).await?;
            let draft = match converter.convert(&source).await? {
                Conversion::Draft(draft) => draft,
                Conversion::Skip(reason) => {
                    warn!(
                        source_id = source.id,
                        title = %source.title,
                        ?reason,
                        "not a gallery record; skipped"
                    );
                    report.skipped += 1;
                    self.retire_source(source.id).await?;
                    continue;
                }
            };
            match reconciler.reconcile(&draft).await? {
                Reconciled::Created(_) => report.created += 1,
                Reconciled::Updated(_) => report.updated += 1,
            }
            self.retire_source(source.id).await?;
        }

        info!(
            fetched = report.fetched,
            created = report.created,
            updated = report.updated,
            skipped = report.skipped,
            "batch finished"
        );

        report.next = self.scheduler().schedule_next(cursor.size).await?;
        report.state = match report.next {
            Some(_) => MigrationState::Scheduled,
            None => {
                info!("migration complete");
                MigrationState::Idle
            }
        };
        Ok(report)
    }

    /// Under `unpublish`, move a handled source (converted or skipped) to
    /// draft so it leaves the published window.
    async fn retire_source(&self, source_id: i64) -> Result<()> {
        if self.settings.source_disposition != SourceDisposition::Unpublish {
            return Ok(());
        }
        self.content
            .set_status(source_id, RecordStatus::Draft)
            .await
            .with_context(|| format!("failed to unpublish source {}", source_id))
    }

    /// Drop every pending batch step. A step already running is unaffected.
    pub async fn cancel_all(&self) -> Result<usize> {
        self.scheduler().cancel_all().await
    }

    /// Claim the batch steps due at `now`; they are gone from the facility once
    /// returned.
    pub async fn take_due(&self, now: DateTime<Utc>) -> Result<Vec<PendingInvocation>> {
        self.facility
            .take_due(&self.settings.hook, now)
            .await
            .context("failed to claim due batches")
    }

    pub async fn status(&self) -> Result<MigrationStatus> {
        let remaining = self.scheduler().remaining().await?;
        let pending: Vec<PendingInvocation> = self
            .facility
            .pending()
            .await
            .context("failed to list pending batches")?
            .into_iter()
            .filter(|p| p.hook == self.settings.hook)
            .collect();
        let state = if pending.is_empty() {
            MigrationState::Idle
        } else {
            MigrationState::Scheduled
        };
        Ok(MigrationStatus {
            state,
            remaining,
            pending,
        })
    }

    /// Activation hook. Clears any chain left from an earlier activation so
    /// only one batch step is ever pending, then starts.
    pub async fn on_activate(&self) -> Result<MigrationState> {
        let stale = self.cancel_all().await?;
        if stale > 0 {
            warn!(stale, "replaced batches left from an earlier activation");
        }
        self.start().await
    }

    /// Deactivation hook.
    pub async fn on_deactivate(&self) -> Result<usize> {
        self.cancel_all().await
    }
}
