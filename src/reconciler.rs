use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::model::{Taxonomy, TargetRecordDraft};
use crate::repository::{ContentRepository, NewRecord, RecordUpdate};

/// Meta key holding a record's featured image attachment id.
pub const FEATURED_IMAGE_META: &str = "_thumbnail_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    Created(i64),
    Updated(i64),
}

impl Reconciled {
    pub fn record_id(&self) -> i64 {
        match self {
            Reconciled::Created(id) | Reconciled::Updated(id) => *id,
        }
    }
}

/// Writes drafts into the target type, matching existing records by title.
///
/// Writing happens in two separate steps: the record itself, then its
/// relations (featured image, categories, tags). Nothing spans the two, so a
/// failure between them leaves a record without relations until the next
/// run re-applies them.
pub struct DuplicateReconciler<'a> {
    content: &'a dyn ContentRepository,
    target_type: &'a str,
}

impl<'a> DuplicateReconciler<'a> {
    pub fn new(content: &'a dyn ContentRepository, target_type: &'a str) -> Self {
        Self {
            content,
            target_type,
        }
    }

    #[instrument(skip_all, fields(title = %draft.title))]
    pub async fn reconcile(&self, draft: &TargetRecordDraft) -> Result<Reconciled> {
        let outcome = self.write_record(draft).await?;
        self.apply_relations(outcome.record_id(), draft).await?;
        Ok(outcome)
    }

    /// First step: create the record, or overwrite body, status and dates of
    /// the first record whose title matches.
    pub async fn write_record(&self, draft: &TargetRecordDraft) -> Result<Reconciled> {
        let existing = self
            .content
            .find_by_title(self.target_type, &draft.title)
            .await
            .context("failed to look up target by title")?;

        if let Some(existing) = existing {
            let update = RecordUpdate {
                body: draft.body.clone(),
                status: draft.status,
                published: draft.published,
            };
            self.content
                .update_record(existing.id, &update)
                .await
                .with_context(|| format!("failed to update target record {}", existing.id))?;
            info!(record_id = existing.id, "updated existing target record");
            return Ok(Reconciled::Updated(existing.id));
        }

        let record = NewRecord {
            kind: self.target_type.to_string(),
            title: draft.title.clone(),
            body: draft.body.clone(),
            status: draft.status,
            published: draft.published,
        };
        let id = self
            .content
            .create_record(&record)
            .await
            .context("failed to create target record")?;
        info!(record_id = id, "created target record");
        Ok(Reconciled::Created(id))
    }

    /// Second step: replace featured image and category/tag sets, so an
    /// updated record carries exactly the source's relations.
    pub async fn apply_relations(&self, record_id: i64, draft: &TargetRecordDraft) -> Result<()> {
        match draft.featured_image {
            Some(image_id) => self
                .content
                .set_meta(record_id, FEATURED_IMAGE_META, &image_id.to_string())
                .await
                .with_context(|| format!("failed to set featured image on {}", record_id))?,
            None => self
                .content
                .delete_meta(record_id, FEATURED_IMAGE_META)
                .await
                .with_context(|| format!("failed to clear featured image on {}", record_id))?,
        }
        self.content
            .set_record_terms(record_id, Taxonomy::Category, &draft.categories)
            .await
            .with_context(|| format!("failed to set categories on {}", record_id))?;
        self.content
            .set_record_terms(record_id, Taxonomy::PostTag, &draft.tags)
            .await
            .with_context(|| format!("failed to set tags on {}", record_id))?;
        Ok(())
    }
}
