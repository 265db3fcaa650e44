//! Row models returned by repository queries.
//!
//! Rows keep the stored text forms; conversion into domain types happens
//! here so the SQL functions stay free of parsing.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};

use crate::delayed::PendingInvocation;
use crate::model::{PublishDate, RecordStatus, Taxonomy, Term, DATE_FORMAT};
use crate::repository::{AttachmentMeta, StoredRecord};

/// Format used for `scheduled_events.due_at`; sorts lexicographically.
pub const DUE_AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// GMT column value the legacy store writes for never-published records.
const ZERO_DATE: &str = "0000-00-00 00:00:00";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RecordRow {
    pub id: i64,
    pub kind: String,
    pub title: String,
    pub body: String,
    pub status: String,
    pub published_at: String,
    pub published_at_gmt: Option<String>,
}

impl RecordRow {
    /// Missing GMT dates are derived from the local date and `site_offset`.
    pub fn into_stored(self, site_offset: FixedOffset) -> Result<StoredRecord> {
        let status = RecordStatus::parse_status(&self.status)
            .ok_or_else(|| anyhow!("record {} has unknown status {}", self.id, self.status))?;
        let local = NaiveDateTime::parse_from_str(&self.published_at, DATE_FORMAT)
            .with_context(|| format!("record {} has invalid date", self.id))?;
        let published = match self
            .published_at_gmt
            .as_deref()
            .filter(|s| !s.is_empty() && *s != ZERO_DATE)
        {
            Some(gmt) => {
                let naive = NaiveDateTime::parse_from_str(gmt, DATE_FORMAT)
                    .with_context(|| format!("record {} has invalid GMT date", self.id))?;
                let utc = Utc.from_utc_datetime(&naive);
                PublishDate::new(local, utc)
            }
            None => PublishDate::from_local(local, site_offset),
        };
        Ok(StoredRecord {
            id: self.id,
            kind: self.kind,
            title: self.title,
            body: self.body,
            status,
            published,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TermRow {
    pub id: i64,
    pub taxonomy: String,
    pub name: String,
    pub slug: String,
}

impl TermRow {
    pub fn into_term(self) -> Result<Term> {
        let taxonomy = Taxonomy::parse_taxonomy(&self.taxonomy)
            .ok_or_else(|| anyhow!("term {} has unknown taxonomy {}", self.id, self.taxonomy))?;
        Ok(Term {
            id: self.id,
            taxonomy,
            name: self.name,
            slug: self.slug,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AttachmentRow {
    pub url: Option<String>,
    pub thumb_url: Option<String>,
    pub alt: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

impl From<AttachmentRow> for AttachmentMeta {
    fn from(row: AttachmentRow) -> Self {
        Self {
            url: row.url,
            thumb_url: row.thumb_url,
            alt: row.alt,
            width: row.width.and_then(|w| u32::try_from(w).ok()),
            height: row.height.and_then(|h| u32::try_from(h).ok()),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventRow {
    pub id: i64,
    pub hook: String,
    pub args: String,
    pub due_at: String,
}

impl EventRow {
    pub fn into_invocation(self) -> Result<PendingInvocation> {
        let args = serde_json::from_str(&self.args)
            .with_context(|| format!("event {} has invalid args", self.id))?;
        let due_at = DateTime::parse_from_rfc3339(&self.due_at)
            .with_context(|| format!("event {} has invalid due time", self.id))?
            .with_timezone(&Utc);
        Ok(PendingInvocation {
            id: self.id,
            hook: self.hook,
            args,
            due_at,
        })
    }
}

pub fn format_due_at(at: DateTime<Utc>) -> String {
    at.format(DUE_AT_FORMAT).to_string()
}
