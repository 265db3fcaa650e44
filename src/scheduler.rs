use anyhow::{Context, Result};
use chrono::Duration;
use tracing::{info, instrument};

use crate::delayed::DelayedExecution;
use crate::model::{BatchCursor, RecordStatus};
use crate::repository::ContentRepository;

/// Settings shared by every scheduling decision of one migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleSettings {
    pub source_type: String,
    pub hook: String,
    pub delay: Duration,
}

/// Window for the next batch given the live remaining count, or `None` once
/// nothing remains.
pub fn next_cursor(remaining: i64, batch_size: u32) -> Option<BatchCursor> {
    if remaining <= 0 {
        return None;
    }
    let remaining = u32::try_from(remaining).unwrap_or(u32::MAX);
    Some(BatchCursor::new(
        batch_size,
        remaining.saturating_sub(batch_size),
    ))
}

pub struct BatchScheduler<'a> {
    content: &'a dyn ContentRepository,
    facility: &'a dyn DelayedExecution,
    settings: &'a ScheduleSettings,
}

impl<'a> BatchScheduler<'a> {
    pub fn new(
        content: &'a dyn ContentRepository,
        facility: &'a dyn DelayedExecution,
        settings: &'a ScheduleSettings,
    ) -> Self {
        Self {
            content,
            facility,
            settings,
        }
    }

    /// Published source records, as counted by the store. Conversion alone
    /// does not lower this number.
    pub async fn remaining(&self) -> Result<i64> {
        self.content
            .count_records(&self.settings.source_type, RecordStatus::Publish)
            .await
            .context("failed to count remaining source records")
    }

    /// Arrange the next batch step, or nothing when no source records remain.
    #[instrument(skip(self))]
    pub async fn schedule_next(&self, batch_size: u32) -> Result<Option<BatchCursor>> {
        let remaining = self.remaining().await?;
        let Some(cursor) = next_cursor(remaining, batch_size) else {
            info!(remaining, "no source records remain; nothing scheduled");
            return Ok(None);
        };
        let invocation = self
            .facility
            .schedule_once(self.settings.delay, &self.settings.hook, cursor)
            .await
            .context("failed to schedule next batch")?;
        info!(
            remaining,
            size = cursor.size,
            offset = cursor.offset,
            due_at = %invocation.due_at,
            "next batch scheduled"
        );
        Ok(Some(cursor))
    }

    /// Remove every pending batch step.
    #[instrument(skip(self))]
    pub async fn cancel_all(&self) -> Result<usize> {
        let removed = self
            .facility
            .remove_pending(&self.settings.hook)
            .await
            .context("failed to cancel pending batches")?;
        info!(removed, hook = %self.settings.hook, "pending batches cancelled");
        Ok(removed)
    }
}
