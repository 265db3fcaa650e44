//! Delayed-execution facility: one-shot invocations of a named hook after a
//! delay.
//!
//! The schedule is owned by the facility and only changed through this
//! trait. `MemorySchedule` keeps it as an ordered map from due time to the
//! invocations due then; `db::SqliteStore` keeps it in a table so it survives
//! restarts.
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

use crate::model::BatchCursor;

/// A scheduled, not yet started, invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInvocation {
    pub id: i64,
    pub hook: String,
    pub args: BatchCursor,
    pub due_at: DateTime<Utc>,
}

#[async_trait]
pub trait DelayedExecution: Send + Sync {
    /// Arrange one future invocation of `hook` with `args` after `delay`.
    async fn schedule_once(
        &self,
        delay: Duration,
        hook: &str,
        args: BatchCursor,
    ) -> Result<PendingInvocation>;

    /// Every pending invocation, earliest first.
    async fn pending(&self) -> Result<Vec<PendingInvocation>>;

    /// Drop every pending invocation of `hook`; returns how many were removed.
    async fn remove_pending(&self, hook: &str) -> Result<usize>;

    /// Remove and return the invocations of `hook` due at or before `now`,
    /// earliest first.
    async fn take_due(&self, hook: &str, now: DateTime<Utc>) -> Result<Vec<PendingInvocation>>;
}

#[derive(Debug, Default)]
struct ScheduleState {
    next_id: i64,
    slots: BTreeMap<DateTime<Utc>, Vec<PendingInvocation>>,
}

/// In-process facility.
#[derive(Debug, Default)]
pub struct MemorySchedule {
    state: Mutex<ScheduleState>,
}

impl MemorySchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same as [`DelayedExecution::schedule_once`] with an explicit start time.
    pub async fn schedule_at(
        &self,
        due_at: DateTime<Utc>,
        hook: &str,
        args: BatchCursor,
    ) -> PendingInvocation {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let invocation = PendingInvocation {
            id: state.next_id,
            hook: hook.to_string(),
            args,
            due_at,
        };
        state
            .slots
            .entry(due_at)
            .or_default()
            .push(invocation.clone());
        invocation
    }
}

#[async_trait]
impl DelayedExecution for MemorySchedule {
    async fn schedule_once(
        &self,
        delay: Duration,
        hook: &str,
        args: BatchCursor,
    ) -> Result<PendingInvocation> {
        Ok(self.schedule_at(Utc::now() + delay, hook, args).await)
    }

    async fn pending(&self) -> Result<Vec<PendingInvocation>> {
        let state = self.state.lock().await;
        Ok(state.slots.values().flatten().cloned().collect())
    }

    async fn remove_pending(&self, hook: &str) -> Result<usize> {
        let mut state = self.state.lock().await;
        let mut removed = 0;
        state.slots.retain(|_, invocations| {
            let before = invocations.len();
            invocations.retain(|inv| inv.hook != hook);
            removed += before - invocations.len();
            !invocations.is_empty()
        });
        Ok(removed)
    }

    async fn take_due(&self, hook: &str, now: DateTime<Utc>) -> Result<Vec<PendingInvocation>> {
        let mut state = self.state.lock().await;
        let mut due = Vec::new();
        state.slots.retain(|at, invocations| {
            if *at > now {
                return true;
            }
            let (taken, kept): (Vec<_>, Vec<_>) =
                invocations.drain(..).partition(|inv| inv.hook == hook);
            due.extend(taken);
            *invocations = kept;
            !invocations.is_empty()
        });
        Ok(due)
    }
}
