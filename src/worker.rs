use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{error, info, instrument};

use crate::migration::Migration;

/// Run every batch step due at `now`. Returns how many were started.
///
/// A failed step is logged and not retried; since it never re-armed, the
/// migration stays stalled until it is activated again.
#[instrument(skip_all)]
pub async fn process_due(migration: &Migration, now: DateTime<Utc>) -> Result<usize> {
    let due = migration.take_due(now).await?;
    let started = due.len();
    for invocation in due {
        match migration.run_batch(invocation.args).await {
            Ok(report) => {
                info!(
                    id = invocation.id,
                    created = report.created,
                    updated = report.updated,
                    skipped = report.skipped,
                    state = ?report.state,
                    "batch step succeeded"
                );
            }
            Err(err) => {
                error!(
                    ?err,
                    id = invocation.id,
                    size = invocation.args.size,
                    offset = invocation.args.offset,
                    "batch step failed; migration stalled"
                );
            }
        }
    }
    Ok(started)
}
