use super::model::{format_due_at, AttachmentRow, EventRow, RecordRow, TermRow};
use crate::delayed::PendingInvocation;
use crate::model::{BatchCursor, RecordStatus, Taxonomy, Term};
use crate::repository::{AttachmentMeta, NewRecord, RecordQuery, RecordUpdate};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::instrument;

pub type Pool = SqlitePool;

const RECORD_COLUMNS: &str =
    "id, kind, title, body, status, published_at, published_at_gmt";

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// ---- records ----

#[instrument(skip_all)]
pub async fn insert_record(pool: &Pool, record: &NewRecord) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO records (kind, title, body, status, published_at, published_at_gmt) \
         VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(&record.kind)
    .bind(&record.title)
    .bind(&record.body)
    .bind(record.status.as_str())
    .bind(record.published.local_string())
    .bind(record.published.utc_string())
    .fetch_one(pool)
    .await?;
    Ok(id)
}

#[instrument(skip_all)]
pub async fn update_record(pool: &Pool, id: i64, update: &RecordUpdate) -> Result<()> {
    let res = sqlx::query(
        "UPDATE records SET body = ?, status = ?, published_at = ?, published_at_gmt = ?, \
         updated_at = CURRENT_TIMESTAMP WHERE id = ?",
    )
    .bind(&update.body)
    .bind(update.status.as_str())
    .bind(update.published.local_string())
    .bind(update.published.utc_string())
    .bind(id)
    .execute(pool)
    .await?;
    if res.rows_affected() == 0 {
        return Err(anyhow!("record {} not found", id));
    }
    Ok(())
}

#[instrument(skip_all)]
pub async fn set_record_status(pool: &Pool, id: i64, status: RecordStatus) -> Result<()> {
    let res = sqlx::query(
        "UPDATE records SET status = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
    )
    .bind(status.as_str())
    .bind(id)
    .execute(pool)
    .await?;
    if res.rows_affected() == 0 {
        return Err(anyhow!("record {} not found", id));
    }
    Ok(())
}

pub async fn fetch_record(pool: &Pool, id: i64) -> Result<Option<RecordRow>> {
    let row = sqlx::query_as::<_, RecordRow>(&format!(
        "SELECT {} FROM records WHERE id = ?",
        RECORD_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Lowest-id record of `kind` with exactly this title.
#[instrument(skip_all)]
pub async fn find_record_by_title(pool: &Pool, kind: &str, title: &str) -> Result<Option<RecordRow>> {
    let row = sqlx::query_as::<_, RecordRow>(&format!(
        "SELECT {} FROM records WHERE kind = ? AND title = ? ORDER BY id ASC LIMIT 1",
        RECORD_COLUMNS
    ))
    .bind(kind)
    .bind(title)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

#[instrument(skip_all)]
pub async fn list_records(pool: &Pool, query: &RecordQuery) -> Result<Vec<RecordRow>> {
    let rows = sqlx::query_as::<_, RecordRow>(&format!(
        "SELECT {} FROM records WHERE kind = ? AND status = ? \
         ORDER BY published_at DESC, id DESC LIMIT ? OFFSET ?",
        RECORD_COLUMNS
    ))
    .bind(&query.kind)
    .bind(query.status.as_str())
    .bind(i64::from(query.limit))
    .bind(i64::from(query.offset))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[instrument(skip_all)]
pub async fn count_records(pool: &Pool, kind: &str, status: RecordStatus) -> Result<i64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE kind = ? AND status = ?")
            .bind(kind)
            .bind(status.as_str())
            .fetch_one(pool)
            .await?;
    Ok(count)
}

// ---- meta ----

pub async fn get_meta(pool: &Pool, record_id: i64, key: &str) -> Result<Option<String>> {
    let value = sqlx::query_scalar::<_, String>(
        "SELECT meta_value FROM record_meta WHERE record_id = ? AND meta_key = ?",
    )
    .bind(record_id)
    .bind(key)
    .fetch_optional(pool)
    .await?;
    Ok(value)
}

pub async fn set_meta(pool: &Pool, record_id: i64, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO record_meta (record_id, meta_key, meta_value) VALUES (?, ?, ?) \
         ON CONFLICT(record_id, meta_key) DO UPDATE SET meta_value = excluded.meta_value",
    )
    .bind(record_id)
    .bind(key)
    .bind(value)
    .execute(pool)
    .await
    .context("failed to persist record meta")?;
    Ok(())
}

pub async fn delete_meta(pool: &Pool, record_id: i64, key: &str) -> Result<()> {
    sqlx::query("DELETE FROM record_meta WHERE record_id = ? AND meta_key = ?")
        .bind(record_id)
        .bind(key)
        .execute(pool)
        .await
        .context("failed to delete record meta")?;
    Ok(())
}

// ---- terms ----

pub async fn term_by_slug(pool: &Pool, taxonomy: Taxonomy, slug: &str) -> Result<Option<Term>> {
    let row = sqlx::query_as::<_, TermRow>(
        "SELECT id, taxonomy, name, slug FROM terms WHERE taxonomy = ? AND slug = ?",
    )
    .bind(taxonomy.as_str())
    .bind(slug)
    .fetch_optional(pool)
    .await?;
    row.map(TermRow::into_term).transpose()
}

#[instrument(skip_all)]
pub async fn insert_term(pool: &Pool, taxonomy: Taxonomy, name: &str, slug: &str) -> Result<Term> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO terms (taxonomy, name, slug) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(taxonomy.as_str())
    .bind(name)
    .bind(slug)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to insert term {}", slug))?;
    Ok(Term {
        id,
        taxonomy,
        name: name.to_string(),
        slug: slug.to_string(),
    })
}

pub async fn record_term_ids(pool: &Pool, record_id: i64, taxonomy: Taxonomy) -> Result<Vec<i64>> {
    let ids: Vec<i64> = sqlx::query_scalar(
        "SELECT rt.term_id FROM record_terms rt JOIN terms t ON t.id = rt.term_id \
         WHERE rt.record_id = ? AND t.taxonomy = ? ORDER BY rt.position ASC",
    )
    .bind(record_id)
    .bind(taxonomy.as_str())
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

#[instrument(skip_all)]
pub async fn replace_record_terms(
    pool: &Pool,
    record_id: i64,
    taxonomy: Taxonomy,
    term_ids: &[i64],
) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        "DELETE FROM record_terms WHERE record_id = ? \
         AND term_id IN (SELECT id FROM terms WHERE taxonomy = ?)",
    )
    .bind(record_id)
    .bind(taxonomy.as_str())
    .execute(&mut *tx)
    .await?;
    for (position, term_id) in term_ids.iter().enumerate() {
        sqlx::query(
            "INSERT OR IGNORE INTO record_terms (record_id, term_id, position) VALUES (?, ?, ?)",
        )
        .bind(record_id)
        .bind(term_id)
        .bind(position as i64)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

// ---- attachments ----

pub async fn upsert_attachment(pool: &Pool, id: i64, meta: &AttachmentMeta) -> Result<()> {
    sqlx::query(
        "INSERT INTO attachments (id, url, thumb_url, alt, width, height) VALUES (?, ?, ?, ?, ?, ?) \
         ON CONFLICT(id) DO UPDATE SET url = excluded.url, thumb_url = excluded.thumb_url, \
         alt = excluded.alt, width = excluded.width, height = excluded.height",
    )
    .bind(id)
    .bind(&meta.url)
    .bind(&meta.thumb_url)
    .bind(&meta.alt)
    .bind(meta.width.map(i64::from))
    .bind(meta.height.map(i64::from))
    .execute(pool)
    .await
    .with_context(|| format!("failed to persist attachment {}", id))?;
    Ok(())
}

pub async fn fetch_attachment(pool: &Pool, id: i64) -> Result<Option<AttachmentMeta>> {
    let row = sqlx::query_as::<_, AttachmentRow>(
        "SELECT url, thumb_url, alt, width, height FROM attachments WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(AttachmentMeta::from))
}

// ---- scheduled events ----

#[instrument(skip_all)]
pub async fn enqueue_event(
    pool: &Pool,
    hook: &str,
    args: BatchCursor,
    due_at: DateTime<Utc>,
) -> Result<PendingInvocation> {
    let encoded = serde_json::to_string(&args)?;
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO scheduled_events (hook, args, due_at) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(hook)
    .bind(&encoded)
    .bind(format_due_at(due_at))
    .fetch_one(pool)
    .await?;
    Ok(PendingInvocation {
        id,
        hook: hook.to_string(),
        args,
        due_at,
    })
}

pub async fn list_events(pool: &Pool) -> Result<Vec<PendingInvocation>> {
    let rows = sqlx::query_as::<_, EventRow>(
        "SELECT id, hook, args, due_at FROM scheduled_events ORDER BY due_at ASC, id ASC",
    )
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(EventRow::into_invocation).collect()
}

#[instrument(skip_all)]
pub async fn delete_events_for_hook(pool: &Pool, hook: &str) -> Result<u64> {
    let res = sqlx::query("DELETE FROM scheduled_events WHERE hook = ?")
        .bind(hook)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

/// Remove and return the events of `hook` due at or before `now`.
#[instrument(skip_all)]
pub async fn claim_due_events(
    pool: &Pool,
    hook: &str,
    now: DateTime<Utc>,
) -> Result<Vec<PendingInvocation>> {
    let mut tx = pool.begin().await?;
    let rows = sqlx::query_as::<_, EventRow>(
        "SELECT id, hook, args, due_at FROM scheduled_events \
         WHERE hook = ? AND due_at <= ? ORDER BY due_at ASC, id ASC",
    )
    .bind(hook)
    .bind(format_due_at(now))
    .fetch_all(&mut *tx)
    .await?;
    for row in &rows {
        sqlx::query("DELETE FROM scheduled_events WHERE id = ?")
            .bind(row.id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    rows.into_iter().map(EventRow::into_invocation).collect()
}
