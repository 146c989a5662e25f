//! Database layer: migrations, plan books, outbox and audit log.
//!
//! Writes that belong to one request take a `&mut SqliteConnection` so the
//! caller can run them inside a single transaction.

use rwa_protocol::{Error as ProtocolError, Outbound, PlanBook, ProtocolEvent};
use sqlx::{sqlite::SqlitePoolOptions, SqliteConnection, SqlitePool};
use tracing::info;

use crate::errors::Result;
use crate::events::{EventRecord, EventRow, OutboxRecord};

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };
    // Create the database file on first start.
    let url = if url.contains(":memory:") || url.contains("mode=") {
        url
    } else if url.contains('?') {
        format!("{url}&mode=rwc")
    } else {
        format!("{url}?mode=rwc")
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

/// Single-connection in-memory database for tests.
#[cfg(test)]
pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

pub(crate) fn to_i64(value: u64) -> Result<i64> {
    Ok(i64::try_from(value).map_err(|_| ProtocolError::Overflow)?)
}

// ─────────────────────────────────────────────────────────
// Plan books
// ─────────────────────────────────────────────────────────

/// Allocate the next plan id. Ids start at 1 and are never reused once the
/// surrounding transaction commits.
pub async fn next_plan_id(conn: &mut SqliteConnection) -> Result<u64> {
    sqlx::query("UPDATE plan_sequence SET last_plan_id = last_plan_id + 1 WHERE id = 1")
        .execute(&mut *conn)
        .await?;
    let (id,): (i64,) = sqlx::query_as("SELECT last_plan_id FROM plan_sequence WHERE id = 1")
        .fetch_one(&mut *conn)
        .await?;
    Ok(u64::try_from(id).map_err(|_| ProtocolError::Overflow)?)
}

pub async fn load_book(conn: &mut SqliteConnection, plan_id: u64) -> Result<Option<PlanBook>> {
    let row: Option<(String,)> = sqlx::query_as("SELECT book FROM plan_books WHERE plan_id = ?1")
        .bind(to_i64(plan_id)?)
        .fetch_optional(&mut *conn)
        .await?;
    match row {
        Some((json,)) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

pub async fn save_book(conn: &mut SqliteConnection, book: &PlanBook, now: u64) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO plan_books (plan_id, status, book, updated_at)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT (plan_id) DO UPDATE
        SET status = excluded.status, book = excluded.book, updated_at = excluded.updated_at
        "#,
    )
    .bind(to_i64(book.plan_id())?)
    .bind(book.plan.status.as_str())
    .bind(serde_json::to_string(book)?)
    .bind(to_i64(now)?)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Outbox
// ─────────────────────────────────────────────────────────

/// Queue outbound instructions in the order the step produced them.
pub async fn insert_outbox(
    conn: &mut SqliteConnection,
    plan_id: Option<u64>,
    outbound: &[Outbound],
    now: u64,
) -> Result<usize> {
    let plan_id = plan_id.map(to_i64).transpose()?;
    for item in outbound {
        sqlx::query(
            r#"
            INSERT INTO outbox (plan_id, kind, payload, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(plan_id)
        .bind(item.kind())
        .bind(serde_json::to_string(item)?)
        .bind(to_i64(now)?)
        .execute(&mut *conn)
        .await?;
    }
    Ok(outbound.len())
}

/// Oldest undelivered rows first.
pub async fn pending_outbox(pool: &SqlitePool, limit: u32) -> Result<Vec<OutboxRecord>> {
    let rows = sqlx::query_as::<_, OutboxRecord>(
        r#"
        SELECT id, plan_id, kind, payload, attempts, last_error
        FROM   outbox
        WHERE  delivered = 0
        ORDER  BY id ASC
        LIMIT  ?1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn mark_delivered(pool: &SqlitePool, id: i64, now: u64) -> Result<()> {
    sqlx::query(
        "UPDATE outbox SET delivered = 1, attempts = attempts + 1, last_error = NULL, delivered_at = ?2 WHERE id = ?1",
    )
    .bind(id)
    .bind(to_i64(now)?)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn record_failure(pool: &SqlitePool, id: i64, error: &str) -> Result<()> {
    sqlx::query("UPDATE outbox SET attempts = attempts + 1, last_error = ?2 WHERE id = ?1")
        .bind(id)
        .bind(error)
        .execute(pool)
        .await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────

pub async fn insert_events(conn: &mut SqliteConnection, events: &[ProtocolEvent], now: u64) -> Result<usize> {
    for ev in events {
        sqlx::query(
            r#"
            INSERT INTO events (event_type, plan_id, payload, timestamp)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(ev.name())
        .bind(ev.plan_id().map(to_i64).transpose()?)
        .bind(serde_json::to_string(ev)?)
        .bind(to_i64(now)?)
        .execute(&mut *conn)
        .await?;
    }
    Ok(events.len())
}

/// Fetch all events for a given plan, in commit order.
pub async fn get_events_for_plan(pool: &SqlitePool, plan_id: u64) -> Result<Vec<EventRecord>> {
    let rows = sqlx::query_as::<_, EventRow>(
        r#"
        SELECT id, event_type, plan_id, payload, timestamp, created_at
        FROM   events
        WHERE  plan_id = ?1
        ORDER  BY id ASC
        "#,
    )
    .bind(to_i64(plan_id)?)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(EventRecord::try_from).collect()
}

/// Fetch all events, in commit order.
pub async fn get_all_events(pool: &SqlitePool) -> Result<Vec<EventRecord>> {
    let rows = sqlx::query_as::<_, EventRow>(
        r#"
        SELECT id, event_type, plan_id, payload, timestamp, created_at
        FROM   events
        ORDER  BY id ASC
        "#,
    )
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(EventRecord::try_from).collect()
}

// ─────────────────────────────────────────────────────────
// Settings
// ─────────────────────────────────────────────────────────

/// Runtime configuration overrides, in the order they were first written.
pub async fn get_settings(pool: &SqlitePool) -> Result<Vec<(String, String)>> {
    let rows: Vec<(String, String)> =
        sqlx::query_as("SELECT key, value FROM settings ORDER BY rowid ASC")
            .fetch_all(pool)
            .await?;
    Ok(rows)
}

pub async fn put_setting(conn: &mut SqliteConnection, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value) VALUES (?1, ?2)
        ON CONFLICT (key) DO UPDATE SET value = excluded.value
        "#,
    )
    .bind(key)
    .bind(value)
    .execute(&mut *conn)
    .await?;
    Ok(())
}
