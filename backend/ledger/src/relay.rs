//! Long-running background task that drains the outbox to custody.
//!
//! ## Ordering
//!
//! Rows are delivered strictly in id order. When a row fails the batch stops
//! there, so later instructions for the same funds never overtake an earlier
//! one. The failed row is retried with exponential back-off, up to
//! [`MAX_BACKOFF_SECS`] seconds.

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::custody::CustodyClient;
use crate::db;
use crate::errors::Result;

const MAX_BACKOFF_SECS: u64 = 60;
const INITIAL_BACKOFF_SECS: u64 = 2;

pub struct RelayState {
    pub pool: SqlitePool,
    pub custody: CustodyClient,
    pub interval_secs: u64,
    pub batch_size: u32,
}

/// Result of one pass over the outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RelayPass {
    pub delivered: usize,
    pub failed: bool,
}

/// Run the relay loop until `shutdown` is cancelled.
pub async fn run(state: Arc<RelayState>, shutdown: CancellationToken) {
    info!("Outbox relay starting, batch size {}", state.batch_size);
    let mut backoff = INITIAL_BACKOFF_SECS;

    loop {
        let wait = match relay_once(&state).await {
            Ok(pass) if pass.failed => {
                let wait = backoff;
                backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
                warn!("Outbox delivery failed (will retry in {wait}s)");
                wait
            }
            Ok(pass) => {
                backoff = INITIAL_BACKOFF_SECS;
                if pass.delivered as u32 >= state.batch_size {
                    // More rows are probably waiting.
                    0
                } else {
                    state.interval_secs
                }
            }
            Err(e) => {
                error!("Outbox relay error: {e}");
                state.interval_secs
            }
        };

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_secs(wait)) => {}
        }
    }
    info!("Outbox relay stopped");
}

/// Deliver one batch of pending rows, stopping at the first failure.
pub async fn relay_once(state: &RelayState) -> Result<RelayPass> {
    let pending = db::pending_outbox(&state.pool, state.batch_size).await?;
    let mut pass = RelayPass::default();

    for record in pending {
        match state.custody.deliver(&record).await {
            Ok(()) => {
                db::mark_delivered(&state.pool, record.id, now_secs()).await?;
                pass.delivered += 1;
            }
            Err(e) => {
                error!(
                    id = record.id,
                    plan_id = ?record.plan_id,
                    kind = %record.kind,
                    attempts = record.attempts + 1,
                    previous = ?record.last_error,
                    "delivery failed: {e}"
                );
                db::record_failure(&state.pool, record.id, &e.to_string()).await?;
                pass.failed = true;
                break;
            }
        }
    }

    if pass.delivered > 0 {
        info!("Relayed {} outbox rows", pass.delivered);
    }
    Ok(pass)
}

fn now_secs() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}
