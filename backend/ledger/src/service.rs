//! Ledger service: the persistent host around the protocol core.
//!
//! Every request for a plan runs under that plan's lock and inside one SQL
//! transaction: load the book, run [`rwa_protocol::step`], then save the new
//! book together with its outbox entries and events. A failed step rolls the
//! transaction back, so nothing of it is ever visible.

use std::collections::HashMap;
use std::sync::Arc;

use rwa_protocol::{
    distribution, plan, step, Account, Asset, Command, Context, DepositEvent, Effects, Error as ProtocolError,
    PlanBook, PlanParams, PlanStatus, ProtocolConfig, ProtocolEvent, YieldComponent,
};
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::db;
use crate::errors::Result;

/// What a committed step left behind.
#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub plan_id: u64,
    pub status: PlanStatus,
    pub outbound: usize,
    pub events: usize,
}

pub struct LedgerService {
    pool: SqlitePool,
    config: RwLock<ProtocolConfig>,
    locks: Mutex<HashMap<u64, Arc<Mutex<()>>>>,
}

impl LedgerService {
    /// Build the service from the environment-seeded configuration with the
    /// persisted admin overrides applied on top.
    pub async fn load(pool: SqlitePool, mut config: ProtocolConfig) -> Result<Self> {
        for (key, value) in db::get_settings(&pool).await? {
            let admin = config.admin.clone();
            if let Err(e) = config.update(&admin, &key, &value) {
                warn!(key, value, "ignoring stored setting: {e}");
            }
        }
        Ok(LedgerService {
            pool,
            config: RwLock::new(config),
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn config(&self) -> ProtocolConfig {
        self.config.read().await.clone()
    }

    async fn plan_lock(&self, plan_id: u64) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(plan_id).or_default().clone()
    }

    /// Forget a plan's lock once nobody else holds or waits on it. Clones are
    /// only taken under the map mutex, so a count of two (map plus `lock`)
    /// cannot grow while we decide.
    async fn release_plan_lock(&self, plan_id: u64, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&plan_id);
        }
    }

    #[cfg(test)]
    async fn lock_count(&self) -> usize {
        self.locks.lock().await.len()
    }

    pub async fn create_plan(&self, now: u64, params: PlanParams) -> Result<u64> {
        let config = self.config().await;
        let ctx = Context::new(now, &config);

        let mut tx = self.pool.begin().await?;
        let id = db::next_plan_id(&mut tx).await?;
        let (book, fx) = plan::open(id, params, &ctx)?;
        self.persist(&mut tx, &book, fx, now).await?;
        tx.commit().await?;

        info!(plan_id = id, "plan stored");
        Ok(id)
    }

    /// Apply a custody deposit notification. Transfers not addressed to the
    /// core account are acknowledged and ignored.
    pub async fn on_deposit(&self, now: u64, event: &DepositEvent) -> Result<Option<StepOutcome>> {
        let core = self.config.read().await.core_account.clone();
        if !event.is_for(&core) {
            info!(from = %event.from, to = %event.to, "ignoring transfer not addressed to core");
            return Ok(None);
        }
        let purpose = event.purpose()?;
        let plan_id = purpose.plan_id();
        let cmd = Command::Deposit {
            from: event.from.clone(),
            contract: event.contract.clone(),
            quantity: event.quantity.clone(),
            purpose,
        };
        self.execute(now, plan_id, cmd).await.map(Some)
    }

    pub async fn execute(&self, now: u64, plan_id: u64, cmd: Command) -> Result<StepOutcome> {
        let lock = self.plan_lock(plan_id).await;
        let outcome = {
            let _guard = lock.lock().await;
            self.execute_locked(now, plan_id, cmd).await
        };
        self.release_plan_lock(plan_id, lock).await;
        outcome
    }

    async fn execute_locked(&self, now: u64, plan_id: u64, cmd: Command) -> Result<StepOutcome> {
        let config = self.config().await;
        let ctx = Context::new(now, &config);
        let name = cmd.name();

        let mut tx = self.pool.begin().await?;
        let book = db::load_book(&mut tx, plan_id)
            .await?
            .ok_or_else(|| ProtocolError::RecordNotFound(format!("plan {plan_id} not found")))?;
        let (next, fx) = step(&book, &ctx, cmd)?;
        let outcome = StepOutcome {
            plan_id,
            status: next.plan.status,
            outbound: fx.outbound.len(),
            events: fx.events.len(),
        };
        self.persist(&mut tx, &next, fx, now).await?;
        tx.commit().await?;

        info!(
            plan_id,
            command = name,
            status = next.plan.status.as_str(),
            outbound = outcome.outbound,
            "step committed"
        );
        Ok(outcome)
    }

    async fn persist(&self, conn: &mut sqlx::SqliteConnection, book: &PlanBook, fx: Effects, now: u64) -> Result<()> {
        db::save_book(conn, book, now).await?;
        db::insert_outbox(conn, Some(book.plan_id()), &fx.outbound, now).await?;
        db::insert_events(conn, &fx.events, now).await?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────

    pub async fn book(&self, plan_id: u64) -> Result<PlanBook> {
        let mut conn = self.pool.acquire().await?;
        let book = db::load_book(&mut conn, plan_id)
            .await?
            .ok_or_else(|| ProtocolError::RecordNotFound(format!("plan {plan_id} not found")))?;
        Ok(book)
    }

    pub async fn yearly_yield(&self, plan_id: u64, year: u32, component: YieldComponent) -> Result<Asset> {
        let book = self.book(plan_id).await?;
        Ok(distribution::yearly_yield(&book, year, component)?)
    }

    /// Trading pair for the plan's buyback quote.
    pub async fn trading_pair(&self, plan_id: u64) -> Result<String> {
        Ok(distribution::trading_pair(&self.book(plan_id).await?))
    }

    // ─────────────────────────────────────────────────────────
    // Admin
    // ─────────────────────────────────────────────────────────

    /// Change one protocol setting and persist it so it survives restarts.
    pub async fn update_config(&self, now: u64, caller: &Account, key: &str, value: &str) -> Result<()> {
        let mut current = self.config.write().await;
        let mut next = current.clone();
        next.update(caller, key, value)?;

        let mut tx = self.pool.begin().await?;
        db::put_setting(&mut tx, key, value.trim()).await?;
        let event = ProtocolEvent::ConfigUpdated {
            plan_id: None,
            key: key.to_string(),
            value: value.trim().to_string(),
        };
        db::insert_events(&mut tx, &[event], now).await?;
        tx.commit().await?;

        *current = next;
        Ok(())
    }
}
