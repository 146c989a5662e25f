//! In-memory host.
//!
//! [`Protocol`] keeps every plan book, the configuration, an ordered outbox
//! and the audit log in memory. Each call runs [`crate::step`] against a copy
//! of the affected book and commits the book, outbox entries and events
//! together only if the step succeeds.

use std::collections::BTreeMap;

use crate::asset::{Account, Asset};
use crate::config::ProtocolConfig;
use crate::distribution;
use crate::effects::{Effects, Outbound, ProtocolEvent};
use crate::errors::{Error, Result};
use crate::memo::DepositEvent;
use crate::plan;
use crate::stake;
use crate::types::{
    BuybackAccumulator, GuarantorStake, GuarantyStats, PeriodYieldLog, Plan, PlanBook, PlanParams,
    StakePool, StakerRecord, YieldComponent,
};
use crate::{step, Command, Context};

#[derive(Debug, Clone)]
pub struct Protocol {
    config: ProtocolConfig,
    books: BTreeMap<u64, PlanBook>,
    last_plan_id: u64,
    outbox: Vec<Outbound>,
    events: Vec<ProtocolEvent>,
}

impl Protocol {
    /// Fresh protocol with default configuration administered by `admin`.
    pub fn init(admin: Account) -> Self {
        Self::with_config(ProtocolConfig::new(admin))
    }

    pub fn with_config(config: ProtocolConfig) -> Self {
        Protocol {
            config,
            books: BTreeMap::new(),
            last_plan_id: 0,
            outbox: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn update_config(&mut self, caller: &Account, key: &str, value: &str) -> Result<()> {
        let mut next = self.config.clone();
        next.update(caller, key, value)?;
        self.config = next;
        self.events.push(ProtocolEvent::ConfigUpdated {
            plan_id: None,
            key: key.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    /// Create a plan; ids start at 1.
    pub fn create_plan(&mut self, now: u64, params: PlanParams) -> Result<u64> {
        let id = self.last_plan_id.checked_add(1).ok_or(Error::Overflow)?;
        let ctx = Context::new(now, &self.config);
        let (book, fx) = plan::open(id, params, &ctx)?;
        self.last_plan_id = id;
        self.books.insert(id, book);
        self.commit_effects(fx);
        Ok(id)
    }

    /// Handle a custody notification. Transfers not addressed to the core
    /// account are ignored and yield `Ok(None)`.
    pub fn on_deposit(&mut self, now: u64, event: &DepositEvent) -> Result<Option<u64>> {
        if !event.is_for(&self.config.core_account) {
            return Ok(None);
        }
        let purpose = event.purpose()?;
        let plan_id = purpose.plan_id();
        self.execute(
            now,
            plan_id,
            Command::Deposit {
                from: event.from.clone(),
                contract: event.contract.clone(),
                quantity: event.quantity.clone(),
                purpose,
            },
        )?;
        Ok(Some(plan_id))
    }

    pub fn execute(&mut self, now: u64, plan_id: u64, cmd: Command) -> Result<()> {
        let book = self.book(plan_id)?;
        let ctx = Context::new(now, &self.config);
        let (next, fx) = step(book, &ctx, cmd)?;
        self.books.insert(plan_id, next);
        self.commit_effects(fx);
        Ok(())
    }

    fn commit_effects(&mut self, fx: Effects) {
        self.outbox.extend(fx.outbound);
        self.events.extend(fx.events);
    }

    /// Hand queued outbound instructions to the caller, oldest first.
    pub fn drain_outbox(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbox)
    }

    pub fn events(&self) -> &[ProtocolEvent] {
        &self.events
    }

    // ─────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────

    pub fn book(&self, plan_id: u64) -> Result<&PlanBook> {
        self.books
            .get(&plan_id)
            .ok_or_else(|| Error::RecordNotFound(format!("plan {plan_id} not found")))
    }

    pub fn plan(&self, plan_id: u64) -> Result<&Plan> {
        Ok(&self.book(plan_id)?.plan)
    }

    pub fn guaranty_stats(&self, plan_id: u64) -> Result<&GuarantyStats> {
        Ok(&self.book(plan_id)?.guaranty)
    }

    pub fn guarantor(&self, plan_id: u64, who: &Account) -> Result<&GuarantorStake> {
        self.book(plan_id)?.guarantor(who)
    }

    pub fn staker(&self, plan_id: u64, who: &Account) -> Result<&StakerRecord> {
        self.book(plan_id)?
            .stakers
            .get(who)
            .ok_or_else(|| Error::RecordNotFound(format!("no stake of {who} in plan {plan_id}")))
    }

    /// Rewards `who` could claim right now.
    pub fn claimable(&self, plan_id: u64, who: &Account) -> Result<Asset> {
        let book = self.book(plan_id)?;
        let staker = self.staker(plan_id, who)?;
        let pending = stake::pending_reward(&book.stake_pool, staker)?;
        staker
            .unclaimed_rewards
            .checked_add(&staker.unclaimed_rewards.with_amount(pending)?)
    }

    pub fn stake_pool(&self, plan_id: u64) -> Result<&StakePool> {
        Ok(&self.book(plan_id)?.stake_pool)
    }

    pub fn buyback(&self, plan_id: u64) -> Result<&BuybackAccumulator> {
        Ok(&self.book(plan_id)?.buyback)
    }

    pub fn yield_logs(&self, plan_id: u64) -> Result<Vec<&PeriodYieldLog>> {
        Ok(self.book(plan_id)?.yield_logs.values().collect())
    }

    pub fn yearly_yield(&self, plan_id: u64, year: u32, component: YieldComponent) -> Result<Asset> {
        distribution::yearly_yield(self.book(plan_id)?, year, component)
    }
}
