//! # Types
//!
//! Records shared by the four engines. Everything one plan owns lives in a
//! single [`PlanBook`], so a host can load, mutate and persist a plan's whole
//! accounting state as one unit.
//!
//! ## Status as a finite-state machine
//!
//! ```text
//! Pending ──► Active ──► SoftCapHit ──► HardCapHit
//!                │            │              │
//!                ▼            └──────┬───────┘
//!              Failed ◄──── PendingPledge ──► Success ──► Completed
//!
//! any non-terminal ──► Cancelled        Failed/Cancelled ──► Refunded
//! ```
//!
//! Transitions only move forward. `Completed`, `Failed`, `Cancelled` and
//! `Refunded` are terminal for the raise; refunds may still move a `Failed`
//! or `Cancelled` plan to `Refunded`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::asset::{Account, Asset, ExtendedSymbol};
use crate::errors::{Error, Result};

/// Length of one return period.
pub const SECONDS_PER_PERIOD: u64 = 30 * 24 * 60 * 60;

/// Return periods per year, used to turn an APR into a per-period amount.
pub const PERIODS_PER_YEAR: i64 = 12;

/// Default guaranty coverage target in basis points of the goal.
pub const DEFAULT_COVERAGE_RATIO_BP: i64 = 5_000;

// ─────────────────────────────────────────────────────────
// Plan
// ─────────────────────────────────────────────────────────

/// Lifecycle status of a fundraising plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    /// Raise window not open yet.
    Pending,
    /// Accepting investment, below the soft cap.
    Active,
    /// Soft cap reached; still accepting investment.
    SoftCapHit,
    /// Hard cap reached; raise closed.
    HardCapHit,
    /// Raise closed above the soft cap; waiting for guaranty coverage.
    PendingPledge,
    /// Raise succeeded and is backed; yield period running.
    Success,
    /// Yield period over.
    Completed,
    Failed,
    Cancelled,
    Refunded,
}

impl PlanStatus {
    /// Rank along the forward path. Abort branches share the top rank so
    /// they are reachable from anywhere but never left (except to `Refunded`).
    fn rank(self) -> u8 {
        match self {
            PlanStatus::Pending => 0,
            PlanStatus::Active => 1,
            PlanStatus::SoftCapHit => 2,
            PlanStatus::HardCapHit => 3,
            PlanStatus::PendingPledge => 4,
            PlanStatus::Success => 5,
            PlanStatus::Completed => 6,
            PlanStatus::Failed | PlanStatus::Cancelled => 7,
            PlanStatus::Refunded => 8,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PlanStatus::Completed | PlanStatus::Failed | PlanStatus::Cancelled | PlanStatus::Refunded
        )
    }

    /// Failed, cancelled or already refunding: no yield is owed.
    pub fn is_aborted(self) -> bool {
        matches!(
            self,
            PlanStatus::Failed | PlanStatus::Cancelled | PlanStatus::Refunded
        )
    }

    /// The raise closed with enough coverage and funds were released.
    pub fn is_raised(self) -> bool {
        matches!(self, PlanStatus::Success | PlanStatus::Completed)
    }

    pub fn accepts_investment(self) -> bool {
        matches!(self, PlanStatus::Active | PlanStatus::SoftCapHit)
    }

    pub fn is_cancellable(self) -> bool {
        matches!(
            self,
            PlanStatus::Pending | PlanStatus::Active | PlanStatus::SoftCapHit | PlanStatus::HardCapHit
        )
    }

    /// Whether moving from `self` to `next` is a legal forward step.
    pub fn can_advance_to(self, next: PlanStatus) -> bool {
        if self == next {
            return true;
        }
        match (self, next) {
            (PlanStatus::Failed | PlanStatus::Cancelled, PlanStatus::Refunded) => true,
            (from, _) if from.is_terminal() => false,
            (_, to) => to.rank() > self.rank(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlanStatus::Pending => "pending",
            PlanStatus::Active => "active",
            PlanStatus::SoftCapHit => "soft_cap_hit",
            PlanStatus::HardCapHit => "hard_cap_hit",
            PlanStatus::PendingPledge => "pending_pledge",
            PlanStatus::Success => "success",
            PlanStatus::Completed => "completed",
            PlanStatus::Failed => "failed",
            PlanStatus::Cancelled => "cancelled",
            PlanStatus::Refunded => "refunded",
        }
    }
}

/// Plan creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanParams {
    pub creator: Account,
    pub title: String,
    pub goal_asset: ExtendedSymbol,
    /// Raw goal amount in goal-asset units.
    pub goal_amount: i64,
    pub receipt_asset: ExtendedSymbol,
    /// Raw receipt quantity issued per whole goal unit.
    pub receipt_per_unit: i64,
    pub soft_cap_pct: u8,
    pub hard_cap_pct: u8,
    pub start_time: u64,
    pub end_time: u64,
    pub return_periods: u32,
    pub guaranteed_apr_bp: i64,
}

/// A fundraising campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: u64,
    pub creator: Account,
    pub title: String,
    pub goal_asset: ExtendedSymbol,
    pub goal_amount: Asset,
    pub receipt_asset: ExtendedSymbol,
    pub receipt_per_unit: i64,
    pub soft_cap_pct: u8,
    pub hard_cap_pct: u8,
    pub start_time: u64,
    pub end_time: u64,
    pub return_periods: u32,
    pub guaranteed_apr_bp: i64,
    pub raised_amount: Asset,
    pub issued_receipts: Asset,
    pub status: PlanStatus,
    pub return_end_time: u64,
    pub created_at: u64,
}

impl Plan {
    pub fn soft_cap_amount(&self) -> Result<Asset> {
        self.goal_amount.mul_div(self.soft_cap_pct as i64, 100)
    }

    pub fn hard_cap_amount(&self) -> Result<Asset> {
        self.goal_amount.mul_div(self.hard_cap_pct as i64, 100)
    }

    /// Whole return periods elapsed since the raise opened, capped at the term.
    pub fn elapsed_periods(&self, now: u64) -> u32 {
        let elapsed = now.saturating_sub(self.start_time) / SECONDS_PER_PERIOD;
        elapsed.min(self.return_periods as u64) as u32
    }
}

// ─────────────────────────────────────────────────────────
// Guaranty
// ─────────────────────────────────────────────────────────

/// Per-plan guaranty pool totals.
///
/// `total_funds` only grows on deposit and only shrinks when a guarantor
/// withdraws stake. Payouts grow `used_funds` instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuarantyStats {
    pub plan_id: u64,
    pub total_funds: Asset,
    pub used_funds: Asset,
    /// Guaranty share of distributed yield credited to guarantors.
    pub yield_received: Asset,
    pub coverage_ratio_bp: i64,
}

impl GuarantyStats {
    pub fn new(plan_id: u64, goal: &Asset) -> Self {
        GuarantyStats {
            plan_id,
            total_funds: Asset::zero(&goal.symbol),
            used_funds: Asset::zero(&goal.symbol),
            yield_received: Asset::zero(&goal.symbol),
            coverage_ratio_bp: DEFAULT_COVERAGE_RATIO_BP,
        }
    }

    pub fn available(&self) -> Result<Asset> {
        self.total_funds.checked_sub(&self.used_funds)
    }
}

/// One guarantor's position in a plan's guaranty pool.
///
/// At rest `total_stake = available_stake + locked_stake + used_stake`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuarantorStake {
    pub guarantor: Account,
    pub total_stake: Asset,
    pub available_stake: Asset,
    pub locked_stake: Asset,
    /// Part of this guarantor's stake already paid out as shortfall cover.
    pub used_stake: Asset,
    pub earned_yield: Asset,
    pub withdrawn: Asset,
}

impl GuarantorStake {
    pub fn new(guarantor: Account, symbol: &crate::asset::Symbol) -> Self {
        GuarantorStake {
            guarantor,
            total_stake: Asset::zero(symbol),
            available_stake: Asset::zero(symbol),
            locked_stake: Asset::zero(symbol),
            used_stake: Asset::zero(symbol),
            earned_yield: Asset::zero(symbol),
            withdrawn: Asset::zero(symbol),
        }
    }

    /// Unspent stake still backing the plan.
    pub fn backing(&self) -> Result<Asset> {
        self.available_stake.checked_add(&self.locked_stake)
    }
}

/// Snapshot of guaranty backing handed to the plan status evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoverageSnapshot {
    pub available: i64,
    pub target: i64,
}

impl CoverageSnapshot {
    pub fn is_covered(&self) -> bool {
        self.available >= self.target
    }
}

// ─────────────────────────────────────────────────────────
// Yield
// ─────────────────────────────────────────────────────────

/// Yield recorded for one calendar period (`YYYYMM`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodYieldLog {
    pub period: u32,
    pub period_yield: Asset,
    pub investor_share: Asset,
    pub guarantor_share: Asset,
    pub buyback_share: Asset,
    pub cumulative_yield: Asset,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuybackAccumulator {
    pub total_buyback: Asset,
    pub used_buyback: Asset,
    pub max_slippage_bp: i64,
}

impl BuybackAccumulator {
    pub fn remaining(&self) -> Result<Asset> {
        self.total_buyback.checked_sub(&self.used_buyback)
    }
}

/// Which part of the yield logs to aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum YieldComponent {
    Total,
    Investor,
    Guarantor,
    Buyback,
}

impl std::str::FromStr for YieldComponent {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "total" => Ok(YieldComponent::Total),
            "investor" => Ok(YieldComponent::Investor),
            "guarantor" => Ok(YieldComponent::Guarantor),
            "buyback" => Ok(YieldComponent::Buyback),
            other => Err(Error::InvalidParameter(format!("unknown yield component `{other}`"))),
        }
    }
}

// ─────────────────────────────────────────────────────────
// Staking
// ─────────────────────────────────────────────────────────

/// Reward-per-share staking pool. Stake is the receipt asset, rewards are
/// paid in the goal asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakePool {
    pub total_staked: Asset,
    pub cum_staked: Asset,
    /// Cumulative reward per staked unit, scaled by `stake::PRECISION`.
    pub reward_per_share: u128,
    pub last_reward_per_share: u128,
    /// Rewards injected and kept by the pool. Parked rewards returned on
    /// abort are taken back out.
    pub total_rewards: Asset,
    /// Rewards injected while nobody was staked, waiting for the next injection.
    pub unallocated_rewards: Asset,
    pub claimed_rewards: Asset,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakerRecord {
    pub owner: Account,
    pub avl_staked: Asset,
    pub cum_staked: Asset,
    pub last_reward_per_share: u128,
    pub unclaimed_rewards: Asset,
    pub claimed_rewards: Asset,
}

// ─────────────────────────────────────────────────────────
// Plan book
// ─────────────────────────────────────────────────────────

/// All accounting state owned by one plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanBook {
    pub plan: Plan,
    pub guaranty: GuarantyStats,
    /// Ordered by account so proportional splits are deterministic.
    pub guarantors: BTreeMap<Account, GuarantorStake>,
    pub yield_logs: BTreeMap<u32, PeriodYieldLog>,
    pub buyback: BuybackAccumulator,
    pub stake_pool: StakePool,
    pub stakers: BTreeMap<Account, StakerRecord>,
}

impl PlanBook {
    /// Fresh book for a newly created plan.
    pub fn new(plan: Plan, default_slippage_bp: i64) -> Self {
        let goal = plan.goal_asset.symbol.clone();
        let receipt = plan.receipt_asset.symbol.clone();
        PlanBook {
            guaranty: GuarantyStats::new(plan.id, &plan.goal_amount),
            guarantors: BTreeMap::new(),
            yield_logs: BTreeMap::new(),
            buyback: BuybackAccumulator {
                total_buyback: Asset::zero(&goal),
                used_buyback: Asset::zero(&goal),
                max_slippage_bp: default_slippage_bp,
            },
            stake_pool: StakePool {
                total_staked: Asset::zero(&receipt),
                cum_staked: Asset::zero(&receipt),
                reward_per_share: 0,
                last_reward_per_share: 0,
                total_rewards: Asset::zero(&goal),
                unallocated_rewards: Asset::zero(&goal),
                claimed_rewards: Asset::zero(&goal),
            },
            stakers: BTreeMap::new(),
            plan,
        }
    }

    pub fn plan_id(&self) -> u64 {
        self.plan.id
    }

    /// Guaranty backing the plan currently needs.
    pub fn coverage_target(&self) -> Result<Asset> {
        self.plan
            .goal_amount
            .scale_bp(self.guaranty.coverage_ratio_bp)
    }

    pub fn coverage_snapshot(&self) -> Result<CoverageSnapshot> {
        Ok(CoverageSnapshot {
            available: self.guaranty.available()?.amount,
            target: self.coverage_target()?.amount,
        })
    }

    /// Cumulative yield of the latest logged period (zero when none).
    pub fn cumulative_yield(&self) -> Asset {
        self.yield_logs
            .values()
            .next_back()
            .map(|log| log.cumulative_yield.clone())
            .unwrap_or_else(|| Asset::zero(&self.plan.goal_asset.symbol))
    }

    pub fn guarantor(&self, who: &Account) -> Result<&GuarantorStake> {
        self.guarantors
            .get(who)
            .ok_or_else(|| Error::RecordNotFound(format!("guarantor {who} not found in plan {}", self.plan.id)))
    }

    pub fn guarantor_mut(&mut self, who: &Account) -> Result<&mut GuarantorStake> {
        let plan_id = self.plan.id;
        self.guarantors
            .get_mut(who)
            .ok_or_else(|| Error::RecordNotFound(format!("guarantor {who} not found in plan {plan_id}")))
    }
}
