//! # RWA Protocol Core
//!
//! Capital accounting for real-world-asset financing plans: a fundraising
//! plan raises a goal asset under soft/hard caps, guarantors back the
//! promised yield, incoming yield is split between stakers, guarantors and
//! buyback, and stakers accrue rewards per share.
//!
//! | Concern          | Module             | Entry point(s)                                  |
//! |------------------|--------------------|-------------------------------------------------|
//! | Ledger values    | [`asset`], [`math`] | `Asset::checked_add`, `split_proportional`     |
//! | Plan lifecycle   | [`plan`]           | `create_plan`, `invest`, `refund`, `cancel`     |
//! | Guaranty pool    | [`guaranty`]       | `deposit_guaranty`, `guarantpay`, `redeem`      |
//! | Yield split      | [`distribution`]   | `distribute`, `buyback`, `yearly_yield`         |
//! | Reward accrual   | [`stake`]          | `stake`, `unstake`, `claim`, `batch_unstake`    |
//! | Embeddable host  | [`engine`]         | [`engine::Protocol`]                            |
//!
//! ## Architecture
//!
//! The core performs no I/O. All mutation of a plan goes through [`step`]:
//! it takes the current [`PlanBook`], a [`Context`] (clock reading and
//! configuration) and a [`Command`], and returns the next book together with
//! the [`Effects`] to execute. The input is never touched, so a failed step
//! leaves nothing behind; a host commits the returned book and effects
//! atomically.

pub mod asset;
pub mod config;
pub mod distribution;
pub mod effects;
pub mod engine;
pub mod errors;
pub mod guaranty;
pub mod math;
pub mod memo;
pub mod plan;
pub mod stake;
pub mod types;

#[cfg(test)]
mod test_plan;
#[cfg(test)]
mod test_scenarios;
#[cfg(test)]
mod test_stake;

use serde::{Deserialize, Serialize};

pub use asset::{Account, Asset, ExtendedSymbol, Symbol};
pub use config::{ProtocolConfig, YieldSplit};
pub use distribution::PoolQuote;
pub use effects::{Effects, Outbound, ProtocolEvent};
pub use errors::{Error, Result};
pub use memo::{DepositEvent, DepositPurpose};
pub use types::{
    GuarantorStake, GuarantyStats, PeriodYieldLog, Plan, PlanBook, PlanParams, PlanStatus, StakePool,
    StakerRecord, YieldComponent,
};

/// Per-request inputs that are not part of the plan book.
#[derive(Debug, Clone, Copy)]
pub struct Context<'a> {
    /// Unix seconds, read once per request.
    pub now: u64,
    pub config: &'a ProtocolConfig,
}

impl<'a> Context<'a> {
    pub fn new(now: u64, config: &'a ProtocolConfig) -> Self {
        Context { now, config }
    }
}

/// A request against one plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Decoded inbound transfer to the core account.
    Deposit {
        from: Account,
        contract: Account,
        quantity: Asset,
        purpose: DepositPurpose,
    },
    RefreshStatus,
    Cancel { creator: Account },
    /// Investor-initiated refund, burning receipts from the investor's balance.
    Refund { investor: Account, receipts: Asset },
    GuarantPay { submitter: Account, periods: u32 },
    Redeem { guarantor: Account, quantity: Asset },
    Buyback { submitter: Account, quote: PoolQuote },
    Unstake { owner: Account, quantity: Asset },
    Claim { owner: Account },
    BatchUnstake,
    SetSlippage { caller: Account, bp: i64 },
    SetCoverageRatio { caller: Account, bp: i64 },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Deposit { .. } => "deposit",
            Command::RefreshStatus => "refresh_status",
            Command::Cancel { .. } => "cancel",
            Command::Refund { .. } => "refund",
            Command::GuarantPay { .. } => "guarantpay",
            Command::Redeem { .. } => "redeem",
            Command::Buyback { .. } => "buyback",
            Command::Unstake { .. } => "unstake",
            Command::Claim { .. } => "claim",
            Command::BatchUnstake => "batch_unstake",
            Command::SetSlippage { .. } => "set_slippage",
            Command::SetCoverageRatio { .. } => "set_coverage_ratio",
        }
    }
}

/// Apply `cmd` to a copy of `book`.
///
/// The plan status is refreshed first so every command sees the status the
/// clock implies. Book invariants are checked before and after; a violation
/// rejects the step with [`Error::InvariantViolation`].
pub fn step(book: &PlanBook, ctx: &Context, cmd: Command) -> Result<(PlanBook, Effects)> {
    check_invariants(book)?;
    let mut next = book.clone();
    let mut fx = Effects::new();

    let span = tracing::debug_span!("step", plan_id = book.plan.id, command = cmd.name());
    let _enter = span.enter();

    plan::refresh_status(&mut next, ctx, &mut fx)?;
    dispatch(&mut next, ctx, cmd, &mut fx)?;

    check_invariants(&next)?;
    Ok((next, fx))
}

fn dispatch(book: &mut PlanBook, ctx: &Context, cmd: Command, fx: &mut Effects) -> Result<()> {
    match cmd {
        Command::Deposit {
            from,
            contract,
            quantity,
            purpose,
        } => deposit(book, ctx, &from, &contract, &quantity, purpose, fx),
        Command::RefreshStatus => Ok(()),
        Command::Cancel { creator } => plan::cancel(book, ctx, &creator, fx),
        Command::Refund { investor, receipts } => {
            plan::refund(book, ctx, &investor, &receipts, plan::ReceiptSource::Investor, fx).map(|_| ())
        }
        Command::GuarantPay { submitter, periods } => {
            guaranty::guarantpay(book, ctx, &submitter, periods, fx).map(|_| ())
        }
        Command::Redeem { guarantor, quantity } => guaranty::redeem(book, ctx, &guarantor, &quantity, fx),
        Command::Buyback { submitter, quote } => {
            distribution::buyback(book, ctx, &submitter, &quote, fx).map(|_| ())
        }
        Command::Unstake { owner, quantity } => stake::unstake(book, ctx, &owner, &quantity, fx),
        Command::Claim { owner } => stake::claim(book, ctx, &owner, fx).map(|_| ()),
        Command::BatchUnstake => stake::batch_unstake(book, ctx, fx).map(|_| ()),
        Command::SetSlippage { caller, bp } => distribution::set_slippage(book, ctx, &caller, bp, fx),
        Command::SetCoverageRatio { caller, bp } => {
            distribution::set_coverage_ratio(book, ctx, &caller, bp, fx)
        }
    }
}

fn deposit(
    book: &mut PlanBook,
    ctx: &Context,
    from: &Account,
    contract: &Account,
    quantity: &Asset,
    purpose: DepositPurpose,
    fx: &mut Effects,
) -> Result<()> {
    if purpose.plan_id() != book.plan.id {
        return Err(Error::InvalidParameter(format!(
            "deposit for plan {} routed to plan {}",
            purpose.plan_id(),
            book.plan.id
        )));
    }
    if !quantity.is_positive() {
        return Err(Error::NotPositive(format!("deposit {quantity} must be positive")));
    }
    let goal = book.plan.goal_asset.clone();
    let receipt = book.plan.receipt_asset.clone();

    match purpose {
        DepositPurpose::Invest { .. } => {
            goal.check(contract, quantity)?;
            plan::invest(book, ctx, from, quantity, fx).map(|_| ())
        }
        DepositPurpose::Guaranty { .. } => {
            goal.check(contract, quantity)?;
            guaranty::deposit_guaranty(book, ctx, from, quantity, fx)
        }
        DepositPurpose::Reward { plan_id } => {
            goal.check(contract, quantity)?;
            if book.plan.status.is_aborted() {
                return Err(Error::InvalidStatus(format!(
                    "plan {plan_id} is {}, rewards closed",
                    book.plan.status.as_str()
                )));
            }
            fx.transfer(
                &goal.contract,
                &ctx.config.core_account,
                &ctx.config.stake_pool_account,
                quantity,
                format!("reward-pool:{plan_id}"),
            );
            stake::add_reward(book, quantity, fx)
        }
        DepositPurpose::Yield { .. } => {
            goal.check(contract, quantity)?;
            distribution::distribute(book, ctx, quantity, fx).map(|_| ())
        }
        DepositPurpose::Refund { investor, .. } => {
            receipt.check(contract, quantity)?;
            plan::refund(book, ctx, &investor, quantity, plan::ReceiptSource::Deposited, fx).map(|_| ())
        }
        DepositPurpose::Stake { .. } => {
            receipt.check(contract, quantity)?;
            stake::stake(book, from, quantity, fx)
        }
    }
}

/// Structural invariants every committed book satisfies.
pub fn check_invariants(book: &PlanBook) -> Result<()> {
    let plan = &book.plan;
    if plan.raised_amount.amount > plan.hard_cap_amount()?.amount {
        return Err(Error::InvariantViolation("raised amount above hard cap"));
    }
    if plan.raised_amount.amount < 0 || plan.issued_receipts.amount < 0 {
        return Err(Error::InvariantViolation("negative raise totals"));
    }

    let g = &book.guaranty;
    if g.used_funds.amount > g.total_funds.amount {
        return Err(Error::InvariantViolation("used guaranty funds exceed total"));
    }
    let mut total_stake: i64 = 0;
    let mut used_stake: i64 = 0;
    for record in book.guarantors.values() {
        let parts = record
            .available_stake
            .amount
            .checked_add(record.locked_stake.amount)
            .and_then(|v| v.checked_add(record.used_stake.amount))
            .ok_or(Error::Overflow)?;
        if parts != record.total_stake.amount {
            return Err(Error::InvariantViolation(
                "guarantor total differs from available + locked + used",
            ));
        }
        total_stake = total_stake.checked_add(record.total_stake.amount).ok_or(Error::Overflow)?;
        used_stake = used_stake.checked_add(record.used_stake.amount).ok_or(Error::Overflow)?;
    }
    if total_stake != g.total_funds.amount {
        return Err(Error::InvariantViolation("guarantor stakes do not sum to pool total"));
    }
    if used_stake != g.used_funds.amount {
        return Err(Error::InvariantViolation("guarantor usage does not sum to pool usage"));
    }

    let mut running: i64 = 0;
    for log in book.yield_logs.values() {
        running = running.checked_add(log.period_yield.amount).ok_or(Error::Overflow)?;
        if log.cumulative_yield.amount != running {
            return Err(Error::InvariantViolation("cumulative yield is not a running sum"));
        }
    }

    if book.buyback.used_buyback.amount > book.buyback.total_buyback.amount {
        return Err(Error::InvariantViolation("buyback spent more than accumulated"));
    }

    let staked: i64 = book
        .stakers
        .values()
        .try_fold(0i64, |acc, s| acc.checked_add(s.avl_staked.amount))
        .ok_or(Error::Overflow)?;
    if staked != book.stake_pool.total_staked.amount {
        return Err(Error::InvariantViolation("staker balances do not sum to pool total"));
    }
    Ok(())
}
