//! # Yield distribution
//!
//! An incoming yield deposit is split three ways:
//!
//! - `stake_share    = floor(q * stake_pct / 100)`, injected into the
//!   staking reward pool;
//! - `guaranty_share = floor(q * guaranty_pct / 100 * coverage)`, credited
//!   to guarantors, where `coverage` is how much of the coverage target the
//!   guaranty pool currently holds (capped at 100%);
//! - `buyback_share  = q - stake_share - guaranty_share`, accumulated for a
//!   later buyback of the receipt token.
//!
//! The buyback side absorbs every rounding remainder, so nothing is lost.
//! Each distribution is logged under its calendar period (`YYYYMM`, UTC).

use chrono::{DateTime, Datelike};
use serde::{Deserialize, Serialize};

use crate::asset::{Account, Asset};
use crate::effects::{Effects, ProtocolEvent};
use crate::errors::{Error, Result};
use crate::math::{self, BASIS_POINTS};
use crate::types::{PeriodYieldLog, PlanBook, PlanStatus, YieldComponent, DEFAULT_COVERAGE_RATIO_BP};
use crate::{guaranty, stake, Context};

/// Reserves of the goal/receipt trading pair, quoted by the swap venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolQuote {
    pub reserve_in: i64,
    pub reserve_out: i64,
    pub fee_bp: i64,
}

/// Calendar period key `YYYYMM` for a unix timestamp.
pub fn period_key(now: u64) -> Result<u32> {
    let secs = i64::try_from(now).map_err(|_| Error::Overflow)?;
    let date = DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| Error::InvalidParameter(format!("timestamp {now} out of range")))?;
    let year = u32::try_from(date.year()).map_err(|_| Error::Overflow)?;
    Ok(year * 100 + date.month())
}

/// Add one distribution to the current period's log entry.
///
/// The running cumulative always continues from the latest entry. A clock
/// reading older than the latest period is folded into that period so the
/// log stays ordered.
pub fn record_period(
    book: &mut PlanBook,
    now: u64,
    period_yield: &Asset,
    investor: &Asset,
    guarantor: &Asset,
    buyback: &Asset,
) -> Result<u32> {
    let mut key = period_key(now)?;
    if let Some(last) = book.yield_logs.keys().next_back() {
        key = key.max(*last);
    }
    let cumulative = book.cumulative_yield().checked_add(period_yield)?;

    match book.yield_logs.get_mut(&key) {
        Some(log) => {
            log.period_yield.add_assign(period_yield)?;
            log.investor_share.add_assign(investor)?;
            log.guarantor_share.add_assign(guarantor)?;
            log.buyback_share.add_assign(buyback)?;
            log.cumulative_yield = cumulative;
        }
        None => {
            book.yield_logs.insert(
                key,
                PeriodYieldLog {
                    period: key,
                    period_yield: period_yield.clone(),
                    investor_share: investor.clone(),
                    guarantor_share: guarantor.clone(),
                    buyback_share: buyback.clone(),
                    cumulative_yield: cumulative,
                },
            );
        }
    }
    Ok(key)
}

/// Guaranty coverage in basis points, capped at 100%.
pub fn coverage_ratio_bp(book: &PlanBook) -> Result<i64> {
    let target = book.coverage_target()?;
    if !target.is_positive() {
        return Ok(BASIS_POINTS);
    }
    let available = book.guaranty.available()?;
    Ok(math::mul_div_floor(available.amount, BASIS_POINTS, target.amount)?.min(BASIS_POINTS))
}

/// Split a `plan:<id>` yield deposit.
pub fn distribute(book: &mut PlanBook, ctx: &Context, quantity: &Asset, fx: &mut Effects) -> Result<u32> {
    let plan = &book.plan;
    if ctx.now >= plan.return_end_time {
        return Err(Error::Expired(format!("return period of plan {} is over", plan.id)));
    }
    if plan.status != PlanStatus::Success {
        return Err(Error::InvalidStatus(format!(
            "plan {} is {}, not distributing yield",
            plan.id,
            plan.status.as_str()
        )));
    }
    if !quantity.is_positive() {
        return Err(Error::NotPositive(format!("yield {quantity} must be positive")));
    }
    let plan_id = plan.id;
    let goal_contract = plan.goal_asset.contract.clone();

    let split = ctx.config.split;
    let coverage_bp = coverage_ratio_bp(book)?;
    let stake_share = quantity.mul_div(split.stake_pct as i64, 100)?;
    let guaranty_share = quantity.mul_div(
        split.guaranty_pct as i64 * coverage_bp,
        100 * BASIS_POINTS,
    )?;
    let buyback_share = quantity
        .checked_sub(&stake_share)?
        .checked_sub(&guaranty_share)?;
    tracing::debug!(
        plan_id,
        %quantity,
        coverage_bp,
        %stake_share,
        %guaranty_share,
        %buyback_share,
        "yield split"
    );

    if stake_share.is_positive() {
        fx.transfer(
            &goal_contract,
            &ctx.config.core_account,
            &ctx.config.stake_pool_account,
            &stake_share,
            format!("yield-stake:{plan_id}"),
        );
        stake::add_reward(book, &stake_share, fx)?;
    }
    if guaranty_share.is_positive() {
        fx.transfer(
            &goal_contract,
            &ctx.config.core_account,
            &ctx.config.guaranty_pool_account,
            &guaranty_share,
            format!("yield-guaranty:{plan_id}"),
        );
        guaranty::credit_yield(book, &guaranty_share)?;
    }
    book.buyback.total_buyback.add_assign(&buyback_share)?;

    let period = record_period(book, ctx.now, quantity, &stake_share, &guaranty_share, &buyback_share)?;
    fx.emit(ProtocolEvent::YieldDistributed {
        plan_id,
        period,
        stake_share,
        guaranty_share,
        buyback_share,
    });
    tracing::info!(plan_id, period, %quantity, "yield distributed");
    Ok(period)
}

/// Trading pair code for the plan's goal/receipt market, e.g. `usdt.rwa`.
pub fn trading_pair(book: &PlanBook) -> String {
    format!(
        "{}.{}",
        book.plan.goal_asset.symbol.code().to_lowercase(),
        book.plan.receipt_asset.symbol.code().to_lowercase()
    )
}

/// Swap the whole unspent buyback balance for receipt tokens.
pub fn buyback(
    book: &mut PlanBook,
    ctx: &Context,
    submitter: &Account,
    quote: &PoolQuote,
    fx: &mut Effects,
) -> Result<Asset> {
    if book.plan.status != PlanStatus::Success {
        return Err(Error::InvalidStatus(format!(
            "plan {} is {}, buyback unavailable",
            book.plan.id,
            book.plan.status.as_str()
        )));
    }
    let remaining = book.buyback.remaining()?;
    if !remaining.is_positive() {
        return Err(Error::QuantityInsufficient(format!(
            "no buyback balance in plan {}",
            book.plan.id
        )));
    }

    let expected = math::amm_output(remaining.amount, quote.reserve_in, quote.reserve_out, quote.fee_bp)?;
    let min_out = math::mul_div_floor(expected, BASIS_POINTS - book.buyback.max_slippage_bp, BASIS_POINTS)?;
    if min_out <= 0 {
        return Err(Error::QuantityInsufficient(format!(
            "buyback of {remaining} would receive nothing"
        )));
    }
    let min_output = Asset::new(min_out, book.plan.receipt_asset.symbol.clone())?;
    let pair = trading_pair(book);

    book.buyback.used_buyback.add_assign(&remaining)?;
    fx.swap(remaining.clone(), pair.clone(), min_output.clone(), ctx.config.swap_account.clone());
    fx.emit(ProtocolEvent::BuybackRequested {
        plan_id: book.plan.id,
        input: remaining.clone(),
        min_output,
    });
    tracing::info!(plan_id = book.plan.id, %submitter, %pair, %remaining, expected, min_out, "buyback requested");
    Ok(remaining)
}

/// Sum one component of the yield logs over a calendar year.
pub fn yearly_yield(book: &PlanBook, year: u32, component: YieldComponent) -> Result<Asset> {
    if book.yield_logs.is_empty() {
        return Err(Error::RecordNotFound(format!(
            "no yield logs for plan {}",
            book.plan.id
        )));
    }
    let lo = year * 100 + 1;
    let hi = (year + 1) * 100;
    let mut sum = Asset::zero(&book.plan.goal_asset.symbol);
    for log in book.yield_logs.range(lo..hi).map(|(_, log)| log) {
        let part = match component {
            YieldComponent::Total => &log.period_yield,
            YieldComponent::Investor => &log.investor_share,
            YieldComponent::Guarantor => &log.guarantor_share,
            YieldComponent::Buyback => &log.buyback_share,
        };
        sum.add_assign(part)?;
    }
    Ok(sum)
}

pub fn set_slippage(book: &mut PlanBook, ctx: &Context, caller: &Account, bp: i64, fx: &mut Effects) -> Result<()> {
    ctx.config.require_admin(caller)?;
    if !(0..=BASIS_POINTS).contains(&bp) {
        return Err(Error::InvalidParameter(format!("slippage {bp} bp out of range")));
    }
    book.buyback.max_slippage_bp = bp;
    fx.emit(ProtocolEvent::ConfigUpdated {
        plan_id: Some(book.plan.id),
        key: "max_slippage_bp".into(),
        value: bp.to_string(),
    });
    Ok(())
}

pub fn set_coverage_ratio(
    book: &mut PlanBook,
    ctx: &Context,
    caller: &Account,
    bp: i64,
    fx: &mut Effects,
) -> Result<()> {
    ctx.config.require_admin(caller)?;
    if !(DEFAULT_COVERAGE_RATIO_BP..=BASIS_POINTS).contains(&bp) {
        return Err(Error::InvalidParameter(format!(
            "coverage ratio {bp} bp should be in range [{DEFAULT_COVERAGE_RATIO_BP},{BASIS_POINTS}]"
        )));
    }
    book.guaranty.coverage_ratio_bp = bp;
    fx.emit(ProtocolEvent::ConfigUpdated {
        plan_id: Some(book.plan.id),
        key: "coverage_ratio_bp".into(),
        value: bp.to_string(),
    });
    Ok(())
}
