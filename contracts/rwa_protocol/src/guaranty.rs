//! # Guaranty accounting
//!
//! Guarantors lock goal-asset collateral behind a plan's promised yield.
//! When distributed yield falls short of the guaranteed APR, the shortfall is
//! paid from the pool and charged to guarantors in proportion to their
//! unspent backing.
//!
//! `GuarantyStats.total_funds` is cumulative collateral still in the pool;
//! payouts grow `used_funds` and each guarantor's `used_stake`, so
//! `Σ total_stake == total_funds` and `Σ used_stake == used_funds` hold after
//! every operation.
//!
//! Redemption has three phases:
//!
//! | Phase       | Condition                         | Unlockable                        |
//! |-------------|-----------------------------------|-----------------------------------|
//! | Aborted     | `Failed`, `Cancelled`, `Refunded` | everything, earned yield forfeited |
//! | Matured     | `Success`/`Completed`, `now >= return_end_time` | everything after final settlement |
//! | In progress | otherwise                         | pro-rata share of coverage margin |

use crate::asset::{Account, Asset};
use crate::effects::{Effects, ProtocolEvent};
use crate::errors::{Error, Result};
use crate::math;
use crate::types::{GuarantorStake, Plan, PlanBook, PERIODS_PER_YEAR};
use crate::{distribution, stake, Context};

/// Guaranteed yield owed per return period: `goal * apr_bp / 10000 / 12`.
pub fn required_period_principal(plan: &Plan) -> Result<Asset> {
    let annual = plan
        .goal_amount
        .mul_div(plan.guaranteed_apr_bp, math::BASIS_POINTS)?;
    annual.mul_div(1, PERIODS_PER_YEAR)
}

/// Guarantor collateral arriving with a `guaranty:<plan>` memo.
pub fn deposit_guaranty(
    book: &mut PlanBook,
    ctx: &Context,
    guarantor: &Account,
    quantity: &Asset,
    fx: &mut Effects,
) -> Result<()> {
    let plan = &book.plan;
    if plan.status.is_terminal() {
        return Err(Error::InvalidStatus(format!(
            "plan {} is {}, guaranty closed",
            plan.id,
            plan.status.as_str()
        )));
    }
    let plan_id = plan.id;
    let goal_contract = plan.goal_asset.contract.clone();

    book.guaranty.total_funds.add_assign(quantity)?;
    let record = book
        .guarantors
        .entry(guarantor.clone())
        .or_insert_with(|| GuarantorStake::new(guarantor.clone(), &quantity.symbol));
    record.total_stake.add_assign(quantity)?;
    record.locked_stake.add_assign(quantity)?;

    fx.transfer(
        &goal_contract,
        &ctx.config.core_account,
        &ctx.config.guaranty_pool_account,
        quantity,
        format!("guaranty-lock:{plan_id}"),
    );
    fx.emit(ProtocolEvent::GuarantyDeposited {
        plan_id,
        guarantor: guarantor.clone(),
        quantity: quantity.clone(),
    });
    tracing::info!(plan_id, %guarantor, %quantity, "guaranty deposited");
    Ok(())
}

/// Charge `pay` to guarantors in proportion to their unspent backing.
///
/// Shares come from [`math::split_proportional`], so they sum to `pay`
/// exactly. Each share is drawn from `locked_stake` first, then
/// `available_stake`. A guarantor that cannot cover its share passes the
/// rest on to the others. Returns the per-guarantor deductions in order.
pub fn deduct_proportional(book: &mut PlanBook, pay: &Asset) -> Result<Vec<(Account, i64)>> {
    if book.guarantors.is_empty() {
        return Err(Error::RecordNotFound(format!(
            "no guarantors in plan {}",
            book.plan.id
        )));
    }
    let weights = book
        .guarantors
        .values()
        .map(|g| g.backing().map(|b| b.amount))
        .collect::<Result<Vec<_>>>()?;
    let shares = math::split_proportional(pay.amount, &weights)?;

    let mut deducted: Vec<i64> = vec![0; shares.len()];
    let mut carry: i64 = 0;
    for ((record, share), taken) in book.guarantors.values_mut().zip(&shares).zip(&mut deducted) {
        let want = share.checked_add(carry).ok_or(Error::Overflow)?;
        let got = draw_backing(record, want)?;
        *taken = got;
        carry = want - got;
    }
    // Rounding can leave the tail short; sweep whoever still has backing.
    if carry > 0 {
        for (record, taken) in book.guarantors.values_mut().zip(&mut deducted) {
            if carry == 0 {
                break;
            }
            let got = draw_backing(record, carry)?;
            *taken += got;
            carry -= got;
        }
    }
    if carry > 0 {
        return Err(Error::QuantityInsufficient(format!(
            "guarantor backing short by {carry} for payout {pay}"
        )));
    }

    let out: Vec<(Account, i64)> = book.guarantors.keys().cloned().zip(deducted).collect();
    tracing::debug!(plan_id = book.plan.id, %pay, ?out, "shortfall charged to guarantors");
    Ok(out)
}

/// Take up to `want` from locked then available stake into `used_stake`.
fn draw_backing(record: &mut GuarantorStake, want: i64) -> Result<i64> {
    if want <= 0 {
        return Ok(0);
    }
    let from_locked = want.min(record.locked_stake.amount);
    let from_available = (want - from_locked).min(record.available_stake.amount);
    let locked = record.locked_stake.with_amount(from_locked)?;
    let available = record.available_stake.with_amount(from_available)?;
    record.locked_stake.sub_assign(&locked)?;
    record.available_stake.sub_assign(&available)?;
    let got = from_locked + from_available;
    let used = record.used_stake.with_amount(got)?;
    record.used_stake.add_assign(&used)?;
    Ok(got)
}

/// Shortfall between guaranteed and distributed yield over `periods`.
fn shortfall(book: &PlanBook, periods: u32) -> Result<Asset> {
    let due = required_period_principal(&book.plan)?.mul_div(periods as i64, 1)?;
    let distributed = book.cumulative_yield();
    let gap = due.amount.saturating_sub(distributed.amount).max(0);
    due.with_amount(gap)
}

/// Pay `pay` out of the pool into the staking reward pool and log it as
/// investor yield for the current period.
fn pay_out(book: &mut PlanBook, ctx: &Context, pay: &Asset, memo: String, fx: &mut Effects) -> Result<()> {
    book.guaranty.used_funds.add_assign(pay)?;
    deduct_proportional(book, pay)?;
    fx.transfer(
        &book.plan.goal_asset.contract,
        &ctx.config.guaranty_pool_account,
        &ctx.config.stake_pool_account,
        pay,
        memo,
    );
    stake::add_reward(book, pay, fx)?;
    let zero = Asset::zero(&pay.symbol);
    distribution::record_period(book, ctx.now, pay, pay, &zero, &zero)?;
    Ok(())
}

/// Cover the yield shortfall for the first `periods` return periods.
pub fn guarantpay(
    book: &mut PlanBook,
    ctx: &Context,
    submitter: &Account,
    periods: u32,
    fx: &mut Effects,
) -> Result<Asset> {
    let plan = &book.plan;
    if !plan.status.is_raised() {
        return Err(Error::InvalidStatus(format!(
            "plan {} is {}, nothing guaranteed yet",
            plan.id,
            plan.status.as_str()
        )));
    }
    if periods == 0 || periods > plan.return_periods {
        return Err(Error::InvalidParameter(format!(
            "periods {periods} should be in range [1,{}]",
            plan.return_periods
        )));
    }

    let gap = shortfall(book, periods)?;
    if !gap.is_positive() {
        return Err(Error::NotPositive(format!(
            "distributed yield already covers {periods} periods"
        )));
    }
    let available = book.guaranty.available()?;
    if !available.is_positive() {
        return Err(Error::QuantityInsufficient(format!(
            "guaranty pool of plan {} is empty",
            book.plan.id
        )));
    }
    let pay = gap.min(&available)?;

    let plan_id = book.plan.id;
    pay_out(book, ctx, &pay, format!("guaranty-pay:{plan_id}"), fx)?;
    fx.emit(ProtocolEvent::GuarantyPaid {
        plan_id,
        periods,
        paid: pay.clone(),
    });
    tracing::info!(plan_id, %submitter, periods, %pay, %gap, "guaranty shortfall paid");
    Ok(pay)
}

/// Pay whatever full-term shortfall the pool can still cover. Returns the
/// amount paid (possibly zero).
fn settle_maturity(book: &mut PlanBook, ctx: &Context, fx: &mut Effects) -> Result<Asset> {
    let gap = shortfall(book, book.plan.return_periods)?;
    let available = book.guaranty.available()?;
    let pay = gap.min(&available)?;
    if pay.is_positive() {
        let plan_id = book.plan.id;
        pay_out(book, ctx, &pay, format!("guaranty-final:{plan_id}"), fx)?;
        fx.emit(ProtocolEvent::GuarantyPaid {
            plan_id,
            periods: book.plan.return_periods,
            paid: pay.clone(),
        });
        tracing::info!(plan_id, %pay, "final guaranty settlement");
    }
    Ok(pay)
}

fn unlock_all(record: &mut GuarantorStake) -> Result<()> {
    let locked = record.locked_stake.clone();
    record.available_stake.add_assign(&locked)?;
    record.locked_stake = Asset::zero(&locked.symbol);
    Ok(())
}

/// Withdraw `quantity` of a guarantor's stake and earned yield.
pub fn redeem(
    book: &mut PlanBook,
    ctx: &Context,
    guarantor: &Account,
    quantity: &Asset,
    fx: &mut Effects,
) -> Result<()> {
    if !quantity.is_positive() {
        return Err(Error::NotPositive(format!("redeem {quantity} must be positive")));
    }
    if quantity.symbol != book.plan.goal_asset.symbol {
        return Err(Error::SymbolMismatch(format!(
            "redeem {quantity}, plan pays {}",
            book.plan.goal_asset.symbol
        )));
    }
    book.guarantor(guarantor)?;
    let plan_id = book.plan.id;

    let memo = if book.plan.status.is_aborted() {
        let record = book.guarantor_mut(guarantor)?;
        unlock_all(record)?;
        record.earned_yield = Asset::zero(&quantity.symbol);
        format!("guaranty-redeem:{plan_id}:aborted")
    } else if book.plan.status.is_raised() && ctx.now >= book.plan.return_end_time {
        // Only a raise that went through owes the full-term yield.
        settle_maturity(book, ctx, fx)?;
        unlock_all(book.guarantor_mut(guarantor)?)?;
        format!("guaranty-redeem:{plan_id}:matured")
    } else {
        unlock_in_progress(book, ctx, guarantor, quantity)?;
        format!("guaranty-redeem:{plan_id}")
    };

    execute_withdrawal(book, ctx, guarantor, quantity, memo, fx)
}

/// Unlock just enough of `guarantor`'s locked stake for a withdrawal of
/// `quantity`, bounded by its share of the coverage margin.
fn unlock_in_progress(book: &mut PlanBook, ctx: &Context, guarantor: &Account, quantity: &Asset) -> Result<()> {
    let plan = &book.plan;
    let elapsed = plan.elapsed_periods(ctx.now);
    let required = book
        .coverage_target()?
        .mul_div(elapsed as i64, plan.return_periods as i64)?;
    let actual = book
        .guaranty
        .available()?
        .checked_add(&book.guaranty.yield_received)?;
    if actual.amount < required.amount {
        return Err(Error::InvalidStatus(format!(
            "coverage {actual} below required {required} after {elapsed} periods"
        )));
    }
    let margin = actual.amount - required.amount;

    let total_backing: i64 = book
        .guarantors
        .values()
        .map(|g| g.backing().map(|b| b.amount))
        .sum::<Result<i64>>()?;
    let record = book.guarantor_mut(guarantor)?;
    let own_backing = record.backing()?.amount;
    let margin_share = if total_backing == 0 {
        0
    } else {
        math::mul_div_floor(margin, own_backing, total_backing)?
    };

    let spendable = record.earned_yield.amount + record.available_stake.amount;
    let need = quantity.amount - spendable;
    if need <= 0 {
        return Ok(());
    }
    let unlockable = margin_share.min(record.locked_stake.amount);
    if need > unlockable {
        return Err(Error::QuantityInsufficient(format!(
            "redeem {quantity} exceeds unlockable balance {}",
            quantity.with_amount(spendable + unlockable)?
        )));
    }
    let unlock = record.locked_stake.with_amount(need)?;
    record.locked_stake.sub_assign(&unlock)?;
    record.available_stake.add_assign(&unlock)?;
    tracing::debug!(%guarantor, %unlock, margin, margin_share, "coverage margin unlocked");
    Ok(())
}

/// Pay `quantity` to `guarantor`, drawing earned yield first, then
/// available stake. Only the stake part leaves the pool's collateral.
pub fn execute_withdrawal(
    book: &mut PlanBook,
    ctx: &Context,
    guarantor: &Account,
    quantity: &Asset,
    memo: String,
    fx: &mut Effects,
) -> Result<()> {
    let plan_id = book.plan.id;
    let goal_contract = book.plan.goal_asset.contract.clone();
    let record = book.guarantor_mut(guarantor)?;

    let from_yield = quantity.min(&record.earned_yield)?;
    let from_stake = quantity.checked_sub(&from_yield)?;
    if from_stake.amount > record.available_stake.amount {
        return Err(Error::QuantityInsufficient(format!(
            "{guarantor} can withdraw {} yield + {} stake, requested {quantity}",
            record.earned_yield, record.available_stake
        )));
    }
    record.earned_yield.sub_assign(&from_yield)?;
    record.available_stake.sub_assign(&from_stake)?;
    record.total_stake.sub_assign(&from_stake)?;
    record.withdrawn.add_assign(quantity)?;
    book.guaranty.total_funds.sub_assign(&from_stake)?;

    fx.transfer(
        &goal_contract,
        &ctx.config.guaranty_pool_account,
        guarantor,
        quantity,
        memo,
    );
    fx.emit(ProtocolEvent::Redeemed {
        plan_id,
        guarantor: guarantor.clone(),
        quantity: quantity.clone(),
    });
    tracing::info!(plan_id, %guarantor, %from_yield, %from_stake, "guaranty redeemed");
    Ok(())
}

/// Credit the guaranty share of a yield distribution to guarantors'
/// `earned_yield`, weighted by backing.
pub fn credit_yield(book: &mut PlanBook, share: &Asset) -> Result<()> {
    if !share.is_positive() {
        return Ok(());
    }
    let weights = book
        .guarantors
        .values()
        .map(|g| g.backing().map(|b| b.amount))
        .collect::<Result<Vec<_>>>()?;
    let credits = math::split_proportional(share.amount, &weights)?;
    for (record, credit) in book.guarantors.values_mut().zip(credits) {
        let credit = share.with_amount(credit)?;
        record.earned_yield.add_assign(&credit)?;
    }
    book.guaranty.yield_received.add_assign(share)?;
    Ok(())
}
