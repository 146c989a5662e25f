//! # Reward accrual
//!
//! Reward-per-share accumulator. The pool keeps `reward_per_share` scaled by
//! [`PRECISION`]; each staker remembers the accumulator value at its last
//! settlement and is owed `avl_staked * (rps - last) / PRECISION` since then.
//! Every staker action settles first, so a stake change never retroactively
//! changes rewards already earned.
//!
//! Stake is the plan's receipt asset held by the core account; rewards are
//! goal-asset funds held by the stake-pool account.

use crate::asset::{Account, Asset};
use crate::effects::{Effects, ProtocolEvent};
use crate::errors::{Error, Result};
use crate::types::{PlanBook, StakePool, StakerRecord};
use crate::Context;

/// Fixed-point scale of `reward_per_share`.
pub const PRECISION: u128 = 1_000_000_000_000_000_000;

fn to_u128(amount: i64) -> Result<u128> {
    u128::try_from(amount).map_err(|_| Error::Overflow)
}

/// Reward owed to `staker` since its last settlement.
pub fn pending_reward(pool: &StakePool, staker: &StakerRecord) -> Result<i64> {
    let delta = pool
        .reward_per_share
        .checked_sub(staker.last_reward_per_share)
        .ok_or(Error::Overflow)?;
    let owed = to_u128(staker.avl_staked.amount)?
        .checked_mul(delta)
        .ok_or(Error::Overflow)?
        / PRECISION;
    i64::try_from(owed).map_err(|_| Error::Overflow)
}

fn settle(pool: &StakePool, staker: &mut StakerRecord) -> Result<()> {
    let pending = pending_reward(pool, staker)?;
    if pending > 0 {
        let pending = staker.unclaimed_rewards.with_amount(pending)?;
        staker.unclaimed_rewards.add_assign(&pending)?;
    }
    staker.last_reward_per_share = pool.reward_per_share;
    Ok(())
}

/// Inject `quantity` of goal asset into the reward pool.
///
/// With nobody staked the reward is parked in `unallocated_rewards` and
/// folded into the next injection that finds stakers.
pub fn add_reward(book: &mut PlanBook, quantity: &Asset, fx: &mut Effects) -> Result<()> {
    if !quantity.is_positive() {
        return Err(Error::NotPositive(format!("reward {quantity} must be positive")));
    }
    let plan_id = book.plan.id;
    let pool = &mut book.stake_pool;
    pool.total_rewards.add_assign(quantity)?;

    if pool.total_staked.is_zero() {
        pool.unallocated_rewards.add_assign(quantity)?;
        tracing::debug!(plan_id, %quantity, "no stakers, reward parked");
    } else {
        let reward = quantity.checked_add(&pool.unallocated_rewards)?;
        let increment = to_u128(reward.amount)?
            .checked_mul(PRECISION)
            .ok_or(Error::Overflow)?
            / to_u128(pool.total_staked.amount)?;
        pool.last_reward_per_share = pool.reward_per_share;
        pool.reward_per_share = pool
            .reward_per_share
            .checked_add(increment)
            .ok_or(Error::Overflow)?;
        pool.unallocated_rewards = Asset::zero(&quantity.symbol);
        tracing::debug!(plan_id, %reward, increment, "reward per share advanced");
    }

    fx.emit(ProtocolEvent::RewardAdded {
        plan_id,
        quantity: quantity.clone(),
    });
    Ok(())
}

/// Stake receipt tokens deposited by `owner`.
pub fn stake(book: &mut PlanBook, owner: &Account, quantity: &Asset, fx: &mut Effects) -> Result<()> {
    if book.plan.status.is_aborted() {
        return Err(Error::InvalidStatus(format!(
            "plan {} is {}, staking closed",
            book.plan.id,
            book.plan.status.as_str()
        )));
    }
    if !quantity.is_positive() {
        return Err(Error::NotPositive(format!("stake {quantity} must be positive")));
    }

    let goal = book.plan.goal_asset.symbol.clone();
    let pool = &mut book.stake_pool;
    let staker = book
        .stakers
        .entry(owner.clone())
        .or_insert_with(|| StakerRecord {
            owner: owner.clone(),
            avl_staked: Asset::zero(&quantity.symbol),
            cum_staked: Asset::zero(&quantity.symbol),
            last_reward_per_share: pool.reward_per_share,
            unclaimed_rewards: Asset::zero(&goal),
            claimed_rewards: Asset::zero(&goal),
        });
    settle(pool, staker)?;
    staker.avl_staked.add_assign(quantity)?;
    staker.cum_staked.add_assign(quantity)?;
    pool.total_staked.add_assign(quantity)?;
    pool.cum_staked.add_assign(quantity)?;

    tracing::info!(plan_id = book.plan.id, %owner, %quantity, "staked");
    fx.emit(ProtocolEvent::Staked {
        plan_id: book.plan.id,
        owner: owner.clone(),
        quantity: quantity.clone(),
    });
    Ok(())
}

/// Settle and pay out everything `owner` has earned. Returns the amount paid.
fn pay_rewards(book: &mut PlanBook, ctx: &Context, owner: &Account, fx: &mut Effects) -> Result<Asset> {
    let plan_id = book.plan.id;
    let pool = &mut book.stake_pool;
    let staker = book
        .stakers
        .get_mut(owner)
        .ok_or_else(|| Error::RecordNotFound(format!("no stake of {owner} in plan {plan_id}")))?;
    settle(pool, staker)?;

    let paid = staker.unclaimed_rewards.clone();
    if paid.is_positive() {
        staker.unclaimed_rewards = Asset::zero(&paid.symbol);
        staker.claimed_rewards.add_assign(&paid)?;
        pool.claimed_rewards.add_assign(&paid)?;
        fx.transfer(
            &book.plan.goal_asset.contract,
            &ctx.config.stake_pool_account,
            owner,
            &paid,
            format!("claim:{plan_id}"),
        );
        fx.emit(ProtocolEvent::Claimed {
            plan_id,
            owner: owner.clone(),
            quantity: paid.clone(),
        });
    }
    Ok(paid)
}

fn drop_if_empty(book: &mut PlanBook, owner: &Account) {
    let empty = book
        .stakers
        .get(owner)
        .is_some_and(|s| s.avl_staked.is_zero() && s.unclaimed_rewards.is_zero());
    if empty {
        book.stakers.remove(owner);
    }
}

pub fn claim(book: &mut PlanBook, ctx: &Context, owner: &Account, fx: &mut Effects) -> Result<Asset> {
    let paid = pay_rewards(book, ctx, owner, fx)?;
    if !paid.is_positive() {
        return Err(Error::NotPositive(format!("{owner} has no rewards to claim")));
    }
    tracing::info!(plan_id = book.plan.id, %owner, %paid, "rewards claimed");
    drop_if_empty(book, owner);
    Ok(paid)
}

/// Pay out pending rewards, then return `quantity` receipts to `owner`.
pub fn unstake(
    book: &mut PlanBook,
    ctx: &Context,
    owner: &Account,
    quantity: &Asset,
    fx: &mut Effects,
) -> Result<()> {
    if !quantity.is_positive() {
        return Err(Error::NotPositive(format!("unstake {quantity} must be positive")));
    }
    pay_rewards(book, ctx, owner, fx)?;

    let plan_id = book.plan.id;
    let staker = book
        .stakers
        .get_mut(owner)
        .ok_or_else(|| Error::RecordNotFound(format!("no stake of {owner} in plan {plan_id}")))?;
    staker.avl_staked = staker.avl_staked.checked_sub(quantity).map_err(|e| match e {
        Error::QuantityInsufficient(_) => Error::QuantityInsufficient(format!(
            "{owner} has {} staked, cannot unstake {quantity}",
            staker.avl_staked
        )),
        other => other,
    })?;
    book.stake_pool.total_staked.sub_assign(quantity)?;

    fx.transfer(
        &book.plan.receipt_asset.contract,
        &ctx.config.core_account,
        owner,
        quantity,
        format!("unstake:{plan_id}"),
    );
    fx.emit(ProtocolEvent::Unstaked {
        plan_id,
        owner: owner.clone(),
        quantity: quantity.clone(),
    });
    tracing::info!(plan_id, %owner, %quantity, "unstaked");
    drop_if_empty(book, owner);
    Ok(())
}

/// Return every staker's receipts (and any earned rewards) and empty the pool.
pub fn batch_unstake(book: &mut PlanBook, ctx: &Context, fx: &mut Effects) -> Result<usize> {
    let owners: Vec<Account> = book.stakers.keys().cloned().collect();
    let plan_id = book.plan.id;
    for owner in &owners {
        pay_rewards(book, ctx, owner, fx)?;
        let Some(staker) = book.stakers.get_mut(owner) else {
            continue;
        };
        let principal = staker.avl_staked.clone();
        if principal.is_positive() {
            staker.avl_staked = Asset::zero(&principal.symbol);
            book.stake_pool.total_staked.sub_assign(&principal)?;
            fx.transfer(
                &book.plan.receipt_asset.contract,
                &ctx.config.core_account,
                owner,
                &principal,
                format!("unstake:{plan_id}"),
            );
            fx.emit(ProtocolEvent::Unstaked {
                plan_id,
                owner: owner.clone(),
                quantity: principal,
            });
        }
        drop_if_empty(book, owner);
    }
    tracing::info!(plan_id, count = owners.len(), "batch unstake swept stakers");
    Ok(owners.len())
}

/// Send rewards still parked in the pool back to the plan creator. Returns
/// the amount returned (possibly zero).
///
/// Only aborted plans call this: no later injection will ever fold the parked
/// amount into a staker's share.
pub fn return_parked(book: &mut PlanBook, ctx: &Context, fx: &mut Effects) -> Result<Asset> {
    let parked = book.stake_pool.unallocated_rewards.clone();
    if !parked.is_positive() {
        return Ok(parked);
    }
    let plan_id = book.plan.id;
    let pool = &mut book.stake_pool;
    pool.total_rewards.sub_assign(&parked)?;
    pool.unallocated_rewards = Asset::zero(&parked.symbol);
    fx.transfer(
        &book.plan.goal_asset.contract,
        &ctx.config.stake_pool_account,
        &book.plan.creator,
        &parked,
        format!("reward-return:{plan_id}"),
    );
    tracing::info!(plan_id, %parked, creator = %book.plan.creator, "parked rewards returned");
    Ok(parked)
}
