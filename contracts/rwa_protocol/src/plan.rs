//! # Plan lifecycle
//!
//! Creation, investment with hard-cap overflow refund, status re-evaluation,
//! cancellation and principal refunds.
//!
//! Receipts are issued at `receipt_per_unit` per whole goal unit:
//! `issued = floor(accepted * receipt_per_unit / 10^goal_precision)`.

use crate::asset::{Account, Asset};
use crate::effects::{Effects, ProtocolEvent};
use crate::errors::{Error, Result};
use crate::math;
use crate::types::{CoverageSnapshot, Plan, PlanBook, PlanParams, PlanStatus, SECONDS_PER_PERIOD};
use crate::{stake, Context};

pub const MAX_TITLE_LEN: usize = 64;
pub const MAX_HARD_CAP_PCT: u8 = 120;

/// Validate `params` and build a new `Pending` plan.
pub fn create_plan(id: u64, params: PlanParams, now: u64) -> Result<Plan> {
    let title_len = params.title.chars().count();
    if title_len == 0 || title_len > MAX_TITLE_LEN {
        return Err(Error::InvalidParameter(format!(
            "title length {title_len} should be in range [1,{MAX_TITLE_LEN}]"
        )));
    }
    if params.goal_amount <= 0 {
        return Err(Error::InvalidParameter("goal must be positive".into()));
    }
    if params.receipt_per_unit <= 0 {
        return Err(Error::InvalidParameter("receipt per unit must be positive".into()));
    }
    if params.goal_asset.symbol == params.receipt_asset.symbol {
        return Err(Error::InvalidParameter(
            "receipt symbol must differ from goal symbol".into(),
        ));
    }
    if params.soft_cap_pct == 0 || params.soft_cap_pct > 100 {
        return Err(Error::InvalidParameter(format!(
            "soft cap {}% should be in range [1,100]",
            params.soft_cap_pct
        )));
    }
    if params.hard_cap_pct < params.soft_cap_pct || params.hard_cap_pct > MAX_HARD_CAP_PCT {
        return Err(Error::InvalidParameter(format!(
            "hard cap {}% should be in range [{},{MAX_HARD_CAP_PCT}]",
            params.hard_cap_pct, params.soft_cap_pct
        )));
    }
    if params.end_time <= params.start_time {
        return Err(Error::InvalidParameter("end time must be after start time".into()));
    }
    if params.return_periods == 0 {
        return Err(Error::InvalidParameter("return periods must be positive".into()));
    }
    if params.guaranteed_apr_bp <= 0 {
        return Err(Error::InvalidParameter("guaranteed APR must be positive".into()));
    }
    let return_end_time = (params.return_periods as u64)
        .checked_mul(SECONDS_PER_PERIOD)
        .and_then(|d| d.checked_add(params.start_time))
        .ok_or(Error::Overflow)?;
    if return_end_time <= params.end_time {
        return Err(Error::InvalidParameter(
            "return term must outlast the raise window".into(),
        ));
    }

    let goal_amount = Asset::new(params.goal_amount, params.goal_asset.symbol.clone())?;
    // Make sure the hard cap itself is representable.
    goal_amount.mul_div(params.hard_cap_pct as i64, 100)?;

    Ok(Plan {
        id,
        raised_amount: Asset::zero(&params.goal_asset.symbol),
        issued_receipts: Asset::zero(&params.receipt_asset.symbol),
        creator: params.creator,
        title: params.title,
        goal_asset: params.goal_asset,
        goal_amount,
        receipt_asset: params.receipt_asset,
        receipt_per_unit: params.receipt_per_unit,
        soft_cap_pct: params.soft_cap_pct,
        hard_cap_pct: params.hard_cap_pct,
        start_time: params.start_time,
        end_time: params.end_time,
        return_periods: params.return_periods,
        guaranteed_apr_bp: params.guaranteed_apr_bp,
        status: PlanStatus::Pending,
        return_end_time,
        created_at: now,
    })
}

/// Status the plan should be in at `now`.
///
/// Pure function of the plan's clock, raise totals and the guaranty coverage
/// snapshot. Never returns a status behind the current one.
pub fn reevaluate_status(
    plan: &Plan,
    now: u64,
    coverage: CoverageSnapshot,
    pledge_window_secs: u64,
) -> Result<PlanStatus> {
    let current = plan.status;
    let next = match current {
        PlanStatus::Completed | PlanStatus::Failed | PlanStatus::Cancelled | PlanStatus::Refunded => current,
        PlanStatus::Success if now >= plan.return_end_time => PlanStatus::Completed,
        PlanStatus::Success => current,
        _ => {
            let raised = plan.raised_amount.amount;
            let soft = plan.soft_cap_amount()?.amount;
            let hard = plan.hard_cap_amount()?.amount;
            if now < plan.start_time {
                PlanStatus::Pending
            } else if now < plan.end_time {
                if raised >= hard {
                    PlanStatus::HardCapHit
                } else if raised >= soft {
                    PlanStatus::SoftCapHit
                } else {
                    PlanStatus::Active
                }
            } else if raised < soft {
                PlanStatus::Failed
            } else if coverage.is_covered() {
                if now >= plan.return_end_time {
                    PlanStatus::Completed
                } else {
                    PlanStatus::Success
                }
            } else if now >= plan.end_time.saturating_add(pledge_window_secs) {
                PlanStatus::Failed
            } else {
                PlanStatus::PendingPledge
            }
        }
    };
    Ok(if current.can_advance_to(next) { next } else { current })
}

/// Move the plan to `next`, running the transition's side effects.
pub fn transition(book: &mut PlanBook, ctx: &Context, next: PlanStatus, fx: &mut Effects) -> Result<()> {
    let from = book.plan.status;
    if from == next {
        return Ok(());
    }
    if !from.can_advance_to(next) {
        return Err(Error::InvalidStatus(format!(
            "plan {} cannot move from {} to {}",
            book.plan.id,
            from.as_str(),
            next.as_str()
        )));
    }
    book.plan.status = next;
    let plan_id = book.plan.id;

    match next {
        PlanStatus::Success | PlanStatus::Completed if !matches!(from, PlanStatus::Success) => {
            // Raise succeeded: hand the funds to the creator.
            fx.transfer(
                &book.plan.goal_asset.contract,
                &ctx.config.core_account,
                &book.plan.creator,
                &book.plan.raised_amount,
                format!("release:{plan_id}"),
            );
        }
        PlanStatus::Failed | PlanStatus::Cancelled => {
            stake::batch_unstake(book, ctx, fx)?;
            stake::return_parked(book, ctx, fx)?;
        }
        _ => {}
    }

    fx.emit(ProtocolEvent::StatusChanged { plan_id, from, to: next });
    tracing::info!(plan_id, from = from.as_str(), to = next.as_str(), "plan status changed");
    Ok(())
}

/// Re-evaluate the status at `ctx.now` and apply any transition.
pub fn refresh_status(book: &mut PlanBook, ctx: &Context, fx: &mut Effects) -> Result<PlanStatus> {
    let coverage = book.coverage_snapshot()?;
    let next = reevaluate_status(&book.plan, ctx.now, coverage, ctx.config.pledge_window_secs)?;
    transition(book, ctx, next, fx)?;
    Ok(next)
}

/// Receipts issued for `accepted` goal units.
pub fn receipts_for(plan: &Plan, accepted: &Asset) -> Result<Asset> {
    let unit = plan.goal_asset.symbol.unit();
    let issued = math::mul_div_floor(accepted.amount, plan.receipt_per_unit, unit)?;
    Asset::new(issued, plan.receipt_asset.symbol.clone())
}

/// Principal returned for `receipts`. Inverse of [`receipts_for`].
pub fn principal_for(plan: &Plan, receipts: &Asset) -> Result<Asset> {
    let unit = plan.goal_asset.symbol.unit();
    let principal = math::mul_div_floor(receipts.amount, unit, plan.receipt_per_unit)?;
    Asset::new(principal, plan.goal_asset.symbol.clone())
}

/// Accept an investment, capped at the hard-cap remainder; the excess goes
/// straight back to the investor. Returns `(accepted, refunded, issued)`.
pub fn invest(
    book: &mut PlanBook,
    ctx: &Context,
    investor: &Account,
    quantity: &Asset,
    fx: &mut Effects,
) -> Result<(Asset, Asset, Asset)> {
    let plan = &book.plan;
    if ctx.now < plan.start_time {
        return Err(Error::InvalidStatus(format!("plan {} has not started", plan.id)));
    }
    if ctx.now >= plan.end_time {
        return Err(Error::Expired(format!("raise window of plan {} is closed", plan.id)));
    }
    if !plan.status.accepts_investment() {
        return Err(Error::InvalidStatus(format!(
            "plan {} is {}, not accepting investment",
            plan.id,
            plan.status.as_str()
        )));
    }
    if !quantity.is_positive() {
        return Err(Error::NotPositive(format!("investment {quantity} must be positive")));
    }

    let remaining = plan.hard_cap_amount()?.checked_sub(&plan.raised_amount)?;
    if !remaining.is_positive() {
        return Err(Error::QuantityInsufficient(format!("plan {} hard cap reached", plan.id)));
    }
    let accepted = quantity.min(&remaining)?;
    let refunded = quantity.checked_sub(&accepted)?;
    let issued = receipts_for(plan, &accepted)?;
    if !issued.is_positive() {
        return Err(Error::NotPositive(format!(
            "investment {accepted} is too small to issue a receipt"
        )));
    }
    let plan_id = plan.id;

    book.plan.raised_amount.add_assign(&accepted)?;
    book.plan.issued_receipts.add_assign(&issued)?;

    let plan = &book.plan;
    fx.transfer(
        &plan.goal_asset.contract,
        &ctx.config.core_account,
        investor,
        &refunded,
        format!("hard cap refund:{plan_id}"),
    );
    fx.issue(&plan.receipt_asset.contract, investor, &issued, format!("receipt:{plan_id}"));
    fx.emit(ProtocolEvent::Invested {
        plan_id,
        investor: investor.clone(),
        accepted: accepted.clone(),
        refunded: refunded.clone(),
        receipts: issued.clone(),
    });
    tracing::info!(plan_id, %investor, %accepted, %refunded, %issued, "investment accepted");

    refresh_status(book, ctx, fx)?;
    Ok((accepted, refunded, issued))
}

/// Who surrenders the receipts in a refund.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptSource {
    /// Receipts were transferred to the core account with a refund memo.
    Deposited,
    /// Receipts are burned from the investor's own balance.
    Investor,
}

/// Return principal for `receipts` of an aborted plan and burn them.
pub fn refund(
    book: &mut PlanBook,
    ctx: &Context,
    investor: &Account,
    receipts: &Asset,
    source: ReceiptSource,
    fx: &mut Effects,
) -> Result<Asset> {
    let plan = &book.plan;
    if !plan.status.is_aborted() {
        return Err(Error::InvalidStatus(format!(
            "plan {} is {}, refunds need a failed or cancelled plan",
            plan.id,
            plan.status.as_str()
        )));
    }
    if receipts.symbol != plan.receipt_asset.symbol {
        return Err(Error::SymbolMismatch(format!(
            "expected {}, actual {}",
            plan.receipt_asset.symbol, receipts.symbol
        )));
    }
    if !receipts.is_positive() {
        return Err(Error::NotPositive(format!("refund {receipts} must be positive")));
    }
    if receipts.amount > plan.issued_receipts.amount {
        return Err(Error::QuantityInsufficient(format!(
            "refund {receipts} exceeds outstanding {}",
            plan.issued_receipts
        )));
    }
    // The last receipts out take whatever principal remains, so no dust is stranded.
    let principal = if receipts.amount == plan.issued_receipts.amount {
        plan.raised_amount.clone()
    } else {
        principal_for(plan, receipts)?
    };
    if principal.amount > plan.raised_amount.amount {
        return Err(Error::QuantityInsufficient(format!(
            "refund principal {principal} exceeds raised {}",
            plan.raised_amount
        )));
    }
    let plan_id = plan.id;

    book.plan.raised_amount.sub_assign(&principal)?;
    book.plan.issued_receipts.sub_assign(receipts)?;

    let burn_from = match source {
        ReceiptSource::Deposited => &ctx.config.core_account,
        ReceiptSource::Investor => investor,
    };
    let plan = &book.plan;
    fx.transfer(
        &plan.goal_asset.contract,
        &ctx.config.core_account,
        investor,
        &principal,
        format!("refund for plan:{plan_id}"),
    );
    fx.burn(&plan.receipt_asset.contract, burn_from, receipts, format!("refund for plan:{plan_id}"));
    fx.emit(ProtocolEvent::Refunded {
        plan_id,
        investor: investor.clone(),
        receipts: receipts.clone(),
        principal: principal.clone(),
    });
    tracing::info!(plan_id, %investor, %receipts, %principal, "principal refunded");

    if plan.raised_amount.is_zero() && plan.issued_receipts.is_zero() {
        transition(book, ctx, PlanStatus::Refunded, fx)?;
    }
    Ok(principal)
}

/// Creator cancels the plan before the raise has been settled.
pub fn cancel(book: &mut PlanBook, ctx: &Context, creator: &Account, fx: &mut Effects) -> Result<()> {
    if &book.plan.creator != creator {
        return Err(Error::NoAuth(format!(
            "{creator} is not the creator of plan {}",
            book.plan.id
        )));
    }
    if !book.plan.status.is_cancellable() {
        return Err(Error::InvalidStatus(format!(
            "cannot cancel plan {} in status {}",
            book.plan.id,
            book.plan.status.as_str()
        )));
    }
    transition(book, ctx, PlanStatus::Cancelled, fx)?;
    fx.emit(ProtocolEvent::Cancelled {
        plan_id: book.plan.id,
        creator: creator.clone(),
    });
    Ok(())
}

/// Create a plan and the empty book that will hold its accounting.
pub fn open(id: u64, params: PlanParams, ctx: &Context) -> Result<(PlanBook, Effects)> {
    let plan = create_plan(id, params, ctx.now)?;
    let mut fx = Effects::new();
    fx.emit(ProtocolEvent::PlanCreated {
        plan_id: id,
        creator: plan.creator.clone(),
        goal: plan.goal_amount.clone(),
    });
    tracing::info!(plan_id = id, creator = %plan.creator, goal = %plan.goal_amount, "plan created");
    Ok((PlanBook::new(plan, ctx.config.default_slippage_bp), fx))
}
