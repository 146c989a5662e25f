//! Deposit notifications and memo decoding.
//!
//! A transfer into the core account carries a colon-delimited memo naming
//! the plan and what the money is for. It is decoded exactly once, here, into
//! a [`DepositPurpose`]; everything downstream matches on the enum.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::asset::{Account, Asset};
use crate::errors::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "purpose", rename_all = "snake_case")]
pub enum DepositPurpose {
    /// `invest:<plan>`: goal-asset investment.
    Invest { plan_id: u64 },
    /// `guaranty:<plan>`: guarantor collateral.
    Guaranty { plan_id: u64 },
    /// `reward:<plan>`: reward injected straight into the staking pool.
    Reward { plan_id: u64 },
    /// `plan:<plan>`: yield to distribute.
    Yield { plan_id: u64 },
    /// `refund:<plan>:<investor>`: receipts returned for principal.
    Refund { plan_id: u64, investor: Account },
    /// `stake:<plan>`: receipts staked for rewards.
    Stake { plan_id: u64 },
}

impl DepositPurpose {
    pub fn plan_id(&self) -> u64 {
        match self {
            DepositPurpose::Invest { plan_id }
            | DepositPurpose::Guaranty { plan_id }
            | DepositPurpose::Reward { plan_id }
            | DepositPurpose::Yield { plan_id }
            | DepositPurpose::Refund { plan_id, .. }
            | DepositPurpose::Stake { plan_id } => *plan_id,
        }
    }
}

fn parse_plan_id(raw: &str) -> Result<u64> {
    raw.trim()
        .parse()
        .map_err(|_| Error::InvalidFormat(format!("invalid plan id `{}`", raw.trim())))
}

impl FromStr for DepositPurpose {
    type Err = Error;

    fn from_str(memo: &str) -> Result<Self> {
        let parts: Vec<&str> = memo.split(':').map(str::trim).collect();
        let purpose = match parts.as_slice() {
            ["invest", id] => DepositPurpose::Invest { plan_id: parse_plan_id(id)? },
            ["guaranty", id] => DepositPurpose::Guaranty { plan_id: parse_plan_id(id)? },
            ["reward", id] => DepositPurpose::Reward { plan_id: parse_plan_id(id)? },
            ["plan", id] => DepositPurpose::Yield { plan_id: parse_plan_id(id)? },
            ["stake", id] => DepositPurpose::Stake { plan_id: parse_plan_id(id)? },
            ["refund", id, investor] if !investor.is_empty() => DepositPurpose::Refund {
                plan_id: parse_plan_id(id)?,
                investor: Account::from(*investor),
            },
            _ => return Err(Error::InvalidFormat(format!("invalid memo `{memo}`"))),
        };
        Ok(purpose)
    }
}

impl fmt::Display for DepositPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DepositPurpose::Invest { plan_id } => write!(f, "invest:{plan_id}"),
            DepositPurpose::Guaranty { plan_id } => write!(f, "guaranty:{plan_id}"),
            DepositPurpose::Reward { plan_id } => write!(f, "reward:{plan_id}"),
            DepositPurpose::Yield { plan_id } => write!(f, "plan:{plan_id}"),
            DepositPurpose::Refund { plan_id, investor } => write!(f, "refund:{plan_id}:{investor}"),
            DepositPurpose::Stake { plan_id } => write!(f, "stake:{plan_id}"),
        }
    }
}

/// Inbound transfer notification from the custody layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositEvent {
    pub from: Account,
    pub to: Account,
    /// Token contract that issued `quantity`.
    pub contract: Account,
    pub quantity: Asset,
    pub memo: String,
}

impl DepositEvent {
    /// Whether the core should act on this transfer at all: only incoming
    /// transfers to `core`, never its own outgoing ones.
    pub fn is_for(&self, core: &Account) -> bool {
        &self.to == core && &self.from != core
    }

    pub fn purpose(&self) -> Result<DepositPurpose> {
        if !self.quantity.is_positive() {
            return Err(Error::NotPositive(format!(
                "deposit quantity {} must be positive",
                self.quantity
            )));
        }
        self.memo.parse()
    }
}
