//! Side effects produced by a step.
//!
//! The core never moves money itself. Each step returns the outbound
//! instructions it wants executed plus audit events, and the host persists
//! them together with the new plan book.

use serde::{Deserialize, Serialize};

use crate::asset::{Account, Asset};
use crate::types::PlanStatus;

/// Instruction for the custody or swap collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outbound {
    Transfer {
        contract: Account,
        from: Account,
        to: Account,
        quantity: Asset,
        memo: String,
    },
    Issue {
        contract: Account,
        to: Account,
        quantity: Asset,
        memo: String,
    },
    Burn {
        contract: Account,
        from: Account,
        quantity: Asset,
        memo: String,
    },
    Swap {
        input: Asset,
        pair: String,
        min_output: Asset,
        target_contract: Account,
    },
}

impl Outbound {
    pub fn kind(&self) -> &'static str {
        match self {
            Outbound::Transfer { .. } => "transfer",
            Outbound::Issue { .. } => "issue",
            Outbound::Burn { .. } => "burn",
            Outbound::Swap { .. } => "swap",
        }
    }
}

/// Audit record of a committed state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProtocolEvent {
    PlanCreated {
        plan_id: u64,
        creator: Account,
        goal: Asset,
    },
    Invested {
        plan_id: u64,
        investor: Account,
        accepted: Asset,
        refunded: Asset,
        receipts: Asset,
    },
    StatusChanged {
        plan_id: u64,
        from: PlanStatus,
        to: PlanStatus,
    },
    GuarantyDeposited {
        plan_id: u64,
        guarantor: Account,
        quantity: Asset,
    },
    GuarantyPaid {
        plan_id: u64,
        periods: u32,
        paid: Asset,
    },
    Redeemed {
        plan_id: u64,
        guarantor: Account,
        quantity: Asset,
    },
    YieldDistributed {
        plan_id: u64,
        period: u32,
        stake_share: Asset,
        guaranty_share: Asset,
        buyback_share: Asset,
    },
    BuybackRequested {
        plan_id: u64,
        input: Asset,
        min_output: Asset,
    },
    RewardAdded {
        plan_id: u64,
        quantity: Asset,
    },
    Staked {
        plan_id: u64,
        owner: Account,
        quantity: Asset,
    },
    Unstaked {
        plan_id: u64,
        owner: Account,
        quantity: Asset,
    },
    Claimed {
        plan_id: u64,
        owner: Account,
        quantity: Asset,
    },
    Refunded {
        plan_id: u64,
        investor: Account,
        receipts: Asset,
        principal: Asset,
    },
    Cancelled {
        plan_id: u64,
        creator: Account,
    },
    ConfigUpdated {
        plan_id: Option<u64>,
        key: String,
        value: String,
    },
}

impl ProtocolEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ProtocolEvent::PlanCreated { .. } => "plan_created",
            ProtocolEvent::Invested { .. } => "invested",
            ProtocolEvent::StatusChanged { .. } => "status_changed",
            ProtocolEvent::GuarantyDeposited { .. } => "guaranty_deposited",
            ProtocolEvent::GuarantyPaid { .. } => "guaranty_paid",
            ProtocolEvent::Redeemed { .. } => "redeemed",
            ProtocolEvent::YieldDistributed { .. } => "yield_distributed",
            ProtocolEvent::BuybackRequested { .. } => "buyback_requested",
            ProtocolEvent::RewardAdded { .. } => "reward_added",
            ProtocolEvent::Staked { .. } => "staked",
            ProtocolEvent::Unstaked { .. } => "unstaked",
            ProtocolEvent::Claimed { .. } => "claimed",
            ProtocolEvent::Refunded { .. } => "refunded",
            ProtocolEvent::Cancelled { .. } => "cancelled",
            ProtocolEvent::ConfigUpdated { .. } => "config_updated",
        }
    }

    pub fn plan_id(&self) -> Option<u64> {
        match self {
            ProtocolEvent::PlanCreated { plan_id, .. }
            | ProtocolEvent::Invested { plan_id, .. }
            | ProtocolEvent::StatusChanged { plan_id, .. }
            | ProtocolEvent::GuarantyDeposited { plan_id, .. }
            | ProtocolEvent::GuarantyPaid { plan_id, .. }
            | ProtocolEvent::Redeemed { plan_id, .. }
            | ProtocolEvent::YieldDistributed { plan_id, .. }
            | ProtocolEvent::BuybackRequested { plan_id, .. }
            | ProtocolEvent::RewardAdded { plan_id, .. }
            | ProtocolEvent::Staked { plan_id, .. }
            | ProtocolEvent::Unstaked { plan_id, .. }
            | ProtocolEvent::Claimed { plan_id, .. }
            | ProtocolEvent::Refunded { plan_id, .. }
            | ProtocolEvent::Cancelled { plan_id, .. } => Some(*plan_id),
            ProtocolEvent::ConfigUpdated { plan_id, .. } => *plan_id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Effects {
    pub outbound: Vec<Outbound>,
    pub events: Vec<ProtocolEvent>,
}

impl Effects {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a transfer between custody accounts; zero quantities are dropped.
    pub fn transfer(
        &mut self,
        contract: &Account,
        from: &Account,
        to: &Account,
        quantity: &Asset,
        memo: impl Into<String>,
    ) {
        if !quantity.is_positive() {
            return;
        }
        self.outbound.push(Outbound::Transfer {
            contract: contract.clone(),
            from: from.clone(),
            to: to.clone(),
            quantity: quantity.clone(),
            memo: memo.into(),
        });
    }

    pub fn issue(&mut self, contract: &Account, to: &Account, quantity: &Asset, memo: impl Into<String>) {
        self.outbound.push(Outbound::Issue {
            contract: contract.clone(),
            to: to.clone(),
            quantity: quantity.clone(),
            memo: memo.into(),
        });
    }

    pub fn burn(&mut self, contract: &Account, from: &Account, quantity: &Asset, memo: impl Into<String>) {
        self.outbound.push(Outbound::Burn {
            contract: contract.clone(),
            from: from.clone(),
            quantity: quantity.clone(),
            memo: memo.into(),
        });
    }

    pub fn swap(&mut self, input: Asset, pair: String, min_output: Asset, target_contract: Account) {
        self.outbound.push(Outbound::Swap {
            input,
            pair,
            min_output,
            target_contract,
        });
    }

    pub fn emit(&mut self, event: ProtocolEvent) {
        self.events.push(event);
    }

    pub fn extend(&mut self, other: Effects) {
        self.outbound.extend(other.outbound);
        self.events.extend(other.events);
    }
}
