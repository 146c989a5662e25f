//! Protocol configuration.
//!
//! There is no ambient global: hosts own a [`ProtocolConfig`] and hand it to
//! every step through [`crate::Context`]. Changes go through
//! [`ProtocolConfig::update`], which only the admin may call.

use serde::{Deserialize, Serialize};

use crate::asset::Account;
use crate::errors::{Error, Result};
use crate::math::BASIS_POINTS;

/// Default grace period after the raise window for guarantors to reach coverage.
pub const DEFAULT_PLEDGE_WINDOW_SECS: u64 = 7 * 24 * 60 * 60;

/// Default buyback slippage tolerance.
pub const DEFAULT_SLIPPAGE_BP: i64 = 100;

/// Percentages of each yield deposit sent to the stake pool and the guaranty
/// pool. Buyback takes whatever is left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YieldSplit {
    pub stake_pct: u8,
    pub guaranty_pct: u8,
}

impl YieldSplit {
    pub fn new(stake_pct: u8, guaranty_pct: u8) -> Result<Self> {
        if stake_pct as u16 + guaranty_pct as u16 > 100 {
            return Err(Error::InvalidParameter(format!(
                "stake {stake_pct}% + guaranty {guaranty_pct}% exceeds 100%"
            )));
        }
        Ok(YieldSplit {
            stake_pct,
            guaranty_pct,
        })
    }

    pub fn buyback_pct(&self) -> u8 {
        100 - self.stake_pct - self.guaranty_pct
    }
}

impl Default for YieldSplit {
    fn default() -> Self {
        YieldSplit {
            stake_pct: 80,
            guaranty_pct: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    pub admin: Account,
    /// Account that receives deposits and holds raised funds.
    pub core_account: Account,
    pub stake_pool_account: Account,
    pub guaranty_pool_account: Account,
    /// Swap venue receiving buyback orders.
    pub swap_account: Account,
    pub split: YieldSplit,
    pub pledge_window_secs: u64,
    pub default_slippage_bp: i64,
}

impl ProtocolConfig {
    pub fn new(admin: Account) -> Self {
        ProtocolConfig {
            admin,
            core_account: Account::from("rwa.core"),
            stake_pool_account: Account::from("rwa.stake"),
            guaranty_pool_account: Account::from("rwa.guaranty"),
            swap_account: Account::from("rwa.swap"),
            split: YieldSplit::default(),
            pledge_window_secs: DEFAULT_PLEDGE_WINDOW_SECS,
            default_slippage_bp: DEFAULT_SLIPPAGE_BP,
        }
    }

    pub fn require_admin(&self, caller: &Account) -> Result<()> {
        if caller != &self.admin {
            return Err(Error::NoAuth(format!("{caller} is not the protocol admin")));
        }
        Ok(())
    }

    /// Set one configuration key. Keys: `admin`, `core_account`,
    /// `stake_pool_account`, `guaranty_pool_account`, `swap_account`,
    /// `stake_pct`, `guaranty_pct`, `pledge_window_secs`, `default_slippage_bp`.
    pub fn update(&mut self, caller: &Account, key: &str, value: &str) -> Result<()> {
        self.require_admin(caller)?;
        let value = value.trim();
        match key {
            "admin" => self.admin = parse_account(value)?,
            "core_account" => self.core_account = parse_account(value)?,
            "stake_pool_account" => self.stake_pool_account = parse_account(value)?,
            "guaranty_pool_account" => self.guaranty_pool_account = parse_account(value)?,
            "swap_account" => self.swap_account = parse_account(value)?,
            "stake_pct" => {
                self.split = YieldSplit::new(parse_num(key, value)?, self.split.guaranty_pct)?
            }
            "guaranty_pct" => {
                self.split = YieldSplit::new(self.split.stake_pct, parse_num(key, value)?)?
            }
            "pledge_window_secs" => self.pledge_window_secs = parse_num(key, value)?,
            "default_slippage_bp" => {
                let bp: i64 = parse_num(key, value)?;
                if !(0..=BASIS_POINTS).contains(&bp) {
                    return Err(Error::InvalidParameter(format!("slippage {bp} bp out of range")));
                }
                self.default_slippage_bp = bp;
            }
            other => {
                return Err(Error::InvalidParameter(format!("unknown config key `{other}`")))
            }
        }
        tracing::info!(key, value, "protocol config updated");
        Ok(())
    }
}

fn parse_account(value: &str) -> Result<Account> {
    if value.is_empty() {
        return Err(Error::InvalidParameter("account must not be empty".into()));
    }
    Ok(Account::from(value))
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::InvalidParameter(format!("invalid value `{value}` for {key}")))
}
