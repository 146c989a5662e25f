//! # Ledger primitives
//!
//! Fixed-point token quantities. An [`Asset`] is an `i64` amount scaled by
//! `10^precision` of its [`Symbol`]. Arithmetic is symbol-checked and never
//! wraps: every operation returns [`Error::Overflow`] when the result leaves
//! the representable range `|amount| <= 2^62 - 1`, and products go through
//! an `i128` intermediate.
//!
//! Balances in this crate are never negative, so [`Asset::checked_sub`]
//! rejects a negative result with [`Error::QuantityInsufficient`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::math;

/// Largest magnitude an asset amount may take.
pub const MAX_AMOUNT: i64 = (1i64 << 62) - 1;

/// Highest supported symbol precision.
pub const MAX_PRECISION: u8 = 18;

/// An account on the custody layer (investor, guarantor, pool, contract).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Account(String);

impl Account {
    pub fn new(name: impl Into<String>) -> Self {
        Account(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Account {
    fn from(value: &str) -> Self {
        Account(value.to_string())
    }
}

/// Token symbol: an upper-case code plus decimal precision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol {
    code: String,
    precision: u8,
}

impl Symbol {
    pub fn new(code: &str, precision: u8) -> Result<Self> {
        if code.is_empty() || code.len() > 7 || !code.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(Error::InvalidFormat(format!("invalid symbol code `{code}`")));
        }
        if precision > MAX_PRECISION {
            return Err(Error::InvalidFormat(format!(
                "precision {precision} should be in range [0,{MAX_PRECISION}]"
            )));
        }
        Ok(Symbol {
            code: code.to_string(),
            precision,
        })
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn precision(&self) -> u8 {
        self.precision
    }

    /// `10^precision`, the raw amount of one whole token.
    pub fn unit(&self) -> i64 {
        math::pow10(self.precision)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.precision, self.code)
    }
}

/// A symbol pinned to the contract that issues it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExtendedSymbol {
    pub contract: Account,
    pub symbol: Symbol,
}

impl ExtendedSymbol {
    pub fn new(contract: Account, symbol: Symbol) -> Self {
        ExtendedSymbol { contract, symbol }
    }

    /// Reject a quantity that was not issued by this contract under this symbol.
    pub fn check(&self, contract: &Account, quantity: &Asset) -> Result<()> {
        if self.symbol != quantity.symbol {
            return Err(Error::SymbolMismatch(format!(
                "expected {}, actual {}",
                self.symbol, quantity.symbol
            )));
        }
        if &self.contract != contract {
            return Err(Error::ContractMismatch(format!(
                "expected contract {}, actual {}",
                self.contract, contract
            )));
        }
        Ok(())
    }
}

/// Fixed-point token quantity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Asset {
    pub amount: i64,
    pub symbol: Symbol,
}

impl Asset {
    pub fn new(amount: i64, symbol: Symbol) -> Result<Self> {
        if !(-MAX_AMOUNT..=MAX_AMOUNT).contains(&amount) {
            return Err(Error::Overflow);
        }
        Ok(Asset { amount, symbol })
    }

    pub fn zero(symbol: &Symbol) -> Self {
        Asset {
            amount: 0,
            symbol: symbol.clone(),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.amount == 0
    }

    pub fn is_positive(&self) -> bool {
        self.amount > 0
    }

    /// Same symbol, different amount.
    pub fn with_amount(&self, amount: i64) -> Result<Self> {
        Asset::new(amount, self.symbol.clone())
    }

    fn ensure_same_symbol(&self, other: &Asset) -> Result<()> {
        if self.symbol != other.symbol {
            return Err(Error::SymbolMismatch(format!(
                "{} vs {}",
                self.symbol, other.symbol
            )));
        }
        Ok(())
    }

    pub fn checked_add(&self, other: &Asset) -> Result<Self> {
        self.ensure_same_symbol(other)?;
        let amount = self.amount.checked_add(other.amount).ok_or(Error::Overflow)?;
        self.with_amount(amount)
    }

    pub fn checked_sub(&self, other: &Asset) -> Result<Self> {
        self.ensure_same_symbol(other)?;
        let amount = self.amount.checked_sub(other.amount).ok_or(Error::Overflow)?;
        if amount < 0 {
            return Err(Error::QuantityInsufficient(format!(
                "{self} is less than {other}"
            )));
        }
        self.with_amount(amount)
    }

    pub fn add_assign(&mut self, other: &Asset) -> Result<()> {
        *self = self.checked_add(other)?;
        Ok(())
    }

    pub fn sub_assign(&mut self, other: &Asset) -> Result<()> {
        *self = self.checked_sub(other)?;
        Ok(())
    }

    /// `floor(amount * num / den)` through an `i128` intermediate.
    pub fn mul_div(&self, num: i64, den: i64) -> Result<Self> {
        self.with_amount(math::mul_div_floor(self.amount, num, den)?)
    }

    /// Scale by a basis-point ratio (10000 = 100%).
    pub fn scale_bp(&self, bp: i64) -> Result<Self> {
        self.mul_div(bp, math::BASIS_POINTS)
    }

    /// The smaller of two same-symbol quantities.
    pub fn min(&self, other: &Asset) -> Result<Self> {
        self.ensure_same_symbol(other)?;
        Ok(if self.amount <= other.amount {
            self.clone()
        } else {
            other.clone()
        })
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = self.symbol.unit();
        let sign = if self.amount < 0 { "-" } else { "" };
        let abs = self.amount.unsigned_abs();
        let whole = abs / unit as u64;
        if self.symbol.precision == 0 {
            return write!(f, "{sign}{whole} {}", self.symbol.code);
        }
        let frac = abs % unit as u64;
        write!(
            f,
            "{sign}{whole}.{frac:0width$} {}",
            self.symbol.code,
            width = self.symbol.precision as usize
        )
    }
}

impl FromStr for Asset {
    type Err = Error;

    /// Parse `"1.2500 USDT"`; precision is the number of fraction digits.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (amount_str, code) = s
            .split_once(' ')
            .ok_or_else(|| Error::InvalidFormat("amount and symbol should be separated with space".into()))?;
        let code = code.trim();

        let negative = amount_str.starts_with('-');
        let digits = amount_str.trim_start_matches('-');
        let (int_part, frac_part) = match digits.split_once('.') {
            Some((_, "")) => {
                return Err(Error::InvalidFormat("missing decimal fraction after decimal point".into()))
            }
            Some((i, f)) => (i, f),
            None => (digits, ""),
        };
        if int_part.is_empty() || !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit()) {
            return Err(Error::InvalidFormat(format!("invalid amount `{amount_str}`")));
        }
        let precision = u8::try_from(frac_part.len())
            .map_err(|_| Error::InvalidFormat("too many fraction digits".into()))?;
        let symbol = Symbol::new(code, precision)?;

        let whole: i64 = int_part.parse().map_err(|_| Error::Overflow)?;
        let frac: i64 = if frac_part.is_empty() {
            0
        } else {
            frac_part.parse().map_err(|_| Error::Overflow)?
        };
        let amount = whole
            .checked_mul(symbol.unit())
            .and_then(|v| v.checked_add(frac))
            .ok_or(Error::Overflow)?;
        Asset::new(if negative { -amount } else { amount }, symbol)
    }
}
