//! Protocol error taxonomy.
//!
//! Every failure aborts the request it was raised in. Nothing is recovered
//! internally and nothing is retried; the host discards the working copy of
//! the plan book and reports the kind plus the reason string.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("not positive: {0}")]
    NotPositive(String),

    #[error("symbol mismatch: {0}")]
    SymbolMismatch(String),

    #[error("contract mismatch: {0}")]
    ContractMismatch(String),

    #[error("record not found: {0}")]
    RecordNotFound(String),

    #[error("record exists: {0}")]
    RecordExists(String),

    #[error("quantity insufficient: {0}")]
    QuantityInsufficient(String),

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("expired: {0}")]
    Expired(String),

    #[error("not expired: {0}")]
    NotExpired(String),

    #[error("no auth: {0}")]
    NoAuth(String),

    #[error("arithmetic overflow")]
    Overflow,

    #[error("invariant violated: {0}")]
    InvariantViolation(&'static str),
}

impl Error {
    /// Stable identifier of the error kind, used by hosts in API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidFormat(_) => "invalid_format",
            Error::InvalidParameter(_) => "invalid_parameter",
            Error::NotPositive(_) => "not_positive",
            Error::SymbolMismatch(_) => "symbol_mismatch",
            Error::ContractMismatch(_) => "contract_mismatch",
            Error::RecordNotFound(_) => "record_not_found",
            Error::RecordExists(_) => "record_exists",
            Error::QuantityInsufficient(_) => "quantity_insufficient",
            Error::InvalidStatus(_) => "invalid_status",
            Error::Expired(_) => "expired",
            Error::NotExpired(_) => "not_expired",
            Error::NoAuth(_) => "no_auth",
            Error::Overflow => "overflow",
            Error::InvariantViolation(_) => "invariant_violation",
        }
    }

    /// The human-readable reason without the kind prefix.
    pub fn reason(&self) -> String {
        match self {
            Error::InvalidFormat(r)
            | Error::InvalidParameter(r)
            | Error::NotPositive(r)
            | Error::SymbolMismatch(r)
            | Error::ContractMismatch(r)
            | Error::RecordNotFound(r)
            | Error::RecordExists(r)
            | Error::QuantityInsufficient(r)
            | Error::InvalidStatus(r)
            | Error::Expired(r)
            | Error::NotExpired(r)
            | Error::NoAuth(r) => r.clone(),
            Error::Overflow => "arithmetic overflow".to_string(),
            Error::InvariantViolation(r) => (*r).to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
