//! Domain Error Types
//!
//! Behavioral error kinds shared by the trading core. Recoverable kinds
//! carry a stable machine-readable code surfaced to API callers; invariant
//! violations are logged with context and surfaced as internal errors.

use rust_decimal::Decimal;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("insufficient {currency} balance: required {required}, available {available}")]
    InsufficientFunds {
        currency: String,
        required: Decimal,
        available: Decimal,
    },

    #[error("no liquidity: {0}")]
    NoLiquidity(String),

    #[error("pair writer overloaded: {0}")]
    Overloaded(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl CoreError {
    /// Stable machine-readable code for the API envelope.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "VALIDATION",
            CoreError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            CoreError::NoLiquidity(_) => "NO_LIQUIDITY",
            CoreError::Overloaded(_) => "OVERLOADED",
            CoreError::NotFound(_) => "NOT_FOUND",
            CoreError::Forbidden(_) => "FORBIDDEN",
            CoreError::Invariant(_) => "INTERNAL_ERROR",
        }
    }

    /// Invariant violations are never returned to users as such; everything
    /// else is recoverable from the caller's point of view.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, CoreError::Invariant(_))
    }
}
