//! Wallet and Journal Models
//!
//! One wallet per (user, currency) with the invariant `frozen <= total`;
//! `available = total - frozen`. Wallets are mutated exclusively through the
//! ledger. Journal entries are append-only and never updated after reaching
//! a terminal status.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: Uuid,
    pub currency: String,
    pub total: Decimal,
    pub frozen: Decimal,
}

impl Wallet {
    pub fn available(&self) -> Decimal {
        self.total - self.frozen
    }
}

#[derive(Debug, Serialize)]
pub struct WalletResponse {
    pub currency: String,
    pub total: Decimal,
    pub frozen: Decimal,
    pub available: Decimal,
}

impl From<&Wallet> for WalletResponse {
    fn from(wallet: &Wallet) -> Self {
        Self {
            currency: wallet.currency.clone(),
            total: wallet.total,
            frozen: wallet.frozen,
            available: wallet.available(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    Trade,
    Transfer,
    Fee,
    Reward,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionKind::Deposit => write!(f, "deposit"),
            TransactionKind::Withdrawal => write!(f, "withdrawal"),
            TransactionKind::Trade => write!(f, "trade"),
            TransactionKind::Transfer => write!(f, "transfer"),
            TransactionKind::Fee => write!(f, "fee"),
            TransactionKind::Reward => write!(f, "reward"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

/// Append-only journal entry. `balance_before` / `balance_after` track the
/// wallet's available balance around the entry, so
/// `balance_after - balance_before == amount` holds for every entry and the
/// running sum of amounts matches the wallet's available balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub currency: String,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    /// Signed available-balance delta.
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub reference: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Administrative tickets
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Pending,
    Completed,
    Failed,
}

/// Deposit ticket. No real on-chain settlement; a mock deposit completes
/// immediately and mints through the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deposit {
    pub id: Uuid,
    pub user_id: Uuid,
    pub currency: String,
    pub amount: Decimal,
    pub status: TicketStatus,
    pub method: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Withdrawal ticket; debits available funds immediately in this simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Withdrawal {
    pub id: Uuid,
    pub user_id: Uuid,
    pub currency: String,
    pub amount: Decimal,
    pub fee: Decimal,
    pub net_amount: Decimal,
    pub status: TicketStatus,
    pub address: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct DepositRequest {
    pub currency: String,
    pub amount: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct WithdrawRequest {
    pub currency: String,
    pub amount: Decimal,
    pub address: String,
}

/// Wallet event payload for `user.<id>.wallet` subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct WalletUpdate {
    pub user_id: Uuid,
    pub currency: String,
    pub total: Decimal,
    pub frozen: Decimal,
    pub available: Decimal,
    pub timestamp: i64,
}

impl From<&Wallet> for WalletUpdate {
    fn from(wallet: &Wallet) -> Self {
        Self {
            user_id: wallet.user_id,
            currency: wallet.currency.clone(),
            total: wallet.total,
            frozen: wallet.frozen,
            available: wallet.available(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}
