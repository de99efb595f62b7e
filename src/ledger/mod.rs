//! Ledger
//!
//! Atomic per-(user, currency) balance and freeze accounting with an
//! append-only journal. Wallets are auto-materialized on first reference and
//! mutated only through these operations.
//!
//! Every wallet is guarded by its own mutex. Multi-wallet groups (a fill
//! touches the quote and base wallets of both participants plus the fee
//! account) acquire locks in ascending `(user_id, currency)` order to
//! prevent deadlock. Trading fees are credited to the exchange fee account,
//! so the per-currency total supply changes only on explicit mint/burn
//! (deposits and withdrawals).
//!
//! Journal entries record the change to the wallet's *available* balance;
//! `balance_after - balance_before == amount` for every entry. A settlement
//! is journaled as a reservation release followed by a principal debit so
//! the property holds entry by entry.

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

use crate::bus::{Event, EventBus, Topic};
use crate::error::CoreError;
use crate::models::{Transaction, TransactionKind, TransactionStatus, Wallet, WalletUpdate};

/// House account receiving trading fees.
pub const FEE_ACCOUNT: Uuid = Uuid::from_u128(0);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct AccountKey {
    user_id: Uuid,
    currency: String,
}

impl AccountKey {
    fn new(user_id: Uuid, currency: &str) -> Self {
        Self {
            user_id,
            currency: currency.to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct Account {
    total: Decimal,
    frozen: Decimal,
}

impl Account {
    fn available(&self) -> Decimal {
        self.total - self.frozen
    }
}

/// Parameters of one fill's multi-wallet settlement. Amounts are already
/// quantized by the matching engine.
#[derive(Debug, Clone)]
pub struct FillSettlement {
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub base: String,
    pub quote: String,
    /// Base quantity exchanged.
    pub quantity: Decimal,
    /// Quote value exchanged (`price * quantity`).
    pub quote_value: Decimal,
    pub buyer_fee: Decimal,
    pub seller_fee: Decimal,
    /// Trade id, recorded on every journal entry of the group.
    pub reference: String,
}

pub struct Ledger {
    accounts: DashMap<AccountKey, Arc<Mutex<Account>>>,
    journal: Mutex<Vec<Transaction>>,
    bus: Arc<EventBus>,
}

impl Ledger {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            accounts: DashMap::new(),
            journal: Mutex::new(Vec::new()),
            bus,
        }
    }

    fn account(&self, user_id: Uuid, currency: &str) -> Arc<Mutex<Account>> {
        self.accounts
            .entry(AccountKey::new(user_id, currency))
            .or_insert_with(|| Arc::new(Mutex::new(Account::default())))
            .clone()
    }

    /// Materialize zero wallets for a user, one per currency. Explicit step
    /// invoked by account creation.
    pub fn provision_wallets(&self, user_id: Uuid, currencies: &[String]) {
        for currency in currencies {
            self.account(user_id, currency);
        }
    }

    // ========================================================================
    // Single-wallet operations
    // ========================================================================

    /// Reserve funds to back a live order.
    pub fn freeze(
        &self,
        user_id: Uuid,
        currency: &str,
        amount: Decimal,
        reference: &str,
    ) -> Result<(), CoreError> {
        if amount <= Decimal::ZERO {
            return Err(CoreError::Validation(format!(
                "freeze amount must be positive, got {}",
                amount
            )));
        }
        let account = self.account(user_id, currency);
        let mut acct = account.lock();
        let available = acct.available();
        if available < amount {
            return Err(CoreError::InsufficientFunds {
                currency: currency.to_string(),
                required: amount,
                available,
            });
        }
        acct.frozen += amount;
        let entry = self.entry(
            user_id,
            currency,
            TransactionKind::Trade,
            TransactionStatus::Pending,
            -amount,
            available,
            reference,
            "funds reserved",
        );
        let update = wallet_update(user_id, currency, &acct);
        drop(acct);
        self.record(user_id, entry, update);
        Ok(())
    }

    /// Release reserved funds. Clamps at zero to tolerate rounding drift;
    /// every clamp is logged as an invariant alarm.
    pub fn unfreeze(&self, user_id: Uuid, currency: &str, amount: Decimal, reference: &str) {
        if amount <= Decimal::ZERO {
            return;
        }
        let account = self.account(user_id, currency);
        let mut acct = account.lock();
        let released = if acct.frozen < amount {
            warn!(
                user = %user_id,
                currency,
                frozen = %acct.frozen,
                requested = %amount,
                "invariant alarm: unfreeze clamped at zero"
            );
            acct.frozen
        } else {
            amount
        };
        let before = acct.available();
        acct.frozen -= released;
        let entry = self.entry(
            user_id,
            currency,
            TransactionKind::Trade,
            TransactionStatus::Completed,
            released,
            before,
            reference,
            "reservation released",
        );
        let update = wallet_update(user_id, currency, &acct);
        drop(acct);
        self.record(user_id, entry, update);
    }

    /// Consume previously frozen funds on a fill. Fails loudly when the
    /// frozen balance cannot cover the amount; that is a matching bug.
    pub fn settle_debit(
        &self,
        user_id: Uuid,
        currency: &str,
        amount: Decimal,
        reference: &str,
    ) -> Result<(), CoreError> {
        let account = self.account(user_id, currency);
        let mut acct = account.lock();
        if acct.frozen < amount {
            error!(
                user = %user_id,
                currency,
                frozen = %acct.frozen,
                amount = %amount,
                "invariant alarm: settle_debit exceeds frozen balance"
            );
            return Err(CoreError::Invariant(format!(
                "settle_debit {} {} exceeds frozen {} for user {}",
                amount, currency, acct.frozen, user_id
            )));
        }
        let before = acct.available();
        acct.frozen -= amount;
        let release = self.entry(
            user_id,
            currency,
            TransactionKind::Trade,
            TransactionStatus::Completed,
            amount,
            before,
            reference,
            "fill reservation released",
        );
        let before = acct.available();
        acct.total -= amount;
        let debit = self.entry(
            user_id,
            currency,
            TransactionKind::Trade,
            TransactionStatus::Completed,
            -amount,
            before,
            reference,
            "fill settled",
        );
        let update = wallet_update(user_id, currency, &acct);
        drop(acct);
        self.record(user_id, release, update.clone());
        self.record(user_id, debit, update);
        Ok(())
    }

    /// Credit the receiving side of a fill.
    pub fn settle_credit(&self, user_id: Uuid, currency: &str, amount: Decimal, reference: &str) {
        let account = self.account(user_id, currency);
        let mut acct = account.lock();
        let before = acct.available();
        acct.total += amount;
        let entry = self.entry(
            user_id,
            currency,
            TransactionKind::Trade,
            TransactionStatus::Completed,
            amount,
            before,
            reference,
            "trade proceeds",
        );
        let update = wallet_update(user_id, currency, &acct);
        drop(acct);
        self.record(user_id, entry, update);
    }

    /// Charge a fee; the amount is credited to the exchange fee account so
    /// totals are conserved.
    pub fn apply_fee(
        &self,
        user_id: Uuid,
        currency: &str,
        amount: Decimal,
        reference: &str,
    ) -> Result<(), CoreError> {
        if amount <= Decimal::ZERO {
            return Ok(());
        }
        let keys = sorted_keys(vec![
            AccountKey::new(user_id, currency),
            AccountKey::new(FEE_ACCOUNT, currency),
        ]);
        let handles: Vec<Arc<Mutex<Account>>> = keys
            .iter()
            .map(|k| self.account(k.user_id, &k.currency))
            .collect();
        let mut guards: Vec<_> = handles.iter().map(|h| h.lock()).collect();
        let payer = index_of(&keys, user_id, currency);
        let house = index_of(&keys, FEE_ACCOUNT, currency);

        let payer_available = guards[payer].available();
        if payer_available < amount {
            error!(
                user = %user_id,
                currency,
                available = %payer_available,
                fee = %amount,
                "invariant alarm: fee exceeds available balance"
            );
            return Err(CoreError::Invariant(format!(
                "fee {} {} exceeds available {} for user {}",
                amount, currency, payer_available, user_id
            )));
        }

        guards[payer].total -= amount;
        let payer_entry = self.entry(
            user_id,
            currency,
            TransactionKind::Fee,
            TransactionStatus::Completed,
            -amount,
            payer_available,
            reference,
            "trading fee",
        );
        let payer_update = wallet_update(user_id, currency, &guards[payer]);

        let house_before = guards[house].available();
        guards[house].total += amount;
        let house_entry = self.entry(
            FEE_ACCOUNT,
            currency,
            TransactionKind::Fee,
            TransactionStatus::Completed,
            amount,
            house_before,
            reference,
            "fee revenue",
        );
        let house_update = wallet_update(FEE_ACCOUNT, currency, &guards[house]);
        drop(guards);

        self.record(user_id, payer_entry, payer_update);
        self.record(FEE_ACCOUNT, house_entry, house_update);
        Ok(())
    }

    /// Mint funds (mock deposit).
    pub fn deposit(&self, user_id: Uuid, currency: &str, amount: Decimal, reference: &str) {
        let account = self.account(user_id, currency);
        let mut acct = account.lock();
        let before = acct.available();
        acct.total += amount;
        let entry = self.entry(
            user_id,
            currency,
            TransactionKind::Deposit,
            TransactionStatus::Completed,
            amount,
            before,
            reference,
            "deposit",
        );
        let update = wallet_update(user_id, currency, &acct);
        drop(acct);
        self.record(user_id, entry, update);
    }

    /// Burn available funds (withdrawal ticket).
    pub fn withdraw(
        &self,
        user_id: Uuid,
        currency: &str,
        amount: Decimal,
        reference: &str,
    ) -> Result<(), CoreError> {
        let account = self.account(user_id, currency);
        let mut acct = account.lock();
        let available = acct.available();
        if available < amount {
            return Err(CoreError::InsufficientFunds {
                currency: currency.to_string(),
                required: amount,
                available,
            });
        }
        acct.total -= amount;
        let entry = self.entry(
            user_id,
            currency,
            TransactionKind::Withdrawal,
            TransactionStatus::Completed,
            -amount,
            available,
            reference,
            "withdrawal",
        );
        let update = wallet_update(user_id, currency, &acct);
        drop(acct);
        self.record(user_id, entry, update);
        Ok(())
    }

    // ========================================================================
    // Multi-wallet fill settlement
    // ========================================================================

    /// Settle one fill atomically across both participants' wallets and the
    /// fee account. Preconditions are validated under all locks before any
    /// mutation, so a failure leaves every balance untouched.
    pub fn settle_fill(&self, fill: &FillSettlement) -> Result<(), CoreError> {
        let keys = sorted_keys(vec![
            AccountKey::new(fill.buyer_id, &fill.quote),
            AccountKey::new(fill.buyer_id, &fill.base),
            AccountKey::new(fill.seller_id, &fill.base),
            AccountKey::new(fill.seller_id, &fill.quote),
            AccountKey::new(FEE_ACCOUNT, &fill.quote),
        ]);
        let handles: Vec<Arc<Mutex<Account>>> = keys
            .iter()
            .map(|k| self.account(k.user_id, &k.currency))
            .collect();
        let mut guards: Vec<_> = handles.iter().map(|h| h.lock()).collect();

        let buyer_quote = index_of(&keys, fill.buyer_id, &fill.quote);
        let buyer_base = index_of(&keys, fill.buyer_id, &fill.base);
        let seller_base = index_of(&keys, fill.seller_id, &fill.base);
        let seller_quote = index_of(&keys, fill.seller_id, &fill.quote);
        let house_quote = index_of(&keys, FEE_ACCOUNT, &fill.quote);

        // Validate the whole group before mutating anything.
        if guards[buyer_quote].frozen < fill.quote_value {
            error!(
                buyer = %fill.buyer_id,
                frozen = %guards[buyer_quote].frozen,
                value = %fill.quote_value,
                "invariant alarm: buyer frozen quote cannot cover fill"
            );
            return Err(CoreError::Invariant(format!(
                "buyer {} frozen {} {} cannot cover fill value {}",
                fill.buyer_id, guards[buyer_quote].frozen, fill.quote, fill.quote_value
            )));
        }
        if guards[seller_base].frozen < fill.quantity {
            error!(
                seller = %fill.seller_id,
                frozen = %guards[seller_base].frozen,
                quantity = %fill.quantity,
                "invariant alarm: seller frozen base cannot cover fill"
            );
            return Err(CoreError::Invariant(format!(
                "seller {} frozen {} {} cannot cover fill quantity {}",
                fill.seller_id, guards[seller_base].frozen, fill.base, fill.quantity
            )));
        }
        if guards[buyer_quote].available() < fill.buyer_fee {
            return Err(CoreError::Invariant(format!(
                "buyer {} cannot cover fee {} {}",
                fill.buyer_id, fill.buyer_fee, fill.quote
            )));
        }

        let mut records: Vec<(Uuid, Transaction, WalletUpdate)> = Vec::with_capacity(10);
        let reference = fill.reference.as_str();

        // Buyer: consume frozen quote, pay fee, receive base.
        let before = guards[buyer_quote].available();
        guards[buyer_quote].frozen -= fill.quote_value;
        records.push((
            fill.buyer_id,
            self.entry(
                fill.buyer_id,
                &fill.quote,
                TransactionKind::Trade,
                TransactionStatus::Completed,
                fill.quote_value,
                before,
                reference,
                "fill reservation released",
            ),
            wallet_update(fill.buyer_id, &fill.quote, &guards[buyer_quote]),
        ));

        let before = guards[buyer_quote].available();
        guards[buyer_quote].total -= fill.quote_value;
        records.push((
            fill.buyer_id,
            self.entry(
                fill.buyer_id,
                &fill.quote,
                TransactionKind::Trade,
                TransactionStatus::Completed,
                -fill.quote_value,
                before,
                reference,
                "fill settled",
            ),
            wallet_update(fill.buyer_id, &fill.quote, &guards[buyer_quote]),
        ));

        if fill.buyer_fee > Decimal::ZERO {
            let before = guards[buyer_quote].available();
            guards[buyer_quote].total -= fill.buyer_fee;
            records.push((
                fill.buyer_id,
                self.entry(
                    fill.buyer_id,
                    &fill.quote,
                    TransactionKind::Fee,
                    TransactionStatus::Completed,
                    -fill.buyer_fee,
                    before,
                    reference,
                    "trading fee",
                ),
                wallet_update(fill.buyer_id, &fill.quote, &guards[buyer_quote]),
            ));
        }

        let before = guards[buyer_base].available();
        guards[buyer_base].total += fill.quantity;
        records.push((
            fill.buyer_id,
            self.entry(
                fill.buyer_id,
                &fill.base,
                TransactionKind::Trade,
                TransactionStatus::Completed,
                fill.quantity,
                before,
                reference,
                "trade proceeds",
            ),
            wallet_update(fill.buyer_id, &fill.base, &guards[buyer_base]),
        ));

        // Seller: consume frozen base, receive quote, pay fee.
        let before = guards[seller_base].available();
        guards[seller_base].frozen -= fill.quantity;
        records.push((
            fill.seller_id,
            self.entry(
                fill.seller_id,
                &fill.base,
                TransactionKind::Trade,
                TransactionStatus::Completed,
                fill.quantity,
                before,
                reference,
                "fill reservation released",
            ),
            wallet_update(fill.seller_id, &fill.base, &guards[seller_base]),
        ));

        let before = guards[seller_base].available();
        guards[seller_base].total -= fill.quantity;
        records.push((
            fill.seller_id,
            self.entry(
                fill.seller_id,
                &fill.base,
                TransactionKind::Trade,
                TransactionStatus::Completed,
                -fill.quantity,
                before,
                reference,
                "fill settled",
            ),
            wallet_update(fill.seller_id, &fill.base, &guards[seller_base]),
        ));

        let before = guards[seller_quote].available();
        guards[seller_quote].total += fill.quote_value;
        records.push((
            fill.seller_id,
            self.entry(
                fill.seller_id,
                &fill.quote,
                TransactionKind::Trade,
                TransactionStatus::Completed,
                fill.quote_value,
                before,
                reference,
                "trade proceeds",
            ),
            wallet_update(fill.seller_id, &fill.quote, &guards[seller_quote]),
        ));

        if fill.seller_fee > Decimal::ZERO {
            let before = guards[seller_quote].available();
            guards[seller_quote].total -= fill.seller_fee;
            records.push((
                fill.seller_id,
                self.entry(
                    fill.seller_id,
                    &fill.quote,
                    TransactionKind::Fee,
                    TransactionStatus::Completed,
                    -fill.seller_fee,
                    before,
                    reference,
                    "trading fee",
                ),
                wallet_update(fill.seller_id, &fill.quote, &guards[seller_quote]),
            ));
        }

        // Fee revenue.
        let fee_total = fill.buyer_fee + fill.seller_fee;
        if fee_total > Decimal::ZERO {
            let before = guards[house_quote].available();
            guards[house_quote].total += fee_total;
            records.push((
                FEE_ACCOUNT,
                self.entry(
                    FEE_ACCOUNT,
                    &fill.quote,
                    TransactionKind::Fee,
                    TransactionStatus::Completed,
                    fee_total,
                    before,
                    reference,
                    "fee revenue",
                ),
                wallet_update(FEE_ACCOUNT, &fill.quote, &guards[house_quote]),
            ));
        }

        drop(guards);
        for (user_id, entry, update) in records {
            self.record(user_id, entry, update);
        }
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn balance(&self, user_id: Uuid, currency: &str) -> Wallet {
        let account = self.account(user_id, currency);
        let acct = account.lock();
        Wallet {
            user_id,
            currency: currency.to_string(),
            total: acct.total,
            frozen: acct.frozen,
        }
    }

    /// All wallets of a user, sorted by currency.
    pub fn snapshot(&self, user_id: Uuid) -> Vec<Wallet> {
        let mut wallets: Vec<Wallet> = self
            .accounts
            .iter()
            .filter(|e| e.key().user_id == user_id)
            .map(|e| {
                let acct = e.value().lock();
                Wallet {
                    user_id,
                    currency: e.key().currency.clone(),
                    total: acct.total,
                    frozen: acct.frozen,
                }
            })
            .collect();
        wallets.sort_by(|a, b| a.currency.cmp(&b.currency));
        wallets
    }

    /// Sum of totals over all wallets of a currency. Constant except for
    /// deposits and withdrawals.
    pub fn total_supply(&self, currency: &str) -> Decimal {
        self.accounts
            .iter()
            .filter(|e| e.key().currency == currency)
            .map(|e| e.value().lock().total)
            .sum()
    }

    pub fn journal_for(&self, user_id: Uuid) -> Vec<Transaction> {
        self.journal
            .lock()
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    #[allow(clippy::too_many_arguments)]
    fn entry(
        &self,
        user_id: Uuid,
        currency: &str,
        kind: TransactionKind,
        status: TransactionStatus,
        amount: Decimal,
        available_before: Decimal,
        reference: &str,
        description: &str,
    ) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            user_id,
            currency: currency.to_string(),
            kind,
            status,
            amount,
            balance_before: available_before,
            balance_after: available_before + amount,
            reference: Some(reference.to_string()),
            description: Some(description.to_string()),
            created_at: Utc::now(),
        }
    }

    fn record(&self, user_id: Uuid, entry: Transaction, update: WalletUpdate) {
        self.journal.lock().push(entry.clone());
        let topic = Topic::UserWallet(user_id);
        self.bus.publish(&topic, Event::Journal(entry));
        self.bus.publish(&topic, Event::Wallet(update));
    }
}

fn sorted_keys(mut keys: Vec<AccountKey>) -> Vec<AccountKey> {
    keys.sort();
    keys.dedup();
    keys
}

fn index_of(keys: &[AccountKey], user_id: Uuid, currency: &str) -> usize {
    keys.iter()
        .position(|k| k.user_id == user_id && k.currency == currency)
        .expect("account key is part of the locked group")
}

fn wallet_update(user_id: Uuid, currency: &str, acct: &Account) -> WalletUpdate {
    WalletUpdate {
        user_id,
        currency: currency.to_string(),
        total: acct.total,
        frozen: acct.frozen,
        available: acct.available(),
        timestamp: Utc::now().timestamp_millis(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ledger() -> Ledger {
        Ledger::new(Arc::new(EventBus::new(64)))
    }

    fn alice() -> Uuid {
        Uuid::from_u128(1)
    }

    fn bob() -> Uuid {
        Uuid::from_u128(2)
    }

    #[test]
    fn freeze_reduces_available_not_total() {
        let ledger = ledger();
        ledger.deposit(alice(), "USDT", dec!(1000), "T-DEP");
        ledger.freeze(alice(), "USDT", dec!(400), "O-1").unwrap();

        let wallet = ledger.balance(alice(), "USDT");
        assert_eq!(wallet.total, dec!(1000));
        assert_eq!(wallet.frozen, dec!(400));
        assert_eq!(wallet.available(), dec!(600));
    }

    #[test]
    fn freeze_fails_on_insufficient_available() {
        let ledger = ledger();
        ledger.deposit(alice(), "USDT", dec!(100), "T-DEP");
        ledger.freeze(alice(), "USDT", dec!(60), "O-1").unwrap();

        let err = ledger.freeze(alice(), "USDT", dec!(50), "O-2").unwrap_err();
        assert!(matches!(err, CoreError::InsufficientFunds { .. }));

        // No state change on failure.
        let wallet = ledger.balance(alice(), "USDT");
        assert_eq!(wallet.frozen, dec!(60));
    }

    #[test]
    fn freeze_rejects_non_positive_amount() {
        let ledger = ledger();
        assert!(ledger.freeze(alice(), "USDT", dec!(0), "O-1").is_err());
        assert!(ledger.freeze(alice(), "USDT", dec!(-5), "O-1").is_err());
    }

    #[test]
    fn unfreeze_clamps_at_zero() {
        let ledger = ledger();
        ledger.deposit(alice(), "USDT", dec!(100), "T-DEP");
        ledger.freeze(alice(), "USDT", dec!(40), "O-1").unwrap();
        ledger.unfreeze(alice(), "USDT", dec!(100), "O-1");

        let wallet = ledger.balance(alice(), "USDT");
        assert_eq!(wallet.frozen, dec!(0));
        assert_eq!(wallet.total, dec!(100));
    }

    #[test]
    fn settle_debit_requires_frozen_cover() {
        let ledger = ledger();
        ledger.deposit(alice(), "USDT", dec!(100), "T-DEP");
        ledger.freeze(alice(), "USDT", dec!(40), "O-1").unwrap();

        let err = ledger
            .settle_debit(alice(), "USDT", dec!(50), "T-1")
            .unwrap_err();
        assert!(matches!(err, CoreError::Invariant(_)));

        ledger.settle_debit(alice(), "USDT", dec!(40), "T-1").unwrap();
        let wallet = ledger.balance(alice(), "USDT");
        assert_eq!(wallet.total, dec!(60));
        assert_eq!(wallet.frozen, dec!(0));
    }

    #[test]
    fn withdraw_requires_available_funds() {
        let ledger = ledger();
        ledger.deposit(alice(), "USDT", dec!(100), "T-DEP");
        ledger.freeze(alice(), "USDT", dec!(80), "O-1").unwrap();

        assert!(ledger.withdraw(alice(), "USDT", dec!(50), "W-1").is_err());
        ledger.withdraw(alice(), "USDT", dec!(20), "W-1").unwrap();
        assert_eq!(ledger.balance(alice(), "USDT").total, dec!(80));
    }

    #[test]
    fn settle_fill_moves_funds_and_fees() {
        let ledger = ledger();
        ledger.deposit(alice(), "USDT", dec!(100000), "T-DEP");
        ledger.deposit(bob(), "BTC", dec!(1), "T-DEP");

        ledger.freeze(alice(), "USDT", dec!(50000), "O-BUY").unwrap();
        ledger.freeze(bob(), "BTC", dec!(1), "O-SELL").unwrap();

        ledger
            .settle_fill(&FillSettlement {
                buyer_id: alice(),
                seller_id: bob(),
                base: "BTC".to_string(),
                quote: "USDT".to_string(),
                quantity: dec!(1),
                quote_value: dec!(50000),
                buyer_fee: dec!(50),
                seller_fee: dec!(50),
                reference: "T-1".to_string(),
            })
            .unwrap();

        let alice_usdt = ledger.balance(alice(), "USDT");
        assert_eq!(alice_usdt.total, dec!(49950));
        assert_eq!(alice_usdt.frozen, dec!(0));
        assert_eq!(ledger.balance(alice(), "BTC").total, dec!(1));

        let bob_btc = ledger.balance(bob(), "BTC");
        assert_eq!(bob_btc.total, dec!(0));
        assert_eq!(bob_btc.frozen, dec!(0));
        assert_eq!(ledger.balance(bob(), "USDT").total, dec!(49950));

        assert_eq!(ledger.balance(FEE_ACCOUNT, "USDT").total, dec!(100));
    }

    #[test]
    fn settle_fill_conserves_total_supply() {
        let ledger = ledger();
        ledger.deposit(alice(), "USDT", dec!(100000), "T-DEP");
        ledger.deposit(bob(), "BTC", dec!(2), "T-DEP");
        let usdt_before = ledger.total_supply("USDT");
        let btc_before = ledger.total_supply("BTC");

        ledger.freeze(alice(), "USDT", dec!(50000), "O-BUY").unwrap();
        ledger.freeze(bob(), "BTC", dec!(1), "O-SELL").unwrap();
        ledger
            .settle_fill(&FillSettlement {
                buyer_id: alice(),
                seller_id: bob(),
                base: "BTC".to_string(),
                quote: "USDT".to_string(),
                quantity: dec!(1),
                quote_value: dec!(50000),
                buyer_fee: dec!(50),
                seller_fee: dec!(50),
                reference: "T-1".to_string(),
            })
            .unwrap();

        assert_eq!(ledger.total_supply("USDT"), usdt_before);
        assert_eq!(ledger.total_supply("BTC"), btc_before);
    }

    #[test]
    fn settle_fill_rejects_uncovered_fill_without_mutation() {
        let ledger = ledger();
        ledger.deposit(alice(), "USDT", dec!(100), "T-DEP");
        ledger.deposit(bob(), "BTC", dec!(1), "T-DEP");
        ledger.freeze(alice(), "USDT", dec!(100), "O-BUY").unwrap();
        // Bob never froze his base.

        let err = ledger
            .settle_fill(&FillSettlement {
                buyer_id: alice(),
                seller_id: bob(),
                base: "BTC".to_string(),
                quote: "USDT".to_string(),
                quantity: dec!(1),
                quote_value: dec!(100),
                buyer_fee: dec!(0),
                seller_fee: dec!(0),
                reference: "T-1".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::Invariant(_)));

        assert_eq!(ledger.balance(alice(), "USDT").frozen, dec!(100));
        assert_eq!(ledger.balance(alice(), "USDT").total, dec!(100));
        assert_eq!(ledger.balance(bob(), "BTC").total, dec!(1));
    }

    #[test]
    fn journal_entries_are_internally_consistent() {
        let ledger = ledger();
        ledger.deposit(alice(), "USDT", dec!(1000), "T-DEP");
        ledger.freeze(alice(), "USDT", dec!(400), "O-1").unwrap();
        ledger.settle_debit(alice(), "USDT", dec!(150), "T-1").unwrap();
        ledger.unfreeze(alice(), "USDT", dec!(250), "O-1");
        ledger.withdraw(alice(), "USDT", dec!(100), "W-1").unwrap();

        let entries = ledger.journal_for(alice());
        assert!(!entries.is_empty());
        let mut running = Decimal::ZERO;
        for entry in &entries {
            assert_eq!(
                entry.balance_after - entry.balance_before,
                entry.amount,
                "entry {} violates journal integrity",
                entry.id
            );
            running += entry.amount;
        }
        assert_eq!(running, ledger.balance(alice(), "USDT").available());
    }

    #[test]
    fn snapshot_lists_all_wallets() {
        let ledger = ledger();
        ledger.deposit(alice(), "USDT", dec!(10), "T-1");
        ledger.deposit(alice(), "BTC", dec!(1), "T-2");
        ledger.provision_wallets(alice(), &["ETH".to_string()]);

        let wallets = ledger.snapshot(alice());
        let currencies: Vec<&str> = wallets.iter().map(|w| w.currency.as_str()).collect();
        assert_eq!(currencies, vec!["BTC", "ETH", "USDT"]);
    }

    #[test]
    fn freeze_bound_invariant_holds() {
        let ledger = ledger();
        ledger.deposit(alice(), "USDT", dec!(500), "T-DEP");
        ledger.freeze(alice(), "USDT", dec!(500), "O-1").unwrap();
        ledger.settle_debit(alice(), "USDT", dec!(200), "T-1").unwrap();
        ledger.unfreeze(alice(), "USDT", dec!(300), "O-1");

        let wallet = ledger.balance(alice(), "USDT");
        assert!(wallet.frozen >= Decimal::ZERO);
        assert!(wallet.frozen <= wallet.total);
    }
}
