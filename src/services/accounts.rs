//! Account Service
//!
//! Registration, credential verification, wallet provisioning and the mock
//! deposit / withdrawal tickets. Wallet materialization is an explicit step
//! of account creation rather than a side effect.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::CoreError;
use crate::ledger::Ledger;
use crate::models::{
    Deposit, DepositRequest, TicketStatus, User, WithdrawRequest, Withdrawal,
};
use crate::store::PairRegistry;

pub struct AccountService {
    users: DashMap<Uuid, User>,
    by_email: DashMap<String, Uuid>,
    deposits: Mutex<Vec<Deposit>>,
    withdrawals: Mutex<Vec<Withdrawal>>,
    ledger: Arc<Ledger>,
    registry: Arc<PairRegistry>,
    /// Credited in the starting currency on a user's first deposit call.
    starting_balance: Decimal,
    starting_currency: String,
    /// Optional write-behind mirror for users and tickets.
    pool: Option<sqlx::PgPool>,
}

impl AccountService {
    pub fn new(
        ledger: Arc<Ledger>,
        registry: Arc<PairRegistry>,
        starting_balance: Decimal,
        starting_currency: &str,
        pool: Option<sqlx::PgPool>,
    ) -> Self {
        Self {
            users: DashMap::new(),
            by_email: DashMap::new(),
            deposits: Mutex::new(Vec::new()),
            withdrawals: Mutex::new(Vec::new()),
            ledger,
            registry,
            starting_balance,
            starting_currency: starting_currency.to_string(),
            pool,
        }
    }

    pub fn register(&self, email: &str, password: &str) -> Result<User, CoreError> {
        let email = email.trim().to_lowercase();
        if self.by_email.contains_key(&email) {
            return Err(CoreError::Validation(format!(
                "email {} is already registered",
                email
            )));
        }

        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| CoreError::Invariant(format!("password hashing failed: {}", e)))?
            .to_string();

        let user = User {
            id: Uuid::new_v4(),
            email: email.clone(),
            password_hash,
            is_active: true,
            created_at: Utc::now(),
        };
        self.by_email.insert(email, user.id);
        self.users.insert(user.id, user.clone());

        self.ledger
            .provision_wallets(user.id, &self.registry.active_currencies());
        info!(user = %user.id, email = %user.email, "user registered");
        self.mirror_user(&user);
        Ok(user)
    }

    pub fn verify_login(&self, email: &str, password: &str) -> Result<User, CoreError> {
        let email = email.trim().to_lowercase();
        let user = self
            .by_email
            .get(&email)
            .map(|id| *id)
            .and_then(|id| self.users.get(&id).map(|u| u.clone()))
            .ok_or_else(|| CoreError::Forbidden("invalid email or password".into()))?;
        if !user.is_active {
            return Err(CoreError::Forbidden("account is disabled".into()));
        }
        let parsed = PasswordHash::new(&user.password_hash)
            .map_err(|e| CoreError::Invariant(format!("stored hash unreadable: {}", e)))?;
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .map_err(|_| CoreError::Forbidden("invalid email or password".into()))?;
        Ok(user)
    }

    pub fn get(&self, user_id: Uuid) -> Option<User> {
        self.users.get(&user_id).map(|u| u.clone())
    }

    /// Mock deposit. The first call credits the configured starting balance
    /// in the starting currency regardless of the requested amount; later
    /// calls credit the requested amount.
    pub fn deposit(&self, user_id: Uuid, req: &DepositRequest) -> Result<Deposit, CoreError> {
        self.require_user(user_id)?;
        let first = !self
            .deposits
            .lock()
            .iter()
            .any(|d| d.user_id == user_id && d.status == TicketStatus::Completed);

        let (currency, amount) = if first {
            (self.starting_currency.clone(), self.starting_balance)
        } else {
            let amount = req.amount.ok_or_else(|| {
                CoreError::Validation("deposit amount is required".into())
            })?;
            if amount <= Decimal::ZERO {
                return Err(CoreError::Validation(format!(
                    "deposit amount must be positive, got {}",
                    amount
                )));
            }
            self.require_currency(&req.currency)?;
            (req.currency.clone(), amount)
        };

        let ticket = Deposit {
            id: Uuid::new_v4(),
            user_id,
            currency: currency.clone(),
            amount,
            status: TicketStatus::Completed,
            method: "mock".to_string(),
            created_at: Utc::now(),
            completed_at: Some(Utc::now()),
        };
        self.ledger
            .deposit(user_id, &currency, amount, &format!("DEPOSIT_{}", ticket.id));
        info!(user = %user_id, %currency, %amount, "deposit completed");
        self.deposits.lock().push(ticket.clone());
        self.mirror_deposit(&ticket);
        Ok(ticket)
    }

    /// Withdrawal ticket; debits available funds immediately.
    pub fn withdraw(&self, user_id: Uuid, req: &WithdrawRequest) -> Result<Withdrawal, CoreError> {
        self.require_user(user_id)?;
        self.require_currency(&req.currency)?;
        if req.amount <= Decimal::ZERO {
            return Err(CoreError::Validation(format!(
                "withdrawal amount must be positive, got {}",
                req.amount
            )));
        }

        let ticket_id = Uuid::new_v4();
        self.ledger.withdraw(
            user_id,
            &req.currency,
            req.amount,
            &format!("WITHDRAWAL_{}", ticket_id),
        )?;

        let ticket = Withdrawal {
            id: ticket_id,
            user_id,
            currency: req.currency.clone(),
            amount: req.amount,
            fee: Decimal::ZERO,
            net_amount: req.amount,
            status: TicketStatus::Completed,
            address: req.address.clone(),
            created_at: Utc::now(),
            completed_at: Some(Utc::now()),
        };
        info!(user = %user_id, currency = %req.currency, amount = %req.amount, "withdrawal completed");
        self.withdrawals.lock().push(ticket.clone());
        self.mirror_withdrawal(&ticket);
        Ok(ticket)
    }

    pub fn deposits_for(&self, user_id: Uuid) -> Vec<Deposit> {
        self.deposits
            .lock()
            .iter()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn withdrawals_for(&self, user_id: Uuid) -> Vec<Withdrawal> {
        self.withdrawals
            .lock()
            .iter()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect()
    }

    // Best-effort write-behind rows; failures are logged, never surfaced.

    fn mirror_user(&self, user: &User) {
        let Some(pool) = self.pool.clone() else {
            return;
        };
        let user = user.clone();
        tokio::spawn(async move {
            let result = sqlx::query(
                r#"
                INSERT INTO users (id, email, password_hash, is_active, created_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(user.id)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(user.is_active)
            .bind(user.created_at)
            .execute(&pool)
            .await;
            if let Err(e) = result {
                tracing::error!(user = %user.id, "failed to mirror user: {}", e);
            }
        });
    }

    fn mirror_deposit(&self, ticket: &Deposit) {
        let Some(pool) = self.pool.clone() else {
            return;
        };
        let ticket = ticket.clone();
        tokio::spawn(async move {
            let result = sqlx::query(
                r#"
                INSERT INTO deposits (id, user_id, currency, amount, status, method, created_at, completed_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(ticket.id)
            .bind(ticket.user_id)
            .bind(&ticket.currency)
            .bind(ticket.amount)
            .bind(format!("{:?}", ticket.status).to_lowercase())
            .bind(&ticket.method)
            .bind(ticket.created_at)
            .bind(ticket.completed_at)
            .execute(&pool)
            .await;
            if let Err(e) = result {
                tracing::error!(deposit = %ticket.id, "failed to mirror deposit: {}", e);
            }
        });
    }

    fn mirror_withdrawal(&self, ticket: &Withdrawal) {
        let Some(pool) = self.pool.clone() else {
            return;
        };
        let ticket = ticket.clone();
        tokio::spawn(async move {
            let result = sqlx::query(
                r#"
                INSERT INTO withdrawals (id, user_id, currency, amount, fee, net_amount, status, address, created_at, completed_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(ticket.id)
            .bind(ticket.user_id)
            .bind(&ticket.currency)
            .bind(ticket.amount)
            .bind(ticket.fee)
            .bind(ticket.net_amount)
            .bind(format!("{:?}", ticket.status).to_lowercase())
            .bind(&ticket.address)
            .bind(ticket.created_at)
            .bind(ticket.completed_at)
            .execute(&pool)
            .await;
            if let Err(e) = result {
                tracing::error!(withdrawal = %ticket.id, "failed to mirror withdrawal: {}", e);
            }
        });
    }

    fn require_user(&self, user_id: Uuid) -> Result<(), CoreError> {
        if self.users.contains_key(&user_id) {
            Ok(())
        } else {
            Err(CoreError::NotFound(format!("user {}", user_id)))
        }
    }

    fn require_currency(&self, currency: &str) -> Result<(), CoreError> {
        if self.registry.active_currencies().iter().any(|c| c == currency) {
            Ok(())
        } else {
            Err(CoreError::NotFound(format!("currency {}", currency)))
        }
    }
}
