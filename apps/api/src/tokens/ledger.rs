use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::StoreError;
use crate::errors::ErrorKind;
use crate::models::account::{Account, TokenTransaction, TransactionKind};
use crate::tokens::store::{ApplyOutcome, BalanceMutation, LedgerStore};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("amount must be positive (got {0})")]
    InvalidAmount(i64),

    #[error("adjustment of {delta} would take balance {balance} below zero")]
    NegativeAdjustment { balance: i64, delta: i64 },

    #[error("change of {delta} would overflow balance {balance}")]
    BalanceOverflow { balance: i64, delta: i64 },

    #[error("account {0} not found")]
    AccountNotFound(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::InvalidAmount(_)
            | LedgerError::NegativeAdjustment { .. }
            | LedgerError::BalanceOverflow { .. } => ErrorKind::Validation,
            LedgerError::AccountNotFound(_) => ErrorKind::NotFound,
            LedgerError::Store(_) => ErrorKind::Internal,
        }
    }
}

/// Per-account token balances.
///
/// Debits are unconditional: a negative balance is a billing event, not an authorization
/// failure. Only operator-initiated removals are refused when they would overdraw.
#[derive(Clone)]
pub struct TokenLedger {
    store: Arc<dyn LedgerStore>,
    initial_grant: i64,
}

impl TokenLedger {
    pub fn new(store: Arc<dyn LedgerStore>, initial_grant: i64) -> Self {
        Self {
            store,
            initial_grant,
        }
    }

    /// Idempotent. New accounts receive the configured initial grant.
    pub async fn open_account(&self, account_id: Uuid) -> Result<Account, LedgerError> {
        let (account, created) = self
            .store
            .open_account(account_id, self.initial_grant)
            .await?;
        if created {
            info!(
                "Opened account {account_id} with initial grant of {} tokens",
                self.initial_grant
            );
        }
        Ok(account)
    }

    pub async fn account(&self, account_id: Uuid) -> Result<Account, LedgerError> {
        self.store
            .account(account_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(account_id))
    }

    /// May be negative.
    pub async fn balance(&self, account_id: Uuid) -> Result<i64, LedgerError> {
        Ok(self.account(account_id).await?.token_balance)
    }

    /// Charges consumed tokens. Never refused for insufficient balance. Returns the new balance.
    pub async fn debit(
        &self,
        account_id: Uuid,
        amount: i64,
        description: &str,
    ) -> Result<i64, LedgerError> {
        if amount < 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        if amount == 0 {
            return self.balance(account_id).await;
        }

        let balance = self
            .apply(BalanceMutation {
                account_id,
                delta: -amount,
                kind: TransactionKind::Debit,
                description,
                floor: None,
            })
            .await?;
        if balance < 0 {
            warn!("Account {account_id} overdrawn to {balance} tokens after debit of {amount}");
        }
        Ok(balance)
    }

    /// Refunds, top-ups and referral rewards.
    pub async fn credit(
        &self,
        account_id: Uuid,
        amount: i64,
        description: &str,
    ) -> Result<i64, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        self.apply(BalanceMutation {
            account_id,
            delta: amount,
            kind: TransactionKind::Credit,
            description,
            floor: None,
        })
        .await
    }

    /// Operator adjustment. A removal that would leave the balance negative is refused;
    /// additions are always accepted, even onto an overdrawn account.
    pub async fn adjust(
        &self,
        account_id: Uuid,
        delta: i64,
        operator_id: &str,
    ) -> Result<i64, LedgerError> {
        if delta == 0 {
            return Err(LedgerError::InvalidAmount(delta));
        }
        let description = format!("Admin manual adjustment by {operator_id}: {delta:+} tokens");
        let outcome = self
            .store
            .apply(BalanceMutation {
                account_id,
                delta,
                kind: TransactionKind::AdminAdjustment,
                description: &description,
                floor: (delta < 0).then_some(0),
            })
            .await?;

        match outcome {
            ApplyOutcome::Applied(tx) => {
                info!("Adjusted account {account_id} by {delta} (operator {operator_id})");
                Ok(tx.balance_after)
            }
            ApplyOutcome::BelowFloor { balance } => {
                Err(LedgerError::NegativeAdjustment { balance, delta })
            }
            ApplyOutcome::Overflow { balance } => {
                Err(LedgerError::BalanceOverflow { balance, delta })
            }
            ApplyOutcome::MissingAccount => Err(LedgerError::AccountNotFound(account_id)),
        }
    }

    pub async fn transactions(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<TokenTransaction>, LedgerError> {
        self.account(account_id).await?;
        Ok(self.store.transactions(account_id).await?)
    }

    /// First-purchase price freeze. Returns the price in force for this package.
    pub async fn lock_package_price(
        &self,
        account_id: Uuid,
        package_id: &str,
        price: i64,
    ) -> Result<i64, LedgerError> {
        if price <= 0 {
            return Err(LedgerError::InvalidAmount(price));
        }
        self.store
            .lock_package_price(account_id, package_id, price)
            .await?
            .ok_or(LedgerError::AccountNotFound(account_id))
    }

    async fn apply(&self, mutation: BalanceMutation<'_>) -> Result<i64, LedgerError> {
        let account_id = mutation.account_id;
        let delta = mutation.delta;
        match self.store.apply(mutation).await? {
            ApplyOutcome::Applied(tx) => Ok(tx.balance_after),
            ApplyOutcome::MissingAccount => Err(LedgerError::AccountNotFound(account_id)),
            ApplyOutcome::Overflow { balance } => {
                Err(LedgerError::BalanceOverflow { balance, delta })
            }
            // Unguarded mutations carry no floor.
            ApplyOutcome::BelowFloor { balance } => Ok(balance),
        }
    }
}
