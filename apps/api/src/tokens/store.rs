use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::db::StoreError;
use crate::models::account::{Account, TokenTransaction, TransactionKind};

/// A single signed balance change, applied atomically with its transaction record.
#[derive(Debug, Clone)]
pub struct BalanceMutation<'a> {
    pub account_id: Uuid,
    pub delta: i64,
    pub kind: TransactionKind,
    pub description: &'a str,
    /// When set, the mutation is refused if the resulting balance would drop below it.
    pub floor: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Applied(TokenTransaction),
    BelowFloor { balance: i64 },
    /// The resulting balance does not fit in an i64. Nothing was written.
    Overflow { balance: i64 },
    MissingAccount,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Creates the account with `initial_grant` unless it exists. Returns the account and
    /// whether it was created by this call.
    async fn open_account(
        &self,
        account_id: Uuid,
        initial_grant: i64,
    ) -> Result<(Account, bool), StoreError>;

    async fn account(&self, account_id: Uuid) -> Result<Option<Account>, StoreError>;

    /// Read-modify-write of one balance. Same-account calls must be serialized.
    async fn apply(&self, mutation: BalanceMutation<'_>) -> Result<ApplyOutcome, StoreError>;

    /// Newest first.
    async fn transactions(&self, account_id: Uuid) -> Result<Vec<TokenTransaction>, StoreError>;

    /// Stores `price` for `package_id` unless a price is already locked. Returns the
    /// locked price, or `None` if the account does not exist.
    async fn lock_package_price(
        &self,
        account_id: Uuid,
        package_id: &str,
        price: i64,
    ) -> Result<Option<i64>, StoreError>;
}

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<Uuid, Account>,
    transactions: Vec<TokenTransaction>,
}

/// In-process ledger. A single mutex orders every mutation.
#[derive(Default)]
pub struct MemoryLedgerStore {
    state: Mutex<LedgerState>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn record(
    state: &mut LedgerState,
    account_id: Uuid,
    amount: i64,
    balance_after: i64,
    kind: TransactionKind,
    description: &str,
) -> TokenTransaction {
    let tx = TokenTransaction {
        id: Uuid::new_v4(),
        account_id,
        amount,
        balance_after,
        kind,
        description: description.to_string(),
        created_at: Utc::now(),
    };
    state.transactions.push(tx.clone());
    tx
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn open_account(
        &self,
        account_id: Uuid,
        initial_grant: i64,
    ) -> Result<(Account, bool), StoreError> {
        let mut state = self.state.lock();
        if let Some(existing) = state.accounts.get(&account_id) {
            return Ok((existing.clone(), false));
        }
        let account = Account {
            id: account_id,
            token_balance: initial_grant,
            locked_package_prices: HashMap::new(),
            created_at: Utc::now(),
        };
        state.accounts.insert(account_id, account.clone());
        record(
            &mut state,
            account_id,
            initial_grant,
            initial_grant,
            TransactionKind::Grant,
            "Initial token grant",
        );
        Ok((account, true))
    }

    async fn account(&self, account_id: Uuid) -> Result<Option<Account>, StoreError> {
        Ok(self.state.lock().accounts.get(&account_id).cloned())
    }

    async fn apply(&self, mutation: BalanceMutation<'_>) -> Result<ApplyOutcome, StoreError> {
        let mut state = self.state.lock();
        let Some(account) = state.accounts.get_mut(&mutation.account_id) else {
            return Ok(ApplyOutcome::MissingAccount);
        };
        let Some(new_balance) = account.token_balance.checked_add(mutation.delta) else {
            return Ok(ApplyOutcome::Overflow {
                balance: account.token_balance,
            });
        };
        if let Some(floor) = mutation.floor {
            if new_balance < floor {
                return Ok(ApplyOutcome::BelowFloor {
                    balance: account.token_balance,
                });
            }
        }
        account.token_balance = new_balance;
        let tx = record(
            &mut state,
            mutation.account_id,
            mutation.delta,
            new_balance,
            mutation.kind,
            mutation.description,
        );
        Ok(ApplyOutcome::Applied(tx))
    }

    async fn transactions(&self, account_id: Uuid) -> Result<Vec<TokenTransaction>, StoreError> {
        let state = self.state.lock();
        Ok(state
            .transactions
            .iter()
            .rev()
            .filter(|t| t.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn lock_package_price(
        &self,
        account_id: Uuid,
        package_id: &str,
        price: i64,
    ) -> Result<Option<i64>, StoreError> {
        let mut state = self.state.lock();
        let Some(account) = state.accounts.get_mut(&account_id) else {
            return Ok(None);
        };
        let locked = *account
            .locked_package_prices
            .entry(package_id.to_string())
            .or_insert(price);
        Ok(Some(locked))
    }
}
