use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::db::StoreError;
use crate::models::account::{Account, TokenTransaction, TransactionKind};
use crate::tokens::store::{ApplyOutcome, BalanceMutation, LedgerStore};

#[derive(Debug, FromRow)]
struct AccountRow {
    id: Uuid,
    token_balance: i64,
    locked_package_prices: Json<HashMap<String, i64>>,
    created_at: DateTime<Utc>,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Account {
            id: row.id,
            token_balance: row.token_balance,
            locked_package_prices: row.locked_package_prices.0,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct TransactionRow {
    id: Uuid,
    account_id: Uuid,
    amount: i64,
    balance_after: i64,
    kind: String,
    description: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for TokenTransaction {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let kind = TransactionKind::parse(&row.kind)
            .ok_or_else(|| StoreError::Corrupt(format!("transaction kind '{}'", row.kind)))?;
        Ok(TokenTransaction {
            id: row.id,
            account_id: row.account_id,
            amount: row.amount,
            balance_after: row.balance_after,
            kind,
            description: row.description,
            created_at: row.created_at,
        })
    }
}

/// Postgres-backed ledger. Every balance change locks the account row, so same-account
/// writers are serialized while different accounts proceed in parallel.
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn insert_transaction(
    conn: &mut sqlx::PgConnection,
    account_id: Uuid,
    amount: i64,
    balance_after: i64,
    kind: TransactionKind,
    description: &str,
) -> Result<TokenTransaction, StoreError> {
    let row = sqlx::query_as::<_, TransactionRow>(
        r#"
        INSERT INTO token_transactions (id, account_id, amount, balance_after, kind, description)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(account_id)
    .bind(amount)
    .bind(balance_after)
    .bind(kind.as_str())
    .bind(description)
    .fetch_one(&mut *conn)
    .await?;
    row.try_into()
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn open_account(
        &self,
        account_id: Uuid,
        initial_grant: i64,
    ) -> Result<(Account, bool), StoreError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO accounts (id, token_balance) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING",
        )
        .bind(account_id)
        .bind(initial_grant)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if inserted {
            insert_transaction(
                &mut tx,
                account_id,
                initial_grant,
                initial_grant,
                TransactionKind::Grant,
                "Initial token grant",
            )
            .await?;
        }

        let row = sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts WHERE id = $1")
            .bind(account_id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok((row.into(), inserted))
    }

    async fn account(&self, account_id: Uuid) -> Result<Option<Account>, StoreError> {
        Ok(
            sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts WHERE id = $1")
                .bind(account_id)
                .fetch_optional(&self.pool)
                .await?
                .map(Account::from),
        )
    }

    async fn apply(&self, mutation: BalanceMutation<'_>) -> Result<ApplyOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let balance: Option<i64> =
            sqlx::query_scalar("SELECT token_balance FROM accounts WHERE id = $1 FOR UPDATE")
                .bind(mutation.account_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(balance) = balance else {
            return Ok(ApplyOutcome::MissingAccount);
        };

        let Some(new_balance) = balance.checked_add(mutation.delta) else {
            return Ok(ApplyOutcome::Overflow { balance });
        };
        if let Some(floor) = mutation.floor {
            if new_balance < floor {
                return Ok(ApplyOutcome::BelowFloor { balance });
            }
        }

        sqlx::query("UPDATE accounts SET token_balance = $1 WHERE id = $2")
            .bind(new_balance)
            .bind(mutation.account_id)
            .execute(&mut *tx)
            .await?;
        let record = insert_transaction(
            &mut tx,
            mutation.account_id,
            mutation.delta,
            new_balance,
            mutation.kind,
            mutation.description,
        )
        .await?;
        tx.commit().await?;

        Ok(ApplyOutcome::Applied(record))
    }

    async fn transactions(&self, account_id: Uuid) -> Result<Vec<TokenTransaction>, StoreError> {
        sqlx::query_as::<_, TransactionRow>(
            "SELECT * FROM token_transactions WHERE account_id = $1 ORDER BY created_at DESC, id",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(TokenTransaction::try_from)
        .collect()
    }

    async fn lock_package_price(
        &self,
        account_id: Uuid,
        package_id: &str,
        price: i64,
    ) -> Result<Option<i64>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let prices: Option<Json<HashMap<String, i64>>> = sqlx::query_scalar(
            "SELECT locked_package_prices FROM accounts WHERE id = $1 FOR UPDATE",
        )
        .bind(account_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(Json(mut prices)) = prices else {
            return Ok(None);
        };

        if let Some(existing) = prices.get(package_id) {
            return Ok(Some(*existing));
        }

        prices.insert(package_id.to_string(), price);
        sqlx::query("UPDATE accounts SET locked_package_prices = $1 WHERE id = $2")
            .bind(Json(&prices))
            .bind(account_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Some(price))
    }
}
