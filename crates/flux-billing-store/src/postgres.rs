//! PostgreSQL storage implementation.
//!
//! Compound operations run inside a single transaction and take row locks
//! with `SELECT ... FOR UPDATE`, order row first, then account row.

use std::fmt::Display;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};

use flux_billing_core::{
    Account, AccountId, Billing, BillingId, BillingState, BillingType, ChargeOrder,
    ChargeProduct, DebitReceipt, GenerationDebit, GenerationJob, JobId, LedgerEntry,
    LedgerEntryId, LedgerEntryType, NewChargeOrder, NewGenerationJob, OrderId, OrderPhase,
    OrderTransition, ProductId, UserId,
};

use crate::error::{Result, StoreError};
use crate::{SettleReceipt, Store};

const ACCOUNT_COLUMNS: &str = "id, user_id, credit, created_at, updated_at";
const LEDGER_COLUMNS: &str = "id, user_id, credit, balance, billing_id, entry_type, created_at";
const BILLING_COLUMNS: &str =
    "id, user_id, flux_id, state, amount, billing_type, description, created_at";
const JOB_COLUMNS: &str =
    "id, provider_ref, user_id, model, input_prompt, aspect_ratio, is_private, locale, created_at";
const ORDER_COLUMNS: &str =
    "id, user_id, product_id, amount, phase, payment_at, result, created_at, updated_at";

/// PostgreSQL-backed `Store`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wrap an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be created.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        tracing::info!(max_connections, "Connected to PostgreSQL");
        Ok(Self::new(pool))
    }

    /// Apply pending schema migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        tracing::info!("Database migrations applied");
        Ok(())
    }

    async fn lock_account(
        tx: &mut Transaction<'_, Postgres>,
        user_id: &UserId,
    ) -> Result<Account> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE user_id = $1 FOR UPDATE"
        ))
        .bind(user_id.as_str())
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| StoreError::not_found("account", user_id))?;
        account_from_row(&row)
    }

    async fn lock_pending_order(
        tx: &mut Transaction<'_, Postgres>,
        order_id: OrderId,
    ) -> Result<ChargeOrder> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM charge_orders WHERE id = $1 FOR UPDATE"
        ))
        .bind(order_id.get())
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| StoreError::not_found("charge order", order_id))?;

        let order = order_from_row(&row)?;
        if order.phase != OrderPhase::Pending {
            return Err(StoreError::OrderPhase {
                order_id: order_id.to_string(),
                phase: order.phase,
            });
        }
        Ok(order)
    }

    async fn set_balance(
        tx: &mut Transaction<'_, Postgres>,
        account_id: AccountId,
        balance: i64,
        at: DateTime<Utc>,
    ) -> Result<Account> {
        let row = sqlx::query(&format!(
            "UPDATE accounts SET credit = $2, updated_at = $3 WHERE id = $1 RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(account_id.get())
        .bind(balance)
        .bind(at)
        .fetch_one(&mut **tx)
        .await?;
        account_from_row(&row)
    }

    async fn insert_ledger_entry(
        tx: &mut Transaction<'_, Postgres>,
        user_id: &UserId,
        credit: i64,
        balance: i64,
        billing_id: Option<BillingId>,
        entry_type: LedgerEntryType,
        at: DateTime<Utc>,
    ) -> Result<LedgerEntry> {
        let row = sqlx::query(&format!(
            "INSERT INTO ledger_entries (user_id, credit, balance, billing_id, entry_type, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {LEDGER_COLUMNS}"
        ))
        .bind(user_id.as_str())
        .bind(credit)
        .bind(balance)
        .bind(billing_id.map(BillingId::get))
        .bind(entry_type.as_str())
        .bind(at)
        .fetch_one(&mut **tx)
        .await?;
        ledger_from_row(&row)
    }
}

fn page(limit: usize, offset: usize) -> (i64, i64) {
    (
        i64::try_from(limit).unwrap_or(i64::MAX),
        i64::try_from(offset).unwrap_or(i64::MAX),
    )
}

fn parse_column<T>(row: &PgRow, column: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw: String = row.try_get(column)?;
    raw.parse()
        .map_err(|e: T::Err| StoreError::Serialization(format!("{column}: {e}")))
}

fn account_from_row(row: &PgRow) -> Result<Account> {
    Ok(Account {
        id: AccountId::new(row.try_get("id")?),
        user_id: parse_column(row, "user_id")?,
        credit: row.try_get("credit")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn ledger_from_row(row: &PgRow) -> Result<LedgerEntry> {
    let billing_id: Option<i64> = row.try_get("billing_id")?;
    Ok(LedgerEntry {
        id: LedgerEntryId::new(row.try_get("id")?),
        user_id: parse_column(row, "user_id")?,
        credit: row.try_get("credit")?,
        balance: row.try_get("balance")?,
        billing_id: billing_id.map(BillingId::new),
        entry_type: parse_column(row, "entry_type")?,
        created_at: row.try_get("created_at")?,
    })
}

fn billing_from_row(row: &PgRow) -> Result<Billing> {
    let flux_id: Option<i64> = row.try_get("flux_id")?;
    Ok(Billing {
        id: BillingId::new(row.try_get("id")?),
        user_id: parse_column(row, "user_id")?,
        flux_id: flux_id.map(JobId::new),
        state: parse_column(row, "state")?,
        amount: row.try_get("amount")?,
        billing_type: parse_column(row, "billing_type")?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
    })
}

fn job_from_row(row: &PgRow) -> Result<GenerationJob> {
    Ok(GenerationJob {
        id: JobId::new(row.try_get("id")?),
        provider_ref: row.try_get("provider_ref")?,
        user_id: parse_column(row, "user_id")?,
        model: parse_column(row, "model")?,
        input_prompt: row.try_get("input_prompt")?,
        aspect_ratio: parse_column(row, "aspect_ratio")?,
        is_private: row.try_get("is_private")?,
        locale: row.try_get("locale")?,
        created_at: row.try_get("created_at")?,
    })
}

fn product_from_row(row: &PgRow) -> Result<ChargeProduct> {
    Ok(ChargeProduct {
        id: ProductId::new(row.try_get("id")?),
        credit: row.try_get("credit")?,
        title: row.try_get("title")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
    })
}

fn order_from_row(row: &PgRow) -> Result<ChargeOrder> {
    Ok(ChargeOrder {
        id: OrderId::new(row.try_get("id")?),
        user_id: parse_column(row, "user_id")?,
        product_id: ProductId::new(row.try_get("product_id")?),
        amount: row.try_get("amount")?,
        phase: parse_column(row, "phase")?,
        payment_at: row.try_get("payment_at")?,
        result: row.try_get("result")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl Store for PgStore {
    // =========================================================================
    // Account Operations
    // =========================================================================

    async fn get_or_create_account(&self, user_id: &UserId) -> Result<Account> {
        let row = sqlx::query(&format!(
            "INSERT INTO accounts (user_id) VALUES ($1) \
             ON CONFLICT (user_id) DO UPDATE SET user_id = EXCLUDED.user_id \
             RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(user_id.as_str())
        .fetch_one(&self.pool)
        .await?;
        account_from_row(&row)
    }

    async fn get_account(&self, user_id: &UserId) -> Result<Option<Account>> {
        sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE user_id = $1"
        ))
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(account_from_row)
        .transpose()
    }

    async fn adjust(
        &self,
        account_id: AccountId,
        delta: i64,
        entry_type: LedgerEntryType,
    ) -> Result<(Account, LedgerEntry)> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1 FOR UPDATE"
        ))
        .bind(account_id.get())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::not_found("account", account_id))?;
        let account = account_from_row(&row)?;

        let balance = account
            .balance_after(delta)
            .ok_or(StoreError::ConstraintViolation {
                balance: account.credit,
                delta,
            })?;

        let now = Utc::now();
        let account = Self::set_balance(&mut tx, account_id, balance, now).await?;
        let entry = Self::insert_ledger_entry(
            &mut tx,
            &account.user_id,
            delta,
            balance,
            None,
            entry_type,
            now,
        )
        .await?;

        tx.commit().await?;
        Ok((account, entry))
    }

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    async fn list_ledger_entries(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let (limit, offset) = page(limit, offset);
        sqlx::query(&format!(
            "SELECT {LEDGER_COLUMNS} FROM ledger_entries WHERE user_id = $1 \
             ORDER BY id DESC LIMIT $2 OFFSET $3"
        ))
        .bind(user_id.as_str())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(ledger_from_row)
        .collect()
    }

    async fn ledger_sum(&self, user_id: &UserId) -> Result<i64> {
        let sum: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(credit), 0)::BIGINT FROM ledger_entries WHERE user_id = $1",
        )
        .bind(user_id.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(sum)
    }

    async fn list_billings(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Billing>> {
        let (limit, offset) = page(limit, offset);
        sqlx::query(&format!(
            "SELECT {BILLING_COLUMNS} FROM billings WHERE user_id = $1 \
             ORDER BY id DESC LIMIT $2 OFFSET $3"
        ))
        .bind(user_id.as_str())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(billing_from_row)
        .collect()
    }

    // =========================================================================
    // Generation Job Operations
    // =========================================================================

    async fn insert_generation_job(&self, job: NewGenerationJob) -> Result<GenerationJob> {
        let row = sqlx::query(&format!(
            "INSERT INTO generation_jobs \
             (provider_ref, user_id, model, input_prompt, aspect_ratio, is_private, locale) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {JOB_COLUMNS}"
        ))
        .bind(&job.provider_ref)
        .bind(job.user_id.as_str())
        .bind(job.request.model.provider_name())
        .bind(&job.request.input_prompt)
        .bind(job.request.aspect_ratio.as_str())
        .bind(job.request.is_private)
        .bind(&job.request.locale)
        .fetch_one(&self.pool)
        .await?;
        job_from_row(&row)
    }

    async fn find_generation_job(&self, provider_ref: &str) -> Result<Option<GenerationJob>> {
        sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM generation_jobs WHERE provider_ref = $1"
        ))
        .bind(provider_ref)
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(job_from_row)
        .transpose()
    }

    async fn list_unbilled_jobs(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<GenerationJob>> {
        sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM generation_jobs j \
             WHERE j.created_at < $1 AND NOT EXISTS ( \
                 SELECT 1 FROM billings b WHERE b.flux_id = j.id AND b.billing_type = $2 \
             ) ORDER BY j.id"
        ))
        .bind(created_before)
        .bind(BillingType::Withdraw.as_str())
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(job_from_row)
        .collect()
    }

    // =========================================================================
    // Catalog and Order Operations
    // =========================================================================

    async fn upsert_charge_product(&self, product: &ChargeProduct) -> Result<()> {
        sqlx::query(
            "INSERT INTO charge_products (id, credit, title, amount, currency) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (id) DO UPDATE SET credit = EXCLUDED.credit, title = EXCLUDED.title, \
             amount = EXCLUDED.amount, currency = EXCLUDED.currency",
        )
        .bind(product.id.get())
        .bind(product.credit)
        .bind(&product.title)
        .bind(product.amount)
        .bind(&product.currency)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_charge_product(&self, product_id: ProductId) -> Result<Option<ChargeProduct>> {
        sqlx::query("SELECT id, credit, title, amount, currency FROM charge_products WHERE id = $1")
            .bind(product_id.get())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(product_from_row)
            .transpose()
    }

    async fn create_charge_order(&self, order: NewChargeOrder) -> Result<ChargeOrder> {
        let row = sqlx::query(&format!(
            "INSERT INTO charge_orders (user_id, product_id, amount, phase) \
             VALUES ($1, $2, $3, $4) RETURNING {ORDER_COLUMNS}"
        ))
        .bind(order.user_id.as_str())
        .bind(order.product_id.get())
        .bind(order.amount)
        .bind(OrderPhase::Pending.as_str())
        .fetch_one(&self.pool)
        .await?;
        order_from_row(&row)
    }

    async fn get_charge_order(&self, order_id: OrderId) -> Result<Option<ChargeOrder>> {
        sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM charge_orders WHERE id = $1"
        ))
        .bind(order_id.get())
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(order_from_row)
        .transpose()
    }

    // =========================================================================
    // Compound Operations
    // =========================================================================

    async fn debit_for_generation(&self, debit: &GenerationDebit) -> Result<DebitReceipt> {
        let mut tx = self.pool.begin().await?;

        let account = Self::lock_account(&mut tx, &debit.user_id).await?;
        if !account.has_sufficient_credits(debit.credits) {
            return Err(StoreError::InsufficientCredits {
                balance: account.credit,
                required: debit.credits,
            });
        }
        let balance = account.credit - debit.credits;
        let now = Utc::now();

        Self::set_balance(&mut tx, account.id, balance, now).await?;

        let row = sqlx::query(&format!(
            "INSERT INTO billings (user_id, flux_id, state, amount, billing_type, description, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {BILLING_COLUMNS}"
        ))
        .bind(debit.user_id.as_str())
        .bind(debit.job_id.get())
        .bind(BillingState::Done.as_str())
        .bind(-debit.credits)
        .bind(BillingType::Withdraw.as_str())
        .bind(&debit.description)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        let billing = billing_from_row(&row)?;

        let entry = Self::insert_ledger_entry(
            &mut tx,
            &debit.user_id,
            -debit.credits,
            balance,
            Some(billing.id),
            LedgerEntryType::Generate,
            now,
        )
        .await?;

        tx.commit().await?;
        Ok(DebitReceipt {
            balance,
            billing,
            entry,
        })
    }

    async fn transition_order(
        &self,
        order_id: OrderId,
        transition: OrderTransition,
        snapshot: &serde_json::Value,
    ) -> Result<ChargeOrder> {
        if transition == OrderTransition::Pay {
            return Err(StoreError::Database(
                "paid transitions must go through settle_paid_order".into(),
            ));
        }

        let mut tx = self.pool.begin().await?;
        let mut order = Self::lock_pending_order(&mut tx, order_id).await?;
        let phase = order.phase;
        order
            .apply(transition, snapshot, Utc::now())
            .map_err(|_| StoreError::OrderPhase {
                order_id: order_id.to_string(),
                phase,
            })?;

        sqlx::query(
            "UPDATE charge_orders SET phase = $2, result = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(order_id.get())
        .bind(order.phase.as_str())
        .bind(&order.result)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(order)
    }

    async fn settle_paid_order(
        &self,
        order_id: OrderId,
        product: &ChargeProduct,
        snapshot: &serde_json::Value,
    ) -> Result<SettleReceipt> {
        let mut tx = self.pool.begin().await?;
        let mut order = Self::lock_pending_order(&mut tx, order_id).await?;

        sqlx::query("INSERT INTO accounts (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(order.user_id.as_str())
            .execute(&mut *tx)
            .await?;
        let account = Self::lock_account(&mut tx, &order.user_id).await?;

        let balance = account
            .balance_after(product.credit)
            .ok_or(StoreError::ConstraintViolation {
                balance: account.credit,
                delta: product.credit,
            })?;

        let now = Utc::now();
        let phase = order.phase;
        order
            .apply(OrderTransition::Pay, snapshot, now)
            .map_err(|_| StoreError::OrderPhase {
                order_id: order_id.to_string(),
                phase,
            })?;

        sqlx::query(
            "UPDATE charge_orders SET phase = $2, payment_at = $3, result = $4, updated_at = $5 \
             WHERE id = $1",
        )
        .bind(order_id.get())
        .bind(order.phase.as_str())
        .bind(order.payment_at)
        .bind(&order.result)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        let account = Self::set_balance(&mut tx, account.id, balance, now).await?;
        let entry = Self::insert_ledger_entry(
            &mut tx,
            &order.user_id,
            product.credit,
            balance,
            None,
            LedgerEntryType::Charge,
            now,
        )
        .await?;

        tx.commit().await?;
        Ok(SettleReceipt {
            order,
            account,
            entry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flux_billing_core::{AspectRatio, FluxModel, GenerationRequest};

    async fn store() -> PgStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let store = PgStore::connect(&url, 5).await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    fn unique_user(prefix: &str) -> UserId {
        format!("{prefix}_{}", Utc::now().timestamp_nanos_opt().unwrap())
            .parse()
            .unwrap()
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn debit_commits_balance_billing_and_entry() {
        let store = store().await;
        let user = unique_user("pg_debit");
        let account = store.get_or_create_account(&user).await.unwrap();
        store
            .adjust(account.id, 100, LedgerEntryType::Charge)
            .await
            .unwrap();

        let job = store
            .insert_generation_job(NewGenerationJob {
                provider_ref: format!("rep_{user}"),
                user_id: user.clone(),
                request: GenerationRequest {
                    model: FluxModel::Schnell,
                    input_prompt: "a harbor at dawn".into(),
                    aspect_ratio: AspectRatio::Landscape,
                    is_private: 0,
                    locale: "en".into(),
                },
            })
            .await
            .unwrap();

        let receipt = store
            .debit_for_generation(&GenerationDebit {
                user_id: user.clone(),
                job_id: job.id,
                credits: 15,
                description: "Generate test".into(),
            })
            .await
            .unwrap();
        assert_eq!(receipt.balance, 85);
        assert_eq!(receipt.entry.billing_id, Some(receipt.billing.id));
        assert_eq!(store.ledger_sum(&user).await.unwrap(), 85);

        let err = store
            .debit_for_generation(&GenerationDebit {
                user_id: user.clone(),
                job_id: job.id,
                credits: 86,
                description: "Generate test".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InsufficientCredits { .. }));
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn settle_is_applied_once() {
        let store = store().await;
        let user = unique_user("pg_settle");
        let product = ChargeProduct {
            id: ProductId::new(9001),
            credit: 200,
            title: "Test pack".into(),
            amount: 990,
            currency: "usd".into(),
        };
        store.upsert_charge_product(&product).await.unwrap();
        let order = store
            .create_charge_order(NewChargeOrder {
                user_id: user.clone(),
                product_id: product.id,
                amount: product.amount,
            })
            .await
            .unwrap();

        let receipt = store
            .settle_paid_order(order.id, &product, &serde_json::json!({"id": "pi_pg"}))
            .await
            .unwrap();
        assert_eq!(receipt.account.credit, 200);

        let replay = store
            .settle_paid_order(order.id, &product, &serde_json::json!({"id": "pi_pg"}))
            .await
            .unwrap_err();
        assert!(matches!(replay, StoreError::OrderPhase { .. }));
        assert_eq!(store.ledger_sum(&user).await.unwrap(), 200);
    }
}
