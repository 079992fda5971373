//! In-memory storage implementation.
//!
//! Tables live behind a single `RwLock` that is only ever held for short,
//! non-awaiting critical sections. Serialization of compound operations comes
//! from a per-row lock table: a compound operation takes the row locks it
//! needs (order before account), reads and validates, then commits all of its
//! writes in one write-lock section.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use flux_billing_core::{
    Account, AccountId, Billing, BillingId, BillingState, BillingType, ChargeOrder,
    ChargeProduct, DebitReceipt, GenerationDebit, GenerationJob, JobId, LedgerEntry,
    LedgerEntryId, LedgerEntryType, NewChargeOrder, NewGenerationJob, OrderId, OrderPhase,
    OrderTransition, ProductId, UserId,
};

use crate::error::{Result, StoreError};
use crate::{SettleReceipt, Store};

/// Per-key async locks standing in for database row locks.
#[derive(Default)]
struct LockTable {
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LockTable {
    async fn lock(&self, key: String) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(key).or_default().clone()
        };
        mutex.lock_owned().await
    }
}

fn account_key(user_id: &UserId) -> String {
    format!("account:{user_id}")
}

fn order_key(order_id: OrderId) -> String {
    format!("order:{order_id}")
}

#[derive(Default)]
struct Tables {
    last_id: i64,
    accounts: HashMap<UserId, Account>,
    account_owners: HashMap<AccountId, UserId>,
    ledger: Vec<LedgerEntry>,
    billings: Vec<Billing>,
    jobs: BTreeMap<JobId, GenerationJob>,
    products: HashMap<ProductId, ChargeProduct>,
    orders: HashMap<OrderId, ChargeOrder>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn ledger_entry(
        &mut self,
        user_id: &UserId,
        credit: i64,
        balance: i64,
        billing_id: Option<BillingId>,
        entry_type: LedgerEntryType,
        at: DateTime<Utc>,
    ) -> LedgerEntry {
        let entry = LedgerEntry {
            id: LedgerEntryId::new(self.next_id()),
            user_id: user_id.clone(),
            credit,
            balance,
            billing_id,
            entry_type,
            created_at: at,
        };
        self.ledger.push(entry.clone());
        entry
    }

    fn set_balance(&mut self, user_id: &UserId, balance: i64, at: DateTime<Utc>) -> Result<Account> {
        let account = self
            .accounts
            .get_mut(user_id)
            .ok_or_else(|| StoreError::not_found("account", user_id))?;
        account.credit = balance;
        account.updated_at = at;
        Ok(account.clone())
    }
}

/// In-memory `Store` used for tests and local development.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    locks: LockTable,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn account_snapshot(&self, user_id: &UserId) -> Result<Account> {
        self.tables
            .read()
            .await
            .accounts
            .get(user_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("account", user_id))
    }

    async fn pending_order(&self, order_id: OrderId) -> Result<ChargeOrder> {
        let order = self
            .tables
            .read()
            .await
            .orders
            .get(&order_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("charge order", order_id))?;

        if order.phase != OrderPhase::Pending {
            return Err(StoreError::OrderPhase {
                order_id: order_id.to_string(),
                phase: order.phase,
            });
        }
        Ok(order)
    }
}

#[async_trait]
impl Store for MemoryStore {
    // =========================================================================
    // Account Operations
    // =========================================================================

    async fn get_or_create_account(&self, user_id: &UserId) -> Result<Account> {
        let _row = self.locks.lock(account_key(user_id)).await;

        let mut tables = self.tables.write().await;
        if let Some(account) = tables.accounts.get(user_id) {
            return Ok(account.clone());
        }

        let account = Account::new(AccountId::new(tables.next_id()), user_id.clone());
        tables.account_owners.insert(account.id, user_id.clone());
        tables.accounts.insert(user_id.clone(), account.clone());
        tracing::debug!(user_id = %user_id, account_id = %account.id, "Provisioned credit account");
        Ok(account)
    }

    async fn get_account(&self, user_id: &UserId) -> Result<Option<Account>> {
        Ok(self.tables.read().await.accounts.get(user_id).cloned())
    }

    async fn adjust(
        &self,
        account_id: AccountId,
        delta: i64,
        entry_type: LedgerEntryType,
    ) -> Result<(Account, LedgerEntry)> {
        let user_id = self
            .tables
            .read()
            .await
            .account_owners
            .get(&account_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("account", account_id))?;

        let _row = self.locks.lock(account_key(&user_id)).await;
        let account = self.account_snapshot(&user_id).await?;
        let balance = account
            .balance_after(delta)
            .ok_or(StoreError::ConstraintViolation {
                balance: account.credit,
                delta,
            })?;

        let now = Utc::now();
        let mut tables = self.tables.write().await;
        let account = tables.set_balance(&user_id, balance, now)?;
        let entry = tables.ledger_entry(&user_id, delta, balance, None, entry_type, now);
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
        let tables = self.tables.read().await;
        Ok(tables
            .ledger
            .iter()
            .rev()
            .filter(|e| &e.user_id == user_id)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn ledger_sum(&self, user_id: &UserId) -> Result<i64> {
        let tables = self.tables.read().await;
        Ok(flux_billing_core::ledger_total(
            tables.ledger.iter().filter(|e| &e.user_id == user_id),
        ))
    }

    async fn list_billings(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Billing>> {
        let tables = self.tables.read().await;
        Ok(tables
            .billings
            .iter()
            .rev()
            .filter(|b| &b.user_id == user_id)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    // =========================================================================
    // Generation Job Operations
    // =========================================================================

    async fn insert_generation_job(&self, job: NewGenerationJob) -> Result<GenerationJob> {
        let mut tables = self.tables.write().await;
        if tables.jobs.values().any(|j| j.provider_ref == job.provider_ref) {
            return Err(StoreError::Database(format!(
                "duplicate provider reference: {}",
                job.provider_ref
            )));
        }

        let record = GenerationJob {
            id: JobId::new(tables.next_id()),
            provider_ref: job.provider_ref,
            user_id: job.user_id,
            model: job.request.model,
            input_prompt: job.request.input_prompt,
            aspect_ratio: job.request.aspect_ratio,
            is_private: job.request.is_private,
            locale: job.request.locale,
            created_at: Utc::now(),
        };
        tables.jobs.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_generation_job(&self, provider_ref: &str) -> Result<Option<GenerationJob>> {
        let tables = self.tables.read().await;
        Ok(tables
            .jobs
            .values()
            .find(|j| j.provider_ref == provider_ref)
            .cloned())
    }

    async fn list_unbilled_jobs(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<GenerationJob>> {
        let tables = self.tables.read().await;
        Ok(tables
            .jobs
            .values()
            .filter(|j| j.created_at < created_before)
            .filter(|j| {
                !tables.billings.iter().any(|b| {
                    b.flux_id == Some(j.id) && b.billing_type == BillingType::Withdraw
                })
            })
            .cloned()
            .collect())
    }

    // =========================================================================
    // Catalog and Order Operations
    // =========================================================================

    async fn upsert_charge_product(&self, product: &ChargeProduct) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.last_id = tables.last_id.max(product.id.get());
        tables.products.insert(product.id, product.clone());
        Ok(())
    }

    async fn get_charge_product(&self, product_id: ProductId) -> Result<Option<ChargeProduct>> {
        Ok(self.tables.read().await.products.get(&product_id).cloned())
    }

    async fn create_charge_order(&self, order: NewChargeOrder) -> Result<ChargeOrder> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();
        let record = ChargeOrder {
            id: OrderId::new(tables.next_id()),
            user_id: order.user_id,
            product_id: order.product_id,
            amount: order.amount,
            phase: OrderPhase::Pending,
            payment_at: None,
            result: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        };
        tables.orders.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_charge_order(&self, order_id: OrderId) -> Result<Option<ChargeOrder>> {
        Ok(self.tables.read().await.orders.get(&order_id).cloned())
    }

    // =========================================================================
    // Compound Operations
    // =========================================================================

    async fn debit_for_generation(&self, debit: &GenerationDebit) -> Result<DebitReceipt> {
        let _row = self.locks.lock(account_key(&debit.user_id)).await;

        let account = self.account_snapshot(&debit.user_id).await?;
        if !account.has_sufficient_credits(debit.credits) {
            return Err(StoreError::InsufficientCredits {
                balance: account.credit,
                required: debit.credits,
            });
        }
        let balance = account.credit - debit.credits;

        let now = Utc::now();
        let mut tables = self.tables.write().await;
        tables.set_balance(&debit.user_id, balance, now)?;

        let billing = Billing {
            id: BillingId::new(tables.next_id()),
            user_id: debit.user_id.clone(),
            flux_id: Some(debit.job_id),
            state: BillingState::Done,
            amount: -debit.credits,
            billing_type: BillingType::Withdraw,
            description: debit.description.clone(),
            created_at: now,
        };
        tables.billings.push(billing.clone());

        let entry = tables.ledger_entry(
            &debit.user_id,
            -debit.credits,
            balance,
            Some(billing.id),
            LedgerEntryType::Generate,
            now,
        );

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

        let _row = self.locks.lock(order_key(order_id)).await;
        let mut order = self.pending_order(order_id).await?;
        order
            .apply(transition, snapshot, Utc::now())
            .map_err(|_| StoreError::OrderPhase {
                order_id: order_id.to_string(),
                phase: order.phase,
            })?;

        self.tables
            .write()
            .await
            .orders
            .insert(order_id, order.clone());
        Ok(order)
    }

    async fn settle_paid_order(
        &self,
        order_id: OrderId,
        product: &ChargeProduct,
        snapshot: &serde_json::Value,
    ) -> Result<SettleReceipt> {
        let _order_row = self.locks.lock(order_key(order_id)).await;
        let mut order = self.pending_order(order_id).await?;

        let owner = order.user_id.clone();
        let account = self.get_or_create_account(&owner).await?;
        let _account_row = self.locks.lock(account_key(&owner)).await;
        let account = self.account_snapshot(&account.user_id).await?;

        let balance = account
            .balance_after(product.credit)
            .ok_or(StoreError::ConstraintViolation {
                balance: account.credit,
                delta: product.credit,
            })?;

        let now = Utc::now();
        order
            .apply(OrderTransition::Pay, snapshot, now)
            .map_err(|_| StoreError::OrderPhase {
                order_id: order_id.to_string(),
                phase: order.phase,
            })?;

        let mut tables = self.tables.write().await;
        let account = tables.set_balance(&owner, balance, now)?;
        let entry = tables.ledger_entry(
            &owner,
            product.credit,
            balance,
            None,
            LedgerEntryType::Charge,
            now,
        );
        tables.orders.insert(order_id, order.clone());

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

    fn user(name: &str) -> UserId {
        name.parse().unwrap()
    }

    async fn funded(store: &MemoryStore, user_id: &UserId, credit: i64) -> Account {
        let account = store.get_or_create_account(user_id).await.unwrap();
        if credit > 0 {
            store
                .adjust(account.id, credit, LedgerEntryType::Charge)
                .await
                .unwrap();
        }
        store.get_account(user_id).await.unwrap().unwrap()
    }

    async fn job(store: &MemoryStore, user_id: &UserId, provider_ref: &str) -> GenerationJob {
        store
            .insert_generation_job(NewGenerationJob {
                provider_ref: provider_ref.into(),
                user_id: user_id.clone(),
                request: GenerationRequest {
                    model: FluxModel::Schnell,
                    input_prompt: "a red fox".into(),
                    aspect_ratio: AspectRatio::Square,
                    is_private: 0,
                    locale: "en".into(),
                },
            })
            .await
            .unwrap()
    }

    fn debit(user_id: &UserId, job_id: JobId, credits: i64) -> GenerationDebit {
        GenerationDebit {
            user_id: user_id.clone(),
            job_id,
            credits,
            description: "Generate test".into(),
        }
    }

    fn product(credit: i64) -> ChargeProduct {
        ChargeProduct {
            id: ProductId::new(1),
            credit,
            title: "Starter".into(),
            amount: 990,
            currency: "usd".into(),
        }
    }

    #[tokio::test]
    async fn accounts_are_provisioned_lazily_once() {
        let store = MemoryStore::new();
        let alice = user("user_alice");

        assert!(store.get_account(&alice).await.unwrap().is_none());
        let first = store.get_or_create_account(&alice).await.unwrap();
        let second = store.get_or_create_account(&alice).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.credit, 0);
    }

    #[tokio::test]
    async fn adjust_rejects_negative_balance() {
        let store = MemoryStore::new();
        let alice = user("user_alice");
        let account = funded(&store, &alice, 10).await;

        let err = store
            .adjust(account.id, -11, LedgerEntryType::Generate)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::ConstraintViolation {
                balance: 10,
                delta: -11
            }
        ));

        let missing = store
            .adjust(AccountId::new(999), 5, LedgerEntryType::Charge)
            .await
            .unwrap_err();
        assert!(matches!(missing, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn debit_writes_billing_and_ledger_entry() {
        let store = MemoryStore::new();
        let alice = user("user_alice");
        funded(&store, &alice, 100).await;
        let job = job(&store, &alice, "rep_1").await;

        let receipt = store
            .debit_for_generation(&debit(&alice, job.id, 15))
            .await
            .unwrap();
        assert_eq!(receipt.balance, 85);
        assert_eq!(receipt.billing.amount, -15);
        assert_eq!(receipt.billing.billing_type, BillingType::Withdraw);
        assert_eq!(receipt.billing.flux_id, Some(job.id));
        assert_eq!(receipt.entry.credit, -15);
        assert_eq!(receipt.entry.balance, 85);
        assert_eq!(receipt.entry.billing_id, Some(receipt.billing.id));

        let account = store.get_account(&alice).await.unwrap().unwrap();
        assert_eq!(account.credit, 85);
        assert_eq!(store.ledger_sum(&alice).await.unwrap(), 85);
    }

    #[tokio::test]
    async fn debit_with_insufficient_funds_changes_nothing() {
        let store = MemoryStore::new();
        let alice = user("user_alice");
        funded(&store, &alice, 10).await;
        let job = job(&store, &alice, "rep_2").await;

        let err = store
            .debit_for_generation(&debit(&alice, job.id, 80))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::InsufficientCredits {
                balance: 10,
                required: 80
            }
        ));
        assert_eq!(store.get_account(&alice).await.unwrap().unwrap().credit, 10);
        assert_eq!(store.list_ledger_entries(&alice, 10, 0).await.unwrap().len(), 1);
        assert!(store.list_billings(&alice, 10, 0).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_debits_never_overdraw() {
        let store = Arc::new(MemoryStore::new());
        let alice = user("user_alice");
        funded(&store, &alice, 100).await;
        let job = job(&store, &alice, "rep_3").await;

        let attempts = (0..20).map(|_| {
            let store = store.clone();
            let d = debit(&alice, job.id, 15);
            tokio::spawn(async move { store.debit_for_generation(&d).await })
        });
        let results = futures::future::join_all(attempts).await;
        let succeeded = results
            .into_iter()
            .filter(|r| matches!(r, Ok(Ok(_))))
            .count();

        assert_eq!(succeeded, 6);
        let account = store.get_account(&alice).await.unwrap().unwrap();
        assert_eq!(account.credit, 10);
        assert_eq!(store.ledger_sum(&alice).await.unwrap(), account.credit);

        let mut balances: Vec<i64> = store
            .list_ledger_entries(&alice, 100, 0)
            .await
            .unwrap()
            .iter()
            .map(|e| e.balance)
            .collect();
        balances.sort_unstable();
        balances.dedup();
        assert_eq!(balances.len(), 7);
    }

    #[tokio::test]
    async fn settle_credits_owner_exactly_once() {
        let store = MemoryStore::new();
        let alice = user("user_alice");
        let product = product(200);
        store.upsert_charge_product(&product).await.unwrap();
        let order = store
            .create_charge_order(NewChargeOrder {
                user_id: alice.clone(),
                product_id: product.id,
                amount: product.amount,
            })
            .await
            .unwrap();

        let snapshot = serde_json::json!({"id": "pi_1"});
        let receipt = store
            .settle_paid_order(order.id, &product, &snapshot)
            .await
            .unwrap();
        assert_eq!(receipt.order.phase, OrderPhase::Paid);
        assert!(receipt.order.payment_at.is_some());
        assert_eq!(receipt.account.credit, 200);
        assert_eq!(receipt.entry.entry_type, LedgerEntryType::Charge);
        assert_eq!(receipt.entry.balance, 200);

        let replay = store
            .settle_paid_order(order.id, &product, &snapshot)
            .await
            .unwrap_err();
        assert!(matches!(
            replay,
            StoreError::OrderPhase {
                phase: OrderPhase::Paid,
                ..
            }
        ));
        assert_eq!(store.get_account(&alice).await.unwrap().unwrap().credit, 200);
        assert_eq!(store.list_ledger_entries(&alice, 10, 0).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_settlements_credit_once() {
        let store = Arc::new(MemoryStore::new());
        let alice = user("user_alice");
        let product = product(200);
        let order = store
            .create_charge_order(NewChargeOrder {
                user_id: alice.clone(),
                product_id: product.id,
                amount: product.amount,
            })
            .await
            .unwrap();

        let attempts = (0..8).map(|_| {
            let store = store.clone();
            let product = product.clone();
            tokio::spawn(async move {
                store
                    .settle_paid_order(order.id, &product, &serde_json::Value::Null)
                    .await
            })
        });
        let succeeded = futures::future::join_all(attempts)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(Ok(_))))
            .count();

        assert_eq!(succeeded, 1);
        assert_eq!(store.get_account(&alice).await.unwrap().unwrap().credit, 200);
    }

    #[tokio::test]
    async fn cancel_reopens_and_fail_is_terminal() {
        let store = MemoryStore::new();
        let alice = user("user_alice");
        let order = store
            .create_charge_order(NewChargeOrder {
                user_id: alice,
                product_id: ProductId::new(1),
                amount: 990,
            })
            .await
            .unwrap();

        let canceled = store
            .transition_order(order.id, OrderTransition::Cancel, &serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(canceled.phase, OrderPhase::Pending);
        assert!(canceled.result.get("canceledAt").is_some());

        let failed = store
            .transition_order(order.id, OrderTransition::Fail, &serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(failed.phase, OrderPhase::Failed);

        let err = store
            .transition_order(order.id, OrderTransition::Cancel, &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::OrderPhase { .. }));
    }

    #[tokio::test]
    async fn unbilled_jobs_are_reported() {
        let store = MemoryStore::new();
        let alice = user("user_alice");
        funded(&store, &alice, 100).await;
        let billed = job(&store, &alice, "rep_billed").await;
        let orphan = job(&store, &alice, "rep_orphan").await;
        store
            .debit_for_generation(&debit(&alice, billed.id, 15))
            .await
            .unwrap();

        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        let unbilled = store.list_unbilled_jobs(cutoff).await.unwrap();
        assert_eq!(unbilled.len(), 1);
        assert_eq!(unbilled[0].id, orphan.id);
    }
}
