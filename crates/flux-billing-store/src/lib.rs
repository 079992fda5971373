//! Storage layer for flux-billing.
//!
//! This crate provides persistence for credit accounts, the ledger, billing
//! rows, generation job records, the charge product catalog, and charge orders.
//!
//! # Transactions
//!
//! Every operation that changes a balance is a single compound call on the
//! [`Store`] trait. Implementations run it as one transaction that holds the
//! account's row lock (and the order's, for order transitions), so the funds
//! check, the balance change, and the ledger entry commit together or not at
//! all.
//!
//! # Backends
//!
//! - [`PgStore`]: PostgreSQL via `sqlx`, `SELECT ... FOR UPDATE` row locks.
//! - [`MemoryStore`]: in-process tables with per-row async locks.
//!
//! # Example
//!
//! ```no_run
//! # async fn demo() -> flux_billing_store::Result<()> {
//! use flux_billing_store::{MemoryStore, Store};
//!
//! let store = MemoryStore::new();
//! let user_id = "user_123".parse().unwrap();
//! let account = store.get_or_create_account(&user_id).await?;
//! assert_eq!(account.credit, 0);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;
pub mod postgres;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use flux_billing_core::{
    Account, AccountId, Billing, ChargeOrder, ChargeProduct, DebitReceipt, GenerationDebit,
    GenerationJob, LedgerEntry, LedgerEntryType, NewChargeOrder, NewGenerationJob, OrderId,
    OrderTransition, ProductId, UserId,
};

/// Records written by settling a paid order.
#[derive(Debug, Clone)]
pub struct SettleReceipt {
    /// The order, now `Paid`.
    pub order: ChargeOrder,
    /// The credited account.
    pub account: Account,
    /// The `Charge` ledger entry.
    pub entry: LedgerEntry,
}

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (`PostgreSQL`, in-memory for testing and development).
#[async_trait]
pub trait Store: Send + Sync {
    // =========================================================================
    // Account Operations
    // =========================================================================

    /// Get a user's account, provisioning a zero-balance one if none exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_or_create_account(&self, user_id: &UserId) -> Result<Account>;

    /// Get an account by user ID without provisioning.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_account(&self, user_id: &UserId) -> Result<Option<Account>>;

    /// Atomically adjust an account's credit and append the matching ledger entry.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the account doesn't exist.
    /// - `StoreError::ConstraintViolation` if the balance would go negative.
    async fn adjust(
        &self,
        account_id: AccountId,
        delta: i64,
        entry_type: LedgerEntryType,
    ) -> Result<(Account, LedgerEntry)>;

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    /// List ledger entries for a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_ledger_entries(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>>;

    /// Sum of all ledger deltas for a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn ledger_sum(&self, user_id: &UserId) -> Result<i64>;

    /// List billing rows for a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_billings(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Billing>>;

    // =========================================================================
    // Generation Job Operations
    // =========================================================================

    /// Insert a generation job record.
    ///
    /// In production the provider writes this row; the insert exists for
    /// providers that report back through us and for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn insert_generation_job(&self, job: NewGenerationJob) -> Result<GenerationJob>;

    /// Find a generation job record by the provider's reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn find_generation_job(&self, provider_ref: &str) -> Result<Option<GenerationJob>>;

    /// Jobs created before `created_before` that have no withdraw billing row.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_unbilled_jobs(&self, created_before: DateTime<Utc>)
        -> Result<Vec<GenerationJob>>;

    // =========================================================================
    // Catalog and Order Operations
    // =========================================================================

    /// Insert or replace a catalog product.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn upsert_charge_product(&self, product: &ChargeProduct) -> Result<()>;

    /// Get a catalog product.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_charge_product(&self, product_id: ProductId) -> Result<Option<ChargeProduct>>;

    /// Create a `Pending` charge order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn create_charge_order(&self, order: NewChargeOrder) -> Result<ChargeOrder>;

    /// Get a charge order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_charge_order(&self, order_id: OrderId) -> Result<Option<ChargeOrder>>;

    // =========================================================================
    // Compound Operations
    // =========================================================================

    /// Withdraw credits for an admitted generation: lock the account, check
    /// funds, decrement, write the billing row and the ledger entry.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the account doesn't exist.
    /// - `StoreError::InsufficientCredits` if balance is too low at lock time.
    async fn debit_for_generation(&self, debit: &GenerationDebit) -> Result<DebitReceipt>;

    /// Apply a non-crediting transition (`Fail` or `Cancel`) under the order lock.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the order doesn't exist.
    /// - `StoreError::OrderPhase` if the order is not `Pending`.
    /// - `StoreError::Database` if called with `OrderTransition::Pay`; paid
    ///   orders go through [`Store::settle_paid_order`].
    async fn transition_order(
        &self,
        order_id: OrderId,
        transition: OrderTransition,
        snapshot: &serde_json::Value,
    ) -> Result<ChargeOrder>;

    /// Mark an order `Paid` and credit its owner with `product.credit`, in one
    /// transaction.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the order doesn't exist.
    /// - `StoreError::OrderPhase` if the order is not `Pending`.
    async fn settle_paid_order(
        &self,
        order_id: OrderId,
        product: &ChargeProduct,
        snapshot: &serde_json::Value,
    ) -> Result<SettleReceipt>;
}
