//! Core types and utilities for flux-billing.
//!
//! This crate provides the foundational types used throughout the credit ledger:
//!
//! - **Identifiers**: `UserId`, `AccountId`, `OrderId`, `ProductId`, `JobId`, ...
//! - **Opaque ids**: `OpaqueCodec`, `IdCodecs`
//! - **Accounts**: `Account`
//! - **Ledger**: `LedgerEntry`, `Billing`, `GenerationDebit`
//! - **Orders**: `ChargeOrder`, `OrderPhase`, `OrderTransition`, `ChargeProduct`
//! - **Generation**: `GenerationRequest`, `GenerationJob`, `FluxModel`, `AspectRatio`
//! - **Pricing**: `CostTable`
//!
//! # Credits
//!
//! Credits are whole units stored as `i64`. A generation costs a fixed number
//! of credits per model; charge products grant a fixed number of credits.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod codec;
pub mod error;
pub mod generation;
pub mod ids;
pub mod ledger;
pub mod order;
pub mod pricing;

pub use account::Account;
pub use codec::{IdCodecs, OpaqueCodec};
pub use error::{BillingError, Result};
pub use generation::{AspectRatio, FluxModel, GenerationJob, GenerationRequest, NewGenerationJob};
pub use ids::{AccountId, BillingId, IdError, JobId, LedgerEntryId, OrderId, ProductId, UserId};
pub use ledger::{
    ledger_total, Billing, BillingState, BillingType, DebitReceipt, GenerationDebit, LedgerEntry,
    LedgerEntryType,
};
pub use order::{ChargeOrder, ChargeProduct, NewChargeOrder, OrderPhase, OrderTransition};
pub use pricing::{CostTable, PRO_GENERATION_CREDITS, SCHNELL_GENERATION_CREDITS};
