//! Credit-moving operations.
//!
//! Handlers and webhook events call into these; every balance change goes
//! through a single compound `Store` call.

pub mod credit;
pub mod debit;
pub mod orders;

pub use credit::settle_payment;
pub use debit::{admit_generation, AdmittedGeneration};
pub use orders::{create_order, resolve_order, CreatedOrder};
