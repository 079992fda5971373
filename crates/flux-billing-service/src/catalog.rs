//! Charge product catalog.
//!
//! The catalog is a JSON array of products seeded into the store at startup:
//!
//! ```json
//! [{"id": 1, "credit": 200, "title": "Starter", "amount": 990, "currency": "usd"}]
//! ```

use std::path::Path;

use flux_billing_core::ChargeProduct;
use flux_billing_store::Store;

/// Error loading or seeding the catalog.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// The file could not be read.
    #[error("failed to read catalog: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not a valid catalog.
    #[error("invalid catalog: {0}")]
    Parse(#[from] serde_json::Error),

    /// A product is unusable.
    #[error("invalid product {id}: {reason}")]
    InvalidProduct {
        /// Product id.
        id: i64,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// Writing to the store failed.
    #[error("failed to seed catalog: {0}")]
    Store(#[from] flux_billing_store::StoreError),
}

/// Parse and validate a catalog document.
pub fn parse_catalog(json: &str) -> Result<Vec<ChargeProduct>, CatalogError> {
    let products: Vec<ChargeProduct> = serde_json::from_str(json)?;
    for product in &products {
        let id = product.id.get();
        if id <= 0 {
            return Err(CatalogError::InvalidProduct {
                id,
                reason: "id must be positive",
            });
        }
        if product.credit <= 0 {
            return Err(CatalogError::InvalidProduct {
                id,
                reason: "credit must be positive",
            });
        }
        if product.amount < 0 {
            return Err(CatalogError::InvalidProduct {
                id,
                reason: "amount must not be negative",
            });
        }
    }
    Ok(products)
}

/// Load a catalog file.
pub fn load_catalog(path: impl AsRef<Path>) -> Result<Vec<ChargeProduct>, CatalogError> {
    let contents = std::fs::read_to_string(path)?;
    parse_catalog(&contents)
}

/// Upsert every product into the store.
pub async fn seed_catalog(
    store: &dyn Store,
    products: &[ChargeProduct],
) -> Result<(), CatalogError> {
    for product in products {
        store.upsert_charge_product(product).await?;
        tracing::debug!(product_id = %product.id, credit = product.credit, title = %product.title, "Seeded charge product");
    }
    tracing::info!(count = products.len(), "Charge product catalog seeded");
    Ok(())
}
