//! Credit balance and ledger handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use flux_billing_core::LedgerEntry;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Ledger query parameters.
#[derive(Debug, Deserialize)]
pub struct CreditsQuery {
    /// Maximum number of entries to return (default: 20, max: 100).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    20
}

/// Ledger entry response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntryResponse {
    /// Entry id.
    pub id: i64,
    /// Signed credit delta.
    pub credit: i64,
    /// Balance after the entry.
    pub balance: i64,
    /// `Generate` or `Charge`.
    #[serde(rename = "type")]
    pub entry_type: String,
    /// Timestamp.
    pub created_at: String,
}

impl From<&LedgerEntry> for LedgerEntryResponse {
    fn from(entry: &LedgerEntry) -> Self {
        Self {
            id: entry.id.get(),
            credit: entry.credit,
            balance: entry.balance,
            entry_type: entry.entry_type.to_string(),
            created_at: entry.created_at.to_rfc3339(),
        }
    }
}

/// Balance and recent ledger entries.
#[derive(Debug, Serialize)]
pub struct CreditsResponse {
    /// Current spendable credits.
    pub balance: i64,
    /// Ledger entries, newest first.
    pub entries: Vec<LedgerEntryResponse>,
    /// Whether there are more entries.
    #[serde(rename = "hasMore")]
    pub has_more: bool,
}

/// Get the caller's balance and ledger.
pub async fn get_credits(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<CreditsQuery>,
) -> Result<Json<CreditsResponse>, ApiError> {
    let account = state.store.get_or_create_account(&auth.user_id).await?;

    // Fetch one more than requested to determine has_more
    let limit = query.limit.min(100);
    let entries = state
        .store
        .list_ledger_entries(&auth.user_id, limit + 1, query.offset)
        .await?;

    let has_more = entries.len() > limit;
    let entries = entries
        .iter()
        .take(limit)
        .map(LedgerEntryResponse::from)
        .collect();

    Ok(Json(CreditsResponse {
        balance: account.credit,
        entries,
        has_more,
    }))
}
