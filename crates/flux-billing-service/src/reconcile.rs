//! Ledger reconciliation.
//!
//! A generation job can exist upstream without a matching withdraw when the
//! debit fails after the provider accepted the job. The sweep reports such
//! jobs; it never bills them.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use flux_billing_core::{GenerationJob, UserId};
use flux_billing_store::{Result, Store};

use crate::state::AppState;

/// Balance versus ledger for one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditReport {
    /// Stored balance.
    pub balance: i64,
    /// Sum of ledger deltas.
    pub ledger_sum: i64,
}

impl AuditReport {
    /// Whether the ledger reconstructs the balance.
    #[must_use]
    pub fn consistent(&self) -> bool {
        self.balance == self.ledger_sum
    }
}

/// Report jobs older than `grace` that have no withdraw billing row.
pub async fn sweep_unbilled_jobs(
    store: &dyn Store,
    grace: Duration,
) -> Result<Vec<GenerationJob>> {
    let grace = chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::zero());
    let jobs = store.list_unbilled_jobs(Utc::now() - grace).await?;

    for job in &jobs {
        tracing::warn!(
            job_id = %job.id,
            provider_ref = %job.provider_ref,
            user_id = %job.user_id,
            model = %job.model,
            created_at = %job.created_at,
            "Unbilled generation job"
        );
    }

    if jobs.is_empty() {
        tracing::debug!("Reconciliation sweep found no unbilled jobs");
    } else {
        tracing::warn!(count = jobs.len(), "Reconciliation sweep found unbilled jobs");
    }

    Ok(jobs)
}

/// Compare a user's balance with the sum of their ledger entries.
///
/// Users without an account audit as zero against zero.
pub async fn audit_account(store: &dyn Store, user_id: &UserId) -> Result<AuditReport> {
    let balance = store
        .get_account(user_id)
        .await?
        .map_or(0, |account| account.credit);
    let ledger_sum = store.ledger_sum(user_id).await?;

    let report = AuditReport {
        balance,
        ledger_sum,
    };
    if !report.consistent() {
        tracing::error!(
            user_id = %user_id,
            balance,
            ledger_sum,
            "Account balance does not match its ledger"
        );
    }
    Ok(report)
}

/// Run the sweep periodically in the background.
///
/// Returns `None` when the interval is zero.
pub fn spawn_reconciler(state: Arc<AppState>) -> Option<tokio::task::JoinHandle<()>> {
    if state.config.reconcile_interval_seconds == 0 {
        tracing::info!("Reconciliation sweep disabled");
        return None;
    }

    let period = Duration::from_secs(state.config.reconcile_interval_seconds);
    let grace = Duration::from_secs(state.config.reconcile_grace_seconds);

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = sweep_unbilled_jobs(state.store.as_ref(), grace).await {
                tracing::error!(error = %e, "Reconciliation sweep failed");
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    use flux_billing_core::{
        AspectRatio, FluxModel, GenerationDebit, GenerationRequest, LedgerEntryType,
        NewGenerationJob,
    };
    use flux_billing_store::MemoryStore;

    async fn job(store: &MemoryStore, user: &UserId, provider_ref: &str) -> GenerationJob {
        store
            .insert_generation_job(NewGenerationJob {
                provider_ref: provider_ref.into(),
                user_id: user.clone(),
                request: GenerationRequest {
                    model: FluxModel::Pro,
                    input_prompt: "harbor at dusk".into(),
                    aspect_ratio: AspectRatio::Landscape,
                    is_private: 0,
                    locale: "en".into(),
                },
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn sweep_reports_only_unbilled_jobs() {
        let store = MemoryStore::new();
        let user: UserId = "user_sweep".parse().unwrap();
        let account = store.get_or_create_account(&user).await.unwrap();
        store
            .adjust(account.id, 100, LedgerEntryType::Charge)
            .await
            .unwrap();

        let billed = job(&store, &user, "rep_billed").await;
        let orphan = job(&store, &user, "rep_orphan").await;
        store
            .debit_for_generation(&GenerationDebit {
                user_id: user.clone(),
                job_id: billed.id,
                credits: 80,
                description: "Generate black-forest-labs/flux-pro - 16:9 Withdraw".into(),
            })
            .await
            .unwrap();

        let unbilled = sweep_unbilled_jobs(&store, Duration::ZERO).await.unwrap();
        assert_eq!(unbilled.len(), 1);
        assert_eq!(unbilled[0].id, orphan.id);

        let within_grace = sweep_unbilled_jobs(&store, Duration::from_secs(3600))
            .await
            .unwrap();
        assert!(within_grace.is_empty());
    }

    #[tokio::test]
    async fn audit_matches_after_adjustments() {
        let store = MemoryStore::new();
        let user: UserId = "user_audit".parse().unwrap();
        let account = store.get_or_create_account(&user).await.unwrap();
        store
            .adjust(account.id, 200, LedgerEntryType::Charge)
            .await
            .unwrap();
        store
            .adjust(account.id, -15, LedgerEntryType::Generate)
            .await
            .unwrap();

        let report = audit_account(&store, &user).await.unwrap();
        assert_eq!(report.balance, 185);
        assert!(report.consistent());

        let stranger: UserId = "user_none".parse().unwrap();
        assert!(audit_account(&store, &stranger).await.unwrap().consistent());
    }
}
