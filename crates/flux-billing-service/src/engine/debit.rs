//! Generation admission.
//!
//! The funds check before the provider call is a fast path only; the account
//! row lock inside [`Store::debit_for_generation`] is where overdraft is
//! actually prevented. The provider call happens outside any transaction and
//! is never retried.
//!
//! Once the provider is called, the job must end billed or reported as an
//! inconsistency. That part runs on its own task, so a dropped request
//! (client disconnect, router timeout) cannot abandon it halfway.

use std::sync::Arc;

use flux_billing_core::{BillingError, GenerationDebit, GenerationRequest, JobId, UserId};
use flux_billing_store::{Store, StoreError};

use crate::provider::GenerationProvider;
use crate::state::AppState;

/// Result of an admitted generation.
#[derive(Debug, Clone)]
pub struct AdmittedGeneration {
    /// Local job id.
    pub job_id: JobId,
    /// Opaque job token returned to the caller.
    pub token: String,
    /// Provider reference.
    pub provider_ref: String,
    /// Credits withdrawn.
    pub credits: i64,
    /// Balance after the debit.
    pub balance: i64,
}

/// Admit a generation for `user_id`: check funds, create the provider job,
/// then bill it.
pub async fn admit_generation(
    state: Arc<AppState>,
    user_id: UserId,
    request: GenerationRequest,
) -> Result<AdmittedGeneration, BillingError> {
    let credits = state.config.costs.credits_for(request.model);

    let account = state.store.get_or_create_account(&user_id).await?;
    if !account.has_sufficient_credits(credits) {
        tracing::info!(
            user_id = %user_id,
            balance = account.credit,
            required = credits,
            "Generation rejected: insufficient credit"
        );
        return Err(BillingError::InsufficientCredit {
            balance: account.credit,
            required: credits,
        });
    }

    let provider = state
        .provider
        .clone()
        .ok_or_else(|| BillingError::Upstream("generation provider not configured".into()))?;

    let task_user = user_id.clone();
    let task = tokio::spawn(async move {
        create_and_bill(&state, provider.as_ref(), &task_user, &request, credits).await
    });

    task.await.map_err(|e| {
        tracing::error!(
            user_id = %user_id,
            error = %e,
            "Generation task aborted; provider job may be unbilled"
        );
        BillingError::UpstreamInconsistency(format!("generation task aborted: {e}"))
    })?
}

async fn create_and_bill(
    state: &AppState,
    provider: &dyn GenerationProvider,
    user_id: &UserId,
    request: &GenerationRequest,
    credits: i64,
) -> Result<AdmittedGeneration, BillingError> {
    let provider_ref = provider.create_job(user_id, request).await.map_err(|e| {
        tracing::warn!(user_id = %user_id, model = %request.model, error = %e, "Provider job creation failed");
        BillingError::from(e)
    })?;

    let job = state
        .store
        .find_generation_job(&provider_ref)
        .await
        .map_err(|e| {
            tracing::error!(
                user_id = %user_id,
                provider_ref = %provider_ref,
                error = %e,
                "Job record lookup failed after provider accepted the job"
            );
            BillingError::UpstreamInconsistency(format!("job lookup failed for {provider_ref}"))
        })?
        .ok_or_else(|| {
            tracing::error!(
                user_id = %user_id,
                provider_ref = %provider_ref,
                "Provider reported success but no job record exists"
            );
            BillingError::UpstreamInconsistency(format!("no job record for {provider_ref}"))
        })?;

    let debit = GenerationDebit {
        user_id: user_id.clone(),
        job_id: job.id,
        credits,
        description: format!(
            "Generate {} - {} Withdraw",
            request.model, request.aspect_ratio
        ),
    };

    let receipt = state.store.debit_for_generation(&debit).await.map_err(|e| {
        unbilled_job(user_id, &provider_ref, job.id, &e);
        BillingError::UpstreamInconsistency(format!(
            "job {} created upstream but not billed",
            job.id
        ))
    })?;

    tracing::info!(
        user_id = %user_id,
        job_id = %job.id,
        provider_ref = %provider_ref,
        credits,
        balance = receipt.balance,
        "Generation admitted"
    );

    Ok(AdmittedGeneration {
        job_id: job.id,
        token: state.codecs.encode_job(job.id),
        provider_ref,
        credits,
        balance: receipt.balance,
    })
}

/// A provider job exists that the ledger does not reflect.
fn unbilled_job(user_id: &UserId, provider_ref: &str, job_id: JobId, err: &StoreError) {
    tracing::error!(
        user_id = %user_id,
        provider_ref = %provider_ref,
        job_id = %job_id,
        error = %err,
        "Debit failed after provider job creation; job is unbilled and needs reconciliation"
    );
}
