//! Generation admission handler.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use flux_billing_core::{AspectRatio, FluxModel, GenerationRequest};

use super::parse_json;
use crate::auth::{AuthUser, ClientAddr};
use crate::engine;
use crate::error::ApiError;
use crate::ratelimit::generation_key;
use crate::state::AppState;

/// Generation request body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateBody {
    /// `pro`, `schnell`, or the full provider model name.
    pub model: FluxModel,
    /// Prompt text.
    pub input_prompt: String,
    /// One of `1:1`, `16:9`, `9:16`, `3:2`, `2:3`.
    pub aspect_ratio: AspectRatio,
    /// Privacy flag (default 0).
    #[serde(default)]
    pub is_private: i32,
    /// Requester locale (default `en`).
    #[serde(default = "default_locale")]
    pub locale: String,
}

fn default_locale() -> String {
    "en".to_string()
}

impl From<GenerateBody> for GenerationRequest {
    fn from(body: GenerateBody) -> Self {
        Self {
            model: body.model,
            input_prompt: body.input_prompt,
            aspect_ratio: body.aspect_ratio,
            is_private: body.is_private,
            locale: body.locale,
        }
    }
}

/// Generation response.
#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    /// Opaque job token.
    pub id: String,
}

/// Admit a generation request and bill it.
pub async fn generate(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ClientAddr(client_addr): ClientAddr,
    body: Bytes,
) -> Result<Json<GenerateResponse>, ApiError> {
    let key = generation_key(auth.user_id.as_str(), &client_addr);
    if !state.rate_limiter.admit(&key).await {
        tracing::info!(
            user_id = %auth.user_id,
            client_addr = %client_addr,
            "Generation rate limited"
        );
        return Err(ApiError::TooManyRequests);
    }

    let body: GenerateBody = parse_json(&body)?;

    let admitted = engine::admit_generation(state, auth.user_id, body.into()).await?;

    Ok(Json(GenerateResponse { id: admitted.token }))
}
