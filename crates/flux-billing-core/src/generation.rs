//! Generation request types.
//!
//! A generation is admitted by the debit engine and executed by an external
//! provider. The provider writes a [`GenerationJob`] record that the ledger
//! links its billing row to.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobId, UserId};

/// Model variants that can be requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FluxModel {
    /// `black-forest-labs/flux-pro`.
    Pro,
    /// `black-forest-labs/flux-schnell`.
    Schnell,
}

impl FluxModel {
    /// The provider-side model name.
    #[must_use]
    pub const fn provider_name(self) -> &'static str {
        match self {
            Self::Pro => "black-forest-labs/flux-pro",
            Self::Schnell => "black-forest-labs/flux-schnell",
        }
    }

    /// The short name used in the cost table.
    #[must_use]
    pub const fn short_name(self) -> &'static str {
        match self {
            Self::Pro => "pro",
            Self::Schnell => "schnell",
        }
    }
}

impl FromStr for FluxModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pro" | "black-forest-labs/flux-pro" => Ok(Self::Pro),
            "schnell" | "black-forest-labs/flux-schnell" => Ok(Self::Schnell),
            other => Err(format!("unsupported model: {other}")),
        }
    }
}

impl TryFrom<String> for FluxModel {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FluxModel> for String {
    fn from(model: FluxModel) -> Self {
        model.provider_name().to_string()
    }
}

impl fmt::Display for FluxModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.provider_name())
    }
}

/// Supported output aspect ratios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AspectRatio {
    /// 1:1
    Square,
    /// 16:9
    Landscape,
    /// 9:16
    Portrait,
    /// 3:2
    Classic,
    /// 2:3
    ClassicPortrait,
}

impl AspectRatio {
    /// The wire representation (`"16:9"` etc).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Square => "1:1",
            Self::Landscape => "16:9",
            Self::Portrait => "9:16",
            Self::Classic => "3:2",
            Self::ClassicPortrait => "2:3",
        }
    }
}

impl FromStr for AspectRatio {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1:1" => Ok(Self::Square),
            "16:9" => Ok(Self::Landscape),
            "9:16" => Ok(Self::Portrait),
            "3:2" => Ok(Self::Classic),
            "2:3" => Ok(Self::ClassicPortrait),
            other => Err(format!("unsupported aspect ratio: {other}")),
        }
    }
}

impl TryFrom<String> for AspectRatio {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AspectRatio> for String {
    fn from(ratio: AspectRatio) -> Self {
        ratio.as_str().to_string()
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated generation request, normalized for the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Requested model.
    pub model: FluxModel,
    /// Prompt text.
    pub input_prompt: String,
    /// Output aspect ratio.
    pub aspect_ratio: AspectRatio,
    /// Privacy flag (0 = public).
    pub is_private: i32,
    /// UI locale of the requester.
    pub locale: String,
}

/// The local record of a provider-created generation job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationJob {
    /// Local job id.
    pub id: JobId,
    /// The provider's reference for this job.
    pub provider_ref: String,
    /// Requesting user.
    pub user_id: UserId,
    /// Requested model.
    pub model: FluxModel,
    /// Prompt text.
    pub input_prompt: String,
    /// Output aspect ratio.
    pub aspect_ratio: AspectRatio,
    /// Privacy flag.
    pub is_private: i32,
    /// Requester locale.
    pub locale: String,
    /// When the record was written.
    pub created_at: DateTime<Utc>,
}

/// Fields for inserting a generation job record.
#[derive(Debug, Clone)]
pub struct NewGenerationJob {
    /// The provider's reference for this job.
    pub provider_ref: String,
    /// Requesting user.
    pub user_id: UserId,
    /// The request that produced the job.
    pub request: GenerationRequest,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_accepts_short_and_provider_names() {
        assert_eq!("pro".parse::<FluxModel>().unwrap(), FluxModel::Pro);
        assert_eq!(
            "black-forest-labs/flux-schnell".parse::<FluxModel>().unwrap(),
            FluxModel::Schnell
        );
        assert!("dev".parse::<FluxModel>().is_err());
    }

    #[test]
    fn names_parse_back_to_the_same_model() {
        for model in [FluxModel::Pro, FluxModel::Schnell] {
            assert_eq!(model.short_name().parse::<FluxModel>().unwrap(), model);
            assert_eq!(model.provider_name().parse::<FluxModel>().unwrap(), model);
        }
    }

    #[test]
    fn aspect_ratio_is_a_closed_set() {
        for ratio in ["1:1", "16:9", "9:16", "3:2", "2:3"] {
            assert_eq!(ratio.parse::<AspectRatio>().unwrap().as_str(), ratio);
        }
        assert!("4:3".parse::<AspectRatio>().is_err());
    }

    #[test]
    fn request_deserializes_from_wire_names() {
        let json = serde_json::json!({
            "model": "black-forest-labs/flux-pro",
            "input_prompt": "a lighthouse",
            "aspect_ratio": "16:9",
            "is_private": 0,
            "locale": "en"
        });
        let request: GenerationRequest = serde_json::from_value(json).unwrap();
        assert_eq!(request.model, FluxModel::Pro);
        assert_eq!(request.aspect_ratio, AspectRatio::Landscape);
    }
}
