//! Wire shapes exchanged with the FlagKit backend.
//!
//! All endpoints return fixed JSON shapes; these types mirror them exactly.
//! Envelope structs are crate-private because callers only ever see the
//! unwrapped payloads.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Why the server chose a particular flag value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationReason {
    /// The flag is switched off.
    Disabled,
    /// A targeting rule matched the supplied context.
    RuleMatch,
    /// A specific variation was served.
    Variation,
    /// The context fell inside a percentage rollout.
    Rollout,
    /// The fallback value was served (also used client-side on failure).
    Default,
}

/// Result of a single-flag contextual evaluation.
///
/// Details are never cached; every lookup is a fresh server round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagDetail {
    /// Flag key that was evaluated.
    pub key: String,
    /// Value the server chose.
    pub value: Value,
    /// Why that value was chosen.
    pub reason: EvaluationReason,
    /// Variation identifier when one applies.
    #[serde(default)]
    pub variation_key: Option<String>,
}

impl FlagDetail {
    /// Builds the degraded detail returned when the evaluation call fails.
    pub(crate) fn fallback(key: &str, value: Value) -> Self {
        Self {
            key: key.to_string(),
            value,
            reason: EvaluationReason::Default,
            variation_key: None,
        }
    }
}

/// Classification of an AI config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiConfigKind {
    /// Agent definition.
    Agent,
    /// Skill definition.
    Skill,
    /// Rule file; also the generic classification for synthesized fallbacks.
    Rule,
}

/// A named markdown/text file managed by the AI config service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiConfigFile {
    /// File name, unique within the project.
    pub file_name: String,
    /// Classification of the file.
    pub file_type: AiConfigKind,
    /// Raw file content.
    pub content: String,
    /// Optional folder the file lives in.
    #[serde(default)]
    pub folder: Option<String>,
}

/// Client-side filters applied when listing AI configs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AiConfigFilter {
    /// Keep only files of this type.
    pub file_type: Option<AiConfigKind>,
    /// Keep only files in exactly this folder.
    pub folder: Option<String>,
}

impl AiConfigFilter {
    /// Returns `true` when the file passes every configured filter.
    pub(crate) fn matches(&self, file: &AiConfigFile) -> bool {
        if let Some(kind) = self.file_type {
            if file.file_type != kind {
                return false;
            }
        }
        if let Some(folder) = &self.folder {
            if file.folder.as_deref() != Some(folder.as_str()) {
                return false;
            }
        }
        true
    }
}

/// `/flags` response: `{ "flags": { key: value } }`.
#[derive(Debug, Deserialize)]
pub(crate) struct FlagsEnvelope {
    pub flags: Map<String, Value>,
}

/// `/configs` response: `{ "configs": [ { key, value } ] }`.
#[derive(Debug, Deserialize)]
pub(crate) struct ConfigsEnvelope {
    pub configs: Vec<ConfigEntry>,
}

/// Single entry in the `/configs` listing.
#[derive(Debug, Deserialize)]
pub(crate) struct ConfigEntry {
    pub key: String,
    pub value: Value,
}

/// `/configs/{key}` response: `{ key, value, config_type }`.
#[derive(Debug, Deserialize)]
pub(crate) struct ConfigDetail {
    #[allow(dead_code)]
    pub key: String,
    pub value: Value,
    #[allow(dead_code)]
    pub config_type: Option<String>,
}

/// `/ai-configs` response: `{ "ai_configs": [ AiConfigFile ] }`.
#[derive(Debug, Deserialize)]
pub(crate) struct AiConfigsEnvelope {
    pub ai_configs: Vec<AiConfigFile>,
}

/// `/ai-configs/{file_name}` response: `{ "ai_config": AiConfigFile }`.
#[derive(Debug, Deserialize)]
pub(crate) struct AiConfigEnvelope {
    pub ai_config: AiConfigFile,
}
