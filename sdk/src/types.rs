//! Conversation and inference data model
//!
//! `Exchange` and `ConversationSummary` are what the conversation store holds
//! and hands out. `InferenceRequest` and `InferenceResult` are the two halves of
//! the stdin/stdout contract with the external inference process.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::EngineError;

/// Mode tag used when the inference process does not report one.
pub const DEFAULT_MODE: &str = "default";

/// One user message paired with its generated reply.
///
/// Exchanges are immutable once built; the store only ever clones them out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    #[serde(rename = "user")]
    pub user_text: String,
    #[serde(rename = "ai")]
    pub ai_text: String,
    pub timestamp: DateTime<Utc>,
    pub mode: String,
}

impl Exchange {
    /// Create an exchange stamped with the current time
    pub fn new(
        user_text: impl Into<String>,
        ai_text: impl Into<String>,
        mode: impl Into<String>,
    ) -> Self {
        Self::at(user_text, ai_text, mode, Utc::now())
    }

    /// Create an exchange with an explicit timestamp
    pub fn at(
        user_text: impl Into<String>,
        ai_text: impl Into<String>,
        mode: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            user_text: user_text.into(),
            ai_text: ai_text.into(),
            timestamp,
            mode: mode.into(),
        }
    }
}

/// Listing projection of a conversation. Computed on demand, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub preview: String,
    pub timestamp: DateTime<Utc>,
    pub message_count: usize,
}

/// Truncate `text` to `max_chars` characters, appending "..." when cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Sampling parameters passed through to the inference process.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub max_length: u32,
    pub temperature: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_length: 150,
            temperature: 0.8,
        }
    }
}

/// Payload written to the inference process's stdin. Built fresh per call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub message: String,
    pub conversation_id: Option<String>,
    pub max_length: u32,
    pub temperature: f32,
}

impl InferenceRequest {
    pub fn new(
        message: impl Into<String>,
        conversation_id: Option<String>,
        params: GenerationParams,
    ) -> Self {
        Self {
            message: message.into(),
            conversation_id,
            max_length: params.max_length,
            temperature: params.temperature,
        }
    }
}

/// Result object printed by the inference process on stdout.
///
/// A payload without a `success` field counts as a failure report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    #[serde(default)]
    pub success: bool,
    #[serde(rename = "response", alias = "response_text", default)]
    pub response_text: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// A successful generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferenceOutput {
    pub response_text: String,
    pub mode: String,
}

impl InferenceResult {
    /// Turn the wire payload into a generation or a typed failure.
    ///
    /// `raw_output` is attached to parse failures for diagnosis.
    pub fn into_output(self, raw_output: &str) -> Result<InferenceOutput, EngineError> {
        if !self.success {
            return Err(EngineError::InferenceFailure(
                self.error
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or_else(|| "unknown inference error".to_string()),
            ));
        }

        match self.response_text {
            Some(text) if !text.trim().is_empty() => Ok(InferenceOutput {
                response_text: text,
                mode: self
                    .mode
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| DEFAULT_MODE.to_string()),
            }),
            _ => Err(EngineError::ParseFailure {
                reason: "successful result carried no response text".to_string(),
                raw_output: raw_output.to_string(),
            }),
        }
    }
}
