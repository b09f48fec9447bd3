//! Error types and handling
//!
//! This module provides the error taxonomy used throughout ChatFlow.
//! All errors implement the `ChatflowErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.
//!
//! # Security
//!
//! User hints never carry the captured output of the inference process.
//! Raw stderr and stdout stay in the error value itself, where operators can
//! reach them through logs and the `details` field of failed responses.

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Trait for ChatFlow error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information. All engine errors implement this trait.
pub trait ChatflowErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is safe to display to end users and does not contain
    /// captured process output or internal paths.
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors go away when the caller sends a new request.
    /// Nothing in ChatFlow retries automatically.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Caller errors**: `InvalidInput`, `NotFound`
/// - **Inference errors**: `Timeout`, `ParseFailure`, `InferenceFailure`, `ProcessFailure`
/// - **Setup errors**: `Config`, `Io`
///
/// # Examples
///
/// ```
/// use sdk::errors::{ChatflowErrorExt, EngineError, ErrorKind};
///
/// let error = EngineError::NotFound("abc".to_string());
/// assert_eq!(error.kind(), ErrorKind::NotFound);
/// assert!(error.is_recoverable());
///
/// let failure = EngineError::ProcessFailure {
///     exit_code: Some(1),
///     stderr: "boom".to_string(),
/// };
/// assert!(failure.kind().is_inference());
/// assert!(!failure.user_hint().contains("boom"));
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Caller errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Conversation not found: {0}")]
    NotFound(String),

    // Inference process errors
    #[error("Inference process timed out after {0:?}")]
    Timeout(Duration),

    #[error("Could not parse inference output: {reason}")]
    ParseFailure { reason: String, raw_output: String },

    #[error("Inference failed: {0}")]
    InferenceFailure(String),

    #[error("Inference process failed (exit code {}): {stderr}", display_code(.exit_code))]
    ProcessFailure {
        exit_code: Option<i32>,
        stderr: String,
    },

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "none".to_string(),
    }
}

/// Failure category of an [`EngineError`], stable across message changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Timeout,
    ParseFailure,
    InferenceFailure,
    ProcessFailure,
    Config,
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::NotFound => "not_found",
            Self::Timeout => "timeout",
            Self::ParseFailure => "parse_failure",
            Self::InferenceFailure => "inference_failure",
            Self::ProcessFailure => "process_failure",
            Self::Config => "config",
            Self::Io => "io",
        }
    }

    /// True for the four outcomes the inference bridge can fail with.
    pub fn is_inference(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::ParseFailure | Self::InferenceFailure | Self::ProcessFailure
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::ParseFailure { .. } => ErrorKind::ParseFailure,
            Self::InferenceFailure(_) => ErrorKind::InferenceFailure,
            Self::ProcessFailure { .. } => ErrorKind::ProcessFailure,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Operator-facing detail, including captured process output where present.
    pub fn detail(&self) -> String {
        match self {
            Self::ParseFailure { reason, raw_output } => {
                format!("{}; raw output: {:?}", reason, raw_output)
            }
            other => other.to_string(),
        }
    }
}

impl ChatflowErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",
            Self::InvalidInput(_) => "The request was missing a required value",
            Self::NotFound(_) => "The conversation does not exist or was deleted",
            Self::Timeout(_) => "The assistant took too long to respond. Try again",
            Self::ParseFailure { .. } => "The assistant returned an unreadable reply",
            Self::InferenceFailure(_) => "The assistant could not produce a reply",
            Self::ProcessFailure { .. } => "The assistant process failed to run",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Config(_))
    }
}
