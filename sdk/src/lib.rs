//! ChatFlow SDK
//!
//! Shared data model and error taxonomy for ChatFlow components.
//! This crate is used by the engine and by anything that talks to it.

/// Error types and handling
pub mod errors;

/// Conversation and inference types
pub mod types;

// Re-export commonly used types
pub use errors::{ChatflowErrorExt, EngineError, ErrorKind};
pub use types::{
    ConversationSummary, Exchange, GenerationParams, InferenceOutput, InferenceRequest,
    InferenceResult, DEFAULT_MODE,
};
