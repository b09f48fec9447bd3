//! ChatFlow Engine Library
//!
//! This library provides the core functionality of the ChatFlow backend.
//! It is used by both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// Telemetry and Observability
pub mod telemetry;

/// In-memory conversation history
pub mod store;

/// External inference process bridge
pub mod bridge;

/// Chat and generate request coordination
pub mod orchestrator;

/// HTTP API
pub mod api;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
