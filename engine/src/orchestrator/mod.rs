//! Request Orchestrator
//!
//! Coordinates one chat or generate call across the conversation store and
//! the inference backend. A chat request moves through
//! `Validating -> Dispatching -> Persisting -> Responding`; a failure at any
//! stage is reported as a [`ChatFailure`] that remembers where it happened and
//! what kind of failure it was.
//!
//! The orchestrator never retries. Inference failures are left to the caller,
//! which turns them into one generic message for users and keeps the detail
//! for operators.

use chrono::{DateTime, Utc};
use sdk::errors::{EngineError, ErrorKind};
use sdk::types::{ConversationSummary, Exchange, GenerationParams, InferenceRequest};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bridge::{InferenceBackend, ProcessBridge};
use crate::config::{validate_max_length, validate_temperature, Config};
use crate::store::{ConversationStore, InMemoryConversationStore};

/// Message shown to users when generation fails for any reason
pub const GENERIC_FAILURE_MESSAGE: &str = "Failed to generate response";

/// Reply text offered in place of a generated one
pub const FALLBACK_RESPONSE: &str =
    "Sorry, I'm having trouble responding right now. Please try again in a moment.";

/// Stage of a chat request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatStage {
    Validating,
    Dispatching,
    Persisting,
    Responding,
}

impl ChatStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::Dispatching => "dispatching",
            Self::Persisting => "persisting",
            Self::Responding => "responding",
        }
    }
}

impl fmt::Display for ChatStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request that ended in `Failed(kind)`
#[derive(Debug, Error)]
#[error("request failed while {stage}: {error}")]
pub struct ChatFailure {
    pub stage: ChatStage,
    #[source]
    pub error: EngineError,
}

impl ChatFailure {
    fn new(stage: ChatStage, error: EngineError) -> Self {
        Self { stage, error }
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    /// Text safe to show the user
    pub fn user_message(&self) -> String {
        match &self.error {
            EngineError::InvalidInput(message) => message.clone(),
            EngineError::NotFound(_) => "Conversation not found".to_string(),
            _ => GENERIC_FAILURE_MESSAGE.to_string(),
        }
    }

    /// Full detail for logs and operators
    pub fn detail(&self) -> String {
        self.error.detail()
    }
}

/// Successful chat turn
#[derive(Debug, Clone)]
pub struct ChatReply {
    pub response: String,
    pub conversation_id: String,
    pub mode: String,
    pub generation_time_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Successful free-form generation
#[derive(Debug, Clone)]
pub struct GenerateReply {
    pub generated_text: String,
    pub mode: String,
    pub generation_time_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Input for a free-form generation
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub prompt: String,
    pub max_length: Option<u32>,
    pub temperature: Option<f32>,
}

/// Coordinator between the HTTP layer, the store, and the inference backend
#[derive(Clone)]
pub struct ChatOrchestrator {
    store: Arc<dyn ConversationStore>,
    backend: Arc<dyn InferenceBackend>,
    chat_params: GenerationParams,
    generate_params: GenerationParams,
}

impl ChatOrchestrator {
    pub fn new(store: Arc<dyn ConversationStore>, backend: Arc<dyn InferenceBackend>) -> Self {
        Self {
            store,
            backend,
            chat_params: GenerationParams::default(),
            generate_params: GenerationParams::default(),
        }
    }

    /// Wire an in-memory store and a process bridge from configuration
    pub fn from_config(config: &Config) -> Self {
        let store = InMemoryConversationStore::with_limits(
            config.conversations.max_exchanges,
            config.conversations.preview_chars,
        );
        let bridge = ProcessBridge::from_config(&config.inference);

        Self::new(Arc::new(store), Arc::new(bridge)).with_params(
            config.inference.chat_params(),
            config.inference.generate_params(),
        )
    }

    pub fn with_params(mut self, chat: GenerationParams, generate: GenerationParams) -> Self {
        self.chat_params = chat;
        self.generate_params = generate;
        self
    }

    pub fn is_ready(&self) -> bool {
        self.backend.is_ready()
    }

    /// Run one chat turn and record it in the conversation
    pub async fn chat(
        &self,
        message: &str,
        conversation_id: Option<&str>,
    ) -> Result<ChatReply, ChatFailure> {
        let mut stage = ChatStage::Validating;
        debug!(%stage, "Chat request");

        let message = message.trim();
        if message.is_empty() {
            return Err(ChatFailure::new(
                stage,
                EngineError::InvalidInput("Message is required".to_string()),
            ));
        }

        stage = ChatStage::Dispatching;
        let requested = conversation_id.map(str::trim);
        let conversation_id = self.store.create_or_get(conversation_id);
        let created = requested != Some(conversation_id.as_str());
        debug!(%stage, %conversation_id, created, "Chat request");

        let started = Instant::now();
        let request =
            InferenceRequest::new(message, Some(conversation_id.clone()), self.chat_params);
        let output = self.backend.generate(request).await.map_err(|error| {
            warn!(
                %stage,
                %conversation_id,
                kind = %error.kind(),
                detail = %error.detail(),
                "Chat generation failed"
            );
            // The id never reached the caller, so nothing could reach it later
            if created {
                self.store.discard_if_empty(&conversation_id);
            }
            ChatFailure::new(stage, error)
        })?;
        let generation_time_ms = started.elapsed().as_millis() as u64;

        stage = ChatStage::Persisting;
        debug!(%stage, %conversation_id, "Chat request");
        let timestamp = Utc::now();
        self.store.append(
            &conversation_id,
            Exchange::at(message, output.response_text.clone(), output.mode.clone(), timestamp),
        );

        stage = ChatStage::Responding;
        info!(%stage, %conversation_id, generation_time_ms, mode = %output.mode, "Chat request");

        Ok(ChatReply {
            response: output.response_text,
            conversation_id,
            mode: output.mode,
            generation_time_ms,
            timestamp,
        })
    }

    /// Free-form generation; never touches the conversation store
    pub async fn generate(&self, options: GenerateOptions) -> Result<GenerateReply, ChatFailure> {
        let prompt = options.prompt.trim();
        if prompt.is_empty() {
            return Err(ChatFailure::new(
                ChatStage::Validating,
                EngineError::InvalidInput("Prompt is required".to_string()),
            ));
        }

        let invalid =
            |e: String| ChatFailure::new(ChatStage::Validating, EngineError::InvalidInput(e));

        let mut params = self.generate_params;
        if let Some(max_length) = options.max_length {
            validate_max_length(max_length).map_err(invalid)?;
            params.max_length = max_length;
        }
        if let Some(temperature) = options.temperature {
            validate_temperature(temperature).map_err(invalid)?;
            params.temperature = temperature;
        }

        let started = Instant::now();
        let output = self
            .backend
            .generate(InferenceRequest::new(prompt, None, params))
            .await
            .map_err(|error| {
                warn!(kind = %error.kind(), detail = %error.detail(), "Generation failed");
                ChatFailure::new(ChatStage::Dispatching, error)
            })?;
        let generation_time_ms = started.elapsed().as_millis() as u64;

        info!(generation_time_ms, max_length = params.max_length, "Generation finished");

        Ok(GenerateReply {
            generated_text: output.response_text,
            mode: output.mode,
            generation_time_ms,
            timestamp: Utc::now(),
        })
    }

    pub fn conversation(&self, id: &str) -> Result<Vec<Exchange>, EngineError> {
        self.store.get(id)
    }

    pub fn conversations(&self) -> Vec<ConversationSummary> {
        self.store.list()
    }

    pub fn delete_conversation(&self, id: &str) -> Result<(), EngineError> {
        self.store.delete(id)
    }
}
