//! Inference Process Bridge
//!
//! Turns one "generate a response" call into one run of the external inference
//! program. The request is serialized as a single JSON object on the program's
//! stdin; the program answers with a single JSON object on stdout.
//!
//! # Outcomes
//!
//! Exactly one of these per call:
//! - success: an [`InferenceOutput`] with non-empty response text
//! - [`EngineError::Timeout`]: the program outlived the deadline and was killed
//! - [`EngineError::ParseFailure`]: exit code 0 but no usable result object
//! - [`EngineError::InferenceFailure`]: the result object reported failure
//! - [`EngineError::ProcessFailure`]: non-zero exit, or the program never started
//!
//! Nothing is retried. No process outlives the call that spawned it.

pub mod channel;
pub mod framing;

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::{InferenceOutput, InferenceRequest};
use std::path::Path;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::InferenceConfig;
pub use channel::{ChannelError, ProcessChannel, ProcessOutput};
pub use framing::{extract_result, ResultFraming};

/// Something that can turn an [`InferenceRequest`] into a reply
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Produce a reply for one request
    async fn generate(&self, request: InferenceRequest) -> Result<InferenceOutput, EngineError>;

    /// Whether the backend looks able to serve requests right now
    fn is_ready(&self) -> bool;
}

/// [`InferenceBackend`] that spawns the configured program once per request
#[derive(Debug)]
pub struct ProcessBridge {
    channel: ProcessChannel,
    framing: ResultFraming,
    permits: Option<Semaphore>,
}

impl ProcessBridge {
    pub fn new(channel: ProcessChannel) -> Self {
        Self {
            channel,
            framing: ResultFraming::default(),
            permits: None,
        }
    }

    pub fn from_config(config: &InferenceConfig) -> Self {
        Self::new(ProcessChannel::from_config(config))
            .with_framing(ResultFraming::from_marker(config.result_marker.as_deref()))
            .with_max_concurrency(config.max_concurrent_processes)
    }

    pub fn with_framing(mut self, framing: ResultFraming) -> Self {
        self.framing = framing;
        self
    }

    /// Cap simultaneous processes; 0 removes the cap
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.permits = (limit > 0).then(|| Semaphore::new(limit));
        self
    }

    pub fn channel(&self) -> &ProcessChannel {
        &self.channel
    }

    /// Map what the process printed and how it exited onto an outcome
    fn interpret(&self, output: ProcessOutput) -> Result<InferenceOutput, EngineError> {
        if !output.status.success() {
            let mut stderr = output.stderr.trim().to_string();

            // Scripts that report errors as JSON on stdout leave stderr empty
            if stderr.is_empty() {
                if let Some(error) = extract_result(&output.stdout, &self.framing)
                    .ok()
                    .and_then(|result| result.error)
                {
                    stderr = error;
                }
            }

            return Err(EngineError::ProcessFailure {
                exit_code: output.status.code(),
                stderr,
            });
        }

        extract_result(&output.stdout, &self.framing)?.into_output(&output.stdout)
    }
}

impl From<ChannelError> for EngineError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::DeadlineExceeded(timeout) => EngineError::Timeout(timeout),
            other => EngineError::ProcessFailure {
                exit_code: None,
                stderr: other.to_string(),
            },
        }
    }
}

#[async_trait]
impl InferenceBackend for ProcessBridge {
    async fn generate(&self, request: InferenceRequest) -> Result<InferenceOutput, EngineError> {
        let payload = serde_json::to_vec(&request).map_err(|e| {
            EngineError::InvalidInput(format!("request could not be serialized: {}", e))
        })?;

        // The deadline starts at spawn, not while queued for a permit
        let _permit = match &self.permits {
            Some(permits) => {
                debug!(available = permits.available_permits(), "Waiting for inference slot");
                permits.acquire().await.ok()
            }
            None => None,
        };

        let output = self.channel.round_trip(&payload).await?;
        let elapsed_ms = output.elapsed.as_millis() as u64;

        match self.interpret(output) {
            Ok(reply) => {
                info!(elapsed_ms, mode = %reply.mode, "Inference succeeded");
                Ok(reply)
            }
            Err(e) => {
                warn!(elapsed_ms, kind = %e.kind(), "Inference failed: {}", e);
                Err(e)
            }
        }
    }

    fn is_ready(&self) -> bool {
        let working_dir = self.channel.working_dir();
        working_dir.is_dir() && program_resolves(self.channel.program(), working_dir)
    }
}

/// Whether `program` names an existing file, either as a path or via `PATH`
pub fn program_resolves(program: &str, working_dir: &Path) -> bool {
    let path = Path::new(program);

    if path.is_absolute() {
        return path.is_file();
    }

    if path.components().count() > 1 {
        return working_dir.join(path).is_file() || path.is_file();
    }

    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false)
}
