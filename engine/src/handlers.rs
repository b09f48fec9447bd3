//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - serve: Run the HTTP API server
//! - ask: Send one chat message through the inference program
//! - generate: Free-form generation from a prompt
//! - config: Show the effective configuration
//! - doctor: Check that the inference program can be run

use anyhow::{Context, Result};
use serde_json::json;

use crate::api;
use crate::bridge::{program_resolves, InferenceBackend, ProcessBridge};
use crate::config::Config;
use crate::orchestrator::{ChatFailure, ChatOrchestrator, GenerateOptions};

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Run the HTTP API server until Ctrl-C or SIGTERM
pub async fn handle_serve(config: &Config, port: Option<u16>) -> Result<()> {
    let mut config = config.clone();
    if let Some(port) = port {
        config.server.port = port;
    }

    api::serve(&config).await.context("API server failed")
}

/// Send one chat message and print the reply
///
/// Each invocation starts a new conversation; nothing outlives the process.
pub async fn handle_ask(message: String, config: &Config, format: OutputFormat) -> Result<()> {
    let orchestrator = ChatOrchestrator::from_config(config);

    match orchestrator.chat(&message, None).await {
        Ok(reply) => match format {
            OutputFormat::Text => {
                println!("{}", reply.response);
                println!();
                println!("  Mode: {}", reply.mode);
                println!("  Duration: {}ms", reply.generation_time_ms);
            }
            OutputFormat::Json => {
                let output = json!({
                    "success": true,
                    "response": reply.response,
                    "conversation_id": reply.conversation_id,
                    "mode": reply.mode,
                    "generation_time": reply.generation_time_ms,
                    "timestamp": reply.timestamp,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
        },
        Err(failure) => {
            print_failure(&failure, format)?;
            return Err(failure.into());
        }
    }

    Ok(())
}

/// Generate free-form text from a prompt
pub async fn handle_generate(
    prompt: String,
    max_length: Option<u32>,
    temperature: Option<f32>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let orchestrator = ChatOrchestrator::from_config(config);
    let options = GenerateOptions {
        prompt,
        max_length,
        temperature,
    };

    match orchestrator.generate(options).await {
        Ok(reply) => match format {
            OutputFormat::Text => {
                println!("{}", reply.generated_text);
                println!();
                println!("  Duration: {}ms", reply.generation_time_ms);
            }
            OutputFormat::Json => {
                let output = json!({
                    "success": true,
                    "generated_text": reply.generated_text,
                    "generation_time": reply.generation_time_ms,
                    "timestamp": reply.timestamp,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
        },
        Err(failure) => {
            print_failure(&failure, format)?;
            return Err(failure.into());
        }
    }

    Ok(())
}

fn print_failure(failure: &ChatFailure, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            println!("✗ {}", failure.user_message());
            println!("  Kind: {}", failure.kind());
            println!("  Detail: {}", failure.detail());
        }
        OutputFormat::Json => {
            let output = json!({
                "success": false,
                "error": failure.user_message(),
                "kind": failure.kind(),
                "stage": failure.stage.as_str(),
                "details": failure.detail(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

/// Print the effective configuration, environment overrides included
pub async fn handle_show_config(config: &Config, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            let rendered =
                toml::to_string_pretty(config).context("Failed to render configuration")?;
            print!("{}", rendered);
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(config)?);
        }
    }
    Ok(())
}

/// Validate configuration and check that inference can run
pub async fn handle_doctor(config: &Config, format: OutputFormat) -> Result<()> {
    let mut issues = Vec::new();
    let mut checks: Vec<(&str, String)> = Vec::new();

    // Config is already validated when loaded
    checks.push(("Configuration", "Valid".to_string()));

    let working_dir = &config.inference.working_dir;
    if working_dir.is_dir() {
        checks.push(("Working directory", "Exists".to_string()));
    } else {
        checks.push(("Working directory", "Missing".to_string()));
        issues.push(format!(
            "Inference working directory does not exist: {}",
            working_dir.display()
        ));
    }

    if program_resolves(&config.inference.program, working_dir) {
        checks.push(("Inference program", config.inference.program.clone()));
    } else {
        checks.push(("Inference program", "Not found".to_string()));
        issues.push(format!(
            "Inference program '{}' was not found on PATH",
            config.inference.program
        ));
    }

    // First non-flag argument is usually the script the program runs
    if let Some(script) = config.inference.args.iter().find(|arg| !arg.starts_with('-')) {
        if working_dir.join(script).is_file() {
            checks.push(("Inference script", "Exists".to_string()));
        } else {
            checks.push(("Inference script", "Missing".to_string()));
            issues.push(format!(
                "Inference script not found: {}",
                working_dir.join(script).display()
            ));
        }
    }

    checks.push(("Timeout", format!("{}s", config.inference.timeout_secs)));

    let concurrency = match config.inference.max_concurrent_processes {
        0 => "Unlimited".to_string(),
        n => n.to_string(),
    };
    checks.push(("Concurrent processes", concurrency));

    checks.push((
        "Result framing",
        match &config.inference.result_marker {
            Some(marker) => format!("Marker '{}'", marker),
            None => "Last JSON line".to_string(),
        },
    ));

    let address = config.server.bind_address();
    match std::net::TcpListener::bind(&address) {
        Ok(_) => checks.push(("Listen address", format!("{} available", address))),
        Err(e) => {
            checks.push(("Listen address", format!("{} unavailable", address)));
            issues.push(format!("Cannot bind {}: {}", address, e));
        }
    }

    let ai_ready = ProcessBridge::from_config(&config.inference).is_ready();
    let ai_ready = if ai_ready { "Yes" } else { "No" };
    checks.push(("AI ready", ai_ready.to_string()));

    match format {
        OutputFormat::Text => {
            println!("ChatFlow Diagnostics");
            println!("====================");
            println!();

            println!("Checks:");
            for (check, status) in &checks {
                println!("  {:<25} {}", format!("{}:", check), status);
            }

            println!();

            if issues.is_empty() {
                println!("✓ All checks passed!");
            } else {
                println!("⚠ Issues found:");
                println!();
                for (i, issue) in issues.iter().enumerate() {
                    println!("  {}. {}", i + 1, issue);
                }
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "checks": checks.iter().map(|(name, status)| {
                    json!({
                        "name": name,
                        "status": status
                    })
                }).collect::<Vec<_>>(),
                "issues": issues,
                "healthy": issues.is_empty()
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_show_config_renders_both_formats() {
        let config = Config::default();
        assert!(handle_show_config(&config, OutputFormat::Text).await.is_ok());
        assert!(handle_show_config(&config, OutputFormat::Json).await.is_ok());
    }

    #[tokio::test]
    async fn test_doctor_reports_without_failing() {
        let mut config = Config::default();
        config.inference.working_dir = "/no/such/chatflow/dir".into();
        config.server.port = 0;

        assert!(handle_doctor(&config, OutputFormat::Json).await.is_ok());
    }

    #[tokio::test]
    async fn test_ask_blank_message_fails() {
        let config = Config::default();
        let err = handle_ask("   ".to_string(), &config, OutputFormat::Text)
            .await
            .unwrap_err();

        let failure = err.downcast_ref::<ChatFailure>().unwrap();
        assert_eq!(failure.kind(), sdk::errors::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_ask_fails_when_inference_cannot_start() {
        let mut config = Config::default();
        config.inference.working_dir = "/no/such/chatflow/dir".into();

        let err = handle_ask("Hello".to_string(), &config, OutputFormat::Json)
            .await
            .unwrap_err();

        let failure = err.downcast_ref::<ChatFailure>().unwrap();
        assert_eq!(failure.kind(), sdk::errors::ErrorKind::ProcessFailure);
    }

    #[tokio::test]
    async fn test_generate_rejects_bad_temperature() {
        let config = Config::default();
        let result = handle_generate(
            "story".to_string(),
            None,
            Some(-1.0),
            &config,
            OutputFormat::Text,
        )
        .await;

        assert!(result.is_err());
    }
}
