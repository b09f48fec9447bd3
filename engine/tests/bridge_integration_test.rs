//! Integration tests for the inference process bridge
//!
//! Each test writes a small shell script standing in for the inference
//! program and checks which outcome the bridge produces.

#![cfg(unix)]

use chatflow_engine::bridge::{InferenceBackend, ProcessBridge, ProcessChannel, ResultFraming};
use sdk::errors::EngineError;
use sdk::types::{GenerationParams, InferenceRequest};
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::TempDir;

struct FakeInference {
    dir: TempDir,
}

impl FakeInference {
    fn new(script: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("inference.sh"), script).unwrap();
        Self { dir }
    }

    fn channel(&self) -> ProcessChannel {
        ProcessChannel::new("sh", vec!["inference.sh".to_string()], self.dir.path())
            .with_timeout(Duration::from_secs(10))
    }

    fn bridge(&self) -> ProcessBridge {
        ProcessBridge::new(self.channel())
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }
}

fn request(message: &str) -> InferenceRequest {
    InferenceRequest::new(message, Some("conv-1".to_string()), GenerationParams::default())
}

#[cfg(target_os = "linux")]
fn read_pid(path: &Path) -> i32 {
    std::fs::read_to_string(path).unwrap().trim().parse().unwrap()
}

/// Alive means present in /proc and not a zombie
#[cfg(target_os = "linux")]
fn process_alive(pid: i32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => {
            // State follows the parenthesized command name
            let state = stat
                .rsplit_once(')')
                .and_then(|(_, rest)| rest.split_whitespace().next());
            state != Some("Z") && state != Some("X")
        }
        Err(_) => false,
    }
}

#[tokio::test]
async fn test_noise_before_result_is_skipped() {
    let fake = FakeInference::new(
        r#"cat > /dev/null
echo "Loading model..."
echo noise
echo '{"success":true,"response":"hi","mode":"default"}'
"#,
    );

    let output = fake.bridge().generate(request("Hello")).await.unwrap();

    assert_eq!(output.response_text, "hi");
    assert_eq!(output.mode, "default");
}

#[tokio::test]
async fn test_request_payload_reaches_stdin() {
    let fake = FakeInference::new(
        r#"cat > request.json
echo '{"success":true,"response":"ok","mode":"casual"}'
"#,
    );

    let request = InferenceRequest::new(
        "What's up?",
        Some("conv-42".to_string()),
        GenerationParams {
            max_length: 64,
            temperature: 0.5,
        },
    );
    let output = fake.bridge().generate(request).await.unwrap();
    assert_eq!(output.mode, "casual");

    let written = std::fs::read_to_string(fake.path().join("request.json")).unwrap();
    let payload: serde_json::Value = serde_json::from_str(&written).unwrap();
    assert_eq!(payload["message"], "What's up?");
    assert_eq!(payload["conversation_id"], "conv-42");
    assert_eq!(payload["max_length"], 64);
    assert_eq!(payload["temperature"], 0.5);
}

#[tokio::test]
async fn test_nonzero_exit_is_process_failure_with_stderr() {
    let fake = FakeInference::new("cat > /dev/null\necho boom >&2\nexit 1\n");

    match fake.bridge().generate(request("Hello")).await {
        Err(EngineError::ProcessFailure { exit_code, stderr }) => {
            assert_eq!(exit_code, Some(1));
            assert_eq!(stderr, "boom");
        }
        other => panic!("expected ProcessFailure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_nonzero_exit_falls_back_to_stdout_error() {
    let fake = FakeInference::new(
        r#"cat > /dev/null
echo '{"success":false,"error":"No input provided"}'
exit 1
"#,
    );

    match fake.bridge().generate(request("Hello")).await {
        Err(EngineError::ProcessFailure { stderr, .. }) => {
            assert_eq!(stderr, "No input provided");
        }
        other => panic!("expected ProcessFailure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_reported_failure_is_inference_failure() {
    let fake = FakeInference::new(
        r#"cat > /dev/null
echo '{"success":false,"error":"model not loaded"}'
"#,
    );

    match fake.bridge().generate(request("Hello")).await {
        Err(EngineError::InferenceFailure(message)) => assert_eq!(message, "model not loaded"),
        other => panic!("expected InferenceFailure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unparseable_output_is_parse_failure() {
    let fake = FakeInference::new("cat > /dev/null\necho 'Traceback (most recent call last):'\n");

    match fake.bridge().generate(request("Hello")).await {
        Err(EngineError::ParseFailure { raw_output, .. }) => {
            assert!(raw_output.contains("Traceback"));
        }
        other => panic!("expected ParseFailure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_empty_output_is_parse_failure() {
    let fake = FakeInference::new("cat > /dev/null\n");

    assert!(matches!(
        fake.bridge().generate(request("Hello")).await,
        Err(EngineError::ParseFailure { .. })
    ));
}

#[tokio::test]
async fn test_missing_program_is_process_failure() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = ProcessBridge::new(ProcessChannel::new(
        "chatflow-no-such-program",
        vec![],
        dir.path(),
    ));

    assert!(!bridge.is_ready());
    assert!(matches!(
        bridge.generate(request("Hello")).await,
        Err(EngineError::ProcessFailure { exit_code: None, .. })
    ));
}

#[tokio::test]
async fn test_marker_framing_picks_marked_line() {
    let fake = FakeInference::new(
        r#"cat > /dev/null
echo '@@RESULT@@ {"success":true,"response":"framed"}'
echo '{"success":true,"response":"debug dump"}'
"#,
    );
    let bridge = fake
        .bridge()
        .with_framing(ResultFraming::Marker("@@RESULT@@".to_string()));

    let output = bridge.generate(request("Hello")).await.unwrap();
    assert_eq!(output.response_text, "framed");
}

#[tokio::test]
async fn test_timeout_kills_process_within_margin() {
    let fake = FakeInference::new("echo $$ > pid\nsleep 30\n");
    let bound = Duration::from_millis(500);
    let bridge = ProcessBridge::new(fake.channel().with_timeout(bound));

    let started = Instant::now();
    let result = bridge.generate(request("Hello")).await;
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(EngineError::Timeout(d)) if d == bound));
    assert!(elapsed >= bound);
    assert!(elapsed < bound + Duration::from_secs(2), "took {:?}", elapsed);

    #[cfg(target_os = "linux")]
    {
        let pid = read_pid(&fake.path().join("pid"));
        assert!(!process_alive(pid), "inference process {} still running", pid);
    }
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_timeout_kills_forked_helpers() {
    let fake = FakeInference::new("sleep 30 &\necho $! > helper_pid\nwait\n");
    let bridge = ProcessBridge::new(fake.channel().with_timeout(Duration::from_millis(500)));

    assert!(matches!(
        bridge.generate(request("Hello")).await,
        Err(EngineError::Timeout(_))
    ));

    let helper = read_pid(&fake.path().join("helper_pid"));

    // The orphaned helper is reaped by init, which may take a moment
    let deadline = Instant::now() + Duration::from_secs(2);
    while process_alive(helper) && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!process_alive(helper), "helper process {} survived", helper);
}

#[tokio::test]
async fn test_concurrency_limit_serializes_processes() {
    let fake = FakeInference::new(
        r#"cat > /dev/null
sleep 0.3
echo '{"success":true,"response":"done"}'
"#,
    );
    let bridge = fake.bridge().with_max_concurrency(1);

    let started = Instant::now();
    let (a, b) = tokio::join!(
        bridge.generate(request("one")),
        bridge.generate(request("two"))
    );

    assert!(a.is_ok() && b.is_ok());
    assert!(started.elapsed() >= Duration::from_millis(550));
}
