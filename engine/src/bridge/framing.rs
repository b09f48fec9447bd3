//! Locating the result object in captured stdout
//!
//! Inference scripts tend to print progress and library noise before their
//! result. By default the result is the last line that looks like a complete
//! JSON object. A marker framing is also available: the script prefixes its
//! result line with a fixed marker and nothing else is considered.

use sdk::errors::EngineError;
use sdk::types::InferenceResult;

/// How the result line is picked out of stdout
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ResultFraming {
    /// Last line that starts with `{` and ends with `}`
    #[default]
    LastJsonLine,
    /// Last line starting with the marker; the rest of the line is the object
    Marker(String),
}

impl ResultFraming {
    pub fn from_marker(marker: Option<&str>) -> Self {
        match marker {
            Some(marker) if !marker.trim().is_empty() => Self::Marker(marker.trim().to_string()),
            _ => Self::LastJsonLine,
        }
    }

    fn select<'a>(&self, stdout: &'a str) -> Option<&'a str> {
        let mut lines = stdout.lines().rev().map(str::trim);
        match self {
            Self::LastJsonLine => lines.find(|line| line.starts_with('{') && line.ends_with('}')),
            Self::Marker(marker) => lines
                .find_map(|line| line.strip_prefix(marker.as_str()))
                .map(str::trim),
        }
    }
}

/// Find and parse the result object in `stdout`.
///
/// Only the selected line is parsed; an earlier well-formed line is never
/// used as a fallback.
pub fn extract_result(
    stdout: &str,
    framing: &ResultFraming,
) -> Result<InferenceResult, EngineError> {
    let parse_failure = |reason: String| EngineError::ParseFailure {
        reason,
        raw_output: stdout.to_string(),
    };

    let line = framing.select(stdout).ok_or_else(|| {
        parse_failure(match framing {
            ResultFraming::LastJsonLine => "no JSON object line in output".to_string(),
            ResultFraming::Marker(marker) => {
                format!("no line starting with '{}' in output", marker)
            }
        })
    })?;

    let value: serde_json::Value = serde_json::from_str(line)
        .map_err(|e| parse_failure(format!("result line is not valid JSON: {}", e)))?;

    let object = value
        .as_object()
        .ok_or_else(|| parse_failure("result is not a JSON object".to_string()))?;

    if !object.contains_key("success") && !object.contains_key("error") {
        return Err(parse_failure(
            "result object has neither 'success' nor 'error'".to_string(),
        ));
    }

    serde_json::from_value(value)
        .map_err(|e| parse_failure(format!("result object has unexpected shape: {}", e)))
}
