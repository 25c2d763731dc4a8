//! Tolerant extraction of a JSON verdict from free-form reviewer output.
//!
//! Replies are frequently wrapped in markdown fences or preceded by
//! commentary. Extraction runs in two steps: unwrap a fenced block when the
//! whole reply is one, then parse directly, falling back to scanning for
//! the first position where a complete JSON object or array can be decoded.
//! Extraction stays separate from the status rules in [`parse_verdict`] so
//! each can be tested on its own.

use regex::Regex;
use serde_json::Value;
use std::path::Path;
use std::sync::LazyLock;

use crate::errors::VerdictError;
use crate::roles::AttemptRole;
use crate::util::single_line_preview;
use crate::verdict::{NextActor, ReviewVerdict, VerdictStatus};

static FENCE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^```(?:json)?\s*(.*?)\s*```$").unwrap());

const PREVIEW_CHARS: usize = 240;

/// Remove a markdown fence when the entire payload is one fenced block.
/// Partial fences and inline fences are left alone; the scanning fallback
/// handles those.
pub fn strip_fences(payload: &str) -> &str {
    let trimmed = payload.trim();
    match FENCE_REGEX.captures(trimmed) {
        Some(caps) => caps.get(1).map(|m| m.as_str().trim()).unwrap_or(trimmed),
        None => trimmed,
    }
}

/// Locate the first decodable JSON object or array in `payload`.
pub fn extract_value(payload: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(payload) {
        return Some(value);
    }

    for (idx, ch) in payload.char_indices() {
        if ch != '{' && ch != '[' {
            continue;
        }
        // Decode a single complete value and ignore whatever trails it.
        let mut stream = serde_json::Deserializer::from_str(&payload[idx..]).into_iter::<Value>();
        if let Some(Ok(value)) = stream.next() {
            return Some(value);
        }
    }
    None
}

/// Parse a reviewer reply into a [`ReviewVerdict`].
///
/// `path` is where the raw reply was persisted; it travels into every error
/// so a human can inspect the full output. A reply without a recognizable
/// `status` is a parse failure, never an implicit `fail`.
pub fn parse_verdict(
    raw: &str,
    path: &Path,
    role: AttemptRole,
) -> Result<ReviewVerdict, VerdictError> {
    let stripped = strip_fences(raw);
    let value = extract_value(stripped).ok_or_else(|| VerdictError::NotJson {
        role,
        path: path.to_path_buf(),
        preview: single_line_preview(stripped, PREVIEW_CHARS),
    })?;

    let status_raw =
        value
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| VerdictError::MissingStatus {
                role,
                path: path.to_path_buf(),
            })?;
    let status = VerdictStatus::parse(status_raw).ok_or_else(|| VerdictError::BadStatus {
        role,
        path: path.to_path_buf(),
        status: status_raw.to_string(),
    })?;

    let issues = string_list(&value, "issues");
    let tests = string_list(&value, "tests");

    let summary = value
        .get("summary")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let next_actor = value
        .get("next_actor")
        .and_then(Value::as_str)
        .and_then(|actor| match actor.trim().to_lowercase().as_str() {
            "agent" => Some(NextActor::Agent),
            "qa" => Some(NextActor::Qa),
            _ => None,
        });

    Ok(ReviewVerdict {
        status,
        issues,
        summary,
        next_actor,
        tests,
    })
}

/// Pull a string array field, rendering any non-string entries in place.
fn string_list(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .map(|entry| match entry.as_str() {
                    Some(text) => text.to_string(),
                    None => entry.to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn reply_path() -> PathBuf {
        PathBuf::from("automation_artifacts/transcripts/manager.txt")
    }

    #[test]
    fn strips_json_fence() {
        let raw = "```json\n{\"status\": \"pass\"}\n```";
        assert_eq!(strip_fences(raw), "{\"status\": \"pass\"}");
    }

    #[test]
    fn strips_bare_fence() {
        let raw = "```\n{\"status\": \"fail\"}\n```";
        assert_eq!(strip_fences(raw), "{\"status\": \"fail\"}");
    }

    #[test]
    fn leaves_unfenced_text_alone() {
        assert_eq!(strip_fences("  {\"a\": 1}  "), "{\"a\": 1}");
    }

    #[test]
    fn extracts_object_after_commentary() {
        let raw = "Here is my verdict:\n{\"status\": \"pass\", \"issues\": []}\nThanks!";
        let value = extract_value(raw).unwrap();
        assert_eq!(value["status"], "pass");
    }

    #[test]
    fn extracts_skips_false_starts() {
        // The first brace opens an unterminated fragment; the scan must move
        // past it to the real object.
        let raw = "{bad json here} then {\"status\": \"fail\", \"issues\": [\"x\"]}";
        let value = extract_value(raw).unwrap();
        assert_eq!(value["status"], "fail");
    }

    #[test]
    fn parses_full_manager_verdict() {
        let raw = concat!(
            "```json\n",
            "{\"status\": \"fail\", \"issues\": [\"tests missing\"], ",
            "\"summary\": \"needs work\", \"next_actor\": \"qa\"}\n",
            "```"
        );
        let verdict = parse_verdict(raw, &reply_path(), AttemptRole::Manager).unwrap();
        assert_eq!(verdict.status, VerdictStatus::Fail);
        assert_eq!(verdict.issues, vec!["tests missing".to_string()]);
        assert_eq!(verdict.summary, "needs work");
        assert_eq!(verdict.next_actor, Some(NextActor::Qa));
    }

    #[test]
    fn parses_qa_verdict_with_tests_field() {
        let raw = "{\"status\": \"pass\", \"issues\": [], \"summary\": \"ok\", \"tests\": [\"cargo test: pass\"]}";
        let verdict = parse_verdict(raw, &reply_path(), AttemptRole::Qa).unwrap();
        assert!(verdict.status.is_pass());
        assert_eq!(verdict.tests, vec!["cargo test: pass".to_string()]);
    }

    #[test]
    fn missing_status_is_a_parse_failure() {
        let raw = "{\"issues\": [\"no status\"]}";
        let err = parse_verdict(raw, &reply_path(), AttemptRole::Manager).unwrap_err();
        assert!(matches!(err, VerdictError::MissingStatus { .. }));
    }

    #[test]
    fn unknown_status_is_a_parse_failure_not_fail() {
        let raw = "{\"status\": \"approved\"}";
        let err = parse_verdict(raw, &reply_path(), AttemptRole::Manager).unwrap_err();
        match err {
            VerdictError::BadStatus { status, .. } => assert_eq!(status, "approved"),
            other => panic!("Expected BadStatus, got {other:?}"),
        }
    }

    #[test]
    fn prose_reply_reports_preview() {
        let raw = "I reviewed everything and it looks great overall.";
        let err = parse_verdict(raw, &reply_path(), AttemptRole::Qa).unwrap_err();
        match err {
            VerdictError::NotJson { preview, .. } => {
                assert!(preview.contains("looks great"));
            }
            other => panic!("Expected NotJson, got {other:?}"),
        }
    }

    #[test]
    fn unrecognized_next_actor_becomes_none() {
        let raw = "{\"status\": \"fail\", \"next_actor\": \"manager\"}";
        let verdict = parse_verdict(raw, &reply_path(), AttemptRole::Manager).unwrap();
        assert_eq!(verdict.next_actor, None);
    }

    #[test]
    fn non_string_issue_entries_are_rendered() {
        let raw = "{\"status\": \"fail\", \"issues\": [\"a\", 42]}";
        let verdict = parse_verdict(raw, &reply_path(), AttemptRole::Manager).unwrap();
        assert_eq!(verdict.issues, vec!["a".to_string(), "42".to_string()]);
    }
}
