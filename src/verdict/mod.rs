//! Structured review verdicts and the tolerant reply parser.
//!
//! Reviewer replies arrive as free-form text that usually, but not always,
//! contains a JSON object. `parse` handles extraction; this module owns the
//! typed result. The status vocabulary is closed: reviews use `pass`/`fail`,
//! the bug/feedback pipelines add their stage statuses, and anything outside
//! the set is a parse failure rather than an implicit `fail`.

pub mod parse;

pub use parse::parse_verdict;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed status vocabulary across review verdicts and stage result files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    Pass,
    Fail,
    NeedsInfo,
    Duplicate,
    Rejected,
    Triaged,
    Reviewed,
    Blocked,
}

impl VerdictStatus {
    /// Case-insensitive lookup. `None` for anything outside the vocabulary.
    pub fn parse(raw: &str) -> Option<Self> {
        let status = match raw.trim().to_lowercase().as_str() {
            "pass" => VerdictStatus::Pass,
            "fail" => VerdictStatus::Fail,
            "needs_info" => VerdictStatus::NeedsInfo,
            "duplicate" => VerdictStatus::Duplicate,
            "rejected" => VerdictStatus::Rejected,
            "triaged" => VerdictStatus::Triaged,
            "reviewed" => VerdictStatus::Reviewed,
            "blocked" => VerdictStatus::Blocked,
            _ => return None,
        };
        Some(status)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictStatus::Pass => "pass",
            VerdictStatus::Fail => "fail",
            VerdictStatus::NeedsInfo => "needs_info",
            VerdictStatus::Duplicate => "duplicate",
            VerdictStatus::Rejected => "rejected",
            VerdictStatus::Triaged => "triaged",
            VerdictStatus::Reviewed => "reviewed",
            VerdictStatus::Blocked => "blocked",
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, VerdictStatus::Pass)
    }
}

impl fmt::Display for VerdictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who a failing primary review hands the item back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NextActor {
    Agent,
    Qa,
}

/// Parsed reviewer reply. `issues` and `summary` default to empty when the
/// reply omits them; only `status` is mandatory.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewVerdict {
    pub status: VerdictStatus,
    pub issues: Vec<String>,
    pub summary: String,
    /// Present only on primary (manager) reviews of execution-class items.
    /// `None` means the reviewer omitted or mangled the field; the caller
    /// decides the fallback.
    pub next_actor: Option<NextActor>,
    /// Commands QA reports having run, with their outcomes.
    pub tests: Vec<String>,
}

impl ReviewVerdict {
    /// Issues joined for prompt interpolation, one `- ` bullet per line.
    pub fn issue_lines(&self) -> String {
        self.issues
            .iter()
            .map(|issue| format!("- {issue}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
