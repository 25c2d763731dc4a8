//! Invocation tiers and executor profiles.
//!
//! `AttemptRole` names which tier of the validation loop produced an
//! invocation (agent, manager, QA) and travels through attempt records,
//! labels, and errors. `RoleKind` is the closed set of executor profiles a
//! work item's free-text `owner` field can route to; routing normalizes the
//! owner text and looks each candidate token up in a fixed table, so an
//! unmatched owner yields `None` instead of silently falling back to a
//! default profile.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

static NON_ALPHA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z]+").unwrap());

/// The tier of the validation loop an invocation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptRole {
    Agent,
    Manager,
    Qa,
}

impl AttemptRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptRole::Agent => "agent",
            AttemptRole::Manager => "manager",
            AttemptRole::Qa => "qa",
        }
    }
}

impl fmt::Display for AttemptRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Executor profile a work item routes to, keyed by its `owner` text.
///
/// The first ten profiles serve backlog items; the bug/feedback profiles
/// are requested directly by the stage pipeline controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    ModuleDeveloper,
    TestEngineer,
    CodeReviewer,
    Security,
    Perf,
    Release,
    ScaffolderSupport,
    DocWriter,
    MetaGrader,
    PlaywrightRunner,
    BugIntake,
    BugTriage,
    BugRepro,
    FeedbackIntake,
    FeedbackReview,
    FeedbackPlan,
}

impl RoleKind {
    /// Stable registry key, used for prompt lookup and session file names.
    pub fn key(&self) -> &'static str {
        match self {
            RoleKind::ModuleDeveloper => "module_developer",
            RoleKind::TestEngineer => "test_engineer",
            RoleKind::CodeReviewer => "code_reviewer",
            RoleKind::Security => "security",
            RoleKind::Perf => "perf",
            RoleKind::Release => "release",
            RoleKind::ScaffolderSupport => "scaffolder_support",
            RoleKind::DocWriter => "doc_writer",
            RoleKind::MetaGrader => "meta_grader",
            RoleKind::PlaywrightRunner => "playwright_runner",
            RoleKind::BugIntake => "bug_intake",
            RoleKind::BugTriage => "bug_triage",
            RoleKind::BugRepro => "bug_repro",
            RoleKind::FeedbackIntake => "feedback_intake",
            RoleKind::FeedbackReview => "feedback_review",
            RoleKind::FeedbackPlan => "feedback_plan",
        }
    }
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Route a free-text owner label to an executor profile.
///
/// Normalization mirrors how backlog authors actually write owner fields:
/// the text is lowercased, then matched first as a compacted alphabetic
/// form ("Module Dev" -> "moduledev") and then token by token. `None`
/// means the owner is unroutable and the item should be reported and
/// skipped rather than handed to a default profile.
pub fn resolve_owner(owner: &str) -> Option<RoleKind> {
    let owner_raw = owner.trim().to_lowercase();
    if owner_raw.is_empty() {
        return None;
    }

    let compact = NON_ALPHA.replace_all(&owner_raw, "").into_owned();
    let mut candidates: Vec<&str> = Vec::new();
    if !compact.is_empty() {
        candidates.push(compact.as_str());
    }
    for token in NON_ALPHA.split(&owner_raw) {
        if !token.is_empty() && !candidates.contains(&token) {
            candidates.push(token);
        }
    }

    candidates.into_iter().find_map(lookup_token)
}

fn lookup_token(token: &str) -> Option<RoleKind> {
    let kind = match token {
        "moduledev" | "moduledeveloper" | "dev" | "developer" | "coder" | "engineer" => {
            RoleKind::ModuleDeveloper
        }
        "test" | "qa" | "tester" | "testengineer" => RoleKind::TestEngineer,
        "codereviewer" | "reviewer" | "review" => RoleKind::CodeReviewer,
        "security" | "compliance" | "securitycompliance" => RoleKind::Security,
        "perf" | "performance" | "resilience" => RoleKind::Perf,
        "release" | "devops" | "deployment" | "deploy" | "ops" => RoleKind::Release,
        "scaffolder" | "scaffold" | "scaffolding" | "bootstrap" => RoleKind::ScaffolderSupport,
        "doc" | "docs" | "documentation" | "writer" | "scribe" => RoleKind::DocWriter,
        "metagrader" | "grader" | "meta" => RoleKind::MetaGrader,
        "playwright" | "e2e" | "browser" | "browsertest" | "playwrightrunner" => {
            RoleKind::PlaywrightRunner
        }
        "bug" | "bugreport" | "bugintake" => RoleKind::BugIntake,
        "bugtriage" => RoleKind::BugTriage,
        "bugrepro" | "bugreproduction" => RoleKind::BugRepro,
        "feedback" | "suggestion" | "feature" | "productfeedback" => RoleKind::FeedbackIntake,
        "feedbackreview" => RoleKind::FeedbackReview,
        "feedbackplan" => RoleKind::FeedbackPlan,
        _ => return None,
    };
    Some(kind)
}
