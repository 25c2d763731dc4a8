//! Prompt synthesis for the state machine: corrective prompts sent back to
//! the executor and the structured charges for both reviewer tiers.
//!
//! Reviewer prompts end with a strict JSON schema line; the parser in
//! [`crate::verdict`] is the other half of that contract.

use std::path::{Path, PathBuf};

use crate::playbook::ValidationFocus;
use crate::util::rel_display;
use crate::verdict::ReviewVerdict;

use super::ItemContext;

/// Dash-bulleted issue list for prompt interpolation. Blank entries are
/// dropped; an empty result becomes `- No details provided.`.
pub fn format_issue_list(issues: &[String]) -> String {
    let formatted = issues
        .iter()
        .filter(|issue| !issue.is_empty())
        .map(|issue| format!("- {issue}"))
        .collect::<Vec<_>>()
        .join("\n");
    if formatted.is_empty() {
        "- No details provided.".to_string()
    } else {
        formatted
    }
}

/// Corrective prompt after a failed review round.
pub fn build_retry_prompt(original_prompt: &str, issues: &[String]) -> String {
    let issue_lines = if issues.is_empty() {
        "- No details provided.".to_string()
    } else {
        issues
            .iter()
            .map(|issue| format!("- {issue}"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "The quality assurance manager reported the following issues:\n\
         {issue_lines}\n\n\
         Please correct the deliverables so they fully satisfy the original instructions below. \
         Regenerate the complete content rather than incremental edits.\n\n\
         Original instructions:\n\
         {original_prompt}"
    )
}

/// Corrective prompt after the acceptance check found deliverables missing
/// or blank.
pub fn build_missing_deliverables_prompt(
    original_prompt: &str,
    missing: &[PathBuf],
    workspace: &Path,
) -> String {
    let lines = missing
        .iter()
        .map(|path| format!("- {}", rel_display(path, workspace)))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "You did not write the required deliverables to the repository.\n\
         The following files are missing or empty:\n\
         {lines}\n\n\
         Resume the work and update each file directly in the repo so it matches the original instructions.\n\
         Do not return the content inline; write the files exactly as required and confirm completion.\n\n\
         Original instructions:\n\
         {original_prompt}"
    )
}

const MANAGER_CHARGE: &str = "You are the delivery manager. The execution agent claims the work below is \
complete. Validate it against the original instructions before it is \
accepted into the project. Inspect the repository directly; do not take the \
agent's word for anything.";

const QA_CHARGE: &str = "You are the quality assurance reviewer. An execution agent has completed a \
work item in this repository. Independently verify the work before the \
delivery manager signs off.";

pub struct ManagerPromptArgs<'a> {
    pub deliverables: &'a [PathBuf],
    pub original_instructions: &'a str,
    pub focus: ValidationFocus,
    pub item: Option<&'a ItemContext>,
    pub qa_review: Option<&'a ReviewVerdict>,
    /// Only referenced when a QA review is also attached.
    pub qa_report_path: Option<&'a Path>,
    pub workspace: &'a Path,
}

/// Primary-review prompt: charge, deliverables, item reference, fenced
/// original instructions, latest QA verdict, focus rubric, and the strict
/// response schema.
pub fn build_manager_prompt(args: &ManagerPromptArgs<'_>) -> String {
    let deliverable_text = if args.deliverables.is_empty() {
        "- (no direct file deliverables)".to_string()
    } else {
        args.deliverables
            .iter()
            .map(|path| format!("- {}", rel_display(path, args.workspace)))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let mut parts = vec![
        MANAGER_CHARGE.to_string(),
        format!("Deliverable locations:\n{deliverable_text}"),
    ];

    if let Some(item) = args.item {
        parts.push(format!(
            "The agent executed work item {} defined in {}.",
            item.id,
            rel_display(&item.source, args.workspace)
        ));
    }

    parts.push(format!(
        "Original instructions provided to the execution agent:\n---\n{}\n---",
        args.original_instructions
    ));

    if let Some(qa) = args.qa_review {
        parts.push(format!(
            "Latest QA Review:\n- Status: {}\n- Summary: {}\n- Outstanding QA Issues:\n{}",
            qa.status,
            qa.summary,
            format_issue_list(&qa.issues)
        ));
    }

    match args.focus {
        ValidationFocus::Execution if args.item.is_some() => {
            let report = args
                .item
                .map(|item| {
                    rel_display(&item.dir.join("agent-report.md"), args.workspace)
                })
                .unwrap_or_default();
            parts.push(format!(
                "Validation focus:\n\
                 - Inspect {report} for summary, tests, and follow-ups.\n\
                 - Confirm code changes satisfy the DoD listed in the backlog entry and that reported tests were executed.\n\
                 - Verify new or updated tests live alongside the implementation.\n\
                 - Flag missing validations, untracked assumptions, or regressions."
            ));
            parts.push(
                "If issues remain, set `next_actor` to `agent` when implementation changes are \
                 required, or `qa` when additional QA validation is needed before sign-off."
                    .to_string(),
            );
        }
        ValidationFocus::Infra => {
            parts.push(
                "Validation focus:\n\
                 - Ensure docker-compose.dev.yml defines services for frontend and backend (and any other dependencies) with volume mounts pointing to the repository source directories.\n\
                 - Verify devops/start-dev.sh, devops/stop-dev.sh, and devops/logs.sh are executable scripts, contain the expected docker compose commands, and reference the compose file via -f docker-compose.dev.yml.\n\
                 - Confirm .env.example exists and lists variables referenced by the compose services.\n\
                 - Check that frontend/package.json and backend/package.json exist with minimal scripts (e.g., dev) matching what the documentation will reference.\n\
                 - Fail validation if any required file is missing, empty, not executable (for scripts), or obviously inconsistent with the instructions."
                    .to_string(),
            );
        }
        ValidationFocus::Backlog => {
            parts.push(
                "Validation focus:\n\
                 - Ensure the backlog manifest is valid JSON with a `tasks` array.\n\
                 - Confirm every task has fields: id, title, owner, area, deps[], dod[], tests[], artifacts[], estimate_points.\n\
                 - Check for duplicate IDs or dependencies on missing tasks.\n\
                 - Report an issue if the graph appears cyclic or if required metadata is absent."
                    .to_string(),
            );
        }
        _ => {
            parts.push(
                "Validation focus:\n\
                 - Ensure each deliverable exists and is updated.\n\
                 - Cross-check that the content satisfies every requirement stated in the original instructions."
                    .to_string(),
            );
        }
    }

    if args.qa_review.is_some() {
        if let Some(report) = args.qa_report_path {
            parts.push(format!(
                "QA report for this item lives at {}.",
                rel_display(report, args.workspace)
            ));
        }
    }

    let schema = if args.focus == ValidationFocus::Execution {
        r#"{"status":"pass|fail","issues":["<list of problems>"],"summary":"<short recap>","next_actor":"agent|qa"}"#
    } else {
        r#"{"status":"pass|fail","issues":["<list of problems>"],"summary":"<short recap>"}"#
    };
    parts.push(format!(
        "Respond ONLY with a JSON object using this schema:\n{schema}"
    ));

    parts.join("\n\n")
}

pub struct QaPromptArgs<'a> {
    pub item: &'a ItemContext,
    pub report_path: &'a Path,
    /// The initial prompt the executor received, passed through verbatim.
    pub agent_prompt: &'a str,
    /// Manager-supplied focus areas for follow-up rounds.
    pub context_notes: Option<&'a str>,
    pub workspace: &'a Path,
}

/// Secondary-review prompt: charge, item coordinates, executor context,
/// expectations, optional manager focus notes, and the response schema.
pub fn build_qa_prompt(args: &QaPromptArgs<'_>) -> String {
    let mut parts = vec![
        QA_CHARGE.to_string(),
        format!("Work item ID: {}", args.item.id),
        format!(
            "Work item source: {}",
            rel_display(&args.item.source, args.workspace)
        ),
        format!(
            "Agent report: {}",
            rel_display(args.report_path, args.workspace)
        ),
        format!(
            "Item artifact directory: {}",
            rel_display(&args.item.dir, args.workspace)
        ),
        format!("Available context:\n{}", args.agent_prompt),
        "Expectations:\n\
         - Review the agent report for completeness and accuracy.\n\
         - Review relevant code changes, paying attention to regressions, security, and edge cases.\n\
         - Run any necessary tests or scripts (unit, integration, lint, etc.) to validate the work. \
         Summarize the commands you executed and tie them to pass/fail outcomes.\n\
         - Do not modify files; report issues for the implementation agent to resolve."
            .to_string(),
    ];

    if let Some(notes) = args.context_notes {
        parts.push(format!("Additional focus areas from management:\n{notes}"));
    }

    parts.push(format!(
        "Respond ONLY with a JSON object using this schema:\n{}",
        r#"{"status":"pass|fail","issues":["<list of problems>"],"summary":"<short recap>","tests":["<test command and outcome>"]}"#
    ));

    parts.join("\n\n")
}
