//! The execution/validation state machine.
//!
//! One work item at a time is driven through executor, optional secondary
//! (QA) review, and primary (manager) review, with bounded retries at each
//! tier and strict session-continuity rules. [`machine::ExecutionFlow`] holds
//! the loop; [`prompts`] synthesizes the corrective and reviewer prompts.

pub mod machine;
pub mod prompts;

pub use machine::ExecutionFlow;

use std::path::{Path, PathBuf};

use crate::playbook::{PromptSpec, ValidationFocus};
use crate::util::file_has_text;

/// Retry budgets, shared by every flow the run spawns.
///
/// Each budget counts *retries*: a tier gets `budget + 1` invocations.
#[derive(Debug, Clone, Copy)]
pub struct RetryBudgets {
    pub agent_retries: u32,
    pub manager_retries: u32,
    pub qa_retries: u32,
}

impl Default for RetryBudgets {
    fn default() -> Self {
        Self {
            agent_retries: 10,
            manager_retries: 5,
            qa_retries: 5,
        }
    }
}

/// Identity of the work item a flow is executing, when there is one.
/// Primary-chain stages run without an item.
#[derive(Debug, Clone)]
pub struct ItemContext {
    pub id: String,
    /// Where the item is defined (backlog manifest or stage state file).
    pub source: PathBuf,
    /// Per-item artifact directory; the executor's report lands here.
    pub dir: PathBuf,
}

impl ItemContext {
    /// Where the executor is told to write its report.
    pub fn report_path(&self) -> PathBuf {
        self.dir.join("agent-report.md")
    }
}

/// Everything the state machine needs to drive one work item.
#[derive(Debug, Clone)]
pub struct FlowRequest {
    /// Stage name for ledger records, e.g. `Module Developer`.
    pub prompt_name: String,
    /// Stage key for session mirrors, e.g. `module_developer`.
    pub stage_key: String,
    pub focus: ValidationFocus,
    pub enable_qa: bool,
    /// Absolute deliverable paths gating acceptance. May be empty.
    pub deliverables: Vec<PathBuf>,
    pub initial_prompt: String,
    pub agent_label: String,
    pub manager_label: String,
    pub qa_label: Option<String>,
    pub item: Option<ItemContext>,
}

impl FlowRequest {
    /// Request for `spec` with tier labels derived from `label_root`
    /// (`{root}/agent`, `{root}/manager`). QA starts disabled.
    pub fn new(spec: &PromptSpec, initial_prompt: String, label_root: &str) -> Self {
        Self {
            prompt_name: spec.name.to_string(),
            stage_key: spec.key.to_string(),
            focus: spec.focus,
            enable_qa: false,
            deliverables: spec.deliverables.clone(),
            initial_prompt,
            agent_label: format!("{label_root}/agent"),
            manager_label: format!("{label_root}/manager"),
            qa_label: None,
            item: None,
        }
    }

    pub fn with_item(mut self, item: ItemContext) -> Self {
        self.item = Some(item);
        self
    }

    /// Enable the secondary review tier under the given label. Takes effect
    /// only when an item context is also present.
    pub fn with_qa(mut self, qa_label: impl Into<String>) -> Self {
        self.enable_qa = true;
        self.qa_label = Some(qa_label.into());
        self
    }
}

/// Terminal state of one flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowOutcome {
    Accepted,
    /// Executor budget spent, by transport failures or corrective cycles.
    AgentExhausted,
    /// A QA batch ran out of invocations without producing a verdict.
    QaUnresolved,
    /// A manager batch ran out of invocations without producing a verdict.
    ManagerUnresolved,
    /// The manager kept failing the work past its cycle budget.
    ManagerExhausted,
}

impl FlowOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, FlowOutcome::Accepted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FlowOutcome::Accepted => "accepted",
            FlowOutcome::AgentExhausted => "agent-exhausted",
            FlowOutcome::QaUnresolved => "qa-unresolved",
            FlowOutcome::ManagerUnresolved => "manager-unresolved",
            FlowOutcome::ManagerExhausted => "manager-exhausted",
        }
    }
}

impl std::fmt::Display for FlowOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the flow reports back to its pipeline.
#[derive(Debug)]
pub struct FlowReport {
    pub outcome: FlowOutcome,
    /// Human-readable terminal message.
    pub detail: String,
    /// Every issue surfaced across all review rounds, in order.
    pub issues: Vec<String>,
    /// Final reviewer summary, when accepted with one.
    pub summary: Option<String>,
    /// Last raw reply written by any tier.
    pub last_output: Option<PathBuf>,
}

impl FlowReport {
    pub fn accepted(summary: String, last_output: Option<PathBuf>) -> Self {
        Self {
            outcome: FlowOutcome::Accepted,
            detail: "accepted".to_string(),
            issues: Vec::new(),
            summary: (!summary.is_empty()).then_some(summary),
            last_output,
        }
    }

    pub fn failed(
        outcome: FlowOutcome,
        detail: String,
        issues: Vec<String>,
        last_output: Option<PathBuf>,
    ) -> Self {
        Self {
            outcome,
            detail,
            issues,
            summary: None,
            last_output,
        }
    }
}

/// First invocation keeps the bare label; retry N appends `-retryN`.
pub fn retry_label(base: &str, attempt: u32) -> String {
    if attempt <= 1 {
        base.to_string()
    } else {
        format!("{base}-retry{}", attempt - 1)
    }
}

/// Acceptance predicate: the subset of `deliverables` that does not exist
/// or is blank. Empty means accepted.
pub fn missing_deliverables(deliverables: &[PathBuf]) -> Vec<PathBuf> {
    deliverables
        .iter()
        .filter(|path| !file_has_text(path))
        .cloned()
        .collect()
}
