//! The per-item execution loop: executor attempts, the deliverable
//! acceptance check, and both review tiers with their retry budgets.
//!
//! Session continuity rules, per tier:
//! - executor: the session survives corrective re-prompts and is dropped
//!   after a transport failure
//! - reviewers: a parse failure keeps the (possibly new) session so the
//!   re-ask lands in the same conversation; a transport failure drops it
//! - the QA conversation starts fresh on every executor cycle and is
//!   resumed across follow-up rounds within one cycle

use std::path::PathBuf;

use anyhow::Result;

use crate::gateway::{AgentGateway, GatewayOutcome, InvocationRequest};
use crate::plan::{self, SequenceRule};
use crate::playbook::ValidationFocus;
use crate::roles::AttemptRole;
use crate::store::RunLedger;
use crate::ui::QueueUi;
use crate::util::rel_display;
use crate::verdict::{parse_verdict, NextActor, ReviewVerdict};

use super::prompts::{
    build_manager_prompt, build_missing_deliverables_prompt, build_qa_prompt, build_retry_prompt,
    format_issue_list, ManagerPromptArgs, QaPromptArgs,
};
use super::{
    missing_deliverables, retry_label, FlowOutcome, FlowReport, FlowRequest, RetryBudgets,
};

/// Drives one [`FlowRequest`] to a terminal [`FlowOutcome`].
///
/// Holds only borrowed infrastructure; the pipeline creates one per run and
/// reuses it for every stage and work item.
pub struct ExecutionFlow<'a> {
    gateway: &'a dyn AgentGateway,
    ledger: &'a RunLedger,
    ui: &'a QueueUi,
    workspace: PathBuf,
    backlog_path: PathBuf,
    budgets: RetryBudgets,
    manager_model: Option<String>,
}

/// What one reviewer batch produced.
enum Batch {
    /// A parseable verdict, with the invocation that carried it and the
    /// attempt number its transcript was filed under.
    Verdict {
        review: ReviewVerdict,
        outcome: GatewayOutcome,
        last_attempt: u32,
    },
    /// Budget spent without a verdict.
    Exhausted {
        detail: String,
        last_output: Option<PathBuf>,
    },
}

/// Parameters for one reviewer batch. Manager batches keep a fixed label
/// per cycle (internal retries overwrite the transcript); QA batches
/// advance the label with every invocation.
struct BatchPlan<'r> {
    role: AttemptRole,
    tier: &'static str,
    label_base: &'r str,
    start_attempt: u32,
    invocations: u32,
    advance_labels: bool,
    resume_session: Option<String>,
}

impl<'a> ExecutionFlow<'a> {
    pub fn new(
        gateway: &'a dyn AgentGateway,
        ledger: &'a RunLedger,
        ui: &'a QueueUi,
        workspace: impl Into<PathBuf>,
        backlog_path: impl Into<PathBuf>,
        budgets: RetryBudgets,
    ) -> Self {
        Self {
            gateway,
            ledger,
            ui,
            workspace: workspace.into(),
            backlog_path: backlog_path.into(),
            budgets,
            manager_model: None,
        }
    }

    /// Model override applied to both review tiers. The executor always
    /// runs on the gateway's configured model.
    pub fn with_manager_model(mut self, model: Option<String>) -> Self {
        self.manager_model = model;
        self
    }

    /// Run the request to a terminal outcome.
    ///
    /// Non-accepted outcomes are `Ok` reports; `Err` is reserved for
    /// infrastructure failures such as an unwritable ledger.
    pub async fn run(&self, request: &FlowRequest) -> Result<FlowReport> {
        let agent_budget = self.budgets.agent_retries + 1;
        let qa_budget = self.budgets.qa_retries + 1;
        let item_id = request.item.as_ref().map(|item| item.id.as_str());
        let qa_ctx = if request.enable_qa {
            request.item.as_ref().zip(request.qa_label.as_deref())
        } else {
            None
        };

        let mut prompt_text = request.initial_prompt.clone();
        let mut agent_session: Option<String> = None;
        let mut issue_trail: Vec<String> = Vec::new();
        let mut last_output: Option<PathBuf> = None;

        for attempt in 1..=agent_budget {
            self.ui.start_attempt(attempt, agent_budget);
            self.ui.attempt_status("executing");

            let invocation = InvocationRequest {
                prompt: prompt_text.clone(),
                label: retry_label(&request.agent_label, attempt),
                role: AttemptRole::Agent,
                resume_session: agent_session.clone(),
                model_override: None,
            };
            let agent_outcome = match self.gateway.invoke(invocation).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    if attempt == agent_budget {
                        self.ui.attempt_failed(attempt, "execution error");
                        return Ok(FlowReport::failed(
                            FlowOutcome::AgentExhausted,
                            format!(
                                "Agent execution failed for {} after {attempt} attempt(s).",
                                request.agent_label
                            ),
                            issue_trail,
                            last_output,
                        ));
                    }
                    self.ui.warn(
                        "agent",
                        format!("execution error (attempt {attempt}/{agent_budget}): {err}; retrying"),
                    );
                    agent_session = None;
                    continue;
                }
            };
            self.ledger.record(
                AttemptRole::Agent,
                &request.prompt_name,
                &request.stage_key,
                &agent_outcome.label,
                attempt,
                &agent_outcome,
                item_id,
            )?;
            agent_session = agent_outcome.session.clone();
            last_output = Some(agent_outcome.reply_path.clone());

            let missing = missing_deliverables(&request.deliverables);
            if !missing.is_empty() {
                let listed = missing
                    .iter()
                    .map(|path| rel_display(path, &self.workspace))
                    .collect::<Vec<_>>()
                    .join(", ");
                self.ui.warn(
                    "agent",
                    format!("deliverables missing after attempt {attempt}: {listed}; requesting the files"),
                );
                if agent_session.is_none() {
                    self.ui
                        .warn("agent", "session id unavailable; follow-up starts a new conversation");
                }
                self.ui.attempt_failed(attempt, "deliverables missing");
                prompt_text = build_missing_deliverables_prompt(
                    &request.initial_prompt,
                    &missing,
                    &self.workspace,
                );
                continue;
            }

            // Secondary review. qa_used counts invocations consumed out of
            // the per-cycle budget; follow-up rounds spend the remainder.
            let mut qa_review: Option<ReviewVerdict> = None;
            let mut qa_session: Option<String> = None;
            let mut qa_used: u32 = 0;
            if let Some((item, qa_label)) = qa_ctx {
                self.ui.attempt_status("qa review");
                let report = item.report_path();
                let qa_prompt = build_qa_prompt(&QaPromptArgs {
                    item,
                    report_path: &report,
                    agent_prompt: &request.initial_prompt,
                    context_notes: None,
                    workspace: &self.workspace,
                });
                let plan = BatchPlan {
                    role: AttemptRole::Qa,
                    tier: "QA validation",
                    label_base: qa_label,
                    start_attempt: 1,
                    invocations: qa_budget,
                    advance_labels: true,
                    resume_session: None,
                };
                match self.review_batch(request, plan, &qa_prompt).await? {
                    Batch::Verdict {
                        review,
                        outcome,
                        last_attempt,
                    } => {
                        qa_used = last_attempt;
                        qa_session = outcome.session.clone();
                        last_output = Some(outcome.reply_path.clone());
                        if review.status.is_pass() {
                            qa_review = Some(review);
                        } else {
                            self.ui.warn(
                                "qa",
                                format!(
                                    "validation failed for {qa_label}; issues: {}",
                                    summarize_issues(&review.issues)
                                ),
                            );
                            issue_trail.extend(review.issues.iter().cloned());
                            if agent_session.is_none() {
                                self.ui.warn(
                                    "agent",
                                    "session id unavailable; retry starts a new conversation",
                                );
                            }
                            self.ui.attempt_failed(attempt, "qa rejected");
                            prompt_text =
                                build_retry_prompt(&request.initial_prompt, &review.issues);
                            continue;
                        }
                    }
                    Batch::Exhausted {
                        detail,
                        last_output: batch_output,
                    } => {
                        self.ui.attempt_failed(attempt, "qa unresolved");
                        return Ok(FlowReport::failed(
                            FlowOutcome::QaUnresolved,
                            detail,
                            issue_trail,
                            batch_output.or(last_output),
                        ));
                    }
                }
            }

            let mut manager_attempt: u32 = 1;
            let mut manager_session: Option<String> = None;
            let mut current_qa = qa_review;

            loop {
                self.ui.attempt_status("manager review");
                let report_ref = request
                    .item
                    .as_ref()
                    .map(|item| item.report_path())
                    .filter(|path| path.exists());
                let manager_prompt = build_manager_prompt(&ManagerPromptArgs {
                    deliverables: &request.deliverables,
                    original_instructions: &request.initial_prompt,
                    focus: request.focus,
                    item: request.item.as_ref(),
                    qa_review: current_qa.as_ref(),
                    qa_report_path: report_ref.as_deref(),
                    workspace: &self.workspace,
                });
                let plan = BatchPlan {
                    role: AttemptRole::Manager,
                    tier: "Manager validation",
                    label_base: &request.manager_label,
                    start_attempt: manager_attempt,
                    invocations: self.budgets.manager_retries + 1,
                    advance_labels: false,
                    resume_session: manager_session.clone(),
                };
                let (review, manager_outcome) =
                    match self.review_batch(request, plan, &manager_prompt).await? {
                        Batch::Verdict {
                            review, outcome, ..
                        } => (review, outcome),
                        Batch::Exhausted {
                            detail,
                            last_output: batch_output,
                        } => {
                            self.ui.attempt_failed(attempt, "manager unresolved");
                            return Ok(FlowReport::failed(
                                FlowOutcome::ManagerUnresolved,
                                detail,
                                issue_trail,
                                batch_output.or(last_output),
                            ));
                        }
                    };
                manager_session = manager_outcome.session.clone();
                last_output = Some(manager_outcome.reply_path.clone());

                if review.status.is_pass() {
                    if request.focus == ValidationFocus::Backlog {
                        if let Some(violation) = self.backlog_violation() {
                            self.ui.warn("planner", &violation);
                            issue_trail.push(violation.clone());
                            if agent_session.is_none() {
                                self.ui.warn(
                                    "agent",
                                    "session id unavailable; retry starts a new conversation",
                                );
                            }
                            self.ui.attempt_failed(attempt, "backlog invalid");
                            prompt_text = build_retry_prompt(
                                &request.initial_prompt,
                                std::slice::from_ref(&violation),
                            );
                            break;
                        }
                    }
                    self.ui.review(format!(
                        "validation passed for {} (attempt {manager_attempt}): {}",
                        request.manager_label, review.summary
                    ));
                    self.ui.attempt_accepted(attempt);
                    return Ok(FlowReport::accepted(review.summary, last_output));
                }

                let mut issues = review.issues.clone();
                issue_trail.extend(issues.iter().cloned());
                if review.next_actor.is_none() && qa_ctx.is_some() {
                    tracing::warn!(
                        label = %request.manager_label,
                        "manager verdict omitted next_actor; routing to the agent"
                    );
                }
                let next = review.next_actor.unwrap_or(NextActor::Agent);

                if manager_attempt > self.budgets.manager_retries {
                    self.ui.attempt_failed(attempt, "manager budget exhausted");
                    return Ok(FlowReport::failed(
                        FlowOutcome::ManagerExhausted,
                        format!(
                            "Manager validation failed for {} after {manager_attempt} attempt(s). Issues: {}",
                            request.manager_label,
                            summarize_issues(&issues)
                        ),
                        issue_trail,
                        last_output,
                    ));
                }

                self.ui.warn(
                    "manager",
                    format!(
                        "validation failed for {} (attempt {manager_attempt}); next actor: {}; issues: {}",
                        request.manager_label,
                        next_actor_word(next),
                        summarize_issues(&issues)
                    ),
                );

                if next == NextActor::Qa {
                    if let Some((item, qa_label)) = qa_ctx {
                        let remaining = qa_budget.saturating_sub(qa_used);
                        if remaining == 0 {
                            self.ui.warn(
                                "qa",
                                "review budget exhausted; routing issues back to the agent",
                            );
                        } else {
                            self.ui.attempt_status("qa follow-up");
                            let report = item.report_path();
                            let notes = format_issue_list(&issues);
                            let qa_prompt = build_qa_prompt(&QaPromptArgs {
                                item,
                                report_path: &report,
                                agent_prompt: &request.initial_prompt,
                                context_notes: Some(&notes),
                                workspace: &self.workspace,
                            });
                            let plan = BatchPlan {
                                role: AttemptRole::Qa,
                                tier: "QA validation",
                                label_base: qa_label,
                                start_attempt: qa_used + 1,
                                invocations: remaining,
                                advance_labels: true,
                                resume_session: qa_session.clone(),
                            };
                            match self.review_batch(request, plan, &qa_prompt).await? {
                                Batch::Verdict {
                                    review: follow_up,
                                    outcome,
                                    last_attempt,
                                } => {
                                    qa_used = last_attempt;
                                    qa_session = outcome.session.clone();
                                    last_output = Some(outcome.reply_path.clone());
                                    if follow_up.status.is_pass() {
                                        current_qa = Some(follow_up);
                                        manager_attempt += 1;
                                        continue;
                                    }
                                    // The follow-up's own findings supersede
                                    // the manager's when it gave any.
                                    if !follow_up.issues.is_empty() {
                                        issues = follow_up.issues.clone();
                                    }
                                    issue_trail.extend(follow_up.issues.iter().cloned());
                                    self.ui.warn(
                                        "qa",
                                        format!(
                                            "follow-up failed for {qa_label}; issues: {}",
                                            summarize_issues(&issues)
                                        ),
                                    );
                                }
                                Batch::Exhausted {
                                    detail,
                                    last_output: batch_output,
                                } => {
                                    self.ui.attempt_failed(attempt, "qa unresolved");
                                    return Ok(FlowReport::failed(
                                        FlowOutcome::QaUnresolved,
                                        detail,
                                        issue_trail,
                                        batch_output.or(last_output),
                                    ));
                                }
                            }
                        }
                    }
                }

                if agent_session.is_none() {
                    self.ui
                        .warn("agent", "session id unavailable; retry starts a new conversation");
                }
                self.ui.attempt_failed(attempt, "sent back to the agent");
                prompt_text = build_retry_prompt(&request.initial_prompt, &issues);
                break;
            }
        }

        // A corrective cycle spent the last executor attempt.
        Ok(FlowReport::failed(
            FlowOutcome::AgentExhausted,
            format!(
                "Agent attempts exhausted for {} after {agent_budget} cycle(s) without acceptance.",
                request.agent_label
            ),
            issue_trail,
            last_output,
        ))
    }

    /// One reviewer batch: invoke until a parseable verdict lands or the
    /// invocation budget is spent. Transport failures drop the session;
    /// parse failures keep the session returned by the bad invocation so
    /// the re-ask stays in the same conversation.
    async fn review_batch(
        &self,
        request: &FlowRequest,
        plan: BatchPlan<'_>,
        prompt: &str,
    ) -> Result<Batch> {
        let item_id = request.item.as_ref().map(|item| item.id.as_str());
        let mut session = plan.resume_session;
        let mut last_bad_reply: Option<PathBuf> = None;
        let mut last_output: Option<PathBuf> = None;
        let mut current_attempt = plan.start_attempt;

        for index in 0..plan.invocations {
            current_attempt = if plan.advance_labels {
                plan.start_attempt + index
            } else {
                plan.start_attempt
            };
            let tried = index + 1;
            let invocation = InvocationRequest {
                prompt: prompt.to_string(),
                label: retry_label(plan.label_base, current_attempt),
                role: plan.role,
                resume_session: session.clone(),
                model_override: self.manager_model.clone(),
            };
            let outcome = match self.gateway.invoke(invocation).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    self.ui.warn(
                        plan.role.as_str(),
                        format!(
                            "execution error for {} (attempt {current_attempt}, try {tried}/{}): {err}",
                            plan.label_base, plan.invocations
                        ),
                    );
                    session = None;
                    last_bad_reply = None;
                    continue;
                }
            };
            self.ledger.record(
                plan.role,
                &request.prompt_name,
                &request.stage_key,
                &outcome.label,
                current_attempt,
                &outcome,
                item_id,
            )?;
            last_output = Some(outcome.reply_path.clone());

            match parse_verdict(&outcome.reply, &outcome.reply_path, plan.role) {
                Ok(review) => {
                    return Ok(Batch::Verdict {
                        review,
                        outcome,
                        last_attempt: current_attempt,
                    });
                }
                Err(err) => {
                    self.ui.warn(
                        plan.role.as_str(),
                        format!(
                            "non-JSON response for {} (attempt {current_attempt}, try {tried}/{}); raw output saved at {}",
                            plan.label_base,
                            plan.invocations,
                            rel_display(err.raw_path(), &self.workspace)
                        ),
                    );
                    last_bad_reply = Some(err.raw_path().to_path_buf());
                    session = outcome.session.clone();
                }
            }
        }

        // The last failure kind decides how the exhaustion reads.
        let detail = match &last_bad_reply {
            Some(path) => format!(
                "{} never produced valid JSON for {} (attempt {current_attempt}). See {} for the last response.",
                plan.tier,
                plan.label_base,
                rel_display(path, &self.workspace)
            ),
            None => format!(
                "{} failed for {} on attempt {current_attempt} after {} execution error(s).",
                plan.tier, plan.label_base, plan.invocations
            ),
        };
        Ok(Batch::Exhausted {
            detail,
            last_output,
        })
    }

    /// Post-acceptance gate for backlog deliverables: the manifest must
    /// still load and order. A reviewer pass does not outrank a manifest
    /// the scheduler rejects.
    fn backlog_violation(&self) -> Option<String> {
        match plan::schedule(&self.backlog_path, SequenceRule::Chronological) {
            Ok(_) => None,
            Err(err) => Some(format!("Backlog validation failed: {err}")),
        }
    }
}

fn next_actor_word(next: NextActor) -> &'static str {
    match next {
        NextActor::Agent => "agent",
        NextActor::Qa => "qa",
    }
}

fn summarize_issues(issues: &[String]) -> String {
    if issues.is_empty() {
        "none provided".to_string()
    } else {
        issues.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::ItemContext;
    use crate::gateway::testing::ScriptedGateway;
    use serde_json::json;
    use std::fs;
    use std::path::Path;

    const PASS: &str = r#"{"status":"pass","issues":[],"summary":"looks good"}"#;
    const QA_PASS: &str =
        r#"{"status":"pass","issues":[],"summary":"verified","tests":["cargo test: pass"]}"#;

    fn fail(issues: &[&str], next_actor: Option<&str>) -> String {
        let mut value = json!({
            "status": "fail",
            "issues": issues,
            "summary": "needs work",
        });
        if let Some(actor) = next_actor {
            value["next_actor"] = json!(actor);
        }
        value.to_string()
    }

    struct Rig {
        dir: tempfile::TempDir,
        gateway: ScriptedGateway,
        ledger: RunLedger,
        ui: QueueUi,
    }

    impl Rig {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let gateway = ScriptedGateway::new(dir.path().join("artifacts"));
            let ledger = RunLedger::new(
                dir.path(),
                dir.path().join(".foreman/conversations.jsonl"),
                dir.path().join(".foreman/sessions"),
            );
            Self {
                dir,
                gateway,
                ledger,
                ui: QueueUi::hidden(),
            }
        }

        fn flow(&self, budgets: RetryBudgets) -> ExecutionFlow<'_> {
            ExecutionFlow::new(
                &self.gateway,
                &self.ledger,
                &self.ui,
                self.dir.path(),
                self.dir.path().join("artifacts/backlog.json"),
                budgets,
            )
        }

        fn workspace(&self) -> &Path {
            self.dir.path()
        }
    }

    fn stage_request() -> FlowRequest {
        FlowRequest {
            prompt_name: "Researcher".to_string(),
            stage_key: "researcher".to_string(),
            focus: ValidationFocus::Generic,
            enable_qa: false,
            deliverables: Vec::new(),
            initial_prompt: "Research the market.".to_string(),
            agent_label: "stage/agent".to_string(),
            manager_label: "stage/manager".to_string(),
            qa_label: None,
            item: None,
        }
    }

    fn item_request(rig: &Rig) -> FlowRequest {
        let dir = rig.workspace().join(".foreman/tasks/t-001");
        fs::create_dir_all(&dir).unwrap();
        FlowRequest {
            prompt_name: "Module Developer".to_string(),
            stage_key: "module_developer".to_string(),
            focus: ValidationFocus::Execution,
            enable_qa: true,
            deliverables: Vec::new(),
            initial_prompt: "Implement T-001.".to_string(),
            agent_label: "tasks/t-001/agent".to_string(),
            manager_label: "tasks/t-001/manager".to_string(),
            qa_label: Some("tasks/t-001/qa".to_string()),
            item: Some(ItemContext {
                id: "T-001".to_string(),
                source: rig.workspace().join("artifacts/backlog.json"),
                dir,
            }),
        }
    }

    #[tokio::test]
    async fn accepts_on_first_attempt_with_manager_pass() {
        let rig = Rig::new();
        rig.gateway.push_reply("done", Some("sess-a"));
        rig.gateway.push_reply(PASS, Some("sess-m"));

        let flow = rig.flow(RetryBudgets::default());
        let report = flow.run(&stage_request()).await.unwrap();

        assert!(report.outcome.is_accepted());
        assert_eq!(report.summary.as_deref(), Some("looks good"));
        let calls = rig.gateway.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].label, "stage/agent");
        assert_eq!(calls[0].role, AttemptRole::Agent);
        assert_eq!(calls[1].label, "stage/manager");
        assert_eq!(calls[1].role, AttemptRole::Manager);
        assert_eq!(rig.ledger.entries().unwrap().len(), 2);
        assert_eq!(rig.gateway.remaining_steps(), 0);
    }

    #[tokio::test]
    async fn missing_deliverables_trigger_targeted_reprompt() {
        let rig = Rig::new();
        let deliverable = rig.workspace().join("artifacts/research.md");
        rig.gateway.push_reply("claimed done", Some("sess-a"));
        rig.gateway.push_reply_with_writes(
            "actually done",
            Some("sess-a"),
            vec![(deliverable.clone(), "# Research\nfindings\n".to_string())],
        );
        rig.gateway.push_reply(PASS, None);

        let mut request = stage_request();
        request.deliverables = vec![deliverable];
        let flow = rig.flow(RetryBudgets::default());
        let report = flow.run(&request).await.unwrap();

        assert!(report.outcome.is_accepted());
        let calls = rig.gateway.calls();
        assert_eq!(calls[1].label, "stage/agent-retry1");
        assert!(calls[1].prompt.contains("missing or empty"));
        assert!(calls[1].prompt.contains("artifacts/research.md"));
        assert!(calls[1].prompt.ends_with("Research the market."));
        // The follow-up resumes the same executor conversation.
        assert_eq!(calls[1].resume_session.as_deref(), Some("sess-a"));
    }

    #[tokio::test]
    async fn manager_fail_routes_back_to_agent_with_retry_prompt() {
        let rig = Rig::new();
        rig.gateway.push_reply("v1", Some("sess-a"));
        rig.gateway.push_reply(&fail(&["tests missing"], None), Some("sess-m"));
        rig.gateway.push_reply("v2", Some("sess-a"));
        rig.gateway.push_reply(PASS, Some("sess-m2"));

        let flow = rig.flow(RetryBudgets::default());
        let report = flow.run(&stage_request()).await.unwrap();

        assert!(report.outcome.is_accepted());
        let calls = rig.gateway.calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[2].label, "stage/agent-retry1");
        assert!(calls[2]
            .prompt
            .starts_with("The quality assurance manager reported the following issues:"));
        assert!(calls[2].prompt.contains("- tests missing"));
        assert_eq!(calls[2].resume_session.as_deref(), Some("sess-a"));
        // Fresh manager conversation per executor cycle, same label.
        assert_eq!(calls[3].label, "stage/manager");
        assert_eq!(calls[3].resume_session, None);
    }

    #[tokio::test]
    async fn qa_gate_runs_before_manager_and_blocks_on_fail() {
        let rig = Rig::new();
        let request = item_request(&rig);
        rig.gateway.push_reply("built", Some("sess-a"));
        rig.gateway.push_reply(&fail(&["edge case unhandled"], None), Some("sess-q"));
        rig.gateway.push_reply("fixed", Some("sess-a"));
        rig.gateway.push_reply(QA_PASS, Some("sess-q2"));
        rig.gateway.push_reply(PASS, Some("sess-m"));

        let flow = rig.flow(RetryBudgets::default());
        let report = flow.run(&request).await.unwrap();

        assert!(report.outcome.is_accepted());
        let calls = rig.gateway.calls();
        let roles: Vec<AttemptRole> = calls.iter().map(|call| call.role).collect();
        assert_eq!(
            roles,
            vec![
                AttemptRole::Agent,
                AttemptRole::Qa,
                AttemptRole::Agent,
                AttemptRole::Qa,
                AttemptRole::Manager,
            ]
        );
        // QA starts a fresh conversation on each executor cycle.
        assert_eq!(calls[3].label, "tasks/t-001/qa");
        assert_eq!(calls[3].resume_session, None);
        assert!(calls[2].prompt.contains("- edge case unhandled"));
        // The manager sees the passing QA verdict.
        assert!(calls[4].prompt.contains("Latest QA Review:"));
        assert!(calls[4].prompt.contains("- Status: pass"));
    }

    #[tokio::test]
    async fn manager_routes_to_qa_follow_up_and_accepts_after_qa_pass() {
        let rig = Rig::new();
        let request = item_request(&rig);
        rig.gateway.push_reply("built", Some("sess-a"));
        rig.gateway.push_reply(QA_PASS, Some("sess-q"));
        rig.gateway
            .push_reply(&fail(&["rerun the e2e suite"], Some("qa")), Some("sess-m"));
        rig.gateway.push_reply(QA_PASS, Some("sess-q"));
        rig.gateway.push_reply(PASS, Some("sess-m"));

        let flow = rig.flow(RetryBudgets::default());
        let report = flow.run(&request).await.unwrap();

        assert!(report.outcome.is_accepted());
        let calls = rig.gateway.calls();
        assert_eq!(calls.len(), 5);
        // Follow-up QA advances the label and resumes the QA conversation.
        assert_eq!(calls[3].label, "tasks/t-001/qa-retry1");
        assert_eq!(calls[3].resume_session.as_deref(), Some("sess-q"));
        assert!(calls[3]
            .prompt
            .contains("Additional focus areas from management:\n- rerun the e2e suite"));
        // Second manager round resumes the manager conversation.
        assert_eq!(calls[4].label, "tasks/t-001/manager-retry1");
        assert_eq!(calls[4].resume_session.as_deref(), Some("sess-m"));
    }

    #[tokio::test]
    async fn qa_follow_up_fail_reroutes_to_agent_with_qa_issues() {
        let rig = Rig::new();
        let request = item_request(&rig);
        rig.gateway.push_reply("built", Some("sess-a"));
        rig.gateway.push_reply(QA_PASS, Some("sess-q"));
        rig.gateway
            .push_reply(&fail(&["manager doubt"], Some("qa")), Some("sess-m"));
        rig.gateway
            .push_reply(&fail(&["migration never ran"], None), Some("sess-q"));
        rig.gateway.push_reply("fixed", Some("sess-a"));
        rig.gateway.push_reply(QA_PASS, Some("sess-q2"));
        rig.gateway.push_reply(PASS, Some("sess-m2"));

        let flow = rig.flow(RetryBudgets::default());
        let report = flow.run(&request).await.unwrap();

        assert!(report.outcome.is_accepted());
        let calls = rig.gateway.calls();
        assert_eq!(calls[4].label, "tasks/t-001/agent-retry1");
        // The QA follow-up's findings replace the manager's.
        assert!(calls[4].prompt.contains("- migration never ran"));
        assert!(!calls[4].prompt.contains("manager doubt"));
        assert!(report.issues.is_empty());
    }

    #[tokio::test]
    async fn transport_failures_consume_agent_budget() {
        let rig = Rig::new();
        rig.gateway.push_transport_failure(1);
        rig.gateway.push_transport_failure(1);

        let flow = rig.flow(RetryBudgets {
            agent_retries: 1,
            manager_retries: 5,
            qa_retries: 5,
        });
        let report = flow.run(&stage_request()).await.unwrap();

        assert_eq!(report.outcome, FlowOutcome::AgentExhausted);
        assert_eq!(
            report.detail,
            "Agent execution failed for stage/agent after 2 attempt(s)."
        );
        let calls = rig.gateway.calls();
        assert_eq!(calls.len(), 2);
        // The session does not survive a transport failure.
        assert_eq!(calls[1].resume_session, None);
        assert!(rig.ledger.entries().unwrap().is_empty());
    }

    #[tokio::test]
    async fn manager_parse_garbage_keeps_session_then_exhausts() {
        let rig = Rig::new();
        rig.gateway.push_reply("done", Some("sess-a"));
        rig.gateway.push_reply("no json here", Some("m-1"));
        rig.gateway.push_reply("still prose", Some("m-2"));

        let flow = rig.flow(RetryBudgets {
            agent_retries: 10,
            manager_retries: 1,
            qa_retries: 5,
        });
        let report = flow.run(&stage_request()).await.unwrap();

        assert_eq!(report.outcome, FlowOutcome::ManagerUnresolved);
        assert!(report
            .detail
            .contains("Manager validation never produced valid JSON for stage/manager (attempt 1)"));
        assert!(report.detail.contains("artifacts/stage/manager.txt"));
        let calls = rig.gateway.calls();
        assert_eq!(calls.len(), 3);
        // Re-ask lands in the conversation the bad reply opened, under the
        // same label.
        assert_eq!(calls[2].label, "stage/manager");
        assert_eq!(calls[2].resume_session.as_deref(), Some("m-1"));
        // Parse-failed invocations still reach the ledger.
        assert_eq!(rig.ledger.entries().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn manager_keeps_failing_past_cycle_budget() {
        let rig = Rig::new();
        let request = item_request(&rig);
        rig.gateway.push_reply("built", Some("sess-a"));
        rig.gateway.push_reply(QA_PASS, Some("sess-q"));
        rig.gateway
            .push_reply(&fail(&["first doubt"], Some("qa")), Some("sess-m"));
        rig.gateway.push_reply(QA_PASS, Some("sess-q"));
        rig.gateway
            .push_reply(&fail(&["second doubt"], Some("qa")), Some("sess-m"));

        let flow = rig.flow(RetryBudgets {
            agent_retries: 10,
            manager_retries: 1,
            qa_retries: 5,
        });
        let report = flow.run(&request).await.unwrap();

        assert_eq!(report.outcome, FlowOutcome::ManagerExhausted);
        assert_eq!(
            report.detail,
            "Manager validation failed for tasks/t-001/manager after 2 attempt(s). Issues: second doubt"
        );
        assert_eq!(
            report.issues,
            vec!["first doubt".to_string(), "second doubt".to_string()]
        );
    }

    #[tokio::test]
    async fn qa_budget_is_shared_across_follow_ups_within_a_cycle() {
        let rig = Rig::new();
        let request = item_request(&rig);
        // Cycle 1: the lone QA invocation is spent by the gate, so the
        // manager's QA routing must fall back to the agent.
        rig.gateway.push_reply("built", Some("sess-a"));
        rig.gateway.push_reply(QA_PASS, Some("sess-q"));
        rig.gateway
            .push_reply(&fail(&["needs another look"], Some("qa")), Some("sess-m"));
        // Cycle 2: budget is fresh again.
        rig.gateway.push_reply("rebuilt", Some("sess-a"));
        rig.gateway.push_reply(QA_PASS, Some("sess-q2"));
        rig.gateway.push_reply(PASS, Some("sess-m2"));

        let flow = rig.flow(RetryBudgets {
            agent_retries: 10,
            manager_retries: 5,
            qa_retries: 0,
        });
        let report = flow.run(&request).await.unwrap();

        assert!(report.outcome.is_accepted());
        let calls = rig.gateway.calls();
        assert_eq!(calls.len(), 6);
        // No QA call between the manager fail and the agent retry.
        assert_eq!(calls[3].role, AttemptRole::Agent);
        assert_eq!(calls[3].label, "tasks/t-001/agent-retry1");
        assert!(calls[3].prompt.contains("- needs another look"));
        assert_eq!(calls[4].role, AttemptRole::Qa);
        assert_eq!(calls[4].label, "tasks/t-001/qa");
    }

    #[tokio::test]
    async fn backlog_focus_pass_is_vetoed_by_schedule_errors() {
        let rig = Rig::new();
        let backlog = rig.workspace().join("artifacts/backlog.json");
        fs::create_dir_all(backlog.parent().unwrap()).unwrap();
        fs::write(
            &backlog,
            r#"{"tasks": [{"id": "T-001"}, {"id": "T-003"}]}"#,
        )
        .unwrap();

        let mut request = stage_request();
        request.prompt_name = "Planner".to_string();
        request.stage_key = "planner".to_string();
        request.focus = ValidationFocus::Backlog;
        request.agent_label = "prompts/prompt5/agent".to_string();
        request.manager_label = "prompts/prompt5/manager".to_string();

        rig.gateway.push_reply("planned", Some("sess-a"));
        rig.gateway.push_reply(PASS, Some("sess-m"));
        rig.gateway.push_reply_with_writes(
            "replanned",
            Some("sess-a"),
            vec![(
                backlog.clone(),
                r#"{"tasks": [{"id": "T-001"}, {"id": "T-002"}]}"#.to_string(),
            )],
        );
        rig.gateway.push_reply(PASS, Some("sess-m"));

        let flow = rig.flow(RetryBudgets::default());
        let report = flow.run(&request).await.unwrap();

        assert!(report.outcome.is_accepted());
        let calls = rig.gateway.calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[2].label, "prompts/prompt5/agent-retry1");
        assert!(calls[2].prompt.contains("Backlog validation failed:"));
        assert!(calls[2].prompt.contains("chronological order"));
    }

    #[tokio::test]
    async fn corrective_cycles_exhaust_to_agent_exhausted() {
        let rig = Rig::new();
        rig.gateway.push_reply("done", Some("sess-a"));
        rig.gateway.push_reply(&fail(&["never enough"], None), Some("sess-m"));

        let flow = rig.flow(RetryBudgets {
            agent_retries: 0,
            manager_retries: 5,
            qa_retries: 5,
        });
        let report = flow.run(&stage_request()).await.unwrap();

        assert_eq!(report.outcome, FlowOutcome::AgentExhausted);
        assert_eq!(
            report.detail,
            "Agent attempts exhausted for stage/agent after 1 cycle(s) without acceptance."
        );
        assert_eq!(report.issues, vec!["never enough".to_string()]);
        assert_eq!(rig.gateway.calls().len(), 2);
    }

    #[tokio::test]
    async fn manager_model_override_applies_to_review_tiers_only() {
        let rig = Rig::new();
        let request = item_request(&rig);
        rig.gateway.push_reply("built", Some("sess-a"));
        rig.gateway.push_reply(QA_PASS, Some("sess-q"));
        rig.gateway.push_reply(PASS, Some("sess-m"));

        let flow = rig
            .flow(RetryBudgets::default())
            .with_manager_model(Some("gpt-5".to_string()));
        let report = flow.run(&request).await.unwrap();

        assert!(report.outcome.is_accepted());
        let calls = rig.gateway.calls();
        assert_eq!(calls[0].model_override, None);
        assert_eq!(calls[1].model_override.as_deref(), Some("gpt-5"));
        assert_eq!(calls[2].model_override.as_deref(), Some("gpt-5"));
    }

    #[tokio::test]
    async fn qa_transport_errors_retry_under_advancing_labels() {
        let rig = Rig::new();
        let request = item_request(&rig);
        rig.gateway.push_reply("built", Some("sess-a"));
        rig.gateway.push_transport_failure(70);
        rig.gateway.push_reply(QA_PASS, Some("sess-q"));
        rig.gateway.push_reply(PASS, Some("sess-m"));

        let flow = rig.flow(RetryBudgets::default());
        let report = flow.run(&request).await.unwrap();

        assert!(report.outcome.is_accepted());
        let calls = rig.gateway.calls();
        assert_eq!(calls[1].label, "tasks/t-001/qa");
        assert_eq!(calls[2].label, "tasks/t-001/qa-retry1");
        // Transport failure dropped the QA session.
        assert_eq!(calls[2].resume_session, None);
    }
}
