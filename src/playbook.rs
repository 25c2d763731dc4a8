//! Stage registry: the ordered primary chain, the supporting executor
//! profiles, and their prompt templates.
//!
//! Templates ship built in and can be replaced per stage by dropping a
//! `<key>.md` file into the prompts directory. `{{GUARDRAILS}}` in any
//! template is spliced with `global_guardrails.md` at load time, and each
//! spec's placeholder marker is substituted with the caller's context
//! payload at render time.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};

use crate::layout::Layout;
use crate::roles::RoleKind;

const GUARDRAILS_MARKER: &str = "{{GUARDRAILS}}";

/// Placeholder the intake stage fills with the operator's project idea.
pub const PROJECT_IDEA_MARKER: &str = "<<<PROJECT_IDEA>>>";

/// Selects the review rubric the primary reviewer applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationFocus {
    /// Work-item implementation review; the only focus that routes between
    /// executor and QA via `next_actor`.
    Execution,
    /// Scaffolding and environment tooling review.
    Infra,
    /// Backlog manifest review.
    Backlog,
    Generic,
}

/// One stage of the playbook: prompt template plus review policy.
#[derive(Debug, Clone)]
pub struct PromptSpec {
    pub number: u32,
    pub name: &'static str,
    pub key: &'static str,
    /// Absolute deliverable paths checked by the acceptance gate. Empty for
    /// profiles whose output location is item-specific.
    pub deliverables: Vec<PathBuf>,
    pub placeholder: Option<&'static str>,
    pub focus: ValidationFocus,
    /// Whether the secondary (QA) review tier applies to this profile.
    pub qa: bool,
    builtin: &'static str,
}

impl PromptSpec {
    /// Label root for a primary-chain invocation of this stage.
    pub fn chain_label(&self) -> String {
        format!("prompts/prompt{}", self.number)
    }

    /// Resolve the template text: prompts-dir override when present and
    /// non-blank, else the built-in; guardrails spliced either way.
    pub fn template(&self, prompts_dir: &Path) -> String {
        let override_path = prompts_dir.join(format!("{}.md", self.key));
        let base = fs::read_to_string(&override_path)
            .ok()
            .filter(|text| !text.trim().is_empty())
            .unwrap_or_else(|| self.builtin.to_string());

        let guardrails_path = prompts_dir.join("global_guardrails.md");
        let guardrails = fs::read_to_string(&guardrails_path)
            .map(|text| text.trim().to_string())
            .unwrap_or_default();

        base.trim().replace(GUARDRAILS_MARKER, &guardrails)
    }

    /// Template with the placeholder substituted. A spec that declares a
    /// placeholder refuses to render without context for it.
    pub fn render(&self, prompts_dir: &Path, context: &str) -> Result<String> {
        let mut text = self.template(prompts_dir);
        if let Some(placeholder) = self.placeholder {
            if context.is_empty() {
                bail!("{} prompt requires context for its placeholder", self.name);
            }
            text = text.replace(placeholder, context);
        }
        Ok(text)
    }
}

/// The full stage registry for one workspace.
pub struct Playbook {
    primary: Vec<PromptSpec>,
    supporting: Vec<PromptSpec>,
}

impl Playbook {
    pub fn standard(layout: &Layout) -> Self {
        let art = |name: &str| layout.artifacts_dir().join(name);
        let ws = |name: &str| layout.workspace().join(name);

        let primary = vec![
            PromptSpec {
                number: 0,
                name: "Intake PM",
                key: "intake_pm",
                deliverables: vec![art("prd.json"), art("prd.md")],
                placeholder: Some(PROJECT_IDEA_MARKER),
                focus: ValidationFocus::Generic,
                qa: false,
                builtin: INTAKE_PM,
            },
            PromptSpec {
                number: 1,
                name: "Researcher",
                key: "researcher",
                deliverables: vec![art("research.md"), art("research.json")],
                placeholder: None,
                focus: ValidationFocus::Generic,
                qa: false,
                builtin: RESEARCHER,
            },
            PromptSpec {
                number: 2,
                name: "Solution Architect",
                key: "solution_architect",
                deliverables: vec![art("architecture.md"), art("architecture.json")],
                placeholder: None,
                focus: ValidationFocus::Generic,
                qa: false,
                builtin: SOLUTION_ARCHITECT,
            },
            PromptSpec {
                number: 3,
                name: "API Designer",
                key: "api_designer",
                deliverables: vec![art("api.md"), art("openapi.yaml"), art("error_catalog.json")],
                placeholder: None,
                focus: ValidationFocus::Generic,
                qa: false,
                builtin: API_DESIGNER,
            },
            PromptSpec {
                number: 4,
                name: "UX Designer",
                key: "ux_designer",
                deliverables: vec![art("ux_flows.md"), art("route_map.json")],
                placeholder: None,
                focus: ValidationFocus::Generic,
                qa: false,
                builtin: UX_DESIGNER,
            },
            PromptSpec {
                number: 5,
                name: "Planner",
                key: "planner",
                deliverables: vec![layout.backlog_path().to_path_buf()],
                placeholder: None,
                focus: ValidationFocus::Backlog,
                qa: false,
                builtin: PLANNER,
            },
            PromptSpec {
                number: 6,
                name: "Scaffolder",
                key: "scaffolder",
                deliverables: vec![
                    ws("devops/start-dev.sh"),
                    ws("devops/stop-dev.sh"),
                    ws("devops/start-e2e.sh"),
                    ws("devops/stop-e2e.sh"),
                    ws("devops/logs.sh"),
                    ws("docker-compose.dev.yml"),
                    ws(".env.example"),
                    ws("frontend/package.json"),
                    ws("backend/package.json"),
                ],
                placeholder: None,
                focus: ValidationFocus::Infra,
                qa: false,
                builtin: SCAFFOLDER,
            },
        ];

        let task = |number: u32, name: &'static str, key: &'static str, builtin: &'static str| {
            PromptSpec {
                number,
                name,
                key,
                deliverables: Vec::new(),
                placeholder: Some("<<<TASK_JSON>>>"),
                focus: ValidationFocus::Generic,
                qa: false,
                builtin,
            }
        };
        let stage = |number: u32,
                     name: &'static str,
                     key: &'static str,
                     placeholder: &'static str,
                     builtin: &'static str| {
            PromptSpec {
                number,
                name,
                key,
                deliverables: Vec::new(),
                placeholder: Some(placeholder),
                focus: ValidationFocus::Generic,
                qa: false,
                builtin,
            }
        };

        let supporting = vec![
            PromptSpec {
                focus: ValidationFocus::Execution,
                qa: true,
                ..task(20, "Module Developer", "module_developer", MODULE_DEVELOPER)
            },
            task(21, "Test Engineer", "test_engineer", TEST_ENGINEER),
            task(22, "Code Reviewer", "code_reviewer", CODE_REVIEWER),
            task(23, "Security & Compliance", "security", SECURITY),
            task(24, "Performance & Resilience", "perf", PERF),
            task(25, "Release", "release", RELEASE),
            task(26, "Documentation Writer", "doc_writer", DOC_WRITER),
            task(27, "Meta-Grader", "meta_grader", META_GRADER),
            task(28, "Scaffolder Support", "scaffolder_support", SCAFFOLDER_SUPPORT),
            task(29, "Playwright Runner", "playwright_runner", PLAYWRIGHT_RUNNER),
            stage(30, "Bug Intake", "bug_intake", "<<<BUG_REPORT>>>", BUG_INTAKE),
            stage(31, "Bug Triage", "bug_triage", "<<<BUG_CONTEXT>>>", BUG_TRIAGE),
            stage(32, "Bug Reproduction", "bug_repro", "<<<BUG_CONTEXT>>>", BUG_REPRO),
            stage(33, "Feedback Intake", "feedback_intake", "<<<FEEDBACK_REPORT>>>", FEEDBACK_INTAKE),
            stage(34, "Feedback Review", "feedback_review", "<<<FEEDBACK_CONTEXT>>>", FEEDBACK_REVIEW),
            stage(35, "Feedback Planning", "feedback_plan", "<<<FEEDBACK_CONTEXT>>>", FEEDBACK_PLAN),
        ];

        Self {
            primary,
            supporting,
        }
    }

    /// Ordered primary chain (intake through scaffolder).
    pub fn primary(&self) -> &[PromptSpec] {
        &self.primary
    }

    /// Supporting profile for an executor role, when registered.
    pub fn supporting(&self, kind: RoleKind) -> Option<&PromptSpec> {
        self.supporting.iter().find(|spec| spec.key == kind.key())
    }
}

const INTAKE_PM: &str = r#"You are the intake product manager. Turn the raw project idea below into a
product requirements document for this repository.

Project idea:
<<<PROJECT_IDEA>>>

Deliverables:
- artifacts/prd.md: the full PRD covering problem statement, personas,
  scope and explicit non-scope, user stories with acceptance criteria,
  milestones, and success metrics.
- artifacts/prd.json: the same content as structured JSON with keys
  `product`, `personas`, `stories`, `milestones`, and `metrics`.

Write both files directly into the repository. No placeholder sections.

{{GUARDRAILS}}"#;

const RESEARCHER: &str = r#"You are the domain researcher. Read artifacts/prd.md and artifacts/prd.json
and survey the technical landscape for this product.

Deliverables:
- artifacts/research.md: prior art, comparable products, integration
  options, notable risks, and recommended approaches.
- artifacts/research.json: machine-readable summary with keys `findings`,
  `risks`, and `recommendations`.

Tie every recommendation back to a PRD requirement. Write the files
directly into the repository.

{{GUARDRAILS}}"#;

const SOLUTION_ARCHITECT: &str = r#"You are the solution architect. Read the PRD and research artifacts and
design the system.

Deliverables:
- artifacts/architecture.md: component breakdown, data flow, storage and
  deployment model, and the reasoning behind each technology choice.
- artifacts/architecture.json: structured form with keys `components`,
  `data_stores`, `integrations`, and `tech_choices`.

Stay within the scope the PRD defines. Write the files directly into the
repository.

{{GUARDRAILS}}"#;

const API_DESIGNER: &str = r#"You are the API designer. Read the PRD and architecture artifacts and
specify the service interface.

Deliverables:
- artifacts/api.md: endpoint catalogue with request/response examples and
  auth requirements.
- artifacts/openapi.yaml: a valid OpenAPI 3 document for every endpoint in
  api.md.
- artifacts/error_catalog.json: stable error codes with HTTP status,
  message template, and remediation hint.

Keep the three files consistent with each other. Write them directly into
the repository.

{{GUARDRAILS}}"#;

const UX_DESIGNER: &str = r#"You are the UX designer. Read the PRD and API artifacts and map the user
experience.

Deliverables:
- artifacts/ux_flows.md: the primary user journeys screen by screen,
  including empty, loading, and error states.
- artifacts/route_map.json: frontend route tree with the API calls each
  route depends on.

Every flow must be reachable from the route map. Write the files directly
into the repository.

{{GUARDRAILS}}"#;

const PLANNER: &str = r#"You are the delivery planner. Read all artifacts under artifacts/ and break
the build into an ordered backlog.

Deliverable: artifacts/backlog.json with a top-level `tasks` array. Each
task carries:
- `id`: sequential `T-001`, `T-002`, ... in file order with no gaps.
- `title`, `area`, and `owner` (one of: Module Developer, Test Engineer,
  Code Reviewer, Security & Compliance, Performance & Resilience, Release,
  Scaffolder Support, Documentation Writer, Meta-Grader, Playwright
  Runner).
- `deps`: ids of tasks that must land first. No cycles.
- `dod`: definition-of-done checklist.
- `tests`: commands or scenarios that prove the task.
- `artifacts`: files the task is expected to touch.
- `estimate_points`, `tags`, `notes`.

Order tasks so every dependency appears earlier in the array. Write the
file directly into the repository.

{{GUARDRAILS}}"#;

const SCAFFOLDER: &str = r#"You are the scaffolder. Stand up the local development tooling for this
repository.

Deliverables:
- devops/start-dev.sh, devops/stop-dev.sh: bring the dev stack up and
  down.
- devops/start-e2e.sh, devops/stop-e2e.sh: the same for the e2e profile.
- devops/logs.sh: tail service logs.
- docker-compose.dev.yml: service definitions for the dev stack.
- .env.example: every required variable with a safe placeholder value.
- frontend/package.json and backend/package.json: runnable `dev`, `test`,
  and `build` scripts.

All scripts must be executable and idempotent. Write every file directly
into the repository.

{{GUARDRAILS}}"#;

const MODULE_DEVELOPER: &str = r#"You are the module developer. Implement the work item below end to end.

Work item:
<<<TASK_JSON>>>

Satisfy every entry in `dod` and make the commands in `tests` pass. Keep
the change scoped to the item. When finished, write an implementation
report to the agent-report.md path listed under Repository resources:
what changed, how it was verified, and anything left open.

{{GUARDRAILS}}"#;

const TEST_ENGINEER: &str = r#"You are the test engineer. Build the test coverage the work item below
calls for.

Work item:
<<<TASK_JSON>>>

Add the tests named in `tests` and any missing coverage around them, run
them, and fix flakes you introduce. Write a report to the agent-report.md
path listed under Repository resources with the commands run and their
results.

{{GUARDRAILS}}"#;

const CODE_REVIEWER: &str = r#"You are the code reviewer. Review the change the work item below refers
to.

Work item:
<<<TASK_JSON>>>

Check correctness against `dod`, test adequacy, and consistency with the
architecture artifacts. Fix small issues directly; list larger ones.
Write your review to the agent-report.md path listed under Repository
resources.

{{GUARDRAILS}}"#;

const SECURITY: &str = r#"You are the security reviewer. Audit the area the work item below names.

Work item:
<<<TASK_JSON>>>

Check input validation, authn/authz boundaries, secret handling, and
dependency risk. Fix what is safe to fix; flag the rest with severity.
Write findings to the agent-report.md path listed under Repository
resources.

{{GUARDRAILS}}"#;

const PERF: &str = r#"You are the performance reviewer. Assess the area the work item below
names.

Work item:
<<<TASK_JSON>>>

Look for hot-path allocations, N+1 queries, missing indexes, unbounded
queues, and absent timeouts. Measure before and after any change. Write
findings and numbers to the agent-report.md path listed under Repository
resources.

{{GUARDRAILS}}"#;

const RELEASE: &str = r#"You are the release engineer. Prepare the release the work item below
describes.

Work item:
<<<TASK_JSON>>>

Verify the build is green, changelog and version are consistent, and the
deploy scripts under devops/ still work. Write the release notes and the
verification steps to the agent-report.md path listed under Repository
resources.

{{GUARDRAILS}}"#;

const DOC_WRITER: &str = r#"You are the documentation writer. Document the area the work item below
names.

Work item:
<<<TASK_JSON>>>

Update user-facing docs and inline reference material so they match the
implemented behavior. Prefer editing existing pages over adding new ones.
Write a summary of what changed to the agent-report.md path listed under
Repository resources.

{{GUARDRAILS}}"#;

const META_GRADER: &str = r#"You are the meta-grader. Evaluate the delivered work against its original
plan.

Work item:
<<<TASK_JSON>>>

Compare the repository state with the backlog item's `dod` and
`artifacts`, grade each criterion met/partial/missed, and justify each
grade with file references. Write the scorecard to the agent-report.md
path listed under Repository resources.

{{GUARDRAILS}}"#;

const SCAFFOLDER_SUPPORT: &str = r#"You are the scaffolding support engineer. Repair or extend the dev
tooling as the work item below describes.

Work item:
<<<TASK_JSON>>>

Keep devops/ scripts, docker-compose.dev.yml, and .env.example mutually
consistent, and verify the stack still starts cleanly. Write what you
changed and how you verified it to the agent-report.md path listed under
Repository resources.

{{GUARDRAILS}}"#;

const PLAYWRIGHT_RUNNER: &str = r#"You are the e2e runner. Execute the browser test suite for the work item
below.

Work item:
<<<TASK_JSON>>>

Start the e2e stack with devops/start-e2e.sh, run the Playwright suite,
and stop the stack afterwards. Write pass/fail per spec file, with
failure traces, to the agent-report.md path listed under Repository
resources.

{{GUARDRAILS}}"#;

const BUG_INTAKE: &str = r#"You are the bug intake analyst. Normalize the raw bug report below.

Raw report:
<<<BUG_REPORT>>>

Write intake.json into the bug directory listed under Bug artifacts with
keys `status`, `severity`, `component`, `summary`, and `missing_details`.
Set `status` to `needs_info` only when the report cannot be acted on at
all; otherwise use `ok` and fill every field you can.

{{GUARDRAILS}}"#;

const BUG_TRIAGE: &str = r#"You are the bug triager. Assess the normalized bug below.

Bug context:
<<<BUG_CONTEXT>>>

Write triage.json into the bug directory listed under Bug artifacts with
keys `status` (`triaged`, `duplicate`, `rejected`, or `needs_info`),
`priority`, `assignee_role`, `duplicate_of` (when duplicate), and
`rationale`. Check the backlog in the context for overlapping work before
deciding.

{{GUARDRAILS}}"#;

const BUG_REPRO: &str = r#"You are the reproduction engineer. Reproduce the triaged bug below.

Bug context:
<<<BUG_CONTEXT>>>

Write repro.json into the bug directory listed under Bug artifacts with
keys `status` (`reproduced`, `not_reproducible`, or `blocked`), `steps`,
`observed`, `expected`, and `evidence`. Use `blocked` only when an
environment or access problem stops the attempt.

{{GUARDRAILS}}"#;

const FEEDBACK_INTAKE: &str = r#"You are the feedback intake analyst. Normalize the raw user feedback
below.

Raw feedback:
<<<FEEDBACK_REPORT>>>

Write intake.json into the feedback directory listed under Feedback
artifacts with keys `status` (`ok` or `needs_info`), `theme`,
`sentiment`, `summary`, and `missing_details`.

{{GUARDRAILS}}"#;

const FEEDBACK_REVIEW: &str = r#"You are the feedback reviewer. Evaluate the normalized feedback below.

Feedback context:
<<<FEEDBACK_CONTEXT>>>

Write review.json into the feedback directory listed under Feedback
artifacts with keys `status` (`reviewed`, `duplicate`, `rejected`, or
`needs_info`), `impact`, `affected_areas`, and `recommendation`. Check
the backlog in the context before calling something new.

{{GUARDRAILS}}"#;

const FEEDBACK_PLAN: &str = r#"You are the feedback planner. Turn the reviewed feedback below into
actionable work.

Feedback context:
<<<FEEDBACK_CONTEXT>>>

Write plan.json into the feedback directory listed under Feedback
artifacts with keys `status` (`planned` or `blocked`), and
`proposed_tasks`: backlog-shaped entries (title, owner, area, deps, dod,
tests) ready for the planner to merge. Use `blocked` when planning needs
a human decision first.

{{GUARDRAILS}}"#;
