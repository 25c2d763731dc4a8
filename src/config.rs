//! Run settings: CLI flags merged over `foreman.toml` over defaults.
//!
//! The file lives at the workspace root and is entirely optional:
//!
//! ```toml
//! [run]
//! agent_retries = 10
//! manager_retries = 5
//! qa_retries = 5
//! max_items = 4
//!
//! [gateway]
//! program = "codex"
//! model = "gpt-5-codex"
//! sandbox = "danger-full-access"
//! reasoning_effort = "high"
//! include_plan = false
//!
//! [layout]
//! state_dir = ".foreman"
//! artifacts_dir = "artifacts"
//! ```
//!
//! Resolution applies two pins unless `--allow-model-override` is given:
//! the execution model must stay `gpt-5-codex`, and reasoning effort must
//! stay `high`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use serde::Deserialize;

use crate::flow::RetryBudgets;
use crate::layout::{Layout, LayoutOverrides};

/// The only execution model the pipeline is calibrated against.
pub const PINNED_MODEL: &str = "gpt-5-codex";

/// Sandbox policy forwarded to the agent CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SandboxPolicy {
    ReadOnly,
    WorkspaceWrite,
    #[default]
    DangerFullAccess,
}

impl SandboxPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SandboxPolicy::ReadOnly => "read-only",
            SandboxPolicy::WorkspaceWrite => "workspace-write",
            SandboxPolicy::DangerFullAccess => "danger-full-access",
        }
    }
}

impl std::fmt::Display for SandboxPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SandboxPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "read-only" => Ok(SandboxPolicy::ReadOnly),
            "workspace-write" => Ok(SandboxPolicy::WorkspaceWrite),
            "danger-full-access" => Ok(SandboxPolicy::DangerFullAccess),
            _ => anyhow::bail!(
                "Invalid sandbox policy '{}'. Valid values: read-only, workspace-write, danger-full-access",
                s
            ),
        }
    }
}

/// Reasoning effort requested from the agent CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    #[default]
    High,
}

impl ReasoningEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }
}

impl std::fmt::Display for ReasoningEffort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReasoningEffort {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(ReasoningEffort::Low),
            "medium" => Ok(ReasoningEffort::Medium),
            "high" => Ok(ReasoningEffort::High),
            _ => anyhow::bail!(
                "Invalid reasoning effort '{}'. Valid values: low, medium, high",
                s
            ),
        }
    }
}

/// Flags for `foreman run`. Every option here can also come from
/// `foreman.toml` where a matching key exists; the flag wins.
#[derive(Debug, Clone, Default, Args)]
pub struct RunArgs {
    /// Raw project idea text for the intake stage. Mutually exclusive with
    /// --project-idea-file.
    #[arg(long, num_args = 1.., value_name = "WORD")]
    pub project_idea: Option<Vec<String>>,

    /// File containing the project idea text for the intake stage.
    #[arg(long, value_name = "PATH")]
    pub project_idea_file: Option<PathBuf>,

    /// Execution model (defaults to gpt-5-codex).
    #[arg(long)]
    pub model: Option<String>,

    /// Permit a model other than gpt-5-codex and a reasoning effort other
    /// than high.
    #[arg(long)]
    pub allow_model_override: bool,

    /// Model override for the review tiers; the executor keeps the
    /// execution model.
    #[arg(long)]
    pub manager_model: Option<String>,

    /// Pass the plan tool flag on fresh (non-resumed) invocations.
    #[arg(long)]
    pub include_plan: bool,

    /// Skip the scaffolder stage (compose file and devops scripts).
    #[arg(long)]
    pub skip_devops: bool,

    /// Skip the documentation chain (intake through UX).
    #[arg(long)]
    pub skip_docs: bool,

    /// Skip planning stages (treated the same as --skip-backlog).
    #[arg(long)]
    pub skip_roadmap: bool,

    /// Skip the planner stage (no backlog generation).
    #[arg(long)]
    pub skip_backlog: bool,

    /// Skip the work-item execution loop.
    #[arg(long)]
    pub skip_tasks: bool,

    /// Regenerate devops tooling even when the files are present.
    #[arg(long)]
    pub force_devops: bool,

    /// Regenerate doc artifacts even when already populated.
    #[arg(long)]
    pub force_docs: bool,

    /// Force a rerun of the planner stage.
    #[arg(long)]
    pub force_roadmap: bool,

    /// Regenerate the backlog even when populated.
    #[arg(long)]
    pub force_backlog: bool,

    /// Maximum number of work items to execute this run. Omit for no limit.
    #[arg(long, value_name = "N")]
    pub max_items: Option<usize>,

    /// Execute items even when already recorded as completed.
    #[arg(long)]
    pub reprocess: bool,

    /// Manager-driven retries per executor run (default: 10).
    #[arg(long, value_name = "N")]
    pub agent_retries: Option<u32>,

    /// Retries for manager validation prompts (default: 5).
    #[arg(long, value_name = "N")]
    pub manager_retries: Option<u32>,

    /// Retries for QA validation prompts (default: 5).
    #[arg(long, value_name = "N")]
    pub qa_retries: Option<u32>,

    /// Sandbox policy passed to the agent CLI (default: danger-full-access).
    #[arg(long, value_name = "POLICY")]
    pub sandbox: Option<SandboxPolicy>,

    /// Reasoning effort for agent runs (default: high).
    #[arg(long, value_name = "LEVEL")]
    pub reasoning_effort: Option<ReasoningEffort>,

    /// Agent CLI binary (default: codex).
    #[arg(long, value_name = "BIN")]
    pub agent_cmd: Option<String>,

    /// Override the authored-artifacts directory.
    #[arg(long, value_name = "DIR")]
    pub artifacts_dir: Option<PathBuf>,

    /// Override the run-state directory (transcripts, ledger, item dirs).
    #[arg(long, value_name = "DIR")]
    pub state_dir: Option<PathBuf>,
}

/// The `[run]` table of `foreman.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunSection {
    pub agent_retries: Option<u32>,
    pub manager_retries: Option<u32>,
    pub qa_retries: Option<u32>,
    pub max_items: Option<usize>,
}

/// The `[gateway]` table of `foreman.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewaySection {
    pub program: Option<String>,
    pub model: Option<String>,
    pub manager_model: Option<String>,
    pub sandbox: Option<SandboxPolicy>,
    pub reasoning_effort: Option<ReasoningEffort>,
    pub include_plan: Option<bool>,
}

/// Parsed `foreman.toml`. Every table is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForemanToml {
    #[serde(default)]
    pub run: RunSection,
    #[serde(default)]
    pub gateway: GatewaySection,
    #[serde(default)]
    pub layout: LayoutOverrides,
}

impl ForemanToml {
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse foreman.toml")
    }

    /// Load `foreman.toml` from the workspace root, or defaults when the
    /// file does not exist.
    pub fn load_or_default(workspace: &Path) -> Result<Self> {
        let path = workspace.join("foreman.toml");
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub workspace: PathBuf,
    pub layout: Layout,
    /// Agent CLI binary.
    pub program: String,
    pub model: String,
    pub manager_model: Option<String>,
    pub sandbox: SandboxPolicy,
    pub reasoning_effort: ReasoningEffort,
    pub include_plan: bool,
    pub budgets: RetryBudgets,
    pub skip_devops: bool,
    pub skip_docs: bool,
    pub skip_roadmap: bool,
    pub skip_backlog: bool,
    pub skip_tasks: bool,
    pub force_devops: bool,
    pub force_docs: bool,
    pub force_roadmap: bool,
    pub force_backlog: bool,
    pub max_items: Option<usize>,
    pub reprocess: bool,
}

impl Settings {
    /// Resolve flags over file values over defaults, then apply the model
    /// and effort pins.
    pub fn resolve(workspace: &Path, args: &RunArgs) -> Result<Self> {
        let workspace = workspace
            .canonicalize()
            .with_context(|| format!("Failed to resolve workspace {}", workspace.display()))?;
        let file = ForemanToml::load_or_default(&workspace)?;

        let mut overrides = file.layout.clone();
        if let Some(dir) = &args.artifacts_dir {
            overrides.artifacts_dir = Some(dir.clone());
        }
        if let Some(dir) = &args.state_dir {
            overrides.state_dir = Some(dir.clone());
        }
        let layout = Layout::with_overrides(&workspace, &overrides);

        let model = args
            .model
            .clone()
            .or_else(|| file.gateway.model.clone())
            .unwrap_or_else(|| PINNED_MODEL.to_string());
        if !args.allow_model_override && model != PINNED_MODEL {
            bail!(
                "This workflow requires the {PINNED_MODEL} model. Pass --allow-model-override to bypass."
            );
        }

        let reasoning_effort = args
            .reasoning_effort
            .or(file.gateway.reasoning_effort)
            .unwrap_or_default();
        if reasoning_effort != ReasoningEffort::High && !args.allow_model_override {
            bail!("High reasoning effort is mandatory unless --allow-model-override is provided.");
        }

        let program = args
            .agent_cmd
            .clone()
            .or_else(|| file.gateway.program.clone())
            .or_else(|| std::env::var("CODEX_CMD").ok())
            .unwrap_or_else(|| "codex".to_string());

        let defaults = RetryBudgets::default();
        let budgets = RetryBudgets {
            agent_retries: args
                .agent_retries
                .or(file.run.agent_retries)
                .unwrap_or(defaults.agent_retries),
            manager_retries: args
                .manager_retries
                .or(file.run.manager_retries)
                .unwrap_or(defaults.manager_retries),
            qa_retries: args
                .qa_retries
                .or(file.run.qa_retries)
                .unwrap_or(defaults.qa_retries),
        };

        Ok(Self {
            workspace,
            layout,
            program,
            model,
            manager_model: args
                .manager_model
                .clone()
                .or_else(|| file.gateway.manager_model.clone()),
            sandbox: args.sandbox.or(file.gateway.sandbox).unwrap_or_default(),
            reasoning_effort,
            include_plan: args.include_plan || file.gateway.include_plan.unwrap_or(false),
            budgets,
            skip_devops: args.skip_devops,
            skip_docs: args.skip_docs,
            skip_roadmap: args.skip_roadmap,
            skip_backlog: args.skip_backlog,
            skip_tasks: args.skip_tasks,
            force_devops: args.force_devops,
            force_docs: args.force_docs,
            force_roadmap: args.force_roadmap,
            force_backlog: args.force_backlog,
            max_items: args.max_items.or(file.run.max_items),
            reprocess: args.reprocess,
        })
    }

    /// Create the workspace roots the run writes into.
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            self.layout.state_dir(),
            self.layout.artifacts_dir(),
            self.layout.prompts_dir(),
        ] {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory {}", dir.display()))?;
        }
        Ok(())
    }
}

/// Layout for commands that inspect or clear state without the full
/// settings merge (`status`, `reset`).
pub fn resolve_layout(workspace: &Path) -> Result<Layout> {
    let workspace = workspace
        .canonicalize()
        .with_context(|| format!("Failed to resolve workspace {}", workspace.display()))?;
    let file = ForemanToml::load_or_default(&workspace)?;
    Ok(Layout::with_overrides(&workspace, &file.layout))
}

/// Resolve the intake project idea: inline flag, then file flag, then the
/// workspace's default idea file.
pub fn read_project_idea(args: &RunArgs, default_path: &Path) -> Result<String> {
    if args.project_idea.is_some() && args.project_idea_file.is_some() {
        bail!("Provide either --project-idea or --project-idea-file, not both.");
    }

    let idea = if let Some(words) = &args.project_idea {
        words.join(" ").trim().to_string()
    } else if let Some(path) = &args.project_idea_file {
        if !path.exists() {
            bail!("Project idea file not found: {}", path.display());
        }
        fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?
            .trim()
            .to_string()
    } else if default_path.exists() {
        fs::read_to_string(default_path)
            .with_context(|| format!("Failed to read {}", default_path.display()))?
            .trim()
            .to_string()
    } else {
        bail!(
            "The intake stage requires --project-idea, --project-idea-file, or a populated {}.",
            default_path.display()
        );
    };

    if idea.is_empty() {
        bail!("Project idea text is empty.");
    }
    Ok(idea)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_resolve_without_a_config_file() {
        let dir = tempdir().unwrap();
        let settings = Settings::resolve(dir.path(), &RunArgs::default()).unwrap();

        assert_eq!(settings.model, PINNED_MODEL);
        assert_eq!(settings.sandbox, SandboxPolicy::DangerFullAccess);
        assert_eq!(settings.reasoning_effort, ReasoningEffort::High);
        assert_eq!(settings.budgets.agent_retries, 10);
        assert_eq!(settings.budgets.manager_retries, 5);
        assert_eq!(settings.budgets.qa_retries, 5);
        assert!(!settings.include_plan);
        assert!(settings.max_items.is_none());
    }

    #[test]
    fn model_pin_rejects_other_models() {
        let dir = tempdir().unwrap();
        let mut args = RunArgs::default();
        args.model = Some("gpt-4o".to_string());

        let err = Settings::resolve(dir.path(), &args).unwrap_err();
        assert!(err.to_string().contains("requires the gpt-5-codex model"));

        args.allow_model_override = true;
        let settings = Settings::resolve(dir.path(), &args).unwrap();
        assert_eq!(settings.model, "gpt-4o");
    }

    #[test]
    fn effort_pin_requires_high() {
        let dir = tempdir().unwrap();
        let mut args = RunArgs::default();
        args.reasoning_effort = Some(ReasoningEffort::Low);

        let err = Settings::resolve(dir.path(), &args).unwrap_err();
        assert!(err.to_string().contains("High reasoning effort"));

        args.allow_model_override = true;
        let settings = Settings::resolve(dir.path(), &args).unwrap();
        assert_eq!(settings.reasoning_effort, ReasoningEffort::Low);
    }

    #[test]
    fn file_values_sit_under_cli_flags() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("foreman.toml"),
            r#"
[run]
agent_retries = 2
max_items = 3

[gateway]
sandbox = "workspace-write"
include_plan = true

[layout]
artifacts_dir = "out"
"#,
        )
        .unwrap();

        let settings = Settings::resolve(dir.path(), &RunArgs::default()).unwrap();
        assert_eq!(settings.budgets.agent_retries, 2);
        assert_eq!(settings.max_items, Some(3));
        assert_eq!(settings.sandbox, SandboxPolicy::WorkspaceWrite);
        assert!(settings.include_plan);
        assert!(settings.layout.artifacts_dir().ends_with("out"));

        let mut args = RunArgs::default();
        args.agent_retries = Some(7);
        args.sandbox = Some(SandboxPolicy::ReadOnly);
        args.agent_cmd = Some("codex-nightly".to_string());
        args.artifacts_dir = Some(PathBuf::from("elsewhere"));
        let settings = Settings::resolve(dir.path(), &args).unwrap();
        assert_eq!(settings.budgets.agent_retries, 7);
        assert_eq!(settings.sandbox, SandboxPolicy::ReadOnly);
        assert_eq!(settings.program, "codex-nightly");
        assert!(settings.layout.artifacts_dir().ends_with("elsewhere"));
    }

    #[test]
    fn unknown_config_keys_are_rejected() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("foreman.toml"),
            "[run]\nagent_budget = 4\n",
        )
        .unwrap();

        let err = Settings::resolve(dir.path(), &RunArgs::default()).unwrap_err();
        assert!(err.to_string().contains("foreman.toml"));
    }

    #[test]
    fn project_idea_precedence() {
        let dir = tempdir().unwrap();
        let default_path = dir.path().join("docs/project-idea.md");

        let mut args = RunArgs::default();
        args.project_idea = Some(vec!["build".into(), "a".into(), "marketplace".into()]);
        assert_eq!(
            read_project_idea(&args, &default_path).unwrap(),
            "build a marketplace"
        );

        args.project_idea_file = Some(dir.path().join("idea.txt"));
        let err = read_project_idea(&args, &default_path).unwrap_err();
        assert!(err.to_string().contains("not both"));

        args.project_idea = None;
        let err = read_project_idea(&args, &default_path).unwrap_err();
        assert!(err.to_string().contains("Project idea file not found"));

        std::fs::write(dir.path().join("idea.txt"), "  an idea from a file\n").unwrap();
        assert_eq!(
            read_project_idea(&args, &default_path).unwrap(),
            "an idea from a file"
        );

        args.project_idea_file = None;
        let err = read_project_idea(&args, &default_path).unwrap_err();
        assert!(err.to_string().contains("requires --project-idea"));

        std::fs::create_dir_all(default_path.parent().unwrap()).unwrap();
        std::fs::write(&default_path, "idea on disk").unwrap();
        assert_eq!(read_project_idea(&args, &default_path).unwrap(), "idea on disk");

        std::fs::write(&default_path, "   \n").unwrap();
        let err = read_project_idea(&args, &default_path).unwrap_err();
        assert!(err.to_string().contains("Project idea text is empty."));
    }

    #[test]
    fn sandbox_and_effort_parse_from_strings() {
        assert_eq!(
            "workspace-write".parse::<SandboxPolicy>().unwrap(),
            SandboxPolicy::WorkspaceWrite
        );
        assert!("open-wide".parse::<SandboxPolicy>().is_err());
        assert_eq!(
            "medium".parse::<ReasoningEffort>().unwrap(),
            ReasoningEffort::Medium
        );
        assert_eq!(SandboxPolicy::default().as_str(), "danger-full-access");
    }
}
