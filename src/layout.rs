//! Workspace layout: where deliverables, run state, and prompt overrides
//! live relative to the workspace root.
//!
//! Defaults match the directory conventions the orchestrated repos follow;
//! the `[layout]` table in `foreman.toml` can move any of the roots.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Overridable roots, deserialized from the `[layout]` config table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayoutOverrides {
    pub state_dir: Option<PathBuf>,
    pub artifacts_dir: Option<PathBuf>,
    pub prompts_dir: Option<PathBuf>,
    pub backlog_path: Option<PathBuf>,
    pub project_idea_path: Option<PathBuf>,
}

/// Resolved workspace layout. All paths are absolute.
#[derive(Debug, Clone)]
pub struct Layout {
    workspace: PathBuf,
    state_dir: PathBuf,
    artifacts_dir: PathBuf,
    prompts_dir: PathBuf,
    backlog_path: PathBuf,
    project_idea_path: PathBuf,
}

impl Layout {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self::with_overrides(workspace, &LayoutOverrides::default())
    }

    pub fn with_overrides(workspace: impl Into<PathBuf>, overrides: &LayoutOverrides) -> Self {
        let workspace = workspace.into();
        let join = |default: &str, choice: &Option<PathBuf>| match choice {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => workspace.join(path),
            None => workspace.join(default),
        };
        Self {
            state_dir: join(".foreman", &overrides.state_dir),
            artifacts_dir: join("artifacts", &overrides.artifacts_dir),
            prompts_dir: join("prompts", &overrides.prompts_dir),
            backlog_path: join("artifacts/backlog.json", &overrides.backlog_path),
            project_idea_path: join("docs/project-idea.md", &overrides.project_idea_path),
            workspace,
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Run state root: transcripts, ledgers, per-item dirs.
    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Authored deliverables (PRD, research, architecture, backlog, ...).
    pub fn artifacts_dir(&self) -> &Path {
        &self.artifacts_dir
    }

    /// Stage template overrides (`<key>.md`) and `global_guardrails.md`.
    pub fn prompts_dir(&self) -> &Path {
        &self.prompts_dir
    }

    pub fn backlog_path(&self) -> &Path {
        &self.backlog_path
    }

    pub fn project_idea_path(&self) -> &Path {
        &self.project_idea_path
    }

    pub fn completed_path(&self) -> PathBuf {
        self.state_dir.join("processed_items.json")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.state_dir.join("conversations.jsonl")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.state_dir.join("sessions")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.state_dir.join("tasks")
    }

    pub fn task_dir(&self, slug: &str) -> PathBuf {
        self.tasks_dir().join(slug)
    }

    pub fn bugs_dir(&self) -> PathBuf {
        self.state_dir.join("bugs")
    }

    pub fn feedback_dir(&self) -> PathBuf {
        self.state_dir.join("feedback")
    }

    /// Per-item report the executor is asked to leave behind.
    pub fn agent_report_path(&self, item_dir: &Path) -> PathBuf {
        item_dir.join("agent-report.md")
    }

    /// Default target for the gateway write probe.
    pub fn smoke_path(&self) -> PathBuf {
        self.artifacts_dir.join("smoke-test.md")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_hang_off_the_workspace() {
        let layout = Layout::new("/repo");
        assert_eq!(layout.state_dir(), Path::new("/repo/.foreman"));
        assert_eq!(layout.backlog_path(), Path::new("/repo/artifacts/backlog.json"));
        assert_eq!(
            layout.completed_path(),
            PathBuf::from("/repo/.foreman/processed_items.json")
        );
        assert_eq!(layout.task_dir("t-001"), PathBuf::from("/repo/.foreman/tasks/t-001"));
    }

    #[test]
    fn overrides_replace_individual_roots() {
        let overrides = LayoutOverrides {
            state_dir: Some(PathBuf::from("run-state")),
            backlog_path: Some(PathBuf::from("/elsewhere/backlog.json")),
            ..Default::default()
        };
        let layout = Layout::with_overrides("/repo", &overrides);
        assert_eq!(layout.state_dir(), Path::new("/repo/run-state"));
        assert_eq!(layout.backlog_path(), Path::new("/elsewhere/backlog.json"));
        assert_eq!(layout.artifacts_dir(), Path::new("/repo/artifacts"));
    }
}
