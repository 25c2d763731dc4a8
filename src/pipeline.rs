//! Run orchestration: the primary stage chain, the bug and feedback
//! tracks, and the backlog execution loop, in that order.
//!
//! The pipeline decides what runs and in which order. How a single piece
//! of work reaches acceptance is [`ExecutionFlow`]'s job, and per-report
//! stage routing is [`StageRunner`]'s. A primary-chain or backlog failure
//! halts the run; the bug and feedback tracks report failures per item
//! and move on.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::config::Settings;
use crate::flow::{missing_deliverables, ExecutionFlow, FlowRequest, ItemContext};
use crate::plan::{self, SequenceRule};
use crate::playbook::{Playbook, PromptSpec, ValidationFocus, PROJECT_IDEA_MARKER};
use crate::roles::resolve_owner;
use crate::stages::StageRunner;
use crate::store::CompletedSet;
use crate::ui::QueueUi;
use crate::util::rel_display;

/// Drives one full `run` over a workspace: primary chain, bug and
/// feedback tracks, then the backlog loop.
pub struct Pipeline<'a> {
    settings: &'a Settings,
    playbook: &'a Playbook,
    flow: &'a ExecutionFlow<'a>,
    ui: &'a QueueUi,
    completed: CompletedSet,
    project_idea: String,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        settings: &'a Settings,
        playbook: &'a Playbook,
        flow: &'a ExecutionFlow<'a>,
        ui: &'a QueueUi,
        completed: CompletedSet,
        project_idea: String,
    ) -> Self {
        Self {
            settings,
            playbook,
            flow,
            ui,
            completed,
            project_idea,
        }
    }

    /// Execute the run to completion.
    ///
    /// Primary-chain and backlog failures abort with the flow's terminal
    /// message; stage-track failures were already reported per item.
    pub async fn run(&mut self) -> Result<()> {
        self.run_primary_chain().await?;

        let stages = StageRunner::new(&self.settings.layout, self.playbook, self.flow, self.ui);
        stages.run_bugs().await?;
        stages.run_feedback().await?;

        if !self.settings.skip_tasks {
            self.run_task_loop().await?;
        }
        Ok(())
    }

    /// Walk the authored stage sequence. A stage runs when its group is
    /// not skipped and either its force flag is set or some deliverable is
    /// still missing or blank.
    async fn run_primary_chain(&self) -> Result<()> {
        let layout = &self.settings.layout;
        for spec in self.playbook.primary() {
            if self.chain_skipped(spec) {
                continue;
            }
            if !self.chain_forced(spec) && missing_deliverables(&spec.deliverables).is_empty() {
                self.ui.note(
                    "skip",
                    format!(
                        "{} deliverables already populated; use a force flag to regenerate",
                        spec.name
                    ),
                );
                continue;
            }

            let context = self.chain_context(spec)?;
            let prompt = spec.render(layout.prompts_dir(), &context)?;
            self.ui.milestone(format!("stage {}", spec.name));

            let request = FlowRequest::new(spec, prompt, &spec.chain_label());
            let report = self.flow.run(&request).await?;
            if !report.outcome.is_accepted() {
                bail!("{}", report.detail);
            }
            verify_deliverables(&spec.deliverables, layout.workspace())?;
        }
        Ok(())
    }

    /// Skip/force flags address stages by group; review focus is what
    /// separates the backlog and infra stages from the document chain.
    fn chain_skipped(&self, spec: &PromptSpec) -> bool {
        match spec.focus {
            ValidationFocus::Backlog => self.settings.skip_backlog || self.settings.skip_roadmap,
            ValidationFocus::Infra => self.settings.skip_devops,
            ValidationFocus::Execution | ValidationFocus::Generic => self.settings.skip_docs,
        }
    }

    fn chain_forced(&self, spec: &PromptSpec) -> bool {
        match spec.focus {
            ValidationFocus::Backlog => self.settings.force_backlog || self.settings.force_roadmap,
            ValidationFocus::Infra => self.settings.force_devops,
            ValidationFocus::Execution | ValidationFocus::Generic => self.settings.force_docs,
        }
    }

    /// Context for a primary-chain render: the project idea for the
    /// intake placeholder, empty for every other stage.
    fn chain_context(&self, spec: &PromptSpec) -> Result<String> {
        match spec.placeholder {
            Some(PROJECT_IDEA_MARKER) => {
                if self.project_idea.trim().is_empty() {
                    bail!("Project idea text is required for the {} prompt.", spec.name);
                }
                Ok(self.project_idea.clone())
            }
            _ => Ok(String::new()),
        }
    }

    /// Execute scheduled backlog items one at a time.
    ///
    /// Completed items are skipped unless `--reprocess`, and `--max-items`
    /// caps how many execute this run. Acceptance records the item in the
    /// completed-set immediately, so an aborted run resumes behind it.
    async fn run_task_loop(&mut self) -> Result<()> {
        let layout = &self.settings.layout;
        let backlog_path = layout.backlog_path();
        let items = plan::schedule(backlog_path, SequenceRule::Chronological)?;
        if items.is_empty() {
            self.ui.note(
                "tasks",
                format!(
                    "no tasks in {}; nothing to execute",
                    rel_display(backlog_path, layout.workspace())
                ),
            );
            return Ok(());
        }

        if self.completed.backlog_drifted(backlog_path) {
            self.ui.warn(
                "tasks",
                "backlog manifest changed since completion state was saved; completed ids are kept",
            );
        }

        let mut executed = 0usize;
        for item in &items {
            if !self.settings.reprocess && self.completed.contains(&item.id) {
                self.ui.item_skipped(&item.id, "already processed");
                continue;
            }
            if let Some(cap) = self.settings.max_items {
                if executed >= cap {
                    self.ui.note("tasks", "item cap reached; stopping");
                    break;
                }
            }
            let Some(spec) =
                resolve_owner(&item.owner).and_then(|kind| self.playbook.supporting(kind))
            else {
                self.ui
                    .item_skipped(&item.id, &format!("no executor profile for owner '{}'", item.owner));
                continue;
            };

            let slug = item.slug();
            let task_dir = layout.task_dir(&slug);
            fs::create_dir_all(&task_dir)
                .with_context(|| format!("creating {}", task_dir.display()))?;
            let report_path = layout.agent_report_path(&task_dir);

            let mut prompt = spec.render(layout.prompts_dir(), &item.raw_pretty())?;
            prompt.push_str(&format!(
                "\n\nRepository resources:\n\
                 - Task artifact directory: {}\n\
                 - Agent report path: {}\n\
                 - Source backlog: {}\n\
                 - QA will inspect the updated repository and record findings.",
                rel_display(&task_dir, layout.workspace()),
                rel_display(&report_path, layout.workspace()),
                rel_display(backlog_path, layout.workspace()),
            ));

            let label_root = format!("tasks/{slug}");
            let mut request = FlowRequest::new(spec, prompt, &label_root).with_item(ItemContext {
                id: item.id.clone(),
                source: backlog_path.to_path_buf(),
                dir: task_dir.clone(),
            });
            if spec.qa {
                request = request.with_qa(format!("{label_root}/qa"));
            }

            self.ui.start_item(&item.id, &item.title);
            let report = self.flow.run(&request).await?;
            if !report.outcome.is_accepted() {
                self.ui.item_failed(&item.id, &report.detail);
                bail!("{}", report.detail);
            }

            self.ui.item_complete(&item.id);
            self.completed.insert(&item.id);
            self.completed.save(backlog_path)?;
            executed += 1;
        }

        if executed == 0 {
            self.ui.note("tasks", "no new tasks executed");
        }
        Ok(())
    }
}

/// Existence check on a stage's declared deliverables, run after the flow
/// accepts. The content gate already ran inside the flow; this only
/// catches files that vanished since.
fn verify_deliverables(deliverables: &[PathBuf], workspace: &Path) -> Result<()> {
    let missing: Vec<String> = deliverables
        .iter()
        .filter(|path| !path.exists())
        .map(|path| rel_display(path, workspace))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    bail!(
        "Expected deliverables were not created: {}",
        missing.join(", ")
    )
}
