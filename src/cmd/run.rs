//! Full pipeline execution over one workspace: `foreman run`.

use anyhow::Result;
use std::path::Path;

use foreman::config::RunArgs;

pub async fn cmd_run(workspace: &Path, args: &RunArgs, verbose: bool) -> Result<()> {
    use foreman::config::{self, Settings};
    use foreman::flow::ExecutionFlow;
    use foreman::gateway::CliGateway;
    use foreman::pipeline::Pipeline;
    use foreman::plan::{self, SequenceRule};
    use foreman::playbook::Playbook;
    use foreman::store::{CompletedSet, RunLedger};
    use foreman::ui::QueueUi;

    let settings = Settings::resolve(workspace, args)?;
    settings.ensure_directories()?;

    let project_idea = match config::read_project_idea(args, settings.layout.project_idea_path()) {
        Ok(idea) => idea,
        Err(err) if settings.skip_docs => {
            tracing::debug!(%err, "no project idea; document stages are skipped");
            String::new()
        }
        Err(err) => return Err(err),
    };

    let gateway = CliGateway::new(settings.workspace.clone(), settings.layout.state_dir())
        .with_program(settings.program.clone())
        .with_sandbox(settings.sandbox.as_str())
        .with_model(Some(settings.model.clone()))
        .with_reasoning_effort(Some(settings.reasoning_effort.as_str().to_string()))
        .with_include_plan(settings.include_plan)
        .with_verbose(verbose);

    let ledger = RunLedger::new(
        settings.workspace.clone(),
        settings.layout.ledger_path(),
        settings.layout.sessions_dir(),
    );
    let completed = CompletedSet::load(settings.layout.completed_path());
    let playbook = Playbook::standard(&settings.layout);

    // Bar total is best-effort: a planner stage running this same
    // invocation can still grow the backlog.
    let queued = plan::collect_items(settings.layout.backlog_path(), SequenceRule::Free)
        .map(|items| items.len())
        .unwrap_or(0);
    let ui = QueueUi::new(queued as u64, verbose);
    ui.print_section_header(
        "foreman run",
        &format!("{queued} backlog item(s), run {}", ledger.run_id()),
    );

    let flow = ExecutionFlow::new(
        &gateway,
        &ledger,
        &ui,
        settings.workspace.clone(),
        settings.layout.backlog_path(),
        settings.budgets,
    )
    .with_manager_model(settings.manager_model.clone());

    let mut pipeline = Pipeline::new(&settings, &playbook, &flow, &ui, completed, project_idea);
    let result = pipeline.run().await;
    ui.finish();
    result
}
