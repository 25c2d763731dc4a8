//! End-to-end gateway probe: `foreman smoke`.
//!
//! Sends one real agent invocation that must write a marker file into the
//! workspace. Proves the CLI is installed, authenticated, and allowed to
//! touch the filesystem before a long run is kicked off.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use foreman::config::RunArgs;

pub async fn cmd_smoke(
    workspace: &Path,
    args: &RunArgs,
    path: Option<PathBuf>,
    verbose: bool,
) -> Result<()> {
    use foreman::config::Settings;
    use foreman::gateway::{AgentGateway, CliGateway, InvocationRequest};
    use foreman::roles::AttemptRole;
    use foreman::util::{file_has_text, rel_display};

    let settings = Settings::resolve(workspace, args)?;
    settings.ensure_directories()?;

    let target = match path {
        Some(path) if path.is_absolute() => path,
        Some(path) => settings.workspace.join(path),
        None => settings.layout.smoke_path(),
    };
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    if target.exists() {
        std::fs::remove_file(&target)
            .with_context(|| format!("removing stale {}", target.display()))?;
    }

    let gateway = CliGateway::new(settings.workspace.clone(), settings.layout.state_dir())
        .with_program(settings.program.clone())
        .with_sandbox(settings.sandbox.as_str())
        .with_model(Some(settings.model.clone()))
        .with_reasoning_effort(Some(settings.reasoning_effort.as_str().to_string()))
        .with_include_plan(settings.include_plan)
        .with_verbose(verbose);

    let rel = rel_display(&target, &settings.workspace);
    println!("[smoke] asking the agent to write {rel}");

    let prompt = format!(
        "Create a file at {rel} (relative to the repository root) containing the \
         single line `SMOKE TEST PASS`. Reply `done` once the file exists. Do not \
         modify anything else in the repository."
    );
    let outcome = gateway
        .invoke(InvocationRequest {
            prompt,
            label: "smoke-test/agent".to_string(),
            role: AttemptRole::Agent,
            resume_session: None,
            model_override: None,
        })
        .await?;

    if !file_has_text(&target) {
        anyhow::bail!(
            "Smoke test failed: {} was not created. Transcript: {}",
            rel,
            rel_display(&outcome.transcript_path, &settings.workspace)
        );
    }
    println!("[smoke] {rel} written through the gateway; workspace is writable.");
    Ok(())
}
