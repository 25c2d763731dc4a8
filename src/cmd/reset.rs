//! Completion-state cleanup: `foreman reset`.

use anyhow::Result;
use std::path::Path;

/// Clears the completed-task set so the next run re-executes the backlog.
/// With `stages` set, also forgets bug and feedback track progress; the
/// submissions themselves are left in place.
pub fn cmd_reset(workspace: &Path, stages: bool, force: bool) -> Result<()> {
    use dialoguer::Confirm;
    use foreman::config;

    let layout = config::resolve_layout(workspace)?;

    if !force {
        let confirm = Confirm::new()
            .with_prompt("This will clear completion state for the workspace. Continue?")
            .default(false)
            .interact()
            .unwrap_or(false);

        if !confirm {
            println!("Reset cancelled");
            return Ok(());
        }
    }

    let completed = layout.completed_path();
    if completed.exists() {
        std::fs::remove_file(&completed)?;
        println!("Removed {}", completed.display());
    }

    if stages {
        clear_track_states(&layout.bugs_dir())?;
        clear_track_states(&layout.feedback_dir())?;
    }

    println!("Reset complete");
    Ok(())
}

fn clear_track_states(root: &Path) -> Result<()> {
    if !root.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(root)? {
        let dir = entry?.path();
        if !dir.is_dir() {
            continue;
        }
        let state = dir.join("state.json");
        if state.exists() {
            std::fs::remove_file(&state)?;
            println!("Removed {}", state.display());
        }
    }
    Ok(())
}
