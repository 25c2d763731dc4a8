//! Workspace inspection without touching the gateway: `foreman status`.

use anyhow::Result;
use std::path::Path;

pub fn cmd_status(workspace: &Path) -> Result<()> {
    use foreman::config;
    use foreman::plan::{self, SequenceRule};
    use foreman::store::CompletedSet;

    let layout = config::resolve_layout(workspace)?;

    println!();
    println!("Foreman Workspace Status");
    println!("========================");
    println!();
    println!("Workspace: {}", layout.workspace().display());

    let completed = CompletedSet::load(layout.completed_path());

    match plan::schedule(layout.backlog_path(), SequenceRule::Chronological) {
        Ok(items) if items.is_empty() => {
            println!("Backlog:   empty (run the planner stage first)");
        }
        Ok(items) => {
            let done = items
                .iter()
                .filter(|item| completed.contains(&item.id))
                .count();
            println!("Backlog:   {} task(s), {} completed", items.len(), done);
            if completed.backlog_drifted(layout.backlog_path()) {
                println!(
                    "           {}",
                    console::style("manifest changed since completion state was saved").yellow()
                );
            }
            println!();
            println!("{:<8} {:<9} {:<22} Title", "Task", "State", "Owner");
            for item in &items {
                let state = if completed.contains(&item.id) {
                    "done"
                } else {
                    "pending"
                };
                println!("{:<8} {:<9} {:<22} {}", item.id, state, item.owner, item.title);
            }
        }
        Err(err) => {
            println!("Backlog:   unreadable ({err})");
        }
    }

    print_track("Bugs", &layout.bugs_dir())?;
    print_track("Feedback", &layout.feedback_dir())?;
    println!();
    Ok(())
}

fn print_track(title: &str, root: &Path) -> Result<()> {
    use foreman::stages::StageState;

    if !root.exists() {
        return Ok(());
    }
    let mut dirs: Vec<_> = std::fs::read_dir(root)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();
    if dirs.is_empty() {
        return Ok(());
    }

    println!();
    println!("{title}:");
    for dir in dirs {
        let fallback = dir
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        let state = StageState::load(&dir.join("state.json"), fallback);
        let status = if state.awaiting_human {
            format!(
                "awaiting human ({})",
                state.awaiting_reason.as_deref().unwrap_or("unspecified")
            )
        } else if state.is_done() {
            "done".to_string()
        } else {
            format!("pending {}", state.pending_stage)
        };
        println!("  {:<14} {}", state.item_id, status);
    }
    Ok(())
}
