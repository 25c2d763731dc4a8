//! Run-state persistence: the completed-set, the conversation ledger, and
//! small JSON read helpers.
//!
//! Everything here is written strictly between state-machine phase
//! transitions, so plain synchronous writes are enough. The ledger is
//! append-only JSONL; the completed-set is rewritten whole on every save.

use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::gateway::GatewayOutcome;
use crate::roles::AttemptRole;
use crate::util::{rel_display, utc_timestamp};

/// Ids of work items that already reached acceptance, persisted so a re-run
/// resumes at the next unresolved item.
///
/// The file also remembers a digest of the backlog manifest at save time;
/// when the manifest changes under a saved set the mismatch is logged but
/// the ids are kept, since completed work stays completed.
pub struct CompletedSet {
    path: PathBuf,
    ids: BTreeSet<String>,
    backlog_digest: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct CompletedFile {
    items: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    backlog_sha256: Option<String>,
}

impl CompletedSet {
    /// Load from `path`; a missing or unreadable file starts fresh.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut ids = BTreeSet::new();
        let mut backlog_digest = None;

        if path.exists() {
            match fs::read_to_string(&path)
                .map_err(anyhow::Error::from)
                .and_then(|text| serde_json::from_str::<Value>(&text).map_err(Into::into))
            {
                Ok(Value::Array(entries)) => {
                    // Bare-array files predate the digest wrapper.
                    ids.extend(
                        entries
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string),
                    );
                }
                Ok(value) => match serde_json::from_value::<CompletedFile>(value) {
                    Ok(file) => {
                        ids.extend(file.items);
                        backlog_digest = file.backlog_sha256;
                    }
                    Err(err) => {
                        tracing::warn!(path = %path.display(), %err, "completed-set unreadable, starting fresh");
                    }
                },
                Err(err) => {
                    tracing::warn!(path = %path.display(), %err, "could not parse completed-set, starting fresh");
                }
            }
        }

        Self {
            path,
            ids,
            backlog_digest,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn insert(&mut self, id: &str) {
        self.ids.insert(id.to_string());
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// True when the digest stored at save time no longer matches the
    /// manifest at `backlog_path`. A missing manifest or missing digest is
    /// not drift.
    pub fn backlog_drifted(&self, backlog_path: &Path) -> bool {
        match (&self.backlog_digest, file_digest(backlog_path)) {
            (Some(saved), Some(current)) => *saved != current,
            _ => false,
        }
    }

    /// Persist the set, stamping the current manifest digest.
    pub fn save(&mut self, backlog_path: &Path) -> Result<()> {
        self.backlog_digest = file_digest(backlog_path);
        let file = CompletedFile {
            items: self.ids.iter().cloned().collect(),
            backlog_sha256: self.backlog_digest.clone(),
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let text = serde_json::to_string_pretty(&file)?;
        fs::write(&self.path, text)
            .with_context(|| format!("Failed to write completed-set at {}", self.path.display()))
    }
}

fn file_digest(path: &Path) -> Option<String> {
    let bytes = fs::read(path).ok()?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Some(format!("{:x}", hasher.finalize()))
}

/// One ledger line per gateway invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub timestamp: String,
    pub run_id: String,
    pub role: AttemptRole,
    /// Stage or profile name the invocation served, e.g. `Module Developer`.
    pub prompt: String,
    pub label: String,
    pub attempt: u32,
    pub session_id: Option<String>,
    pub transcript_path: String,
    pub reply_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
}

/// Append-only audit ledger of every invocation in a run, plus the
/// per-stage mirror of the latest agent session token.
pub struct RunLedger {
    workspace: PathBuf,
    ledger_path: PathBuf,
    sessions_dir: PathBuf,
    run_id: String,
}

impl RunLedger {
    pub fn new(
        workspace: impl Into<PathBuf>,
        ledger_path: impl Into<PathBuf>,
        sessions_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            workspace: workspace.into(),
            ledger_path: ledger_path.into(),
            sessions_dir: sessions_dir.into(),
            run_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn path(&self) -> &Path {
        &self.ledger_path
    }

    /// Record one invocation. Agent sessions are additionally mirrored to
    /// `sessions/<stage_key>.session` so outside tooling can resume the
    /// latest conversation.
    pub fn record(
        &self,
        role: AttemptRole,
        prompt_name: &str,
        stage_key: &str,
        label: &str,
        attempt: u32,
        outcome: &GatewayOutcome,
        item_id: Option<&str>,
    ) -> Result<()> {
        let entry = ConversationEntry {
            timestamp: utc_timestamp(),
            run_id: self.run_id.clone(),
            role,
            prompt: prompt_name.to_string(),
            label: label.to_string(),
            attempt,
            session_id: outcome.session.clone(),
            transcript_path: rel_display(&outcome.transcript_path, &self.workspace),
            reply_path: rel_display(&outcome.reply_path, &self.workspace),
            item_id: item_id.map(str::to_string),
        };

        if let Some(parent) = self.ledger_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.ledger_path)
            .with_context(|| format!("Failed to open ledger at {}", self.ledger_path.display()))?;
        let line = serde_json::to_string(&entry)?;
        writeln!(file, "{line}").with_context(|| {
            format!("Failed to append to ledger at {}", self.ledger_path.display())
        })?;

        if role == AttemptRole::Agent {
            if let Some(session) = &outcome.session {
                fs::create_dir_all(&self.sessions_dir).with_context(|| {
                    format!("Failed to create {}", self.sessions_dir.display())
                })?;
                let session_path = self.sessions_dir.join(format!("{stage_key}.session"));
                fs::write(&session_path, session).with_context(|| {
                    format!("Failed to write session mirror at {}", session_path.display())
                })?;
            }
        }

        Ok(())
    }

    /// Read the ledger back, skipping lines that do not parse.
    pub fn entries(&self) -> Result<Vec<ConversationEntry>> {
        if !self.ledger_path.exists() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&self.ledger_path)
            .with_context(|| format!("Failed to read ledger at {}", self.ledger_path.display()))?;
        Ok(text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}

/// Read optional JSON state: missing file is `None`, unreadable JSON is
/// reported and treated as `None`.
pub fn read_json_file(path: &Path) -> Option<Value> {
    if !path.exists() {
        return None;
    }
    let text = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&text) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(path = %path.display(), %err, "ignoring unparseable JSON file");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::GatewayOutcome;

    fn outcome(label: &str, session: Option<&str>) -> GatewayOutcome {
        GatewayOutcome {
            label: label.to_string(),
            reply: "done".to_string(),
            transcript_path: PathBuf::from(format!("/work/.foreman/{label}.log")),
            reply_path: PathBuf::from(format!("/work/.foreman/{label}.txt")),
            session: session.map(str::to_string),
        }
    }

    #[test]
    fn completed_set_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("processed_items.json");
        let backlog_path = dir.path().join("backlog.json");
        fs::write(&backlog_path, r#"{"tasks": []}"#).unwrap();

        let mut set = CompletedSet::load(&state_path);
        assert!(set.is_empty());
        set.insert("T-002");
        set.insert("T-001");
        set.save(&backlog_path).unwrap();

        let reloaded = CompletedSet::load(&state_path);
        assert!(reloaded.contains("T-001"));
        assert!(reloaded.contains("T-002"));
        assert_eq!(reloaded.ids().collect::<Vec<_>>(), vec!["T-001", "T-002"]);
        assert!(!reloaded.backlog_drifted(&backlog_path));
    }

    #[test]
    fn completed_set_detects_backlog_drift() {
        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("processed_items.json");
        let backlog_path = dir.path().join("backlog.json");
        fs::write(&backlog_path, r#"{"tasks": []}"#).unwrap();

        let mut set = CompletedSet::load(&state_path);
        set.insert("T-001");
        set.save(&backlog_path).unwrap();

        fs::write(&backlog_path, r#"{"tasks": [{"id": "T-001"}]}"#).unwrap();
        let reloaded = CompletedSet::load(&state_path);
        assert!(reloaded.backlog_drifted(&backlog_path));
        assert!(reloaded.contains("T-001"));
    }

    #[test]
    fn completed_set_accepts_bare_array_files() {
        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("processed_items.json");
        fs::write(&state_path, r#"["T-001", "T-003"]"#).unwrap();

        let set = CompletedSet::load(&state_path);
        assert!(set.contains("T-001"));
        assert!(set.contains("T-003"));
        assert!(!set.contains("T-002"));
    }

    #[test]
    fn corrupt_completed_set_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("processed_items.json");
        fs::write(&state_path, "{definitely not json").unwrap();

        let set = CompletedSet::load(&state_path);
        assert!(set.is_empty());
    }

    #[test]
    fn ledger_appends_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = RunLedger::new(
            dir.path(),
            dir.path().join("conversations.jsonl"),
            dir.path().join("sessions"),
        );
        ledger
            .record(
                AttemptRole::Agent,
                "Module Developer",
                "module_developer",
                "tasks/t-001/agent",
                1,
                &outcome("tasks/t-001/agent", Some("sess-1")),
                Some("T-001"),
            )
            .unwrap();
        ledger
            .record(
                AttemptRole::Manager,
                "Module Developer",
                "module_developer",
                "tasks/t-001/manager",
                1,
                &outcome("tasks/t-001/manager", None),
                Some("T-001"),
            )
            .unwrap();

        let entries = ledger.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].role, AttemptRole::Agent);
        assert_eq!(entries[0].session_id.as_deref(), Some("sess-1"));
        assert_eq!(entries[0].item_id.as_deref(), Some("T-001"));
        assert_eq!(entries[1].role, AttemptRole::Manager);
        assert_eq!(entries[0].run_id, entries[1].run_id);
    }

    #[test]
    fn agent_sessions_are_mirrored_per_stage() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = dir.path().join("sessions");
        let ledger = RunLedger::new(
            dir.path(),
            dir.path().join("conversations.jsonl"),
            &sessions,
        );
        ledger
            .record(
                AttemptRole::Agent,
                "Planner",
                "planner",
                "prompts/prompt5/agent",
                1,
                &outcome("prompts/prompt5/agent", Some("sess-9")),
                None,
            )
            .unwrap();
        ledger
            .record(
                AttemptRole::Qa,
                "Planner",
                "planner",
                "prompts/prompt5/qa",
                1,
                &outcome("prompts/prompt5/qa", Some("other")),
                None,
            )
            .unwrap();

        let mirrored = fs::read_to_string(sessions.join("planner.session")).unwrap();
        assert_eq!(mirrored, "sess-9");
        assert!(!sessions.join("qa.session").exists());
    }

    #[test]
    fn read_json_file_handles_missing_and_invalid() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_json_file(&dir.path().join("absent.json")).is_none());

        let bad = dir.path().join("bad.json");
        fs::write(&bad, "nope{").unwrap();
        assert!(read_json_file(&bad).is_none());

        let good = dir.path().join("good.json");
        fs::write(&good, r#"{"status": "triaged"}"#).unwrap();
        assert_eq!(read_json_file(&good).unwrap()["status"], "triaged");
    }
}
