//! Bug and feedback intake tracks.
//!
//! Both tracks walk per-item directories through a three-stage pipeline:
//! bugs run intake, triage, repro; feedback runs intake, review, plan. A
//! `state.json` in each item directory records the pending stage and the
//! routing history, and the `status` field of each stage's result file
//! decides whether the item advances, closes, or parks for a human.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::StageError;
use crate::flow::{ExecutionFlow, FlowRequest, ItemContext};
use crate::layout::Layout;
use crate::playbook::Playbook;
use crate::roles::RoleKind;
use crate::store::read_json_file;
use crate::ui::QueueUi;
use crate::util::{rel_display, utc_timestamp};
use crate::verdict::VerdictStatus;

/// Sentinel `pending_stage` for items the track has finished with.
const DONE_STAGE: &str = "done";

/// One stage of a track: the executor profile that runs it and the result
/// file that profile must leave in the item directory.
#[derive(Debug)]
pub struct StageSpec {
    pub name: &'static str,
    pub role: RoleKind,
    pub result_file: &'static str,
}

/// A staged intake track. `name` doubles as the directory under the state
/// root and the UI tag; `noun` labels the artifact block appended to each
/// stage prompt; `id_key` names the item in context payloads.
#[derive(Debug)]
pub struct TrackSpec {
    pub name: &'static str,
    pub noun: &'static str,
    pub id_key: &'static str,
    pub stages: [StageSpec; 3],
}

impl TrackSpec {
    /// Position and spec of a stage by name.
    pub fn stage(&self, name: &str) -> Option<(usize, &StageSpec)> {
        self.stages
            .iter()
            .enumerate()
            .find(|(_, stage)| stage.name == name)
    }
}

pub static BUG_TRACK: TrackSpec = TrackSpec {
    name: "bugs",
    noun: "Bug",
    id_key: "bug_id",
    stages: [
        StageSpec {
            name: "intake",
            role: RoleKind::BugIntake,
            result_file: "intake.json",
        },
        StageSpec {
            name: "triage",
            role: RoleKind::BugTriage,
            result_file: "triage.json",
        },
        StageSpec {
            name: "repro",
            role: RoleKind::BugRepro,
            result_file: "repro.json",
        },
    ],
};

pub static FEEDBACK_TRACK: TrackSpec = TrackSpec {
    name: "feedback",
    noun: "Feedback",
    id_key: "feedback_id",
    stages: [
        StageSpec {
            name: "intake",
            role: RoleKind::FeedbackIntake,
            result_file: "intake.json",
        },
        StageSpec {
            name: "review",
            role: RoleKind::FeedbackReview,
            result_file: "review.json",
        },
        StageSpec {
            name: "plan",
            role: RoleKind::FeedbackPlan,
            result_file: "plan.json",
        },
    ],
};

/// One routed stage execution in an item's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageEvent {
    pub stage: String,
    /// Raw lowercased `status` from the stage result file. Kept verbatim so
    /// the history shows what the reviewer actually wrote, not what the
    /// routing table made of it.
    pub status: String,
    pub timestamp: String,
}

/// Per-item pipeline state, persisted as `state.json` in the item dir.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageState {
    #[serde(default)]
    pub item_id: String,
    #[serde(default = "default_stage")]
    pub pending_stage: String,
    #[serde(default)]
    pub awaiting_human: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub awaiting_reason: Option<String>,
    #[serde(default)]
    pub history: Vec<StageEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

fn default_stage() -> String {
    "intake".to_string()
}

impl StageState {
    fn fresh() -> Self {
        Self {
            item_id: String::new(),
            pending_stage: default_stage(),
            awaiting_human: false,
            awaiting_reason: None,
            history: Vec::new(),
            updated_at: None,
        }
    }

    /// Load an item's state, tolerating a missing or corrupt file: either
    /// way the item restarts from intake instead of wedging the track.
    pub fn load(path: &Path, fallback_id: &str) -> Self {
        let mut state = match fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|err| {
                tracing::warn!(
                    path = %path.display(),
                    %err,
                    "could not parse stage state; starting fresh"
                );
                Self::fresh()
            }),
            Err(_) => Self::fresh(),
        };
        if state.item_id.is_empty() {
            state.item_id = fallback_id.to_string();
        }
        if state.pending_stage.is_empty() {
            state.pending_stage = default_stage();
        }
        state
    }

    /// Persist, stamping `updated_at`.
    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.updated_at = Some(utc_timestamp());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text).with_context(|| format!("writing {}", path.display()))
    }

    /// Whether the item has cleared its final stage.
    pub fn is_done(&self) -> bool {
        self.pending_stage == DONE_STAGE
    }
}

/// Where an item goes after a stage lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Advance(&'static str),
    /// Stay on the current stage and park the item until a human clears it.
    Hold(&'static str),
    Done,
}

/// Routing table, shared by both tracks.
///
/// The first stage holds on `needs_info`; the middle stage also closes on
/// `duplicate` or `rejected`; the final stage holds on `blocked` and closes
/// otherwise. Any status outside the vocabulary advances, the result file
/// stays on disk for the next stage to read.
pub fn transition(
    track: &TrackSpec,
    stage_index: usize,
    status: Option<VerdictStatus>,
) -> Transition {
    match (stage_index, status) {
        (0, Some(VerdictStatus::NeedsInfo)) => Transition::Hold("needs_info"),
        (0, _) => Transition::Advance(track.stages[1].name),
        (1, Some(VerdictStatus::NeedsInfo)) => Transition::Hold("needs_info"),
        (1, Some(VerdictStatus::Duplicate) | Some(VerdictStatus::Rejected)) => Transition::Done,
        (1, _) => Transition::Advance(track.stages[2].name),
        (_, Some(VerdictStatus::Blocked)) => Transition::Hold("blocked"),
        _ => Transition::Done,
    }
}

/// Context payload for a stage prompt, or `None` when the item's inputs
/// are not on disk yet.
///
/// The first stage sees the raw submission alone. Later stages get the full
/// picture: every stage result gathered so far (absent ones as `null`), the
/// backlog, and the item's own state.
fn build_stage_context(
    track: &TrackSpec,
    stage_index: usize,
    item_dir: &Path,
    backlog: Option<&Value>,
    state: &StageState,
    ui: &QueueUi,
) -> Option<String> {
    let submission = read_json_file(&item_dir.join("submission.json"));

    if stage_index == 0 {
        let Some(submission) = submission else {
            ui.note(
                track.name,
                format!(
                    "no submission.json for {}; waiting for the initial report",
                    state.item_id
                ),
            );
            return None;
        };
        return serde_json::to_string_pretty(&submission).ok();
    }

    let results: Vec<Option<Value>> = track
        .stages
        .iter()
        .map(|stage| read_json_file(&item_dir.join(stage.result_file)))
        .collect();
    if results[0].is_none() {
        ui.warn(
            track.name,
            format!(
                "cannot run stage '{}' for {} without {}",
                track.stages[stage_index].name, state.item_id, track.stages[0].result_file
            ),
        );
        return None;
    }

    let mut payload = serde_json::Map::new();
    payload.insert(track.id_key.to_string(), json!(state.item_id));
    payload.insert(
        "submission".to_string(),
        submission.unwrap_or(Value::Null),
    );
    for (stage, result) in track.stages.iter().zip(results) {
        payload.insert(stage.name.to_string(), result.unwrap_or(Value::Null));
    }
    payload.insert(
        "backlog".to_string(),
        backlog.cloned().unwrap_or(Value::Null),
    );
    payload.insert("state".to_string(), serde_json::to_value(state).ok()?);

    serde_json::to_string_pretty(&Value::Object(payload)).ok()
}

/// Consume a finished stage's result file and route the item.
///
/// The history records the raw status; parked flags are cleared first so a
/// hold decided here is the only thing that can re-set them.
fn advance_state(
    track: &TrackSpec,
    stage_index: usize,
    item_dir: &Path,
    state: &mut StageState,
) -> Result<(), StageError> {
    let stage = &track.stages[stage_index];
    let result_path = item_dir.join(stage.result_file);
    if !result_path.exists() {
        return Err(StageError::MissingResult {
            stage: stage.name.to_string(),
            path: result_path,
        });
    }
    let result: Value = fs::read_to_string(&result_path)
        .ok()
        .and_then(|text| serde_json::from_str(&text).ok())
        .ok_or(StageError::InvalidResult {
            path: result_path.clone(),
        })?;

    let raw_status = result
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_lowercase();
    state.history.push(StageEvent {
        stage: stage.name.to_string(),
        status: raw_status.clone(),
        timestamp: utc_timestamp(),
    });
    state.awaiting_reason = None;
    state.awaiting_human = false;

    match transition(track, stage_index, VerdictStatus::parse(&raw_status)) {
        Transition::Advance(next) => state.pending_stage = next.to_string(),
        Transition::Hold(reason) => {
            state.pending_stage = stage.name.to_string();
            state.awaiting_human = true;
            state.awaiting_reason = Some(reason.to_string());
        }
        Transition::Done => state.pending_stage = DONE_STAGE.to_string(),
    }
    Ok(())
}

/// Drives the bug and feedback tracks for one run.
///
/// Each item executes at most one stage per run; the next run picks up
/// wherever the state files left off.
pub struct StageRunner<'a> {
    layout: &'a Layout,
    playbook: &'a Playbook,
    flow: &'a ExecutionFlow<'a>,
    ui: &'a QueueUi,
}

impl<'a> StageRunner<'a> {
    pub fn new(
        layout: &'a Layout,
        playbook: &'a Playbook,
        flow: &'a ExecutionFlow<'a>,
        ui: &'a QueueUi,
    ) -> Self {
        Self {
            layout,
            playbook,
            flow,
            ui,
        }
    }

    pub async fn run_bugs(&self) -> Result<()> {
        self.run_track(&BUG_TRACK, self.layout.bugs_dir()).await
    }

    pub async fn run_feedback(&self) -> Result<()> {
        self.run_track(&FEEDBACK_TRACK, self.layout.feedback_dir())
            .await
    }

    async fn run_track(&self, track: &TrackSpec, root: PathBuf) -> Result<()> {
        if !root.exists() {
            return Ok(());
        }

        let backlog = read_json_file(self.layout.backlog_path());

        let mut item_dirs: Vec<PathBuf> = fs::read_dir(&root)
            .with_context(|| format!("reading {}", root.display()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        item_dirs.sort();

        for item_dir in item_dirs {
            let fallback_id = item_dir
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default()
                .to_string();
            let state_path = item_dir.join("state.json");
            let mut state = StageState::load(&state_path, &fallback_id);
            if !state_path.exists() {
                state.save(&state_path)?;
            }

            if state.is_done() || state.awaiting_human {
                continue;
            }

            let Some((stage_index, stage)) = track.stage(&state.pending_stage) else {
                self.ui.warn(
                    track.name,
                    format!(
                        "unknown pending stage '{}' for {}; skipping",
                        state.pending_stage, state.item_id
                    ),
                );
                continue;
            };

            let Some(spec) = self.playbook.supporting(stage.role) else {
                self.ui.warn(
                    track.name,
                    format!(
                        "profile '{}' is not registered; skipping {}",
                        stage.role.key(),
                        state.item_id
                    ),
                );
                continue;
            };

            let Some(context) = build_stage_context(
                track,
                stage_index,
                &item_dir,
                backlog.as_ref(),
                &state,
                self.ui,
            ) else {
                continue;
            };

            let mut prompt = spec.render(self.layout.prompts_dir(), &context)?;
            prompt.push_str(&format!(
                "\n\n{noun} artifacts:\n- {noun} directory: {}\n- State file: {}\n",
                rel_display(&item_dir, self.layout.workspace()),
                rel_display(&state_path, self.layout.workspace()),
                noun = track.noun,
            ));

            let label_root = format!("{}/{}/{}", track.name, state.item_id, stage.name);
            let request = FlowRequest::new(spec, prompt, &label_root).with_item(ItemContext {
                id: state.item_id.clone(),
                source: state_path.clone(),
                dir: item_dir.clone(),
            });

            let report = self.flow.run(&request).await?;
            if !report.outcome.is_accepted() {
                self.ui.warn(
                    track.name,
                    format!(
                        "stage '{}' failed for {}: {}",
                        stage.name, state.item_id, report.detail
                    ),
                );
                continue;
            }

            if let Err(err) = advance_state(track, stage_index, &item_dir, &mut state) {
                self.ui.warn(
                    track.name,
                    format!("could not update state for {}: {err}", state.item_id),
                );
                continue;
            }
            state.save(&state_path)?;
        }

        Ok(())
    }
}
