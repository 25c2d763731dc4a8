//! Scripted gateway for exercising the state machine without a real CLI.

use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::GatewayError;
use crate::gateway::{AgentGateway, GatewayOutcome, InvocationRequest};
use crate::roles::AttemptRole;

/// One scripted response, consumed in push order.
#[derive(Debug, Clone)]
pub enum ScriptedStep {
    /// Successful invocation: reply text, optional session id, and files to
    /// drop into the workspace before returning (simulates the agent
    /// writing deliverables).
    Reply {
        reply: String,
        session: Option<String>,
        writes: Vec<(PathBuf, String)>,
    },
    /// Transport failure with the given exit code.
    Transport { code: i32 },
}

/// Everything the machine sent for one invocation.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub label: String,
    pub role: AttemptRole,
    pub prompt: String,
    pub resume_session: Option<String>,
    pub model_override: Option<String>,
}

/// Test double that replays scripted steps and records every request.
///
/// Panics when invoked past the end of its script; a test that trips that
/// has let the machine make more calls than the scenario allows.
pub struct ScriptedGateway {
    root: PathBuf,
    steps: Mutex<VecDeque<ScriptedStep>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedGateway {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            steps: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push_reply(&self, reply: &str, session: Option<&str>) {
        self.steps.lock().unwrap().push_back(ScriptedStep::Reply {
            reply: reply.to_string(),
            session: session.map(str::to_string),
            writes: Vec::new(),
        });
    }

    pub fn push_reply_with_writes(
        &self,
        reply: &str,
        session: Option<&str>,
        writes: Vec<(PathBuf, String)>,
    ) {
        self.steps.lock().unwrap().push_back(ScriptedStep::Reply {
            reply: reply.to_string(),
            session: session.map(str::to_string),
            writes,
        });
    }

    pub fn push_transport_failure(&self, code: i32) {
        self.steps
            .lock()
            .unwrap()
            .push_back(ScriptedStep::Transport { code });
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn remaining_steps(&self) -> usize {
        self.steps.lock().unwrap().len()
    }
}

#[async_trait]
impl AgentGateway for ScriptedGateway {
    async fn invoke(&self, request: InvocationRequest) -> Result<GatewayOutcome, GatewayError> {
        self.calls.lock().unwrap().push(RecordedCall {
            label: request.label.clone(),
            role: request.role,
            prompt: request.prompt.clone(),
            resume_session: request.resume_session.clone(),
            model_override: request.model_override.clone(),
        });

        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("gateway script exhausted at '{}'", request.label));

        match step {
            ScriptedStep::Transport { code } => Err(GatewayError::Exit {
                label: request.label,
                code,
            }),
            ScriptedStep::Reply {
                reply,
                session,
                writes,
            } => {
                for (path, content) in writes {
                    if let Some(parent) = path.parent() {
                        fs::create_dir_all(parent).expect("create scripted write dir");
                    }
                    fs::write(&path, content).expect("apply scripted write");
                }

                let transcript_path = self.root.join(format!("{}.log", request.label));
                let reply_path = self.root.join(format!("{}.txt", request.label));
                for path in [&transcript_path, &reply_path] {
                    if let Some(parent) = path.parent() {
                        fs::create_dir_all(parent).expect("create artifact dir");
                    }
                }
                fs::write(&transcript_path, &reply).expect("write scripted transcript");
                fs::write(&reply_path, &reply).expect("write scripted reply");

                Ok(GatewayOutcome {
                    label: request.label,
                    reply,
                    transcript_path,
                    reply_path,
                    session: session.or(request.resume_session),
                })
            }
        }
    }
}
