//! Invocation seam to the external coding-agent CLI.
//!
//! Everything above this module sees [`AgentGateway`]: prompt in, raw reply
//! plus continuation token out, transport failure as a typed error.
//! [`CliGateway`] is the production implementation driving the codex CLI as
//! a subprocess; tests substitute a scripted gateway.

pub mod process;

#[cfg(test)]
pub mod testing;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::errors::GatewayError;
use crate::gateway::process::ProcessHandle;
use crate::roles::AttemptRole;

static SESSION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(?:session|thread) id:(.*)$").unwrap());

/// One gateway invocation.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub prompt: String,
    /// Artifact-relative label; slashes become subdirectories.
    pub label: String,
    pub role: AttemptRole,
    /// Continuation token from the previous successful invocation of the
    /// same role, if any.
    pub resume_session: Option<String>,
    pub model_override: Option<String>,
}

/// What a successful invocation produced.
#[derive(Debug, Clone)]
pub struct GatewayOutcome {
    pub label: String,
    /// The agent's final message, already separated from the run chatter.
    pub reply: String,
    pub transcript_path: PathBuf,
    pub reply_path: PathBuf,
    /// Token for resuming this conversation; `None` when the CLI printed
    /// none and no resume token was supplied.
    pub session: Option<String>,
}

/// Object-safe seam the state machine drives work through.
#[async_trait]
pub trait AgentGateway: Send + Sync {
    async fn invoke(&self, request: InvocationRequest) -> Result<GatewayOutcome, GatewayError>;
}

/// Drives the codex CLI: builds the exec command, feeds the prompt over
/// stdin, tees stdout to a transcript, and derives the reply and session
/// token from the output.
pub struct CliGateway {
    workspace: PathBuf,
    artifacts_dir: PathBuf,
    program: String,
    sandbox: String,
    model: Option<String>,
    reasoning_effort: Option<String>,
    include_plan: bool,
    verbose: bool,
    reply_marker: String,
    reply_terminator: String,
}

impl CliGateway {
    pub fn new(workspace: impl Into<PathBuf>, artifacts_dir: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            artifacts_dir: artifacts_dir.into(),
            program: "codex".to_string(),
            sandbox: "danger-full-access".to_string(),
            model: None,
            reasoning_effort: None,
            include_plan: false,
            verbose: false,
            reply_marker: "codex".to_string(),
            reply_terminator: "tokens used".to_string(),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_sandbox(mut self, sandbox: impl Into<String>) -> Self {
        self.sandbox = sandbox.into();
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_reasoning_effort(mut self, effort: Option<String>) -> Self {
        self.reasoning_effort = effort;
        self
    }

    pub fn with_include_plan(mut self, include_plan: bool) -> Self {
        self.include_plan = include_plan;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_reply_markers(
        mut self,
        marker: impl Into<String>,
        terminator: impl Into<String>,
    ) -> Self {
        self.reply_marker = marker.into();
        self.reply_terminator = terminator.into();
        self
    }

    fn build_command(&self, request: &InvocationRequest) -> (Command, String) {
        let mut args: Vec<String> = vec![
            "--dangerously-bypass-approvals-and-sandbox".to_string(),
            "exec".to_string(),
            "--sandbox".to_string(),
            self.sandbox.clone(),
            "--skip-git-repo-check".to_string(),
            "--cd".to_string(),
            self.workspace.display().to_string(),
        ];
        if let Some(model) = request.model_override.as_ref().or(self.model.as_ref()) {
            args.push("-m".to_string());
            args.push(model.clone());
        }
        if let Some(effort) = self.reasoning_effort.as_ref().filter(|e| !e.is_empty()) {
            args.push("-c".to_string());
            args.push(format!("reasoning.effort=\"{effort}\""));
        }
        if self.include_plan && request.resume_session.is_none() {
            args.push("--include-plan-tool".to_string());
        }
        if let Some(session) = &request.resume_session {
            args.push("resume".to_string());
            args.push(session.clone());
        }

        let rendered = format!("{} {}", self.program, args.join(" "));
        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .current_dir(&self.workspace)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        (command, rendered)
    }
}

#[async_trait]
impl AgentGateway for CliGateway {
    async fn invoke(&self, request: InvocationRequest) -> Result<GatewayOutcome, GatewayError> {
        let transcript_path = self.artifacts_dir.join(format!("{}.log", request.label));
        let reply_path = self.artifacts_dir.join(format!("{}.txt", request.label));
        for path in [&transcript_path, &reply_path] {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|source| GatewayError::Transcript {
                    path: path.clone(),
                    source,
                })?;
            }
        }

        let (mut command, rendered) = self.build_command(&request);
        let mut handle = ProcessHandle::spawn(&mut command, &rendered)?;
        handle.feed_stdin(&request.prompt).await?;

        let mut transcript =
            fs::File::create(&transcript_path).map_err(|source| GatewayError::Transcript {
                path: transcript_path.clone(),
                source,
            })?;
        let mut raw_output = String::new();
        if let Some(stdout) = handle.take_stdout() {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                writeln!(transcript, "{line}").map_err(|source| GatewayError::Transcript {
                    path: transcript_path.clone(),
                    source,
                })?;
                if self.verbose {
                    eprintln!("{line}");
                }
                raw_output.push_str(&line);
                raw_output.push('\n');
            }
        }

        let status = handle.wait().await?;
        if !status.success() {
            return Err(GatewayError::Exit {
                label: request.label.clone(),
                code: status.code().unwrap_or(-1),
            });
        }

        let reply = extract_reply(&raw_output, &self.reply_marker, &self.reply_terminator);
        fs::write(&reply_path, format!("{reply}\n")).map_err(|source| GatewayError::Reply {
            path: reply_path.clone(),
            source,
        })?;

        let session = extract_session(&raw_output).or(request.resume_session);

        Ok(GatewayOutcome {
            label: request.label,
            reply,
            transcript_path,
            reply_path,
            session,
        })
    }
}

/// First `session id:` / `thread id:` line wins; the CLI prints it near the
/// top of a run. Empty values are ignored so a bare marker line cannot
/// clobber a resume token.
pub fn extract_session(raw_output: &str) -> Option<String> {
    for line in raw_output.lines() {
        if let Some(caps) = SESSION_REGEX.captures(line.trim()) {
            let value = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// The agent's final message: everything after the last marker line, up to
/// the terminator line. Output without a marker is returned whole.
pub fn extract_reply(raw_output: &str, marker: &str, terminator: &str) -> String {
    let lines: Vec<&str> = raw_output.lines().collect();
    let last_marker = lines.iter().rposition(|line| line.trim() == marker);
    let Some(start) = last_marker else {
        return raw_output.trim().to_string();
    };

    let mut message_lines = Vec::new();
    for line in &lines[start + 1..] {
        if line.trim().to_lowercase() == terminator {
            break;
        }
        message_lines.push(*line);
    }
    message_lines.join("\n").trim().to_string()
}
