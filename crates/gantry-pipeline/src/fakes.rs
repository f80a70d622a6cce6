//! In-memory fakes for the pipeline trait seams (testing only)
//!
//! Provides `ScriptedRunner`, `MemoryStatusStore`, `RecordingDeployer`, and
//! `RecordingNotifier` that satisfy the trait contracts without touching the
//! process table, the filesystem, or the network.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use gantry_domain::{CommandStatus, DeploySpec, PipelineError, Result, RunStatus};

use crate::deploy::Deployer;
use crate::executor::{CommandRunner, ExecutionContext};
use crate::history::StatusStore;
use crate::notify::Notifier;

// ---------------------------------------------------------------------------
// ScriptedRunner
// ---------------------------------------------------------------------------

/// Record of one command invocation, with the context it observed.
#[derive(Debug, Clone)]
pub struct RanCommand {
    pub interpreter: String,
    pub command: String,
    /// Comma-joined capability set at invocation time.
    pub capabilities: String,
}

#[derive(Debug)]
struct FailureRule {
    substring: String,
    interpreter: Option<String>,
    exit_code: i32,
}

/// Command runner that records invocations instead of spawning processes.
///
/// Every command succeeds unless a failure rule matches it; rules match by
/// substring (optionally scoped to one interpreter version), mirroring how
/// test declarations name their failing steps.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    commands: Mutex<Vec<RanCommand>>,
    services: Mutex<Vec<String>>,
    failure_rules: Mutex<Vec<FailureRule>>,
    failing_services: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands containing `substring` fail with `exit_code` in every
    /// environment.
    pub fn fail_matching(&self, substring: &str, exit_code: i32) {
        self.failure_rules.lock().unwrap().push(FailureRule {
            substring: substring.to_string(),
            interpreter: None,
            exit_code,
        });
    }

    /// Commands containing `substring` fail with `exit_code`, but only in
    /// the environment running `interpreter`.
    pub fn fail_matching_in(&self, substring: &str, interpreter: &str, exit_code: i32) {
        self.failure_rules.lock().unwrap().push(FailureRule {
            substring: substring.to_string(),
            interpreter: Some(interpreter.to_string()),
            exit_code,
        });
    }

    /// The named service fails to start.
    pub fn fail_service(&self, name: &str) {
        self.failing_services.lock().unwrap().push(name.to_string());
    }

    /// All recorded invocations, in execution order.
    pub fn executed(&self) -> Vec<RanCommand> {
        self.commands.lock().unwrap().clone()
    }

    /// Just the command strings, in execution order.
    pub fn executed_commands(&self) -> Vec<String> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.command.clone())
            .collect()
    }

    /// Services started so far.
    pub fn started_services(&self) -> Vec<String> {
        self.services.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run_command(&self, ctx: &ExecutionContext, command: &str) -> Result<CommandStatus> {
        self.commands.lock().unwrap().push(RanCommand {
            interpreter: ctx.environment.interpreter.clone(),
            command: command.to_string(),
            capabilities: ctx.capabilities.as_env_value(),
        });

        let exit_code = self
            .failure_rules
            .lock()
            .unwrap()
            .iter()
            .find(|rule| {
                command.contains(rule.substring.as_str())
                    && rule
                        .interpreter
                        .as_deref()
                        .map_or(true, |v| v == ctx.environment.interpreter)
            })
            .map(|rule| rule.exit_code)
            .unwrap_or(0);

        Ok(CommandStatus {
            command: command.to_string(),
            exit_code,
            stdout: String::new(),
            stderr: if exit_code == 0 {
                String::new()
            } else {
                "scripted failure".to_string()
            },
            duration_ms: 1,
            succeeded: exit_code == 0,
        })
    }

    async fn start_service(&self, name: &str) -> Result<()> {
        if self
            .failing_services
            .lock()
            .unwrap()
            .iter()
            .any(|s| s == name)
        {
            return Err(PipelineError::ServiceStart {
                service: name.to_string(),
                reason: "scripted failure".to_string(),
            });
        }
        self.services.lock().unwrap().push(name.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryStatusStore
// ---------------------------------------------------------------------------

/// In-memory status history backed by a `HashMap<branch, RunStatus>`.
#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    statuses: Mutex<HashMap<String, RunStatus>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a previous status for a branch.
    pub fn seed(&self, branch: &str, status: RunStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert(branch.to_string(), status);
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn last_status(&self, branch: &str) -> Result<Option<RunStatus>> {
        Ok(self.statuses.lock().unwrap().get(branch).copied())
    }

    async fn record_status(&self, branch: &str, status: RunStatus) -> Result<()> {
        self.statuses
            .lock()
            .unwrap()
            .insert(branch.to_string(), status);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingDeployer
// ---------------------------------------------------------------------------

/// Deployer that records publish requests; optionally fails with a
/// network-style error.
#[derive(Debug, Default)]
pub struct RecordingDeployer {
    published: Mutex<Vec<String>>,
    network_failure: Mutex<Option<String>>,
}

impl RecordingDeployer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every publish attempt fail with a network error.
    pub fn fail_network(&self, reason: &str) {
        *self.network_failure.lock().unwrap() = Some(reason.to_string());
    }

    /// Number of publish invocations so far.
    pub fn publish_count(&self) -> usize {
        self.published.lock().unwrap().len()
    }

    /// Source directories published, in order.
    pub fn published_dirs(&self) -> Vec<String> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl Deployer for RecordingDeployer {
    async fn publish(&self, spec: &DeploySpec, _token: &str) -> Result<String> {
        if let Some(reason) = self.network_failure.lock().unwrap().clone() {
            return Err(PipelineError::Network(reason));
        }
        let dir = spec.local_dir.display().to_string();
        self.published.lock().unwrap().push(dir.clone());
        Ok(format!("published {}", dir))
    }
}

// ---------------------------------------------------------------------------
// RecordingNotifier
// ---------------------------------------------------------------------------

/// One captured notification.
#[derive(Debug, Clone)]
pub struct SentNotification {
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// Notifier that captures messages instead of dispatching them.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, recipients: &[String], subject: &str, body: &str) -> Result<()> {
        self.sent.lock().unwrap().push(SentNotification {
            recipients: recipients.to_vec(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}
