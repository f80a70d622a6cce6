//! Phase execution against the command-runner contract.

use async_trait::async_trait;
use gantry_domain::{
    Capabilities, CommandStatus, PhaseResult, PhaseSpec, PipelineError, Result, RunEnvironment,
};
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, warn};

/// Per-environment execution context, passed to every phase invocation.
///
/// Holds the immutable environment plus the mutable capability set that
/// steps grant and revoke as the run progresses. Never process-global, so
/// concurrent environments cannot observe each other's state.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub environment: RunEnvironment,
    pub capabilities: Capabilities,
}

impl ExecutionContext {
    pub fn new(environment: RunEnvironment) -> Self {
        Self {
            environment,
            capabilities: Capabilities::new(),
        }
    }
}

/// Contract for executing shell-level commands and starting services.
///
/// The engine never talks to `tokio::process` directly; tests substitute a
/// scripted fake (see the `fakes` module).
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Execute one shell command in the given context.
    ///
    /// `Ok` with a failed [`CommandStatus`] means the command ran and exited
    /// non-zero (or timed out); `Err` means it could not be executed at all.
    async fn run_command(&self, ctx: &ExecutionContext, command: &str) -> Result<CommandStatus>;

    /// Start an auxiliary background service.
    async fn start_service(&self, name: &str) -> Result<()>;
}

/// Real command runner: executes commands through `sh -c`.
///
/// The environment's variable map, interpreter version, and current
/// capability set are exported into the child process environment
/// (`GANTRY_INTERPRETER`, `GANTRY_CAPABILITIES`), which is how delegated
/// tools observe the capability toggle.
pub struct ShellRunner {
    timeout_secs: u64,
}

impl ShellRunner {
    /// Create a runner with a per-command wall-clock timeout.
    /// A timeout of 0 disables the bound.
    pub fn new(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run_command(&self, ctx: &ExecutionContext, command: &str) -> Result<CommandStatus> {
        let start = Instant::now();

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .envs(&ctx.environment.env)
            .env("GANTRY_INTERPRETER", &ctx.environment.interpreter)
            .env("GANTRY_CAPABILITIES", ctx.capabilities.as_env_value())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = if self.timeout_secs > 0 {
            match tokio::time::timeout(
                std::time::Duration::from_secs(self.timeout_secs),
                child.wait_with_output(),
            )
            .await
            {
                Ok(result) => result?,
                Err(_) => {
                    // Timeout is gated identically to a command failure.
                    return Ok(CommandStatus::failed(
                        command,
                        format!("timed out after {} seconds", self.timeout_secs),
                    ));
                }
            }
        } else {
            child.wait_with_output().await?
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = output.status.code().unwrap_or(-1);

        Ok(CommandStatus {
            command: command.to_string(),
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms,
            succeeded: output.status.success(),
        })
    }

    async fn start_service(&self, name: &str) -> Result<()> {
        let ctx = ExecutionContext::new(RunEnvironment::new(
            "service".to_string(),
            String::new(),
            Default::default(),
        ));
        let status = self
            .run_command(&ctx, &format!("service {} start", name))
            .await
            .map_err(|e| PipelineError::ServiceStart {
                service: name.to_string(),
                reason: e.to_string(),
            })?;

        if status.succeeded {
            Ok(())
        } else {
            Err(PipelineError::ServiceStart {
                service: name.to_string(),
                reason: format!("exit code {}: {}", status.exit_code, status.stderr.trim()),
            })
        }
    }
}

/// Executes the steps of one phase in declaration order.
pub struct PhaseExecutor;

impl PhaseExecutor {
    /// Run every step of `phase` in `ctx`, synchronously and in order.
    ///
    /// Blocking phases stop at the first failing step; the remaining steps
    /// are skipped and do not appear in the result. Best-effort phases
    /// record failures and continue. Capability toggles (`grants`/`revokes`)
    /// apply only after the step succeeds; a step whose `requires`
    /// capability is absent is recorded as failed without executing.
    pub async fn execute(
        runner: &dyn CommandRunner,
        ctx: &mut ExecutionContext,
        phase: &PhaseSpec,
    ) -> PhaseResult {
        let mut commands = Vec::new();
        let mut succeeded = true;

        for step in &phase.steps {
            if let Some(required) = step.requires() {
                if !ctx.capabilities.has(required) {
                    warn!(
                        phase = %phase.name,
                        command = %step.command(),
                        capability = %required,
                        "step requires a capability that is not granted"
                    );
                    commands.push(CommandStatus::failed(
                        step.command(),
                        format!("required capability '{}' is not granted", required),
                    ));
                    succeeded = false;
                    if phase.kind.is_blocking() {
                        break;
                    }
                    continue;
                }
            }

            debug!(phase = %phase.name, command = %step.command(), "executing command");

            // Spawn errors are folded into a failed status so the gate sees
            // them the same way it sees a non-zero exit.
            let status = match runner.run_command(ctx, step.command()).await {
                Ok(status) => status,
                Err(e) => CommandStatus::failed(step.command(), e.to_string()),
            };

            if status.succeeded {
                if let Some(cap) = step.grants() {
                    ctx.capabilities.grant(cap);
                }
                if let Some(cap) = step.revokes() {
                    ctx.capabilities.revoke(cap);
                }
            } else {
                warn!(
                    phase = %phase.name,
                    command = %status.command,
                    exit_code = status.exit_code,
                    "command failed"
                );
                succeeded = false;
            }

            let failed = !status.succeeded;
            commands.push(status);

            if failed && phase.kind.is_blocking() {
                break;
            }
        }

        PhaseResult {
            phase: phase.name,
            kind: phase.kind,
            commands,
            succeeded,
        }
    }
}
