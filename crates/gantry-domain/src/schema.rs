//! Job declaration schema and run outcome types
//!
//! The declaration is deserialized from a YAML mapping whose top-level keys
//! mirror the classic hosted-CI format: an interpreter version axis, shared
//! environment variables, four ordered phase command lists, a branch
//! allow-list, notification policy, and a deploy target.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};

// ============================================================================
// 1. JOB DECLARATION - what to run
// ============================================================================

/// A complete pipeline declaration.
///
/// Identity: SHA256 of the canonical JSON encoding, see [`JobSpec::digest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Language identifier (informational, used in environment labels).
    #[serde(default = "default_language")]
    pub language: String,

    /// Interpreter versions forming the environment matrix, in declaration
    /// order. Must be non-empty.
    #[serde(rename = "python", alias = "interpreter_versions", default)]
    pub interpreter_versions: Vec<String>,

    /// Auxiliary services started once, before any phase runs.
    #[serde(default)]
    pub services: Vec<String>,

    /// Environment variables inherited by every run environment.
    #[serde(rename = "env", default)]
    pub env_setup: BTreeMap<String, String>,

    /// OS-level setup commands (blocking).
    #[serde(default)]
    pub before_install: Vec<Step>,

    /// Language-level install/build commands (blocking).
    #[serde(default)]
    pub install: Vec<Step>,

    /// Test/build commands (blocking).
    #[serde(default)]
    pub script: Vec<Step>,

    /// Post-success commands such as coverage upload (best-effort).
    #[serde(default)]
    pub after_success: Vec<Step>,

    /// Branch allow-list; empty admits every branch.
    #[serde(default)]
    pub branches: BranchFilter,

    /// Notification recipients and trigger policy.
    #[serde(default)]
    pub notifications: Option<Notifications>,

    /// Deploy target descriptor.
    #[serde(default)]
    pub deploy: Option<DeploySpec>,
}

fn default_language() -> String {
    "generic".to_string()
}

impl JobSpec {
    /// Load and validate a declaration from a YAML file.
    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PipelineError::Config(format!(
                "declaration file not found: {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate a declaration from YAML source.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let spec: JobSpec = serde_yaml::from_str(content)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Validate the declaration.
    ///
    /// Rules:
    /// - at least one interpreter version must be declared
    /// - no step may carry an empty command string
    /// - a deploy section must name the credential environment variable
    pub fn validate(&self) -> Result<()> {
        if self.interpreter_versions.is_empty() {
            return Err(PipelineError::Config(
                "no interpreter versions declared".to_string(),
            ));
        }

        for phase in self.phases() {
            for step in &phase.steps {
                if step.command().trim().is_empty() {
                    return Err(PipelineError::Config(format!(
                        "phase '{}' contains an empty command",
                        phase.name
                    )));
                }
            }
        }

        if let Some(deploy) = &self.deploy {
            if deploy.token_env.trim().is_empty() {
                return Err(PipelineError::Config(
                    "deploy.token_env must name an environment variable".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// SHA-256 digest of the canonical JSON encoding (deterministic).
    pub fn digest(&self) -> String {
        let json = serde_json::to_string(self).expect("JobSpec is serializable");
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// All declared phases in execution order, with their gating kind.
    pub fn phases(&self) -> Vec<PhaseSpec> {
        let mut phases = self.blocking_phases();
        phases.push(self.after_success_phase());
        phases
    }

    /// The blocking phases in execution order.
    pub fn blocking_phases(&self) -> Vec<PhaseSpec> {
        vec![
            PhaseSpec::new(
                PhaseName::BeforeInstall,
                PhaseKind::Blocking,
                self.before_install.clone(),
            ),
            PhaseSpec::new(PhaseName::Install, PhaseKind::Blocking, self.install.clone()),
            PhaseSpec::new(PhaseName::Script, PhaseKind::Blocking, self.script.clone()),
        ]
    }

    /// The best-effort post-success phase.
    pub fn after_success_phase(&self) -> PhaseSpec {
        PhaseSpec::new(
            PhaseName::AfterSuccess,
            PhaseKind::BestEffort,
            self.after_success.clone(),
        )
    }

    /// Whether the given source-control branch may run this job.
    pub fn branch_allowed(&self, branch: &str) -> bool {
        self.branches.allows(branch)
    }
}

/// Branch allow-list (`branches.only`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BranchFilter {
    #[serde(default)]
    pub only: Vec<String>,
}

impl BranchFilter {
    /// An empty allow-list admits every branch.
    pub fn allows(&self, branch: &str) -> bool {
        self.only.is_empty() || self.only.iter().any(|b| b == branch)
    }
}

// ============================================================================
// 2. PHASES AND STEPS
// ============================================================================

/// The named phases of a pipeline run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseName {
    BeforeInstall,
    Install,
    Script,
    AfterSuccess,
}

impl PhaseName {
    /// Get the phase name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            PhaseName::BeforeInstall => "before_install",
            PhaseName::Install => "install",
            PhaseName::Script => "script",
            PhaseName::AfterSuccess => "after_success",
        }
    }
}

impl fmt::Display for PhaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Gating behavior of a phase. Policy is data: the runner never name-checks
/// phases to decide whether a failure halts the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    /// A failing command halts the environment.
    Blocking,
    /// A failing command is recorded but never fails the run.
    BestEffort,
}

impl PhaseKind {
    pub fn is_blocking(&self) -> bool {
        matches!(self, PhaseKind::Blocking)
    }
}

/// One entry in a phase command list.
///
/// Bare strings cover the common case. The detailed form carries explicit
/// capability toggles so that an install-run-uninstall-run sequence reads as
/// intentional rather than as redundant steps: the capability granted by one
/// step and revoked by a later one is visible to the runner contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Step {
    Shell(String),
    Detailed(DetailedStep),
}

/// Detailed step form with capability toggles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedStep {
    /// Shell command to execute.
    pub run: String,

    /// Capability that must be present before this step may run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires: Option<String>,

    /// Capability granted once this step succeeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grants: Option<String>,

    /// Capability revoked once this step succeeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revokes: Option<String>,
}

impl Step {
    /// The shell command this step executes.
    pub fn command(&self) -> &str {
        match self {
            Step::Shell(cmd) => cmd,
            Step::Detailed(step) => &step.run,
        }
    }

    /// Capability required before execution, if any.
    pub fn requires(&self) -> Option<&str> {
        match self {
            Step::Shell(_) => None,
            Step::Detailed(step) => step.requires.as_deref(),
        }
    }

    /// Capability granted on success, if any.
    pub fn grants(&self) -> Option<&str> {
        match self {
            Step::Shell(_) => None,
            Step::Detailed(step) => step.grants.as_deref(),
        }
    }

    /// Capability revoked on success, if any.
    pub fn revokes(&self) -> Option<&str> {
        match self {
            Step::Shell(_) => None,
            Step::Detailed(step) => step.revokes.as_deref(),
        }
    }
}

/// An ordered phase command list with its gating kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSpec {
    pub name: PhaseName,
    pub kind: PhaseKind,
    pub steps: Vec<Step>,
}

impl PhaseSpec {
    pub fn new(name: PhaseName, kind: PhaseKind, steps: Vec<Step>) -> Self {
        Self { name, kind, steps }
    }
}

// ============================================================================
// 3. RUN ENVIRONMENTS AND CAPABILITIES
// ============================================================================

/// One concrete matrix entry: a single interpreter version plus the inherited
/// environment variables. Immutable once created by the matrix expander.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEnvironment {
    /// Language identifier, copied from the declaration.
    pub language: String,

    /// Interpreter version selected for this environment.
    pub interpreter: String,

    /// Environment variables inherited from the declaration.
    pub env: BTreeMap<String, String>,
}

impl RunEnvironment {
    pub fn new(language: String, interpreter: String, env: BTreeMap<String, String>) -> Self {
        Self {
            language,
            interpreter,
            env,
        }
    }

    /// Reporting label, e.g. `python-3.6`.
    pub fn label(&self) -> String {
        format!("{}-{}", self.language, self.interpreter)
    }
}

/// The set of named capability toggles held by one environment during a run.
///
/// Capabilities are granted and revoked by steps and exported to delegated
/// tools through the process environment. They model optional execution modes
/// (e.g. MPI-parallel testing) explicitly instead of inferring them from
/// package presence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities(BTreeSet<String>);

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a capability to the set.
    pub fn grant(&mut self, name: &str) {
        self.0.insert(name.to_string());
    }

    /// Remove a capability; returns whether it was present.
    pub fn revoke(&mut self, name: &str) -> bool {
        self.0.remove(name)
    }

    /// Whether a capability is currently held.
    pub fn has(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Comma-joined form exported to child processes.
    pub fn as_env_value(&self) -> String {
        self.0.iter().cloned().collect::<Vec<_>>().join(",")
    }
}

// ============================================================================
// 4. NOTIFICATIONS AND DEPLOY
// ============================================================================

/// Notification trigger policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyPolicy {
    /// Notify on every run.
    Always,
    /// Notify only when the status differs from the previous run
    /// (no previous status counts as a change).
    Change,
    /// Never notify.
    Never,
}

impl NotifyPolicy {
    fn change() -> Self {
        NotifyPolicy::Change
    }

    fn always() -> Self {
        NotifyPolicy::Always
    }
}

/// Notification section of the declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notifications {
    #[serde(default)]
    pub email: Option<EmailNotifications>,
}

/// Email recipients plus per-status trigger policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailNotifications {
    #[serde(default)]
    pub recipients: Vec<String>,

    /// Policy applied when the run succeeds.
    #[serde(default = "NotifyPolicy::change")]
    pub on_success: NotifyPolicy,

    /// Policy applied when the run fails.
    #[serde(default = "NotifyPolicy::always")]
    pub on_failure: NotifyPolicy,
}

/// Deploy target descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploySpec {
    /// Provider identifier (e.g. `pages`).
    pub provider: String,

    /// Name of the environment variable holding the deploy credential.
    /// The secret itself never appears in the declaration.
    pub token_env: String,

    /// Local artifact directory to publish.
    pub local_dir: PathBuf,

    /// When true, the publish target keeps files from previous deploys.
    #[serde(default)]
    pub skip_cleanup: bool,

    /// Branch condition gating the deploy.
    #[serde(rename = "on", default)]
    pub condition: DeployCondition,
}

/// Branch condition for the deploy gate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeployCondition {
    #[serde(default)]
    pub branch: Option<String>,
}

impl DeploySpec {
    /// Whether the deploy gate admits the given branch.
    pub fn branch_allowed(&self, branch: &str) -> bool {
        match &self.condition.branch {
            Some(required) => required == branch,
            None => true,
        }
    }
}

// ============================================================================
// 5. RESULTS AND OUTCOME
// ============================================================================

/// Outcome of executing one command within one environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandStatus {
    /// Command string as declared.
    pub command: String,

    /// Exit code (0 = success, -1 = spawn failure or timeout).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Whether execution succeeded.
    pub succeeded: bool,
}

impl CommandStatus {
    /// A synthesized failure for commands that never produced an exit status
    /// (spawn error, timeout, unmet capability requirement).
    pub fn failed(command: &str, detail: String) -> Self {
        Self {
            command: command.to_string(),
            exit_code: -1,
            stdout: String::new(),
            stderr: detail,
            duration_ms: 0,
            succeeded: false,
        }
    }
}

/// Outcome of executing one phase within one environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase: PhaseName,
    pub kind: PhaseKind,

    /// Per-command statuses in execution order. Commands skipped after a
    /// blocking failure do not appear.
    pub commands: Vec<CommandStatus>,

    /// Whether every executed command succeeded.
    pub succeeded: bool,
}

impl PhaseResult {
    /// Number of commands that succeeded.
    pub fn passed_count(&self) -> usize {
        self.commands.iter().filter(|c| c.succeeded).count()
    }

    /// Number of commands that failed.
    pub fn failed_count(&self) -> usize {
        self.commands.iter().filter(|c| !c.succeeded).count()
    }
}

/// Aggregate outcome for one run environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentResult {
    pub environment: RunEnvironment,

    /// Phase results in execution order; phases never reached are absent.
    pub phases: Vec<PhaseResult>,

    /// Whether every blocking phase succeeded.
    pub succeeded: bool,
}

impl EnvironmentResult {
    /// Look up the result for a specific phase, if it ran.
    pub fn phase(&self, name: PhaseName) -> Option<&PhaseResult> {
        self.phases.iter().find(|p| p.phase == name)
    }

    /// Total number of commands executed across all phases.
    pub fn command_count(&self) -> usize {
        self.phases.iter().map(|p| p.commands.len()).sum()
    }
}

/// Lifecycle status of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Branch filter rejected the trigger; nothing executed.
    Skipped,
    Succeeded,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Skipped => write!(f, "skipped"),
            RunStatus::Succeeded => write!(f, "succeeded"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Outcome of the deploy step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployOutcome {
    pub provider: String,

    /// Whether the artifact directory was published.
    pub published: bool,

    /// Human-readable detail (target, or failure reason).
    pub detail: String,
}

/// Aggregate outcome over all run environments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    /// Unique run ID.
    pub run_id: String,

    /// Digest of the job declaration.
    pub spec_digest: String,

    /// Branch the run was triggered from.
    pub branch: String,

    pub status: RunStatus,

    /// Per-environment results in matrix order; empty for skipped runs.
    pub environments: Vec<EnvironmentResult>,

    /// Deploy outcome, present only when the deploy gate opened.
    pub deploy: Option<DeployOutcome>,

    /// Best-effort failures surfaced without failing the run.
    pub warnings: Vec<String>,

    /// Total duration in milliseconds.
    pub duration_ms: u64,

    /// When the run finished.
    pub finished_at: DateTime<Utc>,
}

impl RunOutcome {
    /// Whether all blocking phases across all environments succeeded.
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    /// Process-level exit code: non-zero iff the run failed.
    pub fn exit_code(&self) -> i32 {
        match self.status {
            RunStatus::Failed => 1,
            RunStatus::Skipped | RunStatus::Succeeded => 0,
        }
    }

    /// Number of environments whose blocking phases all passed.
    pub fn passed_count(&self) -> usize {
        self.environments.iter().filter(|e| e.succeeded).count()
    }

    /// Number of environments with a blocking-phase failure.
    pub fn failed_count(&self) -> usize {
        self.environments.iter().filter(|e| !e.succeeded).count()
    }
}
