//! Gantry Domain Model
//!
//! Defines the declarative job model and run outcome types:
//! - JobSpec: the whole declaration (version matrix, phases, gating sections)
//! - PhaseSpec / Step: ordered shell commands with explicit capability toggles
//! - RunEnvironment: one concrete matrix entry
//! - CommandStatus / PhaseResult / EnvironmentResult / RunOutcome: results
//! - DeploySpec / Notifications: deploy and notification gating declarations
//!
//! All objects are serializable; the declaration is content-addressable
//! (SHA256 of its canonical JSON encoding).

pub mod error;
pub mod schema;

pub use error::{PipelineError, Result};
pub use schema::{
    BranchFilter, Capabilities, CommandStatus, DeployCondition, DeployOutcome, DeploySpec,
    DetailedStep, EmailNotifications, EnvironmentResult, JobSpec, Notifications, NotifyPolicy,
    PhaseKind, PhaseName, PhaseResult, PhaseSpec, RunEnvironment, RunOutcome, RunStatus, Step,
};

/// Gantry domain version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
