//! Gantry Pipeline - declarative pipeline execution
//!
//! Provides the pipeline engine that:
//! - Expands the interpreter-version matrix into run environments
//! - Executes phased shell commands per environment, with blocking and
//!   best-effort gating
//! - Aggregates results across environments behind a join barrier
//! - Applies the branch, deploy, and notification gates

pub mod deploy;
pub mod executor;
pub mod fakes;
pub mod history;
pub mod matrix;
pub mod notify;
pub mod report;
pub mod runner;
pub mod telemetry;

// Re-export key types
pub use deploy::{resolve_token, run_deploy, Deployer, DirectoryPublisher};
pub use executor::{CommandRunner, ExecutionContext, PhaseExecutor, ShellRunner};
pub use history::{FsStatusStore, StatusStore};
pub use matrix::expand_matrix;
pub use notify::{should_notify, LogNotifier, Notifier};
pub use report::render_text;
pub use runner::Pipeline;
pub use telemetry::init_tracing;
