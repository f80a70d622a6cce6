//! Pipeline orchestration and run aggregation.
//!
//! A run proceeds through fixed steps: branch gate, service startup,
//! per-environment phase execution (concurrent, joined before aggregation),
//! post-barrier best-effort phase, the single-shot deploy gate, and the
//! notification epilogue.

use chrono::Utc;
use futures::future::join_all;
use gantry_domain::{
    DeployOutcome, EnvironmentResult, JobSpec, PhaseSpec, Result, RunEnvironment, RunOutcome,
    RunStatus,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::deploy::{run_deploy, Deployer};
use crate::executor::{CommandRunner, ExecutionContext, PhaseExecutor};
use crate::history::StatusStore;
use crate::matrix::expand_matrix;
use crate::notify::{should_notify, Notifier};
use crate::report;

/// Pipeline orchestrator over the four trait seams.
pub struct Pipeline {
    runner: Arc<dyn CommandRunner>,
    deployer: Arc<dyn Deployer>,
    notifier: Arc<dyn Notifier>,
    history: Arc<dyn StatusStore>,
}

/// Identity and timing shared by every outcome a run can produce.
struct RunContext {
    run_id: String,
    spec_digest: String,
    branch: String,
    start: Instant,
}

impl RunContext {
    fn outcome(
        &self,
        status: RunStatus,
        environments: Vec<EnvironmentResult>,
        deploy: Option<DeployOutcome>,
        warnings: Vec<String>,
    ) -> RunOutcome {
        RunOutcome {
            run_id: self.run_id.clone(),
            spec_digest: self.spec_digest.clone(),
            branch: self.branch.clone(),
            status,
            environments,
            deploy,
            warnings,
            duration_ms: self.start.elapsed().as_millis() as u64,
            finished_at: Utc::now(),
        }
    }
}

impl Pipeline {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        deployer: Arc<dyn Deployer>,
        notifier: Arc<dyn Notifier>,
        history: Arc<dyn StatusStore>,
    ) -> Self {
        Self {
            runner,
            deployer,
            notifier,
            history,
        }
    }

    /// Execute one pipeline run for the given declaration and branch.
    ///
    /// A failing run is a successful invocation: failures of phases,
    /// services, deploy, or notification are folded into the returned
    /// [`RunOutcome`]. `Err` means the declaration itself was unusable.
    pub async fn run(&self, spec: &JobSpec, branch: &str) -> Result<RunOutcome> {
        spec.validate()?;

        let ctx = RunContext {
            run_id: Uuid::new_v4().to_string(),
            spec_digest: spec.digest(),
            branch: branch.to_string(),
            start: Instant::now(),
        };

        info!(
            event = "run.started",
            run_id = %ctx.run_id,
            branch = %branch,
            spec = %&ctx.spec_digest[..12],
        );

        // Branch gate: the only cancellation point. Nothing is acquired for
        // a trigger from a non-matching branch.
        if !spec.branch_allowed(branch) {
            info!(event = "run.skipped", run_id = %ctx.run_id, branch = %branch);
            return Ok(ctx.outcome(RunStatus::Skipped, vec![], None, vec![]));
        }

        let mut warnings = Vec::new();

        // Services start once per run, before any environment. A failure is
        // an environment setup failure: the run fails before any phase.
        for service in &spec.services {
            if let Err(e) = self.runner.start_service(service).await {
                warn!(service = %service, error = %e, "service failed to start");
                warnings.push(e.to_string());
                let outcome = ctx.outcome(RunStatus::Failed, vec![], None, warnings);
                self.finish(spec, &outcome).await;
                return Ok(outcome);
            }
        }

        // One concurrent worker per environment; the join is the barrier
        // before aggregation. Environments are isolated and independent.
        let environments = expand_matrix(spec)?;
        let blocking = spec.blocking_phases();
        let mut results: Vec<(EnvironmentResult, ExecutionContext)> = join_all(
            environments
                .into_iter()
                .map(|env| self.run_environment(env, &blocking)),
        )
        .await;

        let all_ok = results.iter().all(|(result, _)| result.succeeded);

        // Post-barrier best-effort phase, once per environment. Failures are
        // swallowed at the phase boundary and surfaced as warnings.
        if all_ok {
            let after = spec.after_success_phase();
            if !after.steps.is_empty() {
                for (result, env_ctx) in results.iter_mut() {
                    let phase_result =
                        PhaseExecutor::execute(self.runner.as_ref(), env_ctx, &after).await;
                    for cmd in phase_result.commands.iter().filter(|c| !c.succeeded) {
                        warnings.push(format!(
                            "after_success command '{}' failed in {}",
                            cmd.command,
                            result.environment.label()
                        ));
                    }
                    result.phases.push(phase_result);
                }
            }
        }

        // Deploy gate: aggregate success + branch condition, enforced once
        // after the barrier, never per environment.
        let mut deploy = None;
        if all_ok {
            if let Some(deploy_spec) = &spec.deploy {
                if deploy_spec.branch_allowed(branch) {
                    let deploy_outcome = run_deploy(self.deployer.as_ref(), deploy_spec).await;
                    if !deploy_outcome.published {
                        warnings.push(format!("deploy not published: {}", deploy_outcome.detail));
                    }
                    deploy = Some(deploy_outcome);
                } else {
                    info!(branch = %branch, "deploy branch condition not met");
                }
            }
        }

        let status = if all_ok {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        };
        let environments = results.into_iter().map(|(result, _)| result).collect();
        let outcome = ctx.outcome(status, environments, deploy, warnings);

        self.finish(spec, &outcome).await;

        info!(
            event = "run.finished",
            run_id = %outcome.run_id,
            status = %outcome.status,
            duration_ms = outcome.duration_ms,
        );

        Ok(outcome)
    }

    /// Run the blocking phases for one environment. The first failing phase
    /// ends this environment; other environments are unaffected.
    async fn run_environment(
        &self,
        environment: RunEnvironment,
        phases: &[PhaseSpec],
    ) -> (EnvironmentResult, ExecutionContext) {
        let label = environment.label();
        info!(environment = %label, "starting environment");

        let mut env_ctx = ExecutionContext::new(environment);
        let mut results = Vec::new();
        let mut succeeded = true;

        for phase in phases {
            let result = PhaseExecutor::execute(self.runner.as_ref(), &mut env_ctx, phase).await;
            let failed = !result.succeeded;
            results.push(result);
            if failed {
                warn!(
                    environment = %label,
                    phase = %phase.name,
                    "blocking phase failed; remaining phases skipped"
                );
                succeeded = false;
                break;
            }
        }

        let result = EnvironmentResult {
            environment: env_ctx.environment.clone(),
            phases: results,
            succeeded,
        };
        (result, env_ctx)
    }

    /// Notification policy plus history update. Best-effort: failures here
    /// are logged and never change the outcome.
    async fn finish(&self, spec: &JobSpec, outcome: &RunOutcome) {
        if outcome.status == RunStatus::Skipped {
            return;
        }

        if let Some(email) = spec.notifications.as_ref().and_then(|n| n.email.as_ref()) {
            if !email.recipients.is_empty() {
                let previous = match self.history.last_status(&outcome.branch).await {
                    Ok(previous) => previous,
                    Err(e) => {
                        warn!(error = %e, "status history read failed");
                        None
                    }
                };

                if should_notify(email, previous, outcome.status) {
                    let subject = format!(
                        "build {} on {} ({})",
                        outcome.status,
                        outcome.branch,
                        &outcome.spec_digest[..12]
                    );
                    let body = report::render_text(outcome);
                    if let Err(e) = self.notifier.notify(&email.recipients, &subject, &body).await
                    {
                        warn!(error = %e, "notification dispatch failed");
                    }
                }
            }
        }

        if let Err(e) = self
            .history
            .record_status(&outcome.branch, outcome.status)
            .await
        {
            warn!(error = %e, "status history write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{MemoryStatusStore, RecordingDeployer, RecordingNotifier, ScriptedRunner};

    fn pipeline_with(runner: Arc<ScriptedRunner>) -> (Pipeline, Arc<RecordingDeployer>) {
        let deployer = Arc::new(RecordingDeployer::new());
        let pipeline = Pipeline::new(
            runner,
            Arc::clone(&deployer) as Arc<dyn Deployer>,
            Arc::new(RecordingNotifier::new()),
            Arc::new(MemoryStatusStore::new()),
        );
        (pipeline, deployer)
    }

    #[tokio::test]
    async fn test_branch_gate_short_circuits() {
        let runner = Arc::new(ScriptedRunner::new());
        let (pipeline, deployer) = pipeline_with(Arc::clone(&runner));

        let yaml = r#"
python: ["3.6"]
services: [xvfb]
script: [nosetests]
branches:
  only: [master]
"#;
        let spec = JobSpec::from_yaml(yaml).expect("parse failed");
        let outcome = pipeline
            .run(&spec, "feature/x")
            .await
            .expect("run should not error");

        assert_eq!(outcome.status, RunStatus::Skipped);
        assert_eq!(outcome.exit_code(), 0);
        assert!(outcome.environments.is_empty());
        assert!(runner.executed_commands().is_empty(), "zero commands executed");
        assert!(runner.started_services().is_empty(), "no resources acquired");
        assert_eq!(deployer.publish_count(), 0);
    }

    #[tokio::test]
    async fn test_service_failure_fails_run_before_environments() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.fail_service("xvfb");
        let (pipeline, _deployer) = pipeline_with(Arc::clone(&runner));

        let yaml = r#"
python: ["3.6", "3.7"]
services: [xvfb]
script: [nosetests]
"#;
        let spec = JobSpec::from_yaml(yaml).expect("parse failed");
        let outcome = pipeline.run(&spec, "master").await.expect("run failed");

        assert_eq!(outcome.status, RunStatus::Failed);
        assert!(outcome.environments.is_empty());
        assert!(runner.executed_commands().is_empty());
        assert!(outcome.warnings[0].contains("xvfb"));
    }

    #[tokio::test]
    async fn test_invalid_declaration_never_starts() {
        let runner = Arc::new(ScriptedRunner::new());
        let (pipeline, _deployer) = pipeline_with(Arc::clone(&runner));

        let mut spec = JobSpec::from_yaml("python: [\"3.6\"]\nscript: [nosetests]\n")
            .expect("parse failed");
        spec.interpreter_versions.clear();

        let err = pipeline
            .run(&spec, "master")
            .await
            .expect_err("empty axis must refuse to start");
        assert!(err.to_string().contains("no interpreter versions declared"));
        assert!(runner.executed_commands().is_empty());
    }
}
