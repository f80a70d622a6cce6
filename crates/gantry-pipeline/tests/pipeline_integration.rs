//! Integration tests driving the pipeline orchestrator with in-memory fakes.

use gantry_pipeline::fakes::{
    MemoryStatusStore, RecordingDeployer, RecordingNotifier, ScriptedRunner,
};
use gantry_pipeline::{CommandRunner, Deployer, Notifier, Pipeline, StatusStore};
use gantry_domain::{JobSpec, PhaseName, RunStatus};
use std::sync::Arc;

struct Harness {
    runner: Arc<ScriptedRunner>,
    deployer: Arc<RecordingDeployer>,
    notifier: Arc<RecordingNotifier>,
    history: Arc<MemoryStatusStore>,
    pipeline: Pipeline,
}

fn harness() -> Harness {
    let runner = Arc::new(ScriptedRunner::new());
    let deployer = Arc::new(RecordingDeployer::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let history = Arc::new(MemoryStatusStore::new());

    let pipeline = Pipeline::new(
        Arc::clone(&runner) as Arc<dyn CommandRunner>,
        Arc::clone(&deployer) as Arc<dyn Deployer>,
        Arc::clone(&notifier) as Arc<dyn Notifier>,
        Arc::clone(&history) as Arc<dyn StatusStore>,
    );

    Harness {
        runner,
        deployer,
        notifier,
        history,
        pipeline,
    }
}

/// The two-version declaration with the install-run-uninstall-run script
/// ordering: the parallel and plain test passes run under different
/// capability sets within the same phase.
fn matrix_job(token_env: &str) -> JobSpec {
    let yaml = format!(
        r#"
language: python
python: ["3.6", "3.7"]
env:
  DISPLAY: ":99.0"
install:
  - pip install numpy scipy nose
  - run: pip install mpi4py
    grants: mpi
script:
  - run: mpirun -n 2 nosetests
    requires: mpi
  - run: pip uninstall -y mpi4py
    revokes: mpi
  - nosetests --with-coverage
after_success:
  - coveralls
notifications:
  email:
    recipients:
      - maintainers@example.org
deploy:
  provider: pages
  token_env: {token_env}
  local_dir: doc/html
  skip_cleanup: true
  on:
    branch: master
"#
    );
    JobSpec::from_yaml(&yaml).expect("declaration should parse")
}

/// Test: full matrix success — 2 environments, 4 test invocations under two
/// capability modes, after_success once per environment, deploy exactly once.
#[tokio::test]
async fn test_matrix_success_deploys_exactly_once() {
    std::env::set_var("GANTRY_IT_TOKEN_OK", "s3cret");
    let h = harness();
    let spec = matrix_job("GANTRY_IT_TOKEN_OK");

    let outcome = h.pipeline.run(&spec, "master").await.expect("run failed");

    assert_eq!(outcome.status, RunStatus::Succeeded);
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(outcome.environments.len(), 2);

    for env in &outcome.environments {
        assert!(env.succeeded, "{} should pass", env.environment.label());
        // before_install, install, script, after_success
        assert_eq!(env.phases.len(), 4);
        assert!(env.phase(PhaseName::AfterSuccess).is_some());
    }

    // 2 versions x 2 modes = 4 test invocations, distinguished by the
    // capability set each one observed.
    let ran = h.runner.executed();
    let parallel: Vec<_> = ran.iter().filter(|c| c.command.starts_with("mpirun")).collect();
    let plain: Vec<_> = ran
        .iter()
        .filter(|c| c.command.starts_with("nosetests"))
        .collect();
    assert_eq!(parallel.len(), 2);
    assert_eq!(plain.len(), 2);
    for invocation in &parallel {
        assert_eq!(invocation.capabilities, "mpi");
    }
    for invocation in &plain {
        assert_eq!(invocation.capabilities, "");
    }

    // after_success once per environment.
    let uploads = ran.iter().filter(|c| c.command == "coveralls").count();
    assert_eq!(uploads, 2);

    // At most one deploy per run, environment count notwithstanding.
    assert_eq!(h.deployer.publish_count(), 1);
    assert_eq!(h.deployer.published_dirs(), vec!["doc/html"]);

    // First run on this branch: the change policy fires.
    assert_eq!(h.notifier.sent_count(), 1);
    let sent = h.notifier.sent();
    assert!(sent[0].subject.contains("succeeded"));
}

/// Test: one environment's install failure is isolated — the other
/// environment still runs fully; no deploy; failure notification sent.
#[tokio::test]
async fn test_install_failure_is_isolated_per_environment() {
    std::env::set_var("GANTRY_IT_TOKEN_ISOLATED", "s3cret");
    let h = harness();
    h.runner.fail_matching_in("pip install mpi4py", "3.6", 1);
    let spec = matrix_job("GANTRY_IT_TOKEN_ISOLATED");

    let outcome = h.pipeline.run(&spec, "master").await.expect("run failed");

    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(outcome.environments.len(), 2, "both environments reported");

    let failed = &outcome.environments[0];
    assert_eq!(failed.environment.interpreter, "3.6");
    assert!(!failed.succeeded);
    assert!(
        failed.phase(PhaseName::Script).is_none(),
        "script never runs after a failed install"
    );
    assert!(failed.phase(PhaseName::AfterSuccess).is_none());

    let passed = &outcome.environments[1];
    assert_eq!(passed.environment.interpreter, "3.7");
    assert!(passed.succeeded, "3.7 runs fully despite 3.6 failing");
    assert_eq!(
        passed
            .phase(PhaseName::Script)
            .expect("script phase ran")
            .commands
            .len(),
        3
    );

    // Aggregate failure: no after_success anywhere, no deploy.
    assert!(!h.runner.executed_commands().iter().any(|c| c == "coveralls"));
    assert_eq!(h.deployer.publish_count(), 0);

    // Failures always notify.
    assert_eq!(h.notifier.sent_count(), 1);
    assert!(h.notifier.sent()[0].subject.contains("failed"));
    assert_eq!(
        h.history.last_status("master").await.expect("read failed"),
        Some(RunStatus::Failed)
    );
}

/// Test: a failing best-effort command never changes the run status, and the
/// deploy gate still opens.
#[tokio::test]
async fn test_best_effort_failure_does_not_fail_run() {
    std::env::set_var("GANTRY_IT_TOKEN_BEST_EFFORT", "s3cret");
    let h = harness();
    h.runner.fail_matching("coveralls", 22);
    let spec = matrix_job("GANTRY_IT_TOKEN_BEST_EFFORT");

    let outcome = h.pipeline.run(&spec, "master").await.expect("run failed");

    assert_eq!(outcome.status, RunStatus::Succeeded);
    assert_eq!(outcome.exit_code(), 0);
    assert!(
        outcome.warnings.iter().any(|w| w.contains("coveralls")),
        "best-effort failure surfaces as a warning"
    );
    assert_eq!(h.deployer.publish_count(), 1);
}

/// Test: deploy branch condition closes the gate without touching the
/// test results.
#[tokio::test]
async fn test_deploy_branch_condition_blocks_publish() {
    std::env::set_var("GANTRY_IT_TOKEN_BRANCH", "s3cret");
    let h = harness();
    let spec = matrix_job("GANTRY_IT_TOKEN_BRANCH");

    let outcome = h.pipeline.run(&spec, "develop").await.expect("run failed");

    assert_eq!(outcome.status, RunStatus::Succeeded);
    assert!(outcome.deploy.is_none(), "gate never opened");
    assert_eq!(h.deployer.publish_count(), 0);
}

/// Test: a missing deploy credential fails the deploy step only.
#[tokio::test]
async fn test_credential_failure_is_fatal_to_deploy_only() {
    let h = harness();
    let spec = matrix_job("GANTRY_IT_TOKEN_NEVER_SET");

    let outcome = h.pipeline.run(&spec, "master").await.expect("run failed");

    assert_eq!(outcome.status, RunStatus::Succeeded, "test results stand");
    assert_eq!(outcome.exit_code(), 0);

    let deploy = outcome.deploy.expect("deploy was attempted");
    assert!(!deploy.published);
    assert!(deploy.detail.contains("not set"));
    assert!(outcome.warnings.iter().any(|w| w.contains("deploy not published")));
    assert_eq!(h.deployer.publish_count(), 0);
}

/// Test: a network failure during publish is best-effort.
#[tokio::test]
async fn test_deploy_network_failure_is_logged_not_fatal() {
    std::env::set_var("GANTRY_IT_TOKEN_NET", "s3cret");
    let h = harness();
    h.deployer.fail_network("connection reset by peer");
    let spec = matrix_job("GANTRY_IT_TOKEN_NET");

    let outcome = h.pipeline.run(&spec, "master").await.expect("run failed");

    assert_eq!(outcome.status, RunStatus::Succeeded);
    let deploy = outcome.deploy.expect("deploy was attempted");
    assert!(!deploy.published);
    assert!(deploy.detail.contains("connection reset"));
}

/// Test: the change policy suppresses a repeat success but a repeat failure
/// still notifies.
#[tokio::test]
async fn test_notification_policy_across_runs() {
    std::env::set_var("GANTRY_IT_TOKEN_NOTIFY", "s3cret");
    let h = harness();
    h.history.seed("master", RunStatus::Succeeded);
    let spec = matrix_job("GANTRY_IT_TOKEN_NOTIFY");

    // succeeded -> succeeded: no change, no notification.
    let outcome = h.pipeline.run(&spec, "master").await.expect("run failed");
    assert_eq!(outcome.status, RunStatus::Succeeded);
    assert_eq!(h.notifier.sent_count(), 0);

    // succeeded -> failed: always notifies.
    h.runner.fail_matching("nosetests --with-coverage", 1);
    let outcome = h.pipeline.run(&spec, "master").await.expect("run failed");
    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(h.notifier.sent_count(), 1);

    // failed -> failed: still notifies.
    let outcome = h.pipeline.run(&spec, "master").await.expect("run failed");
    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(h.notifier.sent_count(), 2);
}

/// Test: blocking cutoff within a phase — commands after the first failure
/// in `script` are skipped for that environment.
#[tokio::test]
async fn test_blocking_cutoff_within_script_phase() {
    std::env::set_var("GANTRY_IT_TOKEN_CUTOFF", "s3cret");
    let h = harness();
    h.runner.fail_matching("mpirun", 137);
    let spec = matrix_job("GANTRY_IT_TOKEN_CUTOFF");

    let outcome = h.pipeline.run(&spec, "master").await.expect("run failed");

    assert_eq!(outcome.status, RunStatus::Failed);
    for env in &outcome.environments {
        let script = env.phase(PhaseName::Script).expect("script ran");
        assert_eq!(script.commands.len(), 1, "uninstall and plain pass skipped");
        assert_eq!(script.commands[0].exit_code, 137);
    }
    assert!(
        !h.runner.executed_commands().iter().any(|c| c.starts_with("nosetests")),
        "plain test pass never executed"
    );
}
