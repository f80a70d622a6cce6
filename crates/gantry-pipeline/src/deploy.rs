//! Deploy gate: credential resolution and artifact publishing.
//!
//! Deployment publishes a fixed local artifact directory to a fixed target,
//! at most once per pipeline run. Credentials are looked up through
//! environment-variable indirection at deploy time; a lookup failure is
//! fatal to the deploy step only, never to the test results.

use async_trait::async_trait;
use gantry_domain::{DeployOutcome, DeploySpec, PipelineError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Contract for publishing a local directory to a deploy target.
#[async_trait]
pub trait Deployer: Send + Sync {
    /// Publish `spec.local_dir`, authenticated with `token`.
    /// Returns a human-readable description of what was published where.
    async fn publish(&self, spec: &DeploySpec, token: &str) -> Result<String>;
}

/// Resolve the deploy credential named by the declaration.
///
/// The declaration carries the *name* of an environment variable, never the
/// secret itself. Missing or empty values are credential errors.
pub fn resolve_token(spec: &DeploySpec) -> Result<String> {
    match std::env::var(&spec.token_env) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        Ok(_) => Err(PipelineError::Credential(format!(
            "environment variable '{}' is empty",
            spec.token_env
        ))),
        Err(_) => Err(PipelineError::Credential(format!(
            "environment variable '{}' is not set",
            spec.token_env
        ))),
    }
}

/// Run the deploy step, folding every failure into the outcome.
///
/// Credential and publish failures are recorded and logged; they never
/// propagate, so a run whose tests passed keeps its status.
pub async fn run_deploy(deployer: &dyn Deployer, spec: &DeploySpec) -> DeployOutcome {
    let token = match resolve_token(spec) {
        Ok(token) => token,
        Err(e) => {
            warn!(provider = %spec.provider, error = %e, "deploy credential lookup failed");
            return DeployOutcome {
                provider: spec.provider.clone(),
                published: false,
                detail: e.to_string(),
            };
        }
    };

    match deployer.publish(spec, &token).await {
        Ok(detail) => {
            info!(provider = %spec.provider, detail = %detail, "deploy published");
            DeployOutcome {
                provider: spec.provider.clone(),
                published: true,
                detail,
            }
        }
        Err(e) => {
            warn!(provider = %spec.provider, error = %e, "deploy failed");
            DeployOutcome {
                provider: spec.provider.clone(),
                published: false,
                detail: e.to_string(),
            }
        }
    }
}

/// Filesystem-backed deploy target: copies the artifact directory into a
/// per-provider directory under a target root.
///
/// `skip_cleanup: true` leaves files from previous publishes in place;
/// otherwise the target is cleared first.
pub struct DirectoryPublisher {
    target_root: PathBuf,
}

impl DirectoryPublisher {
    pub fn new(target_root: PathBuf) -> Self {
        Self { target_root }
    }

    fn target_for(&self, spec: &DeploySpec) -> PathBuf {
        self.target_root.join(&spec.provider)
    }
}

#[async_trait]
impl Deployer for DirectoryPublisher {
    async fn publish(&self, spec: &DeploySpec, _token: &str) -> Result<String> {
        if !spec.local_dir.is_dir() {
            return Err(PipelineError::Config(format!(
                "artifact directory '{}' does not exist",
                spec.local_dir.display()
            )));
        }

        let target = self.target_for(spec);
        if target.exists() && !spec.skip_cleanup {
            fs::remove_dir_all(&target)?;
        }
        copy_dir(&spec.local_dir, &target)?;

        Ok(format!(
            "published {} to {}",
            spec.local_dir.display(),
            target.display()
        ))
    }
}

fn copy_dir(src: &Path, dst: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_domain::DeployCondition;

    fn deploy_spec(token_env: &str, local_dir: PathBuf, skip_cleanup: bool) -> DeploySpec {
        DeploySpec {
            provider: "pages".to_string(),
            token_env: token_env.to_string(),
            local_dir,
            skip_cleanup,
            condition: DeployCondition {
                branch: Some("master".to_string()),
            },
        }
    }

    #[test]
    fn test_resolve_token_missing() {
        let spec = deploy_spec("GANTRY_TEST_TOKEN_UNSET", PathBuf::from("doc"), true);
        let err = resolve_token(&spec).expect_err("unset variable should fail");
        assert!(matches!(err, PipelineError::Credential(_)));
        assert!(err.to_string().contains("not set"));
    }

    #[test]
    fn test_resolve_token_present() {
        std::env::set_var("GANTRY_TEST_TOKEN_SET", "s3cret");
        let spec = deploy_spec("GANTRY_TEST_TOKEN_SET", PathBuf::from("doc"), true);
        assert_eq!(resolve_token(&spec).expect("resolve failed"), "s3cret");
    }

    #[test]
    fn test_resolve_token_empty() {
        std::env::set_var("GANTRY_TEST_TOKEN_EMPTY", "");
        let spec = deploy_spec("GANTRY_TEST_TOKEN_EMPTY", PathBuf::from("doc"), true);
        let err = resolve_token(&spec).expect_err("empty variable should fail");
        assert!(err.to_string().contains("empty"));
    }

    #[tokio::test]
    async fn test_directory_publisher_copies_tree() {
        let source = tempfile::tempdir().expect("tempdir");
        let target = tempfile::tempdir().expect("tempdir");
        std::fs::write(source.path().join("index.html"), "<html/>").expect("write");
        std::fs::create_dir(source.path().join("api")).expect("mkdir");
        std::fs::write(source.path().join("api/mod.html"), "<html/>").expect("write");

        let spec = deploy_spec("UNUSED", source.path().to_path_buf(), true);
        let publisher = DirectoryPublisher::new(target.path().to_path_buf());

        let detail = publisher.publish(&spec, "token").await.expect("publish failed");
        assert!(detail.contains("published"));
        assert!(target.path().join("pages/index.html").exists());
        assert!(target.path().join("pages/api/mod.html").exists());
    }

    #[tokio::test]
    async fn test_directory_publisher_cleanup() {
        let source = tempfile::tempdir().expect("tempdir");
        let target = tempfile::tempdir().expect("tempdir");
        std::fs::write(source.path().join("new.html"), "new").expect("write");

        let stale = target.path().join("pages");
        std::fs::create_dir_all(&stale).expect("mkdir");
        std::fs::write(stale.join("stale.html"), "old").expect("write");

        let spec = deploy_spec("UNUSED", source.path().to_path_buf(), false);
        let publisher = DirectoryPublisher::new(target.path().to_path_buf());
        publisher.publish(&spec, "token").await.expect("publish failed");

        assert!(target.path().join("pages/new.html").exists());
        assert!(
            !target.path().join("pages/stale.html").exists(),
            "cleanup removes previous publishes"
        );
    }

    #[tokio::test]
    async fn test_directory_publisher_missing_source() {
        let target = tempfile::tempdir().expect("tempdir");
        let spec = deploy_spec("UNUSED", PathBuf::from("/nonexistent/doc/html"), true);
        let publisher = DirectoryPublisher::new(target.path().to_path_buf());

        let err = publisher
            .publish(&spec, "token")
            .await
            .expect_err("missing source should fail");
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn test_run_deploy_credential_failure_is_contained() {
        let spec = deploy_spec("GANTRY_TEST_TOKEN_NEVER_SET", PathBuf::from("doc"), true);
        let deployer = crate::fakes::RecordingDeployer::new();

        let outcome = run_deploy(&deployer, &spec).await;
        assert!(!outcome.published);
        assert!(outcome.detail.contains("not set"));
        assert_eq!(deployer.publish_count(), 0, "publish never attempted");
    }
}
