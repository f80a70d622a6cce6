//! Environment matrix expansion.

use gantry_domain::{JobSpec, PipelineError, Result, RunEnvironment};

/// Expand the declared interpreter-version axis into concrete run
/// environments, one per version, preserving declaration order.
///
/// Every environment inherits the same `env` variable map; order affects
/// reporting only, since environments are independent.
pub fn expand_matrix(spec: &JobSpec) -> Result<Vec<RunEnvironment>> {
    if spec.interpreter_versions.is_empty() {
        return Err(PipelineError::Config(
            "no interpreter versions declared".to_string(),
        ));
    }

    Ok(spec
        .interpreter_versions
        .iter()
        .map(|version| {
            RunEnvironment::new(
                spec.language.clone(),
                version.clone(),
                spec.env_setup.clone(),
            )
        })
        .collect())
}
