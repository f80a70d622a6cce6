//! Human-readable run report.

use gantry_domain::{PhaseKind, RunOutcome};

/// Render a run outcome as a plain-text report: aggregate status, then one
/// block per environment with per-phase, per-command detail, then deploy and
/// warnings.
pub fn render_text(outcome: &RunOutcome) -> String {
    let mut out = format!(
        "run {} on {}: {} ({} ms)\n",
        &outcome.run_id[..8.min(outcome.run_id.len())],
        outcome.branch,
        outcome.status,
        outcome.duration_ms
    );

    for env in &outcome.environments {
        out.push_str(&format!(
            "\n  {} — {}\n",
            env.environment.label(),
            if env.succeeded { "passed" } else { "failed" }
        ));
        for phase in &env.phases {
            let tag = match phase.kind {
                PhaseKind::Blocking => "",
                PhaseKind::BestEffort => " (best-effort)",
            };
            out.push_str(&format!("    {}{}\n", phase.phase, tag));
            for cmd in &phase.commands {
                let mark = if cmd.succeeded { "ok " } else { "FAIL" };
                out.push_str(&format!("      [{}] {}", mark, cmd.command));
                if !cmd.succeeded {
                    out.push_str(&format!(" (exit {})", cmd.exit_code));
                }
                out.push('\n');
            }
        }
    }

    if let Some(deploy) = &outcome.deploy {
        out.push_str(&format!(
            "\n  deploy ({}): {}\n",
            deploy.provider,
            if deploy.published {
                deploy.detail.as_str()
            } else {
                "failed"
            }
        ));
        if !deploy.published {
            out.push_str(&format!("    {}\n", deploy.detail));
        }
    }

    if !outcome.warnings.is_empty() {
        out.push_str("\n  warnings:\n");
        for warning in &outcome.warnings {
            out.push_str(&format!("    - {}\n", warning));
        }
    }

    out
}
