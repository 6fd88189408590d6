//! Observer capabilities implemented by the caller.

use std::sync::Arc;

use crate::job::Job;
use crate::process::{Env, Process, ProcessResult, spawn_process};

/// Receives job lifecycle notifications and may override process launching.
///
/// Notifications are delivered from a single dedicated thread, one at a time,
/// so implementations never observe two callbacks racing each other. For any
/// given job, `job_started` always arrives before `job_finished`.
pub trait JobDelegate: Send + Sync {
    /// Called after the process for `job` was launched.
    fn job_started(&self, job: &Job, argv: &[String], pid: u32);

    /// Called once the job is over. `pid` is `None` if no process was
    /// launched, in which case `result` is a synthetic failure.
    fn job_finished(&self, job: &Job, result: &ProcessResult, pid: Option<u32>);

    /// Launches the process for `job`. Defaults to [`spawn_process`].
    fn launch_process(
        &self,
        _job: &Job,
        argv: &[String],
        env: &Env,
    ) -> anyhow::Result<Arc<dyn Process>> {
        Ok(spawn_process(argv, env)?)
    }
}

/// A delegate that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentDelegate;

impl JobDelegate for SilentDelegate {
    fn job_started(&self, _: &Job, _: &[String], _: u32) {}

    fn job_finished(&self, _: &Job, _: &ProcessResult, _: Option<u32>) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

/// User facing content carried by a job error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
}

impl Diagnostic {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Note => "note",
        };
        write!(f, "{label}: {}", self.message)
    }
}

/// Destination for diagnostics raised while executing jobs.
pub trait DiagnosticsSink: Send + Sync {
    fn emit(&self, diagnostic: Diagnostic);
}

/// Forwards diagnostics to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl DiagnosticsSink for TracingDiagnostics {
    fn emit(&self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Error => tracing::error!("{}", diagnostic.message),
            Severity::Warning => tracing::warn!("{}", diagnostic.message),
            Severity::Note => tracing::info!("{}", diagnostic.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_display() {
        let diagnostic = Diagnostic::new(Severity::Warning, "unused input");
        assert_eq!(diagnostic.to_string(), "warning: unused input");
    }
}
