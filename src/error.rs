use std::io;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::delegate::{Diagnostic, Severity};
use crate::job::VirtualPath;

/// Errors that escape [`Executor::execute`](crate::Executor::execute) or
/// executor construction.
///
/// Everything that goes wrong inside a single job is contained to that job
/// and reported through the delegate instead, see [`JobError`].
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Multiple jobs produce '{output}' (jobs {first} and {second})")]
    DuplicateProducer {
        output: VirtualPath,
        first: usize,
        second: usize,
    },

    #[error("Dependency cycle detected involving job {index} ({description})")]
    Cycle { index: usize, description: String },

    #[error("Failed to build the worker pool:\n{0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Failed to start the notification thread:\n{0}")]
    Notifier(#[source] io::Error),

    #[error("Failed to create the temporary directory:\n{0}")]
    TemporaryDirectory(#[source] io::Error),

    /// The aggregate result of the run was failure. Per-job details have
    /// already been delivered to the delegate.
    #[error("Build failed")]
    BuildFailed,
}

/// Errors raised while executing a single job.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Couldn't write response file '{path}'.\n{source}")]
    ResponseFile {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Input file '{path}' was modified during the build")]
    InputModified { path: VirtualPath },

    #[error("Couldn't read modification time of '{path}'.\n{source}")]
    ModificationTime {
        path: VirtualPath,
        #[source]
        source: io::Error,
    },

    #[error("Unable to execute command '{tool}'.\n{cause}")]
    Launch { tool: Utf8PathBuf, cause: anyhow::Error },

    #[error("Failed waiting for process to exit.\n{0}")]
    Wait(#[source] io::Error),
}

impl JobError {
    /// User facing content carried by this error, if any.
    pub fn diagnostic(&self) -> Option<Diagnostic> {
        match self {
            JobError::InputModified { path } => Some(Diagnostic::new(
                Severity::Error,
                format!("input file '{path}' was modified during the build"),
            )),
            JobError::Launch { tool, cause } => Some(Diagnostic::new(
                Severity::Error,
                format!("unable to execute command: {tool}: {cause}"),
            )),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_payloads() {
        let stale = JobError::InputModified {
            path: VirtualPath::literal("x.o"),
        };
        let diagnostic = stale.diagnostic().unwrap();
        assert_eq!(diagnostic.severity, Severity::Error);
        assert!(diagnostic.message.contains("'x.o' was modified"));

        let launch = JobError::Launch {
            tool: "/no/such/tool".into(),
            cause: anyhow::anyhow!("not found"),
        };
        assert!(launch.diagnostic().unwrap().message.contains("/no/such/tool"));

        let wait = JobError::Wait(io::Error::other("interrupted"));
        assert!(wait.diagnostic().is_none());
    }

    #[test]
    fn test_duplicate_producer_message() {
        let err = ExecutorError::DuplicateProducer {
            output: VirtualPath::temporary("dup.o"),
            first: 0,
            second: 3,
        };
        assert_eq!(err.to_string(), "Multiple jobs produce 'dup.o' (jobs 0 and 3)");
    }
}
