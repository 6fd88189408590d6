//! Turning command-line templates into concrete process arguments.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::{ExecutorError, JobError};
use crate::job::{Arg, Job, VirtualPath};

/// Longest command line, in bytes, that is passed to a tool directly.
#[cfg(windows)]
pub const DEFAULT_MAX_COMMAND_LINE_LENGTH: usize = 32_767;
#[cfg(target_os = "macos")]
pub const DEFAULT_MAX_COMMAND_LINE_LENGTH: usize = 262_144;
#[cfg(not(any(windows, target_os = "macos")))]
pub const DEFAULT_MAX_COMMAND_LINE_LENGTH: usize = 131_072;

/// Whether response files are used only when needed or for every job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFilePolicy {
    /// Use a response file when the job supports them and its command line
    /// would exceed the maximum length.
    #[default]
    Heuristic,
    /// Use a response file for every job. Every job must support them.
    Forced,
}

/// The concrete argument vector for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArgs {
    pub argv: Vec<String>,
    pub used_response_file: bool,
}

/// Resolves [`VirtualPath`]s and spills long command lines into response
/// files.
///
/// The resolver owns a temporary directory holding temporary outputs and
/// response files. The directory outlives the resolver value itself and is
/// only removed by [`ArgsResolver::teardown`], so files stay available to
/// child processes for the whole run.
#[derive(Debug)]
pub struct ArgsResolver {
    temporary_directory: Utf8PathBuf,
    path_mapping: HashMap<VirtualPath, Utf8PathBuf>,
    max_command_line_length: usize,
}

impl ArgsResolver {
    /// Creates a resolver with a fresh temporary directory.
    pub fn new(path_mapping: HashMap<VirtualPath, Utf8PathBuf>) -> Result<Self, ExecutorError> {
        let path = tempfile::Builder::new()
            .prefix("kumiki-")
            .tempdir()
            .map_err(ExecutorError::TemporaryDirectory)?
            .keep();

        let temporary_directory = Utf8PathBuf::from_path_buf(path).map_err(|path| {
            ExecutorError::TemporaryDirectory(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("temporary directory '{}' is not UTF-8", path.display()),
            ))
        })?;

        tracing::debug!("created temporary directory {temporary_directory}");

        Ok(Self {
            temporary_directory,
            path_mapping,
            max_command_line_length: DEFAULT_MAX_COMMAND_LINE_LENGTH,
        })
    }

    pub fn with_max_command_line_length(mut self, length: usize) -> Self {
        self.max_command_line_length = length;
        self
    }

    pub fn temporary_directory(&self) -> &Utf8Path {
        &self.temporary_directory
    }

    pub fn max_command_line_length(&self) -> usize {
        self.max_command_line_length
    }

    /// Maps a virtual path to the real path placed on the command line.
    pub fn resolve_path(&self, path: &VirtualPath) -> Utf8PathBuf {
        if let VirtualPath::Temporary(name) = path {
            return self.temporary_directory.join(name);
        }

        match self.path_mapping.get(path) {
            Some(mapped) => mapped.clone(),
            None => path.name().to_path_buf(),
        }
    }

    fn resolve_arg(&self, arg: &Arg) -> String {
        match arg {
            Arg::Flag(flag) => flag.clone(),
            Arg::Path(path) => self.resolve_path(path).into_string(),
            Arg::JoinedOptionAndPath { option, path } => {
                format!("{option}{}", self.resolve_path(path))
            }
        }
    }

    /// Produces the argument vector for `job`, starting with the tool.
    ///
    /// # Panics
    ///
    /// Panics if `policy` is [`ResponseFilePolicy::Forced`] and the job does
    /// not support response files. The planner must never ask for that.
    pub fn resolve(&self, job: &Job, policy: ResponseFilePolicy) -> Result<ResolvedArgs, JobError> {
        let forced = policy == ResponseFilePolicy::Forced;
        assert!(
            !forced || job.supports_response_files,
            "response file forced for a job that doesn't support them: {}",
            job.description()
        );

        let mut argv = Vec::with_capacity(job.command_line.len() + 1);
        argv.push(job.tool.to_string());
        argv.extend(job.command_line.iter().map(|arg| self.resolve_arg(arg)));

        let too_long = command_line_length(&argv) > self.max_command_line_length;
        if !(forced || (job.supports_response_files && too_long)) {
            return Ok(ResolvedArgs {
                argv,
                used_response_file: false,
            });
        }

        let path = self.response_file_path(job);
        let mut contents = String::new();
        for arg in &argv[1..] {
            contents.push_str(&shell_escape(arg));
            contents.push('\n');
        }

        self.write_response_file(&path, &contents)
            .map_err(|source| JobError::ResponseFile {
                path: path.clone(),
                source,
            })?;

        tracing::debug!("wrote {} arguments to {path}", argv.len() - 1);

        argv.truncate(1);
        argv.push(format!("@{path}"));

        Ok(ResolvedArgs {
            argv,
            used_response_file: true,
        })
    }

    fn response_file_path(&self, job: &Job) -> Utf8PathBuf {
        let name = format!("arguments-{}.resp", job.identity().to_short_hex());
        self.temporary_directory.join(name)
    }

    /// Writes the file under a scratch name and links it into place, so a
    /// tool never reads a partially written response file.
    ///
    /// Identical jobs share a response file with identical contents. If it
    /// already exists, the existing file is kept as is.
    fn write_response_file(&self, path: &Utf8Path, contents: &str) -> io::Result<()> {
        let mut file = tempfile::NamedTempFile::new_in(&self.temporary_directory)?;
        file.write_all(contents.as_bytes())?;

        match file.persist_noclobber(path) {
            Ok(_) => Ok(()),
            Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            Err(err) => Err(err.error),
        }
    }

    /// Removes the temporary directory along with every file in it.
    ///
    /// Must be called by the owner once the run is over and no process needs
    /// the files anymore. Calling it twice is harmless.
    pub fn teardown(&self) -> io::Result<()> {
        match fs::remove_dir_all(&self.temporary_directory) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => {
                tracing::debug!("removed temporary directory {}", self.temporary_directory);
                Ok(())
            }
        }
    }
}

/// Length of the command line as the OS sees it: arguments joined by spaces.
pub fn command_line_length(argv: &[String]) -> usize {
    let bytes: usize = argv.iter().map(String::len).sum();
    bytes + argv.len().saturating_sub(1)
}

/// Quotes a string for a POSIX shell.
///
/// Strings made only of safe characters are returned as is, anything else is
/// wrapped in single quotes with embedded quotes written as `'\''`.
pub fn shell_escape(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }

    let safe = |c: char| c.is_ascii_alphanumeric() || "-_./%:=+,".contains(c);
    if s.chars().all(safe) {
        return s.to_string();
    }

    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Renders an argument vector as a single, copy-pastable shell line.
pub fn render_command_line(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| shell_escape(arg))
        .collect::<Vec<_>>()
        .join(" ")
}
