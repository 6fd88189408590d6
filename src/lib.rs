#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod config;
mod core;
mod delegate;
mod engine;
mod error;
mod executor;
mod fs;
mod graph;
mod job;
#[cfg(feature = "logging")]
mod logging;
mod process;
mod resolver;

pub use crate::config::{ExecutorConfig, Plan};
pub use crate::core::Hash32;
pub use crate::delegate::{
    Diagnostic, DiagnosticsSink, JobDelegate, Severity, SilentDelegate, TracingDiagnostics,
};
pub use crate::engine::BuildValue;
pub use crate::error::{ExecutorError, JobError};
pub use crate::executor::{Executor, ExecutorBuilder};
pub use crate::fs::{FileSystem, LocalFileSystem, ModificationSnapshot};
pub use crate::graph::{JobGraph, ProducerIndex};
pub use crate::job::{Arg, FileType, Job, JobKind, TypedPath, VirtualPath};
#[cfg(feature = "logging")]
pub use crate::logging::init_logging;
pub use crate::process::{
    Env, OsProcess, Process, ProcessResult, ProcessSet, Termination, spawn_process,
};
pub use crate::resolver::{
    ArgsResolver, DEFAULT_MAX_COMMAND_LINE_LENGTH, ResolvedArgs, ResponseFilePolicy,
    command_line_length, render_command_line, shell_escape,
};
