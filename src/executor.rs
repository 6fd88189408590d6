use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use camino::Utf8PathBuf;

use crate::config::ExecutorConfig;
use crate::delegate::{DiagnosticsSink, JobDelegate, SilentDelegate, TracingDiagnostics};
use crate::engine::{self, BuildValue, RunContext};
use crate::error::ExecutorError;
use crate::fs::{FileSystem, ModificationSnapshot};
use crate::graph::{JobGraph, ProducerIndex};
use crate::job::{Job, VirtualPath};
use crate::process::{Env, ProcessSet};
use crate::resolver::ArgsResolver;

/// Runs a fixed list of jobs, respecting the data dependencies between them.
///
/// An executor is created with [`Executor::builder`], which validates the job
/// list eagerly: two jobs producing the same output, or jobs depending on
/// each other in a cycle, are rejected before anything runs.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use kumiki::{Executor, FileType, Job, JobKind, LocalFileSystem, VirtualPath};
///
/// let compile = Job::new(JobKind::Compile, "/usr/bin/cc")
///     .arg("-c")
///     .arg(VirtualPath::literal("a.c"))
///     .arg("-o")
///     .arg(VirtualPath::temporary("a.o"))
///     .input(VirtualPath::literal("a.c"), FileType::Source)
///     .output(VirtualPath::temporary("a.o"), FileType::Object);
///
/// let executor = Executor::builder(vec![compile])
///     .concurrency(4)
///     .capture_snapshot(Arc::new(LocalFileSystem))
///     .build()?;
/// let result = executor.execute(&std::env::vars().collect(), &LocalFileSystem);
/// executor.teardown()?;
/// result?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Executor {
    jobs: Vec<Job>,
    producers: ProducerIndex,
    graph: JobGraph,
    resolver: ArgsResolver,
    config: ExecutorConfig,
    delegate: Arc<dyn JobDelegate>,
    diagnostics: Arc<dyn DiagnosticsSink>,
    process_set: Option<Arc<ProcessSet>>,
    snapshot: ModificationSnapshot,
}

impl Executor {
    pub fn builder(jobs: Vec<Job>) -> ExecutorBuilder {
        ExecutorBuilder::new(jobs)
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn producers(&self) -> &ProducerIndex {
        &self.producers
    }

    pub fn resolver(&self) -> &ArgsResolver {
        &self.resolver
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Runs every job once.
    ///
    /// Individual job failures are reported to the delegate as they happen.
    /// Jobs depending on a failed job are skipped, unrelated jobs keep
    /// running. Once everything settled, a failed run is reported as a single
    /// [`ExecutorError::BuildFailed`].
    pub fn execute(&self, env: &Env, fs: &dyn FileSystem) -> Result<(), ExecutorError> {
        self.execute_value(env, fs)?
            .success()
            .then_some(())
            .ok_or(ExecutorError::BuildFailed)
    }

    /// Like [`Executor::execute`], returning the aggregate value instead of
    /// turning failure into an error.
    pub fn execute_value(&self, env: &Env, fs: &dyn FileSystem) -> Result<BuildValue, ExecutorError> {
        let s = Instant::now();
        tracing::info!(
            jobs = self.jobs.len(),
            concurrency = self.config.worker_count(),
            "running jobs"
        );

        let context = RunContext {
            jobs: &self.jobs,
            graph: &self.graph,
            env,
            fs,
            resolver: &self.resolver,
            delegate: self.delegate.as_ref(),
            diagnostics: self.diagnostics.as_ref(),
            process_set: self.process_set.as_deref(),
            snapshot: &self.snapshot,
            config: &self.config,
        };

        let value = engine::build_all(&context)?;
        tracing::info!(success = value.success(), "done in {}ms", s.elapsed().as_millis());

        Ok(value)
    }

    /// Removes the temporary directory and every response file.
    ///
    /// Call this once the run is over. It is never done implicitly.
    pub fn teardown(&self) -> io::Result<()> {
        self.resolver.teardown()
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("jobs", &self.jobs.len())
            .field("config", &self.config)
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

/// Collects the collaborators of an [`Executor`].
pub struct ExecutorBuilder {
    jobs: Vec<Job>,
    config: ExecutorConfig,
    delegate: Arc<dyn JobDelegate>,
    diagnostics: Arc<dyn DiagnosticsSink>,
    process_set: Option<Arc<ProcessSet>>,
    snapshot: ModificationSnapshot,
    capture: Option<Arc<dyn FileSystem>>,
    path_mapping: HashMap<VirtualPath, Utf8PathBuf>,
}

impl ExecutorBuilder {
    fn new(jobs: Vec<Job>) -> Self {
        Self {
            jobs,
            config: ExecutorConfig::default(),
            delegate: Arc::new(SilentDelegate),
            diagnostics: Arc::new(TracingDiagnostics),
            process_set: None,
            snapshot: ModificationSnapshot::default(),
            capture: None,
            path_mapping: HashMap::new(),
        }
    }

    pub fn config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    pub fn force_response_files(mut self, force: bool) -> Self {
        self.config.force_response_files = force;
        self
    }

    pub fn max_command_line_length(mut self, length: usize) -> Self {
        self.config.max_command_line_length = Some(length);
        self
    }

    pub fn delegate(mut self, delegate: Arc<dyn JobDelegate>) -> Self {
        self.delegate = delegate;
        self
    }

    pub fn diagnostics(mut self, diagnostics: Arc<dyn DiagnosticsSink>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Registers every launched process in `set` while it runs.
    pub fn process_set(mut self, set: Arc<ProcessSet>) -> Self {
        self.process_set = Some(set);
        self
    }

    pub fn snapshot(mut self, snapshot: ModificationSnapshot) -> Self {
        self.snapshot = snapshot;
        self.capture = None;
        self
    }

    /// Records input modification times from `fs` during [`build`](Self::build),
    /// once every path mapping is known.
    pub fn capture_snapshot(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.capture = Some(fs);
        self
    }

    /// Substitutes `real` wherever `path` appears on a command line.
    pub fn map_path(mut self, path: VirtualPath, real: impl Into<Utf8PathBuf>) -> Self {
        self.path_mapping.insert(path, real.into());
        self
    }

    /// Validates the job graph and creates the temporary directory.
    pub fn build(self) -> Result<Executor, ExecutorError> {
        let producers = ProducerIndex::build(&self.jobs)?;
        let graph = JobGraph::build(&self.jobs, &producers)?;

        let mut resolver = ArgsResolver::new(self.path_mapping)?;
        if let Some(length) = self.config.max_command_line_length {
            resolver = resolver.with_max_command_line_length(length);
        }

        let snapshot = match &self.capture {
            Some(fs) => ModificationSnapshot::capture(&self.jobs, fs.as_ref(), &resolver),
            None => self.snapshot,
        };

        Ok(Executor {
            jobs: self.jobs,
            producers,
            graph,
            resolver,
            config: self.config,
            delegate: self.delegate,
            diagnostics: self.diagnostics,
            process_set: self.process_set,
            snapshot,
        })
    }
}
