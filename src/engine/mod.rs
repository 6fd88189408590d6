//! The task graph engine.
//!
//! Every job gets a task in an explicit task table. A task waits until each
//! producer of its inputs has reported a result. If one of them failed, the
//! task fails on the spot without ever reaching the worker pool. Otherwise it
//! is dispatched to the pool, which runs the execution protocol in
//! [`protocol`]. An umbrella task collects all job results and folds them
//! into one [`BuildValue::AllJobs`].
//!
//! The table and the umbrella are owned by the scheduling loop, which runs on
//! the caller's thread. Workers only ever see the read-only [`RunContext`].

mod notify;
mod protocol;

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::LazyLock;
use std::sync::mpsc::channel;
use std::thread;

use indicatif::ProgressStyle;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::config::ExecutorConfig;
use crate::delegate::{DiagnosticsSink, JobDelegate};
use crate::error::ExecutorError;
use crate::fs::{FileSystem, ModificationSnapshot};
use crate::graph::JobGraph;
use crate::job::Job;
use crate::process::{Env, ProcessSet};
use crate::resolver::ArgsResolver;

use self::notify::Notifier;

static PROGRESS_STYLE: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        .expect("Error setting progress bar template")
        .progress_chars("=>-")
});

static SPINNER_STYLE: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_spinner()
        .template("{spinner:.blue} {msg}")
        .expect("Error setting spinner template")
});

/// The value flowing through the task graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildValue {
    /// Result of a single job.
    Job { success: bool },
    /// Logical AND of every job result.
    AllJobs { success: bool },
}

impl BuildValue {
    pub fn success(self) -> bool {
        match self {
            BuildValue::Job { success } | BuildValue::AllJobs { success } => success,
        }
    }
}

/// Run-scoped collaborators, shared read-only by every job body.
pub(crate) struct RunContext<'a> {
    pub jobs: &'a [Job],
    pub graph: &'a JobGraph,
    pub env: &'a Env,
    pub fs: &'a dyn FileSystem,
    pub resolver: &'a ArgsResolver,
    pub delegate: &'a dyn JobDelegate,
    pub diagnostics: &'a dyn DiagnosticsSink,
    pub process_set: Option<&'a ProcessSet>,
    pub snapshot: &'a ModificationSnapshot,
    pub config: &'a ExecutorConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
    Pending,
    Waiting,
    Dispatched,
    Done { value: BuildValue, skipped: bool },
}

/// Per-job bookkeeping, private to the scheduling loop.
#[derive(Debug)]
struct JobTask {
    state: JobState,
    /// Producers that have not reported yet.
    remaining: usize,
    producer_failed: bool,
}

impl JobTask {
    fn new() -> Self {
        Self {
            state: JobState::Pending,
            remaining: 0,
            producer_failed: false,
        }
    }

    fn start(&mut self, producers: usize) {
        debug_assert_eq!(self.state, JobState::Pending);
        self.state = JobState::Waiting;
        self.remaining = producers;
    }

    /// Records a producer's result. Returns `true` once every producer has
    /// reported.
    fn deliver(&mut self, value: BuildValue) -> bool {
        debug_assert_eq!(self.state, JobState::Waiting);
        self.remaining -= 1;
        self.producer_failed |= !value.success();
        self.remaining == 0
    }

    fn complete(&mut self, value: BuildValue, skipped: bool) {
        debug_assert!(!matches!(self.state, JobState::Done { .. }));
        self.state = JobState::Done { value, skipped };
    }
}

/// The "all jobs done" task.
///
/// Its result is never reused: every run starts from a fresh umbrella, so a
/// previous aggregate is never trusted and all jobs are evaluated again.
#[derive(Debug)]
struct AllJobsTask {
    remaining: usize,
    success: bool,
}

impl AllJobsTask {
    fn new(jobs: usize) -> Self {
        Self {
            remaining: jobs,
            success: true,
        }
    }

    fn deliver(&mut self, value: BuildValue) {
        self.remaining -= 1;
        self.success &= value.success();
    }

    fn is_complete(&self) -> bool {
        self.remaining == 0
    }

    fn value(&self) -> BuildValue {
        BuildValue::AllJobs {
            success: self.success,
        }
    }
}

/// Builds the "all jobs done" value.
///
/// Spawns the notification thread and the worker pool, schedules every job,
/// and returns once all jobs completed and all notifications were delivered.
pub(crate) fn build_all(ctx: &RunContext<'_>) -> Result<BuildValue, ExecutorError> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(ctx.config.worker_count())
        .thread_name(|index| format!("kumiki-worker-{index}"))
        .build()?;

    let (sender, receiver) = channel();
    let (jobs, delegate) = (ctx.jobs, ctx.delegate);

    thread::scope(|scope| {
        thread::Builder::new()
            .name("kumiki-notify".to_string())
            .spawn_scoped(scope, move || notify::deliver(jobs, delegate, receiver))
            .map_err(ExecutorError::Notifier)?;

        // The notification thread exits once `schedule` drops the last
        // notifier, and the scope joins it before returning.
        Ok(schedule(ctx, &pool, Notifier::new(sender)))
    })
}

fn schedule(ctx: &RunContext<'_>, pool: &rayon::ThreadPool, notifier: Notifier) -> BuildValue {
    let total = ctx.jobs.len();
    let mut tasks = (0..total).map(|_| JobTask::new()).collect::<Vec<_>>();
    let mut all = AllJobsTask::new(total);

    if total == 0 {
        return all.value();
    }

    let root_span = tracing::info_span!("executing_jobs");
    root_span.pb_set_length(total as u64);
    root_span.pb_set_style(&PROGRESS_STYLE);
    root_span.pb_set_message("Running jobs...");
    let _enter = root_span.enter();

    // (index, did the job succeed)
    let (result_sender, result_receiver) = channel::<(usize, thread::Result<bool>)>();

    pool.in_place_scope(|s| {
        let dispatch = |index: usize| {
            let sender = result_sender.clone();
            let notifier = notifier.clone();
            let parent = root_span.clone();

            s.spawn(move |_| {
                let job = &ctx.jobs[index];
                let span = tracing::info_span!(parent: &parent, "job", index);
                span.pb_set_style(&SPINNER_STYLE);
                span.pb_set_message(&job.description());
                let _enter = span.enter();

                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    protocol::run_job(ctx, index, &notifier)
                }));

                // The receiver outlives every worker.
                let _ = sender.send((index, outcome));
            });
        };

        // Completions that still need to be propagated through the graph.
        let mut completed = VecDeque::new();

        for (index, task) in tasks.iter_mut().enumerate() {
            task.start(ctx.graph.producers(index).count());
            if task.remaining == 0 {
                task.state = JobState::Dispatched;
                dispatch(index);
            }
        }

        while !all.is_complete() {
            let (index, value, skipped) = match completed.pop_front() {
                Some(skipped) => skipped,
                None => match result_receiver.recv() {
                    Ok((index, Ok(success))) => (index, BuildValue::Job { success }, false),
                    Ok((_, Err(panic))) => resume_unwind(panic),
                    Err(_) => {
                        tracing::error!("job results channel closed unexpectedly");
                        return;
                    }
                },
            };

            tasks[index].complete(value, skipped);
            all.deliver(value);
            root_span.pb_inc(1);

            for dependent in ctx.graph.dependents(index) {
                let task = &mut tasks[dependent];
                if !task.deliver(value) {
                    continue;
                }

                if task.producer_failed {
                    tracing::debug!("skipping {}", ctx.jobs[dependent].description());
                    completed.push_back((dependent, BuildValue::Job { success: false }, true));
                } else {
                    task.state = JobState::Dispatched;
                    dispatch(dependent);
                }
            }
        }
    });

    if !all.is_complete() {
        return BuildValue::AllJobs { success: false };
    }

    let (mut failed, mut skipped) = (0, 0);
    for task in &tasks {
        match task.state {
            JobState::Done { skipped: true, .. } => skipped += 1,
            JobState::Done { value, .. } if !value.success() => failed += 1,
            _ => {}
        }
    }

    tracing::info!(jobs = total, failed, skipped, "finished running jobs");

    all.value()
}
