//! What happens to one job once all of its producers succeeded.

use std::sync::Arc;

use crate::delegate::JobDelegate;
use crate::engine::RunContext;
use crate::engine::notify::Notifier;
use crate::error::JobError;
use crate::job::Job;
use crate::process::{Env, Process, ProcessResult};

/// Runs job `index` to completion and reports whether it succeeded.
///
/// Nothing that goes wrong in here escapes. A job that could not even be
/// launched still gets a `finished` notification, with a synthetic failed
/// result, so the delegate sees every attempted job finish.
pub(crate) fn run_job(ctx: &RunContext<'_>, index: usize, notifier: &Notifier) -> bool {
    let job = &ctx.jobs[index];

    match launch_and_wait(ctx, index, job, notifier) {
        Ok(result) => {
            let success = result.success();
            if !success {
                tracing::warn!("{} failed with {:?}", job.description(), result.termination);
            }
            notifier.finished(index, result);
            success
        }
        Err(err) => {
            tracing::error!("{}: {err}", job.description());
            if let Some(diagnostic) = err.diagnostic() {
                ctx.diagnostics.emit(diagnostic);
            }
            notifier.finished(index, ProcessResult::synthetic_failure());
            false
        }
    }
}

fn launch_and_wait(
    ctx: &RunContext<'_>,
    index: usize,
    job: &Job,
    notifier: &Notifier,
) -> Result<ProcessResult, JobError> {
    let env = merge_env(ctx.env, &job.extra_env);
    let args = ctx.resolver.resolve(job, ctx.config.response_file_policy())?;
    check_inputs(ctx, job)?;

    let process = launch(ctx.delegate, job, &args.argv, &env)?;
    let pid = process.pid();

    tracing::debug!(pid, response_file = args.used_response_file, "launched {}", job.tool);
    notifier.started(index, args.argv, pid);

    if let Some(set) = ctx.process_set
        && let Err(err) = set.register(process.clone())
    {
        tracing::warn!(pid, "failed to register process: {err}");
    }

    let result = process.wait();

    if let Some(set) = ctx.process_set {
        set.unregister(&process);
    }

    Ok(result.unwrap_or_else(|err| {
        tracing::error!("{}: {}", job.description(), JobError::Wait(err));
        ProcessResult {
            pid: Some(pid),
            ..ProcessResult::synthetic_failure()
        }
    }))
}

fn launch(
    delegate: &dyn JobDelegate,
    job: &Job,
    argv: &[String],
    env: &Env,
) -> Result<Arc<dyn Process>, JobError> {
    delegate
        .launch_process(job, argv, env)
        .map_err(|cause| JobError::Launch {
            tool: job.tool.clone(),
            cause,
        })
}

/// Run-wide environment overlaid with the job's own variables.
pub(crate) fn merge_env(base: &Env, extra: &Env) -> Env {
    let mut env = base.clone();
    env.extend(extra.iter().map(|(key, value)| (key.clone(), value.clone())));
    env
}

/// Fails if any input changed on disk after the snapshot was taken.
///
/// Inputs missing from the snapshot, such as files produced during this run,
/// are not checked.
fn check_inputs(ctx: &RunContext<'_>, job: &Job) -> Result<(), JobError> {
    for input in &job.inputs {
        let Some(recorded) = ctx.snapshot.get(input) else {
            continue;
        };

        let path = ctx.resolver.resolve_path(&input.file);
        let current = ctx
            .fs
            .modification_time(&path)
            .map_err(|source| JobError::ModificationTime {
                path: input.file.clone(),
                source,
            })?;

        if current > recorded {
            return Err(JobError::InputModified {
                path: input.file.clone(),
            });
        }
    }

    Ok(())
}
