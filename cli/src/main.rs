use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use console::style;
use kumiki::{
    Env, Executor, ExecutorError, Job, JobDelegate, LocalFileSystem, Plan,
    ProcessResult, ResponseFilePolicy, render_command_line,
};

#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every job of a JSON job plan.
    Run(RunArgs),
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Path to the plan file.
    plan: Utf8PathBuf,
    /// Number of jobs to run at the same time.
    #[arg(short = 'j', long = "jobs")]
    concurrency: Option<usize>,
    /// Pass the arguments of every job through a response file.
    #[arg(long)]
    force_response_files: bool,
    /// Spill command lines longer than this into response files.
    #[arg(long)]
    max_command_line_length: Option<usize>,
    /// Print the resolved command lines instead of running anything.
    #[arg(long)]
    dry_run: bool,
}

/// Reports job progress through `tracing`.
struct Printer;

impl JobDelegate for Printer {
    fn job_started(&self, job: &Job, argv: &[String], pid: u32) {
        tracing::info!(pid, "{} {}", style("started").cyan(), job.description());
        tracing::debug!("{}", render_command_line(argv));
    }

    fn job_finished(&self, job: &Job, result: &ProcessResult, pid: Option<u32>) {
        if result.success() {
            tracing::info!(?pid, "{} {}", style("finished").green(), job.description());
            return;
        }

        tracing::error!(
            ?pid,
            "{} {} ({:?})",
            style("failed").red().bold(),
            job.description(),
            result.termination
        );

        let stderr = String::from_utf8_lossy(&result.stderr);
        if !stderr.trim().is_empty() {
            tracing::error!("{}", stderr.trim_end());
        }
    }
}

fn main() -> anyhow::Result<ExitCode> {
    kumiki::init_logging();

    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run(args),
    }
}

fn run(args: RunArgs) -> anyhow::Result<ExitCode> {
    let text = std::fs::read_to_string(&args.plan)
        .with_context(|| format!("Couldn't read plan '{}'", args.plan))?;
    let plan = Plan::from_json(&text).with_context(|| format!("Couldn't parse plan '{}'", args.plan))?;

    let mut config = plan.config;
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(length) = args.max_command_line_length {
        config.max_command_line_length = Some(length);
    }
    config.force_response_files |= args.force_response_files;

    let mut env: Env = std::env::vars_os()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
        .collect();
    env.extend(plan.env);

    let executor = Executor::builder(plan.jobs)
        .config(config)
        .delegate(Arc::new(Printer))
        .capture_snapshot(Arc::new(LocalFileSystem))
        .build()?;

    let result = if args.dry_run {
        dry_run(&executor).map(|_| ExitCode::SUCCESS)
    } else {
        match executor.execute(&env, &LocalFileSystem) {
            Ok(()) => Ok(ExitCode::SUCCESS),
            Err(ExecutorError::BuildFailed) => Ok(ExitCode::FAILURE),
            Err(err) => Err(err.into()),
        }
    };

    executor
        .teardown()
        .context("Couldn't remove the temporary directory")?;

    result
}

fn dry_run(executor: &Executor) -> anyhow::Result<()> {
    let policy = executor.config().response_file_policy();

    for job in executor.jobs() {
        if policy == ResponseFilePolicy::Forced && !job.supports_response_files {
            anyhow::bail!("{} doesn't accept response files", job.description());
        }

        let args = executor.resolver().resolve(job, policy)?;
        println!("{}", render_command_line(&args.argv));
    }

    Ok(())
}
