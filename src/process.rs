//! The process boundary: launching tools, waiting on them, and killing them.

use std::collections::BTreeMap;
use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Environment passed to launched processes.
pub type Env = BTreeMap<String, String>;

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The process exited normally with the given code.
    Exited(i32),
    /// The process was killed by the given signal.
    Signalled(i32),
}

impl Termination {
    pub fn success(self) -> bool {
        matches!(self, Termination::Exited(0))
    }
}

impl From<ExitStatus> for Termination {
    #[cfg(unix)]
    fn from(status: ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        match (status.code(), status.signal()) {
            (Some(code), _) => Termination::Exited(code),
            (None, Some(signal)) => Termination::Signalled(signal),
            (None, None) => Termination::Exited(1),
        }
    }

    #[cfg(not(unix))]
    fn from(status: ExitStatus) -> Self {
        Termination::Exited(status.code().unwrap_or(1))
    }
}

/// Everything observed about a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    pub termination: Termination,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// `None` when no process was ever launched.
    pub pid: Option<u32>,
}

impl ProcessResult {
    /// The result reported for a job whose process could not be run at all.
    pub fn synthetic_failure() -> Self {
        Self {
            termination: Termination::Exited(1),
            stdout: Vec::new(),
            stderr: Vec::new(),
            pid: None,
        }
    }

    pub fn success(&self) -> bool {
        self.termination.success()
    }
}

/// A launched process.
///
/// Implementations must allow `terminate` to be called from another thread
/// while a `wait` is in progress.
pub trait Process: Send + Sync {
    fn pid(&self) -> u32;

    /// Blocks until the process exits and returns its captured output.
    fn wait(&self) -> io::Result<ProcessResult>;

    /// Forcibly stops the process. Does nothing if it already exited.
    fn terminate(&self) -> io::Result<()>;
}

const POLL_INTERVAL: Duration = Duration::from_millis(5);

type Capture = JoinHandle<io::Result<Vec<u8>>>;

/// A real operating system process with piped stdout and stderr.
pub struct OsProcess {
    pid: u32,
    child: Mutex<Child>,
    stdout: Mutex<Option<Capture>>,
    stderr: Mutex<Option<Capture>>,
}

impl OsProcess {
    fn new(mut child: Child) -> Self {
        let stdout = child.stdout.take().map(capture);
        let stderr = child.stderr.take().map(capture);

        Self {
            pid: child.id(),
            child: Mutex::new(child),
            stdout: Mutex::new(stdout),
            stderr: Mutex::new(stderr),
        }
    }
}

fn capture(mut pipe: impl Read + Send + 'static) -> Capture {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        pipe.read_to_end(&mut buffer)?;
        Ok(buffer)
    })
}

fn collect(slot: &Mutex<Option<Capture>>) -> io::Result<Vec<u8>> {
    match lock(slot).take() {
        Some(handle) => handle
            .join()
            .map_err(|_| io::Error::other("output capture thread panicked"))?,
        None => Ok(Vec::new()),
    }
}

/// Locks a mutex, recovering the data if another thread panicked holding it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Process for OsProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn wait(&self) -> io::Result<ProcessResult> {
        // The child is polled rather than waited on so that `terminate` can
        // take the lock in between.
        let status = loop {
            if let Some(status) = lock(&self.child).try_wait()? {
                break status;
            }
            thread::sleep(POLL_INTERVAL);
        };

        Ok(ProcessResult {
            termination: status.into(),
            stdout: collect(&self.stdout)?,
            stderr: collect(&self.stderr)?,
            pid: Some(self.pid),
        })
    }

    fn terminate(&self) -> io::Result<()> {
        let mut child = lock(&self.child);
        if child.try_wait()?.is_some() {
            return Ok(());
        }
        child.kill()
    }
}

/// Spawns `argv` as a real process with exactly the given environment.
///
/// This is the default behavior of
/// [`JobDelegate::launch_process`](crate::JobDelegate::launch_process).
pub fn spawn_process(argv: &[String], env: &Env) -> io::Result<Arc<dyn Process>> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty argument list"))?;

    let child = Command::new(program)
        .args(args)
        .env_clear()
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    Ok(Arc::new(OsProcess::new(child)))
}

/// A shared registry of running processes, used to interrupt a run from the
/// outside, e.g. when the driver receives an interrupt.
///
/// Entries are tracked by identity, not by pid: pids can be reused as soon as
/// a process exits, and delegate-provided processes need not have unique ones.
///
/// Once [`ProcessSet::terminate_all`] was called the set stays cancelled: any
/// process registered afterwards is terminated immediately.
#[derive(Default)]
pub struct ProcessSet {
    processes: Mutex<Vec<Arc<dyn Process>>>,
    cancelled: AtomicBool,
}

impl ProcessSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, process: Arc<dyn Process>) -> io::Result<()> {
        let mut processes = lock(&self.processes);
        if self.cancelled.load(Ordering::SeqCst) {
            return process.terminate();
        }
        processes.push(process);
        Ok(())
    }

    /// Removes `process`, leaving other entries with the same pid in place.
    pub fn unregister(&self, process: &Arc<dyn Process>) {
        lock(&self.processes).retain(|entry| !Arc::ptr_eq(entry, process));
    }

    pub fn len(&self) -> usize {
        lock(&self.processes).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Terminates every registered process and cancels the set.
    pub fn terminate_all(&self) {
        let processes = {
            let mut processes = lock(&self.processes);
            self.cancelled.store(true, Ordering::SeqCst);
            std::mem::take(&mut *processes)
        };

        for process in processes {
            if let Err(err) = process.terminate() {
                tracing::warn!(pid = process.pid(), "failed to terminate process: {err}");
            }
        }
    }
}

impl std::fmt::Debug for ProcessSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSet")
            .field("running", &self.len())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Idle {
        pid: u32,
        terminated: AtomicBool,
    }

    impl Process for Idle {
        fn pid(&self) -> u32 {
            self.pid
        }

        fn wait(&self) -> io::Result<ProcessResult> {
            Ok(ProcessResult::synthetic_failure())
        }

        fn terminate(&self) -> io::Result<()> {
            self.terminated.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn idle(pid: u32) -> Arc<Idle> {
        Arc::new(Idle {
            pid,
            terminated: AtomicBool::new(false),
        })
    }

    #[test]
    fn test_termination_success() {
        assert!(Termination::Exited(0).success());
        assert!(!Termination::Exited(1).success());
        assert!(!Termination::Signalled(9).success());
        assert!(!ProcessResult::synthetic_failure().success());
    }

    #[test]
    fn test_process_set_terminate_all() {
        let set = ProcessSet::new();
        let a = idle(10);
        let b = idle(11);
        let b_entry: Arc<dyn Process> = b.clone();

        set.register(a.clone()).unwrap();
        set.register(b_entry.clone()).unwrap();
        set.unregister(&b_entry);
        assert_eq!(set.len(), 1);

        set.terminate_all();
        assert!(set.is_empty());
        assert!(set.is_cancelled());
        assert!(a.terminated.load(Ordering::SeqCst));
        assert!(!b.terminated.load(Ordering::SeqCst));

        // Late registrations are stopped right away.
        let c = idle(12);
        set.register(c.clone()).unwrap();
        assert!(c.terminated.load(Ordering::SeqCst));
        assert!(set.is_empty());
    }

    #[test]
    fn test_process_set_with_reused_pid() {
        let set = ProcessSet::new();
        let finished: Arc<dyn Process> = idle(42);
        let running = idle(42);

        set.register(finished.clone()).unwrap();
        set.register(running.clone()).unwrap();
        assert_eq!(set.len(), 2);

        // The exited process goes away, its namesake stays registered.
        set.unregister(&finished);
        assert_eq!(set.len(), 1);

        set.terminate_all();
        assert!(running.terminated.load(Ordering::SeqCst));
    }

    #[test]
    fn test_spawn_empty_argv() {
        let err = spawn_process(&[], &Env::new()).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[cfg(unix)]
    #[test]
    fn test_spawn_captures_output() {
        let argv = vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            "echo out; echo err >&2; echo $GREETING; exit 3".to_string(),
        ];
        let env = Env::from([("GREETING".to_string(), "hello".to_string())]);

        let process = spawn_process(&argv, &env).unwrap();
        let result = process.wait().unwrap();

        assert_eq!(result.termination, Termination::Exited(3));
        assert_eq!(String::from_utf8_lossy(&result.stdout), "out\nhello\n");
        assert_eq!(String::from_utf8_lossy(&result.stderr), "err\n");
        assert_eq!(result.pid, Some(process.pid()));
    }

    #[cfg(unix)]
    #[test]
    fn test_terminate_running_process() {
        let argv = vec!["/bin/sh".to_string(), "-c".to_string(), "exec sleep 30".to_string()];
        let process = spawn_process(&argv, &Env::new()).unwrap();

        let waiter = {
            let process = process.clone();
            thread::spawn(move || process.wait())
        };

        process.terminate().unwrap();
        let result = waiter.join().unwrap().unwrap();
        assert_eq!(result.termination, Termination::Signalled(9));
    }
}
