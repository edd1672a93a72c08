//! The bounded conversion process pool.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::ConversionJob;

/// Job lifecycle: `Queued -> Running -> (Done | Failed)`.
///
/// `Failed` is terminal and carries a message; the output file is gone
/// before the failure becomes observable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed(String),
}

impl JobStatus {
    /// True for `Done` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed(_))
    }
}

struct JobState {
    status: Mutex<JobStatus>,
    done: Condvar,
}

/// Handle to one submitted conversion.
///
/// Handles are `Send` and may be polled from any thread.
#[derive(Clone)]
pub struct ConversionHandle {
    state: Arc<JobState>,
}

impl ConversionHandle {
    fn new(status: JobStatus) -> Self {
        Self {
            state: Arc::new(JobState {
                status: Mutex::new(status),
                done: Condvar::new(),
            }),
        }
    }

    fn set(&self, status: JobStatus) {
        let mut guard = self.state.status.lock().unwrap();
        *guard = status;
        self.state.done.notify_all();
    }

    /// Current status snapshot.
    pub fn poll(&self) -> JobStatus {
        self.state
            .status
            .lock().unwrap()
            .clone()
    }

    /// Conversion progress in `[0, 1]`.
    ///
    /// Process isolation hides incremental progress, so this reports 0.0
    /// until the job reaches a terminal state.
    pub fn progress(&self) -> f32 {
        if self.poll().is_terminal() {
            1.0
        } else {
            0.0
        }
    }

    /// Block until the job reaches a terminal state.
    ///
    /// With a timeout, returns the status reached when the wait ended,
    /// which may still be non-terminal.
    pub fn wait(&self, timeout: Option<Duration>) -> JobStatus {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut guard = self.state.status.lock().unwrap();
        while !guard.is_terminal() {
            match deadline {
                None => {
                    guard = self
                        .state
                        .done
                        .wait(guard).unwrap();
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    let (g, _) = self
                        .state
                        .done
                        .wait_timeout(guard, deadline - now).unwrap();
                    guard = g;
                }
            }
        }
        guard.clone()
    }
}

/// The command used to spawn worker processes.
///
/// Defaults to re-invoking the current executable with the
/// `convert-worker` subcommand; job arguments are appended.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<OsString>,
}

impl WorkerCommand {
    /// The current executable's hidden `convert-worker` subcommand.
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self {
            program: std::env::current_exe()?,
            args: vec![OsString::from("convert-worker")],
        })
    }

    /// An arbitrary program with fixed leading arguments.
    pub fn new(program: impl Into<PathBuf>, args: Vec<OsString>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    fn command(&self, job: &ConversionJob) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.args(job.to_worker_args());
        cmd
    }
}

struct RunnerShared {
    queue: Mutex<VecDeque<(ConversionJob, ConversionHandle)>>,
    available: Condvar,
    stopping: AtomicBool,
    command: WorkerCommand,
}

/// Bounded pool of conversion worker processes.
///
/// Each of the pool's dispatcher threads runs at most one child process at
/// a time, so at most `workers` conversions are in flight. Children are
/// always spawned fresh, never forked from this address space, which keeps
/// decoder libraries clean of inherited state.
pub struct ConversionRunner {
    shared: Arc<RunnerShared>,
    dispatchers: Mutex<Vec<JoinHandle<()>>>,
}

impl ConversionRunner {
    /// Start a pool with `workers` dispatcher threads.
    pub fn new(workers: usize, command: WorkerCommand) -> Self {
        let shared = Arc::new(RunnerShared {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            stopping: AtomicBool::new(false),
            command,
        });

        let workers = workers.max(1);
        let mut dispatchers = Vec::with_capacity(workers);
        for n in 0..workers {
            let shared = Arc::clone(&shared);
            dispatchers.push(
                std::thread::Builder::new()
                    .name(format!("convert-{}", n))
                    .spawn(move || dispatcher_loop(&shared))
                    .expect("failed to spawn conversion dispatcher"),
            );
        }

        info!(workers, "conversion pool started");
        Self {
            shared,
            dispatchers: Mutex::new(dispatchers),
        }
    }

    /// Queue a job; returns immediately with its handle.
    pub fn submit(&self, job: ConversionJob) -> ConversionHandle {
        let handle = ConversionHandle::new(JobStatus::Queued);
        if self.shared.stopping.load(Ordering::SeqCst) {
            handle.set(JobStatus::Failed("conversion pool is shut down".to_string()));
            return handle;
        }
        debug!(output = %job.output().display(), "conversion job queued");
        let mut queue = self
            .shared
            .queue
            .lock().unwrap();
        queue.push_back((job, handle.clone()));
        self.shared.available.notify_one();
        handle
    }

    /// Stop the dispatchers. Queued jobs fail; in-flight children finish.
    pub fn shutdown(&self) {
        if self.shared.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut queue = self
                .shared
                .queue
                .lock().unwrap();
            for (job, handle) in queue.drain(..) {
                let _ = std::fs::remove_file(job.output());
                handle.set(JobStatus::Failed("conversion pool is shut down".to_string()));
            }
        }
        self.shared.available.notify_all();

        let mut dispatchers = self.dispatchers.lock().unwrap();
        for handle in dispatchers.drain(..) {
            let _ = handle.join();
        }
        info!("conversion pool stopped");
    }
}

impl Drop for ConversionRunner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn dispatcher_loop(shared: &RunnerShared) {
    loop {
        let (job, handle) = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if shared.stopping.load(Ordering::SeqCst) {
                    return;
                }
                if let Some(next) = queue.pop_front() {
                    break next;
                }
                queue = shared
                    .available
                    .wait(queue).unwrap();
            }
        };

        handle.set(JobStatus::Running);
        let outcome = run_child(shared, &job);

        match outcome {
            Ok(()) => {
                debug!(output = %job.output().display(), "conversion finished");
                handle.set(JobStatus::Done);
            }
            Err(message) => {
                // Remove the output before the failure becomes observable.
                let _ = std::fs::remove_file(job.output());
                warn!(output = %job.output().display(), error = %message, "conversion failed");
                handle.set(JobStatus::Failed(message));
            }
        }
    }
}

fn run_child(shared: &RunnerShared, job: &ConversionJob) -> Result<(), String> {
    let output = shared
        .command
        .command(job)
        .output()
        .map_err(|e| format!("failed to spawn conversion worker: {}", e))?;

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = stderr.trim();
        if detail.is_empty() {
            Err(format!("conversion worker exited with {}", output.status))
        } else {
            Err(detail.to_string())
        }
    }
}
