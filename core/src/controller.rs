//! Process controller: owns the native child process for the duration of
//! one `exec` call and coordinates the relay tasks around it.
//!
//! A controller runs one process at a time and is reusable across many
//! sequential `exec` calls, including after a launch failure. It is not
//! meant for overlapping `exec` calls from different threads (they are
//! serialized internally), but [`ProcessController::try_destroy`] is safe
//! to call concurrently with an in-flight `exec` from any thread; that is
//! the one sanctioned cross-thread interaction.

use crate::output::{Completion, ProcessOutput};
use crate::relay::{spawn_drainer, spawn_feeder, ConsoleStream, StdinFeed, StreamSink};
use crate::spec::{ProcessSpec, StdinSource};
use crate::{ExecError, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::fs::File;
use tokio::process::Command;
use tracing::{debug, error, warn};

/// Controller lifecycle across one `exec` call.
///
/// Terminal outcomes (`Completed`, `Destroyed`, `FailedToStart`) are
/// transient: the controller returns to `Idle` before `exec` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifecycle {
    /// No process associated
    #[default]
    Idle,
    /// Settings validated, native process creation in progress
    Starting,
    /// Child running, relays draining
    Running,
    /// Child exited normally
    Completed,
    /// Child was killed because `try_destroy` was called
    Destroyed,
    /// The OS could not create the process
    FailedToStart,
}

thread_local! {
    static THREAD_CONTROLLER: Arc<ProcessController> = Arc::new(ProcessController::new());
}

/// Executes external processes one at a time.
///
/// See the module docs for the threading contract.
#[derive(Debug, Default)]
pub struct ProcessController {
    /// Set by `try_destroy`, observed and cleared by the in-flight `exec`
    destroy_requested: AtomicBool,
    /// Pid of the currently associated child, if any
    current_pid: Mutex<Option<Pid>>,
    state: Mutex<Lifecycle>,
    /// Serializes `exec` calls on one controller instance
    exec_gate: tokio::sync::Mutex<()>,
}

impl ProcessController {
    pub fn new() -> Self {
        Self::default()
    }

    /// The calling thread's private controller instance, created lazily on
    /// first access and reused for the life of the thread. Any other thread
    /// holding the returned `Arc` may call [`Self::try_destroy`] on it.
    pub fn thread_local() -> Arc<ProcessController> {
        THREAD_CONTROLLER.with(Arc::clone)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> Lifecycle {
        *self.lock_state()
    }

    /// Execute the process described by `spec`, blocking the caller until
    /// the child has exited and every relay has finished draining. The
    /// returned buffers are complete: no race-delayed final chunk is ever
    /// missing.
    ///
    /// A launch failure (missing executable, bad working directory) raises
    /// [`ExecError::Launch`]; a nonzero exit status or a destroyed process
    /// is a normal result, reported through [`ProcessOutput`].
    pub async fn exec(&self, spec: &ProcessSpec) -> Result<ProcessOutput> {
        spec.validate()?;
        let _gate = self.exec_gate.lock().await;

        // Resolve the stdin source up front: a missing input file fails
        // fast here instead of surfacing as a broken pipe mid-run.
        let stdin_feed = match &spec.stdin {
            StdinSource::None => None,
            StdinSource::Buffer(bytes) => Some(StdinFeed::Buffer(bytes.clone())),
            StdinSource::File(path) => Some(StdinFeed::File(File::open(path).await?)),
        };

        self.transition(Lifecycle::Starting);

        let mut command = Command::new(&spec.command[0]);
        command.args(&spec.command[1..]);
        if let Some(dir) = &spec.working_directory {
            command.current_dir(dir);
        }
        if let Some(env) = &spec.environment {
            // Replacement, not merge: the child environment is exactly `env`.
            command.env_clear();
            command.envs(env);
        }
        command.stdin(match spec.stdin {
            StdinSource::None => Stdio::null(),
            _ => Stdio::piped(),
        });
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!("Failed to launch '{}': {}", spec.command[0], e);
                self.transition(Lifecycle::FailedToStart);
                self.transition(Lifecycle::Idle);
                // A destroy that raced the failed launch has nothing to kill.
                self.destroy_requested.store(false, Ordering::SeqCst);
                return Err(ExecError::Launch(format!(
                    "Failed to launch '{}': {}",
                    spec.command[0], e
                )));
            }
        };

        let pid = child.id().map(|raw| Pid::from_raw(raw as i32));
        *self.lock_pid() = pid;
        debug!("Launched '{}' with pid {:?}", spec.command[0], pid);

        // A destroy request that arrived while the launch was in progress
        // had no pid to target; deliver it now that one is registered.
        if self.destroy_requested.load(Ordering::SeqCst) {
            if let Some(pid) = pid {
                debug!("Delivering destroy requested during startup to process {}", pid);
                deliver_sigkill(pid);
            }
        }
        self.transition(Lifecycle::Running);

        let feeder = match (child.stdin.take(), stdin_feed) {
            (Some(stdin), Some(feed)) => Some(spawn_feeder(stdin, feed)),
            _ => None,
        };

        let stdout_sink = StreamSink::open(&spec.stdout, ConsoleStream::Stdout).await;
        let stderr_sink = StreamSink::open(&spec.stderr, ConsoleStream::Stderr).await;

        let stdout_task = child
            .stdout
            .take()
            .map(|reader| spawn_drainer(reader, stdout_sink.clone()));
        let stderr_dest = if spec.redirect_error_stream {
            stdout_sink.clone()
        } else {
            stderr_sink.clone()
        };
        let stderr_task = child
            .stderr
            .take()
            .map(|reader| spawn_drainer(reader, stderr_dest));

        let status = child.wait().await;

        // The relays see end-of-stream once the child's pipes close;
        // joining them guarantees the capture buffers hold every byte the
        // child wrote, with no partial buffer observable by the caller.
        if let Some(task) = feeder {
            let _ = task.await;
        }
        if let Some(task) = stdout_task {
            let _ = task.await;
        }
        if let Some(task) = stderr_task {
            let _ = task.await;
        }

        // Dissociate before reporting so a late try_destroy is a no-op and
        // nothing leaks into the next exec call.
        self.lock_pid().take();
        let destroyed = self.destroy_requested.swap(false, Ordering::SeqCst);

        let status = match status {
            Ok(status) => status,
            Err(e) => {
                self.transition(Lifecycle::Idle);
                return Err(ExecError::Wait(format!(
                    "Failed to wait for '{}': {}",
                    spec.command[0], e
                )));
            }
        };

        let completion = if let Some(code) = status.code() {
            // The kill may have lost the race with a normal exit; the
            // OS-reported status wins.
            Completion::Exited { code }
        } else {
            use std::os::unix::process::ExitStatusExt;
            let signal = status.signal().unwrap_or_default();
            if destroyed {
                Completion::Destroyed { signal }
            } else {
                Completion::Signaled { signal }
            }
        };

        let stdout = stdout_sink.lock().await.finish().await;
        let stderr = stderr_sink.lock().await.finish().await;
        let output = ProcessOutput::new(completion, stdout, stderr);

        self.transition(if output.destroyed() {
            Lifecycle::Destroyed
        } else {
            Lifecycle::Completed
        });
        self.transition(Lifecycle::Idle);
        debug!(
            "Process '{}' finished with exit value {}",
            spec.command[0],
            output.exit_value()
        );
        Ok(output)
    }

    /// Request forcible termination (kill, not a graceful signal) of the
    /// currently associated process.
    ///
    /// Non-blocking, callable from any thread in any state, idempotent,
    /// never fails. With no process associated this is a no-op. A request
    /// that lands while the launch is still in progress (the pid is not
    /// registered yet) is flagged and delivered by `exec` as soon as the
    /// pid is known. The thread blocked in `exec` observes the result
    /// asynchronously as a [`Completion::Destroyed`] outcome, never as an
    /// error.
    pub fn try_destroy(&self) {
        let guard = self.lock_pid();
        match *guard {
            Some(pid) => {
                self.destroy_requested.store(true, Ordering::SeqCst);
                deliver_sigkill(pid);
            }
            // A running process always has a registered pid, so a bare
            // Starting state is the only launch-in-progress window.
            None if self.state() == Lifecycle::Starting => {
                self.destroy_requested.store(true, Ordering::SeqCst);
                debug!("Destroy requested during startup; deferred until the pid is known");
            }
            None => {
                debug!("try_destroy with no associated process is a no-op");
            }
        }
    }

    fn transition(&self, next: Lifecycle) {
        let mut state = self.lock_state();
        if *state != next {
            debug!("Controller transitioning from {:?} to {:?}", *state, next);
            *state = next;
        }
    }

    fn lock_pid(&self) -> MutexGuard<'_, Option<Pid>> {
        self.current_pid.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_state(&self) -> MutexGuard<'_, Lifecycle> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn deliver_sigkill(pid: Pid) {
    debug!("Sending SIGKILL to process {}", pid);
    match kill(pid, Signal::SIGKILL) {
        Ok(()) => {}
        Err(nix::errno::Errno::ESRCH) => {
            // Process already exited
            debug!("Process {} already exited", pid);
        }
        Err(nix::errno::Errno::EPERM) => {
            debug!(
                "Permission denied signaling process {} (likely already exited)",
                pid
            );
        }
        Err(e) => {
            warn!("Failed to send SIGKILL to process {}: {}", pid, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_invalid_spec_fails_before_launch() {
        let controller = ProcessController::new();
        let spec = ProcessSpec::new(Vec::<String>::new());

        let result = controller.exec(&spec).await;
        assert!(matches!(result, Err(ExecError::InvalidSpec(_))));
        assert_eq!(controller.state(), Lifecycle::Idle);
    }

    #[tokio::test]
    async fn test_try_destroy_idle_is_noop() {
        let controller = ProcessController::new();
        controller.try_destroy();
        controller.try_destroy();
        assert_eq!(controller.state(), Lifecycle::Idle);
        assert!(!controller.destroy_requested.load(Ordering::SeqCst));

        // An unrelated exec afterwards is unaffected.
        let spec = ProcessSpec::new(["echo", "still fine"]);
        let output = controller.exec(&spec).await.unwrap();
        assert_eq!(output.exit_value(), 0);
        assert!(!output.destroyed());
    }

    #[test]
    fn test_try_destroy_flags_a_launch_in_progress() {
        let controller = ProcessController::new();

        controller.try_destroy();
        assert!(!controller.destroy_requested.load(Ordering::SeqCst));

        // Between the Starting transition and pid registration there is no
        // pid to signal; the request must still be remembered.
        controller.transition(Lifecycle::Starting);
        controller.try_destroy();
        assert!(controller.destroy_requested.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_destroy_requested_during_startup_kills_the_child() {
        let controller = ProcessController::new();
        controller.transition(Lifecycle::Starting);
        controller.try_destroy();

        let spec = ProcessSpec::new(["sleep", "600"]);
        let output = tokio::time::timeout(Duration::from_secs(10), controller.exec(&spec))
            .await
            .expect("deferred destroy did not terminate the child")
            .unwrap();

        assert!(output.destroyed());
        assert_ne!(output.exit_value(), 0);
        assert_eq!(controller.state(), Lifecycle::Idle);
        assert!(!controller.destroy_requested.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_destroy_during_failed_launch_does_not_leak() {
        let controller = ProcessController::new();
        controller.transition(Lifecycle::Starting);
        controller.try_destroy();

        let spec = ProcessSpec::new(["/no/such/binary"]);
        let result = controller.exec(&spec).await;
        assert!(matches!(result, Err(ExecError::Launch(_))));
        assert!(!controller.destroy_requested.load(Ordering::SeqCst));

        // The stale request must not touch the next run.
        let spec = ProcessSpec::new(["echo", "alive"]);
        let output = controller.exec(&spec).await.unwrap();
        assert_eq!(output.exit_value(), 0);
        assert!(!output.destroyed());
    }

    #[test]
    fn test_thread_local_is_per_thread() {
        let here = Arc::as_ptr(&ProcessController::thread_local()) as usize;
        let here_again = Arc::as_ptr(&ProcessController::thread_local()) as usize;
        assert_eq!(here, here_again);

        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let there = Arc::as_ptr(&ProcessController::thread_local()) as usize;
            tx.send(there).unwrap();
        })
        .join()
        .unwrap();
        let there = rx.recv().unwrap();
        assert_ne!(here, there);
    }
}
