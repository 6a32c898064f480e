//! One supervised worker process: the parent-side handle that spawns
//! and watches it, and the child-side entry point that runs the
//! service and answers the supervisor's liveness pings.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use runtime_service::CancellationToken;

use crate::error::SupervisorError;
use crate::factory::ServiceFactory;
use crate::protocol;

/// Set (to any value) in a worker's environment by
/// [`crate::supervisor::MultiProcessSupervisor`] before it re-execs the
/// current binary. A binary's `main` checks [`is_worker_process`] before
/// doing anything else and, if set, hands control to [`run_worker`]
/// instead of its normal startup path.
pub const WORKER_ROLE_ENV_VAR: &str = "MSGFLUX_WORKER_ROLE";
pub const INSTANCE_INDEX_ENV_VAR: &str = "INSTANCE_INDEX";
pub const INSTANCE_COUNT_ENV_VAR: &str = "INSTANCE_COUNT";

pub fn is_worker_process() -> bool {
    std::env::var(WORKER_ROLE_ENV_VAR).is_ok()
}

/// This worker's shard index, `0..instance_count()`. `None` outside a
/// worker process.
pub fn instance_index() -> Option<u32> {
    std::env::var(INSTANCE_INDEX_ENV_VAR).ok().and_then(|v| v.parse().ok())
}

/// The total number of sibling workers. `None` outside a worker process.
pub fn instance_count() -> Option<u32> {
    std::env::var(INSTANCE_COUNT_ENV_VAR).ok().and_then(|v| v.parse().ok())
}

/// Builds the service from `factory` and runs it on the calling thread.
/// A background thread listens on stdin for the supervisor's
/// `TEST_ALIVE`/`STOP` messages, answering `ALIVE` on stdout and setting
/// the service's cancellation token on `STOP`. Exits the process with
/// the service's result; never returns.
pub fn run_worker<F: ServiceFactory>(factory: &F) -> ! {
    let mut service = factory.create_service();
    let token = service.core().token_arc();

    thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            match line.trim() {
                protocol::TEST_ALIVE => {
                    let _ = writeln!(stdout, "{}", protocol::ALIVE);
                    let _ = stdout.flush();
                }
                protocol::STOP => {
                    token.set();
                    break;
                }
                other => tracing::warn!(message = %other, "unknown message on supervisor pipe"),
            }
        }
    });

    match service.start() {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            tracing::error!(error = %e, "worker service exited with an error");
            std::process::exit(1);
        }
    }
}

/// The parent-side handle to one worker process: its child handle, the
/// duplex pipe to it, and the liveness watchdog for it.
pub struct WorkerHandle {
    instance_index: u32,
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    responses: Mutex<Receiver<String>>,
    stop_requested: AtomicBool,
    liveness_stop: CancellationToken,
}

impl WorkerHandle {
    /// Re-execs the current binary as a worker with `instance_index` /
    /// `instance_count` in its environment, wiring its stdin/stdout up
    /// as the duplex pipe the liveness protocol runs over.
    pub fn spawn(instance_index: u32, instance_count: u32) -> Result<Self, SupervisorError> {
        let exe = std::env::current_exe().map_err(SupervisorError::Spawn)?;
        let mut child = Command::new(exe)
            .env(WORKER_ROLE_ENV_VAR, "1")
            .env(INSTANCE_INDEX_ENV_VAR, instance_index.to_string())
            .env(INSTANCE_COUNT_ENV_VAR, instance_count.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(SupervisorError::Spawn)?;

        let stdin = child.stdin.take().expect("child stdin was requested as piped");
        let stdout = child.stdout.take().expect("child stdout was requested as piped");

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                match line {
                    Ok(line) if tx.send(line).is_ok() => {}
                    _ => break,
                }
            }
        });

        Ok(WorkerHandle {
            instance_index,
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            responses: Mutex::new(rx),
            stop_requested: AtomicBool::new(false),
            liveness_stop: CancellationToken::new(),
        })
    }

    pub fn instance_index(&self) -> u32 {
        self.instance_index
    }

    pub fn is_alive(&self) -> bool {
        matches!(
            self.child.lock().expect("worker child lock poisoned").try_wait(),
            Ok(None)
        )
    }

    pub fn pid(&self) -> u32 {
        self.child.lock().expect("worker child lock poisoned").id()
    }

    fn send_line(&self, line: &str) {
        let mut stdin = self.stdin.lock().expect("worker stdin lock poisoned");
        let _ = writeln!(stdin, "{line}");
        let _ = stdin.flush();
    }

    /// Sends the graceful-stop message. Does not wait for the process to
    /// exit — see [`MultiProcessSupervisor::finalize_service`] for that.
    ///
    /// [`MultiProcessSupervisor::finalize_service`]: crate::supervisor::MultiProcessSupervisor
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.liveness_stop.set();
        self.send_line(protocol::STOP);
    }

    pub fn terminate(&self) {
        #[cfg(unix)]
        {
            let pid = nix::unistd::Pid::from_raw(self.pid() as i32);
            let _ = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM);
        }
        #[cfg(not(unix))]
        {
            self.kill();
        }
    }

    pub fn kill(&self) {
        let _ = self.child.lock().expect("worker child lock poisoned").kill();
    }

    /// Sends `TEST_ALIVE` and waits up to `timeout` for an `ALIVE` reply,
    /// discarding any stale replies left over from a previous check.
    fn check_alive(&self, timeout: Duration) -> bool {
        if !self.is_alive() {
            return false;
        }
        let responses = self.responses.lock().expect("worker responses lock poisoned");
        while responses.try_recv().is_ok() {}
        self.send_line(protocol::TEST_ALIVE);
        matches!(responses.recv_timeout(timeout), Ok(line) if line.trim() == protocol::ALIVE)
    }

    /// Spawns the background thread that polls `check_alive` every
    /// `live_check_interval`, force-killing the worker the first time it
    /// fails to answer within `live_check_timeout`.
    pub fn spawn_liveness_thread(self: &Arc<Self>, live_check_interval: Duration, live_check_timeout: Duration) {
        let handle = Arc::clone(self);
        thread::spawn(move || {
            loop {
                handle.liveness_stop.wait(live_check_interval);
                if handle.liveness_stop.is_set() {
                    return;
                }
                if !handle.check_alive(live_check_timeout) {
                    tracing::error!(instance = handle.instance_index, "worker is not alive, stopping it");
                    handle.stop();
                    handle.kill();
                    return;
                }
            }
        });
    }

    /// Blocks the calling thread until the worker process exits.
    pub fn wait(&self) {
        let _ = self.child.lock().expect("worker child lock poisoned").wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_helpers_round_trip_through_the_process_environment() {
        // SAFETY (test-only): no other thread in this test binary reads
        // these two variables concurrently.
        unsafe {
            std::env::set_var(INSTANCE_INDEX_ENV_VAR, "2");
            std::env::set_var(INSTANCE_COUNT_ENV_VAR, "4");
        }
        assert_eq!(instance_index(), Some(2));
        assert_eq!(instance_count(), Some(4));
        unsafe {
            std::env::remove_var(INSTANCE_INDEX_ENV_VAR);
            std::env::remove_var(INSTANCE_COUNT_ENV_VAR);
        }
    }
}
