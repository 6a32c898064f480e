//! Supervises `instance_count` worker processes, restarting any that
//! exit while the supervisor itself is still running, and shutting all
//! of them down gracefully-then-forcefully when stopped.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use runtime_service::{BaseService, CancellationToken, ServiceCore, ServiceError};

use crate::worker::WorkerHandle;

struct SupervisorShared {
    instance_count: u32,
    shutdown_timeout: Duration,
    live_check_interval: Duration,
    live_check_timeout: Duration,
    restart_on_failure: bool,
    cancellation_token: Arc<CancellationToken>,
    workers: Mutex<Vec<Arc<WorkerHandle>>>,
}

impl SupervisorShared {
    fn spawn_worker(self: &Arc<Self>, instance_index: u32) {
        tracing::info!(instance = instance_index, "starting service instance");
        let handle = match WorkerHandle::spawn(instance_index, self.instance_count) {
            Ok(handle) => Arc::new(handle),
            Err(e) => {
                tracing::error!(instance = instance_index, error = %e, "failed to start service instance");
                return;
            }
        };

        handle.spawn_liveness_thread(self.live_check_interval, self.live_check_timeout);
        self.workers.lock().expect("workers lock poisoned").push(Arc::clone(&handle));

        let shared = Arc::clone(self);
        let watched = Arc::clone(&handle);
        thread::spawn(move || {
            watched.wait();
            shared.on_worker_exit(&watched);
        });
    }

    fn on_worker_exit(self: &Arc<Self>, exited: &Arc<WorkerHandle>) {
        self.workers
            .lock()
            .expect("workers lock poisoned")
            .retain(|w| !Arc::ptr_eq(w, exited));

        if !self.restart_on_failure || self.cancellation_token.is_set() {
            return;
        }
        self.spawn_worker(exited.instance_index());
    }
}

/// Re-execs the current binary `instance_count` times, each run as a
/// [`crate::factory::ServiceFactory`]-built service in its own process,
/// and keeps them running: failed workers are restarted in place (unless
/// shutting down) and a liveness ping is sent to each on an interval,
/// force-killing any that stop answering.
pub struct MultiProcessSupervisor {
    core: ServiceCore,
    shared: Arc<SupervisorShared>,
}

impl MultiProcessSupervisor {
    pub fn new(
        instance_count: u32,
        shutdown_timeout: Duration,
        live_check_interval: Duration,
        live_check_timeout: Duration,
        restart_on_failure: bool,
    ) -> Self {
        let core = ServiceCore::new(true);
        let shared = Arc::new(SupervisorShared {
            instance_count,
            shutdown_timeout,
            live_check_interval,
            live_check_timeout,
            restart_on_failure,
            cancellation_token: core.token_arc(),
            workers: Mutex::new(Vec::new()),
        });
        MultiProcessSupervisor { core, shared }
    }

    /// The number of worker processes currently tracked (alive or
    /// recently exited but not yet reaped).
    pub fn worker_count(&self) -> usize {
        self.shared.workers.lock().expect("workers lock poisoned").len()
    }
}

impl BaseService for MultiProcessSupervisor {
    fn name(&self) -> &str {
        "multi-process-supervisor"
    }

    fn core(&self) -> &ServiceCore {
        &self.core
    }

    fn run_service(&mut self, _cancellation_token: &CancellationToken) -> Result<(), ServiceError> {
        for instance_index in 0..self.shared.instance_count {
            self.shared.spawn_worker(instance_index);
        }
        Ok(())
    }

    fn finalize_service(&mut self, _error: Option<&ServiceError>) {
        let workers: Vec<Arc<WorkerHandle>> = self.shared.workers.lock().expect("workers lock poisoned").clone();
        for worker in &workers {
            worker.stop();
        }

        let still_running = wait_and_collect_survivors(&workers, self.shared.shutdown_timeout);
        if still_running.is_empty() {
            return;
        }
        tracing::warn!(
            count = still_running.len(),
            timeout_secs = self.shared.shutdown_timeout.as_secs(),
            "workers still running after graceful stop, sending terminate"
        );
        for worker in &still_running {
            worker.terminate();
        }

        let still_running = wait_and_collect_survivors(&still_running, self.shared.shutdown_timeout);
        if still_running.is_empty() {
            return;
        }
        tracing::warn!(
            count = still_running.len(),
            timeout_secs = self.shared.shutdown_timeout.as_secs(),
            "workers still running after terminate, sending kill"
        );
        for worker in &still_running {
            worker.kill();
        }

        let still_running = wait_and_collect_survivors(&still_running, self.shared.shutdown_timeout);
        if !still_running.is_empty() {
            tracing::error!(count = still_running.len(), "workers still running after kill");
        }
    }
}

fn wait_and_collect_survivors(workers: &[Arc<WorkerHandle>], timeout: Duration) -> Vec<Arc<WorkerHandle>> {
    thread::sleep(timeout);
    workers.iter().filter(|w| w.is_alive()).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_supervisor_tracks_no_workers_before_starting() {
        let supervisor =
            MultiProcessSupervisor::new(3, Duration::from_millis(50), Duration::from_secs(60), Duration::from_secs(10), true);
        assert_eq!(supervisor.worker_count(), 0);
    }
}
