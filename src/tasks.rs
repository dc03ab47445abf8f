//! Background task supervision.
//!
//! Two kinds of work are tracked: periodic loops (sweeper, power ticker)
//! that observe the shared shutdown signal, and outstanding one-shot calls
//! to collaborators (validation) that are given a bounded grace period on
//! shutdown before being aborted.

use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Outcome of `TaskSupervisor::shutdown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShutdownReport {
    pub periodic_stopped: usize,
    pub outstanding_completed: usize,
    pub outstanding_aborted: usize,
}

#[derive(Debug)]
pub struct TaskSupervisor {
    shutdown_tx: watch::Sender<bool>,
    periodic: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
    outstanding: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskSupervisor {
    pub fn new() -> Self {
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        Self {
            shutdown_tx,
            periodic: Mutex::new(Vec::new()),
            outstanding: Mutex::new(Vec::new()),
        }
    }

    /// Receiver that flips to `true` once shutdown begins.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Spawn a loop that is expected to exit on its own once the shutdown
    /// signal fires.
    pub fn spawn_periodic<F>(&self, name: &'static str, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(fut);
        lock(&self.periodic).push((name, handle));
    }

    /// Spawn a one-shot collaborator call on `runtime`.
    ///
    /// Refused once shutdown has started.
    pub fn spawn_outstanding<F>(&self, runtime: &Handle, fut: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_shutting_down() {
            log::warn!("Shutdown in progress, not starting new background work");
            return false;
        }
        let handle = runtime.spawn(fut);
        let mut outstanding = lock(&self.outstanding);
        outstanding.retain(|h| !h.is_finished());
        outstanding.push(handle);
        true
    }

    /// Number of one-shot calls still running.
    pub fn outstanding_count(&self) -> usize {
        lock(&self.outstanding)
            .iter()
            .filter(|h| !h.is_finished())
            .count()
    }

    /// Fire the shutdown signal, join periodic loops, then wait up to
    /// `grace` for outstanding calls. Stragglers are aborted.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        self.shutdown_tx.send_replace(true);
        let mut report = ShutdownReport::default();

        let periodic: Vec<_> = lock(&self.periodic).drain(..).collect();
        for (name, handle) in periodic {
            if let Err(e) = handle.await {
                log::warn!("Periodic task {} ended abnormally: {}", name, e);
            }
            log::debug!("Periodic task {} stopped", name);
            report.periodic_stopped += 1;
        }

        let deadline = tokio::time::Instant::now() + grace;
        let outstanding: Vec<_> = lock(&self.outstanding).drain(..).collect();
        for mut handle in outstanding {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(_) => report.outstanding_completed += 1,
                Err(_) => {
                    handle.abort();
                    report.outstanding_aborted += 1;
                }
            }
        }
        if report.outstanding_aborted > 0 {
            log::warn!(
                "Aborted {} background call(s) still running after {}s",
                report.outstanding_aborted,
                grace.as_secs()
            );
        }
        report
    }
}

impl Drop for TaskSupervisor {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
        for (_, handle) in lock(&self.periodic).drain(..) {
            handle.abort();
        }
        for handle in lock(&self.outstanding).drain(..) {
            handle.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
