//! Concurrency controller: starts N flood workers under a stagger policy and
//! joins all of them.
//!
//! Each worker runs on its own OS thread because the launcher blocks on an
//! external process. Only the launching flow itself is suspended (between
//! starts and for the settle window); started workers are never paused,
//! cancelled or timed out. Joining accepts completions in any order.

pub mod result;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::flood::{FloodCommand, WorkerLauncher, WorkerOutcome, WorkerSpec};
use crate::plan::RunConfiguration;

pub use result::{RunResult, WorkerRecord};

/// Lifecycle of one `run_concurrent` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerPhase {
    Idle,
    Launching,
    AllStarted,
    Joining,
    Complete,
}

/// Message a worker thread sends back when its process has exited.
struct WorkerReport {
    index: usize,
    outcome: WorkerOutcome,
    runtime: Duration,
}

/// Bookkeeping for one worker slot while the run is in flight.
struct Slot {
    launched_at: Duration,
    artifact: Option<PathBuf>,
    report: Option<(WorkerOutcome, Duration)>,
}

pub struct ConcurrencyController {
    launcher: Arc<dyn WorkerLauncher>,
    command: FloodCommand,
    phase: watch::Sender<ControllerPhase>,
}

impl ConcurrencyController {
    pub fn new(launcher: Arc<dyn WorkerLauncher>, command: FloodCommand) -> Self {
        let (phase, _) = watch::channel(ControllerPhase::Idle);
        Self {
            launcher,
            command,
            phase,
        }
    }

    /// Observe phase transitions.
    pub fn subscribe(&self) -> watch::Receiver<ControllerPhase> {
        self.phase.subscribe()
    }

    /// The worker `index` would run for `config`.
    pub fn worker_spec(&self, config: &RunConfiguration, index: usize) -> WorkerSpec {
        let artifact = config
            .capture_output()
            .then(|| config.worker_artifact(index));
        self.command.worker(config.target(), index, artifact)
    }

    fn enter(&self, phase: ControllerPhase) {
        debug!(?phase, "controller phase");
        self.phase.send_replace(phase);
    }

    /// Start `worker_count` workers against the target, applying the stagger
    /// policy between starts, then wait for all of them.
    ///
    /// There is no timeout: a worker that never exits stalls the run.
    pub async fn run_concurrent(&self, config: &RunConfiguration) -> RunResult {
        let count = config.worker_count();
        let policy = config.stagger();
        let run_start = Instant::now();

        let (tx, mut rx) = mpsc::unbounded_channel::<WorkerReport>();
        let mut slots: Vec<Slot> = Vec::with_capacity(count);
        let mut handles = Vec::with_capacity(count);

        self.enter(ControllerPhase::Launching);
        info!(host = %config.target(), workers = count, %policy, "launching flood workers");

        for index in 0..count {
            let spec = self.worker_spec(config, index);
            let artifact = spec.artifact.clone();
            let launched_at = run_start.elapsed();

            let launcher = Arc::clone(&self.launcher);
            let tx = tx.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("flood-worker-{}", index))
                .spawn(move || {
                    let started = Instant::now();
                    let outcome = launcher.run_worker(&spec);
                    let _ = tx.send(WorkerReport {
                        index: spec.index,
                        outcome,
                        runtime: started.elapsed(),
                    });
                });

            let report = match spawned {
                Ok(handle) => {
                    info!(
                        worker = index,
                        offset_ms = launched_at.as_millis() as u64,
                        artifact = ?artifact,
                        "worker started"
                    );
                    handles.push((index, handle));
                    None
                }
                Err(e) => {
                    error!(worker = index, error = %e, "could not create worker thread");
                    Some((
                        WorkerOutcome::SpawnFailed {
                            reason: format!("thread creation failed: {}", e),
                        },
                        Duration::ZERO,
                    ))
                }
            };

            slots.push(Slot {
                launched_at,
                artifact,
                report,
            });

            if index + 1 < count {
                if let Some(delay) = policy.delay() {
                    tokio::time::sleep(delay).await;
                }
            }
        }
        // Only worker threads hold senders now; the channel closes when the
        // last of them finishes.
        drop(tx);

        let launched = handles.len();
        self.enter(ControllerPhase::AllStarted);
        let settle = config.settle();
        if !settle.is_zero() {
            info!(settle_ms = settle.as_millis() as u64, "all workers started, settling");
            tokio::time::sleep(settle).await;
        }

        self.enter(ControllerPhase::Joining);
        info!(pending = launched, "waiting for workers to exit");
        while let Some(report) = rx.recv().await {
            let WorkerReport {
                index,
                outcome,
                runtime,
            } = report;
            if outcome.is_success() {
                info!(worker = index, runtime_ms = runtime.as_millis() as u64, "worker exited");
            } else {
                warn!(worker = index, runtime_ms = runtime.as_millis() as u64, %outcome, "worker finished abnormally");
            }
            if let Some(slot) = slots.get_mut(index) {
                slot.report = Some((outcome, runtime));
            }
        }

        // Every thread has dropped its sender; reap them.
        match tokio::task::spawn_blocking(move || {
            handles
                .into_iter()
                .filter_map(|(index, handle)| handle.join().err().map(|_| index))
                .collect::<Vec<_>>()
        })
        .await
        {
            Ok(panicked) => {
                for index in panicked {
                    error!(worker = index, "worker thread panicked");
                }
            }
            Err(e) => error!(error = %e, "failed to reap worker threads"),
        }

        let workers: Vec<WorkerRecord> = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                let (outcome, runtime) = slot.report.unwrap_or((WorkerOutcome::Lost, Duration::ZERO));
                WorkerRecord {
                    index,
                    artifact: slot.artifact,
                    launched_at: slot.launched_at,
                    runtime,
                    outcome,
                }
            })
            .collect();

        let result = RunResult::from_records(workers, launched, run_start.elapsed());
        self.enter(ControllerPhase::Complete);
        info!(
            launched = result.launched,
            succeeded = result.succeeded(),
            non_zero = result.non_zero_exits,
            spawn_failures = result.spawn_failures,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "flood run complete"
        );
        result
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
