//! Run driver: arm the sampler once, warm up, flood, report.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{SamplerConfig, SamplerFailurePolicy};
use crate::controller::{ConcurrencyController, RunResult};
use crate::plan::{RunConfiguration, StaggerPolicy};
use crate::sampler::{RemoteSampler, SamplerError};

#[derive(Debug, Error)]
pub enum RunError {
    /// The sampler could not be armed and the run is configured to abort.
    #[error("remote sampler could not be armed: {0}")]
    SamplerFailed(#[from] SamplerError),

    #[error("failed to create output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What happened on the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SamplerStatus {
    Armed { artifact: String },
    Failed { error: String },
    Skipped,
}

/// Full report for one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub target: String,
    pub label: String,
    pub stagger: String,
    pub sampler: SamplerStatus,
    pub result: RunResult,
}

pub struct RunDriver {
    sampler: Option<RemoteSampler>,
    controller: ConcurrencyController,
}

impl RunDriver {
    /// `sampler` may be `None` when the run has sampling disabled.
    pub fn new(sampler: Option<RemoteSampler>, controller: ConcurrencyController) -> Self {
        Self { sampler, controller }
    }

    /// Execute one coordinated run.
    ///
    /// The warm-up wait follows every sampler attempt, successful or not,
    /// so timing stays comparable between runs. It is skipped only when
    /// sampling is disabled.
    pub async fn execute(&self, config: &RunConfiguration) -> Result<RunReport, RunError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, host = %config.target(), label = %config.label(), "starting run");

        let sampler = match (&self.sampler, config.sampler_enabled()) {
            (Some(sampler), true) => {
                let status = match sampler.start_sampling(config).await {
                    Ok(session) => SamplerStatus::Armed {
                        artifact: session.artifact,
                    },
                    Err(e) => match config.sampler_failure() {
                        SamplerFailurePolicy::Abort => return Err(RunError::SamplerFailed(e)),
                        SamplerFailurePolicy::Continue => {
                            warn!(%run_id, error = %e, "continuing without remote sampling");
                            SamplerStatus::Failed { error: e.to_string() }
                        }
                    },
                };
                warm_up(config.warmup()).await;
                status
            }
            _ => {
                info!(%run_id, "remote sampling disabled");
                SamplerStatus::Skipped
            }
        };

        if config.capture_output() {
            let dir = config.output_dir();
            std::fs::create_dir_all(dir).map_err(|source| RunError::OutputDir {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let result = self.controller.run_concurrent(config).await;

        Ok(RunReport {
            run_id,
            started_at,
            target: config.target().to_string(),
            label: config.label().to_string(),
            stagger: config.stagger().to_string(),
            sampler,
            result,
        })
    }
}

async fn warm_up(duration: Duration) {
    if duration.is_zero() {
        return;
    }
    info!(warmup_ms = duration.as_millis() as u64, "waiting for sampler warm-up");
    tokio::time::sleep(duration).await;
}

// ---------------------------------------------------------------------------
// Dry-run preview
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct PlannedWorker {
    pub index: usize,
    /// Projected start, relative to the first worker.
    pub start_offset_sec: f64,
    pub command_line: Vec<String>,
    pub artifact: Option<PathBuf>,
}

/// Everything a run would do, computed without side effects.
#[derive(Debug, Clone, Serialize)]
pub struct RunPreview {
    pub target: String,
    pub label: String,
    pub stagger: StaggerPolicy,
    pub sampler_command: Option<String>,
    pub sampler_artifact: Option<String>,
    pub warmup_sec: f64,
    pub workers: Vec<PlannedWorker>,
    /// When joining begins, relative to the first worker start.
    pub join_after_sec: f64,
}

pub fn preview(
    config: &RunConfiguration,
    controller: &ConcurrencyController,
    sampler: Option<&SamplerConfig>,
) -> RunPreview {
    let policy = config.stagger();
    let sampler = sampler.filter(|_| config.sampler_enabled());

    let workers: Vec<PlannedWorker> = (0..config.worker_count())
        .map(|index| {
            let spec = controller.worker_spec(config, index);
            PlannedWorker {
                index,
                start_offset_sec: policy.start_offset(index).as_secs_f64(),
                command_line: spec.command_line,
                artifact: spec.artifact,
            }
        })
        .collect();

    let last_start = policy.start_offset(config.worker_count().saturating_sub(1));

    RunPreview {
        target: config.target().to_string(),
        label: config.label().to_string(),
        stagger: policy,
        sampler_command: sampler.map(|s| RemoteSampler::command_for(s, config)),
        sampler_artifact: sampler.map(|_| config.sampler_artifact()),
        warmup_sec: if sampler.is_some() {
            config.warmup().as_secs_f64()
        } else {
            0.0
        },
        workers,
        join_after_sec: (last_start + config.settle()).as_secs_f64(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ControlConfig, FloodConfig};
    use crate::flood::{FloodCommand, WorkerLauncher, WorkerOutcome, WorkerSpec};
    use crate::plan::{RunRequest, StaggerMode};
    use crate::sampler::{ControlChannel, Credential, SamplingSession};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    #[derive(Default)]
    struct CountingLauncher {
        runs: AtomicUsize,
        first_start: Mutex<Option<Instant>>,
    }

    impl WorkerLauncher for CountingLauncher {
        fn run_worker(&self, _spec: &WorkerSpec) -> WorkerOutcome {
            self.first_start.lock().unwrap().get_or_insert_with(Instant::now);
            self.runs.fetch_add(1, Ordering::SeqCst);
            WorkerOutcome::Exited { code: 0 }
        }
    }

    struct StubChannel {
        refuse: bool,
        calls: AtomicUsize,
        armed_at: Mutex<Option<Instant>>,
    }

    #[async_trait::async_trait]
    impl ControlChannel for StubChannel {
        async fn exec_detached(&self, session: &SamplingSession) -> Result<(), SamplerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.armed_at.lock().unwrap() = Some(Instant::now());
            if self.refuse {
                return Err(SamplerError::ConnectionFailed {
                    target: session.target.clone(),
                    reason: "Connection refused".to_string(),
                });
            }
            Ok(())
        }
    }

    fn stub(refuse: bool) -> Arc<StubChannel> {
        Arc::new(StubChannel {
            refuse,
            calls: AtomicUsize::new(0),
            armed_at: Mutex::new(None),
        })
    }

    fn request(workers: usize, policy: SamplerFailurePolicy) -> RunRequest {
        RunRequest {
            target: "192.168.122.34".to_string(),
            workers,
            stagger: StaggerMode::None,
            stagger_sec: 0.0,
            label: "drv".to_string(),
            warmup_sec: 0.1,
            settle_sec: 0.0,
            capture_output: false,
            output_dir: PathBuf::from("."),
            sampler_enabled: true,
            sampler_failure: policy,
            sampler_samples: 80,
        }
    }

    fn driver(channel: Arc<StubChannel>, launcher: Arc<CountingLauncher>) -> RunDriver {
        let sampler = RemoteSampler::new(
            channel,
            ControlConfig::default(),
            SamplerConfig::default(),
            Credential::Agent,
        );
        let controller = ConcurrencyController::new(launcher, FloodCommand::new(FloodConfig::default()));
        RunDriver::new(Some(sampler), controller)
    }

    #[tokio::test]
    async fn test_single_worker_run_arms_sampler_first() {
        let channel = stub(false);
        let launcher = Arc::new(CountingLauncher::default());
        let drv = driver(Arc::clone(&channel), Arc::clone(&launcher));
        let config = request(1, SamplerFailurePolicy::Abort).validate().unwrap();

        let report = drv.execute(&config).await.unwrap();

        assert_eq!(channel.calls.load(Ordering::SeqCst), 1);
        assert_eq!(launcher.runs.load(Ordering::SeqCst), 1);
        assert_eq!(report.result.launched, 1);
        assert_eq!(
            report.sampler,
            SamplerStatus::Armed {
                artifact: "vmstat_log_drv_1_workers.txt".to_string()
            }
        );

        let armed = channel.armed_at.lock().unwrap().unwrap();
        let first = launcher.first_start.lock().unwrap().unwrap();
        assert!(first - armed >= Duration::from_millis(100), "warm-up not honoured");
    }

    #[tokio::test]
    async fn test_strict_policy_aborts_before_any_worker() {
        let channel = stub(true);
        let launcher = Arc::new(CountingLauncher::default());
        let drv = driver(Arc::clone(&channel), Arc::clone(&launcher));
        let config = request(4, SamplerFailurePolicy::Abort).validate().unwrap();

        let err = drv.execute(&config).await.unwrap_err();

        assert!(matches!(err, RunError::SamplerFailed(SamplerError::ConnectionFailed { .. })));
        assert_eq!(launcher.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_aborted_run_leaves_no_output_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let logs = dir.path().join("logs");
        let launcher = Arc::new(CountingLauncher::default());
        let drv = driver(stub(true), Arc::clone(&launcher));
        let mut req = request(2, SamplerFailurePolicy::Abort);
        req.capture_output = true;
        req.output_dir = logs.clone();

        assert!(drv.execute(&req.validate().unwrap()).await.is_err());
        assert!(!logs.exists());
    }

    #[tokio::test]
    async fn test_output_dir_created_before_flooding() {
        let dir = tempfile::TempDir::new().unwrap();
        let logs = dir.path().join("nested").join("logs");
        let launcher = Arc::new(CountingLauncher::default());
        let drv = driver(stub(false), Arc::clone(&launcher));
        let mut req = request(2, SamplerFailurePolicy::Abort);
        req.capture_output = true;
        req.output_dir = logs.clone();

        let report = drv.execute(&req.validate().unwrap()).await.unwrap();

        assert!(logs.is_dir());
        assert_eq!(report.result.launched, 2);
    }

    #[tokio::test]
    async fn test_lenient_policy_floods_anyway() {
        let channel = stub(true);
        let launcher = Arc::new(CountingLauncher::default());
        let drv = driver(Arc::clone(&channel), Arc::clone(&launcher));
        let config = request(3, SamplerFailurePolicy::Continue).validate().unwrap();

        let report = drv.execute(&config).await.unwrap();

        assert!(matches!(report.sampler, SamplerStatus::Failed { .. }));
        assert_eq!(report.result.launched, 3);
        assert_eq!(launcher.runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_disabled_sampler_is_skipped() {
        let channel = stub(false);
        let launcher = Arc::new(CountingLauncher::default());
        let drv = driver(Arc::clone(&channel), launcher);
        let mut req = request(2, SamplerFailurePolicy::Abort);
        req.sampler_enabled = false;

        let report = drv.execute(&req.validate().unwrap()).await.unwrap();

        assert_eq!(report.sampler, SamplerStatus::Skipped);
        assert_eq!(channel.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_preview_has_no_side_effects_and_projects_schedule() {
        let launcher = Arc::new(CountingLauncher::default());
        let controller = ConcurrencyController::new(
            Arc::clone(&launcher) as Arc<dyn WorkerLauncher>,
            FloodCommand::new(FloodConfig::default()),
        );
        let mut req = request(3, SamplerFailurePolicy::Abort);
        req.stagger = StaggerMode::Fixed;
        req.stagger_sec = 10.0;
        req.settle_sec = 10.0;
        req.capture_output = true;
        let config = req.validate().unwrap();

        let plan = preview(&config, &controller, Some(&SamplerConfig::default()));

        assert_eq!(launcher.runs.load(Ordering::SeqCst), 0);
        let offsets: Vec<f64> = plan.workers.iter().map(|w| w.start_offset_sec).collect();
        assert_eq!(offsets, vec![0.0, 10.0, 20.0]);
        assert_eq!(plan.join_after_sec, 30.0);
        assert_eq!(plan.sampler_artifact.as_deref(), Some("vmstat_log_drv_3_workers.txt"));
        assert!(plan.workers.iter().all(|w| w.artifact.is_some()));
        assert_eq!(plan.workers[0].command_line.last().map(String::as_str), Some("192.168.122.34"));
    }
}
