//! Aggregated outcome of one concurrent flood run.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::flood::WorkerOutcome;

/// Per-worker record, in index order.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerRecord {
    pub index: usize,
    pub artifact: Option<PathBuf>,
    /// Start offset from the beginning of the launch phase.
    #[serde(rename = "launched_at_ms", serialize_with = "as_millis")]
    pub launched_at: Duration,
    /// Wall time the external process ran. Zero if it never started.
    #[serde(rename = "runtime_ms", serialize_with = "as_millis")]
    pub runtime: Duration,
    pub outcome: WorkerOutcome,
}

/// What the controller hands back once every worker has been joined.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    /// Execution units created.
    pub launched: usize,
    pub non_zero_exits: usize,
    pub spawn_failures: usize,
    pub lost: usize,
    #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
    pub elapsed: Duration,
    pub workers: Vec<WorkerRecord>,
}

impl RunResult {
    pub fn from_records(workers: Vec<WorkerRecord>, launched: usize, elapsed: Duration) -> Self {
        let count = |pred: fn(&WorkerOutcome) -> bool| workers.iter().filter(|w| pred(&w.outcome)).count();
        RunResult {
            launched,
            non_zero_exits: count(WorkerOutcome::is_nonzero_exit),
            spawn_failures: count(|o| matches!(o, WorkerOutcome::SpawnFailed { .. })),
            lost: count(|o| matches!(o, WorkerOutcome::Lost)),
            elapsed,
            workers,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.workers.iter().filter(|w| w.outcome.is_success()).count()
    }
}

fn as_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_micros() as f64 / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(index: usize, outcome: WorkerOutcome) -> WorkerRecord {
        WorkerRecord {
            index,
            artifact: None,
            launched_at: Duration::from_millis(index as u64 * 10),
            runtime: Duration::from_millis(5),
            outcome,
        }
    }

    #[test]
    fn test_counts() {
        let result = RunResult::from_records(
            vec![
                record(0, WorkerOutcome::Exited { code: 0 }),
                record(1, WorkerOutcome::Exited { code: 2 }),
                record(2, WorkerOutcome::Signaled { signal: Some(15) }),
                record(3, WorkerOutcome::SpawnFailed { reason: "x".into() }),
                record(4, WorkerOutcome::Lost),
            ],
            5,
            Duration::from_secs(1),
        );
        assert_eq!(result.launched, 5);
        assert_eq!(result.succeeded(), 1);
        assert_eq!(result.non_zero_exits, 2);
        assert_eq!(result.spawn_failures, 1);
        assert_eq!(result.lost, 1);
    }

    #[test]
    fn test_json_shape() {
        let result = RunResult::from_records(
            vec![record(1, WorkerOutcome::Exited { code: 0 })],
            1,
            Duration::from_millis(1500),
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["elapsed_ms"], 1500.0);
        assert_eq!(json["workers"][0]["launched_at_ms"], 10.0);
        assert_eq!(json["workers"][0]["outcome"]["kind"], "exited");
        assert_eq!(json["workers"][0]["outcome"]["code"], 0);
    }
}
