//! Flood workers: the command line of the external flood tool and the
//! contract for running one instance of it.

pub mod process;

use std::path::PathBuf;

use serde::Serialize;

use crate::config::FloodConfig;

pub use process::ProcessLauncher;

/// One concurrent execution of the flood tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    /// 0-based, unique within a run.
    pub index: usize,
    /// Full argv; element 0 is the program.
    pub command_line: Vec<String>,
    /// Stdout destination. `None` inherits the harness stdout.
    pub artifact: Option<PathBuf>,
}

/// How a worker ended. Non-zero exits are data here, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerOutcome {
    Exited { code: i32 },
    /// Killed by a signal before producing an exit code.
    Signaled { signal: Option<i32> },
    /// The process (or its execution unit) could not be created.
    SpawnFailed { reason: String },
    /// The execution unit ended without reporting, e.g. a panic. Relies on
    /// the unwinding panic strategy, which the release profile keeps.
    Lost,
}

impl WorkerOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, WorkerOutcome::Exited { code: 0 })
    }

    /// Ran, but reported failure.
    pub fn is_nonzero_exit(&self) -> bool {
        matches!(self, WorkerOutcome::Exited { code } if *code != 0)
            || matches!(self, WorkerOutcome::Signaled { .. })
    }
}

impl std::fmt::Display for WorkerOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerOutcome::Exited { code } => write!(f, "exit {}", code),
            WorkerOutcome::Signaled { signal: Some(sig) } => write!(f, "signal {}", sig),
            WorkerOutcome::Signaled { signal: None } => write!(f, "signaled"),
            WorkerOutcome::SpawnFailed { reason } => write!(f, "spawn failed: {}", reason),
            WorkerOutcome::Lost => write!(f, "lost"),
        }
    }
}

/// Runs one worker to completion on the calling thread.
///
/// Implementations block until the external process exits and never
/// interpret its exit status.
pub trait WorkerLauncher: Send + Sync {
    fn run_worker(&self, spec: &WorkerSpec) -> WorkerOutcome;
}

/// Builds the fixed flood command line from configuration constants.
#[derive(Debug, Clone)]
pub struct FloodCommand {
    config: FloodConfig,
}

impl FloodCommand {
    pub fn new(config: FloodConfig) -> Self {
        Self { config }
    }

    /// `[sudo] <binary> -s <size> -i <interval> -c <count> [extra..] <target>`
    pub fn argv(&self, target: &str) -> Vec<String> {
        let cfg = &self.config;
        let mut argv = Vec::with_capacity(9 + cfg.extra_args.len());
        if cfg.use_sudo {
            argv.push("sudo".to_string());
        }
        argv.push(cfg.binary.clone());
        argv.extend([
            "-s".to_string(),
            cfg.packet_size.to_string(),
            "-i".to_string(),
            cfg.interval.to_string(),
            "-c".to_string(),
            cfg.count.to_string(),
        ]);
        argv.extend(cfg.extra_args.iter().cloned());
        argv.push(target.to_string());
        argv
    }

    pub fn worker(&self, target: &str, index: usize, artifact: Option<PathBuf>) -> WorkerSpec {
        WorkerSpec {
            index,
            command_line: self.argv(target),
            artifact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_argv_matches_flood_shape() {
        let cmd = FloodCommand::new(FloodConfig::default());
        assert_eq!(
            cmd.argv("192.168.122.34"),
            vec![
                "sudo",
                "./enhanced_ping",
                "-s",
                "65515",
                "-i",
                "0",
                "-c",
                "65536",
                "192.168.122.34"
            ]
        );
    }

    #[test]
    fn test_argv_without_sudo_and_with_extras() {
        let cmd = FloodCommand::new(FloodConfig {
            binary: "ping".to_string(),
            use_sudo: false,
            packet_size: 56,
            interval: 1,
            count: 3,
            extra_args: vec!["-q".to_string()],
        });
        let argv = cmd.argv("localhost");
        assert_eq!(argv[0], "ping");
        assert_eq!(argv[argv.len() - 2], "-q");
        assert_eq!(argv.last().map(String::as_str), Some("localhost"));
    }

    #[test]
    fn test_outcome_classification() {
        assert!(WorkerOutcome::Exited { code: 0 }.is_success());
        assert!(!WorkerOutcome::Exited { code: 0 }.is_nonzero_exit());
        assert!(WorkerOutcome::Exited { code: 2 }.is_nonzero_exit());
        assert!(WorkerOutcome::Signaled { signal: Some(9) }.is_nonzero_exit());
        let spawn = WorkerOutcome::SpawnFailed {
            reason: "missing".to_string(),
        };
        assert!(!spawn.is_success());
        assert!(!spawn.is_nonzero_exit());
    }
}
