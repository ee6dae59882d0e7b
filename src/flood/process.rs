//! Process-backed worker launcher.

use std::fs::File;
use std::process::{Command, ExitStatus, Stdio};

use tracing::{debug, warn};

use super::{WorkerLauncher, WorkerOutcome, WorkerSpec};

/// Spawns the flood tool with `std::process` and waits for it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessLauncher;

impl WorkerLauncher for ProcessLauncher {
    fn run_worker(&self, spec: &WorkerSpec) -> WorkerOutcome {
        let Some((program, args)) = spec.command_line.split_first() else {
            return WorkerOutcome::SpawnFailed {
                reason: "empty command line".to_string(),
            };
        };

        let mut cmd = Command::new(program);
        cmd.args(args).stdin(Stdio::null());

        if let Some(path) = &spec.artifact {
            match File::create(path) {
                Ok(file) => {
                    cmd.stdout(Stdio::from(file));
                }
                Err(e) => {
                    warn!(worker = spec.index, artifact = %path.display(), error = %e, "cannot create worker log");
                    return WorkerOutcome::SpawnFailed {
                        reason: format!("cannot create {}: {}", path.display(), e),
                    };
                }
            }
        }

        debug!(worker = spec.index, program = %program, "spawning flood process");
        match cmd.status() {
            Ok(status) => outcome_from_status(status),
            Err(e) => WorkerOutcome::SpawnFailed {
                reason: format!("{}: {}", program, e),
            },
        }
    }
}

fn outcome_from_status(status: ExitStatus) -> WorkerOutcome {
    if let Some(code) = status.code() {
        return WorkerOutcome::Exited { code };
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        WorkerOutcome::Signaled {
            signal: status.signal(),
        }
    }
    #[cfg(not(unix))]
    {
        WorkerOutcome::Signaled { signal: None }
    }
}
