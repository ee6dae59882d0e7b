//! OpenSSH client wrapper used as the control channel.
//!
//! Host keys are accepted without verification and nothing is recorded in
//! `known_hosts`; the harness targets disposable lab VMs. Password logins go
//! through `sshpass -e` so the secret travels in the child's environment
//! rather than its argv.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use super::{ControlChannel, Credential, SamplerError, SamplingSession};
use crate::config::ControlConfig;

/// `sshpass` exit code for a rejected password.
const SSHPASS_BAD_PASSWORD: i32 = 5;
/// `ssh` reserves 255 for its own errors.
const SSH_TRANSPORT_ERROR: i32 = 255;
/// Grace on top of the TCP connect timeout for auth and command dispatch.
const SESSION_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct OpenSshChannel {
    ssh_path: String,
    sshpass_path: String,
    connect_timeout: Duration,
}

impl OpenSshChannel {
    pub fn new(config: &ControlConfig) -> Self {
        Self {
            ssh_path: config.ssh_path.clone(),
            sshpass_path: config.sshpass_path.clone(),
            connect_timeout: Duration::from_secs(config.connect_timeout_sec.max(1)),
        }
    }

    /// Full argv for `session`, including the `sshpass` wrapper if needed.
    pub fn argv(&self, session: &SamplingSession) -> Vec<String> {
        let mut argv = Vec::new();
        if matches!(session.credential, Credential::Password(_)) {
            argv.push(self.sshpass_path.clone());
            argv.push("-e".to_string());
        }
        argv.push(self.ssh_path.clone());
        argv.extend([
            "-p".to_string(),
            session.port.to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs()),
        ]);

        match &session.credential {
            Credential::Password(_) => {
                argv.extend([
                    "-o".to_string(),
                    "PreferredAuthentications=password,keyboard-interactive".to_string(),
                    "-o".to_string(),
                    "PubkeyAuthentication=no".to_string(),
                ]);
            }
            Credential::KeyFile(path) => {
                argv.extend([
                    "-o".to_string(),
                    "BatchMode=yes".to_string(),
                    "-o".to_string(),
                    "IdentitiesOnly=yes".to_string(),
                    "-i".to_string(),
                    path.display().to_string(),
                ]);
            }
            Credential::Agent => {
                argv.extend(["-o".to_string(), "BatchMode=yes".to_string()]);
            }
        }

        argv.push(format!("{}@{}", session.user, session.target));
        argv.push("--".to_string());
        argv.push(session.command_line.clone());
        argv
    }
}

#[async_trait::async_trait]
impl ControlChannel for OpenSshChannel {
    async fn exec_detached(&self, session: &SamplingSession) -> Result<(), SamplerError> {
        let argv = self.argv(session);
        let Some((program, args)) = argv.split_first() else {
            return Err(SamplerError::ChannelUnavailable {
                program: self.ssh_path.clone(),
                reason: "empty command line".to_string(),
            });
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Credential::Password(password) = &session.credential {
            cmd.env("SSHPASS", password.as_str());
        }

        debug!(program = %program, host = %session.target, "opening control session");
        let limit = self.connect_timeout + SESSION_GRACE;
        let output = match tokio::time::timeout(limit, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(SamplerError::ChannelUnavailable {
                    program: program.clone(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(SamplerError::Timeout {
                    target: session.target.clone(),
                    secs: limit.as_secs(),
                })
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        classify_exit(
            output.status.code(),
            &stderr,
            matches!(session.credential, Credential::Password(_)),
            session,
        )
    }
}

/// Map the transport's exit status onto the sampler error taxonomy.
pub fn classify_exit(
    code: Option<i32>,
    stderr: &str,
    via_sshpass: bool,
    session: &SamplingSession,
) -> Result<(), SamplerError> {
    let auth_failed = || SamplerError::AuthFailed {
        target: session.target.clone(),
        user: session.user.clone(),
    };
    let connection_failed = |reason: String| SamplerError::ConnectionFailed {
        target: session.target.clone(),
        reason,
    };

    match code {
        Some(0) => Ok(()),
        Some(SSHPASS_BAD_PASSWORD) if via_sshpass => Err(auth_failed()),
        Some(SSH_TRANSPORT_ERROR) if stderr.contains("Permission denied") => Err(auth_failed()),
        Some(SSH_TRANSPORT_ERROR) => Err(connection_failed(first_line(stderr))),
        Some(code @ 1..=4) if via_sshpass => Err(connection_failed(format!(
            "sshpass exited with {}: {}",
            code,
            first_line(stderr)
        ))),
        Some(code) => Err(SamplerError::CommandRejected { code }),
        None => Err(connection_failed("control session killed by a signal".to_string())),
    }
}

fn first_line(stderr: &str) -> String {
    stderr
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("no diagnostics")
        .to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
