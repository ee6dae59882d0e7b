//! Remote resource sampling.
//!
//! Arms a sampling tool on the target over a control channel and walks
//! away: one session, one detached command, no polling, no log retrieval.

pub mod ssh;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::config::{ControlConfig, SamplerConfig};
use crate::plan::RunConfiguration;

pub use ssh::OpenSshChannel;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("could not connect to {target}: {reason}")]
    ConnectionFailed { target: String, reason: String },

    #[error("authentication as {user} on {target} was rejected")]
    AuthFailed { target: String, user: String },

    #[error("control channel program {program} could not be started: {reason}")]
    ChannelUnavailable { program: String, reason: String },

    #[error("remote shell rejected the sampling command (exit {code})")]
    CommandRejected { code: i32 },

    #[error("control session to {target} did not finish within {secs}s")]
    Timeout { target: String, secs: u64 },
}

// ---------------------------------------------------------------------------
// Credential
// ---------------------------------------------------------------------------

/// How the control channel authenticates. Opaque to everything but the
/// transport.
#[derive(Clone)]
pub enum Credential {
    Password(Zeroizing<String>),
    KeyFile(PathBuf),
    /// Whatever the local ssh agent offers.
    Agent,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password(_) => f.write_str("Password(<redacted>)"),
            Credential::KeyFile(path) => f.debug_tuple("KeyFile").field(path).finish(),
            Credential::Agent => f.write_str("Agent"),
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One control-channel connection. Built per run, used once.
#[derive(Debug)]
pub struct SamplingSession {
    pub target: String,
    pub user: String,
    pub port: u16,
    pub credential: Credential,
    pub command_line: String,
    pub artifact: String,
}

/// Transport that can run one detached command on a remote host.
#[async_trait::async_trait]
pub trait ControlChannel: Send + Sync {
    /// Open a session, issue `session.command_line`, close the session.
    async fn exec_detached(&self, session: &SamplingSession) -> Result<(), SamplerError>;
}

/// Shell command that starts the sampling tool detached from the session.
pub fn sampling_command(tool: &str, interval_sec: u32, samples: u32, artifact: &str) -> String {
    format!(
        "nohup {} {} {} > {} 2>&1 < /dev/null &",
        tool, interval_sec, samples, artifact
    )
}

// ---------------------------------------------------------------------------
// RemoteSampler
// ---------------------------------------------------------------------------

pub struct RemoteSampler {
    channel: Arc<dyn ControlChannel>,
    control: ControlConfig,
    settings: SamplerConfig,
    credential: Credential,
}

impl RemoteSampler {
    pub fn new(
        channel: Arc<dyn ControlChannel>,
        control: ControlConfig,
        settings: SamplerConfig,
        credential: Credential,
    ) -> Self {
        Self {
            channel,
            control,
            settings,
            credential,
        }
    }

    /// The exact command `start_sampling` would issue for `config`.
    pub fn command_for(settings: &SamplerConfig, config: &RunConfiguration) -> String {
        sampling_command(
            &settings.tool,
            settings.interval_sec,
            config.sampler_samples(),
            &config.sampler_artifact(),
        )
    }

    pub fn session_for(&self, config: &RunConfiguration) -> SamplingSession {
        SamplingSession {
            target: config.target().to_string(),
            user: self.control.user.clone(),
            port: self.control.port,
            credential: self.credential.clone(),
            command_line: Self::command_for(&self.settings, config),
            artifact: config.sampler_artifact(),
        }
    }

    /// Arm the remote sampler. Single attempt; returns once the session has
    /// closed, not when sampling ends.
    pub async fn start_sampling(&self, config: &RunConfiguration) -> Result<SamplingSession, SamplerError> {
        let session = self.session_for(config);
        info!(
            host = %session.target,
            user = %session.user,
            artifact = %session.artifact,
            "arming remote sampler"
        );

        match self.channel.exec_detached(&session).await {
            Ok(()) => {
                info!(host = %session.target, "remote sampler armed");
                Ok(session)
            }
            Err(e) => {
                warn!(host = %session.target, error = %e, "remote sampler failed");
                Err(e)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
