//! TOML configuration for floodharness.
//!
//! Layered like a service config: an explicit `--config` path, then the
//! `FLOODHARNESS_CONFIG` environment variable, then `./floodharness.toml`,
//! then compiled-in defaults. Every section is optional.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::plan::{ConfigError, StaggerMode};
use crate::sampler::Credential;

pub const CONFIG_ENV: &str = "FLOODHARNESS_CONFIG";
pub const LOCAL_CONFIG: &str = "floodharness.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for a harness invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(default)]
    pub run: RunSection,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub sampler: SamplerConfig,
    #[serde(default)]
    pub flood: FloodConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl HarnessConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded harness configuration");
        Ok(config)
    }

    /// Resolve the configuration for this invocation.
    ///
    /// An explicit path must load. The environment override and the local
    /// file fall back to defaults with a warning.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "FLOODHARNESS_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local = Path::new(LOCAL_CONFIG);
        if local.exists() {
            match Self::load(local) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %local.display(),
                        error = %e,
                        "local config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Run shape. Unset fields fall through to the profile and built-in defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSection {
    pub target: Option<String>,
    pub workers: Option<usize>,
    pub stagger: Option<StaggerMode>,
    pub stagger_sec: Option<f64>,
    pub label: Option<String>,
    pub warmup_sec: Option<f64>,
    pub settle_sec: Option<f64>,
    pub capture_output: Option<bool>,
    pub output_dir: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Control channel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Password,
    Key,
    Agent,
}

/// SSH session parameters for arming the remote sampler.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub user: String,
    pub port: u16,
    pub auth: AuthMethod,
    /// Inline password. Never serialized back out.
    #[serde(skip_serializing)]
    pub password: Option<Zeroizing<String>>,
    /// Environment variable holding the password.
    pub password_env: Option<String>,
    pub key_path: Option<PathBuf>,
    pub connect_timeout_sec: u64,
    /// Path (or bare command name resolved via `$PATH`) to the ssh client.
    pub ssh_path: String,
    /// Wrapper used to feed passwords to ssh non-interactively.
    pub sshpass_path: String,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            user: "testing".to_string(),
            port: 22,
            auth: AuthMethod::Password,
            password: None,
            password_env: Some("FLOODHARNESS_SSH_PASSWORD".to_string()),
            key_path: None,
            connect_timeout_sec: 10,
            ssh_path: "ssh".to_string(),
            sshpass_path: "sshpass".to_string(),
        }
    }
}

impl fmt::Debug for ControlConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlConfig")
            .field("user", &self.user)
            .field("port", &self.port)
            .field("auth", &self.auth)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("password_env", &self.password_env)
            .field("key_path", &self.key_path)
            .field("connect_timeout_sec", &self.connect_timeout_sec)
            .field("ssh_path", &self.ssh_path)
            .field("sshpass_path", &self.sshpass_path)
            .finish()
    }
}

impl ControlConfig {
    /// Materialize the credential for `auth`.
    pub fn credential(&self) -> Result<Credential, ConfigError> {
        match self.auth {
            AuthMethod::Password => {
                if let Some(password) = &self.password {
                    return Ok(Credential::Password(password.clone()));
                }
                let Some(var) = &self.password_env else {
                    return Err(ConfigError::MissingCredential(
                        "auth = \"password\" needs `password` or `password_env`".to_string(),
                    ));
                };
                std::env::var(var)
                    .map(|p| Credential::Password(Zeroizing::new(p)))
                    .map_err(|_| {
                        ConfigError::MissingCredential(format!("environment variable {var} is not set"))
                    })
            }
            AuthMethod::Key => self
                .key_path
                .clone()
                .map(Credential::KeyFile)
                .ok_or_else(|| ConfigError::MissingCredential("auth = \"key\" needs `key_path`".to_string())),
            AuthMethod::Agent => Ok(Credential::Agent),
        }
    }
}

// ---------------------------------------------------------------------------
// Sampler
// ---------------------------------------------------------------------------

/// What to do when the remote sampler cannot be armed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SamplerFailurePolicy {
    /// Fail the run before any worker starts.
    #[default]
    Abort,
    /// Log the failure and flood anyway.
    Continue,
}

/// Remote resource sampling tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub enabled: bool,
    pub tool: String,
    pub interval_sec: u32,
    pub samples: u32,
    pub on_failure: SamplerFailurePolicy,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tool: "vmstat".to_string(),
            interval_sec: 1,
            samples: 80,
            on_failure: SamplerFailurePolicy::Abort,
        }
    }
}

// ---------------------------------------------------------------------------
// Flood tool
// ---------------------------------------------------------------------------

/// Fixed command line of the flood-generation tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FloodConfig {
    pub binary: String,
    /// Prefix the command with `sudo` (raw ICMP sockets need privileges).
    pub use_sudo: bool,
    pub packet_size: u32,
    /// Inter-packet interval; 0 floods.
    pub interval: u32,
    pub count: u32,
    /// Appended before the target.
    pub extra_args: Vec<String>,
}

impl Default for FloodConfig {
    fn default() -> Self {
        Self {
            binary: "./enhanced_ping".to_string(),
            use_sudo: true,
            packet_size: 65515,
            interval: 0,
            count: 65536,
            extra_args: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
