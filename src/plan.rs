//! Run configuration: the immutable description of one flood run.
//!
//! A [`RunRequest`] collects raw inputs from the CLI, a preset [`Profile`]
//! and the config file. [`RunRequest::validate`] turns it into a
//! [`RunConfiguration`], which is the only thing the sampler, controller and
//! driver ever see. Validation happens before any thread, process or remote
//! session is created.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{HarnessConfig, SamplerFailurePolicy};

/// Worker log prefix. Distinct from [`SAMPLER_ARTIFACT_PREFIX`] so local and
/// remote artifacts never share a name.
pub const WORKER_ARTIFACT_PREFIX: &str = "ping_log";
pub const SAMPLER_ARTIFACT_PREFIX: &str = "vmstat_log";

const MAX_LABEL_LEN: usize = 64;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Reasons a run is rejected before it starts.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("target address cannot be empty")]
    EmptyTarget,

    #[error("target address {target:?} is not a valid host name or IP address: {reason}")]
    InvalidTarget { target: String, reason: &'static str },

    #[error("worker count must be at least 1")]
    ZeroWorkers,

    #[error("run label {label:?} is invalid: {reason}")]
    InvalidLabel { label: String, reason: &'static str },

    #[error("{field} of {value} seconds is not a valid duration")]
    InvalidDuration { field: &'static str, value: f64 },

    #[error("control channel credential missing: {0}")]
    MissingCredential(String),
}

// ---------------------------------------------------------------------------
// Stagger policy
// ---------------------------------------------------------------------------

/// CLI / config spelling of a stagger policy, without its parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum StaggerMode {
    None,
    Fixed,
    Ramp,
}

/// Delay rule applied between successive worker starts.
///
/// `FixedDelay` and `Ramp` share the same timing contract; `Ramp` only marks
/// the run as a stepwise load characterization in logs and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", content = "step", rename_all = "snake_case")]
pub enum StaggerPolicy {
    None,
    FixedDelay(Duration),
    Ramp(Duration),
}

impl StaggerPolicy {
    pub fn from_mode(mode: StaggerMode, secs: f64) -> Result<Self, ConfigError> {
        if mode == StaggerMode::None {
            return Ok(StaggerPolicy::None);
        }
        let step = seconds("stagger", secs)?;
        Ok(match mode {
            StaggerMode::None => StaggerPolicy::None,
            StaggerMode::Fixed => StaggerPolicy::FixedDelay(step),
            StaggerMode::Ramp => StaggerPolicy::Ramp(step),
        })
    }

    /// Suspension between start `i` and start `i + 1`, if any.
    pub fn delay(&self) -> Option<Duration> {
        match *self {
            StaggerPolicy::None => None,
            StaggerPolicy::FixedDelay(d) | StaggerPolicy::Ramp(d) => (!d.is_zero()).then_some(d),
        }
    }

    /// Projected start offset of worker `index`, measured from the first start.
    pub fn start_offset(&self, index: usize) -> Duration {
        match self.delay() {
            Some(d) => d.saturating_mul(u32::try_from(index).unwrap_or(u32::MAX)),
            None => Duration::ZERO,
        }
    }
}

impl std::fmt::Display for StaggerPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StaggerPolicy::None => write!(f, "none"),
            StaggerPolicy::FixedDelay(d) => write!(f, "fixed({:.3}s)", d.as_secs_f64()),
            StaggerPolicy::Ramp(d) => write!(f, "ramp({:.3}s)", d.as_secs_f64()),
        }
    }
}

// ---------------------------------------------------------------------------
// Profiles
// ---------------------------------------------------------------------------

/// Presets reproducing the three classic harness shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Profile {
    /// One uncaptured worker, short warm-up, long sampling window.
    Single,
    /// N workers started back-to-back.
    Concurrent,
    /// N workers started 10 s apart, then a 10 s settle.
    Step,
}

/// Values a profile pins. `None` means "no opinion".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileDefaults {
    pub workers: Option<usize>,
    pub stagger: Option<StaggerMode>,
    pub stagger_sec: Option<f64>,
    pub warmup_sec: Option<f64>,
    pub settle_sec: Option<f64>,
    pub capture_output: Option<bool>,
    pub sampler_samples: Option<u32>,
}

impl Profile {
    pub fn defaults(self) -> ProfileDefaults {
        match self {
            Profile::Single => ProfileDefaults {
                workers: Some(1),
                stagger: Some(StaggerMode::None),
                stagger_sec: None,
                warmup_sec: Some(1.0),
                settle_sec: Some(0.0),
                capture_output: Some(false),
                sampler_samples: Some(100),
            },
            Profile::Concurrent => ProfileDefaults {
                workers: None,
                stagger: Some(StaggerMode::None),
                stagger_sec: None,
                warmup_sec: Some(5.0),
                settle_sec: Some(0.0),
                capture_output: Some(true),
                sampler_samples: Some(80),
            },
            Profile::Step => ProfileDefaults {
                workers: Some(5),
                stagger: Some(StaggerMode::Fixed),
                stagger_sec: Some(10.0),
                warmup_sec: Some(5.0),
                settle_sec: Some(10.0),
                capture_output: Some(true),
                sampler_samples: Some(80),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Request -> configuration
// ---------------------------------------------------------------------------

/// Explicit per-invocation overrides, usually straight from CLI flags.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub target: Option<String>,
    pub workers: Option<usize>,
    pub stagger: Option<StaggerMode>,
    pub stagger_sec: Option<f64>,
    pub label: Option<String>,
    pub warmup_sec: Option<f64>,
    pub settle_sec: Option<f64>,
    pub no_capture: bool,
    pub output_dir: Option<PathBuf>,
    pub skip_sampler: bool,
    pub sampler_failure: Option<SamplerFailurePolicy>,
}

/// Unvalidated run inputs after layering flags over profile over config file.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub target: String,
    pub workers: usize,
    pub stagger: StaggerMode,
    pub stagger_sec: f64,
    pub label: String,
    pub warmup_sec: f64,
    pub settle_sec: f64,
    pub capture_output: bool,
    pub output_dir: PathBuf,
    pub sampler_enabled: bool,
    pub sampler_failure: SamplerFailurePolicy,
    pub sampler_samples: u32,
}

impl RunRequest {
    /// Layer explicit overrides over the profile preset over the config file.
    pub fn resolve(cfg: &HarnessConfig, profile: Option<Profile>, overrides: &RunOverrides) -> Self {
        let preset = profile.map(Profile::defaults).unwrap_or_default();
        let run = &cfg.run;

        let capture_output = if overrides.no_capture {
            false
        } else {
            preset.capture_output.or(run.capture_output).unwrap_or(true)
        };

        RunRequest {
            target: overrides.target.clone().or_else(|| run.target.clone()).unwrap_or_default(),
            workers: overrides.workers.or(preset.workers).or(run.workers).unwrap_or(1),
            stagger: overrides.stagger.or(preset.stagger).or(run.stagger).unwrap_or(StaggerMode::None),
            stagger_sec: overrides.stagger_sec.or(preset.stagger_sec).or(run.stagger_sec).unwrap_or(10.0),
            label: overrides
                .label
                .clone()
                .or_else(|| run.label.clone())
                .unwrap_or_else(default_label),
            warmup_sec: overrides.warmup_sec.or(preset.warmup_sec).or(run.warmup_sec).unwrap_or(5.0),
            settle_sec: overrides.settle_sec.or(preset.settle_sec).or(run.settle_sec).unwrap_or(10.0),
            capture_output,
            output_dir: overrides
                .output_dir
                .clone()
                .or_else(|| run.output_dir.clone())
                .unwrap_or_else(|| PathBuf::from(".")),
            sampler_enabled: !overrides.skip_sampler && cfg.sampler.enabled,
            sampler_failure: overrides.sampler_failure.unwrap_or(cfg.sampler.on_failure),
            sampler_samples: preset.sampler_samples.unwrap_or(cfg.sampler.samples),
        }
    }

    /// Check every field and freeze the result.
    pub fn validate(self) -> Result<RunConfiguration, ConfigError> {
        let target = self.target.trim().to_string();
        validate_target(&target)?;
        if self.workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        validate_label(&self.label)?;

        Ok(RunConfiguration {
            target,
            worker_count: self.workers,
            stagger: StaggerPolicy::from_mode(self.stagger, self.stagger_sec)?,
            label: self.label,
            warmup: seconds("warm-up", self.warmup_sec)?,
            settle: seconds("settle", self.settle_sec)?,
            capture_output: self.capture_output,
            output_dir: self.output_dir,
            sampler_enabled: self.sampler_enabled,
            sampler_failure: self.sampler_failure,
            sampler_samples: self.sampler_samples,
        })
    }
}

fn seconds(field: &'static str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|_| ConfigError::InvalidDuration { field, value })
}

/// `run-` plus the first eight hex digits of a fresh v4 UUID.
pub fn default_label() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("run-{}", &id[..8])
}

// ---------------------------------------------------------------------------
// RunConfiguration
// ---------------------------------------------------------------------------

/// Validated, immutable configuration of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfiguration {
    target: String,
    worker_count: usize,
    stagger: StaggerPolicy,
    label: String,
    warmup: Duration,
    settle: Duration,
    capture_output: bool,
    output_dir: PathBuf,
    sampler_enabled: bool,
    sampler_failure: SamplerFailurePolicy,
    sampler_samples: u32,
}

impl RunConfiguration {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn stagger(&self) -> StaggerPolicy {
        self.stagger
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Pause between arming the sampler and the first worker start.
    pub fn warmup(&self) -> Duration {
        self.warmup
    }

    /// Pause after the last worker start, before joining begins.
    pub fn settle(&self) -> Duration {
        self.settle
    }

    pub fn capture_output(&self) -> bool {
        self.capture_output
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn sampler_enabled(&self) -> bool {
        self.sampler_enabled
    }

    pub fn sampler_failure(&self) -> SamplerFailurePolicy {
        self.sampler_failure
    }

    /// Number of samples the remote tool records before exiting.
    pub fn sampler_samples(&self) -> u32 {
        self.sampler_samples
    }

    /// Local stdout log of worker `index`.
    pub fn worker_artifact(&self, index: usize) -> PathBuf {
        self.output_dir
            .join(format!("{}_{}_{}.txt", WORKER_ARTIFACT_PREFIX, self.label, index))
    }

    /// Remote sampler log, relative to the remote login directory.
    pub fn sampler_artifact(&self) -> String {
        format!(
            "{}_{}_{}_workers.txt",
            SAMPLER_ARTIFACT_PREFIX, self.label, self.worker_count
        )
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Accept an IPv4/IPv6 literal or an RFC 1123 host name.
///
/// The target ends up as a process argument and inside a remote shell
/// command, so anything outside that grammar is refused.
pub fn validate_target(target: &str) -> Result<(), ConfigError> {
    let invalid = |reason| ConfigError::InvalidTarget {
        target: target.to_string(),
        reason,
    };

    if target.is_empty() {
        return Err(ConfigError::EmptyTarget);
    }
    if target.starts_with('-') {
        return Err(invalid("must not start with a hyphen"));
    }
    if target.parse::<IpAddr>().is_ok() {
        return Ok(());
    }
    if target.len() > 253 {
        return Err(invalid("longer than 253 characters"));
    }

    let host = target.strip_suffix('.').unwrap_or(target);
    for part in host.split('.') {
        if part.is_empty() || part.len() > 63 {
            return Err(invalid("each name segment must be 1-63 characters"));
        }
        if part.starts_with('-') || part.ends_with('-') {
            return Err(invalid("name segments cannot begin or end with a hyphen"));
        }
        if !part.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(invalid("contains characters outside [A-Za-z0-9.-]"));
        }
    }
    Ok(())
}

/// Labels become part of file names locally and remotely.
pub fn validate_label(label: &str) -> Result<(), ConfigError> {
    let invalid = |reason| ConfigError::InvalidLabel {
        label: label.to_string(),
        reason,
    };

    if label.is_empty() {
        return Err(invalid("cannot be empty"));
    }
    if label.len() > MAX_LABEL_LEN {
        return Err(invalid("longer than 64 characters"));
    }
    if label.starts_with('-') || label.starts_with('.') {
        return Err(invalid("must not start with '-' or '.'"));
    }
    if !label
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(invalid("only [A-Za-z0-9._-] are allowed"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn request(target: &str, workers: usize) -> RunRequest {
        RunRequest {
            target: target.to_string(),
            workers,
            stagger: StaggerMode::None,
            stagger_sec: 10.0,
            label: "unit".to_string(),
            warmup_sec: 5.0,
            settle_sec: 10.0,
            capture_output: true,
            output_dir: PathBuf::from("/tmp/out"),
            sampler_enabled: true,
            sampler_failure: SamplerFailurePolicy::Abort,
            sampler_samples: 80,
        }
    }

    #[test]
    fn test_validate_accepts_ip_and_hostname() {
        assert!(validate_target("192.168.122.34").is_ok());
        assert!(validate_target("fe80::1").is_ok());
        assert!(validate_target("vm-01.lab.example").is_ok());
        assert!(validate_target("localhost").is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_targets() {
        assert_eq!(validate_target(""), Err(ConfigError::EmptyTarget));
        assert!(validate_target("-c1").is_err());
        assert!(validate_target("host; rm -rf /").is_err());
        assert!(validate_target("a..b").is_err());
        assert!(validate_target("bad-.example").is_err());
        assert!(validate_target(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_empty_target_rejected_after_trim() {
        let err = request("   ", 3).validate().unwrap_err();
        assert_eq!(err, ConfigError::EmptyTarget);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = request("10.0.0.1", 0).validate().unwrap_err();
        assert_eq!(err, ConfigError::ZeroWorkers);
    }

    #[test]
    fn test_label_rules() {
        assert!(validate_label("step_5.a-b").is_ok());
        assert!(validate_label("").is_err());
        assert!(validate_label("-x").is_err());
        assert!(validate_label("a b").is_err());
        assert!(validate_label("a/b").is_err());
        assert!(validate_label("$(reboot)").is_err());
        assert!(validate_label(&"x".repeat(65)).is_err());
    }

    #[test]
    fn test_negative_stagger_rejected() {
        let mut req = request("10.0.0.1", 2);
        req.stagger = StaggerMode::Fixed;
        req.stagger_sec = -1.0;
        assert_eq!(
            req.validate().unwrap_err(),
            ConfigError::InvalidDuration {
                field: "stagger",
                value: -1.0
            }
        );
    }

    #[test]
    fn test_policy_delay_and_offsets() {
        let d = Duration::from_secs(10);
        assert_eq!(StaggerPolicy::None.delay(), None);
        assert_eq!(StaggerPolicy::FixedDelay(d).delay(), Some(d));
        assert_eq!(StaggerPolicy::Ramp(d).delay(), Some(d));
        assert_eq!(StaggerPolicy::FixedDelay(Duration::ZERO).delay(), None);
        assert_eq!(StaggerPolicy::FixedDelay(d).start_offset(2), Duration::from_secs(20));
        assert_eq!(StaggerPolicy::None.start_offset(7), Duration::ZERO);
    }

    #[test]
    fn test_stagger_mode_none_ignores_seconds() {
        assert_eq!(
            StaggerPolicy::from_mode(StaggerMode::None, -3.0).unwrap(),
            StaggerPolicy::None
        );
    }

    #[test]
    fn test_artifact_names_are_pairwise_distinct() {
        let cfg = request("10.0.0.1", 12).validate().unwrap();
        let mut names: HashSet<String> = (0..cfg.worker_count())
            .map(|i| {
                cfg.worker_artifact(i)
                    .file_name()
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        assert_eq!(names.len(), 12);
        assert!(names.insert(cfg.sampler_artifact()));
    }

    #[test]
    fn test_artifact_layout() {
        let cfg = request("10.0.0.1", 3).validate().unwrap();
        assert_eq!(cfg.worker_artifact(1), PathBuf::from("/tmp/out/ping_log_unit_1.txt"));
        assert_eq!(cfg.sampler_artifact(), "vmstat_log_unit_3_workers.txt");
    }

    #[test]
    fn test_default_label_is_valid() {
        let label = default_label();
        assert!(label.starts_with("run-"));
        assert_eq!(label.len(), 12);
        assert!(validate_label(&label).is_ok());
    }

    #[test]
    fn test_resolve_precedence() {
        let mut cfg = HarnessConfig::default();
        cfg.run.target = Some("10.1.1.1".to_string());
        cfg.run.workers = Some(7);
        cfg.run.warmup_sec = Some(2.0);

        // Config file only.
        let req = RunRequest::resolve(&cfg, None, &RunOverrides::default());
        assert_eq!(req.target, "10.1.1.1");
        assert_eq!(req.workers, 7);
        assert_eq!(req.warmup_sec, 2.0);
        assert_eq!(req.stagger, StaggerMode::None);

        // Profile beats config file.
        let req = RunRequest::resolve(&cfg, Some(Profile::Step), &RunOverrides::default());
        assert_eq!(req.workers, 5);
        assert_eq!(req.stagger, StaggerMode::Fixed);
        assert_eq!(req.stagger_sec, 10.0);
        assert_eq!(req.warmup_sec, 5.0);

        // Flags beat profile.
        let overrides = RunOverrides {
            workers: Some(3),
            stagger: Some(StaggerMode::Ramp),
            no_capture: true,
            skip_sampler: true,
            ..Default::default()
        };
        let req = RunRequest::resolve(&cfg, Some(Profile::Step), &overrides);
        assert_eq!(req.workers, 3);
        assert_eq!(req.stagger, StaggerMode::Ramp);
        assert!(!req.capture_output);
        assert!(!req.sampler_enabled);
    }

    #[test]
    fn test_single_profile_shape() {
        let mut cfg = HarnessConfig::default();
        cfg.run.workers = Some(9);
        let req = RunRequest::resolve(&cfg, Some(Profile::Single), &RunOverrides::default());
        assert_eq!(req.workers, 1);
        assert!(!req.capture_output);
        assert_eq!(req.warmup_sec, 1.0);
        assert_eq!(req.settle_sec, 0.0);
        assert_eq!(req.sampler_samples, 100);
    }
}
