//! floodharness -- concurrent flood-ping load generation with remote
//! resource sampling.
//!
//! A run arms a sampling tool on the target over SSH, waits for it to warm
//! up, then starts N flood workers under a stagger policy and joins them.

pub mod config;
pub mod controller;
pub mod driver;
pub mod flood;
pub mod plan;
pub mod sampler;

use std::sync::Arc;

use anyhow::Result;

use config::HarnessConfig;
use controller::ConcurrencyController;
use driver::{RunDriver, RunReport};
use flood::{FloodCommand, ProcessLauncher};
use plan::{ConfigError, RunConfiguration};
use sampler::{OpenSshChannel, RemoteSampler};

/// Controller backed by real flood processes.
pub fn build_controller(cfg: &HarnessConfig) -> ConcurrencyController {
    ConcurrencyController::new(
        Arc::new(ProcessLauncher),
        FloodCommand::new(cfg.flood.clone()),
    )
}

/// Wire the production components for `run`.
///
/// Credentials are resolved only when the run samples remotely.
pub fn build_driver(cfg: &HarnessConfig, run: &RunConfiguration) -> Result<RunDriver, ConfigError> {
    let sampler = if run.sampler_enabled() {
        let credential = cfg.control.credential()?;
        Some(RemoteSampler::new(
            Arc::new(OpenSshChannel::new(&cfg.control)),
            cfg.control.clone(),
            cfg.sampler.clone(),
            credential,
        ))
    } else {
        None
    };
    Ok(RunDriver::new(sampler, build_controller(cfg)))
}

/// Execute one run end to end with the production components.
pub async fn run(cfg: &HarnessConfig, config: &RunConfiguration) -> Result<RunReport> {
    let driver = build_driver(cfg, config)?;
    let report = driver.execute(config).await?;
    Ok(report)
}
