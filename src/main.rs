use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use floodharness::config::{HarnessConfig, SamplerFailurePolicy};
use floodharness::driver::{RunPreview, RunReport, SamplerStatus};
use floodharness::plan::{Profile, RunOverrides, RunRequest, StaggerMode};

#[derive(Parser)]
#[command(
    name = "floodharness",
    about = "Concurrent flood-ping load generator with remote resource sampling",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (default: $FLOODHARNESS_CONFIG, then ./floodharness.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Arm the remote sampler, then launch and join the flood workers
    Run(RunArgs),

    /// Print what a run would do without starting anything
    Plan(RunArgs),

    /// Print the effective configuration as TOML
    ShowConfig,
}

#[derive(Args)]
struct RunArgs {
    /// Target host name or IP address
    target: Option<String>,

    /// Number of concurrent flood workers
    #[arg(short = 'n', long)]
    workers: Option<usize>,

    /// Preset reproducing a classic run shape
    #[arg(long, value_enum)]
    profile: Option<Profile>,

    /// Delay rule between worker starts
    #[arg(long, value_enum)]
    stagger: Option<StaggerMode>,

    /// Seconds between worker starts for fixed/ramp staggering
    #[arg(long)]
    stagger_secs: Option<f64>,

    /// Label used to name output artifacts
    #[arg(long)]
    label: Option<String>,

    /// Seconds to wait after arming the sampler
    #[arg(long)]
    warmup_secs: Option<f64>,

    /// Seconds to wait after the last worker starts
    #[arg(long)]
    settle_secs: Option<f64>,

    /// Directory for worker logs
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Let worker output go to the terminal instead of per-worker logs
    #[arg(long)]
    no_capture: bool,

    /// Do not arm the remote sampler
    #[arg(long)]
    skip_sampler: bool,

    /// What to do if the remote sampler cannot be armed
    #[arg(long, value_enum)]
    sampler_failure: Option<SamplerFailurePolicy>,

    /// JSON output for machine parsing
    #[arg(long)]
    json: bool,
}

impl RunArgs {
    fn request(&self, cfg: &HarnessConfig) -> RunRequest {
        let overrides = RunOverrides {
            target: self.target.clone(),
            workers: self.workers,
            stagger: self.stagger,
            stagger_sec: self.stagger_secs,
            label: self.label.clone(),
            warmup_sec: self.warmup_secs,
            settle_sec: self.settle_secs,
            no_capture: self.no_capture,
            output_dir: self.output_dir.clone(),
            skip_sampler: self.skip_sampler,
            sampler_failure: self.sampler_failure,
        };
        RunRequest::resolve(cfg, self.profile, &overrides)
    }
}

fn env_filter(level: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level))
}

fn init_tracing(level: &str, json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Resolve the config file under a temporary subscriber so fallback
/// warnings are visible before the configured one is installed.
fn load_config(explicit: Option<&Path>, json: bool) -> Result<HarnessConfig> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter("info"))
        .with_writer(std::io::stderr);
    if json {
        tracing::subscriber::with_default(builder.json().finish(), || HarnessConfig::resolve(explicit))
    } else {
        tracing::subscriber::with_default(builder.finish(), || HarnessConfig::resolve(explicit))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_deref(), cli.log_json)?;

    init_tracing(&cfg.logging.level, cli.log_json || cfg.logging.json);

    match cli.command {
        Commands::Run(args) => {
            let run = args.request(&cfg).validate()?;
            tracing::info!(
                host = %run.target(),
                workers = run.worker_count(),
                stagger = %run.stagger(),
                label = %run.label(),
                "Running flood test"
            );
            let report = floodharness::run(&cfg, &run).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
        Commands::Plan(args) => {
            let run = args.request(&cfg).validate()?;
            let controller = floodharness::build_controller(&cfg);
            let sampler = run.sampler_enabled().then_some(&cfg.sampler);
            let preview = floodharness::driver::preview(&run, &controller, sampler);
            if args.json {
                println!("{}", serde_json::to_string_pretty(&preview)?);
            } else {
                print_preview(&preview);
            }
        }
        Commands::ShowConfig => {
            print!("{}", toml::to_string_pretty(&cfg)?);
        }
    }

    Ok(())
}

fn print_report(report: &RunReport) {
    println!("\nFlood run {} ({})", report.label, report.run_id);
    println!("Target:   {}", report.target);
    println!("Stagger:  {}", report.stagger);
    match &report.sampler {
        SamplerStatus::Armed { artifact } => println!("Sampler:  armed -> {}", artifact),
        SamplerStatus::Failed { error } => println!("Sampler:  FAILED ({})", error),
        SamplerStatus::Skipped => println!("Sampler:  skipped"),
    }
    println!();
    println!("{:<6} | {:>10} | {:>10} | {:<20} | Artifact", "Worker", "Start (s)", "Run (s)", "Outcome");
    println!("{:-<6}-|-{:-<10}-|-{:-<10}-|-{:-<20}-|-{:-<30}", "", "", "", "", "");
    for w in &report.result.workers {
        let artifact = w
            .artifact
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<6} | {:>10.2} | {:>10.2} | {:<20} | {}",
            w.index,
            w.launched_at.as_secs_f64(),
            w.runtime.as_secs_f64(),
            w.outcome.to_string(),
            artifact
        );
    }
    let r = &report.result;
    println!(
        "\nLaunched {}, succeeded {}, non-zero {}, spawn failures {}, elapsed {:.1}s\n",
        r.launched,
        r.succeeded(),
        r.non_zero_exits,
        r.spawn_failures,
        r.elapsed.as_secs_f64()
    );
}

fn print_preview(preview: &RunPreview) {
    println!("\nPlan for {} against {}", preview.label, preview.target);
    println!("Stagger: {}", preview.stagger);
    match (&preview.sampler_command, &preview.sampler_artifact) {
        (Some(cmd), Some(artifact)) => {
            println!("Sampler: {}", cmd);
            println!("         -> {} (then wait {:.1}s)", artifact, preview.warmup_sec);
        }
        _ => println!("Sampler: disabled"),
    }
    println!();
    for w in &preview.workers {
        let artifact = w
            .artifact
            .as_ref()
            .map(|p| format!(" > {}", p.display()))
            .unwrap_or_default();
        println!("t+{:>7.1}s  worker {:<3} {}{}", w.start_offset_sec, w.index, w.command_line.join(" "), artifact);
    }
    println!("t+{:>7.1}s  join all workers\n", preview.join_after_sec);
}
