//! Warden CLI - gated decision kernel.
//!
//! Single binary that provides:
//! - `warden run` - drive the kernel against a simulated host
//! - `warden status` - telemetry snapshot after initialization
//! - `warden policies` - list the configured starter policies
//! - `warden init` - write a default project config

mod sim;

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use warden_kernel::{config::CONFIG_PATH, Kernel, KernelConfig};

use crate::sim::SimulatedHost;

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Policy-gated decision kernel", version)]
struct Cli {
    /// Project root directory
    #[arg(short, long, global = true)]
    project: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run decision cycles against a simulated host
    Run {
        /// Stop after this many cycles (runs until killed otherwise)
        #[arg(long)]
        cycles: Option<u64>,

        /// Seed the decision engine for a reproducible run
        #[arg(long)]
        seed: Option<u64>,

        /// Config file to use instead of the project config
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print kernel telemetry as JSON
    Status,

    /// List starter policies
    Policies,

    /// Write a default config into the project
    Init,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over the verbosity flag
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    fmt().with_env_filter(filter).with_target(false).init();

    let project_root = match cli.project {
        Some(root) => root,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match cli.command {
        Some(Commands::Run {
            cycles,
            seed,
            config,
        }) => run_kernel(&project_root, cycles, seed, config.as_deref()),
        Some(Commands::Status) => show_status(&project_root),
        Some(Commands::Policies) => list_policies(&project_root),
        Some(Commands::Init) => init_project(&project_root),
        None => {
            println!("Warden - Policy-gated decision kernel");
            println!();
            println!("Usage: warden <COMMAND>");
            println!();
            println!("Commands:");
            println!("  run       Run decision cycles");
            println!("  status    Print kernel telemetry");
            println!("  policies  List starter policies");
            println!("  init      Write a default config");
            println!();
            println!("Run 'warden --help' for more information.");
            Ok(())
        }
    }
}

fn load_config(project_root: &Path, explicit: Option<&Path>) -> Result<KernelConfig> {
    match explicit {
        Some(path) => KernelConfig::load(path),
        None => KernelConfig::load_from_project(project_root),
    }
}

fn build_kernel(config: KernelConfig, seed: Option<u64>) -> Result<Kernel> {
    let kernel = match seed {
        Some(seed) => Kernel::with_seed(config, seed)?,
        None => Kernel::new(config)?,
    };
    if !kernel.initialize() {
        bail!("Kernel failed to initialize");
    }
    Ok(kernel)
}

fn run_kernel(
    project_root: &Path,
    cycles: Option<u64>,
    seed: Option<u64>,
    config_path: Option<&Path>,
) -> Result<()> {
    tracing::info!(project = %project_root.display(), "Starting kernel");

    let config = load_config(project_root, config_path)?;
    let kernel = build_kernel(config, seed)?;

    let mut host = SimulatedHost::new();
    let stop = AtomicBool::new(false);
    let summary = kernel.run(cycles, &mut host, &stop);

    let telemetry = kernel.telemetry();
    kernel.shutdown();

    println!("Warden Run Summary");
    println!("==================");
    println!();
    println!("Cycles:       {}", summary.cycles);
    println!("  completed:  {}", summary.completed);
    println!("  blocked:    {}", summary.blocked);
    println!("  faults:     {}", summary.faults);
    println!("Episodes:     {}", summary.episodes);
    println!("Total reward: {:.3}", summary.total_reward);
    println!();
    println!(
        "Average reward (buffer): {:.3}",
        telemetry.decisions.average_reward
    );
    println!(
        "Exploration rate:        {:.4}",
        telemetry.decisions.exploration_rate
    );
    println!(
        "Violations recorded:     {}",
        telemetry.policies.violation_count
    );

    Ok(())
}

fn show_status(project_root: &Path) -> Result<()> {
    let config = load_config(project_root, None)?;
    let kernel = build_kernel(config, None)?;

    let telemetry = kernel.telemetry();
    kernel.shutdown();

    println!("{}", serde_json::to_string_pretty(&telemetry)?);
    Ok(())
}

fn list_policies(project_root: &Path) -> Result<()> {
    let config = load_config(project_root, None)?;
    config.policy.validate()?;

    println!("Starter policies: {}", config.policy.starter_policies.len());
    for policy in &config.policy.starter_policies {
        let state = if policy.active { "active" } else { "inactive" };
        println!(
            "  {} [{}] {} ({})",
            policy.id, policy.level, policy.name, state
        );
        for (key, value) in &policy.rules {
            println!("      {key} = {value}");
        }
    }
    Ok(())
}

fn init_project(project_root: &Path) -> Result<()> {
    let config_path = project_root.join(CONFIG_PATH);
    if config_path.exists() {
        println!("Config already exists at {}", config_path.display());
        return Ok(());
    }
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let body = serde_yaml::to_string(&KernelConfig::default())?;
    std::fs::write(&config_path, format!("# Warden Kernel Configuration\n\n{body}"))
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    println!("Initialized Warden project at {}", project_root.display());
    println!();
    println!("Created:");
    println!("  {CONFIG_PATH} - kernel configuration");
    Ok(())
}
