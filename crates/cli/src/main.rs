mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use kiln_lib::assets::{InstallInputs, Platform, Target};
use kiln_lib::consts::{DEFAULT_INSTALL_DIR, INSTALL_DIR_ENV};

use crate::cmd::{GraphFormat, cmd_create, cmd_graph, cmd_targets};
use crate::output::print_error;

/// kiln - incremental builder for cluster install assets
#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Log verbosity, overridden by RUST_LOG
  #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
  log_level: LogLevel,

  /// Print results as JSON
  #[arg(long, global = true)]
  json: bool,

  /// Maximum number of assets loading or generating at once
  #[arg(short = 'j', long, global = true)]
  parallelism: Option<usize>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build a target into the install directory
  Create {
    /// Target to build (install-config, manifests, ignition-configs)
    target: Target,

    /// Install directory holding the generated assets
    #[arg(long, env = INSTALL_DIR_ENV, default_value = DEFAULT_INSTALL_DIR)]
    dir: PathBuf,

    #[command(flatten)]
    install: InstallArgs,
  },

  /// Print the dependency graph of a target
  Graph {
    /// Target whose graph to print
    #[arg(long, default_value = "ignition-configs")]
    target: Target,

    /// Output format
    #[arg(long, value_enum, default_value_t = GraphFormat::Dot)]
    format: GraphFormat,
  },

  /// List the available targets
  Targets,
}

/// Overrides for install inputs, applied over `KILN_*` environment variables.
#[derive(clap::Args, Default)]
struct InstallArgs {
  /// Cluster name
  #[arg(long)]
  cluster_name: Option<String>,

  /// Base DNS domain of the cluster
  #[arg(long)]
  base_domain: Option<String>,

  /// Platform to install on (aws, azure, gcp, none)
  #[arg(long)]
  platform: Option<Platform>,

  /// Cloud region
  #[arg(long)]
  region: Option<String>,

  /// Number of control plane machines
  #[arg(long)]
  control_plane_replicas: Option<u32>,

  /// Number of compute machines
  #[arg(long)]
  compute_replicas: Option<u32>,

  /// Pull secret JSON
  #[arg(long)]
  pull_secret: Option<String>,

  /// Public SSH key for the core user
  #[arg(long)]
  ssh_key: Option<String>,
}

impl InstallArgs {
  fn into_inputs(self) -> Result<InstallInputs> {
    let mut inputs = InstallInputs::from_env().context("Invalid KILN_* environment variable")?;
    if let Some(v) = self.cluster_name {
      inputs.cluster_name = v;
    }
    if let Some(v) = self.base_domain {
      inputs.base_domain = v;
    }
    if let Some(v) = self.platform {
      inputs.platform = v;
    }
    if let Some(v) = self.region {
      inputs.region = Some(v);
    }
    if let Some(v) = self.control_plane_replicas {
      inputs.control_plane_replicas = v;
    }
    if let Some(v) = self.compute_replicas {
      inputs.compute_replicas = v;
    }
    if let Some(v) = self.pull_secret {
      inputs.pull_secret = v;
    }
    if let Some(v) = self.ssh_key {
      inputs.ssh_key = Some(v);
    }
    Ok(inputs)
  }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
  Error,
  Warn,
  Info,
  Debug,
  Trace,
}

impl LogLevel {
  fn as_str(self) -> &'static str {
    match self {
      LogLevel::Error => "error",
      LogLevel::Warn => "warn",
      LogLevel::Info => "info",
      LogLevel::Debug => "debug",
      LogLevel::Trace => "trace",
    }
  }
}

fn init_logging(level: LogLevel) {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

fn run(cli: Cli) -> Result<()> {
  match cli.command {
    Commands::Create { target, dir, install } => {
      cmd_create(target, &dir, install.into_inputs()?, cli.parallelism, cli.json)
    }
    Commands::Graph { target, format } => cmd_graph(target, format, cli.json),
    Commands::Targets => cmd_targets(cli.json),
  }
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_logging(cli.log_level);

  match run(cli) {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      print_error(&format!("{err:#}"));
      ExitCode::FAILURE
    }
  }
}
