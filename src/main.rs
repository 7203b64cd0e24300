//! sriov-harness - SR-IOV provisioning, verification and teardown runs

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sriov_harness::config::{Flow, HarnessConfig};
use sriov_harness::install;
use sriov_harness::kubectl::Kubectl;
use sriov_harness::workflow::{Backends, RunReport, Workflow};

/// sriov-harness - provision SR-IOV VFs, verify them end to end, clean up
#[derive(Parser, Debug)]
#[command(name = "sriov-harness", version, about, long_about = None)]
struct Cli {
    /// Path to a harness configuration file (YAML)
    #[arg(short = 'c', long = "config", env = "SRIOV_HARNESS_CONFIG", global = true)]
    config_file: Option<PathBuf>,

    /// Flow to run, overriding the configuration file
    #[arg(long, env = "SRIOV_HARNESS_FLOW", global = true)]
    flow: Option<Flow>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Provision, install, verify and tear down
    Run(RunArgs),

    /// Print the effective device catalog
    Catalog,

    /// Print the installation steps of the configured flow
    Plan,
}

/// Run mode arguments
#[derive(Parser, Debug)]
struct RunArgs {
    /// VFs to request per device
    #[arg(long, env = "SRIOV_NUM_VFS")]
    vf_count: Option<u32>,

    /// Kubeconfig for both the API client and kubectl
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Write a JSON run report to this file
    #[arg(long)]
    report: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("sriov_harness=info,kube=warn")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config_file {
        Some(path) => HarnessConfig::from_file(path)?,
        None => HarnessConfig::default(),
    };
    if let Some(flow) = cli.flow {
        config.flow = flow;
    }

    match cli.command {
        Commands::Run(args) => run(config, args).await,
        Commands::Catalog => {
            print_catalog(&config);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Plan => {
            config.validate()?;
            print_plan(&config);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run(mut config: HarnessConfig, args: RunArgs) -> anyhow::Result<ExitCode> {
    if let Some(vf_count) = args.vf_count {
        config.vf_count = vf_count;
    }
    config.validate()?;

    tracing::info!(
        flow = %config.flow,
        vf_count = config.vf_count,
        devices = config.catalog.len(),
        "starting run"
    );

    let client = kube_client(args.kubeconfig.as_deref()).await?;
    let backends = Backends::kube(client, Kubectl::new(args.kubeconfig.clone()));
    let report = Workflow::new(config, backends).run().await;

    if let Some(path) = &args.report {
        write_report(path, &report)?;
    }

    Ok(if report.outcome.is_failure() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn kube_client(kubeconfig: Option<&Path>) -> anyhow::Result<Client> {
    let Some(path) = kubeconfig else {
        return Ok(Client::try_default().await?);
    };
    let kubeconfig = Kubeconfig::read_from(path)
        .map_err(|e| anyhow::anyhow!("Failed to read kubeconfig {:?}: {}", path, e))?;
    let config =
        kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;
    Ok(Client::try_from(config)?)
}

fn write_report(path: &Path, report: &RunReport) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(&report.summary())?;
    std::fs::write(path, json)
        .map_err(|e| anyhow::anyhow!("Failed to write report {:?}: {}", path, e))?;
    tracing::info!(path = %path.display(), "report written");
    Ok(())
}

fn print_catalog(config: &HarnessConfig) {
    println!("{:<10} {:<20} {:<12} {}", "PCI ID", "RESOURCE", "DRIVER", "FAMILY");
    for device in &config.catalog {
        println!(
            "{:<10} {:<20} {:<12} {}",
            device.pci_id(),
            device.resource_name,
            device.driver,
            device.family
        );
    }
}

fn print_plan(config: &HarnessConfig) {
    let resources: Vec<&str> = config
        .catalog
        .iter()
        .map(|d| d.resource_name.as_str())
        .collect();
    println!("=== {} flow ===", config.flow);
    for (index, step) in install::plan(config, &resources).iter().enumerate() {
        println!("[Step {}] {} (ready: {})", index + 1, step.name, step.readiness);
        for declaration in &step.declarations {
            println!("  {}", declaration);
        }
    }
}
