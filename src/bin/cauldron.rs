//! Cauldron CLI
//!
//! Inspects the active Cauldron and checks dependency compatibility.

use std::path::PathBuf;

use anyhow::{bail, Context};
use cauldron::compatibility::native_app_compatibility;
use cauldron::{
    AppVersionDescriptor, ClientConfig, CompatibilityEntry, ConnectOptions, PackagePath,
    StoreConnectionManager,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cauldron")]
#[command(about = "Inspect Cauldron stores and check compatibility")]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Store key to use instead of the configured active store
    #[arg(short, long, global = true)]
    store: Option<String>,

    /// Connect even if the store schema version differs from the supported one
    #[arg(long, global = true)]
    ignore_schema_version_mismatch: bool,

    /// Connect even if this client does not satisfy the store's required client version
    #[arg(long, global = true)]
    ignore_required_client_version: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the active store and the native application versions it holds
    Status,

    /// Print the record of a native application version as JSON
    Show {
        /// Descriptor (app:platform:version)
        descriptor: AppVersionDescriptor,
    },

    /// Compute the next container version of a native application version
    NextVersion {
        descriptor: AppVersionDescriptor,
        /// Explicit version to use
        #[arg(long)]
        version: Option<String>,
    },

    /// Check dependencies against the native application versions matching a descriptor
    Compat {
        /// Descriptor, possibly partial (app or app:platform)
        descriptor: AppVersionDescriptor,
        /// Dependencies (name@version, git or file paths)
        #[arg(required = true)]
        dependencies: Vec<String>,
    },

    /// Manage client configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write the effective configuration to a file
    Init {
        #[arg(default_value = "cauldron.toml")]
        path: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.as_deref().map(|p| p.to_string_lossy().into_owned());
    let config = ClientConfig::load_from(config_path.as_deref()).context("loading configuration")?;

    let options = ConnectOptions {
        ignore_schema_version_mismatch: cli.ignore_schema_version_mismatch,
        ignore_required_client_version: cli.ignore_required_client_version,
    };
    let mut manager = StoreConnectionManager::new(config)?;
    if let Some(store) = cli.store {
        manager.set_active_store(store);
    }

    match cli.command {
        Commands::Config { action } => run_config(manager.config(), &action)?,

        Commands::Status => {
            let helper = manager.active(&options)?;
            println!("🧪 Cauldron: {}", helper.key());
            println!("   Schema version: {}", helper.schema_version()?);
            let descriptors = helper.descriptors(None)?;
            if descriptors.is_empty() {
                println!("   No native application versions");
            }
            for d in descriptors {
                let record = helper.native_app_version(&d)?;
                let released = if record.is_released { " (released)" } else { "" };
                let container = record.container_version.as_deref().unwrap_or("-");
                println!("   • {}{} container {}", d, released, container);
            }
        }

        Commands::Show { descriptor } => {
            let helper = manager.active(&options)?;
            let record = helper.native_app_version(&descriptor)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }

        Commands::NextVersion { descriptor, version } => {
            if descriptor.platform.is_none() {
                bail!("{} does not specify a platform", descriptor);
            }
            let helper = manager.active(&options)?;
            let next = helper.next_container_version(&descriptor, version.as_deref())?;
            println!("{}", next);
        }

        Commands::Compat { descriptor, dependencies } => {
            let local = dependencies
                .iter()
                .map(|d| PackagePath::parse(d))
                .collect::<Result<Vec<_>, _>>()?;
            let helper = manager.active(&options)?;
            let reports = native_app_compatibility(helper, &local, Some(&descriptor))?;
            if reports.is_empty() {
                bail!("no native application version matches {}", descriptor);
            }

            let mut all_compatible = true;
            for report in &reports {
                if report.is_compatible {
                    println!("✅ {} - COMPATIBLE", report.descriptor);
                } else {
                    all_compatible = false;
                    println!("❌ {} - NOT COMPATIBLE", report.descriptor);
                }
                print_entries("compatible", &report.compatibility.compatible);
                print_entries(
                    "compatible (non strict)",
                    &report.compatibility.compatible_non_strict,
                );
                print_entries("incompatible", &report.compatibility.incompatible);
            }

            if !all_compatible {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn run_config(config: &ClientConfig, action: &ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            println!("{}", toml::to_string_pretty(config)?);
        }
        ConfigAction::Init { path } => {
            if path.exists() {
                bail!("{} already exists", path.display());
            }
            config.save(&path.to_string_lossy())?;
            println!("✅ Wrote configuration to {}", path.display());
        }
    }
    Ok(())
}

fn print_entries(label: &str, entries: &[CompatibilityEntry]) {
    if entries.is_empty() {
        return;
    }
    println!("   {}:", label);
    for e in entries {
        println!(
            "   └─ {:<40} needed {:<16} local {}",
            e.dependency_name,
            e.remote_version.as_deref().unwrap_or(""),
            e.local_version.as_deref().unwrap_or("")
        );
    }
}
