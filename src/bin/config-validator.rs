//! # Commander Configuration Validator
//!
//! Command-line tool for validating commander configuration files across
//! environments before starting the work item processor.

use clap::{Parser, Subcommand};
use commander_core::config::{CommanderConfig, ConfigManager};
use std::path::PathBuf;
use std::process;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate commander configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment to validate (development, test, production, ...)
    #[arg(short, long, default_value = "development")]
    environment: String,

    /// Configuration directory path (default: config/commander)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate every configuration section
    All,

    /// Validate one configuration section
    Component {
        /// Section name (database, storage, queue, delivery, deletion, logging)
        name: String,
    },

    /// List environments with an override file
    Environments,

    /// Print the fully merged configuration as JSON
    Show,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let result = match &cli.command {
        Some(Commands::All) | None => validate_all(&cli),
        Some(Commands::Component { name }) => validate_component(&cli, name),
        Some(Commands::Environments) => list_environments(&cli),
        Some(Commands::Show) => show_config(&cli),
    };

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {}", e);
            process::exit(1);
        }
    }
}

fn config_dir(cli: &Cli) -> PathBuf {
    cli.config_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("config").join("commander"))
}

fn load(cli: &Cli) -> anyhow::Result<CommanderConfig> {
    let manager = ConfigManager::load_for_environment(config_dir(cli), &cli.environment)?;
    Ok(manager.config().clone())
}

fn validate_all(cli: &Cli) -> anyhow::Result<()> {
    println!("🔧 Validating Commander Configuration");
    println!("Environment: {}", cli.environment);
    println!("Config Directory: {}", config_dir(cli).display());
    println!();

    let config = match load(cli) {
        Ok(config) => {
            println!("✅ Configuration loaded and validated");
            config
        }
        Err(e) => {
            println!("❌ Failed to load configuration: {e}");
            return Err(e);
        }
    };

    for section in ["database", "storage", "queue", "delivery", "deletion", "logging"] {
        report_section(&config, section)?;
    }

    println!("\n🎉 All configuration validation checks passed!");
    Ok(())
}

fn validate_component(cli: &Cli, name: &str) -> anyhow::Result<()> {
    println!("🔧 Validating Component: {name}");
    let config = load(cli)?;
    report_section(&config, &name.to_lowercase())?;
    println!("✅ Component '{name}' validation passed!");
    Ok(())
}

fn report_section(config: &CommanderConfig, section: &str) -> anyhow::Result<()> {
    match section {
        "database" => {
            println!("🗄️  Database");
            println!("   ✅ Max connections: {}", config.database.max_connections);
            println!("   ✅ Run migrations: {}", config.database.run_migrations);
        }
        "storage" => {
            println!("📦 Storage");
            println!("   ✅ Table: {}", config.storage.table_name);
            println!(
                "   ✅ Batch writes: {} items, {} attempts",
                config.storage.max_batch_write_items, config.storage.batch_write_max_attempts
            );
        }
        "queue" => {
            println!("📬 Queue");
            println!("   ✅ Name: {}", config.queue.queue_name);
            println!(
                "   ✅ Visibility timeout: {}s",
                config.queue.visibility_timeout_seconds
            );
        }
        "delivery" => {
            let delivery = &config.delivery;
            println!("📤 Delivery");
            println!(
                "   ✅ Batch sizes: topic {}, shadow {}, job {}",
                delivery.topic_batch_size, delivery.shadow_batch_size, delivery.job_batch_size
            );
            println!("   ✅ Max job targets: {}", delivery.max_job_targets);
            if delivery.job_batch_size > delivery.max_job_targets {
                println!(
                    "   ℹ️  Job batches above {} targets use an ephemeral group",
                    delivery.max_job_targets
                );
            }
        }
        "deletion" => {
            println!("🗑️  Deletion");
            println!(
                "   ✅ Page size {}, concurrency {}",
                config.deletion.page_size, config.deletion.max_concurrency
            );
        }
        "logging" => {
            println!("📋 Logging");
            println!(
                "   ✅ Level {} ({})",
                config.logging.level,
                if config.logging.json { "json" } else { "text" }
            );
        }
        other => anyhow::bail!("Unknown component: {other}"),
    }
    Ok(())
}

fn list_environments(cli: &Cli) -> anyhow::Result<()> {
    let dir = config_dir(cli);
    println!("📋 Available Environments in {}:", dir.display());

    let mut environments = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "toml") {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if stem != "base" {
                    environments.push(stem.to_string());
                }
            }
        }
    }
    environments.sort();
    for env in environments {
        println!("  • {env}");
    }
    Ok(())
}

fn show_config(cli: &Cli) -> anyhow::Result<()> {
    let config = load(cli)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
