use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use muster::client::{ClientConfig, CoordinatorClient};
use muster::config::Config;
use muster::server::CoordinatorServer;

#[derive(Parser)]
#[command(
    name = "muster",
    version,
    about = "Volunteer compute fleet coordinator for synchronous federated training rounds",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (pretty, compact, json); defaults to the config value
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordinator server
    Serve {
        /// Configuration file path (environment variables otherwise)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Query a running coordinator
    Status {
        /// Coordinator URL
        #[arg(short, long, default_value = "http://127.0.0.1:7000")]
        url: String,

        /// Include full statistics
        #[arg(long, default_value = "false")]
        stats: bool,
    },

    /// Write a default configuration file
    InitConfig {
        /// Output path
        #[arg(short, long, default_value = "muster.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long, default_value = "false")]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = cli.verbose;
    let log_format = cli.log_format.clone();

    match cli.command {
        Commands::Serve { config } => {
            let config = load_config(config.as_deref())?;
            let format = log_format.unwrap_or_else(|| config.logging.format.clone());
            setup_tracing(&format, verbose, &config.logging.level)?;

            tracing::info!(version = env!("CARGO_PKG_VERSION"), "muster coordinator starting");
            serve(config).await?;
        }

        Commands::Status { url, stats } => {
            setup_tracing(log_format.as_deref().unwrap_or("compact"), verbose, "warn")?;
            status(url, stats).await?;
        }

        Commands::InitConfig { output, force } => {
            setup_tracing(log_format.as_deref().unwrap_or("compact"), verbose, "warn")?;
            init_config(output, force)?;
        }
    }

    Ok(())
}

fn setup_tracing(format: &str, verbose: bool, default_level: &str) -> Result<()> {
    let directive = if verbose {
        "muster=debug,info".to_string()
    } else {
        format!("muster={default_level},warn")
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(directive));

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        "compact" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().compact())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path),
        None => Config::from_env(),
    }
}

async fn serve(config: Config) -> Result<()> {
    if let Err(err) = muster::metrics::init_metrics() {
        tracing::warn!(%err, "Metrics initialization failed, continuing without metrics");
    }

    let server = CoordinatorServer::new(config)?;
    server.start().await?;

    Ok(())
}

async fn status(url: String, stats: bool) -> Result<()> {
    let client = CoordinatorClient::new(ClientConfig::new(&url))?;
    let health = client.health_check().await?;

    println!("Coordinator at {url}");
    println!(
        "  Status:    {}",
        if health.healthy { "healthy" } else { "unhealthy" }
    );
    println!("  Version:   {}", health.version);
    println!("  Uptime:    {}s", health.uptime_secs);
    println!("  Providers: {}", health.providers);
    println!("  Round:     {}", health.round);

    if stats {
        let stats = client.fetch_stats().await?;
        println!("{}", serde_json::to_string_pretty(&stats)?);
    }

    Ok(())
}

fn init_config(output: PathBuf, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            output.display()
        );
    }

    let config = Config::default();
    let body = format!(
        "# muster coordinator configuration\n\
         # All sections are optional; omitted values fall back to the\n\
         # defaults shown here.\n\n{}",
        config.to_toml()?
    );

    std::fs::write(&output, body)?;
    println!("Wrote default configuration to {}", output.display());

    Ok(())
}
