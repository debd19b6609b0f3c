use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::Value;

use resilient_client::config::{load_config, ClientConfig};
use resilient_client::http::ReqwestTransport;
use resilient_client::observability::{logging, metrics};
use resilient_client::{RequestOptions, ResilientClient};

#[derive(Parser)]
#[command(name = "svc-probe")]
#[command(about = "Call an upstream service through the resilient client", long_about = None)]
struct Cli {
    /// Client config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Base URL, used when no config file is given
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    /// Service name, used when no config file is given
    #[arg(short, long, default_value = "upstream")]
    service: String,

    /// Deadline for the whole call, in milliseconds
    #[arg(long)]
    deadline_ms: Option<u64>,

    /// Print the telemetry record after the call
    #[arg(long)]
    telemetry: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// GET a path
    Get { path: String },
    /// DELETE a path
    Delete { path: String },
    /// POST a JSON body to a path
    Post { path: String, body: String },
    /// PUT a JSON body to a path
    Put { path: String, body: String },
    /// Print circuit breaker state for the service
    Circuit,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ClientConfig::new(cli.service.clone(), cli.url.clone()),
    };

    let _ = logging::init_logging(&config.observability);
    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr);
    }

    let client = ResilientClient::new(config, Arc::new(ReqwestTransport::new()))?;
    let mut opts = RequestOptions::new();
    if let Some(ms) = cli.deadline_ms {
        opts = opts.timeout(Duration::from_millis(ms));
    }

    let result: Result<Value, _> = match cli.command {
        Commands::Get { path } => client.get(&path, Some(opts)).await,
        Commands::Delete { path } => client.delete(&path, Some(opts)).await,
        Commands::Post { path, body } => {
            let body: Value = serde_json::from_str(&body)?;
            client.post(&path, &body, Some(opts)).await
        }
        Commands::Put { path, body } => {
            let body: Value = serde_json::from_str(&body)?;
            client.put(&path, &body, Some(opts)).await
        }
        Commands::Circuit => {
            let stats = client.breaker_stats();
            println!(
                "{}: {} ({} failures)",
                client.service_name(),
                stats.state.as_str(),
                stats.failure_count
            );
            return Ok(());
        }
    };

    match &result {
        Ok(value) => println!("{}", serde_json::to_string_pretty(value)?),
        Err(e) => eprintln!("Error: {}", e),
    }

    if cli.telemetry {
        for metric in client.recent_metrics(1) {
            println!("{}", serde_json::to_string_pretty(&metric)?);
        }
    }

    if result.is_err() {
        std::process::exit(1);
    }
    Ok(())
}
