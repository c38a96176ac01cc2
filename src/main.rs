//! FinanceX CLI - main entry point
//!
//! Runs the HTTP services and offers ingestion and querying from the terminal.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use financex::commands::{self, ingest::IngestArgs, query::QueryArgs};
use financex::config::DEFAULT_MAX_CSV_ROWS;
use financex::{metrics, Config};
use tracing::warn;

#[derive(Parser)]
#[command(name = "financex")]
#[command(about = "Financial knowledge graph ingestion and Q&A", long_about = None)]
#[command(version)]
struct Cli {
    /// Address to expose Prometheus metrics (e.g., 0.0.0.0:9898)
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,

    /// Path to config.yml (defaults to ./config.yml, then ../config.yml)
    #[arg(short, long, env = "FINANCEX_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP services
    Serve {
        /// Override the configured host
        #[arg(long)]
        host: Option<String>,

        /// Override the configured port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Ingest a CSV, PDF, image or text file
    Ingest {
        /// File to ingest
        file: PathBuf,

        /// invoice | transaction
        #[arg(short, long, default_value = "invoice")]
        data_type: String,

        /// CSV delimiter (transactions default to ';')
        #[arg(long)]
        delimiter: Option<String>,

        /// Maximum CSV rows to read
        #[arg(long, default_value_t = DEFAULT_MAX_CSV_ROWS)]
        max_rows: usize,

        /// Extraction prompt overriding the data type's prompt
        #[arg(long)]
        prompt: Option<String>,
    },

    /// Ask a question about the ingested data
    Query {
        question: String,

        /// Number of triplets to retrieve
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Conversation id
        #[arg(long)]
        session: Option<String>,

        /// Write a source visualization to this HTML file
        #[arg(long)]
        visualize: Option<PathBuf>,
    },

    /// Print knowledge graph statistics
    Stats,

    /// Remove all knowledge graph data
    Prune,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::load_from_file(path).map_err(anyhow::Error::msg),
        None => Ok(Config::new()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env for local development
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("financex=info".parse()?))
        .init();

    let cli = Cli::parse();

    if let Some(addr) = cli.metrics_addr.as_deref() {
        match addr.parse::<SocketAddr>() {
            Ok(socket) => metrics::spawn_metrics_server(socket),
            Err(err) => warn!(%addr, "Invalid metrics address: {}", err),
        }
    }

    let config = load_config(cli.config.as_ref())?;
    execute_command(cli.command, config).await
}

async fn execute_command(command: Commands, mut config: Config) -> anyhow::Result<()> {
    match command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            commands::serve::run(config).await?;
        }
        Commands::Ingest {
            file,
            data_type,
            delimiter,
            max_rows,
            prompt,
        } => {
            commands::ingest::run(
                &config,
                IngestArgs {
                    file,
                    data_type,
                    delimiter,
                    max_rows,
                    custom_prompt: prompt,
                },
            )
            .await?;
        }
        Commands::Query {
            question,
            top_k,
            session,
            visualize,
        } => {
            commands::query::run(
                &config,
                QueryArgs {
                    question,
                    top_k,
                    session_id: session,
                    visualize,
                },
            )
            .await?;
        }
        Commands::Stats => commands::stats::run(&config).await?,
        Commands::Prune => commands::prune::run(&config).await?,
    }

    Ok(())
}
