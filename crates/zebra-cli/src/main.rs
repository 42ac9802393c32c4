mod archive;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use zebra_config::{AppConfig, ConfigLoader};
use zebra_db::Database;
use zebra_gateway::{AppState, GatewayServer};

#[derive(Parser)]
#[command(
    name = "zebra",
    version,
    about = "Zebra - local archive and full-text search for AI chat histories"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Database file, overriding config and ZEBRA_DB_PATH
    #[arg(long, global = true)]
    db: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP/WebSocket gateway
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,
    },

    /// Answer newline-delimited JSON requests on stdin/stdout
    Stdio,

    /// Import a chat export file
    Import {
        /// Export origin (chatgpt, claude, deepseek)
        #[arg(long)]
        source: String,
        file: PathBuf,
    },

    /// List archived conversations, most recently updated first
    List {
        #[arg(long, default_value_t = 50)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long)]
        source: Option<String>,
    },

    /// Print one conversation as JSON
    Show { id: String },

    /// Full-text search over titles and messages
    Search {
        query: String,
        #[arg(long)]
        source: Option<String>,
        /// Keep loading pages until results are exhausted
        #[arg(long)]
        all: bool,
    },

    /// Delete a conversation
    Delete { id: String },

    /// Run raw SQL; parameters bind to ?1, ?2, ...
    Query { sql: String, params: Vec<String> },

    /// Show archive status, or a running gateway's with --remote
    Status {
        #[arg(long)]
        remote: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config_loader = ConfigLoader::new()?;
    config_loader.ensure_dirs()?;
    let mut config = config_loader.load_resolved()?;
    if let Some(path) = cli.db {
        config.storage.path = Some(path);
    }

    let level = cli
        .log_level
        .or_else(|| config.log_level.clone())
        .unwrap_or_else(|| "info".to_string());
    // stdout carries command output and stdio replies.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level)))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.gateway.host = host;
            }
            if let Some(port) = port {
                config.gateway.port = port;
            }
            GatewayServer::new(config).run().await?;
        }
        Commands::Stdio => {
            let state = AppState::new(config);
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            zebra_gateway::stdio::serve(&state, stdin, tokio::io::stdout()).await?;
        }
        Commands::Import { source, file } => {
            let imported = archive::import(open(&config)?, &source, &file).await?;
            println!("imported {imported} conversations");
        }
        Commands::List {
            limit,
            offset,
            source,
        } => archive::list(open(&config)?, limit, offset, source.as_deref()).await?,
        Commands::Show { id } => archive::show(open(&config)?, &id).await?,
        Commands::Search { query, source, all } => {
            archive::search(
                open(&config)?,
                config.search.page_size,
                &query,
                source.as_deref(),
                all,
            )
            .await?
        }
        Commands::Delete { id } => archive::delete(open(&config)?, &id).await?,
        Commands::Query { sql, params } => archive::query(open(&config)?, &sql, &params).await?,
        Commands::Status { remote: false } => archive::status(open(&config)?).await?,
        Commands::Status { remote: true } => remote_status(&config).await?,
    }

    Ok(())
}

fn open(config: &AppConfig) -> Result<Arc<Database>> {
    Ok(Arc::new(Database::open(&config.storage)?))
}

async fn remote_status(config: &AppConfig) -> Result<()> {
    let client = reqwest::Client::new();
    let mut request = client.get(format!(
        "http://{}:{}/api/status",
        config.gateway.host, config.gateway.port
    ));
    if let Some(api_key) = &config.gateway.api_key {
        request = request.bearer_auth(api_key);
    }

    let resp = request.send().await.map_err(|_| {
        anyhow::anyhow!(
            "Gateway is not running at {}:{}",
            config.gateway.host,
            config.gateway.port
        )
    })?;

    if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
        anyhow::bail!("Unauthorized. Check gateway.api_key in config.yml or ZEBRA_API_KEY.");
    }

    let body = resp.json::<serde_json::Value>().await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}
