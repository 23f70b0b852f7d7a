//! Hermes - Multi-Agent Conversation Orchestrator
//!
//! Main entry point for the Hermes server: an LLM-driven chat service
//! with tool calling, a persisted sub-agent registry, and SSE streaming.

use clap::{Parser, Subcommand};
use hermes_core::{
    config::DatabaseSettings,
    ApiServer, ApiServerConfig, CompletionClient, ConnectionMode, HermesConfig, LibsqlStorage,
    Orchestrator, Result, SearchClient, StaticTokenIdentity, StorageBackend,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn, Level};
use tracing_subscriber::{self, EnvFilter};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "hermes")]
#[command(about = "Multi-agent conversation orchestrator", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Set log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Configuration file (overrides HERMES_CONFIG env var and ./hermes.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database path (overrides HERMES_DB_PATH env var and configuration)
    #[arg(long)]
    db_path: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Listen address (overrides configuration)
        #[arg(long)]
        addr: Option<String>,
    },

    /// Initialize the database and write a default configuration file
    Init {
        /// Database path
        #[arg(short, long)]
        database: Option<String>,
    },

    /// Manage users
    User {
        #[command(subcommand)]
        action: UserAction,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Create a user and register an access token for it
    Add {
        /// Email address
        #[arg(long)]
        email: String,

        /// Display name
        #[arg(long)]
        name: String,

        /// Access token; generated when omitted
        #[arg(long)]
        token: Option<String>,
    },
}

/// Resolve the configuration file path: CLI flag, env var, default
fn config_path(cli_path: Option<PathBuf>) -> PathBuf {
    cli_path
        .or_else(|| std::env::var("HERMES_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(HermesConfig::default_path)
}

/// Resolve the database path: CLI flag, env var, configuration, default
fn db_path(cli_path: Option<String>, settings: &DatabaseSettings) -> String {
    cli_path
        .or_else(|| std::env::var("HERMES_DB_PATH").ok())
        .unwrap_or_else(|| settings.resolve_path().to_string_lossy().to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Use the specified level for hermes, WARN for noisy HTTP internals
    let filter = EnvFilter::new(format!(
        "hermes={level},hermes_core={level},tower_http=warn,hyper=warn,reqwest=warn",
        level = level.as_str().to_lowercase()
    ));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    debug!("Hermes v{} starting...", env!("CARGO_PKG_VERSION"));

    let config_file = config_path(cli.config);

    match cli.command {
        Commands::Serve { addr } => {
            let mut config = HermesConfig::load(&config_file)?;
            if let Some(addr) = addr {
                config.server.listen_addr = addr;
            }

            serve(config, cli.db_path).await
        }
        Commands::Init { database } => {
            debug!("Initializing database...");

            let config = HermesConfig::load(&config_file)?;

            if !config_file.exists() {
                config.save(&config_file)?;
                println!("✓ Wrote default configuration: {}", config_file.display());
            }

            let path = db_path(database.or(cli.db_path), &config.database);

            // Init command explicitly creates the database if missing
            let _storage =
                LibsqlStorage::new_with_validation(ConnectionMode::Local(path.clone()), true)
                    .await?;

            println!("✓ Database initialized: {}", path);
            println!();
            println!("Next steps:");
            println!("  hermes user add --email you@example.com --name You");
            println!("  hermes serve");
            Ok(())
        }
        Commands::User { action } => match action {
            UserAction::Add { email, name, token } => {
                let mut config = HermesConfig::load(&config_file)?;

                let path = db_path(cli.db_path, &config.database);
                let storage =
                    LibsqlStorage::new_with_validation(ConnectionMode::Local(path), true).await?;

                let user = storage.create_user(&email, &name).await?;
                let token = token.unwrap_or_else(|| Uuid::new_v4().to_string());
                config.auth.tokens.insert(token.clone(), user.id);
                config.save(&config_file)?;

                println!("✓ Created user {} <{}>", user.display_name, user.email);
                println!("  id:    {}", user.id);
                println!("  token: {}", token);
                println!();
                println!("Authenticate requests with: Authorization: Bearer {}", token);
                Ok(())
            }
        },
    }
}

async fn serve(config: HermesConfig, db_override: Option<String>) -> Result<()> {
    let path = db_path(db_override, &config.database);
    let storage = Arc::new(
        LibsqlStorage::new_with_validation(ConnectionMode::Local(path.clone()), true).await?,
    );

    let completions = Arc::new(CompletionClient::new(config.llm.clone())?);
    let search = Arc::new(SearchClient::new(config.search.clone())?);

    let orchestrator = Arc::new(Orchestrator::new(
        storage.clone(),
        completions,
        search,
        config.limits,
        config.sub_agents.clone(),
    ));

    if config.auth.tokens.is_empty() {
        warn!("No auth tokens configured; every request will be rejected. Run 'hermes user add'.");
    }
    let identity = Arc::new(StaticTokenIdentity::from_settings(&config.auth));

    println!();
    println!("🛰  Hermes Orchestrator");
    println!("   Multi-agent chat with tool calling and SSE streaming");
    println!();
    println!("   Address:  http://{}", config.server.listen_addr);
    println!("   Database: {}", path);
    println!("   Model:    {}", config.llm.model);
    println!();
    println!("   Endpoints:");
    println!("   • POST  /ai/chat - Start a chat turn (SSE)");
    println!("   • POST  /ai/chat/:id - Continue a chat (SSE)");
    println!("   • GET   /ai/chat - List chats");
    println!("   • GET   /ai/chat/:id - Chat history");
    println!("   • GET   /agents - List sub-agents");
    println!("   • GET   /agents/:id - Sub-agent with revision history");
    println!("   • PATCH /agents/:id - Update a sub-agent prompt");
    println!("   • GET   /health - Health check");
    println!();

    let server = ApiServer::new(
        ApiServerConfig {
            listen_addr: config.server.listen_addr.clone(),
        },
        storage,
        orchestrator,
        identity,
        config.sub_agents.clone(),
    );
    server.serve().await
}
