//! Devicegate CLI - multi-device session gateway

mod server;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use devicegate_core::api::{self, HealthStatus, sessions};
use devicegate_core::config::Config;
use devicegate_core::domain::session::{
    SessionManager, SessionRepository, ShutdownConfig, ShutdownHandler,
};
use devicegate_core::protocol::SimulatedFactory;
use devicegate_core::protocol::sim::DEFAULT_MAX_CODES;
use devicegate_core::storage::Database;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::server::AppState;

#[derive(Parser)]
#[command(name = "devicegate")]
#[command(author, version, about = "Multi-device session gateway", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Database file (overrides database.path)
    #[arg(long, global = true)]
    database: Option<PathBuf>,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Restore stored sessions and serve the HTTP API
    Serve {
        /// Bind address (overrides server.host)
        #[arg(long)]
        host: Option<String>,
        /// Port (overrides server.port)
        #[arg(short, long)]
        port: Option<u16>,
        /// Do not reconnect sessions that were connected at last shutdown
        #[arg(long)]
        no_reconnect: bool,
    },

    /// Inspect stored sessions
    Sessions {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run health check
    Doctor,
}

#[derive(Subcommand)]
enum SessionAction {
    /// List stored sessions
    List {
        #[arg(short, long)]
        status: Option<String>,
    },
    /// Show one session and its latest events
    Show {
        /// Session id or name
        key: String,
        #[arg(short, long, default_value_t = 10)]
        events: i32,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// Show every configuration value
    Show,
    /// Write a default config file if none exists
    Init,
    /// Reset configuration to defaults
    Reset,
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("devicegate=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            host,
            port,
            no_reconnect,
        } => {
            let config = load_config(cli.database.as_ref())?;
            cmd_serve(config, host, port, no_reconnect).await
        }

        Commands::Sessions { action } => {
            let config = load_config(cli.database.as_ref())?;
            let db = Database::new(config.database_config()).await?;
            let result = cmd_sessions(&db, action, cli.format, cli.quiet).await;
            db.close().await;
            result
        }

        Commands::Config { action } => cmd_config(action, cli.quiet),

        Commands::Doctor => {
            let config = load_config(cli.database.as_ref())?;
            cmd_doctor(&config, cli.format, cli.quiet).await
        }
    }
}

fn load_config(database: Option<&PathBuf>) -> anyhow::Result<Config> {
    let mut config = Config::load()?;
    if let Some(path) = database {
        config.database.path = Some(path.clone());
    }
    config.validate()?;
    Ok(config)
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn cmd_serve(
    config: Config,
    host: Option<String>,
    port: Option<u16>,
    no_reconnect: bool,
) -> anyhow::Result<()> {
    let db = Database::new(config.database_config()).await?;
    let store = Arc::new(SessionRepository::new(db.pool().clone()));
    let factory = Arc::new(SimulatedFactory::with_timing(
        config.pairing.code_interval(),
        DEFAULT_MAX_CODES,
    ));
    let manager = SessionManager::new(store, factory, config.manager_config());

    let reconnect = config.sessions.reconnect_on_startup && !no_reconnect;
    let report = manager.restore(reconnect).await?;
    info!(
        restored = report.restored,
        reconnecting = report.reconnect_count(),
        "Sessions restored"
    );
    // Reconnection attempts run on their own; their outcome is logged
    tokio::spawn(async move {
        let summary = report.join().await;
        for (id, reason) in &summary.failed {
            warn!(session_id = %id, reason = %reason, "Session did not reconnect");
        }
    });

    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", host, port))?;

    let app = server::router(AppState {
        manager: manager.clone(),
        db: db.clone(),
    });
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(%addr, "Serving session API");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    let result = ShutdownHandler::new(manager, db, ShutdownConfig::default())
        .shutdown_gracefully()
        .await;
    for warning in &result.warnings {
        warn!("{}", warning);
    }
    info!("Shutdown complete: {}", result.summary());
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

async fn cmd_sessions(
    db: &Database,
    action: SessionAction,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    match action {
        SessionAction::List { status } => {
            let list = sessions::list(db, status.as_deref()).await?;
            if format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&list)?);
            } else if list.is_empty() {
                if !quiet {
                    println!("No sessions found.");
                    println!("\nStart the server with `devicegate serve` and POST /sessions.");
                }
            } else {
                if !quiet {
                    println!("Sessions:");
                }
                for s in list {
                    println!(
                        "  {} - {} ({}){}",
                        &s.id[..8],
                        s.name.as_deref().unwrap_or("-"),
                        s.status,
                        if s.authenticated { " [paired]" } else { "" }
                    );
                }
            }
        }
        SessionAction::Show { key, events } => {
            let detail = sessions::show(db, &key, events).await?;
            if format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&detail)?);
                return Ok(());
            }

            let s = &detail.session;
            println!("Session: {}", s.name.as_deref().unwrap_or("-"));
            println!("  ID: {}", s.id);
            println!("  Status: {}", s.status);
            if let Some(identity) = &s.identity {
                println!("  Identity: {}", identity);
            }
            println!("  Created: {}", s.created_at);
            if let Some(connected_at) = &s.connected_at {
                println!("  Connected: {}", connected_at);
            }
            println!("  Last seen: {}", s.last_seen_at);

            if !detail.events.is_empty() {
                println!("\nRecent events:");
                for e in &detail.events {
                    match &e.data {
                        Some(data) => println!("  {} {} {}", e.created_at, e.event_type, data),
                        None => println!("  {} {}", e.created_at, e.event_type),
                    }
                }
            }
        }
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::Show => {
            let config = Config::load()?;
            for (key, value) in config.list()? {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Init => {
            let path = Config::config_path()?;
            if path.exists() {
                if !quiet {
                    println!("Config already exists at {}", path.display());
                }
            } else {
                Config::default().save()?;
                if !quiet {
                    println!("Wrote default config to {}", path.display());
                }
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

async fn cmd_doctor(config: &Config, format: OutputFormat, quiet: bool) -> anyhow::Result<()> {
    let db = Database::new(config.database_config()).await?;
    let report = api::check(&db, None).await;
    db.close().await;

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !quiet {
        println!("Devicegate Health Check");
        println!("=======================");
        println!();
        for check in &report.checks {
            let marker = match check.status {
                HealthStatus::Ok => "[OK]",
                HealthStatus::Warning => "[!!]",
                HealthStatus::Error => "[XX]",
            };
            match &check.message {
                Some(message) => println!("{} {}: {}", marker, check.name, message),
                None => println!("{} {}", marker, check.name),
            }
        }
        println!();
        println!("Version: {}", report.version);
    }

    if !report.is_healthy() {
        return Err(anyhow::anyhow!("Health check failed"));
    }
    Ok(())
}
