use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::PathBuf;
use tokio::net::TcpStream;
use tracing::{error, info};
use tracing_subscriber::prelude::*;

mod client;
mod config;
mod server;


use client::{TerminalView, resolve_username, run_client, spawn_stdin_reader};
use config::ServerConfig;
use server::ChatServer;

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Line-based multi-user TCP chat")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the chat server in the foreground
    Server(ServerArgs),

    /// Connect to a chat server
    Connect(ConnectArgs),
}

#[derive(Parser)]
struct ServerArgs {
    /// Path to a parley.toml with a [server] section
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[derive(Parser)]
struct ConnectArgs {
    /// Server hostname or address
    address: String,

    /// Server port (1-65535)
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    port: u16,

    /// Username to join with; prompts when omitted
    #[arg(short, long)]
    name: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Server(args) => run_server(args).await,
        Commands::Connect(args) => run_connect(args).await,
    }
}

async fn run_server(args: ServerArgs) -> Result<()> {
    let default_directive = if args.debug {
        "parley=debug,parley_core=debug,info"
    } else {
        "parley=info,parley_core=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let config = ServerConfig::load(args.config.as_deref())?;
    let server = match ChatServer::bind(&config).await {
        Ok(server) => server,
        Err(e) if e.is_fatal() => {
            error!(code = e.error_code(), "{}", e);
            return Err(e).context("Failed to start server");
        }
        Err(e) => return Err(e.into()),
    };
    let addr = server.local_addr()?;
    info!("Server started on port {}", addr.port());
    info!(
        "Accepting up to {} clients (max line {} bytes)",
        config.max_clients, config.max_line_bytes
    );

    let snapshot = server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await;

    match serde_json::to_string(&snapshot) {
        Ok(json) => info!("Final metrics: {}", json),
        Err(e) => error!(error = %e, "failed to serialize metrics"),
    }
    info!("Server stopped");
    Ok(())
}

async fn run_connect(args: ConnectArgs) -> Result<()> {
    // Client output belongs to the user; only warnings go to stderr.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(env_filter)
        .init();

    let stream = TcpStream::connect((args.address.as_str(), args.port))
        .await
        .with_context(|| format!("Connection failed to {}:{}", args.address, args.port))?;
    println!("Successfully connected to server.");

    let mut input = spawn_stdin_reader();
    let username = match args.name {
        Some(name) => resolve_username(Some(&name)),
        None => {
            print!("Enter your username: ");
            io::stdout().flush()?;
            match input.recv().await {
                Some(Ok(line)) => resolve_username(Some(&line)),
                Some(Err(e)) => return Err(e).context("Failed to read username"),
                None => resolve_username(None),
            }
        }
    };

    let exit = run_client(stream, &username, input, TerminalView)
        .await
        .context("Failed to send username")?;

    if exit.is_failure() {
        anyhow::bail!("chat session ended with an error");
    }
    println!("Disconnected.");
    Ok(())
}
