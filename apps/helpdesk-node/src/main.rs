use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use helpdesk_consumer::{
    spawn_consumer, ConnectionStatus, ConsumerConfig, HttpTransport, TokioTimer,
};
use helpdesk_delivery::{serve, DeliveryConfig, SubscriptionRegistry, SupportService};
use helpdesk_store::{Role, StoreConfig, SupportStore};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Helpdesk conversation server and stream client",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the conversation API and delivery channel server
    Serve(ServeArgs),
    /// Follow a conversation's live stream
    Watch(WatchArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "HELPDESK_BIND", default_value = "127.0.0.1:3000")]
    bind: SocketAddr,

    /// SQLite database file
    #[arg(long, env = "HELPDESK_DB", default_value = "helpdesk.db")]
    db: PathBuf,

    /// Interval between heartbeat events (e.g. "30s")
    #[arg(
        long,
        env = "HELPDESK_HEARTBEAT",
        default_value = "30s",
        value_parser = humantime::parse_duration
    )]
    heartbeat: Duration,

    /// Messages replayed when a stream opens
    #[arg(long, env = "HELPDESK_HISTORY_WINDOW", default_value = "50")]
    history_window: u64,
}

#[derive(Args, Debug)]
struct WatchArgs {
    /// Server base URL
    #[arg(long, default_value = "http://127.0.0.1:3000")]
    server: String,

    /// Conversation to follow
    #[arg(short, long)]
    conversation: String,

    /// Caller identity forwarded as x-user-id
    #[arg(short, long)]
    user: String,

    /// Caller role: admin, team or client
    #[arg(short, long, default_value = "client")]
    role: Role,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();

    match Cli::parse().command {
        Command::Serve(args) => run_server(args).await,
        Command::Watch(args) => run_watch(args).await,
    }
}

async fn run_server(args: ServeArgs) -> Result<()> {
    let store = SupportStore::new(StoreConfig {
        db_path: args.db.clone(),
    })
    .await
    .with_context(|| format!("Failed to open database {}", args.db.display()))?;

    let config = DeliveryConfig {
        heartbeat_interval: args.heartbeat,
        history_window: args.history_window,
        ..DeliveryConfig::default()
    };
    let service = Arc::new(SupportService::new(
        Arc::new(store),
        Arc::new(SubscriptionRegistry::new()),
        config,
    ));

    let listener = TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("Failed to bind {}", args.bind))?;

    serve(listener, service, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Received Ctrl+C, initiating shutdown");
    })
    .await?;

    info!("Server stopped");
    Ok(())
}

async fn run_watch(args: WatchArgs) -> Result<()> {
    let transport = HttpTransport::new(&args.server, &args.conversation, &args.user, args.role);
    info!("Following {}", transport.url());

    let handle = spawn_consumer(ConsumerConfig::default(), transport, TokioTimer);
    let mut status = handle.status_receiver();
    let mut messages = handle.messages_receiver();
    let mut printed = HashSet::new();
    handle.connect()?;

    let outcome = loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let current = status.borrow_and_update().clone();
                println!("[{}]", current);
                if let ConnectionStatus::Failed(reason) = current {
                    break Err(reason);
                }
            }
            changed = messages.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                for message in messages.borrow_and_update().iter() {
                    if printed.insert(message.id.clone()) {
                        let note = if message.is_internal_note { " (internal)" } else { "" };
                        println!(
                            "{} {}{}: {}",
                            message.created_at.format("%H:%M:%S"),
                            message.sender_id,
                            note,
                            message.content
                        );
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, disconnecting");
                break Ok(());
            }
        }
    };

    handle.shutdown().await;
    if let Err(reason) = outcome {
        bail!("{}", reason);
    }
    Ok(())
}
