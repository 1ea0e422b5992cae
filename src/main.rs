use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use leasehold::{Config, DhcpServer, Leases, LocalNames, Result};

#[derive(Parser)]
#[command(name = "leasehold")]
#[command(author, version, about = "A DHCP server with persistent leases", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve DHCP until interrupted
    Run,
    /// Print the effective configuration
    ShowConfig,
    /// Print the persisted lease table
    ListLeases,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = Config::load_or_create(&cli.config).await?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            info!("Starting DHCP server with config: {:?}", cli.config);
            let server = DhcpServer::new(config).await?;

            tokio::select! {
                result = server.run() => result,
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal, stopping server...");
                    if let Err(error) = server.save_leases().await {
                        tracing::error!("Failed to save leases on shutdown: {}", error);
                    }
                    Ok(())
                }
            }
        }
        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::ListLeases => {
            let leases = Leases::new(Arc::new(config), Arc::new(LocalNames)).await?;
            let store = leases.snapshot();
            let now = Utc::now();

            let mut printed = 0;
            for lease in store.by_ip.values().flatten() {
                if printed == 0 {
                    println!(
                        "{:<16} {:<24} {:<10} {:<24} {:<10}",
                        "IP Address", "Client ID", "State", "Expires At", "Remaining"
                    );
                    println!("{}", "-".repeat(88));
                }
                printed += 1;

                let state = if lease.is_confirmed { "confirmed" } else { "offered" };
                let remaining = lease.remaining_seconds_at(now);
                let remaining_str = if remaining > 0 {
                    format!("{}s", remaining)
                } else {
                    "expired".to_string()
                };

                println!(
                    "{:<16} {:<24} {:<10} {:<24} {:<10}",
                    lease.ip_address,
                    lease.client_id.as_deref().unwrap_or("-"),
                    state,
                    lease.lease_expiration.format("%Y-%m-%d %H:%M:%S UTC"),
                    remaining_str
                );
                if let Some(hostname) = lease.effective_hostname() {
                    println!("{:<16} hostname {}", "", hostname);
                }
            }

            if printed == 0 {
                println!("No leases.");
            }
            Ok(())
        }
    }
}
