use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use riot_gate::{Config, RiotClient};
use serde::Serialize;
use std::time::Duration;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "riot-gate", version, about = "Rate-limited Riot API client")]
struct Cli {
    /// Platform region, overrides RIOT_REGION
    #[arg(long, global = true)]
    region: Option<String>,

    /// Give up after this long, e.g. "30s" or "2m"
    #[arg(long, global = true, value_parser = parse_duration)]
    timeout: Option<Duration>,

    /// Print per-scope counters when done
    #[arg(long, global = true)]
    stats: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Look up a summoner by id
    Summoner { id: i64 },
    /// Ranked solo queue matches of an account
    Matches {
        account_id: i64,
        /// Epoch milliseconds
        #[arg(long, default_value_t = 0)]
        begin_time: i64,
    },
    /// Summoner ids in the challenger league
    Challengers,
    /// Summoner ids in the master league
    Masters,
    /// Featured games as returned by the server
    Featured,
    /// Champion static data
    Champions,
    /// Raw JSON for a path under /lol
    Get { path: String },
}

fn parse_duration(value: &str) -> std::result::Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(value).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(region) = &cli.region {
        config.region = region.clone();
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("riot_gate={}", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::debug!("Configuration: {:?}", config);

    let client = RiotClient::new(&config).context("Failed to create client")?;

    let token = client.cancellation_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        token.cancel();
    });

    if let Some(timeout) = cli.timeout {
        let token = client.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            tracing::warn!("Timed out after {}", humantime_serde::re::humantime::format_duration(timeout));
            token.cancel();
        });
    }

    let result = run(&client, cli.command).await;

    if cli.stats {
        let metrics = client.metrics().all().await;
        eprintln!("{}", serde_json::to_string_pretty(&metrics)?);
    }

    client.shutdown().await;
    result
}

async fn run(client: &RiotClient, command: Command) -> Result<()> {
    match command {
        Command::Summoner { id } => print(&client.summoner(id).await?),
        Command::Matches {
            account_id,
            begin_time,
        } => print(&client.match_list(account_id, begin_time).await?),
        Command::Challengers => print(&client.challenger_ids().await?),
        Command::Masters => print(&client.master_ids().await?),
        Command::Featured => {
            match client.featured_games().await? {
                Some(body) => println!("{}", body),
                None => println!("null"),
            }
            Ok(())
        }
        Command::Champions => print(&client.champions().await?),
        Command::Get { path } => print(&client.get(&path).await?),
    }
}

fn print<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, cancelling pending requests");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, cancelling pending requests");
        },
    }
}
