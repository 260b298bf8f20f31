// src/bin/managed_store_cli.rs

use std::sync::Arc;
use std::time::Duration;
use structopt::StructOpt;
use tokio::time;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use managed_store::client::install_global;
use managed_store::config::RedisStoreConfig;
use managed_store::logging::init_with as init_logging_with;
use managed_store::storage::{MemoryConnector, MemoryStore, RedisConnector};
use managed_store::{
    ClientConfig, ClientRegistry, Connector, LogFormat, ManagedClient, Operation,
};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "managed_store_cli",
    about = "Drive a managed document store client from the command line"
)]
struct Opt {
    /// Redis URL (falls back to REDIS_URL, then localhost)
    #[structopt(long)]
    redis_url: Option<String>,

    /// Namespace prepended to every document path
    #[structopt(long, default_value = "docs")]
    prefix: String,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,

    /// Disable logs
    #[structopt(long)]
    disable_logs: bool,

    /// Emit JSON log lines filtered by RUST_LOG instead of --verbose
    #[structopt(long)]
    json_logs: bool,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Print a document
    Get { path: String },
    /// Create or replace a document
    Put { path: String, value: String },
    /// Replace an existing document
    Update { path: String, value: String },
    /// Delete a document
    Delete { path: String },
    /// Buffer writes through a simulated outage on an in-memory store
    Simulate {
        /// Number of writes submitted during the outage
        #[structopt(short = "n", long, default_value = "5")]
        operations: usize,

        /// How long the store stays down, in milliseconds
        #[structopt(long, default_value = "2000")]
        outage_ms: u64,

        /// Health check interval for the simulated client, in milliseconds
        #[structopt(long, default_value = "250")]
        interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env file is fine
    dotenv::dotenv().ok();
    let opt = Opt::from_args();

    if opt.json_logs {
        init_logging_with(LogFormat::Json);
    } else {
        let log_level = if opt.disable_logs {
            "error"
        } else {
            match opt.verbose {
                0 => "info",
                1 => "debug",
                _ => "trace",
            }
        };
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::new(format!(
                "managed_store_cli={},managed_store={}",
                log_level, log_level
            )))
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    let config = ClientConfig::from_env()?;

    match opt.command {
        Command::Simulate {
            operations,
            outage_ms,
            interval_ms,
        } => {
            let config = ClientConfig {
                health_check_interval: Duration::from_millis(interval_ms.max(1)),
                ..config
            };
            simulate_outage(config, operations, Duration::from_millis(outage_ms)).await
        }
        command => {
            let url = opt
                .redis_url
                .or_else(|| std::env::var("REDIS_URL").ok())
                .unwrap_or_else(|| "redis://127.0.0.1:6379".to_string());
            let redis_config = RedisStoreConfig {
                key_prefix: opt.prefix,
                ..RedisStoreConfig::new(url)
            };
            run_redis_command(config, redis_config, command).await
        }
    }
}

async fn run_redis_command(
    config: ClientConfig,
    redis_config: RedisStoreConfig,
    command: Command,
) -> Result<(), Box<dyn std::error::Error>> {
    let registry = install_global(ClientRegistry::new(config, move || {
        Arc::new(RedisConnector::new(redis_config.clone())) as Arc<dyn Connector>
    })?)?;
    let client = registry.get_instance().await?;

    let outcome = match command {
        Command::Get { path } => client.read(&path).await.map(|doc| match doc {
            Some(bytes) => println!("{}", String::from_utf8_lossy(&bytes)),
            None => println!("(not found)"),
        }),
        Command::Put { path, value } => client
            .write(&path, value.into_bytes())
            .await
            .map(|_| println!("OK")),
        Command::Update { path, value } => client
            .update(&path, value.into_bytes())
            .await
            .map(|_| println!("OK")),
        Command::Delete { path } => client.delete(&path).await.map(|existed| {
            if existed {
                println!("deleted");
            } else {
                println!("(not found)");
            }
        }),
        Command::Simulate { .. } => Ok(()),
    };

    registry.shutdown().await;
    outcome.map_err(Into::into)
}

// Knock the store over, buffer writes, bring it back and report what happened
async fn simulate_outage(
    config: ClientConfig,
    operations: usize,
    outage: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let interval = config.health_check_interval;
    let store = MemoryStore::new();
    let client = ManagedClient::builder(Arc::new(MemoryConnector::new(store.clone())))
        .config(config)
        .build()?;
    client.start().await;
    info!(state = %client.state(), "Simulated client started");

    store.set_available(false);
    warn!(outage_ms = outage.as_millis() as u64, "Store is down");
    // give the health check a chance to notice
    time::sleep(interval * 2).await;

    let mut completions = Vec::with_capacity(operations);
    for i in 0..operations {
        let path = format!("simulated/{}", i);
        let payload = format!("{{\"seq\":{}}}", i);
        match client.submit_async(Operation::write(path, payload.into_bytes())) {
            Ok(completion) => completions.push(completion),
            Err(e) => warn!(error = %e, seq = i, "Submission rejected"),
        }
    }
    println!(
        "Buffered {} operations while {}",
        completions.len(),
        client.state()
    );

    time::sleep(outage).await;
    store.set_available(true);
    info!("Store is back");

    let settle_within = interval * 4 + outage;
    match time::timeout(settle_within, futures::future::join_all(completions)).await {
        Ok(results) => {
            let failed = results.iter().filter(|r| r.is_err()).count();
            println!(
                "{} operations completed, {} failed",
                results.len() - failed,
                failed
            );
        }
        Err(_) => println!("Operations still pending after {:?}", settle_within),
    }

    println!("Applied in order: {:?}", store.journal());
    println!("{}", serde_json::to_string_pretty(&client.stats())?);

    client.shutdown().await;
    Ok(())
}
