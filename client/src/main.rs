use std::sync::Arc;

use anyhow::{anyhow, Context};
use bridge_bus::Hub;
use bridge_common::{BridgeConfig, Bundle, ENV_KEY};
use bridge_host::{
    capture_cockpit_env, AssetCache, FileStore, HttpAssetProvider, KeyValueStore, MemoryStore,
    Registry, Responder,
};
use bridge_worker::{BundleLoader, EnvLoader, Requester};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Runs one bridge call between an in-process host and worker.
#[derive(Parser)]
#[command(name = "bridge-client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check that a host answers.
    Ping,
    /// Read a stored value.
    Get { key: String },
    /// Store a value.
    Set { key: String, value: String },
    /// Delete a stored value.
    Remove { key: String },
    /// List stored keys.
    Keys,
    /// Fetch a bundle (bpmn-moddle, dmn-moddle, bpmn-js-differ).
    Bundle {
        name: String,
        /// Print the evaluable wrapper instead of the raw source.
        #[arg(long)]
        script: bool,
    },
    /// Store a cockpit environment record, as the cockpit window would post it.
    Capture {
        /// Page location the message was received at.
        location: String,
        /// JSON object sent by the cockpit.
        data: String,
    },
    /// Print the environment a worker sees.
    Env,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = BridgeConfig::from_env()?;
    info!(channel = %config.channel, asset_url = %config.asset_url, "starting bridge");

    let store: Arc<dyn KeyValueStore> = match &config.store_path {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating store directory {dir:?}"))?;
            Arc::new(FileStore::open(FileStore::origin_file(dir, &config.origin))?)
        }
        None => Arc::new(MemoryStore::new()),
    };

    let hub = Hub::new(config.channel_capacity);
    let assets = Arc::new(AssetCache::new(Arc::new(HttpAssetProvider::new(
        config.asset_url.as_str(),
    ))));
    let _host =
        Responder::new(Registry::standard(assets, Arc::clone(&store))).attach(&hub, &config.channel);
    let requester = Requester::from_config(&hub, &config);

    match cli.command {
        Command::Ping => {
            requester.ping().await?;
            println!("pong");
        }
        Command::Get { key } => match requester.get_localstorage(&key).await? {
            Some(value) => println!("{value}"),
            None => println!("null"),
        },
        Command::Set { key, value } => {
            requester.set_localstorage(&key, &value).await?;
        }
        Command::Remove { key } => {
            requester.remove_localstorage(&key).await?;
        }
        Command::Keys => {
            for key in requester.get_localstorage_keys().await? {
                println!("{key}");
            }
        }
        Command::Bundle { name, script } => {
            let bundle = Bundle::from_name(&name).ok_or_else(|| anyhow!("unknown bundle {name}"))?;
            let loaded = BundleLoader::new().load(&requester, bundle).await?;
            if script {
                print!("{}", loaded.script());
            } else {
                print!("{}", loaded.source);
            }
        }
        Command::Capture { location, data } => {
            let data: serde_json::Value = serde_json::from_str(&data).context("parsing data")?;
            if !capture_cockpit_env(&location, &config.origin, &data, store.as_ref())? {
                return Err(anyhow!("message from {location} not accepted for {}", config.origin));
            }
            println!("{}", store.get(ENV_KEY).unwrap_or_default());
        }
        Command::Env => {
            let loader = EnvLoader::new();
            for (name, value) in loader.load(&requester).await?.iter() {
                println!("{name}={value}");
            }
        }
    }
    Ok(())
}
