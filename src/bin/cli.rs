//! gridstore CLI
//!
//! Realizes a store from a JSON configuration and runs one operation on it.
//! Mapped stores with a directory and named embedded stores keep their data
//! between invocations.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use gridstore::{BackendConfig, BinaryStore, BuildContext, MappedConfig};
use tracing_subscriber::{fmt, EnvFilter};

/// gridstore CLI
#[derive(Parser, Debug)]
#[command(name = "gridstore-cli")]
#[command(about = "Run operations against a gridstore backend")]
#[command(version)]
struct Args {
    /// Backend configuration (JSON); defaults to a mapped store in --data-dir
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for the default mapped store
    #[arg(short, long, default_value = "./gridstore_data")]
    data_dir: String,

    /// Parameter for ${name} expressions in the configuration (name=value)
    #[arg(short, long = "param", value_parser = parse_param)]
    params: Vec<(String, String)>,

    /// Realize the backend for a paged tier
    #[arg(long)]
    paged: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Store a key-value pair
    Put {
        /// The key to store
        key: String,

        /// The value to store
        value: String,
    },

    /// Erase a key
    Del {
        /// The key to erase
        key: String,
    },

    /// List all keys
    Keys,

    /// Erase every key
    Clear,

    /// Print the effective configuration
    Config,
}

fn parse_param(text: &str) -> Result<(String, String), String> {
    text.split_once('=')
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected name=value, got '{}'", text))
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,gridstore=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        tracing::error!("{}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &args.config {
        Some(path) => BackendConfig::from_path(path)?,
        None => MappedConfig::new().directory(&args.data_dir).into(),
    };

    if let Commands::Config = args.command {
        println!("{}", config.to_json()?);
        return Ok(());
    }

    let ctx = args
        .params
        .iter()
        .fold(BuildContext::new(), |ctx, (name, value)| ctx.param(name, value));

    tracing::info!("gridstore CLI v{} ({} backend)", gridstore::VERSION, config.kind());

    let manager = gridstore::realize(&config, &ctx, args.paged)?;
    let store = manager.create_store()?;

    let outcome = execute(store.as_ref(), &args.command);
    store.close()?;
    outcome
}

fn execute(store: &dyn BinaryStore, command: &Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Get { key } => match store.load(key.as_bytes())? {
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => println!("(nil)"),
        },
        Commands::Put { key, value } => {
            store.store(key.as_bytes(), value.as_bytes())?;
            println!("OK");
        }
        Commands::Del { key } => {
            store.erase(key.as_bytes())?;
            println!("OK");
        }
        Commands::Keys => {
            let mut keys: Vec<_> = store.keys()?.collect();
            keys.sort();
            for key in keys {
                println!("{}", String::from_utf8_lossy(&key));
            }
        }
        Commands::Clear => {
            store.erase_all()?;
            println!("OK");
        }
        Commands::Config => {}
    }
    Ok(())
}
