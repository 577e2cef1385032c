use std::path::PathBuf;
use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use styx_compat::{Derivation, StorePath};
use styx_dispatch::{queue, store, Broker, DispatchConfig, Worker};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// A global log level to use when printing logs.
    /// It's also possible to set `RUST_LOG` according to
    /// `tracing_subscriber::filter::EnvFilter`, which will always
    /// have priority.
    #[arg(long, default_value_t = Level::INFO)]
    log_level: Level,

    /// Path to a JSON file with dispatch options (queue name, region,
    /// compression, ...). Missing options take their defaults.
    #[arg(long, env)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the worker loop: lease builds off the shared queue,
    /// perform them through the local store, and report results.
    Worker {
        #[arg(long, env, default_value = "memory://")]
        queue_addr: String,

        /// The staging store inputs come from and outputs go to.
        #[arg(long, env, default_value = "memory://")]
        remote_addr: String,

        /// The store performing the actual builds.
        #[arg(long, env, default_value = "memory://")]
        local_addr: String,
    },

    /// Dispatch one derivation to the worker pool and print its
    /// result.
    Build {
        /// Path of a file containing the derivation as JSON.
        #[arg(long)]
        drv: PathBuf,

        /// The store path naming the derivation.
        #[arg(long)]
        drv_path: String,

        #[arg(long, env, default_value = "memory://")]
        queue_addr: String,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<DispatchConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(serde_json::from_slice(&std::fs::read(path)?)?),
        None => Ok(DispatchConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer().with_filter(
                EnvFilter::builder()
                    .with_default_directive(cli.log_level.into())
                    .from_env()?,
            ),
        )
        .try_init()?;

    styx_dispatch::init();

    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Worker {
            queue_addr,
            remote_addr,
            local_addr,
        } => {
            let queue = queue::from_addr(&queue_addr, &config)?;
            let remote = store::from_addr(&remote_addr, &config)?;
            let local = store::from_addr(&local_addr, &config)?;

            Worker::new(queue, remote, local, config).run().await?;
        }

        Commands::Build {
            drv,
            drv_path,
            queue_addr,
        } => {
            let drv_path = StorePath::from_str(&drv_path)?;
            let derivation: Derivation = serde_json::from_slice(&std::fs::read(&drv)?)?;

            let queue = queue::from_addr(&queue_addr, &config)?;
            let broker = Broker::new(queue, &config);

            info!(drv_path = %drv_path, "dispatching build");
            let result = broker.build_derivation(&drv_path, &derivation).await?;
            println!("{}", result.to_wire());
        }
    }

    Ok(())
}
