use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use respool_manager::{ConfigSource, IdleWorkerFactory, Pool, PoolEnv};

/// Worker-pool supervisor daemon.
///
/// Runs the pool master with the bundled idle worker, which sleeps at the
/// polling interval until shut down; useful for operating and smoke-testing
/// pool behavior. Real deployments embed `respool-manager` and supply their
/// own worker factory.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Pool configuration file (YAML); discovered if omitted
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Environment name for the config overlay (overrides RACK_ENV et al.)
    #[arg(short, long, value_name = "NAME")]
    environment: Option<String>,

    /// Pool name, shown in worker process titles
    #[arg(long, value_name = "NAME", default_value = "default")]
    pool_name: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    initialize_logging(args.debug);

    info!("Starting resque-pool master");

    let mut env = PoolEnv::from_env();
    if args.environment.is_some() {
        env.environment = args.environment.clone();
    }
    if let Some(name) = &env.environment {
        info!("Environment: {}", name);
    }

    let source = match args.config {
        Some(path) => ConfigSource::Path(path),
        None => ConfigSource::discover().context(
            "no pool configuration found (tried RESQUE_POOL_CONFIG, \
             resque-pool.yml, config/resque-pool.yml)",
        )?,
    };

    let mut pool = Pool::new(source, Arc::new(IdleWorkerFactory))
        .with_env(env)
        .with_name(&args.pool_name);

    pool.run().context("pool master terminated with an error")?;

    info!("resque-pool master exited cleanly");
    Ok(())
}

fn initialize_logging(debug: bool) {
    let level = if debug { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_target(false)
        .init();
}
