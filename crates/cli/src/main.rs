use clap::Parser;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use testbench_config::{ConfigLoader, ConfigOverrides, FingerprintMode};
use testbench_core::Error;
use tokio::sync::watch;

mod commands;
mod execute;

use commands::Commands;

#[derive(Parser)]
#[command(name = "testbench")]
#[command(about = "Build environment images and run tests in them against leased clusters", long_about = None)]
#[command(version)]
struct Cli {
    /// Directory holding the environment descriptors
    #[arg(short = 'C', long, global = true, value_name = "DIR")]
    descriptor_dir: Option<PathBuf>,

    /// Directory for images, claims and results
    #[arg(short, long, global = true, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// How image staleness is detected
    #[arg(long, global = true, value_parser = ["content", "file-list"])]
    fingerprint: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn overrides(&self) -> testbench_core::Result<ConfigOverrides> {
        let mut overrides = self.command.overrides();
        overrides.descriptor_dir = self.descriptor_dir.clone();
        overrides.output_dir = self.output_dir.clone();
        overrides.fingerprint_mode = self
            .fingerprint
            .as_deref()
            .map(str::parse::<FingerprintMode>)
            .transpose()?;
        Ok(overrides)
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    testbench_utils::tracing::init(cli.verbose)
        .map_err(|e| eyre::eyre!("failed to initialize logging: {e}"))?;

    let config = ConfigLoader::new().overrides(cli.overrides()?).load()?;

    // Ctrl-C stops scheduling and releases the leases of in-flight environments
    let (stop, interrupt) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("received Ctrl-C, stopping");
            let _ = stop.send(true);
        }
    });

    match cli.command.execute(Arc::new(config), interrupt).await {
        Ok(0) => Ok(()),
        Ok(code) => process::exit(code),
        Err(e @ (Error::Interrupted | Error::MissingCommand)) => {
            eprintln!("testbench: {e}");
            process::exit(e.exit_code())
        }
        Err(e) => Err(e.into()),
    }
}
