//! `target-redshift` binary.
//!
//! Reads messages from standard input, loads their records into the warehouse and writes the
//! checkpoints covering loaded records to standard output. Logs go to standard error.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use config::load_config;
use config::shared::TargetConfig;
use telemetry::init_tracing;
use tracing::{error, warn};

use crate::core::run_target;
use crate::error::{TargetError, TargetResult};

mod core;
mod error;

#[derive(Parser)]
#[command(name = "target-redshift", about = "Loads tap output into Amazon Redshift")]
struct Args {
    /// Path to the JSON or YAML configuration file.
    #[arg(short, long)]
    config: PathBuf,
}

fn main() -> ExitCode {
    match try_main() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            eprint!("{}", err.render_report());
            ExitCode::FAILURE
        }
    }
}

fn try_main() -> TargetResult<()> {
    let args = Args::parse();

    let config: TargetConfig = load_config(&args.config).map_err(TargetError::config)?;
    config.validate().map_err(TargetError::config)?;

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME")).map_err(TargetError::config)?;
    install_crypto_provider();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run_target(config))?;

    Ok(())
}

/// Installs the AWS LC provider as the process-wide rustls crypto provider.
///
/// Feature unification can enable several providers, in which case rustls cannot pick one.
fn install_crypto_provider() {
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        warn!("a rustls crypto provider was already installed");
    }
}
