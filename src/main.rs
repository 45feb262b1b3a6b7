mod cli;
mod domain;
mod infra;
mod logging;
mod server;

use crate::cli::{Cli, CliConfigError};
use crate::server::{ServeError, run_http_server};
use clap::Parser;
use std::io::{self, Write};
use thiserror::Error;

#[derive(Debug, Error)]
enum MainError {
    #[error(transparent)]
    Config(#[from] CliConfigError),

    #[error(transparent)]
    Serve(#[from] ServeError),

    #[error("failed to start runtime: {0}")]
    Runtime(#[from] io::Error),
}

fn main() {
    if let Err(error) = run_main() {
        tracing::error!(error = %error, "ccview exited with an error");
        let mut err = io::stderr().lock();
        let _ = writeln!(err, "{error}");
        std::process::exit(1);
    }
}

fn run_main() -> Result<(), MainError> {
    let cli = Cli::parse();
    logging::init();

    let config = cli.into_server_config()?;
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    rt.block_on(run_http_server(config))?;
    Ok(())
}
