// SPDX-License-Identifier: AGPL-3.0-or-later

//! `logd` binary entry point (§6 CLI): parse flags, load the config
//! file they point at, stand up logging, then hand off to
//! [`gdp::logd::run`].

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use gdp::{
    cfg::{
        cli::{Cli, resolve_config_path},
        config::GdpConfig,
        enums::ExitCode,
        logger::{self, LogConfig},
    },
    channel::{Channel, LoopbackChannel},
    logd::{self as logd_mod, LogdState},
};
use tracing::error;

fn main() {
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("logd: {e:#}");
            ExitCode::Software
        },
    };
    std::process::exit(code.code());
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config_path = resolve_config_path(&cli.config_path.to_string_lossy())
        .unwrap_or_else(|_| cli.config_path.clone());
    let config = GdpConfig::load_from_file(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let log_level = cli.debug_spec.clone().unwrap_or_else(|| "info".to_string());
    let log_config = LogConfig { level: log_level, ..LogConfig::default() };
    let _guard = logger::init_logger(log_config).context("failed to init logger")?;

    let runtime = tokio::runtime::Runtime::new().context("failed to build tokio runtime")?;
    let exit = runtime.block_on(run_async(config));
    Ok(exit)
}

async fn run_async(config: GdpConfig) -> ExitCode {
    std::fs::create_dir_all(&config.storage.log_dir).ok();

    // A real router transport is out of scope; `logd` talks to itself
    // through a loopback channel until one is wired in.
    let channel: Arc<dyn Channel> = Arc::new(LoopbackChannel::new());
    let state = LogdState::new(config, channel);

    let exit = logd_mod::run(state).await;
    if matches!(exit, ExitCode::Software) {
        error!("logd exiting after an abort signal");
    }
    exit
}
