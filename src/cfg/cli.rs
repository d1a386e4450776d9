// SPDX-License-Identifier: AGPL-3.0-or-later

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;

/// `logd` flags (§6 CLI).
#[derive(Debug, Parser, Clone)]
#[command(name = "logd", about = "GDP log daemon")]
pub struct Cli {
    /// Debug spec, e.g. `request=3,cache=2` (`-D`).
    #[arg(short = 'D', long = "debug")]
    pub debug_spec: Option<String>,

    /// Stay in the foreground instead of daemonizing (`-F`).
    #[arg(short = 'F', long)]
    pub foreground: bool,

    /// Router address to connect the channel adapter to (`-G`).
    #[arg(short = 'G', long = "router")]
    pub router_addr: Option<String>,

    /// Worker thread count (`-n`).
    #[arg(short = 'n', long = "workers")]
    pub workers: Option<usize>,

    /// Self name advertised to the router (`-N`).
    #[arg(short = 'N', long = "name")]
    pub self_name: Option<String>,

    /// Crypto strictness override, comma-separated (`-s`), see
    /// `swarm.gdplogd.crypto.strictness`.
    #[arg(short = 's', long = "strictness")]
    pub strictness: Option<String>,

    /// Path to the `name=value` config file.
    #[arg(short = 'c', long = "config", default_value = "gdplogd.conf")]
    pub config_path: PathBuf,
}

pub fn resolve_config_path(rel: &str) -> Result<PathBuf> {
    let p = Path::new(rel);

    let abs = if p.is_absolute() {
        p.to_path_buf()
    } else {
        std::env::current_dir()
            .context("cannot get current working dir")?
            .join(p)
    };

    let canon = abs
        .canonicalize()
        .with_context(|| format!("failed to canonicalize path {abs:?}"))?;

    Ok(canon)
}
