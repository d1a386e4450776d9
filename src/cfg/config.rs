// SPDX-License-Identifier: AGPL-3.0-or-later

use std::{collections::HashMap, fs, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};

use crate::{cfg::enums::WorkerRouting, datum::Strictness, storage::sqlite::PragmaConfig};

/// A hierarchical `name=value` parameter store (§6 "Configuration"),
/// loaded from a file named after the program with an optional
/// major/minor version suffix (e.g. `gdplogd.1.0`). Dotted key segments
/// (`swarm.gdplogd.log.dir`) are a naming convention only — the store
/// itself is flat.
#[derive(Debug, Clone, Default)]
pub struct ParamTable(HashMap<String, String>);

impl ParamTable {
    pub fn parse(text: &str) -> Self {
        let mut map = HashMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                map.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
        ParamTable(map)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read config file {}", path.as_ref().display()))?;
        Ok(Self::parse(&text))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    pub fn get_i64(&self, key: &str, default: i64) -> Result<i64> {
        match self.get(key) {
            Some(v) => v.parse().with_context(|| format!("{key} is not an integer")),
            None => Ok(default),
        }
    }

    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        match self.get(key) {
            Some(v) => match v.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(true),
                "false" | "no" | "0" => Ok(false),
                other => anyhow::bail!("{key} is not a boolean: {other}"),
            },
            None => Ok(default),
        }
    }

    pub fn get_duration_ms(&self, key: &str, default: Duration) -> Result<Duration> {
        match self.get(key) {
            Some(v) => Ok(Duration::from_millis(
                v.parse().with_context(|| format!("{key} is not a millisecond count"))?,
            )),
            None => Ok(default),
        }
    }

    pub fn get_duration_secs(&self, key: &str, default: Duration) -> Result<Duration> {
        match self.get(key) {
            Some(v) => Ok(Duration::from_secs(
                v.parse().with_context(|| format!("{key} is not a second count"))?,
            )),
            None => Ok(default),
        }
    }

    pub fn get_duration_micros(&self, key: &str, default: Duration) -> Result<Duration> {
        match self.get(key) {
            Some(v) => Ok(Duration::from_micros(
                v.parse().with_context(|| format!("{key} is not a microsecond count"))?,
            )),
            None => Ok(default),
        }
    }

    /// Every entry whose key starts with `prefix.`, with the prefix
    /// stripped (used for `swarm.gdplogd.sqlite.pragma.*`).
    pub fn subtable(&self, prefix: &str) -> HashMap<String, String> {
        let needle = format!("{prefix}.");
        self.0
            .iter()
            .filter_map(|(k, v)| k.strip_prefix(&needle).map(|rest| (rest.to_string(), v.clone())))
            .collect()
    }
}

/// On-disk layout knobs (§6 `swarm.gdp.data.root`, `swarm.gdplogd.gob.mode`,
/// `swarm.gdplogd.sqlite.pragma.*`).
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub log_dir: std::path::PathBuf,
    pub gob_mode: u32,
    pub pragmas: PragmaConfig,
}

/// Synchronous RPC knobs (§6 `swarm.gdp.invoke.{timeout,retries,retrydelay}`).
#[derive(Debug, Clone, Copy)]
pub struct InvokeConfig {
    pub timeout: Duration,
    pub retries: u32,
    pub retry_delay: Duration,
}

impl Default for InvokeConfig {
    fn default() -> Self {
        InvokeConfig {
            timeout: Duration::from_millis(10_000),
            retries: 3,
            retry_delay: Duration::from_millis(250),
        }
    }
}

/// Subscription lease knobs (§6 `swarm.gdp.subscr.{timeout,refresh,pokeintvl}`).
#[derive(Debug, Clone, Copy)]
pub struct SubscrConfig {
    pub timeout: Duration,
    pub refresh: Duration,
    pub poke_interval: Duration,
}

impl Default for SubscrConfig {
    fn default() -> Self {
        SubscrConfig {
            timeout: Duration::from_secs(300),
            refresh: Duration::from_secs(60),
            poke_interval: Duration::from_secs(120),
        }
    }
}

/// Maturity windows (§6 `swarm.gdp.event.timeout.{data,done}`).
#[derive(Debug, Clone, Copy)]
pub struct EventConfig {
    pub data_timeout: Duration,
    pub done_timeout: Duration,
}

impl Default for EventConfig {
    fn default() -> Self {
        EventConfig {
            data_timeout: Duration::from_millis(100),
            done_timeout: Duration::from_millis(250),
        }
    }
}

/// Cache reclamation cadence (§6 `swarm.gdp.reclaim.{interval,age}`).
#[derive(Debug, Clone, Copy)]
pub struct ReclaimConfig {
    pub interval: Duration,
    pub age: Duration,
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        ReclaimConfig {
            interval: Duration::from_secs(60),
            age: Duration::from_secs(900),
        }
    }
}

/// Key creation/storage knobs (§6 `swarm.gdp.crypto.*`).
#[derive(Debug, Clone)]
pub struct CryptoConfig {
    pub key_dir: std::path::PathBuf,
    pub key_mode: u32,
    pub key_exclusive: bool,
    pub strictness: Strictness,
}

/// Advertise pacing (§6 `swarm.gdplogd.advertise.{delay,interval}`).
#[derive(Debug, Clone, Copy)]
pub struct AdvertiseConfig {
    pub delay: Duration,
    pub interval: Duration,
}

impl Default for AdvertiseConfig {
    fn default() -> Self {
        AdvertiseConfig {
            delay: Duration::from_micros(50_000),
            interval: Duration::from_secs(30),
        }
    }
}

/// Worker-pool routing (§6 `swarm.gdp.{command,response}.runinthread`).
#[derive(Debug, Clone, Copy)]
pub struct DispatchConfig {
    pub command_routing: WorkerRouting,
    pub response_routing: WorkerRouting,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfig {
            command_routing: WorkerRouting::Pool,
            response_routing: WorkerRouting::MainThread,
        }
    }
}

/// Record-number anomaly forgiveness (§6
/// `swarm.gdplogd.sequencing.{allowgaps,allowdups}`).
#[derive(Debug, Clone, Copy, Default)]
pub struct SequencingConfig {
    pub allow_gaps: bool,
    pub allow_dups: bool,
}

/// The fully-resolved, typed configuration consumed by `logd` and by
/// library callers embedding the core directly.
#[derive(Debug, Clone)]
pub struct GdpConfig {
    pub storage: StorageConfig,
    pub invoke: InvokeConfig,
    pub subscr: SubscrConfig,
    pub event: EventConfig,
    pub reclaim: ReclaimConfig,
    pub crypto: CryptoConfig,
    pub advertise: AdvertiseConfig,
    pub dispatch: DispatchConfig,
    pub sequencing: SequencingConfig,
}

impl GdpConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let params = ParamTable::load_from_file(path)?;
        Self::from_params(&params)
    }

    pub fn from_params(params: &ParamTable) -> Result<Self> {
        let pragma_overrides = params.subtable("swarm.gdplogd.sqlite.pragma");
        let mut pragmas = PragmaConfig::default();
        if let Some(v) = pragma_overrides.get("synchronous") {
            pragmas.synchronous = v.clone();
        }
        if let Some(v) = pragma_overrides.get("journal_mode") {
            pragmas.journal_mode = v.clone();
        }
        if let Some(v) = pragma_overrides.get("page_size") {
            pragmas.page_size = v.parse().context("pragma.page_size is not an integer")?;
        }
        if let Some(v) = pragma_overrides.get("cache_size") {
            pragmas.cache_size = v.parse().context("pragma.cache_size is not an integer")?;
        }
        if let Some(v) = pragma_overrides.get("journal_size_limit") {
            pragmas.journal_size_limit = v
                .parse()
                .context("pragma.journal_size_limit is not an integer")?;
        }
        if let Some(v) = pragma_overrides.get("busy_timeout_ms") {
            pragmas.busy_timeout_ms = v.parse().context("pragma.busy_timeout_ms is not an integer")?;
        }
        if let Some(v) = pragma_overrides.get("temp_store") {
            pragmas.temp_store = v.clone();
        }
        if let Some(v) = pragma_overrides.get("locking_mode") {
            pragmas.locking_mode = v.clone();
        }

        let strictness_tokens = params.get_or("swarm.gdplogd.crypto.strictness", "");
        let mut strictness = Strictness::empty();
        for token in strictness_tokens.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            strictness |= match token {
                "verify" => Strictness::MUST_VERIFY_IF_PRESENT,
                "required" => Strictness::REQUIRE_SIG_IF_PUBKEY,
                "pubkey" => Strictness::REQUIRE_PUBKEY,
                other => anyhow::bail!("unknown crypto strictness token: {other}"),
            };
        }

        let cfg = GdpConfig {
            storage: StorageConfig {
                log_dir: params
                    .get("swarm.gdplogd.log.dir")
                    .or_else(|| params.get("swarm.gdp.data.root"))
                    .unwrap_or("/var/lib/gdp")
                    .into(),
                gob_mode: u32::from_str_radix(&params.get_or("swarm.gdplogd.gob.mode", "640"), 8)
                    .context("swarm.gdplogd.gob.mode is not an octal mode")?,
                pragmas,
            },
            invoke: InvokeConfig {
                timeout: params.get_duration_ms("swarm.gdp.invoke.timeout", InvokeConfig::default().timeout)?,
                retries: params.get_i64("swarm.gdp.invoke.retries", 3)? as u32,
                retry_delay: params
                    .get_duration_ms("swarm.gdp.invoke.retrydelay", InvokeConfig::default().retry_delay)?,
            },
            subscr: SubscrConfig {
                timeout: params.get_duration_secs("swarm.gdp.subscr.timeout", SubscrConfig::default().timeout)?,
                refresh: params.get_duration_secs("swarm.gdp.subscr.refresh", SubscrConfig::default().refresh)?,
                poke_interval: params
                    .get_duration_secs("swarm.gdp.subscr.pokeintvl", SubscrConfig::default().poke_interval)?,
            },
            event: EventConfig {
                data_timeout: params
                    .get_duration_micros("swarm.gdp.event.timeout.data", EventConfig::default().data_timeout)?,
                done_timeout: params
                    .get_duration_micros("swarm.gdp.event.timeout.done", EventConfig::default().done_timeout)?,
            },
            reclaim: ReclaimConfig {
                interval: params
                    .get_duration_secs("swarm.gdp.reclaim.interval", ReclaimConfig::default().interval)?,
                age: params.get_duration_secs("swarm.gdp.reclaim.age", ReclaimConfig::default().age)?,
            },
            crypto: CryptoConfig {
                key_dir: params.get_or("swarm.gdp.crypto.key.dir", "/var/lib/gdp/keys").into(),
                key_mode: u32::from_str_radix(&params.get_or("swarm.gdp.crypto.key.mode", "400"), 8)
                    .context("swarm.gdp.crypto.key.mode is not an octal mode")?,
                key_exclusive: params.get_bool("swarm.gdp.crypto.key.exclusive", true)?,
                strictness,
            },
            advertise: AdvertiseConfig {
                delay: params
                    .get_duration_micros("swarm.gdplogd.advertise.delay", AdvertiseConfig::default().delay)?,
                interval: params
                    .get_duration_secs("swarm.gdplogd.advertise.interval", AdvertiseConfig::default().interval)?,
            },
            dispatch: DispatchConfig {
                command_routing: if params.get_bool("swarm.gdp.command.runinthread", true)? {
                    WorkerRouting::Pool
                } else {
                    WorkerRouting::MainThread
                },
                response_routing: if params.get_bool("swarm.gdp.response.runinthread", false)? {
                    WorkerRouting::Pool
                } else {
                    WorkerRouting::MainThread
                },
            },
            sequencing: SequencingConfig {
                allow_gaps: params.get_bool("swarm.gdplogd.sequencing.allowgaps", false)?,
                allow_dups: params.get_bool("swarm.gdplogd.sequencing.allowdups", true)?,
            },
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.invoke.retries <= 64, "invoke.retries unreasonably large");
        ensure!(!self.storage.log_dir.as_os_str().is_empty(), "log.dir must not be empty");
        ensure!(self.crypto.key_mode <= 0o777, "crypto.key.mode must be a valid file mode");
        Ok(())
    }
}
