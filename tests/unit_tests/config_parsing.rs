use std::time::Duration;

use gdp::cfg::{config::{GdpConfig, ParamTable}, enums::WorkerRouting};

#[test]
fn a_populated_config_file_resolves_every_section() {
    let text = "\
# gdplogd.conf
swarm.gdplogd.log.dir = /srv/gdp/logs\n\
swarm.gdplogd.gob.mode = 600\n\
swarm.gdp.invoke.timeout = 5000\n\
swarm.gdp.invoke.retries = 5\n\
swarm.gdp.subscr.timeout = 120\n\
swarm.gdp.reclaim.interval = 30\n\
swarm.gdp.reclaim.age = 600\n\
swarm.gdp.crypto.key.dir = /srv/gdp/keys\n\
swarm.gdp.crypto.strictness = verify,pubkey\n\
swarm.gdplogd.advertise.interval = 10\n\
swarm.gdp.command.runinthread = false\n\
swarm.gdplogd.sequencing.allowgaps = true\n\
swarm.gdplogd.sqlite.pragma.synchronous = FULL\n\
swarm.gdplogd.sqlite.pragma.busy_timeout_ms = 2500\n";

    let params = ParamTable::parse(text);
    let cfg = GdpConfig::from_params(&params).expect("config must resolve");

    assert_eq!(cfg.storage.log_dir, std::path::PathBuf::from("/srv/gdp/logs"));
    assert_eq!(cfg.storage.gob_mode, 0o600);
    assert_eq!(cfg.invoke.timeout, Duration::from_millis(5000));
    assert_eq!(cfg.invoke.retries, 5);
    assert_eq!(cfg.subscr.timeout, Duration::from_secs(120));
    assert_eq!(cfg.reclaim.interval, Duration::from_secs(30));
    assert_eq!(cfg.reclaim.age, Duration::from_secs(600));
    assert_eq!(cfg.crypto.key_dir, std::path::PathBuf::from("/srv/gdp/keys"));
    assert_eq!(cfg.advertise.interval, Duration::from_secs(10));
    assert_eq!(cfg.dispatch.command_routing, WorkerRouting::MainThread);
    assert!(cfg.sequencing.allow_gaps);
    assert_eq!(cfg.storage.pragmas.synchronous, "FULL");
    assert_eq!(cfg.storage.pragmas.busy_timeout_ms, 2500);
}

#[test]
fn falls_back_to_data_root_when_log_dir_is_unset() {
    let params = ParamTable::parse("swarm.gdp.data.root = /data/gdp\n");
    let cfg = GdpConfig::from_params(&params).expect("config");
    assert_eq!(cfg.storage.log_dir, std::path::PathBuf::from("/data/gdp"));
}

#[test]
fn an_out_of_range_retry_count_is_rejected() {
    let params = ParamTable::parse("swarm.gdp.invoke.retries = 1000\n");
    assert!(GdpConfig::from_params(&params).is_err());
}
