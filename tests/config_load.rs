use std::time::Duration;

use amq_monitor::config::load_config;
use amq_monitor::core::model::BrokerLocation;
use amq_monitor::MonitorConfig;

#[test]
fn load_config_matches_toml() {
    let cfg: MonitorConfig = load_config("monitor.toml").expect("failed to load config");

    assert_eq!(cfg.polling.interval_ms, 3000);
    assert_eq!(cfg.polling.stats_log_interval_ms, 60_000);
    assert_eq!(cfg.log_throttle.initial_quiet_ms, 10_000);
    assert_eq!(cfg.log_throttle.max_quiet_ms, 600_000);
    assert_eq!(cfg.brokers.len(), 2);
    assert_eq!(cfg.brokers[0].name, "amq01");
    assert_eq!(cfg.destinations.queues, vec!["orders", "invoices"]);
    assert_eq!(cfg.destinations.topics, vec!["prices"]);
    assert_eq!(cfg.shutdown_timeout(), Duration::from_secs(30));
}

#[test]
fn configured_locations_are_valid() {
    let cfg = load_config("monitor.toml").expect("failed to load config");

    for broker in cfg.broker_ids() {
        BrokerLocation::parse(broker.location()).expect("invalid location in monitor.toml");
    }
}

#[test]
fn missing_file_is_an_error() {
    assert!(load_config("does-not-exist.toml").is_err());
}
