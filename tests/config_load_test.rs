//! Loading configuration files through the figment provider stack.

use graph_migrate::config::Config;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_shipped_config_loads() {
    let config = Config::load_from(Path::new(env!("CARGO_MANIFEST_DIR")).join("config/graph.toml")).unwrap();
    config.validate().unwrap();
    assert_eq!(config.migrate.cluster.len(), 2);
    assert_eq!(config.migrate.cluster["graph-01"], "127.0.0.1:6072");
}

#[test]
fn test_partial_file_keeps_defaults() {
    let file = write_config(
        r#"
        [migrate]
        enabled = true

        [migrate.cluster]
        "graph-00" = "10.0.0.1:6071"
        "#,
    );

    let config = Config::load_from(file.path()).unwrap();

    assert!(config.migrate.enabled);
    assert_eq!(config.migrate.concurrency, 2);
    assert_eq!(config.migrate.replicas, 500);
    assert_eq!(config.call_timeout(), Duration::from_millis(5000));
    assert_eq!(config.reconnect_delay(), Duration::from_millis(500));
    assert_eq!(config.application.log_level, "info");
    config.validate().unwrap();
}

#[test]
fn test_missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load_from(dir.path().join("absent.toml")).unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_later_provider_overrides_file() {
    let file = write_config(
        r#"
        [rpc]
        call_timeout_ms = 5000
        "#,
    );

    let config: Config = Config::figment(file.path())
        .merge(("rpc.call_timeout_ms", 250))
        .extract()
        .unwrap();

    assert_eq!(config.call_timeout(), Duration::from_millis(250));
}

#[test]
fn test_wrong_type_is_config_error() {
    let file = write_config(
        r#"
        [migrate]
        concurrency = "many"
        "#,
    );

    let err = Config::load_from(file.path()).unwrap_err();
    assert_eq!(err.kind(), graph_migrate::error::ErrorKind::Config);
}

#[test]
fn test_enabled_without_cluster_fails_validation() {
    let file = write_config(
        r#"
        [migrate]
        enabled = true
        "#,
    );

    let config = Config::load_from(file.path()).unwrap();
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("migrate.cluster"));
}
