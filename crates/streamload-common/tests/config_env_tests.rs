// Runs alone in its own binary because it sets process environment variables.

use streamload_common::config::{DriverConfig, CONFIG_ENV, SSL_CERT_ENV};

#[test]
fn load_follows_the_config_variable() {
    let path = std::env::temp_dir().join(format!("streamload-env-{}.yaml", std::process::id()));
    std::fs::write(&path, "ssl_cert: /etc/ssl/corp-ca.pem\nmax_chunk: 5\n").unwrap();

    std::env::set_var(SSL_CERT_ENV, "false");
    std::env::set_var(CONFIG_ENV, &path);
    assert!(DriverConfig::load().is_err(), "a broken config file must not fall back to defaults");

    std::fs::write(&path, "ssl_cert: /etc/ssl/corp-ca.pem\nmax_chunks: 5\n").unwrap();
    let cfg = DriverConfig::load().expect("config");
    assert_eq!(cfg.ssl_cert.as_deref(), Some("/etc/ssl/corp-ca.pem"));
    assert_eq!(cfg.max_chunks, Some(5));

    std::env::remove_var(CONFIG_ENV);
    assert_eq!(DriverConfig::load().expect("env").ssl_cert.as_deref(), Some("false"));

    std::env::remove_var(SSL_CERT_ENV);
    let _ = std::fs::remove_file(path);
}
