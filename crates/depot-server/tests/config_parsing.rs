use std::{env, fs, time::Duration};

use depot_server::config::loader::load_config;

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("depot.toml");

    let toml_content = r#"
[server]
host = "127.0.0.1"
port = 8081
body_limit_bytes = 1024

[logging]
level = "debug"

[[repositories]]
name = "maven-central"
remote_url = "https://repo1.maven.org/maven2"
content_max_age_mins = -1
metadata_max_age_mins = 30
metadata_suffixes = ["maven-metadata.xml", ".sha1"]

[repositories.cooperation]
major_timeout_secs = 120
minor_timeout_secs = 10
threads_per_key = 0

[[repositories]]
name = "npm"
remote_url = "https://registry.npmjs.org"
blocked = true
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) Valid config parses
    let cfg = load_config(path.to_str()).expect("should parse config");
    assert_eq!(cfg.server.port, 8081);
    assert_eq!(cfg.logging.level.to_ascii_lowercase(), "debug");
    assert_eq!(cfg.repositories.len(), 2);

    let maven = cfg.repository("maven-central").expect("maven repo");
    assert_eq!(maven.content_max_age_mins, -1);
    assert_eq!(maven.metadata_max_age_mins, 30);
    assert_eq!(maven.metadata_suffixes.len(), 2);
    let coop = maven.cooperation.to_cooperation_config();
    assert!(coop.enabled);
    assert_eq!(coop.major_timeout, Duration::from_secs(120));
    assert_eq!(coop.minor_timeout, Duration::from_secs(10));
    assert_eq!(coop.threads_per_key, 0);

    let npm = cfg.repository("npm").expect("npm repo");
    assert_eq!(npm.content_max_age_mins, 1440);
    assert_eq!(npm.connect_timeout(), Duration::from_secs(20));
    assert_eq!(npm.cooperation.major_timeout_secs, 60);
    assert!(npm.blocked);
    assert!(!maven.blocked);

    // 2) Env override should win over file
    unsafe {
        env::set_var("DEPOT__SERVER__PORT", "9090");
    }
    let cfg_env = load_config(path.to_str()).expect("should parse config with env overrides");
    assert_eq!(cfg_env.server.port, 9090);
    unsafe {
        env::remove_var("DEPOT__SERVER__PORT");
    }

    // 3) Duplicate repository names are rejected
    let invalid_path = dir.path().join("invalid.toml");
    let invalid_toml = r#"
[[repositories]]
name = "npm"
remote_url = "https://registry.npmjs.org"

[[repositories]]
name = "npm"
remote_url = "https://registry.yarnpkg.com"
"#;
    fs::write(&invalid_path, invalid_toml).expect("write invalid toml");
    let err = load_config(invalid_path.to_str()).expect_err("expected validation error");
    assert!(err.contains("duplicate repository name 'npm'"));

    // 4) Non-http remotes are rejected
    let ftp_path = dir.path().join("ftp.toml");
    fs::write(
        &ftp_path,
        "[[repositories]]\nname = \"mirror\"\nremote_url = \"ftp://mirror.example.com\"\n",
    )
    .expect("write ftp toml");
    let err = load_config(ftp_path.to_str()).expect_err("expected scheme error");
    assert!(err.contains("remote_url must be http or https"));
}
