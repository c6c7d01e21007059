use serial_test::serial;
use std::env;
use std::fs::write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

use tree_sync::load_config::load_config;

fn config_in(dir: &TempDir, yaml: &str) -> PathBuf {
    let path = dir.path().join("tree-sync.yaml");
    write(&path, yaml).expect("Writing temp config failed");
    path
}

fn set_secrets() {
    env::set_var("NOTION_API_KEY", "top-secret-test-key");
    env::set_var("NOTION_ROOT_PAGE_ID", "root-page");
}

/// A static config plus the required env vars produces a complete config.
#[test]
#[serial]
fn test_load_config_success_injects_env_secrets() {
    let dir = TempDir::new().unwrap();
    let path = config_in(
        &dir,
        r#"
cache_dir: state
concurrency: 8
remote:
  requests_per_second: 2.5
retry:
  max_attempts: 3
  base_delay_ms: 100
collections:
  - name: Story
    source_dir: content/story
  - name: Characters
    source_dir: /srv/characters
"#,
    );
    set_secrets();

    let config = load_config(&path).expect("Config should load");

    assert_eq!(config.secrets.api_key, "top-secret-test-key");
    assert_eq!(config.secrets.root_page_id, "root-page");
    assert_eq!(config.concurrency, 8);
    assert_eq!(config.remote.requests_per_second, 2.5);
    assert_eq!(config.cache_dir, dir.path().join("state"));
    assert_eq!(config.collections.len(), 2);
    assert_eq!(config.collections[0].source_dir, dir.path().join("content/story"));
    assert_eq!(config.collections[1].source_dir, PathBuf::from("/srv/characters"));

    let policy = config.retry.policy();
    assert_eq!(policy.max_attempts, 3);
    assert_eq!(policy.base_delay, Duration::from_millis(100));
}

/// Omitted sections fall back to defaults.
#[test]
#[serial]
fn test_load_config_defaults() {
    let dir = TempDir::new().unwrap();
    let path = config_in(&dir, "collections: []\n");
    set_secrets();

    let config = load_config(&path).expect("Config should load");

    assert_eq!(config.cache_dir, dir.path().join(".cache"));
    assert_eq!(config.concurrency, 4);
    assert_eq!(config.remote.api_base_url, "https://api.notion.com/v1");
    assert_eq!(config.remote.requests_per_second, 3.0);
    assert!(config.collections.is_empty());
}

#[test]
#[serial]
fn test_load_config_errors_on_missing_env() {
    let dir = TempDir::new().unwrap();
    let path = config_in(&dir, "collections: []\n");
    env::set_var("NOTION_API_KEY", "key");
    env::remove_var("NOTION_ROOT_PAGE_ID");

    let err = load_config(&path).unwrap_err();
    assert!(
        err.to_string().contains("NOTION_ROOT_PAGE_ID"),
        "Missing env error expected, got: {err}"
    );
}

#[test]
#[serial]
fn test_load_config_errors_for_invalid_file() {
    let dir = TempDir::new().unwrap();
    let path = config_in(&dir, "not-yaml: [:::");
    set_secrets();

    let msg = load_config(&path).unwrap_err().to_string();
    assert!(
        msg.contains("parse") || msg.contains("YAML"),
        "Parse error expected, got: {msg}"
    );
}

#[test]
#[serial]
fn test_load_config_rejects_duplicate_collections() {
    let dir = TempDir::new().unwrap();
    let path = config_in(
        &dir,
        r#"
collections:
  - name: Story
    source_dir: a
  - name: Story
    source_dir: b
"#,
    );
    set_secrets();

    let msg = load_config(&path).unwrap_err().to_string();
    assert!(msg.contains("configured twice"), "got: {msg}");
}

#[test]
#[serial]
fn test_load_config_rejects_zero_concurrency() {
    let dir = TempDir::new().unwrap();
    let path = config_in(&dir, "concurrency: 0\n");
    set_secrets();

    assert!(load_config(&path).is_err());
}
