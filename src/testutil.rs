//! Shared test helpers for unit tests that need a full `AppState`.

use std::sync::Arc;
use std::time::Duration;

use crate::artifacts::LocalStore;
use crate::config::{Config, ExpiryConfig, NodeConfig};
use crate::storage::Database;
use crate::AppState;

/// Create a public-mode AppState with a temporary database and storage dir.
pub fn test_state(temp_dir: &tempfile::TempDir) -> Arc<AppState> {
    test_state_with(temp_dir, |_| {})
}

/// Like [`test_state`], letting the caller adjust the configuration first.
pub fn test_state_with(
    temp_dir: &tempfile::TempDir,
    adjust: impl FnOnce(&mut Config),
) -> Arc<AppState> {
    let data_dir = temp_dir.path().join("data");
    let storage_dir = temp_dir.path().join("storage");

    let mut config = Config {
        node: NodeConfig {
            bind_address: "127.0.0.1:0".to_string(),
            data_dir: data_dir.to_string_lossy().to_string(),
            storage_dir: storage_dir.to_string_lossy().to_string(),
            public_url: "http://localhost:8080".to_string(),
        },
        expiry: ExpiryConfig {
            clean_interval: Duration::from_millis(50),
            ..ExpiryConfig::default()
        },
        api_contexts: Vec::new(),
        super_context: String::new(),
        max_upload_size: 10 * 1024 * 1024, // 10MB for tests
    };
    adjust(&mut config);

    let db = Database::open(&data_dir, &config.super_context).expect("Failed to open test database");
    let artifacts = LocalStore::new(&storage_dir).expect("Failed to create test storage dir");

    Arc::new(AppState::new(config, db, Arc::new(artifacts)))
}
