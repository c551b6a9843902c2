//! ephemerup - ephemeral file sharing with expiring uploads
//!
//! Clients upload one or more files (optionally through a pre-created form
//! link) and receive a download URL that stays valid until the upload
//! expires:
//! - `asap` uploads disappear after their first download
//! - duration uploads (`1d`, `2h30m`) are reclaimed by a periodic sweeper
//! - redb embedded database for upload and form records
//! - local filesystem storage, one directory per upload

pub mod api;
pub mod artifacts;
pub mod config;
pub mod expiry;
pub mod lifecycle;
pub mod storage;
#[cfg(test)]
pub mod testutil;

use std::sync::Arc;

use artifacts::ArtifactStore;
use config::Config;
use lifecycle::{BackgroundTasks, Reaper, Sweeper};
use storage::Database;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub reaper: Reaper,
    pub tasks: BackgroundTasks,
}

impl AppState {
    pub fn new(config: Config, db: Database, artifacts: Arc<dyn ArtifactStore>) -> Self {
        let tasks = BackgroundTasks::new();
        let reaper = Reaper::new(db.clone(), Arc::clone(&artifacts), tasks.clone());
        Self {
            config,
            db,
            artifacts,
            reaper,
            tasks,
        }
    }

    /// The expiry sweeper for this state's store and storage directory.
    pub fn sweeper(&self) -> Sweeper {
        Sweeper::new(
            self.db.clone(),
            Arc::clone(&self.artifacts),
            self.config.expiry.defaults(),
            self.config.expiry.clean_interval,
        )
    }
}
