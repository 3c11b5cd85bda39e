use std::path::PathBuf;

use crate::error::Result;
use crate::package::{DownloadInfo, PackageInfo};

pub mod http;

pub use http::{HttpStore, HttpStoreFactory, StoreConfig};

/// Well-known id of the default public store.
pub const DEFAULT_STORE_ID: &str = "canonical";

/// Credentials forwarded to the store. Bootstrapping runs anonymously, so the
/// pipeline passes `None`.
#[derive(Debug, Clone, Default)]
pub struct UserState {
    pub token: String,
}

pub trait ProgressMeter {
    fn start(&mut self, label: &str, total: u64);
    fn set(&mut self, current: u64);
    fn finished(&mut self);
}

/// Reports download progress as `tracing` events in 10% steps.
#[derive(Debug, Default)]
pub struct LogProgress {
    label: String,
    total: u64,
    last_decile: u64,
}

impl ProgressMeter for LogProgress {
    fn start(&mut self, label: &str, total: u64) {
        self.label = label.to_string();
        self.total = total;
        self.last_decile = 0;
        tracing::debug!(package = %self.label, total, "download started");
    }

    fn set(&mut self, current: u64) {
        if self.total == 0 {
            return;
        }
        let decile = current.saturating_mul(10) / self.total;
        if decile > self.last_decile {
            self.last_decile = decile;
            tracing::debug!(package = %self.label, percent = decile * 10, "downloading");
        }
    }

    fn finished(&mut self) {
        tracing::debug!(package = %self.label, "download finished");
    }
}

/// Where package metadata and artifacts come from.
pub trait PackageSource {
    fn resolve(
        &self,
        name: &str,
        channel: &str,
        devmode: bool,
        user: Option<&UserState>,
    ) -> Result<PackageInfo>;

    /// Download to a temporary file owned by the caller.
    fn download(
        &self,
        name: &str,
        download: &DownloadInfo,
        progress: &mut dyn ProgressMeter,
        user: Option<&UserState>,
    ) -> Result<PathBuf>;
}

/// Builds a package source bound to one store and architecture.
pub trait SourceFactory {
    fn open(&self, store_id: &str, architecture: &str) -> Result<Box<dyn PackageSource + '_>>;
}

pub fn normalize_store_id(store_id: &str) -> &str {
    let id = store_id.trim();
    if id == DEFAULT_STORE_ID { "" } else { id }
}
