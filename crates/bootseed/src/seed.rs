use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind, Result};
use crate::package::{PackageInfo, Revision};
use crate::rootfs;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "kebab-case")]
pub struct SeedEntry {
    pub name: String,
    pub id: String,
    pub revision: Revision,
    pub channel: String,
    pub publisher_id: String,
    pub publisher: String,
    /// File name inside the seed package directory.
    pub file: String,
}

/// Packages to install on first boot, in fetch order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Seed {
    #[serde(default)]
    pub packages: Vec<SeedEntry>,
}

impl Seed {
    pub fn push(&mut self, info: &PackageInfo, file: &Path) {
        let file = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.packages.push(SeedEntry {
            name: info.name.clone(),
            id: info.id.clone(),
            revision: info.revision,
            channel: info.channel.clone(),
            publisher_id: info.publisher_id.clone(),
            publisher: info.publisher.clone(),
            file,
        });
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut body = serde_json::to_vec_pretty(self)?;
        body.push(b'\n');
        rootfs::atomic_write(path, &body)
            .map_err(|e| e.context(format!("cannot write seed {}", path.display())))?;
        tracing::info!(path = %path.display(), packages = self.packages.len(), "wrote seed");
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let raw = fs::read(path).map_err(|e| {
            Error::new(
                ErrorKind::Read,
                format!("cannot read seed {}: {e}", path.display()),
            )
        })?;
        serde_json::from_slice(&raw).map_err(|e| {
            Error::new(
                ErrorKind::Decode,
                format!("cannot decode seed {}: {e}", path.display()),
            )
        })
    }
}
