use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

const STATE_FILE: &str = "/var/lib/bootseed/state.json";
const BLOB_DIR: &str = "/var/lib/bootseed/packages";
const SEED_DIR: &str = "/var/lib/bootseed/seed";

/// Well-known locations inside a target root.
///
/// Every stage of the bootstrap receives one of these explicitly; nothing in
/// this crate keeps a process-wide notion of "the" root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDirs {
    root: PathBuf,
}

impl TargetDirs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // Persisted by the device on first boot; its presence means the target is a live system.
    pub fn state_file(&self) -> PathBuf {
        self.join_abs(STATE_FILE)
    }

    pub fn blob_dir(&self) -> PathBuf {
        self.join_abs(BLOB_DIR)
    }

    pub fn seed_dir(&self) -> PathBuf {
        self.join_abs(SEED_DIR)
    }

    pub fn seed_packages_dir(&self) -> PathBuf {
        self.seed_dir().join("packages")
    }

    pub fn seed_file(&self) -> PathBuf {
        self.seed_dir().join("seed.json")
    }

    pub fn boot_dir(&self) -> PathBuf {
        self.join_abs("/boot")
    }

    fn join_abs(&self, abs: &str) -> PathBuf {
        self.root.join(abs.trim_start_matches('/'))
    }
}

pub fn ensure_dir(p: &Path) -> Result<()> {
    fs::create_dir_all(p)
        .map_err(|e| Error::msg(format!("failed to create dir {}: {e}", p.display())))
}

/// Write `body` next to `path` and rename it into place.
pub fn atomic_write(path: &Path, body: &[u8]) -> Result<()> {
    let tmp = sibling_tmp_path(path)?;
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    fs::write(&tmp, body)
        .map_err(|e| Error::msg(format!("failed to write temp file {}: {e}", tmp.display())))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        Error::msg(format!(
            "failed to rename {} -> {}: {e}",
            tmp.display(),
            path.display()
        ))
    })
}

/// Copy `src` to `dst` through a sibling temp file, then fix permissions and rename.
pub fn atomic_copy(src: &Path, dst: &Path, mode: u32) -> Result<()> {
    let tmp = sibling_tmp_path(dst)?;
    if let Some(parent) = dst.parent() {
        ensure_dir(parent)?;
    }
    let res = fs::copy(src, &tmp)
        .map_err(|e| {
            Error::msg(format!(
                "failed to copy {} -> {}: {e}",
                src.display(),
                tmp.display()
            ))
        })
        .and_then(|_| set_mode(&tmp, mode))
        .and_then(|_| {
            fs::rename(&tmp, dst).map_err(|e| {
                Error::msg(format!(
                    "failed to rename {} -> {}: {e}",
                    tmp.display(),
                    dst.display()
                ))
            })
        });
    if res.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    res
}

fn sibling_tmp_path(path: &Path) -> Result<PathBuf> {
    let file_name = path.file_name().and_then(|s| s.to_str()).ok_or_else(|| {
        Error::msg(format!(
            "invalid file path for atomic write: {}",
            path.display()
        ))
    })?;
    Ok(path.with_file_name(format!(
        ".{}.tmp.{}.{}",
        file_name,
        std::process::id(),
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    )))
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| Error::msg(format!("failed to chmod {}: {e}", path.display())))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
