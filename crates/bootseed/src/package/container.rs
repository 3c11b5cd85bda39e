use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, ErrorKind, Result};
use crate::package::PackageInfo;

pub const META_INFO: &str = "meta/package.toml";

/// A package artifact on disk: a tar archive carrying `meta/package.toml`.
#[derive(Debug, Clone)]
pub struct PackageFile {
    path: PathBuf,
    entries: BTreeSet<String>,
}

impl PackageFile {
    pub fn open(path: &Path) -> Result<Self> {
        let open_err = |msg: String| {
            Error::new(
                ErrorKind::Open,
                format!("cannot open package {}: {msg}", path.display()),
            )
        };

        let file = File::open(path).map_err(|e| open_err(e.to_string()))?;
        let mut archive = tar::Archive::new(file);
        let mut entries = BTreeSet::new();
        for entry in archive.entries().map_err(|e| open_err(e.to_string()))? {
            let entry = entry.map_err(|e| open_err(e.to_string()))?;
            let raw = entry.path().map_err(|e| open_err(e.to_string()))?;
            let name = normalize_entry_name(&raw)
                .ok_or_else(|| open_err(format!("unsafe entry path '{}'", raw.display())))?;
            if !name.is_empty() {
                entries.insert(name);
            }
        }
        if !entries.contains(META_INFO) {
            return Err(open_err(format!("missing {META_INFO}")));
        }
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, rel: &str) -> bool {
        self.entries.contains(rel.trim_matches('/'))
    }

    pub fn read_info(&self) -> Result<PackageInfo> {
        let raw = self.read_file(META_INFO)?;
        let text = String::from_utf8(raw).map_err(|e| {
            Error::new(
                ErrorKind::Decode,
                format!("{META_INFO} in {} is not utf-8: {e}", self.path.display()),
            )
        })?;
        let info: PackageInfo = toml::from_str(&text).map_err(|e| {
            Error::new(
                ErrorKind::Decode,
                format!("cannot parse {META_INFO} in {}: {e}", self.path.display()),
            )
        })?;
        info.check_name()
            .map_err(|e| e.context(format!("{META_INFO} in {}", self.path.display())))?;
        Ok(info)
    }

    pub fn read_file(&self, rel: &str) -> Result<Vec<u8>> {
        let want = rel.trim_matches('/');
        let mut archive = self.archive()?;
        for entry in self.iter_err(archive.entries())? {
            let mut entry = self.iter_err(entry)?;
            let name = {
                let raw = self.iter_err(entry.path())?;
                normalize_entry_name(&raw)
            };
            if name.as_deref() != Some(want) {
                continue;
            }
            let mut buf = Vec::new();
            self.iter_err(entry.read_to_end(&mut buf))?;
            return Ok(buf);
        }
        Err(Error::new(
            ErrorKind::NotFound,
            format!("{} has no entry '{want}'", self.path.display()),
        ))
    }

    /// Unpack entries matching `pattern` below `dst`, keeping their relative paths.
    /// Patterns: `*` (everything), `dir/*` (everything below `dir`) or an exact path.
    /// Returns the number of regular files written.
    pub fn unpack(&self, pattern: &str, dst: &Path) -> Result<usize> {
        let unpack_err = |msg: String| {
            Error::new(
                ErrorKind::Extract,
                format!(
                    "cannot unpack '{pattern}' from {} into {}: {msg}",
                    self.path.display(),
                    dst.display()
                ),
            )
        };
        std::fs::create_dir_all(dst).map_err(|e| unpack_err(e.to_string()))?;

        let mut archive = self.archive()?;
        let mut files = 0usize;
        for entry in archive.entries().map_err(|e| unpack_err(e.to_string()))? {
            let mut entry = entry.map_err(|e| unpack_err(e.to_string()))?;
            let name = {
                let raw = entry.path().map_err(|e| unpack_err(e.to_string()))?;
                normalize_entry_name(&raw)
            };
            let Some(name) = name else {
                continue;
            };
            if name.is_empty() || !pattern_matches(pattern, &name) {
                continue;
            }
            let is_file = entry.header().entry_type().is_file();
            let written = entry.unpack_in(dst).map_err(|e| unpack_err(e.to_string()))?;
            if written && is_file {
                files += 1;
            }
        }
        Ok(files)
    }

    fn archive(&self) -> Result<tar::Archive<File>> {
        let file = File::open(&self.path).map_err(|e| {
            Error::new(
                ErrorKind::Open,
                format!("cannot open package {}: {e}", self.path.display()),
            )
        })?;
        Ok(tar::Archive::new(file))
    }

    fn iter_err<T>(&self, r: std::io::Result<T>) -> Result<T> {
        r.map_err(|e| {
            Error::new(
                ErrorKind::Open,
                format!("cannot read package {}: {e}", self.path.display()),
            )
        })
    }
}

// `None` for absolute or escaping paths.
fn normalize_entry_name(raw: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for c in raw.components() {
        match c {
            Component::Normal(p) => parts.push(p.to_str()?.to_string()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(parts.join("/"))
}

fn pattern_matches(pattern: &str, name: &str) -> bool {
    let pattern = pattern.trim().trim_start_matches("./");
    if pattern == "*" {
        return true;
    }
    if let Some(dir) = pattern.strip_suffix("/*") {
        return name
            .strip_prefix(dir)
            .is_some_and(|rest| rest.starts_with('/'));
    }
    name == pattern.trim_end_matches('/')
}
