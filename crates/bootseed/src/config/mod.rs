//! Build definitions.
//!
//! A build definition is a TOML file. The root may name one parent with
//! `extends = "base.toml"`; any table may pull shared fragments in with
//! `imports = ["store.toml", ...]`. Keys written in the including file win
//! over everything it includes, and paths are relative to the including file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use toml::Value;
use toml::value::Table;

use crate::error::{Error, ErrorKind, Result};

const EXTENDS_KEY: &str = "extends";
const IMPORTS_KEY: &str = "imports";

/// A build definition with every `extends` and `imports` resolved.
#[derive(Debug, Clone)]
pub struct ConfigDoc {
    pub path: PathBuf,
    pub value: Value,
}

impl ConfigDoc {
    /// Look up a dotted key such as `image.store.url`.
    pub fn value_path(&self, path: &str) -> Option<&Value> {
        path.trim()
            .split('.')
            .filter(|seg| !seg.is_empty())
            .try_fold(&self.value, |cur, seg| cur.as_table()?.get(seg))
    }

    pub fn has_table_path(&self, path: &str) -> bool {
        self.value_path(path).is_some_and(Value::is_table)
    }

    pub fn deserialize_path<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        self.value_path(path)
            .map(|v| {
                v.clone().try_into().map_err(|e| {
                    Error::new(
                        ErrorKind::Config,
                        format!("invalid [{path}] in {}: {e}", self.path.display()),
                    )
                })
            })
            .transpose()
    }

    /// Paths in a build definition are relative to the file that was loaded.
    pub fn resolve_path(&self, raw: &str) -> PathBuf {
        relative_to(&self.path, raw.trim())
    }

    pub fn top_level_tables(&self) -> Vec<&str> {
        let Some(root) = self.value.as_table() else {
            return Vec::new();
        };
        root.iter()
            .filter(|(_, v)| v.is_table())
            .map(|(k, _)| k.as_str())
            .collect()
    }
}

pub fn load(path: &Path) -> Result<ConfigDoc> {
    let value = Loader::default().load_file(path)?;
    Ok(ConfigDoc {
        path: path.to_path_buf(),
        value,
    })
}

// Files currently being loaded, outermost first.
#[derive(Default)]
struct Loader {
    chain: Vec<PathBuf>,
}

impl Loader {
    fn load_file(&mut self, path: &Path) -> Result<Value> {
        let key = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if self.chain.contains(&key) {
            let cycle: Vec<String> = self
                .chain
                .iter()
                .chain(std::iter::once(&key))
                .map(|p| p.display().to_string())
                .collect();
            return Err(Error::new(
                ErrorKind::Config,
                format!("build definition include cycle: {}", cycle.join(" -> ")),
            ));
        }

        let text = fs::read_to_string(path).map_err(|e| {
            Error::new(
                ErrorKind::Read,
                format!("cannot read build definition {}: {e}", path.display()),
            )
        })?;
        let parsed: Table = toml::from_str(&text).map_err(|e| {
            Error::new(ErrorKind::Config, format!("cannot parse {}: {e}", path.display()))
        })?;

        self.chain.push(key);
        let loaded = self.resolve_root(path, parsed);
        self.chain.pop();
        loaded.map(Value::Table)
    }

    fn resolve_root(&mut self, path: &Path, mut root: Table) -> Result<Table> {
        let parent = match root.remove(EXTENDS_KEY) {
            None => Table::new(),
            Some(Value::String(base)) => match self.load_file(&relative_to(path, &base))? {
                Value::Table(t) => t,
                _ => Table::new(),
            },
            Some(_) => {
                return Err(Error::new(
                    ErrorKind::Config,
                    format!("'{EXTENDS_KEY}' in {} must be a string", path.display()),
                ));
            }
        };
        self.expand_imports(path, &mut root)?;
        Ok(overlay(parent, root))
    }

    // Replaces `imports` in `table` and every nested table with the imported keys.
    fn expand_imports(&mut self, path: &Path, table: &mut Table) -> Result<()> {
        for (_, value) in table.iter_mut() {
            if let Value::Table(child) = value {
                self.expand_imports(path, child)?;
            }
        }
        let Some(imports) = table.remove(IMPORTS_KEY) else {
            return Ok(());
        };
        let Value::Array(entries) = imports else {
            return Err(Error::new(
                ErrorKind::Config,
                format!("'{IMPORTS_KEY}' in {} must be an array of paths", path.display()),
            ));
        };

        let mut base = Table::new();
        for entry in entries {
            let Some(rel) = entry.as_str().map(str::trim) else {
                return Err(Error::new(
                    ErrorKind::Config,
                    format!("'{IMPORTS_KEY}' in {} must only hold strings", path.display()),
                ));
            };
            if rel.is_empty() {
                continue;
            }
            if let Value::Table(fragment) = self.load_file(&relative_to(path, rel))? {
                base = overlay(base, fragment);
            }
        }
        *table = overlay(base, std::mem::take(table));
        Ok(())
    }
}

// Deep merge: tables merge key by key, anything else in `top` replaces `base`.
fn overlay(mut base: Table, top: Table) -> Table {
    for (key, value) in top {
        let merged = match (base.remove(&key), value) {
            (Some(Value::Table(b)), Value::Table(t)) => Value::Table(overlay(b, t)),
            (_, v) => v,
        };
        base.insert(key, merged);
    }
    base
}

fn relative_to(file: &Path, reference: &str) -> PathBuf {
    let p = Path::new(reference);
    if p.is_absolute() {
        return p.to_path_buf();
    }
    file.parent().unwrap_or_else(|| Path::new(".")).join(p)
}
