use std::fs;
use std::path::PathBuf;

use crate::bootloader::grub::upsert;
use crate::bootloader::{Bootloader, blob_dir_name, unpack_kernel_files};
use crate::error::{Error, ErrorKind, Result};
use crate::package::{PackageFile, PackageInfo};
use crate::rootfs::{self, TargetDirs};

const DEFAULT_ENV_SIZE: usize = 4096;
const CRC_LEN: usize = 4;

#[derive(Debug, Clone)]
pub struct UBoot {
    dirs: TargetDirs,
}

/// Decoded `uboot.env`: `size` is the full on-disk length including the CRC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Env {
    size: usize,
    vars: Vec<(String, String)>,
}

impl Env {
    pub fn empty(size: usize) -> Self {
        Self {
            size,
            vars: Vec::new(),
        }
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.is_empty() {
            return Ok(Self::empty(DEFAULT_ENV_SIZE));
        }
        if raw.len() <= CRC_LEN {
            return Err(bootvar_err(format!(
                "uboot env too short ({} bytes)",
                raw.len()
            )));
        }
        let (crc, data) = raw.split_at(CRC_LEN);
        let want = u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]);
        let got = crc32fast::hash(data);
        if want != got {
            return Err(bootvar_err(format!(
                "uboot env crc mismatch (stored {want:#010x}, computed {got:#010x})"
            )));
        }

        let mut vars = Vec::new();
        for chunk in data.split(|b| *b == 0) {
            if chunk.is_empty() {
                break;
            }
            let entry = std::str::from_utf8(chunk)
                .map_err(|e| bootvar_err(format!("uboot env entry is not utf-8: {e}")))?;
            let Some((k, v)) = entry.split_once('=') else {
                return Err(bootvar_err(format!("malformed uboot env entry '{entry}'")));
            };
            vars.push((k.to_string(), v.to_string()));
        }
        Ok(Self {
            size: raw.len(),
            vars,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(self.size);
        for (k, v) in &self.vars {
            data.extend_from_slice(k.as_bytes());
            data.push(b'=');
            data.extend_from_slice(v.as_bytes());
            data.push(0);
        }
        data.push(0);
        let area = self.size.saturating_sub(CRC_LEN);
        if data.len() > area {
            return Err(bootvar_err(format!(
                "uboot env exceeds {area} bytes of data"
            )));
        }
        data.resize(area, 0);

        let mut out = crc32fast::hash(&data).to_le_bytes().to_vec();
        out.extend_from_slice(&data);
        Ok(out)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn set(&mut self, name: &str, value: &str) {
        upsert(&mut self.vars, name, value);
    }
}

fn bootvar_err(msg: String) -> Error {
    Error::new(ErrorKind::BootVar, msg)
}

impl UBoot {
    pub fn new(dirs: TargetDirs) -> Self {
        Self { dirs }
    }

    fn env_file(&self) -> PathBuf {
        self.config_file()
    }

    fn read_env(&self) -> Result<Env> {
        let path = self.env_file();
        match fs::read(&path) {
            Ok(raw) => Env::decode(&raw).map_err(|e| e.context(path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Env::empty(DEFAULT_ENV_SIZE))
            }
            Err(e) => Err(bootvar_err(format!("cannot read {}: {e}", path.display()))),
        }
    }
}

impl Bootloader for UBoot {
    fn name(&self) -> &'static str {
        "u-boot"
    }

    fn dir(&self) -> PathBuf {
        self.dirs.boot_dir().join("uboot")
    }

    fn config_file(&self) -> PathBuf {
        self.dir().join("uboot.env")
    }

    fn get_boot_var(&self, name: &str) -> Result<String> {
        Ok(self.read_env()?.get(name).unwrap_or_default().to_string())
    }

    fn set_boot_vars(&self, assignments: &[(&str, &str)]) -> Result<()> {
        let mut env = self.read_env()?;
        for (k, v) in assignments {
            if k.is_empty() || k.contains('=') || k.contains('\0') || v.contains('\0') {
                return Err(bootvar_err(format!("invalid uboot variable '{k}'")));
            }
            env.set(k, v);
        }
        let body = env.encode()?;
        rootfs::atomic_write(&self.env_file(), &body)
            .map_err(|e| bootvar_err(e.to_string()))?;
        tracing::debug!(bootloader = "u-boot", vars = assignments.len(), "wrote boot variables");
        Ok(())
    }

    fn extract_kernel_assets(&self, info: &PackageInfo, pkg: &PackageFile) -> Result<()> {
        let dst = self.dir().join(blob_dir_name(pkg)?);
        unpack_kernel_files(pkg, &dst)?;
        tracing::info!(package = %info.name, dst = %dst.display(), "extracted kernel assets");
        Ok(())
    }
}
