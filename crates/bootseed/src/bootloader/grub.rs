use std::fs;
use std::path::PathBuf;

use crate::bootloader::{Bootloader, blob_dir_name, unpack_kernel_files};
use crate::error::{Error, ErrorKind, Result};
use crate::package::{PackageFile, PackageInfo};
use crate::rootfs::{self, TargetDirs};

const ENV_HEADER: &str = "# GRUB Environment Block\n";
const ENV_SIZE: usize = 1024;
const FORCE_EXTRACTION: &str = "meta/force-kernel-extraction";

#[derive(Debug, Clone)]
pub struct Grub {
    dirs: TargetDirs,
}

impl Grub {
    pub fn new(dirs: TargetDirs) -> Self {
        Self { dirs }
    }

    fn env_file(&self) -> PathBuf {
        self.dir().join("grubenv")
    }

    fn read_env(&self) -> Result<Vec<(String, String)>> {
        let path = self.env_file();
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::new(
                    ErrorKind::BootVar,
                    format!("cannot read {}: {e}", path.display()),
                ));
            }
        };
        let text = String::from_utf8(raw).map_err(|e| {
            Error::new(
                ErrorKind::BootVar,
                format!("{} is not utf-8: {e}", path.display()),
            )
        })?;
        Ok(parse_env(&text))
    }
}

fn parse_env(text: &str) -> Vec<(String, String)> {
    text.lines()
        .filter(|l| !l.starts_with('#'))
        .filter_map(|l| l.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn render_env(vars: &[(String, String)]) -> Result<Vec<u8>> {
    let mut out = String::from(ENV_HEADER);
    for (k, v) in vars {
        out.push_str(k);
        out.push('=');
        out.push_str(v);
        out.push('\n');
    }
    if out.len() > ENV_SIZE {
        return Err(Error::new(
            ErrorKind::BootVar,
            format!("grub environment exceeds {ENV_SIZE} bytes"),
        ));
    }
    let mut body = out.into_bytes();
    body.resize(ENV_SIZE, b'#');
    Ok(body)
}

pub(crate) fn upsert(vars: &mut Vec<(String, String)>, name: &str, value: &str) {
    match vars.iter_mut().find(|(k, _)| k == name) {
        Some((_, v)) => *v = value.to_string(),
        None => vars.push((name.to_string(), value.to_string())),
    }
}

impl Bootloader for Grub {
    fn name(&self) -> &'static str {
        "grub"
    }

    fn dir(&self) -> PathBuf {
        self.dirs.boot_dir().join("grub")
    }

    fn config_file(&self) -> PathBuf {
        self.dir().join("grub.cfg")
    }

    fn get_boot_var(&self, name: &str) -> Result<String> {
        Ok(self
            .read_env()?
            .into_iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
            .unwrap_or_default())
    }

    fn set_boot_vars(&self, assignments: &[(&str, &str)]) -> Result<()> {
        let mut vars = self.read_env()?;
        for (k, v) in assignments {
            if k.is_empty() || k.contains('=') || k.contains('\n') || v.contains('\n') {
                return Err(Error::new(
                    ErrorKind::BootVar,
                    format!("invalid grub variable '{k}'"),
                ));
            }
            upsert(&mut vars, k, v);
        }
        let body = render_env(&vars)?;
        rootfs::atomic_write(&self.env_file(), &body)
            .map_err(|e| Error::new(ErrorKind::BootVar, e.to_string()))?;
        tracing::debug!(bootloader = "grub", vars = assignments.len(), "wrote boot variables");
        Ok(())
    }

    // GRUB loop-mounts the kernel package itself; nothing to extract by default.
    fn extract_kernel_assets(&self, info: &PackageInfo, pkg: &PackageFile) -> Result<()> {
        if !pkg.contains(FORCE_EXTRACTION) {
            return Ok(());
        }
        let dst = self.dir().join(blob_dir_name(pkg)?);
        unpack_kernel_files(pkg, &dst)?;
        tracing::info!(package = %info.name, dst = %dst.display(), "extracted kernel assets");
        Ok(())
    }
}
