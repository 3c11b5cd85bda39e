use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, ErrorKind, Result};
use crate::package::{PackageFile, PackageInfo};
use crate::rootfs::{self, TargetDirs};

pub mod bootvars;
pub mod grub;
pub mod uboot;

pub use bootvars::{BootState, mark_boot_successful, read_state, set_initial};
pub use grub::Grub;
pub use uboot::UBoot;

/// A bootloader family installed in a target root.
pub trait Bootloader {
    fn name(&self) -> &'static str;

    /// Bootloader directory inside the target root.
    fn dir(&self) -> PathBuf;

    /// Static configuration whose presence identifies this bootloader.
    fn config_file(&self) -> PathBuf;

    /// Missing variables read as the empty string.
    fn get_boot_var(&self, name: &str) -> Result<String>;

    fn set_boot_var(&self, name: &str, value: &str) -> Result<()> {
        self.set_boot_vars(&[(name, value)])
    }

    /// Applies all assignments in one write of the environment.
    fn set_boot_vars(&self, vars: &[(&str, &str)]) -> Result<()>;

    fn extract_kernel_assets(&self, info: &PackageInfo, pkg: &PackageFile) -> Result<()>;
}

pub fn find_bootloader(dirs: &TargetDirs) -> Result<Box<dyn Bootloader>> {
    let grub = Grub::new(dirs.clone());
    if grub.config_file().is_file() {
        return Ok(Box::new(grub));
    }
    let uboot = UBoot::new(dirs.clone());
    if uboot.config_file().is_file() {
        return Ok(Box::new(uboot));
    }
    Err(Error::new(
        ErrorKind::NotFound,
        format!("cannot determine bootloader in {}", dirs.root().display()),
    ))
}

/// Copies the first boot config the gadget ships (`grub.conf`, then `uboot.conf`)
/// to the bootloader's location in the target and returns that path.
pub fn install_boot_config(gadget_dir: &Path, dirs: &TargetDirs) -> Result<PathBuf> {
    let candidates = [
        ("grub.conf", Grub::new(dirs.clone()).config_file()),
        ("uboot.conf", UBoot::new(dirs.clone()).config_file()),
    ];
    for (marker, dst) in candidates {
        let src = gadget_dir.join(marker);
        if !src.is_file() {
            continue;
        }
        if let Some(parent) = dst.parent() {
            rootfs::ensure_dir(parent)?;
        }
        fs::copy(&src, &dst).map_err(|e| {
            Error::new(
                ErrorKind::Copy,
                format!(
                    "cannot install boot config {} -> {}: {e}",
                    src.display(),
                    dst.display()
                ),
            )
        })?;
        tracing::info!(src = %src.display(), dst = %dst.display(), "installed boot config");
        return Ok(dst);
    }
    Err(Error::new(
        ErrorKind::NotFound,
        format!("cannot find boot config in {}", gadget_dir.display()),
    ))
}

// Unpack `kernel.img`, `initrd.img` and, when present, `dtbs/` below `dst`.
pub(crate) fn unpack_kernel_files(pkg: &PackageFile, dst: &Path) -> Result<()> {
    for required in ["kernel.img", "initrd.img"] {
        if !pkg.contains(required) {
            return Err(Error::new(
                ErrorKind::Extract,
                format!("{} has no {required}", pkg.path().display()),
            ));
        }
        pkg.unpack(required, dst)?;
    }
    let dtbs = pkg.unpack("dtbs/*", dst)?;
    if dtbs > 0 {
        tracing::debug!(dst = %dst.display(), count = dtbs, "extracted device trees");
    }
    Ok(())
}

pub(crate) fn blob_dir_name(pkg: &PackageFile) -> Result<String> {
    pkg.path()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            Error::new(
                ErrorKind::Extract,
                format!("invalid package path {}", pkg.path().display()),
            )
        })
}
