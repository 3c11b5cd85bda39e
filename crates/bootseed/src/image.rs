use std::path::{Path, PathBuf};

use crate::acquire::{AcquireOptions, acquire};
use crate::bootloader::{self, bootvars};
use crate::error::{Error, ErrorKind, Result};
use crate::kernel;
use crate::model::{Model, decode_model};
use crate::package::{PackageFile, PackageInfo};
use crate::rootfs::{self, TargetDirs};
use crate::seed::Seed;
use crate::store::SourceFactory;

/// Inputs of one image preparation.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Extra packages fetched before the model's own.
    pub packages: Vec<String>,
    /// Target root; empty means `/`.
    pub root_dir: PathBuf,
    pub channel: String,
    pub model_file: PathBuf,
    pub gadget_unpack_dir: PathBuf,
    pub local_dir: Option<PathBuf>,
}

impl Options {
    pub fn target_dirs(&self) -> TargetDirs {
        if self.root_dir.as_os_str().is_empty() {
            TargetDirs::new("/")
        } else {
            TargetDirs::new(&self.root_dir)
        }
    }

    fn acquire_options(&self, model: &Model, target_dir: &Path) -> AcquireOptions {
        AcquireOptions {
            target_dir: target_dir.to_path_buf(),
            channel: self.channel.clone(),
            store_id: model.store().to_string(),
            architecture: model.architecture().to_string(),
            local_dir: self.local_dir.clone(),
        }
    }
}

/// Kernel and OS packages copied into the blob store, keyed by blob path.
#[derive(Debug, Clone, Default)]
pub struct BootBlobs {
    pub kernel: Option<(PathBuf, PackageInfo)>,
    pub core: Option<(PathBuf, PackageInfo)>,
}

pub fn prepare(opts: &Options, factory: &dyn SourceFactory) -> Result<()> {
    download_unpack_gadget(opts, factory)?;
    bootstrap_to_root_dir(opts, factory).map(|_| ())
}

pub fn download_unpack_gadget(opts: &Options, factory: &dyn SourceFactory) -> Result<PathBuf> {
    let model = decode_model(&opts.model_file)?;
    let dir = &opts.gadget_unpack_dir;
    rootfs::ensure_dir(dir)
        .map_err(|e| e.context(format!("cannot create gadget unpack dir {}", dir.display())))?;

    tracing::info!(package = model.gadget(), "fetching gadget");
    let (path, info) = acquire(model.gadget(), &opts.acquire_options(&model, dir), factory)?;
    let files = PackageFile::open(&path)?.unpack("*", dir)?;
    tracing::info!(package = %info.name, dir = %dir.display(), files, "unpacked gadget");
    Ok(path)
}

pub fn bootstrap_to_root_dir(opts: &Options, factory: &dyn SourceFactory) -> Result<Seed> {
    let dirs = opts.target_dirs();
    let state = dirs.state_file();
    if state.exists() {
        return Err(Error::new(
            ErrorKind::AlreadyBootstrapped,
            format!("cannot bootstrap over existing system ({})", state.display()),
        ));
    }

    let model = decode_model(&opts.model_file)?;
    tracing::info!(
        brand = model.brand_id(),
        model = model.model(),
        series = model.series(),
        architecture = model.architecture(),
        "bootstrapping"
    );

    let blob_dir = dirs.blob_dir();
    let seed_packages = dirs.seed_packages_dir();
    for d in [&blob_dir, &seed_packages] {
        rootfs::ensure_dir(d)?;
    }

    let mut names: Vec<String> = opts.packages.clone();
    names.push(model.gadget().to_string());
    names.push(model.core().to_string());
    names.push(model.kernel().to_string());
    names.extend(model.required_packages().iter().cloned());

    let acq = opts.acquire_options(&model, &seed_packages);
    let mut seed = Seed::default();
    let mut blobs = BootBlobs::default();
    for name in &names {
        tracing::info!(package = %name, "fetching");
        let (path, info) = acquire(name, &acq, factory)?;

        let is_kernel = is_model_package(name, &info, model.kernel());
        let is_core = is_model_package(name, &info, model.core());
        if is_kernel || is_core {
            let blob = copy_to_blob_dir(&path, &blob_dir)?;
            let entry = Some((blob, info.clone()));
            if is_kernel {
                blobs.kernel = entry;
            } else {
                blobs.core = entry;
            }
        }
        seed.push(&info, &path);
    }

    seed.write(&dirs.seed_file())
        .map_err(|e| e.context("cannot write seed"))?;

    bootloader::install_boot_config(&opts.gadget_unpack_dir, &dirs)?;
    set_boot_vars(&dirs, &blobs)?;

    tracing::info!(root = %dirs.root().display(), packages = seed.len(), "bootstrap complete");
    Ok(seed)
}

pub fn set_boot_vars(dirs: &TargetDirs, blobs: &BootBlobs) -> Result<()> {
    let bl = bootloader::find_bootloader(dirs)
        .map_err(|e| e.context("cannot set kernel/core boot variables"))?;

    let (Some((kernel_blob, kernel_info)), Some((core_blob, _))) = (&blobs.kernel, &blobs.core)
    else {
        return Err(Error::msg("internal error: cannot find core/kernel package"));
    };

    kernel::extract_kernel_assets(kernel_blob, kernel_info, bl.as_ref())?;
    bootvars::set_initial(bl.as_ref(), &file_name(kernel_blob), &file_name(core_blob))
}

// Requested names may be local paths, so also match on the package's own name.
fn is_model_package(requested: &str, info: &PackageInfo, wanted: &str) -> bool {
    requested == wanted || info.name == wanted
}

fn copy_to_blob_dir(src: &Path, blob_dir: &Path) -> Result<PathBuf> {
    let dst = blob_dir.join(file_name(src));
    rootfs::atomic_copy(src, &dst, 0o644).map_err(|e| {
        Error::new(
            ErrorKind::Copy,
            format!("cannot copy {} to blob store: {e}", src.display()),
        )
    })?;
    Ok(dst)
}

fn file_name(p: &Path) -> String {
    p.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
