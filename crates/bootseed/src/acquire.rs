use std::path::{Path, PathBuf};

use crate::error::{Error, ErrorKind, Result};
use crate::package::{PACKAGE_EXT, PackageFile, PackageInfo, Revision};
use crate::rootfs;
use crate::store::{LogProgress, SourceFactory, normalize_store_id};

#[derive(Debug, Clone, Default)]
pub struct AcquireOptions {
    /// Directory receiving `<name>_<revision>.pkg`; empty means the current directory.
    pub target_dir: PathBuf,
    pub channel: String,
    pub store_id: String,
    pub architecture: String,
    pub local_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageOrigin {
    Local(PathBuf),
    Store,
}

impl PackageOrigin {
    /// `name` may itself be a path to a `.pkg` file, or name one under `local_dir`.
    pub fn select(name: &str, local_dir: Option<&Path>) -> Self {
        let direct = Path::new(name);
        if direct.extension().is_some_and(|e| e == PACKAGE_EXT) && direct.is_file() {
            return PackageOrigin::Local(direct.to_path_buf());
        }
        if let Some(dir) = local_dir {
            let candidate = dir.join(format!("{name}.{PACKAGE_EXT}"));
            if candidate.is_file() {
                return PackageOrigin::Local(candidate);
            }
        }
        PackageOrigin::Store
    }
}

// Removes the store download on every exit path.
struct TempDownload(PathBuf);

impl Drop for TempDownload {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

pub fn acquire(
    name: &str,
    opts: &AcquireOptions,
    factory: &dyn SourceFactory,
) -> Result<(PathBuf, PackageInfo)> {
    let target_dir = if opts.target_dir.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        opts.target_dir.clone()
    };

    match PackageOrigin::select(name, opts.local_dir.as_deref()) {
        PackageOrigin::Local(path) => acquire_local(name, &path, &target_dir),
        PackageOrigin::Store => acquire_from_store(name, opts, &target_dir, factory),
    }
}

fn acquire_local(name: &str, path: &Path, target_dir: &Path) -> Result<(PathBuf, PackageInfo)> {
    let pkg = PackageFile::open(path).map_err(|e| e.context(format!("package '{name}'")))?;
    let mut info = pkg
        .read_info()
        .map_err(|e| e.context(format!("package '{name}'")))?;
    if info.revision.is_unset() {
        info.revision = Revision::SIDELOAD;
    }

    let dst = target_dir.join(info.file_name());
    copy_into(name, path, &dst)?;
    tracing::info!(package = %info.name, revision = %info.revision, src = %path.display(), "using local package");
    Ok((dst, info))
}

fn acquire_from_store(
    name: &str,
    opts: &AcquireOptions,
    target_dir: &Path,
    factory: &dyn SourceFactory,
) -> Result<(PathBuf, PackageInfo)> {
    let source = factory
        .open(normalize_store_id(&opts.store_id), &opts.architecture)
        .map_err(|e| e.context(format!("package '{name}'")))?;

    let info = source
        .resolve(name, &opts.channel, false, None)
        .map_err(|e| e.context(format!("cannot find package '{name}'")))?;
    info.check_name()
        .map_err(|e| e.context(format!("package '{name}'")))?;
    let Some(download) = info.download.as_ref() else {
        return Err(Error::new(
            ErrorKind::NotFound,
            format!("package '{name}' has no download information"),
        ));
    };

    let tmp = source
        .download(name, download, &mut LogProgress::default(), None)
        .map(TempDownload)
        .map_err(|e| {
            Error::new(
                ErrorKind::Download,
                format!("cannot download package '{name}': {e}"),
            )
        })?;

    let dst = target_dir.join(info.file_name());
    copy_into(name, &tmp.0, &dst)?;
    tracing::info!(package = %info.name, revision = %info.revision, channel = %info.channel, "fetched package");
    Ok((dst, info))
}

fn copy_into(name: &str, src: &Path, dst: &Path) -> Result<()> {
    rootfs::atomic_copy(src, dst, 0o644).map_err(|e| {
        Error::new(
            ErrorKind::Copy,
            format!("cannot copy package '{name}': {e}"),
        )
    })?;
    tracing::debug!(src = %src.display(), dst = %dst.display(), "copied package");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::fs;

    use crate::package::DownloadInfo;
    use crate::store::{PackageSource, ProgressMeter, UserState};

    #[derive(Default)]
    struct Calls {
        opened: Vec<String>,
        downloads: Vec<PathBuf>,
    }

    struct FakeFactory {
        scratch: PathBuf,
        calls: RefCell<Calls>,
    }

    struct FakeSource<'a> {
        factory: &'a FakeFactory,
    }

    impl SourceFactory for FakeFactory {
        fn open(&self, store_id: &str, _architecture: &str) -> Result<Box<dyn PackageSource + '_>> {
            self.calls.borrow_mut().opened.push(store_id.to_string());
            Ok(Box::new(FakeSource { factory: self }))
        }
    }

    impl PackageSource for FakeSource<'_> {
        fn resolve(
            &self,
            name: &str,
            channel: &str,
            _devmode: bool,
            _user: Option<&UserState>,
        ) -> Result<PackageInfo> {
            if name == "missing" {
                return Err(Error::new(ErrorKind::NotFound, "no such package"));
            }
            let canonical = match name {
                "sneaky" => "../sneaky",
                other => other,
            };
            Ok(PackageInfo {
                name: canonical.to_string(),
                revision: Revision(12),
                channel: channel.to_string(),
                download: Some(DownloadInfo::default()),
                ..Default::default()
            })
        }

        fn download(
            &self,
            name: &str,
            _download: &DownloadInfo,
            _progress: &mut dyn ProgressMeter,
            _user: Option<&UserState>,
        ) -> Result<PathBuf> {
            let p = self.factory.scratch.join(format!("{name}.partial"));
            fs::write(&p, name.as_bytes()).expect("write download");
            self.factory.calls.borrow_mut().downloads.push(p.clone());
            Ok(p)
        }
    }

    #[test]
    fn store_packages_are_copied_and_temp_download_removed() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let factory = factory(tmp.path());
        let opts = AcquireOptions {
            target_dir: tmp.path().join("out"),
            channel: "stable".into(),
            store_id: "canonical".into(),
            architecture: "amd64".into(),
            local_dir: None,
        };

        let (path, info) = acquire("core", &opts, &factory).expect("acquire");
        assert_eq!(path, tmp.path().join("out/core_12.pkg"));
        assert_eq!(fs::read(&path).expect("read"), b"core");
        assert_eq!(info.channel, "stable");

        let calls = factory.calls.borrow();
        assert_eq!(calls.opened, vec![String::new()]);
        assert!(!calls.downloads[0].exists(), "temp download left behind");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).expect("meta").permissions().mode();
            assert_eq!(mode & 0o777, 0o644);
        }
    }

    #[test]
    fn unknown_packages_keep_not_found_kind() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let factory = factory(tmp.path());
        let opts = AcquireOptions {
            target_dir: tmp.path().to_path_buf(),
            ..Default::default()
        };
        let err = acquire("missing", &opts, &factory).expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("'missing'"));
    }

    fn write_local_pkg(path: &Path, meta: &[u8]) {
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        let mut b = tar::Builder::new(fs::File::create(path).expect("create"));
        let mut header = tar::Header::new_gnu();
        header.set_size(meta.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        b.append_data(&mut header, "meta/package.toml", meta)
            .expect("append");
        b.finish().expect("finish");
    }

    fn factory(tmp: &Path) -> FakeFactory {
        FakeFactory {
            scratch: tmp.to_path_buf(),
            calls: RefCell::default(),
        }
    }

    #[test]
    fn local_override_skips_the_store() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let local = tmp.path().join("local");
        write_local_pkg(&local.join("hello.pkg"), b"name = \"hello\"\nversion = \"1.0\"\n");

        let factory = factory(tmp.path());
        let opts = AcquireOptions {
            target_dir: tmp.path().join("out"),
            local_dir: Some(local.clone()),
            ..Default::default()
        };

        assert_eq!(
            PackageOrigin::select("hello", Some(&local)),
            PackageOrigin::Local(local.join("hello.pkg"))
        );
        let (path, info) = acquire("hello", &opts, &factory).expect("acquire local");
        assert_eq!(info.revision, Revision::SIDELOAD);
        assert_eq!(path, tmp.path().join("out/hello_x1.pkg"));
        assert!(factory.calls.borrow().opened.is_empty());
    }

    #[test]
    fn package_names_cannot_leave_the_target_dir() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let local = tmp.path().join("local");
        write_local_pkg(&local.join("escaped.pkg"), b"name = \"../../escaped\"\n");

        let factory = factory(tmp.path());
        let opts = AcquireOptions {
            target_dir: tmp.path().join("a/b/out"),
            local_dir: Some(local),
            ..Default::default()
        };
        let err = acquire("escaped", &opts, &factory).expect_err("local name escapes");
        assert_eq!(err.kind(), ErrorKind::Decode);
        assert!(!tmp.path().join("a/escaped_x1.pkg").exists());

        let err = acquire("sneaky", &opts, &factory).expect_err("store name escapes");
        assert_eq!(err.kind(), ErrorKind::Decode);
        assert!(factory.calls.borrow().downloads.is_empty());
        assert!(!tmp.path().join("a/b/sneaky_12.pkg").exists());
    }
}
