use std::path::Path;

use crate::bootloader::Bootloader;
use crate::error::{Error, ErrorKind, Result};
use crate::package::{PackageFile, PackageInfo, PackageKind};

/// Extract boot assets of the kernel package at `blob` for `bootloader`.
pub fn extract_kernel_assets(
    blob: &Path,
    info: &PackageInfo,
    bootloader: &dyn Bootloader,
) -> Result<()> {
    let pkg = PackageFile::open(blob)?;
    let meta = pkg
        .read_info()
        .map_err(|e| e.context(format!("cannot read kernel package {}", blob.display())))?;
    if meta.kind != PackageKind::Kernel {
        return Err(Error::new(
            ErrorKind::Extract,
            format!(
                "{} is a {} package, not a kernel",
                blob.display(),
                meta.kind.as_str()
            ),
        ));
    }
    bootloader.extract_kernel_assets(info, &pkg).map_err(|e| {
        e.context(format!(
            "cannot extract kernel assets for {} ({})",
            info.name,
            bootloader.name()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    use std::path::PathBuf;

    use crate::bootloader::{Grub, UBoot};
    use crate::rootfs::TargetDirs;

    fn build(path: &Path, files: &[(&str, &[u8])]) {
        let mut b = tar::Builder::new(File::create(path).expect("create"));
        for (name, bytes) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(bytes.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            b.append_data(&mut header, name, *bytes).expect("append");
        }
        b.finish().expect("finish");
    }

    const KERNEL_META: &[u8] = b"name = \"pc-kernel\"\ntype = \"kernel\"\n";

    #[test]
    fn uboot_extracts_kernel_initrd_and_dtbs() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let blob = tmp.path().join("pc-kernel_7.pkg");
        build(
            &blob,
            &[
                ("meta/package.toml", KERNEL_META),
                ("kernel.img", b"k"),
                ("initrd.img", b"i"),
                ("dtbs/a.dtb", b"d"),
            ],
        );
        let dirs = TargetDirs::new(tmp.path().join("root"));
        let info = PackageInfo {
            name: "pc-kernel".into(),
            ..Default::default()
        };

        extract_kernel_assets(&blob, &info, &UBoot::new(dirs.clone())).expect("extract");
        let out = dirs.root().join("boot/uboot/pc-kernel_7.pkg");
        assert!(out.join("kernel.img").is_file());
        assert!(out.join("initrd.img").is_file());
        assert!(out.join("dtbs/a.dtb").is_file());

        extract_kernel_assets(&blob, &info, &Grub::new(dirs.clone())).expect("grub no-op");
        assert!(!dirs.root().join("boot/grub").exists());
    }

    #[test]
    fn missing_initrd_and_wrong_kind_fail_extraction() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dirs = TargetDirs::new(tmp.path().join("root"));
        let info = PackageInfo::default();

        let no_initrd = tmp.path().join("k_1.pkg");
        build(&no_initrd, &[("meta/package.toml", KERNEL_META), ("kernel.img", b"k")]);
        let err = extract_kernel_assets(&no_initrd, &info, &UBoot::new(dirs.clone()))
            .expect_err("no initrd");
        assert_eq!(err.kind(), ErrorKind::Extract);

        let app = tmp.path().join("app_1.pkg");
        build(&app, &[("meta/package.toml", b"name = \"app\"\n")]);
        let err = extract_kernel_assets(&app, &info, &UBoot::new(dirs)).expect_err("not kernel");
        assert_eq!(err.kind(), ErrorKind::Extract);

        let missing = tmp.path().join("nope.pkg");
        let err = extract_kernel_assets(&missing, &info, &Grub::new(TargetDirs::new(tmp.path())))
            .expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::Open);
    }

    struct BrokenEnv;

    impl Bootloader for BrokenEnv {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn dir(&self) -> PathBuf {
            PathBuf::from("/boot/broken")
        }

        fn config_file(&self) -> PathBuf {
            self.dir().join("env")
        }

        fn get_boot_var(&self, _name: &str) -> Result<String> {
            Ok(String::new())
        }

        fn set_boot_vars(&self, _vars: &[(&str, &str)]) -> Result<()> {
            Ok(())
        }

        fn extract_kernel_assets(&self, _info: &PackageInfo, _pkg: &PackageFile) -> Result<()> {
            Err(Error::new(ErrorKind::BootVar, "env is read-only"))
        }
    }

    #[test]
    fn bootloader_errors_keep_their_kind() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let blob = tmp.path().join("pc-kernel_7.pkg");
        build(&blob, &[("meta/package.toml", KERNEL_META)]);
        let info = PackageInfo {
            name: "pc-kernel".into(),
            ..Default::default()
        };

        let err = extract_kernel_assets(&blob, &info, &BrokenEnv).expect_err("bootloader fails");
        assert_eq!(err.kind(), ErrorKind::BootVar);
        assert!(err.to_string().contains("pc-kernel (broken)"), "unexpected err: {err}");
    }
}
