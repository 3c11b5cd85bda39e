#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use bootseed::package::{DownloadInfo, PackageInfo, PackageKind, Revision};
use bootseed::store::{PackageSource, ProgressMeter, SourceFactory, UserState};
use bootseed::{Error, ErrorKind, Result};

pub const GRUB_CFG: &[u8] = b"set default=0\nmenuentry bootseed {}\n";

/// Write a package archive with `meta/package.toml` plus `files`.
pub fn build_pkg(path: &Path, name: &str, kind: &str, files: &[(&str, &[u8])]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let meta = format!("name = \"{name}\"\ntype = \"{kind}\"\nversion = \"1.0\"\n");
    let mut b = tar::Builder::new(File::create(path).unwrap());
    let mut append = |entry: &str, bytes: &[u8]| {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_cksum();
        b.append_data(&mut header, entry, bytes).unwrap();
    };
    append("meta/package.toml", meta.as_bytes());
    for (entry, bytes) in files {
        append(entry, bytes);
    }
    b.finish().unwrap();
}

pub fn write_model(dir: &Path, required: &[&str]) -> PathBuf {
    let mut body = String::from(
        "type: model\nauthority-id: acme\nbrand-id: acme\nseries: 16\nmodel: pc\nstore: canonical\narchitecture: amd64\ngadget: pc\nkernel: pc-kernel\ncore: core\n",
    );
    if !required.is_empty() {
        body.push_str("required-packages:\n");
        for r in required {
            body.push_str(&format!("  - {r}\n"));
        }
    }
    body.push_str("\nc2lnbmF0dXJl\n");
    let path = dir.join("pc.model");
    fs::write(&path, body).unwrap();
    path
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bootloader {
    Grub,
    UBoot,
}

/// In-process store serving packages built under `<dir>/store`.
pub struct FakeStore {
    dir: PathBuf,
    packages: BTreeMap<String, PackageInfo>,
    pub opened: Mutex<Vec<(String, String)>>,
    pub resolved: Mutex<Vec<String>>,
    pub downloads: Mutex<Vec<PathBuf>>,
}

impl FakeStore {
    pub fn new(dir: &Path) -> Self {
        fs::create_dir_all(dir.join("store")).unwrap();
        fs::create_dir_all(dir.join("downloads")).unwrap();
        Self {
            dir: dir.to_path_buf(),
            packages: BTreeMap::new(),
            opened: Mutex::default(),
            resolved: Mutex::default(),
            downloads: Mutex::default(),
        }
    }

    /// Gadget, core and kernel of `write_model`, plus `extra` app packages.
    pub fn with_model_packages(dir: &Path, bootloader: Bootloader, extra: &[&str]) -> Self {
        let mut store = Self::new(dir);
        match bootloader {
            Bootloader::Grub => store.add("pc", PackageKind::Gadget, 3, &[("grub.conf", GRUB_CFG)]),
            Bootloader::UBoot => store.add("pc", PackageKind::Gadget, 3, &[("uboot.conf", b"")]),
        }
        store.add("core", PackageKind::Os, 120, &[("bin/sh", b"#!")]);
        store.add(
            "pc-kernel",
            PackageKind::Kernel,
            7,
            &[
                ("kernel.img", b"vmlinuz"),
                ("initrd.img", b"initrd"),
                ("dtbs/pc.dtb", b"dtb"),
            ],
        );
        for (i, name) in extra.iter().enumerate() {
            store.add(name, PackageKind::App, 10 + i as i64, &[]);
        }
        store
    }

    pub fn add(&mut self, name: &str, kind: PackageKind, revision: i64, files: &[(&str, &[u8])]) {
        let path = self.dir.join("store").join(format!("{name}.pkg"));
        build_pkg(&path, name, kind.as_str(), files);
        let info = PackageInfo {
            name: name.to_string(),
            id: format!("{name}-id"),
            revision: Revision(revision),
            publisher_id: "acme-id".into(),
            publisher: "Acme".into(),
            kind,
            version: "1.0".into(),
            download: Some(DownloadInfo {
                url: path.display().to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.packages.insert(name.to_string(), info);
    }

    pub fn resolved(&self) -> Vec<String> {
        self.resolved.lock().unwrap().clone()
    }
}

struct FakeSource<'a> {
    store: &'a FakeStore,
}

impl SourceFactory for FakeStore {
    fn open(&self, store_id: &str, architecture: &str) -> Result<Box<dyn PackageSource + '_>> {
        self.opened
            .lock()
            .unwrap()
            .push((store_id.to_string(), architecture.to_string()));
        Ok(Box::new(FakeSource { store: self }))
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
        self.store.resolved.lock().unwrap().push(name.to_string());
        let mut info = self.store.packages.get(name).cloned().ok_or_else(|| {
            Error::new(ErrorKind::NotFound, format!("no package '{name}' in channel '{channel}'"))
        })?;
        info.channel = channel.to_string();
        Ok(info)
    }

    fn download(
        &self,
        name: &str,
        download: &DownloadInfo,
        progress: &mut dyn ProgressMeter,
        _user: Option<&UserState>,
    ) -> Result<PathBuf> {
        let mut downloads = self.store.downloads.lock().unwrap();
        let dst = self
            .store
            .dir
            .join("downloads")
            .join(format!("{name}.{}.partial", downloads.len()));
        let n = fs::copy(&download.url, &dst)?;
        progress.start(name, n);
        progress.set(n);
        progress.finished();
        downloads.push(dst.clone());
        Ok(dst)
    }
}

/// Every path below `root` with its file contents (directories map to `None`).
pub fn snapshot(root: &Path) -> BTreeMap<PathBuf, Option<Vec<u8>>> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .map(|e| e.unwrap())
        .map(|e| {
            let rel = e.path().strip_prefix(root).unwrap().to_path_buf();
            let body = e.file_type().is_file().then(|| fs::read(e.path()).unwrap());
            (rel, body)
        })
        .collect()
}
