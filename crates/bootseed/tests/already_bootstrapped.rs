mod common;

use std::fs;

use bootseed::ErrorKind;
use bootseed::image::{self, Options};
use bootseed::rootfs::TargetDirs;

use common::{Bootloader, FakeStore, snapshot, write_model};

#[test]
fn existing_state_marker_refuses_bootstrap_without_touching_the_target() {
    let tmp = tempfile::tempdir().unwrap();
    let model = write_model(tmp.path(), &[]);
    let store = FakeStore::with_model_packages(tmp.path(), Bootloader::Grub, &[]);

    let root = tmp.path().join("root");
    let dirs = TargetDirs::new(&root);
    fs::create_dir_all(dirs.state_file().parent().unwrap()).unwrap();
    fs::write(dirs.state_file(), b"{}").unwrap();
    fs::create_dir_all(root.join("etc")).unwrap();
    fs::write(root.join("etc/hostname"), b"device\n").unwrap();
    let before = snapshot(&root);

    let opts = Options {
        root_dir: root.clone(),
        channel: "stable".into(),
        model_file: model,
        gadget_unpack_dir: tmp.path().join("gadget"),
        ..Default::default()
    };
    let err = image::bootstrap_to_root_dir(&opts, &store).expect_err("already bootstrapped");
    assert_eq!(err.kind(), ErrorKind::AlreadyBootstrapped);
    assert!(err.to_string().contains("cannot bootstrap over existing system"));

    assert_eq!(snapshot(&root), before);
    assert!(store.opened.lock().unwrap().is_empty());
}

#[test]
fn marker_check_precedes_model_decoding() {
    let tmp = tempfile::tempdir().unwrap();
    let dirs = TargetDirs::new(tmp.path().join("root"));
    fs::create_dir_all(dirs.state_file().parent().unwrap()).unwrap();
    fs::write(dirs.state_file(), b"{}").unwrap();

    let opts = Options {
        root_dir: dirs.root().to_path_buf(),
        model_file: tmp.path().join("missing.model"),
        ..Default::default()
    };
    let store = FakeStore::new(tmp.path());
    let err = image::bootstrap_to_root_dir(&opts, &store).expect_err("already bootstrapped");
    assert_eq!(err.kind(), ErrorKind::AlreadyBootstrapped);
}
