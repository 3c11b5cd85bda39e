mod common;

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, mpsc};

use bootseed::ErrorKind;
use bootseed::config::ConfigDoc;
use bootseed::executor::{ChannelSink, ExecCtx, ExecEvent, builtin_registry, execute_plan};
use bootseed::modules::plan_for;
use bootseed::rootfs::TargetDirs;

use common::{Bootloader, FakeStore, write_model};

fn doc(src: &str) -> ConfigDoc {
    ConfigDoc {
        path: PathBuf::from("<mem>"),
        value: toml::from_str(src).unwrap(),
    }
}

const IMAGE: &str = r#"
[build]
name = "pc"

[image]
model_file = "pc.model"
root_dir = "root"
gadget_unpack_dir = "gadget"
"#;

#[test]
fn image_table_plans_gadget_before_bootstrap() {
    let plan = plan_for(&doc(IMAGE)).unwrap();
    let ids: Vec<_> = plan
        .ordered()
        .unwrap()
        .into_iter()
        .map(|t| t.id.clone())
        .collect();
    assert_eq!(ids, ["core.init", "image.gadget", "image.bootstrap"]);
    assert_eq!(plan.get("image.gadget").unwrap().label, "Fetch and unpack gadget");
}

#[test]
fn step_labels_come_from_config() {
    let src = format!("{IMAGE}\n[image.steps.bootstrap]\nlabel = \"Seed rootfs\"\n");
    let plan = plan_for(&doc(&src)).unwrap();
    assert_eq!(plan.get("image.bootstrap").unwrap().label, "Seed rootfs");
}

#[test]
fn core_steps_cannot_be_disabled() {
    let src = format!("{IMAGE}\n[image.steps.gadget]\nenabled = false\n");
    let err = plan_for(&doc(&src)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert!(err.to_string().contains("image.steps.gadget"), "unexpected err: {err}");
}

#[test]
fn disabled_image_module_plans_only_init() {
    let src = "[image]\nenabled = false\n";
    let plan = plan_for(&doc(src)).unwrap();
    assert_eq!(plan.tasks().count(), 1);
}

#[test]
fn rejects_unsupported_top_level_table() {
    let err = plan_for(&doc("[buildroot]\nversion = \"2024.02\"\n")).unwrap_err();
    assert!(err.to_string().contains("'buildroot'"), "unexpected err: {err}");
}

#[test]
fn rejects_image_without_model_file() {
    let err = plan_for(&doc("[image]\nroot_dir = \"root\"\ngadget_unpack_dir = \"g\"\n"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert!(err.to_string().contains("model_file"));
}

#[test]
fn run_executes_plan_against_injected_store() {
    let tmp = tempfile::tempdir().unwrap();
    write_model(tmp.path(), &[]);
    let store = Arc::new(FakeStore::with_model_packages(tmp.path(), Bootloader::Grub, &[]));
    let build = tmp.path().join("pc.toml");
    fs::write(&build, IMAGE).unwrap();

    let doc = bootseed::config::load(&build).unwrap();
    let plan = plan_for(&doc).unwrap();
    let reg = builtin_registry().unwrap();

    // Dry run reports every task but writes nothing.
    let (tx, rx) = mpsc::channel();
    let mut ctx = ExecCtx::new(true, Arc::new(ChannelSink::new(tx))).with_source_factory(store.clone());
    execute_plan(&doc, &plan, &reg, &mut ctx).unwrap();
    drop(ctx);
    let finished = rx
        .iter()
        .filter(|e| matches!(e, ExecEvent::StepFinished { error: None, .. }))
        .count();
    assert_eq!(finished, 3);
    assert!(!tmp.path().join("root").exists());

    let (tx, rx) = mpsc::channel();
    let mut ctx = ExecCtx::new(false, Arc::new(ChannelSink::new(tx))).with_source_factory(store.clone());
    execute_plan(&doc, &plan, &reg, &mut ctx).unwrap();
    drop(ctx);
    let events: Vec<_> = rx.iter().collect();
    assert!(matches!(
        events.last(),
        Some(ExecEvent::RunFinished { completed: 3, error: None })
    ));
    assert!(events.iter().any(|e| matches!(
        e,
        ExecEvent::StepLog { id, line } if id == "image.bootstrap" && line.starts_with("seeded core")
    )));

    let dirs = TargetDirs::new(tmp.path().join("root"));
    assert!(dirs.seed_file().is_file());
    assert!(dirs.root().join("boot/grub/grub.cfg").is_file());

    // A second run hits the already-bootstrapped guard once the device wrote its state.
    fs::write(dirs.state_file(), b"{}").unwrap();
    let (tx, _rx) = mpsc::channel();
    let mut ctx = ExecCtx::new(false, Arc::new(ChannelSink::new(tx))).with_source_factory(store);
    let err = execute_plan(&doc, &plan, &reg, &mut ctx).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyBootstrapped);
    assert!(err.to_string().starts_with("task 'image.bootstrap' failed"));
}
