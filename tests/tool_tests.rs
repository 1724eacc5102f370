//! Tests against the real squashfs-tools and e2fsprogs.
//!
//! Ignored by default. Run with:
//!   cargo test -- --ignored tool

mod helpers;

use helpers::TestEnv;
use std::fs;

use uceforge::assemble;
use uceforge::backend::{FilesystemImageBackend, ToolBackend};
use uceforge::config::Owner;
use uceforge::container;
use uceforge::edit::{self, EditAction, EditStrategy};
use uceforge::layout::{container_len, SAVE_SIZE};
use uceforge::process;
use uceforge::save::{self, SaveKind};

fn require_tools() -> bool {
    let missing: Vec<&str> = ["mksquashfs", "mke2fs", "debugfs", "truncate"]
        .into_iter()
        .filter(|tool| !process::exists(tool))
        .collect();
    if !missing.is_empty() {
        eprintln!("Skipping: missing {}", missing.join(", "));
        return false;
    }
    true
}

#[test]
#[ignore]
fn test_tool_build_real_container() {
    if !require_tools() {
        return;
    }
    let env = TestEnv::new();
    fs::create_dir_all(env.staged.join("save/upper")).unwrap();
    fs::write(env.staged.join("save/upper/slot1.srm"), b"real").unwrap();
    let backend = ToolBackend::new(env.config.tools.clone());

    let report = assemble::build(&backend, &env.config, &env.staged, &env.output()).unwrap();
    assert_eq!(report.save_kind, SaveKind::LooseDir);
    assert_eq!(
        fs::metadata(env.output()).unwrap().len(),
        container_len(report.fs_len)
    );

    let data = fs::read(env.output()).unwrap();
    assert_eq!(&data[..4], b"hsqs");

    let inspected = container::inspect(&env.output()).unwrap();
    assert!(inspected.is_valid());
    assert!(inspected.save_digest_ok);

    // Every inode in the save partition belongs to the console user
    let image = env.path("save.img");
    container::extract_save(&env.output(), &image).unwrap();
    let entries = backend.list_tree(&image).unwrap();
    assert!(entries.iter().any(|e| e.path == "/upper/slot1.srm"));
    assert!(entries.iter().any(|e| e.path == "/upper/.keep"));
    assert!(save::permissions::is_normalized(
        &entries,
        Owner {
            uid: 1002,
            gid: 1002
        }
    ));
}

#[test]
#[ignore]
fn test_tool_generated_blank() {
    if !require_tools() {
        return;
    }
    let env = TestEnv::new();
    let backend = ToolBackend::new(env.config.tools.clone());
    let work = uceforge::workdir::WorkDir::new("test").unwrap();
    let output = work.join("blank.img");

    save::generate_blank(&backend, env.config.save_owner, &work, &output).unwrap();

    assert_eq!(fs::metadata(&output).unwrap().len(), SAVE_SIZE);
    let entries = backend.list_tree(&output).unwrap();
    for dir in ["/upper", "/work"] {
        let entry = entries.iter().find(|e| e.path == dir).unwrap();
        assert!(entry.is_dir());
        assert_eq!(entry.permissions(), 0o777);
        assert_eq!(entry.uid, 1002);
    }
}

#[test]
#[ignore]
fn test_tool_offline_edit() {
    if !require_tools() {
        return;
    }
    let env = TestEnv::new();
    let backend = ToolBackend::new(env.config.tools.clone());
    assemble::build(&backend, &env.config, &env.staged, &env.output()).unwrap();
    let before = fs::read(env.output()).unwrap();
    let prefix_len = before.len() - SAVE_SIZE as usize;

    let cfg = env.path("retroarch.cfg");
    fs::write(&cfg, b"video_fullscreen = true\n").unwrap();
    let action = EditAction::ApplyFile {
        source: cfg,
        destination: "upper/retroarch.cfg".into(),
    };
    edit::edit_save(
        &backend,
        &env.config,
        &env.output(),
        EditStrategy::Offline,
        false,
        &action,
        &mut |_: &std::path::Path| -> anyhow::Result<()> { Ok(()) },
    )
    .unwrap();

    let after = fs::read(env.output()).unwrap();
    assert_eq!(&after[..prefix_len], &before[..prefix_len]);

    let image = env.path("edited.img");
    container::extract_save(&env.output(), &image).unwrap();
    let dump = env.path("dump");
    fs::create_dir_all(&dump).unwrap();
    backend.dump_tree(&image, &dump).unwrap();
    assert_eq!(
        fs::read(dump.join("upper/retroarch.cfg")).unwrap(),
        b"video_fullscreen = true\n"
    );
}
