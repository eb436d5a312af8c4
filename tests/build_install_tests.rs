//! End-to-end build and install tests: brp creation, feature behavior,
//! database registration, uninstall, and run controls (dry-run, cancel,
//! force).

mod helpers;

use std::sync::atomic::Ordering;

use srp::context::Context;
use srp::db::{JsonDb, PackageDb};
use srp::features::FeatureRegistry;
use srp::notes::{FailurePolicy, NotesPerms, NotesPostinstall, PermsRule};
use srp::run::{Builder, Installer, Uninstaller};

use helpers::{notes_for, TestEnv};

const HELLO_SHA1: &str = "22596363b3de40b06f981fb85d82312e8c0ed511";

#[test]
fn test_build_applies_perms_and_checksums() {
    let env = TestEnv::new();
    env.add_payload_file("usr/bin/foo", b"hello world\n");

    let mut notes = notes_for("foo", &["perms"]);
    notes.perms = Some(NotesPerms {
        rules: vec![PermsRule {
            pattern: "/usr/bin/*".to_string(),
            mode: Some(0o755),
            uid: Some(0),
            gid: Some(0),
            uname: None,
            gname: None,
        }],
    });

    let registry = FeatureRegistry::builtin();
    let ctx = Context::for_build(notes, env.topdir.clone(), env.payload.clone());
    let mut builder = Builder::new(&registry, ctx, &[], env.out_dir.clone());
    let brp = builder
        .run()
        .expect("build failed")
        .expect("build produced no brp");
    assert!(brp.exists());
    assert!(brp.file_name().unwrap().to_str().unwrap().starts_with("foo-1.0."));

    let entry = builder
        .context()
        .manifest
        .get("/usr/bin/foo")
        .expect("manifest entry for /usr/bin/foo");
    assert_eq!(entry.mode, 493); // 0o755 from the perms rule
    assert_eq!(entry.uid, 0);
    assert_eq!(entry.gid, 0);
    assert_eq!(entry.checksum.as_deref(), Some(HELLO_SHA1));
}

#[test]
fn test_build_install_uninstall_round_trip() {
    let env = TestEnv::new();
    env.add_payload_file("usr/bin/tool", b"hello world\n");

    let registry = FeatureRegistry::builtin();
    let brp = env.build(&registry, notes_for("tool", &[]));

    let mut db = JsonDb::load(&env.db_path).expect("load db");
    let record = Installer::new(&registry, &mut db, env.dest_root.clone())
        .run(&brp, &env.install_topdir)
        .expect("install failed")
        .expect("install returned no record");
    assert_eq!(record.name, "tool");
    assert_eq!(record.version, "1.0");
    assert_eq!(
        std::fs::read(env.dest_root.join("usr/bin/tool")).unwrap(),
        b"hello world\n"
    );
    assert!(record.installed_size >= b"hello world\n".len() as u64);

    // Registration survives a reload from disk.
    let db = JsonDb::load(&env.db_path).expect("reload db");
    assert_eq!(db.names(), vec!["tool".to_string()]);
    assert_eq!(db.lookup("tool").len(), 1);

    let mut db = JsonDb::load(&env.db_path).expect("reload db");
    Uninstaller::new(&registry, &mut db, env.dest_root.clone())
        .run("tool", &env.install_topdir)
        .expect("uninstall failed");
    assert!(!env.dest_root.join("usr/bin/tool").exists());

    let db = JsonDb::load(&env.db_path).expect("reload db");
    assert!(db.names().is_empty());
}

#[test]
fn test_uninstall_of_absent_package_succeeds() {
    let env = TestEnv::new();
    let registry = FeatureRegistry::builtin();
    let mut db = JsonDb::load(&env.db_path).expect("load db");
    Uninstaller::new(&registry, &mut db, env.dest_root.clone())
        .run("never-installed", &env.install_topdir)
        .expect("uninstall of absent package should be a no-op");
}

#[test]
fn test_reinstall_refused_without_force() {
    let env = TestEnv::new();
    env.add_payload_file("usr/bin/tool", b"hello world\n");

    let registry = FeatureRegistry::builtin();
    let brp = env.build(&registry, notes_for("tool", &[]));

    let mut db = JsonDb::load(&env.db_path).expect("load db");
    Installer::new(&registry, &mut db, env.dest_root.clone())
        .run(&brp, &env.install_topdir)
        .expect("first install failed");

    let err = Installer::new(&registry, &mut db, env.dest_root.clone())
        .run(&brp, &env.install_topdir)
        .expect_err("identical reinstall should be refused");
    assert!(err.to_string().contains("already installed"));

    Installer::new(&registry, &mut db, env.dest_root.clone())
        .force(true)
        .run(&brp, &env.install_topdir)
        .expect("forced reinstall failed");
}

#[test]
fn test_reinstall_detected_when_install_trims_manifest() {
    let env = TestEnv::new();
    env.add_payload_file("usr/bin/tool", b"hello world\n");
    env.add_payload_file("usr/share/doc/tool/README", b"docs\n");

    // strip_docs rewrites the manifest during install; the reinstall
    // check must still recognize the second install as identical.
    let registry = FeatureRegistry::builtin();
    let brp = env.build(&registry, notes_for("tool", &["strip_docs"]));

    let mut db = JsonDb::load(&env.db_path).expect("load db");
    Installer::new(&registry, &mut db, env.dest_root.clone())
        .run(&brp, &env.install_topdir)
        .expect("first install failed");

    let err = Installer::new(&registry, &mut db, env.dest_root.clone())
        .run(&brp, &env.install_topdir)
        .expect_err("identical reinstall should be refused");
    assert!(err.to_string().contains("already installed"));
}

#[test]
fn test_no_upgrade_blocks_second_install() {
    let env = TestEnv::new();
    env.add_payload_file("usr/bin/tool", b"v1\n");

    let registry = FeatureRegistry::builtin();
    let brp = env.build(&registry, notes_for("tool", &[]));

    let mut db = JsonDb::load(&env.db_path).expect("load db");
    Installer::new(&registry, &mut db, env.dest_root.clone())
        .run(&brp, &env.install_topdir)
        .expect("first install failed");

    let err = Installer::new(&registry, &mut db, env.dest_root.clone())
        .no_upgrade(true)
        .run(&brp, &env.install_topdir)
        .expect_err("--no-upgrade should block");
    assert!(err.to_string().contains("no-upgrade"));
}

#[test]
fn test_missing_library_blocks_install_unless_forced() {
    let env = TestEnv::new();
    env.add_payload_file("usr/bin/tool", b"hello world\n");

    let mut notes = notes_for("tool", &[]);
    notes.deps.libs = vec!["libdoesnotexist.so.999".to_string()];

    let registry = FeatureRegistry::builtin();
    let brp = env.build(&registry, notes);

    let mut db = JsonDb::load(&env.db_path).expect("load db");
    let err = Installer::new(&registry, &mut db, env.dest_root.clone())
        .run(&brp, &env.install_topdir)
        .expect_err("install with unresolvable library should fail");
    let msg = format!("{:#}", err);
    assert!(msg.contains("missing required libraries"), "got: {}", msg);
    assert!(msg.contains("libdoesnotexist.so.999"), "got: {}", msg);
    // The check fires before anything lands on disk.
    assert!(!env.dest_root.join("usr/bin/tool").exists());

    Installer::new(&registry, &mut db, env.dest_root.clone())
        .force(true)
        .run(&brp, &env.install_topdir)
        .expect("forced install should downgrade to warnings");
    assert!(env.dest_root.join("usr/bin/tool").exists());
}

#[test]
fn test_strip_docs_filters_doc_paths() {
    let env = TestEnv::new();
    env.add_payload_file("usr/bin/tool", b"hello world\n");
    env.add_payload_file("usr/share/doc/tool/README", b"docs\n");

    let registry = FeatureRegistry::builtin();
    let brp = env.build(&registry, notes_for("tool", &["strip_docs"]));

    let mut db = JsonDb::load(&env.db_path).expect("load db");
    let record = Installer::new(&registry, &mut db, env.dest_root.clone())
        .run(&brp, &env.install_topdir)
        .expect("install failed")
        .expect("install returned no record");

    assert!(env.dest_root.join("usr/bin/tool").exists());
    assert!(!env.dest_root.join("usr/share/doc").exists());
    assert!(!record.manifest.contains("/usr/share/doc/tool/README"));
    assert!(record.manifest.contains("/usr/bin/tool"));
}

#[test]
fn test_postinstall_script_runs_against_dest_root() {
    let env = TestEnv::new();
    env.add_payload_file("usr/bin/tool", b"hello world\n");

    let mut notes = notes_for("tool", &["postinstall"]);
    notes.postinstall = Some(NotesPostinstall {
        buffer: "touch \"$SRP_ROOT_DIR/postinstall-ran\"\n".to_string(),
        failure_policy: FailurePolicy::Warning,
    });

    let registry = FeatureRegistry::builtin();
    let brp = env.build(&registry, notes);

    let mut db = JsonDb::load(&env.db_path).expect("load db");
    Installer::new(&registry, &mut db, env.dest_root.clone())
        .run(&brp, &env.install_topdir)
        .expect("install failed");
    assert!(env.dest_root.join("postinstall-ran").exists());
}

#[test]
fn test_postinstall_failure_policy() {
    let registry = FeatureRegistry::builtin();

    // warning: install succeeds despite the failing script
    let env = TestEnv::new();
    env.add_payload_file("usr/bin/tool", b"x\n");
    let mut notes = notes_for("tool", &["postinstall"]);
    notes.postinstall = Some(NotesPostinstall {
        buffer: "exit 1\n".to_string(),
        failure_policy: FailurePolicy::Warning,
    });
    let brp = env.build(&registry, notes);
    let mut db = JsonDb::load(&env.db_path).expect("load db");
    Installer::new(&registry, &mut db, env.dest_root.clone())
        .run(&brp, &env.install_topdir)
        .expect("warning policy should not fail the install");

    // error: install aborts
    let env = TestEnv::new();
    env.add_payload_file("usr/bin/tool", b"x\n");
    let mut notes = notes_for("tool", &["postinstall"]);
    notes.postinstall = Some(NotesPostinstall {
        buffer: "exit 1\n".to_string(),
        failure_policy: FailurePolicy::Error,
    });
    let brp = env.build(&registry, notes);
    let mut db = JsonDb::load(&env.db_path).expect("load db");
    let err = Installer::new(&registry, &mut db, env.dest_root.clone())
        .run(&brp, &env.install_topdir)
        .expect_err("error policy should fail the install");
    assert!(format!("{:#}", err).contains("postinstall failed"));
}

#[test]
fn test_dry_run_produces_nothing() {
    let env = TestEnv::new();
    env.add_payload_file("usr/bin/tool", b"x\n");

    let registry = FeatureRegistry::builtin();
    let ctx = Context::for_build(
        notes_for("tool", &[]),
        env.topdir.clone(),
        env.payload.clone(),
    );
    let result = Builder::new(&registry, ctx, &[], env.out_dir.clone())
        .dry_run(true)
        .run()
        .expect("dry run failed");
    assert!(result.is_none());
    assert!(!env.out_dir.exists());
    assert!(!env.topdir.join("BLOB").exists());
}

#[test]
fn test_dry_run_install_touches_nothing() {
    let env = TestEnv::new();
    env.add_payload_file("usr/bin/tool", b"x\n");

    let registry = FeatureRegistry::builtin();
    let brp = env.build(&registry, notes_for("tool", &[]));

    let mut db = JsonDb::load(&env.db_path).expect("load db");
    let result = Installer::new(&registry, &mut db, env.dest_root.clone())
        .dry_run(true)
        .run(&brp, &env.install_topdir)
        .expect("dry-run install failed");
    assert!(result.is_none());
    assert!(!env.dest_root.join("usr/bin/tool").exists());
    assert!(db.names().is_empty());
}

#[test]
fn test_cancellation_aborts_build() {
    let env = TestEnv::new();
    env.add_payload_file("usr/bin/tool", b"x\n");

    let registry = FeatureRegistry::builtin();
    let ctx = Context::for_build(
        notes_for("tool", &[]),
        env.topdir.clone(),
        env.payload.clone(),
    );
    let mut builder = Builder::new(&registry, ctx, &[], env.out_dir.clone());
    builder.cancel_flag().store(true, Ordering::Relaxed);
    let err = builder.run().expect_err("canceled build should fail");
    assert!(err.to_string().contains("canceled"));
    assert!(!env.out_dir.exists());
}

#[test]
fn test_verify_action_runs_on_installed_package() {
    let env = TestEnv::new();
    env.add_payload_file("usr/bin/tool", b"hello world\n");

    let registry = FeatureRegistry::builtin();
    let brp = env.build(&registry, notes_for("tool", &[]));

    let mut db = JsonDb::load(&env.db_path).expect("load db");
    let record = Installer::new(&registry, &mut db, env.dest_root.clone())
        .run(&brp, &env.install_topdir)
        .expect("install failed")
        .expect("install returned no record");

    srp::run::run_action(
        &registry,
        "verify",
        &record,
        env.dest_root.clone(),
        &env.install_topdir,
    )
    .expect("verify action failed");

    let err = srp::run::run_action(
        &registry,
        "no-such-action",
        &record,
        env.dest_root.clone(),
        &env.install_topdir,
    )
    .expect_err("unknown action should fail");
    assert!(err.to_string().contains("no-such-action"));
}

#[test]
fn test_no_option_disables_default_feature() {
    let env = TestEnv::new();
    env.add_payload_file("usr/bin/tool", b"hello world\n");

    let registry = FeatureRegistry::builtin();
    let ctx = Context::for_build(
        notes_for("tool", &[]),
        env.topdir.clone(),
        env.payload.clone(),
    );
    let mut builder = Builder::new(
        &registry,
        ctx,
        &["no_checksum".to_string()],
        env.out_dir.clone(),
    );
    builder.run().expect("build failed").expect("no brp");
    let entry = builder.context().manifest.get("/usr/bin/tool").unwrap();
    assert!(entry.checksum.is_none());
}
