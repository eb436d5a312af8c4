//! Shared test utilities for srp integration tests.

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use srp::context::Context;
use srp::features::FeatureRegistry;
use srp::notes::{Notes, NotesHeader};
use srp::run::Builder;

/// Test environment with temporary directories for one build/install run.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    /// Build scratch directory; the payload tree lives at topdir/payload
    pub topdir: PathBuf,
    /// Payload directory to populate before building
    pub payload: PathBuf,
    /// Where built brps land
    pub out_dir: PathBuf,
    /// Install destination root
    pub dest_root: PathBuf,
    /// Install scratch directory
    pub install_topdir: PathBuf,
    /// Package database path
    pub db_path: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base = temp_dir.path();

        let topdir = base.join("build");
        let payload = topdir.join("payload");
        let out_dir = base.join("out");
        let dest_root = base.join("root");
        let install_topdir = base.join("install");
        let db_path = base.join("db.json");

        fs::create_dir_all(&payload).expect("Failed to create payload dir");
        fs::create_dir_all(&install_topdir).expect("Failed to create install dir");

        Self {
            _temp_dir: temp_dir,
            topdir,
            payload,
            out_dir,
            dest_root,
            install_topdir,
            db_path,
        }
    }

    /// Write a regular file (and parents) under the payload tree.
    pub fn add_payload_file(&self, rel: &str, content: &[u8]) {
        let path = self.payload.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create payload parents");
        }
        fs::write(path, content).expect("Failed to write payload file");
    }

    /// Build a brp from the current payload tree with the given notes.
    pub fn build(&self, registry: &FeatureRegistry, notes: Notes) -> PathBuf {
        let ctx = Context::for_build(notes, self.topdir.clone(), self.payload.clone());
        let mut builder = Builder::new(registry, ctx, &[], self.out_dir.clone());
        builder
            .run()
            .expect("build failed")
            .expect("build produced no brp")
    }
}

/// Notes for a package named `name` with the given extra features enabled.
pub fn notes_for(name: &str, features: &[&str]) -> Notes {
    Notes {
        header: NotesHeader {
            name: name.to_string(),
            version: "1.0".to_string(),
            description: format!("{} test package", name),
            features: features.iter().map(|s| s.to_string()).collect(),
        },
        ..Notes::default()
    }
}

/// Inode of a path, for hardlink identity assertions.
pub fn inode_of(path: &Path) -> u64 {
    use std::os::unix::fs::MetadataExt;
    fs::metadata(path).expect("stat failed").ino()
}
