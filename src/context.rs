//! The shared work context threaded through every feature stage function.
//!
//! The context is exclusively owned by the active orchestrator for the
//! duration of one run and passed to stage functions by mutable reference.
//! Field-level contract:
//!
//! - `notes` — read anywhere; build-time funcs may write (e.g. the deps
//!   feature fills `notes.deps` before the brp is finalized).
//! - `manifest` — build: populated by core's build func, then mutated by
//!   later funcs (perms, checksum). install: seeded from the BLOB header;
//!   one-shot funcs may drop entries (strip_docs) before the iterator
//!   phase extracts what's left.
//! - `topdir` — per-run scratch directory; any func may create files there.
//! - `source_dir` / `payload_dir` — build only. The build script consumes
//!   the source tree and populates the payload tree.
//! - `dest_root` — install/uninstall only; the target filesystem root.
//! - `blob` — install only; opened by the orchestrator before stages run.
//! - `deps` / `installed_size` — per-run aggregates. Iterator funcs only
//!   append/add for the path they were handed, so a partitioned iterator
//!   phase needs nothing more than a merge of these after workers join.
//! - `force` — read-only; downgrades dependency failures to warnings.
//! - `verbosity` — read-only.

use std::path::PathBuf;

use crate::blob::Blob;
use crate::manifest::Manifest;
use crate::notes::Notes;

pub struct Context {
    pub notes: Notes,
    pub manifest: Manifest,
    pub topdir: PathBuf,
    pub source_dir: PathBuf,
    pub payload_dir: PathBuf,
    pub dest_root: PathBuf,
    pub blob: Option<Blob>,
    /// Library names discovered at build time; deduplicated and sorted
    /// into `notes.deps` when the brp is finalized.
    pub deps: Vec<String>,
    /// Bytes of regular-file payload actually installed on disk.
    pub installed_size: u64,
    pub force: bool,
    pub verbosity: u8,
}

impl Context {
    /// Context for a build run. `topdir` is the scratch directory; the
    /// payload tree lives at `topdir/payload`.
    pub fn for_build(notes: Notes, topdir: PathBuf, source_dir: PathBuf) -> Self {
        let payload_dir = topdir.join("payload");
        Self {
            notes,
            manifest: Manifest::new(),
            topdir,
            source_dir,
            payload_dir,
            dest_root: PathBuf::new(),
            blob: None,
            deps: Vec::new(),
            installed_size: 0,
            force: false,
            verbosity: 0,
        }
    }

    /// Context for an install or uninstall run against `dest_root`.
    pub fn for_install(notes: Notes, topdir: PathBuf, dest_root: PathBuf) -> Self {
        Self {
            notes,
            manifest: Manifest::new(),
            topdir,
            source_dir: PathBuf::new(),
            payload_dir: PathBuf::new(),
            dest_root,
            blob: None,
            deps: Vec::new(),
            installed_size: 0,
            force: false,
            verbosity: 0,
        }
    }
}
