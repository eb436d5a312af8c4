//! The package manifest: archive-relative path -> file metadata.
//!
//! A manifest is built either by walking a payload directory at build time
//! or by deserializing a BLOB header at install time. Keys always begin
//! with `/` and iteration is lexicographically sorted, which keeps builds
//! deterministic and puts hardlink targets (usually) before the links that
//! reference them.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::Path;

use crate::error::SrpError;

/// What kind of filesystem node an entry recreates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
    /// A hardlink to another manifest entry. `link_target` must resolve
    /// (directly or through further hardlinks) to a non-symlink,
    /// non-hardlink entry in the same manifest.
    Hardlink,
    CharDevice,
    BlockDevice,
    Fifo,
}

/// Metadata snapshot for one filesystem node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub kind: FileKind,
    /// Permission bits only (type bits live in `kind`).
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    /// Symbolic owner, preferred over `uid` at extraction time when set.
    pub uname: Option<String>,
    pub gname: Option<String>,
    /// Payload byte count; 0 for everything but Regular.
    pub size: u64,
    pub mtime: u64,
    /// Symlink target, or the manifest path a hardlink points at.
    pub link_target: Option<String>,
    pub devmajor: Option<u32>,
    pub devminor: Option<u32>,
    /// Byte offset into the BLOB payload region. Set if and only if
    /// `kind == Regular`, and only once the entry has been serialized
    /// into a BLOB.
    pub offset: Option<u64>,
    /// SHA-1 hex digest of the file contents, recorded by the checksum
    /// feature.
    pub checksum: Option<String>,
    /// Feature-contributed fields.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl Entry {
    /// A bare entry of the given kind with everything else zeroed.
    pub fn new(kind: FileKind) -> Self {
        Self {
            kind,
            mode: 0,
            uid: 0,
            gid: 0,
            uname: None,
            gname: None,
            size: 0,
            mtime: 0,
            link_target: None,
            devmajor: None,
            devminor: None,
            offset: None,
            checksum: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn is_regular(&self) -> bool {
        self.kind == FileKind::Regular
    }
}

/// Ordered map of archive-relative path to [`Entry`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    entries: BTreeMap<String, Entry>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a manifest by recursively walking `root`.
    ///
    /// Captures metadata only; file contents are read later by the BLOB
    /// codec. Sibling order is lexicographic. Unsupported node kinds
    /// (sockets) are skipped with a warning. Ownership is recorded as
    /// root:root; the perms feature overrides it where the notes say so.
    ///
    /// A regular file whose inode has already been seen during this walk is
    /// recorded as a Hardlink to the first path that carried it, which keeps
    /// link targets sorted before their links.
    pub fn from_directory(root: &Path) -> Result<Self, SrpError> {
        let mut manifest = Self::new();
        // (dev, ino) of regular files with nlink > 1 -> first archive path
        let mut seen_inodes: HashMap<(u64, u64), String> = HashMap::new();

        for walk_entry in walkdir::WalkDir::new(root)
            .min_depth(1)
            .sort_by_file_name()
        {
            let walk_entry = walk_entry.map_err(|e| {
                SrpError::Io(e.into_io_error().unwrap_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::Other, "walk loop")
                }))
            })?;
            let path = walk_entry.path();
            let meta = std::fs::symlink_metadata(path)?;
            let arcname = archive_path(root, path);

            let ftype = meta.file_type();
            let mut entry = if ftype.is_dir() {
                Entry::new(FileKind::Directory)
            } else if ftype.is_symlink() {
                let mut e = Entry::new(FileKind::Symlink);
                e.link_target = Some(
                    std::fs::read_link(path)?
                        .to_string_lossy()
                        .into_owned(),
                );
                e
            } else if ftype.is_file() {
                let key = (meta.dev(), meta.ino());
                if meta.nlink() > 1 {
                    if let Some(first) = seen_inodes.get(&key) {
                        let mut e = Entry::new(FileKind::Hardlink);
                        e.link_target = Some(first.clone());
                        e
                    } else {
                        seen_inodes.insert(key, arcname.clone());
                        let mut e = Entry::new(FileKind::Regular);
                        e.size = meta.len();
                        e
                    }
                } else {
                    let mut e = Entry::new(FileKind::Regular);
                    e.size = meta.len();
                    e
                }
            } else if ftype.is_char_device() || ftype.is_block_device() {
                let mut e = Entry::new(if ftype.is_char_device() {
                    FileKind::CharDevice
                } else {
                    FileKind::BlockDevice
                });
                e.devmajor = Some(dev_major(meta.rdev()));
                e.devminor = Some(dev_minor(meta.rdev()));
                e
            } else if ftype.is_fifo() {
                Entry::new(FileKind::Fifo)
            } else {
                // Sockets (and anything else exotic) can't be archived.
                println!(
                    "WARNING: ignoring unsupported file type: {}",
                    SrpError::UnsupportedFileType(arcname.clone())
                );
                continue;
            };

            entry.mode = meta.mode() & 0o7777;
            entry.mtime = meta.mtime().max(0) as u64;
            // Captured as root:root regardless of who ran the build.
            entry.uid = 0;
            entry.gid = 0;

            manifest.insert(arcname, entry);
        }

        Ok(manifest)
    }

    /// Insert an entry. `path` must be archive-relative, beginning with `/`.
    pub fn insert(&mut self, path: String, entry: Entry) {
        debug_assert!(path.starts_with('/') && path != "/." && path != ".");
        self.entries.insert(path, entry);
    }

    pub fn get(&self, path: &str) -> Option<&Entry> {
        self.entries.get(path)
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut Entry> {
        self.entries.get_mut(path)
    }

    pub fn remove(&mut self, path: &str) -> Option<Entry> {
        self.entries.remove(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Sorted iteration over (path, entry).
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Entry)> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut Entry)> {
        self.entries.iter_mut()
    }

    /// Sorted snapshot of the manifest paths. Orchestrators iterate over
    /// this snapshot so stage functions are free to mutate entries.
    pub fn paths(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Archive-relative path for `path` under `root`, beginning with `/`.
fn archive_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    format!("/{}", rel.to_string_lossy())
}

// Linux dev_t packing (glibc layout).
pub(crate) fn dev_major(rdev: u64) -> u32 {
    (((rdev >> 32) & 0xffff_f000) | ((rdev >> 8) & 0xfff)) as u32
}

pub(crate) fn dev_minor(rdev: u64) -> u32 {
    (((rdev >> 12) & 0xffff_ff00) | (rdev & 0xff)) as u32
}

pub(crate) fn make_dev(major: u32, minor: u32) -> u64 {
    let major = major as u64;
    let minor = minor as u64;
    ((major & 0xffff_f000) << 32)
        | ((major & 0xfff) << 8)
        | ((minor & 0xffff_ff00) << 12)
        | (minor & 0xff)
}
