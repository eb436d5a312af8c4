//! The BLOB archive codec.
//!
//! On-disk layout: a bincode-serialized [`Manifest`] header followed by the
//! payload bytes of every Regular entry, concatenated in sorted manifest
//! order. Metadata-only entries (directories, links, devices, fifos)
//! contribute no payload bytes. Keeping all metadata up front means
//! extracting one file never requires scanning past unrelated data: seek to
//! `hdr_offset + entry.offset` and copy `entry.size` bytes.

use std::ffi::CString;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use filetime::FileTime;

use crate::error::SrpError;
use crate::manifest::{make_dev, FileKind, Manifest};

/// Serialize `manifest` plus the payload bytes under `payload_dir` into
/// `out`.
///
/// Every Regular entry gets its `offset` (relative to end-of-header) and
/// actual `size` recorded before the header is written, so the header that
/// lands on disk already describes the payload that follows it. The payload
/// is spooled through a temp file so the header can be written first.
pub fn blob_create(
    manifest: &mut Manifest,
    payload_dir: &Path,
    out: &mut impl Write,
) -> Result<(), SrpError> {
    let mut payload = tempfile::tempfile()?;
    let mut offset: u64 = 0;

    for path in manifest.paths() {
        let entry = manifest.get_mut(&path).unwrap();
        if !entry.is_regular() {
            continue;
        }
        let src = payload_dir.join(path.trim_start_matches('/'));
        let mut f = File::open(&src).map_err(|e| SrpError::Extraction {
            path: path.clone(),
            source: e,
        })?;
        let copied = std::io::copy(&mut f, &mut payload)?;
        entry.offset = Some(offset);
        entry.size = copied;
        offset += copied;
    }

    bincode::serialize_into(&mut *out, manifest)?;

    payload.seek(SeekFrom::Start(0))?;
    std::io::copy(&mut payload, out)?;
    Ok(())
}

/// An opened BLOB: deserialized manifest plus a seekable handle positioned
/// for payload reads.
pub struct Blob {
    file: File,
    /// Stream position immediately after the serialized header; Regular
    /// entry offsets are relative to this.
    hdr_offset: u64,
    pub manifest: Manifest,
    ownership_warned: bool,
}

impl Blob {
    /// Open a BLOB file and deserialize its manifest header.
    ///
    /// bincode reads exactly the header's bytes, so the stream position
    /// after deserializing is the payload base offset.
    pub fn open(path: &Path) -> Result<Self, SrpError> {
        let mut file = File::open(path)?;
        let manifest: Manifest = bincode::deserialize_from(&mut file)?;
        let hdr_offset = file.stream_position()?;
        Ok(Self {
            file,
            hdr_offset,
            manifest,
            ownership_warned: false,
        })
    }

    /// Recreate the manifest entry `path` under `dest_root`.
    ///
    /// Parent directories are created as needed and a pre-existing node at
    /// the destination is removed first. For hardlinks whose target hasn't
    /// been materialized yet, the target is extracted on demand and the
    /// link retried, so extraction order never matters for correctness.
    ///
    /// Ownership restoration prefers `uname`/`gname` over the raw numeric
    /// ids, falling back to the numbers when the names don't resolve; a
    /// chown failure is a warning, not an error. Ownership is only
    /// attempted when running as root. Symlinks carry no independent
    /// owner/mode/mtime in this model and return right after creation.
    pub fn extract(&mut self, path: &str, dest_root: &Path) -> Result<(), SrpError> {
        let entry = self
            .manifest
            .get(path)
            .cloned()
            .ok_or_else(|| SrpError::Extraction {
                path: path.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such manifest entry"),
            })?;

        let wrap = |e: std::io::Error| SrpError::Extraction {
            path: path.to_string(),
            source: e,
        };

        // Manifest paths come from untrusted archives; refuse anything
        // that would resolve outside the destination root.
        if escapes_root(path) {
            return Err(wrap(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "path escapes the destination root",
            )));
        }

        let target = dest_root.join(path.trim_start_matches('/'));

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(wrap)?;
        }

        // Remove whatever is already there. Directories are left alone;
        // mkdir below tolerates them.
        match std::fs::symlink_metadata(&target) {
            Ok(meta) if !meta.is_dir() => {
                std::fs::remove_file(&target).map_err(wrap)?;
            }
            _ => {}
        }

        match entry.kind {
            FileKind::Regular => {
                let offset = entry.offset.ok_or_else(|| SrpError::Extraction {
                    path: path.to_string(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "regular entry without payload offset",
                    ),
                })?;
                self.file
                    .seek(SeekFrom::Start(self.hdr_offset + offset))
                    .map_err(wrap)?;
                let mut out = File::create(&target).map_err(wrap)?;
                let copied =
                    std::io::copy(&mut (&mut self.file).take(entry.size), &mut out).map_err(wrap)?;
                if copied != entry.size {
                    return Err(SrpError::Extraction {
                        path: path.to_string(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            format!("payload truncated: {} of {} bytes", copied, entry.size),
                        ),
                    });
                }
            }
            FileKind::Directory => match std::fs::create_dir(&target) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(wrap(e)),
            },
            FileKind::Symlink => {
                let link_target = entry.link_target.as_deref().unwrap_or_default();
                std::os::unix::fs::symlink(link_target, &target).map_err(wrap)?;
                return Ok(());
            }
            FileKind::Hardlink => {
                let link_path = entry.link_target.clone().unwrap_or_default();
                if escapes_root(&link_path) {
                    return Err(wrap(std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "hardlink target escapes the destination root",
                    )));
                }
                let link_src = dest_root.join(link_path.trim_start_matches('/'));
                if std::fs::hard_link(&link_src, &target).is_err() {
                    // Target not materialized yet; extract it first, then retry.
                    self.extract(&link_path, dest_root)?;
                    std::fs::hard_link(&link_src, &target).map_err(wrap)?;
                }
            }
            FileKind::CharDevice | FileKind::BlockDevice => {
                let type_bits = if entry.kind == FileKind::CharDevice {
                    libc::S_IFCHR
                } else {
                    libc::S_IFBLK
                };
                let dev = make_dev(entry.devmajor.unwrap_or(0), entry.devminor.unwrap_or(0));
                mknod(&target, type_bits | entry.mode, dev).map_err(wrap)?;
            }
            FileKind::Fifo => {
                mkfifo(&target, entry.mode).map_err(wrap)?;
            }
        }

        // Ownership needs CAP_CHOWN; skipped with a warning (once per
        // archive) for unprivileged runs.
        if unsafe { libc::geteuid() } != 0 {
            if !self.ownership_warned {
                println!("WARNING: not running as root; recorded file ownership will not be applied");
                self.ownership_warned = true;
            }
        } else {
            let uid = entry
                .uname
                .as_deref()
                .and_then(lookup_uid)
                .unwrap_or(entry.uid);
            let gid = entry
                .gname
                .as_deref()
                .and_then(lookup_gid)
                .unwrap_or(entry.gid);
            if let Err(e) = std::os::unix::fs::lchown(&target, Some(uid), Some(gid)) {
                println!(
                    "WARNING: failed to set ownership of {} to {}:{}: {}",
                    target.display(),
                    uid,
                    gid,
                    e
                );
            }
        }

        std::fs::set_permissions(&target, std::fs::Permissions::from_mode(entry.mode))
            .map_err(wrap)?;

        filetime::set_file_mtime(&target, FileTime::from_unix_time(entry.mtime as i64, 0))
            .map_err(wrap)?;

        Ok(())
    }

    /// Extract every manifest entry under `dest_root`, in sorted order.
    ///
    /// Sorted order does not structurally guarantee a hardlink's target
    /// precedes the link; [`Blob::extract`]'s on-demand fallback covers the
    /// cases where it doesn't.
    pub fn extract_all(&mut self, dest_root: &Path) -> Result<(), SrpError> {
        for path in self.manifest.paths() {
            self.extract(&path, dest_root)?;
        }
        Ok(())
    }
}

fn c_path(path: &Path) -> std::io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "path contains NUL"))
}

fn mknod(path: &Path, mode: u32, dev: u64) -> std::io::Result<()> {
    let c = c_path(path)?;
    let rc = unsafe { libc::mknod(c.as_ptr(), mode as libc::mode_t, dev as libc::dev_t) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

fn mkfifo(path: &Path, mode: u32) -> std::io::Result<()> {
    let c = c_path(path)?;
    let rc = unsafe { libc::mkfifo(c.as_ptr(), mode as libc::mode_t) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

fn lookup_uid(name: &str) -> Option<u32> {
    let c = CString::new(name).ok()?;
    let pw = unsafe { libc::getpwnam(c.as_ptr()) };
    if pw.is_null() {
        None
    } else {
        Some(unsafe { (*pw).pw_uid })
    }
}

fn lookup_gid(name: &str) -> Option<u32> {
    let c = CString::new(name).ok()?;
    let gr = unsafe { libc::getgrnam(c.as_ptr()) };
    if gr.is_null() {
        None
    } else {
        Some(unsafe { (*gr).gr_gid })
    }
}

/// Whether an archive path would resolve outside the extraction root:
/// anything but plain name components after the leading `/`.
fn escapes_root(path: &str) -> bool {
    Path::new(path.trim_start_matches('/'))
        .components()
        .any(|c| !matches!(c, std::path::Component::Normal(_)))
}
