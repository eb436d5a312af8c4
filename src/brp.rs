//! The brp outer container: the distributable package file.
//!
//! A brp is a gzip stream holding a bincode member index followed by the
//! member bytes in index order. Members, in order:
//!
//!   NOTES  serialized package notes (JSON)
//!   BLOB   manifest header + payload (see `blob`)
//!   SHA    SHA-1 hex digest of NOTES and BLOB bytes, in that order
//!
//! The SHA member both guards against corruption and names the package
//! contents: whatever happens at install time or later, the digest of an
//! installed package stays tied to the brp it came from.

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::notes::Notes;

#[derive(Debug, Serialize, Deserialize)]
struct MemberIndex {
    /// (member name, byte length), in stream order.
    members: Vec<(String, u64)>,
}

/// Assemble a brp at `brp_path` from serialized notes and a finished BLOB
/// file. Returns the SHA-1 hex digest recorded in the archive.
pub fn brp_create(brp_path: &Path, notes_bytes: &[u8], blob_file: &mut File) -> Result<String> {
    let blob_len = blob_file.seek(SeekFrom::End(0))?;
    blob_file.seek(SeekFrom::Start(0))?;

    let mut sha = Sha1::new();
    sha.update(notes_bytes);
    let mut hasher_input = Vec::new();
    blob_file.read_to_end(&mut hasher_input)?;
    sha.update(&hasher_input);
    let digest = format!("{:x}", sha.finalize());

    let index = MemberIndex {
        members: vec![
            ("NOTES".to_string(), notes_bytes.len() as u64),
            ("BLOB".to_string(), blob_len),
            ("SHA".to_string(), digest.len() as u64),
        ],
    };

    let out = File::create(brp_path)
        .with_context(|| format!("Failed to create {}", brp_path.display()))?;
    let mut enc = GzEncoder::new(out, Compression::default());
    bincode::serialize_into(&mut enc, &index).context("Failed to write brp index")?;
    enc.write_all(notes_bytes)?;
    enc.write_all(&hasher_input)?;
    enc.write_all(digest.as_bytes())?;
    enc.finish().context("Failed to finish brp stream")?;

    Ok(digest)
}

/// Members recovered from a brp.
#[derive(Debug)]
pub struct BrpContents {
    pub notes: Notes,
    /// The BLOB member, spooled to a file so it can be seeked.
    pub blob_path: PathBuf,
    /// The digest recorded in the archive (verified against the bytes).
    pub sha: String,
}

/// Unpack a brp into `workdir`, verifying the SHA member.
pub fn brp_unpack(brp_path: &Path, workdir: &Path) -> Result<BrpContents> {
    let file = File::open(brp_path)
        .with_context(|| format!("Failed to open {}", brp_path.display()))?;
    let mut dec = GzDecoder::new(file);

    let index: MemberIndex =
        bincode::deserialize_from(&mut dec).context("Failed to read brp index")?;

    let mut notes_bytes: Option<Vec<u8>> = None;
    let mut blob_path: Option<PathBuf> = None;
    let mut recorded_sha: Option<String> = None;
    let mut sha = Sha1::new();

    for (name, len) in &index.members {
        match name.as_str() {
            "NOTES" => {
                let buf = read_member(&mut dec, *len)?;
                sha.update(&buf);
                notes_bytes = Some(buf);
            }
            "BLOB" => {
                let path = workdir.join("BLOB");
                let mut out = File::create(&path)?;
                let mut remaining = (&mut dec).take(*len);
                let mut buf = [0u8; 64 * 1024];
                loop {
                    let n = remaining.read(&mut buf)?;
                    if n == 0 {
                        break;
                    }
                    sha.update(&buf[..n]);
                    out.write_all(&buf[..n])?;
                }
                blob_path = Some(path);
            }
            "SHA" => {
                let buf = read_member(&mut dec, *len)?;
                recorded_sha = Some(String::from_utf8_lossy(&buf).into_owned());
            }
            other => {
                // Feature sidecar members are carried but not interpreted
                // here. Member names come from untrusted archives and must
                // stay inside the workdir.
                if other.contains('/') || other.contains("..") {
                    bail!("refusing brp member with unsafe name: {}", other);
                }
                let path = workdir.join(other);
                let buf = read_member(&mut dec, *len)?;
                std::fs::write(path, buf)?;
            }
        }
    }

    let notes_bytes = notes_bytes.context("brp has no NOTES member")?;
    let blob_path = blob_path.context("brp has no BLOB member")?;
    let recorded_sha = recorded_sha.context("brp has no SHA member")?;

    let computed = format!("{:x}", sha.finalize());
    if computed != recorded_sha {
        bail!(
            "brp checksum mismatch: recorded {} but contents hash to {}",
            recorded_sha,
            computed
        );
    }

    let notes = Notes::from_bytes(&notes_bytes)?;
    Ok(BrpContents {
        notes,
        blob_path,
        sha: recorded_sha,
    })
}

fn read_member(reader: &mut impl Read, len: u64) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len as usize];
    reader
        .read_exact(&mut buf)
        .context("brp member truncated")?;
    Ok(buf)
}
