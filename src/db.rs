//! The installed-package database.
//!
//! A persisted map of package name to installed version records, each keyed
//! by a content hash of (notes, manifest). The orchestrators only speak to
//! the [`PackageDb`] trait; the JSON-file implementation is what the CLI
//! wires in.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::manifest::Manifest;
use crate::notes::Notes;

/// One installed version of a package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallRecord {
    pub name: String,
    pub version: String,
    /// Content hash of (notes, manifest); stable across later maintenance
    /// actions on the installed files.
    pub sha: String,
    pub notes: Notes,
    pub manifest: Manifest,
    pub installed_size: u64,
    /// Unix timestamp of installation.
    pub installed_at: u64,
}

impl InstallRecord {
    pub fn new(notes: Notes, manifest: Manifest, installed_size: u64) -> Result<Self> {
        let sha = content_sha(&notes, &manifest)?;
        Ok(Self::with_sha(notes, manifest, installed_size, sha))
    }

    /// Record with an already-computed identity. The installer uses this:
    /// the sha must hash what the brp delivered, not the manifest as
    /// stored, which install-time features may have trimmed.
    pub fn with_sha(notes: Notes, manifest: Manifest, installed_size: u64, sha: String) -> Self {
        let installed_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            name: notes.header.name.clone(),
            version: notes.header.version.clone(),
            sha,
            notes,
            manifest,
            installed_size,
            installed_at,
        }
    }
}

/// SHA-256 over the serialized notes and manifest.
pub fn content_sha(notes: &Notes, manifest: &Manifest) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(notes.to_bytes()?);
    hasher.update(bincode::serialize(manifest).context("Failed to serialize manifest")?);
    Ok(format!("{:x}", hasher.finalize()))
}

/// What the orchestrators need from a package database.
pub trait PackageDb {
    fn register(&mut self, record: InstallRecord);
    fn remove(&mut self, name: &str, sha: &str);
    fn lookup(&self, name: &str) -> &[InstallRecord];
    fn names(&self) -> Vec<String>;
    /// Persist all registrations made so far.
    fn commit(&mut self) -> Result<()>;
}

/// JSON-file database implementation.
#[derive(Debug)]
pub struct JsonDb {
    path: PathBuf,
    packages: BTreeMap<String, Vec<InstallRecord>>,
}

impl JsonDb {
    /// Load the database at `path`; a missing file is an empty database.
    pub fn load(path: &Path) -> Result<Self> {
        let packages = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read db: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse db: {}", path.display()))?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            packages,
        })
    }
}

impl PackageDb for JsonDb {
    fn register(&mut self, record: InstallRecord) {
        let versions = self.packages.entry(record.name.clone()).or_default();
        versions.retain(|r| r.sha != record.sha);
        versions.push(record);
    }

    fn remove(&mut self, name: &str, sha: &str) {
        if let Some(versions) = self.packages.get_mut(name) {
            versions.retain(|r| r.sha != sha);
            if versions.is_empty() {
                self.packages.remove(name);
            }
        }
    }

    fn lookup(&self, name: &str) -> &[InstallRecord] {
        self.packages.get(name).map(|v| v.as_slice()).unwrap_or(&[])
    }

    fn names(&self) -> Vec<String> {
        self.packages.keys().cloned().collect()
    }

    fn commit(&mut self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            serde_json::to_string_pretty(&self.packages).context("Failed to serialize db")?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write db: {}", self.path.display()))?;
        Ok(())
    }
}
