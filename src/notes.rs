//! The package NOTES: declarative metadata driving a build.
//!
//! The textual NOTES syntax is a front-end concern; the library consumes
//! notes as an already-parsed structure and persists them as JSON (both on
//! disk next to a package recipe and inside a built brp).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Package identity and the features enabled for it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotesHeader {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    /// Features requested by the package maintainer, on top of the
    /// registry defaults. Entries prefixed `no_` disable a default.
    #[serde(default)]
    pub features: Vec<String>,
}

/// The embedded build script. Run with the source and payload directories
/// exported as SRP_SOURCE_DIR / SRP_PAYLOAD_DIR; it is expected to populate
/// the payload directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotesScript {
    #[serde(default)]
    pub buffer: String,
}

/// A single ownership/permission override, applied at build time to every
/// manifest path matching `pattern` (glob syntax, matched against the
/// archive-relative path).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermsRule {
    pub pattern: String,
    /// Permission bits (e.g. 0o755). Applied as-is; file-type bits are
    /// carried by the entry kind, not the mode.
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub uname: Option<String>,
    pub gname: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotesPerms {
    #[serde(default)]
    pub rules: Vec<PermsRule>,
}

/// Library dependencies discovered at build time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotesDeps {
    #[serde(default)]
    pub libs: Vec<String>,
}

/// What to do when the postinstall script fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Log and keep going (the default).
    #[default]
    Warning,
    /// Abort the install.
    Error,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotesPostinstall {
    #[serde(default)]
    pub buffer: String,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

/// A package's NOTES. Sections beyond `header` and `script` belong to the
/// features that read them and are absent unless the package uses them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Notes {
    pub header: NotesHeader,
    #[serde(default)]
    pub script: NotesScript,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perms: Option<NotesPerms>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postinstall: Option<NotesPostinstall>,
    /// Filled in during build by the deps feature; ships inside the brp.
    #[serde(default)]
    pub deps: NotesDeps,
}

impl Notes {
    /// Load notes from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read notes file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse notes file: {}", path.display()))
    }

    /// Serialize to the JSON form stored inside a brp.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let s = serde_json::to_string_pretty(self).context("Failed to serialize notes")?;
        Ok(s.into_bytes())
    }

    /// Deserialize from the JSON form stored inside a brp.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("Failed to parse notes from archive")
    }

    /// "name-version", used for brp file naming and db display.
    pub fn fullname(&self) -> String {
        format!("{}-{}", self.header.name, self.header.version)
    }
}
