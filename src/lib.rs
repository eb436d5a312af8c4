//! srp - source-based package manager.
//!
//! Builds distributable brp archives from a payload tree plus declarative
//! notes, and installs/uninstalls them onto a target filesystem root.
//! Package behavior is contributed by Features, ordered per lifecycle
//! stage by a cycle-checked scheduler; payloads travel in the BLOB archive
//! format (manifest header up front, payload bytes behind it).

pub mod blob;
pub mod brp;
pub mod config;
pub mod context;
pub mod db;
pub mod depscan;
pub mod error;
pub mod features;
pub mod manifest;
pub mod notes;
pub mod process;
pub mod run;
