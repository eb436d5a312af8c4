//! Runtime configuration for srp.
//!
//! Reads configuration from environment variables. Everything has a sane
//! default so a bare invocation works on a real system; tests point
//! `SRP_ROOT_DIR` at a scratch directory.

use std::path::PathBuf;

/// srp configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Target filesystem root for install/uninstall (SRP_ROOT_DIR, default "/").
    pub root_dir: PathBuf,
    /// Path to the installed-package database (SRP_DB_PATH,
    /// default <root_dir>/var/lib/srp/db.json).
    pub db_path: PathBuf,
    /// Directory where built brp archives are written (SRP_OUT_DIR, default ".").
    pub out_dir: PathBuf,
}

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> Self {
        let root_dir = std::env::var("SRP_ROOT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/"));

        let db_path = std::env::var("SRP_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| root_dir.join("var/lib/srp/db.json"));

        let out_dir = std::env::var("SRP_OUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        Self {
            root_dir,
            db_path,
            out_dir,
        }
    }

    /// Print configuration for debugging.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  SRP_ROOT_DIR: {}", self.root_dir.display());
        println!("  SRP_DB_PATH: {}", self.db_path.display());
        println!("  SRP_OUT_DIR: {}", self.out_dir.display());
    }
}
