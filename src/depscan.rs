//! External dependency-discovery tools.
//!
//! Build-time scanning asks objdump which shared libraries a file
//! explicitly requires (NEEDED entries only: transitive dependencies are
//! the system's problem, not the package's). Install-time checking asks
//! the dynamic loader whether a library resolves at all.

use anyhow::Result;
use std::ffi::CString;
use std::path::Path;

use crate::process::Cmd;

/// Shared libraries `path` explicitly requires.
///
/// Returns an empty list for anything objdump can't parse (scripts, data
/// files); non-ELF input is not an error.
pub fn discover_deps(path: &Path) -> Result<Vec<String>> {
    let result = match Cmd::new("objdump").arg("-p").arg_path(path).allow_fail().run() {
        Ok(r) => r,
        Err(e) => {
            // No objdump on this system; scanning is best-effort.
            println!("WARNING: dependency scan skipped: {:#}", e);
            return Ok(Vec::new());
        }
    };
    if !result.success() {
        return Ok(Vec::new());
    }

    let mut libs = Vec::new();
    for line in result.stdout.lines() {
        let mut parts = line.split_whitespace();
        if parts.next() == Some("NEEDED") {
            if let Some(lib) = parts.next() {
                libs.push(lib.to_string());
            }
        }
    }
    Ok(libs)
}

/// Whether the dynamic loader can resolve `name` on this system.
pub fn library_resolves(name: &str) -> bool {
    let Ok(c) = CString::new(name) else {
        return false;
    };
    let handle = unsafe { libc::dlopen(c.as_ptr(), libc::RTLD_LAZY | libc::RTLD_LOCAL) };
    if handle.is_null() {
        return false;
    }
    unsafe { libc::dlclose(handle) };
    true
}
