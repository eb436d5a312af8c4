//! The deps feature: library dependency tracking.
//!
//! At build time, every regular payload file is scanned for the shared
//! libraries it explicitly requires; the union ships in the brp's notes.
//! At install time, each recorded library must resolve on the target
//! system, or the install aborts (downgraded to warnings under --force).

use anyhow::Result;

use crate::context::Context;
use crate::depscan;
use crate::error::SrpError;

use super::{Feature, StageFunc};

pub fn feature() -> Feature {
    Feature::new(
        "deps",
        "Record the shared libraries the payload links against; refuse to \
         install when the target system lacks any of them.",
    )
    .default_enabled()
    .build_iter(StageFunc::per_entry("deps", scan_entry))
    // The check has to fail before core starts materializing files.
    .install(StageFunc::once("deps", check_deps).post(&["core"]))
}

/// Scan one payload file and append newly seen libraries to the per-run
/// aggregate. Only appends for the path it was handed, so a partitioned
/// iterator phase merges worker aggregates afterwards.
fn scan_entry(ctx: &mut Context, path: &str) -> Result<()> {
    match ctx.manifest.get(path) {
        Some(e) if e.is_regular() => {}
        _ => return Ok(()),
    }

    let src = ctx.payload_dir.join(path.trim_start_matches('/'));
    let needed = depscan::discover_deps(&src)?;
    // Libraries the package itself provides are not dependencies.
    let provides_own = |lib: &str| {
        ctx.manifest
            .iter()
            .any(|(p, e)| e.is_regular() && p.rsplit('/').next() == Some(lib))
    };
    for lib in needed {
        if !provides_own(&lib) && !ctx.deps.contains(&lib) {
            ctx.deps.push(lib);
        }
    }
    Ok(())
}

/// Verify every recorded library resolves on the target system.
///
/// All libraries are checked before reporting so the user sees the full
/// missing set, not just the first.
fn check_deps(ctx: &mut Context) -> Result<()> {
    let missing: Vec<String> = ctx
        .notes
        .deps
        .libs
        .iter()
        .filter(|lib| !depscan::library_resolves(lib))
        .cloned()
        .collect();

    if missing.is_empty() {
        return Ok(());
    }

    if ctx.force {
        for lib in &missing {
            println!("WARNING: missing required library (forced): {}", lib);
        }
        return Ok(());
    }

    Err(SrpError::MissingDependency { missing }.into())
}
