//! The core feature: build-script execution, payload capture, archive
//! replay, and file removal. Everything else layers on top of this.

use anyhow::{Context as _, Result};
use std::os::unix::fs::PermissionsExt;

use crate::context::Context;
use crate::manifest::{FileKind, Manifest};
use crate::process::Cmd;

use super::{Feature, StageFunc};

pub fn feature() -> Feature {
    Feature::new(
        "core",
        "Core packaging behavior: run the build script, capture the payload \
         into the manifest, extract it at install time, remove it at \
         uninstall time.",
    )
    .default_enabled()
    .build(StageFunc::once("core", build))
    .install(StageFunc::once("core", install_prepare))
    .install_iter(StageFunc::per_entry("core", install_entry))
    .uninstall(StageFunc::once("core", uninstall))
}

/// Run the notes build script (if any), then walk the payload directory
/// into a fresh manifest.
///
/// The script runs with SRP_SOURCE_DIR, SRP_PAYLOAD_DIR, and SRP_TOPDIR
/// exported and is expected to populate the payload directory. An empty
/// script buffer means the payload directory was populated out of band.
fn build(ctx: &mut Context) -> Result<()> {
    std::fs::create_dir_all(&ctx.payload_dir)?;

    if !ctx.notes.script.buffer.is_empty() {
        let script = ctx.topdir.join("srp_build");
        std::fs::write(&script, &ctx.notes.script.buffer)?;
        let mut perms = std::fs::metadata(&script)?.permissions();
        perms.set_mode(perms.mode() | 0o100);
        std::fs::set_permissions(&script, perms)?;

        Cmd::new("sh")
            .arg_path(&script)
            .dir(&ctx.topdir)
            .env("SRP_TOPDIR", ctx.topdir.to_string_lossy())
            .env("SRP_SOURCE_DIR", ctx.source_dir.to_string_lossy())
            .env("SRP_PAYLOAD_DIR", ctx.payload_dir.to_string_lossy())
            .run()
            .context("build script failed")?;
    }

    ctx.manifest = Manifest::from_directory(&ctx.payload_dir)?;
    if ctx.verbosity > 0 {
        println!("captured {} manifest entries", ctx.manifest.len());
    }
    Ok(())
}

/// Make sure the destination root exists before the iterator phase starts
/// materializing entries into it.
fn install_prepare(ctx: &mut Context) -> Result<()> {
    std::fs::create_dir_all(&ctx.dest_root)?;
    Ok(())
}

/// Extract one manifest entry onto the destination root.
fn install_entry(ctx: &mut Context, path: &str) -> Result<()> {
    let dest_root = ctx.dest_root.clone();
    let blob = ctx
        .blob
        .as_mut()
        .context("core install: no open BLOB in context")?;
    blob.extract(path, &dest_root)?;
    Ok(())
}

/// Remove the recorded files of an installed package.
///
/// Paths go in reverse sorted order so directory contents are gone before
/// the directory itself. A directory that still has entries (because some
/// other package owns files in it) is left behind with a note at higher
/// verbosity.
fn uninstall(ctx: &mut Context) -> Result<()> {
    let mut paths = ctx.manifest.paths();
    paths.reverse();

    for path in paths {
        let entry = ctx.manifest.get(&path).unwrap();
        let target = ctx.dest_root.join(path.trim_start_matches('/'));
        if entry.kind == FileKind::Directory {
            match std::fs::remove_dir(&target) {
                Ok(()) => {}
                Err(e) if e.raw_os_error() == Some(libc::ENOTEMPTY) => {
                    if ctx.verbosity > 0 {
                        println!("keeping non-empty directory: {}", target.display());
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    println!("WARNING: failed to remove {}: {}", target.display(), e);
                }
            }
        } else {
            match std::fs::remove_file(&target) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    println!("WARNING: failed to remove {}: {}", target.display(), e);
                }
            }
        }
    }
    Ok(())
}
