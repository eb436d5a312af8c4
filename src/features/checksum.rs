//! The checksum feature: records a SHA-1 digest for every regular file at
//! build time and re-verifies installed files on demand.

use anyhow::{Context as _, Result};
use sha1::{Digest, Sha1};
use std::path::Path;

use crate::context::Context;

use super::{Feature, StageFunc};

pub fn feature() -> Feature {
    Feature::new(
        "checksum",
        "Record a SHA-1 digest per regular file in the manifest; the verify \
         action recomputes them against the installed files.",
    )
    .default_enabled()
    .build_iter(StageFunc::per_entry("checksum", gen_sum))
    .action("verify", StageFunc::once("checksum", verify_sums))
}

fn sha1_hex(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read {} for checksumming", path.display()))?;
    let mut hasher = Sha1::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Record the digest of one payload file into its manifest entry.
fn gen_sum(ctx: &mut Context, path: &str) -> Result<()> {
    let src = ctx.payload_dir.join(path.trim_start_matches('/'));
    let entry = match ctx.manifest.get_mut(path) {
        Some(e) if e.is_regular() => e,
        _ => return Ok(()),
    };
    entry.checksum = Some(sha1_hex(&src)?);
    Ok(())
}

/// Recompute digests against the installed files and warn on mismatch.
/// Verification never fails the run; a changed file is information, not an
/// error.
fn verify_sums(ctx: &mut Context) -> Result<()> {
    let mut mismatches = 0usize;
    for (path, entry) in ctx.manifest.iter() {
        let Some(recorded) = entry.checksum.as_deref() else {
            continue;
        };
        let target = ctx.dest_root.join(path.trim_start_matches('/'));
        match sha1_hex(&target) {
            Ok(actual) if actual == recorded => {}
            Ok(actual) => {
                println!(
                    "WARNING: checksum mismatch for {}: recorded {} actual {}",
                    path, recorded, actual
                );
                mismatches += 1;
            }
            Err(e) => {
                println!("WARNING: cannot verify {}: {}", path, e);
                mismatches += 1;
            }
        }
    }
    if ctx.verbosity > 0 {
        println!("checksum verify: {} mismatches", mismatches);
    }
    Ok(())
}
