//! The size feature: accounts for the disk space a package actually
//! occupies once installed.

use anyhow::Result;

use crate::context::Context;

use super::{Feature, StageFunc};

pub fn feature() -> Feature {
    Feature::new(
        "size",
        "Accumulate the on-disk size of installed regular files into the \
         run's installed_size aggregate.",
    )
    .default_enabled()
    // Stat the installed file, not the manifest size: a file may have been
    // rewritten by another feature after extraction.
    .install_iter(StageFunc::per_entry("size", measure_entry).pre(&["core"]))
}

fn measure_entry(ctx: &mut Context, path: &str) -> Result<()> {
    match ctx.manifest.get(path) {
        Some(e) if e.is_regular() => {}
        _ => return Ok(()),
    }

    let target = ctx.dest_root.join(path.trim_start_matches('/'));
    ctx.installed_size += std::fs::metadata(&target)?.len();
    Ok(())
}
