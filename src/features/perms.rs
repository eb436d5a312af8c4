//! The perms feature: ownership/permission overrides from the notes.
//!
//! The only sanctioned way to set file ownership in a package: chown in the
//! build script won't survive a non-root build, but forging the manifest
//! entries will, since nothing consumes the recorded ownership until
//! install time.

use anyhow::Result;
use glob::Pattern;

use crate::context::Context;

use super::{Feature, StageFunc};

pub fn feature() -> Feature {
    Feature::new(
        "perms",
        "Apply mode/ownership overrides from the notes perms section to \
         matching manifest entries at build time.",
    )
    // Must run after core has populated the manifest.
    .build(StageFunc::once("perms", apply_overrides).pre(&["core"]))
}

fn apply_overrides(ctx: &mut Context) -> Result<()> {
    let Some(perms) = ctx.notes.perms.clone() else {
        return Ok(());
    };

    for rule in &perms.rules {
        let pattern = Pattern::new(&rule.pattern)
            .map_err(|e| anyhow::anyhow!("bad perms pattern '{}': {}", rule.pattern, e))?;

        let mut touched = 0usize;
        for (path, entry) in ctx.manifest.iter_mut() {
            if !pattern.matches(path) {
                continue;
            }
            if let Some(mode) = rule.mode {
                entry.mode = mode & 0o7777;
            }
            if let Some(uid) = rule.uid {
                entry.uid = uid;
            }
            if let Some(gid) = rule.gid {
                entry.gid = gid;
            }
            if rule.uname.is_some() {
                entry.uname = rule.uname.clone();
            }
            if rule.gname.is_some() {
                entry.gname = rule.gname.clone();
            }
            touched += 1;
        }

        if touched == 0 {
            println!(
                "WARNING: perms pattern matched nothing: {}",
                rule.pattern
            );
        } else if ctx.verbosity > 0 {
            println!("perms: {} entries matched {}", touched, rule.pattern);
        }
    }
    Ok(())
}
