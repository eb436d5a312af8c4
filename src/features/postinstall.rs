//! The postinstall feature: runs a maintainer-provided script after every
//! manifest entry has been installed.

use anyhow::{bail, Result};
use std::os::unix::fs::PermissionsExt;

use crate::context::Context;
use crate::notes::FailurePolicy;
use crate::process::Cmd;

use super::{Feature, StageFunc};

pub fn feature() -> Feature {
    Feature::new(
        "postinstall",
        "Run the notes postinstall script once the payload is on disk \
         (e.g. to refresh an external cache or database).",
    )
    .install_final(StageFunc::once("postinstall", run_script))
}

fn run_script(ctx: &mut Context) -> Result<()> {
    let Some(section) = ctx.notes.postinstall.clone() else {
        return Ok(());
    };
    if section.buffer.is_empty() {
        return Ok(());
    }

    let script = ctx.topdir.join("srp_postinstall");
    std::fs::write(&script, &section.buffer)?;
    let mut perms = std::fs::metadata(&script)?.permissions();
    perms.set_mode(perms.mode() | 0o100);
    std::fs::set_permissions(&script, perms)?;

    let result = Cmd::new("sh")
        .arg_path(&script)
        .dir(&ctx.topdir)
        .env("SRP_ROOT_DIR", ctx.dest_root.to_string_lossy())
        .allow_fail()
        .run()?;

    if !result.success() {
        match section.failure_policy {
            FailurePolicy::Warning => {
                println!(
                    "WARNING: postinstall failed (exit code {}): {}",
                    result.code(),
                    result.stderr_trimmed()
                );
            }
            FailurePolicy::Error => {
                bail!(
                    "postinstall failed (exit code {}): {}",
                    result.code(),
                    result.stderr_trimmed()
                );
            }
        }
    }
    Ok(())
}
