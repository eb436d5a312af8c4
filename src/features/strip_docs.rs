//! The strip_docs feature: drops documentation from a package at install
//! time, before the manifest entries are extracted or recorded.

use anyhow::Result;
use glob::Pattern;

use crate::context::Context;

use super::{Feature, StageFunc};

const DOC_PATTERNS: &[&str] = &["*/share/doc", "*/share/doc/*"];

pub fn feature() -> Feature {
    Feature::new(
        "strip_docs",
        "Remove documentation paths from the manifest before extraction.",
    )
    // One-shot rather than per-entry: removing the entries up front saves
    // every other iterator func from visiting them at all.
    .install(StageFunc::once("strip_docs", strip).post(&["core"]))
}

fn strip(ctx: &mut Context) -> Result<()> {
    let patterns: Vec<Pattern> = DOC_PATTERNS
        .iter()
        .map(|p| Pattern::new(p).expect("static doc pattern"))
        .collect();

    let mut removed = 0usize;
    for path in ctx.manifest.paths() {
        if patterns.iter().any(|p| p.matches(&path)) {
            ctx.manifest.remove(&path);
            removed += 1;
        }
    }
    if ctx.verbosity > 0 {
        println!("strip_docs: removed {} entries", removed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{Entry, FileKind};
    use crate::notes::Notes;
    use std::path::PathBuf;

    #[test]
    fn test_doc_paths_removed() {
        let mut ctx = Context::for_install(
            Notes::default(),
            PathBuf::from("/tmp"),
            PathBuf::from("/tmp/root"),
        );
        for path in [
            "/usr/bin/foo",
            "/usr/share/doc",
            "/usr/share/doc/foo",
            "/usr/share/doc/foo/README",
        ] {
            ctx.manifest.insert(
                path.to_string(),
                Entry::new(if path == "/usr/bin/foo" {
                    FileKind::Regular
                } else {
                    FileKind::Directory
                }),
            );
        }

        strip(&mut ctx).unwrap();
        assert_eq!(ctx.manifest.paths(), vec!["/usr/bin/foo"]);
    }
}
