//! Orchestrators: drive resolved feature functions against a shared
//! context in three ordered phases (one-shot, per-entry iterator, final).
//!
//! Execution is single-threaded and synchronous; a stage function runs to
//! completion before the next is invoked. Any stage failure aborts the run
//! wrapped in [`SrpError::StageExecution`]; filesystem changes already made
//! are not rolled back. A cancellation flag is polled between manifest
//! entries, the natural unit of work.

use anyhow::{bail, Context as _, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::blob::{blob_create, Blob};
use crate::brp::{brp_create, brp_unpack};
use crate::context::Context;
use crate::db::{content_sha, InstallRecord, PackageDb};
use crate::error::SrpError;
use crate::features::resolve::{resolve, resolve_action};
use crate::features::{FeatureRegistry, FuncKind, Stage, StageFunc};

/// Shared cancellation flag; setting it aborts the owning run at the next
/// manifest-entry boundary.
pub type CancelFlag = Arc<AtomicBool>;

/// Invoke a one-shot function, logging it and wrapping failure with the
/// function's identity. In dry-run mode resolution and logging still
/// happen but the function is not invoked.
fn run_once(
    func: &StageFunc,
    stage: &str,
    ctx: &mut Context,
    dry_run: bool,
) -> Result<(), SrpError> {
    if ctx.verbosity > 0 || dry_run {
        println!("executing: {}.{}", func.feature, stage);
    }
    if dry_run {
        return Ok(());
    }
    let f = match func.func {
        FuncKind::Once(f) => f,
        FuncKind::PerEntry(_) => {
            return Err(SrpError::InvalidFeature(func.feature.to_string()));
        }
    };
    f(ctx).map_err(|e| SrpError::StageExecution {
        feature: func.feature.to_string(),
        stage: stage.to_string(),
        source: e.into(),
    })
}

/// Invoke a per-entry function for one manifest path.
fn run_per_entry(
    func: &StageFunc,
    stage: &str,
    ctx: &mut Context,
    path: &str,
    dry_run: bool,
) -> Result<(), SrpError> {
    if ctx.verbosity > 1 || dry_run {
        println!("executing: {}.{} {}", func.feature, stage, path);
    }
    if dry_run {
        return Ok(());
    }
    let f = match func.func {
        FuncKind::PerEntry(f) => f,
        FuncKind::Once(_) => {
            return Err(SrpError::InvalidFeature(func.feature.to_string()));
        }
    };
    f(ctx, path).map_err(|e| SrpError::StageExecution {
        feature: func.feature.to_string(),
        stage: stage.to_string(),
        source: e.into(),
    })
}

fn check_cancel(cancel: &CancelFlag) -> Result<()> {
    if cancel.load(Ordering::Relaxed) {
        bail!("run canceled");
    }
    Ok(())
}

/// Builds a brp from notes plus a source tree.
pub struct Builder<'r> {
    registry: &'r FeatureRegistry,
    ctx: Context,
    enabled: Vec<String>,
    out_dir: PathBuf,
    dry_run: bool,
    cancel: CancelFlag,
}

impl<'r> Builder<'r> {
    /// `ctx` comes from [`Context::for_build`]; `options` are run-time
    /// feature toggles on top of the notes (`no_foo` disables).
    pub fn new(
        registry: &'r FeatureRegistry,
        ctx: Context,
        options: &[String],
        out_dir: PathBuf,
    ) -> Self {
        let enabled = registry.enabled_set(&ctx.notes.header.features, options);
        Self {
            registry,
            ctx,
            enabled,
            out_dir,
            dry_run: false,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// The context, for inspection after a run.
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Run the build. Returns the path of the written brp, or None for a
    /// dry run (there is nothing to finalize).
    pub fn run(&mut self) -> Result<Option<PathBuf>> {
        // Resolve every phase up front: ordering problems surface before
        // any side effect, and this is all a dry run needs to validate.
        let once_funcs = resolve(self.registry, Stage::Build, &self.enabled)?;
        let iter_funcs = resolve(self.registry, Stage::BuildIter, &self.enabled)?;
        let final_funcs = resolve(self.registry, Stage::BuildFinal, &self.enabled)?;

        if self.ctx.verbosity > 0 {
            println!("features: {:?}", self.enabled);
        }

        for func in &once_funcs {
            run_once(func, Stage::Build.label(), &mut self.ctx, self.dry_run)?;
        }

        // The manifest is fully populated before the per-entry phase; the
        // snapshot keeps funcs free to mutate entries as they go.
        for path in self.ctx.manifest.paths() {
            check_cancel(&self.cancel)?;
            for func in &iter_funcs {
                run_per_entry(func, Stage::BuildIter.label(), &mut self.ctx, &path, self.dry_run)?;
            }
        }

        for func in &final_funcs {
            run_once(func, Stage::BuildFinal.label(), &mut self.ctx, self.dry_run)?;
        }

        if self.dry_run {
            return Ok(None);
        }

        // Reduce the per-run dependency aggregate into the notes that ship
        // in the brp.
        let mut libs = std::mem::take(&mut self.ctx.notes.deps.libs);
        libs.extend(self.ctx.deps.iter().cloned());
        libs.sort();
        libs.dedup();
        self.ctx.notes.deps.libs = libs;

        let blob_path = self.ctx.topdir.join("BLOB");
        let mut blob_file = File::create(&blob_path)?;
        blob_create(&mut self.ctx.manifest, &self.ctx.payload_dir, &mut blob_file)?;
        drop(blob_file);

        let brp_name = format!("{}.{}.brp", self.ctx.notes.fullname(), std::env::consts::ARCH);
        let brp_path = self.out_dir.join(brp_name);
        std::fs::create_dir_all(&self.out_dir)?;
        let mut blob_file = File::open(&blob_path)?;
        let sha = brp_create(&brp_path, &self.ctx.notes.to_bytes()?, &mut blob_file)?;

        println!("finalized {} ({})", brp_path.display(), sha);
        Ok(Some(brp_path))
    }
}

/// Installs a brp onto a destination root and registers it in the package
/// database.
pub struct Installer<'r, 'd> {
    registry: &'r FeatureRegistry,
    db: &'d mut dyn PackageDb,
    dest_root: PathBuf,
    options: Vec<String>,
    force: bool,
    no_upgrade: bool,
    dry_run: bool,
    verbosity: u8,
    cancel: CancelFlag,
}

impl<'r, 'd> Installer<'r, 'd> {
    pub fn new(
        registry: &'r FeatureRegistry,
        db: &'d mut dyn PackageDb,
        dest_root: PathBuf,
    ) -> Self {
        Self {
            registry,
            db,
            dest_root,
            options: Vec::new(),
            force: false,
            no_upgrade: false,
            dry_run: false,
            verbosity: 0,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn options(mut self, options: Vec<String>) -> Self {
        self.options = options;
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn no_upgrade(mut self, no_upgrade: bool) -> Self {
        self.no_upgrade = no_upgrade;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Install `brp_path`, using `topdir` as the run's scratch directory.
    /// Returns the registered record, or None for a dry run.
    pub fn run(&mut self, brp_path: &Path, topdir: &Path) -> Result<Option<InstallRecord>> {
        let contents = brp_unpack(brp_path, topdir)
            .with_context(|| format!("Failed to unpack {}", brp_path.display()))?;

        let name = contents.notes.header.name.clone();
        let existing_shas: Vec<String> = self
            .db
            .lookup(&name)
            .iter()
            .map(|r| r.sha.clone())
            .collect();
        if !existing_shas.is_empty() && self.no_upgrade {
            bail!("{} is already installed and --no-upgrade is set", name);
        }

        let mut ctx = Context::for_install(
            contents.notes,
            topdir.to_path_buf(),
            self.dest_root.clone(),
        );
        ctx.force = self.force;
        ctx.verbosity = self.verbosity;

        let blob = Blob::open(&contents.blob_path)?;
        ctx.manifest = blob.manifest.clone();
        ctx.blob = Some(blob);

        // Hash what the brp delivered, before any stage trims the
        // manifest; the stored record carries the same sha so reinstalls
        // of identical content always compare equal.
        let sha = content_sha(&ctx.notes, &ctx.manifest)?;
        if !self.force && existing_shas.iter().any(|s| *s == sha) {
            bail!(
                "{} is already installed with identical contents (use --force to reinstall)",
                ctx.notes.fullname()
            );
        }

        let enabled = self
            .registry
            .enabled_set(&ctx.notes.header.features, &self.options);
        let once_funcs = resolve(self.registry, Stage::Install, &enabled)?;
        let iter_funcs = resolve(self.registry, Stage::InstallIter, &enabled)?;
        let final_funcs = resolve(self.registry, Stage::InstallFinal, &enabled)?;

        if self.verbosity > 0 {
            println!("features: {:?}", enabled);
        }

        for func in &once_funcs {
            run_once(func, Stage::Install.label(), &mut ctx, self.dry_run)?;
        }

        // One-shot funcs may have trimmed the manifest (strip_docs); the
        // iterator phase extracts and measures what's left.
        for path in ctx.manifest.paths() {
            check_cancel(&self.cancel)?;
            for func in &iter_funcs {
                run_per_entry(func, Stage::InstallIter.label(), &mut ctx, &path, self.dry_run)?;
            }
        }

        for func in &final_funcs {
            run_once(func, Stage::InstallFinal.label(), &mut ctx, self.dry_run)?;
        }

        if self.dry_run {
            return Ok(None);
        }

        let record = InstallRecord::with_sha(ctx.notes, ctx.manifest, ctx.installed_size, sha);
        self.db.register(record.clone());
        self.db.commit()?;
        Ok(Some(record))
    }
}

/// Removes an installed package and drops it from the database.
pub struct Uninstaller<'r, 'd> {
    registry: &'r FeatureRegistry,
    db: &'d mut dyn PackageDb,
    dest_root: PathBuf,
    options: Vec<String>,
    dry_run: bool,
    verbosity: u8,
}

impl<'r, 'd> Uninstaller<'r, 'd> {
    pub fn new(
        registry: &'r FeatureRegistry,
        db: &'d mut dyn PackageDb,
        dest_root: PathBuf,
    ) -> Self {
        Self {
            registry,
            db,
            dest_root,
            options: Vec::new(),
            dry_run: false,
            verbosity: 0,
        }
    }

    pub fn options(mut self, options: Vec<String>) -> Self {
        self.options = options;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Uninstall the most recently installed version of `name`. A package
    /// that isn't installed succeeds quietly: it DID get uninstalled at
    /// some point.
    pub fn run(&mut self, name: &str, topdir: &Path) -> Result<()> {
        let Some(record) = self.db.lookup(name).last().cloned() else {
            println!("{} is not installed; nothing to do", name);
            return Ok(());
        };

        let mut ctx = Context::for_install(
            record.notes.clone(),
            topdir.to_path_buf(),
            self.dest_root.clone(),
        );
        ctx.manifest = record.manifest.clone();
        ctx.verbosity = self.verbosity;

        let enabled = self
            .registry
            .enabled_set(&ctx.notes.header.features, &self.options);
        let funcs = resolve(self.registry, Stage::Uninstall, &enabled)?;

        for func in &funcs {
            run_once(func, Stage::Uninstall.label(), &mut ctx, self.dry_run)?;
        }

        if self.dry_run {
            return Ok(());
        }

        self.db.remove(name, &record.sha);
        self.db.commit()?;
        Ok(())
    }
}

/// Run a named maintenance action (e.g. "verify") against an installed
/// package's record.
pub fn run_action(
    registry: &FeatureRegistry,
    action: &str,
    record: &InstallRecord,
    dest_root: PathBuf,
    topdir: &Path,
) -> Result<()> {
    let mut ctx = Context::for_install(record.notes.clone(), topdir.to_path_buf(), dest_root);
    ctx.manifest = record.manifest.clone();

    let enabled = registry.enabled_set(&ctx.notes.header.features, &[]);
    let funcs = resolve_action(registry, action, &enabled)?;
    if funcs.is_empty() {
        bail!("no enabled feature provides action '{}'", action);
    }

    for func in &funcs {
        run_once(func, action, &mut ctx, false)?;
    }
    Ok(())
}
