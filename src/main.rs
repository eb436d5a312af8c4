//! srp - source-based package manager CLI.

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use srp::config::Config;
use srp::context::Context;
use srp::db::{JsonDb, PackageDb};
use srp::features::FeatureRegistry;
use srp::notes::Notes;
use srp::run::{run_action, Builder, Installer, Uninstaller};

#[derive(Parser)]
#[command(name = "srp")]
#[command(about = "Source-based package manager")]
#[command(
    after_help = "QUICK START:\n  srp build notes.json src/   Build a brp from notes + source\n  srp install pkg.x86_64.brp  Install onto SRP_ROOT_DIR (default /)\n  srp list                    Show installed packages"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Be verbose; repeat for more detail
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Resolve and log everything, but don't execute stage functions
    #[arg(long, global = true)]
    dry_run: bool,

    /// Run-time feature toggles (e.g. strip_docs, no_checksum)
    #[arg(long, value_delimiter = ',', global = true)]
    options: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a brp package from a notes file and a source directory
    Build {
        /// Path to the notes file (JSON)
        notes: PathBuf,
        /// Source directory handed to the build script
        src: PathBuf,
    },

    /// Install a brp onto the target root
    Install {
        /// Path to the brp
        package: PathBuf,
        /// Install even if dependencies are missing or the same version
        /// is already installed
        #[arg(short = 'F', long)]
        force: bool,
        /// Fail if any version of the package is already installed
        #[arg(short = 'N', long)]
        no_upgrade: bool,
    },

    /// Uninstall an installed package
    Uninstall {
        /// Package name
        name: String,
    },

    /// Show information about an installed package
    Query {
        /// Package name
        name: String,
    },

    /// List installed packages matching a glob pattern (or all)
    List {
        /// Glob pattern (e.g. 'lib*')
        pattern: Option<String>,
    },

    /// Run a maintenance action (e.g. verify) against an installed package
    Action {
        /// Action name
        action: String,
        /// Package name
        name: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load();
    let registry = FeatureRegistry::builtin();

    match cli.command {
        Commands::Build { notes, src } => {
            let notes = Notes::load(&notes)?;
            let topdir = tempfile::Builder::new().prefix("srp-").tempdir()?;
            let ctx = {
                let mut ctx =
                    Context::for_build(notes, topdir.path().to_path_buf(), src.canonicalize()?);
                ctx.verbosity = cli.verbose;
                ctx
            };
            let mut builder =
                Builder::new(&registry, ctx, &cli.options, config.out_dir.clone())
                    .dry_run(cli.dry_run);
            builder.run()?;
        }

        Commands::Install {
            package,
            force,
            no_upgrade,
        } => {
            let mut db = JsonDb::load(&config.db_path)?;
            let topdir = tempfile::Builder::new().prefix("srp-").tempdir()?;
            let record = Installer::new(&registry, &mut db, config.root_dir.clone())
                .options(cli.options.clone())
                .force(force)
                .no_upgrade(no_upgrade)
                .dry_run(cli.dry_run)
                .verbosity(cli.verbose)
                .run(&package, topdir.path())?;
            if let Some(record) = record {
                println!(
                    "installed {} ({} files, {} bytes)",
                    record.name,
                    record.manifest.len(),
                    record.installed_size
                );
            }
        }

        Commands::Uninstall { name } => {
            let mut db = JsonDb::load(&config.db_path)?;
            let topdir = tempfile::Builder::new().prefix("srp-").tempdir()?;
            Uninstaller::new(&registry, &mut db, config.root_dir.clone())
                .options(cli.options.clone())
                .dry_run(cli.dry_run)
                .verbosity(cli.verbose)
                .run(&name, topdir.path())?;
        }

        Commands::Query { name } => {
            let db = JsonDb::load(&config.db_path)?;
            let records = db.lookup(&name);
            if records.is_empty() {
                println!("{} is not installed", name);
            }
            for record in records {
                println!("{}-{}:", record.name, record.version);
                println!("  sha: {}", record.sha);
                println!("  files: {}", record.manifest.len());
                println!("  size: {} bytes", record.installed_size);
                println!("  description: {}", record.notes.header.description);
                if !record.notes.deps.libs.is_empty() {
                    println!("  deps: {}", record.notes.deps.libs.join(", "));
                }
            }
        }

        Commands::List { pattern } => {
            let db = JsonDb::load(&config.db_path)?;
            let pattern = match pattern.as_deref() {
                Some(p) => Some(
                    glob::Pattern::new(p).with_context(|| format!("bad pattern: {}", p))?,
                ),
                None => None,
            };
            for name in db.names() {
                if pattern.as_ref().map_or(true, |p| p.matches(&name)) {
                    for record in db.lookup(&name) {
                        println!("{}-{}", record.name, record.version);
                    }
                }
            }
        }

        Commands::Action { action, name } => {
            let db = JsonDb::load(&config.db_path)?;
            let record = db
                .lookup(&name)
                .last()
                .cloned()
                .with_context(|| format!("{} is not installed", name))?;
            let topdir = tempfile::Builder::new().prefix("srp-").tempdir()?;
            run_action(
                &registry,
                &action,
                &record,
                config.root_dir.clone(),
                topdir.path(),
            )?;
        }
    }

    Ok(())
}
