//! Command-line front end for compound containers.
//!
//! All commands work on one folder of the local filesystem (`--dir`,
//! default the current directory). File and entry names are plain names
//! inside that folder.
//!
//! # Configuration Sources
//!
//! - CLI arguments (`--dir`, `--staged`, `--copy-buffer`, `--read-buffer`)
//! - Environment variables (`SEGPACK_DIR`, `SEGPACK_STAGED`, ...)
//! - A JSON file given with `--config`, overridden by the flags above

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use segpack::{CompoundReader, CompoundWriter, Directory, FsDirectory, PackConfig, StoreError};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Pack, list and extract compound containers.
#[derive(Debug, Clone, Parser)]
#[command(name = "segpack", about = "Pack many files into one compound container", version)]
pub struct Cli {
    /// Folder holding the container and its files
    #[arg(long, env = "SEGPACK_DIR", default_value = ".", global = true)]
    pub dir: PathBuf,

    /// JSON file with packing settings
    #[arg(long, env = "SEGPACK_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Write under a temporary name and rename once complete
    #[arg(long, env = "SEGPACK_STAGED", global = true)]
    pub staged: bool,

    /// Transfer buffer size used while packing (bytes)
    #[arg(long, env = "SEGPACK_COPY_BUFFER", global = true)]
    pub copy_buffer: Option<usize>,

    /// Refill buffer size used while reading (bytes)
    #[arg(long, env = "SEGPACK_READ_BUFFER", global = true)]
    pub read_buffer: Option<usize>,

    #[command(subcommand)]
    pub command: Command,
}

/// Container operations.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Pack files into a new container
    Pack {
        /// Container to create
        container: String,
        /// Files to pack, in container order
        #[arg(required = true)]
        files: Vec<String>,
    },
    /// Print each entry as name, offset and length
    List {
        /// Container to read
        container: String,
    },
    /// Write every entry back out as a file
    Extract {
        /// Container to read
        container: String,
        /// Destination folder (defaults to --dir)
        #[arg(long)]
        out: Option<PathBuf>,
        /// Overwrite files that already exist
        #[arg(long)]
        force: bool,
    },
    /// Copy one entry to standard output
    Cat {
        /// Container to read
        container: String,
        /// Entry to print
        entry: String,
    },
}

impl Cli {
    /// Settings from `--config` (or defaults) with flag overrides applied.
    pub fn pack_config(&self) -> Result<PackConfig> {
        let mut config = match &self.config {
            Some(path) => PackConfig::from_json_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => PackConfig::default(),
        };
        if self.staged {
            config = config.with_staged_finalize(true);
        }
        if let Some(size) = self.copy_buffer {
            config = config.with_copy_buffer_size(size);
        }
        if let Some(size) = self.read_buffer {
            config = config.with_read_buffer_size(size);
        }
        config.validate()?;
        Ok(config)
    }
}

/// Run one command, writing its output to `out`.
pub fn run(cli: &Cli, out: &mut dyn Write) -> Result<()> {
    let config = cli.pack_config()?;
    let dir = Arc::new(
        FsDirectory::open(&cli.dir)
            .with_context(|| format!("opening {}", cli.dir.display()))?
            .with_config(config.clone()),
    );
    debug!("Using {} with {:?}", cli.dir.display(), config);

    match &cli.command {
        Command::Pack { container, files } => pack(&dir, container, files, config, out),
        Command::List { container } => list(dir, container, &config, out),
        Command::Extract {
            container,
            out: target,
            force,
        } => {
            let target = target.as_deref().unwrap_or(&cli.dir);
            extract(dir, container, target, *force, &config, out)
        }
        Command::Cat { container, entry } => cat(dir, container, entry, &config, out),
    }
}

fn pack(
    dir: &Arc<FsDirectory>,
    container: &str,
    files: &[String],
    config: PackConfig,
    out: &mut dyn Write,
) -> Result<()> {
    let lock_name = format!("{container}.lock");
    let mut lock = dir.make_lock(&lock_name)?;
    if !lock.obtain()? {
        return Err(StoreError::LockHeld(lock_name).into());
    }

    let mut writer = CompoundWriter::with_config(dir.clone(), container, config)?;
    for name in files {
        writer
            .add_file(name)
            .with_context(|| format!("adding {name}"))?;
    }
    let packed = writer
        .close()
        .with_context(|| format!("packing {container}"));
    lock.release()?;
    packed?;

    info!("Packed {} files into {}", files.len(), container);
    writeln!(
        out,
        "{container}: {} files, {} bytes",
        files.len(),
        dir.file_length(container)?
    )?;
    Ok(())
}

fn open_reader(
    dir: Arc<FsDirectory>,
    container: &str,
    config: &PackConfig,
) -> Result<CompoundReader> {
    CompoundReader::open_with_config(dir, container, config)
        .with_context(|| format!("opening {container}"))
}

fn list(
    dir: Arc<FsDirectory>,
    container: &str,
    config: &PackConfig,
    out: &mut dyn Write,
) -> Result<()> {
    let reader = open_reader(dir, container, config)?;
    for (name, entry) in reader.entries() {
        writeln!(out, "{name}\t{}\t{}", entry.offset, entry.length)?;
    }
    Ok(())
}

fn extract(
    dir: Arc<FsDirectory>,
    container: &str,
    target: &Path,
    force: bool,
    config: &PackConfig,
    out: &mut dyn Write,
) -> Result<()> {
    let reader = open_reader(dir, container, config)?;
    std::fs::create_dir_all(target)
        .with_context(|| format!("creating {}", target.display()))?;

    for (name, entry) in reader.entries() {
        // Entry names come from the container; never let one escape `target`
        if Path::new(&name).file_name().and_then(|n| n.to_str()) != Some(name.as_str()) {
            return Err(StoreError::InvalidArgument(format!(
                "entry {name} is not a plain file name"
            ))
            .into());
        }
        let path = target.join(&name);
        if path.exists() && !force {
            return Err(StoreError::AlreadyExists(path.display().to_string()).into());
        }

        let mut input = reader.open_input(&name)?;
        let mut file =
            File::create(&path).with_context(|| format!("creating {}", path.display()))?;
        io::copy(&mut input, &mut file).with_context(|| format!("extracting {name}"))?;
        debug!("Extracted {} ({} bytes)", name, entry.length);
        writeln!(out, "{}", path.display())?;
    }
    Ok(())
}

fn cat(
    dir: Arc<FsDirectory>,
    container: &str,
    entry: &str,
    config: &PackConfig,
    out: &mut dyn Write,
) -> Result<()> {
    let reader = open_reader(dir, container, config)?;
    let mut input = reader
        .open_input(entry)
        .with_context(|| format!("opening {entry} in {container}"))?;
    io::copy(&mut input, out)?;
    Ok(())
}
