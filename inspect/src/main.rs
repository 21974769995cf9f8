use std::{
    fs,
    path::{Path, PathBuf},
};

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Result, WrapErr, bail, eyre};
use region::{Access, BackendKind, RegionError, RegionFile, RegionOpenOptions, RegionPos};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "region-inspect", about = "Inspect and repair region files")]
struct Args {
    /// TOML file with default open options (backend, access, create).
    #[arg(long, global = true)]
    options: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print entry count, sector usage and the free gaps.
    Info {
        file: PathBuf,
        /// Defaults to the options file, then to `mapped`.
        #[arg(long, value_enum)]
        backend: Option<Backend>,
    },

    /// Read every record and report the corrupted ones.
    Verify {
        file: PathBuf,
        /// Defaults to the options file, then to `mapped`.
        #[arg(long, value_enum)]
        backend: Option<Backend>,
    },

    /// Write the payload stored at (x, z) to a file.
    Extract {
        file: PathBuf,
        x: i32,
        z: i32,
        out: PathBuf,
        /// Defaults to the options file, then to `mapped`.
        #[arg(long, value_enum)]
        backend: Option<Backend>,
    },

    /// Delete the record stored at (x, z).
    Remove {
        file: PathBuf,
        x: i32,
        z: i32,
        /// Zero-fill the freed sectors.
        #[arg(long)]
        erase: bool,
        /// Defaults to the options file, then to `direct`.
        #[arg(long, value_enum)]
        backend: Option<Backend>,
    },
}

#[derive(Copy, Clone, ValueEnum)]
enum Backend {
    Direct,
    Buffered,
    Mapped,
}

impl From<Backend> for BackendKind {
    fn from(backend: Backend) -> Self {
        match backend {
            Backend::Direct => BackendKind::Direct,
            Backend::Buffered => BackendKind::Buffered,
            Backend::Mapped => BackendKind::Mapped,
        }
    }
}

fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("region=info".parse()?)
                .add_directive("region_inspect=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let (defaults, from_file) = match &args.options {
        Some(path) => {
            let src = fs::read_to_string(path)
                .wrap_err_with(|| format!("reading options from {}", path.display()))?;
            (RegionOpenOptions::from_toml(&src)?, true)
        }
        None => (RegionOpenOptions::default(), false),
    };
    let pick = |arg: Option<Backend>, fallback: BackendKind| match arg {
        Some(backend) => backend.into(),
        None if from_file => defaults.backend,
        None => fallback,
    };

    match args.command {
        Command::Info { file, backend } => {
            let options = defaults
                .backend(pick(backend, BackendKind::Mapped))
                .access(Access::ReadOnly);
            let region = open(&file, options)?;
            let sectors = region.occupied_sectors()?;
            let mut present = 0;
            for pos in RegionPos::all() {
                if region.contains(pos.x() as i32, pos.z() as i32)? {
                    present += 1;
                }
            }

            println!("file:     {}", file.display());
            println!("length:   {} bytes", fs::metadata(&file)?.len());
            println!("records:  {present}");
            println!("sectors:  {} of {} occupied", sectors.occupied(), sectors.len());
            for gap in sectors.gaps() {
                println!("free:     sectors {}..{}", gap.start, gap.end);
            }
        }
        Command::Verify { file, backend } => {
            let options = defaults
                .backend(pick(backend, BackendKind::Mapped))
                .access(Access::ReadOnly);
            let region = open(&file, options)?;
            let mut corrupted = 0;
            let mut checked = 0;
            for pos in RegionPos::all() {
                match region.read(pos.x() as i32, pos.z() as i32) {
                    Ok(Some(_)) => checked += 1,
                    Ok(None) => {}
                    Err(e @ RegionError::Corrupted { .. }) => {
                        warn!("{e}");
                        corrupted += 1;
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            info!("Verified {checked} records in {}", file.display());
            if corrupted > 0 {
                bail!("{corrupted} corrupted records in {}", file.display());
            }
        }
        Command::Extract {
            file,
            x,
            z,
            out,
            backend,
        } => {
            let options = defaults
                .backend(pick(backend, BackendKind::Mapped))
                .access(Access::ReadOnly);
            let region = open(&file, options)?;
            let record = region
                .read(x, z)?
                .ok_or_else(|| eyre!("no record at ({x}, {z}) in {}", file.display()))?;
            fs::write(&out, &*record)
                .wrap_err_with(|| format!("writing record to {}", out.display()))?;
            info!("Extracted {} bytes to {}", record.len(), out.display());
        }
        Command::Remove {
            file,
            x,
            z,
            erase,
            backend,
        } => {
            let options = defaults
                .backend(pick(backend, BackendKind::Direct))
                .access(Access::ReadWrite);
            let mut region = open(&file, options)?;
            if region.delete(x, z, erase)? {
                region.flush()?;
                info!("Removed record at ({x}, {z}) from {}", file.display());
            } else {
                warn!("No record at ({x}, {z}) in {}", file.display());
            }
            region.close()?;
        }
    }

    Ok(())
}

/// Open an existing region file. Inspection never creates one.
fn open(file: &Path, options: RegionOpenOptions) -> Result<RegionFile> {
    RegionFile::open(file, options.create(false))
        .wrap_err_with(|| format!("opening {}", file.display()))
}
