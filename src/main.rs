// src/main.rs
//! romsync - CLI entry point

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, BufReader, Read, Write};
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

use romsync::archive;
use romsync::catalog::Datfile;
use romsync::checksum::Checksum;
use romsync::Synchronizer;

// =============================================================================
// CLI Definitions
// =============================================================================

#[derive(Parser)]
#[command(name = "romsync")]
#[command(version)]
#[command(about = "Keep a pristine directory of torrentzip archives synchronized with a dat file", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synchronize a target directory against the dat file read on
    /// standard input; the trimmed dat file is written to standard output
    Sync {
        /// Target directory
        target: PathBuf,

        /// Additional source files or directories to scan
        source: Vec<PathBuf>,

        /// Number of worker threads (defaults to the CPU count)
        #[arg(short, long, default_value_t = 0)]
        workers: usize,

        /// Log what would happen without touching the target directory
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Log progress to standard error
        #[arg(short, long)]
        verbose: bool,

        /// Checksum algorithm used to match ROMs
        #[arg(short, long, default_value = "crc32")]
        algorithm: Checksum,

        /// File listing games known to be missing, one name per line
        #[arg(long, value_name = "PATH")]
        mia: Option<PathBuf>,
    },

    /// Print the members and checksums of one or more archives
    Info {
        /// Archive, directory or file to inspect
        #[arg(required = true)]
        path: Vec<PathBuf>,
    },
}

// =============================================================================
// Main Entry Point
// =============================================================================

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Sync {
            target,
            source,
            workers,
            dry_run,
            verbose,
            algorithm,
            mia,
        } => cmd_sync(target, source, workers, dry_run, verbose, algorithm, mia),

        Commands::Info { path } => cmd_info(&path),
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_sync(
    target: PathBuf,
    source: Vec<PathBuf>,
    workers: usize,
    dry_run: bool,
    verbose: bool,
    algorithm: Checksum,
    mia: Option<PathBuf>,
) -> Result<()> {
    init_tracing(verbose);

    let mut synchronizer = Synchronizer::new()
        .with_workers(workers)
        .with_dry_run(dry_run)
        .with_algorithm(algorithm);

    if let Some(mia) = mia {
        let file = fs::File::open(&mia)?;
        synchronizer = synchronizer.with_missing(BufReader::new(file))?;
    }

    // The target directory is scanned too: anything already in place is
    // a source for itself and for other games
    let mut roots = vec![target.clone()];
    roots.extend(source);

    let start = Instant::now();
    let index = synchronizer.scan(&roots)?;
    info!("Read {} bytes in {:?}", synchronizer.rx(), start.elapsed());

    synchronizer.reset_counters();

    let mut xml = String::new();
    io::stdin().read_to_string(&mut xml)?;
    let datfile = Datfile::parse(&xml)?;

    let start = Instant::now();
    synchronizer.update(&target, &datfile, &index)?;
    info!(
        "Read {} bytes and wrote {} bytes in {:?}",
        synchronizer.rx(),
        synchronizer.tx(),
        start.elapsed()
    );

    synchronizer.sweep(&target, &datfile)?;

    let trimmed = datfile.to_xml()?;
    if !trimmed.is_empty() {
        // Trailing newline only when there is some XML
        println!("{}", trimmed);
    }

    Ok(())
}

fn cmd_info(paths: &[PathBuf]) -> Result<()> {
    init_tracing(false);

    let stdout = io::stdout();
    let mut out = stdout.lock();

    for (i, path) in paths.iter().enumerate() {
        if i > 0 {
            writeln!(out)?;
        }
        writeln!(out, "{}", path.display())?;
        writeln!(out)?;

        let mut reader = archive::new_reader(path)?;

        let mut rows = vec![[
            "ROM".to_string(),
            "Size".to_string(),
            "Header".to_string(),
            "CRC32".to_string(),
            "MD5".to_string(),
            "SHA1".to_string(),
        ]];
        for member in reader.files() {
            let (stored, header) = reader.size(&member)?;
            let crc32 = hex::encode(reader.checksum(&member, Checksum::Crc32)?);
            let md5 = hex::encode(reader.checksum(&member, Checksum::Md5)?);
            let sha1 = hex::encode(reader.checksum(&member, Checksum::Sha1)?);
            rows.push([
                member,
                (stored - header).to_string(),
                header.to_string(),
                crc32,
                md5,
                sha1,
            ]);
        }

        let mut widths = [0usize; 6];
        for row in &rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.len());
            }
        }

        for row in &rows {
            let mut line = String::new();
            for (width, cell) in widths.iter().zip(row) {
                line.push_str(&format!("  {:<width$}", cell, width = *width));
            }
            writeln!(out, "{}", line.trim_end())?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_writer(io::stderr)
        .init();
}
