//! Build frame indexes for record files.
//!
//! ```text
//! tfrecord2idx train.tfrecord train.idx
//! tfrecord2idx --dir data/ --record-suffix .tfrecord --index-suffix .idx --jobs 8
//! ```
use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::{Path, PathBuf};
use tfrecord_loader::index::{Index, IndexFormat};
use tfrecord_loader::io::compression::Compression;
use tfrecord_loader::io::glob::files_with_suffix;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "tfrecord2idx",
    version,
    about = "Write a frame index for one record file or a directory of them"
)]
struct Cli {
    #[arg(help = "Record file to index", required_unless_present = "dir")]
    record: Option<PathBuf>,
    #[arg(help = "Index file to write", required_unless_present = "dir")]
    index: Option<PathBuf>,
    #[arg(long, conflicts_with_all = ["record", "index"], help = "Index every record file in this directory")]
    dir: Option<PathBuf>,
    #[arg(long, default_value = ".tfrecord", help = "Suffix of record files in --dir mode")]
    record_suffix: String,
    #[arg(long, default_value = ".idx", help = "Suffix replacing the record suffix for index files")]
    index_suffix: String,
    #[arg(long, default_value = "binary", help = "Index format: binary|text")]
    format: IndexFormat,
    #[arg(long, help = "Treat input as gzip-compressed (default: detect)")]
    gzip: bool,
    #[arg(long, help = "Worker threads in --dir mode (default: number of CPUs)")]
    jobs: Option<usize>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let compression = if cli.gzip { Compression::Gzip } else { Compression::Auto };

    if let Some(dir) = &cli.dir {
        return index_directory(dir, &cli, compression);
    }
    match (&cli.record, &cli.index) {
        (Some(record), Some(index)) => {
            let count = index_file(record, index, cli.format, compression)?;
            println!("{count}");
            Ok(())
        }
        _ => bail!("expected <record> <index>, or --dir <dir>"),
    }
}

fn index_file(record: &Path, index: &Path, format: IndexFormat, compression: Compression) -> Result<usize> {
    let built = Index::build_from_file(record, compression)
        .with_context(|| format!("failed to index {}", record.display()))?;
    built
        .save(index, format)
        .with_context(|| format!("failed to write {}", index.display()))?;
    info!(record = %record.display(), index = %index.display(), frames = built.len(), "index written");
    Ok(built.len())
}

fn index_path_for(record: &Path, record_suffix: &str, index_suffix: &str) -> PathBuf {
    let name = record.to_string_lossy();
    let stem = name.strip_suffix(record_suffix).unwrap_or(&name);
    PathBuf::from(format!("{stem}{index_suffix}"))
}

fn index_directory(dir: &Path, cli: &Cli, compression: Compression) -> Result<()> {
    let records = files_with_suffix(dir, &cli.record_suffix)?;
    if records.is_empty() {
        bail!("no files ending in {} under {}", cli.record_suffix, dir.display());
    }
    let jobs: Vec<(PathBuf, PathBuf)> = records
        .into_iter()
        .map(|record| {
            let index = index_path_for(&record, &cli.record_suffix, &cli.index_suffix);
            (record, index)
        })
        .collect();
    info!(files = jobs.len(), dir = %dir.display(), "indexing directory");

    let total = run_jobs(&jobs, cli.format, compression, cli.jobs)?;
    println!("{} files, {total} frames", jobs.len());
    Ok(())
}

#[cfg(feature = "parallel-io")]
fn run_jobs(
    jobs: &[(PathBuf, PathBuf)],
    format: IndexFormat,
    compression: Compression,
    threads: Option<usize>,
) -> Result<usize> {
    use rayon::prelude::*;

    let threads = threads.unwrap_or_else(num_cpus::get).clamp(1, jobs.len().max(1));
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .context("failed to start worker pool")?;
    let counts: Vec<usize> = pool.install(|| {
        jobs.par_iter()
            .map(|(record, index)| index_file(record, index, format, compression))
            .collect::<Result<_>>()
    })?;
    Ok(counts.iter().sum())
}

#[cfg(not(feature = "parallel-io"))]
fn run_jobs(
    jobs: &[(PathBuf, PathBuf)],
    format: IndexFormat,
    compression: Compression,
    _threads: Option<usize>,
) -> Result<usize> {
    jobs.iter()
        .map(|(record, index)| index_file(record, index, format, compression))
        .sum()
}
