//! diskdex: persistent filesystem index.
//!
//! Thin binary entry point. All logic lives in the `diskdex-core` crate.
//!
//! Usage: `diskdex [ROOT]...`. Crawls each root into the index (the current
//! directory when none is given), measures the roots and logs a summary.
//! Configuration comes from the JSON file named by `DISKDEX_CONFIG`, if any,
//! then the `DISKDEX_*` environment overrides.

use anyhow::Context;
use diskdex_core::config::IndexConfig;
use diskdex_core::model::size::format_size;
use diskdex_core::query::Query;
use diskdex_core::DiskIndex;
use std::path::PathBuf;

fn load_config() -> anyhow::Result<IndexConfig> {
    let base = match std::env::var_os("DISKDEX_CONFIG") {
        Some(path) => IndexConfig::load(&PathBuf::from(path))?,
        None => IndexConfig::default(),
    };
    Ok(base.with_env_overrides()?)
}

fn main() -> anyhow::Result<()> {
    let config = load_config().context("loading configuration")?;

    // Initialise structured logging.
    tracing_subscriber::fmt()
        .with_max_level(config.tracing_level())
        .init();

    tracing::info!("diskdex starting (index at {})", config.db_path.display());

    let mut roots: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
    if roots.is_empty() {
        roots.push(std::env::current_dir().context("reading current directory")?);
    }

    let index = DiskIndex::open(&config).context("opening index")?;
    let report = index.crawl_blocking(&roots)?;
    tracing::info!(
        "Indexed {} items ({}) with {} errors skipped",
        report.items_indexed,
        format_size(report.bytes_indexed),
        report.errors_skipped
    );

    for root in &report.roots {
        match index.compute_size(root) {
            Ok(size) => tracing::info!("{}: {}", root.display(), format_size(size)),
            Err(e) => tracing::warn!("Could not measure {}: {e}", root.display()),
        }
    }

    let stats = index.stats()?;
    tracing::info!(
        "Index holds {} files and {} directories totalling {} ({} directories unmeasured)",
        stats.file_count,
        stats.dir_count,
        format_size(stats.total_size),
        stats.pending_dirs
    );

    for entry in index.query(&Query::largest_files(10))? {
        tracing::info!("{:>10}  {}", format_size(entry.size), entry.path.display());
    }

    Ok(())
}
