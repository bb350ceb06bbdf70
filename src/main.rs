//! Command-line interface for binflash
//!
//! # Usage Examples
//!
//! ## Forward SQL
//! ```bash
//! # Replay everything in a binlog
//! binflash --plugin sql mysql-bin.000002
//!
//! # Replay one table, batching 50 rows per INSERT
//! binflash --plugin sql -t shop.orders --extended-insert-count 50 mysql-bin.000002
//! ```
//!
//! ## Flashback
//! ```bash
//! # Inverse SQL for a bad deploy window
//! binflash --plugin flashback \
//!   --start-datetime "2024-01-02 10:00:00" \
//!   --stop-datetime "2024-01-02 10:05:00" \
//!   -t shop.orders mysql-bin.000002
//! ```
//!
//! ## Statistics and file discovery
//! ```bash
//! binflash --plugin stat mysql-bin.000001 mysql-bin.000002
//! binflash --plugin find --start-datetime "2024-01-02 10:00:00" mysql-bin.0000*
//! ```
//!
//! ## Encrypted binlogs
//! ```bash
//! # Filters and rebuild work on encrypted files given the keyring
//! binflash --plugin flashback --keyring /var/lib/mysql-keyring/keyring mysql-bin.000005
//!
//! # Or strip the encryption once and keep the plain file
//! binflash --plugin decrypt --keyring /var/lib/mysql-keyring/keyring \
//!   mysql-bin.000005 > mysql-bin.000005.plain
//! ```

use std::io::{self, Write};

use anyhow::Context;
use clap::Parser;

use binflash::config::{Cli, Plugin, Settings};
use binflash::filter::FilterChain;
use binflash::pipeline;
use binflash::rebuild::RebuildEngine;
use binflash::schema::SchemaCatalog;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let print_config = cli.global.print_config;
    let settings = Settings::resolve(cli)?;

    if print_config {
        print!("{}", serde_yaml::to_string(&settings)?);
        return Ok(());
    }
    if settings.files.is_empty() {
        anyhow::bail!("no binlog files given, pass file paths or - for stdin");
    }

    match settings.plugin {
        Plugin::Find => run_find(&settings),
        Plugin::Decrypt => run_decrypt(&settings),
        Plugin::Sql | Plugin::Flashback | Plugin::Stat => run_rebuild(&settings).await,
    }
}

/// Print the files whose first-event timestamps overlap the window.
fn run_find(settings: &Settings) -> anyhow::Result<()> {
    let keep = pipeline::time_prefilter(
        &settings.files,
        &settings.filter_options()?,
        settings.keyring.as_deref(),
    )?;
    let mut out = io::stdout().lock();
    for file in &keep {
        writeln!(out, "{file}")?;
    }
    Ok(())
}

/// Write the plain bytes of each encrypted input to stdout.
fn run_decrypt(settings: &Settings) -> anyhow::Result<()> {
    let keyring = settings
        .keyring
        .as_deref()
        .context("decrypt requires --keyring")?;
    let mut out = io::BufWriter::new(io::stdout().lock());
    pipeline::decrypt_files(&settings.files, keyring, &mut out)
}

/// The sql / flashback / stat path: narrow the file list, load the
/// schema catalog, then filter and rebuild event by event.
async fn run_rebuild(settings: &Settings) -> anyhow::Result<()> {
    let mode = settings
        .output_mode()
        .context("plugin does not rebuild events")?;
    let filter_options = settings.filter_options()?;
    let files = pipeline::time_prefilter(
        &settings.files,
        &filter_options,
        settings.keyring.as_deref(),
    )?;

    let catalog = load_catalog(settings).await?;
    let mut filter = FilterChain::new(filter_options)?;
    let out = io::BufWriter::new(io::stdout().lock());
    let mut engine = RebuildEngine::new(mode, settings.rebuild_options(), catalog, out);

    pipeline::run_files(
        &files,
        settings.keyring.as_deref(),
        &mut filter,
        &mut engine,
    )?;
    engine.finish()?;
    Ok(())
}

/// Statistics need no column names; otherwise prefer a schema dump file
/// and fall back to live discovery. A missing server only degrades the
/// output to positional placeholders, so that failure is not fatal.
async fn load_catalog(settings: &Settings) -> anyhow::Result<SchemaCatalog> {
    if settings.output_mode() == Some(binflash::rebuild::Mode::Stat) {
        return Ok(SchemaCatalog::default());
    }
    if let Some(path) = settings.schema_file.as_deref() {
        return SchemaCatalog::from_ddl(path);
    }
    match SchemaCatalog::from_server(&settings.mysql_url()).await {
        Ok(catalog) => Ok(catalog),
        Err(error) => {
            tracing::warn!(
                %error,
                host = %settings.host,
                "schema discovery failed, rebuilding with positional placeholders"
            );
            Ok(SchemaCatalog::default())
        }
    }
}
