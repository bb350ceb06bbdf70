//! Configuration resolution: defaults, config file, command line.
//!
//! Every knob exists in three layers. Built-in defaults sit at the
//! bottom, a YAML config file may override them, and command-line flags
//! win over both. [`Settings`] is the resolved result the rest of the
//! program runs on.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, NaiveDateTime};
use chrono_tz::Tz;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize, Serializer};

use crate::filter::FilterOptions;
use crate::pipeline::StreamOptions;
use crate::rebuild::{Mode, RebuildOptions};

/// Read when present, unless --no-defaults or an explicit --config.
const DEFAULT_CONFIG_FILE: &str = "binflash.yaml";

const DEFAULT_IGNORE_TABLES: [&str; 2] = ["mysql.%", "percona.%"];

#[derive(Parser)]
#[command(name = "binflash")]
#[command(about = "Parse, filter, replay and flash back MySQL binlogs")]
#[command(long_about = None)]
pub struct Cli {
    /// Binlog files to read, oldest first. Use - for stdin.
    pub binlog_files: Vec<String>,

    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(flatten)]
    pub mysql: MysqlArgs,

    #[command(flatten)]
    pub filter: FilterArgs,

    #[command(flatten)]
    pub rebuild: RebuildArgs,
}

#[derive(Parser, Clone)]
pub struct GlobalArgs {
    /// Configuration file (YAML)
    #[arg(long, env = "BINFLASH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Do not read the default configuration file
    #[arg(long)]
    pub no_defaults: bool,

    /// Print the resolved configuration and exit
    #[arg(long)]
    pub print_config: bool,

    /// Time zone for datetime filters and rendered times
    #[arg(long)]
    pub time_zone: Option<String>,

    /// Keep following new events instead of stopping at the end
    #[arg(long)]
    pub daemon: bool,
}

#[derive(Parser, Clone)]
pub struct MysqlArgs {
    /// MySQL host, for live schema discovery
    #[arg(long, env = "BINFLASH_HOST")]
    pub host: Option<String>,

    /// MySQL port
    #[arg(long, short = 'P')]
    pub port: Option<u16>,

    /// MySQL user
    #[arg(long, short = 'u')]
    pub user: Option<String>,

    /// MySQL password
    #[arg(long, short = 'p', env = "BINFLASH_PASSWORD")]
    pub password: Option<String>,

    /// DDL file describing table schemas, instead of a live connection
    #[arg(long)]
    pub schema_file: Option<PathBuf>,

    /// Keyring file for encrypted binlogs
    #[arg(long)]
    pub keyring: Option<PathBuf>,

    /// Master info file holding stream positions
    #[arg(long)]
    pub master_info: Option<PathBuf>,

    /// How often stream positions are flushed; 0 flushes on every update
    #[arg(long)]
    pub sync_interval: Option<String>,

    /// How long to wait for stream events before reconnecting
    #[arg(long)]
    pub read_timeout: Option<String>,

    /// Reconnect attempts before giving up on a stream
    #[arg(long)]
    pub retry_count: Option<u32>,
}

#[derive(Parser, Clone)]
pub struct FilterArgs {
    /// Only rebuild changes for these tables (db.tb, % wildcards)
    #[arg(long, short = 't', value_delimiter = ',')]
    pub tables: Vec<String>,

    /// Skip changes for these tables (db.tb, % wildcards)
    #[arg(long, short = 'i', value_delimiter = ',')]
    pub ignore_tables: Vec<String>,

    /// Only keep these statement kinds (insert, update, delete, alter, ...)
    #[arg(long, value_delimiter = ',')]
    pub event_types: Vec<String>,

    /// Only keep transactions started by this session thread id
    #[arg(long)]
    pub thread_id: Option<u32>,

    /// Only keep events written by this server id
    #[arg(long)]
    pub server_id: Option<u32>,

    /// Skip events before this file position
    #[arg(long, short = 'j')]
    pub start_position: Option<u64>,

    /// Stop at the first event past this file position
    #[arg(long)]
    pub stop_position: Option<u64>,

    /// Skip events before this time (YYYY-MM-DD HH:MM:SS)
    #[arg(long)]
    pub start_datetime: Option<String>,

    /// Stop at the first event at or past this time (YYYY-MM-DD HH:MM:SS)
    #[arg(long)]
    pub stop_datetime: Option<String>,

    /// Only keep transactions inside these GTID sets
    #[arg(long)]
    pub include_gtids: Option<String>,

    /// Skip transactions inside these GTID sets
    #[arg(long)]
    pub exclude_gtids: Option<String>,
}

#[derive(Parser, Clone)]
pub struct RebuildArgs {
    /// Output to produce
    #[arg(long, value_enum)]
    pub plugin: Option<Plugin>,

    /// Spell out column names in rebuilt INSERT statements
    #[arg(long)]
    pub complete_insert: bool,

    /// Rows per rebuilt INSERT statement
    #[arg(long)]
    pub extended_insert_count: Option<usize>,

    /// Column names to leave out of rebuilt statements
    #[arg(long, value_delimiter = ',')]
    pub ignore_columns: Vec<String>,

    /// Rebuild row updates as inserts of the new image
    #[arg(long)]
    pub replace: bool,

    /// Drop the schema qualifier from rebuilt statements
    #[arg(long)]
    pub without_db_name: bool,

    /// Render text values as hex literals
    #[arg(long)]
    pub hex_string: bool,

    /// Sleep between rebuilt statements, to pace a replay
    #[arg(long)]
    pub sleep_interval: Option<String>,
}

/// What to produce from the filtered event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plugin {
    /// Replay changes as forward SQL
    Sql,
    /// Undo changes with reverse SQL
    Flashback,
    /// Summarize transactions without rebuilding SQL
    Stat,
    /// List which files cover the requested window
    Find,
    /// Decrypt binlog files into plain containers
    Decrypt,
}

/// Config file shape. Sections and keys mirror the command-line flags.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct FileConfig {
    pub global: GlobalSection,
    pub mysql: MysqlSection,
    pub filters: FilterSection,
    pub rebuild: RebuildSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct GlobalSection {
    pub time_zone: Option<String>,
    pub daemon: Option<bool>,
    pub files: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct MysqlSection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub schema_file: Option<PathBuf>,
    pub keyring: Option<PathBuf>,
    pub master_info: Option<PathBuf>,
    pub sync_interval: Option<String>,
    pub read_timeout: Option<String>,
    pub retry_count: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct FilterSection {
    pub tables: Option<Vec<String>>,
    pub ignore_tables: Option<Vec<String>>,
    pub event_types: Option<Vec<String>>,
    pub thread_id: Option<u32>,
    pub server_id: Option<u32>,
    pub start_position: Option<u64>,
    pub stop_position: Option<u64>,
    pub start_datetime: Option<String>,
    pub stop_datetime: Option<String>,
    pub include_gtids: Option<String>,
    pub exclude_gtids: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RebuildSection {
    pub plugin: Option<Plugin>,
    pub complete_insert: Option<bool>,
    pub extended_insert_count: Option<usize>,
    pub ignore_columns: Option<Vec<String>>,
    pub replace: Option<bool>,
    pub without_db_name: Option<bool>,
    pub hex_string: Option<bool>,
    pub sleep_interval: Option<String>,
}

/// Fully resolved configuration.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Settings {
    pub plugin: Plugin,
    #[serde(serialize_with = "tz_text")]
    pub time_zone: Tz,
    pub daemon: bool,
    pub files: Vec<String>,

    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub schema_file: Option<PathBuf>,
    pub keyring: Option<PathBuf>,
    pub master_info: PathBuf,
    #[serde(serialize_with = "duration_text")]
    pub sync_interval: Duration,
    #[serde(serialize_with = "duration_text")]
    pub read_timeout: Duration,
    pub retry_count: u32,

    pub tables: Vec<String>,
    pub ignore_tables: Vec<String>,
    pub event_types: Vec<String>,
    pub thread_id: Option<u32>,
    pub server_id: Option<u32>,
    pub start_position: Option<u64>,
    pub stop_position: Option<u64>,
    pub start_datetime: Option<String>,
    pub stop_datetime: Option<String>,
    pub include_gtids: Option<String>,
    pub exclude_gtids: Option<String>,

    pub complete_insert: bool,
    pub extended_insert_count: usize,
    pub ignore_columns: Vec<String>,
    pub replace: bool,
    pub without_db_name: bool,
    pub hex_string: bool,
    #[serde(serialize_with = "duration_text")]
    pub sleep_interval: Duration,
}

impl Settings {
    pub fn resolve(cli: Cli) -> anyhow::Result<Settings> {
        let file = load_file_config(&cli.global)?;

        let tz_name = cli
            .global
            .time_zone
            .or(file.global.time_zone)
            .unwrap_or_else(|| "UTC".to_string());
        let time_zone: Tz = tz_name
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid time zone {tz_name:?}: {e}"))?;

        let files = if cli.binlog_files.is_empty() {
            file.global.files.unwrap_or_default()
        } else {
            cli.binlog_files
        };

        let mut settings = Settings {
            plugin: cli.rebuild.plugin.or(file.rebuild.plugin).unwrap_or(Plugin::Sql),
            time_zone,
            daemon: cli.global.daemon || file.global.daemon.unwrap_or(false),
            files,

            host: cli
                .mysql
                .host
                .or(file.mysql.host)
                .unwrap_or_else(|| "127.0.0.1".to_string()),
            port: cli.mysql.port.or(file.mysql.port).unwrap_or(3306),
            user: cli
                .mysql
                .user
                .or(file.mysql.user)
                .unwrap_or_else(|| "root".to_string()),
            password: cli
                .mysql
                .password
                .or(file.mysql.password)
                .unwrap_or_default(),
            schema_file: cli.mysql.schema_file.or(file.mysql.schema_file),
            keyring: cli.mysql.keyring.or(file.mysql.keyring),
            master_info: cli
                .mysql
                .master_info
                .or(file.mysql.master_info)
                .unwrap_or_else(|| PathBuf::from("master.info")),
            sync_interval: parse_duration(
                &cli.mysql
                    .sync_interval
                    .or(file.mysql.sync_interval)
                    .unwrap_or_else(|| "1s".to_string()),
            )
            .context("Invalid --sync-interval")?,
            read_timeout: parse_duration(
                &cli.mysql
                    .read_timeout
                    .or(file.mysql.read_timeout)
                    .unwrap_or_else(|| "3s".to_string()),
            )
            .context("Invalid --read-timeout")?,
            retry_count: cli
                .mysql
                .retry_count
                .or(file.mysql.retry_count)
                .unwrap_or(100),

            tables: pick_list(cli.filter.tables, file.filters.tables, &[]),
            ignore_tables: pick_list(
                cli.filter.ignore_tables,
                file.filters.ignore_tables,
                &DEFAULT_IGNORE_TABLES,
            ),
            event_types: pick_list(cli.filter.event_types, file.filters.event_types, &[]),
            thread_id: cli.filter.thread_id.or(file.filters.thread_id),
            server_id: cli.filter.server_id.or(file.filters.server_id),
            start_position: cli.filter.start_position.or(file.filters.start_position),
            stop_position: cli.filter.stop_position.or(file.filters.stop_position),
            start_datetime: cli.filter.start_datetime.or(file.filters.start_datetime),
            stop_datetime: cli.filter.stop_datetime.or(file.filters.stop_datetime),
            include_gtids: cli.filter.include_gtids.or(file.filters.include_gtids),
            exclude_gtids: cli.filter.exclude_gtids.or(file.filters.exclude_gtids),

            complete_insert: cli.rebuild.complete_insert
                || file.rebuild.complete_insert.unwrap_or(false),
            extended_insert_count: cli
                .rebuild
                .extended_insert_count
                .or(file.rebuild.extended_insert_count)
                .unwrap_or(1),
            ignore_columns: pick_list(
                cli.rebuild.ignore_columns,
                file.rebuild.ignore_columns,
                &[],
            ),
            replace: cli.rebuild.replace || file.rebuild.replace.unwrap_or(false),
            without_db_name: cli.rebuild.without_db_name
                || file.rebuild.without_db_name.unwrap_or(false),
            hex_string: cli.rebuild.hex_string || file.rebuild.hex_string.unwrap_or(false),
            sleep_interval: parse_duration(
                &cli.rebuild
                    .sleep_interval
                    .or(file.rebuild.sleep_interval)
                    .unwrap_or_else(|| "0s".to_string()),
            )
            .context("Invalid --sleep-interval")?,
        };

        // Flashing back without an explicit cutoff would keep undoing
        // whatever lands after the command started.
        if settings.plugin == Plugin::Flashback
            && !settings.daemon
            && settings.stop_datetime.is_none()
        {
            let now = chrono::Utc::now().with_timezone(&settings.time_zone);
            settings.stop_datetime = Some(now.format("%Y-%m-%d %H:%M:%S").to_string());
        }

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.extended_insert_count == 0 {
            anyhow::bail!("--extended-insert-count must be at least 1");
        }
        if !self.ignore_columns.is_empty() && !self.complete_insert {
            anyhow::bail!("--ignore-columns requires --complete-insert");
        }
        if let (Some(start), Some(stop)) = (self.start_position, self.stop_position) {
            if stop <= start {
                anyhow::bail!(
                    "--stop-position {stop} must be greater than --start-position {start}"
                );
            }
        }
        if let (Some(start), Some(stop)) = (&self.start_datetime, &self.stop_datetime) {
            let start = parse_datetime(start, self.time_zone)?;
            let stop = parse_datetime(stop, self.time_zone)?;
            if stop <= start {
                anyhow::bail!("--stop-datetime must be later than --start-datetime");
            }
        }
        Ok(())
    }

    /// Filter predicate inputs, with datetimes resolved to timestamps.
    pub fn filter_options(&self) -> anyhow::Result<FilterOptions> {
        let start_ts = self
            .start_datetime
            .as_deref()
            .map(|s| parse_datetime(s, self.time_zone))
            .transpose()
            .context("Invalid --start-datetime")?
            .map(|dt| dt.timestamp() as u32);
        let stop_ts = self
            .stop_datetime
            .as_deref()
            .map(|s| parse_datetime(s, self.time_zone))
            .transpose()
            .context("Invalid --stop-datetime")?
            .map(|dt| dt.timestamp() as u32);

        Ok(FilterOptions {
            tables: self.tables.clone(),
            ignore_tables: self.ignore_tables.clone(),
            event_types: self.event_types.clone(),
            thread_id: self.thread_id,
            server_id: self.server_id,
            start_position: self.start_position,
            stop_position: self.stop_position,
            start_timestamp: start_ts,
            stop_timestamp: stop_ts,
            include_gtids: self.include_gtids.clone(),
            exclude_gtids: self.exclude_gtids.clone(),
        })
    }

    pub fn rebuild_options(&self) -> RebuildOptions {
        RebuildOptions {
            complete_insert: self.complete_insert,
            extended_insert_count: self.extended_insert_count,
            ignore_columns: self.ignore_columns.clone(),
            replace: self.replace,
            without_db_name: self.without_db_name,
            hex_string: self.hex_string,
            sleep_interval: self.sleep_interval,
        }
    }

    pub fn stream_options(&self) -> StreamOptions {
        StreamOptions {
            master_info: self.master_info.clone(),
            sync_interval: self.sync_interval,
            read_timeout: self.read_timeout,
            retry_count: self.retry_count,
            daemon: self.daemon,
        }
    }

    /// Connection URL for live schema discovery.
    pub fn mysql_url(&self) -> String {
        format!(
            "mysql://{}:{}@{}:{}",
            self.user, self.password, self.host, self.port
        )
    }

    /// The rebuild mode for this plugin, if it rebuilds at all.
    pub fn output_mode(&self) -> Option<Mode> {
        match self.plugin {
            Plugin::Sql => Some(Mode::Sql),
            Plugin::Flashback => Some(Mode::Flashback),
            Plugin::Stat => Some(Mode::Stat),
            Plugin::Find | Plugin::Decrypt => None,
        }
    }
}

fn load_file_config(global: &GlobalArgs) -> anyhow::Result<FileConfig> {
    let path = match (&global.config, global.no_defaults) {
        (Some(path), _) => Some(path.clone()),
        (None, true) => None,
        (None, false) => {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            default.exists().then_some(default)
        }
    };
    let Some(path) = path else {
        return Ok(FileConfig::default());
    };
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    serde_yaml::from_str(&raw)
        .with_context(|| format!("Failed to parse config file {}", path.display()))
}

/// Lists do not merge across layers; the most specific non-empty one wins.
fn pick_list(flag: Vec<String>, file: Option<Vec<String>>, default: &[&str]) -> Vec<String> {
    if !flag.is_empty() {
        return flag;
    }
    match file {
        Some(list) if !list.is_empty() => list,
        _ => default.iter().map(|s| s.to_string()).collect(),
    }
}

/// Parse a duration like "500ms", "3s", "5m", "1h" or "0.5" (seconds).
pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        anyhow::bail!("Empty duration string");
    }
    // "ms" has to be peeled off before "s".
    let (num, unit) = if let Some(num) = s.strip_suffix("ms") {
        (num, 0.001)
    } else if let Some(num) = s.strip_suffix('h') {
        (num, 3600.0)
    } else if let Some(num) = s.strip_suffix('m') {
        (num, 60.0)
    } else if let Some(num) = s.strip_suffix('s') {
        (num, 1.0)
    } else {
        (s, 1.0)
    };
    let value: f64 = num
        .trim()
        .parse()
        .with_context(|| format!("Invalid duration value: {s}"))?;
    if value < 0.0 {
        anyhow::bail!("Negative duration: {s}");
    }
    Ok(Duration::from_secs_f64(value * unit))
}

/// Parse a wall-clock datetime in the configured time zone.
pub fn parse_datetime(s: &str, tz: Tz) -> anyhow::Result<DateTime<Tz>> {
    let naive = NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S")
        .with_context(|| format!("Invalid datetime {s:?}, expected YYYY-MM-DD HH:MM:SS"))?;
    naive
        .and_local_timezone(tz)
        .earliest()
        .with_context(|| format!("Datetime {s:?} does not exist in time zone {tz}"))
}

fn tz_text<S: Serializer>(tz: &Tz, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(tz.name())
}

fn duration_text<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    if d.subsec_nanos() == 0 {
        serializer.serialize_str(&format!("{}s", d.as_secs()))
    } else {
        serializer.serialize_str(&format!("{}s", d.as_secs_f64()))
    }
}
