//! Event rebuild engine.
//!
//! Admitted events are dispatched by kind and by output mode: forward
//! SQL replays the change, flashback SQL undoes it, statistics mode
//! only counts. An attached [`ScriptHook`] takes over statement
//! generation for row and query events. Transaction windows are
//! sampled in every mode so long-transaction reports stay available.

mod delete;
mod insert;
mod query;
mod stat;
mod update;
mod values;

pub use stat::Statistics;

use std::io::Write;
use std::time::Duration;

use binlog_events::{EventPayload, LogEvent, RowsEvent};

use crate::hooks::ScriptHook;
use crate::schema::SchemaCatalog;

/// What the engine produces for each admitted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Forward SQL that replays the captured changes.
    Sql,
    /// Inverse SQL that rolls the captured changes back.
    Flashback,
    /// Counters and transaction samples only, reported as JSON.
    Stat,
}

/// Output-shaping options, resolved from configuration.
#[derive(Debug, Clone)]
pub struct RebuildOptions {
    /// Emit column name lists on INSERT when the catalog knows them.
    pub complete_insert: bool,
    /// Rows per multi-row INSERT statement.
    pub extended_insert_count: usize,
    /// Column names dropped from INSERT lists and UPDATE SET clauses.
    pub ignore_columns: Vec<String>,
    /// REPLACE INTO instead of INSERT, and UPDATE rewritten as REPLACE.
    pub replace: bool,
    /// Render bare table names without the schema qualifier.
    pub without_db_name: bool,
    /// Render string values as X'..' hex literals.
    pub hex_string: bool,
    /// Non-zero pauses replay with SELECT sleep(..) between statements.
    pub sleep_interval: Duration,
}

impl Default for RebuildOptions {
    fn default() -> Self {
        RebuildOptions {
            complete_insert: false,
            extended_insert_count: 1,
            ignore_columns: Vec::new(),
            replace: false,
            without_db_name: false,
            hex_string: false,
            sleep_interval: Duration::ZERO,
        }
    }
}

/// A row that could not be turned into a statement. Recovered per event:
/// the engine emits a commented diagnostic and moves on.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct RenderError {
    pub table: String,
    pub message: String,
}

pub struct RebuildEngine<W: Write> {
    mode: Mode,
    opts: RebuildOptions,
    catalog: SchemaCatalog,
    stats: Statistics,
    hook: Option<Box<dyn ScriptHook>>,
    out: W,
}

impl<W: Write> RebuildEngine<W> {
    pub fn new(mode: Mode, opts: RebuildOptions, catalog: SchemaCatalog, out: W) -> Self {
        RebuildEngine {
            mode,
            opts,
            catalog,
            stats: Statistics::default(),
            hook: None,
            out,
        }
    }

    /// Attach a rewrite hook; its `init` runs immediately.
    pub fn with_hook(mut self, mut hook: Box<dyn ScriptHook>) -> anyhow::Result<Self> {
        hook.init()?;
        self.hook = Some(hook);
        Ok(self)
    }

    pub fn stats(&self) -> &Statistics {
        &self.stats
    }

    /// Route one admitted event. Row and query events render output;
    /// commit markers only close the open transaction window.
    pub fn dispatch(&mut self, event: &LogEvent) -> anyhow::Result<()> {
        match &event.payload {
            EventPayload::WriteRows(rows) => {
                self.on_insert(rows)?;
                self.pace()?;
            }
            EventPayload::UpdateRows(rows) => {
                self.on_update(rows)?;
                self.pace()?;
            }
            EventPayload::DeleteRows(rows) => {
                self.on_delete(rows)?;
                self.pace()?;
            }
            EventPayload::Query(query) => self.on_query(&event.header, query)?,
            EventPayload::Xid(_) => self.stats.observe_commit(u64::from(event.header.log_pos)),
            _ => {}
        }
        Ok(())
    }

    /// Finish the run: let the hook clean up, render the statistics
    /// report when in statistics mode, and flush.
    pub fn finish(mut self) -> anyhow::Result<Statistics> {
        if let Some(hook) = self.hook.as_mut() {
            hook.finalize()?;
        }
        if self.mode == Mode::Stat {
            let report = self.stats.report()?;
            writeln!(self.out, "{report}")?;
        }
        self.out.flush()?;
        Ok(self.stats)
    }

    fn table_name(&self, rows: &RowsEvent) -> String {
        if self.opts.without_db_name {
            rows.table_only()
        } else {
            rows.qualified_name()
        }
    }

    /// Quote a statement-level table reference, falling back to the
    /// session's default schema for unqualified names.
    fn qualify(&self, schema: Option<&str>, table: &str, default_schema: &str) -> String {
        let quoted = format!("`{table}`");
        if self.opts.without_db_name {
            return quoted;
        }
        let db = schema.filter(|s| !s.is_empty()).unwrap_or(default_schema);
        if db.is_empty() {
            quoted
        } else {
            format!("`{db}`.{quoted}")
        }
    }

    fn emit(&mut self, statement: &str, advisory: bool) -> anyhow::Result<()> {
        if advisory {
            writeln!(self.out, "-- {statement}")?;
        } else {
            writeln!(self.out, "{statement}")?;
        }
        Ok(())
    }

    fn render_failure(&mut self, err: &RenderError) -> anyhow::Result<()> {
        tracing::debug!(table = %err.table, error = %err, "row failed to render");
        writeln!(self.out, "-- Table: {}, Error: {}", err.table, err)?;
        Ok(())
    }

    /// Pause replay between emitted statements when configured.
    fn pace(&mut self) -> anyhow::Result<()> {
        if self.mode == Mode::Stat || self.hook.is_some() || self.opts.sleep_interval.is_zero() {
            return Ok(());
        }
        let seconds = self.opts.sleep_interval.as_secs_f64();
        writeln!(self.out, "SELECT sleep({seconds:.6});")?;
        Ok(())
    }
}

/// Join the non-empty segments with single spaces and close the statement.
fn assemble(segments: &[&str]) -> String {
    let mut statement = segments
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ");
    statement.push(';');
    statement
}
