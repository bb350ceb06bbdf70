//! Statement (QUERY) events: forward replay, flashback DDL inverses,
//! keyword tallies, and the transaction-begin marker every mode needs.

use std::io::Write;

use binlog_events::{EventHeader, QueryEvent};

use crate::sqlparse::{self, Statement};

use super::{Mode, RebuildEngine};

impl<W: Write> RebuildEngine<W> {
    pub(super) fn on_query(&mut self, header: &EventHeader, query: &QueryEvent) -> anyhow::Result<()> {
        let sql = query.query.trim();
        if sql == "BEGIN" {
            self.stats
                .observe_begin(u64::from(header.log_pos), header.timestamp);
        }
        self.stats.observe_query_time(query.execution_time);

        if self.mode == Mode::Stat {
            if let Some(keyword) = sql.split_whitespace().next() {
                self.stats.tally_query(&keyword.to_ascii_lowercase());
            }
            return Ok(());
        }
        self.query_format(query, sql)
    }

    fn query_format(&mut self, query: &QueryEvent, sql: &str) -> anyhow::Result<()> {
        // BEGIN markers carry no replayable work.
        if sql.starts_with("BEGIN") {
            return Ok(());
        }
        if let Some(hook) = self.hook.as_mut() {
            let text = hook.query_rewrite(sql)?;
            writeln!(self.out, "{text}")?;
            return Ok(());
        }

        let statement = match self.mode {
            Mode::Flashback => match self.flashback_query(query, sql) {
                Some(statement) => statement,
                None => return Ok(()),
            },
            _ => {
                if sql.ends_with(';') {
                    sql.to_string()
                } else {
                    format!("{sql};")
                }
            }
        };
        self.emit(&statement, false)?;
        if !sql.eq_ignore_ascii_case("COMMIT") {
            self.pace()?;
        }
        Ok(())
    }

    /// The structural inverse of a DDL statement, when one exists.
    fn flashback_query(&self, query: &QueryEvent, sql: &str) -> Option<String> {
        match sqlparse::classify(sql) {
            Statement::CreateTable { schema, name, .. } => Some(format!(
                "DROP TABLE IF EXISTS {};",
                self.qualify(schema.as_deref(), &name, &query.schema)
            )),
            Statement::CreateDatabase { name } => {
                Some(format!("DROP DATABASE IF EXISTS `{name}`;"))
            }
            Statement::CreateIndex {
                index,
                schema,
                table,
            } => Some(format!(
                "DROP INDEX `{index}` ON {};",
                self.qualify(schema.as_deref(), &table, &query.schema)
            )),
            Statement::CreateView { schema, name } => Some(format!(
                "DROP VIEW IF EXISTS {};",
                self.qualify(schema.as_deref(), &name, &query.schema)
            )),
            _ => {
                tracing::debug!(statement = %sql, "no flashback inverse for statement");
                None
            }
        }
    }
}
