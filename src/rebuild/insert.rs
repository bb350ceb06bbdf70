//! INSERT row events: forward INSERT/REPLACE statements, flashback
//! DELETEs. The multi-row VALUES batcher also serves DELETE flashback
//! and REPLACE-rewritten UPDATEs.

use std::io::Write;

use binlog_events::{ColumnValue, RowsEvent};

use crate::schema::TableInfo;

use super::{assemble, values, Mode, RebuildEngine};

impl<W: Write> RebuildEngine<W> {
    pub(super) fn on_insert(&mut self, rows: &RowsEvent) -> anyhow::Result<()> {
        if self.mode == Mode::Stat {
            self.stats
                .tally_rows(&rows.schema_name, &rows.table_name, "insert", rows.rows.len());
            return Ok(());
        }
        let name = self.table_name(rows);
        let info = self.catalog.get(&rows.schema_name, &rows.table_name).cloned();

        if self.hook.is_some() {
            for row in &rows.rows {
                let rendered =
                    match values::render_row(rows, row, info.as_ref(), self.opts.hex_string) {
                        Ok(v) => v,
                        Err(err) => return self.render_failure(&err),
                    };
                if let Some(hook) = self.hook.as_mut() {
                    hook.insert_rewrite(&name, &rendered)?;
                }
            }
            return Ok(());
        }

        if self.mode == Mode::Flashback {
            self.emit_deletes(&name, info.as_ref(), rows, rows.rows.iter())
        } else {
            self.emit_inserts(&name, info.as_ref(), rows, rows.rows.iter())
        }
    }

    /// Render the given row images as INSERT (or REPLACE) statements,
    /// batching extended_insert_count rows per VALUES clause and flushing
    /// any trailing partial batch.
    pub(super) fn emit_inserts<'a, I>(
        &mut self,
        name: &str,
        info: Option<&TableInfo>,
        rows: &RowsEvent,
        images: I,
    ) -> anyhow::Result<()>
    where
        I: Iterator<Item = &'a Vec<ColumnValue>>,
    {
        let verb = if self.opts.replace {
            "REPLACE INTO"
        } else {
            "INSERT INTO"
        };
        let columns = self.insert_columns(info);
        let mut tuples: Vec<String> = Vec::new();
        for row in images {
            let rendered = match values::render_row(rows, row, info, self.opts.hex_string) {
                Ok(v) => v,
                Err(err) => return self.render_failure(&err),
            };
            let kept: Vec<String> = match (self.opts.complete_insert, info) {
                (true, Some(info)) => info
                    .columns
                    .iter()
                    .zip(&rendered)
                    .filter(|(c, _)| !self.opts.ignore_columns.contains(&c.name))
                    .map(|(_, v)| v.clone())
                    .collect(),
                _ => rendered,
            };
            tuples.push(format!("({})", kept.join(", ")));
            if tuples.len() == self.opts.extended_insert_count {
                let list = tuples.join(", ");
                let statement = assemble(&[verb, name, columns.as_str(), "VALUES", list.as_str()]);
                self.emit(&statement, false)?;
                tuples.clear();
            }
        }
        if !tuples.is_empty() {
            let list = tuples.join(", ");
            let statement = assemble(&[verb, name, columns.as_str(), "VALUES", list.as_str()]);
            self.emit(&statement, false)?;
        }
        Ok(())
    }

    /// The parenthesized column-name clause, when complete-insert is on
    /// and the catalog knows this table. Empty otherwise.
    fn insert_columns(&self, info: Option<&TableInfo>) -> String {
        if !self.opts.complete_insert {
            return String::new();
        }
        let Some(info) = info else {
            return String::new();
        };
        let names: Vec<String> = info
            .columns
            .iter()
            .filter(|c| !self.opts.ignore_columns.contains(&c.name))
            .map(|c| values::quote_name(&c.name))
            .collect();
        format!("({})", names.join(", "))
    }
}
