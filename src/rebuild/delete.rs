//! DELETE row events: forward DELETEs, flashback INSERTs.

use std::io::Write;

use binlog_events::{ColumnValue, RowsEvent};

use crate::schema::TableInfo;

use super::{assemble, values, Mode, RebuildEngine, RenderError};

impl<W: Write> RebuildEngine<W> {
    pub(super) fn on_delete(&mut self, rows: &RowsEvent) -> anyhow::Result<()> {
        if self.mode == Mode::Stat {
            self.stats
                .tally_rows(&rows.schema_name, &rows.table_name, "delete", rows.rows.len());
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
                    hook.delete_rewrite(&name, &rendered)?;
                }
            }
            return Ok(());
        }

        if self.mode == Mode::Flashback {
            self.emit_inserts(&name, info.as_ref(), rows, rows.rows.iter())
        } else {
            self.emit_deletes(&name, info.as_ref(), rows, rows.rows.iter())
        }
    }

    /// One DELETE per row image. Rows a primary key can pin down are
    /// emitted live; full-row matches are advisory comments.
    pub(super) fn emit_deletes<'a, I>(
        &mut self,
        name: &str,
        info: Option<&TableInfo>,
        rows: &RowsEvent,
        images: I,
    ) -> anyhow::Result<()>
    where
        I: Iterator<Item = &'a Vec<ColumnValue>>,
    {
        for row in images {
            let rendered = match values::render_row(rows, row, info, self.opts.hex_string) {
                Ok(v) => v,
                Err(err) => return self.render_failure(&err),
            };
            let Some((clause, advisory)) = values::row_predicate(info, &rendered) else {
                return self.render_failure(&RenderError {
                    table: format!("{}.{}", rows.schema_name, rows.table_name),
                    message: "primary key column missing from schema".to_string(),
                });
            };
            let statement = assemble(&["DELETE FROM", name, "WHERE", clause.as_str(), "LIMIT 1"]);
            self.emit(&statement, advisory)?;
        }
        Ok(())
    }
}
