//! UPDATE row events. The wire interleaves before/after images flat in
//! the row list; each consecutive pair is one logical update. A trailing
//! unpaired image is ignored.

use std::io::Write;

use binlog_events::RowsEvent;

use super::{assemble, values, Mode, RebuildEngine, RenderError};

impl<W: Write> RebuildEngine<W> {
    pub(super) fn on_update(&mut self, rows: &RowsEvent) -> anyhow::Result<()> {
        if self.mode == Mode::Stat {
            self.stats.tally_rows(
                &rows.schema_name,
                &rows.table_name,
                "update",
                rows.rows.len() / 2,
            );
            return Ok(());
        }
        let name = self.table_name(rows);
        let info = self.catalog.get(&rows.schema_name, &rows.table_name).cloned();

        if self.hook.is_some() {
            for pair in rows.rows.chunks_exact(2) {
                let before =
                    match values::render_row(rows, &pair[0], info.as_ref(), self.opts.hex_string) {
                        Ok(v) => v,
                        Err(err) => return self.render_failure(&err),
                    };
                let after =
                    match values::render_row(rows, &pair[1], info.as_ref(), self.opts.hex_string) {
                        Ok(v) => v,
                        Err(err) => return self.render_failure(&err),
                    };
                if let Some(hook) = self.hook.as_mut() {
                    hook.update_rewrite(&name, &before, &after)?;
                }
            }
            return Ok(());
        }

        if self.opts.replace {
            // REPLACE rewrite keeps only the surviving image of each pair:
            // the after image going forward, the before image rolling back.
            let keep = if self.mode == Mode::Flashback { 0 } else { 1 };
            let images = rows
                .rows
                .iter()
                .enumerate()
                .filter(move |(i, _)| i % 2 == keep)
                .map(|(_, row)| row);
            return self.emit_inserts(&name, info.as_ref(), rows, images);
        }

        for pair in rows.rows.chunks_exact(2) {
            let before = match values::render_row(rows, &pair[0], info.as_ref(), self.opts.hex_string)
            {
                Ok(v) => v,
                Err(err) => return self.render_failure(&err),
            };
            let after = match values::render_row(rows, &pair[1], info.as_ref(), self.opts.hex_string)
            {
                Ok(v) => v,
                Err(err) => return self.render_failure(&err),
            };
            let (where_img, set_img) = if self.mode == Mode::Flashback {
                (&after, &before)
            } else {
                (&before, &after)
            };
            let set = values::set_clause(info.as_ref(), set_img, &self.opts.ignore_columns);
            let Some((clause, advisory)) = values::row_predicate(info.as_ref(), where_img) else {
                return self.render_failure(&RenderError {
                    table: format!("{}.{}", rows.schema_name, rows.table_name),
                    message: "primary key column missing from schema".to_string(),
                });
            };
            let statement = assemble(&[
                "UPDATE",
                name.as_str(),
                "SET",
                set.as_str(),
                "WHERE",
                clause.as_str(),
                "LIMIT 1",
            ]);
            self.emit(&statement, advisory)?;
        }
        Ok(())
    }
}
