//! End-to-end rebuild checks: decoded events in, SQL text out.
//!
//! Covers forward replay, flashback inversion, REPLACE rewriting,
//! catalog-driven predicates and their placeholder fallback, statement
//! pacing, rewrite hooks, and the statistics report.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use binflash::events::{
    ColumnType, ColumnValue, EventHeader, EventPayload, EventType, LogEvent, QueryEvent,
    RowsEvent, XidEvent,
};
use binflash::hooks::ScriptHook;
use binflash::rebuild::{Mode, RebuildEngine, RebuildOptions};
use binflash::schema::{ColumnInfo, SchemaCatalog, TableInfo};

fn header(event_type: EventType, log_pos: u32) -> EventHeader {
    EventHeader {
        timestamp: 1_700_000_000,
        event_type,
        server_id: 1,
        event_size: 120,
        log_pos,
        flags: 0,
    }
}

fn rows(kind: EventType, images: Vec<Vec<ColumnValue>>) -> LogEvent {
    let event = RowsEvent {
        table_id: 108,
        schema_name: "db".to_string(),
        table_name: "t".to_string(),
        column_types: vec![ColumnType::Long, ColumnType::Varchar],
        rows: images,
        flags: 1,
    };
    let payload = match kind {
        EventType::WriteRowsV2 => EventPayload::WriteRows(event),
        EventType::UpdateRowsV2 => EventPayload::UpdateRows(event),
        _ => EventPayload::DeleteRows(event),
    };
    LogEvent {
        header: header(kind, 500),
        payload,
    }
}

fn row(id: i64, name: &str) -> Vec<ColumnValue> {
    vec![
        ColumnValue::SignedInt(id),
        ColumnValue::String(name.as_bytes().to_vec()),
    ]
}

fn query(log_pos: u32, execution_time: u32, sql: &str) -> LogEvent {
    LogEvent {
        header: header(EventType::Query, log_pos),
        payload: EventPayload::Query(QueryEvent {
            thread_id: 7,
            execution_time,
            error_code: 0,
            schema: "db".to_string(),
            query: sql.to_string(),
        }),
    }
}

fn xid(log_pos: u32) -> LogEvent {
    LogEvent {
        header: header(EventType::Xid, log_pos),
        payload: EventPayload::Xid(XidEvent { xid: 42 }),
    }
}

fn table_info(primary_keys: &[&str]) -> TableInfo {
    TableInfo {
        columns: vec![
            ColumnInfo {
                name: "id".to_string(),
                unsigned: false,
            },
            ColumnInfo {
                name: "name".to_string(),
                unsigned: false,
            },
        ],
        primary_keys: primary_keys.iter().map(|k| k.to_string()).collect(),
    }
}

fn catalog() -> SchemaCatalog {
    let mut catalog = SchemaCatalog::default();
    catalog.insert("db", "t", table_info(&["id"]));
    catalog
}

fn keyless_catalog() -> SchemaCatalog {
    let mut catalog = SchemaCatalog::default();
    catalog.insert("db", "t", table_info(&[]));
    catalog
}

/// Run every event through a fresh engine and collect the output text.
fn rebuild(mode: Mode, opts: RebuildOptions, catalog: SchemaCatalog, events: &[LogEvent]) -> String {
    let mut out = Vec::new();
    let mut engine = RebuildEngine::new(mode, opts, catalog, &mut out);
    for event in events {
        engine.dispatch(event).unwrap();
    }
    engine.finish().unwrap();
    String::from_utf8(out).unwrap()
}

#[test]
fn insert_replays_forward_and_deletes_backward() {
    let event = rows(EventType::WriteRowsV2, vec![row(1, "a")]);
    assert_eq!(
        rebuild(Mode::Sql, RebuildOptions::default(), catalog(), &[event.clone()]),
        "INSERT INTO `db`.`t` VALUES (1, \"a\");\n"
    );
    assert_eq!(
        rebuild(Mode::Flashback, RebuildOptions::default(), catalog(), &[event]),
        "DELETE FROM `db`.`t` WHERE `id` = 1 LIMIT 1;\n"
    );
}

#[test]
fn delete_replays_forward_and_reinserts_backward() {
    let event = rows(EventType::DeleteRowsV2, vec![row(1, "a")]);
    assert_eq!(
        rebuild(Mode::Sql, RebuildOptions::default(), catalog(), &[event.clone()]),
        "DELETE FROM `db`.`t` WHERE `id` = 1 LIMIT 1;\n"
    );
    assert_eq!(
        rebuild(Mode::Flashback, RebuildOptions::default(), catalog(), &[event]),
        "INSERT INTO `db`.`t` VALUES (1, \"a\");\n"
    );
}

#[test]
fn update_pairs_before_and_after_images() {
    let event = rows(EventType::UpdateRowsV2, vec![row(1, "old"), row(1, "new")]);
    assert_eq!(
        rebuild(Mode::Sql, RebuildOptions::default(), catalog(), &[event.clone()]),
        "UPDATE `db`.`t` SET `id` = 1, `name` = \"new\" WHERE `id` = 1 LIMIT 1;\n"
    );
    assert_eq!(
        rebuild(Mode::Flashback, RebuildOptions::default(), catalog(), &[event]),
        "UPDATE `db`.`t` SET `id` = 1, `name` = \"old\" WHERE `id` = 1 LIMIT 1;\n"
    );
}

#[test]
fn trailing_unpaired_update_image_is_dropped() {
    let event = rows(
        EventType::UpdateRowsV2,
        vec![row(1, "a"), row(1, "b"), row(2, "x")],
    );
    let text = rebuild(Mode::Sql, RebuildOptions::default(), catalog(), &[event]);
    assert_eq!(text.lines().count(), 1, "{text}");
    assert!(text.contains("\"b\""), "{text}");
}

#[test]
fn replace_mode_collapses_updates() {
    let opts = RebuildOptions {
        replace: true,
        ..RebuildOptions::default()
    };
    let insert = rows(EventType::WriteRowsV2, vec![row(1, "a")]);
    assert_eq!(
        rebuild(Mode::Sql, opts.clone(), catalog(), &[insert]),
        "REPLACE INTO `db`.`t` VALUES (1, \"a\");\n"
    );

    let update = rows(EventType::UpdateRowsV2, vec![row(1, "old"), row(1, "new")]);
    assert_eq!(
        rebuild(Mode::Sql, opts.clone(), catalog(), &[update.clone()]),
        "REPLACE INTO `db`.`t` VALUES (1, \"new\");\n"
    );
    // Rolling back restores the before image instead.
    assert_eq!(
        rebuild(Mode::Flashback, opts, catalog(), &[update]),
        "REPLACE INTO `db`.`t` VALUES (1, \"old\");\n"
    );
}

#[test]
fn complete_insert_names_columns() {
    let event = rows(EventType::WriteRowsV2, vec![row(1, "a")]);
    let opts = RebuildOptions {
        complete_insert: true,
        ..RebuildOptions::default()
    };
    assert_eq!(
        rebuild(Mode::Sql, opts, catalog(), &[event.clone()]),
        "INSERT INTO `db`.`t` (`id`, `name`) VALUES (1, \"a\");\n"
    );

    let opts = RebuildOptions {
        complete_insert: true,
        ignore_columns: vec!["name".to_string()],
        ..RebuildOptions::default()
    };
    assert_eq!(
        rebuild(Mode::Sql, opts, catalog(), &[event]),
        "INSERT INTO `db`.`t` (`id`) VALUES (1);\n"
    );
}

#[test]
fn ignored_columns_leave_the_set_clause() {
    let event = rows(EventType::UpdateRowsV2, vec![row(1, "old"), row(1, "new")]);
    let opts = RebuildOptions {
        ignore_columns: vec!["name".to_string()],
        ..RebuildOptions::default()
    };
    assert_eq!(
        rebuild(Mode::Sql, opts, catalog(), &[event]),
        "UPDATE `db`.`t` SET `id` = 1 WHERE `id` = 1 LIMIT 1;\n"
    );
}

#[test]
fn missing_catalog_degrades_to_placeholders() {
    let none = SchemaCatalog::default();
    // INSERT needs no column names, so it stays live.
    assert_eq!(
        rebuild(
            Mode::Sql,
            RebuildOptions::default(),
            none.clone(),
            &[rows(EventType::WriteRowsV2, vec![row(7, "x")])],
        ),
        "INSERT INTO `db`.`t` VALUES (7, \"x\");\n"
    );
    // Predicates cannot be trusted without names: advisory comments.
    assert_eq!(
        rebuild(
            Mode::Sql,
            RebuildOptions::default(),
            none.clone(),
            &[rows(EventType::DeleteRowsV2, vec![row(7, "x")])],
        ),
        "-- DELETE FROM `db`.`t` WHERE @0 = 7 AND @1 = \"x\" LIMIT 1;\n"
    );
    assert_eq!(
        rebuild(
            Mode::Sql,
            RebuildOptions::default(),
            none,
            &[rows(EventType::UpdateRowsV2, vec![row(1, "old"), row(1, "new")])],
        ),
        "-- UPDATE `db`.`t` SET @0 = 1, @1 = \"new\" WHERE @0 = 1 AND @1 = \"old\" LIMIT 1;\n"
    );
}

#[test]
fn keyless_table_matches_the_full_row_as_advisory() {
    let event = rows(
        EventType::DeleteRowsV2,
        vec![vec![ColumnValue::SignedInt(1), ColumnValue::Null]],
    );
    assert_eq!(
        rebuild(Mode::Sql, RebuildOptions::default(), keyless_catalog(), &[event]),
        "-- DELETE FROM `db`.`t` WHERE `id` = 1 AND `name` IS NULL LIMIT 1;\n"
    );
}

#[test]
fn without_db_name_strips_qualifiers() {
    let opts = RebuildOptions {
        without_db_name: true,
        ..RebuildOptions::default()
    };
    assert_eq!(
        rebuild(
            Mode::Sql,
            opts.clone(),
            catalog(),
            &[rows(EventType::WriteRowsV2, vec![row(1, "a")])],
        ),
        "INSERT INTO `t` VALUES (1, \"a\");\n"
    );
    assert_eq!(
        rebuild(
            Mode::Flashback,
            opts,
            catalog(),
            &[query(300, 0, "CREATE TABLE t1 (id INT)")],
        ),
        "DROP TABLE IF EXISTS `t1`;\n"
    );
}

#[test]
fn hex_string_mode_renders_hex_literals() {
    let opts = RebuildOptions {
        hex_string: true,
        ..RebuildOptions::default()
    };
    assert_eq!(
        rebuild(
            Mode::Sql,
            opts,
            catalog(),
            &[rows(EventType::WriteRowsV2, vec![row(1, "a")])],
        ),
        "INSERT INTO `db`.`t` VALUES (1, X'61');\n"
    );
}

#[test]
fn queries_replay_forward_without_begin_markers() {
    let events = vec![
        query(100, 0, "BEGIN"),
        query(200, 0, "DROP TABLE t1"),
        query(300, 0, "COMMIT"),
    ];
    assert_eq!(
        rebuild(Mode::Sql, RebuildOptions::default(), catalog(), &events),
        "DROP TABLE t1;\nCOMMIT;\n"
    );
}

#[test]
fn flashback_inverts_ddl() {
    let events = vec![
        query(100, 0, "CREATE TABLE t1 (id INT)"),
        query(200, 0, "CREATE DATABASE shop"),
        query(300, 0, "CREATE UNIQUE INDEX idx_a ON t1 (a)"),
        query(400, 0, "CREATE VIEW v AS SELECT id FROM t1"),
        // No structural inverse exists; the statement is skipped.
        query(500, 0, "GRANT SELECT ON db.* TO 'reader'"),
    ];
    assert_eq!(
        rebuild(Mode::Flashback, RebuildOptions::default(), catalog(), &events),
        "DROP TABLE IF EXISTS `db`.`t1`;\n\
         DROP DATABASE IF EXISTS `shop`;\n\
         DROP INDEX `idx_a` ON `db`.`t1`;\n\
         DROP VIEW IF EXISTS `db`.`v`;\n"
    );
}

#[test]
fn sleep_interval_paces_statements_but_not_commit() {
    let opts = RebuildOptions {
        sleep_interval: Duration::from_millis(500),
        ..RebuildOptions::default()
    };
    let events = vec![
        rows(EventType::WriteRowsV2, vec![row(1, "a")]),
        query(200, 0, "DROP TABLE t1"),
        query(300, 0, "COMMIT"),
    ];
    assert_eq!(
        rebuild(Mode::Sql, opts, catalog(), &events),
        "INSERT INTO `db`.`t` VALUES (1, \"a\");\n\
         SELECT sleep(0.500000);\n\
         DROP TABLE t1;\n\
         SELECT sleep(0.500000);\n\
         COMMIT;\n"
    );
}

struct RecordingHook {
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptHook for RecordingHook {
    fn init(&mut self) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push("init".to_string());
        Ok(())
    }

    fn insert_rewrite(&mut self, table: &str, values: &[String]) -> anyhow::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("insert {table} [{}]", values.join(", ")));
        Ok(())
    }

    fn update_rewrite(
        &mut self,
        table: &str,
        where_values: &[String],
        set_values: &[String],
    ) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(format!(
            "update {table} where=[{}] set=[{}]",
            where_values.join(", "),
            set_values.join(", ")
        ));
        Ok(())
    }

    fn delete_rewrite(&mut self, table: &str, values: &[String]) -> anyhow::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("delete {table} [{}]", values.join(", ")));
        Ok(())
    }

    fn query_rewrite(&mut self, text: &str) -> anyhow::Result<String> {
        self.calls.lock().unwrap().push(format!("query {text}"));
        Ok(format!("{text} /* audited */"))
    }

    fn finalize(&mut self) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push("finalize".to_string());
        Ok(())
    }
}

#[test]
fn hook_takes_over_statement_generation() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut out = Vec::new();
    let mut engine =
        RebuildEngine::new(Mode::Sql, RebuildOptions::default(), catalog(), &mut out)
            .with_hook(Box::new(RecordingHook {
                calls: Arc::clone(&calls),
            }))
            .unwrap();

    engine
        .dispatch(&rows(EventType::WriteRowsV2, vec![row(1, "a")]))
        .unwrap();
    engine
        .dispatch(&rows(EventType::UpdateRowsV2, vec![row(1, "a"), row(1, "b")]))
        .unwrap();
    engine
        .dispatch(&rows(EventType::DeleteRowsV2, vec![row(2, "z")]))
        .unwrap();
    engine.dispatch(&query(300, 0, "DROP TABLE t1")).unwrap();
    engine.finish().unwrap();

    // Row events produce no direct SQL; the query passes through rewritten.
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "DROP TABLE t1 /* audited */\n"
    );
    assert_eq!(
        calls.lock().unwrap().join("\n"),
        "init\n\
         insert `db`.`t` [1, \"a\"]\n\
         update `db`.`t` where=[1, \"a\"] set=[1, \"b\"]\n\
         delete `db`.`t` [2, \"z\"]\n\
         query DROP TABLE t1\n\
         finalize"
    );
}

#[test]
fn stat_report_counts_tables_rows_and_transactions() {
    let events = vec![
        query(100, 3, "BEGIN"),
        rows(EventType::WriteRowsV2, vec![row(1, "a"), row(2, "b")]),
        rows(EventType::UpdateRowsV2, vec![row(1, "a"), row(1, "b")]),
        rows(EventType::DeleteRowsV2, vec![row(2, "b")]),
        query(170, 0, "DROP TABLE old_t"),
        xid(180),
    ];
    let text = rebuild(Mode::Stat, RebuildOptions::default(), catalog(), &events);
    assert!(!text.contains("INSERT INTO"), "{text}");

    let report: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(report["TableStats"]["db.t"]["insert"], 1);
    assert_eq!(report["TableStats"]["db.t"]["update"], 1);
    assert_eq!(report["TableStats"]["db.t"]["delete"], 1);
    // Two inserted rows, one update pair, one deleted row.
    assert_eq!(report["RowsStats"]["db.t"], 4);
    assert_eq!(report["QueryStats"]["begin"], 1);
    assert_eq!(report["QueryStats"]["drop"], 1);
    assert_eq!(report["TransactionStats"]["SizeBytes"]["Max"], "80.0");
    assert_eq!(report["TransactionStats"]["TimeSeconds"]["Max"], "3.00");
    assert_eq!(
        report["TransactionStats"]["SizeBytes"]["MaxTransactionPos"],
        "--start-position 100 --stop-position 180"
    );
}
