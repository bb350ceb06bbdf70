//! The stateful event filter chain.
//!
//! Predicates run in a fixed order and short-circuit: stop position,
//! start position, thread id, GTID exclude, GTID include, server id,
//! stop datetime, start datetime, table allow, table deny, statement
//! kind. Some predicates carry state between events, since row events
//! inherit decisions made at their transaction's GTID or BEGIN.

use anyhow::Context;
use binlog_events::{EventPayload, LogEvent};
use uuid::Uuid;

/// Inputs to the chain, resolved from configuration.
#[derive(Debug, Default, Clone)]
pub struct FilterOptions {
    pub tables: Vec<String>,
    pub ignore_tables: Vec<String>,
    pub event_types: Vec<String>,
    pub thread_id: Option<u32>,
    pub server_id: Option<u32>,
    pub start_position: Option<u64>,
    pub stop_position: Option<u64>,
    pub start_timestamp: Option<u32>,
    pub stop_timestamp: Option<u32>,
    pub include_gtids: Option<String>,
    pub exclude_gtids: Option<String>,
}

/// Cross-event filter state.
#[derive(Debug, Default, Clone, Copy)]
pub struct FilterState {
    /// Whether the current transaction's GTID was admitted.
    pub follow_gtid: bool,
    /// Whether the current session's thread id was admitted.
    pub follow_thread_id: bool,
    /// Set once an event has crossed a start boundary; later events skip
    /// the start checks, so positions restarting in the next file do not
    /// re-arm them.
    pub started: bool,
    /// Set once a stop boundary has been passed; the run should end.
    pub ending: bool,
}

/// A parsed GTID set: uuid to closed transaction-id intervals.
#[derive(Debug, Clone, PartialEq)]
pub struct GtidSet {
    entries: Vec<(Uuid, Vec<(u64, u64)>)>,
}

impl GtidSet {
    /// Parse "uuid:a-b[:c-d],uuid2:n" form. A bare number is the
    /// single-transaction interval n-n.
    pub fn parse(s: &str) -> anyhow::Result<GtidSet> {
        let mut entries = Vec::new();
        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let mut pieces = part.split(':');
            let uuid_text = pieces.next().unwrap_or_default().trim();
            let uuid: Uuid = uuid_text
                .parse()
                .with_context(|| format!("Invalid GTID source id {uuid_text:?}"))?;

            let mut intervals = Vec::new();
            for piece in pieces {
                let piece = piece.trim();
                let (lo, hi) = match piece.split_once('-') {
                    Some((a, b)) => (
                        a.trim()
                            .parse::<u64>()
                            .with_context(|| format!("Invalid GTID interval {piece:?}"))?,
                        b.trim()
                            .parse::<u64>()
                            .with_context(|| format!("Invalid GTID interval {piece:?}"))?,
                    ),
                    None => {
                        let n = piece
                            .parse::<u64>()
                            .with_context(|| format!("Invalid GTID interval {piece:?}"))?;
                        (n, n)
                    }
                };
                if lo == 0 || hi < lo {
                    anyhow::bail!("Invalid GTID interval {piece:?}");
                }
                intervals.push((lo, hi));
            }
            if intervals.is_empty() {
                anyhow::bail!("GTID entry {part:?} has no intervals");
            }
            entries.push((uuid, intervals));
        }
        if entries.is_empty() {
            anyhow::bail!("Empty GTID set");
        }
        Ok(GtidSet { entries })
    }

    pub fn contains(&self, source_id: &Uuid, sequence: u64) -> bool {
        self.entries.iter().any(|(uuid, intervals)| {
            uuid == source_id
                && intervals
                    .iter()
                    .any(|&(lo, hi)| sequence >= lo && sequence <= hi)
        })
    }
}

/// A GTID predicate resolved once at startup. A set that fails to parse
/// disables the predicate instead of rejecting every transaction.
#[derive(Debug, Clone)]
enum GtidFilter {
    Unset,
    Set(GtidSet),
    Malformed,
}

impl GtidFilter {
    fn resolve(raw: Option<&str>, which: &'static str) -> GtidFilter {
        let Some(raw) = raw else {
            return GtidFilter::Unset;
        };
        if raw.trim().is_empty() {
            return GtidFilter::Unset;
        }
        match GtidSet::parse(raw) {
            Ok(set) => GtidFilter::Set(set),
            Err(error) => {
                tracing::warn!(%error, set = raw, "ignoring malformed {} GTID set", which);
                GtidFilter::Malformed
            }
        }
    }
}

#[derive(Debug)]
pub struct FilterChain {
    options: FilterOptions,
    include: GtidFilter,
    exclude: GtidFilter,
    state: FilterState,
}

impl FilterChain {
    pub fn new(options: FilterOptions) -> anyhow::Result<FilterChain> {
        for pattern in options.tables.iter().chain(options.ignore_tables.iter()) {
            let clean: String = pattern.chars().filter(|&c| c != '`').collect();
            if !clean.contains('.') {
                anyhow::bail!("Table filter {pattern:?} must look like db.table");
            }
        }
        let include = GtidFilter::resolve(options.include_gtids.as_deref(), "include");
        let exclude = GtidFilter::resolve(options.exclude_gtids.as_deref(), "exclude");
        Ok(FilterChain {
            options,
            include,
            exclude,
            state: FilterState::default(),
        })
    }

    pub fn state(&self) -> FilterState {
        self.state
    }

    /// A stop boundary has been passed; reading further is pointless.
    pub fn is_ending(&self) -> bool {
        self.state.ending
    }

    /// Run the whole chain over one event.
    pub fn admit(&mut self, event: &LogEvent) -> bool {
        self.pass_stop_position(event)
            && self.pass_start_position(event)
            && self.pass_thread_id(event)
            && self.pass_exclude_gtids(event)
            && self.pass_include_gtids(event)
            && self.pass_server_id(event)
            && self.pass_stop_datetime(event)
            && self.pass_start_datetime(event)
            && self.pass_table_allow(event)
            && self.pass_table_deny(event)
            && self.pass_event_type(event)
    }

    fn pass_stop_position(&mut self, event: &LogEvent) -> bool {
        let Some(stop) = self.options.stop_position else {
            return true;
        };
        if event.header.log_pos as u64 > stop {
            self.state.ending = true;
            return false;
        }
        true
    }

    fn pass_start_position(&mut self, event: &LogEvent) -> bool {
        let Some(start) = self.options.start_position else {
            return true;
        };
        if self.state.started {
            return true;
        }
        if (event.header.log_pos as u64) < start {
            return false;
        }
        self.state.started = true;
        true
    }

    fn pass_thread_id(&mut self, event: &LogEvent) -> bool {
        let Some(target) = self.options.thread_id else {
            return true;
        };
        if let EventPayload::Query(q) = &event.payload {
            self.state.follow_thread_id = q.thread_id == target;
        }
        self.state.follow_thread_id
    }

    fn pass_exclude_gtids(&mut self, event: &LogEvent) -> bool {
        let GtidFilter::Set(set) = &self.exclude else {
            return true;
        };
        match &event.payload {
            EventPayload::Gtid(g) => {
                let excluded = set.contains(&g.source_id, g.sequence);
                self.state.follow_gtid = !excluded;
                !excluded
            }
            _ => self.state.follow_gtid,
        }
    }

    fn pass_include_gtids(&mut self, event: &LogEvent) -> bool {
        let GtidFilter::Set(set) = &self.include else {
            return true;
        };
        match &event.payload {
            EventPayload::Gtid(g) => {
                let contained = set.contains(&g.source_id, g.sequence);
                // Transactions arrive in order; once membership drops
                // from true to false the included window is behind us.
                if self.state.follow_gtid && !contained {
                    self.state.ending = true;
                }
                self.state.follow_gtid = contained;
                contained
            }
            _ => self.state.follow_gtid,
        }
    }

    fn pass_server_id(&self, event: &LogEvent) -> bool {
        match self.options.server_id {
            Some(target) => event.header.server_id == target,
            None => true,
        }
    }

    fn pass_stop_datetime(&mut self, event: &LogEvent) -> bool {
        let Some(stop) = self.options.stop_timestamp else {
            return true;
        };
        if event.header.timestamp >= stop {
            self.state.ending = true;
            return false;
        }
        true
    }

    fn pass_start_datetime(&mut self, event: &LogEvent) -> bool {
        let Some(start) = self.options.start_timestamp else {
            return true;
        };
        if self.state.started {
            return true;
        }
        if event.header.timestamp < start {
            return false;
        }
        self.state.started = true;
        true
    }

    fn pass_table_allow(&self, event: &LogEvent) -> bool {
        if self.options.tables.is_empty() {
            return true;
        }
        match event_table(event) {
            Some((schema, table)) => self
                .options
                .tables
                .iter()
                .any(|p| pattern_matches(p, schema, table)),
            // No table to match, so nothing on the allow list applies.
            None => false,
        }
    }

    fn pass_table_deny(&self, event: &LogEvent) -> bool {
        if self.options.ignore_tables.is_empty() {
            return true;
        }
        match event_table(event) {
            Some((schema, table)) => !self
                .options
                .ignore_tables
                .iter()
                .any(|p| pattern_matches(p, schema, table)),
            None => true,
        }
    }

    fn pass_event_type(&self, event: &LogEvent) -> bool {
        if self.options.event_types.is_empty() {
            return true;
        }
        let matches = |kind: &str| {
            self.options
                .event_types
                .iter()
                .any(|t| t.eq_ignore_ascii_case(kind))
        };
        match &event.payload {
            EventPayload::WriteRows(_) => matches("insert"),
            EventPayload::UpdateRows(_) => matches("update"),
            EventPayload::DeleteRows(_) => matches("delete"),
            EventPayload::Query(q) => match q.query.split_whitespace().next() {
                Some(keyword) => matches(keyword),
                None => false,
            },
            _ => false,
        }
    }
}

fn event_table(event: &LogEvent) -> Option<(&str, &str)> {
    event
        .rows()
        .map(|rows| (rows.schema_name.as_str(), rows.table_name.as_str()))
}

/// Match one db.tb pattern. The two halves follow different rules, kept
/// from long-standing tool behavior: database prefixes compare
/// case-sensitively but exact database names do not, while table
/// prefixes compare case-insensitively but exact table names do.
fn pattern_matches(pattern: &str, schema: &str, table: &str) -> bool {
    let clean: String = pattern.chars().filter(|&c| c != '`').collect();
    let Some((db_part, tb_part)) = clean.split_once('.') else {
        return false;
    };

    let db_ok = if db_part == "%" {
        true
    } else if let Some(prefix) = db_part.strip_suffix('%') {
        schema.starts_with(prefix)
    } else {
        db_part.eq_ignore_ascii_case(schema)
    };

    let tb_ok = if tb_part == "%" {
        true
    } else if let Some(prefix) = tb_part.strip_suffix('%') {
        table
            .to_ascii_lowercase()
            .starts_with(&prefix.to_ascii_lowercase())
    } else {
        tb_part == table
    };

    db_ok && tb_ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use binlog_events::{
        EventHeader, EventType, GtidEvent, QueryEvent, RowsEvent, XidEvent,
    };

    fn header(event_type: EventType, timestamp: u32, log_pos: u32) -> EventHeader {
        EventHeader {
            timestamp,
            event_type,
            server_id: 1,
            event_size: 100,
            log_pos,
            flags: 0,
        }
    }

    fn query(timestamp: u32, log_pos: u32, thread_id: u32, sql: &str) -> LogEvent {
        LogEvent {
            header: header(EventType::Query, timestamp, log_pos),
            payload: EventPayload::Query(QueryEvent {
                thread_id,
                execution_time: 0,
                error_code: 0,
                schema: "test".to_string(),
                query: sql.to_string(),
            }),
        }
    }

    fn write_rows(schema: &str, table: &str, log_pos: u32) -> LogEvent {
        LogEvent {
            header: header(EventType::WriteRowsV2, 1_000, log_pos),
            payload: EventPayload::WriteRows(RowsEvent {
                table_id: 1,
                schema_name: schema.to_string(),
                table_name: table.to_string(),
                column_types: vec![],
                rows: vec![],
                flags: 0,
            }),
        }
    }

    fn gtid(source_id: &str, sequence: u64, log_pos: u32) -> LogEvent {
        LogEvent {
            header: header(EventType::Gtid, 1_000, log_pos),
            payload: EventPayload::Gtid(GtidEvent {
                flags: 0,
                source_id: source_id.parse().unwrap(),
                sequence,
            }),
        }
    }

    fn xid(log_pos: u32) -> LogEvent {
        LogEvent {
            header: header(EventType::Xid, 1_000, log_pos),
            payload: EventPayload::Xid(XidEvent { xid: 9 }),
        }
    }

    fn chain(options: FilterOptions) -> FilterChain {
        FilterChain::new(options).unwrap()
    }

    const SID: &str = "6eab6287-3513-11ec-b123-0242ac110002";

    #[test]
    fn position_window() {
        let mut chain = chain(FilterOptions {
            start_position: Some(200),
            stop_position: Some(500),
            ..Default::default()
        });
        assert!(!chain.admit(&query(1, 120, 1, "BEGIN")));
        assert!(chain.admit(&query(1, 240, 1, "BEGIN")));
        // Positions restart low in the next file, but we have started.
        assert!(chain.admit(&query(1, 150, 1, "BEGIN")));
        assert!(!chain.admit(&query(1, 600, 1, "BEGIN")));
        assert!(chain.is_ending());
    }

    #[test]
    fn datetime_window_edges() {
        let mut chain = chain(FilterOptions {
            start_timestamp: Some(1_000),
            stop_timestamp: Some(2_000),
            ..Default::default()
        });
        assert!(!chain.admit(&query(999, 10, 1, "BEGIN")));
        assert!(chain.admit(&query(1_000, 20, 1, "BEGIN")));
        // The stop bound itself is already out.
        assert!(!chain.admit(&query(2_000, 30, 1, "BEGIN")));
        assert!(chain.is_ending());
    }

    #[test]
    fn thread_id_follows_session() {
        let mut chain = chain(FilterOptions {
            thread_id: Some(7),
            ..Default::default()
        });
        // Row events before any BEGIN carry no thread id: rejected.
        assert!(!chain.admit(&write_rows("db", "t", 50)));
        assert!(chain.admit(&query(1, 100, 7, "BEGIN")));
        assert!(chain.admit(&write_rows("db", "t", 150)));
        assert!(chain.admit(&xid(200)));
        assert!(!chain.admit(&query(1, 300, 8, "BEGIN")));
        assert!(!chain.admit(&write_rows("db", "t", 350)));
    }

    #[test]
    fn include_gtids_end_after_window() {
        let mut chain = chain(FilterOptions {
            include_gtids: Some(format!("{SID}:2-3")),
            ..Default::default()
        });
        assert!(!chain.admit(&gtid(SID, 1, 100)));
        assert!(!chain.admit(&write_rows("db", "t", 110)));
        assert!(chain.admit(&gtid(SID, 2, 200)));
        assert!(chain.admit(&write_rows("db", "t", 210)));
        assert!(chain.admit(&gtid(SID, 3, 300)));
        assert!(!chain.is_ending());
        // Leaving the included window ends the run.
        assert!(!chain.admit(&gtid(SID, 4, 400)));
        assert!(chain.is_ending());
    }

    #[test]
    fn exclude_gtids_drop_whole_transaction() {
        let mut chain = chain(FilterOptions {
            exclude_gtids: Some(format!("{SID}:5")),
            ..Default::default()
        });
        assert!(chain.admit(&gtid(SID, 4, 100)));
        assert!(chain.admit(&write_rows("db", "t", 110)));
        assert!(!chain.admit(&gtid(SID, 5, 200)));
        assert!(!chain.admit(&write_rows("db", "t", 210)));
        assert!(!chain.admit(&xid(220)));
        assert!(chain.admit(&gtid(SID, 6, 300)));
        assert!(chain.admit(&write_rows("db", "t", 310)));
    }

    #[test]
    fn malformed_gtid_set_admits_everything() {
        let mut chain = chain(FilterOptions {
            include_gtids: Some("not-a-gtid-set".to_string()),
            ..Default::default()
        });
        assert!(chain.admit(&gtid(SID, 1, 100)));
        assert!(chain.admit(&write_rows("db", "t", 110)));

        let mut chain = self::chain(FilterOptions {
            exclude_gtids: Some("also::bad".to_string()),
            ..Default::default()
        });
        assert!(chain.admit(&gtid(SID, 1, 100)));
        assert!(chain.admit(&write_rows("db", "t", 110)));
    }

    #[test]
    fn multi_interval_gtid_sets() {
        let set = GtidSet::parse(&format!("{SID}:1-3:7-9")).unwrap();
        let uuid: Uuid = SID.parse().unwrap();
        assert!(set.contains(&uuid, 2));
        assert!(!set.contains(&uuid, 5));
        assert!(set.contains(&uuid, 7));
        assert!(!set.contains(&Uuid::nil(), 2));
    }

    #[test]
    fn table_allow_rules() {
        let mut chain = chain(FilterOptions {
            tables: vec!["test.t1".to_string()],
            ignore_tables: vec![],
            ..Default::default()
        });
        assert!(chain.admit(&write_rows("test", "t1", 100)));
        // Database names compare case-insensitively, table names do not.
        assert!(chain.admit(&write_rows("TEST", "t1", 110)));
        assert!(!chain.admit(&write_rows("test", "T1", 120)));
        assert!(!chain.admit(&write_rows("test", "t2", 130)));
        // With an allow list, events without a table cannot match it.
        assert!(!chain.admit(&query(1, 140, 1, "BEGIN")));
    }

    #[test]
    fn table_prefix_rules() {
        // Database prefixes are case-sensitive.
        assert!(pattern_matches("prod%.t", "prod01", "t"));
        assert!(!pattern_matches("prod%.t", "PROD01", "t"));
        // Table prefixes are case-insensitive.
        assert!(pattern_matches("db.log%", "db", "LOG_2024"));
        assert!(pattern_matches("%.%", "anything", "at_all"));
        assert!(pattern_matches("`db`.`t`", "db", "t"));
    }

    #[test]
    fn table_deny_lets_other_events_through() {
        let mut chain = chain(FilterOptions {
            ignore_tables: vec!["mysql.%".to_string()],
            ..Default::default()
        });
        assert!(!chain.admit(&write_rows("mysql", "user", 100)));
        assert!(chain.admit(&write_rows("app", "user", 110)));
        assert!(chain.admit(&query(1, 120, 1, "BEGIN")));
        assert!(chain.admit(&xid(130)));
    }

    #[test]
    fn event_type_filter() {
        let mut chain = chain(FilterOptions {
            event_types: vec!["insert".to_string(), "alter".to_string()],
            ..Default::default()
        });
        assert!(chain.admit(&write_rows("db", "t", 100)));
        assert!(chain.admit(&query(1, 110, 1, "ALTER TABLE t ADD c INT")));
        assert!(chain.admit(&query(1, 115, 1, "alter table t drop c")));
        assert!(!chain.admit(&query(1, 120, 1, "BEGIN")));
        assert!(!chain.admit(&xid(130)));

        let mut chain = self::chain(FilterOptions {
            event_types: vec!["delete".to_string()],
            ..Default::default()
        });
        assert!(!chain.admit(&write_rows("db", "t", 100)));
    }

    #[test]
    fn patterns_must_be_qualified() {
        let err = FilterChain::new(FilterOptions {
            tables: vec!["unqualified".to_string()],
            ..Default::default()
        })
        .unwrap_err();
        assert!(err.to_string().contains("db.table"));
    }
}
