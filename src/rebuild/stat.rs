//! Per-table counters and transaction size/duration samples.

use std::collections::BTreeMap;

use serde::Serialize;

/// Aggregates per-table operation counters, per-keyword statement
/// counters and transaction samples. Counters are only fed in
/// statistics mode; transaction windows are sampled in every mode.
#[derive(Debug, Default)]
pub struct Statistics {
    table_stats: BTreeMap<String, BTreeMap<String, u64>>,
    rows_stats: BTreeMap<String, u64>,
    query_stats: BTreeMap<String, u64>,
    time_samples: Vec<f64>,
    size_samples: Vec<f64>,
    open: Option<Window>,
    max_time: Option<Extreme>,
    max_size: Option<Extreme>,
}

/// An open transaction, waiting for its commit.
#[derive(Debug, Clone, Copy)]
struct Window {
    start_pos: u64,
    started_at: u32,
    max_exec: u32,
}

/// A running maximum and the transaction window that produced it.
#[derive(Debug, Clone, Copy)]
struct Extreme {
    value: f64,
    start_pos: u64,
    end_pos: u64,
}

impl Statistics {
    /// A BEGIN marker opens a transaction window at its log position.
    pub fn observe_begin(&mut self, pos: u64, timestamp: u32) {
        self.open = Some(Window {
            start_pos: pos,
            started_at: timestamp,
            max_exec: 0,
        });
    }

    /// Track the slowest statement execution inside the open window.
    pub fn observe_query_time(&mut self, execution_time: u32) {
        if let Some(window) = self.open.as_mut() {
            window.max_exec = window.max_exec.max(execution_time);
        }
    }

    /// A commit closes the window: sample its byte span and duration.
    /// Commits with no matching BEGIN are ignored.
    pub fn observe_commit(&mut self, commit_pos: u64) {
        let Some(window) = self.open.take() else {
            return;
        };
        let size = commit_pos.saturating_sub(window.start_pos) as f64;
        let time = f64::from(window.max_exec);
        self.size_samples.push(size);
        self.time_samples.push(time);
        update_extreme(&mut self.max_size, size, window.start_pos, commit_pos);
        update_extreme(&mut self.max_time, time, window.start_pos, commit_pos);
        tracing::debug!(
            start = window.start_pos,
            end = commit_pos,
            started_at = window.started_at,
            seconds = window.max_exec,
            "transaction closed"
        );
    }

    pub fn tally_rows(&mut self, schema: &str, table: &str, op: &str, rows: usize) {
        let key = format!("{schema}.{table}");
        *self
            .table_stats
            .entry(key.clone())
            .or_default()
            .entry(op.to_string())
            .or_default() += 1;
        *self.rows_stats.entry(key).or_default() += rows as u64;
    }

    pub fn tally_query(&mut self, keyword: &str) {
        *self.query_stats.entry(keyword.to_string()).or_default() += 1;
    }

    /// Render the full report as pretty-printed JSON.
    pub fn report(&self) -> anyhow::Result<String> {
        #[derive(Serialize)]
        #[serde(rename_all = "PascalCase")]
        struct Report<'a> {
            table_stats: &'a BTreeMap<String, BTreeMap<String, u64>>,
            rows_stats: &'a BTreeMap<String, u64>,
            query_stats: &'a BTreeMap<String, u64>,
            transaction_stats: TransactionStats,
        }
        #[derive(Serialize)]
        #[serde(rename_all = "PascalCase")]
        struct TransactionStats {
            time_seconds: SampleSummary,
            size_bytes: SampleSummary,
        }
        #[derive(Serialize)]
        #[serde(rename_all = "PascalCase")]
        struct SampleSummary {
            median: String,
            max: String,
            mean: String,
            p95: String,
            p99: String,
            max_transaction_pos: String,
        }

        fn summarize(samples: &[f64], extreme: &Option<Extreme>, decimals: usize) -> SampleSummary {
            let mut sorted = samples.to_vec();
            sorted.sort_by(f64::total_cmp);
            let (start, end) = extreme
                .map(|e| (e.start_pos, e.end_pos))
                .unwrap_or((0, 0));
            SampleSummary {
                median: format!("{:.decimals$}", median(&sorted)),
                max: format!("{:.decimals$}", sorted.last().copied().unwrap_or(0.0)),
                mean: format!("{:.decimals$}", mean(&sorted)),
                p95: format!("{:.decimals$}", percentile(&sorted, 95.0)),
                p99: format!("{:.decimals$}", percentile(&sorted, 99.0)),
                max_transaction_pos: format!("--start-position {start} --stop-position {end}"),
            }
        }

        let report = Report {
            table_stats: &self.table_stats,
            rows_stats: &self.rows_stats,
            query_stats: &self.query_stats,
            transaction_stats: TransactionStats {
                time_seconds: summarize(&self.time_samples, &self.max_time, 2),
                size_bytes: summarize(&self.size_samples, &self.max_size, 1),
            },
        };
        Ok(serde_json::to_string_pretty(&report)?)
    }
}

fn update_extreme(slot: &mut Option<Extreme>, value: f64, start_pos: u64, end_pos: u64) {
    let bigger = slot.map(|e| value > e.value).unwrap_or(true);
    if bigger {
        *slot = Some(Extreme {
            value,
            start_pos,
            end_pos,
        });
    }
}

fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Median of an already-sorted sample set; an even count averages the
/// middle pair.
fn median(sorted: &[f64]) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Nearest-rank percentile (ceiling rank) on a sorted sample set.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
