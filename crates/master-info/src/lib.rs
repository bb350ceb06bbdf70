//! Replication position bookkeeping, persisted as a YAML master info file.
//!
//! When tailing a live server the current file and position must survive
//! restarts, so the stream can resume where it stopped instead of
//! replaying from the start. The file uses the familiar master info
//! field names and is safe to inspect or edit by hand.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Replica server ids are drawn from this range when the info file does
/// not fix one, to stay clear of common hand-assigned ids.
const SERVER_ID_RANGE: std::ops::Range<u32> = 3306..6612;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterInfo {
    pub master_host: String,
    pub master_user: String,
    pub master_password: String,
    pub master_port: u16,
    pub master_log_file: String,
    pub master_log_pos: u64,
    pub executed_gtid_set: String,
    pub auto_position: bool,
    pub seconds_behind_master: u64,
    #[serde(rename = "server-id")]
    pub server_id: u32,
    #[serde(rename = "server-type")]
    pub server_type: String,

    #[serde(skip)]
    path: PathBuf,
    #[serde(skip)]
    dirty: bool,
}

impl Default for MasterInfo {
    fn default() -> MasterInfo {
        MasterInfo {
            master_host: String::new(),
            master_user: String::new(),
            master_password: String::new(),
            master_port: 3306,
            master_log_file: String::new(),
            master_log_pos: 4,
            executed_gtid_set: String::new(),
            auto_position: false,
            seconds_behind_master: 0,
            server_id: 0,
            server_type: "mysql".to_string(),
            path: PathBuf::new(),
            dirty: false,
        }
    }
}

impl MasterInfo {
    /// Load the info file, or start fresh if it does not exist yet. A
    /// zero server id is replaced with a random one so two replicas never
    /// collide by default.
    pub fn load(path: &Path) -> anyhow::Result<MasterInfo> {
        let mut info = if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("Failed to read master info file {}", path.display()))?;
            serde_yaml::from_str::<MasterInfo>(&raw)
                .with_context(|| format!("Failed to parse master info file {}", path.display()))?
        } else {
            MasterInfo::default()
        };
        info.path = path.to_path_buf();
        if info.server_id == 0 {
            info.server_id = rand::rng().random_range(SERVER_ID_RANGE);
            info.dirty = true;
        }
        Ok(info)
    }

    /// Write the current state back to disk.
    pub fn flush(&mut self) -> anyhow::Result<()> {
        let raw = serde_yaml::to_string(self).context("Failed to serialize master info")?;
        fs::write(&self.path, raw)
            .with_context(|| format!("Failed to write master info file {}", self.path.display()))?;
        self.dirty = false;
        tracing::debug!(
            file = %self.master_log_file,
            position = self.master_log_pos,
            "flushed master info"
        );
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn position(&self) -> (&str, u64) {
        (&self.master_log_file, self.master_log_pos)
    }

    /// A rotate event moves the stream to a new file, whose first event
    /// sits right after the magic.
    pub fn record_rotate(&mut self, next_file: &str, position: u64) {
        if self.master_log_file != next_file {
            self.master_log_file = next_file.to_string();
            self.master_log_pos = position.max(4);
            self.dirty = true;
        }
    }

    pub fn record_position(&mut self, position: u64) {
        if position > 0 && position != self.master_log_pos {
            self.master_log_pos = position;
            self.dirty = true;
        }
    }

    /// Remember the most recent transaction id seen on the stream. This
    /// is the last id, not a merged set.
    pub fn record_gtid(&mut self, gtid: String) {
        if self.executed_gtid_set != gtid {
            self.executed_gtid_set = gtid;
            self.dirty = true;
        }
    }

    /// Update replication lag from an event timestamp.
    pub fn observe_lag(&mut self, event_timestamp: u32) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let lag = now.saturating_sub(event_timestamp as u64);
        if lag != self.seconds_behind_master {
            self.seconds_behind_master = lag;
            self.dirty = true;
        }
    }
}
