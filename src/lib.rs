//! binflash library
//!
//! Parses MySQL binlog files (plain or keyring-encrypted), filters the
//! event stream, and rebuilds the surviving changes as forward SQL,
//! flashback SQL or transaction statistics.
//!
//! # CLI Usage
//!
//! ```bash
//! # Replay a binlog as forward SQL
//! binflash --plugin sql mysql-bin.000002
//!
//! # Roll back one table's changes inside a time window
//! binflash --plugin flashback \
//!   --start-datetime "2024-01-02 10:00:00" \
//!   --stop-datetime "2024-01-02 10:05:00" \
//!   -t shop.orders mysql-bin.000002
//!
//! # Transaction statistics across files
//! binflash --plugin stat mysql-bin.000001 mysql-bin.000002
//!
//! # Which files cover the window?
//! binflash --plugin find --start-datetime "2024-01-02 10:00:00" mysql-bin.0000*
//!
//! # Strip keyring encryption from a binlog
//! binflash --plugin decrypt --keyring /var/lib/mysql-keyring/keyring \
//!   mysql-bin.000005 > mysql-bin.000005.plain
//! ```
//!
//! # Library Usage
//!
//! The same pieces compose directly: [`pipeline::EventFramer`] pulls
//! decoded events from any reader, [`filter::FilterChain`] decides which
//! survive, and [`rebuild::RebuildEngine`] renders them. Embedders with a
//! replication client drive [`pipeline::run_stream`] instead of files.

pub mod config;
pub mod filter;
pub mod hooks;
pub mod pipeline;
pub mod rebuild;
pub mod schema;
pub mod sqlparse;

pub use binlog_events as events;
pub use binlog_keyring as keyring;
pub use master_info::MasterInfo;
