//! The event pipeline: read, decrypt, frame, filter, rebuild.
//!
//! File processing is fully synchronous. The only async entry point is
//! [`run_stream`], which drives the same filter and rebuild path from a
//! live replication source and keeps the master-info file current.

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::Mutex;

use binlog_events::{
    classify_magic, BinlogDecoder, ContainerKind, EventError, EventHeader, EventPayload, LogEvent,
    BINLOG_MAGIC, EVENT_HEADER_LEN, FILE_HEADER_LEN,
};
use binlog_keyring::{
    find_key, load_keyring, parse_encrypted_header, CipherStream, EncryptionContext,
    ENCRYPT_HEADER_LEN,
};
use master_info::MasterInfo;

use crate::filter::{FilterChain, FilterOptions};
use crate::rebuild::RebuildEngine;

/// Live-stream knobs, resolved from configuration.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Where replication position bookkeeping is persisted.
    pub master_info: std::path::PathBuf,
    /// How often the master-info file is flushed; zero flushes on every
    /// update instead.
    pub sync_interval: std::time::Duration,
    /// How long to wait for the next event before concluding the stream
    /// is drained. Ignored in daemon mode.
    pub read_timeout: std::time::Duration,
    /// Consecutive source failures tolerated before giving up.
    pub retry_count: u32,
    /// Block indefinitely for new events instead of timing out.
    pub daemon: bool,
}

/// A live replication feed. Implementations own connection management
/// and reconnection; the pipeline only pulls decoded events.
#[async_trait::async_trait]
pub trait ReplicationSource: Send {
    /// The next decoded event, or `None` when the feed is finished.
    async fn next_event(&mut self) -> anyhow::Result<Option<LogEvent>>;
}

/// Pulls events out of one byte source, decrypting in-stream when the
/// container is encrypted.
pub struct EventFramer<R: Read> {
    reader: R,
    cipher: Option<CipherStream>,
    decoder: BinlogDecoder,
}

impl<R: Read> EventFramer<R> {
    /// The reader must be positioned at the first event byte, past the
    /// magic (plain) or the whole encrypted header region.
    pub fn new(reader: R, cipher: Option<CipherStream>) -> EventFramer<R> {
        EventFramer {
            reader,
            cipher,
            decoder: BinlogDecoder::default(),
        }
    }

    /// The next decoded event, or `Ok(None)` at a clean end of stream.
    pub fn next_event(&mut self) -> Result<Option<LogEvent>, EventError> {
        let mut head = [0u8; EVENT_HEADER_LEN];
        let got = read_full(&mut self.reader, &mut head)?;
        if got == 0 {
            return Ok(None);
        }
        if got < head.len() {
            return Err(EventError::TruncatedEvent {
                expected: head.len(),
                got,
            });
        }
        if let Some(cipher) = self.cipher.as_mut() {
            cipher.decrypt(&mut head);
        }
        let header = EventHeader::parse(&head)?;

        let mut body = vec![0u8; header.event_size as usize - EVENT_HEADER_LEN];
        let got = read_full(&mut self.reader, &mut body)?;
        if got < body.len() {
            return Err(EventError::TruncatedEvent {
                expected: body.len(),
                got,
            });
        }
        if let Some(cipher) = self.cipher.as_mut() {
            cipher.decrypt(&mut body);
        }
        Ok(Some(self.decoder.decode(header, &body)?))
    }
}

/// Read until the buffer is full or the source ends; the return count
/// is only short at end of stream.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Classify the container magic and, for encrypted files, set up the
/// stream cipher: parse the 512-byte header, find the wrapping key in
/// the keyring, derive the stream key, and check the decrypted magic.
/// Leaves the reader at the first event byte.
pub fn open_container<R: Read>(
    reader: &mut R,
    keyring: Option<&Path>,
) -> anyhow::Result<Option<CipherStream>> {
    let mut magic = [0u8; FILE_HEADER_LEN];
    reader
        .read_exact(&mut magic)
        .context("Failed to read the binlog magic")?;
    match classify_magic(&magic)? {
        ContainerKind::Plain => Ok(None),
        ContainerKind::Encrypted => {
            let Some(keyring) = keyring else {
                anyhow::bail!("encrypted binlog requires --keyring");
            };
            let mut header = vec![0u8; ENCRYPT_HEADER_LEN];
            header[..magic.len()].copy_from_slice(&magic);
            reader
                .read_exact(&mut header[magic.len()..])
                .context("Failed to read the encrypted file header")?;
            let header = parse_encrypted_header(&header)?;

            let keys = load_keyring(keyring)
                .with_context(|| format!("Failed to load keyring {}", keyring.display()))?;
            let key = find_key(&keys, &header.key_id)?;
            let context = EncryptionContext::derive(&header, key)?;
            let mut cipher = context.stream();

            let mut inner_magic = [0u8; FILE_HEADER_LEN];
            reader
                .read_exact(&mut inner_magic)
                .context("Failed to read the decrypted magic")?;
            cipher.decrypt(&mut inner_magic);
            if inner_magic != BINLOG_MAGIC {
                anyhow::bail!(
                    "decrypted bytes do not start with the binlog magic, the keyring key does not match this file"
                );
            }
            Ok(Some(cipher))
        }
    }
}

/// Run the filter and rebuild loop over a list of binlog files, oldest
/// first. `-` reads a plain container from stdin. Stops early when a
/// stop filter ends the pipeline.
pub fn run_files<W: Write>(
    files: &[String],
    keyring: Option<&Path>,
    filter: &mut FilterChain,
    engine: &mut RebuildEngine<W>,
) -> anyhow::Result<()> {
    for file in files {
        if filter.is_ending() {
            break;
        }
        tracing::info!(file = %file, "processing binlog");
        let reader: Box<dyn Read> = if file == "-" {
            Box::new(io::stdin().lock())
        } else {
            Box::new(File::open(file).with_context(|| format!("Failed to open {file}"))?)
        };
        let mut reader = BufReader::new(reader);
        let cipher = open_container(&mut reader, keyring)
            .with_context(|| format!("Failed to open container {file}"))?;
        let mut framer = EventFramer::new(reader, cipher);
        while let Some(event) = framer
            .next_event()
            .with_context(|| format!("Failed to decode {file}"))?
        {
            if filter.admit(&event) {
                engine.dispatch(&event)?;
            }
            if filter.is_ending() {
                break;
            }
        }
    }
    Ok(())
}

/// Narrow a sorted file list by each file's first event timestamp.
///
/// Keeps every file whose first event falls inside the datetime window
/// plus the file just before the first kept one, since the window may
/// open mid-file. Runs only with two or more real files and at least
/// one datetime bound; stdin cannot be probed.
pub fn time_prefilter(
    files: &[String],
    options: &FilterOptions,
    keyring: Option<&Path>,
) -> anyhow::Result<Vec<String>> {
    if files.len() < 2
        || (options.start_timestamp.is_none() && options.stop_timestamp.is_none())
        || files.iter().any(|f| f == "-")
    {
        return Ok(files.to_vec());
    }
    let mut sorted = files.to_vec();
    sorted.sort();

    let mut kept: Vec<String> = Vec::new();
    let mut previous: Option<String> = None;
    for file in &sorted {
        let first = first_event_timestamp(file, keyring)
            .with_context(|| format!("Failed to probe {file}"))?;
        let Some(first) = first else {
            previous = Some(file.clone());
            continue;
        };
        if let Some(stop) = options.stop_timestamp {
            if first >= stop {
                // The window closed before this file began; anything
                // left of it lives in the predecessor.
                if kept.is_empty() {
                    kept.extend(previous.take());
                }
                break;
            }
        }
        let after_start = options.start_timestamp.map(|s| first >= s).unwrap_or(true);
        if after_start {
            if kept.is_empty() {
                kept.extend(previous.take());
            }
            kept.push(file.clone());
        } else {
            previous = Some(file.clone());
        }
    }
    if kept.is_empty() {
        // Every probed file starts before the window; it can only open
        // inside the newest one.
        kept.extend(previous);
    }
    tracing::debug!(input = files.len(), kept = kept.len(), "time pre-filter");
    Ok(kept)
}

fn first_event_timestamp(file: &str, keyring: Option<&Path>) -> anyhow::Result<Option<u32>> {
    let handle = File::open(file).with_context(|| format!("Failed to open {file}"))?;
    let mut reader = BufReader::new(handle);
    let cipher = open_container(&mut reader, keyring)?;
    let mut framer = EventFramer::new(reader, cipher);
    Ok(framer.next_event()?.map(|event| event.header.timestamp))
}

/// Decrypt each file and write the plain binlog bytes, including the
/// plain magic, to the output in cipher-block-sized chunks.
pub fn decrypt_files<W: Write>(
    files: &[String],
    keyring: &Path,
    out: &mut W,
) -> anyhow::Result<()> {
    for file in files {
        let handle = File::open(file).with_context(|| format!("Failed to open {file}"))?;
        let mut reader = BufReader::new(handle);
        let cipher = open_container(&mut reader, Some(keyring))
            .with_context(|| format!("Failed to open container {file}"))?;
        let Some(mut cipher) = cipher else {
            anyhow::bail!("{file} is not encrypted");
        };
        out.write_all(&BINLOG_MAGIC)?;

        let mut chunk = [0u8; 32];
        loop {
            let got = read_full(&mut reader, &mut chunk)?;
            if got == 0 {
                break;
            }
            cipher.decrypt(&mut chunk[..got]);
            out.write_all(&chunk[..got])?;
        }
        tracing::info!(file = %file, "decrypted");
    }
    out.flush()?;
    Ok(())
}

/// Drive the filter and rebuild path from a live replication source.
///
/// Replication position bookkeeping goes to the master-info file:
/// rotate events switch the file name, query and commit events advance
/// the position, and the GTID set is recorded at commit. A non-zero
/// sync interval flushes from a background task; zero flushes inline on
/// every update.
pub async fn run_stream<S, W>(
    source: &mut S,
    filter: &mut FilterChain,
    engine: &mut RebuildEngine<W>,
    opts: &StreamOptions,
) -> anyhow::Result<()>
where
    S: ReplicationSource,
    W: Write,
{
    let info = Arc::new(Mutex::new(MasterInfo::load(&opts.master_info)?));
    let flusher = if opts.sync_interval.is_zero() {
        None
    } else {
        let info = Arc::clone(&info);
        let interval = opts.sync_interval;
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let mut guard = info.lock().await;
                if guard.is_dirty() {
                    if let Err(error) = guard.flush() {
                        tracing::warn!(%error, "failed to sync master info");
                    }
                }
            }
        }))
    };

    let mut failures = 0u32;
    let mut current_gtid: Option<String> = None;
    loop {
        let pulled = if opts.daemon {
            source.next_event().await
        } else {
            match tokio::time::timeout(opts.read_timeout, source.next_event()).await {
                Ok(pulled) => pulled,
                Err(_) => {
                    tracing::debug!("read timeout reached, stream drained");
                    break;
                }
            }
        };
        let event = match pulled {
            Ok(Some(event)) => {
                failures = 0;
                event
            }
            Ok(None) => break,
            Err(error) => {
                failures += 1;
                if failures > opts.retry_count {
                    return Err(error.context("replication source failed"));
                }
                tracing::warn!(%error, attempt = failures, "replication read failed, retrying");
                continue;
            }
        };

        {
            let mut guard = info.lock().await;
            match &event.payload {
                EventPayload::Rotate(rotate) => {
                    guard.record_rotate(&rotate.next_file, rotate.position);
                }
                EventPayload::Gtid(gtid) => current_gtid = Some(gtid.to_string()),
                EventPayload::Query(_) => guard.record_position(u64::from(event.header.log_pos)),
                EventPayload::Xid(_) => {
                    guard.record_position(u64::from(event.header.log_pos));
                    if let Some(gtid) = current_gtid.take() {
                        guard.record_gtid(gtid);
                    }
                }
                _ => {}
            }
            guard.observe_lag(event.header.timestamp);
            if opts.sync_interval.is_zero() && guard.is_dirty() {
                guard.flush()?;
            }
        }

        if filter.admit(&event) {
            engine.dispatch(&event)?;
        }
        if filter.is_ending() {
            break;
        }
    }

    if let Some(task) = flusher {
        task.abort();
    }
    let mut guard = info.lock().await;
    if guard.is_dirty() {
        guard.flush()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rebuild::{Mode, RebuildOptions};
    use crate::schema::SchemaCatalog;
    use binlog_events::EventType;
    use std::collections::VecDeque;

    struct ScriptedSource {
        events: VecDeque<anyhow::Result<Option<LogEvent>>>,
    }

    #[async_trait::async_trait]
    impl ReplicationSource for ScriptedSource {
        async fn next_event(&mut self) -> anyhow::Result<Option<LogEvent>> {
            self.events.pop_front().unwrap_or(Ok(None))
        }
    }

    fn query_event(log_pos: u32, sql: &str) -> LogEvent {
        LogEvent {
            header: EventHeader {
                timestamp: 1_700_000_000,
                event_type: EventType::Query,
                server_id: 1,
                event_size: 80,
                log_pos,
                flags: 0,
            },
            payload: EventPayload::Query(binlog_events::QueryEvent {
                thread_id: 7,
                execution_time: 0,
                error_code: 0,
                schema: "db".to_string(),
                query: sql.to_string(),
            }),
        }
    }

    fn xid_event(log_pos: u32) -> LogEvent {
        LogEvent {
            header: EventHeader {
                timestamp: 1_700_000_000,
                event_type: EventType::Xid,
                server_id: 1,
                event_size: 31,
                log_pos,
                flags: 0,
            },
            payload: EventPayload::Xid(binlog_events::XidEvent { xid: 99 }),
        }
    }

    fn engine(out: &mut Vec<u8>) -> RebuildEngine<&mut Vec<u8>> {
        RebuildEngine::new(
            Mode::Sql,
            RebuildOptions::default(),
            SchemaCatalog::default(),
            out,
        )
    }

    #[tokio::test]
    async fn stream_replays_events_and_records_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("master.info");
        let mut source = ScriptedSource {
            events: VecDeque::from([
                Ok(Some(query_event(120, "BEGIN"))),
                Ok(Some(query_event(200, "DROP TABLE t1"))),
                Ok(Some(xid_event(260))),
                Ok(None),
            ]),
        };
        let mut filter = FilterChain::new(FilterOptions::default()).unwrap();
        let mut out = Vec::new();
        let mut engine = engine(&mut out);
        let opts = StreamOptions {
            master_info: path.clone(),
            sync_interval: std::time::Duration::ZERO,
            read_timeout: std::time::Duration::from_secs(1),
            retry_count: 3,
            daemon: false,
        };
        run_stream(&mut source, &mut filter, &mut engine, &opts)
            .await
            .unwrap();
        drop(engine);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("DROP TABLE t1;"), "{text}");
        assert!(!text.contains("BEGIN"), "{text}");

        let info = MasterInfo::load(&path).unwrap();
        assert_eq!(info.position().1, 260);
    }

    #[tokio::test]
    async fn transient_source_errors_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = ScriptedSource {
            events: VecDeque::from([
                Err(anyhow::anyhow!("connection reset")),
                Ok(Some(query_event(100, "DROP TABLE t2"))),
                Ok(None),
            ]),
        };
        let mut filter = FilterChain::new(FilterOptions::default()).unwrap();
        let mut out = Vec::new();
        let mut engine = engine(&mut out);
        let opts = StreamOptions {
            master_info: dir.path().join("master.info"),
            sync_interval: std::time::Duration::ZERO,
            read_timeout: std::time::Duration::from_secs(1),
            retry_count: 3,
            daemon: false,
        };
        run_stream(&mut source, &mut filter, &mut engine, &opts)
            .await
            .unwrap();
        drop(engine);
        assert!(String::from_utf8(out).unwrap().contains("DROP TABLE t2;"));
    }

    #[tokio::test]
    async fn retry_budget_exhaustion_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = ScriptedSource {
            events: VecDeque::from([
                Err(anyhow::anyhow!("gone")),
                Err(anyhow::anyhow!("gone")),
                Err(anyhow::anyhow!("gone")),
            ]),
        };
        let mut filter = FilterChain::new(FilterOptions::default()).unwrap();
        let mut out = Vec::new();
        let mut engine = engine(&mut out);
        let opts = StreamOptions {
            master_info: dir.path().join("master.info"),
            sync_interval: std::time::Duration::ZERO,
            read_timeout: std::time::Duration::from_secs(1),
            retry_count: 2,
            daemon: false,
        };
        let result = run_stream(&mut source, &mut filter, &mut engine, &opts).await;
        assert!(result.is_err());
    }
}
