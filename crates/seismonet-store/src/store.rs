//! The event store proper: writer, indexes, tail.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::RwLock;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use seismonet_models::{ClassifiedEvent, SeismoError, SeismoResult};

use crate::log::{self, LogHeader, LogRecord, FORMAT_VERSION, MAGIC};
use crate::query::{EventFilter, StoreStats};

/// Durability mode for appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsyncPolicy {
    PerWrite,
    Periodic,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub dir: PathBuf,
    #[serde(default = "default_fsync")]
    pub fsync: FsyncPolicy,
    /// Upper bound on unsynced data age under `periodic`, ms
    #[serde(default = "default_periodic_sync_ms")]
    pub periodic_sync_ms: u64,
}

fn default_fsync() -> FsyncPolicy {
    FsyncPolicy::PerWrite
}
fn default_periodic_sync_ms() -> u64 {
    500
}

struct WriterState {
    file: tokio::fs::File,
    log_len: u64,
    /// Next storage id to assign; never reused, even across compaction
    next_storage_id: u64,
    last_sync: Instant,
}

/// Index entry: the stable storage id (the public cursor) and the record's
/// current byte offset (private, changes on compaction).
#[derive(Clone, Copy)]
struct IndexEntry {
    storage_id: u64,
    offset: u64,
}

#[derive(Default)]
struct Indexes {
    by_id: HashMap<Uuid, IndexEntry>,
    by_time: BTreeMap<(DateTime<Utc>, Uuid), IndexEntry>,
    label_counts: HashMap<String, u64>,
}

/// Append-only classified-event catalog. Concurrency-safe: one writer lock
/// serializes appends, a read-write lock guards the indexes, and the tail
/// is a broadcast channel.
pub struct EventStore {
    log_path: PathBuf,
    config: StoreConfig,
    writer: Mutex<WriterState>,
    indexes: RwLock<Indexes>,
    tail_tx: broadcast::Sender<(u64, ClassifiedEvent)>,
}

impl EventStore {
    /// Open (or create) the store under `config.dir`. Recovers indexes by
    /// scanning the log; a torn trailing record is truncated, anything
    /// worse is `Corruption`.
    pub async fn open(config: StoreConfig, schema_id: &str) -> SeismoResult<Self> {
        tokio::fs::create_dir_all(&config.dir)
            .await
            .map_err(|e| SeismoError::Internal(format!("create store dir: {}", e)))?;
        let log_path = config.dir.join("events.log");

        let mut indexes = Indexes::default();
        let log_len;
        let next_storage_id;

        if tokio::fs::try_exists(&log_path)
            .await
            .map_err(|e| SeismoError::Internal(format!("stat log: {}", e)))?
        {
            let scan = log::scan(&log_path)?;
            if scan.header.schema_id != schema_id {
                warn!(
                    stored = %scan.header.schema_id,
                    configured = %schema_id,
                    "store schema differs from configured schema"
                );
            }
            let file_len = std::fs::metadata(&log_path)
                .map_err(|e| SeismoError::Internal(format!("stat log: {}", e)))?
                .len();
            if scan.valid_len < file_len {
                let f = std::fs::OpenOptions::new()
                    .write(true)
                    .open(&log_path)
                    .map_err(|e| SeismoError::Internal(format!("open log for truncate: {}", e)))?;
                f.set_len(scan.valid_len)
                    .map_err(|e| SeismoError::Internal(format!("truncate log: {}", e)))?;
            }
            let mut max_id = 0u64;
            for (offset, record) in &scan.records {
                index_record(&mut indexes, record.storage_id, *offset, &record.event);
                max_id = max_id.max(record.storage_id);
            }
            log_len = scan.valid_len;
            // The header's high-water mark covers swept records whose ids
            // were larger than any survivor's.
            next_storage_id = scan.header.next_storage_id.max(max_id + 1);
            info!(
                events = scan.records.len(),
                bytes = log_len,
                "event store recovered"
            );
        } else {
            let header = LogHeader {
                magic: MAGIC.to_string(),
                version: FORMAT_VERSION,
                schema_id: schema_id.to_string(),
                next_storage_id: 1,
            };
            let framed = log::frame(
                &serde_json::to_vec(&header)
                    .map_err(|e| SeismoError::Internal(format!("header serialize: {}", e)))?,
            );
            tokio::fs::write(&log_path, &framed)
                .await
                .map_err(|e| SeismoError::Internal(format!("write log header: {}", e)))?;
            log_len = framed.len() as u64;
            next_storage_id = 1;
            info!(path = ?log_path, "event store created");
        }

        let file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&log_path)
            .await
            .map_err(|e| SeismoError::Internal(format!("open log for append: {}", e)))?;

        let (tail_tx, _) = broadcast::channel(1024);
        Ok(Self {
            log_path,
            config,
            writer: Mutex::new(WriterState {
                file,
                log_len,
                next_storage_id,
                last_sync: Instant::now(),
            }),
            indexes: RwLock::new(indexes),
            tail_tx,
        })
    }

    /// Atomically append one classified event; returns its assigned
    /// storage id, which doubles as the tail cursor and is stable across
    /// compaction. Re-appending an already-stored event id is idempotent.
    pub async fn append(&self, event: ClassifiedEvent) -> SeismoResult<u64> {
        let mut writer = self.writer.lock().await;

        if let Some(existing) = self
            .indexes
            .read()
            .expect("index lock poisoned")
            .by_id
            .get(&event.event_id)
        {
            return Ok(existing.storage_id);
        }

        let storage_id = writer.next_storage_id;
        let record = LogRecord::new(storage_id, event.clone())?;
        let framed = log::frame(
            &serde_json::to_vec(&record)
                .map_err(|e| SeismoError::Internal(format!("record serialize: {}", e)))?,
        );
        let offset = writer.log_len;

        writer
            .file
            .write_all(&framed)
            .await
            .map_err(|e| SeismoError::Internal(format!("append: {}", e)))?;

        let sync_due = match self.config.fsync {
            FsyncPolicy::PerWrite => true,
            FsyncPolicy::Periodic => {
                writer.last_sync.elapsed().as_millis() as u64 >= self.config.periodic_sync_ms
            }
        };
        if sync_due {
            writer
                .file
                .sync_all()
                .await
                .map_err(|e| SeismoError::Internal(format!("fsync: {}", e)))?;
            writer.last_sync = Instant::now();
        }
        writer.log_len += framed.len() as u64;
        writer.next_storage_id += 1;

        {
            let mut indexes = self.indexes.write().expect("index lock poisoned");
            index_record(&mut indexes, storage_id, offset, &event);
        }
        metrics::counter!("store_appends_total").increment(1);
        metrics::gauge!("store_log_bytes").set(writer.log_len as f64);

        let _ = self.tail_tx.send((storage_id, event));
        Ok(storage_id)
    }

    /// Fetch one event by id.
    pub fn get_by_id(&self, id: Uuid) -> SeismoResult<ClassifiedEvent> {
        let entry = *self
            .indexes
            .read()
            .expect("index lock poisoned")
            .by_id
            .get(&id)
            .ok_or_else(|| SeismoError::NotFound(id.to_string()))?;
        Ok(log::read_record_at(&self.log_path, entry.offset)?.event)
    }

    /// Range query ordered by trigger instant ascending.
    pub fn query(&self, filter: &EventFilter) -> SeismoResult<Vec<ClassifiedEvent>> {
        let offsets: Vec<u64> = {
            let indexes = self.indexes.read().expect("index lock poisoned");
            let lower = filter
                .start
                .map(|t| (t, Uuid::nil()))
                .unwrap_or((DateTime::<Utc>::MIN_UTC, Uuid::nil()));
            let upper = filter
                .end
                .map(|t| (t, Uuid::nil()))
                .unwrap_or((DateTime::<Utc>::MAX_UTC, Uuid::max()));
            indexes
                .by_time
                .range(lower..upper)
                .map(|(_, entry)| entry.offset)
                .collect()
        };

        let mut out = Vec::new();
        for offset in offsets {
            let event = log::read_record_at(&self.log_path, offset)?.event;
            if filter.matches(&event) {
                out.push(event);
            }
        }
        Ok(out)
    }

    /// Live tail resuming after the storage-id cursor `from_cursor` (pass
    /// 0 for everything). Storage ids survive compaction, so a cursor held
    /// across a sweep or a restart resumes without skipping events.
    pub fn tail(&self, from_cursor: u64) -> Tail {
        // Subscribe before snapshotting so nothing falls between; the
        // cursor check in `next` drops the overlap.
        let rx = self.tail_tx.subscribe();
        let catchup: VecDeque<(u64, ClassifiedEvent)> = {
            let indexes = self.indexes.read().expect("index lock poisoned");
            let mut entries: Vec<IndexEntry> = indexes
                .by_time
                .values()
                .copied()
                .filter(|entry| entry.storage_id > from_cursor)
                .collect();
            entries.sort_unstable_by_key(|entry| entry.storage_id);
            entries
                .into_iter()
                .filter_map(|entry| {
                    log::read_record_at(&self.log_path, entry.offset)
                        .ok()
                        .map(|r| (entry.storage_id, r.event))
                })
                .collect()
        };
        Tail {
            catchup,
            rx,
            last_cursor: from_cursor,
        }
    }

    pub fn stats(&self) -> StoreStats {
        let indexes = self.indexes.read().expect("index lock poisoned");
        StoreStats {
            events: indexes.by_id.len() as u64,
            label_counts: indexes.label_counts.clone(),
            first_trigger: indexes.by_time.keys().next().map(|(t, _)| *t),
            last_trigger: indexes.by_time.keys().next_back().map(|(t, _)| *t),
            log_bytes: std::fs::metadata(&self.log_path).map(|m| m.len()).unwrap_or(0),
        }
    }

    /// Retention sweep: drop events with trigger instant before `cutoff` by
    /// rewriting the log atomically. Returns the number removed.
    ///
    /// Surviving records keep their storage ids and the rewritten header
    /// carries the id high-water mark, so tail cursors held across the
    /// sweep (or across a restart after it) stay valid.
    pub async fn compact(&self, cutoff: DateTime<Utc>) -> SeismoResult<usize> {
        let mut writer = self.writer.lock().await;
        writer
            .file
            .sync_all()
            .await
            .map_err(|e| SeismoError::Internal(format!("fsync before compact: {}", e)))?;

        let scan = log::scan(&self.log_path)?;
        let tmp_path = self.log_path.with_extension("log.compact");
        let header = LogHeader {
            next_storage_id: writer.next_storage_id,
            ..scan.header
        };
        let header_bytes = log::frame(
            &serde_json::to_vec(&header)
                .map_err(|e| SeismoError::Internal(format!("header serialize: {}", e)))?,
        );

        let mut kept_bytes = header_bytes;
        let mut kept = 0usize;
        let mut removed = 0usize;
        let mut indexes = Indexes::default();
        for (_, record) in scan.records {
            if record.event.trigger_instant() >= cutoff {
                let framed = log::frame(
                    &serde_json::to_vec(&record)
                        .map_err(|e| SeismoError::Internal(format!("record serialize: {}", e)))?,
                );
                index_record(
                    &mut indexes,
                    record.storage_id,
                    kept_bytes.len() as u64,
                    &record.event,
                );
                kept_bytes.extend_from_slice(&framed);
                kept += 1;
            } else {
                removed += 1;
            }
        }

        std::fs::write(&tmp_path, &kept_bytes)
            .map_err(|e| SeismoError::Internal(format!("write compacted log: {}", e)))?;
        std::fs::rename(&tmp_path, &self.log_path)
            .map_err(|e| SeismoError::Internal(format!("swap compacted log: {}", e)))?;

        writer.file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&self.log_path)
            .await
            .map_err(|e| SeismoError::Internal(format!("reopen log: {}", e)))?;
        writer.log_len = kept_bytes.len() as u64;
        *self.indexes.write().expect("index lock poisoned") = indexes;

        info!(kept, removed, "store compacted");
        Ok(removed)
    }
}

fn index_record(indexes: &mut Indexes, storage_id: u64, offset: u64, event: &ClassifiedEvent) {
    let entry = IndexEntry { storage_id, offset };
    indexes.by_id.insert(event.event_id, entry);
    indexes
        .by_time
        .insert((event.trigger_instant(), event.event_id), entry);
    *indexes
        .label_counts
        .entry(event.label.as_str().to_string())
        .or_insert(0) += 1;
}

/// Live tail: buffered catch-up followed by the broadcast feed. Subscribers
/// that lag past the channel capacity should re-tail from their last
/// cursor; delivery is at-least-once, duplicates are filtered by cursor.
pub struct Tail {
    catchup: VecDeque<(u64, ClassifiedEvent)>,
    rx: broadcast::Receiver<(u64, ClassifiedEvent)>,
    last_cursor: u64,
}

impl Tail {
    /// Next event in cursor order. `None` when the store is gone.
    pub async fn next(&mut self) -> Option<(u64, ClassifiedEvent)> {
        if let Some((cursor, event)) = self.catchup.pop_front() {
            self.last_cursor = cursor;
            return Some((cursor, event));
        }
        loop {
            match self.rx.recv().await {
                Ok((cursor, event)) => {
                    if cursor <= self.last_cursor {
                        continue;
                    }
                    self.last_cursor = cursor;
                    return Some((cursor, event));
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "tail lagged; consumer should re-tail from its cursor");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Cursor of the last delivered event; persist this to resume.
    pub fn cursor(&self) -> u64 {
        self.last_cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::path::Path;
    use seismonet_models::{
        CandidateEvent, CandidateState, ChannelId, EventLabel, FeatureSchema, FeatureVector,
        MagnitudeEstimate, MagnitudeScale, PipelineTiming, TimeWindow,
    };

    fn test_event(seq: u64, minute: u32) -> ClassifiedEvent {
        let t = Utc.with_ymd_and_hms(2026, 3, 1, 10, minute, 0).unwrap();
        let schema = FeatureSchema::v1();
        ClassifiedEvent {
            event_id: Uuid::new_v4(),
            seq,
            candidate: CandidateEvent {
                detector_id: "stalta:SN.TEST..HHZ".to_string(),
                channel: ChannelId::new("SN", "TEST", "", "HHZ"),
                trigger_instant: t,
                trigger_ratio: 5.0,
                detrigger_instant: t + chrono::Duration::seconds(8),
                pre_roll: TimeWindow::new(t - chrono::Duration::seconds(10), t),
                post_roll: TimeWindow::new(
                    t + chrono::Duration::seconds(8),
                    t + chrono::Duration::seconds(38),
                ),
                state: CandidateState::Confirmed,
            },
            features: FeatureVector::new(&schema, vec![0.5; 24]).unwrap(),
            label: EventLabel::Earthquake,
            confidence: 0.9,
            magnitude: MagnitudeEstimate {
                value: 4.0,
                low: 3.5,
                high: 4.5,
                scale: MagnitudeScale::Ml,
            },
            location: None,
            stations: vec!["SN.TEST".to_string()],
            timing: PipelineTiming {
                detected_at: t,
                analyzed_at: t + chrono::Duration::seconds(9),
            },
        }
    }

    fn test_config(dir: &Path) -> StoreConfig {
        StoreConfig {
            dir: dir.to_path_buf(),
            fsync: FsyncPolicy::PerWrite,
            periodic_sync_ms: 500,
        }
    }

    #[tokio::test]
    async fn append_then_get_by_id_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::open(test_config(dir.path()), "seismonet.fv.v1")
            .await
            .unwrap();
        let event = test_event(1, 5);
        let id = event.event_id;
        store.append(event.clone()).await.unwrap();

        let back = store.get_by_id(id).unwrap();
        assert_eq!(back.event_id, id);
        assert_eq!(back.magnitude.value, 4.0);
        assert_eq!(back.trigger_instant(), event.trigger_instant());
    }

    #[tokio::test]
    async fn append_is_idempotent_by_event_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::open(test_config(dir.path()), "seismonet.fv.v1")
            .await
            .unwrap();
        let event = test_event(1, 5);
        let a = store.append(event.clone()).await.unwrap();
        let b = store.append(event).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.stats().events, 1);
    }

    #[tokio::test]
    async fn query_orders_by_trigger_instant() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::open(test_config(dir.path()), "seismonet.fv.v1")
            .await
            .unwrap();
        // Append out of time order.
        store.append(test_event(2, 30)).await.unwrap();
        store.append(test_event(1, 10)).await.unwrap();
        store.append(test_event(3, 50)).await.unwrap();

        let events = store.query(&EventFilter::default()).unwrap();
        assert_eq!(events.len(), 3);
        for pair in events.windows(2) {
            assert!(pair[0].trigger_instant() <= pair[1].trigger_instant());
        }
    }

    #[tokio::test]
    async fn restart_recovers_events_and_survives_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = EventStore::open(test_config(dir.path()), "seismonet.fv.v1")
                .await
                .unwrap();
            store.append(test_event(1, 10)).await.unwrap();
            store.append(test_event(2, 20)).await.unwrap();
        }
        // Simulate a crash mid-append: half a record at the tail.
        let log_path = dir.path().join("events.log");
        {
            use std::io::Write;
            let mut f = std::fs::OpenOptions::new()
                .append(true)
                .open(&log_path)
                .unwrap();
            f.write_all(&[0, 0, 9, 200, 1, 2, 3]).unwrap();
        }

        let store = EventStore::open(test_config(dir.path()), "seismonet.fv.v1")
            .await
            .unwrap();
        assert_eq!(store.stats().events, 2);
        // And the store accepts fresh appends after truncation.
        store.append(test_event(3, 30)).await.unwrap();
        assert_eq!(store.stats().events, 3);
    }

    #[tokio::test]
    async fn corrupt_header_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("events.log");
        std::fs::write(&log_path, b"garbage").unwrap();
        let result = EventStore::open(test_config(dir.path()), "seismonet.fv.v1").await;
        assert!(matches!(result, Err(SeismoError::Corruption(_))));
    }

    #[tokio::test]
    async fn tail_resumes_from_cursor_and_follows_live() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::open(test_config(dir.path()), "seismonet.fv.v1")
            .await
            .unwrap();
        let c1 = store.append(test_event(1, 10)).await.unwrap();
        store.append(test_event(2, 20)).await.unwrap();

        let mut tail = store.tail(c1);
        let (_, catchup_event) = tail.next().await.unwrap();
        assert_eq!(catchup_event.seq, 2);

        let live = test_event(3, 30);
        let live_id = live.event_id;
        store.append(live).await.unwrap();
        let (_, live_event) = tail.next().await.unwrap();
        assert_eq!(live_event.event_id, live_id);
    }

    #[tokio::test]
    async fn compact_drops_old_events() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::open(test_config(dir.path()), "seismonet.fv.v1")
            .await
            .unwrap();
        store.append(test_event(1, 5)).await.unwrap();
        store.append(test_event(2, 30)).await.unwrap();

        let cutoff = Utc.with_ymd_and_hms(2026, 3, 1, 10, 20, 0).unwrap();
        let removed = store.compact(cutoff).await.unwrap();
        assert_eq!(removed, 1);

        let events = store.query(&EventFilter::default()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].seq, 2);
        // Post-compact appends still work.
        store.append(test_event(3, 45)).await.unwrap();
        assert_eq!(store.stats().events, 2);
    }

    #[tokio::test]
    async fn tail_cursor_survives_compaction() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::open(test_config(dir.path()), "seismonet.fv.v1")
            .await
            .unwrap();
        store.append(test_event(1, 5)).await.unwrap();
        let seen_cursor = store.append(test_event(2, 30)).await.unwrap();
        store.append(test_event(3, 40)).await.unwrap();

        // A subscriber has consumed up to event 2; the sweep then drops
        // event 1 and rewrites every surviving record's byte offset.
        let cutoff = Utc.with_ymd_and_hms(2026, 3, 1, 10, 20, 0).unwrap();
        assert_eq!(store.compact(cutoff).await.unwrap(), 1);

        // Resuming from the pre-compaction cursor must deliver exactly the
        // unseen event, not skip it because offsets shrank.
        let mut tail = store.tail(seen_cursor);
        let (_, catchup) = tail.next().await.unwrap();
        assert_eq!(catchup.seq, 3);

        // Live delivery continues and new ids stay above old ones.
        let live_cursor = store.append(test_event(4, 50)).await.unwrap();
        assert!(live_cursor > seen_cursor);
        let (_, live) = tail.next().await.unwrap();
        assert_eq!(live.seq, 4);
    }

    #[tokio::test]
    async fn storage_ids_are_not_reused_after_compact_and_restart() {
        let dir = tempfile::tempdir().unwrap();
        let high_cursor;
        {
            let store = EventStore::open(test_config(dir.path()), "seismonet.fv.v1")
                .await
                .unwrap();
            store.append(test_event(1, 30)).await.unwrap();
            // The newest append holds the max storage id but the oldest
            // trigger instant, so the sweep drops it.
            high_cursor = store.append(test_event(2, 5)).await.unwrap();
            let cutoff = Utc.with_ymd_and_hms(2026, 3, 1, 10, 20, 0).unwrap();
            assert_eq!(store.compact(cutoff).await.unwrap(), 1);
        }

        // After a restart the header's high-water mark keeps new ids above
        // the swept record's, so a subscriber parked at `high_cursor`
        // cannot be aliased past a fresh event.
        let store = EventStore::open(test_config(dir.path()), "seismonet.fv.v1")
            .await
            .unwrap();
        let fresh_cursor = store.append(test_event(3, 45)).await.unwrap();
        assert!(fresh_cursor > high_cursor);

        let mut tail = store.tail(high_cursor);
        let (_, event) = tail.next().await.unwrap();
        assert_eq!(event.seq, 3);
    }
}
