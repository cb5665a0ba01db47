// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The journaled queue: one journal fanned out to per-reader in-memory
//! queues.
//!
//! ```text
//! ┌──────────┐   append    ┌──────────┐    fan out    ┌────────────────┐
//! │  put()   │ ──────────► │ Journal  │ ────────────► │ reader queues  │
//! │ (caller) │  + ticket   │ (disk)   │  (in memory)  │ (one per name) │
//! └──────────┘             └──────────┘               └────────────────┘
//! ```
//!
//! Every reader advances independently. An item handed to a consumer is an
//! *open read* until it is committed (gone for that reader) or aborted
//! (back at the front of that reader's queue). Open reads that are never
//! resolved replay after a restart: the journal only forgets an item once
//! every reader has committed past it and a checkpoint has run.
//!
//! Lock order is readers-map before journal; the journal mutex is the put
//! serializer, so fan-out happens under it and every reader observes items
//! in id order.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
    time::{Duration, Instant},
};

use bytes::Bytes;
use snafu::OptionExt;
use tracing::{debug, info};

use crate::{
    Result,
    blocking_queue::ConcurrentBlockingQueue,
    clock::{Clock, SystemClock},
    config::QueueConfig,
    error::{UnknownIdSnafu, UnknownReaderSnafu},
    item::QueueItem,
    journal::Journal,
    metrics,
    sync_file::SyncTicket,
};

/// A durable, multi-reader, in-process queue.
pub struct JournaledQueue {
    name:    String,
    clock:   Arc<dyn Clock>,
    journal: Arc<Mutex<Journal>>,
    readers: RwLock<HashMap<String, Arc<QueueReader>>>,
}

impl JournaledQueue {
    /// Open (or create) a queue with the system clock.
    pub fn open(config: QueueConfig) -> Result<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock))
    }

    /// Open (or create) a queue with an injected clock.
    pub fn open_with_clock(config: QueueConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let (journal, items) = Journal::open(&config, Arc::clone(&clock))?;
        let journal = Arc::new(Mutex::new(journal));

        let mut readers = HashMap::new();
        {
            let locked = journal.lock().expect("journal lock poisoned");
            for name in locked.reader_names() {
                let reader = Arc::new(QueueReader::new(
                    config.name.clone(),
                    name.clone(),
                    Arc::clone(&journal),
                    Arc::clone(&clock),
                ));
                if let Some(state) = locked.reader_state(&name) {
                    for item in &items {
                        if !state.is_consumed(item.id) {
                            reader.items.put(item.clone());
                        }
                    }
                }
                reader.update_size_gauge();
                readers.insert(name, reader);
            }
        }

        info!(queue = %config.name, replayed = items.len(), "Journaled queue opened");
        Ok(Self {
            name: config.name,
            clock,
            journal,
            readers: RwLock::new(readers),
        })
    }

    /// Append an item and fan it out to every reader. Returns the item and
    /// the ticket that completes once the record is durable.
    pub fn put(
        &self,
        payload: impl Into<Bytes>,
        expire_time: Option<u64>,
    ) -> Result<(QueueItem, SyncTicket)> {
        let payload = payload.into();
        let readers = self.readers.read().expect("readers lock poisoned");
        let mut journal = self.journal.lock().expect("journal lock poisoned");

        let (item, ticket) = journal.put(payload, self.clock.now_ms(), expire_time)?;
        for reader in readers.values() {
            reader.items.put(item.clone());
            reader.update_size_gauge();
        }

        metrics::PUTS_TOTAL.with_label_values(&[&self.name]).inc();
        metrics::JOURNAL_BYTES
            .with_label_values(&[&self.name])
            .set(journal.total_bytes() as i64);

        Ok((item, ticket))
    }

    /// A handle to the named reader, created if absent. The empty name
    /// addresses the implicit default reader, which exists only while no
    /// named reader does.
    pub fn reader(&self, name: &str) -> Result<Arc<QueueReader>> {
        {
            let readers = self.readers.read().expect("readers lock poisoned");
            if let Some(reader) = readers.get(name) {
                return Ok(Arc::clone(reader));
            }
        }
        if name.is_empty() {
            // The default reader is created by the journal, never here.
            return UnknownReaderSnafu { name }.fail();
        }

        let mut readers = self.readers.write().expect("readers lock poisoned");
        if let Some(reader) = readers.get(name) {
            return Ok(Arc::clone(reader));
        }

        let mut journal = self.journal.lock().expect("journal lock poisoned");
        journal.create_reader(name)?;

        let reader = Arc::new(QueueReader::new(
            self.name.clone(),
            name.to_string(),
            Arc::clone(&self.journal),
            Arc::clone(&self.clock),
        ));

        // The first named reader inherits the default reader's backlog.
        if let Some(default_reader) = readers.remove("") {
            while let Some(item) = default_reader.items.poll() {
                reader.items.put(item);
            }
            reader.update_size_gauge();
            default_reader.update_size_gauge();
        }

        readers.insert(name.to_string(), Arc::clone(&reader));
        Ok(reader)
    }

    /// Names of the live readers.
    pub fn reader_names(&self) -> Vec<String> {
        self.readers
            .read()
            .expect("readers lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Durably record every reader's state, then reclaim writer files all
    /// readers have passed.
    pub fn checkpoint(&self) -> Result<()> {
        self.journal
            .lock()
            .expect("journal lock poisoned")
            .checkpoint()
    }

    /// Force a durability sync now, completing outstanding put tickets.
    pub fn flush(&self) -> Result<()> {
        self.journal.lock().expect("journal lock poisoned").flush()
    }

    /// Checkpoint, flush, and stop accepting puts. After this returns
    /// normally, everything put so far is durable.
    pub fn close(self) -> Result<()> {
        let mut journal = self.journal.lock().expect("journal lock poisoned");
        journal.checkpoint()?;
        journal.close()?;
        info!(queue = %self.name, "Journaled queue closed");
        Ok(())
    }

    /// Delete every file this queue owns.
    pub fn erase(self) -> Result<()> {
        self.readers
            .write()
            .expect("readers lock poisoned")
            .clear();
        self.journal.lock().expect("journal lock poisoned").erase()
    }

    pub fn name(&self) -> &str { &self.name }

    /// Total bytes across the queue's writer files.
    pub fn journal_bytes(&self) -> u64 {
        self.journal
            .lock()
            .expect("journal lock poisoned")
            .total_bytes()
    }
}

/// One reader's view of a [`JournaledQueue`].
pub struct QueueReader {
    queue_name: String,
    name:       String,
    items:      ConcurrentBlockingQueue<QueueItem>,
    /// Items delivered but not yet committed or aborted.
    open:       Mutex<HashMap<u64, QueueItem>>,
    journal:    Arc<Mutex<Journal>>,
    clock:      Arc<dyn Clock>,
}

impl std::fmt::Debug for QueueReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueReader")
            .field("queue_name", &self.queue_name)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl QueueReader {
    fn new(
        queue_name: String,
        name: String,
        journal: Arc<Mutex<Journal>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            queue_name,
            name,
            items: ConcurrentBlockingQueue::new(),
            open: Mutex::new(HashMap::new()),
            journal,
            clock,
        }
    }

    pub fn name(&self) -> &str { &self.name }

    /// Take the next item as an open read, waiting up to `timeout`
    /// (`None` = wait indefinitely). Returns `Ok(None)` once the deadline
    /// passes. Items whose expiry has lapsed are dropped and auto-committed
    /// rather than delivered.
    pub fn get(&self, timeout: Option<Duration>) -> Result<Option<QueueItem>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let Some(item) = self.items.get(deadline).wait() else {
                return Ok(None);
            };
            match self.admit(item)? {
                Some(item) => return Ok(Some(item)),
                None => continue,
            }
        }
    }

    /// Take the next item if one is immediately available.
    pub fn poll(&self) -> Result<Option<QueueItem>> {
        loop {
            let Some(item) = self.items.poll() else {
                return Ok(None);
            };
            match self.admit(item)? {
                Some(item) => return Ok(Some(item)),
                None => continue,
            }
        }
    }

    /// Record a delivered item as open, or drop it if it expired while
    /// queued.
    fn admit(&self, item: QueueItem) -> Result<Option<QueueItem>> {
        if item.is_expired(self.clock.now_ms()) {
            debug!(id = item.id, reader = %self.name, "Dropping expired item");
            metrics::EXPIRED_TOTAL
                .with_label_values(&[&self.queue_name, &self.name])
                .inc();
            // Consumed as far as this reader is concerned; never replays.
            self.journal
                .lock()
                .expect("journal lock poisoned")
                .commit_read(&self.name, item.id)?;
            self.update_size_gauge();
            return Ok(None);
        }

        self.open
            .lock()
            .expect("open reads lock poisoned")
            .insert(item.id, item.clone());

        metrics::GETS_TOTAL
            .with_label_values(&[&self.queue_name, &self.name])
            .inc();
        self.update_open_gauge();
        self.update_size_gauge();
        Ok(Some(item))
    }

    /// Acknowledge an open read. The item is gone for this reader.
    pub fn commit(&self, id: u64) -> Result<()> {
        self.open
            .lock()
            .expect("open reads lock poisoned")
            .remove(&id)
            .context(UnknownIdSnafu { id })?;

        self.journal
            .lock()
            .expect("journal lock poisoned")
            .commit_read(&self.name, id)?;

        self.update_open_gauge();
        Ok(())
    }

    /// Return an open read to the front of the queue, ahead of fresh puts.
    pub fn abort(&self, id: u64) -> Result<()> {
        let item = self
            .open
            .lock()
            .expect("open reads lock poisoned")
            .remove(&id)
            .context(UnknownIdSnafu { id })?;

        self.items.put_head(item);
        self.update_open_gauge();
        self.update_size_gauge();
        Ok(())
    }

    /// Durably record this reader's `(head, done-set)`.
    pub fn checkpoint(&self) -> Result<()> {
        self.journal
            .lock()
            .expect("journal lock poisoned")
            .checkpoint_reader(&self.name)
    }

    /// Items waiting in this reader's in-memory queue.
    pub fn size(&self) -> usize { self.items.len() }

    /// Items delivered but not yet committed or aborted.
    pub fn open_reads(&self) -> usize {
        self.open.lock().expect("open reads lock poisoned").len()
    }

    pub fn to_debug(&self) -> String {
        let position = self
            .journal
            .lock()
            .expect("journal lock poisoned")
            .reader_position(&self.name);
        format!(
            "QueueReader({}/{}, position={:?}, open={}, {})",
            self.queue_name,
            self.name,
            position,
            self.open_reads(),
            self.items.to_debug(),
        )
    }

    fn update_size_gauge(&self) {
        metrics::QUEUE_SIZE
            .with_label_values(&[&self.queue_name, &self.name])
            .set(self.items.len() as i64);
    }

    fn update_open_gauge(&self) {
        metrics::OPEN_READS
            .with_label_values(&[&self.queue_name, &self.name])
            .set(self.open_reads() as i64);
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::{Error, clock::ManualClock};

    fn config(dir: &std::path::Path) -> QueueConfig {
        QueueConfig {
            dir: dir.to_path_buf(),
            name: "test".to_string(),
            max_file_size: 16 * 1024 * 1024,
            sync_period: None,
        }
    }

    fn open(dir: &std::path::Path, clock: Arc<ManualClock>) -> JournaledQueue {
        JournaledQueue::open_with_clock(config(dir), clock).unwrap()
    }

    #[test]
    fn test_put_get_commit_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let queue = open(temp_dir.path(), clock.clone());
        let reader = queue.reader("c1").unwrap();

        let (item, ticket) = queue.put("payload", None).unwrap();
        assert_eq!(item.id, 1);
        assert_eq!(item.add_time, 1_000);
        queue.flush().unwrap();
        ticket.wait().unwrap();

        let got = reader.get(None).unwrap().unwrap();
        assert_eq!(got, item);
        assert_eq!(reader.open_reads(), 1);

        reader.commit(got.id).unwrap();
        assert_eq!(reader.open_reads(), 0);
        assert_eq!(reader.poll().unwrap(), None);
    }

    #[test]
    fn test_get_times_out_on_empty_queue() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let queue = open(temp_dir.path(), clock);
        let reader = queue.reader("c1").unwrap();

        let got = reader.get(Some(Duration::from_millis(20))).unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn test_fan_out_delivers_to_every_reader() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let queue = open(temp_dir.path(), clock);
        let r1 = queue.reader("c1").unwrap();
        let r2 = queue.reader("c2").unwrap();

        queue.put("shared", None).unwrap();

        assert_eq!(r1.get(None).unwrap().unwrap().id, 1);
        assert_eq!(r2.get(None).unwrap().unwrap().id, 1);
    }

    #[test]
    fn test_readers_created_later_only_see_the_future() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let queue = open(temp_dir.path(), clock);
        let early = queue.reader("early").unwrap();

        queue.put("before", None).unwrap();
        let late = queue.reader("late").unwrap();
        queue.put("after", None).unwrap();

        assert_eq!(early.size(), 2);
        assert_eq!(late.size(), 1);
        assert_eq!(late.get(None).unwrap().unwrap().id, 2);
    }

    #[test]
    fn test_abort_returns_item_ahead_of_fresh_puts() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let queue = open(temp_dir.path(), clock);
        let reader = queue.reader("c1").unwrap();

        queue.put("one", None).unwrap();
        let first = reader.get(None).unwrap().unwrap();
        queue.put("two", None).unwrap();
        reader.abort(first.id).unwrap();

        assert_eq!(reader.get(None).unwrap().unwrap().id, first.id);
        assert_eq!(reader.get(None).unwrap().unwrap().id, 2);
    }

    #[test]
    fn test_commit_unknown_id_is_surfaced() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let queue = open(temp_dir.path(), clock);
        let reader = queue.reader("c1").unwrap();

        assert!(matches!(
            reader.commit(99).unwrap_err(),
            Error::UnknownId { id: 99, .. }
        ));
        assert!(matches!(
            reader.abort(99).unwrap_err(),
            Error::UnknownId { .. }
        ));
    }

    #[test]
    fn test_at_most_once_per_reader() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let queue = open(temp_dir.path(), clock);
        let reader = queue.reader("c1").unwrap();

        for i in 0..20u64 {
            queue.put(format!("m{i}"), None).unwrap();
        }

        let mut seen = Vec::new();
        while let Some(item) = reader.poll().unwrap() {
            reader.commit(item.id).unwrap();
            seen.push(item.id);
        }
        assert_eq!(seen, (1..=20).collect::<Vec<_>>());
    }

    #[test]
    fn test_uncommitted_open_reads_replay_after_restart() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        {
            let queue = open(temp_dir.path(), clock.clone());
            let reader = queue.reader("c1").unwrap();
            queue.put("committed", None).unwrap();
            queue.put("left open", None).unwrap();

            let first = reader.get(None).unwrap().unwrap();
            reader.commit(first.id).unwrap();
            let _open = reader.get(None).unwrap().unwrap();
            // Item 2 is an open read when the queue shuts down.
            queue.close().unwrap();
        }

        let queue = open(temp_dir.path(), clock);
        let reader = queue.reader("c1").unwrap();
        let replayed = reader.get(None).unwrap().unwrap();
        assert_eq!(replayed.id, 2);
        assert_eq!(replayed.payload, Bytes::from_static(b"left open"));
        assert_eq!(reader.poll().unwrap(), None);
    }

    #[test]
    fn test_committed_items_do_not_replay_after_checkpoint() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        {
            let queue = open(temp_dir.path(), clock.clone());
            let reader = queue.reader("c1").unwrap();
            for i in 0..5u64 {
                queue.put(format!("m{i}"), None).unwrap();
            }
            for _ in 0..3 {
                let item = reader.get(None).unwrap().unwrap();
                reader.commit(item.id).unwrap();
            }
            queue.close().unwrap();
        }

        let queue = open(temp_dir.path(), clock);
        let reader = queue.reader("c1").unwrap();
        let ids: Vec<u64> = std::iter::from_fn(|| reader.poll().unwrap())
            .map(|item| item.id)
            .collect();
        assert_eq!(ids, vec![4, 5]);
    }

    #[test]
    fn test_expired_items_are_dropped_and_counted_consumed() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let queue = open(temp_dir.path(), clock.clone());
        let reader = queue.reader("c1").unwrap();

        queue.put("short ttl", Some(1_500)).unwrap();
        queue.put("long ttl", Some(60_000)).unwrap();
        clock.set(2_000);

        let got = reader.get(Some(Duration::from_millis(50))).unwrap().unwrap();
        assert_eq!(got.id, 2);
        reader.commit(got.id).unwrap();

        // The expired item was auto-committed: nothing replays.
        assert_eq!(reader.poll().unwrap(), None);
    }

    #[test]
    fn test_first_named_reader_inherits_default_backlog() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let queue = open(temp_dir.path(), clock);

        // Only the implicit default reader exists; it accumulates items.
        queue.put("a", None).unwrap();
        queue.put("b", None).unwrap();
        let default = queue.reader("").unwrap();
        assert_eq!(default.size(), 2);

        let named = queue.reader("c1").unwrap();
        assert_eq!(named.size(), 2);
        assert_eq!(named.get(None).unwrap().unwrap().id, 1);

        // The default reader is gone, on disk and in memory.
        assert!(!temp_dir.path().join("test.read.").exists());
        assert!(matches!(
            queue.reader("").unwrap_err(),
            Error::UnknownReader { .. }
        ));
    }

    #[test]
    fn test_put_fails_after_close_path() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let queue = open(temp_dir.path(), clock.clone());
        queue.put("x", None).unwrap();
        queue.close().unwrap();

        // Reopening restores the put path.
        let queue = open(temp_dir.path(), clock);
        let (item, _) = queue.put("y", None).unwrap();
        assert_eq!(item.id, 2);
    }

    #[test]
    fn test_erase_removes_queue_files() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let queue = open(temp_dir.path(), clock.clone());
        let _reader = queue.reader("c1").unwrap();
        queue.put("x", None).unwrap();
        queue.erase().unwrap();

        let leftovers = std::fs::read_dir(temp_dir.path()).unwrap().count();
        assert_eq!(leftovers, 0);
    }
}
