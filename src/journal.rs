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

//! The on-disk journal for one queue: a run of writer files plus one
//! checkpoint file per reader.
//!
//! ## Responsibilities
//!
//! - **Startup recovery**: classify the directory, scan every writer file,
//!   truncate a torn tail on the last file, refuse interior corruption,
//!   replay reader checkpoints and clamp them to what actually exists
//! - **Rotation**: close the active writer file once it has reached the
//!   size limit and open a fresh one named by the current millisecond
//! - **Id resolution**: map an item id to the writer file holding it
//! - **Checkpointing**: atomically rewrite each reader's `(head, done)`
//!   state (write temp sibling, fsync, rename)
//! - **Reclamation**: delete writer files every live reader has passed
//!
//! A reader's `head` is the lowest unconsumed id: everything strictly below
//! it is consumed, the head itself is not. The done-set holds ids at or
//! above the head that were acknowledged out of order.

use std::{
    collections::HashMap,
    fs::{self, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;
use snafu::{OptionExt, ensure};
use tracing::{debug, info, warn};

use crate::{
    Error, Result,
    clock::Clock,
    config::QueueConfig,
    error::{ClosedSnafu, CorruptJournalSnafu, InvalidReaderNameSnafu, UnknownReaderSnafu},
    id_set::ItemIdSet,
    item::{QueueItem, WriterRecord},
    journal_file::{Frame, JournalReader, JournalWriter, encode_checkpoint, read_checkpoint},
    path::{
        TEMP_SUFFIX, checkpoint_file_path, is_valid_reader_name, scan_queue_dir, writer_file_path,
    },
    sync_file::SyncTicket,
};

/// Per-file summary used for id→file resolution and reclamation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub path:        PathBuf,
    /// Smallest id written to the file; for the active file, the id the
    /// next record will take if none has been written yet.
    pub head_id:     u64,
    /// Largest id written to the file; 0 while the file is being written.
    pub tail_id:     u64,
    pub item_count:  u64,
    pub total_bytes: u64,
}

/// One reader's acknowledgement state.
#[derive(Debug, Clone)]
pub(crate) struct ReaderState {
    /// Lowest unconsumed id; all ids strictly below are consumed. Ids start
    /// at 1, so a fresh reader sits at head 1.
    pub head: u64,
    /// Acknowledged ids at or above the head.
    pub done: ItemIdSet,
}

impl Default for ReaderState {
    fn default() -> Self {
        Self {
            head: 1,
            done: ItemIdSet::new(),
        }
    }
}

impl ReaderState {
    pub fn commit(&mut self, id: u64) {
        if id == self.head {
            self.head += 1;
            while self.done.remove(self.head) {
                self.head += 1;
            }
        } else if id > self.head {
            self.done.insert(id);
        }
    }

    pub fn is_consumed(&self, id: u64) -> bool { id < self.head || self.done.contains(id) }
}

/// Running counters for the file currently being written.
struct ActiveFile {
    path:       PathBuf,
    first_id:   Option<u64>,
    last_id:    u64,
    item_count: u64,
}

impl ActiveFile {
    fn fresh(path: PathBuf) -> Self {
        Self {
            path,
            first_id: None,
            last_id: 0,
            item_count: 0,
        }
    }
}

/// The set of writer files and reader checkpoints for one queue.
pub struct Journal {
    dir:           PathBuf,
    name:          String,
    max_file_size: u64,
    sync_period:   Option<Duration>,
    clock:         Arc<dyn Clock>,
    /// Closed writer files, ascending by head id.
    files:         Vec<FileInfo>,
    /// `None` after close or erase.
    writer:        Option<JournalWriter>,
    active:        ActiveFile,
    next_id:       u64,
    readers:       HashMap<String, ReaderState>,
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("dir", &self.dir)
            .field("name", &self.name)
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}

impl Journal {
    /// Open (or create) the journal rooted at `config.dir`. Returns the
    /// journal plus every item currently on disk, in id order, for
    /// replaying into in-memory reader queues.
    pub fn open(config: &QueueConfig, clock: Arc<dyn Clock>) -> Result<(Self, Vec<QueueItem>)> {
        fs::create_dir_all(&config.dir)?;
        let scan = scan_queue_dir(&config.dir, &config.name)?;

        let mut files = Vec::new();
        let mut items: Vec<QueueItem> = Vec::new();
        let mut last_id = 0u64;
        let mut last_file: Option<(PathBuf, Option<u64>, u64, u64, u64)> = None;

        let writer_count = scan.writers.len();
        for (idx, (_, path)) in scan.writers.iter().enumerate() {
            let is_last = idx + 1 == writer_count;
            let mut reader = JournalReader::open(path)?;
            let mut first_id = None;
            let mut file_last = 0u64;
            let mut count = 0u64;

            loop {
                let offset = reader.offset();
                match reader.read_next()? {
                    Frame::Record(WriterRecord::Put(item)) => {
                        ensure!(
                            item.id > last_id,
                            CorruptJournalSnafu {
                                path: path.clone(),
                                offset,
                            }
                        );
                        first_id.get_or_insert(item.id);
                        file_last = item.id;
                        last_id = item.id;
                        count += 1;
                        items.push(item);
                    }
                    Frame::End => break,
                    Frame::Torn { offset } => {
                        if is_last {
                            warn!(path = ?path, offset, "Truncating torn journal tail");
                            truncate_file(path, offset)?;
                            break;
                        }
                        return CorruptJournalSnafu {
                            path: path.clone(),
                            offset,
                        }
                        .fail();
                    }
                }
            }

            let total_bytes = reader.offset();
            if is_last {
                last_file = Some((path.clone(), first_id, file_last, count, total_bytes));
            } else if count == 0 {
                // A closed file with no records only appears after a crash
                // between rotation steps.
                debug!(path = ?path, "Removing empty writer file");
                fs::remove_file(path)?;
            } else {
                files.push(FileInfo {
                    path: path.clone(),
                    head_id: first_id.unwrap_or(0),
                    tail_id: file_last,
                    item_count: count,
                    total_bytes,
                });
            }
        }

        let next_id = last_id + 1;

        let (writer, active) = match last_file {
            Some((path, first_id, file_last, count, bytes)) => {
                let writer = JournalWriter::open(&path, bytes, config.sync_period)?;
                (
                    writer,
                    ActiveFile {
                        path,
                        first_id,
                        last_id: file_last,
                        item_count: count,
                    },
                )
            }
            None => create_writer_file(&config.dir, &config.name, clock.as_ref(), config.sync_period)?,
        };

        let mut journal = Self {
            dir: config.dir.clone(),
            name: config.name.clone(),
            max_file_size: config.max_file_size,
            sync_period: config.sync_period,
            clock,
            files,
            writer: Some(writer),
            active,
            next_id,
            readers: HashMap::new(),
        };

        journal.load_readers(&scan.checkpoints)?;

        info!(
            queue = %journal.name,
            dir = ?journal.dir,
            next_id = journal.next_id,
            files = journal.files.len() + 1,
            readers = journal.readers.len(),
            "Journal opened"
        );

        Ok((journal, items))
    }

    fn load_readers(&mut self, checkpoints: &[(String, PathBuf)]) -> Result<()> {
        let tail = self.next_id - 1;
        let any_named = checkpoints.iter().any(|(name, _)| !name.is_empty());

        for (name, path) in checkpoints {
            if name.is_empty() && any_named {
                // Named readers exist, so the default reader must not.
                info!(path = ?path, "Removing stale default reader checkpoint");
                fs::remove_file(path)?;
                continue;
            }

            let (mut head, done_ids) = read_checkpoint(path)?;
            // Head 0 and head 1 both mean "nothing consumed"; normalize so
            // contiguous-commit arithmetic starts at the first real id.
            head = head.max(1);
            // A head may legitimately sit one past the tail (everything
            // consumed); anything beyond that is clamped back onto the
            // greatest existing id, which then replays.
            if head > tail + 1 {
                warn!(reader = %name, head, tail, "Clamping reader head to journal tail");
                head = tail.max(1);
            }
            let done: ItemIdSet = done_ids
                .into_iter()
                .filter(|id| *id >= head && *id <= tail)
                .collect();
            self.readers
                .insert(name.clone(), ReaderState { head, done });
        }

        if self.readers.is_empty() {
            self.readers
                .insert(String::new(), ReaderState::default());
            self.checkpoint_reader("")?;
            debug!(queue = %self.name, "Created implicit default reader");
        }

        Ok(())
    }

    /// Append one item. Rotates the writer file first if the current one
    /// has reached the size limit. The ticket completes once the record is
    /// durable.
    pub fn put(
        &mut self,
        payload: Bytes,
        add_time: u64,
        expire_time: Option<u64>,
    ) -> Result<(QueueItem, SyncTicket)> {
        let position = self.writer.as_ref().context(ClosedSnafu)?.position();
        if position >= self.max_file_size {
            self.rotate()?;
        }

        let item = QueueItem {
            id: self.next_id,
            add_time,
            expire_time,
            payload,
        };
        let ticket = self
            .writer
            .as_mut()
            .context(ClosedSnafu)?
            .put(&item)?;

        self.next_id += 1;
        self.active.first_id.get_or_insert(item.id);
        self.active.last_id = item.id;
        self.active.item_count += 1;

        Ok((item, ticket))
    }

    fn rotate(&mut self) -> Result<()> {
        let (new_writer, new_active) =
            create_writer_file(&self.dir, &self.name, self.clock.as_ref(), self.sync_period)?;

        let old_writer = self.writer.replace(new_writer).context(ClosedSnafu)?;
        let old_bytes = old_writer.position();
        old_writer.close()?;

        let old = std::mem::replace(&mut self.active, new_active);
        self.files.push(FileInfo {
            path:        old.path,
            head_id:     old.first_id.unwrap_or(0),
            tail_id:     old.last_id,
            item_count:  old.item_count,
            total_bytes: old_bytes,
        });

        info!(queue = %self.name, file = ?self.active.path, "Rotated writer file");
        Ok(())
    }

    fn active_info(&self) -> FileInfo {
        FileInfo {
            path:        self.active.path.clone(),
            head_id:     self.active.first_id.unwrap_or(self.next_id),
            tail_id:     0,
            item_count:  0,
            total_bytes: 0,
        }
    }

    /// The writer file logically containing `id`.
    ///
    /// Id 0 resolves to nothing; any other id below the first file's head
    /// resolves to the first file (callers chasing ids from the past start
    /// at the beginning of the journal). Otherwise this is the last file
    /// whose head is at or below `id`. The active file is reported with
    /// zero tail/count/bytes while it is still being written.
    pub fn file_info_for_id(&self, id: u64) -> Option<FileInfo> {
        if id == 0 {
            return None;
        }

        let active = self.active_info();
        let mut best: Option<&FileInfo> = None;
        for info in &self.files {
            if info.head_id <= id {
                best = Some(info);
            } else {
                break;
            }
        }
        if active.head_id <= id {
            return Some(active);
        }
        match best {
            Some(info) => Some(info.clone()),
            // Below the first file's head: start of the journal.
            None => Some(self.files.first().cloned().unwrap_or(active)),
        }
    }

    /// Get or create a named reader. Creating the first named reader
    /// absorbs the default reader's state and deletes its checkpoint file.
    /// Returns true if the reader already existed.
    pub(crate) fn create_reader(&mut self, name: &str) -> Result<bool> {
        ensure!(
            !name.is_empty() && is_valid_reader_name(name),
            InvalidReaderNameSnafu { name }
        );
        if self.readers.contains_key(name) {
            return Ok(true);
        }

        if let Some(default_state) = self.readers.remove("") {
            self.readers.insert(name.to_string(), default_state);
            let default_path = checkpoint_file_path(&self.dir, &self.name, "");
            if default_path.exists() {
                fs::remove_file(&default_path)?;
            }
            self.checkpoint_reader(name)?;
            info!(reader = %name, "First named reader absorbed the default reader");
        } else {
            // Later readers only see items put after their creation.
            self.readers.insert(
                name.to_string(),
                ReaderState {
                    head: self.next_id,
                    done: ItemIdSet::new(),
                },
            );
            self.checkpoint_reader(name)?;
            info!(reader = %name, head = self.next_id, "Created reader");
        }
        Ok(false)
    }

    pub(crate) fn commit_read(&mut self, name: &str, id: u64) -> Result<()> {
        let state = self
            .readers
            .get_mut(name)
            .context(UnknownReaderSnafu { name })?;
        state.commit(id);
        Ok(())
    }

    pub(crate) fn reader_state(&self, name: &str) -> Option<&ReaderState> { self.readers.get(name) }

    pub fn reader_names(&self) -> Vec<String> { self.readers.keys().cloned().collect() }

    /// A reader's `(head, done-set)`, if it exists.
    pub fn reader_position(&self, name: &str) -> Option<(u64, Vec<u64>)> {
        self.readers
            .get(name)
            .map(|state| (state.head, state.done.iter().collect()))
    }

    /// Durably record one reader's state: write a temp sibling, fsync,
    /// rename over the target.
    pub fn checkpoint_reader(&self, name: &str) -> Result<()> {
        let state = self.readers.get(name).context(UnknownReaderSnafu { name })?;
        let image = encode_checkpoint(state.head, state.done.iter());

        let target = checkpoint_file_path(&self.dir, &self.name, name);
        let temp = temp_sibling(&target);
        let mut file = File::create(&temp)?;
        file.write_all(&image)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp, &target)?;

        debug!(reader = %name, head = state.head, done = state.done.len(), "Checkpointed reader");
        Ok(())
    }

    /// Flush every reader's state, then reclaim writer files every live
    /// reader has passed.
    pub fn checkpoint(&mut self) -> Result<()> {
        for name in self.reader_names() {
            self.checkpoint_reader(&name)?;
        }
        self.reclaim()
    }

    fn reclaim(&mut self) -> Result<()> {
        let Some(min_head) = self.readers.values().map(|r| r.head).min() else {
            return Ok(());
        };

        let mut kept = Vec::with_capacity(self.files.len());
        for info in self.files.drain(..) {
            if info.tail_id < min_head {
                info!(path = ?info.path, tail_id = info.tail_id, min_head, "Reclaiming writer file");
                fs::remove_file(&info.path)?;
            } else {
                kept.push(info);
            }
        }
        self.files = kept;
        Ok(())
    }

    /// Force a durability sync of the active writer file now.
    pub fn flush(&self) -> Result<()> {
        match &self.writer {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }

    /// Flush and stop the sync worker. Reader state is not checkpointed
    /// here; callers decide that. Subsequent puts fail.
    pub fn close(&mut self) -> Result<()> {
        match self.writer.take() {
            Some(writer) => writer.close(),
            None => Ok(()),
        }
    }

    /// Delete every file owned by this journal. Files belonging to other
    /// queues are left alone. Subsequent puts fail.
    pub fn erase(&mut self) -> Result<()> {
        // The writer may already be unable to sync; erasing proceeds anyway.
        if let Some(writer) = self.writer.take()
            && let Err(e) = writer.close()
        {
            warn!(error = %e, "Ignoring writer close failure during erase");
        }

        for info in self.files.drain(..) {
            fs::remove_file(&info.path)?;
        }
        if self.active.path.exists() {
            fs::remove_file(&self.active.path)?;
        }
        for (reader_name, _) in self.readers.drain() {
            let path = checkpoint_file_path(&self.dir, &self.name, &reader_name);
            if path.exists() {
                fs::remove_file(&path)?;
            }
        }

        info!(queue = %self.name, "Erased journal");
        Ok(())
    }

    pub fn next_id(&self) -> u64 { self.next_id }

    /// Total bytes across all writer files, including not-yet-synced bytes.
    pub fn total_bytes(&self) -> u64 {
        let active = self.writer.as_ref().map_or(0, JournalWriter::position);
        self.files.iter().map(|f| f.total_bytes).sum::<u64>() + active
    }

    /// Closed files plus the active one.
    pub fn file_count(&self) -> usize { self.files.len() + 1 }

    pub fn queue_name(&self) -> &str { &self.name }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(TEMP_SUFFIX);
    path.with_file_name(name)
}

fn truncate_file(path: &Path, len: u64) -> Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(len)?;
    file.sync_all()?;
    Ok(())
}

/// Create a new writer file named by the current millisecond, bumping the
/// millisecond while the name collides.
fn create_writer_file(
    dir: &Path,
    queue: &str,
    clock: &dyn Clock,
    period: Option<Duration>,
) -> Result<(JournalWriter, ActiveFile)> {
    let mut ms = clock.now_ms();
    loop {
        let path = writer_file_path(dir, queue, ms);
        match JournalWriter::create(&path, period) {
            Ok(writer) => {
                debug!(path = ?path, "Created writer file");
                return Ok((writer, ActiveFile::fresh(path)));
            }
            Err(Error::Io { source, .. })
                if source.kind() == std::io::ErrorKind::AlreadyExists =>
            {
                ms += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::clock::ManualClock;

    fn config(dir: &Path, max_file_size: u64) -> QueueConfig {
        QueueConfig {
            dir: dir.to_path_buf(),
            name: "test".to_string(),
            max_file_size,
            sync_period: None,
        }
    }

    fn open(
        dir: &Path,
        max_file_size: u64,
        clock: Arc<ManualClock>,
    ) -> (Journal, Vec<QueueItem>) {
        Journal::open(&config(dir, max_file_size), clock).unwrap()
    }

    fn put(journal: &mut Journal, clock: &ManualClock, payload: &[u8]) -> QueueItem {
        let (item, _ticket) = journal
            .put(Bytes::copy_from_slice(payload), clock.now_ms(), None)
            .unwrap();
        item
    }

    #[test]
    fn test_fresh_journal_assigns_ids_from_one() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let (mut journal, items) = open(temp_dir.path(), 16 * 1024 * 1024, clock.clone());
        assert!(items.is_empty());

        assert_eq!(put(&mut journal, &clock, b"a").id, 1);
        assert_eq!(put(&mut journal, &clock, b"b").id, 2);
        assert_eq!(journal.next_id(), 3);
    }

    #[test]
    fn test_fresh_journal_creates_default_reader_file() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let (journal, _) = open(temp_dir.path(), 16 * 1024 * 1024, clock);

        assert_eq!(journal.reader_names(), vec![String::new()]);
        assert!(temp_dir.path().join("test.read.").exists());
    }

    #[test]
    fn test_rotation_by_size() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        // Two 512-byte payload records exceed 1 KiB, so each file takes two.
        let (mut journal, _) = open(temp_dir.path(), 1024, clock.clone());

        for _ in 0..5 {
            put(&mut journal, &clock, &[0u8; 512]);
            clock.advance(1);
        }

        assert_eq!(journal.file_count(), 3);

        let f1 = journal.file_info_for_id(1).unwrap();
        assert_eq!((f1.head_id, f1.tail_id, f1.item_count), (1, 2, 2));
        assert_eq!(journal.file_info_for_id(2).unwrap(), f1);

        let f2 = journal.file_info_for_id(3).unwrap();
        assert_eq!((f2.head_id, f2.tail_id, f2.item_count), (3, 4, 2));

        // The active file is still being written: zero tail/count/bytes.
        let f3 = journal.file_info_for_id(5).unwrap();
        assert_eq!((f3.head_id, f3.tail_id, f3.item_count, f3.total_bytes), (5, 0, 0, 0));
    }

    #[test]
    fn test_file_info_for_id_edges() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let (mut journal, _) = open(temp_dir.path(), 1024, clock.clone());

        // Id 0 is never resolvable, even on an empty journal.
        assert!(journal.file_info_for_id(0).is_none());
        // An empty active file is returned for its own prospective head.
        let info = journal.file_info_for_id(1).unwrap();
        assert_eq!((info.head_id, info.tail_id), (1, 0));

        for _ in 0..4 {
            put(&mut journal, &clock, &[0u8; 512]);
            clock.advance(1);
        }

        // Ids below the first file's head resolve to the first file.
        let first = journal.file_info_for_id(1).unwrap();
        assert_eq!(first.head_id, 1);

        // Monotone: resolved head ids never decrease as the id grows.
        let mut last_head = 0;
        for id in 1..=4 {
            let head = journal.file_info_for_id(id).unwrap().head_id;
            assert!(head >= last_head);
            last_head = head;
        }
    }

    #[test]
    fn test_reopen_recovers_ids_and_files() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        {
            let (mut journal, _) = open(temp_dir.path(), 1024, clock.clone());
            for _ in 0..5 {
                put(&mut journal, &clock, &[7u8; 512]);
                clock.advance(1);
            }
            journal.flush().unwrap();
            journal.close().unwrap();
        }

        let (mut journal, items) = open(temp_dir.path(), 1024, clock.clone());
        assert_eq!(items.iter().map(|i| i.id).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
        assert_eq!(journal.next_id(), 6);
        assert_eq!(put(&mut journal, &clock, b"next").id, 6);
    }

    #[test]
    fn test_torn_tail_is_truncated_and_id_reused() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(5_000));
        let writer_path;
        {
            let (mut journal, _) = open(temp_dir.path(), 16 * 1024 * 1024, clock.clone());
            put(&mut journal, &clock, b"first");
            put(&mut journal, &clock, b"second");
            journal.flush().unwrap();
            writer_path = journal.file_info_for_id(1).unwrap().path;
            journal.close().unwrap();
        }

        // Tear one byte off the end of the last record.
        let data = fs::read(&writer_path).unwrap();
        fs::write(&writer_path, &data[..data.len() - 1]).unwrap();

        let (mut journal, items) = open(temp_dir.path(), 16 * 1024 * 1024, clock.clone());
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, 1);

        // The torn id is reused and overwrites the torn frame.
        let item = put(&mut journal, &clock, b"hi");
        assert_eq!(item.id, 2);
        journal.flush().unwrap();
        journal.close().unwrap();

        let (_, items) = open(temp_dir.path(), 16 * 1024 * 1024, clock);
        assert_eq!(
            items
                .iter()
                .map(|i| (i.id, i.payload.clone()))
                .collect::<Vec<_>>(),
            vec![(1, Bytes::from_static(b"first")), (2, Bytes::from_static(b"hi"))]
        );
    }

    #[test]
    fn test_interior_corruption_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let first_path;
        {
            let (mut journal, _) = open(temp_dir.path(), 1024, clock.clone());
            for _ in 0..4 {
                put(&mut journal, &clock, &[1u8; 512]);
                clock.advance(1);
            }
            journal.flush().unwrap();
            first_path = journal.file_info_for_id(1).unwrap().path;
            journal.close().unwrap();
        }

        // Corrupt a byte in the middle of the *first* (non-last) file.
        let mut data = fs::read(&first_path).unwrap();
        data[40] ^= 0xFF;
        fs::write(&first_path, &data).unwrap();

        let err = Journal::open(&config(temp_dir.path(), 1024), clock).unwrap_err();
        assert!(matches!(err, Error::CorruptJournal { .. }));
    }

    #[test]
    fn test_checkpoint_contents() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let (mut journal, _) = open(temp_dir.path(), 16 * 1024 * 1024, clock.clone());
        for _ in 0..6 {
            put(&mut journal, &clock, b"x");
        }

        journal.create_reader("client1").unwrap();
        journal.create_reader("client2").unwrap();
        // client1 starts from the absorbed default; client2 was created
        // afterwards and only sees the future.
        assert_eq!(journal.reader_position("client1"), Some((1, vec![])));
        assert_eq!(journal.reader_position("client2"), Some((7, vec![])));

        journal.commit_read("client1", 1).unwrap();
        journal.commit_read("client1", 3).unwrap();
        assert_eq!(journal.reader_position("client1"), Some((2, vec![3])));

        journal.checkpoint().unwrap();

        let (head, done) =
            read_checkpoint(&temp_dir.path().join("test.read.client1")).unwrap();
        assert_eq!((head, done), (2, vec![3]));
    }

    #[test]
    fn test_commit_absorbs_contiguous_done_ids() {
        let mut state = ReaderState {
            head: 100,
            done: ItemIdSet::new(),
        };
        state.commit(102);
        state.commit(103);
        assert_eq!(state.head, 100);

        state.commit(100);
        assert_eq!(state.head, 101);
        state.commit(101);
        assert_eq!(state.head, 104);
        assert!(state.done.is_empty());

        assert!(state.is_consumed(103));
        assert!(!state.is_consumed(104));
    }

    #[test]
    fn test_head_clamped_to_existing_tail() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let clock = Arc::new(ManualClock::new(1_000));
        {
            let (mut journal, _) = open(dir, 16 * 1024 * 1024, clock.clone());
            for _ in 0..3 {
                put(&mut journal, &clock, b"x");
            }
            journal.flush().unwrap();
            journal.close().unwrap();
        }

        // Fabricate checkpoints claiming more than exists on disk.
        fs::write(
            dir.join("test.read.ahead"),
            encode_checkpoint(7, [4, 9].into_iter()),
        )
        .unwrap();
        fs::write(
            dir.join("test.read.behind"),
            encode_checkpoint(2, [3, 5].into_iter()),
        )
        .unwrap();

        let (journal, _) = open(dir, 16 * 1024 * 1024, clock);
        // Greatest existing id is 3: the runaway head comes back to it and
        // its done-set holds nothing real.
        assert_eq!(journal.reader_position("ahead"), Some((3, vec![])));
        // The sane head survives; done ids past the tail are dropped.
        assert_eq!(journal.reader_position("behind"), Some((2, vec![3])));
    }

    #[test]
    fn test_reclamation_waits_for_slowest_reader() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let (mut journal, _) = open(temp_dir.path(), 1024, clock.clone());
        for _ in 0..5 {
            put(&mut journal, &clock, &[9u8; 512]);
            clock.advance(1);
        }
        journal.create_reader("r").unwrap();

        let f1 = journal.file_info_for_id(1).unwrap();
        let f2 = journal.file_info_for_id(3).unwrap();

        // Consuming ids 1 and 2 moves the head past F1's tail only.
        journal.commit_read("r", 1).unwrap();
        journal.commit_read("r", 2).unwrap();
        journal.checkpoint().unwrap();

        assert!(!f1.path.exists());
        assert!(f2.path.exists());
        assert_eq!(journal.file_count(), 2);
    }

    #[test]
    fn test_startup_discovery_suppresses_default_among_named() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let clock = Arc::new(ManualClock::new(9_000));

        for name in ["test.read.client1", "test.read.client2", "test.read."] {
            fs::write(dir.join(name), encode_checkpoint(0, std::iter::empty())).unwrap();
        }
        fs::write(dir.join("test.read.client1~~"), b"garbage").unwrap();
        fs::write(dir.join("test.readmenot"), b"not ours").unwrap();

        let (journal, _) = open(dir, 16 * 1024 * 1024, clock);

        let mut names = journal.reader_names();
        names.sort_unstable();
        assert_eq!(names, vec!["client1".to_string(), "client2".to_string()]);

        assert!(!dir.join("test.read.").exists());
        assert!(!dir.join("test.read.client1~~").exists());
        assert!(dir.join("test.readmenot").exists());
    }

    #[test]
    fn test_erase_removes_only_owned_files() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let clock = Arc::new(ManualClock::new(1_000));
        fs::write(dir.join("other.5"), b"foreign").unwrap();

        let (mut journal, _) = open(dir, 1024, clock.clone());
        for _ in 0..3 {
            put(&mut journal, &clock, &[2u8; 512]);
            clock.advance(1);
        }
        journal.checkpoint().unwrap();
        journal.erase().unwrap();

        let remaining: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(remaining, vec!["other.5".to_string()]);
    }

    #[test]
    fn test_writer_name_collision_bumps_millisecond() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        // Rotations never advance the frozen clock, so names must bump.
        let (mut journal, _) = open(temp_dir.path(), 1024, clock.clone());
        for _ in 0..6 {
            put(&mut journal, &clock, &[3u8; 512]);
        }
        assert_eq!(journal.file_count(), 3);
    }

    #[test]
    fn test_invalid_reader_names_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let (mut journal, _) = open(temp_dir.path(), 1024, clock);

        assert!(matches!(
            journal.create_reader("bad/name").unwrap_err(),
            Error::InvalidReaderName { .. }
        ));
        assert!(matches!(
            journal.create_reader("bad~~name").unwrap_err(),
            Error::InvalidReaderName { .. }
        ));
    }
}
