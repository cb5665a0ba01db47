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

//! Append-only file with buffered writes and periodic durability syncs.
//!
//! ## Architecture
//!
//! Appenders stage whole frames in an in-memory buffer and receive a
//! [`SyncTicket`] that completes once those bytes are on disk. A background
//! worker thread drains the buffer on a fixed cadence:
//!
//! ```text
//! ┌──────────────┐    buffer +      ┌──────────────┐   write_all +   ┌──────────────┐
//! │   append()   │ ──  ticket  ──►  │ sync worker  │ ── sync_data ─► │  journal file │
//! │  (caller)    │                  │ (bg thread)  │                 │   on disk     │
//! └──────────────┘                  └──────────────┘                 └──────────────┘
//! ```
//!
//! With the cadence disabled (`period = None`) there is no worker; syncs
//! happen on [`flush`](PeriodicSyncFile::flush) and
//! [`close`](PeriodicSyncFile::close) only.
//!
//! ## Crash contract
//!
//! After `close()` returns, every appended byte is durable. After a crash,
//! only a suffix of the stream may be missing; bytes are never reordered
//! because a single mutex serializes write-and-sync passes. A failed sync
//! fails the affected tickets, is logged, and permanently fails subsequent
//! appends; the torn suffix is repaired by the next startup scan.

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::{
        Arc, Condvar, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam::channel::{Sender, bounded};
use tracing::{debug, error};

use crate::{Result, error::SyncFailedSnafu};

/// Completion handle for one appended frame: the put-durability future.
///
/// Cheap to clone; completes exactly once, when the sync covering the frame
/// succeeds or fails.
#[derive(Clone)]
pub struct SyncTicket {
    inner: Arc<TicketInner>,
}

struct TicketInner {
    state: Mutex<TicketState>,
    cond:  Condvar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TicketState {
    Pending,
    Done,
    Failed,
}

impl SyncTicket {
    fn new() -> Self {
        Self {
            inner: Arc::new(TicketInner {
                state: Mutex::new(TicketState::Pending),
                cond:  Condvar::new(),
            }),
        }
    }

    /// Block until the covering sync has run.
    pub fn wait(&self) -> Result<()> {
        let mut state = self.inner.state.lock().expect("ticket lock poisoned");
        while *state == TicketState::Pending {
            state = self.inner.cond.wait(state).expect("ticket lock poisoned");
        }
        match *state {
            TicketState::Failed => SyncFailedSnafu.fail(),
            _ => Ok(()),
        }
    }

    /// Block up to `timeout`; `None` if the sync has not run by then.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<()>> {
        let state = self.inner.state.lock().expect("ticket lock poisoned");
        let (state, result) = self
            .inner
            .cond
            .wait_timeout_while(state, timeout, |s| *s == TicketState::Pending)
            .expect("ticket lock poisoned");
        if result.timed_out() && *state == TicketState::Pending {
            return None;
        }
        Some(match *state {
            TicketState::Failed => SyncFailedSnafu.fail(),
            _ => Ok(()),
        })
    }

    pub fn is_complete(&self) -> bool {
        *self.inner.state.lock().expect("ticket lock poisoned") != TicketState::Pending
    }

    fn complete(&self, ok: bool) {
        let mut state = self.inner.state.lock().expect("ticket lock poisoned");
        if *state == TicketState::Pending {
            *state = if ok { TicketState::Done } else { TicketState::Failed };
            self.inner.cond.notify_all();
        }
    }
}

struct BufState {
    bytes:   Vec<u8>,
    tickets: Vec<SyncTicket>,
}

struct SyncShared {
    path:   PathBuf,
    /// Serializes write-and-sync passes so bytes never reorder.
    file:   Mutex<File>,
    buf:    Mutex<BufState>,
    failed: AtomicBool,
}

impl SyncShared {
    fn sync_now(&self) -> Result<()> {
        let mut file = self.file.lock().expect("sync file lock poisoned");
        let (bytes, tickets) = {
            let mut buf = self.buf.lock().expect("sync buffer lock poisoned");
            if buf.bytes.is_empty() {
                return Ok(());
            }
            (
                std::mem::take(&mut buf.bytes),
                std::mem::take(&mut buf.tickets),
            )
        };

        let outcome = file.write_all(&bytes).and_then(|()| file.sync_data());
        match outcome {
            Ok(()) => {
                for ticket in &tickets {
                    ticket.complete(true);
                }
                debug!(path = ?self.path, bytes = bytes.len(), "Synced");
                Ok(())
            }
            Err(err) => {
                self.failed.store(true, Ordering::Release);
                for ticket in &tickets {
                    ticket.complete(false);
                }
                Err(err.into())
            }
        }
    }
}

/// An append-only file whose durability syncs run on a bounded cadence.
pub(crate) struct PeriodicSyncFile {
    shared:  Arc<SyncShared>,
    // The channel carries no data; dropping the sender stops the worker.
    stop_tx: Option<Sender<()>>,
    worker:  Option<JoinHandle<()>>,
}

impl PeriodicSyncFile {
    /// Create a new empty file, failing if it already exists.
    pub fn create(path: &Path, period: Option<Duration>) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        Self::with_file(path, file, period)
    }

    /// Open an existing file for append.
    pub fn open(path: &Path, period: Option<Duration>) -> Result<Self> {
        let file = OpenOptions::new().append(true).open(path)?;
        Self::with_file(path, file, period)
    }

    fn with_file(path: &Path, file: File, period: Option<Duration>) -> Result<Self> {
        let shared = Arc::new(SyncShared {
            path:   path.to_path_buf(),
            file:   Mutex::new(file),
            buf:    Mutex::new(BufState {
                bytes:   Vec::new(),
                tickets: Vec::new(),
            }),
            failed: AtomicBool::new(false),
        });

        let (stop_tx, worker) = match period {
            None => (None, None),
            Some(period) => {
                let (tx, rx) = bounded::<()>(0);
                let worker_shared = Arc::clone(&shared);
                let handle = thread::Builder::new()
                    .name("journal-sync".into())
                    .spawn(move || {
                        use crossbeam::channel::RecvTimeoutError;
                        loop {
                            match rx.recv_timeout(period) {
                                Ok(()) => {}
                                Err(RecvTimeoutError::Timeout) => {
                                    if let Err(e) = worker_shared.sync_now() {
                                        error!(error = ?e, path = ?worker_shared.path, "Periodic sync failed");
                                    }
                                }
                                Err(RecvTimeoutError::Disconnected) => break,
                            }
                        }
                    })?;
                (Some(tx), Some(handle))
            }
        };

        Ok(Self {
            shared,
            stop_tx,
            worker,
        })
    }

    /// Stage a frame for the next sync. Returns the ticket that completes
    /// once the frame is durable.
    pub fn append(&self, frame: &[u8]) -> Result<SyncTicket> {
        if self.shared.failed.load(Ordering::Acquire) {
            return SyncFailedSnafu.fail();
        }
        let ticket = SyncTicket::new();
        let mut buf = self.shared.buf.lock().expect("sync buffer lock poisoned");
        buf.bytes.extend_from_slice(frame);
        buf.tickets.push(ticket.clone());
        Ok(ticket)
    }

    /// Force a write-and-sync pass now, completing pending tickets.
    pub fn flush(&self) -> Result<()> { self.shared.sync_now() }

    /// Flush, fsync file metadata, and stop the worker. After this returns
    /// normally, every appended byte is durable.
    pub fn close(mut self) -> Result<()> {
        self.stop_tx.take();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        self.shared.sync_now()?;
        self.shared
            .file
            .lock()
            .expect("sync file lock poisoned")
            .sync_all()?;
        Ok(())
    }
}

impl Drop for PeriodicSyncFile {
    fn drop(&mut self) {
        // Best effort: stop the worker and push out whatever is buffered.
        self.stop_tx.take();
        if self.worker.take().is_some() {
            let _ = self.shared.sync_now();
        }
    }
}
