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

//! Durable, multi-reader, in-process queue.
//!
//! Two composable primitives:
//! - [`ConcurrentBlockingQueue`]: an unbounded, lock-minimizing FIFO where
//!   consumers may wait (bounded or indefinitely) for items
//! - [`JournaledQueue`]: a fan-out queue backed by an append-only on-disk
//!   journal, with one independently advancing checkpointed reader per name
//!   and open/commit/abort read semantics
//!
//! Features:
//! - Length-prefixed, CRC32-checksummed record frames; a torn tail is
//!   truncated on startup, interior corruption refuses to start
//! - Writer file rotation by size with reclamation once every reader has
//!   passed a file
//! - Buffered appends with periodic durability syncs; every put returns a
//!   ticket completing when the record is on disk
//! - Injectable clock for deterministic tests

mod crc;
mod journal_file;
mod path;
mod sync_file;

pub mod blocking_queue;
pub mod builder;
pub mod clock;
pub mod config;
pub mod error;
pub mod id_set;
pub mod item;
pub mod journal;
pub mod metrics;
pub mod queue;

pub use blocking_queue::{ConcurrentBlockingQueue, WaitHandle};
pub use builder::QueueBuilder;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::QueueConfig;
pub use error::{Error, Result};
pub use id_set::ItemIdSet;
pub use item::{QueueItem, ReaderRecord, WriterRecord};
pub use journal::{FileInfo, Journal};
pub use queue::{JournaledQueue, QueueReader};
pub use sync_file::SyncTicket;
