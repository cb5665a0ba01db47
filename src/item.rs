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

//! Queue item types and on-disk record format definitions.
//!
//! ## On-Disk Writer Record Format
//!
//! Records are stored contiguously in writer files with the following
//! little-endian binary layout:
//!
//! ```text
//! ┌──────────┬─────────┬──────────────┬─────────────────┬──────────┬───────────┬───────────┐
//! │ kind(1B) │ id (8B) │ add_time(8B) │ expire_time(8B) │ len (4B) │  payload  │ crc32(4B) │
//! └──────────┴─────────┴──────────────┴─────────────────┴──────────┴───────────┴───────────┘
//! ```
//!
//! - **kind**: record discriminant; unknown kinds are rejected as corruption
//! - **expire_time**: milliseconds since epoch, 0 = never expires
//! - **crc32**: checksum over everything before it (kind through payload)
//!
//! Reader checkpoint records use the same framing discipline:
//!
//! ```text
//! ReadHead: kind(1B) | id (8B)                    | crc32(4B)
//! ReadDone: kind(1B) | count (4B) | count × id 8B | crc32(4B)
//! ```
//!
//! The length prefix plus trailing checksum make a truncated tail
//! detectable: either the frame is short, or the checksum fails.

use bytes::Bytes;

/// A single queue item, immutable once journaled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    /// Monotonically increasing id assigned at put time. Ids are unique
    /// within a queue; the first id is 1.
    pub id: u64,

    /// Wall-clock milliseconds when the item was put.
    pub add_time: u64,

    /// Optional wall-clock millisecond deadline after which the item is
    /// dropped instead of delivered.
    pub expire_time: Option<u64>,

    /// The opaque payload.
    pub payload: Bytes,
}

impl QueueItem {
    /// True if the item's expiry deadline has passed at `now_ms`.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        match self.expire_time {
            Some(deadline) => deadline <= now_ms,
            None => false,
        }
    }
}

/// A record in a writer journal file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriterRecord {
    Put(QueueItem),
}

/// A record in a reader checkpoint file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderRecord {
    /// All ids strictly below this value are fully consumed.
    ReadHead(u64),
    /// Ids at or above the head that are individually acknowledged.
    ReadDone(Vec<u64>),
}

/// Writer record kind byte for `Put`.
pub(crate) const KIND_PUT: u8 = 1;

/// Reader record kind byte for `ReadHead`.
pub(crate) const KIND_READ_HEAD: u8 = 1;

/// Reader record kind byte for `ReadDone`.
pub(crate) const KIND_READ_DONE: u8 = 2;

/// Fixed bytes of a put frame before the payload: kind + id + add_time +
/// expire_time + length prefix.
pub(crate) const PUT_HEADER_SIZE: usize = 1 + 8 + 8 + 8 + 4;

/// Size of the trailing CRC32 in every frame.
pub(crate) const FRAME_CRC_SIZE: usize = 4;

/// Payloads above this size are never written, so a length prefix beyond it
/// can only be garbage.
pub(crate) const MAX_PAYLOAD_LEN: usize = 64 * 1024 * 1024;

/// Total on-disk size of a put record for a payload of `payload_len` bytes.
#[inline]
pub(crate) const fn put_frame_size(payload_len: usize) -> usize {
    PUT_HEADER_SIZE + payload_len + FRAME_CRC_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_frame_size() {
        assert_eq!(put_frame_size(0), 33);
        assert_eq!(put_frame_size(10), 43);
        assert_eq!(put_frame_size(512), 545);
    }

    #[test]
    fn test_is_expired() {
        let item = QueueItem {
            id:          1,
            add_time:    1_000,
            expire_time: Some(2_000),
            payload:     Bytes::from_static(b"x"),
        };
        assert!(!item.is_expired(1_999));
        assert!(item.is_expired(2_000));
        assert!(item.is_expired(2_001));

        let forever = QueueItem {
            expire_time: None,
            ..item
        };
        assert!(!forever.is_expired(u64::MAX));
    }
}
