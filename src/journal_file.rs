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

//! Record codecs for writer journal files and reader checkpoint files.
//!
//! The writer side stages framed records through a [`PeriodicSyncFile`];
//! the reader side scans sequentially and classifies every position as a
//! record, a clean end of file, or a torn frame. Torn frames carry the
//! offset of the last intact boundary so the caller can truncate there.
//!
//! Checkpoint files hold `ReadHead`/`ReadDone` records with the same
//! framing; the effective reader state is the last record of each kind.

use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
    time::Duration,
};

use bytes::Bytes;
use tracing::warn;

use crate::{
    Result,
    crc::{frame_crc, verify_frame_crc},
    item::{
        FRAME_CRC_SIZE, KIND_PUT, KIND_READ_DONE, KIND_READ_HEAD, MAX_PAYLOAD_LEN, PUT_HEADER_SIZE,
        QueueItem, ReaderRecord, WriterRecord, put_frame_size,
    },
    sync_file::{PeriodicSyncFile, SyncTicket},
};

/// Encode a `Put` record into its on-disk frame.
pub(crate) fn encode_put(item: &QueueItem) -> Vec<u8> {
    let mut buf = Vec::with_capacity(put_frame_size(item.payload.len()));
    buf.push(KIND_PUT);
    buf.extend_from_slice(&item.id.to_le_bytes());
    buf.extend_from_slice(&item.add_time.to_le_bytes());
    buf.extend_from_slice(&item.expire_time.unwrap_or(0).to_le_bytes());
    buf.extend_from_slice(&(item.payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&item.payload);
    let crc = frame_crc(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf
}

/// Append side of one writer journal file.
pub(crate) struct JournalWriter {
    file:     PeriodicSyncFile,
    position: u64,
}

impl JournalWriter {
    /// Create a new empty writer file, failing if it exists.
    pub fn create(path: &Path, period: Option<Duration>) -> Result<Self> {
        Ok(Self {
            file:     PeriodicSyncFile::create(path, period)?,
            position: 0,
        })
    }

    /// Open an existing writer file for append. `position` is the byte
    /// length of the intact prefix found by the startup scan.
    pub fn open(path: &Path, position: u64, period: Option<Duration>) -> Result<Self> {
        Ok(Self {
            file: PeriodicSyncFile::open(path, period)?,
            position,
        })
    }

    /// Append a framed `Put` record. The ticket completes after the next
    /// sync covering the record.
    pub fn put(&mut self, item: &QueueItem) -> Result<SyncTicket> {
        let frame = encode_put(item);
        let ticket = self.file.append(&frame)?;
        self.position += frame.len() as u64;
        Ok(ticket)
    }

    /// Bytes appended so far, including not-yet-synced bytes.
    pub fn position(&self) -> u64 { self.position }

    pub fn flush(&self) -> Result<()> { self.file.flush() }

    pub fn close(self) -> Result<()> { self.file.close() }
}

/// One scan step of a writer journal file.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Frame {
    Record(WriterRecord),
    /// Clean end of file: the previous record ended exactly at EOF.
    End,
    /// An unreadable frame starting at `offset`: short, unknown kind, or
    /// checksum mismatch. The bytes before `offset` are intact.
    Torn { offset: u64 },
}

/// Sequential scanner over a writer journal file.
pub(crate) struct JournalReader {
    file:   BufReader<File>,
    offset: u64,
}

impl JournalReader {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            file:   BufReader::new(File::open(path)?),
            offset: 0,
        })
    }

    /// Byte offset of the next unread frame (= bytes of intact prefix).
    pub fn offset(&self) -> u64 { self.offset }

    /// Read the next record, a clean end of file, or a torn frame.
    pub fn read_next(&mut self) -> Result<Frame> {
        let start = self.offset;

        let mut kind = [0u8; 1];
        if read_up_to(&mut self.file, &mut kind)? == 0 {
            return Ok(Frame::End);
        }
        if kind[0] != KIND_PUT {
            return Ok(Frame::Torn { offset: start });
        }

        let mut header = [0u8; PUT_HEADER_SIZE - 1];
        if read_up_to(&mut self.file, &mut header)? < header.len() {
            return Ok(Frame::Torn { offset: start });
        }

        let id = u64::from_le_bytes(header[0..8].try_into().expect("slice length"));
        let add_time = u64::from_le_bytes(header[8..16].try_into().expect("slice length"));
        let expire_raw = u64::from_le_bytes(header[16..24].try_into().expect("slice length"));
        let len = u32::from_le_bytes(header[24..28].try_into().expect("slice length")) as usize;

        if len > MAX_PAYLOAD_LEN {
            return Ok(Frame::Torn { offset: start });
        }

        let mut body = Vec::with_capacity(PUT_HEADER_SIZE + len);
        body.push(kind[0]);
        body.extend_from_slice(&header);
        body.resize(PUT_HEADER_SIZE + len, 0);
        if read_up_to(&mut self.file, &mut body[PUT_HEADER_SIZE..])? < len {
            return Ok(Frame::Torn { offset: start });
        }

        let mut crc_buf = [0u8; FRAME_CRC_SIZE];
        if read_up_to(&mut self.file, &mut crc_buf)? < FRAME_CRC_SIZE {
            return Ok(Frame::Torn { offset: start });
        }
        if !verify_frame_crc(&body, u32::from_le_bytes(crc_buf)) {
            return Ok(Frame::Torn { offset: start });
        }

        self.offset = start + put_frame_size(len) as u64;

        let payload = Bytes::from(body).slice(PUT_HEADER_SIZE..);
        Ok(Frame::Record(WriterRecord::Put(QueueItem {
            id,
            add_time,
            expire_time: if expire_raw == 0 { None } else { Some(expire_raw) },
            payload,
        })))
    }
}

/// Read until `buf` is full or EOF; returns the number of bytes read.
fn read_up_to(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Encode one reader checkpoint record into its on-disk frame.
pub(crate) fn encode_reader_record(record: &ReaderRecord) -> Vec<u8> {
    let mut frame = match record {
        ReaderRecord::ReadHead(head) => {
            let mut frame = Vec::with_capacity(1 + 8 + FRAME_CRC_SIZE);
            frame.push(KIND_READ_HEAD);
            frame.extend_from_slice(&head.to_le_bytes());
            frame
        }
        ReaderRecord::ReadDone(ids) => {
            let mut frame = Vec::with_capacity(1 + 4 + ids.len() * 8 + FRAME_CRC_SIZE);
            frame.push(KIND_READ_DONE);
            frame.extend_from_slice(&(ids.len() as u32).to_le_bytes());
            for id in ids {
                frame.extend_from_slice(&id.to_le_bytes());
            }
            frame
        }
    };
    let crc = frame_crc(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

/// Encode a reader's `(head, done)` state as a checkpoint file image:
/// one `ReadHead` record followed by one `ReadDone` record.
pub(crate) fn encode_checkpoint(head: u64, done: impl Iterator<Item = u64>) -> Vec<u8> {
    let mut buf = encode_reader_record(&ReaderRecord::ReadHead(head));
    buf.extend_from_slice(&encode_reader_record(&ReaderRecord::ReadDone(done.collect())));
    buf
}

/// Replay a checkpoint file: the effective state is the last `ReadHead`
/// plus the last `ReadDone`. A torn tail is tolerated (checkpoints are
/// rewritten atomically, so this only happens under external damage) and
/// everything before it still counts.
pub(crate) fn read_checkpoint(path: &Path) -> Result<(u64, Vec<u64>)> {
    let mut data = Vec::new();
    File::open(path)?.read_to_end(&mut data)?;

    let mut head = 0u64;
    let mut done = Vec::new();
    let mut pos = 0usize;

    while pos < data.len() {
        match read_checkpoint_frame(&data[pos..]) {
            Some((record, consumed)) => {
                match record {
                    ReaderRecord::ReadHead(h) => head = h,
                    ReaderRecord::ReadDone(ids) => done = ids,
                }
                pos += consumed;
            }
            None => {
                warn!(path = ?path, offset = pos, "Ignoring torn checkpoint tail");
                break;
            }
        }
    }

    Ok((head, done))
}

fn read_checkpoint_frame(data: &[u8]) -> Option<(ReaderRecord, usize)> {
    let kind = *data.first()?;
    match kind {
        KIND_READ_HEAD => {
            let body_len = 1 + 8;
            let frame = data.get(..body_len + FRAME_CRC_SIZE)?;
            let crc = u32::from_le_bytes(frame[body_len..].try_into().ok()?);
            if !verify_frame_crc(&frame[..body_len], crc) {
                return None;
            }
            let head = u64::from_le_bytes(frame[1..9].try_into().ok()?);
            Some((ReaderRecord::ReadHead(head), body_len + FRAME_CRC_SIZE))
        }
        KIND_READ_DONE => {
            let count = u32::from_le_bytes(data.get(1..5)?.try_into().ok()?) as usize;
            let body_len = 1 + 4 + count * 8;
            let frame = data.get(..body_len + FRAME_CRC_SIZE)?;
            let crc = u32::from_le_bytes(frame[body_len..].try_into().ok()?);
            if !verify_frame_crc(&frame[..body_len], crc) {
                return None;
            }
            let ids = frame[5..body_len]
                .chunks_exact(8)
                .map(|c| u64::from_le_bytes(c.try_into().expect("chunk length")))
                .collect();
            Some((ReaderRecord::ReadDone(ids), body_len + FRAME_CRC_SIZE))
        }
        _ => None,
    }
}
