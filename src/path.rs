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

//! File naming and directory scanning for one queue.
//!
//! A queue named `Q` in directory `D` owns:
//! - writer files `D/Q.<ms>` where `<ms>` is the decimal wall-clock
//!   millisecond at creation; files sort by integer value of the suffix
//! - reader checkpoint files `D/Q.read.<name>`; the default reader has the
//!   empty name (`Q.read.`)
//! - in-progress temporaries with a `~~` suffix, erased on startup
//!
//! Anything else in the directory is left alone.

use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::Result;

/// Suffix of in-progress temporary files.
pub(crate) const TEMP_SUFFIX: &str = "~~";

const READ_INFIX: &str = ".read.";

pub(crate) fn writer_file_name(queue: &str, timestamp_ms: u64) -> String {
    format!("{queue}.{timestamp_ms}")
}

pub(crate) fn checkpoint_file_name(queue: &str, reader: &str) -> String {
    format!("{queue}{READ_INFIX}{reader}")
}

pub(crate) fn writer_file_path(dir: &Path, queue: &str, timestamp_ms: u64) -> PathBuf {
    dir.join(writer_file_name(queue, timestamp_ms))
}

pub(crate) fn checkpoint_file_path(dir: &Path, queue: &str, reader: &str) -> PathBuf {
    dir.join(checkpoint_file_name(queue, reader))
}

/// Parse the numeric suffix of a writer file name, `<queue>.<number>`.
pub(crate) fn parse_writer_suffix(queue: &str, file_name: &str) -> Option<u64> {
    let rest = file_name.strip_prefix(queue)?.strip_prefix('.')?;
    rest.parse::<u64>().ok()
}

/// Parse the reader name of a checkpoint file name, `<queue>.read.<name>`.
pub(crate) fn parse_checkpoint_reader(queue: &str, file_name: &str) -> Option<String> {
    let rest = file_name.strip_prefix(queue)?.strip_prefix(READ_INFIX)?;
    Some(rest.to_string())
}

/// A reader name may not contain a path separator or the temp suffix.
pub(crate) fn is_valid_reader_name(name: &str) -> bool {
    !name.contains('/') && !name.contains(TEMP_SUFFIX)
}

/// Everything the startup scan learns about a queue directory.
#[derive(Debug, Default)]
pub(crate) struct DirScan {
    /// Writer files ascending by integer suffix.
    pub writers:     Vec<(u64, PathBuf)>,
    /// Checkpoint files by reader name (the default reader is `""`).
    pub checkpoints: Vec<(String, PathBuf)>,
}

/// Scan a queue directory: classify the queue's files and erase leftover
/// temporaries. Files belonging to other queues are untouched.
pub(crate) fn scan_queue_dir(dir: &Path, queue: &str) -> Result<DirScan> {
    let mut scan = DirScan::default();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => continue,
        };

        if !name.starts_with(queue) {
            continue;
        }

        if name.ends_with(TEMP_SUFFIX) {
            debug!(path = ?path, "Erasing leftover temporary file");
            fs::remove_file(&path)?;
            continue;
        }

        if let Some(reader) = parse_checkpoint_reader(queue, name) {
            scan.checkpoints.push((reader, path));
        } else if let Some(suffix) = parse_writer_suffix(queue, name) {
            scan.writers.push((suffix, path));
        }
    }

    scan.writers.sort_by_key(|(suffix, _)| *suffix);
    Ok(scan)
}
