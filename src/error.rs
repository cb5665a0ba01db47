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

use std::path::PathBuf;

use snafu::Snafu;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("IO error"), context(false))]
    Io {
        source: std::io::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    /// A record in the interior of a journal file failed to parse. Unlike a
    /// torn tail (which is silently truncated on startup), this is fatal.
    #[snafu(display("Corrupt journal {} at offset {offset}", path.display()))]
    CorruptJournal {
        path:   PathBuf,
        offset: u64,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Unknown reader: {name:?}"))]
    UnknownReader {
        name: String,
        #[snafu(implicit)]
        loc:  snafu::Location,
    },

    #[snafu(display("Invalid reader name: {name:?}"))]
    InvalidReaderName {
        name: String,
        #[snafu(implicit)]
        loc:  snafu::Location,
    },

    #[snafu(display("Id {id} is not an open read"))]
    UnknownId {
        id:  u64,
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("Background sync failed; journal no longer accepts writes"))]
    SyncFailed {
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("Queue is closed"))]
    Closed {
        #[snafu(implicit)]
        loc: snafu::Location,
    },
}
