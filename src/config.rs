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

use std::{path::PathBuf, time::Duration};

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Directory holding this queue's writer and checkpoint files.
    pub dir: PathBuf,

    /// Queue name; the prefix of every file the queue owns.
    pub name: String,

    /// A writer file stops accepting records once its size has reached
    /// this; the next put rotates to a fresh file.
    pub max_file_size: u64,

    /// Cadence of background durability syncs. `None` disables the sync
    /// worker; syncs then happen on flush and close only.
    pub sync_period: Option<Duration>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./queue_data"),
            name: "queue".to_string(),
            max_file_size: 16 * 1024 * 1024,
            sync_period: Some(Duration::from_millis(100)),
        }
    }
}
