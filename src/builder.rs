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

use std::{path::PathBuf, sync::Arc, time::Duration};

use crate::{
    JournaledQueue, QueueConfig, Result,
    clock::{Clock, SystemClock},
};

pub struct QueueBuilder {
    config: QueueConfig,
    clock:  Arc<dyn Clock>,
}

impl QueueBuilder {
    pub fn new<P: Into<PathBuf>>(dir: P, name: impl Into<String>) -> Self {
        Self {
            config: QueueConfig {
                dir: dir.into(),
                name: name.into(),
                ..Default::default()
            },
            clock:  Arc::new(SystemClock),
        }
    }

    pub fn max_file_size(mut self, size: u64) -> Self {
        self.config.max_file_size = size;
        self
    }

    pub fn sync_period(mut self, period: Option<Duration>) -> Self {
        self.config.sync_period = period;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<JournaledQueue> {
        JournaledQueue::open_with_clock(self.config, self.clock)
    }
}
