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

//! Injectable wall-clock time source.
//!
//! Journalling code never reads the OS clock directly: item add times and
//! writer file names both come from a [`Clock`] handed in at construction.
//! Production code uses [`SystemClock`]; tests that depend on file names or
//! timestamps use [`ManualClock`] and advance it explicitly.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

/// A source of wall-clock timestamps in milliseconds since the UNIX epoch.
pub trait Clock: Send + Sync + 'static {
    fn now_ms(&self) -> u64;
}

/// The default clock, backed by `chrono::Utc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        let ms = Utc::now().timestamp_millis();
        u64::try_from(ms).expect("system time before UNIX epoch")
    }
}

/// A frozen clock for deterministic tests. Time only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(now_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: u64) { self.now_ms.store(now_ms, Ordering::SeqCst); }

    pub fn advance(&self, delta_ms: u64) { self.now_ms.fetch_add(delta_ms, Ordering::SeqCst); }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 { self.now_ms.load(Ordering::SeqCst) }
}
