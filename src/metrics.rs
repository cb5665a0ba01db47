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

use std::sync::LazyLock;

use prometheus::{
    IntCounterVec, IntGaugeVec, register_int_counter_vec, register_int_gauge_vec,
};

pub const QUEUE_LABEL: &str = "queue";
pub const READER_LABEL: &str = "reader";

pub static PUTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "journal_queue_puts_total",
        "Total number of items put",
        &[QUEUE_LABEL]
    )
    .unwrap()
});

pub static GETS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "journal_queue_gets_total",
        "Total number of items delivered to readers",
        &[QUEUE_LABEL, READER_LABEL]
    )
    .unwrap()
});

pub static EXPIRED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "journal_queue_expired_total",
        "Total number of items dropped at delivery because their expiry passed",
        &[QUEUE_LABEL, READER_LABEL]
    )
    .unwrap()
});

pub static QUEUE_SIZE: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    register_int_gauge_vec!(
        "journal_queue_size",
        "Items waiting in a reader's in-memory queue",
        &[QUEUE_LABEL, READER_LABEL]
    )
    .unwrap()
});

pub static OPEN_READS: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    register_int_gauge_vec!(
        "journal_queue_open_reads",
        "Items delivered but not yet committed or aborted",
        &[QUEUE_LABEL, READER_LABEL]
    )
    .unwrap()
});

pub static JOURNAL_BYTES: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    register_int_gauge_vec!(
        "journal_queue_journal_bytes",
        "Total bytes across a queue's writer files",
        &[QUEUE_LABEL]
    )
    .unwrap()
});
