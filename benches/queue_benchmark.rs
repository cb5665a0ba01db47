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

//! Benchmarks for the journaled queue.
//!
//! Measures:
//! - Single put latency at different payload sizes
//! - Blocking-queue handoff throughput
//! - Get/commit round-trip throughput

use std::{hint::black_box, time::Duration};

use bytes::Bytes;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use journal_queue::{ConcurrentBlockingQueue, JournaledQueue, QueueBuilder};
use tempfile::TempDir;

/// Payload sizes to benchmark (bytes)
const PAYLOAD_SIZES: &[usize] = &[64, 256, 1024, 4096];

/// Create a queue in a temporary directory with buffered syncs
fn create_queue(temp_dir: &TempDir) -> JournaledQueue {
    QueueBuilder::new(temp_dir.path(), "bench")
        .max_file_size(256 * 1024 * 1024)
        .sync_period(Some(Duration::from_millis(100)))
        .build()
        .expect("Failed to create queue")
}

fn generate_payload(size: usize) -> Bytes { Bytes::from(vec![0xABu8; size]) }

fn bench_put_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("put_latency");

    for &size in PAYLOAD_SIZES {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let temp_dir = TempDir::new().unwrap();
            let queue = create_queue(&temp_dir);
            let payload = generate_payload(size);

            b.iter(|| {
                let (item, _ticket) = queue.put(payload.clone(), None).unwrap();
                black_box(item.id);
            });
        });
    }

    group.finish();
}

fn bench_blocking_queue_handoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("blocking_queue");
    group.throughput(Throughput::Elements(1));

    group.bench_function("put_then_poll", |b| {
        let queue = ConcurrentBlockingQueue::new();
        b.iter(|| {
            queue.put(1u64);
            black_box(queue.poll());
        });
    });

    group.finish();
}

fn bench_get_commit_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("get_commit");
    group.throughput(Throughput::Elements(1));

    group.bench_function("put_get_commit", |b| {
        let temp_dir = TempDir::new().unwrap();
        let queue = create_queue(&temp_dir);
        let reader = queue.reader("bench").unwrap();
        let payload = generate_payload(256);

        b.iter(|| {
            queue.put(payload.clone(), None).unwrap();
            let item = reader.poll().unwrap().expect("item just put");
            reader.commit(item.id).unwrap();
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_put_latency,
    bench_blocking_queue_handoff,
    bench_get_commit_round_trip
);
criterion_main!(benches);
