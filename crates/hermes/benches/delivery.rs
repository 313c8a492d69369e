// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Delivery path benchmarks
//!
//! Measures the cost of one message from `transmit` to the receiver
//! callback on the synchronous paths:
//! - intra: registry dispatch plus the delivery core
//! - rtps over the loopback network
//! - History push alone, for reference

#![allow(clippy::uninlined_format_args)]

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use hermes::{History, Identity, IntraRegistry, LoopbackNetwork, MessageInfo, Receiver, RoleAttributes, Transmitter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

fn bench_intra_transmit(c: &mut Criterion) {
    let mut group = c.benchmark_group("intra_transmit");
    for size in [64usize, 1024, 16 * 1024] {
        let registry = IntraRegistry::new();
        let received = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&received);
        let receiver = Receiver::builder(RoleAttributes::local("bench_intra"))
            .registry(Arc::clone(&registry))
            .intra(move |payload, _| {
                counter.fetch_add(payload.len() as u64, Ordering::Relaxed);
            })
            .expect("receiver");
        receiver.enable().expect("enable");
        let writer = Transmitter::builder(RoleAttributes::local("bench_intra"))
            .registry(registry)
            .intra()
            .expect("writer");
        let payload = Bytes::from(vec![0xA5u8; size]);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter(|| writer.transmit(black_box(payload.clone())).expect("transmit"));
        });
        receiver.disable();
    }
    group.finish();
}

fn bench_loopback_transmit(c: &mut Criterion) {
    let net = LoopbackNetwork::new();
    let receiver = Receiver::builder(RoleAttributes::local("bench_net"))
        .network(net.clone())
        .rtps(|payload, _| {
            black_box(payload.len());
        })
        .expect("receiver");
    receiver.enable().expect("enable");
    let writer = Transmitter::builder(RoleAttributes::new("far-host", 1, "bench", "bench_net"))
        .network(net)
        .rtps()
        .expect("writer");
    let payload = Bytes::from_static(&[0u8; 256]);

    c.bench_function("loopback_transmit_256", |b| {
        b.iter(|| writer.transmit(black_box(payload.clone())).expect("transmit"));
    });
}

fn bench_history_push(c: &mut Criterion) {
    let sender = Identity::new();
    let payload = Bytes::from_static(&[0u8; 256]);
    let mut group = c.benchmark_group("history_push");
    for depth in [1usize, 16, 256] {
        let history = History::new(depth);
        let mut seq = 0u64;
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.iter(|| {
                seq += 1;
                history.push(payload.clone(), MessageInfo::new(sender.clone(), seq))
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_intra_transmit, bench_loopback_transmit, bench_history_push);
criterion_main!(benches);
