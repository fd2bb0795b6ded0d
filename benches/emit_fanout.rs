// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Emit fan-out cost as a function of listener count, all in one process.
//
// Run with:
//   cargo bench --bench emit_fanout

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use eventbus::{ChannelConfig, EventKind, Participant, TransactionEvent, TransactionEventCodec};

const LISTENER_COUNTS: &[usize] = &[1, 4, 16, 64];

fn sample_event() -> TransactionEvent {
    TransactionEvent {
        kind: EventKind::Added,
        start_date: 0,
        start_exclusive: false,
        end_date: 1,
        end_exclusive: true,
    }
}

fn bench_emit_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("emit_fanout");

    for &n in LISTENER_COUNTS {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let channel = format!("bench_fanout_{n}_{}", std::process::id());
            let config = ChannelConfig::new((n as u32) + 4);
            let publisher = Participant::<TransactionEventCodec>::join_with_config(&channel, config.clone())
                .expect("join publisher");
            let listeners: Vec<_> = (0..n)
                .map(|_| {
                    Participant::<TransactionEventCodec>::join_with_config(&channel, config.clone())
                        .expect("join listener")
                })
                .collect();

            let event = sample_event();
            b.iter(|| {
                publisher.emit(black_box(&event), true);
            });

            drop(listeners);
        });
    }

    group.finish();
}

criterion_group!(benches, bench_emit_fanout);
criterion_main!(benches);
