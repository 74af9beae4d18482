use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use std::sync::Arc;
use std::thread;

use stockledger_core::{PartId, TenantContext, TenantId, UserId};
use stockledger_infra::store::InMemoryLedgerStore;
use stockledger_infra::{PartCatalog, StockLedger};
use stockledger_inventory::{MovementContext, MovementType, NewPart};

type Ledger = StockLedger<InMemoryLedgerStore>;

fn setup(parts: usize, opening_quantity: i64) -> (Arc<Ledger>, TenantContext, Vec<PartId>) {
    let ledger = Arc::new(StockLedger::new(InMemoryLedgerStore::new(), 10_000));
    let ctx = TenantContext::new(TenantId::new(), UserId::new()).unwrap();
    let catalog = PartCatalog::new(ledger.clone());
    let ids = (0..parts)
        .map(|i| {
            catalog
                .register(
                    &ctx,
                    &NewPart {
                        name: format!("Bench part {i}"),
                        part_number: format!("BENCH-{i:04}"),
                        min_quantity: 0,
                        retail_price: 100,
                        opening_quantity,
                    },
                )
                .unwrap()
                .id_typed()
        })
        .collect();
    (ledger, ctx, ids)
}

fn bench_append_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("append_latency");
    group.throughput(Throughput::Elements(1));

    let (ledger, ctx, parts) = setup(1, 0);
    let part_id = parts[0];
    group.bench_function("single_thread_purchase", |b| {
        b.iter(|| {
            black_box(
                ledger
                    .append(&ctx, part_id, MovementType::Purchase, 1, MovementContext::default())
                    .unwrap(),
            )
        });
    });

    group.finish();
}

/// Same-part writers contend on one compare-and-swap; different-part writers should not.
fn bench_concurrent_appends(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent_appends");
    let threads = 4usize;
    let per_thread = 250usize;
    group.throughput(Throughput::Elements((threads * per_thread) as u64));

    for (label, part_count) in [("same_part", 1usize), ("distinct_parts", threads)] {
        group.bench_with_input(BenchmarkId::new(label, threads), &part_count, |b, &count| {
            b.iter(|| {
                let (ledger, ctx, parts) = setup(count, 0);
                let handles: Vec<_> = (0..threads)
                    .map(|t| {
                        let ledger = ledger.clone();
                        let part_id = parts[t % parts.len()];
                        thread::spawn(move || {
                            for _ in 0..per_thread {
                                ledger
                                    .append(
                                        &ctx,
                                        part_id,
                                        MovementType::Purchase,
                                        1,
                                        MovementContext::default(),
                                    )
                                    .unwrap();
                            }
                        })
                    })
                    .collect();
                for handle in handles {
                    handle.join().unwrap();
                }
                black_box(ledger);
            });
        });
    }

    group.finish();
}

fn bench_recompute_from_ledger(c: &mut Criterion) {
    let mut group = c.benchmark_group("recompute_from_ledger");

    for history in [10usize, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*history as u64));
        group.bench_with_input(BenchmarkId::new("replay", history), history, |b, &len| {
            let (ledger, ctx, parts) = setup(1, 0);
            let part_id = parts[0];
            for _ in 0..len {
                ledger
                    .append(&ctx, part_id, MovementType::Purchase, 1, MovementContext::default())
                    .unwrap();
            }
            b.iter(|| black_box(ledger.recompute_from_ledger(&ctx, part_id).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_append_latency,
    bench_concurrent_appends,
    bench_recompute_from_ledger
);
criterion_main!(benches);
