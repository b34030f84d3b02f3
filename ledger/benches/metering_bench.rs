// Resource metering benchmarks.
//
// Accumulator updates in and across averaging windows, elastic limit steps,
// and a full per-transaction usage charge against the store.

use std::collections::BTreeSet;

use criterion::{criterion_group, criterion_main, Criterion};

use eos_ledger::chain::Name;
use eos_ledger::config::{default_elastic_parameters, DEFAULT_MAX_BLOCK_CPU_USAGE};
use eos_ledger::resource::{
    update_elastic_limit, ResourceLimitsConfig, ResourceLimitsManager, UsageAccumulator,
};
use eos_ledger::storage::{ChainStore, Schema};

fn bench_accumulator_same_slot(c: &mut Criterion) {
    c.bench_function("accumulator/add_same_slot", |b| {
        let mut acc = UsageAccumulator::default();
        b.iter(|| acc.add(1, 0, 172_800).unwrap());
    });
}

fn bench_accumulator_decay(c: &mut Criterion) {
    c.bench_function("accumulator/add_with_decay", |b| {
        let mut acc = UsageAccumulator::default();
        let mut slot = 0u32;
        b.iter(|| {
            slot += 1;
            acc.add(1_000, slot, 172_800).unwrap();
        });
    });
}

fn bench_elastic_step(c: &mut Criterion) {
    let params = default_elastic_parameters(DEFAULT_MAX_BLOCK_CPU_USAGE);
    c.bench_function("elastic/update_limit", |b| {
        b.iter(|| update_elastic_limit(DEFAULT_MAX_BLOCK_CPU_USAGE * 10, 0, &params).unwrap());
    });
}

fn bench_transaction_usage(c: &mut Criterion) {
    let store = ChainStore::open_temporary(Schema::chain().unwrap()).unwrap();
    let manager = ResourceLimitsManager::new(store);
    manager
        .initialize_database(&ResourceLimitsConfig::default())
        .unwrap();
    let alice = Name::new("alice");
    manager.initialize_account(alice).unwrap();
    manager.set_account_limits(alice, -1, 1, 1).unwrap();
    let accounts = BTreeSet::from([alice]);

    c.bench_function("limits/add_transaction_usage", |b| {
        let mut slot = 0u32;
        b.iter(|| {
            slot += 1;
            manager.add_transaction_usage(&accounts, 100, 128, slot).unwrap();
            manager.process_block_usage(slot).unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_accumulator_same_slot,
    bench_accumulator_decay,
    bench_elastic_step,
    bench_transaction_usage,
);
criterion_main!(benches);
