// Merkle root benchmarks.
//
// Roots over receipt-sized leaf sets, including odd counts that exercise the
// duplicated trailing node.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use eos_ledger::crypto::{merkle, Digest};

fn leaves(n: usize) -> Vec<Digest> {
    (0..n)
        .map(|i| Digest::hash(format!("receipt-{i:06}").as_bytes()))
        .collect()
}

fn bench_merkle_root(c: &mut Criterion) {
    let mut group = c.benchmark_group("merkle/root");

    for size in [1, 16, 255, 1024, 4096] {
        let digests = leaves(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &digests, |b, digests| {
            b.iter(|| merkle(digests));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_merkle_root);
criterion_main!(benches);
