use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::{rngs::StdRng, Rng, SeedableRng};
use txrecon_core::ItemId;
use txrecon_sketch::{CmsBank, Iblt, InvertibleSketch};

fn values(rng: &mut StdRng, n: usize) -> Vec<u64> {
    std::iter::repeat_with(|| rng.gen_range(1..u64::MAX))
        .take(n)
        .collect()
}

fn invertible_decode(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(7);
    let mut group = c.benchmark_group("invertible decode");
    for diff in [4usize, 16, 64] {
        let mut sketch = InvertibleSketch::new(diff);
        for v in values(&mut rng, diff) {
            sketch.add(v);
        }
        group.throughput(Throughput::Elements(diff as u64));
        group.bench_with_input(BenchmarkId::from_parameter(diff), &sketch, |b, sketch| {
            b.iter(|| sketch.decode().unwrap())
        });
    }
    group.finish();
}

fn iblt_decode(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(8);
    let mut group = c.benchmark_group("iblt decode");
    for diff in [4usize, 16, 64] {
        let mut table = Iblt::with_expected_difference(diff, 0, 1).unwrap();
        for v in values(&mut rng, diff) {
            table.insert(ItemId(v), &[]).unwrap();
        }
        group.throughput(Throughput::Elements(diff as u64));
        group.bench_with_input(BenchmarkId::from_parameter(diff), &table, |b, table| {
            b.iter(|| table.decode())
        });
    }
    group.finish();
}

fn bank_reconcile(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(9);
    let shared = values(&mut rng, 5_000);
    let mut local = CmsBank::new(32, 8, 3);
    let mut remote = CmsBank::new(32, 8, 3);
    for &v in &shared {
        local.add(ItemId(v));
        remote.add(ItemId(v));
    }
    for v in values(&mut rng, 64) {
        remote.add(ItemId(v));
    }
    let digest = remote.digest();

    c.bench_function("cms reconcile 32x8", |b| {
        b.iter(|| local.reconcile(&digest).unwrap())
    });
}

criterion_group!(benches, invertible_decode, iblt_decode, bank_reconcile);
criterion_main!(benches);
