use std::convert::Infallible;
use std::hint::black_box;
use std::sync::Arc;
use std::thread;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use instance_registry::{InstanceRegistry, Singleton};
use quick_cache::sync::Cache as QuickCache;

#[derive(Debug)]
struct BenchValue {
	data: Vec<u8>,
}

fn build(_: u64) -> Result<BenchValue, Infallible> {
	Ok(BenchValue {
		data: vec![0u8; 64],
	})
}

fn bench_cold_build(c: &mut Criterion) {
	let mut group = c.benchmark_group("cold_build");

	for size in [100u64, 1000, 10000] {
		group.throughput(Throughput::Elements(size));
		group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
			b.iter(|| {
				let registry = InstanceRegistry::new();
				for i in 0..size {
					let _ = registry.get_or_create(black_box(i), || build(i));
				}
			});
		});
	}

	group.finish();
}

fn bench_hit(c: &mut Criterion) {
	let mut group = c.benchmark_group("comparison/hit");

	let registry = InstanceRegistry::new();
	let quick_cache: QuickCache<u64, Arc<BenchValue>> = QuickCache::new(10000);
	for i in 0..1000u64 {
		let _ = registry.get_or_create(i, || build(i));
		let _ = quick_cache.get_or_insert_with(&i, || build(i).map(Arc::new));
	}

	group.bench_function("instance_registry", |b| {
		b.iter(|| {
			for i in 0..1000u64 {
				let _ = registry.get_or_create(black_box(i), || build(i));
			}
		});
	});

	group.bench_function("quick_cache", |b| {
		b.iter(|| {
			for i in 0..1000u64 {
				let _ = quick_cache.get_or_insert_with(&black_box(i), || build(i).map(Arc::new));
			}
		});
	});

	group.finish();
}

fn bench_singleton_hit(c: &mut Criterion) {
	let singleton = Singleton::new();
	let _ = singleton.get_or_init(|| build(0));

	c.bench_function("singleton_hit", |b| {
		b.iter(|| {
			let value = singleton.get_or_init(|| build(0)).unwrap();
			black_box(value.data.len());
		});
	});
}

fn bench_contended_hit(c: &mut Criterion) {
	let registry = Arc::new(InstanceRegistry::new());
	for i in 0..4u64 {
		let _ = registry.get_or_create(i, || build(i));
	}

	c.bench_function("contended_hit_4_threads", |b| {
		b.iter(|| {
			let mut handles = vec![];

			for t in 0..4u64 {
				let registry = registry.clone();
				handles.push(thread::spawn(move || {
					for i in 0..250u64 {
						let key = (i + t) % 4;
						let _ = registry.get_or_create(key, || build(key));
					}
				}));
			}

			for handle in handles {
				handle.join().unwrap();
			}
		});
	});
}

fn bench_contended_cold_build(c: &mut Criterion) {
	c.bench_function("contended_cold_build_8_threads", |b| {
		b.iter(|| {
			let registry = Arc::new(InstanceRegistry::new());
			let handles: Vec<_> = (0..8)
				.map(|_| {
					let registry = registry.clone();
					thread::spawn(move || {
						for i in 0..64u64 {
							let _ = registry.get_or_create(i, || build(i));
						}
					})
				})
				.collect();

			for handle in handles {
				handle.join().unwrap();
			}
		});
	});
}

criterion_group!(
	benches,
	bench_cold_build,
	bench_hit,
	bench_singleton_hit,
	bench_contended_hit,
	bench_contended_cold_build,
);

criterion_main!(benches);
