//! Tests for async usage patterns.
//!
//! The registry is synchronous. Contended builds belong on blocking threads;
//! published values are plain `Arc`s and can be held across `.await`.
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use instance_registry::{InstanceRegistry, Singleton};

#[derive(Debug)]
struct Connection {
	endpoint: String,
	pool_size: usize,
}

fn connect(endpoint: &str, calls: &AtomicU32) -> io::Result<Connection> {
	calls.fetch_add(1, Ordering::SeqCst);
	std::thread::sleep(Duration::from_millis(10));
	Ok(Connection {
		endpoint: endpoint.to_string(),
		pool_size: 8,
	})
}

#[tokio::test]
async fn test_arc_held_across_await() {
	let registry: Arc<InstanceRegistry<String, Connection>> = Arc::new(InstanceRegistry::new());
	let calls = AtomicU32::new(0);

	let conn = registry.get_or_create("db".to_string(), || connect("db", &calls)).unwrap();

	// The Arc holds no lock, so awaiting while holding it is fine.
	tokio::time::sleep(Duration::from_millis(1)).await;

	assert_eq!(conn.endpoint, "db");
	assert!(Arc::ptr_eq(&conn, &registry.get("db").unwrap()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_contended_build_from_blocking_tasks() {
	let registry: Arc<InstanceRegistry<String, Connection>> = Arc::new(InstanceRegistry::new());
	let calls = Arc::new(AtomicU32::new(0));

	let tasks: Vec<_> = (0..32)
		.map(|_| {
			let registry = registry.clone();
			let calls = calls.clone();
			tokio::task::spawn_blocking(move || {
				registry.get_or_create("cache".to_string(), || connect("cache", &calls)).unwrap()
			})
		})
		.collect();

	let mut conns = Vec::new();
	for task in tasks {
		conns.push(task.await.unwrap());
	}

	assert_eq!(calls.load(Ordering::SeqCst), 1);
	assert!(conns.iter().all(|c| Arc::ptr_eq(c, &conns[0])));
}

#[tokio::test]
async fn test_concurrent_async_readers() {
	let registry: Arc<InstanceRegistry<u32, Connection>> = Arc::new(InstanceRegistry::new());
	let calls = AtomicU32::new(0);

	// Pre-populate
	for shard in 0..10 {
		registry.get_or_create(shard, || connect(&format!("shard-{shard}"), &calls)).unwrap();
	}

	let mut handles = vec![];
	for task_id in 0..10u32 {
		let registry = registry.clone();
		handles.push(tokio::spawn(async move {
			for i in 0..100u32 {
				let key = (task_id * 100 + i) % 10;
				let conn = registry.get(&key).expect("pre-populated");
				tokio::time::sleep(Duration::from_micros(1)).await;
				assert_eq!(conn.endpoint, format!("shard-{key}"));
			}
		}));
	}

	for handle in handles {
		handle.await.unwrap();
	}
	assert_eq!(calls.load(Ordering::SeqCst), 10);
	assert_eq!(registry.hits(&3), Some(0));
}

#[tokio::test]
async fn test_singleton_shared_between_tasks() {
	let client: Arc<Singleton<Connection>> = Arc::new(Singleton::new());
	let calls = Arc::new(AtomicU32::new(0));

	let tasks: Vec<_> = (0..16)
		.map(|_| {
			let client = client.clone();
			let calls = calls.clone();
			tokio::spawn(async move {
				let conn = tokio::task::spawn_blocking(move || {
					client.get_or_init(|| connect("api", &calls)).unwrap()
				})
				.await
				.unwrap();
				tokio::time::sleep(Duration::from_micros(10)).await;
				conn.pool_size
			})
		})
		.collect();

	for task in tasks {
		assert_eq!(task.await.unwrap(), 8);
	}
	assert_eq!(calls.load(Ordering::SeqCst), 1);
}
