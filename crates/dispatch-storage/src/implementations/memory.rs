//! In-memory storage backend.
//!
//! Sharded concurrent map with real TTL support and lock-free reads across
//! shards. This is the default backend for the dispatch service and the one
//! every test uses.

use crate::{StorageError, StorageInterface};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};

#[derive(Clone)]
struct StoredValue {
	data: Vec<u8>,
	expires_at: Option<Instant>,
}

impl StoredValue {
	fn is_expired(&self, now: Instant) -> bool {
		self.expires_at.is_some_and(|at| now >= at)
	}
}

/// Memory-backed implementation of [`StorageInterface`].
///
/// Expired entries are treated as absent on every read and dropped lazily.
#[derive(Default)]
pub struct MemoryStorage {
	entries: DashMap<String, StoredValue>,
}

impl MemoryStorage {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl StorageInterface for MemoryStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let now = Instant::now();
		// The read guard must drop before the expired-entry removal takes a
		// write lock on the same shard.
		let live = self
			.entries
			.get(key)
			.and_then(|entry| (!entry.is_expired(now)).then(|| entry.data.clone()));
		match live {
			Some(data) => Ok(data),
			None => {
				self.entries.remove_if(key, |_, v| v.is_expired(now));
				Err(StorageError::NotFound)
			}
		}
	}

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		self.entries.insert(
			key.to_string(),
			StoredValue {
				data: value,
				expires_at: ttl.map(|d| Instant::now() + d),
			},
		);
		Ok(())
	}

	async fn compare_and_swap(
		&self,
		key: &str,
		expected: Option<&[u8]>,
		value: Vec<u8>,
	) -> Result<bool, StorageError> {
		let now = Instant::now();
		let next = StoredValue {
			data: value,
			expires_at: None,
		};
		// The occupied entry holds the shard lock, making the comparison and
		// swap atomic with respect to other writers.
		match self.entries.entry(key.to_string()) {
			Entry::Occupied(mut occupied) => {
				let current = occupied.get();
				if current.is_expired(now) {
					if expected.is_none() {
						occupied.insert(next);
						return Ok(true);
					}
					occupied.remove();
					return Ok(false);
				}
				match expected {
					Some(bytes) if current.data == bytes => {
						occupied.insert(next);
						Ok(true)
					}
					_ => Ok(false),
				}
			}
			Entry::Vacant(vacant) => {
				if expected.is_none() {
					vacant.insert(next);
					Ok(true)
				} else {
					Ok(false)
				}
			}
		}
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		self.entries.remove(key);
		Ok(())
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		let now = Instant::now();
		Ok(self
			.entries
			.get(key)
			.is_some_and(|entry| !entry.is_expired(now)))
	}

	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		let now = Instant::now();
		Ok(self
			.entries
			.iter()
			.filter(|entry| entry.key().starts_with(prefix) && !entry.value().is_expired(now))
			.map(|entry| entry.key().clone())
			.collect())
	}

	async fn increment(&self, key: &str, delta: i64) -> Result<i64, StorageError> {
		let now = Instant::now();
		// Counters are stored as decimal strings so file and memory backends
		// agree on the representation.
		match self.entries.entry(key.to_string()) {
			Entry::Occupied(mut occupied) => {
				let current = if occupied.get().is_expired(now) {
					0
				} else {
					parse_counter(&occupied.get().data)?
				};
				let next = current + delta;
				occupied.insert(StoredValue {
					data: next.to_string().into_bytes(),
					expires_at: None,
				});
				Ok(next)
			}
			Entry::Vacant(vacant) => {
				vacant.insert(StoredValue {
					data: delta.to_string().into_bytes(),
					expires_at: None,
				});
				Ok(delta)
			}
		}
	}
}

fn parse_counter(bytes: &[u8]) -> Result<i64, StorageError> {
	std::str::from_utf8(bytes)
		.ok()
		.and_then(|s| s.parse().ok())
		.ok_or_else(|| StorageError::Serialization("counter is not an integer".to_string()))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn ttl_expires_entries() {
		let storage = MemoryStorage::new();
		storage
			.set_bytes("k", b"v".to_vec(), Some(Duration::from_millis(10)))
			.await
			.unwrap();
		assert!(storage.exists("k").await.unwrap());

		tokio::time::sleep(Duration::from_millis(20)).await;
		assert!(!storage.exists("k").await.unwrap());
		assert!(matches!(
			storage.get_bytes("k").await,
			Err(StorageError::NotFound)
		));
	}

	#[tokio::test]
	async fn cas_requires_matching_bytes() {
		let storage = MemoryStorage::new();
		assert!(storage
			.compare_and_swap("k", None, b"a".to_vec())
			.await
			.unwrap());
		// Create-if-absent fails once present.
		assert!(!storage
			.compare_and_swap("k", None, b"b".to_vec())
			.await
			.unwrap());
		// Swap with stale expectation fails.
		assert!(!storage
			.compare_and_swap("k", Some(b"x"), b"b".to_vec())
			.await
			.unwrap());
		// Swap with the current value succeeds.
		assert!(storage
			.compare_and_swap("k", Some(b"a"), b"b".to_vec())
			.await
			.unwrap());
		assert_eq!(storage.get_bytes("k").await.unwrap(), b"b".to_vec());
	}

	#[tokio::test]
	async fn concurrent_increments_do_not_lose_updates() {
		let storage = std::sync::Arc::new(MemoryStorage::new());
		let mut handles = Vec::new();
		for _ in 0..8 {
			let storage = storage.clone();
			handles.push(tokio::spawn(async move {
				for _ in 0..100 {
					storage.increment("counter", 1).await.unwrap();
				}
			}));
		}
		for handle in handles {
			handle.await.unwrap();
		}
		assert_eq!(storage.increment("counter", 0).await.unwrap(), 800);
	}
}
