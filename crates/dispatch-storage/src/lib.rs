//! Storage module for the dispatch system.
//!
//! This module provides the transactional key/value contract that ride,
//! offer, and driver-metric records live behind. Backends supply byte-level
//! operations with optional TTL, atomic counters, and compare-and-swap;
//! the typed [`StorageService`] adds serialization and an optimistic
//! [`StorageService::mutate`] helper that state transitions run through.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod file;
	pub mod memory;
}

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	/// Error that occurs when a requested item is not found.
	#[error("Not found")]
	NotFound,
	/// Error that occurs when creating a record that already exists.
	#[error("Already exists")]
	AlreadyExists,
	/// Error that occurs during serialization/deserialization.
	#[error("Serialization error: {0}")]
	Serialization(String),
	/// Error that occurs when an optimistic mutation keeps losing races.
	#[error("Too much contention on key {0}")]
	Contention(String),
	/// Error that occurs in the storage backend.
	#[error("Backend error: {0}")]
	Backend(String),
}

/// Trait defining the low-level interface for storage backends.
///
/// Basic key-value operations with optional TTL, plus the two primitives
/// the dispatch workflow depends on: byte-level compare-and-swap for
/// optimistic record transitions, and atomic integer increment for the
/// driver lifetime counters.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	/// Retrieves raw bytes for the given key.
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

	/// Stores raw bytes with optional time-to-live.
	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError>;

	/// Atomically replaces the value for `key` only when its current bytes
	/// equal `expected` (`None` meaning the key must be absent). Returns
	/// whether the swap was applied.
	async fn compare_and_swap(
		&self,
		key: &str,
		expected: Option<&[u8]>,
		value: Vec<u8>,
	) -> Result<bool, StorageError>;

	/// Deletes the value associated with the given key.
	async fn delete(&self, key: &str) -> Result<(), StorageError>;

	/// Checks if a key exists in storage.
	async fn exists(&self, key: &str) -> Result<bool, StorageError>;

	/// Lists all live keys starting with `prefix`.
	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

	/// Atomically adds `delta` to the integer counter at `key` (created at
	/// zero) and returns the new value.
	async fn increment(&self, key: &str, delta: i64) -> Result<i64, StorageError>;
}

/// Outcome of an optimistic mutation.
#[derive(Debug)]
pub enum MutateOutcome<T> {
	/// The closure's changes were written; the stored record is now this.
	Applied(T),
	/// The closure declined to change the record; this is the current value.
	Abandoned(T),
}

impl<T> MutateOutcome<T> {
	pub fn into_inner(self) -> T {
		match self {
			MutateOutcome::Applied(value) | MutateOutcome::Abandoned(value) => value,
		}
	}
}

/// Bounded retries for compare-and-swap races before giving up.
const MAX_MUTATE_ATTEMPTS: usize = 8;

/// High-level storage service that provides typed operations.
///
/// Wraps a low-level backend with JSON serialization. Keys are formed as
/// `namespace:id`.
pub struct StorageService {
	/// The underlying storage backend implementation.
	backend: Box<dyn StorageInterface>,
}

impl StorageService {
	/// Creates a new StorageService with the specified backend.
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self { backend }
	}

	fn key(namespace: &str, id: &str) -> String {
		format!("{}:{}", namespace, id)
	}

	/// Stores a serializable value with optional time-to-live.
	pub async fn store_with_ttl<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let bytes =
			serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))?;
		self.backend
			.set_bytes(&Self::key(namespace, id), bytes, ttl)
			.await
	}

	/// Stores a serializable value without time-to-live.
	pub async fn store<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		self.store_with_ttl(namespace, id, data, None).await
	}

	/// Creates a record, failing with [`StorageError::AlreadyExists`] when
	/// the key is already live.
	pub async fn create<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		let bytes =
			serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))?;
		let created = self
			.backend
			.compare_and_swap(&Self::key(namespace, id), None, bytes)
			.await?;
		if created {
			Ok(())
		} else {
			Err(StorageError::AlreadyExists)
		}
	}

	/// Retrieves and deserializes a value from storage.
	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<T, StorageError> {
		let bytes = self.backend.get_bytes(&Self::key(namespace, id)).await?;
		serde_json::from_slice(&bytes).map_err(|e| StorageError::Serialization(e.to_string()))
	}

	/// Retrieves every record in a namespace. Records deleted between the
	/// key listing and the read are skipped.
	pub async fn retrieve_all<T: DeserializeOwned>(
		&self,
		namespace: &str,
	) -> Result<Vec<T>, StorageError> {
		let prefix = format!("{}:", namespace);
		let keys = self.backend.list_keys(&prefix).await?;
		let mut records = Vec::with_capacity(keys.len());
		for key in keys {
			match self.backend.get_bytes(&key).await {
				Ok(bytes) => {
					let value = serde_json::from_slice(&bytes)
						.map_err(|e| StorageError::Serialization(e.to_string()))?;
					records.push(value);
				}
				Err(StorageError::NotFound) => continue,
				Err(e) => return Err(e),
			}
		}
		Ok(records)
	}

	/// Applies an optimistic read-modify-write to a record.
	///
	/// The closure returns whether its changes should be written; returning
	/// `false` abandons the mutation and hands back the current value. On a
	/// compare-and-swap race the read and closure are retried a bounded
	/// number of times.
	pub async fn mutate<T, F>(
		&self,
		namespace: &str,
		id: &str,
		f: F,
	) -> Result<MutateOutcome<T>, StorageError>
	where
		T: Serialize + DeserializeOwned,
		F: Fn(&mut T) -> bool,
	{
		let key = Self::key(namespace, id);
		for _ in 0..MAX_MUTATE_ATTEMPTS {
			let current = self.backend.get_bytes(&key).await?;
			let mut value: T = serde_json::from_slice(&current)
				.map_err(|e| StorageError::Serialization(e.to_string()))?;

			if !f(&mut value) {
				return Ok(MutateOutcome::Abandoned(value));
			}

			let next = serde_json::to_vec(&value)
				.map_err(|e| StorageError::Serialization(e.to_string()))?;
			if self
				.backend
				.compare_and_swap(&key, Some(&current), next)
				.await?
			{
				return Ok(MutateOutcome::Applied(value));
			}
		}
		Err(StorageError::Contention(key))
	}

	/// Removes a value from storage.
	pub async fn remove(&self, namespace: &str, id: &str) -> Result<(), StorageError> {
		self.backend.delete(&Self::key(namespace, id)).await
	}

	/// Checks whether a record exists.
	pub async fn exists(&self, namespace: &str, id: &str) -> Result<bool, StorageError> {
		self.backend.exists(&Self::key(namespace, id)).await
	}

	/// Atomically increments a counter, returning the new value.
	pub async fn increment(
		&self,
		namespace: &str,
		id: &str,
		delta: i64,
	) -> Result<i64, StorageError> {
		self.backend.increment(&Self::key(namespace, id), delta).await
	}
}
