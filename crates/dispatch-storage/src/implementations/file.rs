//! File-based storage backend.
//!
//! Stores each key as one file under a base directory, giving simple
//! persistence without external dependencies. Mutating operations serialize
//! through a process-wide lock; this backend assumes a single writer
//! process, which matches how the dispatch service deploys.

use crate::{StorageError, StorageInterface};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;
use tokio::sync::Mutex;

/// File-backed implementation of [`StorageInterface`].
///
/// TTLs are not enforced here: records that rely on freshness carry their
/// own timestamps and every read path filters on them.
pub struct FileStorage {
	/// Base directory path for storing files.
	base_path: PathBuf,
	/// Serializes compare-and-swap and increment against other writers in
	/// this process.
	write_lock: Mutex<()>,
}

impl FileStorage {
	/// Creates a new FileStorage instance with the specified base path.
	pub fn new(base_path: PathBuf) -> Self {
		Self {
			base_path,
			write_lock: Mutex::new(()),
		}
	}

	/// Converts a storage key to a filesystem-safe, reversible file name.
	fn file_path(&self, key: &str) -> PathBuf {
		self.base_path.join(format!("{}.bin", encode_key(key)))
	}

	async fn read(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		match fs::read(self.file_path(key)).await {
			Ok(data) => Ok(data),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	async fn write(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
		let path = self.file_path(key);
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)
				.await
				.map_err(|e| StorageError::Backend(e.to_string()))?;
		}

		// Write atomically by writing to temp file then renaming.
		let temp_path = path.with_extension("tmp");
		fs::write(&temp_path, value)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;
		fs::rename(&temp_path, &path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))
	}
}

/// Percent-encodes the characters that cannot appear in file names, keeping
/// the mapping reversible for key listing.
fn encode_key(key: &str) -> String {
	let mut encoded = String::with_capacity(key.len());
	for c in key.chars() {
		match c {
			'%' => encoded.push_str("%25"),
			'/' => encoded.push_str("%2F"),
			':' => encoded.push_str("%3A"),
			'\\' => encoded.push_str("%5C"),
			_ => encoded.push(c),
		}
	}
	encoded
}

fn decode_key(name: &str) -> String {
	let mut decoded = String::with_capacity(name.len());
	let mut chars = name.chars();
	while let Some(c) = chars.next() {
		if c != '%' {
			decoded.push(c);
			continue;
		}
		let pair: String = chars.by_ref().take(2).collect();
		match pair.as_str() {
			"25" => decoded.push('%'),
			"2F" => decoded.push('/'),
			"3A" => decoded.push(':'),
			"5C" => decoded.push('\\'),
			other => {
				decoded.push('%');
				decoded.push_str(other);
			}
		}
	}
	decoded
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		self.read(key).await
	}

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		_ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let _guard = self.write_lock.lock().await;
		self.write(key, &value).await
	}

	async fn compare_and_swap(
		&self,
		key: &str,
		expected: Option<&[u8]>,
		value: Vec<u8>,
	) -> Result<bool, StorageError> {
		let _guard = self.write_lock.lock().await;
		let current = match self.read(key).await {
			Ok(data) => Some(data),
			Err(StorageError::NotFound) => None,
			Err(e) => return Err(e),
		};
		if current.as_deref() != expected {
			return Ok(false);
		}
		self.write(key, &value).await?;
		Ok(true)
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		match fs::remove_file(self.file_path(key)).await {
			Ok(_) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		Ok(self.file_path(key).exists())
	}

	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		let mut keys = Vec::new();
		let mut dir = match fs::read_dir(&self.base_path).await {
			Ok(dir) => dir,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		};
		while let Some(entry) = dir
			.next_entry()
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?
		{
			let name = entry.file_name().to_string_lossy().to_string();
			let Some(stem) = name.strip_suffix(".bin") else {
				continue;
			};
			let key = decode_key(stem);
			if key.starts_with(prefix) {
				keys.push(key);
			}
		}
		Ok(keys)
	}

	async fn increment(&self, key: &str, delta: i64) -> Result<i64, StorageError> {
		let _guard = self.write_lock.lock().await;
		let current = match self.read(key).await {
			Ok(bytes) => std::str::from_utf8(&bytes)
				.ok()
				.and_then(|s| s.parse::<i64>().ok())
				.ok_or_else(|| {
					StorageError::Serialization("counter is not an integer".to_string())
				})?,
			Err(StorageError::NotFound) => 0,
			Err(e) => return Err(e),
		};
		let next = current + delta;
		self.write(key, next.to_string().as_bytes()).await?;
		Ok(next)
	}
}
