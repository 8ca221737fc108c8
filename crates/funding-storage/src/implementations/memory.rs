//! In-memory storage backend.

use crate::{StorageError, StorageInterface};
use async_trait::async_trait;
use funding_types::{ConfigSchema, Schema, ValidationError};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

struct Entry {
	value: Vec<u8>,
	expires_at: Option<Instant>,
}

impl Entry {
	fn is_live(&self, now: Instant) -> bool {
		!matches!(self.expires_at, Some(expires_at) if now >= expires_at)
	}
}

/// Keeps values in a map for the lifetime of the process. Expired entries are
/// treated as missing and dropped on the next write.
#[derive(Default)]
pub struct MemoryStorage {
	entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryStorage {
	pub fn new() -> Self {
		Self::default()
	}
}

pub struct MemoryStorageSchema;

impl ConfigSchema for MemoryStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(vec![], vec![]).validate(config)
	}
}

#[async_trait]
impl StorageInterface for MemoryStorage {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MemoryStorageSchema)
	}

	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let entries = self.entries.read().await;
		match entries.get(key) {
			Some(entry) if entry.is_live(Instant::now()) => Ok(entry.value.clone()),
			_ => Err(StorageError::NotFound),
		}
	}

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let now = Instant::now();
		let mut entries = self.entries.write().await;
		entries.retain(|_, entry| entry.is_live(now));
		entries.insert(
			key.to_string(),
			Entry {
				value,
				expires_at: ttl.map(|ttl| now + ttl),
			},
		);
		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		self.entries.write().await.remove(key);
		Ok(())
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		let entries = self.entries.read().await;
		Ok(entries
			.get(key)
			.is_some_and(|entry| entry.is_live(Instant::now())))
	}
}

/// Factory for the memory backend. Takes no parameters.
pub fn create_storage(_config: &toml::Value) -> Box<dyn StorageInterface> {
	Box::new(MemoryStorage::new())
}
