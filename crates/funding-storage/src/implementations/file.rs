//! File-based storage backend.
//!
//! One JSON file per key. TTLs are recorded next to the value and enforced
//! on read.

use crate::{StorageError, StorageInterface};
use async_trait::async_trait;
use funding_types::{ConfigSchema, Field, FieldType, Schema, ValidationError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;

#[derive(Serialize, Deserialize)]
struct StoredValue {
	/// Unix seconds after which the value is treated as missing.
	expires_at: Option<u64>,
	value: Vec<u8>,
}

pub struct FileStorage {
	base_path: PathBuf,
}

impl FileStorage {
	pub fn new(base_path: PathBuf) -> Self {
		Self { base_path }
	}

	/// Converts a storage key to a filesystem-safe file path.
	fn get_file_path(&self, key: &str) -> PathBuf {
		let safe_key = key.replace(['/', ':', '\\'], "_");
		self.base_path.join(format!("{}.json", safe_key))
	}

	async fn read_live(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
		let path = self.get_file_path(key);
		let raw = match fs::read(&path).await {
			Ok(data) => data,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		};
		let stored: StoredValue = serde_json::from_slice(&raw)
			.map_err(|e| StorageError::Serialization(e.to_string()))?;

		match stored.expires_at {
			Some(expires_at) if unix_now() >= expires_at => {
				// Expired, clean up lazily.
				let _ = fs::remove_file(&path).await;
				Ok(None)
			}
			_ => Ok(Some(stored.value)),
		}
	}
}

fn unix_now() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or_default()
}

pub struct FileStorageSchema;

impl ConfigSchema for FileStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![Field::new("storage_path", FieldType::String).with_validator(|value| {
				match value.as_str() {
					Some(path) if !path.trim().is_empty() => Ok(()),
					_ => Err("storage_path must not be empty".to_string()),
				}
			})],
		);
		schema.validate(config)
	}
}

#[async_trait]
impl StorageInterface for FileStorage {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(FileStorageSchema)
	}

	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		self.read_live(key).await?.ok_or(StorageError::NotFound)
	}

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let path = self.get_file_path(key);

		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)
				.await
				.map_err(|e| StorageError::Backend(e.to_string()))?;
		}

		let stored = StoredValue {
			expires_at: ttl.map(|ttl| unix_now() + ttl.as_secs()),
			value,
		};
		let bytes =
			serde_json::to_vec(&stored).map_err(|e| StorageError::Serialization(e.to_string()))?;

		// Write to a temp file then rename so readers never see a partial value.
		let temp_path = path.with_extension("tmp");
		fs::write(&temp_path, bytes)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;

		fs::rename(&temp_path, &path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;

		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let path = self.get_file_path(key);

		match fs::remove_file(&path).await {
			Ok(_) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		Ok(self.read_live(key).await?.is_some())
	}
}

/// Factory function to create a storage backend from configuration.
///
/// Configuration parameters:
/// - `storage_path`: Base directory for session files (default: "./data/sessions")
pub fn create_storage(config: &toml::Value) -> Box<dyn StorageInterface> {
	let storage_path = config
		.get("storage_path")
		.and_then(|v| v.as_str())
		.unwrap_or("./data/sessions")
		.to_string();

	Box::new(FileStorage::new(PathBuf::from(storage_path)))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_persists_across_instances() {
		let dir = tempfile::tempdir().unwrap();
		let storage = FileStorage::new(dir.path().to_path_buf());
		storage
			.set_bytes("sessions:abc", b"{}".to_vec(), None)
			.await
			.unwrap();

		let reopened = FileStorage::new(dir.path().to_path_buf());
		assert_eq!(reopened.get_bytes("sessions:abc").await.unwrap(), b"{}");
		assert!(reopened.exists("sessions:abc").await.unwrap());

		reopened.delete("sessions:abc").await.unwrap();
		reopened.delete("sessions:abc").await.unwrap();
		assert!(!reopened.exists("sessions:abc").await.unwrap());
	}

	#[tokio::test]
	async fn test_zero_ttl_is_already_expired() {
		let dir = tempfile::tempdir().unwrap();
		let storage = FileStorage::new(dir.path().to_path_buf());
		storage
			.set_bytes("k", b"v".to_vec(), Some(Duration::ZERO))
			.await
			.unwrap();
		assert!(matches!(
			storage.get_bytes("k").await,
			Err(StorageError::NotFound)
		));
	}

	#[test]
	fn test_schema_rejects_empty_path() {
		let config: toml::Value = toml::from_str(r#"storage_path = " ""#).unwrap();
		assert!(FileStorageSchema.validate(&config).is_err());
	}
}
