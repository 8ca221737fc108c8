//! Session records in the storage service.

use funding_storage::{StorageError, StorageService};
use funding_types::SessionId;
use std::sync::Arc;

use crate::session::SessionRecord;

const NAMESPACE: &str = "sessions";

#[derive(Clone)]
pub struct SessionStore {
	storage: Arc<StorageService>,
}

impl SessionStore {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}

	pub async fn save(&self, record: &SessionRecord) -> Result<(), StorageError> {
		self.storage
			.store(NAMESPACE, &record.id.to_string(), record)
			.await
	}

	/// `Ok(None)` when no record exists.
	pub async fn load(&self, id: SessionId) -> Result<Option<SessionRecord>, StorageError> {
		match self.storage.retrieve(NAMESPACE, &id.to_string()).await {
			Ok(record) => Ok(Some(record)),
			Err(StorageError::NotFound) => Ok(None),
			Err(e) => Err(e),
		}
	}

	pub async fn remove(&self, id: SessionId) -> Result<(), StorageError> {
		self.storage.remove(NAMESPACE, &id.to_string()).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use funding_storage::implementations::memory::MemoryStorage;
	use funding_types::{FlowState, QuoteId};

	#[tokio::test]
	async fn test_save_load_remove() {
		let store = SessionStore::new(Arc::new(StorageService::new(Box::new(
			MemoryStorage::new(),
		))));
		let id = SessionId::new();
		let mut record = SessionRecord::new(id, "trader");
		record.begin(QuoteId::from("q1"), None).unwrap();

		store.save(&record).await.unwrap();
		let loaded = store.load(id).await.unwrap().unwrap();
		assert_eq!(loaded.flow_state, FlowState::InProgress);
		assert_eq!(loaded, record);

		store.remove(id).await.unwrap();
		assert!(store.load(id).await.unwrap().is_none());
	}
}
