//! Writes values under every insertion id of their index strategy

use crate::index::{ByteArrayId, IndexMetaData, IndexStrategy, NumericIndexStrategy};
use crate::numeric::BasicNumericDataset;
use crate::scan::{InputKey, KeyValueStore, ScanError, ScanResult};
use std::sync::{Arc, Mutex};

/// Index writer
///
/// Shared between threads; the strategy is only read, except for the
/// round-robin counter which is atomic.
pub struct IndexWriter {
    store: Arc<dyn KeyValueStore>,
    strategy: Arc<IndexStrategy>,
    index_id: String,
    metadata: Mutex<Vec<IndexMetaData>>,
}

impl IndexWriter {
    pub fn new(store: Arc<dyn KeyValueStore>, strategy: Arc<IndexStrategy>) -> Self {
        let index_id = strategy.id();
        let metadata = Mutex::new(strategy.create_metadata());
        Self {
            store,
            strategy,
            index_id,
            metadata,
        }
    }

    pub fn index_id(&self) -> &str {
        &self.index_id
    }

    pub fn strategy(&self) -> &IndexStrategy {
        &self.strategy
    }

    /// Store `value` under each insertion id of `data`, returning the ids
    ///
    /// Data the strategy declines to index (e.g. it spans a whole unbounded
    /// dimension) yields no ids and is not written.
    pub fn write(
        &self,
        adapter_id: &[u8],
        data_id: &[u8],
        data: &BasicNumericDataset,
        value: &[u8],
    ) -> ScanResult<Vec<ByteArrayId>> {
        let ids = self.strategy.insertion_ids(data)?;
        if ids.is_empty() {
            tracing::debug!(
                index = %self.index_id,
                data_id = ?data_id,
                "No insertion ids; entry skipped"
            );
            return Ok(ids);
        }

        for id in &ids {
            let key = InputKey::new(
                ByteArrayId::from(adapter_id),
                ByteArrayId::from(data_id),
                id.clone(),
            );
            self.store.write(&self.index_id, &key, value)?;
        }

        let mut metadata = self
            .metadata
            .lock()
            .map_err(|e| ScanError::Lock(e.to_string()))?;
        for meta in metadata.iter_mut() {
            meta.insertion_ids_added(&ids);
        }
        Ok(ids)
    }

    /// Snapshot of the statistics gathered so far
    pub fn metadata(&self) -> Vec<IndexMetaData> {
        match self.metadata.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
