//! Assigns planned ranges to workers and runs each split as its own task

use crate::index::ByteArrayId;
use crate::query::QueryPlan;
use crate::scan::{
    InputSplit, KeyValueStore, RangeLocationPair, RangeRecordReader, ScanEntry, ScanError,
    ScanResult,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Outcome of one split
#[derive(Debug)]
pub struct SplitReport {
    pub location: String,
    pub result: ScanResult<Vec<ScanEntry>>,
    pub keys_read: u64,
}

/// Scan coordinator
///
/// Splits are independent: each owns its own readers and a failure in one
/// does not affect the others.
#[derive(Clone)]
pub struct ScanCoordinator {
    store: Arc<dyn KeyValueStore>,
    adapter_ids: Vec<ByteArrayId>,
    cancelled: Arc<AtomicBool>,
}

impl ScanCoordinator {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            adapter_ids: Vec::new(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Restrict scans to the given data types
    pub fn with_adapters(mut self, adapter_ids: Vec<ByteArrayId>) -> Self {
        self.adapter_ids = adapter_ids;
        self
    }

    /// Stop all running splits after their current entry
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Distribute the plan's ranges over `workers` splits
    ///
    /// Ranges keep their planned order within each split. Splits that
    /// receive no range are omitted.
    pub fn assign(&self, plan: &QueryPlan, workers: usize) -> ScanResult<Vec<InputSplit>> {
        let workers = workers.max(1);
        let mut splits: Vec<InputSplit> = (0..workers)
            .map(|i| InputSplit::new(format!("worker-{}", i)))
            .collect();

        for (i, range) in plan.ranges.iter().enumerate() {
            let cardinality = self.store.estimate_cardinality(&plan.index_id, range)?;
            let split = &mut splits[i % workers];
            let pair = RangeLocationPair::new(range.clone(), split.location.clone(), cardinality);
            split.add(&plan.index_id, pair);
        }
        splits.retain(|s| !s.is_empty());

        tracing::info!(
            index = %plan.index_id,
            ranges = plan.ranges.len(),
            splits = splits.len(),
            "Assigned scan ranges"
        );
        Ok(splits)
    }

    /// Read one split to completion on the current thread
    pub fn read_split(&self, split: &InputSplit) -> (ScanResult<Vec<ScanEntry>>, u64) {
        let opened = RangeRecordReader::open(self.store.as_ref(), split, &self.adapter_ids);
        let mut reader = match opened {
            Ok(reader) => reader,
            Err(e) => return (Err(e), 0),
        };

        let mut entries = Vec::new();
        let outcome = loop {
            if self.is_cancelled() {
                break Err(ScanError::Task(format!("scan of {} cancelled", split.location)));
            }
            match reader.next_key_value() {
                Ok(true) => {
                    let current = (reader.current_key(), reader.current_value());
                    if let (Some(key), Some(value)) = current {
                        entries.push(ScanEntry {
                            key: key.clone(),
                            value: value.to_vec(),
                        });
                    }
                }
                Ok(false) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        let keys_read = reader.keys_read();
        let closed = reader.close();
        let result = outcome.and(closed).map(|_| entries);
        (result, keys_read)
    }

    /// Run every split concurrently, one blocking task each
    pub async fn run(&self, splits: Vec<InputSplit>) -> Vec<SplitReport> {
        let handles: Vec<_> = splits
            .into_iter()
            .map(|split| {
                let coordinator = self.clone();
                let location = split.location.clone();
                let handle = tokio::task::spawn_blocking(move || {
                    let (result, keys_read) = coordinator.read_split(&split);
                    SplitReport {
                        location: split.location,
                        result,
                        keys_read,
                    }
                });
                (location, handle)
            })
            .collect();

        let mut reports = Vec::with_capacity(handles.len());
        for (location, handle) in handles {
            let report = match handle.await {
                Ok(report) => report,
                Err(e) => SplitReport {
                    location,
                    result: Err(ScanError::Task(e.to_string())),
                    keys_read: 0,
                },
            };
            match &report.result {
                Ok(entries) => tracing::debug!(
                    location = %report.location,
                    entries = entries.len(),
                    "Split finished"
                ),
                Err(e) => tracing::warn!(location = %report.location, error = %e, "Split failed"),
            }
            reports.push(report);
        }
        reports
    }

    /// Run every split and gather all entries, failing on the first split
    /// error
    pub async fn collect(&self, splits: Vec<InputSplit>) -> ScanResult<Vec<ScanEntry>> {
        let mut all = Vec::new();
        for report in self.run(splits).await {
            all.extend(report.result?);
        }
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{
        ByteArrayRange, CompoundIndexStrategy, DimensionalityType, IndexStrategy,
        NumericIndexStrategy, RoundRobinKeyIndexStrategy,
    };
    use crate::numeric::BasicNumericDataset;
    use crate::query::{Constraints, QueryPlanner};
    use crate::scan::{IndexWriter, ScanIterator, SqliteStore};
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn strategy() -> Arc<IndexStrategy> {
        let sfc = DimensionalityType::Spatial.create_strategy(12, 16).unwrap();
        Arc::new(IndexStrategy::from(CompoundIndexStrategy::new(
            RoundRobinKeyIndexStrategy::new(3).unwrap(),
            sfc,
        )))
    }

    fn populated(store: Arc<SqliteStore>, strategy: Arc<IndexStrategy>) -> IndexWriter {
        let writer = IndexWriter::new(store, strategy);
        for i in 0..30 {
            let lon = -10.0 + i as f64;
            let lat = 40.0 + (i % 5) as f64;
            writer
                .write(
                    b"places",
                    format!("p{}", i).as_bytes(),
                    &BasicNumericDataset::point(&[lon, lat]),
                    format!("{},{}", lon, lat).as_bytes(),
                )
                .unwrap();
        }
        writer
    }

    #[tokio::test]
    async fn test_distributed_scan_finds_all_matches() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteStore::open(dir.path()).unwrap());
        let strategy = strategy();
        let writer = populated(Arc::clone(&store), Arc::clone(&strategy));

        let constraints = Constraints::from_bbox(-5.5, 39.5, 5.5, 45.0).unwrap();
        let plan = QueryPlanner::default()
            .plan(strategy.as_ref(), &constraints, &writer.metadata())
            .unwrap();

        let coordinator = ScanCoordinator::new(store);
        let splits = coordinator.assign(&plan, 4).unwrap();
        assert!(!splits.is_empty() && splits.len() <= 4);

        let entries = coordinator.collect(splits).await.unwrap();
        let found: BTreeSet<String> = entries
            .iter()
            .map(|e| String::from_utf8(e.key.data_id.as_bytes().to_vec()).unwrap())
            .collect();
        // lon -5..=5 are i = 5..=15
        for i in 5..=15 {
            assert!(found.contains(&format!("p{}", i)), "missing p{}", i);
        }
    }

    #[tokio::test]
    async fn test_splits_report_independently() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let strategy = strategy();
        populated(Arc::clone(&store), Arc::clone(&strategy));

        let plan = QueryPlan {
            index_id: strategy.id(),
            regions: Vec::new(),
            ranges: vec![
                ByteArrayRange::prefix(ByteArrayId::new(vec![0])),
                ByteArrayRange::prefix(ByteArrayId::new(vec![1])),
                ByteArrayRange::prefix(ByteArrayId::new(vec![2])),
            ],
        };
        let coordinator = ScanCoordinator::new(store);
        let splits = coordinator.assign(&plan, 3).unwrap();
        assert_eq!(splits.len(), 3);
        assert!(splits.iter().all(|s| s.total_cardinality() == 10.0));

        let reports = coordinator.run(splits).await;
        assert_eq!(reports.len(), 3);
        for report in &reports {
            assert_eq!(report.result.as_ref().unwrap().len(), 10);
            assert_eq!(report.keys_read, 10);
        }
    }

    struct FailingStore;

    impl KeyValueStore for FailingStore {
        fn scan(
            &self,
            _index_id: &str,
            range: &ByteArrayRange,
            _adapter_ids: &[ByteArrayId],
        ) -> ScanResult<Box<dyn ScanIterator>> {
            Err(ScanError::RangeFailed {
                range: range.to_string(),
                reason: "unreachable".to_string(),
            })
        }

        fn write(&self, _: &str, _: &crate::scan::InputKey, _: &[u8]) -> ScanResult<()> {
            Ok(())
        }

        fn estimate_cardinality(&self, _: &str, _: &ByteArrayRange) -> ScanResult<f64> {
            Ok(0.0)
        }
    }

    #[tokio::test]
    async fn test_failed_split_surfaces_error() {
        let coordinator = ScanCoordinator::new(Arc::new(FailingStore));
        let plan = QueryPlan {
            index_id: "idx".to_string(),
            regions: Vec::new(),
            ranges: vec![ByteArrayRange::prefix(ByteArrayId::new(vec![7]))],
        };
        let splits = coordinator.assign(&plan, 2).unwrap();
        assert_eq!(splits.len(), 1);

        let reports = coordinator.run(splits.clone()).await;
        assert!(matches!(
            reports[0].result,
            Err(ScanError::RangeFailed { .. })
        ));
        assert!(coordinator.collect(splits).await.is_err());
    }

    #[tokio::test]
    async fn test_cancelled_coordinator_stops() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let strategy = strategy();
        populated(Arc::clone(&store), Arc::clone(&strategy));

        let plan = QueryPlan {
            index_id: strategy.id(),
            regions: Vec::new(),
            ranges: vec![ByteArrayRange::prefix(ByteArrayId::new(vec![0]))],
        };
        let coordinator = ScanCoordinator::new(store);
        let splits = coordinator.assign(&plan, 1).unwrap();
        coordinator.cancel();

        let reports = coordinator.run(splits).await;
        assert!(matches!(reports[0].result, Err(ScanError::Task(_))));
        assert_eq!(reports[0].keys_read, 0);
    }
}
