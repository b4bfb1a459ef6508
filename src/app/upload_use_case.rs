use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tracing::info;

use tokio::sync::mpsc;

use crate::app::ports::{TripStorePort, UpsertBatch};
use crate::domain::{FuzziedTripRecord, TripRecord};

#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadReport {
    pub table: &'static str,
    pub rows: usize,
    pub groups: usize,
}

impl fmt::Display for UploadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "upload: {} rows upserted into {} in {} groups",
            self.rows, self.table, self.groups
        )
    }
}

/// Batches sent ahead of the store
const IN_FLIGHT_BATCHES: usize = 2;

/// Feeds `records` to the store in `group_size` batches. An input error
/// closes the stream without a commit, so the store rolls back.
async fn send_batches<T, I>(records: I, group_size: usize, tx: mpsc::Sender<UpsertBatch<T>>) -> crate::error::Result<()>
where
    I: Iterator<Item = crate::error::Result<T>>,
{
    let mut group = Vec::with_capacity(group_size);
    for record in records {
        group.push(record?);
        if group.len() >= group_size {
            let full = std::mem::replace(&mut group, Vec::with_capacity(group_size));
            if tx.send(UpsertBatch::Rows(full)).await.is_err() {
                // The store stopped early and reports its own error
                return Ok(());
            }
        }
    }
    if !group.is_empty() && tx.send(UpsertBatch::Rows(group)).await.is_err() {
        return Ok(());
    }
    let _ = tx.send(UpsertBatch::Commit).await;
    Ok(())
}

/// Streams a stage into storage without holding more than a few batches
pub struct UploadUseCase {
    store: Arc<dyn TripStorePort>,
}

impl UploadUseCase {
    pub fn new(store: Arc<dyn TripStorePort>) -> Self {
        Self { store }
    }

    pub async fn upload_raw<I>(&self, trips: I) -> Result<UploadReport>
    where
        I: Iterator<Item = crate::error::Result<TripRecord>>,
    {
        let (tx, rx) = mpsc::channel(IN_FLIGHT_BATCHES);
        let (sent, stored) = tokio::join!(
            send_batches(trips, self.store.group_size(), tx),
            self.store.upsert_trips(rx)
        );
        sent?;
        let summary = stored?;
        info!(rows = summary.rows, "Raw trips uploaded");
        Ok(UploadReport {
            table: crate::constants::RAW_TRIPS_TABLE,
            rows: summary.rows,
            groups: summary.groups,
        })
    }

    pub async fn upload_public<I>(&self, trips: I) -> Result<UploadReport>
    where
        I: Iterator<Item = crate::error::Result<FuzziedTripRecord>>,
    {
        let (tx, rx) = mpsc::channel(IN_FLIGHT_BATCHES);
        let (sent, stored) = tokio::join!(
            send_batches(trips, self.store.group_size(), tx),
            self.store.upsert_public_trips(rx)
        );
        sent?;
        let summary = stored?;
        info!(rows = summary.rows, "Public trips uploaded");
        Ok(UploadReport {
            table: crate::constants::PUBLIC_TRIPS_TABLE,
            rows: summary.rows,
            groups: summary.groups,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ports::{UpsertReceiver, UpsertSummary};
    use crate::domain::fixtures::trip;
    use crate::error::PipelineError;
    use async_trait::async_trait;

    /// Records every batch it receives and what the stream ended with
    #[derive(Default)]
    struct RecordingStore {
        batches: std::sync::Mutex<Vec<usize>>,
        committed: std::sync::Mutex<Option<bool>>,
    }

    impl RecordingStore {
        async fn drain<T>(&self, mut batches: UpsertReceiver<T>) -> crate::error::Result<UpsertSummary> {
            let mut summary = UpsertSummary::default();
            while let Some(batch) = batches.recv().await {
                match batch {
                    UpsertBatch::Rows(rows) => {
                        summary.rows += rows.len();
                        summary.groups += 1;
                        self.batches.lock().unwrap().push(rows.len());
                    }
                    UpsertBatch::Commit => {
                        *self.committed.lock().unwrap() = Some(true);
                        return Ok(summary);
                    }
                }
            }
            *self.committed.lock().unwrap() = Some(false);
            Err(PipelineError::Config("stream closed before commit".to_string()))
        }
    }

    #[async_trait]
    impl TripStorePort for RecordingStore {
        async fn upsert_trips(&self, batches: UpsertReceiver<TripRecord>) -> crate::error::Result<UpsertSummary> {
            self.drain(batches).await
        }

        async fn upsert_public_trips(
            &self,
            batches: UpsertReceiver<FuzziedTripRecord>,
        ) -> crate::error::Result<UpsertSummary> {
            self.drain(batches).await
        }

        fn group_size(&self) -> usize {
            2
        }
    }

    #[tokio::test]
    async fn test_upload_streams_in_store_sized_batches() {
        let store = Arc::new(RecordingStore::default());
        let use_case = UploadUseCase::new(store.clone());

        let trips = (0..5).map(|n| Ok(trip(&n.to_string(), "M1", "C1")));
        let report = use_case.upload_raw(trips).await.unwrap();

        assert_eq!(report.rows, 5);
        assert_eq!(report.groups, 3);
        assert_eq!(*store.batches.lock().unwrap(), vec![2, 2, 1]);
        assert_eq!(*store.committed.lock().unwrap(), Some(true));
    }

    #[tokio::test]
    async fn test_unreadable_input_is_not_committed() {
        let store = Arc::new(RecordingStore::default());
        let use_case = UploadUseCase::new(store.clone());

        let trips = vec![
            Ok(trip("1", "M1", "C1")),
            Ok(trip("2", "M1", "C1")),
            Err(PipelineError::Config("bad row".to_string())),
        ];
        let err = use_case.upload_raw(trips.into_iter()).await.unwrap_err();

        assert!(err.to_string().contains("bad row"));
        assert_eq!(*store.committed.lock().unwrap(), Some(false));
    }
}
