use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::{FuzziedTripRecord, TripRecord};
use crate::error::Result;
use crate::pipeline::processing::validate::ValidationWarning;

/// Destination for one stage's output records
pub trait RecordSink<T>: Send {
    fn write_record(&mut self, record: &T) -> Result<()>;

    /// Flushes buffered output; called once after the last record
    fn finish(&mut self) -> Result<()>;
}

/// Collects records in memory; used between chained stages and in tests
impl<T: Clone + Send> RecordSink<T> for Vec<T> {
    fn write_record(&mut self, record: &T) -> Result<()> {
        self.push(record.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Drops every record; for stages run only for their report
pub struct DiscardRecords;

impl<T> RecordSink<T> for DiscardRecords {
    fn write_record(&mut self, _record: &T) -> Result<()> {
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Destination for validation findings
pub trait FindingSink: Send {
    fn write_finding(&mut self, finding: &ValidationWarning) -> Result<()>;

    fn finish(&mut self) -> Result<()>;
}

impl FindingSink for Vec<ValidationWarning> {
    fn write_finding(&mut self, finding: &ValidationWarning) -> Result<()> {
        self.push(finding.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Rows written by one upsert call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    pub rows: usize,
    pub groups: usize,
}

/// One message on an upsert stream. The store commits on `Commit`; a stream
/// that closes without it is rolled back.
#[derive(Debug)]
pub enum UpsertBatch<T> {
    Rows(Vec<T>),
    Commit,
}

pub type UpsertReceiver<T> = mpsc::Receiver<UpsertBatch<T>>;

/// Relational storage for the raw and public trip tables. Both upserts are
/// keyed on the natural key and follow last-writer-wins. Every batch of one
/// stream lands in a single transaction.
#[async_trait]
pub trait TripStorePort: Send + Sync {
    async fn upsert_trips(&self, batches: UpsertReceiver<TripRecord>) -> Result<UpsertSummary>;

    async fn upsert_public_trips(&self, batches: UpsertReceiver<FuzziedTripRecord>) -> Result<UpsertSummary>;

    /// Records per batch the store wants to receive
    fn group_size(&self) -> usize;
}
