use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, info_span, Instrument};

use crate::app::anonymize_use_case::{AnonymizeReport, AnonymizeUseCase};
use crate::app::fuzz_use_case::{FuzzReport, FuzzUseCase};
use crate::app::normalize_use_case::{NormalizeReport, NormalizeUseCase, VendorInput};
use crate::app::ports::{DiscardRecords, FindingSink, RecordSink, TripStorePort};
use crate::app::upload_use_case::{UploadReport, UploadUseCase};
use crate::app::validate_use_case::{ValidateReport, ValidateUseCase};
use crate::domain::{FuzziedTripRecord, TripRecord};
use crate::pipeline::processing::anonymize::IdentifierStore;
use crate::pipeline::processing::fuzz::Fuzzer;
use crate::pipeline::processing::validate::Validator;

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub normalize: NormalizeReport,
    pub validate: ValidateReport,
    pub upload_raw: UploadReport,
    pub anonymize: AnonymizeReport,
    pub fuzz: FuzzReport,
    pub upload_public: UploadReport,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "run {}", self.run_id)?;
        writeln!(f, "  {}", self.normalize)?;
        writeln!(f, "  {}", self.validate)?;
        writeln!(f, "  {}", self.upload_raw)?;
        writeln!(f, "  {}", self.anonymize)?;
        writeln!(f, "  {}", self.fuzz)?;
        write!(f, "  {}", self.upload_public)
    }
}

/// Every stage in order, each consuming the previous stage's records
pub struct RunUseCase {
    normalize: NormalizeUseCase,
    validate: ValidateUseCase,
    anonymize: AnonymizeUseCase,
    fuzz: FuzzUseCase,
    upload: UploadUseCase,
}

impl RunUseCase {
    pub fn new(
        validator: Validator,
        fuzzer: Fuzzer,
        identifiers: Arc<dyn IdentifierStore>,
        trips: Arc<dyn TripStorePort>,
    ) -> Self {
        Self {
            normalize: NormalizeUseCase::new(),
            validate: ValidateUseCase::new(validator),
            anonymize: AnonymizeUseCase::new(identifiers),
            fuzz: FuzzUseCase::new(fuzzer),
            upload: UploadUseCase::new(trips),
        }
    }

    pub async fn run(
        &self,
        inputs: Vec<VendorInput>,
        sink: &mut dyn RecordSink<FuzziedTripRecord>,
        findings: &mut dyn FindingSink,
    ) -> Result<RunReport> {
        let mut report = RunReport {
            run_id: uuid::Uuid::new_v4().to_string(),
            ..RunReport::default()
        };
        let span = info_span!("run", run_id = %report.run_id);
        async {
            // The merged table is the only copy of the trips held in memory;
            // every later stage streams over it
            let mut merged: Vec<TripRecord> = Vec::new();
            report.normalize = self.normalize.run(inputs, &mut merged)?;

            // Validation passes records through unchanged, so the merged
            // table is also the validated one
            report.validate = self
                .validate
                .run(merged.iter().cloned().map(Ok), &mut DiscardRecords, findings)?;
            report.upload_raw = self.upload.upload_raw(merged.iter().cloned().map(Ok)).await?;

            // Ids are persisted before any anonymized record leaves the run
            let (anonymizer, anonymize_report) = self.anonymize.assign(merged.iter())?;
            report.anonymize = anonymize_report;

            let anonymized = merged.into_iter().map(|trip| anonymizer.anonymize(trip));
            let mut fuzzed = self.fuzz.stream(anonymized);
            let released = (&mut fuzzed).map(|record| -> crate::error::Result<FuzziedTripRecord> {
                let record = record?;
                sink.write_record(&record)?;
                Ok(record)
            });
            report.upload_public = self.upload.upload_public(released).await?;
            report.fuzz = fuzzed.finish();
            sink.finish()?;
            Ok::<(), anyhow::Error>(())
        }
        .instrument(span)
        .await?;

        info!(run_id = %report.run_id, "Pipeline run complete");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ports::{UpsertBatch, UpsertReceiver, UpsertSummary};
    use crate::domain::DataSource;
    use crate::pipeline::processing::anonymize::InMemoryIdentifierStore;
    use crate::pipeline::processing::fuzz::FuzzConfig;
    use crate::pipeline::processing::parser::RawRow;
    use crate::pipeline::processing::validate::{BoundingBox, ValidationWarning};
    use async_trait::async_trait;

    #[derive(Default)]
    struct CountingStore {
        raw: std::sync::Mutex<usize>,
        public: std::sync::Mutex<usize>,
    }

    async fn count<T>(counter: &std::sync::Mutex<usize>, mut batches: UpsertReceiver<T>) -> crate::error::Result<UpsertSummary> {
        let mut summary = UpsertSummary::default();
        while let Some(batch) = batches.recv().await {
            match batch {
                UpsertBatch::Rows(rows) => {
                    summary.rows += rows.len();
                    summary.groups += 1;
                }
                UpsertBatch::Commit => {
                    *counter.lock().unwrap() += summary.rows;
                    return Ok(summary);
                }
            }
        }
        Ok(UpsertSummary::default())
    }

    #[async_trait]
    impl TripStorePort for CountingStore {
        async fn upsert_trips(&self, batches: UpsertReceiver<TripRecord>) -> crate::error::Result<UpsertSummary> {
            count(&self.raw, batches).await
        }

        async fn upsert_public_trips(
            &self,
            batches: UpsertReceiver<FuzziedTripRecord>,
        ) -> crate::error::Result<UpsertSummary> {
            count(&self.public, batches).await
        }

        fn group_size(&self) -> usize {
            2
        }
    }

    fn verifone_row(line: u64, trip_no: &str, medallion: &str) -> RawRow {
        let fields = [
            "500012345", trip_no, "Checker Cab", medallion, "VX520", "123456",
            "2015-01-01 10:07:00.000", "2015-01-01 10:21:00.000", "1.6",
            "39.9526", "-75.1652", "1400 JFK Blvd 19102", "39.9496", "-75.1503",
            "520 Chestnut St 19106", "$9.75", "$0.00", "$2.00", "$0.00", "$0.00",
            "$11.75", "CC CARD", "Street Hail",
        ];
        RawRow::new(line, fields.iter().map(|s| s.to_string()).collect())
    }

    #[tokio::test]
    async fn test_run_chains_every_stage() {
        let rows = vec![verifone_row(1, "1", "M1"), verifone_row(2, "2", "M2"), verifone_row(3, "3", "M1")];
        let store = Arc::new(CountingStore::default());
        let fuzzer = Fuzzer::from_config(FuzzConfig::default(), BoundingBox::default()).unwrap();
        let use_case = RunUseCase::new(
            Validator::new(),
            fuzzer,
            Arc::new(InMemoryIdentifierStore::new()),
            store.clone(),
        );

        let mut public: Vec<FuzziedTripRecord> = Vec::new();
        let mut findings: Vec<ValidationWarning> = Vec::new();
        let report = use_case
            .run(
                vec![VendorInput::new(DataSource::Verifone, "verifone.csv", rows.into_iter().map(Ok))],
                &mut public,
                &mut findings,
            )
            .await
            .unwrap();

        let ids: Vec<_> = public.iter().map(|r| r.medallion_id).collect();
        assert_eq!(ids, vec![Some(1), Some(2), Some(1)]);
        assert_eq!(report.normalize.written, 3);
        assert_eq!(*store.raw.lock().unwrap(), 3);
        assert_eq!(*store.public.lock().unwrap(), 3);
        assert_eq!(report.upload_raw.groups, 2);
        assert_eq!((report.fuzz.fuzzed, report.anonymize.new_ids), (3, 3));
        assert!(report.to_string().starts_with("run "));
    }
}
