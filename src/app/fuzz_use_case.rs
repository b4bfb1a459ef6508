use std::fmt;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::app::ports::RecordSink;
use crate::domain::{AnonymizedTripRecord, FuzziedTripRecord};
use crate::error::PipelineError;
use crate::observability::metrics;
use crate::pipeline::processing::fuzz::Fuzzer;

#[derive(Debug, Clone, Default, Serialize)]
pub struct FuzzReport {
    pub records: usize,
    pub fuzzed: usize,
    pub dropped: usize,
}

impl fmt::Display for FuzzReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fuzzy: {} records, {} released, {} dropped with no anchor in range",
            self.records, self.fuzzed, self.dropped
        )
    }
}

pub struct FuzzUseCase {
    fuzzer: Fuzzer,
}

impl FuzzUseCase {
    pub fn new(fuzzer: Fuzzer) -> Self {
        Self { fuzzer }
    }

    /// Lazily fuzzes `records`, skipping those with no anchor in range
    pub fn stream<I>(&self, records: I) -> FuzzedRecords<'_, I>
    where
        I: Iterator<Item = crate::error::Result<AnonymizedTripRecord>>,
    {
        FuzzedRecords {
            fuzzer: &self.fuzzer,
            records,
            report: FuzzReport::default(),
        }
    }

    pub fn run<I>(&self, records: I, sink: &mut dyn RecordSink<FuzziedTripRecord>) -> Result<FuzzReport>
    where
        I: Iterator<Item = crate::error::Result<AnonymizedTripRecord>>,
    {
        let mut fuzzed = self.stream(records);
        for record in &mut fuzzed {
            sink.write_record(&record?)?;
        }
        sink.finish()?;
        Ok(fuzzed.finish())
    }
}

pub struct FuzzedRecords<'a, I> {
    fuzzer: &'a Fuzzer,
    records: I,
    report: FuzzReport,
}

impl<I> FuzzedRecords<'_, I> {
    pub fn finish(self) -> FuzzReport {
        info!(fuzzed = self.report.fuzzed, dropped = self.report.dropped, "Fuzzing complete");
        self.report
    }
}

impl<I> Iterator for FuzzedRecords<'_, I>
where
    I: Iterator<Item = crate::error::Result<AnonymizedTripRecord>>,
{
    type Item = crate::error::Result<FuzziedTripRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let record = match self.records.next()? {
                Ok(record) => record,
                Err(e) => return Some(Err(e)),
            };
            self.report.records += 1;
            match self.fuzzer.fuzz(record) {
                Ok(fuzzed) => {
                    self.report.fuzzed += 1;
                    return Some(Ok(fuzzed));
                }
                Err(e @ PipelineError::FuzzBounds { .. }) => {
                    warn!(error = %e, "Dropping record from public release");
                    metrics::fuzz::record_dropped(e.kind());
                    self.report.dropped += 1;
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fixtures::trip;
    use crate::pipeline::processing::fuzz::FuzzConfig;
    use crate::pipeline::processing::validate::BoundingBox;

    #[test]
    fn test_out_of_area_records_are_dropped() {
        let fuzzer = Fuzzer::from_config(FuzzConfig::default(), BoundingBox::default()).unwrap();
        let inside = AnonymizedTripRecord::from_trip(trip("1", "M1", "C1"), Some(1), Some(1));
        let mut outside = AnonymizedTripRecord::from_trip(trip("2", "M1", "C1"), Some(1), Some(1));
        outside.dropoff_lon = Some(-73.9);

        let mut out: Vec<FuzziedTripRecord> = Vec::new();
        let report = FuzzUseCase::new(fuzzer)
            .run(vec![Ok(inside), Ok(outside)].into_iter(), &mut out)
            .unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].trip_no, "1");
        assert_eq!((report.fuzzed, report.dropped), (1, 1));
    }
}
