use std::collections::BTreeMap;
use std::fmt;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::app::ports::{FindingSink, RecordSink};
use crate::domain::TripRecord;
use crate::pipeline::processing::validate::{SourceSummary, TripLengthComparison, ValidationWarning, Validator};

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidateReport {
    pub records: usize,
    pub warnings: usize,
    pub warnings_by_kind: BTreeMap<&'static str, usize>,
    pub sources: Vec<SourceSummary>,
}

impl fmt::Display for ValidateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validate: {} records, {} findings", self.records, self.warnings)?;
        for (kind, count) in &self.warnings_by_kind {
            write!(f, "; {} {}", count, kind)?;
        }
        for source in &self.sources {
            write!(
                f,
                "; {} trip length mean {:.2} mi (std {:.2}, {} of {} kept)",
                source.data_source, source.mean, source.std, source.kept, source.observed
            )?;
        }
        Ok(())
    }
}

/// Checks every trip, passing it through unchanged, and reports findings
pub struct ValidateUseCase {
    validator: Validator,
}

impl ValidateUseCase {
    pub fn new(validator: Validator) -> Self {
        Self { validator }
    }

    pub fn run<I>(
        &self,
        trips: I,
        sink: &mut dyn RecordSink<TripRecord>,
        findings: &mut dyn FindingSink,
    ) -> Result<ValidateReport>
    where
        I: Iterator<Item = crate::error::Result<TripRecord>>,
    {
        let mut report = ValidateReport::default();
        let mut comparison = TripLengthComparison::new(self.validator.config.outlier_scale);
        let mut sink_error = None;

        let mut on_warning = |finding: ValidationWarning| {
            *report.warnings_by_kind.entry(finding.kind.as_str()).or_default() += 1;
            report.warnings += 1;
            if sink_error.is_none() {
                if let Err(e) = findings.write_finding(&finding) {
                    sink_error = Some(e);
                }
            }
        };

        let mut records = 0;
        let mut input_error = None;
        let trips = trips.map_while(|item| match item {
            Ok(trip) => Some(trip),
            Err(e) => {
                input_error = Some(e);
                None
            }
        });
        for trip in self.validator.validate_stream(trips, &mut on_warning) {
            comparison.observe(&trip);
            sink.write_record(&trip)?;
            records += 1;
        }
        if let Some(e) = input_error {
            return Err(e.into());
        }

        let (summaries, source_warnings) = comparison.finish();
        for finding in source_warnings {
            warn!(message = %finding.message, "Trip length distributions disagree");
            on_warning(finding);
        }
        if let Some(e) = sink_error {
            return Err(e.into());
        }

        report.records = records;
        report.sources = summaries;
        sink.finish()?;
        findings.finish()?;

        info!(records = report.records, findings = report.warnings, "Validation complete");
        Ok(report)
    }
}
