use std::fmt;

use anyhow::Result;
use serde::Serialize;
use tracing::{error, info, info_span};

use crate::app::ports::RecordSink;
use crate::domain::{DataSource, TripRecord};
use crate::error::PipelineError;
use crate::pipeline::processing::merge::{MergeStats, TripMerger};
use crate::pipeline::processing::normalize::{NormalizationRegistry, NormalizedTrips};
use crate::pipeline::processing::parser::{CmtParser, ParsedRows, RawRow, RawTripRecord, VerifoneParser};

/// One vendor export to be normalized
pub struct VendorInput {
    pub source: DataSource,
    /// File name or other label for logs
    pub name: String,
    /// Rows as read; an error ends the file
    pub rows: Box<dyn Iterator<Item = crate::error::Result<RawRow>> + Send>,
}

impl VendorInput {
    pub fn new(
        source: DataSource,
        name: impl Into<String>,
        rows: impl Iterator<Item = crate::error::Result<RawRow>> + Send + 'static,
    ) -> Self {
        Self {
            source,
            name: name.into(),
            rows: Box::new(rows),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NormalizeReport {
    pub files: usize,
    pub files_rejected: usize,
    /// Files cut short by a read error
    pub files_truncated: usize,
    pub normalized: usize,
    pub parse_errors: usize,
    pub schema_errors: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub written: usize,
}

impl NormalizeReport {
    fn record_merge(&mut self, stats: MergeStats) {
        self.inserted = stats.inserted;
        self.updated = stats.updated;
        self.unchanged = stats.unchanged;
    }
}

impl fmt::Display for NormalizeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "normalize: {} files ({} rejected, {} cut short by read errors), {} rows normalized, \
             {} parse errors, {} schema errors; merged into {} trips ({} updated, {} unchanged duplicates)",
            self.files,
            self.files_rejected,
            self.files_truncated,
            self.normalized,
            self.parse_errors,
            self.schema_errors,
            self.written,
            self.updated,
            self.unchanged
        )
    }
}

/// Parses, normalizes and merges every vendor export into one canonical
/// table, written in order of first occurrence.
pub struct NormalizeUseCase {
    registry: NormalizationRegistry,
}

impl NormalizeUseCase {
    pub fn new() -> Self {
        Self {
            registry: NormalizationRegistry::new(),
        }
    }

    pub fn with_registry(registry: NormalizationRegistry) -> Self {
        Self { registry }
    }

    pub fn run(&self, inputs: Vec<VendorInput>, sink: &mut dyn RecordSink<TripRecord>) -> Result<NormalizeReport> {
        let mut report = NormalizeReport::default();
        let mut merger = TripMerger::new();

        for input in inputs {
            let _span = info_span!("normalize_file", file = %input.name, vendor = %input.source).entered();
            report.files += 1;

            let mut read_error = None;
            let rows = input.rows.map_while(|row| match row {
                Ok(row) => Some(row),
                Err(e) => {
                    read_error = Some(e);
                    None
                }
            });

            let parsed: Box<dyn Iterator<Item = crate::error::Result<RawTripRecord>> + '_> = match input.source {
                DataSource::Verifone => Box::new(ParsedRows::new(VerifoneParser, rows)),
                DataSource::Cmt => match CmtParser::parse_stream(rows) {
                    Ok(rows) => Box::new(rows),
                    Err(e) => {
                        error!(error = %e, "Rejecting CMT file");
                        report.files_rejected += 1;
                        continue;
                    }
                },
            };

            for item in NormalizedTrips::new(&self.registry, parsed) {
                match item {
                    Ok(trip) => {
                        report.normalized += 1;
                        merger.upsert(trip);
                    }
                    Err(PipelineError::Parse { .. }) => report.parse_errors += 1,
                    Err(PipelineError::Schema { .. }) => report.schema_errors += 1,
                    Err(e) => return Err(e.into()),
                }
            }

            if let Some(e) = read_error {
                error!(error = %e, "Vendor file ended early; rows after the error were not read");
                report.files_truncated += 1;
            }
        }

        report.record_merge(merger.stats());
        for trip in merger.records() {
            sink.write_record(trip)?;
            report.written += 1;
        }
        sink.finish()?;

        info!(
            normalized = report.normalized,
            written = report.written,
            parse_errors = report.parse_errors,
            schema_errors = report.schema_errors,
            "Normalization complete"
        );
        Ok(report)
    }
}

impl Default for NormalizeUseCase {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(lines: &[&[&str]]) -> Vec<RawRow> {
        lines
            .iter()
            .enumerate()
            .map(|(i, fields)| RawRow::new(i as u64 + 1, fields.iter().map(|s| s.to_string()).collect()))
            .collect()
    }

    const VERIFONE_ROW: [&str; 23] = [
        "500012345", "10042", "Checker Cab", "P1234", "VX520", "123456",
        "2015-01-01 10:07:00.000", "2015-01-01 10:21:00.000", "1.6",
        "39.9526", "-75.1652", "1400 JFK Blvd 19102", "39.9496", "-75.1503",
        "520 Chestnut St 19106", "$9.75", "$0.00", "$2.00", "$0.00", "$0.00",
        "$11.75", "CC CARD", "Street Hail",
    ];

    const CMT_HEADER: [&str; 9] = [
        "Trip #", "Operator Name", "Medallion", "Chauffeur #", "Meter On Datetime",
        "Meter Off Datetime", "Fare", "Trip Total", "Payment Type",
    ];

    #[test]
    fn test_cmt_update_wins_over_verifone_row() {
        let verifone = rows(&[&VERIFONE_ROW]);
        let cmt = rows(&[
            &CMT_HEADER,
            &["10042", "Checker Cab", "P1234", "123456", "01/01/2015 10:07", "01/01/2015 10:21", "$12.00", "$14.00", "CC CARD"],
        ]);

        let inputs = vec![
            VendorInput::new(DataSource::Verifone, "verifone.csv", verifone.into_iter().map(Ok)),
            VendorInput::new(DataSource::Cmt, "cmt.csv", cmt.into_iter().map(Ok)),
        ];
        let mut out: Vec<TripRecord> = Vec::new();
        let report = NormalizeUseCase::new().run(inputs, &mut out).unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].fare, 12.0);
        assert_eq!(out[0].data_source, DataSource::Cmt);
        assert_eq!(report.normalized, 2);
        assert_eq!(report.updated, 1);
        assert_eq!(report.written, 1);
    }

    #[test]
    fn test_bad_rows_are_counted_not_fatal() {
        let mut bad_fare = VERIFONE_ROW;
        bad_fare[1] = "10043";
        bad_fare[15] = "n/a";
        let verifone = rows(&[&VERIFONE_ROW, &["short", "row"], &bad_fare]);
        let cmt = rows(&[&["Trip #", "Fare"], &["1", "2"]]);

        let inputs = vec![
            VendorInput::new(DataSource::Verifone, "verifone.csv", verifone.into_iter().map(Ok)),
            VendorInput::new(DataSource::Cmt, "cmt.csv", cmt.into_iter().map(Ok)),
        ];
        let mut out: Vec<TripRecord> = Vec::new();
        let report = NormalizeUseCase::new().run(inputs, &mut out).unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(report.parse_errors, 1);
        assert_eq!(report.schema_errors, 1);
        assert_eq!(report.files_rejected, 1);
        assert!(report.to_string().contains("1 rejected"));
    }

    #[test]
    fn test_read_error_is_counted_and_keeps_earlier_rows() {
        let rows = vec![
            Ok(RawRow::new(1, VERIFONE_ROW.iter().map(|s| s.to_string()).collect())),
            Err(PipelineError::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "reset"))),
        ];
        let inputs = vec![VendorInput::new(DataSource::Verifone, "verifone.csv", rows.into_iter())];

        let mut out: Vec<TripRecord> = Vec::new();
        let report = NormalizeUseCase::new().run(inputs, &mut out).unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(report.files_truncated, 1);
        assert!(report.to_string().contains("1 cut short by read errors"));
    }
}
