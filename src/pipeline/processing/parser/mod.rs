use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::DataSource;
use crate::error::{PipelineError, Result};
use crate::observability::metrics;

pub mod cmt;
pub mod verifone;

pub use cmt::CmtParser;
pub use verifone::VerifoneParser;

/// One delimited row as handed over by the file reader
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    /// 1-based physical line in the source file
    pub line: u64,
    pub fields: Vec<String>,
}

impl RawRow {
    pub fn new(line: u64, fields: Vec<String>) -> Self {
        Self { line, fields }
    }

    pub fn is_blank(&self) -> bool {
        self.fields.iter().all(|f| f.trim().is_empty())
    }
}

/// Verifone row in its native column names, every value still text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifoneRow {
    pub line: u64,
    pub shift_no: String,
    pub trip_no: String,
    pub operator_name: String,
    pub medallion: String,
    pub device_type: String,
    pub chauffeur_no: String,
    pub meter_on_datetime: String,
    pub meter_off_datetime: String,
    pub trip_length: String,
    pub pickup_latitude: String,
    pub pickup_longitude: String,
    pub pickup_location: String,
    pub dropoff_latitude: String,
    pub dropoff_longitude: String,
    pub dropoff_location: String,
    pub fare: String,
    pub tax: String,
    pub tips: String,
    pub tolls: String,
    pub surcharge: String,
    pub trip_total: String,
    pub payment_type: String,
    pub street_dispatch: String,
}

/// CMT row; columns the export may omit are optional
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CmtRow {
    pub line: u64,
    pub trip_no: String,
    pub operator_name: String,
    pub medallion: String,
    pub chauffeur_no: String,
    pub meter_on_datetime: String,
    pub meter_off_datetime: String,
    pub trip_length: Option<String>,
    pub pickup_latitude: Option<String>,
    pub pickup_longitude: Option<String>,
    pub pickup_location: Option<String>,
    pub dropoff_latitude: Option<String>,
    pub dropoff_longitude: Option<String>,
    pub dropoff_location: Option<String>,
    pub fare: String,
    pub tax: Option<String>,
    pub tips: Option<String>,
    pub tolls: Option<String>,
    pub surcharge: Option<String>,
    pub trip_total: String,
    pub payment_type: Option<String>,
    pub street_dispatch: Option<String>,
}

/// Vendor-native record, tagged by the export it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RawTripRecord {
    Verifone(VerifoneRow),
    Cmt(CmtRow),
}

impl RawTripRecord {
    pub fn data_source(&self) -> DataSource {
        match self {
            RawTripRecord::Verifone(_) => DataSource::Verifone,
            RawTripRecord::Cmt(_) => DataSource::Cmt,
        }
    }

    pub fn line(&self) -> u64 {
        match self {
            RawTripRecord::Verifone(row) => row.line,
            RawTripRecord::Cmt(row) => row.line,
        }
    }
}

/// Converts one row of a vendor layout into its native record
pub trait VendorParser {
    fn vendor(&self) -> DataSource;

    fn parse_row(&self, row: &RawRow) -> Result<RawTripRecord>;
}

/// Lazily parses a row stream; blank rows are skipped, malformed rows are
/// yielded as errors without ending the stream.
pub struct ParsedRows<P, I> {
    parser: P,
    rows: I,
}

impl<P, I> ParsedRows<P, I>
where
    P: VendorParser,
    I: Iterator<Item = RawRow>,
{
    pub fn new(parser: P, rows: I) -> Self {
        Self { parser, rows }
    }
}

impl<P, I> Iterator for ParsedRows<P, I>
where
    P: VendorParser,
    I: Iterator<Item = RawRow>,
{
    type Item = Result<RawTripRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let row = self.rows.next()?;
            if row.is_blank() {
                continue;
            }
            let vendor = self.parser.vendor();
            let parsed = self.parser.parse_row(&row);
            match &parsed {
                Ok(_) => metrics::parser::row_parsed(vendor.as_str()),
                Err(e) => {
                    metrics::parser::parse_error(vendor.as_str());
                    warn!(vendor = %vendor, line = row.line, error = %e, "Skipping malformed row");
                }
            }
            return Some(parsed);
        }
    }
}

/// Reads a field, trimmed; the caller has already checked the column count
pub(crate) fn field(row: &RawRow, index: usize) -> String {
    row.fields
        .get(index)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

/// Core identity fields must be present for a row to be a trip at all
pub(crate) fn require_identity(line: u64, trip_no: &str, medallion: &str) -> Result<()> {
    if trip_no.is_empty() {
        return Err(PipelineError::parse(line, "trip number is blank"));
    }
    if medallion.is_empty() {
        return Err(PipelineError::parse(line, "medallion is blank"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifone_fields() -> Vec<String> {
        vec![
            "500012345", "10042", "Checker Cab", "P1234", "VX520", "123456",
            "2015-01-01 10:07:00.000", "2015-01-01 10:21:00.000", "1.6",
            "39.9526", "-75.1652", "1400 JFK Blvd 19102", "39.9496", "-75.1503",
            "520 Chestnut St 19106", "$9.75", "$0.00", "$2.00", "$0.00", "$0.00",
            "$11.75", "CC CARD", "Street Hail",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    #[test]
    fn test_parsed_rows_continue_past_malformed_rows() {
        let rows = vec![
            RawRow::new(1, verifone_fields()),
            RawRow::new(2, vec!["too".to_string(), "short".to_string()]),
            RawRow::new(3, vec![String::new(); 3]),
            RawRow::new(4, verifone_fields()),
        ];

        let results: Vec<_> = ParsedRows::new(VerifoneParser, rows.into_iter()).collect();

        // The blank row is skipped, the short one reported
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(PipelineError::Parse { line: 2, .. })));
        assert_eq!(results[2].as_ref().unwrap().line(), 4);
    }

    #[test]
    fn test_parsed_rows_are_lazy() {
        let rows = (1..).map(|line| RawRow::new(line, verifone_fields()));
        let first_three: Vec<_> = ParsedRows::new(VerifoneParser, rows).take(3).collect();
        assert_eq!(first_three.len(), 3);
    }
}
