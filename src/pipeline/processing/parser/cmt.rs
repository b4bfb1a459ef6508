use std::collections::HashMap;

use super::{field, require_identity, CmtRow, ParsedRows, RawRow, RawTripRecord, VendorParser};
use crate::constants::*;
use crate::domain::DataSource;
use crate::error::{PipelineError, Result};

/// Header-keyed CMT export. Column positions are resolved once from the
/// header row.
#[derive(Debug, Clone)]
pub struct CmtParser {
    columns: HashMap<String, usize>,
    /// Physical column count, which repeated header names do not shrink
    width: usize,
}

impl CmtParser {
    /// A repeated header name resolves to its first column
    pub fn from_header(header: &RawRow) -> Result<Self> {
        let mut columns: HashMap<String, usize> = HashMap::new();
        for (i, name) in header.fields.iter().enumerate() {
            columns.entry(header_key(name)).or_insert(i);
        }

        let missing: Vec<&str> = CMT_REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|name| !columns.contains_key(&header_key(name)))
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::parse(
                header.line,
                format!("CMT header is missing required columns: {}", missing.join(", ")),
            ));
        }

        Ok(Self {
            columns,
            width: header.fields.len(),
        })
    }

    /// Takes the header off a CMT row stream and parses the rest lazily.
    /// An empty stream or a bad header fails the whole file.
    pub fn parse_stream<I>(mut rows: I) -> Result<ParsedRows<CmtParser, I>>
    where
        I: Iterator<Item = RawRow>,
    {
        let header = rows
            .next()
            .ok_or_else(|| PipelineError::parse(1, "CMT file has no header row"))?;
        let parser = Self::from_header(&header)?;
        Ok(ParsedRows::new(parser, rows))
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.columns.get(&header_key(name)).copied()
    }

    fn required(&self, row: &RawRow, name: &str) -> String {
        self.position(name)
            .map(|i| field(row, i))
            .unwrap_or_default()
    }

    fn optional(&self, row: &RawRow, name: &str) -> Option<String> {
        self.position(name).map(|i| field(row, i))
    }
}

fn header_key(name: &str) -> String {
    name.trim().to_lowercase()
}

impl VendorParser for CmtParser {
    fn vendor(&self) -> DataSource {
        DataSource::Cmt
    }

    fn parse_row(&self, row: &RawRow) -> Result<RawTripRecord> {
        if row.fields.len() != self.width {
            return Err(PipelineError::parse(
                row.line,
                format!("expected {} columns, found {}", self.width, row.fields.len()),
            ));
        }

        let parsed = CmtRow {
            line: row.line,
            trip_no: self.required(row, COL_TRIP_NO),
            operator_name: self.required(row, COL_OPERATOR_NAME),
            medallion: self.required(row, COL_MEDALLION),
            chauffeur_no: self.required(row, COL_CHAUFFEUR_NO),
            meter_on_datetime: self.required(row, COL_METER_ON),
            meter_off_datetime: self.required(row, COL_METER_OFF),
            trip_length: self.optional(row, COL_TRIP_LENGTH),
            pickup_latitude: self.optional(row, COL_PICKUP_LAT),
            pickup_longitude: self.optional(row, COL_PICKUP_LON),
            pickup_location: self.optional(row, COL_PICKUP_LOCATION),
            dropoff_latitude: self.optional(row, COL_DROPOFF_LAT),
            dropoff_longitude: self.optional(row, COL_DROPOFF_LON),
            dropoff_location: self.optional(row, COL_DROPOFF_LOCATION),
            fare: self.required(row, COL_FARE),
            tax: self.optional(row, COL_TAX),
            tips: self.optional(row, COL_TIPS),
            tolls: self.optional(row, COL_TOLLS),
            surcharge: self.optional(row, COL_SURCHARGE),
            trip_total: self.required(row, COL_TRIP_TOTAL),
            payment_type: self.optional(row, COL_PAYMENT_TYPE),
            street_dispatch: self.optional(row, COL_STREET_DISPATCH),
        };
        require_identity(row.line, &parsed.trip_no, &parsed.medallion)?;

        Ok(RawTripRecord::Cmt(parsed))
    }
}
