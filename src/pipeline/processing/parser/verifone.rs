use super::{field, require_identity, RawRow, RawTripRecord, VendorParser, VerifoneRow};
use crate::constants::VERIFONE_COLUMNS;
use crate::domain::DataSource;
use crate::error::{PipelineError, Result};

/// Headerless positional Verifone export
#[derive(Debug, Clone, Copy, Default)]
pub struct VerifoneParser;

impl VendorParser for VerifoneParser {
    fn vendor(&self) -> DataSource {
        DataSource::Verifone
    }

    fn parse_row(&self, row: &RawRow) -> Result<RawTripRecord> {
        if row.fields.len() != VERIFONE_COLUMNS.len() {
            return Err(PipelineError::parse(
                row.line,
                format!(
                    "expected {} columns, found {}",
                    VERIFONE_COLUMNS.len(),
                    row.fields.len()
                ),
            ));
        }

        let parsed = VerifoneRow {
            line: row.line,
            shift_no: field(row, 0),
            trip_no: field(row, 1),
            operator_name: field(row, 2),
            medallion: field(row, 3),
            device_type: field(row, 4),
            chauffeur_no: field(row, 5),
            meter_on_datetime: field(row, 6),
            meter_off_datetime: field(row, 7),
            trip_length: field(row, 8),
            pickup_latitude: field(row, 9),
            pickup_longitude: field(row, 10),
            pickup_location: field(row, 11),
            dropoff_latitude: field(row, 12),
            dropoff_longitude: field(row, 13),
            dropoff_location: field(row, 14),
            fare: field(row, 15),
            tax: field(row, 16),
            tips: field(row, 17),
            tolls: field(row, 18),
            surcharge: field(row, 19),
            trip_total: field(row, 20),
            payment_type: field(row, 21),
            street_dispatch: field(row, 22),
        };
        require_identity(row.line, &parsed.trip_no, &parsed.medallion)?;

        Ok(RawTripRecord::Verifone(parsed))
    }
}
