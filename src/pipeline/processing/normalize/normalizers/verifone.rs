use chrono::NaiveDateTime;

use super::base::{NormalizerUtils, SourceNormalizer, TripFields};
use crate::constants::CANONICAL_DATETIME_FORMAT;
use crate::domain::{DataSource, TripRecord};
use crate::error::{PipelineError, Result};
use crate::pipeline::processing::parser::RawTripRecord;

/// Normalizer for headerless Verifone exports
#[derive(Debug, Default, Clone, Copy)]
pub struct VerifoneNormalizer;

/// `YYYY-MM-DD HH:MM:SS[.fff]`; fractional seconds are dropped
pub fn parse_verifone_datetime(value: &str) -> Option<NaiveDateTime> {
    let seconds = value.get(..19).unwrap_or(value);
    NaiveDateTime::parse_from_str(seconds, CANONICAL_DATETIME_FORMAT).ok()
}

impl SourceNormalizer for VerifoneNormalizer {
    fn normalize(&self, raw: &RawTripRecord) -> Result<TripRecord> {
        let row = match raw {
            RawTripRecord::Verifone(row) => row,
            other => {
                return Err(PipelineError::parse(
                    other.line(),
                    format!("{} row handed to the Verifone normalizer", other.data_source()),
                ))
            }
        };

        let fields = TripFields {
            line: row.line,
            trip_no: &row.trip_no,
            operator_name: &row.operator_name,
            medallion: &row.medallion,
            chauffeur_no: &row.chauffeur_no,
            meter_on_datetime: &row.meter_on_datetime,
            meter_off_datetime: &row.meter_off_datetime,
            trip_length: Some(&row.trip_length),
            pickup_lat: Some(&row.pickup_latitude),
            pickup_lon: Some(&row.pickup_longitude),
            pickup_location: Some(&row.pickup_location),
            dropoff_lat: Some(&row.dropoff_latitude),
            dropoff_lon: Some(&row.dropoff_longitude),
            dropoff_location: Some(&row.dropoff_location),
            fare: &row.fare,
            tax: Some(&row.tax),
            tips: Some(&row.tips),
            tolls: Some(&row.tolls),
            surcharge: Some(&row.surcharge),
            trip_total: &row.trip_total,
            payment_type: Some(&row.payment_type),
            street_or_dispatch: Some(&row.street_dispatch),
        };

        NormalizerUtils::build_trip(fields, DataSource::Verifone, parse_verifone_datetime)
    }

    fn source(&self) -> DataSource {
        DataSource::Verifone
    }

    fn name(&self) -> &'static str {
        "Verifone"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fixtures::datetime;
    use crate::pipeline::processing::parser::{RawRow, VendorParser, VerifoneParser};

    fn raw(fields: [&str; 23]) -> RawTripRecord {
        let row = RawRow::new(5, fields.iter().map(|s| s.to_string()).collect());
        VerifoneParser.parse_row(&row).unwrap()
    }

    fn sample() -> [&'static str; 23] {
        [
            "500012345", "10042", "Checker Cab", "P1234", "VX520", "123456",
            "2015-01-01 10:07:00.000", "2015-01-01 10:21:59.999", "",
            "39.9526", "-75.1652", "1400 JFK Blvd 19102", "39.9489", "-75.1500",
            "520 Chestnut St 19106", "$9.75", "", "$2.00", "$0.00", "",
            "$11.75", "CC CARD", "",
        ]
    }

    #[test]
    fn test_normalize_verifone_row() {
        let trip = VerifoneNormalizer.normalize(&raw(sample())).unwrap();

        assert_eq!(trip.trip_no, "10042");
        assert_eq!(trip.medallion, "P1234");
        assert_eq!(trip.meter_on_datetime, Some(datetime(2015, 1, 1, 10, 7)));
        // Fractional seconds truncate, never round up
        assert_eq!(
            trip.meter_off_datetime.map(|d| d.format("%H:%M:%S").to_string()),
            Some("10:21:59".to_string())
        );
        assert_eq!(trip.fare, 9.75);
        assert_eq!(trip.tax, 0.0);
        assert_eq!(trip.surcharge, 0.0);
        assert_eq!(trip.payment_type, "Credit Card");
        assert_eq!(trip.street_or_dispatch, "");
        assert_eq!(trip.data_source, DataSource::Verifone);

        let length = trip.trip_length.unwrap();
        assert!(length > 0.8 && length < 0.9, "computed length {}", length);
    }

    #[test]
    fn test_blank_chauffeur_is_schema_error() {
        let mut fields = sample();
        fields[5] = "";
        let err = VerifoneNormalizer.normalize(&raw(fields)).unwrap_err();
        assert!(matches!(err, PipelineError::Schema { ref field, .. } if field == "chauffeur_no"));
    }

    #[test]
    fn test_bad_datetime_is_schema_error() {
        let mut fields = sample();
        fields[6] = "01/01/2015 10:07";
        let err = VerifoneNormalizer.normalize(&raw(fields)).unwrap_err();
        assert!(matches!(err, PipelineError::Schema { line: 5, ref field, .. } if field == "meter_on_datetime"));
    }

    #[test]
    fn test_nan_fare_is_schema_error() {
        let mut fields = sample();
        fields[15] = "NaN";
        let err = VerifoneNormalizer.normalize(&raw(fields)).unwrap_err();
        assert!(matches!(err, PipelineError::Schema { line: 5, ref field, .. } if field == "fare"));
    }
}
