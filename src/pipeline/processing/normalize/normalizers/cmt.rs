use chrono::NaiveDateTime;

use super::base::{NormalizerUtils, SourceNormalizer, TripFields};
use crate::domain::{DataSource, TripRecord};
use crate::error::{PipelineError, Result};
use crate::pipeline::processing::parser::RawTripRecord;

/// Normalizer for header-keyed CMT exports
#[derive(Debug, Default, Clone, Copy)]
pub struct CmtNormalizer;

/// `MM/DD/YYYY HH:MM`, with or without seconds
pub fn parse_cmt_datetime(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, "%m/%d/%Y %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%m/%d/%Y %H:%M"))
        .ok()
}

impl SourceNormalizer for CmtNormalizer {
    fn normalize(&self, raw: &RawTripRecord) -> Result<TripRecord> {
        let row = match raw {
            RawTripRecord::Cmt(row) => row,
            other => {
                return Err(PipelineError::parse(
                    other.line(),
                    format!("{} row handed to the CMT normalizer", other.data_source()),
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
            trip_length: row.trip_length.as_deref(),
            pickup_lat: row.pickup_latitude.as_deref(),
            pickup_lon: row.pickup_longitude.as_deref(),
            pickup_location: row.pickup_location.as_deref(),
            dropoff_lat: row.dropoff_latitude.as_deref(),
            dropoff_lon: row.dropoff_longitude.as_deref(),
            dropoff_location: row.dropoff_location.as_deref(),
            fare: &row.fare,
            tax: row.tax.as_deref(),
            tips: row.tips.as_deref(),
            tolls: row.tolls.as_deref(),
            surcharge: row.surcharge.as_deref(),
            trip_total: &row.trip_total,
            payment_type: row.payment_type.as_deref(),
            street_or_dispatch: row.street_dispatch.as_deref(),
        };

        NormalizerUtils::build_trip(fields, DataSource::Cmt, parse_cmt_datetime)
    }

    fn source(&self) -> DataSource {
        DataSource::Cmt
    }

    fn name(&self) -> &'static str {
        "CMT"
    }
}
