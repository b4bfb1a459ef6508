use chrono::NaiveDateTime;

use crate::domain::serde_fields::round_cents;
use crate::domain::{DataSource, TripRecord};
use crate::error::{PipelineError, Result};
use crate::pipeline::processing::parser::RawTripRecord;
use crate::pipeline::utils::haversine_miles;

/// Base trait for vendor-specific normalizers
pub trait SourceNormalizer: Send + Sync {
    /// Transform a vendor-native record into the canonical trip schema
    fn normalize(&self, raw: &RawTripRecord) -> Result<TripRecord>;

    /// Vendor this normalizer accepts
    fn source(&self) -> DataSource;

    /// Human-readable name for logs
    fn name(&self) -> &'static str;
}

/// Borrowed view of a vendor row after renaming, before coercion.
/// `None` means the vendor layout has no such column.
pub struct TripFields<'a> {
    pub line: u64,
    pub trip_no: &'a str,
    pub operator_name: &'a str,
    pub medallion: &'a str,
    pub chauffeur_no: &'a str,
    pub meter_on_datetime: &'a str,
    pub meter_off_datetime: &'a str,
    pub trip_length: Option<&'a str>,
    pub pickup_lat: Option<&'a str>,
    pub pickup_lon: Option<&'a str>,
    pub pickup_location: Option<&'a str>,
    pub dropoff_lat: Option<&'a str>,
    pub dropoff_lon: Option<&'a str>,
    pub dropoff_location: Option<&'a str>,
    pub fare: &'a str,
    pub tax: Option<&'a str>,
    pub tips: Option<&'a str>,
    pub tolls: Option<&'a str>,
    pub surcharge: Option<&'a str>,
    pub trip_total: &'a str,
    pub payment_type: Option<&'a str>,
    pub street_or_dispatch: Option<&'a str>,
}

/// Shared coercion helpers used by every vendor normalizer
pub struct NormalizerUtils;

impl NormalizerUtils {
    /// Coerces renamed vendor fields into a canonical record. The vendor
    /// supplies its own datetime parser; everything else is shared.
    pub fn build_trip<F>(fields: TripFields<'_>, source: DataSource, parse_datetime: F) -> Result<TripRecord>
    where
        F: Fn(&str) -> Option<NaiveDateTime>,
    {
        let line = fields.line;
        let trip_no = Self::required_text(line, "trip_no", fields.trip_no)?;
        let medallion = Self::required_text(line, "medallion", fields.medallion)?;
        let chauffeur_no = Self::required_text(line, "chauffeur_no", fields.chauffeur_no)?;

        let meter_on_datetime =
            Self::parse_datetime(line, "meter_on_datetime", fields.meter_on_datetime, &parse_datetime)?;
        let meter_off_datetime =
            Self::parse_datetime(line, "meter_off_datetime", fields.meter_off_datetime, &parse_datetime)?;

        let pickup_lat = Self::parse_coordinate(line, "pickup_lat", fields.pickup_lat)?;
        let pickup_lon = Self::parse_coordinate(line, "pickup_lon", fields.pickup_lon)?;
        let dropoff_lat = Self::parse_coordinate(line, "dropoff_lat", fields.dropoff_lat)?;
        let dropoff_lon = Self::parse_coordinate(line, "dropoff_lon", fields.dropoff_lon)?;

        let trip_length = Self::parse_trip_length(
            line,
            fields.trip_length,
            pickup_lat.zip(pickup_lon),
            dropoff_lat.zip(dropoff_lon),
        )?;

        Ok(TripRecord {
            trip_no,
            operator_name: fields.operator_name.trim().to_string(),
            medallion,
            chauffeur_no,
            meter_on_datetime,
            meter_off_datetime,
            trip_length,
            pickup_lat,
            pickup_lon,
            pickup_location: Self::text_or_default(fields.pickup_location),
            dropoff_lat,
            dropoff_lon,
            dropoff_location: Self::text_or_default(fields.dropoff_location),
            fare: Self::parse_money(line, "fare", fields.fare)?,
            tax: Self::parse_optional_money(line, "tax", fields.tax)?,
            tips: Self::parse_optional_money(line, "tips", fields.tips)?,
            tolls: Self::parse_optional_money(line, "tolls", fields.tolls)?,
            surcharge: Self::parse_optional_money(line, "surcharge", fields.surcharge)?,
            trip_total: Self::parse_money(line, "trip_total", fields.trip_total)?,
            payment_type: Self::normalize_payment_type(fields.payment_type.unwrap_or("")),
            street_or_dispatch: Self::text_or_default(fields.street_or_dispatch),
            data_source: source,
        })
    }

    pub fn required_text(line: u64, field: &str, value: &str) -> Result<String> {
        let value = value.trim();
        if value.is_empty() {
            return Err(PipelineError::schema(line, field, "is required"));
        }
        Ok(value.to_string())
    }

    pub fn text_or_default(value: Option<&str>) -> String {
        value.map(|v| v.trim().to_string()).unwrap_or_default()
    }

    /// Blank is absent; anything else must parse
    pub fn parse_datetime<F>(line: u64, field: &str, value: &str, parse: &F) -> Result<Option<NaiveDateTime>>
    where
        F: Fn(&str) -> Option<NaiveDateTime>,
    {
        let value = value.trim();
        if value.is_empty() {
            return Ok(None);
        }
        parse(value)
            .map(Some)
            .ok_or_else(|| PipelineError::schema(line, field, format!("'{}' is not a datetime", value)))
    }

    /// Strips currency formatting and rounds to cents
    pub fn parse_money(line: u64, field: &str, value: &str) -> Result<f64> {
        let cleaned = value.trim().replace(['$', ','], "");
        if cleaned.is_empty() {
            return Err(PipelineError::schema(line, field, "is required"));
        }
        Self::parse_finite(&cleaned)
            .map(round_cents)
            .ok_or_else(|| PipelineError::schema(line, field, format!("'{}' is not a money amount", value.trim())))
    }

    /// Minor money fields default to zero when absent or blank
    pub fn parse_optional_money(line: u64, field: &str, value: Option<&str>) -> Result<f64> {
        match value.map(str::trim) {
            None | Some("") => Ok(0.0),
            Some(v) => Self::parse_money(line, field, v),
        }
    }

    /// `0` and blank both mean the device had no fix
    pub fn parse_coordinate(line: u64, field: &str, value: Option<&str>) -> Result<Option<f64>> {
        let value = match value.map(str::trim) {
            None | Some("") => return Ok(None),
            Some(v) => v,
        };
        let parsed = Self::parse_finite(value)
            .ok_or_else(|| PipelineError::schema(line, field, format!("'{}' is not a coordinate", value)))?;
        if parsed == 0.0 {
            Ok(None)
        } else {
            Ok(Some(parsed))
        }
    }

    /// Uses the vendor's trip length when present, otherwise the great-circle
    /// distance between pickup and dropoff.
    pub fn parse_trip_length(
        line: u64,
        value: Option<&str>,
        pickup: Option<(f64, f64)>,
        dropoff: Option<(f64, f64)>,
    ) -> Result<Option<f64>> {
        match value.map(str::trim) {
            Some(v) if !v.is_empty() => Self::parse_finite(v).map(Some).ok_or_else(|| {
                PipelineError::schema(line, "trip_length", format!("'{}' is not a number", v))
            }),
            _ => Ok(pickup
                .zip(dropoff)
                .map(|(from, to)| round_cents(haversine_miles(from, to)))),
        }
    }

    /// `f64::from_str` accepts "NaN" and "inf"; neither is a measurement
    fn parse_finite(value: &str) -> Option<f64> {
        value.parse::<f64>().ok().filter(|v| v.is_finite())
    }

    pub fn normalize_payment_type(value: &str) -> String {
        let value = value.trim();
        match value.to_uppercase().as_str() {
            "CASH" => "Cash".to_string(),
            "CC CARD" => "Credit Card".to_string(),
            _ => value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_strips_formatting() {
        assert_eq!(NormalizerUtils::parse_money(1, "fare", "$1,234.567").unwrap(), 1234.57);
        assert_eq!(NormalizerUtils::parse_money(1, "fare", " 9.75 ").unwrap(), 9.75);
        assert!(NormalizerUtils::parse_money(1, "fare", "").is_err());

        let err = NormalizerUtils::parse_money(4, "fare", "abc").unwrap_err();
        assert!(matches!(err, PipelineError::Schema { line: 4, ref field, .. } if field == "fare"));
    }

    #[test]
    fn test_optional_money_defaults_to_zero() {
        assert_eq!(NormalizerUtils::parse_optional_money(1, "tax", None).unwrap(), 0.0);
        assert_eq!(NormalizerUtils::parse_optional_money(1, "tax", Some("  ")).unwrap(), 0.0);
        assert_eq!(NormalizerUtils::parse_optional_money(1, "tax", Some("$0.50")).unwrap(), 0.5);
    }

    #[test]
    fn test_zero_coordinate_is_absent() {
        assert_eq!(NormalizerUtils::parse_coordinate(1, "pickup_lat", Some("0")).unwrap(), None);
        assert_eq!(NormalizerUtils::parse_coordinate(1, "pickup_lat", Some("")).unwrap(), None);
        assert_eq!(
            NormalizerUtils::parse_coordinate(1, "pickup_lat", Some("39.95")).unwrap(),
            Some(39.95)
        );
        assert!(NormalizerUtils::parse_coordinate(1, "pickup_lat", Some("north")).is_err());
    }

    #[test]
    fn test_trip_length_computed_when_missing() {
        let pickup = Some((39.9526, -75.1652));
        let dropoff = Some((39.9489, -75.1500));

        let computed = NormalizerUtils::parse_trip_length(1, None, pickup, dropoff)
            .unwrap()
            .unwrap();
        assert!(computed > 0.8 && computed < 0.9);

        let given = NormalizerUtils::parse_trip_length(1, Some("2.5"), pickup, dropoff).unwrap();
        assert_eq!(given, Some(2.5));

        assert_eq!(NormalizerUtils::parse_trip_length(1, Some(""), None, dropoff).unwrap(), None);
    }

    #[test]
    fn test_non_finite_numbers_are_schema_errors() {
        for value in ["NaN", "inf", "-infinity"] {
            assert!(matches!(
                NormalizerUtils::parse_money(2, "fare", value),
                Err(PipelineError::Schema { line: 2, .. })
            ));
            assert!(NormalizerUtils::parse_coordinate(2, "pickup_lat", Some(value)).is_err());
            assert!(NormalizerUtils::parse_trip_length(2, Some(value), None, None).is_err());
        }
        assert!(NormalizerUtils::parse_optional_money(2, "tips", Some("nan")).is_err());
    }

    #[test]
    fn test_payment_type_normalization() {
        assert_eq!(NormalizerUtils::normalize_payment_type("CASH"), "Cash");
        assert_eq!(NormalizerUtils::normalize_payment_type(" cc card "), "Credit Card");
        assert_eq!(NormalizerUtils::normalize_payment_type("Voucher"), "Voucher");
    }
}
