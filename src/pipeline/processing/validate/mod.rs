use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::TripRecord;
use crate::observability::metrics;
use crate::pipeline::utils::haversine_miles;

pub mod source_stats;

pub use source_stats::{SourceSummary, TripLengthComparison};

/// Kinds of findings the validator can raise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Trip length disagrees with the straight-line distance
    TripLengthVsDistance,
    /// Trip length implies an implausible speed
    TripLengthVsDuration,
    NegativeAmount,
    /// Meter switched off before it was switched on
    MeterOrder,
    OutOfServiceArea,
    /// Per-source trip length distributions disagree
    SourceTripLengthMismatch,
}

impl WarningKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningKind::TripLengthVsDistance => "trip_length_vs_distance",
            WarningKind::TripLengthVsDuration => "trip_length_vs_duration",
            WarningKind::NegativeAmount => "negative_amount",
            WarningKind::MeterOrder => "meter_order",
            WarningKind::OutOfServiceArea => "out_of_service_area",
            WarningKind::SourceTripLengthMismatch => "source_trip_length_mismatch",
        }
    }
}

/// Severity levels for findings
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A finding about one record, or about a whole source when `key` is absent.
/// Findings never block the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationWarning {
    pub key: Option<String>,
    pub kind: WarningKind,
    pub severity: Severity,
    pub field: Option<String>,
    pub message: String,
}

/// Service-area bounding box in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn contains(&self, (lat, lon): (f64, f64)) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lon >= self.min_lon && lon <= self.max_lon
    }
}

impl Default for BoundingBox {
    /// Philadelphia and its surrounding counties
    fn default() -> Self {
        Self {
            min_lon: -76.0,
            max_lon: -74.5,
            min_lat: 39.5,
            max_lat: 40.5,
        }
    }
}

/// Tolerances for the record checks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Fixed slack, in miles, between trip length and straight-line distance
    pub abs_tolerance_miles: f64,
    /// Slack proportional to the straight-line distance
    pub rel_tolerance: f64,
    pub max_speed_mph: f64,
    pub service_area: BoundingBox,
    /// MAD multiplier for the per-source outlier filter
    pub outlier_scale: f64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            abs_tolerance_miles: 0.5,
            rel_tolerance: 1.0,
            max_speed_mph: 80.0,
            service_area: BoundingBox::default(),
            outlier_scale: 2.0,
        }
    }
}

/// Record-level invariant checks
#[derive(Debug, Clone, Default)]
pub struct Validator {
    pub config: ValidatorConfig,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ValidatorConfig) -> Self {
        Self { config }
    }

    /// All findings for one record
    pub fn check(&self, trip: &TripRecord) -> Vec<ValidationWarning> {
        let key = trip.natural_key().to_string();
        let mut warnings = Vec::new();
        let mut warn = |kind: WarningKind, severity: Severity, field: &str, message: String| {
            warnings.push(ValidationWarning {
                key: Some(key.clone()),
                kind,
                severity,
                field: Some(field.to_string()),
                message,
            });
        };

        if let Some(length) = trip.trip_length {
            match (trip.pickup_point(), trip.dropoff_point()) {
                (Some(from), Some(to)) => {
                    let geodesic = haversine_miles(from, to);
                    let allowed = self.config.abs_tolerance_miles + self.config.rel_tolerance * geodesic;
                    if (length - geodesic).abs() > allowed {
                        warn(
                            WarningKind::TripLengthVsDistance,
                            Severity::Warning,
                            "trip_length",
                            format!(
                                "trip length {:.2} mi differs from straight-line distance {:.2} mi by more than {:.2} mi",
                                length, geodesic, allowed
                            ),
                        );
                    }
                }
                _ => {
                    if let Some(minutes) = trip.elapsed_minutes().filter(|m| *m > 0.0) {
                        let mph = length / (minutes / 60.0);
                        if mph > self.config.max_speed_mph {
                            warn(
                                WarningKind::TripLengthVsDuration,
                                Severity::Warning,
                                "trip_length",
                                format!(
                                    "trip length {:.2} mi over {:.1} min implies {:.0} mph",
                                    length, minutes, mph
                                ),
                            );
                        }
                    }
                }
            }
        }

        for (field, amount) in trip.money_fields() {
            if amount < 0.0 {
                warn(
                    WarningKind::NegativeAmount,
                    Severity::Error,
                    field,
                    format!("{} is negative ({:.2})", field, amount),
                );
            }
        }

        if let (Some(on), Some(off)) = (trip.meter_on_datetime, trip.meter_off_datetime) {
            if off < on {
                warn(
                    WarningKind::MeterOrder,
                    Severity::Error,
                    "meter_off_datetime",
                    format!("meter off {} is before meter on {}", off, on),
                );
            }
        }

        for (field, point) in [("pickup", trip.pickup_point()), ("dropoff", trip.dropoff_point())] {
            if let Some(p) = point {
                if !self.config.service_area.contains(p) {
                    warn(
                        WarningKind::OutOfServiceArea,
                        Severity::Warning,
                        field,
                        format!("{} ({:.6}, {:.6}) is outside the service area", field, p.0, p.1),
                    );
                }
            }
        }

        for w in &warnings {
            metrics::validate::warning(w.kind.as_str());
        }
        if !warnings.is_empty() {
            debug!(key = %key, count = warnings.len(), "Record has validation findings");
        }
        warnings
    }

    /// Passes every trip through unchanged, handing findings to `on_warning`
    /// as each record is pulled.
    pub fn validate_stream<I, F>(&self, trips: I, on_warning: F) -> ValidatedTrips<'_, I, F>
    where
        I: Iterator<Item = TripRecord>,
        F: FnMut(ValidationWarning),
    {
        ValidatedTrips {
            validator: self,
            trips,
            on_warning,
        }
    }
}

pub struct ValidatedTrips<'a, I, F> {
    validator: &'a Validator,
    trips: I,
    on_warning: F,
}

impl<'a, I, F> Iterator for ValidatedTrips<'a, I, F>
where
    I: Iterator<Item = TripRecord>,
    F: FnMut(ValidationWarning),
{
    type Item = TripRecord;

    fn next(&mut self) -> Option<TripRecord> {
        let trip = self.trips.next()?;
        for warning in self.validator.check(&trip) {
            (self.on_warning)(warning);
        }
        Some(trip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fixtures::{datetime, trip};

    fn kinds(warnings: &[ValidationWarning]) -> Vec<WarningKind> {
        warnings.iter().map(|w| w.kind).collect()
    }

    #[test]
    fn test_plausible_trip_has_no_findings() {
        let validator = Validator::new();
        assert!(validator.check(&trip("1", "M1", "C1")).is_empty());
    }

    #[test]
    fn test_meter_off_before_meter_on_flagged() {
        let mut t = trip("1", "M1", "C1");
        t.meter_off_datetime = Some(datetime(2015, 1, 1, 9, 0));
        let warnings = Validator::new().check(&t);
        assert_eq!(kinds(&warnings), vec![WarningKind::MeterOrder]);
        assert_eq!(warnings[0].field.as_deref(), Some("meter_off_datetime"));
    }

    #[test]
    fn test_trip_length_far_from_distance_flagged() {
        let mut t = trip("1", "M1", "C1");
        t.trip_length = Some(25.0);
        assert_eq!(kinds(&Validator::new().check(&t)), vec![WarningKind::TripLengthVsDistance]);
    }

    #[test]
    fn test_speed_check_used_without_coordinates() {
        let mut t = trip("1", "M1", "C1");
        t.pickup_lat = None;
        t.pickup_lon = None;
        // 30 miles in 14 minutes
        t.trip_length = Some(30.0);
        assert_eq!(kinds(&Validator::new().check(&t)), vec![WarningKind::TripLengthVsDuration]);

        t.trip_length = Some(3.0);
        assert!(Validator::new().check(&t).is_empty());
    }

    #[test]
    fn test_negative_money_and_bounds_flagged() {
        let mut t = trip("1", "M1", "C1");
        t.tips = -1.0;
        t.dropoff_lat = Some(41.0);
        t.trip_length = None;
        let warnings = Validator::new().check(&t);
        assert_eq!(
            kinds(&warnings),
            vec![WarningKind::NegativeAmount, WarningKind::OutOfServiceArea]
        );
        assert_eq!(warnings[1].field.as_deref(), Some("dropoff"));
    }

    #[test]
    fn test_stream_passes_records_through_unchanged() {
        let mut bad = trip("2", "M1", "C1");
        bad.fare = -5.0;
        let input = vec![trip("1", "M1", "C1"), bad];

        let mut found = Vec::new();
        let validator = Validator::new();
        let output: Vec<_> = validator
            .validate_stream(input.clone().into_iter(), |w| found.push(w))
            .collect();

        assert_eq!(output, input);
        assert_eq!(found.len(), 1);
        assert!(found[0].key.as_deref().unwrap_or("").starts_with("2/M1/C1/"));
    }
}
