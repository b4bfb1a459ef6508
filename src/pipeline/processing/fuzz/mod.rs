use std::path::PathBuf;

use chrono::{Datelike, Duration, NaiveDateTime, Timelike};
use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::{AnonymizedTripRecord, FuzziedTripRecord};
use crate::error::{PipelineError, Result};
use crate::observability::metrics;
use crate::pipeline::processing::validate::BoundingBox;
use crate::pipeline::utils::{destination, haversine_meters, round_coordinate};

pub mod anchors;

pub use anchors::{Anchor, AnchorSource, Candidate, LatticeAnchors, PointAnchorIndex};

const SECONDS_PER_DAY: u32 = 24 * 60 * 60;

/// Trailing number of a street address, e.g. the zip in "... PA 19102"
static ZIP_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r".*[^\d](\d+)$").expect("zip pattern is a valid regex"));

/// Perturbation settings for the public release
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FuzzConfig {
    pub round_minutes: u32,
    pub max_radius_m: f64,
    pub lattice_spacing_m: f64,
    pub candidate_count: usize,
    /// Share of the remaining radius available for jitter around the anchor
    pub jitter_fraction: f64,
    pub seed_salt: String,
    /// CSV of `anchor_id,lat,lon`; the lattice is used when unset
    pub anchors_file: Option<PathBuf>,
    /// Hash-grid cell edge for anchor files
    pub anchor_cell_m: f64,
}

impl Default for FuzzConfig {
    fn default() -> Self {
        Self {
            round_minutes: 15,
            max_radius_m: 400.0,
            lattice_spacing_m: 150.0,
            candidate_count: 4,
            jitter_fraction: 0.5,
            seed_salt: "phl-taxitrips".to_string(),
            anchors_file: None,
            anchor_cell_m: 250.0,
        }
    }
}

impl FuzzConfig {
    pub fn validate(&self) -> Result<()> {
        let fail = |message: String| -> Result<()> { Err(PipelineError::Config(message)) };

        if self.round_minutes == 0 || SECONDS_PER_DAY % (self.round_minutes * 60) != 0 {
            return fail(format!(
                "fuzz.round_minutes must divide a day evenly, got {}",
                self.round_minutes
            ));
        }
        if !(self.max_radius_m > 0.0) {
            return fail(format!("fuzz.max_radius_m must be positive, got {}", self.max_radius_m));
        }
        // A full cell diagonal leaves room for the longitude step stretching
        // south of the lattice's center latitude
        if !(self.lattice_spacing_m > 0.0) || self.lattice_spacing_m * std::f64::consts::SQRT_2 >= self.max_radius_m {
            return fail(format!(
                "fuzz.lattice_spacing_m must be positive and leave every point within {}m of a node, got {}",
                self.max_radius_m, self.lattice_spacing_m
            ));
        }
        if self.candidate_count == 0 {
            return fail("fuzz.candidate_count must be at least 1".to_string());
        }
        // Zero would put every point near an anchor exactly on it
        if !(self.jitter_fraction > 0.0 && self.jitter_fraction < 1.0) {
            return fail(format!(
                "fuzz.jitter_fraction must be in (0, 1), got {}",
                self.jitter_fraction
            ));
        }
        Ok(())
    }
}

/// Rounds to the nearest multiple of `minutes` since midnight; exact halves
/// round up. `minutes` must divide a day.
pub fn round_to_interval(value: NaiveDateTime, minutes: u32) -> NaiveDateTime {
    let step = i64::from(minutes) * 60;
    let since_midnight = i64::from(value.num_seconds_from_midnight());
    let rounded = (since_midnight + step / 2).div_euclid(step) * step;
    value - Duration::nanoseconds(i64::from(value.nanosecond()))
        + Duration::seconds(rounded - since_midnight)
}

/// Zip code at the end of a street address
pub fn extract_zip(location: &str) -> Option<String> {
    ZIP_PATTERN
        .captures(location.trim())
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_string())
}

/// Deterministic RNG for one endpoint of one record
fn endpoint_rng(salt: &str, key_material: &str, which: &str) -> StdRng {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b"|");
    hasher.update(key_material.as_bytes());
    hasher.update(b"|");
    hasher.update(which.as_bytes());
    let digest = hasher.finalize();

    let mut seed = [0u8; 8];
    seed.copy_from_slice(&digest[..8]);
    StdRng::seed_from_u64(u64::from_le_bytes(seed))
}

/// Calendar fields derived from one rounded endpoint time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeParts {
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub day: Option<u32>,
    pub hour: Option<u32>,
    pub dow: Option<u32>,
    pub day_of_week: Option<String>,
    /// Truncated to the hour
    pub general_time: Option<NaiveDateTime>,
}

impl TimeParts {
    pub fn of(value: Option<NaiveDateTime>) -> Self {
        let Some(value) = value else {
            return Self::default();
        };
        Self {
            year: Some(value.year()),
            month: Some(value.month()),
            day: Some(value.day()),
            hour: Some(value.hour()),
            dow: Some(value.weekday().num_days_from_sunday()),
            day_of_week: Some(value.format("%A").to_string()),
            general_time: value.date().and_hms_opt(value.hour(), 0, 0),
        }
    }
}

/// A perturbed coordinate and the anchor it was drawn toward
#[derive(Debug, Clone, PartialEq)]
pub struct FuzzedPoint {
    pub lat: f64,
    pub lon: f64,
    pub anchor_id: String,
}

/// Generalizes time and location of anonymized trips
pub struct Fuzzer {
    pub config: FuzzConfig,
    anchors: Box<dyn AnchorSource>,
}

impl Fuzzer {
    pub fn new(config: FuzzConfig, anchors: Box<dyn AnchorSource>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, anchors })
    }

    /// Builds the anchor set the config asks for: the anchors file when set,
    /// otherwise a lattice over `service_area`.
    pub fn from_config(config: FuzzConfig, service_area: BoundingBox) -> Result<Self> {
        config.validate()?;
        let anchors: Box<dyn AnchorSource> = match &config.anchors_file {
            Some(path) => Box::new(PointAnchorIndex::from_csv_path(path, config.anchor_cell_m)?),
            None => Box::new(LatticeAnchors::new(service_area, config.lattice_spacing_m)?),
        };
        tracing::info!(anchors = %anchors.describe(), radius_m = config.max_radius_m, "Fuzzer ready");
        Ok(Self { config, anchors })
    }

    pub fn round_time(&self, value: Option<NaiveDateTime>) -> Option<NaiveDateTime> {
        value.map(|v| round_to_interval(v, self.config.round_minutes))
    }

    /// Moves `point` toward one of the nearest anchors, staying within the
    /// configured radius of the original.
    pub fn perturb(&self, rng: &mut StdRng, trip_no: &str, which: &str, point: (f64, f64)) -> Result<FuzzedPoint> {
        let radius = self.config.max_radius_m;
        let candidates = self.anchors.candidates_within(point, radius);
        if candidates.is_empty() {
            return Err(PipelineError::FuzzBounds {
                trip_no: trip_no.to_string(),
                which: which.to_string(),
                lat: point.0,
                lon: point.1,
                radius_m: radius,
            });
        }

        let pool = candidates.len().min(self.config.candidate_count);
        let chosen = &candidates[rng.gen_range(0..pool)];
        let budget = self.config.jitter_fraction * (radius - chosen.distance_m).max(0.0);
        let bearing = rng.gen_range(0.0..360.0);
        let jitter = rng.gen::<f64>() * budget;

        let moved = destination(chosen.anchor.point(), bearing, jitter);
        let moved = (round_coordinate(moved.0), round_coordinate(moved.1));
        let (lat, lon) = if haversine_meters(point, moved) <= radius {
            moved
        } else {
            chosen.anchor.point()
        };

        Ok(FuzzedPoint {
            lat,
            lon,
            anchor_id: chosen.anchor.id.clone(),
        })
    }

    pub fn fuzz(&self, record: AnonymizedTripRecord) -> Result<FuzziedTripRecord> {
        let key_material = record.key_material();
        let salt = &self.config.seed_salt;

        let pickup = match (record.pickup_lat, record.pickup_lon) {
            (Some(lat), Some(lon)) => {
                let mut rng = endpoint_rng(salt, &key_material, "pickup");
                Some(self.perturb(&mut rng, &record.trip_no, "pickup", (lat, lon))?)
            }
            _ => None,
        };
        let dropoff = match (record.dropoff_lat, record.dropoff_lon) {
            (Some(lat), Some(lon)) => {
                let mut rng = endpoint_rng(salt, &key_material, "dropoff");
                Some(self.perturb(&mut rng, &record.trip_no, "dropoff", (lat, lon))?)
            }
            _ => None,
        };

        let meter_on_datetime = self.round_time(record.meter_on_datetime);
        let meter_off_datetime = self.round_time(record.meter_off_datetime);
        let trip_duration_minutes = match (meter_on_datetime, meter_off_datetime) {
            (Some(on), Some(off)) => Some((off - on).num_minutes()),
            _ => None,
        };

        let pickup_time = TimeParts::of(meter_on_datetime);
        let dropoff_time = TimeParts::of(meter_off_datetime);

        metrics::fuzz::record_fuzzed();
        Ok(FuzziedTripRecord {
            pickup_zip: extract_zip(&record.pickup_location),
            dropoff_zip: extract_zip(&record.dropoff_location),
            trip_no: record.trip_no,
            operator_name: record.operator_name,
            medallion_id: record.medallion_id,
            chauffeur_id: record.chauffeur_id,
            meter_on_datetime,
            meter_off_datetime,
            trip_duration_minutes,
            pickup_year: pickup_time.year,
            pickup_month: pickup_time.month,
            pickup_day: pickup_time.day,
            pickup_hour: pickup_time.hour,
            pickup_dow: pickup_time.dow,
            pickup_day_of_week: pickup_time.day_of_week,
            pickup_general_time: pickup_time.general_time,
            dropoff_year: dropoff_time.year,
            dropoff_month: dropoff_time.month,
            dropoff_day: dropoff_time.day,
            dropoff_hour: dropoff_time.hour,
            dropoff_dow: dropoff_time.dow,
            dropoff_day_of_week: dropoff_time.day_of_week,
            dropoff_general_time: dropoff_time.general_time,
            trip_length: record.trip_length,
            pickup_lat: pickup.as_ref().map(|p| p.lat),
            pickup_lon: pickup.as_ref().map(|p| p.lon),
            pickup_anchor_id: pickup.map(|p| p.anchor_id),
            dropoff_lat: dropoff.as_ref().map(|p| p.lat),
            dropoff_lon: dropoff.as_ref().map(|p| p.lon),
            dropoff_anchor_id: dropoff.map(|p| p.anchor_id),
            fare: record.fare,
            tax: record.tax,
            tips: record.tips,
            tolls: record.tolls,
            surcharge: record.surcharge,
            trip_total: record.trip_total,
            payment_type: record.payment_type,
            street_or_dispatch: record.street_or_dispatch,
            data_source: record.data_source,
        })
    }
}
