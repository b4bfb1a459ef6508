use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod serde_fields;

/// Meter-payment provider a record was exported by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Verifone,
    Cmt,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Verifone => crate::constants::VERIFONE_SOURCE,
            DataSource::Cmt => crate::constants::CMT_SOURCE,
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical trip record shared by both vendors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripRecord {
    pub trip_no: String,
    pub operator_name: String,
    pub medallion: String,
    pub chauffeur_no: String,
    #[serde(with = "serde_fields::datetime")]
    pub meter_on_datetime: Option<NaiveDateTime>,
    #[serde(with = "serde_fields::datetime")]
    pub meter_off_datetime: Option<NaiveDateTime>,
    pub trip_length: Option<f64>,
    pub pickup_lat: Option<f64>,
    pub pickup_lon: Option<f64>,
    pub pickup_location: String,
    pub dropoff_lat: Option<f64>,
    pub dropoff_lon: Option<f64>,
    pub dropoff_location: String,
    #[serde(with = "serde_fields::money")]
    pub fare: f64,
    #[serde(with = "serde_fields::money")]
    pub tax: f64,
    #[serde(with = "serde_fields::money")]
    pub tips: f64,
    #[serde(with = "serde_fields::money")]
    pub tolls: f64,
    #[serde(with = "serde_fields::money")]
    pub surcharge: f64,
    #[serde(with = "serde_fields::money")]
    pub trip_total: f64,
    pub payment_type: String,
    pub street_or_dispatch: String,
    pub data_source: DataSource,
}

/// Uniqueness key for upserts: one trip across repeated ingestions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NaturalKey {
    pub trip_no: String,
    pub medallion: String,
    pub chauffeur_no: String,
    pub meter_on_datetime: Option<NaiveDateTime>,
    pub meter_off_datetime: Option<NaiveDateTime>,
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.trip_no,
            self.medallion,
            self.chauffeur_no,
            serde_fields::format_datetime(self.meter_on_datetime),
            serde_fields::format_datetime(self.meter_off_datetime),
        )
    }
}

impl TripRecord {
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey {
            trip_no: self.trip_no.clone(),
            medallion: self.medallion.clone(),
            chauffeur_no: self.chauffeur_no.clone(),
            meter_on_datetime: self.meter_on_datetime,
            meter_off_datetime: self.meter_off_datetime,
        }
    }

    pub fn pickup_point(&self) -> Option<(f64, f64)> {
        self.pickup_lat.zip(self.pickup_lon)
    }

    pub fn dropoff_point(&self) -> Option<(f64, f64)> {
        self.dropoff_lat.zip(self.dropoff_lon)
    }

    /// Elapsed meter time in minutes, when both endpoints are known
    pub fn elapsed_minutes(&self) -> Option<f64> {
        match (self.meter_on_datetime, self.meter_off_datetime) {
            (Some(on), Some(off)) => Some((off - on).num_seconds() as f64 / 60.0),
            _ => None,
        }
    }

    /// Money fields paired with their column names
    pub fn money_fields(&self) -> [(&'static str, f64); 6] {
        [
            ("fare", self.fare),
            ("tax", self.tax),
            ("tips", self.tips),
            ("tolls", self.tolls),
            ("surcharge", self.surcharge),
            ("trip_total", self.trip_total),
        ]
    }
}

/// Trip record with direct identifiers replaced by surrogate IDs.
/// A blank raw identifier has no surrogate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnonymizedTripRecord {
    pub trip_no: String,
    pub operator_name: String,
    pub medallion_id: Option<u64>,
    pub chauffeur_id: Option<u64>,
    #[serde(with = "serde_fields::datetime")]
    pub meter_on_datetime: Option<NaiveDateTime>,
    #[serde(with = "serde_fields::datetime")]
    pub meter_off_datetime: Option<NaiveDateTime>,
    pub trip_length: Option<f64>,
    pub pickup_lat: Option<f64>,
    pub pickup_lon: Option<f64>,
    pub pickup_location: String,
    pub dropoff_lat: Option<f64>,
    pub dropoff_lon: Option<f64>,
    pub dropoff_location: String,
    #[serde(with = "serde_fields::money")]
    pub fare: f64,
    #[serde(with = "serde_fields::money")]
    pub tax: f64,
    #[serde(with = "serde_fields::money")]
    pub tips: f64,
    #[serde(with = "serde_fields::money")]
    pub tolls: f64,
    #[serde(with = "serde_fields::money")]
    pub surcharge: f64,
    #[serde(with = "serde_fields::money")]
    pub trip_total: f64,
    pub payment_type: String,
    pub street_or_dispatch: String,
    pub data_source: DataSource,
}

impl AnonymizedTripRecord {
    /// Builds the anonymized form, consuming the raw identifiers
    pub fn from_trip(trip: TripRecord, medallion_id: Option<u64>, chauffeur_id: Option<u64>) -> Self {
        Self {
            trip_no: trip.trip_no,
            operator_name: trip.operator_name,
            medallion_id,
            chauffeur_id,
            meter_on_datetime: trip.meter_on_datetime,
            meter_off_datetime: trip.meter_off_datetime,
            trip_length: trip.trip_length,
            pickup_lat: trip.pickup_lat,
            pickup_lon: trip.pickup_lon,
            pickup_location: trip.pickup_location,
            dropoff_lat: trip.dropoff_lat,
            dropoff_lon: trip.dropoff_lon,
            dropoff_location: trip.dropoff_location,
            fare: trip.fare,
            tax: trip.tax,
            tips: trip.tips,
            tolls: trip.tolls,
            surcharge: trip.surcharge,
            trip_total: trip.trip_total,
            payment_type: trip.payment_type,
            street_or_dispatch: trip.street_or_dispatch,
            data_source: trip.data_source,
        }
    }

    /// Stable text form of the anonymized key, used to seed perturbation
    pub fn key_material(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.trip_no,
            self.medallion_id.map(|id| id.to_string()).unwrap_or_default(),
            self.chauffeur_id.map(|id| id.to_string()).unwrap_or_default(),
            serde_fields::format_datetime(self.meter_on_datetime),
            serde_fields::format_datetime(self.meter_off_datetime),
        )
    }
}

/// Public release record: anonymized, with generalized time and location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuzziedTripRecord {
    pub trip_no: String,
    pub operator_name: String,
    pub medallion_id: Option<u64>,
    pub chauffeur_id: Option<u64>,
    #[serde(with = "serde_fields::datetime")]
    pub meter_on_datetime: Option<NaiveDateTime>,
    #[serde(with = "serde_fields::datetime")]
    pub meter_off_datetime: Option<NaiveDateTime>,
    pub trip_duration_minutes: Option<i64>,
    pub pickup_year: Option<i32>,
    pub pickup_month: Option<u32>,
    pub pickup_day: Option<u32>,
    pub pickup_hour: Option<u32>,
    /// 0 is Sunday
    pub pickup_dow: Option<u32>,
    pub pickup_day_of_week: Option<String>,
    #[serde(with = "serde_fields::datetime")]
    pub pickup_general_time: Option<NaiveDateTime>,
    pub dropoff_year: Option<i32>,
    pub dropoff_month: Option<u32>,
    pub dropoff_day: Option<u32>,
    pub dropoff_hour: Option<u32>,
    pub dropoff_dow: Option<u32>,
    pub dropoff_day_of_week: Option<String>,
    #[serde(with = "serde_fields::datetime")]
    pub dropoff_general_time: Option<NaiveDateTime>,
    pub trip_length: Option<f64>,
    pub pickup_lat: Option<f64>,
    pub pickup_lon: Option<f64>,
    pub pickup_zip: Option<String>,
    pub pickup_anchor_id: Option<String>,
    pub dropoff_lat: Option<f64>,
    pub dropoff_lon: Option<f64>,
    pub dropoff_zip: Option<String>,
    pub dropoff_anchor_id: Option<String>,
    #[serde(with = "serde_fields::money")]
    pub fare: f64,
    #[serde(with = "serde_fields::money")]
    pub tax: f64,
    #[serde(with = "serde_fields::money")]
    pub tips: f64,
    #[serde(with = "serde_fields::money")]
    pub tolls: f64,
    #[serde(with = "serde_fields::money")]
    pub surcharge: f64,
    #[serde(with = "serde_fields::money")]
    pub trip_total: f64,
    pub payment_type: String,
    pub street_or_dispatch: String,
    pub data_source: DataSource,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::NaiveDate;

    pub fn datetime(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    pub fn trip(trip_no: &str, medallion: &str, chauffeur_no: &str) -> TripRecord {
        TripRecord {
            trip_no: trip_no.to_string(),
            operator_name: "Checker Cab".to_string(),
            medallion: medallion.to_string(),
            chauffeur_no: chauffeur_no.to_string(),
            meter_on_datetime: Some(datetime(2015, 1, 1, 10, 7)),
            meter_off_datetime: Some(datetime(2015, 1, 1, 10, 21)),
            trip_length: Some(1.6),
            pickup_lat: Some(39.9526),
            pickup_lon: Some(-75.1652),
            pickup_location: "1400 John F Kennedy Blvd Philadelphia PA 19102".to_string(),
            dropoff_lat: Some(39.9496),
            dropoff_lon: Some(-75.1503),
            dropoff_location: "520 Chestnut St Philadelphia PA 19106".to_string(),
            fare: 9.75,
            tax: 0.0,
            tips: 2.0,
            tolls: 0.0,
            surcharge: 0.0,
            trip_total: 11.75,
            payment_type: "Credit Card".to_string(),
            street_or_dispatch: "Street Hail".to_string(),
            data_source: DataSource::Verifone,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_natural_key_ignores_non_key_fields() {
        let a = trip("1001", "M1", "C1");
        let mut b = a.clone();
        b.fare = 42.0;
        b.data_source = DataSource::Cmt;
        assert_eq!(a.natural_key(), b.natural_key());

        b.meter_off_datetime = Some(datetime(2015, 1, 1, 10, 22));
        assert_ne!(a.natural_key(), b.natural_key());
    }

    #[test]
    fn test_elapsed_minutes() {
        let t = trip("1001", "M1", "C1");
        assert_eq!(t.elapsed_minutes(), Some(14.0));
    }

    #[test]
    fn test_key_material_is_stable_text() {
        let anon = AnonymizedTripRecord::from_trip(trip("1001", "M1", "C1"), Some(3), None);
        assert_eq!(
            anon.key_material(),
            "1001|3||2015-01-01 10:07:00|2015-01-01 10:21:00"
        );
    }
}
