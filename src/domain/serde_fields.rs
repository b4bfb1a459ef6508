//! Field encodings shared by every stage file: canonical datetimes and
//! two-decimal money amounts.

use chrono::NaiveDateTime;

use crate::constants::CANONICAL_DATETIME_FORMAT;

pub fn format_datetime(value: Option<NaiveDateTime>) -> String {
    value
        .map(|dt| dt.format(CANONICAL_DATETIME_FORMAT).to_string())
        .unwrap_or_default()
}

/// Accepts the canonical layout and its ISO `T`-separated variant
pub fn parse_canonical_datetime(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    NaiveDateTime::parse_from_str(value, CANONICAL_DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S"))
        .ok()
}

pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub mod datetime {
    use chrono::NaiveDateTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<NaiveDateTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(_) => serializer.serialize_some(&super::format_datetime(*value)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(text) => super::parse_canonical_datetime(text)
                .map(Some)
                .ok_or_else(|| de::Error::custom(format!("invalid datetime '{}'", text))),
        }
    }
}

pub mod money {
    use serde::{de, Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S>(value: &f64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{:.2}", super::round_cents(*value)))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<f64, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(MoneyVisitor)
    }

    struct MoneyVisitor;

    impl<'de> de::Visitor<'de> for MoneyVisitor {
        type Value = f64;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a money amount")
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<f64, E> {
            Ok(super::round_cents(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<f64, E> {
            let cleaned = v.trim().trim_start_matches('$').replace(',', "");
            cleaned
                .parse::<f64>()
                .map(super::round_cents)
                .map_err(|_| E::custom(format!("invalid money amount '{}'", v)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fixtures::trip;
    use crate::domain::TripRecord;

    #[test]
    fn test_parse_canonical_accepts_iso_separator() {
        let a = parse_canonical_datetime("2024-01-01 10:07:00").unwrap();
        let b = parse_canonical_datetime("2024-01-01T10:07:00").unwrap();
        assert_eq!(a, b);
        assert!(parse_canonical_datetime("01/01/2024 10:07").is_none());
    }

    #[test]
    fn test_trip_record_csv_layout() {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.serialize(trip("1001", "M1", "C1")).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let mut lines = text.lines();

        let header = lines.next().unwrap();
        assert_eq!(header, crate::constants::CANONICAL_COLUMNS.join(","));

        let row = lines.next().unwrap();
        assert!(row.contains("2015-01-01 10:07:00"));
        assert!(row.contains(",9.75,0.00,2.00,"));
        assert!(row.ends_with(",verifone"));
    }

    #[test]
    fn test_trip_record_reads_back_from_csv() {
        let original = trip("1001", "M1", "C1");
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.serialize(&original).unwrap();
        let bytes = writer.into_inner().unwrap();

        let mut reader = csv::Reader::from_reader(bytes.as_slice());
        let read: TripRecord = reader.deserialize().next().unwrap().unwrap();
        assert_eq!(read, original);
    }

    #[test]
    fn test_blank_coordinates_read_as_absent() {
        let mut header = crate::constants::CANONICAL_COLUMNS.join(",");
        header.push('\n');
        let row = "7,Op,M1,C1,2015-01-01 10:00:00,,,,,,,,,$5.00,0,0,0,0,5,Cash,,cmt\n";
        let text = format!("{}{}", header, row);

        let mut reader = csv::Reader::from_reader(text.as_bytes());
        let read: TripRecord = reader.deserialize().next().unwrap().unwrap();
        assert_eq!(read.pickup_lat, None);
        assert_eq!(read.meter_off_datetime, None);
        assert_eq!(read.fare, 5.0);
        assert_eq!(read.trip_total, 5.0);
    }
}
