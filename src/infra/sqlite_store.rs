use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Transaction, TransactionBehavior};
use tracing::{debug, info};

use crate::app::ports::{TripStorePort, UpsertBatch, UpsertReceiver, UpsertSummary};
use crate::domain::serde_fields::{format_datetime, parse_canonical_datetime};
use crate::domain::{DataSource, FuzziedTripRecord, TripRecord};
use crate::error::{PipelineError, Result};
use crate::observability::metrics;
use crate::pipeline::processing::anonymize::{IdentifierKind, IdentifierStore};

pub use crate::constants::{PUBLIC_TRIPS_TABLE, RAW_TRIPS_TABLE};

const RAW_KEY: [&str; 5] = [
    "trip_no",
    "medallion",
    "chauffeur_no",
    "meter_on_datetime",
    "meter_off_datetime",
];

const PUBLIC_KEY: [&str; 5] = [
    "trip_no",
    "medallion_id",
    "chauffeur_id",
    "meter_on_datetime",
    "meter_off_datetime",
];

const PUBLIC_COLUMNS: [&str; 39] = [
    "trip_no",
    "operator_name",
    "medallion_id",
    "chauffeur_id",
    "meter_on_datetime",
    "meter_off_datetime",
    "trip_duration_minutes",
    "pickup_year",
    "pickup_month",
    "pickup_day",
    "pickup_hour",
    "pickup_dow",
    "pickup_day_of_week",
    "pickup_general_time",
    "dropoff_year",
    "dropoff_month",
    "dropoff_day",
    "dropoff_hour",
    "dropoff_dow",
    "dropoff_day_of_week",
    "dropoff_general_time",
    "trip_length",
    "pickup_lat",
    "pickup_lon",
    "pickup_zip",
    "pickup_anchor_id",
    "dropoff_lat",
    "dropoff_lon",
    "dropoff_zip",
    "dropoff_anchor_id",
    "fare",
    "tax",
    "tips",
    "tolls",
    "surcharge",
    "trip_total",
    "payment_type",
    "street_or_dispatch",
    "data_source",
];

/// Bound parameters SQLite accepts in one statement
const SQLITE_MAX_VARIABLES: usize = 32766;

// Key columns are NOT NULL so the unique constraint also covers trips with
// a missing timestamp or identifier.
const SCHEMA: &str = r#"
    PRAGMA journal_mode=WAL;
    CREATE TABLE IF NOT EXISTS medallion_ids (
        id         INTEGER PRIMARY KEY,
        medallion  TEXT NOT NULL UNIQUE
    );
    CREATE TABLE IF NOT EXISTS chauffeur_no_ids (
        id            INTEGER PRIMARY KEY,
        chauffeur_no  TEXT NOT NULL UNIQUE
    );
    CREATE TABLE IF NOT EXISTS taxi_trips (
        trip_no             TEXT NOT NULL,
        operator_name       TEXT NOT NULL,
        medallion           TEXT NOT NULL,
        chauffeur_no        TEXT NOT NULL,
        meter_on_datetime   TEXT NOT NULL,
        meter_off_datetime  TEXT NOT NULL,
        trip_length         REAL,
        pickup_lat          REAL,
        pickup_lon          REAL,
        pickup_location     TEXT,
        dropoff_lat         REAL,
        dropoff_lon         REAL,
        dropoff_location    TEXT,
        fare                REAL NOT NULL,
        tax                 REAL NOT NULL,
        tips                REAL NOT NULL,
        tolls               REAL NOT NULL,
        surcharge           REAL NOT NULL,
        trip_total          REAL NOT NULL,
        payment_type        TEXT,
        street_or_dispatch  TEXT,
        data_source         TEXT NOT NULL,
        UNIQUE (trip_no, medallion, chauffeur_no, meter_on_datetime, meter_off_datetime)
    );
    CREATE TABLE IF NOT EXISTS public_taxi_trips (
        trip_no                TEXT NOT NULL,
        operator_name          TEXT NOT NULL,
        medallion_id           INTEGER NOT NULL,
        chauffeur_id           INTEGER NOT NULL,
        meter_on_datetime      TEXT NOT NULL,
        meter_off_datetime     TEXT NOT NULL,
        trip_duration_minutes  INTEGER,
        pickup_year            INTEGER,
        pickup_month           INTEGER,
        pickup_day             INTEGER,
        pickup_hour            INTEGER,
        pickup_dow             INTEGER,
        pickup_day_of_week     TEXT,
        pickup_general_time    TEXT,
        dropoff_year           INTEGER,
        dropoff_month          INTEGER,
        dropoff_day            INTEGER,
        dropoff_hour           INTEGER,
        dropoff_dow            INTEGER,
        dropoff_day_of_week    TEXT,
        dropoff_general_time   TEXT,
        trip_length            REAL,
        pickup_lat             REAL,
        pickup_lon             REAL,
        pickup_zip             TEXT,
        pickup_anchor_id       TEXT,
        dropoff_lat            REAL,
        dropoff_lon            REAL,
        dropoff_zip            TEXT,
        dropoff_anchor_id      TEXT,
        fare                   REAL NOT NULL,
        tax                    REAL NOT NULL,
        tips                   REAL NOT NULL,
        tolls                  REAL NOT NULL,
        surcharge              REAL NOT NULL,
        trip_total             REAL NOT NULL,
        payment_type           TEXT,
        street_or_dispatch     TEXT,
        data_source            TEXT NOT NULL,
        UNIQUE (trip_no, medallion_id, chauffeur_id, meter_on_datetime, meter_off_datetime)
    );
"#;

fn open_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.execute_batch(SCHEMA)?;
    debug!(path = %path.display(), "Opened SQLite database");
    Ok(conn)
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock().map_err(|_| {
        PipelineError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "SQLite connection lock poisoned",
        ))
    })
}

/// Append-only identifier mapping tables
pub struct SqliteIdentifierStore {
    conn: Mutex<Connection>,
}

impl SqliteIdentifierStore {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(open_connection(path)?),
        })
    }
}

impl IdentifierStore for SqliteIdentifierStore {
    fn load(&self, kind: IdentifierKind) -> Result<Vec<(u64, String)>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT id, {} FROM {} ORDER BY id",
            kind.raw_column(),
            kind.table_name()
        ))?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, String>(1)?)))?;
        let mut pairs = Vec::new();
        for row in rows {
            pairs.push(row?);
        }
        Ok(pairs)
    }

    fn append(&self, kind: IdentifierKind, expected_max_id: u64, pairs: &[(u64, String)]) -> Result<()> {
        let mut conn = lock(&self.conn)?;
        // IMMEDIATE takes the write lock before the max id is read
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let stored_max: i64 = tx.query_row(
            &format!("SELECT COALESCE(MAX(id), 0) FROM {}", kind.table_name()),
            [],
            |row| row.get(0),
        )?;
        if stored_max as u64 != expected_max_id {
            return Err(PipelineError::mapping(
                kind.table_name(),
                format!(
                    "concurrent writer: expected max id {}, found {}",
                    expected_max_id, stored_max
                ),
            ));
        }

        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} (id, {}) VALUES (?1, ?2)",
                kind.table_name(),
                kind.raw_column()
            ))?;
            for (id, raw) in pairs {
                stmt.execute(params![*id as i64, raw])?;
            }
        }
        tx.commit()?;
        debug!(mapping = kind.table_name(), appended = pairs.len(), "Appended identifier pairs");
        Ok(())
    }
}

/// Raw and public trip tables
#[derive(Clone)]
pub struct SqliteTripStore {
    conn: Arc<Mutex<Connection>>,
    group_size: usize,
}

impl SqliteTripStore {
    pub fn open(path: &Path, group_size: usize) -> Result<Self> {
        Ok(Self {
            conn: Arc::new(Mutex::new(open_connection(path)?)),
            group_size: group_size.max(1),
        })
    }

    pub fn row_count(&self, table: &str) -> Result<usize> {
        let conn = lock(&self.conn)?;
        let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Raw table contents in insertion order
    pub fn fetch_trips(&self) -> Result<Vec<TripRecord>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {} ORDER BY rowid",
            crate::constants::CANONICAL_COLUMNS.join(", "),
            RAW_TRIPS_TABLE
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok(TripRecord {
                trip_no: row.get(0)?,
                operator_name: row.get(1)?,
                medallion: row.get(2)?,
                chauffeur_no: row.get(3)?,
                meter_on_datetime: parse_canonical_datetime(&row.get::<_, String>(4)?),
                meter_off_datetime: parse_canonical_datetime(&row.get::<_, String>(5)?),
                trip_length: row.get(6)?,
                pickup_lat: row.get(7)?,
                pickup_lon: row.get(8)?,
                pickup_location: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
                dropoff_lat: row.get(10)?,
                dropoff_lon: row.get(11)?,
                dropoff_location: row.get::<_, Option<String>>(12)?.unwrap_or_default(),
                fare: row.get(13)?,
                tax: row.get(14)?,
                tips: row.get(15)?,
                tolls: row.get(16)?,
                surcharge: row.get(17)?,
                trip_total: row.get(18)?,
                payment_type: row.get::<_, Option<String>>(19)?.unwrap_or_default(),
                street_or_dispatch: row.get::<_, Option<String>>(20)?.unwrap_or_default(),
                data_source: match row.get::<_, String>(21)?.as_str() {
                    crate::constants::CMT_SOURCE => DataSource::Cmt,
                    _ => DataSource::Verifone,
                },
            })
        })?;
        let mut trips = Vec::new();
        for row in rows {
            trips.push(row?);
        }
        Ok(trips)
    }

    async fn upsert<T: Send + 'static>(
        &self,
        table: &'static str,
        columns: &'static [&'static str],
        key: &'static [&'static str],
        mut batches: UpsertReceiver<T>,
        to_row: fn(&T) -> Vec<Value>,
    ) -> Result<UpsertSummary> {
        let conn = self.conn.clone();
        let group_size = self.group_size;
        tokio::task::spawn_blocking(move || {
            let mut conn = lock(&conn)?;
            let tx = conn.transaction()?;
            let mut summary = UpsertSummary::default();
            loop {
                match batches.blocking_recv() {
                    Some(UpsertBatch::Rows(records)) => {
                        let rows: Vec<Vec<Value>> = records.iter().map(to_row).collect();
                        upsert_groups(&tx, table, columns, key, &rows, group_size, &mut summary)?;
                    }
                    Some(UpsertBatch::Commit) => break,
                    // Dropping the transaction rolls it back
                    None => {
                        return Err(PipelineError::Io(std::io::Error::new(
                            std::io::ErrorKind::Interrupted,
                            format!("upload to {} ended before commit", table),
                        )))
                    }
                }
            }
            tx.commit()?;

            metrics::upload::rows_upserted(table, summary.rows);
            info!(table, rows = summary.rows, groups = summary.groups, "Upserted rows");
            Ok(summary)
        })
        .await
        .map_err(|e| PipelineError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?
    }
}

#[async_trait]
impl TripStorePort for SqliteTripStore {
    async fn upsert_trips(&self, batches: UpsertReceiver<TripRecord>) -> Result<UpsertSummary> {
        self.upsert(RAW_TRIPS_TABLE, &crate::constants::CANONICAL_COLUMNS, &RAW_KEY, batches, raw_row)
            .await
    }

    async fn upsert_public_trips(&self, batches: UpsertReceiver<FuzziedTripRecord>) -> Result<UpsertSummary> {
        self.upsert(PUBLIC_TRIPS_TABLE, &PUBLIC_COLUMNS, &PUBLIC_KEY, batches, public_row)
            .await
    }

    fn group_size(&self) -> usize {
        self.group_size
    }
}

/// `INSERT ... ON CONFLICT DO UPDATE` for `rows` values tuples
fn upsert_sql(table: &str, columns: &[&str], key: &[&str], rows: usize) -> String {
    let placeholders = format!("({})", vec!["?"; columns.len()].join(", "));
    let values = vec![placeholders.as_str(); rows].join(", ");
    let updates = columns
        .iter()
        .filter(|column| !key.contains(column))
        .map(|column| format!("{column}=excluded.{column}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES {} ON CONFLICT({}) DO UPDATE SET {}",
        table,
        columns.join(", "),
        values,
        key.join(", "),
        updates
    )
}

/// Rows per statement: the configured group size, capped so one statement
/// stays under SQLite's bound parameter limit
fn statement_rows(columns: usize, group_size: usize) -> usize {
    group_size.min(SQLITE_MAX_VARIABLES / columns.max(1)).max(1)
}

fn upsert_groups(
    tx: &Transaction<'_>,
    table: &'static str,
    columns: &[&str],
    key: &[&str],
    rows: &[Vec<Value>],
    group_size: usize,
    summary: &mut UpsertSummary,
) -> Result<()> {
    for group in rows.chunks(statement_rows(columns.len(), group_size)) {
        let started = Instant::now();
        tx.execute(
            &upsert_sql(table, columns, key, group.len()),
            params_from_iter(group.iter().flatten()),
        )?;
        summary.rows += group.len();
        summary.groups += 1;
        metrics::upload::batch_duration(table, started.elapsed().as_secs_f64());
    }
    debug!(table, rows = rows.len(), "Upserted batch");
    Ok(())
}

fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

fn real(value: Option<f64>) -> Value {
    value.map(Value::Real).unwrap_or(Value::Null)
}

fn integer<N: Into<i64>>(value: Option<N>) -> Value {
    value.map(|v| Value::Integer(v.into())).unwrap_or(Value::Null)
}

fn optional_datetime(value: Option<NaiveDateTime>) -> Value {
    value.map(|v| Value::Text(format_datetime(Some(v)))).unwrap_or(Value::Null)
}

fn raw_row(trip: &TripRecord) -> Vec<Value> {
    vec![
        text(&trip.trip_no),
        text(&trip.operator_name),
        text(&trip.medallion),
        text(&trip.chauffeur_no),
        Value::Text(format_datetime(trip.meter_on_datetime)),
        Value::Text(format_datetime(trip.meter_off_datetime)),
        real(trip.trip_length),
        real(trip.pickup_lat),
        real(trip.pickup_lon),
        text(&trip.pickup_location),
        real(trip.dropoff_lat),
        real(trip.dropoff_lon),
        text(&trip.dropoff_location),
        Value::Real(trip.fare),
        Value::Real(trip.tax),
        Value::Real(trip.tips),
        Value::Real(trip.tolls),
        Value::Real(trip.surcharge),
        Value::Real(trip.trip_total),
        text(&trip.payment_type),
        text(&trip.street_or_dispatch),
        text(trip.data_source.as_str()),
    ]
}

fn public_row(trip: &FuzziedTripRecord) -> Vec<Value> {
    let optional_text = |value: &Option<String>| value.as_deref().map(text).unwrap_or(Value::Null);
    // 0 stands in for a missing surrogate so the key stays comparable
    let id = |value: Option<u64>| Value::Integer(value.unwrap_or(0) as i64);
    vec![
        text(&trip.trip_no),
        text(&trip.operator_name),
        id(trip.medallion_id),
        id(trip.chauffeur_id),
        Value::Text(format_datetime(trip.meter_on_datetime)),
        Value::Text(format_datetime(trip.meter_off_datetime)),
        trip.trip_duration_minutes.map(Value::Integer).unwrap_or(Value::Null),
        integer(trip.pickup_year),
        integer(trip.pickup_month),
        integer(trip.pickup_day),
        integer(trip.pickup_hour),
        integer(trip.pickup_dow),
        optional_text(&trip.pickup_day_of_week),
        optional_datetime(trip.pickup_general_time),
        integer(trip.dropoff_year),
        integer(trip.dropoff_month),
        integer(trip.dropoff_day),
        integer(trip.dropoff_hour),
        integer(trip.dropoff_dow),
        optional_text(&trip.dropoff_day_of_week),
        optional_datetime(trip.dropoff_general_time),
        real(trip.trip_length),
        real(trip.pickup_lat),
        real(trip.pickup_lon),
        optional_text(&trip.pickup_zip),
        optional_text(&trip.pickup_anchor_id),
        real(trip.dropoff_lat),
        real(trip.dropoff_lon),
        optional_text(&trip.dropoff_zip),
        optional_text(&trip.dropoff_anchor_id),
        Value::Real(trip.fare),
        Value::Real(trip.tax),
        Value::Real(trip.tips),
        Value::Real(trip.tolls),
        Value::Real(trip.surcharge),
        Value::Real(trip.trip_total),
        text(&trip.payment_type),
        text(&trip.street_or_dispatch),
        text(trip.data_source.as_str()),
    ]
}
