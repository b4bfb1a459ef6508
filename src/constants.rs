/// Vendor tags stamped into `data_source`
pub const VERIFONE_SOURCE: &str = "verifone";
pub const CMT_SOURCE: &str = "cmt";

/// Canonical datetime layout for every stage file and table
pub const CANONICAL_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Verifone exports have no header row; columns arrive in this order.
pub const VERIFONE_COLUMNS: [&str; 23] = [
    "Shift #",
    "Trip #",
    "Operator Name",
    "Medallion",
    "Device Type",
    "Chauffeur #",
    "Meter On Datetime",
    "Meter Off Datetime",
    "Trip Length",
    "Pickup Latitude",
    "Pickup Longitude",
    "Pickup Location",
    "Dropoff Latitude",
    "Dropoff Longitude",
    "Dropoff Location",
    "Fare",
    "Tax",
    "Tips",
    "Tolls",
    "Surcharge",
    "Trip Total",
    "Payment Type",
    "Street/Dispatch",
];

// CMT header names (matched case-insensitively)
pub const COL_TRIP_NO: &str = "Trip #";
pub const COL_OPERATOR_NAME: &str = "Operator Name";
pub const COL_MEDALLION: &str = "Medallion";
pub const COL_CHAUFFEUR_NO: &str = "Chauffeur #";
pub const COL_METER_ON: &str = "Meter On Datetime";
pub const COL_METER_OFF: &str = "Meter Off Datetime";
pub const COL_TRIP_LENGTH: &str = "Trip Length";
pub const COL_PICKUP_LAT: &str = "Pickup Latitude";
pub const COL_PICKUP_LON: &str = "Pickup Longitude";
pub const COL_PICKUP_LOCATION: &str = "Pickup Location";
pub const COL_DROPOFF_LAT: &str = "Dropoff Latitude";
pub const COL_DROPOFF_LON: &str = "Dropoff Longitude";
pub const COL_DROPOFF_LOCATION: &str = "Dropoff Location";
pub const COL_FARE: &str = "Fare";
pub const COL_TAX: &str = "Tax";
pub const COL_TIPS: &str = "Tips";
pub const COL_TOLLS: &str = "Tolls";
pub const COL_SURCHARGE: &str = "Surcharge";
pub const COL_TRIP_TOTAL: &str = "Trip Total";
pub const COL_PAYMENT_TYPE: &str = "Payment Type";
pub const COL_STREET_DISPATCH: &str = "Street/Dispatch";

/// Columns a CMT header must carry for the file to be readable
pub const CMT_REQUIRED_COLUMNS: [&str; 8] = [
    COL_TRIP_NO,
    COL_OPERATOR_NAME,
    COL_MEDALLION,
    COL_CHAUFFEUR_NO,
    COL_METER_ON,
    COL_METER_OFF,
    COL_FARE,
    COL_TRIP_TOTAL,
];

/// Canonical column order shared by stage files and the `taxi_trips` table
pub const CANONICAL_COLUMNS: [&str; 22] = [
    "trip_no",
    "operator_name",
    "medallion",
    "chauffeur_no",
    "meter_on_datetime",
    "meter_off_datetime",
    "trip_length",
    "pickup_lat",
    "pickup_lon",
    "pickup_location",
    "dropoff_lat",
    "dropoff_lon",
    "dropoff_location",
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

/// Identifier mapping tables
pub const MEDALLION_IDS_TABLE: &str = "medallion_ids";
pub const CHAUFFEUR_NO_IDS_TABLE: &str = "chauffeur_no_ids";

pub const METERS_PER_MILE: f64 = 1609.344;
pub const METERS_PER_DEGREE_LAT: f64 = 111_320.0;

/// Trip tables in storage
pub const RAW_TRIPS_TABLE: &str = "taxi_trips";
pub const PUBLIC_TRIPS_TABLE: &str = "public_taxi_trips";
