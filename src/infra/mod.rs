// Adapters at the pipeline edges: delimited files and SQLite

pub mod csv_io;
pub mod sqlite_store;

pub use csv_io::{CsvSink, DiscardFindings, NdjsonFindingSink, RawRowReader};
pub use sqlite_store::{SqliteIdentifierStore, SqliteTripStore};
