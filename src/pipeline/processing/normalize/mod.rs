use tracing::warn;

use crate::domain::TripRecord;
use crate::error::Result;
use crate::observability::metrics;
use crate::pipeline::processing::parser::RawTripRecord;

pub mod normalizers;
pub mod registry;

pub use normalizers::{CmtNormalizer, SourceNormalizer, VerifoneNormalizer};
pub use registry::NormalizationRegistry;

/// Adapts a stream of parsed rows into canonical trips. Parse and schema
/// errors pass through as `Err` items so the caller decides whether to skip.
pub struct NormalizedTrips<'a, I> {
    registry: &'a NormalizationRegistry,
    rows: I,
}

impl<'a, I> NormalizedTrips<'a, I>
where
    I: Iterator<Item = Result<RawTripRecord>>,
{
    pub fn new(registry: &'a NormalizationRegistry, rows: I) -> Self {
        Self { registry, rows }
    }
}

impl<'a, I> Iterator for NormalizedTrips<'a, I>
where
    I: Iterator<Item = Result<RawTripRecord>>,
{
    type Item = Result<TripRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let raw = match self.rows.next()? {
            Ok(raw) => raw,
            Err(e) => return Some(Err(e)),
        };
        let source = raw.data_source();
        let normalized = self.registry.normalize(&raw);
        match &normalized {
            Ok(_) => metrics::normalize::record_normalized(source.as_str()),
            Err(e) => {
                metrics::normalize::schema_error(source.as_str());
                warn!(source = %source, line = raw.line(), error = %e, "Skipping row that failed normalization");
            }
        }
        Some(normalized)
    }
}
