use std::collections::HashMap;

use super::normalizers::{CmtNormalizer, SourceNormalizer, VerifoneNormalizer};
use crate::domain::{DataSource, TripRecord};
use crate::error::{PipelineError, Result};
use crate::pipeline::processing::parser::RawTripRecord;

/// Registry for vendor-specific normalization strategies
pub struct NormalizationRegistry {
    normalizers: HashMap<DataSource, Box<dyn SourceNormalizer>>,
}

impl NormalizationRegistry {
    /// Create a registry with both vendor normalizers
    pub fn new() -> Self {
        let mut registry = Self {
            normalizers: HashMap::new(),
        };
        registry.register(Box::new(VerifoneNormalizer));
        registry.register(Box::new(CmtNormalizer));
        registry
    }

    pub fn register(&mut self, normalizer: Box<dyn SourceNormalizer>) {
        self.normalizers.insert(normalizer.source(), normalizer);
    }

    pub fn get_normalizer(&self, source: DataSource) -> Option<&dyn SourceNormalizer> {
        self.normalizers.get(&source).map(|n| n.as_ref())
    }

    /// Normalize a record using the normalizer registered for its vendor
    pub fn normalize(&self, raw: &RawTripRecord) -> Result<TripRecord> {
        let source = raw.data_source();
        match self.get_normalizer(source) {
            Some(normalizer) => normalizer.normalize(raw),
            None => Err(PipelineError::Config(format!(
                "No normalizer registered for source: {}",
                source
            ))),
        }
    }

    pub fn list_sources(&self) -> Vec<DataSource> {
        self.normalizers.keys().copied().collect()
    }
}

impl Default for NormalizationRegistry {
    fn default() -> Self {
        Self::new()
    }
}
