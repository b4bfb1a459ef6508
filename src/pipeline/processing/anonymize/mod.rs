use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info};

use crate::domain::{AnonymizedTripRecord, TripRecord};
use crate::error::{PipelineError, Result};
use crate::observability::metrics;

pub mod mapping;
pub mod store;

pub use mapping::IdentifierMapping;
pub use store::{IdentifierKind, IdentifierStore, InMemoryIdentifierStore};

/// Replaces medallion and chauffeur numbers with stable surrogate ids.
/// Each mapping sits behind its own lock, so one raw value can never be
/// handed two ids.
#[derive(Debug)]
pub struct Anonymizer {
    medallions: Mutex<IdentifierMapping>,
    chauffeurs: Mutex<IdentifierMapping>,
}

impl Anonymizer {
    pub fn new() -> Self {
        Self {
            medallions: Mutex::new(IdentifierMapping::new(IdentifierKind::Medallion.table_name())),
            chauffeurs: Mutex::new(IdentifierMapping::new(IdentifierKind::ChauffeurNo.table_name())),
        }
    }

    /// Loads both mappings; an inconsistent persisted table is fatal
    pub fn load(store: &dyn IdentifierStore) -> Result<Self> {
        let load = |kind: IdentifierKind| -> Result<IdentifierMapping> {
            let mapping = IdentifierMapping::from_pairs(kind.table_name(), store.load(kind)?)?;
            info!(mapping = kind.table_name(), ids = mapping.len(), "Loaded identifier mapping");
            Ok(mapping)
        };
        Ok(Self {
            medallions: Mutex::new(load(IdentifierKind::Medallion)?),
            chauffeurs: Mutex::new(load(IdentifierKind::ChauffeurNo)?),
        })
    }

    fn mapping(&self, kind: IdentifierKind) -> Result<MutexGuard<'_, IdentifierMapping>> {
        let lock = match kind {
            IdentifierKind::Medallion => &self.medallions,
            IdentifierKind::ChauffeurNo => &self.chauffeurs,
        };
        lock.lock()
            .map_err(|_| PipelineError::mapping(kind.table_name(), "mapping lock poisoned"))
    }

    /// Surrogate for a raw value; blank values get none
    pub fn assign_or_lookup(&self, kind: IdentifierKind, raw: &str) -> Result<Option<u64>> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        let mut mapping = self.mapping(kind)?;
        let before = mapping.len();
        let id = mapping.assign_or_lookup(raw);
        if mapping.len() > before {
            metrics::anonymize::surrogate_assigned(kind.table_name());
        }
        Ok(Some(id))
    }

    pub fn anonymize(&self, trip: TripRecord) -> Result<AnonymizedTripRecord> {
        let medallion_id = self.assign_or_lookup(IdentifierKind::Medallion, &trip.medallion)?;
        let chauffeur_id = self.assign_or_lookup(IdentifierKind::ChauffeurNo, &trip.chauffeur_no)?;
        Ok(AnonymizedTripRecord::from_trip(trip, medallion_id, chauffeur_id))
    }

    /// Appends every assignment made since the last persist. Returns the
    /// number of new pairs written.
    pub fn persist(&self, store: &dyn IdentifierStore) -> Result<usize> {
        let mut written = 0;
        for kind in IdentifierKind::ALL {
            let mut mapping = self.mapping(kind)?;
            let base = mapping.persisted_max_id();
            let pending = mapping.take_pending();
            if pending.is_empty() {
                continue;
            }
            if let Err(e) = store.append(kind, base, &pending) {
                mapping.restore_pending(pending);
                return Err(e);
            }
            debug!(mapping = kind.table_name(), appended = pending.len(), "Persisted new surrogate ids");
            written += pending.len();
        }
        Ok(written)
    }

    /// Current number of ids in each mapping
    pub fn sizes(&self) -> Result<(usize, usize)> {
        Ok((
            self.mapping(IdentifierKind::Medallion)?.len(),
            self.mapping(IdentifierKind::ChauffeurNo)?.len(),
        ))
    }
}

impl Default for Anonymizer {
    fn default() -> Self {
        Self::new()
    }
}
