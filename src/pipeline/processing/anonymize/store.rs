use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::constants::{CHAUFFEUR_NO_IDS_TABLE, MEDALLION_IDS_TABLE};
use crate::error::{PipelineError, Result};

/// Which identifier a mapping covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKind {
    Medallion,
    ChauffeurNo,
}

impl IdentifierKind {
    pub const ALL: [IdentifierKind; 2] = [IdentifierKind::Medallion, IdentifierKind::ChauffeurNo];

    pub fn table_name(&self) -> &'static str {
        match self {
            IdentifierKind::Medallion => MEDALLION_IDS_TABLE,
            IdentifierKind::ChauffeurNo => CHAUFFEUR_NO_IDS_TABLE,
        }
    }

    /// Column holding the raw value in the persisted table
    pub fn raw_column(&self) -> &'static str {
        match self {
            IdentifierKind::Medallion => "medallion",
            IdentifierKind::ChauffeurNo => "chauffeur_no",
        }
    }
}

/// Append-only persistence for identifier mappings
pub trait IdentifierStore: Send + Sync {
    /// All persisted `(id, raw)` pairs for one mapping
    fn load(&self, kind: IdentifierKind) -> Result<Vec<(u64, String)>>;

    /// Appends new pairs. `expected_max_id` is the largest id the caller
    /// loaded; a different stored max means another writer got there first.
    fn append(&self, kind: IdentifierKind, expected_max_id: u64, pairs: &[(u64, String)]) -> Result<()>;
}

/// In-process store for tests and dry runs
#[derive(Debug, Clone, Default)]
pub struct InMemoryIdentifierStore {
    tables: Arc<Mutex<HashMap<IdentifierKind, Vec<(u64, String)>>>>,
}

impl InMemoryIdentifierStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentifierStore for InMemoryIdentifierStore {
    fn load(&self, kind: IdentifierKind) -> Result<Vec<(u64, String)>> {
        let tables = self
            .tables
            .lock()
            .map_err(|_| PipelineError::mapping(kind.table_name(), "store lock poisoned"))?;
        Ok(tables.get(&kind).cloned().unwrap_or_default())
    }

    fn append(&self, kind: IdentifierKind, expected_max_id: u64, pairs: &[(u64, String)]) -> Result<()> {
        let mut tables = self
            .tables
            .lock()
            .map_err(|_| PipelineError::mapping(kind.table_name(), "store lock poisoned"))?;
        let table = tables.entry(kind).or_default();

        let stored_max = table.iter().map(|(id, _)| *id).max().unwrap_or(0);
        if stored_max != expected_max_id {
            return Err(PipelineError::mapping(
                kind.table_name(),
                format!(
                    "concurrent writer: expected max id {}, found {}",
                    expected_max_id, stored_max
                ),
            ));
        }
        table.extend(pairs.iter().cloned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_checks_expected_base() {
        let store = InMemoryIdentifierStore::new();
        store
            .append(IdentifierKind::Medallion, 0, &[(1, "M1".to_string())])
            .unwrap();

        // A writer that loaded before the first append is rejected
        let stale = store.append(IdentifierKind::Medallion, 0, &[(1, "M7".to_string())]);
        assert!(matches!(stale, Err(PipelineError::MappingConsistency { .. })));

        assert_eq!(store.load(IdentifierKind::Medallion).unwrap().len(), 1);
        assert!(store.load(IdentifierKind::ChauffeurNo).unwrap().is_empty());
    }
}
