use std::collections::{HashMap, HashSet};

use crate::error::{PipelineError, Result};

/// Raw identifier to surrogate id bijection. Ids are dense from 1 in the
/// order raw values were first seen; an assignment never changes.
#[derive(Debug, Clone)]
pub struct IdentifierMapping {
    name: String,
    ids: HashMap<String, u64>,
    next_id: u64,
    /// Assigned since the last `take_pending`, in id order
    pending: Vec<(u64, String)>,
}

impl IdentifierMapping {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ids: HashMap::new(),
            next_id: 1,
            pending: Vec::new(),
        }
    }

    /// Rebuilds a mapping from persisted pairs, rejecting duplicates and gaps
    pub fn from_pairs<I>(name: &str, pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (u64, String)>,
    {
        let mut ids = HashMap::new();
        let mut seen_ids = HashSet::new();
        let mut max_id = 0;

        for (id, raw) in pairs {
            if id == 0 {
                return Err(PipelineError::mapping(name, "id 0 is not a valid surrogate"));
            }
            if !seen_ids.insert(id) {
                return Err(PipelineError::mapping(name, format!("duplicate id {}", id)));
            }
            if let Some(existing) = ids.insert(raw.clone(), id) {
                return Err(PipelineError::mapping(
                    name,
                    format!("raw value '{}' mapped to both {} and {}", raw, existing, id),
                ));
            }
            max_id = max_id.max(id);
        }

        if max_id != ids.len() as u64 {
            return Err(PipelineError::mapping(
                name,
                format!("ids are not dense: {} values but max id {}", ids.len(), max_id),
            ));
        }

        Ok(Self {
            name: name.to_string(),
            ids,
            next_id: max_id + 1,
            pending: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lookup(&self, raw: &str) -> Option<u64> {
        self.ids.get(raw).copied()
    }

    /// Returns the existing surrogate, or assigns the next one
    pub fn assign_or_lookup(&mut self, raw: &str) -> u64 {
        if let Some(id) = self.lookup(raw) {
            return id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.ids.insert(raw.to_string(), id);
        self.pending.push((id, raw.to_string()));
        id
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Largest id already persisted, i.e. excluding pending assignments
    pub fn persisted_max_id(&self) -> u64 {
        self.next_id - 1 - self.pending.len() as u64
    }

    pub fn take_pending(&mut self) -> Vec<(u64, String)> {
        std::mem::take(&mut self.pending)
    }

    /// Puts pairs back when persisting them failed
    pub fn restore_pending(&mut self, mut pairs: Vec<(u64, String)>) {
        pairs.append(&mut self.pending);
        self.pending = pairs;
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
