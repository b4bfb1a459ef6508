use std::collections::HashMap;

use tracing::debug;

use crate::domain::{NaturalKey, TripRecord};
use crate::observability::metrics;

/// Handles change detection between two observations of the same trip
pub struct IdempotencyChecker;

impl IdempotencyChecker {
    /// Names of the non-key fields that differ between stored and incoming
    pub fn changed_fields(existing: &TripRecord, updated: &TripRecord) -> Vec<&'static str> {
        let mut changed = Vec::new();
        let mut check = |name: &'static str, differs: bool| {
            if differs {
                changed.push(name);
            }
        };

        check("operator_name", existing.operator_name != updated.operator_name);
        check("trip_length", existing.trip_length != updated.trip_length);
        check("pickup_lat", existing.pickup_lat != updated.pickup_lat);
        check("pickup_lon", existing.pickup_lon != updated.pickup_lon);
        check("pickup_location", existing.pickup_location != updated.pickup_location);
        check("dropoff_lat", existing.dropoff_lat != updated.dropoff_lat);
        check("dropoff_lon", existing.dropoff_lon != updated.dropoff_lon);
        check("dropoff_location", existing.dropoff_location != updated.dropoff_location);
        for ((name, old), (_, new)) in existing.money_fields().into_iter().zip(updated.money_fields()) {
            check(name, old != new);
        }
        check("payment_type", existing.payment_type != updated.payment_type);
        check("street_or_dispatch", existing.street_or_dispatch != updated.street_or_dispatch);
        check("data_source", existing.data_source != updated.data_source);

        changed
    }

    pub fn trip_has_changes(existing: &TripRecord, updated: &TripRecord) -> bool {
        !Self::changed_fields(existing, updated).is_empty()
    }
}

/// What an upsert did to the merged table
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    Inserted,
    Updated { changed_fields: Vec<&'static str> },
    Unchanged,
}

impl MergeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeOutcome::Inserted => "inserted",
            MergeOutcome::Updated { .. } => "updated",
            MergeOutcome::Unchanged => "unchanged",
        }
    }
}

/// Running totals of merge outcomes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

/// Collapses trips sharing a natural key. The latest observation wins every
/// field; output order is the order keys were first seen.
#[derive(Debug, Default)]
pub struct TripMerger {
    index: HashMap<NaturalKey, usize>,
    records: Vec<TripRecord>,
    stats: MergeStats,
}

impl TripMerger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&mut self, trip: TripRecord) -> MergeOutcome {
        let key = trip.natural_key();
        let outcome = match self.index.get(&key) {
            Some(&position) => {
                let existing = &mut self.records[position];
                let changed_fields = IdempotencyChecker::changed_fields(existing, &trip);
                if changed_fields.is_empty() {
                    MergeOutcome::Unchanged
                } else {
                    debug!(key = %key, fields = ?changed_fields, "Trip updated by later observation");
                    *existing = trip;
                    MergeOutcome::Updated { changed_fields }
                }
            }
            None => {
                self.index.insert(key, self.records.len());
                self.records.push(trip);
                MergeOutcome::Inserted
            }
        };

        match outcome {
            MergeOutcome::Inserted => self.stats.inserted += 1,
            MergeOutcome::Updated { .. } => self.stats.updated += 1,
            MergeOutcome::Unchanged => self.stats.unchanged += 1,
        }
        metrics::merge::record_outcome(outcome.as_str());
        outcome
    }

    pub fn extend<I: IntoIterator<Item = TripRecord>>(&mut self, trips: I) {
        for trip in trips {
            self.upsert(trip);
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn stats(&self) -> MergeStats {
        self.stats
    }

    pub fn records(&self) -> &[TripRecord] {
        &self.records
    }

    /// One record per natural key, first-seen order
    pub fn into_records(self) -> Vec<TripRecord> {
        self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fixtures::trip;
    use crate::domain::DataSource;

    #[test]
    fn test_trip_has_changes() {
        let a = trip("1001", "M1", "C1");
        let mut b = a.clone();
        assert!(!IdempotencyChecker::trip_has_changes(&a, &b));

        b.tips = 3.0;
        b.payment_type = "Cash".to_string();
        assert_eq!(IdempotencyChecker::changed_fields(&a, &b), vec!["tips", "payment_type"]);
    }

    #[test]
    fn test_later_vendor_row_wins() {
        let verifone = trip("1001", "M1", "C1");
        let mut cmt = verifone.clone();
        cmt.fare = 12.5;
        cmt.trip_total = 14.5;
        cmt.data_source = DataSource::Cmt;

        let mut merger = TripMerger::new();
        assert_eq!(merger.upsert(verifone), MergeOutcome::Inserted);
        assert!(matches!(merger.upsert(cmt), MergeOutcome::Updated { .. }));

        let merged = merger.into_records();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].fare, 12.5);
        assert_eq!(merged[0].data_source, DataSource::Cmt);
    }

    #[test]
    fn test_rerun_over_same_input_converges() {
        let input = vec![trip("1", "M1", "C1"), trip("2", "M2", "C2"), trip("3", "M1", "C1")];

        let mut merger = TripMerger::new();
        merger.extend(input.clone());
        merger.extend(input.clone());

        assert_eq!(merger.records(), input.as_slice());
        assert_eq!(
            merger.stats(),
            MergeStats {
                inserted: 3,
                updated: 0,
                unchanged: 3
            }
        );
    }

    #[test]
    fn test_order_of_first_occurrence_is_kept() {
        let mut merger = TripMerger::new();
        merger.upsert(trip("1", "M1", "C1"));
        merger.upsert(trip("2", "M1", "C1"));
        let mut updated_first = trip("1", "M1", "C1");
        updated_first.tips = 5.0;
        merger.upsert(updated_first);

        let trip_nos: Vec<_> = merger.records().iter().map(|t| t.trip_no.as_str()).collect();
        assert_eq!(trip_nos, vec!["1", "2"]);
        assert_eq!(merger.records()[0].tips, 5.0);
    }
}
