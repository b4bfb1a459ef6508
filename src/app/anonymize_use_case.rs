use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tracing::info;

use crate::app::ports::RecordSink;
use crate::domain::{AnonymizedTripRecord, TripRecord};
use crate::pipeline::processing::anonymize::{Anonymizer, IdentifierKind, IdentifierStore};

#[derive(Debug, Clone, Default, Serialize)]
pub struct AnonymizeReport {
    pub records: usize,
    pub new_ids: usize,
    pub medallions: usize,
    pub chauffeurs: usize,
}

impl fmt::Display for AnonymizeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "anonymize: {} records, {} new surrogate ids ({} medallions, {} chauffeurs known)",
            self.records, self.new_ids, self.medallions, self.chauffeurs
        )
    }
}

/// Replaces raw identifiers using the persisted mappings, then appends the
/// ids assigned during this run.
pub struct AnonymizeUseCase {
    store: Arc<dyn IdentifierStore>,
}

impl AnonymizeUseCase {
    pub fn new(store: Arc<dyn IdentifierStore>) -> Self {
        Self { store }
    }

    /// Writes anonymized records to `sink`. The sink is only finished once
    /// the new ids are persisted.
    pub fn run<I>(&self, trips: I, sink: &mut dyn RecordSink<AnonymizedTripRecord>) -> Result<AnonymizeReport>
    where
        I: Iterator<Item = crate::error::Result<TripRecord>>,
    {
        let anonymizer = Anonymizer::load(self.store.as_ref())?;
        let mut report = AnonymizeReport::default();

        for trip in trips {
            let anonymized = anonymizer.anonymize(trip?)?;
            sink.write_record(&anonymized)?;
            report.records += 1;
        }

        self.persist(&anonymizer, &mut report)?;
        sink.finish()?;
        Ok(report)
    }

    /// Assigns and persists surrogates for every trip without emitting
    /// anything. The returned anonymizer then only looks ids up.
    pub fn assign<'a, I>(&self, trips: I) -> Result<(Anonymizer, AnonymizeReport)>
    where
        I: Iterator<Item = &'a TripRecord>,
    {
        let anonymizer = Anonymizer::load(self.store.as_ref())?;
        let mut report = AnonymizeReport::default();

        for trip in trips {
            anonymizer.assign_or_lookup(IdentifierKind::Medallion, &trip.medallion)?;
            anonymizer.assign_or_lookup(IdentifierKind::ChauffeurNo, &trip.chauffeur_no)?;
            report.records += 1;
        }

        self.persist(&anonymizer, &mut report)?;
        Ok((anonymizer, report))
    }

    fn persist(&self, anonymizer: &Anonymizer, report: &mut AnonymizeReport) -> Result<()> {
        report.new_ids = anonymizer.persist(self.store.as_ref())?;
        let (medallions, chauffeurs) = anonymizer.sizes()?;
        report.medallions = medallions;
        report.chauffeurs = chauffeurs;
        info!(records = report.records, new_ids = report.new_ids, "Anonymization complete");
        Ok(())
    }
}
