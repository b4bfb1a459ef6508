//! Metrics for the trip pipeline
//!
//! Every stage records through the `metrics` facade; `init` installs a
//! Prometheus recorder and `render` produces the text snapshot written by
//! `--metrics-out`. Without a recorder the calls are no-ops.

use std::fmt;
use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::error::{PipelineError, Result};

/// All metric names used by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Parser metrics
    ParserRowsParsed,
    ParserParseErrors,

    // Normalize metrics
    NormalizeRecordsNormalized,
    NormalizeSchemaErrors,

    // Merge metrics
    MergeOutcomes,

    // Validate metrics
    ValidateWarnings,

    // Anonymize metrics
    AnonymizeSurrogatesAssigned,

    // Fuzz metrics
    FuzzRecordsFuzzed,
    FuzzRecordsDropped,

    // Upload metrics
    UploadRowsUpserted,
    UploadBatchDuration,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::ParserRowsParsed => "phl_taxi_parser_rows_parsed_total",
            MetricName::ParserParseErrors => "phl_taxi_parser_parse_errors_total",
            MetricName::NormalizeRecordsNormalized => "phl_taxi_normalize_records_total",
            MetricName::NormalizeSchemaErrors => "phl_taxi_normalize_schema_errors_total",
            MetricName::MergeOutcomes => "phl_taxi_merge_outcomes_total",
            MetricName::ValidateWarnings => "phl_taxi_validate_warnings_total",
            MetricName::AnonymizeSurrogatesAssigned => "phl_taxi_anonymize_surrogates_assigned_total",
            MetricName::FuzzRecordsFuzzed => "phl_taxi_fuzz_records_total",
            MetricName::FuzzRecordsDropped => "phl_taxi_fuzz_records_dropped_total",
            MetricName::UploadRowsUpserted => "phl_taxi_upload_rows_upserted_total",
            MetricName::UploadBatchDuration => "phl_taxi_upload_batch_duration_seconds",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Calling it twice is harmless.
pub fn init() -> Result<()> {
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| PipelineError::Config(format!("Failed to install Prometheus recorder: {}", e)))?;
    METRICS_HANDLE.set(handle).ok();
    info!("Metrics recorder installed");
    Ok(())
}

/// Prometheus text snapshot, if a recorder is installed
pub fn render() -> Option<String> {
    METRICS_HANDLE.get().map(|handle| handle.render())
}

// ============================================================================
// Per-stage recording functions
// ============================================================================

pub mod parser {
    use super::MetricName;

    pub fn row_parsed(vendor: &'static str) {
        ::metrics::counter!(MetricName::ParserRowsParsed.as_str(), "vendor" => vendor).increment(1);
    }

    pub fn parse_error(vendor: &'static str) {
        ::metrics::counter!(MetricName::ParserParseErrors.as_str(), "vendor" => vendor).increment(1);
    }
}

pub mod normalize {
    use super::MetricName;

    pub fn record_normalized(source: &'static str) {
        ::metrics::counter!(MetricName::NormalizeRecordsNormalized.as_str(), "source" => source).increment(1);
    }

    pub fn schema_error(source: &'static str) {
        ::metrics::counter!(MetricName::NormalizeSchemaErrors.as_str(), "source" => source).increment(1);
    }
}

pub mod merge {
    use super::MetricName;

    /// `inserted`, `updated` or `unchanged`
    pub fn record_outcome(outcome: &'static str) {
        ::metrics::counter!(MetricName::MergeOutcomes.as_str(), "outcome" => outcome).increment(1);
    }
}

pub mod validate {
    use super::MetricName;

    pub fn warning(kind: &'static str) {
        ::metrics::counter!(MetricName::ValidateWarnings.as_str(), "kind" => kind).increment(1);
    }
}

pub mod anonymize {
    use super::MetricName;

    pub fn surrogate_assigned(mapping: &'static str) {
        ::metrics::counter!(MetricName::AnonymizeSurrogatesAssigned.as_str(), "mapping" => mapping).increment(1);
    }
}

pub mod fuzz {
    use super::MetricName;

    pub fn record_fuzzed() {
        ::metrics::counter!(MetricName::FuzzRecordsFuzzed.as_str()).increment(1);
    }

    pub fn record_dropped(reason: &'static str) {
        ::metrics::counter!(MetricName::FuzzRecordsDropped.as_str(), "reason" => reason).increment(1);
    }
}

pub mod upload {
    use super::MetricName;

    pub fn rows_upserted(table: &'static str, rows: usize) {
        ::metrics::counter!(MetricName::UploadRowsUpserted.as_str(), "table" => table).increment(rows as u64);
    }

    pub fn batch_duration(table: &'static str, secs: f64) {
        ::metrics::histogram!(MetricName::UploadBatchDuration.as_str(), "table" => table).record(secs);
    }
}
