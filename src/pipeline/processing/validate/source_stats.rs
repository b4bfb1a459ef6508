use std::collections::BTreeMap;

use serde::Serialize;

use super::{Severity, ValidationWarning, WarningKind};
use crate::domain::{DataSource, TripRecord};

/// Trip length distribution of one source after outlier removal
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceSummary {
    pub data_source: DataSource,
    pub observed: usize,
    pub kept: usize,
    pub mean: f64,
    pub std: f64,
}

/// Collects trip lengths per source and checks that the sources agree with
/// each other once outliers are dropped.
#[derive(Debug)]
pub struct TripLengthComparison {
    lengths: BTreeMap<&'static str, (DataSource, Vec<f64>)>,
    scale: f64,
}

impl TripLengthComparison {
    pub fn new(outlier_scale: f64) -> Self {
        Self {
            lengths: BTreeMap::new(),
            scale: outlier_scale,
        }
    }

    pub fn observe(&mut self, trip: &TripRecord) {
        if let Some(length) = trip.trip_length.filter(|l| l.is_finite()) {
            self.lengths
                .entry(trip.data_source.as_str())
                .or_insert_with(|| (trip.data_source, Vec::new()))
                .1
                .push(length);
        }
    }

    pub fn summaries(&self) -> Vec<SourceSummary> {
        self.lengths
            .values()
            .map(|(source, values)| {
                let kept = filter_outliers(values, self.scale);
                let (mean, std) = mean_std(&kept);
                SourceSummary {
                    data_source: *source,
                    observed: values.len(),
                    kept: kept.len(),
                    mean,
                    std,
                }
            })
            .collect()
    }

    /// Every pair of sources whose means are further apart than the smaller
    /// of their standard deviations
    pub fn finish(&self) -> (Vec<SourceSummary>, Vec<ValidationWarning>) {
        let summaries = self.summaries();
        let mut warnings = Vec::new();
        for (i, a) in summaries.iter().enumerate() {
            for b in &summaries[i + 1..] {
                let distance = (a.mean - b.mean).abs();
                if distance > a.std.min(b.std) {
                    warnings.push(ValidationWarning {
                        key: None,
                        kind: WarningKind::SourceTripLengthMismatch,
                        severity: Severity::Warning,
                        field: Some("trip_length".to_string()),
                        message: format!(
                            "{} and {} samples are farther apart than expected (means {:.2} and {:.2} mi)",
                            a.data_source, b.data_source, a.mean, b.mean
                        ),
                    });
                }
            }
        }
        (summaries, warnings)
    }
}

fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

/// Keeps values within `scale` median absolute deviations of the median
pub fn filter_outliers(values: &[f64], scale: f64) -> Vec<f64> {
    let Some(center) = median(values) else {
        return Vec::new();
    };
    let deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    let mad = median(&deviations).unwrap_or(0.0);
    values
        .iter()
        .copied()
        .filter(|v| (v - center).abs() <= mad * scale)
        .collect()
}

/// Mean and population standard deviation
fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fixtures::trip;

    fn with_length(source: DataSource, length: f64) -> TripRecord {
        let mut t = trip("1", "M1", "C1");
        t.data_source = source;
        t.trip_length = Some(length);
        t
    }

    #[test]
    fn test_filter_outliers_drops_far_values() {
        let kept = filter_outliers(&[1.0, 2.0, 3.0, 4.0, 50.0], 2.0);
        assert_eq!(kept, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_agreeing_sources_produce_no_warning() {
        let mut comparison = TripLengthComparison::new(2.0);
        for length in [1.0, 2.0, 3.0, 2.0] {
            comparison.observe(&with_length(DataSource::Verifone, length));
            comparison.observe(&with_length(DataSource::Cmt, length + 0.25));
        }
        let (summaries, warnings) = comparison.finish();
        assert_eq!(summaries.len(), 2);
        assert!(warnings.is_empty(), "{:?}", warnings);
    }

    #[test]
    fn test_disagreeing_sources_are_reported() {
        let mut comparison = TripLengthComparison::new(2.0);
        for length in [1.0, 1.5, 2.0] {
            comparison.observe(&with_length(DataSource::Verifone, length));
            comparison.observe(&with_length(DataSource::Cmt, length * 10.0));
        }
        let (_, warnings) = comparison.finish();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, WarningKind::SourceTripLengthMismatch);
        assert!(warnings[0].key.is_none());
        assert!(warnings[0].message.starts_with("cmt and verifone"));
    }
}
