use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Parse error at line {line}: {reason}")]
    Parse { line: u64, reason: String },

    #[error("Schema error at line {line}: field '{field}' {reason}")]
    Schema {
        line: u64,
        field: String,
        reason: String,
    },

    #[error("Identifier mapping '{mapping}' is inconsistent: {message}")]
    MappingConsistency { mapping: String, message: String },

    #[error("No anchor within {radius_m}m of {which} ({lat}, {lon}) for trip {trip_no}")]
    FuzzBounds {
        trip_no: String,
        which: String,
        lat: f64,
        lon: f64,
        radius_m: f64,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),
}

impl PipelineError {
    pub fn parse(line: u64, reason: impl Into<String>) -> Self {
        PipelineError::Parse {
            line,
            reason: reason.into(),
        }
    }

    pub fn schema(line: u64, field: &str, reason: impl Into<String>) -> Self {
        PipelineError::Schema {
            line,
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub fn mapping(mapping: &str, message: impl Into<String>) -> Self {
        PipelineError::MappingConsistency {
            mapping: mapping.to_string(),
            message: message.into(),
        }
    }

    /// Integrity failures abort the run; everything else is reported per row.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            PipelineError::Parse { .. } | PipelineError::Schema { .. } | PipelineError::FuzzBounds { .. }
        )
    }

    /// Short label used for log fields and metric labels
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Parse { .. } => "parse",
            PipelineError::Schema { .. } => "schema",
            PipelineError::MappingConsistency { .. } => "mapping_consistency",
            PipelineError::FuzzBounds { .. } => "fuzz_bounds",
            PipelineError::Config(_) => "config",
            PipelineError::Io(_) => "io",
            PipelineError::Csv(_) => "csv",
            PipelineError::Sqlite(_) => "sqlite",
            PipelineError::Json(_) => "json",
            PipelineError::Toml(_) => "toml",
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_level_errors_are_not_fatal() {
        assert!(!PipelineError::parse(3, "wrong column count").is_fatal());
        assert!(!PipelineError::schema(3, "fare", "is not numeric").is_fatal());
        assert!(PipelineError::mapping("medallion_ids", "duplicate id 4").is_fatal());
        assert!(PipelineError::Config("bad radius".to_string()).is_fatal());
    }

    #[test]
    fn test_schema_error_message_names_field() {
        let err = PipelineError::schema(12, "fare", "'abc' is not a number");
        assert_eq!(
            err.to_string(),
            "Schema error at line 12: field 'fare' 'abc' is not a number"
        );
    }
}
