use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportingError {
    #[error("No financial period could be resolved: {0}")]
    NoPeriod(String),

    #[error("Financial period {0} not found")]
    PeriodNotFound(i64),

    #[error("Invalid CSV header: {0}")]
    InvalidCsvHeader(String),

    #[error("Invalid quarter {0}: must be between 1 and 4")]
    InvalidQuarter(u32),

    #[error("Invalid fiscal year end month {0}: must be between 1 and 12")]
    InvalidFiscalYearEndMonth(u32),

    #[error("Invalid confidence threshold {0}: must be between 0.0 and 1.0")]
    InvalidThreshold(f64),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Line item '{0}' is not part of the taxonomy")]
    UnknownLineItem(String),

    #[error("Ratio definition {0} not found")]
    UnknownRatio(i64),

    #[error("Date calculation error: {0}")]
    DateError(String),

    #[error("Data store error: {0}")]
    Store(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[cfg(feature = "gemini")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[cfg(feature = "gemini")]
    #[error("JSON patch error: {0}")]
    Patch(#[from] json_patch::PatchError),

    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),
}

impl ReportingError {
    /// Expected, recoverable conditions that callers render as an empty state
    /// ("upload data first") rather than a failure notification.
    pub fn is_not_ready(&self) -> bool {
        matches!(
            self,
            ReportingError::NoPeriod(_) | ReportingError::PeriodNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ReportingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_ready_classification() {
        assert!(ReportingError::NoPeriod("no upload yet".into()).is_not_ready());
        assert!(ReportingError::PeriodNotFound(7).is_not_ready());
        assert!(!ReportingError::Store("disk full".into()).is_not_ready());
        assert!(!ReportingError::InvalidQuarter(5).is_not_ready());
    }
}
