use crate::error::{ReportingError, Result};
use crate::utils::validate_fiscal_year_end_month;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How the source system signs closing balances. Everything is stored
/// debit-positive; credit-positive sources are negated on the way in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SignConvention {
    #[default]
    DebitPositive,
    CreditPositive,
}

impl SignConvention {
    pub fn normalize(&self, amount: f64) -> f64 {
        match self {
            SignConvention::DebitPositive => amount,
            SignConvention::CreditPositive => -amount,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Line items with `|current_amount|` below this are immaterial (hidden by default).
    pub materiality_threshold: f64,
    /// Minimum suggestion confidence for bulk auto-apply.
    pub auto_apply_threshold: f64,
    /// Confidence assigned to rule-based suggestions when the entry carries none.
    pub fallback_confidence: f64,
    pub fiscal_year_end_month: u32,
    /// Tolerance for debit/credit vs. closing balance checks and trial-balance netting.
    pub balance_tolerance: f64,
    pub sign_convention: SignConvention,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            materiality_threshold: 1_000_000.0,
            auto_apply_threshold: 0.8,
            fallback_confidence: 0.5,
            fiscal_year_end_month: 3,
            balance_tolerance: 0.01,
            sign_convention: SignConvention::DebitPositive,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        validate_threshold(self.auto_apply_threshold)?;
        validate_threshold(self.fallback_confidence)?;
        validate_fiscal_year_end_month(self.fiscal_year_end_month)?;

        if !self.materiality_threshold.is_finite() || self.materiality_threshold < 0.0 {
            return Err(ReportingError::InvalidConfig(format!(
                "materiality_threshold must be a non-negative amount, got {}",
                self.materiality_threshold
            )));
        }
        if !self.balance_tolerance.is_finite() || self.balance_tolerance < 0.0 {
            return Err(ReportingError::InvalidConfig(format!(
                "balance_tolerance must be non-negative, got {}",
                self.balance_tolerance
            )));
        }
        Ok(())
    }
}

pub fn validate_threshold(threshold: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(ReportingError::InvalidThreshold(threshold));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.materiality_threshold, 1_000_000.0);
        assert_eq!(config.auto_apply_threshold, 0.8);
        assert_eq!(config.fiscal_year_end_month, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = PipelineConfig::from_json_str(
            r#"{ "materiality_threshold": 500000, "sign_convention": "credit_positive" }"#,
        )
        .unwrap();
        assert_eq!(config.materiality_threshold, 500_000.0);
        assert_eq!(config.sign_convention, SignConvention::CreditPositive);
        assert_eq!(config.auto_apply_threshold, 0.8);
    }

    #[test]
    fn test_rejects_bad_threshold() {
        let err = PipelineConfig::from_json_str(r#"{ "auto_apply_threshold": 1.5 }"#).unwrap_err();
        assert!(matches!(err, ReportingError::InvalidThreshold(_)));

        let err = PipelineConfig::from_json_str(r#"{ "fiscal_year_end_month": 13 }"#).unwrap_err();
        assert!(matches!(err, ReportingError::InvalidFiscalYearEndMonth(13)));

        let err = PipelineConfig::from_json_str(r#"{ "materiality_threshold": -1 }"#).unwrap_err();
        assert!(matches!(err, ReportingError::InvalidConfig(_)));
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "fiscal_year_end_month": 12 }}"#).unwrap();

        let config = PipelineConfig::from_path(file.path()).unwrap();
        assert_eq!(config.fiscal_year_end_month, 12);
    }

    #[test]
    fn test_sign_normalization() {
        assert_eq!(SignConvention::DebitPositive.normalize(100.0), 100.0);
        assert_eq!(SignConvention::CreditPositive.normalize(100.0), -100.0);
    }
}
