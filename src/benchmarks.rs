use crate::error::{ReportingError, Result};
use crate::schema::{BenchmarkSource, RatioDefinition, UserBenchmark};
use crate::store::FinancialStore;
use log::info;
use serde::{Deserialize, Serialize};

/// The comparison values a ratio is judged against after user overrides.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComparisonValues {
    pub target_value: Option<f64>,
    pub benchmark_value: Option<f64>,
    pub industry_average: Option<f64>,
}

impl ComparisonValues {
    /// `target ?? benchmark ?? 0`
    pub fn compare_value(&self) -> f64 {
        self.target_value.or(self.benchmark_value).unwrap_or(0.0)
    }
}

/// Active user overrides win over the definition defaults, field by field.
pub fn resolve_comparison(
    definition: &RatioDefinition,
    user_benchmark: Option<&UserBenchmark>,
) -> ComparisonValues {
    let active = user_benchmark.filter(|b| b.is_active);

    ComparisonValues {
        target_value: active
            .and_then(|b| b.custom_target_value)
            .or(definition.target_value),
        benchmark_value: definition.benchmark_value,
        industry_average: active
            .and_then(|b| b.custom_industry_average)
            .or(definition.industry_average),
    }
}

pub fn find_benchmark<'a>(
    benchmarks: &'a [UserBenchmark],
    ratio_definition_id: i64,
) -> Option<&'a UserBenchmark> {
    benchmarks
        .iter()
        .find(|b| b.ratio_definition_id == ratio_definition_id)
}

fn validate_benchmark(benchmark: &UserBenchmark) -> Result<()> {
    if benchmark.user_id.trim().is_empty() {
        return Err(ReportingError::InvalidConfig(
            "benchmark user_id is empty".to_string(),
        ));
    }
    for (field, value) in [
        ("custom_target_value", benchmark.custom_target_value),
        ("custom_industry_average", benchmark.custom_industry_average),
    ] {
        if let Some(v) = value {
            if !v.is_finite() {
                return Err(ReportingError::InvalidConfig(format!(
                    "{} must be a finite number, got {}",
                    field, v
                )));
            }
        }
    }
    Ok(())
}

/// Saves the user's override; a second save for the same ratio replaces it.
pub fn save_user_benchmark<S: FinancialStore>(store: &mut S, benchmark: &UserBenchmark) -> Result<()> {
    validate_benchmark(benchmark)?;
    store.upsert_user_benchmark(benchmark)?;
    info!(
        "Saved benchmark for ratio {} (user {})",
        benchmark.ratio_definition_id, benchmark.user_id
    );
    Ok(())
}

/// Copies the definition's defaults back into the user's row.
pub fn reset_benchmark_to_default<S: FinancialStore>(
    store: &mut S,
    user_id: &str,
    ratio_definition_id: i64,
) -> Result<UserBenchmark> {
    let definition = store
        .ratio_definitions()?
        .into_iter()
        .find(|d| d.id == ratio_definition_id)
        .ok_or(ReportingError::UnknownRatio(ratio_definition_id))?;

    let benchmark = UserBenchmark {
        user_id: user_id.to_string(),
        ratio_definition_id,
        custom_target_value: definition.target_value,
        custom_industry_average: definition.industry_average,
        benchmark_source: BenchmarkSource::SystemDefault,
        notes: None,
        is_active: true,
    };
    save_user_benchmark(store, &benchmark)?;
    Ok(benchmark)
}
