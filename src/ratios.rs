//! Ratio engine: evaluates each ratio definition against a period's headline
//! totals, grades it against the user's (or default) comparison values and
//! rolls the grades up into a 0-100 health score.

use crate::aggregator::aggregate;
use crate::benchmarks::{find_benchmark, resolve_comparison};
use crate::error::Result;
use crate::periods::require_period;
use crate::schema::{
    CalculatedRatio, PerformanceStatus, RatioCategory, RatioDefinition, RatioDirection,
    RatioFormula, RatioResult, TrendDirection, UserBenchmark,
};
use crate::statements::FinancialTotals;
use crate::store::FinancialStore;
use chrono::NaiveDate;
use log::{debug, info};

/// The ratio definitions seeded into a fresh store. Margins and returns are
/// percentages; everything else is a plain multiple.
pub fn default_ratio_definitions() -> Vec<RatioDefinition> {
    use RatioCategory::*;
    use RatioDirection::*;
    use RatioFormula::*;

    let rows: [(&str, RatioCategory, RatioFormula, &str, f64, f64, f64, RatioDirection); 12] = [
        ("Current Ratio", Liquidity, CurrentRatio, "Current Assets / Current Liabilities", 2.0, 1.5, 1.8, HigherIsBetter),
        ("Quick Ratio", Liquidity, QuickRatio, "(Current Assets - Inventories) / Current Liabilities", 1.0, 1.0, 1.1, HigherIsBetter),
        ("Cash Ratio", Liquidity, CashRatio, "Cash and Cash Equivalents / Current Liabilities", 0.5, 0.3, 0.4, HigherIsBetter),
        ("Debt to Equity", Leverage, DebtToEquity, "Total Liabilities / Equity", 1.0, 1.5, 1.2, LowerIsBetter),
        ("Debt Ratio", Leverage, DebtRatio, "Total Liabilities / Total Assets", 0.5, 0.6, 0.55, LowerIsBetter),
        ("Net Profit Margin", Profitability, NetProfitMargin, "Net Profit / Revenue x 100", 10.0, 8.0, 9.0, HigherIsBetter),
        ("Gross Profit Margin", Profitability, GrossProfitMargin, "(Revenue - Cost of Goods Sold) / Revenue x 100", 30.0, 25.0, 28.0, HigherIsBetter),
        ("Return on Assets", Profitability, ReturnOnAssets, "Net Profit / Total Assets x 100", 5.0, 4.0, 4.5, HigherIsBetter),
        ("Return on Equity", Profitability, ReturnOnEquity, "Net Profit / Equity x 100", 15.0, 12.0, 13.0, HigherIsBetter),
        ("Asset Turnover", Efficiency, AssetTurnover, "Revenue / Total Assets", 1.0, 0.8, 0.9, HigherIsBetter),
        ("Inventory Turnover", Efficiency, InventoryTurnover, "Cost of Goods Sold / Inventories", 6.0, 5.0, 5.5, HigherIsBetter),
        ("Interest Coverage", Leverage, InterestCoverage, "(Net Profit + Finance Costs) / Finance Costs", 3.0, 2.5, 3.0, HigherIsBetter),
    ];

    rows.iter()
        .enumerate()
        .map(
            |(idx, (name, category, formula, description, target, benchmark, industry, direction))| {
                RatioDefinition {
                    id: idx as i64 + 1,
                    ratio_name: name.to_string(),
                    ratio_category: *category,
                    formula: *formula,
                    formula_description: description.to_string(),
                    target_value: Some(*target),
                    benchmark_value: Some(*benchmark),
                    industry_average: Some(*industry),
                    direction: Some(*direction),
                }
            },
        )
        .collect()
}

fn divide(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator == 0.0 {
        return None;
    }
    Some(numerator / denominator).filter(|v| v.is_finite())
}

/// `None` when the denominator is zero.
pub fn evaluate_formula(formula: RatioFormula, t: &FinancialTotals) -> Option<f64> {
    match formula {
        RatioFormula::CurrentRatio => divide(t.current_assets, t.current_liabilities),
        RatioFormula::QuickRatio => {
            divide(t.current_assets - t.inventories, t.current_liabilities)
        }
        RatioFormula::CashRatio => divide(t.cash, t.current_liabilities),
        RatioFormula::DebtToEquity => divide(t.total_liabilities, t.equity),
        RatioFormula::DebtRatio => divide(t.total_liabilities, t.total_assets),
        RatioFormula::NetProfitMargin => divide(t.net_profit * 100.0, t.revenue),
        RatioFormula::GrossProfitMargin => divide(t.gross_profit() * 100.0, t.revenue),
        RatioFormula::ReturnOnAssets => divide(t.net_profit * 100.0, t.total_assets),
        RatioFormula::ReturnOnEquity => divide(t.net_profit * 100.0, t.equity),
        RatioFormula::AssetTurnover => divide(t.revenue, t.total_assets),
        RatioFormula::InventoryTurnover => divide(t.cost_of_goods_sold, t.inventories),
        RatioFormula::InterestCoverage => divide(t.ebit(), t.finance_costs),
    }
}

pub fn performance_status(
    value: f64,
    compare_value: f64,
    direction: RatioDirection,
) -> PerformanceStatus {
    match direction {
        RatioDirection::HigherIsBetter => {
            if value >= compare_value * 1.10 {
                PerformanceStatus::Excellent
            } else if value >= compare_value * 0.90 {
                PerformanceStatus::Good
            } else if value >= compare_value * 0.70 {
                PerformanceStatus::Warning
            } else {
                PerformanceStatus::Poor
            }
        }
        RatioDirection::LowerIsBetter => {
            if value <= compare_value * 0.80 {
                PerformanceStatus::Excellent
            } else if value <= compare_value * 1.00 {
                PerformanceStatus::Good
            } else if value <= compare_value * 1.30 {
                PerformanceStatus::Warning
            } else {
                PerformanceStatus::Poor
            }
        }
    }
}

/// Movement relative to the benchmark value; stable without one.
pub fn trend_direction(
    value: f64,
    benchmark_value: Option<f64>,
    direction: RatioDirection,
) -> TrendDirection {
    let Some(benchmark) = benchmark_value else {
        return TrendDirection::Stable;
    };
    let threshold = match direction {
        RatioDirection::HigherIsBetter => 0.10,
        RatioDirection::LowerIsBetter => 0.05,
    };

    let difference = value - benchmark;
    if difference.abs() < threshold {
        TrendDirection::Stable
    } else if difference > 0.0 {
        TrendDirection::Up
    } else {
        TrendDirection::Down
    }
}

pub fn evaluate_ratio(
    definition: &RatioDefinition,
    value: f64,
    user_benchmark: Option<&UserBenchmark>,
) -> RatioResult {
    let direction = definition.direction();
    let comparison = resolve_comparison(definition, user_benchmark);

    RatioResult {
        ratio_name: definition.ratio_name.clone(),
        ratio_category: definition.ratio_category,
        calculated_value: value,
        target_value: comparison.target_value,
        benchmark_value: comparison.benchmark_value,
        industry_average: comparison.industry_average,
        performance_status: performance_status(value, comparison.compare_value(), direction),
        trend_direction: trend_direction(value, comparison.benchmark_value, direction),
    }
}

/// Computes every ratio for the period and stores the values. A period with
/// no mappings yields an empty result ("not ready") and clears any values
/// stored by an earlier run.
pub fn compute_ratios<S: FinancialStore>(
    store: &mut S,
    period_id: i64,
    user_id: Option<&str>,
    calculation_date: NaiveDate,
) -> Result<Vec<RatioResult>> {
    require_period(store, period_id)?;

    if store.mappings_for_period(period_id)?.is_empty() {
        info!("Period {} has no mappings; skipping ratio computation", period_id);
        store.replace_calculated_ratios(period_id, &[])?;
        return Ok(Vec::new());
    }

    let totals = aggregate(store, period_id, None)?;
    let taxonomy = store.line_items()?;
    let headline = FinancialTotals::from_line_items(&totals, &taxonomy);

    let benchmarks = match user_id {
        Some(user) => store.user_benchmarks(user)?,
        None => Vec::new(),
    };

    let mut results = Vec::new();
    let mut calculated = Vec::new();

    for definition in store.ratio_definitions()? {
        let Some(value) = evaluate_formula(definition.formula, &headline) else {
            debug!(
                "Skipping {} for period {}: denominator is zero",
                definition.ratio_name, period_id
            );
            continue;
        };

        results.push(evaluate_ratio(
            &definition,
            value,
            find_benchmark(&benchmarks, definition.id),
        ));
        calculated.push(CalculatedRatio {
            ratio_definition_id: definition.id,
            period_id,
            calculated_value: value,
            calculation_date,
        });
    }

    store.replace_calculated_ratios(period_id, &calculated)?;
    info!(
        "Computed {} ratio(s) for period {}",
        results.len(),
        period_id
    );
    Ok(results)
}

/// `round(mean(tier points))`, or `None` for an empty result set.
pub fn health_score(results: &[RatioResult]) -> Option<u8> {
    if results.is_empty() {
        return None;
    }
    let total: u32 = results.iter().map(|r| r.performance_status.points()).sum();
    let mean = total as f64 / results.len() as f64;
    Some(mean.round().clamp(0.0, 100.0) as u8)
}
