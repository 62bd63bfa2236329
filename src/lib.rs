//! # Trial Balance Insights
//!
//! A library for turning quarterly trial balances (Tally CSV exports or
//! AI-extracted images) into Schedule III statements, period-over-period
//! variances and graded financial ratios.
//!
//! ## Core Concepts
//!
//! - **Ledger entries**: raw trial-balance rows, normalized to debit-positive balances
//! - **Line items**: the fixed Schedule III taxonomy ledgers are mapped onto
//! - **Mappings**: one line item per ledger name per period, suggested by a
//!   rule-based classifier and applied in bulk or by hand
//! - **Aggregation**: mapped balances summed per line item, with variance
//!   against a comparison period and a materiality filter for display
//! - **Ratios**: liquidity, leverage, profitability and efficiency ratios graded
//!   against targets (user overrides first) and rolled up into a health score
//!
//! ## Example
//!
//! ```rust,ignore
//! use trial_balance_insights::*;
//!
//! let mut pipeline = ReportingPipeline::new(MemoryStore::new(), PipelineConfig::default())?;
//!
//! let csv = "ledger_name,closing_balance,parent_group\n\
//!            Cash,25000,Cash-in-Hand\n\
//!            Sales,-150000,Sales Accounts\n";
//! let report = pipeline.ingest_csv(2024, 1, csv.as_bytes())?;
//! let period = report.period.expect("rows were accepted");
//!
//! pipeline.auto_map(period.id)?;
//! let totals = pipeline.aggregate(period.id, None)?;
//! let analysis = pipeline.ratio_analysis(period.id, Some("analyst"))?;
//! println!("Health score: {:?}", analysis.health_score);
//! ```

pub mod aggregator;
pub mod benchmarks;
pub mod chart_of_accounts;
pub mod classifier;
pub mod config;
pub mod error;
pub mod export;
pub mod ingestion;
pub mod periods;
pub mod ratios;
pub mod readiness;
pub mod schema;
pub mod statements;
pub mod store;
pub mod utils;

#[cfg(feature = "gemini")]
pub mod llm;

pub use aggregator::{aggregate, category_totals, net_amounts, CategoryTotal, MaterialityFilter};
pub use benchmarks::{reset_benchmark_to_default, save_user_benchmark, ComparisonValues};
pub use chart_of_accounts::ChartOfAccounts;
pub use classifier::{
    apply_mapping, infer_account_type, remove_mapping, suggest, suggest_for_period,
    unmapped_ledgers, SuggestionSet,
};
pub use config::{PipelineConfig, SignConvention};
pub use error::{ReportingError, Result};
pub use ingestion::{
    ingest_classifier_output, ingest_csv, ingest_rows, normalize_batch, normalize_row,
    parse_trial_balance_csv, IngestionReport, NormalizedBatch, RawAmount, RawLedgerRow, RowError,
};
pub use periods::{
    previous_period, resolve_or_create_period, resolve_period_for_date, store_period_entries,
};
pub use ratios::{compute_ratios, default_ratio_definitions, health_score};
pub use readiness::{
    reconcile_inventory_change, validate_period_readiness, InventoryReconciliation,
    PeriodReadiness, ReadinessCheck,
};
pub use schema::*;
pub use statements::{BalanceSheet, CashFlowStatement, FinancialTotals, ProfitAndLoss};
pub use store::{FinancialStore, MemoryStore, SqliteStore};
pub use utils::{format_inr, period_for_date, period_name, quarter_end_date};

use chrono::{Local, NaiveDate};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::io::Read;

/// Ratio results for a period together with their health score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatioAnalysis {
    pub period_id: i64,
    pub results: Vec<RatioResult>,
    /// `None` when the period is not ready for ratio analysis.
    pub health_score: Option<u8>,
}

/// Every stage wired to one store and one configuration.
pub struct ReportingPipeline<S: FinancialStore> {
    store: S,
    config: PipelineConfig,
}

impl<S: FinancialStore> ReportingPipeline<S> {
    /// Validates `config` and seeds the Schedule III taxonomy and default
    /// ratio definitions (existing rows are left alone).
    pub fn new(store: S, config: PipelineConfig) -> Result<Self> {
        Self::with_chart(store, config, &ChartOfAccounts::schedule_three())
    }

    pub fn with_chart(mut store: S, config: PipelineConfig, chart: &ChartOfAccounts) -> Result<Self> {
        config.validate()?;

        let items = store.seed_line_items(chart.items())?;
        let ratios = store.seed_ratio_definitions(&default_ratio_definitions())?;
        debug!("Seeded {} line item(s) and {} ratio definition(s)", items, ratios);

        Ok(Self { store, config })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn ingest_csv<R: Read>(&mut self, year: i32, quarter: u32, reader: R) -> Result<IngestionReport> {
        ingest_csv(&mut self.store, year, quarter, reader, &self.config)
    }

    pub fn ingest_rows(
        &mut self,
        year: i32,
        quarter: u32,
        rows: &[RawLedgerRow],
    ) -> Result<IngestionReport> {
        ingest_rows(&mut self.store, year, quarter, rows, &self.config)
    }

    pub fn ingest_classifier_output(
        &mut self,
        output: &ClassifierOutput,
        hint_date: Option<NaiveDate>,
    ) -> Result<IngestionReport> {
        ingest_classifier_output(&mut self.store, output, hint_date, &self.config)
    }

    pub fn suggest_mappings(&self, period_id: Option<i64>) -> Result<SuggestionSet> {
        suggest_for_period(&self.store, period_id, &self.config)
    }

    /// Applies suggestions at or above `threshold`, or the configured
    /// auto-apply threshold when `None`.
    pub fn bulk_apply(&mut self, suggestions: &SuggestionSet, threshold: Option<f64>) -> Result<usize> {
        let threshold = threshold.unwrap_or(self.config.auto_apply_threshold);
        suggestions.bulk_apply(&mut self.store, threshold)
    }

    /// Suggests mappings for the period and bulk-applies the confident ones.
    pub fn auto_map(&mut self, period_id: i64) -> Result<usize> {
        let suggestions = self.suggest_mappings(Some(period_id))?;
        self.bulk_apply(&suggestions, None)
    }

    pub fn apply_mapping(&mut self, ledger_name: &str, master_item_id: &str, period_id: i64) -> Result<()> {
        apply_mapping(&mut self.store, ledger_name, master_item_id, period_id)
    }

    pub fn remove_mapping(&mut self, ledger_name: &str, period_id: i64) -> Result<bool> {
        remove_mapping(&mut self.store, ledger_name, period_id)
    }

    pub fn unmapped_ledgers(&self, period_id: i64) -> Result<Vec<String>> {
        unmapped_ledgers(&self.store, period_id)
    }

    pub fn aggregate(&self, period_id: i64, comparison_period_id: Option<i64>) -> Result<Vec<LineItemTotal>> {
        aggregate(&self.store, period_id, comparison_period_id)
    }

    pub fn materiality_filter(&self) -> MaterialityFilter {
        MaterialityFilter::from_config(&self.config)
    }

    pub fn totals(&self, period_id: i64) -> Result<FinancialTotals> {
        let totals = self.aggregate(period_id, None)?;
        Ok(FinancialTotals::from_line_items(&totals, &self.store.line_items()?))
    }

    pub fn compute_ratios(&mut self, period_id: i64, user_id: Option<&str>) -> Result<Vec<RatioResult>> {
        compute_ratios(&mut self.store, period_id, user_id, Local::now().date_naive())
    }

    pub fn ratio_analysis(&mut self, period_id: i64, user_id: Option<&str>) -> Result<RatioAnalysis> {
        let results = self.compute_ratios(period_id, user_id)?;
        let score = health_score(&results);
        info!("Period {} health score: {:?}", period_id, score);
        Ok(RatioAnalysis {
            period_id,
            results,
            health_score: score,
        })
    }

    pub fn readiness(&self, period_id: i64) -> Result<PeriodReadiness> {
        validate_period_readiness(&self.store, period_id, &self.config)
    }

    pub fn balance_sheet(&self, period_id: i64, comparison_period_id: Option<i64>) -> Result<BalanceSheet> {
        let period = periods::require_period(&self.store, period_id)?;
        let totals = self.aggregate(period_id, comparison_period_id)?;
        Ok(BalanceSheet::build(&period.period_name, &totals, &self.store.line_items()?))
    }

    pub fn profit_and_loss(&self, period_id: i64, comparison_period_id: Option<i64>) -> Result<ProfitAndLoss> {
        let period = periods::require_period(&self.store, period_id)?;
        let totals = self.aggregate(period_id, comparison_period_id)?;
        Ok(ProfitAndLoss::build(&period.period_name, &totals, &self.store.line_items()?))
    }

    /// Cash flow against the immediately preceding stored period, if any.
    pub fn cash_flow(&self, period_id: i64) -> Result<Option<CashFlowStatement>> {
        let Some(previous) = previous_period(&self.store, period_id)? else {
            return Ok(None);
        };
        let current_totals = self.totals(period_id)?;
        let previous_totals = self.totals(previous.id)?;
        Ok(Some(CashFlowStatement::between(&previous_totals, &current_totals)))
    }

    /// Stock reconciliation against the preceding stored period, if any.
    pub fn reconcile_inventory(&self, period_id: i64) -> Result<Option<InventoryReconciliation>> {
        let Some(previous) = previous_period(&self.store, period_id)? else {
            return Ok(None);
        };
        let lines = self.aggregate(period_id, None)?;
        let taxonomy = self.store.line_items()?;
        let current_totals = FinancialTotals::from_line_items(&lines, &taxonomy);
        let previous_totals = self.totals(previous.id)?;

        Ok(Some(reconcile_inventory_change(
            &lines,
            &previous_totals,
            &current_totals,
            self.config.balance_tolerance,
        )))
    }

    pub fn save_user_benchmark(&mut self, benchmark: &UserBenchmark) -> Result<()> {
        save_user_benchmark(&mut self.store, benchmark)
    }

    pub fn reset_benchmark_to_default(&mut self, user_id: &str, ratio_definition_id: i64) -> Result<UserBenchmark> {
        reset_benchmark_to_default(&mut self.store, user_id, ratio_definition_id)
    }
}
