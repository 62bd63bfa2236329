use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-level classification of a ledger account. Balances are stored
/// debit-positive, so ASSETS/EXPENSES are normally positive and
/// LIABILITIES/EQUITY/REVENUE normally negative.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, JsonSchema,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountType {
    Assets,
    Liabilities,
    Equity,
    Revenue,
    Expenses,
    Other,
}

impl AccountType {
    /// Text that a taxonomy `report_section` must contain (upper-cased) to be
    /// considered a home for entries of this type. `LIABILIT` covers both
    /// "LIABILITY" and "LIABILITIES".
    pub fn section_keyword(&self) -> Option<&'static str> {
        match self {
            AccountType::Assets => Some("ASSET"),
            AccountType::Liabilities => Some("LIABILIT"),
            AccountType::Equity => Some("EQUITY"),
            AccountType::Revenue => Some("INCOME"),
            AccountType::Expenses => Some("EXPENSE"),
            AccountType::Other => None,
        }
    }

    /// Credit-normal types whose natural magnitude is the negated balance.
    pub fn is_credit_normal(&self) -> bool {
        matches!(
            self,
            AccountType::Liabilities | AccountType::Equity | AccountType::Revenue
        )
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AccountType::Assets => "ASSETS",
            AccountType::Liabilities => "LIABILITIES",
            AccountType::Equity => "EQUITY",
            AccountType::Revenue => "REVENUE",
            AccountType::Expenses => "EXPENSES",
            AccountType::Other => "OTHER",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntrySource {
    Csv,
    AiExtraction,
    Manual,
}

/// One canonical trial-balance line for one period.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntry {
    pub ledger_name: String,
    pub debit: f64,
    pub credit: f64,
    /// Signed, debit-positive.
    pub closing_balance: f64,
    pub account_type: AccountType,
    pub account_category: Option<String>,
    /// Classifier certainty in [0, 1]; `None` when nothing has classified the row yet.
    pub confidence: Option<f64>,
    pub source: EntrySource,
    pub period_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportType {
    BalanceSheet,
    ProfitLoss,
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportType::BalanceSheet => f.write_str("Balance Sheet"),
            ReportType::ProfitLoss => f.write_str("Profit & Loss"),
        }
    }
}

/// A node of the master reporting taxonomy. Reference data, seeded once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineItem {
    pub id: String,
    pub display_name: String,
    pub report_type: ReportType,
    pub report_section: String,
    pub report_sub_section: Option<String>,
    pub display_order: u32,
}

impl LineItem {
    pub fn accepts(&self, account_type: AccountType) -> bool {
        match account_type.section_keyword() {
            Some(keyword) => self.report_section.to_uppercase().contains(keyword),
            None => false,
        }
    }

    /// The account type implied by this item's section text.
    pub fn implied_account_type(&self) -> AccountType {
        [
            AccountType::Assets,
            AccountType::Liabilities,
            AccountType::Equity,
            AccountType::Revenue,
            AccountType::Expenses,
        ]
        .into_iter()
        .find(|t| self.accepts(*t))
        .unwrap_or(AccountType::Other)
    }

    pub fn is_current(&self) -> bool {
        let section = self.report_section.to_uppercase();
        section.contains("CURRENT") && !section.contains("NON-CURRENT")
    }

    pub fn has_sub_section(&self, tag: &str) -> bool {
        self.report_sub_section.as_deref() == Some(tag)
    }
}

/// Assignment of a ledger name to exactly one line item within a period.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Mapping {
    pub tally_ledger_name: String,
    pub master_item_id: String,
    pub period_id: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ConflictPolicy {
    /// Keep the existing mapping for the (ledger, period) pair.
    Skip,
    /// Delete the existing mapping and insert the new one.
    Replace,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinancialPeriod {
    pub id: i64,
    /// Calendar year in which the fiscal year ends.
    pub year: i32,
    pub quarter: u32,
    pub quarter_end_date: NaiveDate,
    pub period_name: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RatioCategory {
    Liquidity,
    Profitability,
    Efficiency,
    Leverage,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RatioDirection {
    HigherIsBetter,
    LowerIsBetter,
}

impl RatioDirection {
    /// Name-based rule used for definitions that do not declare a direction.
    pub fn infer_from_name(ratio_name: &str) -> Self {
        let name = ratio_name.to_lowercase();
        if name.contains("debt to equity")
            || name.contains("debt ratio")
            || name.contains("debt to assets")
        {
            RatioDirection::LowerIsBetter
        } else {
            RatioDirection::HigherIsBetter
        }
    }
}

/// The typed formula behind a ratio definition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RatioFormula {
    CurrentRatio,
    QuickRatio,
    CashRatio,
    DebtToEquity,
    DebtRatio,
    NetProfitMargin,
    GrossProfitMargin,
    ReturnOnAssets,
    ReturnOnEquity,
    AssetTurnover,
    InventoryTurnover,
    InterestCoverage,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RatioDefinition {
    pub id: i64,
    pub ratio_name: String,
    pub ratio_category: RatioCategory,
    pub formula: RatioFormula,
    pub formula_description: String,
    pub target_value: Option<f64>,
    pub benchmark_value: Option<f64>,
    pub industry_average: Option<f64>,
    #[serde(default)]
    pub direction: Option<RatioDirection>,
}

impl RatioDefinition {
    pub fn direction(&self) -> RatioDirection {
        self.direction
            .unwrap_or_else(|| RatioDirection::infer_from_name(&self.ratio_name))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BenchmarkSource {
    SystemDefault,
    IndustryReport,
    CompetitorAnalysis,
    InternalTarget,
    Regulatory,
}

/// Per-user override of a ratio definition's comparison values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserBenchmark {
    pub user_id: String,
    pub ratio_definition_id: i64,
    pub custom_target_value: Option<f64>,
    pub custom_industry_average: Option<f64>,
    pub benchmark_source: BenchmarkSource,
    pub notes: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalculatedRatio {
    pub ratio_definition_id: i64,
    pub period_id: i64,
    pub calculated_value: f64,
    pub calculation_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Suggestion {
    pub ledger_name: String,
    pub suggested_item_id: String,
    pub confidence: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineItemTotal {
    pub item_code: String,
    pub item_name: String,
    pub category: String,
    pub report_type: ReportType,
    pub current_amount: f64,
    pub previous_amount: f64,
    pub variance: f64,
    pub variance_percentage: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceStatus {
    Excellent,
    Good,
    Warning,
    Poor,
}

impl PerformanceStatus {
    pub fn points(&self) -> u32 {
        match self {
            PerformanceStatus::Excellent => 100,
            PerformanceStatus::Good => 75,
            PerformanceStatus::Warning => 50,
            PerformanceStatus::Poor => 25,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Up,
    Down,
    Stable,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RatioResult {
    pub ratio_name: String,
    pub ratio_category: RatioCategory,
    pub calculated_value: f64,
    pub target_value: Option<f64>,
    pub benchmark_value: Option<f64>,
    pub industry_average: Option<f64>,
    pub performance_status: PerformanceStatus,
    pub trend_direction: TrendDirection,
}

// --- Classifier backend contract -------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExtractedLedgerRow {
    #[schemars(description = "The ledger account name exactly as printed in the trial balance")]
    pub ledger_name: String,

    #[schemars(
        description = "Signed closing balance. Debit balances are POSITIVE, credit balances are NEGATIVE."
    )]
    pub closing_balance: f64,

    #[schemars(description = "Debit column amount, if the document shows separate debit/credit columns")]
    pub debit: Option<f64>,

    #[schemars(description = "Credit column amount, if the document shows separate debit/credit columns")]
    pub credit: Option<f64>,

    #[schemars(description = "One of ASSETS, LIABILITIES, EQUITY, REVENUE, EXPENSES, OTHER")]
    pub account_type: AccountType,

    #[schemars(
        description = "Sub-category or parent group of the ledger, e.g. 'Sundry Debtors', 'Indirect Expenses'"
    )]
    pub account_category: Option<String>,

    #[schemars(description = "Certainty of the account_type classification, 0.0 to 1.0")]
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PeriodInfo {
    #[schemars(description = "The reporting period as written in the document, e.g. 'Quarter ended 30 June 2024'")]
    pub detected_period: String,

    #[schemars(description = "Period end date in YYYY-MM-DD format, if one could be determined")]
    pub period_date: Option<NaiveDate>,

    #[schemars(description = "Certainty of the detected period, 0.0 to 1.0")]
    pub period_confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct ExtractionMetadata {
    #[schemars(description = "Overall certainty of the extraction, 0.0 to 1.0")]
    pub confidence_score: f64,

    #[serde(default)]
    #[schemars(description = "Short notes on anything ambiguous: illegible rows, merged cells, totals skipped")]
    pub parsing_notes: Vec<String>,
}

/// What an image/document classifier hands back for one trial balance.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ClassifierOutput {
    #[schemars(description = "Every leaf ledger row of the trial balance. Exclude group totals and grand totals.")]
    pub entries: Vec<ExtractedLedgerRow>,
    pub period_info: PeriodInfo,
    pub metadata: ExtractionMetadata,
}

impl ClassifierOutput {
    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(ClassifierOutput)
    }

    /// Schema in the subset accepted by Gemini structured output: no `$ref`,
    /// `$schema` or `definitions`, and nullable fields instead of type unions.
    pub fn response_schema() -> serde_json::Result<serde_json::Value> {
        let settings = schemars::gen::SchemaSettings::draft07().with(|s| {
            s.inline_subschemas = true;
            s.option_add_null_type = true;
        });
        let root = settings.into_generator().into_root_schema_for::<ClassifierOutput>();
        let mut value = serde_json::to_value(root)?;
        clean_schema_value(&mut value);
        Ok(value)
    }
}

fn clean_schema_value(value: &mut serde_json::Value) {
    use serde_json::Value;

    if let Value::Object(map) = value {
        for key in ["$schema", "definitions", "title", "default", "additionalProperties"] {
            map.remove(key);
        }

        if let Some(Value::Array(types)) = map.get("type").cloned() {
            let non_null: Vec<Value> = types
                .iter()
                .filter(|t| t.as_str() != Some("null"))
                .cloned()
                .collect();
            if non_null.len() == 1 {
                map.insert("type".to_string(), non_null[0].clone());
                if non_null.len() < types.len() {
                    map.insert("nullable".to_string(), Value::Bool(true));
                }
            }
        }

        for child in map.values_mut() {
            clean_schema_value(child);
        }
    } else if let Value::Array(items) = value {
        for item in items {
            clean_schema_value(item);
        }
    }
}
