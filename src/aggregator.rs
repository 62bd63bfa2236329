use crate::config::PipelineConfig;
use crate::error::Result;
use crate::periods::require_period;
use crate::schema::{LineItem, LineItemTotal, ReportType};
use crate::store::FinancialStore;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Net amount per line item id for one period: mappings joined to the period's
/// entries by ledger name, `closing_balance` summed per target item. Duplicate
/// ledger names all contribute.
pub fn net_amounts<S: FinancialStore>(store: &S, period_id: i64) -> Result<BTreeMap<String, f64>> {
    let mut by_ledger: HashMap<String, f64> = HashMap::new();
    for entry in store.entries_for_period(period_id)? {
        *by_ledger.entry(entry.ledger_name).or_insert(0.0) += entry.closing_balance;
    }

    let mut amounts = BTreeMap::new();
    for mapping in store.mappings_for_period(period_id)? {
        match by_ledger.get(&mapping.tally_ledger_name) {
            Some(balance) => {
                *amounts.entry(mapping.master_item_id).or_insert(0.0) += balance;
            }
            None => debug!(
                "Mapping for '{}' has no entries in period {}",
                mapping.tally_ledger_name, period_id
            ),
        }
    }
    Ok(amounts)
}

/// Line-item totals for `period_id`, in taxonomy display order. With a
/// comparison period, each current item carries that period's amount (0 when
/// absent); items that only exist in the comparison period are not reported.
pub fn aggregate<S: FinancialStore>(
    store: &S,
    period_id: i64,
    comparison_period_id: Option<i64>,
) -> Result<Vec<LineItemTotal>> {
    require_period(store, period_id)?;
    let current = net_amounts(store, period_id)?;

    let previous = match comparison_period_id {
        Some(id) => {
            require_period(store, id)?;
            net_amounts(store, id)?
        }
        None => BTreeMap::new(),
    };

    let taxonomy = store.line_items()?;
    let mut totals = Vec::with_capacity(current.len());

    for item in &taxonomy {
        let Some(&current_amount) = current.get(&item.id) else {
            continue;
        };
        let previous_amount = previous.get(&item.id).copied().unwrap_or(0.0);
        totals.push(line_item_total(item, current_amount, previous_amount));
    }

    if totals.len() < current.len() {
        warn!(
            "{} mapped item(s) in period {} are missing from the taxonomy",
            current.len() - totals.len(),
            period_id
        );
    }
    info!("Aggregated {} line item(s) for period {}", totals.len(), period_id);
    Ok(totals)
}

fn line_item_total(item: &LineItem, current_amount: f64, previous_amount: f64) -> LineItemTotal {
    let variance = current_amount - previous_amount;
    let variance_percentage = if previous_amount != 0.0 {
        variance / previous_amount.abs() * 100.0
    } else {
        0.0
    };

    LineItemTotal {
        item_code: item.id.clone(),
        item_name: item.display_name.clone(),
        category: item.report_section.clone(),
        report_type: item.report_type,
        current_amount,
        previous_amount,
        variance,
        variance_percentage,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryTotal {
    pub report_type: ReportType,
    pub category: String,
    pub current_amount: f64,
    pub previous_amount: f64,
    pub item_count: usize,
}

impl CategoryTotal {
    pub fn variance(&self) -> f64 {
        self.current_amount - self.previous_amount
    }
}

/// One-level roll-up by report section, in the order sections first appear.
pub fn category_totals(totals: &[LineItemTotal]) -> Vec<CategoryTotal> {
    let mut categories: Vec<CategoryTotal> = Vec::new();

    for total in totals {
        let existing = categories
            .iter_mut()
            .find(|c| c.report_type == total.report_type && c.category == total.category);

        match existing {
            Some(category) => {
                category.current_amount += total.current_amount;
                category.previous_amount += total.previous_amount;
                category.item_count += 1;
            }
            None => categories.push(CategoryTotal {
                report_type: total.report_type,
                category: total.category.clone(),
                current_amount: total.current_amount,
                previous_amount: total.previous_amount,
                item_count: 1,
            }),
        }
    }

    categories
}

/// Display filter. Immaterial items are hidden, never removed from the data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaterialityFilter {
    pub threshold: f64,
    pub show_immaterial: bool,
}

impl MaterialityFilter {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            show_immaterial: false,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.materiality_threshold)
    }

    pub fn toggle(&mut self) {
        self.show_immaterial = !self.show_immaterial;
    }

    pub fn is_material(&self, total: &LineItemTotal) -> bool {
        total.current_amount.abs() >= self.threshold
    }

    pub fn visible<'a>(&self, totals: &'a [LineItemTotal]) -> Vec<&'a LineItemTotal> {
        totals
            .iter()
            .filter(|t| self.show_immaterial || self.is_material(t))
            .collect()
    }

    pub fn hidden_count(&self, totals: &[LineItemTotal]) -> usize {
        totals.len() - self.visible(totals).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart_of_accounts::ChartOfAccounts;
    use crate::error::ReportingError;
    use crate::schema::{AccountType, ConflictPolicy, EntrySource, LedgerEntry, Mapping};
    use crate::store::MemoryStore;
    use chrono::NaiveDate;

    fn entry(name: &str, balance: f64) -> LedgerEntry {
        LedgerEntry {
            ledger_name: name.to_string(),
            debit: balance.max(0.0),
            credit: (-balance).max(0.0),
            closing_balance: balance,
            account_type: AccountType::Other,
            account_category: None,
            confidence: None,
            source: EntrySource::Csv,
            period_id: None,
        }
    }

    fn map(store: &mut MemoryStore, period_id: i64, pairs: &[(&str, &str)]) {
        let mappings: Vec<Mapping> = pairs
            .iter()
            .map(|(ledger, item)| Mapping {
                tally_ledger_name: ledger.to_string(),
                master_item_id: item.to_string(),
                period_id,
            })
            .collect();
        store.insert_mappings(&mappings, ConflictPolicy::Skip).unwrap();
    }

    fn two_periods() -> (MemoryStore, i64, i64) {
        let mut store = MemoryStore::new();
        store
            .seed_line_items(ChartOfAccounts::schedule_three().items())
            .unwrap();
        let q1 = store
            .insert_period(2024, 1, NaiveDate::from_ymd_opt(2023, 6, 30).unwrap(), "Q1")
            .unwrap();
        let q2 = store
            .insert_period(2024, 2, NaiveDate::from_ymd_opt(2023, 9, 30).unwrap(), "Q2")
            .unwrap();
        (store, q1.id, q2.id)
    }

    #[test]
    fn test_duplicate_ledgers_are_summed() {
        let (mut store, q1, _) = two_periods();
        store
            .insert_entries(q1, &[entry("Bank", 100.0), entry("Bank", 50.0)])
            .unwrap();
        map(&mut store, q1, &[("Bank", "BS_CA_CASH")]);

        let totals = aggregate(&store, q1, None).unwrap();
        assert_eq!(totals.len(), 1);
        assert_eq!(totals[0].current_amount, 150.0);
        assert_eq!(totals[0].variance, 150.0);
        assert_eq!(totals[0].variance_percentage, 0.0);
    }

    #[test]
    fn test_variance_against_comparison() {
        let (mut store, q1, q2) = two_periods();
        store.insert_entries(q1, &[entry("Bank", 200.0)]).unwrap();
        store
            .insert_entries(q2, &[entry("Bank", 150.0), entry("Debtors", 80.0)])
            .unwrap();
        map(&mut store, q1, &[("Bank", "BS_CA_CASH")]);
        map(
            &mut store,
            q2,
            &[("Bank", "BS_CA_CASH"), ("Debtors", "BS_CA_TRADE_RECEIVABLES")],
        );

        let totals = aggregate(&store, q2, Some(q1)).unwrap();
        assert_eq!(totals.len(), 2);

        let receivables = &totals[0];
        assert_eq!(receivables.item_code, "BS_CA_TRADE_RECEIVABLES");
        assert_eq!(receivables.previous_amount, 0.0);
        assert_eq!(receivables.variance_percentage, 0.0);

        let cash = &totals[1];
        assert_eq!(cash.previous_amount, 200.0);
        assert_eq!(cash.variance, -50.0);
        assert_eq!(cash.variance_percentage, -25.0);
    }

    #[test]
    fn test_negative_previous_uses_absolute_base() {
        let (mut store, q1, q2) = two_periods();
        store.insert_entries(q1, &[entry("Sales", -100.0)]).unwrap();
        store.insert_entries(q2, &[entry("Sales", -150.0)]).unwrap();
        map(&mut store, q1, &[("Sales", "PL_INC_REVENUE")]);
        map(&mut store, q2, &[("Sales", "PL_INC_REVENUE")]);

        let totals = aggregate(&store, q2, Some(q1)).unwrap();
        assert_eq!(totals[0].variance, -50.0);
        assert_eq!(totals[0].variance_percentage, -50.0);
    }

    #[test]
    fn test_unknown_period() {
        let (store, q1, _) = two_periods();
        assert!(matches!(
            aggregate(&store, 99, None),
            Err(ReportingError::PeriodNotFound(99))
        ));
        assert!(aggregate(&store, q1, Some(98)).is_err());
    }

    fn total(code: &str, category: &str, amount: f64) -> LineItemTotal {
        LineItemTotal {
            item_code: code.to_string(),
            item_name: code.to_string(),
            category: category.to_string(),
            report_type: ReportType::BalanceSheet,
            current_amount: amount,
            previous_amount: 0.0,
            variance: amount,
            variance_percentage: 0.0,
        }
    }

    #[test]
    fn test_category_totals_keep_order() {
        let totals = vec![
            total("A", "Current Assets", 10.0),
            total("B", "Current Liabilities", -4.0),
            total("C", "Current Assets", 5.0),
        ];
        let categories = category_totals(&totals);
        assert_eq!(categories.len(), 2);
        assert_eq!(categories[0].category, "Current Assets");
        assert_eq!(categories[0].current_amount, 15.0);
        assert_eq!(categories[0].item_count, 2);
        assert_eq!(categories[1].variance(), -4.0);
    }

    #[test]
    fn test_materiality_filter() {
        let totals = vec![
            total("BIG", "Current Assets", 1_000_000.0),
            total("SMALL", "Current Assets", 999_999.99),
            total("NEG", "Current Liabilities", -2_500_000.0),
        ];
        let mut filter = MaterialityFilter::from_config(&PipelineConfig::default());

        let visible: Vec<&str> = filter
            .visible(&totals)
            .iter()
            .map(|t| t.item_code.as_str())
            .collect();
        assert_eq!(visible, vec!["BIG", "NEG"]);
        assert_eq!(filter.hidden_count(&totals), 1);

        filter.toggle();
        assert_eq!(filter.visible(&totals).len(), 3);
        assert_eq!(totals.len(), 3);
    }
}
