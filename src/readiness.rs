use crate::chart_of_accounts::CHANGES_IN_INVENTORIES_ID;
use crate::classifier::unmapped_ledgers;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::periods::require_period;
use crate::schema::{FinancialPeriod, LineItemTotal};
use crate::statements::FinancialTotals;
use crate::store::FinancialStore;
use log::info;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadinessCheck {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodReadiness {
    pub period: FinancialPeriod,
    pub checks: Vec<ReadinessCheck>,
    pub entry_count: usize,
    pub mapped_count: usize,
    /// Sum of debit-positive closing balances; zero for a complete trial balance.
    pub net_balance: f64,
    pub unmapped_ledgers: Vec<String>,
}

impl PeriodReadiness {
    pub fn is_ready(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failed_checks(&self) -> impl Iterator<Item = &ReadinessCheck> {
        self.checks.iter().filter(|c| !c.passed)
    }

    /// Next step for the user, or `None` once every check passes.
    pub fn guidance(&self) -> Option<&'static str> {
        if self.entry_count == 0 {
            Some("Upload trial balance data for this period first.")
        } else if !self.unmapped_ledgers.is_empty() {
            Some("Complete the ledger mapping for this period first.")
        } else if !self.is_ready() {
            Some("The trial balance does not net to zero; check for missing ledgers.")
        } else {
            None
        }
    }
}

pub fn validate_period_readiness<S: FinancialStore>(
    store: &S,
    period_id: i64,
    config: &PipelineConfig,
) -> Result<PeriodReadiness> {
    let period = require_period(store, period_id)?;
    let entries = store.entries_for_period(period_id)?;
    let unmapped = unmapped_ledgers(store, period_id)?;
    let mapped_count = store.mappings_for_period(period_id)?.len();
    let net_balance: f64 = entries.iter().map(|e| e.closing_balance).sum();

    let checks = vec![
        ReadinessCheck {
            name: "has_entries".to_string(),
            passed: !entries.is_empty(),
            detail: format!("{} ledger entr(ies) uploaded", entries.len()),
        },
        ReadinessCheck {
            name: "all_ledgers_mapped".to_string(),
            passed: !entries.is_empty() && unmapped.is_empty(),
            detail: format!("{} ledger(s) without a mapping", unmapped.len()),
        },
        ReadinessCheck {
            name: "trial_balance_nets_to_zero".to_string(),
            passed: net_balance.abs() <= config.balance_tolerance,
            detail: format!("net closing balance {:.2}", net_balance),
        },
    ];

    let readiness = PeriodReadiness {
        period,
        checks,
        entry_count: entries.len(),
        mapped_count,
        net_balance,
        unmapped_ledgers: unmapped,
    };
    info!(
        "Period {} readiness: {} ({} unmapped)",
        readiness.period.period_name,
        if readiness.is_ready() { "ready" } else { "not ready" },
        readiness.unmapped_ledgers.len()
    );
    Ok(readiness)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InventoryReconciliation {
    pub opening_stock: f64,
    pub closing_stock: f64,
    /// Opening minus closing stock.
    pub expected_change: f64,
    pub reported_change: f64,
    pub difference: f64,
    pub reconciled: bool,
}

/// Checks that the P&L "Changes in Inventories" line equals opening stock
/// (the previous period's inventories) minus closing stock.
pub fn reconcile_inventory_change(
    current: &[LineItemTotal],
    previous: &FinancialTotals,
    current_totals: &FinancialTotals,
    tolerance: f64,
) -> InventoryReconciliation {
    let reported_change = current
        .iter()
        .filter(|t| t.item_code == CHANGES_IN_INVENTORIES_ID)
        .map(|t| t.current_amount)
        .sum::<f64>();

    let opening_stock = previous.inventories;
    let closing_stock = current_totals.inventories;
    let expected_change = opening_stock - closing_stock;
    let difference = reported_change - expected_change;

    InventoryReconciliation {
        opening_stock,
        closing_stock,
        expected_change,
        reported_change,
        difference,
        reconciled: difference.abs() <= tolerance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart_of_accounts::ChartOfAccounts;
    use crate::classifier::apply_mapping;
    use crate::schema::{AccountType, EntrySource, LedgerEntry, ReportType};
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

    fn store_with_period() -> (MemoryStore, i64) {
        let mut store = MemoryStore::new();
        store
            .seed_line_items(ChartOfAccounts::schedule_three().items())
            .unwrap();
        let period = store
            .insert_period(2024, 1, NaiveDate::from_ymd_opt(2023, 6, 30).unwrap(), "Q1 FY2023-24")
            .unwrap();
        (store, period.id)
    }

    #[test]
    fn test_empty_period_is_not_ready() {
        let (store, period_id) = store_with_period();
        let readiness =
            validate_period_readiness(&store, period_id, &PipelineConfig::default()).unwrap();

        assert!(!readiness.is_ready());
        assert_eq!(readiness.failed_checks().count(), 2);
        assert_eq!(
            readiness.guidance(),
            Some("Upload trial balance data for this period first.")
        );
    }

    #[test]
    fn test_readiness_progression() {
        let (mut store, period_id) = store_with_period();
        store
            .insert_entries(period_id, &[entry("Cash", 25000.0), entry("Sales", -25000.0)])
            .unwrap();
        apply_mapping(&mut store, "Cash", "BS_CA_CASH", period_id).unwrap();

        let config = PipelineConfig::default();
        let readiness = validate_period_readiness(&store, period_id, &config).unwrap();
        assert_eq!(readiness.unmapped_ledgers, vec!["Sales"]);
        assert_eq!(readiness.mapped_count, 1);
        assert!(readiness.guidance().unwrap().contains("mapping"));

        apply_mapping(&mut store, "Sales", "PL_INC_REVENUE", period_id).unwrap();
        let readiness = validate_period_readiness(&store, period_id, &config).unwrap();
        assert!(readiness.is_ready());
        assert_eq!(readiness.guidance(), None);
    }

    #[test]
    fn test_unbalanced_trial_balance_flagged() {
        let (mut store, period_id) = store_with_period();
        store.insert_entries(period_id, &[entry("Cash", 100.0)]).unwrap();
        apply_mapping(&mut store, "Cash", "BS_CA_CASH", period_id).unwrap();

        let readiness =
            validate_period_readiness(&store, period_id, &PipelineConfig::default()).unwrap();
        let failed: Vec<&str> = readiness.failed_checks().map(|c| c.name.as_str()).collect();
        assert_eq!(failed, vec!["trial_balance_nets_to_zero"]);
    }

    #[test]
    fn test_inventory_reconciliation() {
        let change = LineItemTotal {
            item_code: CHANGES_IN_INVENTORIES_ID.to_string(),
            item_name: "Changes in Inventories".to_string(),
            category: "Expenses".to_string(),
            report_type: ReportType::ProfitLoss,
            current_amount: 5_000.0,
            previous_amount: 0.0,
            variance: 5_000.0,
            variance_percentage: 0.0,
        };
        let previous = FinancialTotals {
            inventories: 30_000.0,
            ..FinancialTotals::default()
        };
        let current = FinancialTotals {
            inventories: 25_000.0,
            ..FinancialTotals::default()
        };

        let result = reconcile_inventory_change(&[change.clone()], &previous, &current, 0.01);
        assert!(result.reconciled);
        assert_eq!(result.expected_change, 5_000.0);

        let current = FinancialTotals {
            inventories: 20_000.0,
            ..FinancialTotals::default()
        };
        let result = reconcile_inventory_change(&[change], &previous, &current, 0.01);
        assert!(!result.reconciled);
        assert_eq!(result.difference, -5_000.0);
    }
}
