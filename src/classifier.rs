//! Rule-based mapping suggester.
//!
//! Each ledger entry is routed to the first taxonomy item (by display order)
//! whose report section implies the entry's account type. Entries that arrive
//! unclassified (plain CSV) get a type inferred from their Tally parent group.

use crate::config::{validate_threshold, PipelineConfig};
use crate::error::{ReportingError, Result};
use crate::periods::require_period;
use crate::schema::{AccountType, ConflictPolicy, LedgerEntry, LineItem, Mapping, Suggestion};
use crate::store::FinancialStore;
use log::{debug, info};
use std::collections::{BTreeSet, HashSet};

/// Tally primary groups and the account type they imply.
const TALLY_GROUPS: &[(&str, AccountType)] = &[
    ("capital account", AccountType::Equity),
    ("reserves & surplus", AccountType::Equity),
    ("current assets", AccountType::Assets),
    ("bank accounts", AccountType::Assets),
    ("cash-in-hand", AccountType::Assets),
    ("deposits (asset)", AccountType::Assets),
    ("loans & advances (asset)", AccountType::Assets),
    ("stock-in-hand", AccountType::Assets),
    ("sundry debtors", AccountType::Assets),
    ("fixed assets", AccountType::Assets),
    ("investments", AccountType::Assets),
    ("misc. expenses (asset)", AccountType::Assets),
    ("current liabilities", AccountType::Liabilities),
    ("duties & taxes", AccountType::Liabilities),
    ("provisions", AccountType::Liabilities),
    ("sundry creditors", AccountType::Liabilities),
    ("loans (liability)", AccountType::Liabilities),
    ("bank od a/c", AccountType::Liabilities),
    ("secured loans", AccountType::Liabilities),
    ("unsecured loans", AccountType::Liabilities),
    ("suspense a/c", AccountType::Liabilities),
    ("sales accounts", AccountType::Revenue),
    ("direct incomes", AccountType::Revenue),
    ("indirect incomes", AccountType::Revenue),
    ("purchase accounts", AccountType::Expenses),
    ("direct expenses", AccountType::Expenses),
    ("indirect expenses", AccountType::Expenses),
];

// Checked in order; the first stem found in the group text wins.
const KEYWORD_STEMS: &[(&str, AccountType)] = &[
    ("asset", AccountType::Assets),
    ("debtor", AccountType::Assets),
    ("receivable", AccountType::Assets),
    ("liabilit", AccountType::Liabilities),
    ("creditor", AccountType::Liabilities),
    ("payable", AccountType::Liabilities),
    ("loan", AccountType::Liabilities),
    ("capital", AccountType::Equity),
    ("reserve", AccountType::Equity),
    ("equity", AccountType::Equity),
    ("income", AccountType::Revenue),
    ("sales", AccountType::Revenue),
    ("revenue", AccountType::Revenue),
    ("expense", AccountType::Expenses),
    ("purchase", AccountType::Expenses),
];

/// Account type implied by a parent-group label, if any.
pub fn infer_account_type(group: &str) -> Option<AccountType> {
    let group = group.trim().to_lowercase();
    if group.is_empty() {
        return None;
    }

    TALLY_GROUPS
        .iter()
        .find(|(name, _)| *name == group)
        .or_else(|| KEYWORD_STEMS.iter().find(|(stem, _)| group.contains(stem)))
        .map(|(_, account_type)| *account_type)
}

/// Produces at most one suggestion per distinct ledger name, in entry order.
/// An empty taxonomy yields no suggestions.
pub fn suggest(
    entries: &[LedgerEntry],
    taxonomy: &[LineItem],
    config: &PipelineConfig,
) -> Vec<Suggestion> {
    if taxonomy.is_empty() {
        debug!("No taxonomy loaded, skipping suggestions");
        return Vec::new();
    }

    let mut ordered: Vec<&LineItem> = taxonomy.iter().collect();
    ordered.sort_by(|a, b| {
        a.display_order
            .cmp(&b.display_order)
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut seen = HashSet::new();
    let mut suggestions = Vec::new();

    for entry in entries {
        if !seen.insert(entry.ledger_name.as_str()) {
            continue;
        }

        let (account_type, confidence, basis) = match entry.account_type {
            AccountType::Other => {
                let group = entry.account_category.as_deref().unwrap_or_default();
                match infer_account_type(group) {
                    Some(inferred) => (
                        inferred,
                        config.fallback_confidence,
                        format!("parent group '{}' implies {}", group.trim(), inferred),
                    ),
                    None => {
                        debug!("No type could be inferred for '{}'", entry.ledger_name);
                        continue;
                    }
                }
            }
            classified => (
                classified,
                entry.confidence.unwrap_or(config.fallback_confidence),
                format!("classified as {}", classified),
            ),
        };

        let Some(item) = ordered.iter().find(|item| item.accepts(account_type)) else {
            debug!(
                "No {} section in taxonomy for '{}'",
                account_type, entry.ledger_name
            );
            continue;
        };

        suggestions.push(Suggestion {
            ledger_name: entry.ledger_name.clone(),
            suggested_item_id: item.id.clone(),
            confidence,
            reasoning: format!(
                "{}; first '{}' item is {}",
                basis, item.report_section, item.display_name
            ),
        });
    }

    info!(
        "Produced {} suggestion(s) for {} entr(ies)",
        suggestions.len(),
        entries.len()
    );
    suggestions
}

/// The working set of suggestions for one period. Rejecting only touches
/// this set; applying writes mappings.
#[derive(Debug, Clone)]
pub struct SuggestionSet {
    period_id: i64,
    suggestions: Vec<Suggestion>,
}

impl SuggestionSet {
    pub fn new(period_id: i64, suggestions: Vec<Suggestion>) -> Self {
        Self {
            period_id,
            suggestions,
        }
    }

    pub fn period_id(&self) -> i64 {
        self.period_id
    }

    pub fn suggestions(&self) -> &[Suggestion] {
        &self.suggestions
    }

    pub fn len(&self) -> usize {
        self.suggestions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.suggestions.is_empty()
    }

    pub fn get(&self, ledger_name: &str) -> Option<&Suggestion> {
        self.suggestions.iter().find(|s| s.ledger_name == ledger_name)
    }

    pub fn above_threshold(&self, threshold: f64) -> impl Iterator<Item = &Suggestion> {
        self.suggestions
            .iter()
            .filter(move |s| s.confidence >= threshold)
    }

    pub fn reject(&mut self, ledger_name: &str) -> Option<Suggestion> {
        let idx = self
            .suggestions
            .iter()
            .position(|s| s.ledger_name == ledger_name)?;
        Some(self.suggestions.remove(idx))
    }

    /// Applies a single suggestion, replacing any existing mapping for the
    /// ledger. Returns false when the set holds no suggestion for it.
    pub fn apply_one<S: FinancialStore>(&mut self, store: &mut S, ledger_name: &str) -> Result<bool> {
        let Some(suggestion) = self.get(ledger_name) else {
            return Ok(false);
        };

        apply_mapping(
            store,
            &suggestion.ledger_name,
            &suggestion.suggested_item_id,
            self.period_id,
        )?;
        self.reject(ledger_name);
        Ok(true)
    }

    /// Writes every suggestion at or above `threshold` in one atomic batch.
    /// Ledgers that already have a mapping are left alone, so re-running is a
    /// no-op. Returns the number of mappings written.
    pub fn bulk_apply<S: FinancialStore>(&self, store: &mut S, threshold: f64) -> Result<usize> {
        validate_threshold(threshold)?;

        let mappings: Vec<Mapping> = self
            .above_threshold(threshold)
            .map(|s| Mapping {
                tally_ledger_name: s.ledger_name.clone(),
                master_item_id: s.suggested_item_id.clone(),
                period_id: self.period_id,
            })
            .collect();

        let applied = store.insert_mappings(&mappings, ConflictPolicy::Skip)?;
        info!(
            "Bulk-applied {} of {} eligible suggestion(s) at threshold {:.2}",
            applied,
            mappings.len(),
            threshold
        );
        Ok(applied)
    }
}

/// Builds the suggestion set for a period from its stored entries and the
/// stored taxonomy.
pub fn suggest_for_period<S: FinancialStore>(
    store: &S,
    period_id: Option<i64>,
    config: &PipelineConfig,
) -> Result<SuggestionSet> {
    let period_id = period_id.ok_or_else(|| {
        ReportingError::NoPeriod("no financial period selected for classification".to_string())
    })?;
    let period = require_period(store, period_id)?;

    let entries = store.entries_for_period(period.id)?;
    let taxonomy = store.line_items()?;
    Ok(SuggestionSet::new(
        period.id,
        suggest(&entries, &taxonomy, config),
    ))
}

/// Manual mapping. Replaces whatever the ledger was mapped to before.
pub fn apply_mapping<S: FinancialStore>(
    store: &mut S,
    ledger_name: &str,
    master_item_id: &str,
    period_id: i64,
) -> Result<()> {
    let mapping = Mapping {
        tally_ledger_name: ledger_name.to_string(),
        master_item_id: master_item_id.to_string(),
        period_id,
    };
    store.insert_mappings(&[mapping], ConflictPolicy::Replace)?;
    debug!("Mapped '{}' to {} in period {}", ledger_name, master_item_id, period_id);
    Ok(())
}

pub fn remove_mapping<S: FinancialStore>(
    store: &mut S,
    ledger_name: &str,
    period_id: i64,
) -> Result<bool> {
    let removed = store.delete_mapping(ledger_name, period_id)?;
    if removed {
        debug!("Removed mapping for '{}' in period {}", ledger_name, period_id);
    }
    Ok(removed)
}

/// Distinct ledger names in the period that have no mapping, sorted.
pub fn unmapped_ledgers<S: FinancialStore>(store: &S, period_id: i64) -> Result<Vec<String>> {
    require_period(store, period_id)?;

    let mapped: HashSet<String> = store
        .mappings_for_period(period_id)?
        .into_iter()
        .map(|m| m.tally_ledger_name)
        .collect();

    let unmapped: BTreeSet<String> = store
        .entries_for_period(period_id)?
        .into_iter()
        .map(|e| e.ledger_name)
        .filter(|name| !mapped.contains(name))
        .collect();

    Ok(unmapped.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart_of_accounts::ChartOfAccounts;
    use crate::schema::{EntrySource, ReportType};
    use crate::store::MemoryStore;
    use chrono::NaiveDate;

    fn entry(name: &str, balance: f64, account_type: AccountType) -> LedgerEntry {
        LedgerEntry {
            ledger_name: name.to_string(),
            debit: balance.max(0.0),
            credit: (-balance).max(0.0),
            closing_balance: balance,
            account_type,
            account_category: None,
            confidence: None,
            source: EntrySource::Manual,
            period_id: None,
        }
    }

    fn item(id: &str, section: &str, order: u32) -> LineItem {
        LineItem {
            id: id.to_string(),
            display_name: id.to_string(),
            report_type: ReportType::BalanceSheet,
            report_section: section.to_string(),
            report_sub_section: None,
            display_order: order,
        }
    }

    #[test]
    fn test_first_matching_item_by_display_order() {
        let taxonomy = vec![
            item("LATE_ASSET", "Current Assets", 50),
            item("EARLY_ASSET", "Non-Current Assets", 10),
            item("LIAB", "Current Liabilities", 5),
        ];
        let mut cash = entry("Cash", 25000.0, AccountType::Assets);
        cash.confidence = Some(0.92);

        let suggestions = suggest(&[cash], &taxonomy, &PipelineConfig::default());
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].suggested_item_id, "EARLY_ASSET");
        assert_eq!(suggestions[0].confidence, 0.92);
    }

    #[test]
    fn test_liability_section_matches_singular_and_plural() {
        for section in ["Long Term Liability", "Current Liabilities"] {
            let taxonomy = vec![item("LOAN", section, 1)];
            let suggestions = suggest(
                &[entry("Term Loan", -50000.0, AccountType::Liabilities)],
                &taxonomy,
                &PipelineConfig::default(),
            );
            assert_eq!(suggestions[0].suggested_item_id, "LOAN", "{}", section);
            assert_eq!(suggestions[0].confidence, 0.5);
        }
    }

    #[test]
    fn test_empty_taxonomy_is_not_an_error() {
        let suggestions = suggest(
            &[entry("Cash", 1.0, AccountType::Assets)],
            &[],
            &PipelineConfig::default(),
        );
        assert!(suggestions.is_empty());
    }

    #[test]
    fn test_other_entries_use_parent_group() {
        let chart = ChartOfAccounts::schedule_three();
        let mut debtors = entry("ABC Traders", 18000.0, AccountType::Other);
        debtors.account_category = Some("Sundry Debtors".to_string());
        let mut gst = entry("Output GST", -4000.0, AccountType::Other);
        gst.account_category = Some("Duties & Taxes".to_string());
        let unknown = entry("Mystery", 10.0, AccountType::Other);

        let config = PipelineConfig {
            fallback_confidence: 0.6,
            ..PipelineConfig::default()
        };
        let suggestions = suggest(&[debtors, gst, unknown], chart.items(), &config);

        assert_eq!(suggestions.len(), 2);
        assert_eq!(suggestions[0].suggested_item_id, "BS_NCA_PPE");
        assert_eq!(suggestions[0].confidence, 0.6);
        assert!(suggestions[0].reasoning.contains("Sundry Debtors"));
        assert_eq!(suggestions[1].suggested_item_id, "BS_NCL_BORROWINGS");
    }

    #[test]
    fn test_infer_account_type() {
        assert_eq!(infer_account_type("Sales Accounts"), Some(AccountType::Revenue));
        assert_eq!(infer_account_type(" indirect expenses "), Some(AccountType::Expenses));
        assert_eq!(
            infer_account_type("Misc. Expenses (ASSET)"),
            Some(AccountType::Assets)
        );
        assert_eq!(infer_account_type("Trade Payables"), Some(AccountType::Liabilities));
        assert_eq!(infer_account_type("Branch / Divisions"), None);
        assert_eq!(infer_account_type(""), None);
    }

    #[test]
    fn test_one_suggestion_per_ledger_name() {
        let taxonomy = vec![item("CA", "Current Assets", 1)];
        let entries = vec![
            entry("Bank", 100.0, AccountType::Assets),
            entry("Bank", 200.0, AccountType::Assets),
        ];
        assert_eq!(suggest(&entries, &taxonomy, &PipelineConfig::default()).len(), 1);
    }

    fn seeded_store() -> (MemoryStore, i64) {
        let mut store = MemoryStore::new();
        store
            .seed_line_items(ChartOfAccounts::schedule_three().items())
            .unwrap();
        let period = store
            .insert_period(2024, 1, NaiveDate::from_ymd_opt(2023, 6, 30).unwrap(), "Q1")
            .unwrap();
        (store, period.id)
    }

    fn suggestion(ledger: &str, item: &str, confidence: f64) -> Suggestion {
        Suggestion {
            ledger_name: ledger.to_string(),
            suggested_item_id: item.to_string(),
            confidence,
            reasoning: String::new(),
        }
    }

    #[test]
    fn test_bulk_apply_threshold_and_idempotence() {
        let (mut store, period_id) = seeded_store();
        let set = SuggestionSet::new(
            period_id,
            vec![
                suggestion("Cash", "BS_CA_CASH", 0.95),
                suggestion("Sales", "PL_INC_REVENUE", 0.8),
                suggestion("Odd", "BS_CA_OTHER", 0.79),
            ],
        );

        assert_eq!(set.bulk_apply(&mut store, 0.8).unwrap(), 2);
        let first = store.mappings_for_period(period_id).unwrap();

        assert_eq!(set.bulk_apply(&mut store, 0.8).unwrap(), 0);
        assert_eq!(store.mappings_for_period(period_id).unwrap(), first);
    }

    #[test]
    fn test_bulk_apply_rejects_bad_threshold() {
        let (mut store, period_id) = seeded_store();
        let set = SuggestionSet::new(period_id, vec![]);
        assert!(matches!(
            set.bulk_apply(&mut store, 1.5),
            Err(ReportingError::InvalidThreshold(_))
        ));
    }

    #[test]
    fn test_apply_one_replaces_and_reject_is_local() {
        let (mut store, period_id) = seeded_store();
        apply_mapping(&mut store, "Cash", "BS_CA_OTHER", period_id).unwrap();

        let mut set = SuggestionSet::new(
            period_id,
            vec![
                suggestion("Cash", "BS_CA_CASH", 0.4),
                suggestion("Sales", "PL_INC_REVENUE", 0.4),
            ],
        );
        assert!(set.apply_one(&mut store, "Cash").unwrap());
        assert!(!set.apply_one(&mut store, "Cash").unwrap());

        let rejected = set.reject("Sales").unwrap();
        assert_eq!(rejected.suggested_item_id, "PL_INC_REVENUE");
        assert!(set.is_empty());

        let mappings = store.mappings_for_period(period_id).unwrap();
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].master_item_id, "BS_CA_CASH");
    }

    #[test]
    fn test_suggest_for_period_needs_a_period() {
        let store = MemoryStore::new();
        let err = suggest_for_period(&store, None, &PipelineConfig::default()).unwrap_err();
        assert!(err.is_not_ready());
        let err = suggest_for_period(&store, Some(7), &PipelineConfig::default()).unwrap_err();
        assert!(err.is_not_ready());
    }

    #[test]
    fn test_unmapped_and_remove() {
        let (mut store, period_id) = seeded_store();
        store
            .insert_entries(
                period_id,
                &[
                    entry("Cash", 100.0, AccountType::Assets),
                    entry("Sales", -100.0, AccountType::Revenue),
                ],
            )
            .unwrap();
        apply_mapping(&mut store, "Cash", "BS_CA_CASH", period_id).unwrap();

        assert_eq!(unmapped_ledgers(&store, period_id).unwrap(), vec!["Sales"]);
        assert!(remove_mapping(&mut store, "Cash", period_id).unwrap());
        assert!(!remove_mapping(&mut store, "Cash", period_id).unwrap());
        assert_eq!(
            unmapped_ledgers(&store, period_id).unwrap(),
            vec!["Cash", "Sales"]
        );
    }
}
