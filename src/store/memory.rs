use crate::error::{ReportingError, Result};
use crate::schema::{
    CalculatedRatio, ConflictPolicy, FinancialPeriod, LedgerEntry, LineItem, Mapping,
    RatioDefinition, UserBenchmark,
};
use crate::store::FinancialStore;
use chrono::NaiveDate;
use std::collections::BTreeMap;

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    periods: BTreeMap<i64, FinancialPeriod>,
    next_period_id: i64,
    entries: Vec<LedgerEntry>,
    line_items: BTreeMap<String, LineItem>,
    mappings: BTreeMap<(i64, String), Mapping>,
    ratio_definitions: BTreeMap<i64, RatioDefinition>,
    benchmarks: BTreeMap<(String, i64), UserBenchmark>,
    calculated: BTreeMap<(i64, i64), CalculatedRatio>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            next_period_id: 1,
            ..Default::default()
        }
    }

    fn require_period(&self, period_id: i64) -> Result<()> {
        if self.periods.contains_key(&period_id) {
            Ok(())
        } else {
            Err(ReportingError::PeriodNotFound(period_id))
        }
    }
}

impl FinancialStore for MemoryStore {
    fn find_period(&self, year: i32, quarter: u32) -> Result<Option<FinancialPeriod>> {
        Ok(self
            .periods
            .values()
            .find(|p| p.year == year && p.quarter == quarter)
            .cloned())
    }

    fn get_period(&self, period_id: i64) -> Result<Option<FinancialPeriod>> {
        Ok(self.periods.get(&period_id).cloned())
    }

    fn list_periods(&self) -> Result<Vec<FinancialPeriod>> {
        let mut periods: Vec<FinancialPeriod> = self.periods.values().cloned().collect();
        periods.sort_by_key(|p| p.quarter_end_date);
        Ok(periods)
    }

    fn insert_period(
        &mut self,
        year: i32,
        quarter: u32,
        quarter_end_date: NaiveDate,
        period_name: &str,
    ) -> Result<FinancialPeriod> {
        if self.find_period(year, quarter)?.is_some() {
            return Err(ReportingError::Store(format!(
                "period {} Q{} already exists",
                year, quarter
            )));
        }

        let id = self.next_period_id.max(1);
        self.next_period_id = id + 1;

        let period = FinancialPeriod {
            id,
            year,
            quarter,
            quarter_end_date,
            period_name: period_name.to_string(),
        };
        self.periods.insert(id, period.clone());
        Ok(period)
    }

    fn insert_entries(&mut self, period_id: i64, entries: &[LedgerEntry]) -> Result<usize> {
        self.require_period(period_id)?;
        check_amounts(entries)?;
        self.entries.extend(entries.iter().cloned().map(|mut e| {
            e.period_id = Some(period_id);
            e
        }));
        Ok(entries.len())
    }

    fn insert_period_with_entries(
        &mut self,
        year: i32,
        quarter: u32,
        quarter_end_date: NaiveDate,
        period_name: &str,
        entries: &[LedgerEntry],
    ) -> Result<FinancialPeriod> {
        check_amounts(entries)?;
        let period = self.insert_period(year, quarter, quarter_end_date, period_name)?;
        self.insert_entries(period.id, entries)?;
        Ok(period)
    }

    fn entries_for_period(&self, period_id: i64) -> Result<Vec<LedgerEntry>> {
        Ok(self
            .entries
            .iter()
            .filter(|e| e.period_id == Some(period_id))
            .cloned()
            .collect())
    }

    fn line_items(&self) -> Result<Vec<LineItem>> {
        let mut items: Vec<LineItem> = self.line_items.values().cloned().collect();
        items.sort_by(|a, b| {
            a.display_order
                .cmp(&b.display_order)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(items)
    }

    fn seed_line_items(&mut self, items: &[LineItem]) -> Result<usize> {
        let mut inserted = 0;
        for item in items {
            if !self.line_items.contains_key(&item.id) {
                self.line_items.insert(item.id.clone(), item.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    fn mappings_for_period(&self, period_id: i64) -> Result<Vec<Mapping>> {
        Ok(self
            .mappings
            .values()
            .filter(|m| m.period_id == period_id)
            .cloned()
            .collect())
    }

    fn insert_mappings(&mut self, mappings: &[Mapping], policy: ConflictPolicy) -> Result<usize> {
        // Validate the whole batch before touching the table.
        for mapping in mappings {
            self.require_period(mapping.period_id)?;
            if !self.line_items.contains_key(&mapping.master_item_id) {
                return Err(ReportingError::UnknownLineItem(
                    mapping.master_item_id.clone(),
                ));
            }
            if mapping.tally_ledger_name.trim().is_empty() {
                return Err(ReportingError::Store(
                    "mapping has an empty ledger name".to_string(),
                ));
            }
        }

        let mut written = 0;
        for mapping in mappings {
            let key = (mapping.period_id, mapping.tally_ledger_name.clone());
            match policy {
                ConflictPolicy::Skip if self.mappings.contains_key(&key) => continue,
                _ => {
                    self.mappings.insert(key, mapping.clone());
                    written += 1;
                }
            }
        }
        Ok(written)
    }

    fn delete_mapping(&mut self, ledger_name: &str, period_id: i64) -> Result<bool> {
        Ok(self
            .mappings
            .remove(&(period_id, ledger_name.to_string()))
            .is_some())
    }

    fn ratio_definitions(&self) -> Result<Vec<RatioDefinition>> {
        Ok(self.ratio_definitions.values().cloned().collect())
    }

    fn seed_ratio_definitions(&mut self, definitions: &[RatioDefinition]) -> Result<usize> {
        let mut inserted = 0;
        for definition in definitions {
            if !self.ratio_definitions.contains_key(&definition.id) {
                self.ratio_definitions
                    .insert(definition.id, definition.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    fn user_benchmarks(&self, user_id: &str) -> Result<Vec<UserBenchmark>> {
        Ok(self
            .benchmarks
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect())
    }

    fn upsert_user_benchmark(&mut self, benchmark: &UserBenchmark) -> Result<()> {
        if !self
            .ratio_definitions
            .contains_key(&benchmark.ratio_definition_id)
        {
            return Err(ReportingError::UnknownRatio(benchmark.ratio_definition_id));
        }
        self.benchmarks.insert(
            (benchmark.user_id.clone(), benchmark.ratio_definition_id),
            benchmark.clone(),
        );
        Ok(())
    }

    fn replace_calculated_ratios(
        &mut self,
        period_id: i64,
        ratios: &[CalculatedRatio],
    ) -> Result<()> {
        self.require_period(period_id)?;
        self.calculated.retain(|(_, p), _| *p != period_id);
        for ratio in ratios {
            self.calculated
                .insert((ratio.ratio_definition_id, period_id), ratio.clone());
        }
        Ok(())
    }

    fn calculated_ratios(&self, period_id: i64) -> Result<Vec<CalculatedRatio>> {
        Ok(self
            .calculated
            .values()
            .filter(|r| r.period_id == period_id)
            .cloned()
            .collect())
    }
}

/// Mirrors the NOT NULL amount columns of the SQLite schema.
fn check_amounts(entries: &[LedgerEntry]) -> Result<()> {
    match entries
        .iter()
        .find(|e| ![e.debit, e.credit, e.closing_balance].iter().all(|v| v.is_finite()))
    {
        Some(entry) => Err(ReportingError::Store(format!(
            "ledger '{}' has a non-finite amount",
            entry.ledger_name
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart_of_accounts::ChartOfAccounts;
    use crate::schema::{AccountType, EntrySource};

    fn store_with_period() -> (MemoryStore, i64) {
        let mut store = MemoryStore::new();
        store
            .seed_line_items(ChartOfAccounts::schedule_three().items())
            .unwrap();
        let period = store
            .insert_period(
                2024,
                1,
                NaiveDate::from_ymd_opt(2023, 6, 30).unwrap(),
                "Q1 FY2023-24",
            )
            .unwrap();
        (store, period.id)
    }

    fn mapping(ledger: &str, item: &str, period_id: i64) -> Mapping {
        Mapping {
            tally_ledger_name: ledger.to_string(),
            master_item_id: item.to_string(),
            period_id,
        }
    }

    #[test]
    fn test_skip_policy_keeps_first_mapping() {
        let (mut store, period_id) = store_with_period();
        let written = store
            .insert_mappings(
                &[mapping("Cash", "BS_CA_CASH", period_id)],
                ConflictPolicy::Skip,
            )
            .unwrap();
        assert_eq!(written, 1);

        let written = store
            .insert_mappings(
                &[mapping("Cash", "BS_CA_OTHER", period_id)],
                ConflictPolicy::Skip,
            )
            .unwrap();
        assert_eq!(written, 0);

        let mappings = store.mappings_for_period(period_id).unwrap();
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].master_item_id, "BS_CA_CASH");
    }

    #[test]
    fn test_replace_policy_overwrites() {
        let (mut store, period_id) = store_with_period();
        store
            .insert_mappings(
                &[mapping("Cash", "BS_CA_CASH", period_id)],
                ConflictPolicy::Skip,
            )
            .unwrap();
        store
            .insert_mappings(
                &[mapping("Cash", "BS_CA_OTHER", period_id)],
                ConflictPolicy::Replace,
            )
            .unwrap();

        let mappings = store.mappings_for_period(period_id).unwrap();
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].master_item_id, "BS_CA_OTHER");
    }

    #[test]
    fn test_batch_with_unknown_item_writes_nothing() {
        let (mut store, period_id) = store_with_period();
        let err = store
            .insert_mappings(
                &[
                    mapping("Cash", "BS_CA_CASH", period_id),
                    mapping("Mystery", "NOT_AN_ITEM", period_id),
                ],
                ConflictPolicy::Skip,
            )
            .unwrap_err();

        assert!(matches!(err, ReportingError::UnknownLineItem(_)));
        assert!(store.mappings_for_period(period_id).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_period_rejected() {
        let (mut store, _) = store_with_period();
        let result = store.insert_period(
            2024,
            1,
            NaiveDate::from_ymd_opt(2023, 6, 30).unwrap(),
            "Q1 FY2023-24",
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_entries_require_period() {
        let mut store = MemoryStore::new();
        let err = store.insert_entries(42, &[]).unwrap_err();
        assert!(matches!(err, ReportingError::PeriodNotFound(42)));
    }

    #[test]
    fn test_rejected_entries_leave_no_period() {
        let mut store = MemoryStore::new();
        let entry = LedgerEntry {
            ledger_name: "Cash".to_string(),
            debit: 0.0,
            credit: 0.0,
            closing_balance: f64::NAN,
            account_type: AccountType::Assets,
            account_category: None,
            confidence: None,
            source: EntrySource::Manual,
            period_id: None,
        };

        let result = store.insert_period_with_entries(
            2024,
            1,
            NaiveDate::from_ymd_opt(2023, 6, 30).unwrap(),
            "Q1 FY2023-24",
            &[entry],
        );
        assert!(result.is_err());
        assert!(store.list_periods().unwrap().is_empty());
        assert!(store.find_period(2024, 1).unwrap().is_none());
    }
}
