use crate::error::{ReportingError, Result};
use crate::schema::{FinancialPeriod, LedgerEntry};
use crate::store::FinancialStore;
use crate::utils::{period_for_date, period_name, quarter_end_date};
use chrono::NaiveDate;
use log::info;

/// Finds the period for a fiscal quarter, creating it on first upload.
pub fn resolve_or_create_period<S: FinancialStore>(
    store: &mut S,
    year: i32,
    quarter: u32,
    fiscal_year_end_month: u32,
) -> Result<FinancialPeriod> {
    let end_date = quarter_end_date(year, quarter, fiscal_year_end_month)?;

    if let Some(existing) = store.find_period(year, quarter)? {
        return Ok(existing);
    }

    let name = period_name(year, quarter, fiscal_year_end_month);
    let period = store.insert_period(year, quarter, end_date, &name)?;
    info!("Created financial period {} (id {})", period.period_name, period.id);
    Ok(period)
}

/// Stores `entries` under a fiscal quarter. A period created here is only kept
/// if its entries are written too.
pub fn store_period_entries<S: FinancialStore>(
    store: &mut S,
    year: i32,
    quarter: u32,
    fiscal_year_end_month: u32,
    entries: &[LedgerEntry],
) -> Result<FinancialPeriod> {
    let end_date = quarter_end_date(year, quarter, fiscal_year_end_month)?;

    if let Some(existing) = store.find_period(year, quarter)? {
        store.insert_entries(existing.id, entries)?;
        return Ok(existing);
    }

    let name = period_name(year, quarter, fiscal_year_end_month);
    let period = store.insert_period_with_entries(year, quarter, end_date, &name, entries)?;
    info!(
        "Created financial period {} (id {}) with {} entr(ies)",
        period.period_name,
        period.id,
        entries.len()
    );
    Ok(period)
}

pub fn resolve_period_for_date<S: FinancialStore>(
    store: &mut S,
    date: NaiveDate,
    fiscal_year_end_month: u32,
) -> Result<FinancialPeriod> {
    let (year, quarter) = period_for_date(date, fiscal_year_end_month)?;
    resolve_or_create_period(store, year, quarter, fiscal_year_end_month)
}

pub fn require_period<S: FinancialStore>(store: &S, period_id: i64) -> Result<FinancialPeriod> {
    store
        .get_period(period_id)?
        .ok_or(ReportingError::PeriodNotFound(period_id))
}

/// The stored period that ends most recently before `period_id`, used as the
/// default comparison period.
pub fn previous_period<S: FinancialStore>(
    store: &S,
    period_id: i64,
) -> Result<Option<FinancialPeriod>> {
    let current = require_period(store, period_id)?;
    Ok(store
        .list_periods()?
        .into_iter()
        .filter(|p| p.quarter_end_date < current.quarter_end_date)
        .max_by_key(|p| p.quarter_end_date))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AccountType, EntrySource};
    use crate::store::MemoryStore;

    fn entry(name: &str, closing_balance: f64) -> LedgerEntry {
        LedgerEntry {
            ledger_name: name.to_string(),
            debit: closing_balance.max(0.0),
            credit: (-closing_balance).max(0.0),
            closing_balance,
            account_type: AccountType::Other,
            account_category: None,
            confidence: None,
            source: EntrySource::Manual,
            period_id: None,
        }
    }

    #[test]
    fn test_period_created_once() {
        let mut store = MemoryStore::new();
        let first = resolve_or_create_period(&mut store, 2024, 1, 3).unwrap();
        let second = resolve_or_create_period(&mut store, 2024, 1, 3).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.period_name, "Q1 FY2023-24");
        assert_eq!(
            first.quarter_end_date,
            NaiveDate::from_ymd_opt(2023, 6, 30).unwrap()
        );
        assert_eq!(store.list_periods().unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_quarter_creates_nothing() {
        let mut store = MemoryStore::new();
        assert!(resolve_or_create_period(&mut store, 2024, 0, 3).is_err());
        assert!(store.list_periods().unwrap().is_empty());
    }

    #[test]
    fn test_resolve_from_date() {
        let mut store = MemoryStore::new();
        let period = resolve_period_for_date(
            &mut store,
            NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
            3,
        )
        .unwrap();
        assert_eq!((period.year, period.quarter), (2025, 3));
    }

    #[test]
    fn test_previous_period() {
        let mut store = MemoryStore::new();
        let q2 = resolve_or_create_period(&mut store, 2024, 2, 3).unwrap();
        let q1 = resolve_or_create_period(&mut store, 2024, 1, 3).unwrap();
        let q4_prior = resolve_or_create_period(&mut store, 2023, 4, 3).unwrap();

        assert_eq!(previous_period(&store, q2.id).unwrap().unwrap().id, q1.id);
        assert_eq!(previous_period(&store, q1.id).unwrap().unwrap().id, q4_prior.id);
        assert!(previous_period(&store, q4_prior.id).unwrap().is_none());
        assert!(matches!(
            previous_period(&store, 99),
            Err(ReportingError::PeriodNotFound(99))
        ));
    }

    #[test]
    fn test_store_period_entries_reuses_period() {
        let mut store = MemoryStore::new();
        let first = store_period_entries(&mut store, 2024, 1, 3, &[entry("Cash", 100.0)]).unwrap();
        let second =
            store_period_entries(&mut store, 2024, 1, 3, &[entry("Capital", -100.0)]).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(store.entries_for_period(first.id).unwrap().len(), 2);
    }

    #[test]
    fn test_store_period_entries_keeps_no_period_on_failure() {
        let mut store = MemoryStore::new();
        let result = store_period_entries(&mut store, 2024, 1, 3, &[entry("Cash", f64::NAN)]);

        assert!(result.is_err());
        assert!(store.list_periods().unwrap().is_empty());
    }
}
