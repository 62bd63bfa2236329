use crate::error::{ReportingError, Result};
use crate::schema::{
    CalculatedRatio, ConflictPolicy, FinancialPeriod, LedgerEntry, LineItem, Mapping,
    RatioDefinition, UserBenchmark,
};
use crate::store::FinancialStore;
use chrono::{NaiveDate, Utc};
use log::debug;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;",
        )?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::from_connection(conn)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        run_migrations(&mut conn)?;
        Ok(Self { conn })
    }
}

fn run_migrations(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (version TEXT PRIMARY KEY, applied_at TEXT NOT NULL)",
    )?;

    apply_migration(conn, "001_init", include_str!("../../migrations/001_init.sql"))?;
    Ok(())
}

fn apply_migration(conn: &mut Connection, version: &str, sql: &str) -> Result<()> {
    let exists: i64 = conn.query_row(
        "SELECT COUNT(*) FROM schema_migrations WHERE version = ?1",
        params![version],
        |row| row.get(0),
    )?;
    if exists > 0 {
        return Ok(());
    }

    let tx = conn.transaction()?;
    tx.execute_batch(sql)?;
    tx.execute(
        "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
        params![version, Utc::now().to_rfc3339()],
    )?;
    tx.commit()?;
    debug!("Applied migration {}", version);
    Ok(())
}

fn write_period(
    conn: &Connection,
    year: i32,
    quarter: u32,
    quarter_end_date: NaiveDate,
    period_name: &str,
) -> Result<FinancialPeriod> {
    conn.execute(
        "INSERT INTO financial_periods (year, quarter, quarter_end_date, period_name) VALUES (?1, ?2, ?3, ?4)",
        params![
            year,
            quarter,
            quarter_end_date.format(DATE_FORMAT).to_string(),
            period_name
        ],
    )?;

    Ok(FinancialPeriod {
        id: conn.last_insert_rowid(),
        year,
        quarter,
        quarter_end_date,
        period_name: period_name.to_string(),
    })
}

fn write_entries(conn: &Connection, period_id: i64, entries: &[LedgerEntry]) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO ledger_entries (period_id, ledger_name, debit, credit, closing_balance, account_type, account_category, confidence, source)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;
    for entry in entries {
        stmt.execute(params![
            period_id,
            entry.ledger_name,
            entry.debit,
            entry.credit,
            entry.closing_balance,
            to_text(&entry.account_type)?,
            entry.account_category,
            entry.confidence,
            to_text(&entry.source)?,
        ])?;
    }
    Ok(())
}

fn to_text<T: Serialize>(value: &T) -> Result<String> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(text) => Ok(text),
        other => Err(ReportingError::Store(format!(
            "expected a string-encoded enum, got {}",
            other
        ))),
    }
}

fn from_text<T: DeserializeOwned>(text: &str) -> Result<T> {
    Ok(serde_json::from_value(serde_json::Value::String(
        text.to_string(),
    ))?)
}

fn parse_date(text: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(text, DATE_FORMAT)
        .map_err(|e| ReportingError::DateError(format!("'{}': {}", text, e)))
}

type PeriodRow = (i64, i32, u32, String, String);

fn period_from_row(row: PeriodRow) -> Result<FinancialPeriod> {
    let (id, year, quarter, end_date, period_name) = row;
    Ok(FinancialPeriod {
        id,
        year,
        quarter,
        quarter_end_date: parse_date(&end_date)?,
        period_name,
    })
}

const PERIOD_COLUMNS: &str = "id, year, quarter, quarter_end_date, period_name";

fn read_period(row: &rusqlite::Row<'_>) -> rusqlite::Result<PeriodRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

impl FinancialStore for SqliteStore {
    fn find_period(&self, year: i32, quarter: u32) -> Result<Option<FinancialPeriod>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM financial_periods WHERE year = ?1 AND quarter = ?2",
                    PERIOD_COLUMNS
                ),
                params![year, quarter],
                read_period,
            )
            .optional()?;
        row.map(period_from_row).transpose()
    }

    fn get_period(&self, period_id: i64) -> Result<Option<FinancialPeriod>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM financial_periods WHERE id = ?1", PERIOD_COLUMNS),
                params![period_id],
                read_period,
            )
            .optional()?;
        row.map(period_from_row).transpose()
    }

    fn list_periods(&self) -> Result<Vec<FinancialPeriod>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM financial_periods ORDER BY quarter_end_date, id",
            PERIOD_COLUMNS
        ))?;
        let rows = stmt.query_map([], read_period)?;

        let mut periods = Vec::new();
        for row in rows {
            periods.push(period_from_row(row?)?);
        }
        Ok(periods)
    }

    fn insert_period(
        &mut self,
        year: i32,
        quarter: u32,
        quarter_end_date: NaiveDate,
        period_name: &str,
    ) -> Result<FinancialPeriod> {
        write_period(&self.conn, year, quarter, quarter_end_date, period_name)
    }

    fn insert_entries(&mut self, period_id: i64, entries: &[LedgerEntry]) -> Result<usize> {
        if self.get_period(period_id)?.is_none() {
            return Err(ReportingError::PeriodNotFound(period_id));
        }

        let tx = self.conn.transaction()?;
        write_entries(&tx, period_id, entries)?;
        tx.commit()?;
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
        let tx = self.conn.transaction()?;
        let period = write_period(&tx, year, quarter, quarter_end_date, period_name)?;
        write_entries(&tx, period.id, entries)?;
        tx.commit()?;
        debug!(
            "Stored period {} with {} entr(ies)",
            period.period_name,
            entries.len()
        );
        Ok(period)
    }

    fn entries_for_period(&self, period_id: i64) -> Result<Vec<LedgerEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT ledger_name, debit, credit, closing_balance, account_type, account_category, confidence, source
             FROM ledger_entries WHERE period_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![period_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<f64>>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (ledger_name, debit, credit, closing_balance, account_type, category, confidence, source) =
                row?;
            entries.push(LedgerEntry {
                ledger_name,
                debit,
                credit,
                closing_balance,
                account_type: from_text(&account_type)?,
                account_category: category,
                confidence,
                source: from_text(&source)?,
                period_id: Some(period_id),
            });
        }
        Ok(entries)
    }

    fn line_items(&self) -> Result<Vec<LineItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, display_name, report_type, report_section, report_sub_section, display_order
             FROM master_line_items ORDER BY display_order, id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, u32>(5)?,
            ))
        })?;

        let mut items = Vec::new();
        for row in rows {
            let (id, display_name, report_type, report_section, report_sub_section, display_order) =
                row?;
            items.push(LineItem {
                id,
                display_name,
                report_type: from_text(&report_type)?,
                report_section,
                report_sub_section,
                display_order,
            });
        }
        Ok(items)
    }

    fn seed_line_items(&mut self, items: &[LineItem]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO master_line_items (id, display_name, report_type, report_section, report_sub_section, display_order)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for item in items {
                inserted += stmt.execute(params![
                    item.id,
                    item.display_name,
                    to_text(&item.report_type)?,
                    item.report_section,
                    item.report_sub_section,
                    item.display_order,
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn mappings_for_period(&self, period_id: i64) -> Result<Vec<Mapping>> {
        let mut stmt = self.conn.prepare(
            "SELECT tally_ledger_name, master_item_id FROM ledger_mappings WHERE period_id = ?1 ORDER BY tally_ledger_name",
        )?;
        let rows = stmt.query_map(params![period_id], |row| {
            Ok(Mapping {
                tally_ledger_name: row.get(0)?,
                master_item_id: row.get(1)?,
                period_id,
            })
        })?;

        let mut mappings = Vec::new();
        for row in rows {
            mappings.push(row?);
        }
        Ok(mappings)
    }

    fn insert_mappings(&mut self, mappings: &[Mapping], policy: ConflictPolicy) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut written = 0;
        {
            let mut item_exists =
                tx.prepare("SELECT COUNT(*) FROM master_line_items WHERE id = ?1")?;
            let mut period_exists =
                tx.prepare("SELECT COUNT(*) FROM financial_periods WHERE id = ?1")?;
            let mut delete = tx.prepare(
                "DELETE FROM ledger_mappings WHERE tally_ledger_name = ?1 AND period_id = ?2",
            )?;
            let mut insert = tx.prepare(
                "INSERT OR IGNORE INTO ledger_mappings (tally_ledger_name, master_item_id, period_id) VALUES (?1, ?2, ?3)",
            )?;

            for mapping in mappings {
                let items: i64 =
                    item_exists.query_row(params![mapping.master_item_id], |row| row.get(0))?;
                if items == 0 {
                    // Dropping the transaction without commit rolls the batch back.
                    return Err(ReportingError::UnknownLineItem(
                        mapping.master_item_id.clone(),
                    ));
                }
                let periods: i64 =
                    period_exists.query_row(params![mapping.period_id], |row| row.get(0))?;
                if periods == 0 {
                    return Err(ReportingError::PeriodNotFound(mapping.period_id));
                }

                if policy == ConflictPolicy::Replace {
                    delete.execute(params![mapping.tally_ledger_name, mapping.period_id])?;
                }
                written += insert.execute(params![
                    mapping.tally_ledger_name,
                    mapping.master_item_id,
                    mapping.period_id
                ])?;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    fn delete_mapping(&mut self, ledger_name: &str, period_id: i64) -> Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM ledger_mappings WHERE tally_ledger_name = ?1 AND period_id = ?2",
            params![ledger_name, period_id],
        )?;
        Ok(deleted > 0)
    }

    fn ratio_definitions(&self) -> Result<Vec<RatioDefinition>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, ratio_name, ratio_category, formula, formula_description, target_value, benchmark_value, industry_average, direction
             FROM ratio_definitions ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<f64>>(5)?,
                row.get::<_, Option<f64>>(6)?,
                row.get::<_, Option<f64>>(7)?,
                row.get::<_, Option<String>>(8)?,
            ))
        })?;

        let mut definitions = Vec::new();
        for row in rows {
            let (id, ratio_name, category, formula, description, target, benchmark, industry, direction) =
                row?;
            definitions.push(RatioDefinition {
                id,
                ratio_name,
                ratio_category: from_text(&category)?,
                formula: from_text(&formula)?,
                formula_description: description,
                target_value: target,
                benchmark_value: benchmark,
                industry_average: industry,
                direction: direction.as_deref().map(from_text).transpose()?,
            });
        }
        Ok(definitions)
    }

    fn seed_ratio_definitions(&mut self, definitions: &[RatioDefinition]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO ratio_definitions (id, ratio_name, ratio_category, formula, formula_description, target_value, benchmark_value, industry_average, direction)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for definition in definitions {
                let direction = definition.direction.as_ref().map(to_text).transpose()?;
                inserted += stmt.execute(params![
                    definition.id,
                    definition.ratio_name,
                    to_text(&definition.ratio_category)?,
                    to_text(&definition.formula)?,
                    definition.formula_description,
                    definition.target_value,
                    definition.benchmark_value,
                    definition.industry_average,
                    direction,
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn user_benchmarks(&self, user_id: &str) -> Result<Vec<UserBenchmark>> {
        let mut stmt = self.conn.prepare(
            "SELECT ratio_definition_id, custom_target_value, custom_industry_average, benchmark_source, notes, is_active
             FROM user_ratio_benchmarks WHERE user_id = ?1 ORDER BY ratio_definition_id",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Option<f64>>(1)?,
                row.get::<_, Option<f64>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, bool>(5)?,
            ))
        })?;

        let mut benchmarks = Vec::new();
        for row in rows {
            let (ratio_definition_id, target, industry, source, notes, is_active) = row?;
            benchmarks.push(UserBenchmark {
                user_id: user_id.to_string(),
                ratio_definition_id,
                custom_target_value: target,
                custom_industry_average: industry,
                benchmark_source: from_text(&source)?,
                notes,
                is_active,
            });
        }
        Ok(benchmarks)
    }

    fn upsert_user_benchmark(&mut self, benchmark: &UserBenchmark) -> Result<()> {
        let known: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM ratio_definitions WHERE id = ?1",
            params![benchmark.ratio_definition_id],
            |row| row.get(0),
        )?;
        if known == 0 {
            return Err(ReportingError::UnknownRatio(benchmark.ratio_definition_id));
        }

        self.conn.execute(
            "INSERT INTO user_ratio_benchmarks (user_id, ratio_definition_id, custom_target_value, custom_industry_average, benchmark_source, notes, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(user_id, ratio_definition_id) DO UPDATE SET
               custom_target_value = excluded.custom_target_value,
               custom_industry_average = excluded.custom_industry_average,
               benchmark_source = excluded.benchmark_source,
               notes = excluded.notes,
               is_active = excluded.is_active",
            params![
                benchmark.user_id,
                benchmark.ratio_definition_id,
                benchmark.custom_target_value,
                benchmark.custom_industry_average,
                to_text(&benchmark.benchmark_source)?,
                benchmark.notes,
                benchmark.is_active,
            ],
        )?;
        Ok(())
    }

    fn replace_calculated_ratios(
        &mut self,
        period_id: i64,
        ratios: &[CalculatedRatio],
    ) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM calculated_ratios WHERE period_id = ?1",
            params![period_id],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO calculated_ratios (ratio_definition_id, period_id, calculated_value, calculation_date) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for ratio in ratios {
                stmt.execute(params![
                    ratio.ratio_definition_id,
                    period_id,
                    ratio.calculated_value,
                    ratio.calculation_date.format(DATE_FORMAT).to_string(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn calculated_ratios(&self, period_id: i64) -> Result<Vec<CalculatedRatio>> {
        let mut stmt = self.conn.prepare(
            "SELECT ratio_definition_id, calculated_value, calculation_date FROM calculated_ratios WHERE period_id = ?1 ORDER BY ratio_definition_id",
        )?;
        let rows = stmt.query_map(params![period_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut ratios = Vec::new();
        for row in rows {
            let (ratio_definition_id, calculated_value, date) = row?;
            ratios.push(CalculatedRatio {
                ratio_definition_id,
                period_id,
                calculated_value,
                calculation_date: parse_date(&date)?,
            });
        }
        Ok(ratios)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart_of_accounts::ChartOfAccounts;
    use crate::schema::{AccountType, EntrySource};

    fn seeded() -> (SqliteStore, i64) {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store
            .seed_line_items(ChartOfAccounts::schedule_three().items())
            .unwrap();
        let period = store
            .insert_period(
                2024,
                2,
                NaiveDate::from_ymd_opt(2023, 9, 30).unwrap(),
                "Q2 FY2023-24",
            )
            .unwrap();
        (store, period.id)
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        run_migrations(&mut store.conn).unwrap();
        let applied: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(applied, 1);
    }

    #[test]
    fn test_period_round_trip() {
        let (store, period_id) = seeded();
        let period = store.find_period(2024, 2).unwrap().unwrap();
        assert_eq!(period.id, period_id);
        assert_eq!(
            period.quarter_end_date,
            NaiveDate::from_ymd_opt(2023, 9, 30).unwrap()
        );
        assert!(store.find_period(2024, 3).unwrap().is_none());
    }

    #[test]
    fn test_entries_keep_their_classification() {
        let (mut store, period_id) = seeded();
        let entry = LedgerEntry {
            ledger_name: "Sundry Debtors".to_string(),
            debit: 5000.0,
            credit: 0.0,
            closing_balance: 5000.0,
            account_type: AccountType::Assets,
            account_category: Some("Current Assets".to_string()),
            confidence: Some(0.92),
            source: EntrySource::AiExtraction,
            period_id: None,
        };
        store.insert_entries(period_id, &[entry]).unwrap();

        let stored = store.entries_for_period(period_id).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].account_type, AccountType::Assets);
        assert_eq!(stored[0].source, EntrySource::AiExtraction);
        assert_eq!(stored[0].period_id, Some(period_id));
    }

    #[test]
    fn test_failed_mapping_batch_rolls_back() {
        let (mut store, period_id) = seeded();
        let batch = vec![
            Mapping {
                tally_ledger_name: "Cash".to_string(),
                master_item_id: "BS_CA_CASH".to_string(),
                period_id,
            },
            Mapping {
                tally_ledger_name: "Unknown".to_string(),
                master_item_id: "NOPE".to_string(),
                period_id,
            },
        ];

        let err = store
            .insert_mappings(&batch, ConflictPolicy::Skip)
            .unwrap_err();
        assert!(matches!(err, ReportingError::UnknownLineItem(_)));
        assert!(store.mappings_for_period(period_id).unwrap().is_empty());
    }

    #[test]
    fn test_skip_and_replace_policies() {
        let (mut store, period_id) = seeded();
        let first = Mapping {
            tally_ledger_name: "Cash".to_string(),
            master_item_id: "BS_CA_CASH".to_string(),
            period_id,
        };
        let second = Mapping {
            master_item_id: "BS_CA_OTHER".to_string(),
            ..first.clone()
        };

        assert_eq!(store.insert_mappings(&[first.clone()], ConflictPolicy::Skip).unwrap(), 1);
        assert_eq!(store.insert_mappings(&[second.clone()], ConflictPolicy::Skip).unwrap(), 0);
        assert_eq!(store.mappings_for_period(period_id).unwrap(), vec![first]);

        assert_eq!(store.insert_mappings(&[second.clone()], ConflictPolicy::Replace).unwrap(), 1);
        assert_eq!(store.mappings_for_period(period_id).unwrap(), vec![second]);

        assert!(store.delete_mapping("Cash", period_id).unwrap());
        assert!(!store.delete_mapping("Cash", period_id).unwrap());
    }

    #[test]
    fn test_failed_entry_insert_rolls_back_new_period() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let good = LedgerEntry {
            ledger_name: "Cash".to_string(),
            debit: 100.0,
            credit: 0.0,
            closing_balance: 100.0,
            account_type: AccountType::Assets,
            account_category: None,
            confidence: None,
            source: EntrySource::Csv,
            period_id: None,
        };
        // NaN binds as NULL and trips the NOT NULL column.
        let bad = LedgerEntry {
            ledger_name: "Broken".to_string(),
            closing_balance: f64::NAN,
            ..good.clone()
        };

        let result = store.insert_period_with_entries(
            2024,
            1,
            NaiveDate::from_ymd_opt(2023, 6, 30).unwrap(),
            "Q1 FY2023-24",
            &[good.clone(), bad],
        );
        assert!(result.is_err());
        assert!(store.list_periods().unwrap().is_empty());

        let period = store
            .insert_period_with_entries(
                2024,
                1,
                NaiveDate::from_ymd_opt(2023, 6, 30).unwrap(),
                "Q1 FY2023-24",
                &[good],
            )
            .unwrap();
        assert_eq!(store.entries_for_period(period.id).unwrap().len(), 1);
    }
}
