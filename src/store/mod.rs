//! Persistence seam. Every pipeline stage receives a `FinancialStore` instead of
//! reaching for a shared client, so the same code runs against the in-memory
//! store in tests and SQLite in an application.
//!
//! Reads take `&self` and writes take `&mut self`: concurrent writers against one
//! store have to be serialized by the caller (e.g. behind a `Mutex`), which keeps
//! two "refresh" clicks from interleaving their mapping writes.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::schema::{
    CalculatedRatio, ConflictPolicy, FinancialPeriod, LedgerEntry, LineItem, Mapping,
    RatioDefinition, UserBenchmark,
};
use chrono::NaiveDate;

pub trait FinancialStore {
    fn find_period(&self, year: i32, quarter: u32) -> Result<Option<FinancialPeriod>>;

    fn get_period(&self, period_id: i64) -> Result<Option<FinancialPeriod>>;

    /// All periods ordered by quarter end date.
    fn list_periods(&self) -> Result<Vec<FinancialPeriod>>;

    fn insert_period(
        &mut self,
        year: i32,
        quarter: u32,
        quarter_end_date: NaiveDate,
        period_name: &str,
    ) -> Result<FinancialPeriod>;

    /// Stores entries against `period_id`, overwriting whatever `period_id` they carry.
    fn insert_entries(&mut self, period_id: i64, entries: &[LedgerEntry]) -> Result<usize>;

    /// Creates the period and stores `entries` against it as one unit. If any
    /// entry is rejected the period is not kept either.
    fn insert_period_with_entries(
        &mut self,
        year: i32,
        quarter: u32,
        quarter_end_date: NaiveDate,
        period_name: &str,
        entries: &[LedgerEntry],
    ) -> Result<FinancialPeriod>;

    fn entries_for_period(&self, period_id: i64) -> Result<Vec<LedgerEntry>>;

    /// Taxonomy in display order.
    fn line_items(&self) -> Result<Vec<LineItem>>;

    /// Inserts items whose id is not present yet. Returns the number inserted.
    fn seed_line_items(&mut self, items: &[LineItem]) -> Result<usize>;

    fn mappings_for_period(&self, period_id: i64) -> Result<Vec<Mapping>>;

    /// All-or-nothing: either every mapping is written (subject to `policy`) or
    /// none is. Returns the number of mappings written.
    fn insert_mappings(&mut self, mappings: &[Mapping], policy: ConflictPolicy) -> Result<usize>;

    fn delete_mapping(&mut self, ledger_name: &str, period_id: i64) -> Result<bool>;

    fn ratio_definitions(&self) -> Result<Vec<RatioDefinition>>;

    fn seed_ratio_definitions(&mut self, definitions: &[RatioDefinition]) -> Result<usize>;

    fn user_benchmarks(&self, user_id: &str) -> Result<Vec<UserBenchmark>>;

    /// One row per (user, ratio definition); a second save replaces the first.
    fn upsert_user_benchmark(&mut self, benchmark: &UserBenchmark) -> Result<()>;

    /// Replaces every calculated ratio stored for `period_id`.
    fn replace_calculated_ratios(
        &mut self,
        period_id: i64,
        ratios: &[CalculatedRatio],
    ) -> Result<()>;

    fn calculated_ratios(&self, period_id: i64) -> Result<Vec<CalculatedRatio>>;
}
