use crate::config::{PipelineConfig, SignConvention};
use crate::error::{ReportingError, Result};
use crate::periods::store_period_entries;
use crate::schema::{
    AccountType, ClassifierOutput, EntrySource, ExtractedLedgerRow, FinancialPeriod, LedgerEntry,
};
use crate::store::FinancialStore;
use crate::utils::{parse_amount, period_for_date};
use chrono::NaiveDate;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::io::Read;

#[derive(Debug, Clone, PartialEq)]
pub enum RawAmount {
    Text(String),
    Value(f64),
}

impl RawAmount {
    pub fn parse(&self) -> Option<f64> {
        match self {
            RawAmount::Text(text) => parse_amount(text),
            RawAmount::Value(value) => Some(*value).filter(|v| v.is_finite()),
        }
    }
}

/// A ledger row as it arrived, before any validation.
#[derive(Debug, Clone)]
pub struct RawLedgerRow {
    /// 1-based position in the source (CSV line number, or extraction order).
    pub row_index: usize,
    pub ledger_name: String,
    pub closing_balance: RawAmount,
    pub debit: Option<RawAmount>,
    pub credit: Option<RawAmount>,
    pub account_type: Option<AccountType>,
    pub account_category: Option<String>,
    pub confidence: Option<f64>,
    pub source: EntrySource,
    /// How the source signs `closing_balance`; `None` defers to the pipeline config.
    pub sign_convention: Option<SignConvention>,
    /// The original line, echoed back verbatim when the row is rejected.
    pub line: String,
}

impl RawLedgerRow {
    pub fn new(row_index: usize, ledger_name: &str, closing_balance: &str) -> Self {
        Self {
            row_index,
            ledger_name: ledger_name.to_string(),
            closing_balance: RawAmount::Text(closing_balance.to_string()),
            debit: None,
            credit: None,
            account_type: None,
            account_category: None,
            confidence: None,
            source: EntrySource::Manual,
            sign_convention: None,
            line: format!("{},{}", ledger_name, closing_balance),
        }
    }

    pub fn from_extracted(row_index: usize, row: &ExtractedLedgerRow) -> Self {
        Self {
            row_index,
            ledger_name: row.ledger_name.clone(),
            closing_balance: RawAmount::Value(row.closing_balance),
            debit: row.debit.map(RawAmount::Value),
            credit: row.credit.map(RawAmount::Value),
            account_type: Some(row.account_type),
            account_category: row.account_category.clone(),
            confidence: Some(row.confidence),
            source: EntrySource::AiExtraction,
            // The classifier is instructed to emit debit-positive balances.
            sign_convention: Some(SignConvention::DebitPositive),
            line: serde_json::to_string(row).unwrap_or_else(|_| row.ledger_name.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowError {
    pub row_index: usize,
    pub line: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    pub entries: Vec<LedgerEntry>,
    pub errors: Vec<RowError>,
}

#[derive(Debug, Clone)]
pub struct IngestionReport {
    /// `None` when nothing was accepted and the quarter had never been uploaded.
    pub period: Option<FinancialPeriod>,
    pub accepted: usize,
    pub errors: Vec<RowError>,
}

impl IngestionReport {
    pub fn rejected(&self) -> usize {
        self.errors.len()
    }

    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{} row(s) imported, {} rejected",
            self.accepted,
            self.rejected()
        );
        for error in &self.errors {
            summary.push_str(&format!(
                "\n  - row {}: {} ({})",
                error.row_index, error.message, error.line
            ));
        }
        summary
    }
}

/// Turns one raw row into a canonical debit-positive entry.
pub fn normalize_row(
    row: &RawLedgerRow,
    config: &PipelineConfig,
) -> std::result::Result<LedgerEntry, String> {
    let ledger_name = row.ledger_name.trim();
    if ledger_name.is_empty() {
        return Err("ledger_name is empty".to_string());
    }

    let closing_balance = match row.closing_balance.parse() {
        Some(value) => row
            .sign_convention
            .unwrap_or(config.sign_convention)
            .normalize(value),
        None => {
            return Err(format!(
                "closing_balance '{}' is not a number",
                describe(&row.closing_balance)
            ))
        }
    };

    let (debit, credit) = match (&row.debit, &row.credit) {
        (None, None) => (closing_balance.max(0.0), (-closing_balance).max(0.0)),
        (debit, credit) => {
            let debit = parse_side(debit.as_ref(), "debit")?;
            let credit = parse_side(credit.as_ref(), "credit")?;
            let difference = (debit - credit - closing_balance).abs();
            if difference > config.balance_tolerance {
                return Err(format!(
                    "closing_balance {} does not equal debit {} minus credit {}",
                    closing_balance, debit, credit
                ));
            }
            (debit, credit)
        }
    };

    if let Some(confidence) = row.confidence {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(format!("confidence {} is outside 0.0-1.0", confidence));
        }
    }

    let account_category = row
        .account_category
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string);

    Ok(LedgerEntry {
        ledger_name: ledger_name.to_string(),
        debit,
        credit,
        closing_balance,
        account_type: row.account_type.unwrap_or(AccountType::Other),
        account_category,
        confidence: row.confidence,
        source: row.source,
        period_id: None,
    })
}

fn parse_side(amount: Option<&RawAmount>, side: &str) -> std::result::Result<f64, String> {
    match amount {
        None => Ok(0.0),
        Some(raw) => match raw.parse() {
            Some(value) if value >= 0.0 => Ok(value),
            Some(value) => Err(format!("{} {} must not be negative", side, value)),
            None => Err(format!("{} '{}' is not a number", side, describe(raw))),
        },
    }
}

fn describe(amount: &RawAmount) -> String {
    match amount {
        RawAmount::Text(text) => text.clone(),
        RawAmount::Value(value) => value.to_string(),
    }
}

/// Normalizes a batch. Bad rows are collected, never fatal; duplicates are kept.
pub fn normalize_batch(rows: &[RawLedgerRow], config: &PipelineConfig) -> NormalizedBatch {
    let mut batch = NormalizedBatch::default();

    for row in rows {
        match normalize_row(row, config) {
            Ok(entry) => batch.entries.push(entry),
            Err(message) => {
                debug!("Rejected row {}: {}", row.row_index, message);
                batch.errors.push(RowError {
                    row_index: row.row_index,
                    line: row.line.clone(),
                    message,
                });
            }
        }
    }

    batch
}

const REQUIRED_COLUMNS: [&str; 2] = ["ledger_name", "closing_balance"];

/// Parses a trial-balance CSV (`ledger_name,closing_balance[,parent_group]`,
/// optionally with `debit`/`credit`). A bad header fails the whole file; a bad
/// record only fails its own row.
pub fn parse_trial_balance_csv<R: Read>(
    mut reader: R,
) -> Result<(Vec<RawLedgerRow>, Vec<RowError>)> {
    let mut input = Vec::new();
    reader.read_to_end(&mut input)?;

    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input.as_slice());

    let headers: Vec<String> = csv_reader
        .byte_headers()?
        .iter()
        .map(|h| String::from_utf8_lossy(h).trim().to_lowercase())
        .collect();
    let column = |name: &str| headers.iter().position(|h| h == name);

    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|name| column(name).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(ReportingError::InvalidCsvHeader(format!(
            "missing column(s) {}; found [{}]",
            missing.join(", "),
            headers.join(", ")
        )));
    }

    let name_idx = column("ledger_name").unwrap_or_default();
    let balance_idx = column("closing_balance").unwrap_or_default();
    let group_idx = column("parent_group");
    let debit_idx = column("debit");
    let credit_idx = column("credit");

    let records: Vec<(Option<csv::Position>, csv::Result<csv::ByteRecord>)> = csv_reader
        .byte_records()
        .map(|result| {
            let position = match &result {
                Ok(record) => record.position().cloned(),
                Err(e) => e.position().cloned(),
            };
            (position, result)
        })
        .collect();

    // A record's source text runs from its first byte to the next record's,
    // minus line terminators.
    let starts: Vec<Option<usize>> = records
        .iter()
        .map(|(position, _)| position.as_ref().map(|p| p.byte() as usize))
        .collect();
    let source_line = |idx: usize| -> String {
        let Some(start) = starts[idx] else {
            return String::new();
        };
        let end = starts[idx + 1..]
            .iter()
            .flatten()
            .next()
            .copied()
            .unwrap_or(input.len());
        let raw = input.get(start..end).unwrap_or_default();
        String::from_utf8_lossy(raw)
            .trim_matches(['\r', '\n'])
            .to_string()
    };

    let mut rows = Vec::new();
    let mut errors = Vec::new();

    for (idx, (position, result)) in records.into_iter().enumerate() {
        let row_index = position
            .as_ref()
            .map(|p| p.line() as usize)
            .unwrap_or(idx + 2);
        let line = source_line(idx);

        let parsed = result
            .map_err(|e| format!("unreadable record: {}", e))
            .and_then(|bytes| {
                csv::StringRecord::from_byte_record(bytes)
                    .map_err(|e| format!("record is not valid UTF-8: {}", e))
            });
        let record = match parsed {
            Ok(record) => record,
            Err(message) => {
                errors.push(RowError {
                    row_index,
                    line,
                    message,
                });
                continue;
            }
        };

        let field = |i: usize| record.get(i).unwrap_or_default().to_string();
        let optional = |i: Option<usize>| {
            i.and_then(|i| record.get(i))
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        rows.push(RawLedgerRow {
            row_index,
            ledger_name: field(name_idx),
            closing_balance: RawAmount::Text(field(balance_idx)),
            debit: optional(debit_idx).map(RawAmount::Text),
            credit: optional(credit_idx).map(RawAmount::Text),
            account_type: None,
            account_category: optional(group_idx),
            confidence: None,
            source: EntrySource::Csv,
            sign_convention: None,
            line,
        });
    }

    debug!(
        "Parsed {} CSV record(s), {} unreadable",
        rows.len(),
        errors.len()
    );
    Ok((rows, errors))
}

/// Normalizes `rows` and persists the accepted entries against the quarter,
/// creating the period on first upload.
pub fn ingest_rows<S: FinancialStore>(
    store: &mut S,
    year: i32,
    quarter: u32,
    rows: &[RawLedgerRow],
    config: &PipelineConfig,
) -> Result<IngestionReport> {
    let batch = normalize_batch(rows, config);

    let period = if batch.entries.is_empty() {
        store.find_period(year, quarter)?
    } else {
        Some(store_period_entries(
            store,
            year,
            quarter,
            config.fiscal_year_end_month,
            &batch.entries,
        )?)
    };

    if !batch.errors.is_empty() {
        warn!(
            "{} of {} row(s) rejected during ingestion",
            batch.errors.len(),
            rows.len()
        );
    }
    info!(
        "Ingested {} ledger entr(ies) for {} Q{}",
        batch.entries.len(),
        year,
        quarter
    );

    Ok(IngestionReport {
        period,
        accepted: batch.entries.len(),
        errors: batch.errors,
    })
}

pub fn ingest_csv<S: FinancialStore, R: Read>(
    store: &mut S,
    year: i32,
    quarter: u32,
    reader: R,
    config: &PipelineConfig,
) -> Result<IngestionReport> {
    let (rows, parse_errors) = parse_trial_balance_csv(reader)?;
    let mut report = ingest_rows(store, year, quarter, &rows, config)?;

    let mut errors = parse_errors;
    errors.append(&mut report.errors);
    errors.sort_by_key(|e| e.row_index);
    report.errors = errors;
    Ok(report)
}

/// Ingests classifier output. The period comes from the detected period date
/// when there is one, otherwise from `hint_date`.
pub fn ingest_classifier_output<S: FinancialStore>(
    store: &mut S,
    output: &ClassifierOutput,
    hint_date: Option<NaiveDate>,
    config: &PipelineConfig,
) -> Result<IngestionReport> {
    let date = output
        .period_info
        .period_date
        .or(hint_date)
        .ok_or_else(|| {
            ReportingError::NoPeriod(format!(
                "could not determine a period from '{}' and no hint date was given",
                output.period_info.detected_period
            ))
        })?;

    let rows: Vec<RawLedgerRow> = output
        .entries
        .iter()
        .enumerate()
        .map(|(idx, row)| RawLedgerRow::from_extracted(idx + 1, row))
        .collect();

    for note in &output.metadata.parsing_notes {
        debug!("Extraction note: {}", note);
    }

    let (year, quarter) = period_for_date(date, config.fiscal_year_end_month)?;
    ingest_rows(store, year, quarter, &rows, config)
}
