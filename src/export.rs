//! CSV and markdown renderings. Amounts in CSV are plain decimals; the
//! `_inr` columns and the markdown tables carry Indian-grouped display strings.

use crate::chart_of_accounts::ChartOfAccounts;
use crate::error::{ReportingError, Result};
use crate::schema::{LineItemTotal, RatioResult};
use crate::statements::{BalanceSheet, CashFlowStatement, ProfitAndLoss, StatementSection};
use crate::utils::format_inr;
use csv::{QuoteStyle, WriterBuilder};
use std::io::Write;

fn quoted_writer<W: Write>(writer: W) -> csv::Writer<W> {
    WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .from_writer(writer)
}

fn optional(value: Option<f64>) -> String {
    value.map(|v| format!("{:.2}", v)).unwrap_or_default()
}

pub fn write_line_items_csv<W: Write>(writer: W, totals: &[LineItemTotal]) -> Result<()> {
    let mut csv = quoted_writer(writer);
    csv.write_record([
        "item_code",
        "item_name",
        "category",
        "report_type",
        "current_amount",
        "previous_amount",
        "variance",
        "variance_percentage",
        "current_amount_inr",
    ])?;

    for total in totals {
        csv.write_record([
            total.item_code.clone(),
            total.item_name.clone(),
            total.category.clone(),
            total.report_type.to_string(),
            format!("{:.2}", total.current_amount),
            format!("{:.2}", total.previous_amount),
            format!("{:.2}", total.variance),
            format!("{:.2}", total.variance_percentage),
            format_inr(total.current_amount),
        ])?;
    }

    csv.flush()?;
    Ok(())
}

pub fn write_ratios_csv<W: Write>(writer: W, results: &[RatioResult]) -> Result<()> {
    let mut csv = quoted_writer(writer);
    csv.write_record([
        "ratio_name",
        "ratio_category",
        "calculated_value",
        "target_value",
        "benchmark_value",
        "industry_average",
        "performance_status",
        "trend_direction",
    ])?;

    for result in results {
        csv.write_record([
            result.ratio_name.clone(),
            label(&result.ratio_category)?,
            format!("{:.2}", result.calculated_value),
            optional(result.target_value),
            optional(result.benchmark_value),
            optional(result.industry_average),
            label(&result.performance_status)?,
            label(&result.trend_direction)?,
        ])?;
    }

    csv.flush()?;
    Ok(())
}

/// The serde name of a unit enum variant, e.g. `"excellent"`.
fn label<T: serde::Serialize>(value: &T) -> Result<String> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s),
        other => Ok(other.to_string()),
    }
}

fn into_string(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes)
        .map_err(|e| ReportingError::IoError(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}

/// The taxonomy itself, one row per line item in display order.
pub fn write_chart_csv<W: Write>(writer: W, chart: &ChartOfAccounts) -> Result<()> {
    let mut csv = quoted_writer(writer);
    csv.write_record([
        "item_id",
        "display_name",
        "report_type",
        "report_section",
        "report_sub_section",
        "display_order",
    ])?;
    for item in chart.items() {
        csv.write_record([
            item.id.clone(),
            item.display_name.clone(),
            item.report_type.to_string(),
            item.report_section.clone(),
            item.report_sub_section.clone().unwrap_or_default(),
            item.display_order.to_string(),
        ])?;
    }
    csv.flush()?;
    Ok(())
}

pub fn chart_to_csv(chart: &ChartOfAccounts) -> Result<String> {
    let mut buffer = Vec::new();
    write_chart_csv(&mut buffer, chart)?;
    into_string(buffer)
}

pub fn line_items_to_csv(totals: &[LineItemTotal]) -> Result<String> {
    let mut buffer = Vec::new();
    write_line_items_csv(&mut buffer, totals)?;
    into_string(buffer)
}

pub fn ratios_to_csv(results: &[RatioResult]) -> Result<String> {
    let mut buffer = Vec::new();
    write_ratios_csv(&mut buffer, results)?;
    into_string(buffer)
}

fn push_sections(output: &mut String, sections: &[StatementSection]) {
    for section in sections {
        output.push_str(&format!("### {}\n\n", section.name));
        output.push_str("| Line item | Current | Previous |\n|---|---:|---:|\n");
        for line in &section.lines {
            output.push_str(&format!(
                "| {} | {} | {} |\n",
                line.item_name,
                format_inr(line.amount),
                format_inr(line.previous_amount)
            ));
        }
        output.push_str(&format!(
            "| **Total {}** | **{}** | **{}** |\n\n",
            section.name,
            format_inr(section.total),
            format_inr(section.previous_total)
        ));
    }
}

pub fn balance_sheet_markdown(sheet: &BalanceSheet) -> String {
    let mut output = format!("## Balance Sheet - {}\n\n", sheet.period_name);
    push_sections(&mut output, &sheet.sections);

    output.push_str(&format!(
        "- Profit for the period (not yet closed to reserves): {}\n",
        format_inr(sheet.profit_for_period)
    ));
    output.push_str(&format!("- Total assets: {}\n", format_inr(sheet.total_assets)));
    output.push_str(&format!(
        "- Total equity and liabilities: {}\n",
        format_inr(sheet.total_equity_and_liabilities)
    ));
    if sheet.difference() != 0.0 {
        output.push_str(&format!("- Difference: {}\n", format_inr(sheet.difference())));
    }
    output
}

pub fn profit_and_loss_markdown(statement: &ProfitAndLoss) -> String {
    let mut output = format!("## Statement of Profit and Loss - {}\n\n", statement.period_name);
    push_sections(&mut output, &statement.sections);

    output.push_str(&format!("- Total income: {}\n", format_inr(statement.total_income)));
    output.push_str(&format!(
        "- Total expenses: {}\n",
        format_inr(statement.total_expenses)
    ));
    output.push_str(&format!("- Gross profit: {}\n", format_inr(statement.gross_profit)));
    output.push_str(&format!("- Net profit: {}\n", format_inr(statement.net_profit)));
    output
}

pub fn cash_flow_markdown(flow: &CashFlowStatement) -> String {
    let rows = [
        ("Net profit", flow.net_profit),
        ("Add: depreciation", flow.depreciation),
        ("Less: increase in working capital", -flow.working_capital_change),
        ("Cash from operating activities", flow.operating),
        ("Cash from investing activities", flow.investing),
        ("Cash from financing activities", flow.financing),
        ("Net change in cash", flow.net_change),
        ("Unexplained difference", flow.unexplained),
    ];

    let mut output = String::from("## Cash Flow Statement (indirect, simplified)\n\n");
    output.push_str("| | Amount |\n|---|---:|\n");
    for (label, amount) in rows {
        output.push_str(&format!("| {} | {} |\n", label, format_inr(amount)));
    }
    output
}

pub fn ratio_dashboard_markdown(results: &[RatioResult], health_score: Option<u8>) -> String {
    let mut output = String::from("## Ratio Analysis\n\n");

    match health_score {
        Some(score) => output.push_str(&format!("Health score: **{}/100**\n\n", score)),
        None => {
            output.push_str("No ratios available. Complete the ledger mapping for this period first.\n");
            return output;
        }
    }

    output.push_str("| Ratio | Value | Target | Status | Trend |\n|---|---:|---:|---|---|\n");
    for result in results {
        output.push_str(&format!(
            "| {} | {:.2} | {} | {:?} | {:?} |\n",
            result.ratio_name,
            result.calculated_value,
            result
                .target_value
                .map(|t| format!("{:.2}", t))
                .unwrap_or_else(|| "-".to_string()),
            result.performance_status,
            result.trend_direction
        ));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{PerformanceStatus, RatioCategory, ReportType, TrendDirection};

    #[test]
    fn test_chart_csv_quotes_every_field() {
        let csv = chart_to_csv(&ChartOfAccounts::schedule_three()).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "\"item_id\",\"display_name\",\"report_type\",\"report_section\",\"report_sub_section\",\"display_order\""
        );
        assert!(csv.contains(
            "\"BS_NCA_PPE\",\"Property, Plant and Equipment\",\"Balance Sheet\",\"Non-Current Assets\",\"\","
        ));
        assert_eq!(csv.lines().count(), 28);
    }

    fn total() -> LineItemTotal {
        LineItemTotal {
            item_code: "PL_INC_REVENUE".to_string(),
            item_name: "Revenue, \"Domestic\"".to_string(),
            category: "Income".to_string(),
            report_type: ReportType::ProfitLoss,
            current_amount: -1_234_567.891,
            previous_amount: 0.0,
            variance: -1_234_567.891,
            variance_percentage: 0.0,
        }
    }

    fn ratio() -> RatioResult {
        RatioResult {
            ratio_name: "Current Ratio".to_string(),
            ratio_category: RatioCategory::Liquidity,
            calculated_value: 2.2,
            target_value: Some(2.0),
            benchmark_value: Some(1.5),
            industry_average: None,
            performance_status: PerformanceStatus::Excellent,
            trend_direction: TrendDirection::Up,
        }
    }

    #[test]
    fn test_line_items_csv_is_fully_quoted() {
        let csv = line_items_to_csv(&[total()]).unwrap();
        let mut lines = csv.lines();

        assert!(lines.next().unwrap().starts_with("\"item_code\",\"item_name\""));
        assert_eq!(
            lines.next().unwrap(),
            "\"PL_INC_REVENUE\",\"Revenue, \"\"Domestic\"\"\",\"Income\",\"Profit & Loss\",\
             \"-1234567.89\",\"0.00\",\"-1234567.89\",\"0.00\",\"-₹12,34,567.89\""
        );
    }

    #[test]
    fn test_ratios_csv_uses_serde_labels() {
        let csv = ratios_to_csv(&[ratio()]).unwrap();
        let row = csv.lines().nth(1).unwrap();
        assert_eq!(
            row,
            "\"Current Ratio\",\"LIQUIDITY\",\"2.20\",\"2.00\",\"1.50\",\"\",\"excellent\",\"up\""
        );
    }

    #[test]
    fn test_dashboard_without_results() {
        let output = ratio_dashboard_markdown(&[], None);
        assert!(output.contains("Complete the ledger mapping"));

        let output = ratio_dashboard_markdown(&[ratio()], Some(100));
        assert!(output.contains("**100/100**"));
        assert!(output.contains("| Current Ratio | 2.20 | 2.00 | Excellent | Up |"));
    }
}
