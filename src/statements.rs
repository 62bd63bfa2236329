//! Financial statements assembled from aggregated line-item totals.
//!
//! Amounts here are in natural sign: credit-normal items (liabilities, equity,
//! income) are negated so every figure reads as a positive magnitude in the
//! usual case.

use crate::chart_of_accounts::{
    SUB_CASH, SUB_COST_OF_GOODS_SOLD, SUB_DEPRECIATION, SUB_FINANCE_COSTS, SUB_INVENTORIES,
};
use crate::schema::{AccountType, LineItem, LineItemTotal, ReportType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn natural_amount(item: &LineItem, amount: f64) -> f64 {
    if item.implied_account_type().is_credit_normal() {
        -amount
    } else {
        amount
    }
}

/// Headline totals used by the ratio engine and the cash flow statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FinancialTotals {
    pub total_assets: f64,
    pub current_assets: f64,
    pub inventories: f64,
    pub cash: f64,
    pub total_liabilities: f64,
    pub current_liabilities: f64,
    pub equity: f64,
    pub revenue: f64,
    pub expenses: f64,
    pub cost_of_goods_sold: f64,
    pub finance_costs: f64,
    pub depreciation: f64,
    pub net_profit: f64,
}

impl FinancialTotals {
    /// Uses `current_amount`; totals whose item is not in `taxonomy` are ignored.
    pub fn from_line_items(totals: &[LineItemTotal], taxonomy: &[LineItem]) -> Self {
        let items: HashMap<&str, &LineItem> =
            taxonomy.iter().map(|i| (i.id.as_str(), i)).collect();
        let mut out = FinancialTotals::default();

        for total in totals {
            let Some(item) = items.get(total.item_code.as_str()) else {
                continue;
            };
            let amount = natural_amount(item, total.current_amount);

            match item.implied_account_type() {
                AccountType::Assets => {
                    out.total_assets += amount;
                    if item.is_current() {
                        out.current_assets += amount;
                    }
                }
                AccountType::Liabilities => {
                    out.total_liabilities += amount;
                    if item.is_current() {
                        out.current_liabilities += amount;
                    }
                }
                AccountType::Equity => out.equity += amount,
                AccountType::Revenue => out.revenue += amount,
                AccountType::Expenses => out.expenses += amount,
                AccountType::Other => {}
            }

            if item.has_sub_section(SUB_INVENTORIES) {
                out.inventories += amount;
            } else if item.has_sub_section(SUB_CASH) {
                out.cash += amount;
            } else if item.has_sub_section(SUB_COST_OF_GOODS_SOLD) {
                out.cost_of_goods_sold += amount;
            } else if item.has_sub_section(SUB_FINANCE_COSTS) {
                out.finance_costs += amount;
            } else if item.has_sub_section(SUB_DEPRECIATION) {
                out.depreciation += amount;
            }
        }

        out.net_profit = out.revenue - out.expenses;
        out
    }

    pub fn gross_profit(&self) -> f64 {
        self.revenue - self.cost_of_goods_sold
    }

    /// Earnings before interest and tax.
    pub fn ebit(&self) -> f64 {
        self.net_profit + self.finance_costs
    }

    pub fn non_current_assets(&self) -> f64 {
        self.total_assets - self.current_assets
    }

    pub fn non_current_liabilities(&self) -> f64 {
        self.total_liabilities - self.current_liabilities
    }

    pub fn working_capital(&self) -> f64 {
        self.current_assets - self.current_liabilities
    }

    /// Assets minus liabilities, equity and the open profit for the period.
    /// Zero for a complete, fully mapped trial balance.
    pub fn balance_difference(&self) -> f64 {
        self.total_assets - self.total_liabilities - self.equity - self.net_profit
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementLine {
    pub item_code: String,
    pub item_name: String,
    pub amount: f64,
    pub previous_amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementSection {
    pub name: String,
    pub lines: Vec<StatementLine>,
    pub total: f64,
    pub previous_total: f64,
}

fn sections_for(
    report_type: ReportType,
    totals: &[LineItemTotal],
    taxonomy: &[LineItem],
) -> Vec<StatementSection> {
    let items: HashMap<&str, &LineItem> = taxonomy.iter().map(|i| (i.id.as_str(), i)).collect();
    let mut sections: Vec<StatementSection> = Vec::new();

    for total in totals.iter().filter(|t| t.report_type == report_type) {
        let Some(item) = items.get(total.item_code.as_str()) else {
            continue;
        };
        let line = StatementLine {
            item_code: total.item_code.clone(),
            item_name: total.item_name.clone(),
            amount: natural_amount(item, total.current_amount),
            previous_amount: natural_amount(item, total.previous_amount),
        };

        let idx = match sections.iter().position(|s| s.name == item.report_section) {
            Some(idx) => idx,
            None => {
                sections.push(StatementSection {
                    name: item.report_section.clone(),
                    lines: Vec::new(),
                    total: 0.0,
                    previous_total: 0.0,
                });
                sections.len() - 1
            }
        };
        let section = &mut sections[idx];
        section.total += line.amount;
        section.previous_total += line.previous_amount;
        section.lines.push(line);
    }

    sections
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceSheet {
    pub period_name: String,
    pub sections: Vec<StatementSection>,
    pub total_assets: f64,
    /// Liabilities plus equity, including the profit for the period that the
    /// trial balance has not closed into reserves yet.
    pub total_equity_and_liabilities: f64,
    pub profit_for_period: f64,
}

impl BalanceSheet {
    pub fn build(period_name: &str, totals: &[LineItemTotal], taxonomy: &[LineItem]) -> Self {
        let headline = FinancialTotals::from_line_items(totals, taxonomy);
        Self {
            period_name: period_name.to_string(),
            sections: sections_for(ReportType::BalanceSheet, totals, taxonomy),
            total_assets: headline.total_assets,
            total_equity_and_liabilities: headline.total_liabilities
                + headline.equity
                + headline.net_profit,
            profit_for_period: headline.net_profit,
        }
    }

    pub fn difference(&self) -> f64 {
        self.total_assets - self.total_equity_and_liabilities
    }

    pub fn is_balanced(&self, tolerance: f64) -> bool {
        self.difference().abs() <= tolerance
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfitAndLoss {
    pub period_name: String,
    pub sections: Vec<StatementSection>,
    pub total_income: f64,
    pub total_expenses: f64,
    pub gross_profit: f64,
    pub finance_costs: f64,
    pub net_profit: f64,
}

impl ProfitAndLoss {
    pub fn build(period_name: &str, totals: &[LineItemTotal], taxonomy: &[LineItem]) -> Self {
        let headline = FinancialTotals::from_line_items(totals, taxonomy);
        Self {
            period_name: period_name.to_string(),
            sections: sections_for(ReportType::ProfitLoss, totals, taxonomy),
            total_income: headline.revenue,
            total_expenses: headline.expenses,
            gross_profit: headline.gross_profit(),
            finance_costs: headline.finance_costs,
            net_profit: headline.net_profit,
        }
    }
}

/// Simplified indirect-method cash flow between two balance sheets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CashFlowStatement {
    pub net_profit: f64,
    pub depreciation: f64,
    pub working_capital_change: f64,
    pub operating: f64,
    pub investing: f64,
    pub financing: f64,
    pub net_change: f64,
    /// Actual change in cash minus `net_change`.
    pub unexplained: f64,
}

impl CashFlowStatement {
    pub fn between(previous: &FinancialTotals, current: &FinancialTotals) -> Self {
        let non_cash_working_capital =
            |t: &FinancialTotals| (t.current_assets - t.cash) - t.current_liabilities;
        let working_capital_change =
            non_cash_working_capital(current) - non_cash_working_capital(previous);

        let operating = current.net_profit + current.depreciation - working_capital_change;
        let investing = -(current.non_current_assets() - previous.non_current_assets()
            + current.depreciation);
        let financing = (current.non_current_liabilities() - previous.non_current_liabilities())
            + (current.equity - previous.equity);

        let net_change = operating + investing + financing;
        Self {
            net_profit: current.net_profit,
            depreciation: current.depreciation,
            working_capital_change,
            operating,
            investing,
            financing,
            net_change,
            unexplained: (current.cash - previous.cash) - net_change,
        }
    }
}
