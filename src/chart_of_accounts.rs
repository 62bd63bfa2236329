use crate::schema::{AccountType, LineItem, ReportType};
use serde::{Deserialize, Serialize};

// Sub-section tags the ratio engine relies on.
pub const SUB_CASH: &str = "Cash and Cash Equivalents";
pub const SUB_INVENTORIES: &str = "Inventories";
pub const SUB_COST_OF_GOODS_SOLD: &str = "Cost of Goods Sold";
pub const SUB_FINANCE_COSTS: &str = "Finance Costs";
pub const SUB_DEPRECIATION: &str = "Depreciation and Amortisation";

pub const CHANGES_IN_INVENTORIES_ID: &str = "PL_EXP_CHANGES_IN_INVENTORIES";

/// The master reporting taxonomy, kept sorted by `display_order`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChartOfAccounts {
    items: Vec<LineItem>,
}

impl ChartOfAccounts {
    pub fn new(mut items: Vec<LineItem>) -> Self {
        items.sort_by(|a, b| {
            a.display_order
                .cmp(&b.display_order)
                .then_with(|| a.id.cmp(&b.id))
        });
        Self { items }
    }

    /// Schedule III (Companies Act, 2013) line items for the balance sheet and
    /// statement of profit and loss.
    pub fn schedule_three() -> Self {
        use ReportType::{BalanceSheet as BS, ProfitLoss as PL};

        let rows: [(&str, &str, ReportType, &str, Option<&str>); 27] = [
            ("BS_EQ_SHARE_CAPITAL", "Share Capital", BS, "Equity", None),
            ("BS_EQ_OTHER_EQUITY", "Other Equity", BS, "Equity", None),
            ("BS_NCL_BORROWINGS", "Long-term Borrowings", BS, "Non-Current Liabilities", None),
            ("BS_NCL_DEFERRED_TAX", "Deferred Tax Liabilities (Net)", BS, "Non-Current Liabilities", None),
            ("BS_NCL_PROVISIONS", "Long-term Provisions", BS, "Non-Current Liabilities", None),
            ("BS_CL_BORROWINGS", "Short-term Borrowings", BS, "Current Liabilities", None),
            ("BS_CL_TRADE_PAYABLES", "Trade Payables", BS, "Current Liabilities", None),
            ("BS_CL_OTHER", "Other Current Liabilities", BS, "Current Liabilities", None),
            ("BS_CL_PROVISIONS", "Short-term Provisions", BS, "Current Liabilities", None),
            ("BS_NCA_PPE", "Property, Plant and Equipment", BS, "Non-Current Assets", None),
            ("BS_NCA_INTANGIBLES", "Intangible Assets", BS, "Non-Current Assets", None),
            ("BS_NCA_INVESTMENTS", "Non-current Investments", BS, "Non-Current Assets", None),
            ("BS_NCA_LOANS", "Long-term Loans and Advances", BS, "Non-Current Assets", None),
            ("BS_CA_INVENTORIES", "Inventories", BS, "Current Assets", Some(SUB_INVENTORIES)),
            ("BS_CA_TRADE_RECEIVABLES", "Trade Receivables", BS, "Current Assets", None),
            ("BS_CA_CASH", "Cash and Cash Equivalents", BS, "Current Assets", Some(SUB_CASH)),
            ("BS_CA_LOANS", "Short-term Loans and Advances", BS, "Current Assets", None),
            ("BS_CA_OTHER", "Other Current Assets", BS, "Current Assets", None),
            ("PL_INC_REVENUE", "Revenue from Operations", PL, "Income", None),
            ("PL_INC_OTHER", "Other Income", PL, "Income", None),
            ("PL_EXP_MATERIALS", "Cost of Materials Consumed", PL, "Expenses", Some(SUB_COST_OF_GOODS_SOLD)),
            ("PL_EXP_PURCHASES", "Purchases of Stock-in-Trade", PL, "Expenses", Some(SUB_COST_OF_GOODS_SOLD)),
            (CHANGES_IN_INVENTORIES_ID, "Changes in Inventories", PL, "Expenses", Some(SUB_COST_OF_GOODS_SOLD)),
            ("PL_EXP_EMPLOYEE", "Employee Benefits Expense", PL, "Expenses", None),
            ("PL_EXP_FINANCE", "Finance Costs", PL, "Expenses", Some(SUB_FINANCE_COSTS)),
            ("PL_EXP_DEPRECIATION", "Depreciation and Amortisation Expense", PL, "Expenses", Some(SUB_DEPRECIATION)),
            ("PL_EXP_OTHER", "Other Expenses", PL, "Expenses", None),
        ];

        let items = rows
            .iter()
            .enumerate()
            .map(|(idx, (id, name, report_type, section, sub))| LineItem {
                id: id.to_string(),
                display_name: name.to_string(),
                report_type: *report_type,
                report_section: section.to_string(),
                report_sub_section: sub.map(str::to_string),
                display_order: (idx as u32 + 1) * 10,
            })
            .collect();

        Self::new(items)
    }

    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn total_items(&self) -> usize {
        self.items.len()
    }

    pub fn get(&self, id: &str) -> Option<&LineItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Items whose section accepts entries of `account_type`, in display order.
    pub fn items_for(&self, account_type: AccountType) -> impl Iterator<Item = &LineItem> {
        self.items.iter().filter(move |item| item.accepts(account_type))
    }

    /// Distinct section names of one report, in display order.
    pub fn sections(&self, report_type: ReportType) -> Vec<&str> {
        let mut sections: Vec<&str> = Vec::new();
        for item in self.items.iter().filter(|i| i.report_type == report_type) {
            if !sections.contains(&item.report_section.as_str()) {
                sections.push(item.report_section.as_str());
            }
        }
        sections
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn to_markdown(&self) -> String {
        let mut output = String::new();
        output.push_str("# Chart of Accounts - Schedule III\n\n");

        for report_type in [ReportType::BalanceSheet, ReportType::ProfitLoss] {
            output.push_str(&format!("## {}\n\n", report_type));
            for section in self.sections(report_type) {
                output.push_str(&format!("### {}\n\n", section));
                for item in self
                    .items
                    .iter()
                    .filter(|i| i.report_type == report_type && i.report_section == section)
                {
                    output.push_str(&format!("- {} (`{}`)\n", item.display_name, item.id));
                }
                output.push('\n');
            }
        }

        output
    }
}
