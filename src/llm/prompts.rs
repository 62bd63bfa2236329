use chrono::NaiveDate;

pub const TRIAL_BALANCE_SYSTEM_PROMPT: &str = r#"
You are a chartered accountant reading a trial balance exported from Tally (or a similar Indian
accounting package). The document may be a screenshot, a scanned printout or a PDF.

## YOUR MISSION
Return every LEAF ledger of the trial balance with its closing balance, classification and the
period the trial balance is drawn up for.

## CRITICAL RULES

### Rows
- Extract ledger rows only. Skip group headings ("Current Assets", "Indirect Expenses") and every
  total line ("Grand Total", "Total", group subtotals).
- Keep the ledger name exactly as printed, including abbreviations such as "A/c".
- When a ledger is printed under a group heading, put that heading in `account_category`
  (e.g. "Sundry Debtors", "Duties & Taxes", "Sales Accounts").

### Amounts and signs
- `closing_balance` is SIGNED: debit balances are POSITIVE, credit balances are NEGATIVE.
- Tally prints "Dr"/"Cr" suffixes or separate Debit/Credit columns. Convert accordingly.
- When the document shows separate Debit and Credit columns, also fill `debit` and `credit` with
  the unsigned column amounts, so that closing_balance = debit - credit.
- Amounts are plain numbers: drop currency symbols and thousands separators
  ("12,34,567.00" becomes 1234567.0).

### Classification
- `account_type` is one of ASSETS, LIABILITIES, EQUITY, REVENUE, EXPENSES, OTHER.
- Capital Account and Reserves & Surplus are EQUITY. Duties & Taxes, Sundry Creditors, Provisions
  and loans taken are LIABILITIES. Sales Accounts and Direct/Indirect Incomes are REVENUE.
  Purchase Accounts and Direct/Indirect Expenses are EXPENSES.
- Use OTHER only when nothing on the page indicates the nature of the ledger.
- `confidence` is your certainty in the classification, between 0.0 and 1.0.

### Period
- `detected_period` is the period text as printed ("1-Apr-23 to 30-Jun-23").
- `period_date` is the LAST day of that period in YYYY-MM-DD format, or null if the page does not
  show one.

## OUTPUT FORMAT
Return ONLY JSON matching the response schema. Record anything you were unsure about (illegible
digits, rows cut off at the page edge) in `metadata.parsing_notes`.
"#;

pub const PATCH_SYSTEM_PROMPT: &str = "You are a JSON Repair Agent. You fix trial-balance \
extractions by returning RFC 6902 JSON Patch arrays and nothing else.";

pub fn extraction_instructions(filename: &str, hint_date: Option<NaiveDate>) -> String {
    let hint = match hint_date {
        Some(date) => format!(
            "The uploader believes this trial balance is as at {}. Use this date for \
             `period_date` only if the document itself does not show one.",
            date.format("%Y-%m-%d")
        ),
        None => "No period hint was given; rely on the document.".to_string(),
    };

    format!(
        "Extract the trial balance from the attached file \"{}\".\n{}\n\
         Return ONLY valid JSON matching the schema.",
        filename, hint
    )
}

pub fn patch_instructions(errors: &[String]) -> String {
    format!(
        "The JSON you provided failed validation:\n\n{}\n\n\
         TASK: Return a JSON Patch (RFC 6902) array to fix these problems. \
         Do NOT return the full JSON. Return ONLY the patch array.\n\
         Example: [{{ \"op\": \"replace\", \"path\": \"/entries/3/closing_balance\", \"value\": -4500.0 }}]",
        errors
            .iter()
            .map(|e| format!("- {}", e))
            .collect::<Vec<_>>()
            .join("\n")
    )
}
