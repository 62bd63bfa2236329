use crate::error::{ReportingError, Result};
use chrono::{Datelike, Days, NaiveDate};

pub fn last_day_of_month(year: i32, month: u32) -> Result<NaiveDate> {
    let next_month = if month == 12 { 1 } else { month + 1 };
    let next_year = if month == 12 { year + 1 } else { year };

    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.checked_sub_days(Days::new(1)))
        .ok_or_else(|| ReportingError::DateError(format!("Invalid month {}-{:02}", year, month)))
}

pub fn validate_fiscal_year_end_month(month: u32) -> Result<()> {
    if !(1..=12).contains(&month) {
        return Err(ReportingError::InvalidFiscalYearEndMonth(month));
    }
    Ok(())
}

pub fn validate_quarter(quarter: u32) -> Result<()> {
    if !(1..=4).contains(&quarter) {
        return Err(ReportingError::InvalidQuarter(quarter));
    }
    Ok(())
}

/// Returns the 0-based index of the month within the fiscal year.
///
/// # Examples
/// - If FY ends in Dec (12): Jan=0, Feb=1, ..., Dec=11
/// - If FY ends in March (3): Apr=0, May=1, ..., Mar=11
pub fn get_fiscal_month_index(calendar_month: u32, fiscal_year_end_month: u32) -> usize {
    let fy_start_month = if fiscal_year_end_month == 12 {
        1
    } else {
        fiscal_year_end_month + 1
    };

    if calendar_month >= fy_start_month {
        (calendar_month - fy_start_month) as usize
    } else {
        (calendar_month + 12 - fy_start_month) as usize
    }
}

/// The calendar year in which the fiscal year containing `date` ends.
pub fn fiscal_year_for_date(date: NaiveDate, fiscal_year_end_month: u32) -> i32 {
    if date.month() <= fiscal_year_end_month {
        date.year()
    } else {
        date.year() + 1
    }
}

/// Resolves the (fiscal year, quarter) a date falls in.
pub fn period_for_date(date: NaiveDate, fiscal_year_end_month: u32) -> Result<(i32, u32)> {
    validate_fiscal_year_end_month(fiscal_year_end_month)?;
    let year = fiscal_year_for_date(date, fiscal_year_end_month);
    let quarter = (get_fiscal_month_index(date.month(), fiscal_year_end_month) / 3) as u32 + 1;
    Ok((year, quarter))
}

pub fn quarter_end_date(
    fiscal_year: i32,
    quarter: u32,
    fiscal_year_end_month: u32,
) -> Result<NaiveDate> {
    validate_quarter(quarter)?;
    validate_fiscal_year_end_month(fiscal_year_end_month)?;

    // Months elapsed from January of the calendar year the fiscal year starts in.
    let start_month_index = fiscal_year_end_month % 12;
    let start_year = if fiscal_year_end_month == 12 {
        fiscal_year
    } else {
        fiscal_year - 1
    };
    let offset = start_month_index + quarter * 3 - 1;

    last_day_of_month(start_year + (offset / 12) as i32, offset % 12 + 1)
}

pub fn period_name(fiscal_year: i32, quarter: u32, fiscal_year_end_month: u32) -> String {
    if fiscal_year_end_month == 12 {
        format!("Q{} {}", quarter, fiscal_year)
    } else {
        format!(
            "Q{} FY{}-{:02}",
            quarter,
            fiscal_year - 1,
            fiscal_year.rem_euclid(100)
        )
    }
}

/// Parses a stored amount. Amounts are plain decimals; display grouping
/// commas are not accepted.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Formats an amount in rupees with Indian digit grouping, e.g. `₹12,34,567.89`.
pub fn format_inr(amount: f64) -> String {
    let negative = amount < 0.0;
    let fixed = format!("{:.2}", amount.abs());
    let (whole, fraction) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let grouped = group_indian_digits(whole);
    let is_zero = whole.chars().all(|c| c == '0') && fraction.chars().all(|c| c == '0');

    if negative && !is_zero {
        format!("-₹{}.{}", grouped, fraction)
    } else {
        format!("₹{}.{}", grouped, fraction)
    }
}

fn group_indian_digits(digits: &str) -> String {
    if digits.len() <= 3 {
        return digits.to_string();
    }

    let (head, last_three) = digits.split_at(digits.len() - 3);
    let mut groups: Vec<&str> = Vec::new();
    let mut end = head.len();
    while end > 0 {
        let start = end.saturating_sub(2);
        groups.push(&head[start..end]);
        end = start;
    }
    groups.reverse();

    format!("{},{}", groups.join(","), last_three)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_day_of_month() {
        assert_eq!(
            last_day_of_month(2023, 2).unwrap(),
            NaiveDate::from_ymd_opt(2023, 2, 28).unwrap()
        );
        assert_eq!(
            last_day_of_month(2024, 2).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
        );
        assert_eq!(
            last_day_of_month(2023, 12).unwrap(),
            NaiveDate::from_ymd_opt(2023, 12, 31).unwrap()
        );
    }

    #[test]
    fn test_fiscal_month_index() {
        assert_eq!(get_fiscal_month_index(1, 12), 0);
        assert_eq!(get_fiscal_month_index(12, 12), 11);

        // Indian fiscal year (ends March). Starts April.
        assert_eq!(get_fiscal_month_index(4, 3), 0);
        assert_eq!(get_fiscal_month_index(12, 3), 8);
        assert_eq!(get_fiscal_month_index(3, 3), 11);
    }

    #[test]
    fn test_quarter_end_dates_indian_year() {
        let expected = [
            (1, NaiveDate::from_ymd_opt(2023, 6, 30).unwrap()),
            (2, NaiveDate::from_ymd_opt(2023, 9, 30).unwrap()),
            (3, NaiveDate::from_ymd_opt(2023, 12, 31).unwrap()),
            (4, NaiveDate::from_ymd_opt(2024, 3, 31).unwrap()),
        ];
        for (quarter, date) in expected {
            assert_eq!(quarter_end_date(2024, quarter, 3).unwrap(), date);
        }
    }

    #[test]
    fn test_quarter_end_dates_calendar_year() {
        assert_eq!(
            quarter_end_date(2024, 1, 12).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 31).unwrap()
        );
        assert_eq!(
            quarter_end_date(2024, 4, 12).unwrap(),
            NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()
        );
    }

    #[test]
    fn test_invalid_quarter() {
        assert!(matches!(
            quarter_end_date(2024, 5, 3),
            Err(ReportingError::InvalidQuarter(5))
        ));
    }

    #[test]
    fn test_period_for_date() {
        let date = NaiveDate::from_ymd_opt(2023, 8, 15).unwrap();
        assert_eq!(period_for_date(date, 3).unwrap(), (2024, 2));

        let date = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        assert_eq!(period_for_date(date, 3).unwrap(), (2024, 4));

        let date = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        assert_eq!(period_for_date(date, 12).unwrap(), (2024, 1));
    }

    #[test]
    fn test_period_name() {
        assert_eq!(period_name(2024, 1, 3), "Q1 FY2023-24");
        assert_eq!(period_name(2000, 2, 3), "Q2 FY1999-00");
        assert_eq!(period_name(2024, 3, 12), "Q3 2024");
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount(" 25000 "), Some(25000.0));
        assert_eq!(parse_amount("-150000.50"), Some(-150000.5));
        assert_eq!(parse_amount("1,50,000"), None);
        assert_eq!(parse_amount("abc"), None);
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("inf"), None);
        assert_eq!(parse_amount("NaN"), None);
    }

    #[test]
    fn test_format_inr() {
        let cases = [
            (0.0, "₹0.00"),
            (999.0, "₹999.00"),
            (1000.0, "₹1,000.00"),
            (100000.0, "₹1,00,000.00"),
            (1234567.891, "₹12,34,567.89"),
            (1000000.0, "₹10,00,000.00"),
            (-25000.5, "-₹25,000.50"),
            (-0.001, "₹0.00"),
        ];
        for (amount, expected) in cases {
            assert_eq!(format_inr(amount), expected, "amount {}", amount);
        }
    }
}
