use anyhow::{bail, Result};
use std::fs::File;
use trial_balance_insights::*;

const Q1_TRIAL_BALANCE: &str = "ledger_name,closing_balance,parent_group\n\
                                Capital,-300000,Capital Account\n\
                                Reserves,-100000,Reserves & Surplus\n\
                                HDFC Term Loan,-300000,Secured Loans\n\
                                Sundry Creditors,-180000,Sundry Creditors\n\
                                GST Payable,-20000,Duties & Taxes\n\
                                Shop Fitout,450000,Fixed Assets\n\
                                Closing Stock,260000,Stock-in-Hand\n\
                                Debtors,140000,Sundry Debtors\n\
                                Cash,25000,Cash-in-Hand\n\
                                HDFC Current A/c,95000,Bank Accounts\n\
                                Sales,-1500000,Sales Accounts\n\
                                Purchases,1100000,Purchase Accounts\n\
                                Salaries,180000,Indirect Expenses\n\
                                Interest on Loan,30000,Indirect Expenses\n\
                                Depreciation,45000,Indirect Expenses\n\
                                Rent,75000,Indirect Expenses\n";

const Q2_TRIAL_BALANCE: &str = "ledger_name,closing_balance,parent_group\n\
                                Capital,-300000,Capital Account\n\
                                Reserves,-170000,Reserves & Surplus\n\
                                HDFC Term Loan,-280000,Secured Loans\n\
                                Sundry Creditors,-210000,Sundry Creditors\n\
                                GST Payable,-25000,Duties & Taxes\n\
                                Shop Fitout,405000,Fixed Assets\n\
                                Closing Stock,240000,Stock-in-Hand\n\
                                Debtors,175000,Sundry Debtors\n\
                                Cash,30000,Cash-in-Hand\n\
                                HDFC Current A/c,277000,Bank Accounts\n\
                                Sales,-1650000,Sales Accounts\n\
                                Purchases,1150000,Purchase Accounts\n\
                                Salaries,185000,Indirect Expenses\n\
                                Interest on Loan,28000,Indirect Expenses\n\
                                Depreciation,45000,Indirect Expenses\n\
                                Rent,80000,Indirect Expenses\n\
                                Stock Movement,20000,Direct Expenses\n";

fn main() -> Result<()> {
    println!("📒 Quarterly review: FY2024-25, Q1 and Q2\n");

    let config = PipelineConfig {
        // Parent-group suggestions carry the fallback confidence.
        auto_apply_threshold: 0.5,
        materiality_threshold: 100_000.0,
        ..PipelineConfig::default()
    };
    let mut pipeline = ReportingPipeline::new(SqliteStore::open_in_memory()?, config)?;

    let q1 = pipeline.ingest_csv(2025, 1, Q1_TRIAL_BALANCE.as_bytes())?;
    println!("Q1: {}", q1.summary());
    let q2 = pipeline.ingest_csv(2025, 2, Q2_TRIAL_BALANCE.as_bytes())?;
    println!("Q2: {}\n", q2.summary());

    let (Some(q1), Some(q2)) = (q1.period, q2.period) else {
        bail!("both quarters should have accepted rows");
    };

    for period in [&q1, &q2] {
        let applied = pipeline.auto_map(period.id)?;
        println!("🔗 {}: {} mapping(s) applied", period.period_name, applied);
    }

    // Stock movement sits under Direct Expenses; move it to its own line.
    pipeline.apply_mapping("Stock Movement", chart_of_accounts::CHANGES_IN_INVENTORIES_ID, q2.id)?;

    let readiness = pipeline.readiness(q2.id)?;
    for check in &readiness.checks {
        let mark = if check.passed { "✅" } else { "❌" };
        println!("{} {}: {}", mark, check.name, check.detail);
    }
    if let Some(guidance) = readiness.guidance() {
        println!("⚠️  {}", guidance);
    }
    println!();

    let totals = pipeline.aggregate(q2.id, Some(q1.id))?;
    let filter = pipeline.materiality_filter();
    println!(
        "📊 Material line items ({} hidden below {}):",
        filter.hidden_count(&totals),
        format_inr(filter.threshold)
    );
    for total in filter.visible(&totals) {
        println!(
            "  {:<40} {:>16} {:>16} {:>8.1}%",
            total.item_name,
            format_inr(total.current_amount),
            format_inr(total.previous_amount),
            total.variance_percentage
        );
    }
    println!();

    println!("{}", export::balance_sheet_markdown(&pipeline.balance_sheet(q2.id, Some(q1.id))?));
    println!("{}", export::profit_and_loss_markdown(&pipeline.profit_and_loss(q2.id, Some(q1.id))?));

    if let Some(flow) = pipeline.cash_flow(q2.id)? {
        println!("{}", export::cash_flow_markdown(&flow));
    }

    if let Some(stock) = pipeline.reconcile_inventory(q2.id)? {
        println!(
            "📦 Stock reconciliation: opening {}, closing {}, reported change {} ({})\n",
            format_inr(stock.opening_stock),
            format_inr(stock.closing_stock),
            format_inr(stock.reported_change),
            if stock.reconciled { "reconciled" } else { "difference found" }
        );
    }

    pipeline.save_user_benchmark(&UserBenchmark {
        user_id: "cfo".to_string(),
        ratio_definition_id: 1,
        custom_target_value: Some(2.5),
        custom_industry_average: None,
        benchmark_source: BenchmarkSource::InternalTarget,
        notes: Some("Lender covenant".to_string()),
        is_active: true,
    })?;

    let analysis = pipeline.ratio_analysis(q2.id, Some("cfo"))?;
    println!(
        "{}",
        export::ratio_dashboard_markdown(&analysis.results, analysis.health_score)
    );

    let file = File::create("q2_line_items.csv")?;
    export::write_line_items_csv(file, &totals)?;
    let file = File::create("q2_ratios.csv")?;
    export::write_ratios_csv(file, &analysis.results)?;
    println!("💾 Saved q2_line_items.csv and q2_ratios.csv");

    Ok(())
}
