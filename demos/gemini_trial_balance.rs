use anyhow::{anyhow, bail, Result};
use chrono::NaiveDate;
use dotenv::dotenv;
use std::path::PathBuf;
use tokio::sync::mpsc;
use trial_balance_insights::llm::{ExtractionEvent, GeminiClient, TrialBalanceExtractor};
use trial_balance_insights::*;

const MODEL: &str = "gemini-2.5-flash";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let path: PathBuf = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow!("usage: gemini_trial_balance <trial-balance.pdf|png> [YYYY-MM-DD]"))?
        .into();
    let hint_date = std::env::args()
        .nth(2)
        .map(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d"))
        .transpose()?;

    println!("🚀 Extracting {}...", path.display());

    let extractor = TrialBalanceExtractor::new(GeminiClient::from_env()?, MODEL);
    let (tx, mut rx) = mpsc::channel(16);

    let progress = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                ExtractionEvent::Starting => println!("  ⏳ Starting"),
                ExtractionEvent::Reading { filename } => println!("  📄 Reading {}", filename),
                ExtractionEvent::Requesting => println!("  🤖 Asking {}", MODEL),
                ExtractionEvent::Validating { attempt } => {
                    println!("  🔍 Validating (attempt {})", attempt)
                }
                ExtractionEvent::CorrectionNeeded { reason } => println!("  ⚠️  {}", reason),
                ExtractionEvent::Patching { attempt } => {
                    println!("  🩹 Requesting patch (attempt {})", attempt)
                }
                ExtractionEvent::Success { entries } => println!("  ✅ {} ledger row(s)", entries),
                ExtractionEvent::Failed { reason } => println!("  ❌ {}", reason),
            }
        }
    });

    let output = extractor.extract(&path, hint_date, Some(tx)).await?;
    progress.await?;

    println!(
        "\n📅 Detected period: {} (confidence {:.2})",
        output.period_info.detected_period, output.period_info.period_confidence
    );
    for note in &output.metadata.parsing_notes {
        println!("  📝 {}", note);
    }

    let mut pipeline = ReportingPipeline::new(MemoryStore::new(), PipelineConfig::default())?;
    let report = pipeline.ingest_classifier_output(&output, hint_date)?;
    println!("\n{}", report.summary());

    let Some(period) = report.period else {
        bail!("no rows could be imported");
    };

    let suggestions = pipeline.suggest_mappings(Some(period.id))?;
    let applied = pipeline.bulk_apply(&suggestions, None)?;
    println!(
        "🔗 {} of {} suggestion(s) applied for {}",
        applied,
        suggestions.len(),
        period.period_name
    );

    let unmapped = pipeline.unmapped_ledgers(period.id)?;
    if !unmapped.is_empty() {
        println!("Still unmapped (review by hand):");
        for ledger in &unmapped {
            match suggestions.get(ledger) {
                Some(s) => println!(
                    "  - {} → {} ({:.2}): {}",
                    ledger, s.suggested_item_id, s.confidence, s.reasoning
                ),
                None => println!("  - {}", ledger),
            }
        }
    }

    let analysis = pipeline.ratio_analysis(period.id, None)?;
    println!(
        "\n{}",
        export::ratio_dashboard_markdown(&analysis.results, analysis.health_score)
    );

    Ok(())
}
