use crate::error::{ReportingError, Result};
use crate::llm::prompts::{
    extraction_instructions, patch_instructions, PATCH_SYSTEM_PROMPT, TRIAL_BALANCE_SYSTEM_PROMPT,
};
use crate::llm::{client::GeminiClient, types::*};
use crate::schema::ClassifierOutput;
use chrono::NaiveDate;
use json_patch::Patch;
use log::{info, warn};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::Sender;

const DEFAULT_MAX_RETRIES: usize = 3;
const BALANCE_TOLERANCE: f64 = 0.01;

/// Classifier backend: reads a trial-balance image or PDF with Gemini and
/// repairs invalid answers with JSON patches.
pub struct TrialBalanceExtractor {
    client: GeminiClient,
    model: String,
    system_prompt: String,
    max_retries: usize,
}

impl TrialBalanceExtractor {
    pub fn new(client: GeminiClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            system_prompt: TRIAL_BALANCE_SYSTEM_PROMPT.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub async fn extract(
        &self,
        path: &Path,
        hint_date: Option<NaiveDate>,
        progress: Option<Sender<ExtractionEvent>>,
    ) -> Result<ClassifierOutput> {
        self.send_event(&progress, ExtractionEvent::Starting).await;

        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ReportingError::ExtractionFailed("Invalid file name".to_string()))?
            .to_string();

        self.send_event(
            &progress,
            ExtractionEvent::Reading {
                filename: filename.clone(),
            },
        )
        .await;
        let attachment = self.client.inline_document(path).await?;

        let mut messages = vec![Content::user_with_attachment(
            extraction_instructions(&filename, hint_date),
            attachment,
        )];

        self.send_event(&progress, ExtractionEvent::Requesting).await;
        let schema = ClassifierOutput::response_schema()?;
        let raw_json = self
            .client
            .generate_content(&self.model, &self.system_prompt, messages.clone(), Some(schema))
            .await?;

        let mut current_json: serde_json::Value = serde_json::from_str(&clean_json_output(&raw_json))
            .map_err(|e| {
                ReportingError::ExtractionFailed(format!("Initial JSON parse failed: {}", e))
            })?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            self.send_event(&progress, ExtractionEvent::Validating { attempt })
                .await;

            let errors = match serde_json::from_value::<ClassifierOutput>(current_json.clone()) {
                Ok(output) => {
                    let errors = validate_output(&output);
                    if errors.is_empty() {
                        info!(
                            "Extracted {} ledger row(s) from {} after {} attempt(s)",
                            output.entries.len(),
                            filename,
                            attempt
                        );
                        self.send_event(
                            &progress,
                            ExtractionEvent::Success {
                                entries: output.entries.len(),
                            },
                        )
                        .await;
                        return Ok(output);
                    }
                    errors
                }
                Err(e) => vec![format!("Response does not match the schema: {}", e)],
            };

            if attempt > self.max_retries {
                let reason = format!(
                    "Max retries exceeded. The model could not resolve: {}",
                    errors.join("; ")
                );
                self.send_event(
                    &progress,
                    ExtractionEvent::Failed {
                        reason: reason.clone(),
                    },
                )
                .await;
                return Err(ReportingError::ExtractionFailed(reason));
            }

            warn!("Extraction attempt {} failed validation: {:?}", attempt, errors);
            self.send_event(
                &progress,
                ExtractionEvent::CorrectionNeeded {
                    reason: errors.join("; "),
                },
            )
            .await;
            self.send_event(&progress, ExtractionEvent::Patching { attempt })
                .await;

            self.apply_patch(&mut messages, &mut current_json, &errors)
                .await?;
        }
    }

    /// Extracts several documents concurrently; fails if any one fails.
    pub async fn extract_many(
        &self,
        paths: &[PathBuf],
        hint_date: Option<NaiveDate>,
    ) -> Result<Vec<ClassifierOutput>> {
        let tasks = paths
            .iter()
            .map(|path| self.extract(path.as_path(), hint_date, None));
        futures::future::try_join_all(tasks).await
    }

    async fn send_event(&self, sender: &Option<Sender<ExtractionEvent>>, event: ExtractionEvent) {
        if let Some(tx) = sender {
            let _ = tx.send(event).await;
        }
    }

    async fn apply_patch(
        &self,
        history: &mut Vec<Content>,
        current_json: &mut serde_json::Value,
        errors: &[String],
    ) -> Result<()> {
        // The model sees its own answer before the repair request.
        history.push(Content::model(current_json.to_string()));
        history.push(Content::user(patch_instructions(errors)));

        let patch_str = self
            .client
            .generate_content(&self.model, PATCH_SYSTEM_PROMPT, history.clone(), None)
            .await?;

        let patch: Patch = serde_json::from_str(&clean_json_output(&patch_str))?;
        json_patch::patch(current_json, &patch.0)?;

        Ok(())
    }
}

/// Problems the model is asked to patch. Empty when the extraction is usable.
pub fn validate_output(output: &ClassifierOutput) -> Vec<String> {
    let mut errors = Vec::new();

    if output.entries.is_empty() {
        errors.push("No ledger rows were extracted".to_string());
    }

    for (idx, row) in output.entries.iter().enumerate() {
        if row.ledger_name.trim().is_empty() {
            errors.push(format!("/entries/{}: ledger_name is empty", idx));
        }
        if !(0.0..=1.0).contains(&row.confidence) {
            errors.push(format!(
                "/entries/{}: confidence {} is outside 0.0-1.0",
                idx, row.confidence
            ));
        }
        if !row.closing_balance.is_finite() {
            errors.push(format!("/entries/{}: closing_balance is not a number", idx));
        }
        if row.debit.is_some() || row.credit.is_some() {
            let debit = row.debit.unwrap_or(0.0);
            let credit = row.credit.unwrap_or(0.0);
            if (debit - credit - row.closing_balance).abs() > BALANCE_TOLERANCE {
                errors.push(format!(
                    "/entries/{} ('{}'): closing_balance {} must equal debit {} minus credit {}",
                    idx, row.ledger_name, row.closing_balance, debit, credit
                ));
            }
        }
    }

    if !(0.0..=1.0).contains(&output.period_info.period_confidence) {
        errors.push(format!(
            "/period_info/period_confidence {} is outside 0.0-1.0",
            output.period_info.period_confidence
        ));
    }

    errors
}

fn clean_json_output(raw: &str) -> String {
    let trimmed = raw.trim();
    let (open, close) = if trimmed.starts_with('[') {
        ('[', ']')
    } else {
        ('{', '}')
    };

    match (trimmed.find(open), trimmed.rfind(close)) {
        (Some(start), Some(end)) if end > start => trimmed[start..=end].to_string(),
        _ => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AccountType, ExtractedLedgerRow, ExtractionMetadata, PeriodInfo};

    fn output(rows: Vec<ExtractedLedgerRow>) -> ClassifierOutput {
        ClassifierOutput {
            entries: rows,
            period_info: PeriodInfo {
                detected_period: "1-Apr-23 to 30-Jun-23".to_string(),
                period_date: NaiveDate::from_ymd_opt(2023, 6, 30),
                period_confidence: 0.9,
            },
            metadata: ExtractionMetadata::default(),
        }
    }

    fn row(name: &str, closing: f64, debit: Option<f64>, credit: Option<f64>) -> ExtractedLedgerRow {
        ExtractedLedgerRow {
            ledger_name: name.to_string(),
            closing_balance: closing,
            debit,
            credit,
            account_type: AccountType::Assets,
            account_category: None,
            confidence: 0.9,
        }
    }

    #[test]
    fn test_valid_output_passes() {
        let output = output(vec![
            row("Cash", 500.0, None, None),
            row("Bank", 300.0, Some(300.0), None),
        ]);
        assert!(validate_output(&output).is_empty());
    }

    #[test]
    fn test_validation_errors_point_at_rows() {
        let mut bad_confidence = row("Debtors", 100.0, None, None);
        bad_confidence.confidence = 1.2;
        let output = output(vec![
            row(" ", 1.0, None, None),
            bad_confidence,
            row("GST", -400.0, Some(0.0), Some(300.0)),
        ]);

        let errors = validate_output(&output);
        assert_eq!(errors.len(), 3);
        assert!(errors[0].starts_with("/entries/0"));
        assert!(errors[1].contains("confidence"));
        assert!(errors[2].contains("must equal debit"));
    }

    #[test]
    fn test_empty_extraction_is_invalid() {
        assert_eq!(validate_output(&output(vec![])).len(), 1);
    }

    #[test]
    fn test_clean_json_output() {
        assert_eq!(
            clean_json_output("```json\n{\"a\": 1}\n```"),
            "{\"a\": 1}"
        );
        assert_eq!(
            clean_json_output("[{\"op\": \"remove\", \"path\": \"/x\"}]"),
            "[{\"op\": \"remove\", \"path\": \"/x\"}]"
        );
        assert_eq!(clean_json_output("  plain  "), "plain");
    }
}
