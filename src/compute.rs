//! Evidence + intent -> answer.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, LazyLock};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;
use tracing::{debug, warn};

use crate::chart::ChartRenderer;
use crate::error::ComputeError;
use crate::eyes::re;
use crate::guard::truncate_chars;
use crate::table::{self, Table};
use crate::types::{
    Action, Answer, Evidence, JSON_TEXT_FALLBACK_CHARS, NO_TABLE_SENTINEL, PLAIN_TEXT_ANSWER_CHARS,
    PageContent, QuestionIntent, SECONDARY_TEXT_CHARS, TabularFormat,
};

static NUMBER: LazyLock<Regex> = LazyLock::new(|| re(r"[-+]?(?:\d*\.\d+|\d+)"));
static SECRET_CODE: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)secret\s*code\s*[:\-]?\s*([A-Za-z0-9_-]+)"));

pub struct AnswerComputer {
    charts: Arc<dyn ChartRenderer>,
}

impl AnswerComputer {
    pub fn new(charts: Arc<dyn ChartRenderer>) -> Self {
        Self { charts }
    }

    /// Compute the answer for one step. Only tabular parsing errors escape;
    /// the caller turns them into a truncated raw-text answer.
    pub fn compute(
        &self,
        evidence: &Evidence,
        intent: &QuestionIntent,
        page: &PageContent,
    ) -> Result<Answer, ComputeError> {
        debug!(evidence = evidence.kind(), action = ?intent.action, "computing answer");
        let answer = match evidence {
            Evidence::SecondaryText(text) => Answer::Text(secondary_answer(text)),
            Evidence::Audio { transcript, .. } => Answer::text(transcript.trim()),
            Evidence::Tabular { bytes, format } => {
                let table = match format {
                    TabularFormat::Csv => table::parse_csv(bytes)?,
                    TabularFormat::Spreadsheet => table::parse_spreadsheet(bytes)?,
                };
                table.apply_intent(intent)
            }
            Evidence::Pdf(bytes) => match pdf_answer(bytes, intent) {
                Ok(answer) => answer,
                Err(e) => {
                    warn!(error = %e, "PDF yielded no answer, submitting the file itself");
                    Answer::Text(data_uri(bytes, mime_for_extension("pdf")))
                }
            },
            Evidence::Json(bytes) => json_answer(bytes),
            Evidence::Binary { bytes, ext } => Answer::Text(data_uri(bytes, mime_for_extension(ext))),
            Evidence::InlineText(text) => self.plain_text_answer(text, intent, &page.tables),
            Evidence::None => self.plain_text_answer(&page.visible, intent, &page.tables),
        };
        Ok(answer)
    }

    fn plain_text_answer(&self, text: &str, intent: &QuestionIntent, tables: &[Table]) -> Answer {
        match intent.action {
            Action::Count => Answer::Integer(text.lines().filter(|l| !l.trim().is_empty()).count() as i64),
            Action::Chart => {
                let Some(table) = tables.first() else {
                    return Answer::text(NO_TABLE_SENTINEL);
                };
                match self.charts.render(table) {
                    Ok(uri) => Answer::Text(uri),
                    Err(e) => {
                        warn!(error = %e, "chart rendering failed");
                        Answer::text(NO_TABLE_SENTINEL)
                    }
                }
            }
            _ => Answer::Text(truncate_chars(text.trim(), PLAIN_TEXT_ANSWER_CHARS)),
        }
    }
}

/// The token after a "secret code" label, else the page text cut to
/// `SECONDARY_TEXT_CHARS`.
pub fn secondary_answer(text: &str) -> String {
    match SECRET_CODE.captures(text).and_then(|c| c.get(1)) {
        Some(code) => code.as_str().to_string(),
        None => truncate_chars(text.trim(), SECONDARY_TEXT_CHARS),
    }
}

/// Sum of every integer or decimal token, sign included.
pub fn sum_numbers(text: &str) -> f64 {
    NUMBER
        .find_iter(text)
        .filter_map(|m| m.as_str().parse::<f64>().ok())
        .sum()
}

/// Text of each page, in order.
fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<String>, ComputeError> {
    // pdf-extract panics on some malformed documents.
    match panic::catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem_by_pages(bytes))) {
        Ok(Ok(pages)) => Ok(pages),
        Ok(Err(e)) => Err(ComputeError::Pdf(e.to_string())),
        Err(_) => Err(ComputeError::Pdf("text extraction panicked".into())),
    }
}

pub fn pdf_answer(bytes: &[u8], intent: &QuestionIntent) -> Result<Answer, ComputeError> {
    let pages = extract_pdf_pages(bytes)?;
    let pages: Vec<&str> = pages.iter().map(String::as_str).collect();
    Ok(answer_from_pdf_pages(&pages, intent))
}

/// With a page number: that page (1-indexed, clamped), preferring a table on
/// it. Without: the whole document's text.
pub fn answer_from_pdf_pages(pages: &[&str], intent: &QuestionIntent) -> Answer {
    let text = match intent.page {
        Some(page) if !pages.is_empty() => {
            let idx = (page as usize).saturating_sub(1).min(pages.len() - 1);
            let text = pages[idx];
            if let Some(table) = Table::from_text(text) {
                debug!(page = idx + 1, columns = ?table.columns, "table found on PDF page");
                return table.apply_intent(intent);
            }
            text.to_string()
        }
        _ => pages.join("\n"),
    };

    if intent.action == Action::Sum {
        Answer::Number(sum_numbers(&text))
    } else {
        Answer::text(text.trim())
    }
}

fn is_truthy(value: &serde_json::Value) -> bool {
    use serde_json::Value;
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn json_answer(bytes: &[u8]) -> Answer {
    let text = String::from_utf8_lossy(bytes);
    match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(value) if is_truthy(&value) => Answer::Json(value),
        _ => Answer::Text(truncate_chars(&text, JSON_TEXT_FALLBACK_CHARS)),
    }
}

pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext {
        "png" => "image/png",
        "jpg" => "image/jpg",
        "jpeg" => "image/jpeg",
        "pdf" => "application/pdf",
        "csv" => "text/csv",
        _ => "application/octet-stream",
    }
}

pub fn data_uri(bytes: &[u8], mime: &str) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}
