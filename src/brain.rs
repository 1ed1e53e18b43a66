use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::eyes::re;
use crate::types::{Action, QuestionIntent};

static CUTOFF: LazyLock<Regex> = LazyLock::new(|| re(r"cutoff[:\s]+([0-9]+(?:\.[0-9]+)?)"));
static SUM_COLUMN: LazyLock<Regex> =
    LazyLock::new(|| re(r#"sum of the\s+['"]?([a-z0-9 _-]+)['"]?\s+column"#));
static MAX_COLUMN: LazyLock<Regex> =
    LazyLock::new(|| re(r#"max(?:imum)? of the\s+['"]?([a-z0-9 _-]+)['"]?\s+column"#));
static MEAN_COLUMN: LazyLock<Regex> =
    LazyLock::new(|| re(r#"(?:mean|average) of the\s+['"]?([a-z0-9 _-]+)['"]?\s+column"#));
static PAGE_NUMBER: LazyLock<Regex> = LazyLock::new(|| re(r"page\s+([0-9]+)"));

/// One entry of the decision list: when `applies` holds on the lower-cased
/// text, `build` produces the intent and evaluation stops.
struct Rule {
    name: &'static str,
    applies: fn(&str) -> bool,
    build: fn(&str) -> QuestionIntent,
}

/// Evaluated top to bottom; the first applicable rule wins. The order is part
/// of the behaviour on ambiguous text and must not change.
const RULES: &[Rule] = &[
    Rule {
        name: "sum",
        applies: |t| t.contains("sum of the") && t.contains("column"),
        build: |t| QuestionIntent::new(Action::Sum).with_column(capture_column(&SUM_COLUMN, t)),
    },
    Rule {
        name: "count",
        applies: |t| t.contains("count") && t.contains("rows"),
        build: |_| QuestionIntent::new(Action::Count),
    },
    Rule {
        name: "max",
        applies: |t| (t.contains("max") || t.contains("maximum")) && t.contains("column"),
        build: |t| QuestionIntent::new(Action::Max).with_column(capture_column(&MAX_COLUMN, t)),
    },
    Rule {
        name: "mean",
        applies: |t| t.contains("mean") || t.contains("average"),
        build: |t| QuestionIntent::new(Action::Mean).with_column(capture_column(&MEAN_COLUMN, t)),
    },
    Rule {
        name: "pdf_read",
        applies: |t| t.contains("page") && t.contains("pdf"),
        build: |t| QuestionIntent::new(Action::PdfRead).with_page(capture_page(t)),
    },
    Rule {
        name: "chart",
        applies: |t| t.contains("chart") || t.contains("plot"),
        build: |_| QuestionIntent::new(Action::Chart),
    },
    Rule {
        name: "download_return_file",
        applies: |t| t.contains("download") || t.contains("file") || t.contains("csv"),
        build: |_| QuestionIntent::new(Action::DownloadReturnFile),
    },
];

fn capture_column(pattern: &Regex, text: &str) -> Option<String> {
    pattern
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|c| !c.is_empty())
}

fn capture_page(text: &str) -> Option<u32> {
    PAGE_NUMBER
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .filter(|p| *p > 0)
}

fn capture_cutoff(text: &str) -> Option<f64> {
    CUTOFF
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

/// Classify what a page is asking for from its auxiliary and visible text.
pub fn classify(page_text: &str, auxiliary_text: &str) -> QuestionIntent {
    let text = format!("{auxiliary_text}\n{page_text}").to_lowercase();
    let cutoff = capture_cutoff(&text);

    for rule in RULES {
        if (rule.applies)(&text) {
            let intent = (rule.build)(&text).with_cutoff(cutoff);
            debug!(rule = rule.name, ?intent, "classified question");
            return intent;
        }
    }
    QuestionIntent::new(Action::ReturnText)
}

/// Second opinion consulted when classification falls through to
/// `return_text`. A returned intent replaces the classified one.
pub trait IntentAdvisor: Send + Sync {
    fn advise(&self, page_text: &str, auxiliary_text: &str) -> Option<QuestionIntent>;
}

/// The free-text fallback is disabled; it never has an opinion.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAdvisor;

impl IntentAdvisor for NoAdvisor {
    fn advise(&self, _page_text: &str, _auxiliary_text: &str) -> Option<QuestionIntent> {
        None
    }
}

/// Classify, then let the advisor override a `return_text` result.
pub fn decide(page_text: &str, auxiliary_text: &str, advisor: &dyn IntentAdvisor) -> QuestionIntent {
    let intent = classify(page_text, auxiliary_text);
    if intent.action != Action::ReturnText {
        return intent;
    }
    match advisor.advise(page_text, auxiliary_text) {
        Some(advised) => {
            debug!(?advised, "advisor replaced return_text intent");
            advised
        }
        None => intent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_with_column_and_cutoff() {
        let i = classify("Find the sum of the 'revenue' column where cutoff: 100", "");
        assert_eq!(i.action, Action::Sum);
        assert_eq!(i.column.as_deref(), Some("revenue"));
        assert_eq!(i.cutoff, Some(100.0));
    }

    #[test]
    fn captured_column_is_trimmed() {
        let i = classify("What is the SUM OF THE  unit price  column?", "");
        assert_eq!(i.column.as_deref(), Some("unit price"));
    }

    #[test]
    fn sum_without_capturable_column() {
        let i = classify("Give the sum of the values; see column B", "");
        assert_eq!(i.action, Action::Sum);
        assert_eq!(i.column, None);
    }

    #[test]
    fn count_rows() {
        let i = classify("Count the rows", "");
        assert_eq!(i, QuestionIntent::new(Action::Count));
    }

    #[test]
    fn earlier_rule_wins_on_ambiguous_text() {
        // Matches count, max, mean and download; count is listed first.
        let i = classify("Count rows whose maximum column average is in the csv file", "");
        assert_eq!(i.action, Action::Count);
    }

    #[test]
    fn max_needs_column_word() {
        let i = classify("What is the maximum of the score column?", "");
        assert_eq!(i.action, Action::Max);
        assert_eq!(i.column.as_deref(), Some("score"));
        assert_eq!(classify("max out", "").action, Action::ReturnText);
    }

    #[test]
    fn mean_without_column_phrase() {
        let i = classify("Report the average.", "");
        assert_eq!(i.action, Action::Mean);
        assert_eq!(i.column, None);
        let i = classify("the mean of the \"temp\" column", "");
        assert_eq!(i.column.as_deref(), Some("temp"));
    }

    #[test]
    fn pdf_page() {
        let i = classify("Open the PDF and read page 2", "");
        assert_eq!(i.action, Action::PdfRead);
        assert_eq!(i.page, Some(2));
        assert_eq!(classify("pdf page 0", "").page, None);
    }

    #[test]
    fn chart_download_and_default() {
        assert_eq!(classify("Plot this", "").action, Action::Chart);
        assert_eq!(classify("Download it", "").action, Action::DownloadReturnFile);
        assert_eq!(classify("Hello there", "").action, Action::ReturnText);
    }

    #[test]
    fn cutoff_rides_along_and_accepts_decimals() {
        let i = classify("download the file", "Cutoff: 12.5");
        assert_eq!(i.action, Action::DownloadReturnFile);
        assert_eq!(i.cutoff, Some(12.5));
    }

    #[test]
    fn auxiliary_text_is_classified() {
        let i = classify("", "Sum of the amount column");
        assert_eq!(i.action, Action::Sum);
        assert_eq!(i.column.as_deref(), Some("amount"));
    }

    struct Fixed(QuestionIntent);

    impl IntentAdvisor for Fixed {
        fn advise(&self, _: &str, _: &str) -> Option<QuestionIntent> {
            Some(self.0.clone())
        }
    }

    #[test]
    fn advisor_only_consulted_for_return_text() {
        let advised = QuestionIntent::new(Action::Chart);
        let advisor = Fixed(advised.clone());
        assert_eq!(decide("hello", "", &advisor), advised);
        assert_eq!(decide("count the rows", "", &advisor).action, Action::Count);
        assert_eq!(decide("hello", "", &NoAdvisor).action, Action::ReturnText);
    }
}
