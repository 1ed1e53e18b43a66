use serde::{Deserialize, Serialize};

use crate::table::Table;

/// What a quiz page is asking the agent to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Sum,
    Count,
    Max,
    Min,
    Mean,
    PdfRead,
    Chart,
    DownloadReturnFile,
    ReturnText,
}

/// Structured intent classified from one page. Never merged across steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionIntent {
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cutoff: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

impl QuestionIntent {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            column: None,
            cutoff: None,
            page: None,
        }
    }

    pub fn with_column(mut self, column: Option<String>) -> Self {
        self.column = column;
        self
    }

    pub fn with_cutoff(mut self, cutoff: Option<f64>) -> Self {
        self.cutoff = cutoff;
        self
    }

    pub fn with_page(mut self, page: Option<u32>) -> Self {
        self.page = page;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabularFormat {
    Csv,
    /// xlsx and legacy xls, both read through calamine.
    Spreadsheet,
}

/// The data source an answer is computed from. Exactly one is active per step.
#[derive(Debug, Clone, PartialEq)]
pub enum Evidence {
    None,
    InlineText(String),
    Tabular { bytes: Vec<u8>, format: TabularFormat },
    Pdf(Vec<u8>),
    Json(Vec<u8>),
    /// Any other downloaded file; submitted as a data URI.
    Binary { bytes: Vec<u8>, ext: String },
    SecondaryText(String),
    Audio { url: String, transcript: String },
}

impl Evidence {
    /// Classify a downloaded file by its lower-cased extension.
    pub fn from_download(bytes: Vec<u8>, ext: &str) -> Self {
        match ext {
            "csv" => Evidence::Tabular {
                bytes,
                format: TabularFormat::Csv,
            },
            "xlsx" | "xls" => Evidence::Tabular {
                bytes,
                format: TabularFormat::Spreadsheet,
            },
            "pdf" => Evidence::Pdf(bytes),
            "json" => Evidence::Json(bytes),
            other => Evidence::Binary {
                bytes,
                ext: other.to_string(),
            },
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Evidence::None => "none",
            Evidence::InlineText(_) => "inline_text",
            Evidence::Tabular { .. } => "tabular",
            Evidence::Pdf(_) => "pdf",
            Evidence::Json(_) => "json",
            Evidence::Binary { .. } => "binary",
            Evidence::SecondaryText(_) => "secondary_text",
            Evidence::Audio { .. } => "audio",
        }
    }
}

/// A submitted answer value. Serialises as a bare JSON scalar/string.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Answer {
    Integer(i64),
    Number(f64),
    Text(String),
    Json(serde_json::Value),
}

impl Answer {
    pub fn text(s: impl Into<String>) -> Self {
        Answer::Text(s.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Answer::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Short human-readable rendering for logs and events.
    pub fn preview(&self, max_chars: usize) -> String {
        let raw = match self {
            Answer::Integer(n) => n.to_string(),
            Answer::Number(n) => n.to_string(),
            Answer::Text(s) => s.clone(),
            Answer::Json(v) => v.to_string(),
        };
        crate::guard::truncate_chars(&raw, max_chars)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionPayload {
    pub email: String,
    pub secret: String,
    pub url: String,
    pub answer: Answer,
}

/// The server's reply to a submission.
#[derive(Debug, Clone, PartialEq)]
pub struct TraversalResult {
    pub status: u16,
    pub next_url: Option<String>,
    pub body: String,
}

impl TraversalResult {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Build from a raw response. A non-success status or a body without a
    /// non-empty string `url` yields no next step.
    pub fn from_response(status: u16, body: String) -> Self {
        let next_url = if (200..300).contains(&status) {
            serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v.get("url").and_then(|u| u.as_str()).map(str::to_string))
                .filter(|u| !u.trim().is_empty())
        } else {
            None
        };
        Self {
            status,
            next_url,
            body,
        }
    }
}

/// Everything the agent pulled out of one fetched page.
#[derive(Debug, Clone, Default)]
pub struct PageContent {
    pub url: String,
    /// Visible text, newline-joined.
    pub visible: String,
    /// `<pre>` text plus decoded embedded chunks.
    pub auxiliary: String,
    pub script: String,
    /// Quoted attribute URLs (`href`, `src`, `action`).
    pub links: String,
    pub tables: Vec<Table>,
}

impl PageContent {
    /// Text the URL detectors search. Script text goes last so it only wins
    /// when nothing earlier matches.
    pub fn search_text(&self) -> String {
        [
            self.auxiliary.as_str(),
            self.visible.as_str(),
            self.links.as_str(),
            self.script.as_str(),
        ]
        .join("\n")
    }

    pub fn snippet(&self, max_chars: usize) -> String {
        crate::guard::truncate_chars(&self.visible, max_chars).replace('\n', " ")
    }
}

pub const MAX_PAYLOAD_BYTES: usize = 900_000;
pub const TRUNCATED_ANSWER_CHARS: usize = 200_000;
pub const PLAIN_TEXT_ANSWER_CHARS: usize = 800;
pub const SECONDARY_TEXT_CHARS: usize = 300;
pub const COMPUTE_FALLBACK_CHARS: usize = 600;
pub const JSON_TEXT_FALLBACK_CHARS: usize = 1000;
pub const NO_TABLE_SENTINEL: &str = "no-table";
