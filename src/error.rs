use std::fmt;

use thiserror::Error;

/// Transport-level failure of a page fetch, download or submission.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("browser error: {0}")]
    Browser(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout(e.to_string())
        } else if let Some(status) = e.status() {
            FetchError::Status(status.as_u16())
        } else {
            FetchError::Transport(e.to_string())
        }
    }
}

/// Failure to turn evidence into an answer. Always recovered by the driver.
#[derive(Error, Debug)]
pub enum ComputeError {
    #[error("CSV parse error: {0}")]
    Csv(String),

    #[error("spreadsheet error: {0}")]
    Excel(String),

    #[error("PDF error: {0}")]
    Pdf(String),

    #[error("chart error: {0}")]
    Chart(String),

    #[error("table has no header row")]
    EmptyTable,
}

/// Why a chain run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    NotEnoughTime,
    DeadlineReached,
    CycleDetected(String),
    FetchFailed(String),
    NoSubmitUrl,
    SubmitFailed(String),
    SubmitRejected(u16),
    NoNextUrl,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::NotEnoughTime => write!(f, "not enough time left to start"),
            StopReason::DeadlineReached => write!(f, "deadline margin reached"),
            StopReason::CycleDetected(url) => write!(f, "loop detected at {url}"),
            StopReason::FetchFailed(msg) => write!(f, "page load failed: {msg}"),
            StopReason::NoSubmitUrl => write!(f, "no submit URL found"),
            StopReason::SubmitFailed(msg) => write!(f, "submit error: {msg}"),
            StopReason::SubmitRejected(status) => write!(f, "submission rejected (HTTP {status})"),
            StopReason::NoNextUrl => write!(f, "quiz ended"),
        }
    }
}
