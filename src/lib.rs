//! Autonomous walker for server-driven quiz chains: read each page, work out
//! what it asks, compute an answer from the evidence it points at, submit,
//! and follow the server to the next page before the deadline.

pub mod brain;
pub mod chain;
pub mod chart;
pub mod compute;
pub mod config;
pub mod dom;
pub mod ears;
pub mod error;
pub mod eyes;
pub mod face;
pub mod guard;
pub mod hands;
pub mod table;
pub mod types;

pub use chain::{ChainDriver, ChainReport, Credentials, RunContext};
pub use config::{Config, FetchMode, Timeouts};
pub use error::{ComputeError, FetchError, StopReason};
pub use types::{Action, Answer, Evidence, QuestionIntent, SubmissionPayload, TraversalResult};
