use std::time::Duration;

pub const DEFAULT_MAX_SECONDS: u64 = 180;
pub const DEFAULT_BIND: &str = "127.0.0.1:3000";

/// Refuse to start a run with this little time left.
pub const START_REFUSAL: Duration = Duration::from_secs(3);
/// Stop starting new steps once whole seconds left drop to this.
pub const LOOP_MARGIN_SECS: u64 = 6;

/// Per-call network budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub page: Duration,
    pub file: Duration,
    pub secondary: Duration,
    pub submit: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            page: Duration::from_secs(45),
            file: Duration::from_secs(30),
            secondary: Duration::from_secs(30),
            submit: Duration::from_secs(25),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum FetchMode {
    #[default]
    Http,
    Browser,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub email: String,
    pub secret: String,
    pub max_seconds: u64,
    pub fetch_mode: FetchMode,
    pub bind: String,
    pub timeouts: Timeouts,
}

impl Config {
    pub fn new(email: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            secret: secret.into(),
            max_seconds: DEFAULT_MAX_SECONDS,
            fetch_mode: FetchMode::default(),
            bind: DEFAULT_BIND.to_string(),
            timeouts: Timeouts::default(),
        }
    }

    pub fn with_max_seconds(mut self, max_seconds: u64) -> Self {
        self.max_seconds = max_seconds;
        self
    }

    pub fn with_fetch_mode(mut self, mode: FetchMode) -> Self {
        self.fetch_mode = mode;
        self
    }

    pub fn with_bind(mut self, bind: impl Into<String>) -> Self {
        self.bind = bind.into();
        self
    }
}
