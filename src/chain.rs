//! The traversal state machine: fetch, extract, classify, acquire evidence,
//! compute, guard, submit, follow.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

use crate::brain::{self, IntentAdvisor, NoAdvisor};
use crate::chart::{BarChartRenderer, ChartRenderer};
use crate::compute::{self, AnswerComputer};
use crate::config::{Config, FetchMode, LOOP_MARGIN_SECS, START_REFUSAL, Timeouts};
use crate::dom;
use crate::ears::{NoTranscriber, Transcriber};
use crate::error::StopReason;
use crate::eyes;
use crate::face::AgentEvent;
use crate::guard::{self, truncate_chars};
use crate::hands::{AnswerSubmitter, BrowserFetcher, HttpClient, PageFetcher};
use crate::types::{Answer, COMPUTE_FALLBACK_CHARS, Evidence, PageContent, SubmissionPayload};

const SNIPPET_CHARS: usize = 300;
const RESPONSE_LOG_CHARS: usize = 1000;
const EVENT_PREVIEW_CHARS: usize = 120;
const MAX_BUDGET: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPhase {
    Fetching,
    Extracting,
    AcquiringEvidence,
    Computing,
    Submitting,
}

impl fmt::Display for StepPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepPhase::Fetching => "FETCHING",
            StepPhase::Extracting => "EXTRACTING",
            StepPhase::AcquiringEvidence => "ACQUIRING_EVIDENCE",
            StepPhase::Computing => "COMPUTING",
            StepPhase::Submitting => "SUBMITTING",
        };
        f.write_str(s)
    }
}

/// Where a step's evidence may come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidenceSource {
    SecondaryPage,
    AudioTranscript,
    DownloadedFile,
    PageText,
}

/// Checked once per step, in this order; the first source that yields
/// evidence is used and the rest are not tried.
pub const EVIDENCE_PRECEDENCE: [EvidenceSource; 4] = [
    EvidenceSource::SecondaryPage,
    EvidenceSource::AudioTranscript,
    EvidenceSource::DownloadedFile,
    EvidenceSource::PageText,
];

/// Per-run logging span and event sink.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: u64,
    pub span: Span,
    events: Option<broadcast::Sender<AgentEvent>>,
}

impl RunContext {
    pub fn new(run_id: u64, start_url: &str) -> Self {
        Self {
            run_id,
            span: info_span!("chain", run = run_id, start = %start_url),
            events: None,
        }
    }

    pub fn with_events(mut self, events: broadcast::Sender<AgentEvent>) -> Self {
        self.events = Some(events);
        self
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub secret: String,
}

/// Owned by one run; only `visited` grows and `current_url` moves.
#[derive(Debug)]
struct ChainState {
    current_url: String,
    visited: HashSet<String>,
    deadline: Instant,
}

impl ChainState {
    fn new(start_url: &str, deadline: Instant) -> Self {
        Self {
            current_url: start_url.to_string(),
            visited: HashSet::new(),
            deadline,
        }
    }

    fn time_left_secs(&self) -> u64 {
        self.deadline.saturating_duration_since(Instant::now()).as_secs()
    }

    /// Record the current URL; false when it was already visited.
    fn enter_current(&mut self) -> bool {
        self.visited.insert(self.current_url.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReport {
    /// Pages whose processing began.
    pub steps: usize,
    pub submissions: usize,
    pub stop: StopReason,
}

pub struct ChainDriver {
    fetcher: Arc<dyn PageFetcher>,
    submitter: Arc<dyn AnswerSubmitter>,
    transcriber: Arc<dyn Transcriber>,
    advisor: Arc<dyn IntentAdvisor>,
    computer: AnswerComputer,
    timeouts: Timeouts,
}

impl ChainDriver {
    pub fn new(fetcher: Arc<dyn PageFetcher>, submitter: Arc<dyn AnswerSubmitter>) -> Self {
        Self {
            fetcher,
            submitter,
            transcriber: Arc::new(NoTranscriber),
            advisor: Arc::new(NoAdvisor),
            computer: AnswerComputer::new(Arc::new(BarChartRenderer)),
            timeouts: Timeouts::default(),
        }
    }

    /// Driver wired to real HTTP (and Chrome, in browser mode).
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let http = HttpClient::new();
        let fetcher: Arc<dyn PageFetcher> = match config.fetch_mode {
            FetchMode::Http => Arc::new(http.clone()),
            FetchMode::Browser => Arc::new(BrowserFetcher::launch(http.clone())?),
        };
        Ok(Self::new(fetcher, Arc::new(http)).with_timeouts(config.timeouts))
    }

    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = transcriber;
        self
    }

    pub fn with_advisor(mut self, advisor: Arc<dyn IntentAdvisor>) -> Self {
        self.advisor = advisor;
        self
    }

    pub fn with_chart_renderer(mut self, charts: Arc<dyn ChartRenderer>) -> Self {
        self.computer = AnswerComputer::new(charts);
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Walk the chain from `start_url` until a stop condition. Outcomes are
    /// observable only through logs, events and the submissions made.
    pub async fn run(
        &self,
        ctx: &RunContext,
        start_url: &str,
        email: &str,
        secret: &str,
        start_time: Instant,
        max_seconds: u64,
    ) {
        let creds = Credentials {
            email: email.to_string(),
            secret: secret.to_string(),
        };
        self.drive(ctx, start_url, &creds, start_time, max_seconds).await;
    }

    /// Same as [`run`](Self::run) but returns what happened.
    pub async fn drive(
        &self,
        ctx: &RunContext,
        start_url: &str,
        creds: &Credentials,
        start_time: Instant,
        max_seconds: u64,
    ) -> ChainReport {
        self.drive_inner(ctx, start_url, creds, start_time, max_seconds)
            .instrument(ctx.span.clone())
            .await
    }

    async fn drive_inner(
        &self,
        ctx: &RunContext,
        start_url: &str,
        creds: &Credentials,
        start_time: Instant,
        max_seconds: u64,
    ) -> ChainReport {
        // Budgets past what `Instant` can represent are clamped to about a century.
        let deadline = start_time
            .checked_add(Duration::from_secs(max_seconds))
            .or_else(|| start_time.checked_add(MAX_BUDGET))
            .unwrap_or(start_time);
        let mut report = ChainReport {
            steps: 0,
            submissions: 0,
            stop: StopReason::NotEnoughTime,
        };

        if deadline.saturating_duration_since(Instant::now()) <= START_REFUSAL {
            warn!("Not enough time left to start solver");
            ctx.emit(AgentEvent::ChainFinished {
                reason: report.stop.to_string(),
            });
            return report;
        }

        let mut state = ChainState::new(start_url, deadline);
        info!(url = start_url, "Starting solver chain");

        let stop = loop {
            if state.time_left_secs() <= LOOP_MARGIN_SECS {
                break StopReason::DeadlineReached;
            }
            if !state.enter_current() {
                warn!(url = %state.current_url, "Loop detected");
                break StopReason::CycleDetected(state.current_url.clone());
            }

            report.steps += 1;
            ctx.emit(AgentEvent::StepStarted {
                number: report.steps,
                url: state.current_url.clone(),
            });

            match self.step(ctx, &state.current_url, creds, &mut report).await {
                Ok(next_url) => state.current_url = next_url,
                Err(reason) => break reason,
            }
        };

        match &stop {
            StopReason::NoNextUrl => info!("Quiz ended"),
            other => {
                warn!(reason = %other, "chain stopped");
                ctx.emit(AgentEvent::StepError {
                    message: other.to_string(),
                });
            }
        }
        info!(time_left = state.time_left_secs(), submissions = report.submissions, "Solver finished");
        ctx.emit(AgentEvent::ChainFinished {
            reason: stop.to_string(),
        });

        report.stop = stop;
        report
    }

    /// One chain step. `Ok` carries the next URL to visit.
    async fn step(
        &self,
        ctx: &RunContext,
        url: &str,
        creds: &Credentials,
        report: &mut ChainReport,
    ) -> Result<String, StopReason> {
        debug!(phase = %StepPhase::Fetching, url);
        let (status, html) = self
            .fetcher
            .fetch(url, self.timeouts.page)
            .await
            .map_err(|e| {
                error!(error = %e, "Page load failed");
                StopReason::FetchFailed(e.to_string())
            })?;
        if !(200..300).contains(&status) {
            error!(status, "Page load failed");
            return Err(StopReason::FetchFailed(format!("HTTP status {status}")));
        }

        debug!(phase = %StepPhase::Extracting);
        let page = read_page(url, &html);
        info!(snippet = %page.snippet(SNIPPET_CHARS), "Page snippet");

        let submit_url = eyes::find_submit_url(&page.search_text(), url).ok_or_else(|| {
            error!("No submit URL found");
            StopReason::NoSubmitUrl
        })?;
        info!(submit_url = %submit_url, "Submit URL");

        let intent = brain::decide(&page.visible, &page.auxiliary, self.advisor.as_ref());
        info!(?intent, "Question intent");

        debug!(phase = %StepPhase::AcquiringEvidence);
        let evidence = self.acquire_evidence(&page).await;

        debug!(phase = %StepPhase::Computing, evidence = evidence.kind());
        let answer = match self.computer.compute(&evidence, &intent, &page) {
            Ok(answer) => answer,
            Err(e) => {
                error!(error = %e, "Error computing answer");
                Answer::Text(truncate_chars(page.visible.trim(), COMPUTE_FALLBACK_CHARS))
            }
        };

        debug!(phase = %StepPhase::Submitting);
        let payload = guard::enforce_limit(SubmissionPayload {
            email: creds.email.clone(),
            secret: creds.secret.clone(),
            url: url.to_string(),
            answer,
        });

        let result = self
            .submitter
            .submit(&submit_url, &payload, self.timeouts.submit)
            .await
            .map_err(|e| {
                error!(error = %e, "Submit error");
                StopReason::SubmitFailed(e.to_string())
            })?;
        report.submissions += 1;
        info!(status = result.status, "Submit HTTP");
        info!(body = %truncate_chars(&result.body, RESPONSE_LOG_CHARS), "Submit text");
        ctx.emit(AgentEvent::Answered {
            number: report.steps,
            submit_url: submit_url.clone(),
            answer: payload.answer.preview(EVENT_PREVIEW_CHARS),
        });

        if !result.is_success() {
            return Err(StopReason::SubmitRejected(result.status));
        }
        result.next_url.ok_or(StopReason::NoNextUrl)
    }

    async fn acquire_evidence(&self, page: &PageContent) -> Evidence {
        let content = page.search_text();
        for source in EVIDENCE_PRECEDENCE {
            if let Some(evidence) = self.acquire(source, page, &content).await {
                info!(source = ?source, kind = evidence.kind(), "Evidence selected");
                return evidence;
            }
        }
        Evidence::None
    }

    async fn acquire(&self, source: EvidenceSource, page: &PageContent, content: &str) -> Option<Evidence> {
        match source {
            EvidenceSource::SecondaryPage => {
                let url = eyes::find_scrape_url(&page.visible, &page.url)?;
                self.scrape_secondary_page(&url).await
            }
            EvidenceSource::AudioTranscript => {
                let url = eyes::find_audio_url(content)?;
                let transcript = self.transcriber.transcribe(&url).await?;
                if transcript.trim().is_empty() {
                    return None;
                }
                Some(Evidence::Audio { url, transcript })
            }
            EvidenceSource::DownloadedFile => {
                let url = eyes::find_file_url(content)?;
                let ext = eyes::url_extension(&url)?;
                match self.fetcher.fetch_bytes(&url, self.timeouts.file).await {
                    Ok(bytes) if !bytes.is_empty() => {
                        info!(ext = %ext, bytes = bytes.len(), "Downloaded file");
                        Some(Evidence::from_download(bytes, &ext))
                    }
                    Ok(_) => {
                        warn!(url = %url, "Downloaded file is empty");
                        None
                    }
                    Err(e) => {
                        error!(url = %url, error = %e, "File download error");
                        None
                    }
                }
            }
            EvidenceSource::PageText => Some(Evidence::InlineText(page.visible.clone())),
        }
    }

    async fn scrape_secondary_page(&self, url: &str) -> Option<Evidence> {
        let html = match self.fetcher.fetch(url, self.timeouts.secondary).await {
            Ok((status, html)) if (200..300).contains(&status) => html,
            Ok((status, _)) => {
                error!(url, status, "Scrape failed");
                return None;
            }
            Err(e) => {
                error!(url, error = %e, "Scrape failed");
                return None;
            }
        };
        let text = dom::visible_text_of(&html);
        if compute::secondary_answer(&text).is_empty() {
            return None;
        }
        Some(Evidence::SecondaryText(text))
    }
}

/// Build every text view of a fetched page. Decoded `atob` chunks join the
/// auxiliary text.
pub fn read_page(url: &str, html: &str) -> PageContent {
    let markup = dom::extract_text(html);
    let chunks = eyes::decode_embedded_chunks(&markup.script);
    let auxiliary = if chunks.is_empty() {
        markup.pre
    } else {
        format!("{}\n\n{}", markup.pre, chunks.join("\n\n"))
            .trim()
            .to_string()
    };
    PageContent {
        url: url.to_string(),
        visible: markup.visible,
        auxiliary,
        script: markup.script,
        links: markup.links,
        tables: dom::extract_tables(html),
    }
}
