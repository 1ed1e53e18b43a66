use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use quiz_chain_agent::brain::IntentAdvisor;
use quiz_chain_agent::ears::Transcriber;
use quiz_chain_agent::hands::{AnswerSubmitter, PageFetcher};
use quiz_chain_agent::{
    Action, Answer, ChainDriver, ChainReport, Credentials, FetchError, QuestionIntent, RunContext,
    StopReason, SubmissionPayload, TraversalResult,
};

const Q1: &str = "https://quiz.example/q1";
const Q2: &str = "https://quiz.example/q2";
const SUBMIT: &str = "https://quiz.example/submit";

#[derive(Default)]
struct FakeWeb {
    pages: HashMap<String, (u16, String)>,
    files: HashMap<String, Vec<u8>>,
    fetched: Mutex<Vec<String>>,
    downloaded: Mutex<Vec<String>>,
}

impl FakeWeb {
    fn page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), (200, html.to_string()));
        self
    }

    fn status_page(mut self, url: &str, status: u16) -> Self {
        self.pages.insert(url.to_string(), (status, String::new()));
        self
    }

    fn file(mut self, url: &str, bytes: &[u8]) -> Self {
        self.files.insert(url.to_string(), bytes.to_vec());
        self
    }

    fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    fn downloaded(&self) -> Vec<String> {
        self.downloaded.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageFetcher for FakeWeb {
    async fn fetch(&self, url: &str, _timeout: Duration) -> Result<(u16, String), FetchError> {
        self.fetched.lock().unwrap().push(url.to_string());
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Transport(format!("no route to {url}")))
    }

    async fn fetch_bytes(&self, url: &str, _timeout: Duration) -> Result<Vec<u8>, FetchError> {
        self.downloaded.lock().unwrap().push(url.to_string());
        self.files.get(url).cloned().ok_or(FetchError::Status(404))
    }
}

/// Replies by the page URL in the payload; unknown pages end the quiz.
#[derive(Default)]
struct FakeServer {
    replies: HashMap<String, (u16, String)>,
    received: Mutex<Vec<(String, SubmissionPayload)>>,
}

impl FakeServer {
    fn next(mut self, page: &str, next_url: &str) -> Self {
        self.replies.insert(
            page.to_string(),
            (200, format!(r#"{{"correct":true,"url":"{next_url}"}}"#)),
        );
        self
    }

    fn reply(mut self, page: &str, status: u16, body: &str) -> Self {
        self.replies.insert(page.to_string(), (status, body.to_string()));
        self
    }

    fn received(&self) -> Vec<(String, SubmissionPayload)> {
        self.received.lock().unwrap().clone()
    }

    fn answers(&self) -> Vec<Answer> {
        self.received().into_iter().map(|(_, p)| p.answer).collect()
    }
}

#[async_trait]
impl AnswerSubmitter for FakeServer {
    async fn submit(
        &self,
        url: &str,
        payload: &SubmissionPayload,
        _timeout: Duration,
    ) -> Result<TraversalResult, FetchError> {
        self.received.lock().unwrap().push((url.to_string(), payload.clone()));
        let (status, body) = self
            .replies
            .get(&payload.url)
            .cloned()
            .unwrap_or((200, r#"{"correct":true,"url":null}"#.to_string()));
        Ok(TraversalResult::from_response(status, body))
    }
}

struct FixedTranscript(&'static str);

#[async_trait]
impl Transcriber for FixedTranscript {
    async fn transcribe(&self, _audio_url: &str) -> Option<String> {
        Some(self.0.to_string())
    }
}

struct AlwaysCount;

impl IntentAdvisor for AlwaysCount {
    fn advise(&self, _page_text: &str, _auxiliary_text: &str) -> Option<QuestionIntent> {
        Some(QuestionIntent::new(Action::Count))
    }
}

fn creds() -> Credentials {
    Credentials {
        email: "student@example.com".into(),
        secret: "s3cret".into(),
    }
}

async fn drive_with(driver: &ChainDriver, start: &str, max_seconds: u64) -> ChainReport {
    let ctx = RunContext::new(1, start);
    driver.drive(&ctx, start, &creds(), Instant::now(), max_seconds).await
}

async fn drive(web: &Arc<FakeWeb>, server: &Arc<FakeServer>) -> ChainReport {
    let driver = ChainDriver::new(web.clone(), server.clone());
    drive_with(&driver, Q1, 120).await
}

fn quiz_page(body: &str) -> String {
    format!("<html><body>{body}<p>Post your answer to {SUBMIT}</p></body></html>")
}

#[tokio::test]
async fn csv_sum_above_cutoff_is_submitted() {
    let web = Arc::new(
        FakeWeb::default()
            .page(
                Q1,
                &quiz_page(
                    r#"<p>Find the sum of the 'revenue' column where cutoff: 100</p>
                       <a href="https://cdn.example/data.csv">data</a>"#,
                ),
            )
            .file("https://cdn.example/data.csv", b"id,revenue\n1,50\n2,200\n3,150\n"),
    );
    let server = Arc::new(FakeServer::default());

    let report = drive(&web, &server).await;

    assert_eq!(report.stop, StopReason::NoNextUrl);
    assert_eq!(report.submissions, 1);
    let received = server.received();
    let (submit_url, payload) = &received[0];
    assert_eq!(submit_url, SUBMIT);
    assert_eq!(payload.email, "student@example.com");
    assert_eq!(payload.secret, "s3cret");
    assert_eq!(payload.url, Q1);
    assert_eq!(payload.answer, Answer::Number(350.0));
}

#[tokio::test]
async fn count_rows_without_file_counts_page_lines() {
    let web = Arc::new(FakeWeb::default().page(Q1, &quiz_page("<h1>Quiz</h1><p>Count the rows</p>")));
    let server = Arc::new(FakeServer::default());

    drive(&web, &server).await;

    // "Quiz", "Count the rows", "Post your answer to ..."
    assert_eq!(server.answers(), vec![Answer::Integer(3)]);
}

#[tokio::test]
async fn secret_code_beats_every_other_evidence() {
    let web = Arc::new(
        FakeWeb::default()
            .page(
                Q1,
                &quiz_page(
                    r#"<p>Scrape /hidden/code then give the sum of the value column</p>
                       <a href="https://cdn.example/data.csv">data</a>"#,
                ),
            )
            .page(
                "https://quiz.example/hidden/code",
                "<body><div>Secret Code: ABC123</div></body>",
            )
            .file("https://cdn.example/data.csv", b"value\n1\n2\n"),
    );
    let server = Arc::new(FakeServer::default());

    drive(&web, &server).await;

    assert_eq!(server.answers(), vec![Answer::text("ABC123")]);
    assert!(web.downloaded().is_empty());
}

#[tokio::test]
async fn failed_scrape_falls_through_to_file() {
    let web = Arc::new(
        FakeWeb::default()
            .page(
                Q1,
                &quiz_page(
                    r#"<p>Scrape /gone and report the sum of the value column</p>
                       <a href="https://cdn.example/data.csv">data</a>"#,
                ),
            )
            .file("https://cdn.example/data.csv", b"value\n1\n2\n"),
    );
    let server = Arc::new(FakeServer::default());

    let report = drive(&web, &server).await;

    assert_eq!(report.stop, StopReason::NoNextUrl);
    assert_eq!(server.answers(), vec![Answer::Number(3.0)]);
}

#[tokio::test]
async fn chain_follows_next_url_and_stops_on_cycle() {
    let web = Arc::new(
        FakeWeb::default()
            .page(Q1, &quiz_page("<p>first</p>"))
            .page(Q2, &quiz_page("<p>second</p>")),
    );
    let server = Arc::new(FakeServer::default().next(Q1, Q2).next(Q2, Q1));

    let report = drive(&web, &server).await;

    assert_eq!(report.stop, StopReason::CycleDetected(Q1.to_string()));
    assert_eq!(report.steps, 2);
    assert_eq!(report.submissions, 2);
    assert_eq!(web.fetched(), vec![Q1.to_string(), Q2.to_string()]);
}

#[tokio::test]
async fn null_next_url_ends_without_further_fetch() {
    let web = Arc::new(FakeWeb::default().page(Q1, &quiz_page("<p>hello</p>")));
    let server = Arc::new(FakeServer::default().reply(Q1, 200, r#"{"url": null}"#));

    let report = drive(&web, &server).await;

    assert_eq!(report.stop, StopReason::NoNextUrl);
    assert_eq!(web.fetched(), vec![Q1.to_string()]);
}

#[tokio::test]
async fn rejected_submission_ends_the_chain() {
    let web = Arc::new(FakeWeb::default().page(Q1, &quiz_page("<p>hello</p>")));
    let server = Arc::new(FakeServer::default().reply(Q1, 400, r#"{"url":"https://quiz.example/q2"}"#));

    let report = drive(&web, &server).await;

    assert_eq!(report.stop, StopReason::SubmitRejected(400));
    assert_eq!(report.submissions, 1);
    assert_eq!(web.fetched(), vec![Q1.to_string()]);
}

#[tokio::test]
async fn missing_submit_url_stops_before_submitting() {
    let web = Arc::new(FakeWeb::default().page(Q1, "<body><p>No way out.</p></body>"));
    let server = Arc::new(FakeServer::default());

    let report = drive(&web, &server).await;

    assert_eq!(report.stop, StopReason::NoSubmitUrl);
    assert_eq!(report.submissions, 0);
}

#[tokio::test]
async fn fetch_failures_end_the_chain() {
    let server = Arc::new(FakeServer::default());

    let unreachable = Arc::new(FakeWeb::default());
    let report = drive(&unreachable, &server).await;
    assert!(matches!(report.stop, StopReason::FetchFailed(_)));

    let not_found = Arc::new(FakeWeb::default().status_page(Q1, 404));
    let report = drive(&not_found, &server).await;
    assert_eq!(report.stop, StopReason::FetchFailed("HTTP status 404".into()));
    assert!(server.received().is_empty());
}

#[tokio::test]
async fn too_little_time_never_fetches() {
    let web = Arc::new(FakeWeb::default().page(Q1, &quiz_page("<p>hi</p>")));
    let server = Arc::new(FakeServer::default());
    let driver = ChainDriver::new(web.clone(), server.clone());

    let report = drive_with(&driver, Q1, 2).await;
    assert_eq!(report.stop, StopReason::NotEnoughTime);

    // Enough to start, but inside the per-step margin.
    let report = drive_with(&driver, Q1, 5).await;
    assert_eq!(report.stop, StopReason::DeadlineReached);
    assert_eq!(report.steps, 0);

    assert!(web.fetched().is_empty());
}

#[tokio::test]
async fn huge_budget_still_runs() {
    let web = Arc::new(FakeWeb::default().page(Q1, &quiz_page("<p>hi</p>")));
    let server = Arc::new(FakeServer::default());
    let driver = ChainDriver::new(web.clone(), server.clone());

    let report = drive_with(&driver, Q1, u64::MAX).await;

    assert_eq!(report.stop, StopReason::NoNextUrl);
    assert_eq!(report.submissions, 1);
}

#[tokio::test]
async fn elapsed_budget_stops_before_fetching() {
    let web = Arc::new(FakeWeb::default().page(Q1, &quiz_page("<p>hi</p>")));
    let server = Arc::new(FakeServer::default());
    let driver = ChainDriver::new(web.clone(), server.clone());
    let Some(started) = Instant::now().checked_sub(Duration::from_secs(100)) else {
        return;
    };

    let ctx = RunContext::new(7, Q1);
    let report = driver.drive(&ctx, Q1, &creds(), started, 105).await;

    assert_eq!(report.stop, StopReason::DeadlineReached);
    assert!(web.fetched().is_empty());
}

#[tokio::test]
async fn broken_spreadsheet_falls_back_to_page_text() {
    let web = Arc::new(
        FakeWeb::default()
            .page(
                Q1,
                &quiz_page(r#"<p>Sum of the total column</p><a href="https://cdn.example/book.xlsx">book</a>"#),
            )
            .file("https://cdn.example/book.xlsx", b"not really a workbook"),
    );
    let server = Arc::new(FakeServer::default());

    drive(&web, &server).await;

    let answers = server.answers();
    let text = answers[0].as_text().unwrap();
    assert!(text.starts_with("Sum of the total column"));
}

#[tokio::test]
async fn oversized_file_answer_is_truncated() {
    let big = vec![0u8; 1_000_000];
    let web = Arc::new(
        FakeWeb::default()
            .page(Q1, &quiz_page(r#"<a href="https://cdn.example/clip.wav">listen</a>"#))
            .file("https://cdn.example/clip.wav", &big),
    );
    let server = Arc::new(FakeServer::default());

    drive(&web, &server).await;

    let answers = server.answers();
    let text = answers[0].as_text().unwrap();
    assert!(text.starts_with("data:application/octet-stream;base64,"));
    assert_eq!(text.chars().count(), 200_000);
}

#[tokio::test]
async fn transcript_outranks_downloaded_file() {
    let web = Arc::new(
        FakeWeb::default()
            .page(Q1, &quiz_page(r#"<a href="https://cdn.example/clip.mp3">listen</a>"#))
            .file("https://cdn.example/clip.mp3", b"ID3"),
    );
    let server = Arc::new(FakeServer::default());
    let driver = ChainDriver::new(web.clone(), server.clone())
        .with_transcriber(Arc::new(FixedTranscript("  the answer is blue  ")));

    drive_with(&driver, Q1, 120).await;

    assert_eq!(server.answers(), vec![Answer::text("the answer is blue")]);
    assert!(web.downloaded().is_empty());
}

#[tokio::test]
async fn embedded_base64_question_is_understood() {
    // "Count the rows" in base64; the visible text carries the submit link.
    let web = Arc::new(FakeWeb::default().page(
        Q1,
        &quiz_page("<script>document.body.innerHTML = atob(`Q291bnQgdGhlIHJvd3M=`)</script><p>a</p>"),
    ));
    let server = Arc::new(FakeServer::default());

    drive(&web, &server).await;

    // Plain-text count over visible lines: "a" and the submit line.
    assert_eq!(server.answers(), vec![Answer::Integer(2)]);
}

#[tokio::test]
async fn advisor_fills_in_unclassified_questions() {
    let web = Arc::new(FakeWeb::default().page(Q1, &quiz_page("<p>How many lines are here?</p>")));
    let server = Arc::new(FakeServer::default());
    let driver = ChainDriver::new(web.clone(), server.clone()).with_advisor(Arc::new(AlwaysCount));

    drive_with(&driver, Q1, 120).await;

    assert_eq!(server.answers(), vec![Answer::Integer(2)]);
}
