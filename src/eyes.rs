//! URL spotting and embedded-payload decoding over page text. Everything here
//! is a pure function of its inputs.

use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use regex::Regex;
use url::Url;

/// Downloadable evidence, by path extension.
pub const FILE_EXTENSIONS: [&str; 9] = ["csv", "pdf", "xlsx", "xls", "json", "wav", "mp3", "m4a", "ogg"];
pub const AUDIO_EXTENSIONS: [&str; 4] = ["mp3", "wav", "m4a", "ogg"];

const TRAILING_PUNCT: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '}'];

/// Compile a pattern literal.
pub(crate) fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static regex is valid")
}

static ABS_SUBMIT: LazyLock<Regex> =
    LazyLock::new(|| re(r#"(?i)https?://[^\s'"<>]+/submit[^\s'"<>]*"#));
static ABS_ENDPOINT: LazyLock<Regex> =
    LazyLock::new(|| re(r#"(?i)https?://[^\s'"<>]+/(?:submit|post|answer|api)[^\s'"<>]*"#));
static QUOTED_RELATIVE_SUBMIT: LazyLock<Regex> =
    LazyLock::new(|| re(r#"'(/submit[^\s'"<>]*)'|"(/submit[^\s'"<>]*)""#));
static JSON_SUBMIT_FIELD: LazyLock<Regex> =
    LazyLock::new(|| re(r#"(?i)"submit_url"\s*:\s*"([^"]+)""#));
static SCRIPT_SUBMIT_VAR: LazyLock<Regex> = LazyLock::new(|| {
    re(r#"(?:var|let|const)\s+(?:submitUrl|submit_url|SUBMIT_URL)\s*=\s*['"]([^'"]+)['"]"#)
});
static ABS_URL: LazyLock<Regex> = LazyLock::new(|| re(r#"https?://[^\s'"<>]+"#));
static SCRAPE_TARGET: LazyLock<Regex> =
    LazyLock::new(|| re(r#"(?i)scrape\s+((?:https?://|/)[^\s'"<>]+)"#));
static DECODE_CALL: LazyLock<Regex> =
    LazyLock::new(|| re(r#"atob\(\s*(?:`([^`]+)`|'([^']+)'|"([^"]+)")\s*\)"#));

fn clean(url: &str) -> &str {
    url.trim_end_matches(TRAILING_PUNCT)
}

fn resolve(base: &str, candidate: &str) -> Option<String> {
    Url::parse(base)
        .and_then(|b| b.join(candidate))
        .ok()
        .map(|u| u.to_string())
}

/// `host[:port]` of a URL, the way it appears after `scheme://`.
fn authority(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

/// Locate the answer submission endpoint.
///
/// Rules run strongest first: absolute `/submit` links, absolute
/// `/submit|/post|/answer|/api` links, a quoted relative `/submit...` path, a
/// `"submit_url": "..."` field, a script variable, and finally any same-host
/// URL containing "submit". Relative results are resolved against
/// `current_url`.
pub fn find_submit_url(content: &str, current_url: &str) -> Option<String> {
    if let Some(m) = ABS_SUBMIT.find(content) {
        return Some(clean(m.as_str()).to_string());
    }
    if let Some(m) = ABS_ENDPOINT.find(content) {
        return Some(clean(m.as_str()).to_string());
    }

    let relative = QUOTED_RELATIVE_SUBMIT
        .captures(content)
        .and_then(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str())
        .into_iter()
        .chain(JSON_SUBMIT_FIELD.captures(content).and_then(|c| c.get(1)).map(|m| m.as_str()))
        .chain(SCRIPT_SUBMIT_VAR.captures(content).and_then(|c| c.get(1)).map(|m| m.as_str()));
    for candidate in relative {
        if let Some(url) = resolve(current_url, candidate) {
            return Some(url);
        }
    }

    let authority = authority(current_url)?;
    let same_host = Regex::new(&format!(r#"https?://{}[^\s'"<>]+"#, regex::escape(&authority))).ok()?;
    same_host
        .find_iter(content)
        .map(|m| clean(m.as_str()))
        .find(|u| u.to_lowercase().contains("submit"))
        .map(str::to_string)
}

/// Lower-cased path extension of an absolute URL.
pub fn url_extension(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    let (_, ext) = last.rsplit_once('.')?;
    Some(ext.to_lowercase())
}

fn first_url_with_extension(content: &str, extensions: &[&str]) -> Option<String> {
    ABS_URL
        .find_iter(content)
        .map(|m| clean(m.as_str()))
        .find(|u| url_extension(u).is_some_and(|ext| extensions.contains(&ext.as_str())))
        .map(str::to_string)
}

/// First absolute URL pointing at a downloadable data or media file.
pub fn find_file_url(content: &str) -> Option<String> {
    first_url_with_extension(content, &FILE_EXTENSIONS)
}

/// First absolute URL pointing at an audio clip.
pub fn find_audio_url(content: &str) -> Option<String> {
    first_url_with_extension(content, &AUDIO_EXTENSIONS)
}

/// "Scrape /path" (or an absolute URL) in the visible text.
pub fn find_scrape_url(page_text: &str, current_url: &str) -> Option<String> {
    let target = SCRAPE_TARGET.captures(page_text)?.get(1)?.as_str();
    resolve(current_url, clean(target))
}

/// Decode every base64 payload passed to `atob(...)` in script text.
/// Payloads that are not base64 are skipped; invalid UTF-8 is dropped.
pub fn decode_embedded_chunks(script_text: &str) -> Vec<String> {
    DECODE_CALL
        .captures_iter(script_text)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)).or_else(|| c.get(3)))
        .filter_map(|m| {
            let compact: String = m.as_str().chars().filter(|c| !c.is_whitespace()).collect();
            let bytes = STANDARD
                .decode(&compact)
                .or_else(|_| STANDARD_NO_PAD.decode(compact.trim_end_matches('=')))
                .ok()?;
            Some(String::from_utf8_lossy(&bytes).replace('\u{FFFD}', ""))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const HERE: &str = "https://quiz.example/q/1";

    #[test]
    fn absolute_submit_link_wins() {
        let content = "Post to https://other.example/api/v1 or https://quiz.example/submit.";
        assert_eq!(
            find_submit_url(content, HERE).as_deref(),
            Some("https://quiz.example/submit")
        );
    }

    #[test]
    fn generic_endpoint_link() {
        let content = "send it to https://quiz.example/answer?id=3 now";
        assert_eq!(
            find_submit_url(content, HERE).as_deref(),
            Some("https://quiz.example/answer?id=3")
        );
    }

    #[test]
    fn quoted_relative_submit_is_resolved() {
        let content = r#"<form data-target='/submit/42'>"#;
        assert_eq!(
            find_submit_url(content, HERE).as_deref(),
            Some("https://quiz.example/submit/42")
        );
        let content = r#"fetch("/submit")"#;
        assert_eq!(
            find_submit_url(content, HERE).as_deref(),
            Some("https://quiz.example/submit")
        );
    }

    #[test]
    fn mismatched_quotes_do_not_count() {
        assert_eq!(find_submit_url(r#"'/submit""#, HERE), None);
    }

    #[test]
    fn json_field_and_script_variable() {
        let json = r#"{"submit_url": "next/answer-box"}"#;
        assert_eq!(
            find_submit_url(json, HERE).as_deref(),
            Some("https://quiz.example/q/next/answer-box")
        );
        let js = r#"const submitUrl = "/receive";"#;
        assert_eq!(
            find_submit_url(js, HERE).as_deref(),
            Some("https://quiz.example/receive")
        );
    }

    #[test]
    fn same_host_submit_substring_is_last_resort() {
        let content = "see https://elsewhere.example/resubmit and https://quiz.example/quiz-submit-here";
        assert_eq!(
            find_submit_url(content, HERE).as_deref(),
            Some("https://quiz.example/quiz-submit-here")
        );
        assert_eq!(find_submit_url("nothing to see", HERE), None);
    }

    #[test]
    fn submit_detection_is_repeatable() {
        let content = "x https://quiz.example/submit y";
        assert_eq!(find_submit_url(content, HERE), find_submit_url(content, HERE));
    }

    #[test]
    fn file_url_by_extension() {
        let content = "Get https://cdn.example/report.PDF, or https://cdn.example/data.csv?v=2";
        assert_eq!(
            find_file_url(content).as_deref(),
            Some("https://cdn.example/report.PDF")
        );
        assert_eq!(
            find_file_url("only https://cdn.example/data.csv?v=2").as_deref(),
            Some("https://cdn.example/data.csv?v=2")
        );
        assert_eq!(find_file_url("https://cdn.example/data.csvx"), None);
        assert_eq!(url_extension("https://cdn.example/book.xlsx").as_deref(), Some("xlsx"));
    }

    #[test]
    fn audio_url_ignores_other_files() {
        let content = "https://cdn.example/a.csv https://cdn.example/clip.ogg";
        assert_eq!(
            find_audio_url(content).as_deref(),
            Some("https://cdn.example/clip.ogg")
        );
    }

    #[test]
    fn scrape_target_relative_and_absolute() {
        assert_eq!(
            find_scrape_url("Please SCRAPE /data/secret?x=1 to continue", HERE).as_deref(),
            Some("https://quiz.example/data/secret?x=1")
        );
        assert_eq!(
            find_scrape_url("scrape https://side.example/page", HERE).as_deref(),
            Some("https://side.example/page")
        );
        assert_eq!(find_scrape_url("scraped nothing", HERE), None);
    }

    #[test]
    fn decodes_atob_payloads_and_skips_garbage() {
        let script = "a = atob(`aGVs\nbG8=`); b = atob('d29ybGQ'); c = atob(`!!!`);";
        assert_eq!(decode_embedded_chunks(script), vec!["hello", "world"]);
    }

    #[test]
    fn decoded_invalid_utf8_is_dropped() {
        // 0x68 0x69 0xff -> "hi" plus an invalid byte.
        assert_eq!(decode_embedded_chunks("atob(\"aGn/\")"), vec!["hi"]);
    }
}
