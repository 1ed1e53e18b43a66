use serde_json::Value;
use tracing::warn;

use crate::types::{Answer, MAX_PAYLOAD_BYTES, SubmissionPayload, TRUNCATED_ANSWER_CHARS};

/// First `max_chars` characters of `s`, never splitting a code point.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// Keep the serialised payload under the submission ceiling.
///
/// One truncation pass only: an oversized text answer (a JSON string
/// included) is cut to `TRUNCATED_ANSWER_CHARS`. Other answers are left
/// alone, and a serialisation failure returns the payload unchanged.
pub fn enforce_limit(mut payload: SubmissionPayload) -> SubmissionPayload {
    let size = match serde_json::to_vec(&payload) {
        Ok(bytes) => bytes.len(),
        Err(_) => return payload,
    };
    if size <= MAX_PAYLOAD_BYTES {
        return payload;
    }

    payload.answer = match payload.answer {
        Answer::Text(text) => {
            warn!(size, "payload over limit, truncating answer");
            Answer::Text(truncate_chars(&text, TRUNCATED_ANSWER_CHARS))
        }
        Answer::Json(Value::String(text)) => {
            warn!(size, "payload over limit, truncating JSON string answer");
            Answer::Json(Value::String(truncate_chars(&text, TRUNCATED_ANSWER_CHARS)))
        }
        other => {
            warn!(size, "payload over limit but answer is not text; sending as-is");
            other
        }
    };
    payload
}
