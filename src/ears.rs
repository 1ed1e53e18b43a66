use async_trait::async_trait;
use tracing::debug;

/// Speech-to-text for audio evidence.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio_url: &str) -> Option<String>;
}

/// Transcription is not implemented; every clip yields no transcript.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTranscriber;

#[async_trait]
impl Transcriber for NoTranscriber {
    async fn transcribe(&self, audio_url: &str) -> Option<String> {
        debug!(url = audio_url, "audio transcription disabled");
        None
    }
}
