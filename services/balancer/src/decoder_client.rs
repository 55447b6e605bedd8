//! The balancer's view of a decoder front-end (spec §E "fans sentence-level
//! tasks out to decoder front-ends it proxies to"). The real deployment
//! proxies each task over the wire as a single-sentence `trans_job_request`
//! to a `decoder-frontend` process; no wire format for that balancer <->
//! decoder-frontend hop is specified, so this crate talks to an in-process
//! [`DecoderClient`] instead and a real network proxy is left as a future
//! swap-in behind the same trait.

use mt_langreg::LangId;
use mt_util::CircularQueue;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub struct Translated {
    pub text: String,
    pub stack_load: Option<f64>,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecodeError {
    #[error("decoder failed: {0}")]
    Failed(String),
}

pub trait DecoderClient: Send + Sync {
    fn translate(
        &self,
        source_sentence: &str,
        source_lang: LangId,
        target_lang: LangId,
        history: &CircularQueue<String>,
    ) -> Result<Translated, DecodeError>;
}

/// Deterministic stand-in decoder client, mirroring
/// `decoder-frontend::StubBackend`'s echo behaviour so a balancer is
/// runnable and testable without a real decoder front-end fleet.
pub struct StubDecoderClient;

impl DecoderClient for StubDecoderClient {
    fn translate(
        &self,
        source_sentence: &str,
        _source_lang: LangId,
        target_lang: LangId,
        history: &CircularQueue<String>,
    ) -> Result<Translated, DecodeError> {
        if source_sentence.trim().is_empty() {
            return Err(DecodeError::Failed("empty source sentence".to_owned()));
        }
        let text = format!("[{target_lang}] {source_sentence}");
        let stack_load = Some(1.0 + history.len() as f64 * 0.1);
        Ok(Translated { text, stack_load })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_client_tags_output_with_target_language() {
        let client = StubDecoderClient;
        let history = CircularQueue::new(4);
        let result = client.translate("Hello.", 1, 2, &history).unwrap();
        assert_eq!(result.text, "[2] Hello.");
    }

    #[test]
    fn stub_client_rejects_blank_input() {
        let client = StubDecoderClient;
        let history = CircularQueue::new(4);
        let err = client.translate("  ", 1, 2, &history).unwrap_err();
        assert!(matches!(err, DecodeError::Failed(_)));
    }
}
