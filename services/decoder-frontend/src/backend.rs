//! The decode backend trait (spec §1 "only the task boundary"): the single
//! seam between the control plane and an actual decoder. Everything above
//! this trait — session management, job pooling, worker pool dispatch — is
//! identical to the processor and balancer roles; only `translate` differs
//! per real deployment.

use mt_langreg::LangId;
use mt_util::CircularQueue;
use thiserror::Error;

/// One sentence's translation result.
#[derive(Debug, Clone, PartialEq)]
pub struct Translated {
    pub text: String,
    /// Decoder search-stack load, carried through only when the caller asked
    /// for `trans_info` (spec §6 `trans_job_resp_data.stack_load`).
    pub stack_load: Option<f64>,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecodeError {
    #[error("no decoder is configured for language pair {source} -> {target}")]
    UnsupportedLanguagePair { source: LangId, target: LangId },
    #[error("decoder failed: {0}")]
    Failed(String),
}

/// A single translation call: one sentence, the language pair, and whatever
/// preceding-sentence context the caller wants fed in as decoder history.
/// Implementations must be safe to call concurrently from multiple worker
/// threads for different sentences of the same job.
pub trait DecodeBackend: Send + Sync {
    fn translate(
        &self,
        source_sentence: &str,
        source_lang: LangId,
        target_lang: LangId,
        history: &CircularQueue<String>,
    ) -> Result<Translated, DecodeError>;
}

/// Deterministic stand-in decoder (spec Non-goals: no real search/LM/RM).
/// Echoes the source sentence tagged with the target language so callers can
/// exercise the full control plane without a real model.
pub struct StubBackend;

impl DecodeBackend for StubBackend {
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
        // A higher "load" the more history context is carried, purely so
        // `trans_info` responses have something non-constant to report.
        let stack_load = Some(1.0 + history.len() as f64 * 0.1);
        Ok(Translated { text, stack_load })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_backend_tags_output_with_target_language() {
        let backend = StubBackend;
        let history = CircularQueue::new(4);
        let result = backend.translate("Hello.", 1, 2, &history).unwrap();
        assert_eq!(result.text, "[2] Hello.");
    }

    #[test]
    fn stub_backend_rejects_blank_input() {
        let backend = StubBackend;
        let history = CircularQueue::new(4);
        let err = backend.translate("   ", 1, 2, &history).unwrap_err();
        assert!(matches!(err, DecodeError::Failed(_)));
    }

    #[test]
    fn stub_backend_stack_load_grows_with_history() {
        let backend = StubBackend;
        let mut history = CircularQueue::new(4);
        let without = backend.translate("Hi.", 1, 2, &history).unwrap();
        history.push("prior sentence".to_owned());
        let with = backend.translate("Hi.", 1, 2, &history).unwrap();
        assert!(with.stack_load.unwrap() > without.stack_load.unwrap());
    }
}
