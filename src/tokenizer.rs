//! Tokenizer facade: text → token ids via a SentencePiece model.

use crate::error::{EngineError, Result};
use sentencepiece::SentencePieceProcessor;
use std::path::Path;

/// Anything that can turn text into token ids for the text conditioner.
///
/// A trait rather than a bare inherent method for the same reason
/// `SessionHandle` is a trait (`src/session.rs`): it lets the Orchestrator
/// run against either the real SentencePiece-backed [`Tokenizer`] or, in
/// tests, an in-memory stand-in — no real `tokenizer.model` binary is
/// available in this environment.
pub trait TokenEncoder: Send {
    /// Encode a UTF-8 string into a sequence of token ids.
    fn encode(&self, text: &str) -> Result<Vec<i32>>;
}

/// Wraps a loaded SentencePiece model. No text normalization beyond what
/// the model itself performs — trimming and terminal-punctuation insertion
/// are the streaming orchestrator's job.
pub struct Tokenizer {
    processor: SentencePieceProcessor,
}

impl Tokenizer {
    /// Load `tokenizer.model` from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let processor = SentencePieceProcessor::open(path).map_err(|e| EngineError::ModelLoad {
            session: "tokenizer".to_owned(),
            cause: e.to_string(),
        })?;
        Ok(Self { processor })
    }
}

impl TokenEncoder for Tokenizer {
    fn encode(&self, text: &str) -> Result<Vec<i32>> {
        let pieces = self
            .processor
            .encode(text)
            .map_err(|e| EngineError::Session {
                session: "tokenizer".to_owned(),
                cause: e.to_string(),
            })?;
        Ok(pieces.into_iter().map(|p| p.id as i32).collect())
    }
}

/// An in-memory [`TokenEncoder`] for tests, avoiding any dependency on a
/// real SentencePiece model file.
#[cfg(any(test, feature = "test-util"))]
pub mod mock {
    use super::{EngineError, Result, TokenEncoder};
    use std::sync::Mutex;

    /// Encodes each whitespace-separated word as its byte length, and
    /// records every string it was asked to encode (in call order) so
    /// tests can assert on sentence-level call ordering.
    #[derive(Default)]
    pub struct MockTokenizer {
        pub calls: Mutex<Vec<String>>,
    }

    impl MockTokenizer {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
        }
    }

    impl TokenEncoder for MockTokenizer {
        fn encode(&self, text: &str) -> Result<Vec<i32>> {
            self.calls
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(text.to_owned());
            if text.is_empty() {
                return Err(EngineError::Input {
                    kind: crate::error::InputErrorKind::EmptyText,
                });
            }
            Ok(text.split_whitespace().map(|w| w.len() as i32).collect())
        }
    }
}
