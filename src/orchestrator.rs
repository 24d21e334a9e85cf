//! Streaming orchestrator: sentence segmentation, per-sentence driver
//! invocation, WAV framing, and cooperative cancellation.

use crate::audio::encode_wav_pcm16;
use crate::driver::{run_sentence, DriverLimits};
use crate::error::{EngineError, InputErrorKind, Result};
use crate::flow::FlowSchedule;
use crate::session::SessionHost;
use crate::tensor::Tensor;
use crate::tokenizer::TokenEncoder;
use crate::voice::{resolve_embedding, VoiceEmbeddingCache, VoicesTable};
use futures_core::Stream;
use rand::Rng;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// 24 kHz mono, fixed by the model family.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

const TERMINAL_PUNCTUATION: [char; 3] = ['.', '!', '?'];

fn is_terminal(c: char) -> bool {
    TERMINAL_PUNCTUATION.contains(&c)
}

/// Greedy regex-style sentence split: maximal runs of non-terminal
/// characters, ended by one or more terminal characters immediately
/// followed by whitespace or end-of-string. A terminal run not followed by
/// whitespace (e.g. `server.js`) does not end the sentence.
pub fn split_sentences(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < chars.len() {
        if is_terminal(chars[i]) {
            let mut j = i;
            while j < chars.len() && is_terminal(chars[j]) {
                j += 1;
            }
            let ends_sentence = j == chars.len() || chars[j].is_whitespace();
            if ends_sentence {
                push_trimmed(&mut sentences, &chars[start..j]);
                start = j;
            }
            i = j;
        } else {
            i += 1;
        }
    }
    if start < chars.len() {
        push_trimmed(&mut sentences, &chars[start..]);
    }

    if sentences.is_empty() {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            sentences.push(trimmed.to_owned());
        }
    }
    sentences
}

fn push_trimmed(sentences: &mut Vec<String>, chars: &[char]) {
    let segment: String = chars.iter().collect();
    let trimmed = segment.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_owned());
    }
}

/// Trim; append `.` if the last non-space character isn't already terminal
/// punctuation.
pub fn preprocess_sentence(sentence: &str) -> String {
    let trimmed = sentence.trim();
    match trimmed.chars().last() {
        Some(c) if is_terminal(c) => trimmed.to_owned(),
        Some(_) => format!("{trimmed}."),
        None => trimmed.to_owned(),
    }
}

/// Owns everything a synthesis call threads through: the loaded sessions,
/// tokenizer, resolved voice table, and embedding cache.
pub struct Orchestrator {
    pub sessions: SessionHost,
    pub tokenizer: Box<dyn TokenEncoder>,
    pub voices_table: VoicesTable,
    pub voice_dirs: Vec<PathBuf>,
    pub default_voice: String,
    pub cache: VoiceEmbeddingCache,
    pub schedule: FlowSchedule,
    pub limits: DriverLimits,
}

impl Orchestrator {
    /// Synthesize `text` for `voice_id`, yielding one complete WAV payload
    /// per decoded audio chunk, across every sentence in order.
    ///
    /// Cancellation is checked between sentences and (inside the driver)
    /// between Phase C iterations; already-yielded chunks are never
    /// retracted.
    pub fn synthesize_stream<'a>(
        &'a mut self,
        text: &'a str,
        voice_id: Option<&'a str>,
        cancellation: CancellationToken,
        rng: &'a mut (impl Rng + 'a),
    ) -> impl Stream<Item = Result<Vec<u8>>> + 'a {
        async_stream::try_stream! {
            if text.trim().is_empty() {
                Err(EngineError::Input { kind: InputErrorKind::EmptyText })?;
            }

            for sentence in split_sentences(text) {
                if cancellation.is_cancelled() {
                    break;
                }
                let sentence = preprocess_sentence(&sentence);

                let token_ids = self.tokenizer.encode(&sentence)?;
                let embedding: Tensor = resolve_embedding(
                    voice_id,
                    &self.voices_table,
                    &self.voice_dirs,
                    &self.default_voice,
                    &mut self.cache,
                    self.sessions.voice_encoder.as_mut(),
                )?;

                let chunks = run_sentence(
                    &token_ids,
                    &embedding,
                    &mut self.sessions,
                    &self.schedule,
                    &self.limits,
                    &cancellation,
                    rng,
                )?;

                for chunk in chunks {
                    let wav = encode_wav_pcm16(&chunk.samples, OUTPUT_SAMPLE_RATE)?;
                    yield wav;
                }

                tokio::task::yield_now().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_multi_sentence_input_in_order() {
        let sentences = split_sentences("One. Two! Three?");
        assert_eq!(sentences, vec!["One.", "Two!", "Three?"]);
    }

    #[test]
    fn filename_with_period_is_not_split() {
        let sentences = split_sentences("Open server.js now.");
        assert_eq!(sentences, vec!["Open server.js now."]);
    }

    #[test]
    fn no_terminal_punctuation_yields_one_sentence() {
        let sentences = split_sentences("hello there");
        assert_eq!(sentences, vec!["hello there"]);
    }

    #[test]
    fn drops_empty_segments_between_punctuation_runs() {
        let sentences = split_sentences("Hi!   ");
        assert_eq!(sentences, vec!["Hi!"]);
    }

    #[test]
    fn preprocess_appends_period_when_missing() {
        assert_eq!(preprocess_sentence("hello"), "hello.");
    }

    #[test]
    fn preprocess_leaves_existing_terminal_punctuation() {
        assert_eq!(preprocess_sentence("hello!  "), "hello!");
    }

    #[test]
    fn every_sentence_is_a_substring_of_the_original_ignoring_whitespace() {
        let text = "Hello there. How   are you?";
        let normalize = |s: &str| s.chars().filter(|c| !c.is_whitespace()).collect::<String>();
        let original = normalize(text);
        for sentence in split_sentences(text) {
            assert!(original.contains(&normalize(&sentence)));
        }
    }
}
