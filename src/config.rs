//! Engine configuration.
//!
//! Mirrors the nested, `#[serde(default)]` per-concern shape used throughout
//! the rest of the config surface: each subsystem owns a small struct with
//! its own [`Default`] impl rather than one flat bag of fields.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Asset download and storage configuration.
    pub assets: AssetConfig,
    /// Voice resolution and caching configuration.
    pub voice: VoiceConfig,
    /// Synthesis loop tuning.
    pub synthesis: SynthesisConfig,
    /// Download transport tuning.
    pub download: DownloadConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            assets: AssetConfig::default(),
            voice: VoiceConfig::default(),
            synthesis: SynthesisConfig::default(),
            download: DownloadConfig::default(),
        }
    }
}

/// Where model assets live on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    /// Directory holding the five graph files, `tokenizer.model`, and
    /// `voices.bin`. Defaults to a platform cache directory (see
    /// [`crate::dirs::models_dir`]).
    pub models_dir: PathBuf,
    /// Base URL models are fetched from, joined with each asset's filename.
    pub base_url: String,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            models_dir: crate::dirs::models_dir(),
            base_url: "https://huggingface.co/kyutai/mimi-flow-tts/resolve/main".to_owned(),
        }
    }
}

/// Voice resolution and embedding-cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Directories scanned (in order) for `voice_id.{wav,mp3,ogg,flac,m4a}`.
    pub voice_dirs: Vec<PathBuf>,
    /// Default voice name used when resolution falls through to step 3.
    pub default_voice: String,
    /// Maximum number of resolved embeddings kept in the LRU cache.
    pub cache_capacity: usize,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            voice_dirs: Vec::new(),
            default_voice: "cosette".to_owned(),
            cache_capacity: 16,
        }
    }
}

/// AR loop and flow-matching tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Frames accumulated before an intermediate audio-decoder run.
    pub decode_batch: usize,
    /// Hard cap on AR frames per sentence.
    pub max_frames: usize,
    /// Euler integration steps per frame in the flow-matching refiner.
    pub flow_steps: usize,
    /// EOS logit threshold; generation stops once exceeded.
    pub eos_threshold: f32,
    /// Gaussian sampling variance for the initial flow-matching latent.
    pub temperature: f32,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            decode_batch: 12,
            max_frames: 500,
            flow_steps: 10,
            eos_threshold: -4.0,
            temperature: 0.7,
        }
    }
}

/// HTTP download transport tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Maximum attempts per file.
    pub retries: u32,
    /// Base backoff; attempt `n` waits `base * 2^(n-1)`.
    #[serde(with = "duration_secs")]
    pub backoff_base: Duration,
    /// Per-connection timeout.
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,
    /// Per-file overall timeout.
    #[serde(with = "duration_secs")]
    pub file_timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff_base: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(10),
            file_timeout: Duration::from_secs(120),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_synthesis_matches_spec_constants() {
        let cfg = SynthesisConfig::default();
        assert_eq!(cfg.decode_batch, 12);
        assert_eq!(cfg.max_frames, 500);
        assert_eq!(cfg.flow_steps, 10);
        assert!((cfg.eos_threshold - (-4.0)).abs() < f32::EPSILON);
        assert!((cfg.temperature - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn default_download_matches_spec_constants() {
        let cfg = DownloadConfig::default();
        assert_eq!(cfg.retries, 3);
        assert_eq!(cfg.backoff_base, Duration::from_secs(1));
    }

    #[test]
    fn default_voice_is_cosette() {
        assert_eq!(VoiceConfig::default().default_voice, "cosette");
        assert_eq!(VoiceConfig::default().cache_capacity, 16);
    }

    #[test]
    fn engine_config_clone_preserves_fields() {
        let cfg = EngineConfig::default();
        let cloned = cfg.clone();
        assert_eq!(cloned.synthesis.decode_batch, cfg.synthesis.decode_batch);
    }
}
