//! Engine facade: lazy model-load lifecycle, status reporting, and
//! single-flight load coalescing.

use crate::assets::{AssetManager, ModelAsset};
use crate::audio::{decode_wav, encode_wav_pcm16};
use crate::config::EngineConfig;
use crate::driver::DriverLimits;
use crate::error::{EngineError, Result};
use crate::flow::FlowSchedule;
use crate::orchestrator::{Orchestrator, OUTPUT_SAMPLE_RATE};
use crate::progress::ProgressCallback;
use crate::session::{OrtSessionHandle, SessionHost};
use crate::tokenizer::Tokenizer;
use crate::voice::{VoiceEmbeddingCache, VoicesTable};
use futures_core::Stream;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Nominal sizes used for the integrity threshold; actual upstream sizes
/// vary slightly by quantization build, hence the 0.8× tolerance.
const VOICE_ENCODER_BYTES: u64 = 45_000_000;
const TEXT_CONDITIONER_BYTES: u64 = 60_000_000;
const BACKBONE_BYTES: u64 = 750_000_000;
const FLOW_REFINER_BYTES: u64 = 15_000_000;
const AUDIO_DECODER_BYTES: u64 = 55_000_000;
const TOKENIZER_BYTES: u64 = 1_000_000;
const VOICES_TABLE_BYTES: u64 = 200_000;

fn model_assets(models_dir: &std::path::Path) -> Vec<ModelAsset> {
    vec![
        ModelAsset::new(models_dir, "mimi_encoder.onnx", VOICE_ENCODER_BYTES),
        ModelAsset::new(models_dir, "text_conditioner.onnx", TEXT_CONDITIONER_BYTES),
        ModelAsset::new(models_dir, "flow_lm_main_int8.onnx", BACKBONE_BYTES),
        ModelAsset::new(models_dir, "flow_lm_flow_int8.onnx", FLOW_REFINER_BYTES),
        ModelAsset::new(models_dir, "mimi_decoder_int8.onnx", AUDIO_DECODER_BYTES),
        ModelAsset::new(models_dir, "tokenizer.model", TOKENIZER_BYTES),
        ModelAsset::new(models_dir, "voices.bin", VOICES_TABLE_BYTES),
    ]
}

/// The engine's externally-observable status.
#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub ready: bool,
    pub last_error: Option<String>,
    pub models_dir: PathBuf,
}

enum LifecycleState {
    Unloaded,
    Ready(Orchestrator),
    Failed(String),
}

fn not_ready_err() -> EngineError {
    EngineError::Session {
        session: "engine".to_owned(),
        cause: "load did not leave the engine in a ready state".to_owned(),
    }
}

/// `Unloaded → Loading → Ready | Failed(err)`. There's no stored `Loading`
/// variant: the `state` mutex is held for a load's whole duration, so a
/// second caller arriving mid-load simply blocks on the mutex and observes
/// the same outcome once it's released — that *is* the single-flight
/// coalescing, and it doubles as "one synthesis per engine instance at a
/// time" serialization, since every synthesis call holds the same lock for
/// its own duration.
pub struct Engine {
    config: EngineConfig,
    state: Mutex<LifecycleState>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: Mutex::new(LifecycleState::Unloaded),
        })
    }

    /// Ensure the engine is loaded, loading it if necessary. From `Failed`,
    /// the next caller retries.
    async fn ensure_loaded(&self) -> Result<()> {
        let mut guard = self.state.lock().await;
        if matches!(&*guard, LifecycleState::Ready(_)) {
            return Ok(());
        }
        match self.load().await {
            Ok(orchestrator) => {
                *guard = LifecycleState::Ready(orchestrator);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "engine load failed");
                *guard = LifecycleState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    /// Load steps: ensure assets → open five sessions → parse voices table
    /// → precompute flow schedule → ready.
    async fn load(&self) -> Result<Orchestrator> {
        let manager = AssetManager::new(&self.config.assets, self.config.download.clone())?;
        let assets = model_assets(&self.config.assets.models_dir);
        let progress: Option<&ProgressCallback> = None;
        manager.ensure("core-model-set", &assets, progress).await?;

        let models_dir = &self.config.assets.models_dir;
        let sessions = SessionHost {
            voice_encoder: Box::new(OrtSessionHandle::load(
                "voice_encoder",
                &models_dir.join("mimi_encoder.onnx"),
            )?),
            text_conditioner: Box::new(OrtSessionHandle::load(
                "text_conditioner",
                &models_dir.join("text_conditioner.onnx"),
            )?),
            backbone: Box::new(OrtSessionHandle::load(
                "backbone",
                &models_dir.join("flow_lm_main_int8.onnx"),
            )?),
            flow_refiner: Box::new(OrtSessionHandle::load(
                "flow_refiner",
                &models_dir.join("flow_lm_flow_int8.onnx"),
            )?),
            audio_decoder: Box::new(OrtSessionHandle::load(
                "audio_decoder",
                &models_dir.join("mimi_decoder_int8.onnx"),
            )?),
        };

        let tokenizer = Tokenizer::load(&models_dir.join("tokenizer.model"))?;

        let voices_bytes = std::fs::read(models_dir.join("voices.bin"))?;
        let voices_table = VoicesTable::parse(&voices_bytes)?;

        let schedule = FlowSchedule::build();
        info!("engine load complete");

        Ok(Orchestrator {
            sessions,
            tokenizer: Box::new(tokenizer),
            voices_table,
            voice_dirs: self.config.voice.voice_dirs.clone(),
            default_voice: self.config.voice.default_voice.clone(),
            cache: VoiceEmbeddingCache::new(self.config.voice.cache_capacity),
            schedule,
            limits: DriverLimits {
                max_frames: self.config.synthesis.max_frames,
                decode_batch: self.config.synthesis.decode_batch,
                eos_threshold: self.config.synthesis.eos_threshold,
                flow_steps: self.config.synthesis.flow_steps,
                temperature: self.config.synthesis.temperature,
            },
        })
    }

    /// Lazily loads on first call, then returns a lazy, finite WAV-chunk
    /// stream. The engine's state mutex stays held for the stream's whole
    /// lifetime, serializing this synthesis against any other call on the
    /// same engine instance.
    pub async fn synthesize_stream(
        self: &Arc<Self>,
        text: String,
        voice_id: Option<String>,
    ) -> Result<impl Stream<Item = Result<Vec<u8>>> + '_> {
        self.ensure_loaded().await?;
        let stream = async_stream::try_stream! {
            let mut guard = self.state.lock().await;
            let orchestrator = match &mut *guard {
                LifecycleState::Ready(o) => o,
                _ => Err(not_ready_err())?,
            };

            let cancellation = CancellationToken::new();
            let mut rng = rand::rngs::StdRng::from_entropy();
            let mut inner = orchestrator.synthesize_stream(
                &text,
                voice_id.as_deref(),
                cancellation,
                &mut rng,
            );
            while let Some(chunk) = inner.next().await {
                yield chunk?;
            }
        };
        Ok(stream)
    }

    /// Buffers the full stream and concatenates it into one WAV payload —
    /// the non-streaming convenience form.
    pub async fn synthesize(self: &Arc<Self>, text: String, voice_id: Option<String>) -> Result<Vec<u8>> {
        self.ensure_loaded().await?;
        let mut guard = self.state.lock().await;
        let orchestrator = match &mut *guard {
            LifecycleState::Ready(o) => o,
            _ => return Err(not_ready_err()),
        };

        let cancellation = CancellationToken::new();
        let mut rng = rand::thread_rng();
        let mut samples = Vec::new();
        {
            let mut stream = Box::pin(orchestrator.synthesize_stream(
                &text,
                voice_id.as_deref(),
                cancellation,
                &mut rng,
            ));
            while let Some(wav) = stream.next().await {
                let wav = wav?;
                samples.extend(decode_wav(&wav)?.samples);
            }
        }

        encode_wav_pcm16(&samples, OUTPUT_SAMPLE_RATE)
    }

    pub async fn status(&self) -> EngineStatus {
        let guard = self.state.lock().await;
        let (ready, last_error) = match &*guard {
            LifecycleState::Ready(_) => (true, None),
            LifecycleState::Unloaded => (false, None),
            LifecycleState::Failed(e) => (false, Some(e.clone())),
        };
        EngineStatus {
            ready,
            last_error,
            models_dir: self.config.assets.models_dir.clone(),
        }
    }

    /// Voice ids available: every `voices.bin` record plus every
    /// `.{wav,mp3,ogg,flac,m4a}` stem found under the configured and
    /// supplied `extra_dirs`.
    pub async fn list_voices(&self, extra_dirs: &[PathBuf]) -> Result<Vec<String>> {
        self.ensure_loaded().await?;
        let guard = self.state.lock().await;
        let orchestrator = match &*guard {
            LifecycleState::Ready(o) => o,
            _ => return Err(not_ready_err()),
        };

        let mut ids: Vec<String> = orchestrator.voices_table.names().map(str::to_owned).collect();

        let mut dirs = orchestrator.voice_dirs.clone();
        dirs.extend(extra_dirs.iter().cloned());
        for dir in dirs {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                let is_audio = matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("wav" | "mp3" | "ogg" | "flac" | "m4a")
                );
                if is_audio {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        if !ids.contains(&stem.to_owned()) {
                            ids.push(stem.to_owned());
                        }
                    }
                }
            }
        }
        Ok(ids)
    }
}
