//! Autoregressive driver: conditioning phases, the frame-by-frame
//! generation loop, periodic batch decode, and EOS termination.

use crate::error::{EngineError, Result};
use crate::flow::{self, FlowSchedule, LATENT_DIM};
use crate::session::SessionHost;
use crate::state::{init_state_bundle, propagate_state};
use crate::tensor::Tensor;
use rand::Rng;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// One decoded slice of 24 kHz mono f32 PCM.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
}

/// Configured limits for one AR loop invocation.
#[derive(Debug, Clone, Copy)]
pub struct DriverLimits {
    pub max_frames: usize,
    pub decode_batch: usize,
    pub eos_threshold: f32,
    pub flow_steps: usize,
    pub temperature: f32,
}

impl Default for DriverLimits {
    fn default() -> Self {
        Self {
            max_frames: 500,
            decode_batch: 12,
            eos_threshold: -4.0,
            flow_steps: flow::L_MAX,
            temperature: flow::TEMP,
        }
    }
}

const TEXT_EMBED_WIDTH: usize = 1024;

fn run_backbone_step(
    sessions: &mut SessionHost,
    sequence: Tensor,
    text_embeddings: Tensor,
    state: &mut HashMap<String, Tensor>,
) -> Result<HashMap<String, Tensor>> {
    let mut inputs = HashMap::with_capacity(state.len() + 2);
    inputs.insert("sequence".to_owned(), sequence);
    inputs.insert("text_embeddings".to_owned(), text_embeddings);
    for (name, tensor) in state.iter() {
        inputs.insert(name.clone(), tensor.clone());
    }

    let outputs = sessions.backbone.run(inputs)?;
    propagate_state(state, &outputs, sessions.backbone.as_ref());
    Ok(outputs)
}

fn decode_latents(latents: &[[f32; LATENT_DIM]], sessions: &mut SessionHost) -> Result<AudioChunk> {
    let mut flat = Vec::with_capacity(latents.len() * LATENT_DIM);
    for latent in latents {
        flat.extend_from_slice(latent);
    }
    let input = Tensor::f32(vec![1, latents.len(), LATENT_DIM], flat);

    let mut inputs = HashMap::with_capacity(1);
    inputs.insert("latents".to_owned(), input);
    let outputs = sessions.audio_decoder.run(inputs)?;

    let output_name = sessions
        .audio_decoder
        .output_names()
        .first()
        .cloned()
        .ok_or_else(|| EngineError::Session {
            session: "audio_decoder".to_owned(),
            cause: "session declares no outputs".to_owned(),
        })?;
    let samples = outputs
        .get(&output_name)
        .and_then(Tensor::as_f32)
        .ok_or_else(|| EngineError::Session {
            session: "audio_decoder".to_owned(),
            cause: format!("missing declared output '{output_name}'"),
        })?
        .to_vec();

    Ok(AudioChunk { samples })
}

fn scalar(tensor: &Tensor) -> f32 {
    tensor.as_f32().and_then(|d| d.first().copied()).unwrap_or(0.0)
}

/// Reshape a rank-2 text embedding to rank-3, as the text conditioning
/// phase requires.
fn reshape_text_embedding(tensor: Tensor) -> Tensor {
    match &tensor {
        Tensor::F32 { dims, data } if dims.len() == 2 => {
            Tensor::f32(vec![1, dims[0], dims[1]], data.clone())
        }
        _ => tensor,
    }
}

/// Run the full Phase A → B → C pipeline for one sentence's token ids,
/// returning every decoded audio chunk in order. Cancellation is checked
/// between iterations of Phase C only; no partial chunk is emitted on
/// cancellation.
pub fn run_sentence(
    token_ids: &[i32],
    speaker_embedding: &Tensor,
    sessions: &mut SessionHost,
    schedule: &FlowSchedule,
    limits: &DriverLimits,
    cancellation: &CancellationToken,
    rng: &mut impl Rng,
) -> Result<Vec<AudioChunk>> {
    let slot_names = sessions.discover_state_slots();
    let mut state = init_state_bundle(sessions.backbone.as_ref(), &slot_names);

    // Phase A: voice conditioning.
    let empty_sequence = Tensor::f32(vec![1, 0, LATENT_DIM], vec![]);
    run_backbone_step(
        sessions,
        empty_sequence.clone(),
        speaker_embedding.clone(),
        &mut state,
    )?;

    // Phase B: text conditioning.
    let ids: Vec<i64> = token_ids.iter().map(|&id| id as i64).collect();
    let ids_len = ids.len();
    let mut tc_inputs = HashMap::with_capacity(1);
    tc_inputs.insert("token_ids".to_owned(), Tensor::i64(vec![1, ids_len], ids));
    let tc_outputs = sessions.text_conditioner.run(tc_inputs)?;
    let text_embedding_name =
        sessions
            .text_conditioner
            .output_names()
            .first()
            .cloned()
            .ok_or_else(|| EngineError::Session {
                session: "text_conditioner".to_owned(),
                cause: "session declares no outputs".to_owned(),
            })?;
    let text_embedding = tc_outputs
        .get(&text_embedding_name)
        .cloned()
        .ok_or_else(|| EngineError::Session {
            session: "text_conditioner".to_owned(),
            cause: format!("missing declared output '{text_embedding_name}'"),
        })?;
    let text_embedding = reshape_text_embedding(text_embedding);
    run_backbone_step(sessions, empty_sequence, text_embedding, &mut state)?;

    // Phase C: autoregressive loop.
    let mut current = Tensor::f32(vec![1, 1, LATENT_DIM], vec![f32::NAN; LATENT_DIM]);
    let mut latents: Vec<[f32; LATENT_DIM]> = Vec::new();
    let mut chunks = Vec::new();

    for _ in 0..limits.max_frames {
        if cancellation.is_cancelled() {
            break;
        }

        let empty_text_embeddings = Tensor::f32(vec![1, 0, TEXT_EMBED_WIDTH], vec![]);
        let outputs = run_backbone_step(sessions, current, empty_text_embeddings, &mut state)?;

        let conditioning = outputs.get("conditioning").cloned().ok_or_else(|| EngineError::Session {
            session: "backbone".to_owned(),
            cause: "missing declared output 'conditioning'".to_owned(),
        })?;
        let eos_logit = outputs
            .get("eos_logit")
            .map(scalar)
            .ok_or_else(|| EngineError::Session {
                session: "backbone".to_owned(),
                cause: "missing declared output 'eos_logit'".to_owned(),
            })?;

        let x = flow::refine(
            &conditioning,
            limits.flow_steps,
            schedule,
            sessions.flow_refiner.as_mut(),
            rng,
            limits.temperature,
        )?;
        latents.push(x);
        current = Tensor::f32(vec![1, 1, LATENT_DIM], x.to_vec());

        let reached_eos = eos_logit > limits.eos_threshold;
        if latents.len() >= limits.decode_batch || reached_eos {
            chunks.push(decode_latents(&latents, sessions)?);
            latents.clear();
        }
        if reached_eos {
            break;
        }
    }

    if !latents.is_empty() {
        chunks.push(decode_latents(&latents, sessions)?);
    }

    Ok(chunks)
}
