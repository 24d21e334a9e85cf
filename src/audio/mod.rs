//! Audio codec: WAV decode/encode and linear resampling, plus a
//! `symphonia`-backed fallback decoder for non-WAV reference audio.

use crate::error::{EngineError, InputErrorKind, Result, VoiceErrorKind};

/// A decoded mono PCM buffer and its native sample rate.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Parse a RIFF/WAVE buffer and mono-ize it to `[-1, 1)` f32 samples: scan
/// chunks for `fmt ` (channel count, sample rate, bits-per-sample) and
/// `data`, then decode by bit depth. Accepts any channel count/bit-depth
/// WAV; multi-channel input is reduced to channel 0 only.
///
/// Hand-rolled rather than routed through a WAV-reading crate so the three
/// bit-depth formulas are exact, including the unsigned 8-bit case, which
/// libraries disagree on how to sign-extend.
pub fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(decode_failed("not a RIFF/WAVE file".to_owned()));
    }

    let mut pos = 12;
    let mut channels: Option<u16> = None;
    let mut sample_rate: Option<u32> = None;
    let mut bits_per_sample: Option<u16> = None;
    let mut data: Option<&[u8]> = None;

    while pos + 8 <= bytes.len() {
        let id = &bytes[pos..pos + 4];
        let size = u32::from_le_bytes(bytes[pos + 4..pos + 8].try_into().unwrap()) as usize;
        let body_start = pos + 8;
        let body_end = (body_start + size).min(bytes.len());
        let body = &bytes[body_start..body_end];

        match id {
            b"fmt " if body.len() >= 16 => {
                channels = Some(u16::from_le_bytes(body[2..4].try_into().unwrap()));
                sample_rate = Some(u32::from_le_bytes(body[4..8].try_into().unwrap()));
                bits_per_sample = Some(u16::from_le_bytes(body[14..16].try_into().unwrap()));
            }
            b"data" => data = Some(body),
            _ => {}
        }

        // Chunks are padded to an even byte boundary.
        pos = body_start + size + (size % 2);
    }

    let channels = channels.ok_or_else(|| decode_failed("missing fmt chunk".to_owned()))? as usize;
    let sample_rate = sample_rate.ok_or_else(|| decode_failed("missing fmt chunk".to_owned()))?;
    let bits = bits_per_sample.ok_or_else(|| decode_failed("missing fmt chunk".to_owned()))?;
    let data = data.ok_or_else(|| decode_failed("missing data chunk".to_owned()))?;
    if channels == 0 {
        return Err(decode_failed("WAV declares zero channels".to_owned()));
    }

    let samples = match bits {
        16 => data
            .chunks_exact(2 * channels)
            .map(|frame| {
                let raw = i16::from_le_bytes([frame[0], frame[1]]);
                f32::from(raw) / 32_768.0
            })
            .collect(),
        32 => data
            .chunks_exact(4 * channels)
            .map(|frame| f32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]))
            .collect(),
        8 => data
            .chunks_exact(channels)
            .map(|frame| (f32::from(frame[0]) - 128.0) / 128.0)
            .collect(),
        other => {
            return Err(decode_failed(format!("unsupported WAV bit depth: {other}")));
        }
    };

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

/// Decode non-WAV reference audio (`.mp3/.ogg/.flac/.m4a`) via `symphonia`,
/// down-mixing multi-channel audio by averaging rather than dropping
/// channels.
pub fn decode_other_format(path: &std::path::Path) -> Result<DecodedAudio> {
    use symphonia::core::audio::SampleBuffer;
    use symphonia::core::codecs::DecoderOptions;
    use symphonia::core::errors::Error as SymphError;
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    let file = std::fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| decode_failed(format!("failed to probe audio: {e}")))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| decode_failed("no default audio track".to_owned()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let sample_rate = codec_params
        .sample_rate
        .ok_or_else(|| decode_failed("unknown sample rate".to_owned()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| decode_failed(format!("failed to create decoder: {e}")))?;

    let mut out: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(decode_failed(format!("audio read error: {e}"))),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphError::DecodeError(_)) => continue,
            Err(e) => return Err(decode_failed(format!("audio decode error: {e}"))),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count();
        let frames = decoded.frames();

        if sample_buf.as_ref().is_none_or(|b| b.capacity() < frames) {
            sample_buf = Some(SampleBuffer::<f32>::new(frames as u64, spec));
        } else if let Some(b) = sample_buf.as_mut() {
            b.clear();
        }
        if let Some(b) = sample_buf.as_mut() {
            b.copy_interleaved_ref(decoded);
        }

        let data = sample_buf.as_ref().map(SampleBuffer::samples).unwrap_or(&[]);
        if channels <= 1 {
            out.extend_from_slice(data);
        } else {
            for frame in data.chunks_exact(channels) {
                out.push(frame.iter().sum::<f32>() / channels as f32);
            }
        }
    }

    Ok(DecodedAudio {
        samples: out,
        sample_rate,
    })
}

/// Linear-interpolation resample to `to_sr`:
/// `out[i] = in[⌊i·r/r_t⌋]·(1−f) + in[⌈i·r/r_t⌉]·f`.
pub fn resample_linear(input: &[f32], from_sr: u32, to_sr: u32) -> Vec<f32> {
    if input.is_empty() || from_sr == to_sr {
        return input.to_vec();
    }

    let ratio = to_sr as f64 / from_sr as f64;
    let out_len = ((input.len() as f64) * ratio).round() as usize;
    let mut out = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = (i as f64) / ratio;
        let i0 = src_pos.floor() as isize;
        let i1 = i0 + 1;
        let f = (src_pos - i0 as f64) as f32;
        out.push(sample_clamped(input, i0) * (1.0 - f) + sample_clamped(input, i1) * f);
    }
    out
}

fn sample_clamped(input: &[f32], idx: isize) -> f32 {
    if idx <= 0 {
        return input[0];
    }
    let idx = idx as usize;
    if idx >= input.len() {
        return input[input.len() - 1];
    }
    input[idx]
}

/// Encode mono f32 samples as a canonical 16-bit PCM WAV: clip to `[-1, 1]`
/// then scale (`s<0 → s·32768`, `s≥0 → s·32767`).
pub fn encode_wav_pcm16(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| decode_failed(format!("failed to create WAV writer: {e}")))?;
        for &s in samples {
            let clamped = s.clamp(-1.0, 1.0);
            let scaled = if clamped < 0.0 {
                clamped * 32_768.0
            } else {
                clamped * 32_767.0
            };
            writer
                .write_sample(scaled.round() as i16)
                .map_err(|e| decode_failed(format!("failed to write WAV sample: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| decode_failed(format!("failed to finalize WAV: {e}")))?;
    }
    Ok(cursor.into_inner())
}

/// Decode reference audio too short to encode at all — guards against an
/// empty sample buffer reaching the voice encoder.
pub fn require_nonempty(samples: &[f32]) -> Result<()> {
    if samples.is_empty() {
        return Err(EngineError::Input {
            kind: InputErrorKind::AudioTooShort,
        });
    }
    Ok(())
}

fn decode_failed(detail: String) -> EngineError {
    EngineError::Voice {
        kind: VoiceErrorKind::DecodeFailed,
        detail,
    }
}
