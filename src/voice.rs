//! Voice embedding cache and resolution.

use crate::audio::{decode_other_format, decode_wav, require_nonempty, resample_linear};
use crate::error::{EngineError, Result, VoiceErrorKind};
use crate::session::SessionHandle;
use crate::tensor::Tensor;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use tracing::debug;

const TARGET_SR: u32 = 24_000;
/// Preference order for reference-audio extensions: pick the first match,
/// preferring `.wav`.
const REF_EXTENSIONS: [&str; 5] = ["wav", "mp3", "ogg", "flac", "m4a"];

/// Parsed `voices.bin` table: voice name → precomputed speaker embedding.
pub struct VoicesTable {
    records: HashMap<String, Tensor>,
    /// Parse order, for the "first record" default-voice fallback.
    order: Vec<String>,
}

impl VoicesTable {
    /// Parse the binary layout:
    /// `u32 N`, then N × (32-byte NUL-padded name, `u32 num_frames`,
    /// `u32 emb_dim`, `num_frames*emb_dim` little-endian f32 values).
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 4 {
            return Err(parse_err("voices.bin shorter than header"));
        }
        let count = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        let mut pos = 4;
        let mut records = HashMap::with_capacity(count);
        let mut order = Vec::with_capacity(count);

        for _ in 0..count {
            if pos + 40 > bytes.len() {
                return Err(parse_err("voices.bin truncated record header"));
            }
            let name_bytes = &bytes[pos..pos + 32];
            let name = String::from_utf8_lossy(name_bytes)
                .trim_end_matches('\0')
                .to_owned();
            pos += 32;
            let num_frames = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
            pos += 4;
            let emb_dim = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
            pos += 4;

            let payload_len = num_frames * emb_dim * 4;
            if pos + payload_len > bytes.len() {
                return Err(parse_err("voices.bin truncated embedding payload"));
            }
            let mut data = Vec::with_capacity(num_frames * emb_dim);
            for chunk in bytes[pos..pos + payload_len].chunks_exact(4) {
                data.push(f32::from_le_bytes(chunk.try_into().unwrap()));
            }
            pos += payload_len;

            let embedding = Tensor::f32(vec![1, num_frames, emb_dim], data);
            order.push(name.clone());
            records.insert(name, embedding);
        }

        Ok(Self { records, order })
    }

    /// An empty table — no `voices.bin` loaded.
    pub fn empty() -> Self {
        Self {
            records: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.records.get(name)
    }

    /// Every voice name in parse order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Final fallback step of voice resolution: the configured default name
    /// if present, else the first parsed record. `voices.bin` shape fields
    /// are `[num_frames, emb_dim]`; the `cosette` default name is a
    /// heuristic, not a contract.
    pub fn default_or_first(&self, default_name: &str) -> Option<&Tensor> {
        self.records
            .get(default_name)
            .or_else(|| self.order.first().and_then(|n| self.records.get(n)))
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn parse_err(detail: &str) -> EngineError {
    EngineError::Voice {
        kind: VoiceErrorKind::ShapeMismatch,
        detail: detail.to_owned(),
    }
}

/// Bounded LRU mapping resolved source path → encoded [`Tensor`] embedding.
pub struct VoiceEmbeddingCache {
    capacity: usize,
    order: VecDeque<String>,
    map: HashMap<String, Tensor>,
}

impl VoiceEmbeddingCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            map: HashMap::new(),
        }
    }

    /// On hit, move `key` to the MRU position and return a clone.
    pub fn get(&mut self, key: &str) -> Option<Tensor> {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let k = self.order.remove(pos).unwrap();
            self.order.push_back(k);
        }
        self.map.get(key).cloned()
    }

    /// Insert, evicting the LRU entry if over capacity.
    pub fn insert(&mut self, key: String, value: Tensor) {
        if self.map.contains_key(&key) {
            self.order.retain(|k| k != &key);
        } else if self.order.len() >= self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.map.remove(&evicted);
            }
        }
        self.order.push_back(key.clone());
        self.map.insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Scan `voice_dirs` in order for `voice_id.{wav,mp3,ogg,flac,m4a}`; within
/// a directory, `.wav` is preferred over the other extensions.
pub fn find_reference_audio(voice_id: &str, voice_dirs: &[PathBuf]) -> Option<PathBuf> {
    for dir in voice_dirs {
        for ext in REF_EXTENSIONS {
            let candidate = dir.join(format!("{voice_id}.{ext}"));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

/// Decode → resample to 24 kHz → shape `[1,1,N]` f32 → run the voice
/// encoder → first output tensor is the embedding.
pub fn encode_reference(path: &Path, voice_encoder: &mut dyn SessionHandle) -> Result<Tensor> {
    let decoded = if path.extension().and_then(|e| e.to_str()) == Some("wav") {
        let bytes = std::fs::read(path)?;
        decode_wav(&bytes)?
    } else {
        decode_other_format(path)?
    };
    require_nonempty(&decoded.samples)?;

    let resampled = resample_linear(&decoded.samples, decoded.sample_rate, TARGET_SR);
    let n = resampled.len();
    let input = Tensor::f32(vec![1, 1, n], resampled);

    let mut inputs = HashMap::new();
    inputs.insert("audio".to_owned(), input);
    let outputs = voice_encoder.run(inputs)?;

    let output_name = voice_encoder
        .output_names()
        .first()
        .cloned()
        .ok_or_else(|| EngineError::Session {
            session: "voice_encoder".to_owned(),
            cause: "session declares no outputs".to_owned(),
        })?;
    outputs
        .get(&output_name)
        .cloned()
        .ok_or_else(|| EngineError::Session {
            session: "voice_encoder".to_owned(),
            cause: format!("missing declared output '{output_name}'"),
        })
}

/// Full resolution: table lookup, then reference-audio scan (with LRU
/// caching by resolved path), then default/first-record fallback, else
/// `VoiceNotFound`.
pub fn resolve_embedding(
    voice_id: Option<&str>,
    voices_table: &VoicesTable,
    voice_dirs: &[PathBuf],
    default_voice: &str,
    cache: &mut VoiceEmbeddingCache,
    voice_encoder: &mut dyn SessionHandle,
) -> Result<Tensor> {
    if let Some(id) = voice_id {
        if let Some(embedding) = voices_table.get(id) {
            debug!(voice_id = id, "resolved voice from voices.bin");
            return Ok(embedding.clone());
        }

        if let Some(path) = find_reference_audio(id, voice_dirs) {
            let key = path.to_string_lossy().into_owned();
            if let Some(cached) = cache.get(&key) {
                debug!(voice_id = id, path = %key, "voice embedding cache hit");
                return Ok(cached);
            }
            debug!(voice_id = id, path = %key, "encoding reference audio for voice");
            let embedding = encode_reference(&path, voice_encoder)?;
            cache.insert(key, embedding.clone());
            return Ok(embedding);
        }
    }

    if let Some(embedding) = voices_table.default_or_first(default_voice) {
        debug!(default_voice, "falling back to default/first voices.bin record");
        return Ok(embedding.clone());
    }

    Err(EngineError::Voice {
        kind: VoiceErrorKind::NotFound,
        detail: voice_id.unwrap_or("<none>").to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::mock::MockSessionHandle;

    fn build_voices_bin(entries: &[(&str, u32, u32, Vec<f32>)]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
        for (name, num_frames, emb_dim, data) in entries {
            let mut name_bytes = [0_u8; 32];
            let bytes = name.as_bytes();
            name_bytes[..bytes.len()].copy_from_slice(bytes);
            out.extend_from_slice(&name_bytes);
            out.extend_from_slice(&num_frames.to_le_bytes());
            out.extend_from_slice(&emb_dim.to_le_bytes());
            for v in data {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        out
    }

    #[test]
    fn parses_single_record_table() {
        let bytes = build_voices_bin(&[("cosette", 2, 3, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0])]);
        let table = VoicesTable::parse(&bytes).expect("parse");
        let embedding = table.get("cosette").expect("cosette present");
        assert_eq!(embedding.dims(), &[1, 2, 3]);
    }

    #[test]
    fn default_or_first_prefers_configured_default() {
        let bytes = build_voices_bin(&[
            ("alice", 1, 1, vec![1.0]),
            ("cosette", 1, 1, vec![2.0]),
        ]);
        let table = VoicesTable::parse(&bytes).expect("parse");
        let embedding = table.default_or_first("cosette").expect("present");
        assert_eq!(embedding.as_f32(), Some(&[2.0][..]));
    }

    #[test]
    fn default_or_first_falls_back_to_first_record() {
        let bytes = build_voices_bin(&[("alice", 1, 1, vec![1.0]), ("bob", 1, 1, vec![2.0])]);
        let table = VoicesTable::parse(&bytes).expect("parse");
        let embedding = table.default_or_first("missing").expect("present");
        assert_eq!(embedding.as_f32(), Some(&[1.0][..]));
    }

    #[test]
    fn empty_table_has_no_default() {
        let table = VoicesTable::empty();
        assert!(table.default_or_first("cosette").is_none());
    }

    #[test]
    fn lru_cache_evicts_oldest_over_capacity() {
        let mut cache = VoiceEmbeddingCache::new(2);
        cache.insert("a".into(), Tensor::f32(vec![1], vec![1.0]));
        cache.insert("b".into(), Tensor::f32(vec![1], vec![2.0]));
        cache.insert("c".into(), Tensor::f32(vec![1], vec![3.0]));
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn lru_cache_get_refreshes_recency() {
        let mut cache = VoiceEmbeddingCache::new(2);
        cache.insert("a".into(), Tensor::f32(vec![1], vec![1.0]));
        cache.insert("b".into(), Tensor::f32(vec![1], vec![2.0]));
        assert!(cache.get("a").is_some());
        cache.insert("c".into(), Tensor::f32(vec![1], vec![3.0]));
        // "b" was least-recently-used after the touch on "a", so it's evicted.
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn find_reference_audio_prefers_wav_in_same_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("voice.mp3"), b"x").expect("write");
        std::fs::write(dir.path().join("voice.wav"), b"x").expect("write");
        let found = find_reference_audio("voice", &[dir.path().to_path_buf()]).expect("found");
        assert_eq!(found.extension().and_then(|e| e.to_str()), Some("wav"));
    }

    #[test]
    fn find_reference_audio_checks_dirs_in_order() {
        let dir_a = tempfile::tempdir().expect("tempdir");
        let dir_b = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir_b.path().join("voice.wav"), b"x").expect("write");
        let found = find_reference_audio(
            "voice",
            &[dir_a.path().to_path_buf(), dir_b.path().to_path_buf()],
        )
        .expect("found");
        assert_eq!(found, dir_b.path().join("voice.wav"));
    }

    #[test]
    fn find_reference_audio_returns_none_when_absent() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(find_reference_audio("nope", &[dir.path().to_path_buf()]).is_none());
    }

    #[test]
    fn resolve_embedding_hits_cache_on_second_call_for_same_reference() {
        use crate::audio::encode_wav_pcm16;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let dir = tempfile::tempdir().expect("tempdir");
        let wav = encode_wav_pcm16(&[0.0, 0.1, -0.1, 0.2], 24_000).expect("encode");
        std::fs::write(dir.path().join("ref.wav"), wav).expect("write");

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let mut voice_encoder = MockSessionHandle::new(
            vec![],
            vec!["embedding".into()],
            Box::new(move |_| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                let mut out = HashMap::new();
                out.insert("embedding".into(), Tensor::f32(vec![1, 1, 4], vec![0.0; 4]));
                out
            }),
        );

        let voices_table = VoicesTable::empty();
        let voice_dirs = vec![dir.path().to_path_buf()];
        let mut cache = VoiceEmbeddingCache::new(16);

        resolve_embedding(
            Some("ref"),
            &voices_table,
            &voice_dirs,
            "cosette",
            &mut cache,
            &mut voice_encoder,
        )
        .expect("first resolve");
        resolve_embedding(
            Some("ref"),
            &voices_table,
            &voice_dirs,
            "cosette",
            &mut cache,
            &mut voice_encoder,
        )
        .expect("second resolve");

        assert_eq!(calls.load(Ordering::SeqCst), 1, "second call must hit the cache, not re-encode");
    }

    #[test]
    fn missing_voice_with_empty_table_is_voice_not_found() {
        let voices_table = VoicesTable::empty();
        let mut cache = VoiceEmbeddingCache::new(16);
        let mut voice_encoder = MockSessionHandle::new(vec![], vec![], Box::new(|_| HashMap::new()));
        let err = resolve_embedding(
            Some("nope"),
            &voices_table,
            &[],
            "cosette",
            &mut cache,
            &mut voice_encoder,
        )
        .expect_err("should fail");
        assert!(matches!(
            err,
            EngineError::Voice {
                kind: VoiceErrorKind::NotFound,
                ..
            }
        ));
    }
}
