//! Default model-asset directory resolution.
//!
//! Single source of truth for where downloaded graph files, the tokenizer
//! model, and `voices.bin` live on disk. Uses the [`dirs`] crate for
//! platform-appropriate resolution, overridable for tests and custom
//! deployments via an environment variable.

use std::path::PathBuf;

/// Default directory for model assets (`<platform cache dir>/mimi-flow-tts/`).
///
/// Override with the `MIMI_FLOW_TTS_MODELS_DIR` environment variable.
#[must_use]
pub fn models_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("MIMI_FLOW_TTS_MODELS_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::cache_dir()
        .map(|d| d.join("mimi-flow-tts"))
        .unwrap_or_else(|| PathBuf::from("/tmp/mimi-flow-tts"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn models_dir_is_nonempty() {
        assert!(!models_dir().as_os_str().is_empty());
    }

    #[test]
    fn models_dir_contains_crate_name() {
        let dir = models_dir();
        let s = dir.to_string_lossy();
        assert!(s.contains("mimi-flow-tts"), "models_dir: {s}");
    }

    #[test]
    fn models_dir_override_via_env() {
        let key = "MIMI_FLOW_TTS_MODELS_DIR";
        let original = std::env::var_os(key);

        // SAFETY: tests run single-threaded per module.
        unsafe { std::env::set_var(key, "/custom/models") };
        assert_eq!(models_dir(), PathBuf::from("/custom/models"));

        match original {
            Some(v) => unsafe { std::env::set_var(key, v) },
            None => unsafe { std::env::remove_var(key) },
        }
    }
}
