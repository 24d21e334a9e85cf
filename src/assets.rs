//! On-disk model asset management: integrity-checked download with
//! concurrent-call coalescing, size-threshold corruption detection,
//! exponential-backoff retry, and redirect following.

use crate::config::{AssetConfig, DownloadConfig};
use crate::error::{AssetErrorKind, EngineError, Result};
use crate::progress::{DownloadFile, DownloadPlan, ProgressCallback, ProgressEvent};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

/// A single model file tracked by the Asset Manager.
#[derive(Debug, Clone)]
pub struct ModelAsset {
    /// Logical name, also the filename relative to `models_dir`.
    pub name: String,
    /// Absolute on-disk path.
    pub path: PathBuf,
    /// Nominal size in bytes; the integrity threshold is 0.8× this value.
    pub nominal_bytes: u64,
}

impl ModelAsset {
    pub fn new(models_dir: &Path, name: &str, nominal_bytes: u64) -> Self {
        Self {
            name: name.to_owned(),
            path: models_dir.join(name),
            nominal_bytes,
        }
    }

    fn min_bytes(&self) -> u64 {
        (self.nominal_bytes as f64 * 0.8) as u64
    }

    /// `exists(path) ∧ size(path) ≥ min_bytes[name]`.
    fn satisfies_integrity(&self) -> bool {
        match std::fs::metadata(&self.path) {
            Ok(meta) => meta.is_file() && meta.len() >= self.min_bytes(),
            Err(_) => false,
        }
    }
}

/// Manages downloading and caching of the five graph files, the tokenizer
/// model, and the voices table.
pub struct AssetManager {
    base_url: String,
    download: DownloadConfig,
    inflight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl AssetManager {
    pub fn new(assets: &AssetConfig, download: DownloadConfig) -> Result<Self> {
        std::fs::create_dir_all(&assets.models_dir)?;
        Ok(Self {
            base_url: assets.base_url.clone(),
            download,
            inflight: Mutex::new(HashMap::new()),
        })
    }

    /// Ensure every asset in `assets` satisfies its integrity predicate,
    /// downloading or re-downloading as needed. Concurrent callers sharing
    /// `asset_set_label` coalesce onto a single in-flight attempt.
    pub async fn ensure(
        &self,
        asset_set_label: &str,
        assets: &[ModelAsset],
        progress: Option<&ProgressCallback>,
    ) -> Result<()> {
        let lock = {
            let mut map = self
                .inflight
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            map.entry(asset_set_label.to_owned())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let _guard = lock.lock().await;

        let plan = DownloadPlan {
            files: assets
                .iter()
                .map(|a| DownloadFile {
                    asset: a.name.clone(),
                    size_bytes: Some(a.nominal_bytes),
                    cached: a.satisfies_integrity(),
                })
                .collect(),
        };
        if let Some(cb) = progress {
            cb(ProgressEvent::DownloadPlanReady { plan });
        }

        let mut first_error = None;
        for asset in assets {
            if asset.satisfies_integrity() {
                if let Some(cb) = progress {
                    cb(ProgressEvent::Cached {
                        asset: asset.name.clone(),
                    });
                }
                continue;
            }

            if asset.path.exists() {
                warn!(asset = %asset.name, "asset failed integrity predicate, deleting for re-download");
                let _ = std::fs::remove_file(&asset.path);
            }

            if let Err(e) = self.download_with_retry(asset, progress).await {
                warn!(asset = %asset.name, error = %e, "asset download failed after retries");
                first_error.get_or_insert(e);
                continue;
            }

            if !asset.satisfies_integrity() {
                let e = EngineError::Asset {
                    kind: AssetErrorKind::Integrity,
                    asset: asset.name.clone(),
                };
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn download_with_retry(
        &self,
        asset: &ModelAsset,
        progress: Option<&ProgressCallback>,
    ) -> Result<()> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), asset.name);
        let retries = self.download.retries;
        let mut last_err = None;

        for attempt in 1..=retries {
            if let Some(cb) = progress {
                cb(ProgressEvent::DownloadStarted {
                    asset: asset.name.clone(),
                    total_bytes: Some(asset.nominal_bytes),
                });
            }

            match self.download_once(&url, asset).await {
                Ok(()) => {
                    if let Some(cb) = progress {
                        cb(ProgressEvent::DownloadComplete {
                            asset: asset.name.clone(),
                        });
                    }
                    info!(asset = %asset.name, attempt, "asset downloaded");
                    return Ok(());
                }
                Err(e) => {
                    warn!(asset = %asset.name, attempt, error = %e, "download attempt failed");
                    last_err = Some(e);
                    if attempt < retries {
                        let backoff = self.download.backoff_base * 2_u32.pow(attempt - 1);
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        Err(last_err.unwrap_or(EngineError::Asset {
            kind: AssetErrorKind::Network,
            asset: asset.name.clone(),
        }))
    }

    /// Progress callbacks borrow the caller's stack frame and can't cross
    /// into `spawn_blocking`'s `'static` closure, so per-chunk
    /// `DownloadProgress` events are not emitted here; `ensure` still
    /// reports `DownloadStarted`/`DownloadComplete`/`Cached` around each
    /// attempt, which is enough to drive the plan-level progress shown in
    /// `DownloadPlanReady`/`AggregateProgress`.
    async fn download_once(&self, url: &str, asset: &ModelAsset) -> Result<()> {
        let url = url.to_owned();
        let dest = asset.path.clone();
        let asset_name = asset.name.clone();
        let connect_timeout = self.download.connect_timeout;
        let file_timeout = self.download.file_timeout;

        tokio::task::spawn_blocking(move || {
            blocking_download(&url, &dest, &asset_name, connect_timeout, file_timeout)
        })
        .await
        .map_err(|_| EngineError::Asset {
            kind: AssetErrorKind::Disk,
            asset: asset.name.clone(),
        })
        .and_then(|inner| inner)
    }
}

fn blocking_download(
    url: &str,
    dest: &Path,
    asset_name: &str,
    connect_timeout: Duration,
    file_timeout: Duration,
) -> Result<()> {
    let client = reqwest::blocking::Client::builder()
        .connect_timeout(connect_timeout)
        .timeout(file_timeout)
        .build()
        .map_err(|e| EngineError::Asset {
            kind: AssetErrorKind::Network,
            asset: format!("{asset_name}: client build failed: {e}"),
        })?;

    let resp = client.get(url).send().map_err(|e| EngineError::Asset {
        kind: AssetErrorKind::Network,
        asset: format!("{asset_name}: {e}"),
    })?;

    if !resp.status().is_success() {
        return Err(EngineError::Asset {
            kind: AssetErrorKind::Http(resp.status().as_u16()),
            asset: asset_name.to_owned(),
        });
    }

    let tmp = dest.with_extension("part");
    let mut file = std::fs::File::create(&tmp).map_err(|_| EngineError::Asset {
        kind: AssetErrorKind::Disk,
        asset: asset_name.to_owned(),
    })?;

    let mut reader = resp;
    let mut buf = [0_u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).map_err(|_| EngineError::Asset {
            kind: AssetErrorKind::Network,
            asset: asset_name.to_owned(),
        })?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).map_err(|_| EngineError::Asset {
            kind: AssetErrorKind::Disk,
            asset: asset_name.to_owned(),
        })?;
    }
    drop(file);

    std::fs::rename(&tmp, dest).map_err(|_| EngineError::Asset {
        kind: AssetErrorKind::Disk,
        asset: asset_name.to_owned(),
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_satisfied_when_size_meets_threshold() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("asset.onnx");
        std::fs::write(&path, vec![0_u8; 900]).expect("write");
        let asset = ModelAsset {
            name: "asset.onnx".into(),
            path,
            nominal_bytes: 1000,
        };
        assert!(asset.satisfies_integrity());
    }

    #[test]
    fn integrity_fails_below_threshold() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("asset.onnx");
        std::fs::write(&path, vec![0_u8; 100]).expect("write");
        let asset = ModelAsset {
            name: "asset.onnx".into(),
            path,
            nominal_bytes: 1000,
        };
        assert!(!asset.satisfies_integrity());
    }

    #[test]
    fn integrity_fails_when_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let asset = ModelAsset {
            name: "asset.onnx".into(),
            path: dir.path().join("missing.onnx"),
            nominal_bytes: 1000,
        };
        assert!(!asset.satisfies_integrity());
    }

    #[tokio::test]
    async fn ensure_is_idempotent_for_already_valid_assets() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("asset.onnx");
        std::fs::write(&path, vec![0_u8; 1000]).expect("write");
        let asset = ModelAsset {
            name: "asset.onnx".into(),
            path,
            nominal_bytes: 1000,
        };

        let manager = AssetManager {
            base_url: "http://127.0.0.1:1/unused".into(),
            download: DownloadConfig::default(),
            inflight: Mutex::new(HashMap::new()),
        };

        manager
            .ensure("test-set", &[asset], None)
            .await
            .expect("ensure should succeed without network access");
    }
}
