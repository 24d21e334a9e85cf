//! Progress event types for model asset download and session loading.
//!
//! Provides callback-based progress reporting that decouples the Asset
//! Manager and Engine Facade from any particular UI.

/// A single file in the download plan.
#[derive(Debug, Clone)]
pub struct DownloadFile {
    /// Logical asset name (e.g. `"flow_lm_main_int8.onnx"`).
    pub asset: String,
    /// Size in bytes, if known ahead of time.
    pub size_bytes: Option<u64>,
    /// Whether this file already satisfies the integrity predicate.
    pub cached: bool,
}

/// A plan of all assets needed before load, with cache status and sizes.
#[derive(Debug, Clone)]
pub struct DownloadPlan {
    /// All assets needed for the engine to reach `Ready`.
    pub files: Vec<DownloadFile>,
}

impl DownloadPlan {
    /// Returns `true` if any asset still needs to be downloaded.
    pub fn needs_download(&self) -> bool {
        self.files.iter().any(|f| !f.cached)
    }

    /// Total bytes that need to be downloaded (non-cached files only).
    pub fn download_bytes(&self) -> u64 {
        self.files
            .iter()
            .filter(|f| !f.cached)
            .filter_map(|f| f.size_bytes)
            .sum()
    }

    /// Total bytes across all assets (cached and uncached).
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().filter_map(|f| f.size_bytes).sum()
    }

    /// Total bytes already cached locally.
    pub fn cached_bytes(&self) -> u64 {
        self.files
            .iter()
            .filter(|f| f.cached)
            .filter_map(|f| f.size_bytes)
            .sum()
    }

    /// Number of assets that still need to be downloaded.
    pub fn files_to_download(&self) -> usize {
        self.files.iter().filter(|f| !f.cached).count()
    }

    /// Total number of assets in the plan.
    pub fn total_files(&self) -> usize {
        self.files.len()
    }
}

/// Progress events emitted during asset download and session loading.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// An asset download has started.
    DownloadStarted {
        /// Logical asset name.
        asset: String,
        /// Total size in bytes, if known.
        total_bytes: Option<u64>,
    },

    /// Download progress update.
    DownloadProgress {
        /// Logical asset name.
        asset: String,
        /// Bytes downloaded so far.
        bytes_downloaded: u64,
        /// Total size in bytes, if known.
        total_bytes: Option<u64>,
    },

    /// An asset download completed and passed the integrity predicate.
    DownloadComplete {
        /// Logical asset name.
        asset: String,
    },

    /// An asset was already present and valid (no download needed).
    Cached {
        /// Logical asset name.
        asset: String,
    },

    /// A graph session has started loading into memory.
    LoadStarted {
        /// Session name (e.g. `"flow_lm_main"`).
        session: String,
    },

    /// A graph session finished loading.
    LoadComplete {
        /// Session name.
        session: String,
        /// Time taken to load in seconds.
        duration_secs: f64,
    },

    /// The asset download plan is ready with file list and sizes.
    DownloadPlanReady {
        /// The computed plan.
        plan: DownloadPlan,
    },

    /// Aggregate progress across all asset downloads.
    AggregateProgress {
        /// Total bytes downloaded across all assets so far.
        bytes_downloaded: u64,
        /// Total bytes to download across all assets.
        total_bytes: u64,
        /// Number of assets completely downloaded.
        files_complete: usize,
        /// Total number of assets to download.
        files_total: usize,
    },

    /// An error occurred during download or loading.
    Error {
        /// Human-readable error description.
        message: String,
    },
}

/// Callback type for receiving progress events.
pub type ProgressCallback = Box<dyn Fn(ProgressEvent) + Send + Sync>;

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn callback_receives_events() {
        let events: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let events_clone = Arc::clone(&events);

        let callback: ProgressCallback = Box::new(move |event| {
            let label = match &event {
                ProgressEvent::DownloadStarted { .. } => "started",
                ProgressEvent::DownloadProgress { .. } => "progress",
                ProgressEvent::DownloadComplete { .. } => "complete",
                ProgressEvent::Cached { .. } => "cached",
                ProgressEvent::LoadStarted { .. } => "load_started",
                ProgressEvent::LoadComplete { .. } => "load_complete",
                ProgressEvent::DownloadPlanReady { .. } => "plan_ready",
                ProgressEvent::AggregateProgress { .. } => "aggregate",
                ProgressEvent::Error { .. } => "error",
            };
            let Ok(mut guard) = events_clone.lock() else {
                return;
            };
            guard.push(label.to_owned());
        });

        callback(ProgressEvent::DownloadStarted {
            asset: "flow_lm_main_int8.onnx".into(),
            total_bytes: Some(1000),
        });
        callback(ProgressEvent::DownloadProgress {
            asset: "flow_lm_main_int8.onnx".into(),
            bytes_downloaded: 500,
            total_bytes: Some(1000),
        });
        callback(ProgressEvent::DownloadComplete {
            asset: "flow_lm_main_int8.onnx".into(),
        });

        let guard = events.lock().unwrap_or_else(|e| e.into_inner());
        assert_eq!(guard.len(), 3);
        assert_eq!(guard[0], "started");
        assert_eq!(guard[1], "progress");
        assert_eq!(guard[2], "complete");
    }

    #[test]
    fn load_events_round_trip() {
        let events: Arc<Mutex<Vec<ProgressEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let events_clone = Arc::clone(&events);

        let callback: ProgressCallback = Box::new(move |event| {
            let Ok(mut guard) = events_clone.lock() else {
                return;
            };
            guard.push(event);
        });

        callback(ProgressEvent::LoadStarted {
            session: "mimi_encoder".into(),
        });
        callback(ProgressEvent::LoadComplete {
            session: "mimi_encoder".into(),
            duration_secs: 2.5,
        });

        let guard = events.lock().unwrap_or_else(|e| e.into_inner());
        assert_eq!(guard.len(), 2);
        assert!(
            matches!(&guard[0], ProgressEvent::LoadStarted { session } if session == "mimi_encoder")
        );
        assert!(
            matches!(&guard[1], ProgressEvent::LoadComplete { duration_secs, .. } if (*duration_secs - 2.5).abs() < f64::EPSILON)
        );
    }

    fn make_plan(files: Vec<DownloadFile>) -> DownloadPlan {
        DownloadPlan { files }
    }

    fn make_file(asset: &str, size: Option<u64>, cached: bool) -> DownloadFile {
        DownloadFile {
            asset: asset.to_owned(),
            size_bytes: size,
            cached,
        }
    }

    #[test]
    fn download_plan_needs_download_when_uncached() {
        let plan = make_plan(vec![
            make_file("flow_lm_main_int8.onnx", Some(1000), false),
            make_file("tokenizer.model", Some(100), true),
        ]);
        assert!(plan.needs_download());
    }

    #[test]
    fn download_plan_no_download_when_all_cached() {
        let plan = make_plan(vec![
            make_file("flow_lm_main_int8.onnx", Some(1000), true),
            make_file("tokenizer.model", Some(100), true),
        ]);
        assert!(!plan.needs_download());
    }

    #[test]
    fn download_plan_bytes_calculation() {
        let plan = make_plan(vec![
            make_file("mimi_decoder_int8.onnx", Some(2000), false),
            make_file("tokenizer.model", Some(300), true),
            make_file("voices.bin", None, false),
        ]);
        assert_eq!(plan.download_bytes(), 2000);
        assert_eq!(plan.total_bytes(), 2300);
        assert_eq!(plan.cached_bytes(), 300);
    }

    #[test]
    fn download_plan_file_counts() {
        let plan = make_plan(vec![
            make_file("a.onnx", Some(100), false),
            make_file("b.onnx", Some(200), true),
            make_file("c.onnx", Some(300), false),
        ]);
        assert_eq!(plan.files_to_download(), 2);
        assert_eq!(plan.total_files(), 3);
    }

    #[test]
    fn download_plan_empty() {
        let plan = make_plan(vec![]);
        assert!(!plan.needs_download());
        assert_eq!(plan.download_bytes(), 0);
        assert_eq!(plan.total_bytes(), 0);
        assert_eq!(plan.cached_bytes(), 0);
        assert_eq!(plan.files_to_download(), 0);
        assert_eq!(plan.total_files(), 0);
    }

    #[test]
    fn callback_receives_plan_and_aggregate_events() {
        let events: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let events_clone = Arc::clone(&events);

        let callback: ProgressCallback = Box::new(move |event| {
            let label = match &event {
                ProgressEvent::DownloadPlanReady { .. } => "plan_ready",
                ProgressEvent::AggregateProgress { .. } => "aggregate",
                _ => "other",
            };
            let Ok(mut guard) = events_clone.lock() else {
                return;
            };
            guard.push(label.to_owned());
        });

        let plan = make_plan(vec![make_file("flow_lm_main_int8.onnx", Some(1000), false)]);
        callback(ProgressEvent::DownloadPlanReady { plan });
        callback(ProgressEvent::AggregateProgress {
            bytes_downloaded: 500,
            total_bytes: 1000,
            files_complete: 0,
            files_total: 1,
        });

        let guard = events.lock().unwrap_or_else(|e| e.into_inner());
        assert_eq!(guard.len(), 2);
        assert_eq!(guard[0], "plan_ready");
        assert_eq!(guard[1], "aggregate");
    }
}
