//! Configuration for a [`crate::TrackingSession`].
//!
//! [`TrackerConfig`] is a plain struct with sensible defaults. It can be built in code or read
//! from a JSON document; fields missing from the document keep their default value.
//!
//! ```rust
//! use mutscope::TrackerConfig;
//!
//! let config = TrackerConfig::from_json_str(r#"{ "keep_changes_for_max_frames": 300 }"#).unwrap();
//! assert_eq!(config.keep_changes_for_max_frames, 300);
//! assert_eq!(config.cache_tolerance_secs, 5);
//! ```

use std::{fs, path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{rewriter::ExecutionBackend, Result};

/// Name of the attribute that excludes a method from instrumentation.
pub const DEFAULT_OPT_OUT_ATTRIBUTE: &str = "SkipTransformPropertySetterAutoPatchingAttribute";

/// Settings of the instrumentation engine and the change store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Number of most recent frames whose changes are retained
    pub keep_changes_for_max_frames: usize,
    /// Maximum difference between a cached and the current binary timestamp, in seconds
    pub cache_tolerance_secs: u64,
    /// Fully qualified names of types whose methods are never scanned
    pub excluded_types: Vec<String>,
    /// Attribute (simple or full name) that opts a method out of instrumentation
    pub opt_out_attribute: String,
    /// Execution backend of the host
    pub backend: ExecutionBackend,
    /// Location of the persisted call-site cache, `None` keeps the cache in memory only
    pub cache_file: Option<PathBuf>,
    /// Run the instrumentation pass even when no entity is tracked yet
    pub initialize_without_tracked_entities: bool,
    /// Whether interception is active
    pub tracking_enabled: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            keep_changes_for_max_frames: 1000,
            cache_tolerance_secs: 5,
            excluded_types: vec![
                "<Module>".to_string(),
                "UnityEngine.Transform".to_string(),
                "UnityEngine.Component".to_string(),
            ],
            opt_out_attribute: DEFAULT_OPT_OUT_ATTRIBUTE.to_string(),
            backend: ExecutionBackend::Jit,
            cache_file: None,
            initialize_without_tracked_entities: false,
            tracking_enabled: true,
        }
    }
}

impl TrackerConfig {
    /// Parses a configuration from a JSON string.
    ///
    /// # Errors
    /// Returns [`crate::Error::Serialization`] if the document is not valid.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a configuration from a JSON file.
    ///
    /// # Errors
    /// Returns an I/O error if the file cannot be read, or [`crate::Error::Serialization`] if
    /// it is not valid.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    /// The cache timestamp tolerance as a [`Duration`].
    #[must_use]
    pub fn cache_tolerance(&self) -> Duration {
        Duration::from_secs(self.cache_tolerance_secs)
    }
}
