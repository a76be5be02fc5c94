//! # Pipeline Configuration
//!
//! Loaded once at startup from TOML:
//!
//! ```toml
//! worker_count = 8
//! lane_count = 8
//! frame_budget_ms = 16
//! default_cancel_behaviour = "default"
//! ```
//!
//! Every key is optional; missing keys take the [`Default`] values.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfluxError, ConfluxResult};

/// How a consolidating stream treats items whose instance has a pending
/// cancellation request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelBehaviour {
    /// Never consult the cancellation lookup; always copy.
    None,
    /// Silently drop cancelled items.
    #[default]
    Default,
    /// Redirect cancelled items to a pending-cancel stream.
    Explicit,
}

/// Configuration for a conflux pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Worker threads in the job pool.
    pub worker_count: usize,
    /// Inbox lanes per stream (one per concurrent producer).
    pub lane_count: usize,
    /// Frame time above which a frame is logged as slow (ms).
    pub frame_budget_ms: u64,
    /// Behaviour for cancellable streams registered without an explicit one.
    pub default_cancel_behaviour: CancelBehaviour,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get);
        Self {
            worker_count: workers,
            lane_count: workers,
            frame_budget_ms: 16,
            default_cancel_behaviour: CancelBehaviour::Default,
        }
    }
}

impl PipelineConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(source: &str) -> ConfluxResult<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| ConfluxError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> ConfluxResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| ConfluxError::ConfigIo {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let config = Self::from_toml_str(&source)?;
        tracing::info!(
            path = %path.display(),
            workers = config.worker_count,
            lanes = config.lane_count,
            "pipeline configuration loaded"
        );
        Ok(config)
    }

    /// Rejects values the pipeline cannot run with.
    pub fn validate(&self) -> ConfluxResult<()> {
        if self.worker_count == 0 {
            return Err(ConfluxError::InvalidConfig(
                "worker_count must be at least 1".to_string(),
            ));
        }
        if self.lane_count == 0 {
            return Err(ConfluxError::InvalidConfig(
                "lane_count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Frame budget as a duration.
    #[inline]
    #[must_use]
    pub fn frame_budget(&self) -> Duration {
        Duration::from_millis(self.frame_budget_ms)
    }
}
