//! Conversion parameters shared by every worker.

use crate::error::{Error, Result};
use crate::map_query::MapQueryConfig;
use crate::projector::{RangeFilter, VisibilityConfig};
use serde::{Deserialize, Serialize};

/// Everything a worker needs besides its folder list and the map infos.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversionConfig {
    pub range: RangeFilter,
    pub visibility: VisibilityConfig,
    pub map_query: MapQueryConfig,
    /// Run the depth-buffer visibility test on every box.
    pub filter_invisible: bool,
    /// Decode `expert_assessment/*.npz` into throttle/steer/brake.
    pub read_expert_actions: bool,
    /// Number of worker threads per split.
    pub workers: usize,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            range: RangeFilter::default(),
            visibility: VisibilityConfig::default(),
            map_query: MapQueryConfig::default(),
            filter_invisible: true,
            read_expert_actions: true,
            workers: 16,
        }
    }
}

impl ConversionConfig {
    /// Reject values no conversion can run with.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("max distance", self.range.max_distance),
            ("max height delta", self.range.max_height_delta),
            ("max render depth", self.visibility.max_render_depth),
            ("lane radius", self.map_query.lane_radius),
        ];
        for (name, value) in positive {
            if !(value > 0.0) {
                return Err(Error::InvalidConfig(format!("{name} must be positive, got {value}")));
            }
        }
        if !(self.map_query.tolerance >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "simplify tolerance must be non-negative, got {}",
                self.map_query.tolerance
            )));
        }
        let w = &self.map_query.window;
        if !(w.x_min < w.x_max && w.y_min < w.y_max) {
            return Err(Error::InvalidConfig(format!("empty map window {w:?}")));
        }
        if self.visibility.canvas.width == 0 || self.visibility.canvas.height == 0 {
            return Err(Error::InvalidConfig("canvas must be non-empty".into()));
        }
        if self.workers == 0 {
            return Err(Error::InvalidConfig("at least one worker is required".into()));
        }
        Ok(())
    }
}
