//! Camera rig of the recorded episodes.

use serde::{Deserialize, Serialize};

/// Name of the roof lidar in the sensor table.
pub const LIDAR_NAME: &str = "LIDAR_TOP";

/// One of the six surround cameras.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Camera {
    #[serde(rename = "CAM_FRONT")]
    Front,
    #[serde(rename = "CAM_FRONT_RIGHT")]
    FrontRight,
    #[serde(rename = "CAM_FRONT_LEFT")]
    FrontLeft,
    #[serde(rename = "CAM_BACK")]
    Back,
    #[serde(rename = "CAM_BACK_LEFT")]
    BackLeft,
    #[serde(rename = "CAM_BACK_RIGHT")]
    BackRight,
}

impl Camera {
    /// Visibility is tested in this order; the first passing camera wins.
    pub const ALL: [Camera; 6] = [
        Camera::Front,
        Camera::FrontRight,
        Camera::FrontLeft,
        Camera::Back,
        Camera::BackLeft,
        Camera::BackRight,
    ];

    /// Channel name used in annotations, e.g. `CAM_FRONT`.
    pub fn name(self) -> &'static str {
        match self {
            Camera::Front => "CAM_FRONT",
            Camera::FrontRight => "CAM_FRONT_RIGHT",
            Camera::FrontLeft => "CAM_FRONT_LEFT",
            Camera::Back => "CAM_BACK",
            Camera::BackLeft => "CAM_BACK_LEFT",
            Camera::BackRight => "CAM_BACK_RIGHT",
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            Camera::Front => "front",
            Camera::FrontRight => "front_right",
            Camera::FrontLeft => "front_left",
            Camera::Back => "back",
            Camera::BackLeft => "back_left",
            Camera::BackRight => "back_right",
        }
    }

    /// Folder of RGB frames under `camera/`.
    pub fn rgb_folder(self) -> String {
        format!("rgb_{}", self.suffix())
    }

    /// Folder of depth frames under `camera/`.
    pub fn depth_folder(self) -> String {
        format!("depth_{}", self.suffix())
    }
}

impl std::fmt::Display for Camera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Image plane extent in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Canvas {
    pub width: usize,
    pub height: usize,
}

impl Default for Canvas {
    fn default() -> Self {
        Self {
            width: 1600,
            height: 900,
        }
    }
}

impl Canvas {
    /// `row ∈ [0, height)` and `col ∈ [0, width)`.
    #[inline]
    pub fn contains(&self, row: f64, col: f64) -> bool {
        row >= 0.0 && row < self.height as f64 && col >= 0.0 && col < self.width as f64
    }
}
