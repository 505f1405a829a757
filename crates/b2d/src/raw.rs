//! Raw per-frame annotation as exported by the simulator.
//!
//! Files live at `<episode>/anno/<frame>.json.gz`. All poses are in the
//! simulator's left-handed convention; nothing in this module converts them.
//!
//! The exporter writes bare `NaN`/`Infinity` tokens. They are read as `null`
//! and land as NaN in numeric fields, as `None` in optional ones.

use crate::camera::Camera;
use crate::error::{Error, Result};
use crate::transform::{Intrinsics, Transform};
use flate2::read::GzDecoder;
use serde::{Deserialize, Deserializer};
use std::{borrow::Cow, fs::File, io::Read, path::Path};

/// One decoded annotation file.
#[derive(Clone, Debug, Deserialize)]
pub struct RawFrame {
    #[serde(deserialize_with = "nan_if_null")]
    pub x: f64,
    #[serde(deserialize_with = "nan_if_null")]
    pub y: f64,
    /// Ego heading; exported as NaN on some frames.
    #[serde(default)]
    pub theta: Option<f64>,
    #[serde(deserialize_with = "nan_if_null")]
    pub speed: f64,
    #[serde(deserialize_with = "nan_if_null_3")]
    pub acceleration: [f64; 3],
    #[serde(deserialize_with = "nan_if_null_3")]
    pub angular_velocity: [f64; 3],
    #[serde(deserialize_with = "nan_if_null")]
    pub x_command_far: f64,
    #[serde(deserialize_with = "nan_if_null")]
    pub y_command_far: f64,
    pub command_far: i64,
    #[serde(deserialize_with = "nan_if_null")]
    pub x_command_near: f64,
    #[serde(deserialize_with = "nan_if_null")]
    pub y_command_near: f64,
    pub command_near: i64,
    /// First entry is the ego vehicle.
    pub bounding_boxes: Vec<RawBox>,
    pub sensors: RawSensors,
}

/// Sensor table; other sensors in the export are ignored.
#[derive(Clone, Debug, Deserialize)]
pub struct RawSensors {
    #[serde(rename = "CAM_FRONT")]
    pub front: RawCamera,
    #[serde(rename = "CAM_FRONT_RIGHT")]
    pub front_right: RawCamera,
    #[serde(rename = "CAM_FRONT_LEFT")]
    pub front_left: RawCamera,
    #[serde(rename = "CAM_BACK")]
    pub back: RawCamera,
    #[serde(rename = "CAM_BACK_LEFT")]
    pub back_left: RawCamera,
    #[serde(rename = "CAM_BACK_RIGHT")]
    pub back_right: RawCamera,
    #[serde(rename = "LIDAR_TOP")]
    pub lidar: RawLidar,
}

impl RawSensors {
    pub fn camera(&self, camera: Camera) -> &RawCamera {
        match camera {
            Camera::Front => &self.front,
            Camera::FrontRight => &self.front_right,
            Camera::FrontLeft => &self.front_left,
            Camera::Back => &self.back,
            Camera::BackLeft => &self.back_left,
            Camera::BackRight => &self.back_right,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct RawCamera {
    pub cam2ego: Transform,
    pub intrinsic: Intrinsics,
    pub world2cam: Transform,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RawLidar {
    pub lidar2ego: Transform,
    pub world2lidar: Transform,
}

/// One actor box. Which optional keys are present depends on the actor kind.
#[derive(Clone, Debug, Deserialize)]
pub struct RawBox {
    pub class: String,
    #[serde(default)]
    pub type_id: Option<String>,
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub distance: Option<f64>,
    #[serde(deserialize_with = "nan_if_null_3")]
    pub location: [f64; 3],
    /// Degrees; the last component is yaw.
    #[serde(deserialize_with = "nan_if_null_3")]
    pub rotation: [f64; 3],
    #[serde(default, deserialize_with = "nullable_point")]
    pub center: Option<[f64; 3]>,
    /// Half extents (length, width, height).
    #[serde(deserialize_with = "nan_if_null_3")]
    pub extent: [f64; 3],
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub num_points: Option<i64>,
    #[serde(default)]
    pub world2ego: Option<Transform>,
    #[serde(default)]
    pub world2vehicle: Option<Transform>,
    #[serde(default)]
    pub world2sign: Option<Transform>,
    #[serde(default)]
    pub world2ped: Option<Transform>,
}

impl RawBox {
    pub fn is_ego(&self) -> bool {
        self.class == "ego_vehicle"
    }

    /// Only vehicle exports carry a trustworthy `speed`.
    pub fn is_vehicle(&self) -> bool {
        self.class.contains("vehicle")
    }

    /// First actor-to-world pose key present, in lookup order.
    pub fn world_pose(&self) -> Option<&Transform> {
        self.world2vehicle
            .as_ref()
            .or(self.world2ego.as_ref())
            .or(self.world2sign.as_ref())
            .or(self.world2ped.as_ref())
    }
}

fn nan_if_null<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(d)?.unwrap_or(f64::NAN))
}

fn nan_if_null_3<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<[f64; 3], D::Error> {
    Ok(<[Option<f64>; 3]>::deserialize(d)?.map(|v| v.unwrap_or(f64::NAN)))
}

fn nullable_point<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<Option<[f64; 3]>, D::Error> {
    Ok(Option::<[Option<f64>; 3]>::deserialize(d)?.map(|p| p.map(|v| v.unwrap_or(f64::NAN))))
}

/// Replace bare `NaN` / `Infinity` / `-Infinity` tokens outside strings with
/// `null`. Python's `json` module writes them; JSON parsers reject them.
pub fn sanitize_non_finite(text: &str) -> Cow<'_, str> {
    if !text.contains("NaN") && !text.contains("Infinity") {
        return Cow::Borrowed(text);
    }

    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;
    let mut copied = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        if b == b'"' {
            in_string = true;
            i += 1;
            continue;
        }
        let token = ["-Infinity", "Infinity", "NaN"]
            .into_iter()
            .find(|t| bytes[i..].starts_with(t.as_bytes()));
        match token {
            Some(t) => {
                out.push_str(&text[copied..i]);
                out.push_str("null");
                i += t.len();
                copied = i;
            }
            None => i += 1,
        }
    }
    out.push_str(&text[copied..]);
    Cow::Owned(out)
}

/// Parse annotation JSON text.
pub fn parse_frame(text: &str, path: &Path) -> Result<RawFrame> {
    serde_json::from_str(&sanitize_non_finite(text)).map_err(|e| Error::json(path, e))
}

/// Read and decode one `.json.gz` annotation.
pub fn load_frame(path: &Path) -> Result<RawFrame> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut text = String::new();
    GzDecoder::new(file)
        .read_to_string(&mut text)
        .map_err(|e| Error::malformed(path, format!("corrupt gzip stream: {e}")))?;
    parse_frame(&text, path)
}
