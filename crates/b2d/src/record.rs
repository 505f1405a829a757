//! Output records of the converter.
//!
//! Everything here is in the right-handed target convention and is written
//! once, never mutated after the builder returns it.

use crate::camera::Camera;
use crate::expert::ExpertAction;
use crate::polyline::Point2;
use crate::transform::{Intrinsics, Transform};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Vectorized map element classes, in label order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MapClass {
    Broken,
    Solid,
    SolidSolid,
    Center,
    TrafficLight,
    StopSign,
}

impl MapClass {
    pub const ALL: [MapClass; 6] = [
        MapClass::Broken,
        MapClass::Solid,
        MapClass::SolidSolid,
        MapClass::Center,
        MapClass::TrafficLight,
        MapClass::StopSign,
    ];

    /// Integer label, 0..=5.
    pub fn label(self) -> usize {
        self as usize
    }

    /// Class of a map element type string; `None` for types not exported.
    pub fn from_type_name(name: &str) -> Option<Self> {
        Some(match name {
            "Broken" => MapClass::Broken,
            "Solid" => MapClass::Solid,
            "SolidSolid" => MapClass::SolidSolid,
            "Center" => MapClass::Center,
            "TrafficLight" => MapClass::TrafficLight,
            "StopSign" => MapClass::StopSign,
            _ => return None,
        })
    }
}

/// Lidar-frame 2D polylines per map class. Every class key is always
/// present.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MapAnnotation(BTreeMap<MapClass, Vec<Vec<Point2>>>);

impl Default for MapAnnotation {
    fn default() -> Self {
        Self(MapClass::ALL.into_iter().map(|c| (c, Vec::new())).collect())
    }
}

impl MapAnnotation {
    pub fn push(&mut self, class: MapClass, line: Vec<Point2>) {
        self.0.entry(class).or_default().push(line);
    }

    pub fn get(&self, class: MapClass) -> &[Vec<Point2>] {
        self.0.get(&class).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn classes(&self) -> impl Iterator<Item = MapClass> + '_ {
        self.0.keys().copied()
    }

    /// Total number of polylines.
    pub fn len(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraInfo {
    pub cam2ego: Transform,
    pub intrinsic: Intrinsics,
    pub world2cam: Transform,
    /// RGB frame relative to the data root.
    pub data_path: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LidarInfo {
    pub lidar2ego: Transform,
    pub world2lidar: Transform,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
/// Serialized flat: `CAM_*` keys sit next to `LIDAR_TOP`.
pub struct SensorInfos {
    #[serde(flatten)]
    pub cameras: BTreeMap<Camera, CameraInfo>,
    #[serde(rename = "LIDAR_TOP")]
    pub lidar: LidarInfo,
}

/// One retained object, lidar-local.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectAnnotation {
    pub center: [f64; 3],
    /// Full (l, w, h).
    pub size: [f64; 3],
    /// Wrapped into (-π, π].
    pub yaw: f64,
    /// `[vx, vy]` along the box heading.
    pub velocity: [f64; 2],
    /// Simulator blueprint, e.g. `vehicle.tesla.model3`.
    pub name: String,
    pub class: String,
    pub id: i64,
    pub npc2world: Transform,
    /// `-1` when the export has no lidar hit count.
    pub num_points: i64,
}

impl ObjectAnnotation {
    /// `[cx, cy, cz, l, w, h, yaw, vx, vy]`.
    pub fn gt_box(&self) -> [f64; 9] {
        let [cx, cy, cz] = self.center;
        let [l, w, h] = self.size;
        let [vx, vy] = self.velocity;
        [cx, cy, cz, l, w, h, self.yaw, vx, vy]
    }
}

/// One converted timestep.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    /// Episode folder relative to the data root, e.g. `v1/<scenario>`.
    pub folder: String,
    pub town_name: String,
    pub frame_idx: u32,
    /// Microseconds.
    pub timestamp: f64,
    pub token: String,

    pub command_far_xy: [f64; 2],
    pub command_far: i64,
    pub command_near_xy: [f64; 2],
    pub command_near: i64,

    pub ego_yaw: f64,
    pub ego_translation: [f64; 3],
    pub ego_vel: [f64; 3],
    pub ego_accel: [f64; 3],
    pub ego_rotation_rate: [f64; 3],
    pub ego_size: [f64; 3],
    pub world2ego: Transform,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expert_action: Option<ExpertAction>,

    pub sensors: SensorInfos,
    pub map_annos: MapAnnotation,
    pub objects: Vec<ObjectAnnotation>,
}

impl FrameRecord {
    pub fn gt_boxes(&self) -> Vec<[f64; 9]> {
        self.objects.iter().map(ObjectAnnotation::gt_box).collect()
    }

    pub fn gt_names(&self) -> Vec<&str> {
        self.objects.iter().map(|o| o.name.as_str()).collect()
    }

    pub fn gt_ids(&self) -> Vec<i64> {
        self.objects.iter().map(|o| o.id).collect()
    }
}

/// `"{folder}_{frame_idx:04}"`.
pub fn frame_token(folder: &str, frame_idx: u32) -> String {
    format!("{folder}_{frame_idx:04}")
}

/// Frames are sampled at 10 Hz; timestamps are microseconds.
pub fn frame_timestamp(frame_idx: u32) -> f64 {
    frame_idx as f64 / 10.0 * 1e6
}
