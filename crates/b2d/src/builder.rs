//! Per-frame conversion: raw annotation in, [`FrameRecord`] out.
//!
//! The builder is pure over its inputs. Object velocities for actors
//! without a trustworthy `speed` are estimated from the positions of the
//! previous *emitted* frame, carried in a [`TrackHistory`] the caller owns.

use crate::camera::Camera;
use crate::config::ConversionConfig;
use crate::error::{Error, Result};
use crate::expert::ExpertAction;
use crate::map::ZoneMap;
use crate::map_query;
use crate::projector::{classify, BoxGeometry, CameraView, DepthBuffer};
use crate::raw::{RawBox, RawFrame};
use crate::record::{
    frame_timestamp, frame_token, CameraInfo, FrameRecord, LidarInfo, ObjectAnnotation,
    SensorInfos,
};
use crate::transform::{
    camera_to_ego, lidar_to_ego, sensor_to_camera, world_to_camera, world_to_lidar, wrap_angle,
    Transform,
};
use log::debug;
use std::collections::{BTreeMap, HashMap};
use std::f64::consts::{FRAC_PI_2, PI};
use std::path::PathBuf;

/// Frame rate of the recordings; turns per-frame displacement into m/s.
const FRAME_RATE_HZ: f64 = 10.0;

/// Yaw disagreement (radians) above which an exported pose's rotation is
/// replaced by the one from `rotation`.
const POSE_YAW_TOLERANCE: f64 = 0.01;

/// Depth buffers of one frame.
pub type DepthSet = BTreeMap<Camera, DepthBuffer>;

/// Right-handed world positions of tracked actors, keyed by actor id.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrackHistory(HashMap<i64, [f64; 3]>);

impl TrackHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: i64) -> Option<[f64; 3]> {
        self.0.get(&id).copied()
    }

    pub fn insert(&mut self, id: i64, position: [f64; 3]) {
        self.0.insert(id, position);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Everything one frame is built from.
#[derive(Clone, Copy, Debug)]
pub struct FrameInput<'a> {
    /// Episode folder relative to the data root.
    pub folder: &'a str,
    /// Annotation file stem, e.g. `00012`.
    pub frame_name: &'a str,
    pub frame_idx: u32,
    pub frame: &'a RawFrame,
    pub zone: &'a ZoneMap,
    /// May be empty when visibility filtering is off.
    pub depth: &'a DepthSet,
    pub expert_action: Option<ExpertAction>,
}

impl FrameInput<'_> {
    fn anno_path(&self) -> PathBuf {
        PathBuf::from(format!("{}/anno/{}.json.gz", self.folder, self.frame_name))
    }

    fn depth_path(&self, camera: Camera) -> PathBuf {
        PathBuf::from(format!(
            "{}/camera/{}/{}.png",
            self.folder,
            camera.depth_folder(),
            self.frame_name
        ))
    }
}

/// Town of an episode folder: second `_` field of its last component
/// (`v1/Accident_Town03_Route101_Weather23` -> `Town03`).
pub fn town_name(folder: &str) -> Option<&str> {
    folder
        .rsplit(['/', '\\'])
        .next()
        .and_then(|name| name.split('_').nth(1))
        .filter(|s| !s.is_empty())
}

/// `-theta + π/2`, with NaN or missing heading taken as π.
pub fn ego_yaw(theta: Option<f64>) -> f64 {
    let theta = theta.filter(|t| !t.is_nan()).unwrap_or(PI);
    -theta + FRAC_PI_2
}

/// Right-handed actor-to-world pose.
///
/// Uses the inverse of the first exported world-to-actor pose; when its
/// heading disagrees with `rotation[2]` the rotation block is rebuilt from
/// `rotation[2]`. Without any exported pose it is built from `location`
/// and `rotation[2]`.
pub fn npc_to_world(npc: &RawBox) -> Result<Transform> {
    let yaw = npc.rotation[2] / 180.0 * PI;
    let pose = match npc.world_pose() {
        Some(world2npc) => {
            let npc2world = world2npc.inverse()?;
            if (yaw - npc2world.yaw()).abs() > POSE_YAW_TOLERANCE {
                npc2world.with_yaw(yaw)
            } else {
                npc2world
            }
        }
        None => Transform::from_yaw_translation(yaw, npc.location),
    };
    Ok(pose.flip_handedness())
}

fn distance(a: [f64; 3], b: [f64; 3]) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)).sqrt()
}

fn sensor_infos(input: &FrameInput<'_>) -> Result<SensorInfos> {
    let raw = &input.frame.sensors;
    let mut cameras = BTreeMap::new();
    for camera in Camera::ALL {
        let cam = raw.camera(camera);
        cameras.insert(
            camera,
            CameraInfo {
                cam2ego: camera_to_ego(&cam.cam2ego),
                intrinsic: cam.intrinsic,
                world2cam: world_to_camera(&cam.world2cam)?,
                data_path: format!(
                    "{}/camera/{}/{}.jpg",
                    input.folder,
                    camera.rgb_folder(),
                    input.frame_name
                ),
            },
        );
    }
    Ok(SensorInfos {
        cameras,
        lidar: LidarInfo {
            lidar2ego: lidar_to_ego(&raw.lidar.lidar2ego),
            world2lidar: world_to_lidar(&raw.lidar.world2lidar),
        },
    })
}

fn camera_views<'a>(
    input: &FrameInput<'a>,
    sensors: &SensorInfos,
) -> Result<Vec<CameraView<'a>>> {
    Camera::ALL
        .into_iter()
        .map(|camera| {
            let info = &sensors.cameras[&camera];
            let depth = input.depth.get(&camera).ok_or_else(|| Error::MissingDepth {
                camera: camera.name(),
                path: input.depth_path(camera),
            })?;
            Ok(CameraView {
                camera,
                intrinsics: info.intrinsic,
                sensor_to_camera: sensor_to_camera(&info.cam2ego, &sensors.lidar.lidar2ego)?,
                depth,
            })
        })
        .collect()
}

/// Speed of one actor: exported speed for vehicles, finite difference
/// against the last emitted frame for everything else, zero without data.
fn object_speed(npc: &RawBox, id: i64, center: [f64; 3], history: &TrackHistory) -> f64 {
    let Some(speed) = npc.speed else {
        return 0.0;
    };
    if npc.is_vehicle() {
        return speed;
    }
    history
        .get(id)
        .map(|prev| (center[0] - prev[0]).hypot(center[1] - prev[1]) * FRAME_RATE_HZ)
        .unwrap_or(0.0)
}

/// Build the record of one frame.
///
/// Returns `Ok(None)` when no object survives filtering; `history` is
/// replaced by this frame's positions only when a record is emitted.
pub fn build_frame(
    input: &FrameInput<'_>,
    history: &mut TrackHistory,
    cfg: &ConversionConfig,
) -> Result<Option<FrameRecord>> {
    let frame = input.frame;
    let ego = frame
        .bounding_boxes
        .first()
        .ok_or_else(|| Error::malformed(input.anno_path(), "no ego bounding box"))?;
    let world2ego = ego
        .world2ego
        .ok_or_else(|| Error::malformed(input.anno_path(), "ego box has no world2ego"))?
        .flip_handedness();

    let ego_yaw = ego_yaw(frame.theta);
    let sensors = sensor_infos(input)?;
    let world2lidar = sensors.lidar.world2lidar;
    let map_annos = map_query::annotate(input.zone, &world2lidar, &cfg.map_query)?;

    let views = if cfg.filter_invisible {
        camera_views(input, &sensors)?
    } else {
        Vec::new()
    };

    let mut positions = TrackHistory::new();
    let mut objects = Vec::new();

    for npc in frame.bounding_boxes.iter().filter(|b| !b.is_ego()) {
        let dist = npc.distance.unwrap_or_else(|| distance(npc.location, ego.location));
        if !cfg.range.accepts(dist, npc.location[2] - ego.location[2]) {
            continue;
        }
        let id = npc.id.ok_or_else(|| {
            Error::malformed(input.anno_path(), format!("'{}' box has no id", npc.class))
        })?;

        let [cx, cy, cz] = npc.center.unwrap_or(npc.location);
        let center = [cx, -cy, cz];
        positions.insert(id, center);
        let local_center = world2lidar.apply(center);

        let yaw_local = match &npc.world2vehicle {
            Some(world2vehicle) => {
                let vehicle2lidar = world2lidar * world2vehicle.flip_handedness().inverse()?;
                vehicle2lidar.yaw()
            }
            None => -npc.rotation[2] / 180.0 * PI - ego_yaw + FRAC_PI_2,
        };
        let yaw = wrap_angle(yaw_local);

        let speed = object_speed(npc, id, center, history);
        let npc2world = npc_to_world(npc)?;

        if cfg.filter_invisible {
            let geometry = BoxGeometry {
                center: local_center,
                extent: npc.extent,
                yaw,
            };
            if classify(&geometry, &views, &cfg.visibility).is_none() {
                debug!("{}: box {} ({}) is not visible", input.frame_name, id, npc.class);
                continue;
            }
        }

        let [ex, ey, ez] = npc.extent;
        objects.push(ObjectAnnotation {
            center: local_center,
            size: [ex * 2.0, ey * 2.0, ez * 2.0],
            yaw,
            velocity: [speed * yaw.cos(), speed * yaw.sin()],
            name: npc.type_id.clone().unwrap_or_else(|| npc.class.clone()),
            class: npc.class.clone(),
            id,
            npc2world,
            num_points: npc.num_points.unwrap_or(-1),
        });
    }

    if objects.is_empty() {
        debug!(
            "{}/{}: no objects survive filtering, frame dropped",
            input.folder, input.frame_name
        );
        return Ok(None);
    }
    *history = positions;

    let town_name = town_name(input.folder)
        .ok_or_else(|| Error::malformed(input.anno_path(), "folder name has no town field"))?;
    let [e0, e1, e2] = ego.extent;

    Ok(Some(FrameRecord {
        folder: input.folder.to_owned(),
        town_name: town_name.to_owned(),
        frame_idx: input.frame_idx,
        timestamp: frame_timestamp(input.frame_idx),
        token: frame_token(input.folder, input.frame_idx),
        command_far_xy: [frame.x_command_far, -frame.y_command_far],
        command_far: frame.command_far,
        command_near_xy: [frame.x_command_near, -frame.y_command_near],
        command_near: frame.command_near,
        ego_yaw,
        ego_translation: [frame.x, -frame.y, 0.0],
        ego_vel: [frame.speed, 0.0, 0.0],
        ego_accel: [frame.acceleration[0], -frame.acceleration[1], frame.acceleration[2]],
        ego_rotation_rate: frame.angular_velocity.map(|w| -w),
        ego_size: [e1 * 2.0, e0 * 2.0, e2 * 2.0],
        world2ego,
        expert_action: input.expert_action,
        sensors,
        map_annos,
        objects,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use serde_json::{json, Value};

    const FOLDER: &str = "v1/ParkingExit_Town12_Route1_Weather3";

    fn identity() -> Value {
        json!([[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.0], [0.0, 0.0, 0.0, 1.0]])
    }

    /// Every camera looks along lidar +y (raw x ahead of ego).
    fn frame_json(boxes: Vec<Value>) -> Value {
        let camera = json!({
            "cam2ego": identity(),
            "intrinsic": [[800.0, 0.0, 800.0], [0.0, 800.0, 450.0], [0.0, 0.0, 1.0]],
            "world2cam": identity(),
        });
        let mut all = vec![json!({
            "class": "ego_vehicle",
            "id": 0,
            "location": [0.0, 0.0, 0.0],
            "rotation": [0.0, 0.0, 0.0],
            "extent": [2.5, 1.0, 0.8],
            "world2ego": identity(),
        })];
        all.extend(boxes);
        json!({
            "x": 1.0, "y": 2.0, "theta": 0.0, "speed": 3.0,
            "acceleration": [0.1, 0.2, 0.3], "angular_velocity": [0.0, 0.0, 0.5],
            "x_command_far": 10.0, "y_command_far": 4.0, "command_far": 4,
            "x_command_near": 5.0, "y_command_near": 1.0, "command_near": 4,
            "bounding_boxes": all,
            "sensors": {
                "CAM_FRONT": camera, "CAM_FRONT_RIGHT": camera, "CAM_FRONT_LEFT": camera,
                "CAM_BACK": camera, "CAM_BACK_LEFT": camera, "CAM_BACK_RIGHT": camera,
                "LIDAR_TOP": { "lidar2ego": identity(), "world2lidar": identity() },
            },
        })
    }

    /// Actor `ahead` meters in front of ego.
    fn actor(id: i64, class: &str, ahead: f64, distance: f64) -> Value {
        json!({
            "class": class,
            "type_id": format!("{class}.test"),
            "id": id,
            "distance": distance,
            "location": [ahead, 0.0, 0.0],
            "center": [ahead, 0.0, 0.0],
            "rotation": [0.0, 0.0, 0.0],
            "extent": [1.0, 1.0, 1.0],
            "speed": 7.0,
        })
    }

    fn depth_set(value: u8) -> DepthSet {
        Camera::ALL
            .into_iter()
            .map(|c| (c, DepthBuffer::filled(1600, 900, value)))
            .collect()
    }

    fn build(
        frame: &RawFrame,
        depth: &DepthSet,
        history: &mut TrackHistory,
        cfg: &ConversionConfig,
    ) -> Option<FrameRecord> {
        let zone = ZoneMap::default();
        let input = FrameInput {
            folder: FOLDER,
            frame_name: "00003",
            frame_idx: 3,
            frame,
            zone: &zone,
            depth,
            expert_action: None,
        };
        build_frame(&input, history, cfg).unwrap()
    }

    fn raw(boxes: Vec<Value>) -> RawFrame {
        serde_json::from_value(frame_json(boxes)).unwrap()
    }

    #[test]
    fn visible_object_is_kept_in_lidar_frame() {
        let frame = raw(vec![actor(7, "vehicle", 10.0, 10.0)]);
        let mut history = TrackHistory::new();
        let record = build(&frame, &depth_set(255), &mut history, &ConversionConfig::default())
            .expect("frame emitted");

        assert_eq!(record.town_name, "Town12");
        assert_eq!(record.token, format!("{FOLDER}_0003"));
        assert_eq!(record.timestamp, 300_000.0);
        assert_eq!(record.command_far_xy, [10.0, -4.0]);
        assert_eq!(record.ego_translation, [1.0, -2.0, 0.0]);
        assert_eq!(record.ego_accel, [0.1, -0.2, 0.3]);
        assert_eq!(record.ego_rotation_rate, [-0.0, -0.0, -0.5]);
        assert_eq!(record.ego_size, [2.0, 5.0, 1.6]);
        assert_relative_eq!(record.ego_yaw, FRAC_PI_2);
        assert_eq!(
            record.sensors.cameras[&Camera::BackLeft].data_path,
            format!("{FOLDER}/camera/rgb_back_left/00003.jpg")
        );

        assert_eq!(record.objects.len(), 1);
        let obj = &record.objects[0];
        assert_relative_eq!(obj.center[0], 0.0, epsilon = 1e-12);
        assert_relative_eq!(obj.center[1], 10.0, epsilon = 1e-12);
        assert_eq!(obj.size, [2.0, 2.0, 2.0]);
        assert_relative_eq!(obj.yaw, 0.0, epsilon = 1e-12);
        assert_relative_eq!(obj.velocity[0], 7.0, epsilon = 1e-12);
        assert_eq!(obj.num_points, -1);
        assert_eq!(obj.name, "vehicle.test");
        assert_eq!(history.get(7), Some([10.0, 0.0, 0.0]));
    }

    #[test]
    fn object_beyond_max_distance_is_dropped() {
        let frame = raw(vec![actor(7, "vehicle", 10.0, 80.0)]);
        let mut history = TrackHistory::new();
        assert!(build(&frame, &depth_set(255), &mut history, &ConversionConfig::default()).is_none());
        assert!(history.is_empty());
    }

    #[test]
    fn occluded_frame_is_dropped_and_history_kept() {
        let frame = raw(vec![actor(7, "vehicle", 10.0, 10.0)]);
        let mut history = TrackHistory::new();
        history.insert(99, [1.0, 1.0, 0.0]);
        assert!(build(&frame, &depth_set(0), &mut history, &ConversionConfig::default()).is_none());
        assert_eq!(history.get(99), Some([1.0, 1.0, 0.0]));
        assert_eq!(history.get(7), None);
    }

    #[test]
    fn pedestrian_speed_is_finite_difference() {
        let cfg = ConversionConfig {
            filter_invisible: false,
            ..ConversionConfig::default()
        };
        let no_depth = DepthSet::new();
        let mut history = TrackHistory::new();

        let first = build(&raw(vec![actor(3, "walker", 10.0, 10.0)]), &no_depth, &mut history, &cfg)
            .unwrap();
        assert_eq!(first.objects[0].velocity, [0.0, 0.0]);

        let second = build(&raw(vec![actor(3, "walker", 10.5, 10.5)]), &no_depth, &mut history, &cfg)
            .unwrap();
        let [vx, vy] = second.objects[0].velocity;
        assert_relative_eq!(vx.hypot(vy), 5.0, epsilon = 1e-9);
    }

    #[test]
    fn missing_depth_is_an_error_when_filtering() {
        let frame = raw(vec![actor(7, "vehicle", 10.0, 10.0)]);
        let zone = ZoneMap::default();
        let depth = DepthSet::new();
        let input = FrameInput {
            folder: FOLDER,
            frame_name: "00003",
            frame_idx: 3,
            frame: &frame,
            zone: &zone,
            depth: &depth,
            expert_action: None,
        };
        let err = build_frame(&input, &mut TrackHistory::new(), &ConversionConfig::default());
        assert!(matches!(err, Err(Error::MissingDepth { camera: "CAM_FRONT", .. })));
    }

    #[test]
    fn nan_heading_is_pi() {
        assert_relative_eq!(ego_yaw(Some(f64::NAN)), -FRAC_PI_2);
        assert_relative_eq!(ego_yaw(None), -FRAC_PI_2);
        assert_relative_eq!(ego_yaw(Some(0.3)), FRAC_PI_2 - 0.3);
    }

    #[test]
    fn town_is_second_field_of_folder_name() {
        assert_eq!(town_name("v1/Accident_Town03_Route101_Weather23"), Some("Town03"));
        assert_eq!(town_name("Accident"), None);
    }

    #[test]
    fn npc_pose_rotation_follows_exported_yaw() {
        let npc: RawBox = serde_json::from_value(json!({
            "class": "traffic_sign",
            "location": [3.0, 4.0, 0.0],
            "rotation": [0.0, 0.0, 90.0],
            "extent": [1.0, 1.0, 1.0],
            // Identity pose with translation: heading 0 disagrees with 90 deg.
            "world2sign": [[1.0, 0.0, 0.0, -3.0], [0.0, 1.0, 0.0, -4.0], [0.0, 0.0, 1.0, 0.0], [0.0, 0.0, 0.0, 1.0]],
        }))
        .unwrap();
        let pose = npc_to_world(&npc).unwrap();
        // Rebuilt at +90 deg, then mirrored: heading -90 deg, y negated.
        assert_relative_eq!(pose.yaw(), -FRAC_PI_2, epsilon = 1e-12);
        let [x, y, _] = pose.translation();
        assert_relative_eq!(x, 3.0, epsilon = 1e-12);
        assert_relative_eq!(y, -4.0, epsilon = 1e-12);

        let bare: RawBox = serde_json::from_value(json!({
            "class": "walker",
            "location": [1.0, 2.0, 3.0],
            "rotation": [0.0, 0.0, 0.0],
            "extent": [1.0, 1.0, 1.0],
        }))
        .unwrap();
        let pose = npc_to_world(&bare).unwrap();
        assert_eq!(pose.translation(), [1.0, -2.0, 3.0]);
    }

    #[test]
    fn vehicle_pose_yaw_agrees_with_rotation() {
        let cfg = ConversionConfig {
            filter_invisible: false,
            ..ConversionConfig::default()
        };
        let ego_heading = 20f64.to_radians();
        let npc_heading = 30f64.to_radians();

        // Ego turned 20 deg in the simulator frame; compass heading is 90 deg off.
        let posed_frame = |npc: Value| -> RawFrame {
            let mut v = frame_json(vec![npc]);
            v["theta"] = json!(FRAC_PI_2 + ego_heading);
            v["sensors"]["LIDAR_TOP"]["world2lidar"] =
                json!(Transform::from_yaw(ego_heading).inverse().unwrap());
            serde_json::from_value(v).unwrap()
        };

        let mut bare = actor(5, "vehicle", 10.0, 10.0);
        bare["rotation"] = json!([0.0, 0.0, 30.0]);
        let mut posed = bare.clone();
        posed["world2vehicle"] = json!(
            Transform::from_yaw_translation(npc_heading, [10.0, 0.0, 0.0])
                .inverse()
                .unwrap()
        );

        let no_depth = DepthSet::new();
        let from_pose = build(&posed_frame(posed), &no_depth, &mut TrackHistory::new(), &cfg)
            .unwrap();
        let from_rotation = build(&posed_frame(bare), &no_depth, &mut TrackHistory::new(), &cfg)
            .unwrap();

        let expected = 80f64.to_radians();
        let obj = &from_pose.objects[0];
        assert_relative_eq!(obj.yaw, expected, epsilon = 1e-9);
        assert_relative_eq!(from_rotation.objects[0].yaw, obj.yaw, epsilon = 1e-9);
        assert_relative_eq!(obj.velocity[0], 7.0 * expected.cos(), epsilon = 1e-9);
        assert_relative_eq!(obj.velocity[1], 7.0 * expected.sin(), epsilon = 1e-9);
        assert_relative_eq!(obj.npc2world.yaw(), -npc_heading, epsilon = 1e-9);
    }
}
