//! Per-frame vector map annotation.
//!
//! Lanes near the ego are clipped to a lidar-frame window and simplified.
//! Trigger volumes are only exported when they lie entirely inside the
//! window. Anything with fewer than two points left is skipped.

use crate::error::Result;
use crate::map::ZoneMap;
use crate::polyline::{simplify, Point2};
use crate::record::{MapAnnotation, MapClass};
use crate::transform::Transform;
use serde::{Deserialize, Serialize};

/// Open lidar-frame xy rectangle. z is never clipped.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RangeWindow {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl Default for RangeWindow {
    fn default() -> Self {
        Self {
            x_min: -15.0,
            y_min: -30.0,
            x_max: 15.0,
            y_max: 30.0,
        }
    }
}

impl RangeWindow {
    #[inline]
    pub fn contains(&self, p: [f64; 3]) -> bool {
        p[0] > self.x_min && p[0] < self.x_max && p[1] > self.y_min && p[1] < self.y_max
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MapQueryConfig {
    /// Lanes whose nearest coarse sample is at least this far from ego
    /// (xy, world frame) are not considered.
    pub lane_radius: f64,
    pub window: RangeWindow,
    /// Simplification tolerance in meters.
    pub tolerance: f64,
}

impl Default for MapQueryConfig {
    fn default() -> Self {
        Self {
            lane_radius: 50.0,
            window: RangeWindow::default(),
            tolerance: 0.2,
        }
    }
}

fn lane_is_near(samples: &[[f64; 3]], ego_xy: [f64; 2], radius: f64) -> bool {
    samples
        .iter()
        .map(|p| (p[0] - ego_xy[0]).hypot(p[1] - ego_xy[1]))
        .fold(f64::INFINITY, f64::min)
        < radius
}

fn to_lidar<'a>(
    points: &'a [[f64; 3]],
    world2lidar: &'a Transform,
) -> impl Iterator<Item = [f64; 3]> + 'a {
    points.iter().map(move |p| world2lidar.apply(*p))
}

fn flatten(points: impl IntoIterator<Item = [f64; 3]>) -> Vec<Point2> {
    points.into_iter().map(|p| [p[0], p[1]]).collect()
}

/// Map annotation around the ego pose encoded by `world2lidar`.
pub fn annotate(
    zone: &ZoneMap,
    world2lidar: &Transform,
    cfg: &MapQueryConfig,
) -> Result<MapAnnotation> {
    let [ex, ey, _] = world2lidar.inverse()?.translation();
    let ego_xy = [ex, ey];
    let mut anno = MapAnnotation::default();

    for lane in &zone.lanes {
        if !lane_is_near(&lane.sample_points, ego_xy, cfg.lane_radius) {
            continue;
        }
        let Some(class) = MapClass::from_type_name(&lane.kind) else {
            continue;
        };
        let window = cfg.window;
        let inside = flatten(to_lidar(&lane.points, world2lidar).filter(|p| window.contains(*p)));
        if inside.len() > 1 {
            anno.push(class, simplify(&inside, cfg.tolerance));
        }
    }

    for volume in &zone.trigger_volumes {
        let Some(class) = MapClass::from_type_name(&volume.kind) else {
            continue;
        };
        let local: Vec<[f64; 3]> = to_lidar(&volume.points, world2lidar).collect();
        if local.len() > 1 && local.iter().all(|p| cfg.window.contains(*p)) {
            anno.push(class, simplify(&flatten(local), cfg.tolerance));
        }
    }

    Ok(anno)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::{Lane, TriggerVolume};

    fn lane(kind: &str, points: Vec<[f64; 3]>) -> Lane {
        Lane {
            kind: kind.into(),
            sample_points: vec![points[0], points[points.len() - 1]],
            points,
        }
    }

    fn volume(kind: &str, points: Vec<[f64; 3]>) -> TriggerVolume {
        TriggerVolume {
            kind: kind.into(),
            centroid: [0.0; 3],
            points,
        }
    }

    #[test]
    fn lane_with_partial_containment_is_clipped() {
        // 10 points along x, 3 of them inside (-15, 15).
        let points: Vec<[f64; 3]> = (0..10).map(|i| [5.0 + 4.0 * i as f64, 1.0, 0.0]).collect();
        let zone = ZoneMap {
            lanes: vec![lane("Solid", points)],
            trigger_volumes: vec![],
        };
        let anno = annotate(&zone, &Transform::identity(), &MapQueryConfig::default()).unwrap();
        let lines = anno.get(MapClass::Solid);
        assert_eq!(lines.len(), 1);
        // Collinear: simplified to its endpoints.
        assert_eq!(lines[0], vec![[5.0, 1.0], [13.0, 1.0]]);
    }

    #[test]
    fn trigger_volume_requires_full_containment() {
        let partial = vec![
            [0.0, 0.0, 0.0],
            [2.0, 0.0, 0.0],
            [2.0, 2.0, 0.0],
            [20.0, 2.0, 0.0],
        ];
        let full = vec![[0.0, 0.0, 5.0], [2.0, 0.0, 5.0], [2.0, 2.0, 5.0], [0.0, 2.0, 5.0]];
        let zone = ZoneMap {
            lanes: vec![],
            trigger_volumes: vec![volume("StopSign", partial), volume("TrafficLight", full)],
        };
        let anno = annotate(&zone, &Transform::identity(), &MapQueryConfig::default()).unwrap();
        assert!(anno.get(MapClass::StopSign).is_empty());
        assert_eq!(anno.get(MapClass::TrafficLight).len(), 1);
        assert_eq!(anno.get(MapClass::TrafficLight)[0].len(), 4);
    }

    #[test]
    fn single_point_trigger_volume_is_skipped() {
        let zone = ZoneMap {
            lanes: vec![],
            trigger_volumes: vec![
                volume("StopSign", vec![[1.0, 1.0, 0.0]]),
                volume("StopSign", vec![[1.0, 1.0, 0.0], [3.0, 1.0, 0.0]]),
            ],
        };
        let anno = annotate(&zone, &Transform::identity(), &MapQueryConfig::default()).unwrap();
        assert_eq!(anno.get(MapClass::StopSign), &[vec![[1.0, 1.0], [3.0, 1.0]]]);
    }

    #[test]
    fn unknown_types_and_far_lanes_are_skipped() {
        let near: Vec<[f64; 3]> = (0..5).map(|i| [i as f64, 0.0, 0.0]).collect();
        let far: Vec<[f64; 3]> = (0..5).map(|i| [60.0 + i as f64, 0.0, 0.0]).collect();
        let zone = ZoneMap {
            lanes: vec![lane("Curb", near.clone()), lane("Broken", far), lane("Center", near)],
            trigger_volumes: vec![],
        };
        let anno = annotate(&zone, &Transform::identity(), &MapQueryConfig::default()).unwrap();
        assert_eq!(anno.len(), 1);
        assert_eq!(anno.get(MapClass::Center).len(), 1);
        assert!(anno.get(MapClass::Broken).is_empty());
        assert_eq!(anno.classes().count(), 6);
    }

    #[test]
    fn lanes_are_expressed_in_the_lidar_frame() {
        // Ego at world (100, 0); world2lidar shifts it back to the origin.
        let world2lidar = Transform::from_yaw_translation(0.0, [-100.0, 0.0, 0.0]);
        let points: Vec<[f64; 3]> = (0..3).map(|i| [100.0 + i as f64, 2.0, 0.0]).collect();
        let zone = ZoneMap {
            lanes: vec![lane("Broken", points)],
            trigger_volumes: vec![],
        };
        let anno = annotate(&zone, &world2lidar, &MapQueryConfig::default()).unwrap();
        assert_eq!(anno.get(MapClass::Broken)[0], vec![[0.0, 2.0], [2.0, 2.0]]);
    }

    #[test]
    fn window_is_strict() {
        let w = RangeWindow::default();
        assert!(!w.contains([15.0, 0.0, 0.0]));
        assert!(!w.contains([0.0, -30.0, 0.0]));
        assert!(w.contains([14.99, 29.99, 100.0]));
    }
}
