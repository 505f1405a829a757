//! Homogeneous transforms between simulator and target frames.
//!
//! The simulator exports every pose in a left-handed frame (x forward,
//! y right, z up). Records are written in the right-handed convention used
//! by nuScenes-style consumers, so each raw matrix is conjugated or
//! composed with one of the fixed constants below:
//!
//! ```text
//!   cam2ego     = L · raw_cam2ego · STAND_TO_UE4_ROTATE
//!   world2cam   = STAND_TO_UE4_ROTATE⁻¹ · raw_world2cam · L
//!   lidar2ego   = L · raw_lidar2ego · L · LIDAR_TO_RIGHTHAND_EGO
//!   world2lidar = LEFTHAND_EGO_TO_LIDAR · raw_world2lidar · L
//!   world2ego   = L · raw_world2ego · L
//!   lidar2cam   = cam2ego⁻¹ · lidar2ego
//! ```
//!
//! `L` is [`LEFT_TO_RIGHT`]. Composition is plain matrix multiplication,
//! applied right to left.

use crate::error::{Error, Result};
use nalgebra::{ArrayStorage, Matrix3, Matrix4, Rotation3, Vector3, Vector4};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::ops::Mul;

/// Row-major 4x4 layout used on disk.
pub type Rows4 = [[f64; 4]; 4];

/// Row-major 3x3 layout used on disk.
pub type Rows3 = [[f64; 3]; 3];

/// Rows as read back: a `null` entry (a non-finite value on export) is NaN.
type NullableRows4 = [[Option<f64>; 4]; 4];
type NullableRows3 = [[Option<f64>; 3]; 3];

/// Immutable 4x4 homogeneous matrix.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "NullableRows4", into = "Rows4")]
pub struct Transform(Matrix4<f64>);

const fn from_rows(rows: Rows4) -> Transform {
    // ArrayStorage is column-major.
    let mut cols = [[0.0; 4]; 4];
    let mut r = 0;
    while r < 4 {
        let mut c = 0;
        while c < 4 {
            cols[c][r] = rows[r][c];
            c += 1;
        }
        r += 1;
    }
    Transform(Matrix4::from_array_storage(ArrayStorage(cols)))
}

/// Mirror of the y axis: simulator left-handed <-> target right-handed.
pub const LEFT_TO_RIGHT: Transform = from_rows([
    [1.0, 0.0, 0.0, 0.0],
    [0.0, -1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
]);

/// Optical camera axes (z forward, x right, y down) to UE4 axes.
pub const STAND_TO_UE4_ROTATE: Transform = from_rows([
    [0.0, 0.0, 1.0, 0.0],
    [1.0, 0.0, 0.0, 0.0],
    [0.0, -1.0, 0.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
]);

/// Target lidar frame (x right, y forward) to right-handed ego frame.
pub const LIDAR_TO_RIGHTHAND_EGO: Transform = from_rows([
    [0.0, 1.0, 0.0, 0.0],
    [-1.0, 0.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
]);

/// Left-handed ego frame to target lidar frame.
pub const LEFTHAND_EGO_TO_LIDAR: Transform = from_rows([
    [0.0, 1.0, 0.0, 0.0],
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
]);

impl Transform {
    /// The identity transform.
    pub fn identity() -> Self {
        Transform(Matrix4::identity())
    }

    /// Rotation of `yaw` radians about +z, no translation.
    pub fn from_yaw(yaw: f64) -> Self {
        Self::identity().with_yaw(yaw)
    }

    /// Rotation of `yaw` radians about +z followed by a translation.
    pub fn from_yaw_translation(yaw: f64, t: [f64; 3]) -> Self {
        let mut m = Self::from_yaw(yaw).0;
        m[(0, 3)] = t[0];
        m[(1, 3)] = t[1];
        m[(2, 3)] = t[2];
        Transform(m)
    }

    /// Copy of `self` with the upper 3x3 block replaced by a pure yaw rotation.
    pub fn with_yaw(&self, yaw: f64) -> Self {
        let r = Rotation3::from_axis_angle(&Vector3::z_axis(), yaw);
        let mut m = self.0;
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(r.matrix());
        Transform(m)
    }

    /// Underlying matrix.
    pub fn matrix(&self) -> &Matrix4<f64> {
        &self.0
    }

    /// Element at (row, col).
    pub fn at(&self, row: usize, col: usize) -> f64 {
        self.0[(row, col)]
    }

    /// `self · rhs`.
    pub fn compose(&self, rhs: &Transform) -> Transform {
        Transform(self.0 * rhs.0)
    }

    /// General 4x4 inverse.
    ///
    /// Simulator matrices are not guaranteed to be rigid (scaled actors,
    /// rounding in the export), so no transpose shortcut is taken.
    pub fn inverse(&self) -> Result<Transform> {
        self.0
            .try_inverse()
            .map(Transform)
            .ok_or(Error::SingularTransform("matrix has no inverse"))
    }

    /// `L · self · L`: re-express a left-handed pose in the right-handed frame
    /// (or back, the operation is an involution).
    pub fn flip_handedness(&self) -> Transform {
        LEFT_TO_RIGHT.compose(self).compose(&LEFT_TO_RIGHT)
    }

    /// Apply to a point (w = 1). The result is not divided by w.
    pub fn apply(&self, p: [f64; 3]) -> [f64; 3] {
        let v = self.0 * Vector4::new(p[0], p[1], p[2], 1.0);
        [v.x, v.y, v.z]
    }

    /// Heading of the rotation block, `atan2(m10, m00)`.
    pub fn yaw(&self) -> f64 {
        self.0[(1, 0)].atan2(self.0[(0, 0)])
    }

    /// Translation column.
    pub fn translation(&self) -> [f64; 3] {
        [self.0[(0, 3)], self.0[(1, 3)], self.0[(2, 3)]]
    }

    /// True when every element is within `eps` of `other`.
    pub fn approx_eq(&self, other: &Transform, eps: f64) -> bool {
        (self.0 - other.0).amax() <= eps
    }
}

impl Mul for Transform {
    type Output = Transform;

    fn mul(self, rhs: Transform) -> Transform {
        self.compose(&rhs)
    }
}

impl From<Rows4> for Transform {
    fn from(rows: Rows4) -> Self {
        Transform(Matrix4::from_fn(|r, c| rows[r][c]))
    }
}

impl From<NullableRows4> for Transform {
    fn from(rows: NullableRows4) -> Self {
        Transform(Matrix4::from_fn(|r, c| rows[r][c].unwrap_or(f64::NAN)))
    }
}

impl From<Transform> for Rows4 {
    fn from(t: Transform) -> Self {
        std::array::from_fn(|r| std::array::from_fn(|c| t.0[(r, c)]))
    }
}

/// Pinhole intrinsic matrix `K`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "NullableRows3", into = "Rows3")]
pub struct Intrinsics(Matrix3<f64>);

impl Intrinsics {
    /// Zero-skew intrinsics from focal lengths and principal point.
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Intrinsics(Matrix3::new(fx, 0.0, cx, 0.0, fy, cy, 0.0, 0.0, 1.0))
    }

    /// Project a camera-frame point to pixel `(u, v)` by dividing by the third
    /// component of `K·p`. Returns `None` when that component is zero.
    pub fn project(&self, p: [f64; 3]) -> Option<[f64; 2]> {
        let q = self.0 * Vector3::new(p[0], p[1], p[2]);
        if q.z == 0.0 {
            return None;
        }
        Some([q.x / q.z, q.y / q.z])
    }
}

impl From<Rows3> for Intrinsics {
    fn from(rows: Rows3) -> Self {
        Intrinsics(Matrix3::from_fn(|r, c| rows[r][c]))
    }
}

impl From<NullableRows3> for Intrinsics {
    fn from(rows: NullableRows3) -> Self {
        Intrinsics(Matrix3::from_fn(|r, c| rows[r][c].unwrap_or(f64::NAN)))
    }
}

impl From<Intrinsics> for Rows3 {
    fn from(k: Intrinsics) -> Self {
        std::array::from_fn(|r| std::array::from_fn(|c| k.0[(r, c)]))
    }
}

/// Raw UE4 camera-to-ego pose -> right-handed camera(optical)-to-ego.
pub fn camera_to_ego(raw: &Transform) -> Transform {
    LEFT_TO_RIGHT * *raw * STAND_TO_UE4_ROTATE
}

/// Raw world-to-camera -> right-handed world to optical camera frame.
pub fn world_to_camera(raw: &Transform) -> Result<Transform> {
    Ok(STAND_TO_UE4_ROTATE.inverse()? * *raw * LEFT_TO_RIGHT)
}

/// Raw lidar-to-ego -> target lidar-to-ego.
pub fn lidar_to_ego(raw: &Transform) -> Transform {
    raw.flip_handedness() * LIDAR_TO_RIGHTHAND_EGO
}

/// Raw world-to-lidar -> right-handed world to target lidar frame.
pub fn world_to_lidar(raw: &Transform) -> Transform {
    LEFTHAND_EGO_TO_LIDAR * *raw * LEFT_TO_RIGHT
}

/// Sensor-to-camera chain: `inverse(cam2ego) · sensor2ego`.
pub fn sensor_to_camera(cam2ego: &Transform, sensor2ego: &Transform) -> Result<Transform> {
    Ok(cam2ego.inverse()? * *sensor2ego)
}

/// Wrap an angle into `(-π, π]`.
pub fn wrap_angle(yaw: f64) -> f64 {
    let mut a = yaw % (2.0 * PI);
    if a > PI {
        a -= 2.0 * PI;
    } else if a <= -PI {
        a += 2.0 * PI;
    }
    a
}
