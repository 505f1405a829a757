//! Box projection and depth-buffer visibility filtering.
//!
//! The occlusion rule is a fixed heuristic: a vertex counts as hidden when
//! every in-canvas diagonal neighbour of its pixel is strictly closer in
//! the depth buffer. It is kept bit-for-bit so converted datasets stay
//! reproducible.

use crate::camera::{Camera, Canvas};
use crate::error::{Error, Result};
use crate::transform::{Intrinsics, Transform};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Pre-filters applied before any projection.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RangeFilter {
    /// Objects further than this from ego are dropped.
    pub max_distance: f64,
    /// Objects whose |Δz| to ego exceeds this are dropped.
    pub max_height_delta: f64,
}

impl Default for RangeFilter {
    fn default() -> Self {
        Self {
            max_distance: 75.0,
            max_height_delta: 10.0,
        }
    }
}

impl RangeFilter {
    pub fn accepts(&self, distance: f64, height_delta: f64) -> bool {
        // Negated comparisons: NaN inputs pass.
        !(distance > self.max_distance) && !(height_delta.abs() > self.max_height_delta)
    }
}

/// Occlusion test sensitivity.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct VisibilityConfig {
    /// Valid requires strictly more unoccluded vertices than this.
    pub visible_threshold: usize,
    /// Valid requires strictly fewer out-of-canvas vertices than this.
    pub outlier_threshold: usize,
    /// Vertices at or beyond this depth count as outside.
    pub max_render_depth: f64,
    pub canvas: Canvas,
}

impl Default for VisibilityConfig {
    fn default() -> Self {
        Self {
            visible_threshold: 1,
            outlier_threshold: 7,
            max_render_depth: 75.0,
            canvas: Canvas::default(),
        }
    }
}

/// Oriented box in the lidar frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoxGeometry {
    pub center: [f64; 3],
    /// Half extents along the box axes.
    pub extent: [f64; 3],
    pub yaw: f64,
}

impl BoxGeometry {
    /// The 8 corners `center + Rz(-yaw)·(±ex, ±ey, ±ez)`.
    pub fn vertices(&self) -> [[f64; 3]; 8] {
        let (s, c) = (-self.yaw).sin_cos();
        let [cx, cy, cz] = self.center;
        let [ex, ey, ez] = self.extent;
        let mut out = [[0.0; 3]; 8];
        let signs = [1.0, -1.0];
        let mut i = 0;
        for sx in signs {
            for sy in signs {
                for sz in signs {
                    let (x, y) = (sx * ex, sy * ey);
                    out[i] = [cx + c * x - s * y, cy + s * x + c * y, cz + sz * ez];
                    i += 1;
                }
            }
        }
        out
    }
}

/// Single-channel per-pixel depth image of one camera.
#[derive(Clone, Debug, PartialEq)]
pub struct DepthBuffer {
    width: usize,
    height: usize,
    data: Vec<u8>,
}

impl DepthBuffer {
    /// Row-major buffer; `None` when `data` does not match the dimensions.
    pub fn new(width: usize, height: usize, data: Vec<u8>) -> Option<Self> {
        (data.len() == width * height).then_some(Self {
            width,
            height,
            data,
        })
    }

    /// Constant-depth buffer.
    pub fn filled(width: usize, height: usize, value: u8) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }

    /// Keep the first plane in BGR order (blue) of a decoded depth image.
    pub fn from_image(img: &DynamicImage) -> Self {
        let rgb = img.to_rgb8();
        let (w, h) = rgb.dimensions();
        let data = rgb.pixels().map(|p| p.0[2]).collect();
        Self {
            width: w as usize,
            height: h as usize,
            data,
        }
    }

    /// Load a camera depth image; missing, undecodable or wrongly sized
    /// files are errors.
    pub fn load(path: &Path, camera: Camera, canvas: Canvas) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::MissingDepth {
                camera: camera.name(),
                path: path.to_path_buf(),
            });
        }
        let img = image::open(path).map_err(|source| Error::Image {
            path: path.to_path_buf(),
            source,
        })?;
        let buf = Self::from_image(&img);
        if buf.width != canvas.width || buf.height != canvas.height {
            return Err(Error::malformed(
                path,
                format!(
                    "{} depth is {}x{}, expected {}x{}",
                    camera, buf.width, buf.height, canvas.width, canvas.height
                ),
            ));
        }
        Ok(buf)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Depth at (row, col); `None` outside the buffer.
    #[inline]
    pub fn at(&self, row: i64, col: i64) -> Option<f64> {
        if row < 0 || col < 0 || row as usize >= self.height || col as usize >= self.width {
            return None;
        }
        Some(self.data[row as usize * self.width + col as usize] as f64)
    }
}

/// Vertex in front of a camera.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProjectedVertex {
    /// Pixel column (u).
    pub col: f64,
    /// Pixel row (v).
    pub row: f64,
    /// Camera-frame z.
    pub depth: f64,
}

/// Transform lidar-frame vertices into the camera and project them. Vertices
/// with non-positive depth are dropped here and take no further part.
pub fn project_vertices(
    vertices: &[[f64; 3]],
    intrinsics: &Intrinsics,
    sensor_to_camera: &Transform,
) -> Vec<ProjectedVertex> {
    vertices
        .iter()
        .filter_map(|v| {
            let p = sensor_to_camera.apply(*v);
            if p[2] <= 0.0 {
                return None;
            }
            intrinsics.project(p).map(|[u, v]| ProjectedVertex {
                col: u,
                row: v,
                depth: p[2],
            })
        })
        .collect()
}

/// Hidden when every diagonal neighbour inside the canvas is strictly
/// closer than the vertex (vacuously true when none is inside).
pub fn point_is_occluded(
    row: f64,
    col: f64,
    vertex_depth: f64,
    depth: &DepthBuffer,
    canvas: Canvas,
) -> bool {
    let (y, x) = (row as i64, col as i64);
    [(1, 1), (1, -1), (-1, 1), (-1, -1)]
        .into_iter()
        .map(|(dy, dx)| (y + dy, x + dx))
        .filter(|&(ny, nx)| canvas.contains(ny as f64, nx as f64))
        .all(|(ny, nx)| depth.at(ny, nx).map_or(false, |d| d < vertex_depth))
}

/// Per-camera vertex tallies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OcclusionStats {
    pub visible: usize,
    pub occluded: usize,
    pub outside: usize,
}

impl OcclusionStats {
    pub fn is_valid(&self, cfg: &VisibilityConfig) -> bool {
        self.visible > cfg.visible_threshold && self.outside < cfg.outlier_threshold
    }
}

/// Tally projected vertices against one camera's depth buffer.
pub fn occlusion_stats(
    vertices: &[ProjectedVertex],
    depth: &DepthBuffer,
    cfg: &VisibilityConfig,
) -> OcclusionStats {
    let mut stats = OcclusionStats::default();
    for v in vertices {
        let in_range = v.depth > 0.0 && v.depth < cfg.max_render_depth;
        if in_range && cfg.canvas.contains(v.row, v.col) {
            if point_is_occluded(v.row, v.col, v.depth, depth, cfg.canvas) {
                stats.occluded += 1;
            } else {
                stats.visible += 1;
            }
        } else {
            stats.outside += 1;
        }
    }
    stats
}

/// Everything needed to test one camera.
#[derive(Clone, Copy, Debug)]
pub struct CameraView<'a> {
    pub camera: Camera,
    pub intrinsics: Intrinsics,
    /// `inverse(cam2ego) · lidar2ego`.
    pub sensor_to_camera: Transform,
    pub depth: &'a DepthBuffer,
}

/// Stats of one box in one camera.
pub fn camera_stats(
    vertices: &[[f64; 3]],
    view: &CameraView<'_>,
    cfg: &VisibilityConfig,
) -> OcclusionStats {
    let projected = project_vertices(vertices, &view.intrinsics, &view.sensor_to_camera);
    occlusion_stats(&projected, view.depth, cfg)
}

/// First camera in which the box is valid, or `None` when it is hidden
/// from every camera.
pub fn classify(
    bbox: &BoxGeometry,
    views: &[CameraView<'_>],
    cfg: &VisibilityConfig,
) -> Option<Camera> {
    let vertices = bbox.vertices();
    views
        .iter()
        .find(|view| camera_stats(&vertices, view, cfg).is_valid(cfg))
        .map(|view| view.camera)
}
