//! Expert assessment decoding.
//!
//! Each frame has an `expert_assessment/<frame - 1>.npz` whose `arr_0`
//! array ends with a discrete action id. Ids index a fixed table of
//! `(throttle, steer, brake)` controls.

use crate::error::{Error, Result};
use crate::npy::read_npz_array;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Folder of expert assessments inside an episode.
pub const EXPERT_DIR: &str = "expert_assessment";

/// Array holding the assessment vector.
const EXPERT_ARRAY: &str = "arr_0";

/// Control triple of one discrete action.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExpertAction {
    pub throttle: f64,
    pub steer: f64,
    pub brake: f64,
}

/// `(throttle, steer, brake, reverse)`; `reverse` is carried by the table but
/// not emitted.
#[rustfmt::skip]
const DISCRETE_ACTIONS: [(f64, f64, f64, bool); 39] = [
    (0.0,  0.0, 1.0, false),
    (0.7, -0.5, 0.0, false),
    (0.7, -0.3, 0.0, false),
    (0.7, -0.2, 0.0, false),
    (0.7, -0.1, 0.0, false),
    (0.7,  0.0, 0.0, false),
    (0.7,  0.1, 0.0, false),
    (0.7,  0.2, 0.0, false),
    (0.7,  0.3, 0.0, false),
    (0.7,  0.5, 0.0, false),
    (0.3, -0.7, 0.0, false),
    (0.3, -0.5, 0.0, false),
    (0.3, -0.3, 0.0, false),
    (0.3, -0.2, 0.0, false),
    (0.3, -0.1, 0.0, false),
    (0.3,  0.0, 0.0, false),
    (0.3,  0.1, 0.0, false),
    (0.3,  0.2, 0.0, false),
    (0.3,  0.3, 0.0, false),
    (0.3,  0.5, 0.0, false),
    (0.3,  0.7, 0.0, false),
    (0.0, -1.0, 0.0, false),
    (0.0, -0.6, 0.0, false),
    (0.0, -0.3, 0.0, false),
    (0.0, -0.1, 0.0, false),
    (1.0,  0.0, 0.0, false),
    (0.0,  0.1, 0.0, false),
    (0.0,  0.3, 0.0, false),
    (0.0,  0.6, 0.0, false),
    (0.0,  1.0, 0.0, false),
    (0.5, -0.5, 0.0, true),
    (0.5, -0.3, 0.0, true),
    (0.5, -0.2, 0.0, true),
    (0.5, -0.1, 0.0, true),
    (0.5,  0.0, 0.0, true),
    (0.5,  0.1, 0.0, true),
    (0.5,  0.2, 0.0, true),
    (0.5,  0.3, 0.0, true),
    (0.5,  0.5, 0.0, true),
];

/// Look up a discrete action id.
pub fn action_from_id(id: i64) -> Result<ExpertAction> {
    let (throttle, steer, brake, _reverse) = usize::try_from(id)
        .ok()
        .and_then(|i| DISCRETE_ACTIONS.get(i))
        .copied()
        .ok_or(Error::UnknownAction(id))?;
    Ok(ExpertAction {
        throttle,
        steer,
        brake,
    })
}

/// Assessment file name for a frame: the previous frame index, zero padded
/// to five characters (`-0001.npz` for frame 0).
pub fn expert_file_name(frame_idx: u32) -> String {
    format!("{:05}.npz", frame_idx as i64 - 1)
}

/// Full path of the assessment for `frame_idx` inside `episode_dir`.
pub fn expert_file(episode_dir: &Path, frame_idx: u32) -> PathBuf {
    episode_dir
        .join(EXPERT_DIR)
        .join(expert_file_name(frame_idx))
}

/// Read the assessment of one frame and decode its action id.
pub fn load_expert_action(episode_dir: &Path, frame_idx: u32) -> Result<ExpertAction> {
    let path = expert_file(episode_dir, frame_idx);
    if !path.is_file() {
        return Err(Error::malformed(&path, "expert assessment is missing"));
    }
    let arr = read_npz_array(&path, EXPERT_ARRAY)?;
    let id = arr
        .last()
        .ok_or_else(|| Error::malformed(&path, "expert assessment is empty"))?;
    if id.fract() != 0.0 || !id.is_finite() {
        return Err(Error::malformed(&path, format!("action id {id} is not integral")));
    }
    action_from_id(id as i64)
}
