//! Conversion of one episode folder.

use crate::builder::{build_frame, town_name, DepthSet, FrameInput, TrackHistory};
use crate::camera::{Camera, Canvas};
use crate::config::ConversionConfig;
use crate::error::{Error, Result};
use crate::expert::load_expert_action;
use crate::map::MapInfos;
use crate::projector::DepthBuffer;
use crate::raw::load_frame;
use crate::record::FrameRecord;
use log::{debug, info, warn};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Annotation folder inside an episode.
pub const ANNO_DIR: &str = "anno";

const ANNO_SUFFIX: &str = ".json.gz";

/// One annotation file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameFile {
    pub index: u32,
    /// File name without the suffix, e.g. `00012`.
    pub name: String,
    pub path: PathBuf,
}

/// Annotation files of an episode, sorted by numeric frame index.
pub fn list_frames(episode_dir: &Path) -> Result<Vec<FrameFile>> {
    let anno_dir = episode_dir.join(ANNO_DIR);
    if !anno_dir.is_dir() {
        return Err(Error::malformed(&anno_dir, "episode has no annotation folder"));
    }

    let mut frames = Vec::new();
    for entry in WalkDir::new(&anno_dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| {
            let source = e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("directory walk failed"));
            Error::io(&anno_dir, source)
        })?;
        let Some(file_name) = entry.file_name().to_str() else {
            continue;
        };
        let Some(name) = file_name.strip_suffix(ANNO_SUFFIX) else {
            warn!("{}: ignoring {}", anno_dir.display(), file_name);
            continue;
        };
        let index = name
            .parse()
            .map_err(|_| Error::malformed(entry.path(), "frame name is not a number"))?;
        frames.push(FrameFile {
            index,
            name: name.to_owned(),
            path: entry.into_path(),
        });
    }
    frames.sort_by_key(|f| f.index);
    Ok(frames)
}

/// Decode the six depth images of one frame in parallel.
pub fn load_depth_set(episode_dir: &Path, frame_name: &str, canvas: Canvas) -> Result<DepthSet> {
    Camera::ALL
        .par_iter()
        .map(|&camera| {
            let path = episode_dir
                .join("camera")
                .join(camera.depth_folder())
                .join(format!("{frame_name}.png"));
            DepthBuffer::load(&path, camera, canvas).map(|buf| (camera, buf))
        })
        .collect()
}

/// Convert every frame of `folder` (relative to `data_root`). Frames
/// without surviving objects are skipped.
pub fn process_folder(
    data_root: &Path,
    folder: &str,
    maps: &MapInfos,
    cfg: &ConversionConfig,
) -> Result<Vec<FrameRecord>> {
    let episode_dir = data_root.join(folder);
    let town = town_name(folder).ok_or_else(|| {
        Error::malformed(&episode_dir, "folder name has no town field")
    })?;
    let zone = maps
        .get(town)
        .ok_or_else(|| Error::UnknownZone(town.to_owned()))?;

    let frames = list_frames(&episode_dir)?;
    info!("{folder}: {} frames", frames.len());

    let mut history = TrackHistory::new();
    let mut records = Vec::with_capacity(frames.len());

    for file in &frames {
        debug!("{folder}: frame {}", file.name);
        let frame = load_frame(&file.path)?;
        let depth = if cfg.filter_invisible {
            load_depth_set(&episode_dir, &file.name, cfg.visibility.canvas)?
        } else {
            DepthSet::new()
        };
        let expert_action = if cfg.read_expert_actions {
            Some(load_expert_action(&episode_dir, file.index)?)
        } else {
            None
        };

        let input = FrameInput {
            folder,
            frame_name: &file.name,
            frame_idx: file.index,
            frame: &frame,
            zone,
            depth: &depth,
            expert_action,
        };
        if let Some(record) = build_frame(&input, &mut history, cfg)? {
            records.push(record);
        }
    }

    info!("{folder}: kept {}/{} frames", records.len(), frames.len());
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn frames_sort_numerically() {
        let dir = tempfile::tempdir().unwrap();
        let anno = dir.path().join(ANNO_DIR);
        fs::create_dir(&anno).unwrap();
        for name in ["10.json.gz", "9.json.gz", "00002.json.gz", "notes.txt"] {
            fs::write(anno.join(name), b"").unwrap();
        }
        let frames = list_frames(dir.path()).unwrap();
        let names: Vec<&str> = frames.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["00002", "9", "10"]);
        assert_eq!(frames[0].index, 2);
    }

    #[test]
    fn non_numeric_frame_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let anno = dir.path().join(ANNO_DIR);
        fs::create_dir(&anno).unwrap();
        fs::write(anno.join("last.json.gz"), b"").unwrap();
        assert!(matches!(list_frames(dir.path()), Err(Error::MalformedFrame { .. })));
    }

    #[test]
    fn unknown_town_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = process_folder(
            dir.path(),
            "v1/Accident_Town99_Route1_Weather1",
            &MapInfos::new(),
            &ConversionConfig::default(),
        );
        assert!(matches!(err, Err(Error::UnknownZone(z)) if z == "Town99"));
    }

    #[test]
    fn depth_set_covers_every_camera() {
        let dir = tempfile::tempdir().unwrap();
        let canvas = Canvas {
            width: 4,
            height: 3,
        };
        for camera in Camera::ALL {
            let folder = dir.path().join("camera").join(camera.depth_folder());
            fs::create_dir_all(&folder).unwrap();
            image::RgbImage::from_pixel(4, 3, image::Rgb([0, 0, 42]))
                .save(folder.join("00001.png"))
                .unwrap();
        }
        let set = load_depth_set(dir.path(), "00001", canvas).unwrap();
        assert_eq!(set.len(), 6);
        assert_eq!(set[&Camera::BackRight].at(2, 3), Some(42.0));

        fs::remove_file(dir.path().join("camera/depth_front_left/00001.png")).unwrap();
        assert!(matches!(
            load_depth_set(dir.path(), "00001", canvas),
            Err(Error::MissingDepth { camera: "CAM_FRONT_LEFT", .. })
        ));
    }
}
