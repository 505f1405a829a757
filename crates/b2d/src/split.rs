//! Train/val split manifest and episode discovery.

use crate::error::{Error, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fs::File, io::BufReader, path::Path};
use walkdir::WalkDir;

/// Sub-directory of the data root holding episode folders.
pub const EPISODE_ROOT: &str = "v1";

/// `{"train": [...], "val": [...]}` of `v1/<folder>` names.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SplitManifest {
    #[serde(default)]
    pub train: Vec<String>,
    #[serde(default)]
    pub val: Vec<String>,
}

impl SplitManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        serde_json::from_reader(BufReader::new(file)).map_err(|e| Error::json(path, e))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Split {
    Train,
    Val,
}

impl Split {
    pub fn name(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
        }
    }
}

/// Episode folders look like `<Scenario>_<Town>_Route<N>_Weather<M>`.
fn is_episode_name(name: &str) -> bool {
    name.contains("Town") && name.contains("Route") && name.contains("Weather")
}

/// Folders of one split, relative to `data_root`.
///
/// `val` is the manifest list as given. `train` is every episode directory
/// under `<data_root>/v1` not listed in `val`, in name order.
pub fn discover_folders(
    data_root: &Path,
    manifest: &SplitManifest,
    split: Split,
) -> Result<Vec<String>> {
    if split == Split::Val {
        return Ok(manifest.val.clone());
    }

    let root = data_root.join(EPISODE_ROOT);
    if !root.is_dir() {
        return Err(Error::io(
            &root,
            std::io::Error::new(std::io::ErrorKind::NotFound, "episode root does not exist"),
        ));
    }
    let val: HashSet<&str> = manifest.val.iter().map(String::as_str).collect();

    let mut folders = Vec::new();
    for entry in WalkDir::new(&root)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_dir())
    {
        let Some(name) = entry.file_name().to_str() else {
            warn!("skipping non UTF-8 folder {}", entry.path().display());
            continue;
        };
        let folder = format!("{EPISODE_ROOT}/{name}");
        if is_episode_name(name) && !val.contains(folder.as_str()) {
            folders.push(folder);
        }
    }

    info!("{}: discovered {} episode folders", split.name(), folders.len());
    Ok(folders)
}
