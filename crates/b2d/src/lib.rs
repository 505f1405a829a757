//! B2D: Bench2Drive episode to training-info conversion.
//!
//! - Converts left-handed simulator poses into right-handed ego/lidar/camera
//!   frames ([`transform`]).
//! - Preprocesses per-town HD map archives into lanes and trigger volumes
//!   ([`map`]) and queries them per frame ([`map_query`]).
//! - Keeps only objects visible in at least one camera, using a depth-buffer
//!   occlusion test on the projected box corners ([`projector`]).
//! - Builds one [`FrameRecord`] per frame ([`builder`]) and converts whole
//!   splits with a pool of worker threads ([`pipeline`]).
//!
//! Inputs per episode folder and outputs under the output directory:
//!
//! ```text
//!   <data_root>/v1/<Scenario>_<Town>_Route<N>_Weather<M>/
//!     anno/<frame>.json.gz                per-frame annotation (gzip JSON)
//!     camera/depth_<cam>/<frame>.png      depth image per camera
//!     expert_assessment/<frame-1>.npz     expert action (arr_0, last element)
//!
//!   <out_dir>/
//!     b2d_map_infos.json                  preprocessed map infos
//!     <tmp_dir>/b2d_infos_<split>_<i>.json  one shard per worker
//!     b2d_infos_<split>.json              merged corpus
//! ```

pub mod builder;
pub mod camera;
pub mod config;
pub mod corpus;
pub mod episode;
pub mod error;
pub mod expert;
pub mod map;
pub mod map_query;
pub mod npy;
pub mod pickle;
pub mod pipeline;
pub mod polyline;
pub mod projector;
pub mod raw;
pub mod record;
pub mod split;
pub mod transform;

pub use config::ConversionConfig;
pub use error::{Error, Result};
pub use map::{load_map_infos, preprocess_map_dir, save_map_infos, MapInfos};
pub use pipeline::{run_split, SplitJob};
pub use record::FrameRecord;
pub use split::{discover_folders, Split, SplitManifest};

/// File name of the preprocessed map cache.
pub const MAP_INFOS_FILE: &str = "b2d_map_infos.json";
