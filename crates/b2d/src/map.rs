//! Per-zone HD map preprocessing.
//!
//! A zone archive is a zip container. The dataset ships `.npz` files whose
//! `arr.npy` member is a pickled object array of the nested road layout; a
//! `.json` member with the same layout is read in preference when present:
//!
//! ```text
//! { "<road_id>": {
//!     "<lane_id>":        [ { "Points": [[[x, y, z], ...], ...], "Type": "Broken" }, ... ],
//!     "Trigger_Volumes":  [ { "Points": [[x, y, z], ...],        "Type": "StopSign" }, ... ]
//! } }
//! ```
//!
//! Each raw lane point is a sequence whose first element is the position;
//! trailing elements are ignored. All output geometry has y negated
//! (left-handed -> right-handed).

use crate::error::{Error, Result};
use crate::npy;
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::de::{self, Deserializer, IgnoredAny, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    collections::BTreeMap,
    fmt,
    fs::File,
    io::{BufReader, BufWriter, Read},
    path::{Path, PathBuf},
};
use walkdir::WalkDir;

/// Stride of the coarse lane sampling used for the proximity pre-filter.
pub const LANE_SAMPLE_STRIDE: usize = 50;

/// Key under a road that holds trigger volumes instead of lanes.
const TRIGGER_VOLUMES_KEY: &str = "Trigger_Volumes";

/// All zones, keyed by town name.
pub type MapInfos = BTreeMap<String, ZoneMap>;

/// Processed geometry of one zone.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneMap {
    pub lanes: Vec<Lane>,
    pub trigger_volumes: Vec<TriggerVolume>,
}

/// Full-resolution lane polyline plus its coarse samples.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Lane {
    /// Lane marking type, e.g. `Broken` or `SolidSolid`.
    pub kind: String,
    pub points: Vec<[f64; 3]>,
    /// Every [`LANE_SAMPLE_STRIDE`]-th point plus the final point.
    pub sample_points: Vec<[f64; 3]>,
}

/// Labeled trigger region.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TriggerVolume {
    pub kind: String,
    pub points: Vec<[f64; 3]>,
    pub centroid: [f64; 3],
}

#[derive(Debug, Deserialize)]
struct RawLane {
    #[serde(rename = "Points")]
    points: Vec<RawLanePoint>,
    #[serde(rename = "Type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct RawTriggerVolume {
    #[serde(rename = "Points")]
    points: Vec<[f64; 3]>,
    #[serde(rename = "Type")]
    kind: String,
}

/// `[[x, y, z], ...]` with anything after the position ignored.
#[derive(Debug)]
struct RawLanePoint([f64; 3]);

impl<'de> Deserialize<'de> for RawLanePoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct PointVisitor;

        impl<'de> Visitor<'de> for PointVisitor {
            type Value = RawLanePoint;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a lane point [[x, y, z], ...]")
            }

            fn visit_seq<A: SeqAccess<'de>>(
                self,
                mut seq: A,
            ) -> std::result::Result<RawLanePoint, A::Error> {
                let xyz: [f64; 3] = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                while seq.next_element::<IgnoredAny>()?.is_some() {}
                Ok(RawLanePoint(xyz))
            }
        }

        deserializer.deserialize_seq(PointVisitor)
    }
}

/// Indices sampled from a polyline of `len` points: every `stride`-th index
/// and always `len - 1`, so the samples span the whole lane.
pub fn coarse_sample_indices(len: usize, stride: usize) -> Vec<usize> {
    if len == 0 || stride == 0 {
        return Vec::new();
    }
    let count = if len % stride != 0 {
        len / stride + 1
    } else {
        len / stride
    };
    let mut indices: Vec<usize> = (0..count).map(|i| i * stride).collect();
    if indices.last() != Some(&(len - 1)) {
        indices.push(len - 1);
    }
    indices
}

fn flip_y(p: [f64; 3]) -> [f64; 3] {
    [p[0], -p[1], p[2]]
}

fn centroid(points: &[[f64; 3]]) -> [f64; 3] {
    let n = points.len() as f64;
    let sum = points.iter().fold([0.0; 3], |acc, p| {
        [acc[0] + p[0], acc[1] + p[1], acc[2] + p[2]]
    });
    [sum[0] / n, sum[1] / n, sum[2] / n]
}

/// Build a [`ZoneMap`] from the decoded road layout.
pub fn zone_from_layout(layout: &Map<String, Value>) -> Result<ZoneMap> {
    let mut zone = ZoneMap::default();

    for (road_id, road) in layout {
        let road = road
            .as_object()
            .ok_or_else(|| Error::malformed("map layout", format!("road {road_id} is not an object")))?;

        for (lane_id, entries) in road {
            if lane_id == TRIGGER_VOLUMES_KEY {
                let volumes: Vec<RawTriggerVolume> = serde_json::from_value(entries.clone())
                    .map_err(|e| Error::json(format!("road {road_id}/{lane_id}"), e))?;
                for volume in volumes {
                    if volume.points.is_empty() {
                        warn!("road {road_id}: trigger volume '{}' has no points", volume.kind);
                        continue;
                    }
                    let points: Vec<[f64; 3]> = volume.points.into_iter().map(flip_y).collect();
                    zone.trigger_volumes.push(TriggerVolume {
                        kind: volume.kind,
                        centroid: centroid(&points),
                        points,
                    });
                }
            } else {
                let lanes: Vec<RawLane> = serde_json::from_value(entries.clone())
                    .map_err(|e| Error::json(format!("road {road_id}/lane {lane_id}"), e))?;
                for lane in lanes {
                    if lane.points.is_empty() {
                        warn!("road {road_id}/lane {lane_id}: '{}' lane has no points", lane.kind);
                        continue;
                    }
                    let points: Vec<[f64; 3]> =
                        lane.points.into_iter().map(|p| flip_y(p.0)).collect();
                    let sample_points = coarse_sample_indices(points.len(), LANE_SAMPLE_STRIDE)
                        .into_iter()
                        .map(|i| points[i])
                        .collect();
                    zone.lanes.push(Lane {
                        kind: lane.kind,
                        points,
                        sample_points,
                    });
                }
            }
        }
    }

    Ok(zone)
}

/// Zone name of an archive: the file name up to the first `_`
/// (`Town12_HD_map.npz` -> `Town12`).
pub fn zone_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|s| s.to_str())
        .and_then(|s| s.split('_').next())
        .map(str::to_owned)
}

/// Array member holding the pickled layout in the dataset's `.npz` maps.
const LAYOUT_ARRAY: &str = "arr";

/// Road layout from the decoded `arr` object array: either the dict itself
/// or a sequence of `(road_id, road)` pairs.
fn layout_from_value(path: &Path, value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(layout) => Ok(layout),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Array(kv) if kv.len() == 2 => {
                    let mut kv = kv.into_iter();
                    let key = match kv.next() {
                        Some(Value::String(s)) => s,
                        Some(Value::Number(n)) => n.to_string(),
                        _ => return Err(Error::malformed(path, "road id is not a string or number")),
                    };
                    Ok((key, kv.next().unwrap_or(Value::Null)))
                }
                _ => Err(Error::malformed(path, "map array entry is not a (road_id, road) pair")),
            })
            .collect(),
        _ => Err(Error::malformed(path, "map array is neither a dict nor a list of pairs")),
    }
}

/// Read one zone archive: a `.json` layout member if present, else the
/// pickled `arr.npy` object array.
pub fn load_zone_archive(path: &Path) -> Result<ZoneMap> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file))?;

    let json_member = archive
        .file_names()
        .find(|n| n.to_ascii_lowercase().ends_with(".json"))
        .map(str::to_owned);

    let layout: Map<String, Value> = match json_member {
        Some(member) => {
            debug!("{}: reading member {}", path.display(), member);
            let entry = archive.by_name(&member)?;
            serde_json::from_reader(BufReader::new(entry)).map_err(|e| Error::json(path, e))?
        }
        None => {
            debug!("{}: reading pickled {}.npy", path.display(), LAYOUT_ARRAY);
            let mut entry = archive.by_name(&format!("{LAYOUT_ARRAY}.npy"))?;
            let mut bytes = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut bytes).map_err(|e| Error::io(path, e))?;
            layout_from_value(path, npy::parse_object_npy(&bytes)?)?
        }
    };

    zone_from_layout(&layout)
}

fn is_zone_archive(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.eq_ignore_ascii_case("npz") || s.eq_ignore_ascii_case("zip"))
        .unwrap_or(false)
}

/// Preprocess every zone archive directly under `map_root`, in parallel.
pub fn preprocess_map_dir(map_root: &Path) -> Result<MapInfos> {
    let mut archives: Vec<PathBuf> = WalkDir::new(map_root)
        .max_depth(1)
        .follow_links(true)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| is_zone_archive(p))
        .collect();
    archives.sort();

    info!("Preprocessing {} map archives from {}", archives.len(), map_root.display());

    let zones = archives
        .par_iter()
        .map(|path| {
            let name = zone_name(path)
                .ok_or_else(|| Error::malformed(path, "archive name has no zone prefix"))?;
            let zone = load_zone_archive(path)?;
            info!(
                "{}: {} lanes, {} trigger volumes",
                name,
                zone.lanes.len(),
                zone.trigger_volumes.len()
            );
            Ok((name, zone))
        })
        .collect::<Result<Vec<_>>>()?;

    // Sorted input order: a later archive for the same zone replaces an earlier one.
    Ok(zones.into_iter().collect())
}

/// Persist the processed map infos.
pub fn save_map_infos(path: &Path, infos: &MapInfos) -> Result<()> {
    let file = File::create(path).map_err(|e| Error::io(path, e))?;
    serde_json::to_writer(BufWriter::new(file), infos).map_err(|e| Error::json(path, e))
}

/// Load map infos written by [`save_map_infos`].
pub fn load_map_infos(path: &Path) -> Result<MapInfos> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| Error::json(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn layout() -> serde_json::Map<String, serde_json::Value> {
        let lane_points: Vec<_> = (0..137)
            .map(|i| json!([[i as f64, 2.0, 0.5], [0.0, 0.0, 0.0]]))
            .collect();
        json!({
            "7": {
                "-1": [{ "Points": lane_points, "Type": "Broken" }],
                "Trigger_Volumes": [{
                    "Points": [[0.0, 1.0, 0.0], [2.0, 1.0, 0.0], [2.0, 3.0, 0.0], [0.0, 3.0, 0.0]],
                    "Type": "StopSign"
                }]
            }
        })
        .as_object()
        .unwrap()
        .clone()
    }

    #[test]
    fn sampling_keeps_final_point_when_stride_does_not_divide() {
        assert_eq!(coarse_sample_indices(137, 50), vec![0, 50, 100, 136]);
    }

    #[test]
    fn sampling_keeps_final_point_when_stride_divides() {
        assert_eq!(coarse_sample_indices(100, 50), vec![0, 50, 99]);
        assert_eq!(coarse_sample_indices(50, 50), vec![0, 49]);
    }

    #[test]
    fn sampling_short_lanes() {
        assert_eq!(coarse_sample_indices(1, 50), vec![0]);
        assert_eq!(coarse_sample_indices(2, 50), vec![0, 1]);
        assert!(coarse_sample_indices(0, 50).is_empty());
    }

    #[test]
    fn layout_flips_y_and_samples_lanes() {
        let zone = zone_from_layout(&layout()).unwrap();
        assert_eq!(zone.lanes.len(), 1);
        let lane = &zone.lanes[0];
        assert_eq!(lane.kind, "Broken");
        assert_eq!(lane.points.len(), 137);
        assert_eq!(lane.points[3], [3.0, -2.0, 0.5]);
        let xs: Vec<f64> = lane.sample_points.iter().map(|p| p[0]).collect();
        assert_eq!(xs, vec![0.0, 50.0, 100.0, 136.0]);

        assert_eq!(zone.trigger_volumes.len(), 1);
        let tv = &zone.trigger_volumes[0];
        assert_eq!(tv.kind, "StopSign");
        assert_eq!(tv.points[0], [0.0, -1.0, 0.0]);
        assert_eq!(tv.centroid, [1.0, -2.0, 0.0]);
    }

    #[test]
    fn archive_round_trip_through_zip_and_cache() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("Town05_HD_map.npz");
        {
            let file = File::create(&archive_path).unwrap();
            let mut zip = zip::ZipWriter::new(file);
            zip.start_file("arr.json", zip::write::FileOptions::default())
                .unwrap();
            zip.write_all(serde_json::Value::Object(layout()).to_string().as_bytes())
                .unwrap();
            zip.finish().unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let infos = preprocess_map_dir(dir.path()).unwrap();
        assert_eq!(infos.keys().collect::<Vec<_>>(), vec!["Town05"]);
        assert_eq!(infos["Town05"].lanes[0].sample_points.len(), 4);

        let cache = dir.path().join("b2d_map_infos.json");
        save_map_infos(&cache, &infos).unwrap();
        assert_eq!(load_map_infos(&cache).unwrap(), infos);
    }

    fn write_member(path: &Path, member: &str, bytes: &[u8]) {
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        zip.start_file(member, zip::write::FileOptions::default())
            .unwrap();
        zip.write_all(bytes).unwrap();
        zip.finish().unwrap();
    }

    #[test]
    fn pickled_object_array_archive() {
        use crate::npy::tests::npy_object;
        use crate::pickle::tests::Pickler;

        // {7: {-1: [{'Points': [((x, y, z), (0, 0, 0)), ...], 'Type': 'Broken'}],
        //      'Trigger_Volumes': [{'Points': ndarray(4, 3), 'Type': 'StopSign'}]}}
        let mut p = Pickler::default();
        p.object_array(&[], |p| {
            p.op(b'}').int(7).op(b'}').op(b'(');

            p.int(-1).op(b']').op(b'}').op(b'(').str("Points").op(b']').op(b'(');
            for i in 0..3 {
                p.op(b'(').f8_scalar(i as f64).float(2.0).float(0.5).op(b't');
                p.int(0).int(0).int(0).op(0x87).op(0x86);
            }
            p.op(b'e').str("Type").str("Broken").op(b'u').op(b'a');

            p.str("Trigger_Volumes").op(b']').op(b'}').op(b'(').str("Points");
            p.f8_array(
                &[4, 3],
                &[0.0, 1.0, 0.0, 2.0, 1.0, 0.0, 2.0, 3.0, 0.0, 0.0, 3.0, 0.0],
            );
            p.str("Type").str("StopSign").op(b'u').op(b'a');

            p.op(b'u').op(b's');
        });

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Town07_HD_map.npz");
        write_member(&path, "arr.npy", &npy_object(&p.finish()));

        let zone = load_zone_archive(&path).unwrap();
        assert_eq!(zone.lanes.len(), 1);
        assert_eq!(zone.lanes[0].kind, "Broken");
        assert_eq!(zone.lanes[0].points[2], [2.0, -2.0, 0.5]);
        assert_eq!(zone.lanes[0].sample_points.len(), 2);
        assert_eq!(zone.trigger_volumes.len(), 1);
        assert_eq!(zone.trigger_volumes[0].centroid, [1.0, -2.0, 0.0]);

        let infos = preprocess_map_dir(dir.path()).unwrap();
        assert_eq!(infos.keys().collect::<Vec<_>>(), vec!["Town07"]);
    }

    #[test]
    fn road_pairs_form_a_layout() {
        let pairs = serde_json::json!([[3, {"Trigger_Volumes": []}], ["4", {}]]);
        let layout = layout_from_value(Path::new("m.npz"), pairs).unwrap();
        assert_eq!(layout.keys().collect::<Vec<_>>(), vec!["3", "4"]);
        assert!(layout_from_value(Path::new("m.npz"), serde_json::json!(5)).is_err());
    }

    #[test]
    fn truncated_layout_array_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Town01_HD_map.zip");
        write_member(&path, "arr.npy", b"\x93NUMPY");
        assert!(matches!(load_zone_archive(&path), Err(Error::Npy(_))));

        let other = dir.path().join("Town02_HD_map.zip");
        write_member(&other, "readme.txt", b"no layout");
        assert!(matches!(load_zone_archive(&other), Err(Error::Zip(_))));
    }
}
