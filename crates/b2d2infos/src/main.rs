use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::info;
use std::{fs, path::PathBuf, sync::Arc, time::Instant};

use b2d::{
    discover_folders, load_map_infos, preprocess_map_dir, run_split, save_map_infos,
    ConversionConfig, MapInfos, Split, SplitJob, SplitManifest, MAP_INFOS_FILE,
};

/// Which splits to convert.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum SplitArg {
    Train,
    Val,
    All,
}

impl SplitArg {
    fn splits(self) -> &'static [Split] {
        match self {
            SplitArg::Train => &[Split::Train],
            SplitArg::Val => &[Split::Val],
            SplitArg::All => &[Split::Train, Split::Val],
        }
    }
}

impl std::fmt::Display for SplitArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SplitArg::Train => "train",
            SplitArg::Val => "val",
            SplitArg::All => "all",
        };

        f.write_str(s)
    }
}

/// Convert Bench2Drive episodes into per-frame training infos.
#[derive(Parser, Debug, Clone)]
#[command(name = "b2d2infos", version)]
struct Args {
    /// Dataset root containing `v1/<episode>` folders.
    #[arg(long, default_value = "data/bench2drive")]
    data_root: PathBuf,

    /// Directory of per-town HD map archives.
    #[arg(long, default_value = "data/bench2drive/maps")]
    map_root: PathBuf,

    #[arg(long, default_value = "data/infos")]
    out_dir: PathBuf,

    /// JSON manifest `{"train": [...], "val": [...]}`.
    #[arg(long, default_value = "data/splits/bench2drive_base_train_val_split.json")]
    split_file: PathBuf,

    /// Shard directory, relative to the output directory.
    #[arg(long, default_value = "tmp_data")]
    tmp_dir: String,

    #[arg(long, default_value_t = 16)]
    workers: usize,

    #[arg(long, value_enum, default_value_t = SplitArg::Train)]
    split: SplitArg,

    /// Re-run map preprocessing even if a cached map infos file exists.
    #[arg(long, default_value_t = false)]
    rebuild_map: bool,

    /// Drop objects further than this from ego (m).
    #[arg(long, default_value_t = 75.0)]
    max_distance: f64,

    /// Drop objects whose height differs from ego by more than this (m).
    #[arg(long, default_value_t = 10.0)]
    max_height_delta: f64,

    /// A box needs more unoccluded corners than this in one camera.
    #[arg(long, default_value_t = 1)]
    visible_threshold: usize,

    /// A box needs fewer out-of-image corners than this in the same camera.
    #[arg(long, default_value_t = 7)]
    outlier_threshold: usize,

    /// Lanes further than this from ego (m) are not annotated.
    #[arg(long, default_value_t = 50.0)]
    lane_radius: f64,

    /// Keep every box that passes the range filters, visible or not.
    #[arg(long, default_value_t = false)]
    no_filter_invisible: bool,

    /// Do not read `expert_assessment/*.npz`.
    #[arg(long, default_value_t = false)]
    no_expert_actions: bool,
}

impl Args {
    fn conversion_config(&self) -> ConversionConfig {
        let mut cfg = ConversionConfig {
            filter_invisible: !self.no_filter_invisible,
            read_expert_actions: !self.no_expert_actions,
            workers: self.workers,
            ..ConversionConfig::default()
        };
        cfg.range.max_distance = self.max_distance;
        cfg.range.max_height_delta = self.max_height_delta;
        cfg.visibility.visible_threshold = self.visible_threshold;
        cfg.visibility.outlier_threshold = self.outlier_threshold;
        cfg.map_query.lane_radius = self.lane_radius;
        cfg
    }
}

/// Load the cached map infos, or preprocess the map archives and cache them.
fn map_infos(args: &Args) -> Result<MapInfos> {
    let cache = args.out_dir.join(MAP_INFOS_FILE);
    if cache.is_file() && !args.rebuild_map {
        info!("Loading cached map infos from {}", cache.display());
        return load_map_infos(&cache)
            .with_context(|| format!("failed to load {}", cache.display()));
    }

    let started = Instant::now();
    let maps = preprocess_map_dir(&args.map_root)
        .with_context(|| format!("failed to preprocess maps in {}", args.map_root.display()))?;
    save_map_infos(&cache, &maps)
        .with_context(|| format!("failed to write {}", cache.display()))?;
    info!(
        "Preprocessed {} zones in {:.1?} -> {}",
        maps.len(),
        started.elapsed(),
        cache.display()
    );
    Ok(maps)
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let cfg = args.conversion_config();
    cfg.validate().context("invalid conversion parameters")?;
    fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("failed to create {}", args.out_dir.display()))?;

    let manifest = SplitManifest::load(&args.split_file)
        .with_context(|| format!("failed to read split file {}", args.split_file.display()))?;

    info!("Processing map data...");
    let maps = Arc::new(map_infos(&args)?);

    for &split in args.split.splits() {
        let folders = discover_folders(&args.data_root, &manifest, split)
            .with_context(|| format!("failed to list {} folders", split.name()))?;

        let job = SplitJob {
            name: split.name().to_owned(),
            folders,
            data_root: args.data_root.clone(),
            out_dir: args.out_dir.clone(),
            tmp_dir: args.tmp_dir.clone(),
        };

        let started = Instant::now();
        let total = run_split(&job, Arc::clone(&maps), &cfg)
            .with_context(|| format!("failed to convert {} split", split.name()))?;
        info!(
            "{} {} frames -> {} ({:.1?})",
            split.name(),
            total,
            job.output_path().display(),
            started.elapsed()
        );
    }

    info!("Finished.");
    Ok(())
}
