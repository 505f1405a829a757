//! Split conversion: partition folders, fan out to worker threads, join,
//! merge.
//!
//! Each worker owns a contiguous slice of the folder list and writes one
//! shard file. The driver joins every worker in index order before merging,
//! so the merged corpus is ordered by worker index, then folder, then frame.

use crate::config::ConversionConfig;
use crate::corpus::{merge_shards, write_records};
use crate::episode::process_folder;
use crate::error::{Error, Result};
use crate::map::MapInfos;
use log::{error, info};
use std::{
    ops::Range,
    path::{Path, PathBuf},
    sync::Arc,
    thread::{self, JoinHandle},
    time::Instant,
};

/// Contiguous, near-equal shard ranges over `n` items. The first
/// `n % workers` shards take one extra item.
pub fn partition(n: usize, workers: usize) -> Vec<Range<usize>> {
    if workers == 0 {
        return Vec::new();
    }
    let (step, extra) = (n / workers, n % workers);
    let mut start = 0;
    (0..workers)
        .map(|i| {
            let len = step + usize::from(i < extra);
            let range = start..start + len;
            start += len;
            range
        })
        .collect()
}

/// One split to convert.
#[derive(Clone, Debug)]
pub struct SplitJob {
    /// `train` or `val`; used in file names.
    pub name: String,
    /// Episode folders relative to `data_root`.
    pub folders: Vec<String>,
    pub data_root: PathBuf,
    pub out_dir: PathBuf,
    /// Shard directory name under `out_dir`.
    pub tmp_dir: String,
}

impl SplitJob {
    pub fn shard_path(&self, index: usize) -> PathBuf {
        self.out_dir
            .join(&self.tmp_dir)
            .join(format!("b2d_infos_{}_{}.json", self.name, index))
    }

    pub fn output_path(&self) -> PathBuf {
        self.out_dir.join(format!("b2d_infos_{}.json", self.name))
    }
}

/// A running worker and the shard it will write.
#[derive(Debug)]
pub struct WorkerHandle {
    index: usize,
    shard: PathBuf,
    handle: JoinHandle<Result<usize>>,
}

impl WorkerHandle {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn shard(&self) -> &Path {
        &self.shard
    }
}

fn run_worker(
    folders: &[String],
    data_root: &Path,
    shard: &Path,
    maps: &MapInfos,
    cfg: &ConversionConfig,
) -> Result<usize> {
    let mut records = Vec::new();
    for folder in folders {
        records.extend(process_folder(data_root, folder, maps, cfg)?);
    }
    write_records(shard, &records)?;
    Ok(records.len())
}

/// Start `cfg.workers` threads over contiguous slices of `job.folders`.
pub fn spawn_workers(
    job: &SplitJob,
    maps: Arc<MapInfos>,
    cfg: &ConversionConfig,
) -> Result<Vec<WorkerHandle>> {
    partition(job.folders.len(), cfg.workers)
        .into_iter()
        .enumerate()
        .map(|(index, range)| {
            let folders = job.folders[range].to_vec();
            let data_root = job.data_root.clone();
            let shard = job.shard_path(index);
            let maps = Arc::clone(&maps);
            let cfg = cfg.clone();
            let shard_out = shard.clone();

            let handle = thread::Builder::new()
                .name(format!("b2d-{}-{}", job.name, index))
                .spawn(move || {
                    let started = Instant::now();
                    let count = run_worker(&folders, &data_root, &shard_out, &maps, &cfg)?;
                    info!(
                        "worker {index}: {} folders, {count} frames in {:.1?}",
                        folders.len(),
                        started.elapsed()
                    );
                    Ok(count)
                })
                .map_err(|e| Error::io(&shard, e))?;

            Ok(WorkerHandle {
                index,
                shard,
                handle,
            })
        })
        .collect()
}

/// Barrier: join every worker in index order. Returns the shard paths in
/// the same order, or the first worker failure after all have finished.
pub fn join_workers(handles: Vec<WorkerHandle>) -> Result<Vec<PathBuf>> {
    let mut shards = Vec::with_capacity(handles.len());
    let mut first_err = None;

    for WorkerHandle {
        index,
        shard,
        handle,
    } in handles
    {
        let outcome = match handle.join() {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(source)) => Err(Error::Worker {
                index,
                source: Box::new(source),
            }),
            Err(_) => Err(Error::WorkerPanicked(index)),
        };
        match outcome {
            Ok(()) => shards.push(shard),
            Err(e) => {
                error!("{e}");
                first_err.get_or_insert(e);
            }
        }
    }

    match first_err {
        Some(e) => Err(e),
        None => Ok(shards),
    }
}

/// Convert one split end to end. Returns the number of merged frames.
pub fn run_split(job: &SplitJob, maps: Arc<MapInfos>, cfg: &ConversionConfig) -> Result<usize> {
    cfg.validate()?;
    info!(
        "{}: {} folders over {} workers",
        job.name,
        job.folders.len(),
        cfg.workers
    );
    let handles = spawn_workers(job, maps, cfg)?;
    let shards = join_workers(handles)?;
    let total = merge_shards(&shards, &job.output_path())?;
    info!("{}: {} frames", job.name, total);
    Ok(total)
}
