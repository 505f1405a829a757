//! Shard and corpus files: a JSON array of [`FrameRecord`]s.

use crate::error::{Error, Result};
use crate::record::FrameRecord;
use log::info;
use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// Write `records` to `path`, creating parent directories.
pub fn write_records(path: &Path, records: &[FrameRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    let file = File::create(path).map_err(|e| Error::io(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, records).map_err(|e| Error::json(path, e))?;
    writer.flush().map_err(|e| Error::io(path, e))
}

pub fn read_records(path: &Path) -> Result<Vec<FrameRecord>> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| Error::json(path, e))
}

/// Concatenate shards in the given order into one corpus file. Returns the
/// number of records written.
pub fn merge_shards<P: AsRef<Path>>(shards: &[P], out: &Path) -> Result<usize> {
    let mut merged = Vec::new();
    for shard in shards {
        merged.extend(read_records(shard.as_ref())?);
    }
    write_records(out, &merged)?;
    info!("Merged {} shards -> {} ({} frames)", shards.len(), out.display(), merged.len());
    Ok(merged.len())
}
