//! Minimal reader for numeric NPY arrays and NPZ containers.
//!
//! File layout (NPY v1/v2/v3):
//!   00  : [u8;6]  magic = b"\x93NUMPY"
//!   06  : u8      major version
//!   07  : u8      minor version
//!   08  : u16|u32 header_len (u16 for v1, u32 otherwise; little-endian)
//!   ..  : ASCII dict {'descr': '<f8', 'fortran_order': False, 'shape': (N,), }
//!   ..  : raw element data
//!
//! Numeric arrays must be little-endian or byte-order-free; elements are
//! widened to `f64`. Object arrays (`'descr': '|O'`) hold a pickled
//! `ndarray` instead of raw elements and are read with [`parse_object_npy`].

use crate::error::{Error, Result};
use std::{fs::File, io::BufReader, io::Read, path::Path};

const MAGIC: &[u8; 6] = b"\x93NUMPY";

/// Decoded array, row-major.
#[derive(Clone, Debug, PartialEq)]
pub struct NpyArray {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

impl NpyArray {
    pub fn last(&self) -> Option<f64> {
        self.data.last().copied()
    }
}

fn bad(msg: impl Into<String>) -> Error {
    Error::Npy(msg.into())
}

fn take<'a>(buf: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
    if buf.len() < n {
        return Err(bad(format!("truncated: need {} bytes, have {}", n, buf.len())));
    }
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

fn le_u16(buf: &mut &[u8]) -> Result<u16> {
    let b = take(buf, 2)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

fn le_u32(buf: &mut &[u8]) -> Result<u32> {
    let b = take(buf, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Value of `'key': <value>` in the header dict, up to the next top-level comma.
fn header_field<'a>(header: &'a str, key: &str) -> Result<&'a str> {
    let needle = format!("'{key}':");
    let start = header
        .find(&needle)
        .ok_or_else(|| bad(format!("header has no '{key}'")))?
        + needle.len();
    let rest = header[start..].trim_start();
    let end = if rest.starts_with('(') {
        rest.find(')').map(|i| i + 1)
    } else {
        rest.find([',', '}'])
    }
    .ok_or_else(|| bad(format!("unterminated '{key}'")))?;
    Ok(rest[..end].trim())
}

fn parse_shape(s: &str) -> Result<Vec<usize>> {
    s.trim_start_matches('(')
        .trim_end_matches(')')
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| p.parse().map_err(|_| bad(format!("bad shape entry '{p}'"))))
        .collect()
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum Dtype {
    F8,
    F4,
    I8,
    I4,
    I2,
    I1,
    U1,
    Bool,
}

impl Dtype {
    pub(crate) fn parse(descr: &str) -> Result<Self> {
        let d = descr.trim_matches(|c| c == '\'' || c == '"');
        Ok(match d {
            "<f8" => Dtype::F8,
            "<f4" => Dtype::F4,
            "<i8" => Dtype::I8,
            "<i4" => Dtype::I4,
            "<i2" => Dtype::I2,
            "|i1" => Dtype::I1,
            "|u1" => Dtype::U1,
            "|b1" => Dtype::Bool,
            "|O" => return Err(bad("object array; read it with parse_object_npy")),
            other => return Err(bad(format!("unsupported dtype '{other}'"))),
        })
    }

    pub(crate) fn size(self) -> usize {
        match self {
            Dtype::F8 | Dtype::I8 => 8,
            Dtype::F4 | Dtype::I4 => 4,
            Dtype::I2 => 2,
            Dtype::I1 | Dtype::U1 | Dtype::Bool => 1,
        }
    }

    pub(crate) fn decode(self, b: &[u8]) -> f64 {
        match self {
            Dtype::F8 => f64::from_le_bytes(b.try_into().unwrap_or([0; 8])),
            Dtype::F4 => f32::from_le_bytes(b.try_into().unwrap_or([0; 4])) as f64,
            Dtype::I8 => i64::from_le_bytes(b.try_into().unwrap_or([0; 8])) as f64,
            Dtype::I4 => i32::from_le_bytes(b.try_into().unwrap_or([0; 4])) as f64,
            Dtype::I2 => i16::from_le_bytes(b.try_into().unwrap_or([0; 2])) as f64,
            Dtype::I1 => b[0] as i8 as f64,
            Dtype::U1 | Dtype::Bool => b[0] as f64,
        }
    }
}

struct Header {
    descr: String,
    shape: Vec<usize>,
}

/// Consume magic, version and header dict.
fn read_header(p: &mut &[u8]) -> Result<Header> {
    if take(p, 6)? != MAGIC {
        return Err(bad("bad magic"));
    }
    let version = take(p, 2)?;
    let header_len = match version[0] {
        1 => le_u16(p)? as usize,
        2 | 3 => le_u32(p)? as usize,
        v => return Err(bad(format!("unsupported version {v}"))),
    };
    let header =
        std::str::from_utf8(take(p, header_len)?).map_err(|_| bad("header is not UTF-8"))?;

    if header_field(header, "fortran_order")? == "True" {
        return Err(bad("fortran-ordered arrays are not supported"));
    }
    Ok(Header {
        descr: header_field(header, "descr")?
            .trim_matches(|c| c == '\'' || c == '"')
            .to_owned(),
        shape: parse_shape(header_field(header, "shape")?)?,
    })
}

/// Parse a complete numeric NPY payload.
pub fn parse_npy_bytes(mut p: &[u8]) -> Result<NpyArray> {
    let Header { descr, shape } = read_header(&mut p)?;
    let dtype = Dtype::parse(&descr)?;

    let count: usize = shape.iter().product();
    let body = take(&mut p, count * dtype.size())?;
    let data = body.chunks_exact(dtype.size()).map(|c| dtype.decode(c)).collect();

    Ok(NpyArray { shape, data })
}

/// Parse an object-array NPY payload into JSON. A 0-d array yields its
/// single element; otherwise nested arrays follow the shape.
pub fn parse_object_npy(mut p: &[u8]) -> Result<serde_json::Value> {
    let header = read_header(&mut p)?;
    if header.descr != "|O" {
        return Err(bad(format!("expected an object array, got '{}'", header.descr)));
    }
    crate::pickle::unpickle_json(p)
}

/// Raw bytes of member `name` (without `.npy`) of an NPZ container.
pub fn read_npz_member(path: &Path, name: &str) -> Result<Vec<u8>> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file))?;
    let mut entry = archive.by_name(&format!("{name}.npy"))?;
    let mut bytes = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut bytes)
        .map_err(|e| Error::io(path, e))?;
    Ok(bytes)
}

/// Read numeric array `name` (without `.npy`) from an NPZ container.
pub fn read_npz_array(path: &Path, name: &str) -> Result<NpyArray> {
    parse_npy_bytes(&read_npz_member(path, name)?)
}
