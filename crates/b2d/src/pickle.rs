//! Decoder for the pickle stream numpy writes into object arrays.
//!
//! `np.save` stores an object array as a pickled `ndarray`: a
//! `_reconstruct` call followed by a `BUILD` whose state carries the shape,
//! the dtype and the element list. This module runs the opcodes of pickle
//! protocols 2 to 5 needed for that, on plain Python data (containers,
//! strings, numbers, numpy arrays, dtypes and scalars), and hands the result
//! back as JSON. Instances of any other class become opaque objects and are
//! an error when converted.
//!
//! Memoized values are copied when stored, so a container mutated after
//! being memoized and fetched again reads back as it was when stored.

use crate::error::{Error, Result};
use crate::npy::Dtype;
use serde_json::{Map, Number, Value};
use std::collections::HashMap;

fn bad(msg: impl Into<String>) -> Error {
    Error::Npy(format!("pickle: {}", msg.into()))
}

#[derive(Clone, Debug, PartialEq)]
enum Py {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Py>),
    Tuple(Vec<Py>),
    Dict(Vec<(Py, Py)>),
    Global(String),
    Dtype { kind: String, order: char },
    Array { shape: Vec<usize>, items: Vec<Py> },
    Object(String),
}

/// `kind`/`order` as an NPY `descr`, e.g. `<f8` or `|u1`.
fn descr(kind: &str, order: char) -> String {
    let order = match order {
        _ if kind.ends_with('1') => '|',
        '=' | '|' => '<',
        o => o,
    };
    format!("{order}{kind}")
}

/// Decode raw element bytes of a numeric dtype.
fn decode_items(dtype: &Py, bytes: &[u8]) -> Result<Vec<Py>> {
    let Py::Dtype { kind, order } = dtype else {
        return Err(bad("array state has no dtype"));
    };
    let d = Dtype::parse(&descr(kind, *order))?;
    if bytes.len() % d.size() != 0 {
        return Err(bad(format!("{} bytes is not a whole number of '{kind}'", bytes.len())));
    }
    Ok(bytes
        .chunks_exact(d.size())
        .map(|c| {
            let v = d.decode(c);
            match kind.as_bytes().first() {
                Some(b'b') => Py::Bool(v != 0.0),
                Some(b'i' | b'u') => Py::Int(v as i64),
                _ => Py::Float(v),
            }
        })
        .collect())
}

fn dims(shape: Py) -> Result<Vec<usize>> {
    let Py::Tuple(parts) = shape else {
        return Err(bad("array shape is not a tuple"));
    };
    parts
        .into_iter()
        .map(|p| match p {
            Py::Int(n) if n >= 0 => Ok(n as usize),
            other => Err(bad(format!("bad shape entry {other:?}"))),
        })
        .collect()
}

fn reduce(callable: Py, args: Py) -> Result<Py> {
    let Py::Global(name) = callable else {
        return Err(bad(format!("cannot call {callable:?}")));
    };
    let Py::Tuple(mut args) = args else {
        return Err(bad(format!("{name}: arguments are not a tuple")));
    };
    let first = if args.is_empty() {
        None
    } else {
        Some(args.remove(0))
    };

    Ok(match name.as_str() {
        "numpy.core.multiarray._reconstruct" | "numpy._core.multiarray._reconstruct" => {
            Py::Array {
                shape: Vec::new(),
                items: Vec::new(),
            }
        }
        "numpy.dtype" => match first {
            Some(Py::Str(kind)) => Py::Dtype { kind, order: '|' },
            other => return Err(bad(format!("numpy.dtype of {other:?}"))),
        },
        "numpy.core.multiarray.scalar" | "numpy._core.multiarray.scalar" => {
            match (first, args.first()) {
                (Some(dtype), Some(Py::Bytes(raw))) => decode_items(&dtype, raw)?
                    .into_iter()
                    .next()
                    .ok_or_else(|| bad("empty numpy scalar"))?,
                _ => return Err(bad("numpy scalar needs (dtype, bytes)")),
            }
        }
        "collections.OrderedDict" | "builtins.dict" | "__builtin__.dict" => match first {
            None => Py::Dict(Vec::new()),
            Some(Py::List(items) | Py::Tuple(items)) => Py::Dict(pairs(items)?),
            Some(other) => return Err(bad(format!("{name} of {other:?}"))),
        },
        "builtins.set" | "__builtin__.set" | "builtins.frozenset" | "__builtin__.frozenset"
        | "builtins.list" | "__builtin__.list" => match first {
            None => Py::List(Vec::new()),
            Some(Py::List(items) | Py::Tuple(items)) => Py::List(items),
            Some(other) => return Err(bad(format!("{name} of {other:?}"))),
        },
        // Protocol 2 writes bytes as `_codecs.encode(text, 'latin1')`.
        "_codecs.encode" => match first {
            Some(Py::Str(text)) => Py::Bytes(text.chars().map(|c| c as u32 as u8).collect()),
            other => return Err(bad(format!("_codecs.encode of {other:?}"))),
        },
        _ => Py::Object(name),
    })
}

fn pairs(items: Vec<Py>) -> Result<Vec<(Py, Py)>> {
    items
        .into_iter()
        .map(|item| match item {
            Py::Tuple(kv) | Py::List(kv) if kv.len() == 2 => {
                let mut kv = kv.into_iter();
                match (kv.next(), kv.next()) {
                    (Some(k), Some(v)) => Ok((k, v)),
                    _ => Err(bad("dict item is not a pair")),
                }
            }
            other => Err(bad(format!("dict item {other:?} is not a pair"))),
        })
        .collect()
}

fn build(target: &mut Py, state: Py) -> Result<()> {
    match target {
        Py::Array { shape, items } => {
            let Py::Tuple(mut parts) = state else {
                return Err(bad("array state is not a tuple"));
            };
            // (version, shape, dtype, is_fortran, data); older pickles omit version.
            if parts.len() == 5 {
                parts.remove(0);
            }
            let [shp, dtype, fortran, raw]: [Py; 4] = parts
                .try_into()
                .map_err(|_| bad("array state has the wrong arity"))?;
            let new_shape = dims(shp)?;
            if fortran == Py::Bool(true) && new_shape.len() > 1 {
                return Err(bad("fortran-ordered arrays are not supported"));
            }
            let new_items = match raw {
                Py::List(values) => values,
                Py::Bytes(bytes) => decode_items(&dtype, &bytes)?,
                other => return Err(bad(format!("array data {other:?}"))),
            };
            if new_items.len() != new_shape.iter().product::<usize>() {
                return Err(bad(format!(
                    "{} elements for shape {new_shape:?}",
                    new_items.len()
                )));
            }
            *shape = new_shape;
            *items = new_items;
        }
        Py::Dtype { order, .. } => {
            if let Py::Tuple(parts) = state {
                if let Some(Py::Str(o)) = parts.get(1) {
                    *order = o.chars().next().unwrap_or('|');
                }
            }
        }
        Py::Dict(entries) => {
            if let Py::Dict(extra) = state {
                entries.extend(extra);
            }
        }
        _ => {}
    }
    Ok(())
}

struct Machine<'a> {
    buf: &'a [u8],
    stack: Vec<Py>,
    marks: Vec<usize>,
    memo: HashMap<u32, Py>,
}

impl<'a> Machine<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(bad(format!("truncated: need {} bytes, have {}", n, self.buf.len())));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn le<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn len_u8(&mut self) -> Result<usize> {
        Ok(self.le::<1>()?[0] as usize)
    }

    fn len_u32(&mut self) -> Result<usize> {
        Ok(u32::from_le_bytes(self.le()?) as usize)
    }

    fn len_u64(&mut self) -> Result<usize> {
        usize::try_from(u64::from_le_bytes(self.le()?)).map_err(|_| bad("length overflow"))
    }

    fn line(&mut self) -> Result<&'a str> {
        let end = self
            .buf
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| bad("unterminated line"))?;
        let line = self.take(end + 1)?;
        std::str::from_utf8(&line[..end]).map_err(|_| bad("line is not UTF-8"))
    }

    fn text(&mut self, n: usize) -> Result<Py> {
        let raw = self.take(n)?;
        String::from_utf8(raw.to_vec())
            .map(Py::Str)
            .map_err(|_| bad("string is not UTF-8"))
    }

    /// Little-endian two's complement integer of `n` bytes.
    fn long(&mut self, n: usize) -> Result<Py> {
        if n > 8 {
            return Err(bad(format!("{n}-byte integer does not fit in i64")));
        }
        let raw = self.take(n)?;
        let mut v: i64 = 0;
        for (i, b) in raw.iter().enumerate() {
            v |= (*b as i64) << (8 * i);
        }
        if n > 0 && n < 8 && raw[n - 1] & 0x80 != 0 {
            v -= 1i64 << (8 * n);
        }
        Ok(Py::Int(v))
    }

    fn push(&mut self, v: Py) {
        self.stack.push(v);
    }

    fn pop(&mut self) -> Result<Py> {
        self.stack.pop().ok_or_else(|| bad("stack underflow"))
    }

    fn top(&mut self) -> Result<&mut Py> {
        self.stack.last_mut().ok_or_else(|| bad("stack underflow"))
    }

    fn pop_mark(&mut self) -> Result<Vec<Py>> {
        let mark = self.marks.pop().ok_or_else(|| bad("no mark on the stack"))?;
        if mark > self.stack.len() {
            return Err(bad("mark above stack top"));
        }
        Ok(self.stack.split_off(mark))
    }

    fn put(&mut self, key: u32) -> Result<()> {
        let v = self.stack.last().cloned().ok_or_else(|| bad("memoize on empty stack"))?;
        self.memo.insert(key, v);
        Ok(())
    }

    fn get(&mut self, key: u32) -> Result<()> {
        let v = self
            .memo
            .get(&key)
            .cloned()
            .ok_or_else(|| bad(format!("memo key {key} not set")))?;
        self.push(v);
        Ok(())
    }

    fn extend_top(&mut self, items: Vec<Py>) -> Result<()> {
        match self.top()? {
            Py::List(list) => {
                list.extend(items);
                Ok(())
            }
            other => Err(bad(format!("append to {other:?}"))),
        }
    }

    fn set_items(&mut self, items: Vec<Py>) -> Result<()> {
        if items.len() % 2 != 0 {
            return Err(bad("odd number of dict items"));
        }
        let mut it = items.into_iter();
        let mut kv = Vec::new();
        while let (Some(k), Some(v)) = (it.next(), it.next()) {
            kv.push((k, v));
        }
        match self.top()? {
            Py::Dict(entries) => {
                entries.extend(kv);
                Ok(())
            }
            other => Err(bad(format!("setitem on {other:?}"))),
        }
    }

    fn tuple(&mut self, n: usize) -> Result<()> {
        if self.stack.len() < n {
            return Err(bad("stack underflow"));
        }
        let items = self.stack.split_off(self.stack.len() - n);
        self.push(Py::Tuple(items));
        Ok(())
    }

    fn run(mut self) -> Result<Py> {
        loop {
            let op = self.le::<1>()?[0];
            match op {
                0x80 => {
                    self.take(1)?;
                }
                0x95 => {
                    self.take(8)?;
                }
                b'.' => return self.pop(),
                b'(' => self.marks.push(self.stack.len()),
                b'0' => {
                    self.pop()?;
                }
                b'1' => {
                    self.pop_mark()?;
                }
                b'2' => {
                    let v = self.top()?.clone();
                    self.push(v);
                }

                b'N' => self.push(Py::None),
                0x88 => self.push(Py::Bool(true)),
                0x89 => self.push(Py::Bool(false)),
                b'J' => {
                    let v = i32::from_le_bytes(self.le()?);
                    self.push(Py::Int(v as i64));
                }
                b'K' => {
                    let v = self.len_u8()?;
                    self.push(Py::Int(v as i64));
                }
                b'M' => {
                    let v = u16::from_le_bytes(self.le()?);
                    self.push(Py::Int(v as i64));
                }
                0x8a => {
                    let n = self.len_u8()?;
                    let v = self.long(n)?;
                    self.push(v);
                }
                0x8b => {
                    let n = self.len_u32()?;
                    let v = self.long(n)?;
                    self.push(v);
                }
                b'I' => {
                    let line = self.line()?;
                    let v = match line {
                        "00" => Py::Bool(false),
                        "01" => Py::Bool(true),
                        s => Py::Int(s.parse().map_err(|_| bad(format!("bad INT '{s}'")))?),
                    };
                    self.push(v);
                }
                b'G' => {
                    let v = f64::from_be_bytes(self.le()?);
                    self.push(Py::Float(v));
                }
                b'F' => {
                    let line = self.line()?;
                    let v = line.parse().map_err(|_| bad(format!("bad FLOAT '{line}'")))?;
                    self.push(Py::Float(v));
                }

                0x8c => {
                    let n = self.len_u8()?;
                    let v = self.text(n)?;
                    self.push(v);
                }
                b'X' => {
                    let n = self.len_u32()?;
                    let v = self.text(n)?;
                    self.push(v);
                }
                0x8d => {
                    let n = self.len_u64()?;
                    let v = self.text(n)?;
                    self.push(v);
                }
                // Python 2 `str`.
                b'U' | b'T' => {
                    let n = if op == b'U' { self.len_u8()? } else { self.len_u32()? };
                    let raw = self.take(n)?;
                    self.push(Py::Str(String::from_utf8_lossy(raw).into_owned()));
                }
                b'C' | b'B' | 0x8e | 0x96 => {
                    let n = match op {
                        b'C' => self.len_u8()?,
                        b'B' => self.len_u32()?,
                        _ => self.len_u64()?,
                    };
                    let raw = self.take(n)?;
                    self.push(Py::Bytes(raw.to_vec()));
                }

                b']' => self.push(Py::List(Vec::new())),
                b')' => self.push(Py::Tuple(Vec::new())),
                b'}' => self.push(Py::Dict(Vec::new())),
                0x8f => self.push(Py::List(Vec::new())),
                b'l' => {
                    let items = self.pop_mark()?;
                    self.push(Py::List(items));
                }
                b't' => {
                    let items = self.pop_mark()?;
                    self.push(Py::Tuple(items));
                }
                0x91 => {
                    let items = self.pop_mark()?;
                    self.push(Py::List(items));
                }
                b'd' => {
                    let items = self.pop_mark()?;
                    self.push(Py::Dict(Vec::new()));
                    self.set_items(items)?;
                }
                0x85 => self.tuple(1)?,
                0x86 => self.tuple(2)?,
                0x87 => self.tuple(3)?,
                b'a' => {
                    let v = self.pop()?;
                    self.extend_top(vec![v])?;
                }
                b'e' | 0x90 => {
                    let items = self.pop_mark()?;
                    self.extend_top(items)?;
                }
                b's' => {
                    let v = self.pop()?;
                    let k = self.pop()?;
                    self.set_items(vec![k, v])?;
                }
                b'u' => {
                    let items = self.pop_mark()?;
                    self.set_items(items)?;
                }

                b'q' => {
                    let key = self.len_u8()? as u32;
                    self.put(key)?;
                }
                b'r' => {
                    let key = self.len_u32()? as u32;
                    self.put(key)?;
                }
                0x94 => {
                    let key = self.memo.len() as u32;
                    self.put(key)?;
                }
                b'h' => {
                    let key = self.len_u8()? as u32;
                    self.get(key)?;
                }
                b'j' => {
                    let key = self.len_u32()? as u32;
                    self.get(key)?;
                }

                b'c' => {
                    let module = self.line()?;
                    let name = self.line()?;
                    self.push(Py::Global(format!("{module}.{name}")));
                }
                0x93 => {
                    let name = self.pop()?;
                    let module = self.pop()?;
                    match (module, name) {
                        (Py::Str(m), Py::Str(n)) => self.push(Py::Global(format!("{m}.{n}"))),
                        _ => return Err(bad("STACK_GLOBAL needs two strings")),
                    }
                }
                b'R' => {
                    let args = self.pop()?;
                    let callable = self.pop()?;
                    let v = reduce(callable, args)?;
                    self.push(v);
                }
                0x81 => {
                    self.pop()?;
                    let cls = self.pop()?;
                    self.push(Py::Object(format!("{cls:?}")));
                }
                0x92 => {
                    self.pop()?;
                    self.pop()?;
                    let cls = self.pop()?;
                    self.push(Py::Object(format!("{cls:?}")));
                }
                b'b' => {
                    let state = self.pop()?;
                    build(self.top()?, state)?;
                }
                other => return Err(bad(format!("unsupported opcode 0x{other:02x}"))),
            }
        }
    }
}

fn key_string(key: Py) -> Result<String> {
    Ok(match key {
        Py::Str(s) => s,
        Py::Int(i) => i.to_string(),
        Py::Float(f) => f.to_string(),
        Py::Bool(true) => "True".to_owned(),
        Py::Bool(false) => "False".to_owned(),
        Py::None => "None".to_owned(),
        other => return Err(bad(format!("unsupported dict key {other:?}"))),
    })
}

fn reshape(shape: &[usize], items: Vec<Py>) -> Result<Value> {
    let Some((&outer, rest)) = shape.split_first() else {
        let item = items.into_iter().next().ok_or_else(|| bad("empty 0-d array"))?;
        return to_json(item);
    };
    let inner: usize = rest.iter().product();
    let mut it = items.into_iter();
    let mut out = Vec::with_capacity(outer);
    for _ in 0..outer {
        let chunk: Vec<Py> = it.by_ref().take(inner).collect();
        out.push(reshape(rest, chunk)?);
    }
    Ok(Value::Array(out))
}

fn to_json(v: Py) -> Result<Value> {
    Ok(match v {
        Py::None => Value::Null,
        Py::Bool(b) => Value::Bool(b),
        Py::Int(i) => Value::from(i),
        Py::Float(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        Py::Str(s) => Value::String(s),
        Py::List(items) | Py::Tuple(items) => {
            Value::Array(items.into_iter().map(to_json).collect::<Result<_>>()?)
        }
        Py::Dict(entries) => {
            let mut map = Map::with_capacity(entries.len());
            for (k, v) in entries {
                map.insert(key_string(k)?, to_json(v)?);
            }
            Value::Object(map)
        }
        Py::Array { shape, items } => reshape(&shape, items)?,
        Py::Bytes(_) => return Err(bad("bytes have no JSON form")),
        Py::Global(name) | Py::Object(name) => {
            return Err(bad(format!("unsupported object {name}")))
        }
        Py::Dtype { kind, .. } => return Err(bad(format!("bare dtype '{kind}'"))),
    })
}

/// Unpickle `bytes` and convert the result to JSON. Numpy arrays become
/// nested arrays of their shape; a 0-d array becomes its single element.
pub fn unpickle_json(bytes: &[u8]) -> Result<Value> {
    let machine = Machine {
        buf: bytes,
        stack: Vec::new(),
        marks: Vec::new(),
        memo: HashMap::new(),
    };
    to_json(machine.run()?)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    /// Emits protocol 3 opcodes the way `pickle.dumps(..., protocol=3)` does.
    #[derive(Default)]
    pub(crate) struct Pickler {
        pub(crate) out: Vec<u8>,
        memo: u8,
    }

    impl Pickler {
        fn memoize(&mut self) {
            self.out.extend_from_slice(&[b'q', self.memo]);
            self.memo += 1;
        }

        pub(crate) fn op(&mut self, op: u8) -> &mut Self {
            self.out.push(op);
            self
        }

        pub(crate) fn global(&mut self, module: &str, name: &str) -> &mut Self {
            self.out.push(b'c');
            self.out.extend_from_slice(format!("{module}\n{name}\n").as_bytes());
            self.memoize();
            self
        }

        pub(crate) fn int(&mut self, v: i32) -> &mut Self {
            match u8::try_from(v) {
                Ok(b) => self.out.extend_from_slice(&[b'K', b]),
                Err(_) => {
                    self.out.push(b'J');
                    self.out.extend_from_slice(&v.to_le_bytes());
                }
            }
            self
        }

        pub(crate) fn float(&mut self, v: f64) -> &mut Self {
            self.out.push(b'G');
            self.out.extend_from_slice(&v.to_be_bytes());
            self
        }

        pub(crate) fn str(&mut self, s: &str) -> &mut Self {
            self.out.push(b'X');
            self.out.extend_from_slice(&(s.len() as u32).to_le_bytes());
            self.out.extend_from_slice(s.as_bytes());
            self.memoize();
            self
        }

        pub(crate) fn bytes(&mut self, b: &[u8]) -> &mut Self {
            self.out.push(b'B');
            self.out.extend_from_slice(&(b.len() as u32).to_le_bytes());
            self.out.extend_from_slice(b);
            self.memoize();
            self
        }

        fn dtype(&mut self, kind: &str, order: &str) -> &mut Self {
            self.global("numpy", "dtype").str(kind).int(0).int(1).op(0x87).op(b'R');
            self.op(b'(').int(3).str(order).op(b'N').op(b'N').op(b'N');
            self.int(-1).int(-1).int(0).op(b't').op(b'b')
        }

        fn array_head(&mut self, shape: &[i32]) -> &mut Self {
            self.global("numpy.core.multiarray", "_reconstruct");
            self.global("numpy", "ndarray").int(0).op(0x85);
            self.out.extend_from_slice(b"C\x01b");
            self.op(0x87).op(b'R').op(b'(').int(1).op(b'(');
            for &d in shape {
                self.int(d);
            }
            self.op(b't')
        }

        /// Object array; `items` writes the elements.
        pub(crate) fn object_array(
            &mut self,
            shape: &[i32],
            items: impl FnOnce(&mut Self),
        ) -> &mut Self {
            self.array_head(shape).dtype("O8", "|").op(0x89);
            self.op(b']').op(b'(');
            items(self);
            self.op(b'e').op(b't').op(b'b')
        }

        /// Little-endian float64 array.
        pub(crate) fn f8_array(&mut self, shape: &[i32], values: &[f64]) -> &mut Self {
            let raw: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
            self.array_head(shape).dtype("f8", "<").op(0x89);
            self.bytes(&raw).op(b't').op(b'b')
        }

        /// numpy float64 scalar.
        pub(crate) fn f8_scalar(&mut self, v: f64) -> &mut Self {
            self.global("numpy.core.multiarray", "scalar").dtype("f8", "<");
            self.out.push(b'C');
            self.out.push(8);
            self.out.extend_from_slice(&v.to_le_bytes());
            self.op(0x86).op(b'R')
        }

        pub(crate) fn finish(&mut self) -> Vec<u8> {
            let mut out = vec![0x80, 3];
            out.append(&mut self.out);
            out.push(b'.');
            out
        }
    }

    #[test]
    fn plain_containers() {
        let mut p = Pickler::default();
        p.op(b'}').op(b'(');
        p.int(1).op(b']').op(b'(').float(0.5).str("a").op(0x88).op(b'N').op(b'e');
        p.str("k").int(-7).op(0x85);
        p.op(b'u');
        assert_eq!(
            unpickle_json(&p.finish()).unwrap(),
            json!({ "1": [0.5, "a", true, null], "k": [-7] })
        );
    }

    #[test]
    fn zero_d_object_array_holds_one_element() {
        let mut p = Pickler::default();
        p.object_array(&[], |p| {
            p.op(b'}').str("x").f8_scalar(2.25).op(b's');
        });
        assert_eq!(unpickle_json(&p.finish()).unwrap(), json!({ "x": 2.25 }));
    }

    #[test]
    fn numeric_array_is_reshaped() {
        let mut p = Pickler::default();
        p.f8_array(&[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(
            unpickle_json(&p.finish()).unwrap(),
            json!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]])
        );
    }

    #[test]
    fn memo_and_long_integers() {
        let mut p = Pickler::default();
        p.op(b'(').str("Broken").op(b'h').out.push(0);
        p.op(0x8a).out.extend_from_slice(&[2, 0x00, 0xff]);
        p.op(b'l');
        assert_eq!(unpickle_json(&p.finish()).unwrap(), json!(["Broken", "Broken", -256]));
    }

    #[test]
    fn unknown_classes_are_errors() {
        let mut p = Pickler::default();
        p.global("carla", "Location").op(b')').op(b'R');
        assert!(matches!(unpickle_json(&p.finish()), Err(Error::Npy(_))));
        assert!(matches!(unpickle_json(&[0x80, 3, b'N']), Err(Error::Npy(_))));
    }
}
