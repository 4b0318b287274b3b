//! Minimal writer for `torch.save` zip archives.
//!
//! Produces `{"model_state_dict": {...}, "stats": {...}}` as pickle protocol 2
//! with one little-endian f32 storage per tensor, the layout `torch.save`
//! uses for a training record.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use fakescope_core::inference::RegressionStats;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Archive root directory, normally the file stem.
const ROOT: &str = "archive";

/// Pickle opcodes used below.
mod op {
    pub const PROTO: u8 = 0x80;
    pub const EMPTY_DICT: u8 = b'}';
    pub const EMPTY_TUPLE: u8 = b')';
    pub const MARK: u8 = b'(';
    pub const SETITEMS: u8 = b'u';
    pub const TUPLE: u8 = b't';
    pub const BINUNICODE: u8 = b'X';
    pub const BININT: u8 = b'J';
    pub const BINFLOAT: u8 = b'G';
    pub const GLOBAL: u8 = b'c';
    pub const BINPERSID: u8 = b'Q';
    pub const REDUCE: u8 = b'R';
    pub const NEWFALSE: u8 = 0x89;
    pub const STOP: u8 = b'.';
}

#[derive(Default)]
struct Pickle(Vec<u8>);

impl Pickle {
    fn op(&mut self, code: u8) -> &mut Self {
        self.0.push(code);
        self
    }

    fn string(&mut self, s: &str) -> &mut Self {
        let len = u32::try_from(s.len()).unwrap_or(u32::MAX);
        self.op(op::BINUNICODE);
        self.0.extend_from_slice(&len.to_le_bytes());
        self.0.extend_from_slice(s.as_bytes());
        self
    }

    fn int(&mut self, v: usize) -> &mut Self {
        let v = i32::try_from(v).unwrap_or(i32::MAX);
        self.op(op::BININT);
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    fn float(&mut self, v: f64) -> &mut Self {
        self.op(op::BINFLOAT);
        self.0.extend_from_slice(&v.to_be_bytes());
        self
    }

    fn global(&mut self, module: &str, name: &str) -> &mut Self {
        self.op(op::GLOBAL);
        self.0.extend_from_slice(format!("{module}\n{name}\n").as_bytes());
        self
    }

    fn int_tuple(&mut self, values: &[usize]) -> &mut Self {
        self.op(op::MARK);
        for &v in values {
            self.int(v);
        }
        self.op(op::TUPLE)
    }

    /// `torch._utils._rebuild_tensor_v2` over storage `key`.
    fn tensor(&mut self, key: &str, shape: &[usize]) -> &mut Self {
        let numel = shape.iter().product();
        let mut strides = vec![1; shape.len()];
        for i in (0..shape.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * shape[i + 1];
        }

        self.global("torch._utils", "_rebuild_tensor_v2").op(op::MARK);
        self.op(op::MARK)
            .string("storage")
            .global("torch", "FloatStorage")
            .string(key)
            .string("cpu")
            .int(numel)
            .op(op::TUPLE)
            .op(op::BINPERSID);
        self.int(0).int_tuple(shape).int_tuple(&strides).op(op::NEWFALSE);
        self.global("collections", "OrderedDict")
            .op(op::EMPTY_TUPLE)
            .op(op::REDUCE);
        self.op(op::TUPLE).op(op::REDUCE)
    }
}

/// Writes `entries` (name, shape, f32 data) and optional `stats` as a training record.
pub(crate) fn write_record(
    path: &Path,
    entries: &[(String, Vec<usize>, Vec<f32>)],
    stats: Option<RegressionStats>,
) -> Result<()> {
    let mut pickle = Pickle::default();
    pickle.op(op::PROTO).op(2).op(op::EMPTY_DICT).op(op::MARK);

    pickle.string("model_state_dict").op(op::EMPTY_DICT).op(op::MARK);
    for (index, (name, shape, _)) in entries.iter().enumerate() {
        pickle.string(name).tensor(&index.to_string(), shape);
    }
    pickle.op(op::SETITEMS);

    if let Some(s) = stats {
        pickle.string("stats").op(op::EMPTY_DICT).op(op::MARK);
        for (name, value) in [
            ("ssim_mean", s.ssim_mean),
            ("ssim_std", s.ssim_std),
            ("lpips_mean", s.lpips_mean),
            ("lpips_std", s.lpips_std),
        ] {
            pickle.string(name).float(value);
        }
        pickle.op(op::SETITEMS);
    }
    pickle.op(op::SETITEMS).op(op::STOP);

    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    zip.start_file(format!("{ROOT}/data.pkl"), options)?;
    zip.write_all(&pickle.0)?;
    for (index, (_, _, data)) in entries.iter().enumerate() {
        zip.start_file(format!("{ROOT}/data/{index}"), options)?;
        zip.write_all(bytemuck::cast_slice::<f32, u8>(data.as_slice()))?;
    }
    zip.finish()?;
    Ok(())
}
