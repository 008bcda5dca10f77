//! BPLY: strict decoder for binary little-endian PLY vertex clouds.
//!
//! - Only `format binary_little_endian 1.0` is accepted.
//! - Only the first `element vertex` block is read; every other element is skipped.
//! - Supported vertex fields: `x,y,z` (32/64-bit), `nx,ny,nz` (32/64-bit),
//!   `red,green,blue,alpha` (8/16-bit) and unnamed fields of 1/2/4/8 bytes.
//! - Decoded points are shuffled, capped and recentered on their bounding box.
//!
//! Vertex record layout (little-endian), one per vertex, fields in header order:
//!   f32/f64 x y z      -> narrowed to f32
//!   f32/f64 nx ny nz   -> read and discarded
//!   u8/u16  r g b a    -> 16-bit channels keep their most significant byte
//!   u8..u64 other      -> skipped
//!
//! Packed color: `a << 24 | b << 16 | g << 8 | r` (R,G,B,A bytes, little-endian).

mod header;
mod writer;

pub use header::{read_header, PlyHeader, PropertyTag, END_HEADER_LINE, FORMAT_LINE, MAGIC_LINE};
pub use writer::{write_file, write_ply};

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use std::fs::File;
use std::io::{self, BufReader, Cursor, ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

/// Default cap on the number of points kept after the shuffle.
pub const DEFAULT_POINT_CAP: usize = 300_000;

/// Packed color used when the layout carries no color fields.
pub const OPAQUE_WHITE: u32 = 0xFFFF_FFFF;

// Upper bound for the up-front allocation; the body may still be larger.
const MAX_PREALLOC_POINTS: usize = 1 << 20;

#[derive(Debug, thiserror::Error)]
pub enum PlyError {
    /// Magic/format-line mismatch, malformed header token or width/type mismatch.
    #[error("format error: {0}")]
    Format(String),
    #[error("unsupported type: {0}")]
    UnsupportedType(String),
    /// Stream truncation or any other I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// One decoded vertex.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RawPoint {
    pub position: [f32; 3],
    /// Packed RGBA, see [`pack_color`].
    pub color: u32,
}

#[inline]
pub fn pack_color(r: u8, g: u8, b: u8, a: u8) -> u32 {
    u32::from_le_bytes([r, g, b, a])
}

/// Inverse of [`pack_color`]; returns `[r, g, b, a]`.
#[inline]
pub fn unpack_color(color: u32) -> [u8; 4] {
    color.to_le_bytes()
}

/// Axis-aligned bounding box given by two opposite corners.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl Bounds {
    /// Inverted box that any included point replaces.
    pub const EMPTY: Self = Self {
        min: [f32::INFINITY; 3],
        max: [f32::NEG_INFINITY; 3],
    };

    pub const ZERO: Self = Self {
        min: [0.0; 3],
        max: [0.0; 3],
    };

    #[inline]
    pub fn is_empty(&self) -> bool {
        (0..3).any(|i| self.min[i] > self.max[i])
    }

    #[inline]
    pub fn include(&mut self, p: [f32; 3]) {
        for i in 0..3 {
            self.min[i] = self.min[i].min(p[i]);
            self.max[i] = self.max[i].max(p[i]);
        }
    }

    #[inline]
    pub fn center(&self) -> [f32; 3] {
        [
            0.5 * (self.min[0] + self.max[0]),
            0.5 * (self.min[1] + self.max[1]),
            0.5 * (self.min[2] + self.max[2]),
        ]
    }

    /// Width, height and depth.
    #[inline]
    pub fn size(&self) -> [f32; 3] {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }

    pub fn volume(&self) -> f32 {
        let [w, h, d] = self.size();
        w * h * d
    }

    fn translated(&self, by: [f32; 3]) -> Self {
        Self {
            min: [self.min[0] + by[0], self.min[1] + by[1], self.min[2] + by[2]],
            max: [self.max[0] + by[0], self.max[1] + by[1], self.max[2] + by[2]],
        }
    }
}

/// Import knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Maximum number of points kept; the rest of the shuffled cloud is dropped.
    pub point_cap: usize,
    /// Seed for the shuffle. `None` draws from the thread RNG.
    pub seed: Option<u64>,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            point_cap: DEFAULT_POINT_CAP,
            seed: None,
        }
    }
}

/// A decoded, shuffled, capped and recentered cloud.
#[derive(Debug, Clone)]
pub struct PlyCloud {
    pub header: PlyHeader,
    /// Points in random order, positions relative to `center`.
    pub points: Vec<RawPoint>,
    /// Recentered bounding box of every decoded vertex (symmetric about the origin).
    pub bounds: Bounds,
    /// Largest distance of a kept point from the local origin.
    pub bounding_radius: f32,
    /// Translation that was subtracted from every position.
    pub center: [f32; 3],
}

#[inline(always)]
fn take<'a>(buf: &mut &'a [u8], n: usize) -> io::Result<&'a [u8]> {
    if buf.len() < n {
        return Err(io::Error::new(ErrorKind::UnexpectedEof, "truncated vertex record"));
    }
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

#[inline(always)]
fn le_u8(buf: &mut &[u8]) -> io::Result<u8> {
    Ok(take(buf, 1)?[0])
}

#[inline(always)]
fn le_u16(buf: &mut &[u8]) -> io::Result<u16> {
    let b = take(buf, 2)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

#[inline(always)]
fn le_f32(buf: &mut &[u8]) -> io::Result<f32> {
    let b = take(buf, 4)?;
    Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

#[inline(always)]
fn le_f64(buf: &mut &[u8]) -> io::Result<f64> {
    let b = take(buf, 8)?;
    Ok(f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
}

/// Decodes one vertex record laid out as `properties`.
fn decode_vertex(properties: &[PropertyTag], mut p: &[u8]) -> io::Result<RawPoint> {
    use PropertyTag::*;

    let mut position = [0.0f32; 3];
    let [mut r, mut g, mut b, mut a] = [u8::MAX; 4];

    for &prop in properties {
        match prop {
            R8 => r = le_u8(&mut p)?,
            G8 => g = le_u8(&mut p)?,
            B8 => b = le_u8(&mut p)?,
            A8 => a = le_u8(&mut p)?,

            R16 => r = (le_u16(&mut p)? >> 8) as u8,
            G16 => g = (le_u16(&mut p)? >> 8) as u8,
            B16 => b = (le_u16(&mut p)? >> 8) as u8,
            A16 => a = (le_u16(&mut p)? >> 8) as u8,

            X32 => position[0] = le_f32(&mut p)?,
            Y32 => position[1] = le_f32(&mut p)?,
            Z32 => position[2] = le_f32(&mut p)?,

            X64 => position[0] = le_f64(&mut p)? as f32,
            Y64 => position[1] = le_f64(&mut p)? as f32,
            Z64 => position[2] = le_f64(&mut p)? as f32,

            // Normals and unnamed fields only advance the cursor.
            Nx32 | Ny32 | Nz32 | Nx64 | Ny64 | Nz64 | Skip8 | Skip16 | Skip32 | Skip64 => {
                take(&mut p, prop.byte_width())?;
            }
        }
    }

    Ok(RawPoint {
        position,
        color: pack_color(r, g, b, a),
    })
}

struct Body {
    points: Vec<RawPoint>,
    bounds: Bounds,
    max_radius: f32,
}

fn decode_body<R: Read>(header: &PlyHeader, mut reader: R) -> Result<Body, PlyError> {
    let count = header.vertex_count;
    let mut record = vec![0u8; header.stride()];
    let mut points = Vec::with_capacity(count.min(MAX_PREALLOC_POINTS));
    let mut bounds = Bounds::EMPTY;
    let mut max_radius = 0.0f32;

    for index in 0..count {
        reader.read_exact(&mut record).map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                io::Error::new(
                    ErrorKind::UnexpectedEof,
                    format!("vertex data truncated at vertex {index} of {count}"),
                )
            } else {
                e
            }
        })?;

        let point = decode_vertex(&header.properties, &record)?;
        let [x, y, z] = point.position;
        bounds.include(point.position);
        max_radius = max_radius.max((x * x + y * y + z * z).sqrt());
        points.push(point);
    }

    Ok(Body {
        points,
        bounds,
        max_radius,
    })
}

/// Shuffle, cap and recenter.
fn finish(header: PlyHeader, body: Body, options: &DecodeOptions) -> PlyCloud {
    let Body {
        mut points,
        bounds,
        max_radius,
    } = body;

    // The shuffle comes first so a capped cloud is a uniform sample, not a prefix.
    match options.seed {
        Some(seed) => points.shuffle(&mut StdRng::seed_from_u64(seed)),
        None => points.shuffle(&mut rand::thread_rng()),
    }

    if points.len() > options.point_cap {
        log::info!(
            "PLY cloud capped: {} of {} points kept",
            options.point_cap,
            points.len()
        );
        points.truncate(options.point_cap);
    }

    let bounds = if bounds.is_empty() { Bounds::ZERO } else { bounds };
    let center = bounds.center();
    let shift = [-center[0], -center[1], -center[2]];

    let mut bounding_radius = 0.0f32;
    for point in points.iter_mut() {
        let p = &mut point.position;
        p[0] += shift[0];
        p[1] += shift[1];
        p[2] += shift[2];
        bounding_radius = bounding_radius.max((p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt());
    }

    log::debug!(
        "PLY decoded: vertices={}, stride={}, kept={}, center=({:.3},{:.3},{:.3}), radius {:.3} -> {:.3}",
        header.vertex_count,
        header.stride(),
        points.len(),
        center[0],
        center[1],
        center[2],
        max_radius,
        bounding_radius
    );

    PlyCloud {
        header,
        points,
        bounds: bounds.translated(shift),
        bounding_radius,
        center,
    }
}

/// Decode a cloud from a seekable stream, starting at its current position.
///
/// The header is read through a buffer that may run ahead into the body, so
/// the stream is repositioned to exactly `start + header.byte_len` before the
/// vertex block is decoded.
pub fn decode<R: Read + Seek>(mut stream: R, options: &DecodeOptions) -> Result<PlyCloud, PlyError> {
    let start = stream.stream_position()?;
    let header = read_header(&mut BufReader::new(&mut stream))?;

    stream.seek(SeekFrom::Start(start + header.byte_len as u64))?;
    let body = decode_body(&header, BufReader::new(&mut stream))?;

    Ok(finish(header, body, options))
}

/// Decode a cloud held in memory.
pub fn decode_bytes(bytes: &[u8], options: &DecodeOptions) -> Result<PlyCloud, PlyError> {
    decode(Cursor::new(bytes), options)
}

/// Fast path: prefer mmap; fall back to a buffered read.
#[cfg(feature = "mmap")]
pub fn read_file<P: AsRef<Path>>(path: P, options: &DecodeOptions) -> Result<PlyCloud, PlyError> {
    let file = File::open(path)?;
    let map = unsafe { memmap2::MmapOptions::new().map(&file)? };
    decode_bytes(&map, options)
}

#[cfg(not(feature = "mmap"))]
pub fn read_file<P: AsRef<Path>>(path: P, options: &DecodeOptions) -> Result<PlyCloud, PlyError> {
    let file = File::open(path)?;
    decode(file, options)
}
