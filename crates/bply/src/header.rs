//! Header grammar for the constrained binary PLY dialect.
//!
//! ```text
//! ply
//! format binary_little_endian 1.0
//! comment ...                       (ignored)
//! element vertex <count>
//! property <type> <name>            (per-vertex layout, in declared order)
//! element <other> <count>           (skipped with all its properties)
//! end_header
//! ```
//!
//! The byte length of every line is counted including its terminator (`\n` or
//! `\r\n`), so [`PlyHeader::byte_len`] is the exact offset of the binary body.

use crate::PlyError;
use std::io::BufRead;

pub const MAGIC_LINE: &str = "ply";
pub const FORMAT_LINE: &str = "format binary_little_endian 1.0";
pub const END_HEADER_LINE: &str = "end_header";

/// One field of the per-vertex binary record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyTag {
    R8,
    G8,
    B8,
    A8,
    R16,
    G16,
    B16,
    A16,
    X32,
    Y32,
    Z32,
    X64,
    Y64,
    Z64,
    Nx32,
    Ny32,
    Nz32,
    Nx64,
    Ny64,
    Nz64,
    /// Unnamed fields; the value is discarded but the cursor still advances.
    Skip8,
    Skip16,
    Skip32,
    Skip64,
}

/// Named per-vertex attribute before its width is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Red,
    Green,
    Blue,
    Alpha,
    X,
    Y,
    Z,
    Nx,
    Ny,
    Nz,
}

fn field_of_name(name: &str) -> Option<Field> {
    match name {
        "red" => Some(Field::Red),
        "green" => Some(Field::Green),
        "blue" => Some(Field::Blue),
        "alpha" => Some(Field::Alpha),
        "x" => Some(Field::X),
        "y" => Some(Field::Y),
        "z" => Some(Field::Z),
        "nx" => Some(Field::Nx),
        "ny" => Some(Field::Ny),
        "nz" => Some(Field::Nz),
        _ => None,
    }
}

/// Byte width of a PLY scalar type token.
fn width_of_type(token: &str) -> Option<usize> {
    match token {
        "char" | "uchar" | "int8" | "uint8" => Some(1),
        "short" | "ushort" | "int16" | "uint16" => Some(2),
        "int" | "uint" | "float" | "int32" | "uint32" | "float32" => Some(4),
        "int64" | "uint64" | "double" | "float64" => Some(8),
        _ => None,
    }
}

impl PropertyTag {
    /// Number of bytes this field occupies in a vertex record.
    #[inline]
    pub const fn byte_width(self) -> usize {
        use PropertyTag::*;
        match self {
            R8 | G8 | B8 | A8 | Skip8 => 1,
            R16 | G16 | B16 | A16 | Skip16 => 2,
            X32 | Y32 | Z32 | Nx32 | Ny32 | Nz32 | Skip32 => 4,
            X64 | Y64 | Z64 | Nx64 | Ny64 | Nz64 | Skip64 => 8,
        }
    }

    /// Resolves a `property <type> <name>` declaration into a tag.
    ///
    /// Unknown names become skip fields of the declared width. A known name
    /// with a width it cannot have (e.g. `float red`) is a format error, an
    /// unknown type token is an unsupported-type error. 64-bit `x`/`y`/`z`
    /// resolve to the 64-bit position tags.
    pub fn resolve(type_token: &str, name: &str) -> Result<Self, PlyError> {
        use PropertyTag::*;

        let width = width_of_type(type_token).ok_or_else(|| {
            PlyError::UnsupportedType(format!(
                "unsupported property type ('property {type_token} {name}')"
            ))
        })?;

        let tag = match (field_of_name(name), width) {
            (None, 1) => Skip8,
            (None, 2) => Skip16,
            (None, 4) => Skip32,
            (None, 8) => Skip64,

            (Some(Field::Red), 1) => R8,
            (Some(Field::Green), 1) => G8,
            (Some(Field::Blue), 1) => B8,
            (Some(Field::Alpha), 1) => A8,
            (Some(Field::Red), 2) => R16,
            (Some(Field::Green), 2) => G16,
            (Some(Field::Blue), 2) => B16,
            (Some(Field::Alpha), 2) => A16,

            (Some(Field::X), 4) => X32,
            (Some(Field::Y), 4) => Y32,
            (Some(Field::Z), 4) => Z32,
            (Some(Field::X), 8) => X64,
            (Some(Field::Y), 8) => Y64,
            (Some(Field::Z), 8) => Z64,

            (Some(Field::Nx), 4) => Nx32,
            (Some(Field::Ny), 4) => Ny32,
            (Some(Field::Nz), 4) => Nz32,
            (Some(Field::Nx), 8) => Nx64,
            (Some(Field::Ny), 8) => Ny64,
            (Some(Field::Nz), 8) => Nz64,

            _ => {
                return Err(PlyError::Format(format!(
                    "invalid property type ('property {type_token} {name}')"
                )))
            }
        };

        Ok(tag)
    }
}

/// Parsed vertex layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlyHeader {
    /// Per-vertex fields in declared order.
    pub properties: Vec<PropertyTag>,
    pub vertex_count: usize,
    /// Exact number of bytes occupied by the header text, terminators included.
    pub byte_len: usize,
}

impl PlyHeader {
    /// Size of one vertex record in bytes.
    pub fn stride(&self) -> usize {
        self.properties.iter().map(|p| p.byte_width()).sum()
    }
}

/// Line reader that keeps an exact count of the raw bytes it consumed.
struct HeaderLines<'a, R> {
    reader: &'a mut R,
    consumed: usize,
    buf: Vec<u8>,
}

impl<R: BufRead> HeaderLines<'_, R> {
    fn next_line(&mut self) -> Result<String, PlyError> {
        self.buf.clear();
        let n = self.reader.read_until(b'\n', &mut self.buf)?;
        if n == 0 {
            return Err(PlyError::Format(
                "unexpected end of file before 'end_header'".into(),
            ));
        }
        self.consumed += n;

        let mut line: &[u8] = &self.buf;
        if let Some(rest) = line.strip_suffix(b"\n") {
            line = rest;
        }
        if let Some(rest) = line.strip_suffix(b"\r") {
            line = rest;
        }

        std::str::from_utf8(line)
            .map(str::to_owned)
            .map_err(|_| PlyError::Format(format!("header line is not valid UTF-8 (at byte {})", self.consumed - n)))
    }
}

/// Reads the header from `reader`, leaving the reader somewhere at or past
/// the end of the header. Callers that need the body must reposition to
/// [`PlyHeader::byte_len`] themselves.
pub fn read_header<R: BufRead>(reader: &mut R) -> Result<PlyHeader, PlyError> {
    let mut lines = HeaderLines {
        reader,
        consumed: 0,
        buf: Vec::with_capacity(64),
    };

    let magic = lines.next_line()?;
    if magic != MAGIC_LINE {
        return Err(PlyError::Format(format!(
            "magic number mismatch ('{magic}'), expected '{MAGIC_LINE}'"
        )));
    }

    let format = lines.next_line()?;
    if format != FORMAT_LINE {
        return Err(PlyError::Format(format!(
            "invalid data format ('{format}'), should be binary/little endian"
        )));
    }

    let mut properties = Vec::new();
    let mut vertex_count: Option<usize> = None;
    let mut skip = false;

    loop {
        let line = lines.next_line()?;
        if line == END_HEADER_LINE {
            break;
        }

        let mut cols = line.split_whitespace();
        match cols.next() {
            Some("element") => match (cols.next(), cols.next()) {
                (Some("vertex"), Some(count)) if vertex_count.is_none() => {
                    let count = count.parse::<usize>().map_err(|_| {
                        PlyError::Format(format!("invalid vertex count ('{line}')"))
                    })?;
                    vertex_count = Some(count);
                    skip = false;
                }
                // Every other element, including a repeated `vertex`, is skipped.
                (Some(_), Some(_)) => skip = true,
                _ => {
                    return Err(PlyError::Format(format!(
                        "malformed element declaration ('{line}')"
                    )))
                }
            },
            Some("property") if skip => {}
            Some("property") => {
                if vertex_count.is_none() {
                    return Err(PlyError::Format(format!(
                        "property declared before any element ('{line}')"
                    )));
                }
                let (type_token, name) = match (cols.next(), cols.next()) {
                    (Some(t), Some(n)) => (t, n),
                    _ => {
                        return Err(PlyError::Format(format!(
                            "malformed property declaration ('{line}')"
                        )))
                    }
                };
                if type_token == "list" {
                    return Err(PlyError::UnsupportedType(format!(
                        "list properties are not supported on vertices ('{line}')"
                    )));
                }
                properties.push(PropertyTag::resolve(type_token, name)?);
            }
            Some("comment") | Some("obj_info") | None => {}
            Some(_) => {
                return Err(PlyError::Format(format!(
                    "unrecognized header line ('{line}')"
                )))
            }
        }
    }

    let vertex_count = vertex_count
        .ok_or_else(|| PlyError::Format("header declares no 'element vertex'".into()))?;

    // A zero-width record would decode `vertex_count` points from no data.
    if properties.is_empty() && vertex_count > 0 {
        return Err(PlyError::Format(format!(
            "'element vertex {vertex_count}' declares no vertex properties"
        )));
    }

    Ok(PlyHeader {
        properties,
        vertex_count,
        byte_len: lines.consumed,
    })
}
