use crate::{unpack_color, RawPoint, END_HEADER_LINE, FORMAT_LINE, MAGIC_LINE};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Writes `points` as `x,y,z` float32 + `red,green,blue,alpha` uint8 records.
pub fn write_ply<W: Write>(w: &mut W, points: &[RawPoint]) -> io::Result<()> {
    write!(
        w,
        "{MAGIC_LINE}\n{FORMAT_LINE}\ncomment written by bply\nelement vertex {}\n\
         property float x\nproperty float y\nproperty float z\n\
         property uchar red\nproperty uchar green\nproperty uchar blue\nproperty uchar alpha\n\
         {END_HEADER_LINE}\n",
        points.len()
    )?;

    for point in points {
        for c in point.position {
            w.write_all(&c.to_le_bytes())?;
        }
        w.write_all(&unpack_color(point.color))?;
    }

    Ok(())
}

pub fn write_file<P: AsRef<Path>>(path: P, points: &[RawPoint]) -> io::Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    write_ply(&mut file, points)?;
    file.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{read_header, PropertyTag};
    use std::io::Cursor;

    #[test]
    fn written_header_matches_record_size() {
        let points = [RawPoint {
            position: [1.0, 2.0, 3.0],
            color: 0x0403_0201,
        }];
        let mut bytes = Vec::new();
        write_ply(&mut bytes, &points).unwrap();

        let header = read_header(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(header.properties[3], PropertyTag::R8);
        assert_eq!(header.stride(), 16);
        assert_eq!(bytes.len(), header.byte_len + 16);
        assert_eq!(&bytes[header.byte_len + 12..], &[1, 2, 3, 4]);
    }
}
