//! Little-endian primitives of the model container

use std::io::{self, Read, Write};

use crate::core::error::Error;
use crate::core::types::{Mat4, Quat, Vec3, Vec4};
use crate::core::Result;
use crate::math::Aabb;

/// Largest string accepted from a file
const MAX_STRING_LEN: usize = 4096;

fn truncated(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::Model("unexpected end of model data".into())
    } else {
        Error::Io(e)
    }
}

pub fn read_array<const N: usize>(reader: &mut impl Read) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf).map_err(truncated)?;
    Ok(buf)
}

/// Read exactly `len` bytes without trusting `len` for the allocation
pub fn read_bytes(reader: &mut impl Read, len: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader.take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(Error::Model(format!("expected {} bytes of model data, got {}", len, buf.len())));
    }
    Ok(buf)
}

pub fn read_u8(reader: &mut impl Read) -> Result<u8> {
    Ok(read_array::<1>(reader)?[0])
}

pub fn read_u32(reader: &mut impl Read) -> Result<u32> {
    Ok(u32::from_le_bytes(read_array(reader)?))
}

pub fn read_f32(reader: &mut impl Read) -> Result<f32> {
    Ok(f32::from_le_bytes(read_array(reader)?))
}

pub fn read_vec3(reader: &mut impl Read) -> Result<Vec3> {
    Ok(Vec3::new(read_f32(reader)?, read_f32(reader)?, read_f32(reader)?))
}

/// Stored as w, x, y, z
pub fn read_quat(reader: &mut impl Read) -> Result<Quat> {
    let w = read_f32(reader)?;
    let v = read_vec3(reader)?;
    Ok(Quat::from_xyzw(v.x, v.y, v.z, w))
}

/// 3x4 row-major affine matrix
pub fn read_matrix3x4(reader: &mut impl Read) -> Result<Mat4> {
    let mut rows = [Vec4::ZERO; 3];
    for row in &mut rows {
        *row = Vec4::new(read_f32(reader)?, read_f32(reader)?, read_f32(reader)?, read_f32(reader)?);
    }
    Ok(Mat4::from_cols(
        Vec4::new(rows[0].x, rows[1].x, rows[2].x, 0.0),
        Vec4::new(rows[0].y, rows[1].y, rows[2].y, 0.0),
        Vec4::new(rows[0].z, rows[1].z, rows[2].z, 0.0),
        Vec4::new(rows[0].w, rows[1].w, rows[2].w, 1.0),
    ))
}

pub fn read_aabb(reader: &mut impl Read) -> Result<Aabb> {
    let min = read_vec3(reader)?;
    let max = read_vec3(reader)?;
    Ok(Aabb::new(min, max))
}

/// Zero-terminated string
pub fn read_cstring(reader: &mut impl Read) -> Result<String> {
    let mut bytes = Vec::new();
    loop {
        match read_u8(reader)? {
            0 => break,
            b => bytes.push(b),
        }
        if bytes.len() > MAX_STRING_LEN {
            return Err(Error::Model("unterminated string in model data".into()));
        }
    }
    String::from_utf8(bytes).map_err(|e| Error::Model(format!("invalid string in model data: {}", e)))
}

pub fn write_u8(writer: &mut impl Write, value: u8) -> Result<()> {
    writer.write_all(&[value])?;
    Ok(())
}

pub fn write_u32(writer: &mut impl Write, value: u32) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

pub fn write_f32(writer: &mut impl Write, value: f32) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

pub fn write_vec3(writer: &mut impl Write, v: Vec3) -> Result<()> {
    write_f32(writer, v.x)?;
    write_f32(writer, v.y)?;
    write_f32(writer, v.z)
}

pub fn write_quat(writer: &mut impl Write, q: Quat) -> Result<()> {
    write_f32(writer, q.w)?;
    write_vec3(writer, Vec3::new(q.x, q.y, q.z))
}

pub fn write_matrix3x4(writer: &mut impl Write, m: &Mat4) -> Result<()> {
    for r in 0..3 {
        let row = m.row(r);
        for value in [row.x, row.y, row.z, row.w] {
            write_f32(writer, value)?;
        }
    }
    Ok(())
}

pub fn write_aabb(writer: &mut impl Write, aabb: &Aabb) -> Result<()> {
    write_vec3(writer, aabb.min)?;
    write_vec3(writer, aabb.max)
}

pub fn write_cstring(writer: &mut impl Write, s: &str) -> Result<()> {
    if s.as_bytes().contains(&0) {
        return Err(Error::Model(format!("string {:?} contains a zero byte", s)));
    }
    writer.write_all(s.as_bytes())?;
    write_u8(writer, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_matrix3x4_layout() {
        let m = Mat4::from_scale_rotation_translation(
            Vec3::new(1.0, 2.0, 3.0),
            Quat::from_rotation_y(0.5),
            Vec3::new(4.0, 5.0, 6.0),
        );
        let mut bytes = Vec::new();
        write_matrix3x4(&mut bytes, &m).unwrap();
        assert_eq!(bytes.len(), 48);
        // Translation ends each row
        assert_eq!(f32::from_le_bytes(bytes[12..16].try_into().unwrap()), 4.0);
        assert_eq!(f32::from_le_bytes(bytes[28..32].try_into().unwrap()), 5.0);

        let back = read_matrix3x4(&mut Cursor::new(bytes)).unwrap();
        assert!(back.abs_diff_eq(m, 1e-6));
    }

    #[test]
    fn test_quat_is_stored_w_first() {
        let mut bytes = Vec::new();
        write_quat(&mut bytes, Quat::IDENTITY).unwrap();
        assert_eq!(f32::from_le_bytes(bytes[0..4].try_into().unwrap()), 1.0);
        assert_eq!(read_quat(&mut Cursor::new(bytes)).unwrap(), Quat::IDENTITY);
    }

    #[test]
    fn test_cstring() {
        let mut bytes = Vec::new();
        write_cstring(&mut bytes, "Bip01").unwrap();
        assert_eq!(bytes.last(), Some(&0));
        let mut cursor = Cursor::new(bytes);
        assert_eq!(read_cstring(&mut cursor).unwrap(), "Bip01");
        assert!(write_cstring(&mut Vec::new(), "a\0b").is_err());
    }

    #[test]
    fn test_truncated_input() {
        let mut cursor = Cursor::new(vec![1u8, 2]);
        assert!(matches!(read_u32(&mut cursor), Err(Error::Model(_))));
        let mut cursor = Cursor::new(vec![0u8; 10]);
        assert!(matches!(read_bytes(&mut cursor, 1 << 30), Err(Error::Model(_))));
        let mut cursor = Cursor::new(b"abc".to_vec());
        assert!(matches!(read_cstring(&mut cursor), Err(Error::Model(_))));
    }
}
