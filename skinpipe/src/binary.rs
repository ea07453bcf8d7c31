//! Bounds-checked little-endian cursor shared by every chunk parser.
//!
//! The reader is IO-free: it operates on an in-memory byte slice. Each read
//! checks the remaining length before touching the cursor, so a failed read
//! leaves the cursor where it was. Callers still treat any error as fatal for
//! the whole buffer.

use crate::Error;
use byteorder::{ByteOrder, LittleEndian};
use glam::{Mat4, Quat, Vec2, Vec3};

#[derive(Clone, Debug)]
pub(crate) struct BinaryInput<'a> {
    bytes: &'a [u8],
    cursor: usize,
    section: &'static str,
}

impl<'a> BinaryInput<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            cursor: 0,
            section: "header",
        }
    }

    /// Names the part of the file being read; used in EOF messages.
    pub(crate) fn section(&mut self, section: &'static str) {
        self.section = section;
    }

    pub(crate) fn offset(&self) -> usize {
        self.cursor
    }

    pub(crate) fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.cursor)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], Error> {
        if self.remaining() < len {
            return Err(Error::eof(self.section, self.cursor));
        }
        let out = &self.bytes[self.cursor..self.cursor + len];
        self.cursor += len;
        Ok(out)
    }

    pub(crate) fn skip(&mut self, len: usize) -> Result<(), Error> {
        self.take(len).map(|_| ())
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16, Error> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, Error> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub(crate) fn read_i32(&mut self) -> Result<i32, Error> {
        Ok(LittleEndian::read_i32(self.take(4)?))
    }

    pub(crate) fn read_f32(&mut self) -> Result<f32, Error> {
        Ok(LittleEndian::read_f32(self.take(4)?))
    }

    pub(crate) fn read_vec2(&mut self) -> Result<Vec2, Error> {
        let b = self.take(8)?;
        Ok(Vec2::new(
            LittleEndian::read_f32(&b[0..4]),
            LittleEndian::read_f32(&b[4..8]),
        ))
    }

    pub(crate) fn read_vec3(&mut self) -> Result<Vec3, Error> {
        let b = self.take(12)?;
        Ok(Vec3::new(
            LittleEndian::read_f32(&b[0..4]),
            LittleEndian::read_f32(&b[4..8]),
            LittleEndian::read_f32(&b[8..12]),
        ))
    }

    /// Reads `x, y, z, w` without normalizing.
    pub(crate) fn read_quat(&mut self) -> Result<Quat, Error> {
        let b = self.take(16)?;
        let mut v = [0.0f32; 4];
        LittleEndian::read_f32_into(b, &mut v);
        Ok(Quat::from_xyzw(v[0], v[1], v[2], v[3]))
    }

    /// Reads 16 floats stored row-major with translation in elements 12..14.
    ///
    /// Loading the row-vector layout as columns yields the equivalent
    /// column-vector matrix, so translation ends up in `w_axis`.
    pub(crate) fn read_mat4(&mut self) -> Result<Mat4, Error> {
        let b = self.take(64)?;
        let mut m = [0.0f32; 16];
        LittleEndian::read_f32_into(b, &mut m);
        Ok(Mat4::from_cols_array(&m))
    }

    pub(crate) fn read_tag(&mut self) -> Result<[u8; 8], Error> {
        let mut tag = [0u8; 8];
        tag.copy_from_slice(self.take(8)?);
        Ok(tag)
    }

    /// Fixed-width, NUL-padded name field.
    pub(crate) fn read_fixed_str(&mut self, width: usize) -> Result<String, Error> {
        Ok(fixed_str(self.take(width)?))
    }

    /// `u32` byte length followed by the bytes.
    pub(crate) fn read_len_string(&mut self, max: usize) -> Result<String, Error> {
        let offset = self.cursor;
        let len = self.read_u32()? as usize;
        if len > max {
            self.cursor = offset;
            return Err(Error::CountOutOfRange {
                what: format!("{} string length", self.section),
                count: len as i64,
                max,
            });
        }
        let bytes = match self.take(len) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.cursor = offset;
                return Err(err);
            }
        };
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Signed count field that must lie in `0..=max`.
    pub(crate) fn read_count_i32(&mut self, what: &str, max: usize) -> Result<usize, Error> {
        let offset = self.cursor;
        let count = self.read_i32()?;
        if count < 0 || count as usize > max {
            self.cursor = offset;
            return Err(Error::CountOutOfRange {
                what: what.to_string(),
                count: count as i64,
                max,
            });
        }
        Ok(count as usize)
    }

    /// Unsigned count field that must not exceed `max`.
    pub(crate) fn read_count_u32(&mut self, what: &str, max: usize) -> Result<usize, Error> {
        let offset = self.cursor;
        let count = self.read_u32()?;
        if count as usize > max {
            self.cursor = offset;
            return Err(Error::CountOutOfRange {
                what: what.to_string(),
                count: count as i64,
                max,
            });
        }
        Ok(count as usize)
    }

    /// Fails early when `count * stride` bytes cannot possibly follow.
    pub(crate) fn require(&self, count: usize, stride: usize) -> Result<(), Error> {
        match count.checked_mul(stride) {
            Some(len) if len <= self.remaining() => Ok(()),
            _ => Err(Error::eof(self.section, self.cursor)),
        }
    }
}

pub(crate) fn fixed_str(bytes: &[u8]) -> String {
    let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..len]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::BinaryInput;
    use crate::Error;

    #[test]
    fn failed_read_does_not_advance_cursor() {
        let bytes = [1u8, 0, 0];
        let mut input = BinaryInput::new(&bytes);
        assert!(input.read_u32().is_err());
        assert_eq!(input.offset(), 0);
        assert_eq!(input.read_u16().expect("u16"), 1);
        assert_eq!(input.offset(), 2);
    }

    #[test]
    fn fixed_str_stops_at_nul() {
        let mut bytes = [0u8; 8];
        bytes[..3].copy_from_slice(b"abc");
        bytes[4] = b'z';
        let mut input = BinaryInput::new(&bytes);
        assert_eq!(input.read_fixed_str(8).expect("str"), "abc");
        assert_eq!(input.remaining(), 0);
    }

    #[test]
    fn negative_count_is_rejected() {
        let bytes = (-1i32).to_le_bytes();
        let mut input = BinaryInput::new(&bytes);
        let err = input.read_count_i32("points", 10).unwrap_err();
        assert!(matches!(err, Error::CountOutOfRange { count: -1, .. }));
        assert_eq!(input.offset(), 0);
    }

    #[test]
    fn matrix_translation_lands_in_w_axis() {
        let mut bytes = Vec::new();
        let m: [f32; 16] = [
            1.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            4.0, 5.0, 6.0, 1.0,
        ];
        for v in m {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let mut input = BinaryInput::new(&bytes);
        let mat = input.read_mat4().expect("mat");
        assert_eq!(mat.w_axis.truncate(), glam::Vec3::new(4.0, 5.0, 6.0));
        assert_eq!(
            mat.transform_point3(glam::Vec3::ZERO),
            glam::Vec3::new(4.0, 5.0, 6.0)
        );
    }
}
