//! Big-endian binary streams
//!
//! All multi-byte integers and floats are written big-endian. Sizes and
//! counters use the variable-length quantity encoding: seven bits per byte,
//! most significant group first, high bit set on every byte except the last.
//! Signed VLQs fold the sign into the lowest bit.

use crate::error::{DataError, DataResult};

/// Growable output buffer
#[derive(Debug, Default, Clone)]
pub struct DataWriter {
    buf: Vec<u8>,
}

impl DataWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Create with reserved capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Bytes written so far
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Borrow the written bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consume the writer, returning the buffer
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.push(v as u8);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// Write an unsigned variable-length integer
    pub fn write_vlq_u(&mut self, v: u64) {
        let mut groups = [0u8; 10];
        let mut count = 0;
        let mut rest = v;
        loop {
            groups[count] = (rest & 0x7f) as u8;
            count += 1;
            rest >>= 7;
            if rest == 0 {
                break;
            }
        }
        for i in (0..count).rev() {
            let continuation = if i > 0 { 0x80 } else { 0 };
            self.buf.push(groups[i] | continuation);
        }
    }

    /// Write a signed variable-length integer
    pub fn write_vlq_i(&mut self, v: i64) {
        let folded = if v < 0 {
            ((-(v + 1)) as u64) << 1 | 1
        } else {
            (v as u64) << 1
        };
        self.write_vlq_u(folded);
    }

    /// Write a length-prefixed byte array
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_vlq_u(bytes.len() as u64);
        self.buf.extend_from_slice(bytes);
    }

    /// Append raw bytes with no length prefix
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Write a length-prefixed UTF-8 string
    pub fn write_string(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
    }

    /// Write an optional value as a presence flag followed by the value
    pub fn write_option<T>(&mut self, v: Option<&T>, write: impl FnOnce(&mut Self, &T)) {
        match v {
            Some(inner) => {
                self.write_bool(true);
                write(self, inner);
            }
            None => self.write_bool(false),
        }
    }
}

/// Cursor over a byte slice
#[derive(Debug, Clone)]
pub struct DataReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> DataReader<'a> {
    /// Create a reader at the start of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current read position
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Whether the whole slice has been consumed
    pub fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn take(&mut self, n: usize, what: &'static str) -> DataResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(DataError::UnexpectedEof(what));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self, what: &'static str) -> DataResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, what)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> DataResult<u8> {
        Ok(self.take(1, "u8")?[0])
    }

    pub fn read_bool(&mut self) -> DataResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> DataResult<u16> {
        Ok(u16::from_be_bytes(self.take_array("u16")?))
    }

    pub fn read_u32(&mut self) -> DataResult<u32> {
        Ok(u32::from_be_bytes(self.take_array("u32")?))
    }

    pub fn read_u64(&mut self) -> DataResult<u64> {
        Ok(u64::from_be_bytes(self.take_array("u64")?))
    }

    pub fn read_i32(&mut self) -> DataResult<i32> {
        Ok(i32::from_be_bytes(self.take_array("i32")?))
    }

    pub fn read_f32(&mut self) -> DataResult<f32> {
        Ok(f32::from_be_bytes(self.take_array("f32")?))
    }

    pub fn read_f64(&mut self) -> DataResult<f64> {
        Ok(f64::from_be_bytes(self.take_array("f64")?))
    }

    /// Read an unsigned variable-length integer
    pub fn read_vlq_u(&mut self) -> DataResult<u64> {
        let mut value: u64 = 0;
        for _ in 0..10 {
            let byte = self.read_u8().map_err(|_| DataError::UnexpectedEof("vlq"))?;
            value = (value << 7) | (byte & 0x7f) as u64;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(DataError::VlqOverflow)
    }

    /// Read a signed variable-length integer
    pub fn read_vlq_i(&mut self) -> DataResult<i64> {
        let folded = self.read_vlq_u()?;
        if folded & 1 == 1 {
            Ok(-((folded >> 1) as i64) - 1)
        } else {
            Ok((folded >> 1) as i64)
        }
    }

    /// Read a length-prefixed byte array
    pub fn read_bytes(&mut self) -> DataResult<Vec<u8>> {
        let len = self.read_vlq_u()? as usize;
        Ok(self.take(len, "bytes")?.to_vec())
    }

    /// Read `n` raw bytes
    pub fn read_raw(&mut self, n: usize) -> DataResult<&'a [u8]> {
        self.take(n, "raw bytes")
    }

    /// Read a length-prefixed UTF-8 string
    pub fn read_string(&mut self) -> DataResult<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes).map_err(|e| DataError::InvalidUtf8(e.to_string()))
    }

    /// Read an optional value written by [`DataWriter::write_option`]
    pub fn read_option<T>(
        &mut self,
        read: impl FnOnce(&mut Self) -> DataResult<T>,
    ) -> DataResult<Option<T>> {
        if self.read_bool()? {
            Ok(Some(read(self)?))
        } else {
            Ok(None)
        }
    }
}

/// Encoded length of an unsigned VLQ
pub fn vlq_u_size(v: u64) -> usize {
    let mut size = 1;
    let mut rest = v >> 7;
    while rest != 0 {
        size += 1;
        rest >>= 7;
    }
    size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vlq_known_encodings() {
        let mut w = DataWriter::new();
        w.write_vlq_u(0);
        w.write_vlq_u(127);
        w.write_vlq_u(128);
        assert_eq!(w.as_bytes(), &[0x00, 0x7f, 0x81, 0x00]);
    }

    #[test]
    fn test_signed_vlq_folding() {
        let mut w = DataWriter::new();
        w.write_vlq_i(-1);
        w.write_vlq_i(1);
        w.write_vlq_i(i64::MIN);
        let bytes = w.into_bytes();
        assert_eq!(bytes[0], 0x01);
        assert_eq!(bytes[1], 0x02);

        let mut r = DataReader::new(&bytes);
        assert_eq!(r.read_vlq_i().unwrap(), -1);
        assert_eq!(r.read_vlq_i().unwrap(), 1);
        assert_eq!(r.read_vlq_i().unwrap(), i64::MIN);
        assert!(r.at_end());
    }

    #[test]
    fn test_big_endian_layout() {
        let mut w = DataWriter::new();
        w.write_u32(0x01020304);
        assert_eq!(w.as_bytes(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_eof_is_reported() {
        let mut r = DataReader::new(&[0x81]);
        assert_eq!(r.read_vlq_u(), Err(DataError::UnexpectedEof("vlq")));

        let mut r = DataReader::new(&[5, b'a']);
        assert!(r.read_string().is_err());
    }

    #[test]
    fn test_vlq_size() {
        assert_eq!(vlq_u_size(0), 1);
        assert_eq!(vlq_u_size(127), 1);
        assert_eq!(vlq_u_size(128), 2);
        assert_eq!(vlq_u_size(u64::MAX), 10);
    }
}
