//! Wire encoding for replicated values

use star_core::{Color, DataReader, DataWriter, Json};
use star_math::{RectF, Vec2F, Vec2I};

use crate::error::{NetError, NetResult};

/// A value that can be stored in a [`crate::NetElementData`]
pub trait NetValue: Clone + PartialEq {
    fn write_value(&self, out: &mut DataWriter);
    fn read_value(input: &mut DataReader<'_>) -> NetResult<Self>;
}

impl NetValue for bool {
    fn write_value(&self, out: &mut DataWriter) {
        out.write_bool(*self);
    }
    fn read_value(input: &mut DataReader<'_>) -> NetResult<Self> {
        Ok(input.read_bool()?)
    }
}

impl NetValue for u8 {
    fn write_value(&self, out: &mut DataWriter) {
        out.write_u8(*self);
    }
    fn read_value(input: &mut DataReader<'_>) -> NetResult<Self> {
        Ok(input.read_u8()?)
    }
}

impl NetValue for i32 {
    fn write_value(&self, out: &mut DataWriter) {
        out.write_vlq_i(*self as i64);
    }
    fn read_value(input: &mut DataReader<'_>) -> NetResult<Self> {
        let v = input.read_vlq_i()?;
        i32::try_from(v).map_err(|_| NetError::Malformed(format!("{v} out of range for i32")))
    }
}

impl NetValue for i64 {
    fn write_value(&self, out: &mut DataWriter) {
        out.write_vlq_i(*self);
    }
    fn read_value(input: &mut DataReader<'_>) -> NetResult<Self> {
        Ok(input.read_vlq_i()?)
    }
}

impl NetValue for u32 {
    fn write_value(&self, out: &mut DataWriter) {
        out.write_vlq_u(*self as u64);
    }
    fn read_value(input: &mut DataReader<'_>) -> NetResult<Self> {
        let v = input.read_vlq_u()?;
        u32::try_from(v).map_err(|_| NetError::Malformed(format!("{v} out of range for u32")))
    }
}

impl NetValue for u64 {
    fn write_value(&self, out: &mut DataWriter) {
        out.write_vlq_u(*self);
    }
    fn read_value(input: &mut DataReader<'_>) -> NetResult<Self> {
        Ok(input.read_vlq_u()?)
    }
}

impl NetValue for f32 {
    fn write_value(&self, out: &mut DataWriter) {
        out.write_f32(*self);
    }
    fn read_value(input: &mut DataReader<'_>) -> NetResult<Self> {
        Ok(input.read_f32()?)
    }
}

impl NetValue for f64 {
    fn write_value(&self, out: &mut DataWriter) {
        out.write_f64(*self);
    }
    fn read_value(input: &mut DataReader<'_>) -> NetResult<Self> {
        Ok(input.read_f64()?)
    }
}

impl NetValue for String {
    fn write_value(&self, out: &mut DataWriter) {
        out.write_string(self);
    }
    fn read_value(input: &mut DataReader<'_>) -> NetResult<Self> {
        Ok(input.read_string()?)
    }
}

/// JSON travels as its compact text form
impl NetValue for Json {
    fn write_value(&self, out: &mut DataWriter) {
        out.write_string(&self.to_string());
    }
    fn read_value(input: &mut DataReader<'_>) -> NetResult<Self> {
        let text = input.read_string()?;
        serde_json::from_str(&text).map_err(|e| NetError::Malformed(format!("json: {e}")))
    }
}

impl<T: NetValue> NetValue for Option<T> {
    fn write_value(&self, out: &mut DataWriter) {
        out.write_option(self.as_ref(), |w, v| v.write_value(w));
    }
    fn read_value(input: &mut DataReader<'_>) -> NetResult<Self> {
        if input.read_bool()? {
            Ok(Some(T::read_value(input)?))
        } else {
            Ok(None)
        }
    }
}

impl<T: NetValue> NetValue for Vec<T> {
    fn write_value(&self, out: &mut DataWriter) {
        out.write_vlq_u(self.len() as u64);
        for v in self {
            v.write_value(out);
        }
    }
    fn read_value(input: &mut DataReader<'_>) -> NetResult<Self> {
        let len = input.read_vlq_u()? as usize;
        // Every element takes at least one byte.
        if len > input.remaining() {
            return Err(NetError::Malformed(format!("list length {len} exceeds payload")));
        }
        (0..len).map(|_| T::read_value(input)).collect()
    }
}

impl<A: NetValue, B: NetValue> NetValue for (A, B) {
    fn write_value(&self, out: &mut DataWriter) {
        self.0.write_value(out);
        self.1.write_value(out);
    }
    fn read_value(input: &mut DataReader<'_>) -> NetResult<Self> {
        Ok((A::read_value(input)?, B::read_value(input)?))
    }
}

impl NetValue for Vec2F {
    fn write_value(&self, out: &mut DataWriter) {
        out.write_f32(self.x);
        out.write_f32(self.y);
    }
    fn read_value(input: &mut DataReader<'_>) -> NetResult<Self> {
        Ok(Vec2F::new(input.read_f32()?, input.read_f32()?))
    }
}

impl NetValue for Vec2I {
    fn write_value(&self, out: &mut DataWriter) {
        out.write_vlq_i(self.x as i64);
        out.write_vlq_i(self.y as i64);
    }
    fn read_value(input: &mut DataReader<'_>) -> NetResult<Self> {
        Ok(Vec2I::new(i32::read_value(input)?, i32::read_value(input)?))
    }
}

impl NetValue for RectF {
    fn write_value(&self, out: &mut DataWriter) {
        self.min.write_value(out);
        self.max.write_value(out);
    }
    fn read_value(input: &mut DataReader<'_>) -> NetResult<Self> {
        Ok(RectF::new(Vec2F::read_value(input)?, Vec2F::read_value(input)?))
    }
}

impl NetValue for Color {
    fn write_value(&self, out: &mut DataWriter) {
        out.write_raw(&self.to_array());
    }
    fn read_value(input: &mut DataReader<'_>) -> NetResult<Self> {
        let raw = input.read_raw(4)?;
        Ok(Color::rgba(raw[0], raw[1], raw[2], raw[3]))
    }
}

/// Implement [`NetValue`] for a fieldless `Copy` enum by its discriminant
#[macro_export]
macro_rules! net_enum {
    ($ty:ty { $($variant:ident),+ $(,)? }) => {
        impl $crate::NetValue for $ty {
            fn write_value(&self, out: &mut $crate::DataWriter) {
                out.write_vlq_u(*self as u64);
            }

            fn read_value(input: &mut $crate::DataReader<'_>) -> $crate::NetResult<Self> {
                let value = input.read_vlq_u()?;
                $(
                    if value == <$ty>::$variant as u64 {
                        return Ok(<$ty>::$variant);
                    }
                )+
                Err($crate::NetError::UnknownEnumValue {
                    type_name: stringify!($ty),
                    value,
                })
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Facing {
        Left,
        Right,
    }
    crate::net_enum!(Facing { Left, Right });

    #[test]
    fn test_enum_rejects_unknown() {
        let mut w = DataWriter::new();
        Facing::Right.write_value(&mut w);
        w.write_vlq_u(7);
        let bytes = w.into_bytes();
        let mut r = DataReader::new(&bytes);
        assert_eq!(Facing::read_value(&mut r).unwrap(), Facing::Right);
        assert!(matches!(
            Facing::read_value(&mut r),
            Err(NetError::UnknownEnumValue { value: 7, .. })
        ));
        let _ = Facing::Left;
    }

    #[test]
    fn test_list_length_guard() {
        let mut w = DataWriter::new();
        w.write_vlq_u(1000);
        let bytes = w.into_bytes();
        assert!(Vec::<u8>::read_value(&mut DataReader::new(&bytes)).is_err());
    }
}
