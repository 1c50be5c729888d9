//! RGBA colour with hex parsing and HSV conversion

use core::fmt;

/// 8-bit RGBA colour
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const CLEAR: Self = Self::rgba(0, 0, 0, 0);
    pub const BLACK: Self = Self::rgba(0, 0, 0, 255);
    pub const WHITE: Self = Self::rgba(255, 255, 255, 255);
    pub const RED: Self = Self::rgba(255, 0, 0, 255);
    pub const BLUE: Self = Self::rgba(0, 0, 255, 255);

    #[inline]
    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    #[inline]
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self::rgba(r, g, b, 255)
    }

    #[inline]
    pub fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    #[inline]
    pub fn from_array(c: [u8; 4]) -> Self {
        Self::rgba(c[0], c[1], c[2], c[3])
    }

    /// Parse `rgb`, `rgba`, `rrggbb` or `rrggbbaa`, with an optional leading `#`
    pub fn from_hex(s: &str) -> Option<Self> {
        let s = s.strip_prefix('#').unwrap_or(s);
        let nibble = |c: u8| -> Option<u8> { (c as char).to_digit(16).map(|d| d as u8) };
        let bytes = s.as_bytes();
        match bytes.len() {
            3 | 4 => {
                let mut out = [255u8; 4];
                for (i, &c) in bytes.iter().enumerate() {
                    let n = nibble(c)?;
                    out[i] = n << 4 | n;
                }
                Some(Self::from_array(out))
            }
            6 | 8 => {
                let mut out = [255u8; 4];
                for i in 0..bytes.len() / 2 {
                    out[i] = nibble(bytes[i * 2])? << 4 | nibble(bytes[i * 2 + 1])?;
                }
                Some(Self::from_array(out))
            }
            _ => None,
        }
    }

    /// Lowercase `rrggbbaa`
    pub fn to_hex(self) -> String {
        format!("{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
    }

    /// Hue in degrees [0, 360), saturation and value in [0, 1]
    pub fn to_hsv(self) -> (f32, f32, f32) {
        let r = self.r as f32 / 255.0;
        let g = self.g as f32 / 255.0;
        let b = self.b as f32 / 255.0;
        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let delta = max - min;

        let hue = if delta == 0.0 {
            0.0
        } else if max == r {
            60.0 * (((g - b) / delta).rem_euclid(6.0))
        } else if max == g {
            60.0 * ((b - r) / delta + 2.0)
        } else {
            60.0 * ((r - g) / delta + 4.0)
        };
        let saturation = if max == 0.0 { 0.0 } else { delta / max };
        (hue, saturation, max)
    }

    /// Build from HSV, keeping the given alpha
    pub fn from_hsv(hue: f32, saturation: f32, value: f32, alpha: u8) -> Self {
        let h = hue.rem_euclid(360.0) / 60.0;
        let c = value * saturation;
        let x = c * (1.0 - (h % 2.0 - 1.0).abs());
        let m = value - c;
        let (r, g, b) = match h as u32 {
            0 => (c, x, 0.0),
            1 => (x, c, 0.0),
            2 => (0.0, c, x),
            3 => (0.0, x, c),
            4 => (x, 0.0, c),
            _ => (c, 0.0, x),
        };
        let to_byte = |v: f32| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8;
        Self::rgba(to_byte(r), to_byte(g), to_byte(b), alpha)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_forms() {
        assert_eq!(Color::from_hex("ff0000"), Some(Color::RED));
        assert_eq!(Color::from_hex("#0000ff80"), Some(Color::rgba(0, 0, 255, 0x80)));
        assert_eq!(Color::from_hex("f00"), Some(Color::RED));
        assert_eq!(Color::from_hex("zz0000"), None);
        assert_eq!(Color::from_hex("12345"), None);
    }

    #[test]
    fn test_hsv_round_trip_primary() {
        let (h, s, v) = Color::rgb(0, 255, 0).to_hsv();
        assert!((h - 120.0).abs() < 0.01);
        assert_eq!(Color::from_hsv(h, s, v, 255), Color::rgb(0, 255, 0));
    }
}
