//! Image operations named by directives

use image::imageops::FilterType;
use star_core::Color;
use star_math::{RectI, Vec2F, Vec2I};

use crate::error::{AssetError, AssetResult};
use crate::image::Image;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskMode {
    Additive,
    Subtractive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    Multiply,
    Screen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleMode {
    Nearest,
    Bilinear,
    Bicubic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlipMode {
    Horizontal,
    Vertical,
    Both,
}

/// One parsed directive
#[derive(Debug, Clone, PartialEq)]
pub enum ImageOperation {
    /// Rotate hue by degrees
    HueShift(f32),
    /// Add to saturation, in percent
    Saturation(f32),
    /// Scale value, in percent
    Brightness(f32),
    Fade { color: Color, amount: f32 },
    ColorReplace(Vec<(Color, Color)>),
    SetColor(Color),
    Multiply(Color),
    AlphaMask {
        mode: MaskMode,
        images: Vec<String>,
        offset: Vec2I,
    },
    Blend {
        mode: BlendMode,
        images: Vec<String>,
        offset: Vec2I,
    },
    Border {
        pixels: u32,
        start: Color,
        end: Color,
        outline_only: bool,
    },
    Scale { mode: ScaleMode, scale: Vec2F },
    /// Bottom-left origin, max exclusive
    Crop(RectI),
    Flip(FlipMode),
}

struct Args<'a> {
    name: &'a str,
    items: Vec<&'a str>,
}

impl<'a> Args<'a> {
    fn get(&self, i: usize) -> Result<&'a str, String> {
        self.items
            .get(i)
            .copied()
            .ok_or_else(|| format!("'{}' is missing argument {}", self.name, i + 1))
    }

    fn float(&self, i: usize) -> Result<f32, String> {
        let s = self.get(i)?;
        s.trim()
            .parse()
            .map_err(|_| format!("'{}' argument '{}' is not a number", self.name, s))
    }

    fn float_or(&self, i: usize, default: f32) -> Result<f32, String> {
        if i < self.items.len() {
            self.float(i)
        } else {
            Ok(default)
        }
    }

    fn int_or(&self, i: usize, default: i32) -> Result<i32, String> {
        Ok(self.float_or(i, default as f32)? as i32)
    }

    fn color(&self, i: usize) -> Result<Color, String> {
        let s = self.get(i)?;
        Color::from_hex(s).ok_or_else(|| format!("'{}' argument '{}' is not a colour", self.name, s))
    }

    fn images(&self, i: usize) -> Result<Vec<String>, String> {
        Ok(self.get(i)?.split('+').map(str::to_string).collect())
    }
}

impl ImageOperation {
    /// Parse one `?`-delimited token, without the `?`
    pub fn parse(token: &str) -> Result<Self, String> {
        let (name, rest) = match token.find('=') {
            Some(i) => (&token[..i], &token[i + 1..]),
            None => (token, ""),
        };
        let lower = name.to_ascii_lowercase();
        let items: Vec<&str> = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split(|c: char| c == ';' || c == '=').collect()
        };
        let args = Args { name, items };

        let op = match lower.as_str() {
            "hueshift" => ImageOperation::HueShift(args.float(0)?),
            "saturation" => ImageOperation::Saturation(args.float(0)?),
            "brightness" => ImageOperation::Brightness(args.float(0)?),
            "fade" => ImageOperation::Fade {
                color: args.color(0)?,
                amount: args.float(1)?.clamp(0.0, 1.0),
            },
            "replace" => {
                if args.items.len() % 2 != 0 {
                    return Err("'replace' needs colour pairs".to_string());
                }
                let pairs = (0..args.items.len() / 2)
                    .map(|i| Ok((args.color(i * 2)?, args.color(i * 2 + 1)?)))
                    .collect::<Result<Vec<_>, String>>()?;
                ImageOperation::ColorReplace(pairs)
            }
            "setcolor" => ImageOperation::SetColor(args.color(0)?),
            "multiply" => ImageOperation::Multiply(args.color(0)?),
            "addmask" | "submask" => ImageOperation::AlphaMask {
                mode: if lower == "addmask" {
                    MaskMode::Additive
                } else {
                    MaskMode::Subtractive
                },
                images: args.images(0)?,
                offset: Vec2I::new(args.int_or(1, 0)?, args.int_or(2, 0)?),
            },
            "blend" => {
                let mode = match args.get(0)?.to_ascii_lowercase().as_str() {
                    "multiply" | "mult" => BlendMode::Multiply,
                    "screen" => BlendMode::Screen,
                    other => return Err(format!("unknown blend mode '{}'", other)),
                };
                ImageOperation::Blend {
                    mode,
                    images: args.images(1)?,
                    offset: Vec2I::new(args.int_or(2, 0)?, args.int_or(3, 0)?),
                }
            }
            "blendmult" | "blendscreen" => ImageOperation::Blend {
                mode: if lower == "blendmult" {
                    BlendMode::Multiply
                } else {
                    BlendMode::Screen
                },
                images: args.images(0)?,
                offset: Vec2I::new(args.int_or(1, 0)?, args.int_or(2, 0)?),
            },
            "border" | "outline" => {
                let start = args.color(1)?;
                let end = if args.items.len() > 2 { args.color(2)? } else { start };
                ImageOperation::Border {
                    pixels: args.float(0)?.max(0.0) as u32,
                    start,
                    end,
                    outline_only: lower == "outline",
                }
            }
            "scale" | "scalenearest" | "scalelinear" | "scalebilinear" | "scalebicubic" => {
                let mode = match lower.as_str() {
                    "scalenearest" => ScaleMode::Nearest,
                    "scalebicubic" => ScaleMode::Bicubic,
                    _ => ScaleMode::Bilinear,
                };
                let x = args.float(0)?;
                let y = args.float_or(1, x)?;
                if x <= 0.0 || y <= 0.0 {
                    return Err("scale factors must be positive".to_string());
                }
                ImageOperation::Scale {
                    mode,
                    scale: Vec2F::new(x, y),
                }
            }
            "crop" => ImageOperation::Crop(RectI::from_coords(
                args.float(0)? as i32,
                args.float(1)? as i32,
                args.float(2)? as i32,
                args.float(3)? as i32,
            )),
            "flipx" => ImageOperation::Flip(FlipMode::Horizontal),
            "flipy" => ImageOperation::Flip(FlipMode::Vertical),
            "flipxy" => ImageOperation::Flip(FlipMode::Both),
            _ => return Err(format!("unknown image operation '{}'", name)),
        };
        Ok(op)
    }

    /// Other images this operation reads
    pub fn references(&self) -> &[String] {
        match self {
            ImageOperation::AlphaMask { images, .. } | ImageOperation::Blend { images, .. } => images,
            _ => &[],
        }
    }

    /// Apply to `image`. `lookup` resolves referenced image names; a missing
    /// reference is an error.
    pub fn apply(&self, image: &mut Image, lookup: &dyn Fn(&str) -> Option<Image>) -> AssetResult<()> {
        match self {
            ImageOperation::HueShift(degrees) => image.map_pixels(|_, _, c| {
                if c.a == 0 {
                    return c;
                }
                let (h, s, v) = c.to_hsv();
                Color::from_hsv(h + degrees, s, v, c.a)
            }),
            ImageOperation::Saturation(amount) => image.map_pixels(|_, _, c| {
                if c.a == 0 {
                    return c;
                }
                let (h, s, v) = c.to_hsv();
                Color::from_hsv(h, (s + amount / 100.0).clamp(0.0, 1.0), v, c.a)
            }),
            ImageOperation::Brightness(amount) => image.map_pixels(|_, _, c| {
                if c.a == 0 {
                    return c;
                }
                let (h, s, v) = c.to_hsv();
                Color::from_hsv(h, s, (v * (1.0 + amount / 100.0)).clamp(0.0, 1.0), c.a)
            }),
            ImageOperation::Fade { color, amount } => image.map_pixels(|_, _, c| {
                let mix = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * amount).round() as u8;
                Color::rgba(mix(c.r, color.r), mix(c.g, color.g), mix(c.b, color.b), c.a)
            }),
            ImageOperation::ColorReplace(pairs) => image.map_pixels(|_, _, c| {
                pairs
                    .iter()
                    .find(|(from, _)| *from == c)
                    .map(|(_, to)| *to)
                    .unwrap_or(c)
            }),
            ImageOperation::SetColor(color) => {
                image.map_pixels(|_, _, c| Color::rgba(color.r, color.g, color.b, c.a))
            }
            ImageOperation::Multiply(color) => image.map_pixels(|_, _, c| multiply(c, *color)),
            ImageOperation::AlphaMask {
                mode,
                images,
                offset,
            } => {
                let masks = resolve(images, lookup)?;
                image.map_pixels(|x, y, c| {
                    let mask_alpha = masks
                        .iter()
                        .filter_map(|m| m.get_checked(x as i64 + offset.x as i64, y as i64 + offset.y as i64))
                        .map(|p| p.a)
                        .max()
                        .unwrap_or(0);
                    let limit = match mode {
                        MaskMode::Additive => mask_alpha,
                        MaskMode::Subtractive => 255 - mask_alpha,
                    };
                    Color::rgba(c.r, c.g, c.b, c.a.min(limit))
                });
            }
            ImageOperation::Blend {
                mode,
                images,
                offset,
            } => {
                let layers = resolve(images, lookup)?;
                image.map_pixels(|x, y, mut c| {
                    for layer in &layers {
                        if let Some(p) = layer.get_checked(x as i64 + offset.x as i64, y as i64 + offset.y as i64) {
                            c = match mode {
                                BlendMode::Multiply => multiply(c, p),
                                BlendMode::Screen => screen(c, p),
                            };
                        }
                    }
                    c
                });
            }
            ImageOperation::Border {
                pixels,
                start,
                end,
                outline_only,
            } => *image = border(image, *pixels, *start, *end, *outline_only),
            ImageOperation::Scale { mode, scale } => {
                let filter = match mode {
                    ScaleMode::Nearest => FilterType::Nearest,
                    ScaleMode::Bilinear => FilterType::Triangle,
                    ScaleMode::Bicubic => FilterType::CatmullRom,
                };
                let width = (image.width() as f32 * scale.x).round() as u32;
                let height = (image.height() as f32 * scale.y).round() as u32;
                *image = image.resized(width, height, filter);
            }
            ImageOperation::Crop(rect) => {
                if rect.is_empty() || rect.min.x < 0 || rect.min.y < 0 {
                    return Err(AssetError::Directives(format!("bad crop {:?}", rect.to_array())));
                }
                *image = image.sub_image(
                    rect.min.x as u32,
                    rect.min.y as u32,
                    rect.width() as u32,
                    rect.height() as u32,
                );
            }
            ImageOperation::Flip(mode) => match mode {
                FlipMode::Horizontal => image.flip_horizontal(),
                FlipMode::Vertical => image.flip_vertical(),
                FlipMode::Both => {
                    image.flip_horizontal();
                    image.flip_vertical();
                }
            },
        }
        Ok(())
    }
}

fn resolve(names: &[String], lookup: &dyn Fn(&str) -> Option<Image>) -> AssetResult<Vec<Image>> {
    names
        .iter()
        .map(|n| lookup(n).ok_or_else(|| AssetError::Directives(format!("missing reference image '{}'", n))))
        .collect()
}

#[inline]
fn multiply(a: Color, b: Color) -> Color {
    let m = |x: u8, y: u8| ((x as u16 * y as u16 + 127) / 255) as u8;
    Color::rgba(m(a.r, b.r), m(a.g, b.g), m(a.b, b.b), m(a.a, b.a))
}

#[inline]
fn screen(a: Color, b: Color) -> Color {
    let s = |x: u8, y: u8| 255 - (((255 - x) as u16 * (255 - y) as u16 + 127) / 255) as u8;
    Color::rgba(s(a.r, b.r), s(a.g, b.g), s(a.b, b.b), a.a)
}

fn border(image: &Image, pixels: u32, start: Color, end: Color, outline_only: bool) -> Image {
    let (w, h) = image.size();
    let mut out = Image::new(w + pixels * 2, h + pixels * 2);
    out.copy_into(pixels as i64, pixels as i64, image);
    if pixels == 0 {
        return out;
    }

    let opaque = |x: i64, y: i64| image.get_checked(x, y).is_some_and(|c| c.a > 0);
    let p = pixels as i64;
    let (ow, oh) = out.size();
    let mut result = out.clone();
    for y in 0..oh {
        for x in 0..ow {
            let (sx, sy) = (x as i64 - p, y as i64 - p);
            if opaque(sx, sy) {
                if outline_only {
                    result.set(x, y, Color::CLEAR);
                }
                continue;
            }
            let nearest = (1..=p).find(|d| {
                (-d..=*d).any(|dy| (-d..=*d).any(|dx| opaque(sx + dx, sy + dy)))
            });
            if let Some(d) = nearest {
                let t = if p > 1 { (d - 1) as f32 / (p - 1) as f32 } else { 0.0 };
                let mix = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * t).round() as u8;
                result.set(x, y, Color::rgba(mix(start.r, end.r), mix(start.g, end.g), mix(start.b, end.b), mix(start.a, end.a)));
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_refs(_: &str) -> Option<Image> {
        None
    }

    #[test]
    fn test_parse_separators() {
        assert_eq!(
            ImageOperation::parse("replace=ff0000=00ff00;0000ff=ffffff").unwrap(),
            ImageOperation::ColorReplace(vec![
                (Color::RED, Color::rgb(0, 255, 0)),
                (Color::BLUE, Color::WHITE),
            ])
        );
        assert_eq!(
            ImageOperation::parse("blend=Multiply=/b.png;0;0").unwrap(),
            ImageOperation::Blend {
                mode: BlendMode::Multiply,
                images: vec!["/b.png".to_string()],
                offset: Vec2I::ZERO,
            }
        );
        assert!(ImageOperation::parse("explode=1").is_err());
        assert!(ImageOperation::parse("hueshift=abc").is_err());
    }

    #[test]
    fn test_crop_and_flip() {
        let mut img = Image::new(8, 8);
        img.set(3, 0, Color::RED);
        ImageOperation::parse("crop=0;0;4;4").unwrap().apply(&mut img, &no_refs).unwrap();
        assert_eq!(img.size(), (4, 4));
        ImageOperation::parse("flipx").unwrap().apply(&mut img, &no_refs).unwrap();
        assert_eq!(img.get(0, 0), Color::RED);
    }

    #[test]
    fn test_blend_uses_lookup() {
        let mut img = Image::filled(2, 2, Color::WHITE);
        let op = ImageOperation::parse("blend=multiply=/half.png;0;0").unwrap();
        let lookup = |name: &str| (name == "/half.png").then(|| Image::filled(1, 1, Color::rgba(128, 128, 128, 255)));
        op.apply(&mut img, &lookup).unwrap();
        assert_eq!(img.get(0, 0), Color::rgba(128, 128, 128, 255));
        assert_eq!(img.get(1, 1), Color::WHITE);
        assert!(op.apply(&mut img, &no_refs).is_err());
    }

    #[test]
    fn test_scale_and_border() {
        let mut img = Image::filled(2, 2, Color::RED);
        ImageOperation::parse("scalenearest=2").unwrap().apply(&mut img, &no_refs).unwrap();
        assert_eq!(img.size(), (4, 4));
        ImageOperation::parse("border=1;000000ff").unwrap().apply(&mut img, &no_refs).unwrap();
        assert_eq!(img.size(), (6, 6));
        assert_eq!(img.get(0, 0), Color::BLACK);
        assert_eq!(img.get(1, 1), Color::RED);
    }

    #[test]
    fn test_hueshift_keeps_alpha() {
        let mut img = Image::filled(1, 1, Color::rgba(255, 0, 0, 100));
        ImageOperation::parse("hueshift=120").unwrap().apply(&mut img, &no_refs).unwrap();
        assert_eq!(img.get(0, 0), Color::rgba(0, 255, 0, 100));
    }
}
