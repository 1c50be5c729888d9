//! RGBA images with a bottom-left origin

use std::fmt;
use std::io::Cursor;

use image::{imageops, ImageFormat, Rgba, RgbaImage};
use star_core::Color;
use star_math::RectI;

use crate::error::{AssetError, AssetResult};

/// An 8-bit RGBA image.
///
/// Coordinates used by the accessors have their origin at the bottom-left
/// pixel, matching world space. Frame rectangles in `.frames` files are
/// top-down and go through [`Image::frame`].
#[derive(Clone, PartialEq)]
pub struct Image {
    pixels: RgbaImage,
}

impl Image {
    /// A fully transparent image
    pub fn new(width: u32, height: u32) -> Self {
        Self::filled(width, height, Color::CLEAR)
    }

    pub fn filled(width: u32, height: u32, color: Color) -> Self {
        Self {
            pixels: RgbaImage::from_pixel(width, height, Rgba(color.to_array())),
        }
    }

    pub fn from_rgba(pixels: RgbaImage) -> Self {
        Self { pixels }
    }

    /// Decode PNG bytes
    pub fn decode_png(bytes: &[u8]) -> AssetResult<Self> {
        let decoded = image::load_from_memory_with_format(bytes, ImageFormat::Png)?;
        Ok(Self::from_rgba(decoded.to_rgba8()))
    }

    pub fn encode_png(&self) -> AssetResult<Vec<u8>> {
        let mut out = Cursor::new(Vec::new());
        self.pixels.write_to(&mut out, ImageFormat::Png)?;
        Ok(out.into_inner())
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    #[inline]
    pub fn size(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Raw pixel storage, rows top-down
    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn into_rgba(self) -> RgbaImage {
        self.pixels
    }

    /// Size of the pixel data in bytes
    pub fn byte_size(&self) -> usize {
        self.pixels.as_raw().len()
    }

    #[inline]
    fn row(&self, y: u32) -> u32 {
        self.height() - 1 - y
    }

    /// Pixel at `(x, y)`, bottom-left origin. Panics when out of bounds.
    pub fn get(&self, x: u32, y: u32) -> Color {
        Color::from_array(self.pixels.get_pixel(x, self.row(y)).0)
    }

    pub fn get_checked(&self, x: i64, y: i64) -> Option<Color> {
        if x < 0 || y < 0 || x >= self.width() as i64 || y >= self.height() as i64 {
            return None;
        }
        Some(self.get(x as u32, y as u32))
    }

    pub fn set(&mut self, x: u32, y: u32, color: Color) {
        let row = self.row(y);
        self.pixels.put_pixel(x, row, Rgba(color.to_array()));
    }

    /// Replace every pixel with `f(x, y, pixel)`, bottom-left origin
    pub fn map_pixels(&mut self, mut f: impl FnMut(u32, u32, Color) -> Color) {
        let height = self.height();
        for (x, row, pixel) in self.pixels.enumerate_pixels_mut() {
            let y = height - 1 - row;
            pixel.0 = f(x, y, Color::from_array(pixel.0)).to_array();
        }
    }

    /// Copy of the region starting at `(x, y)` with the given size, bottom-left
    /// origin, clamped to the image bounds
    pub fn sub_image(&self, x: u32, y: u32, width: u32, height: u32) -> Image {
        let x = x.min(self.width());
        let y = y.min(self.height());
        let width = width.min(self.width() - x);
        let height = height.min(self.height() - y);
        let top = self.height() - y - height;
        Image::from_rgba(imageops::crop_imm(&self.pixels, x, top, width, height).to_image())
    }

    /// Cut out a frame given as a top-down `[x0, y0, x1, y1)` rectangle
    pub fn frame(&self, rect: RectI) -> AssetResult<Image> {
        let bounds = RectI::from_coords(0, 0, self.width() as i32, self.height() as i32);
        if !bounds.contains_rect(&rect) || rect.is_empty() {
            return Err(AssetError::Image(format!(
                "frame {:?} outside image of size {}x{}",
                rect.to_array(),
                self.width(),
                self.height()
            )));
        }
        // Flip into bottom-left coordinates
        let y = self.height() as i32 - rect.max.y;
        Ok(self.sub_image(rect.min.x as u32, y as u32, rect.width() as u32, rect.height() as u32))
    }

    /// Draw `other` with its bottom-left corner at `(x, y)`, overwriting
    /// pixels and clipping at the edges
    pub fn copy_into(&mut self, x: i64, y: i64, other: &Image) {
        for oy in 0..other.height() {
            for ox in 0..other.width() {
                let tx = x + ox as i64;
                let ty = y + oy as i64;
                if tx >= 0 && ty >= 0 && tx < self.width() as i64 && ty < self.height() as i64 {
                    self.set(tx as u32, ty as u32, other.get(ox, oy));
                }
            }
        }
    }

    pub fn flip_horizontal(&mut self) {
        imageops::flip_horizontal_in_place(&mut self.pixels);
    }

    pub fn flip_vertical(&mut self) {
        imageops::flip_vertical_in_place(&mut self.pixels);
    }

    /// Resize to an exact size with the given filter
    pub fn resized(&self, width: u32, height: u32, filter: imageops::FilterType) -> Image {
        Image::from_rgba(imageops::resize(&self.pixels, width.max(1), height.max(1), filter))
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bottom_left_origin() {
        let mut img = Image::new(2, 3);
        img.set(0, 0, Color::RED);
        // Bottom-left pixel is the first pixel of the last stored row
        assert_eq!(img.pixels().get_pixel(0, 2).0, [255, 0, 0, 255]);
        assert_eq!(img.get(0, 0), Color::RED);
        assert_eq!(img.get(1, 2), Color::CLEAR);
    }

    #[test]
    fn test_frame_is_flipped() {
        let mut img = Image::new(4, 4);
        // Top-left pixel in file order
        img.set(0, 3, Color::BLUE);
        let frame = img.frame(RectI::from_coords(0, 0, 2, 2)).unwrap();
        assert_eq!(frame.size(), (2, 2));
        assert_eq!(frame.get(0, 1), Color::BLUE);
        assert!(img.frame(RectI::from_coords(2, 2, 5, 4)).is_err());
    }

    #[test]
    fn test_png_roundtrip() {
        let mut img = Image::filled(3, 2, Color::WHITE);
        img.set(2, 1, Color::rgba(1, 2, 3, 4));
        let decoded = Image::decode_png(&img.encode_png().unwrap()).unwrap();
        assert_eq!(decoded, img);
    }

    #[test]
    fn test_copy_into_clips() {
        let mut dst = Image::new(3, 3);
        dst.copy_into(2, 2, &Image::filled(2, 2, Color::RED));
        assert_eq!(dst.get(2, 2), Color::RED);
        assert_eq!(dst.get(1, 1), Color::CLEAR);
    }
}
