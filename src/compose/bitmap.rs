//! RGBA bitmaps and the drawing primitives composition needs

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque black, the canvas background
pub const BACKGROUND: [u8; 4] = [0, 0, 0, 255];

/// Axis-aligned rectangle in canvas pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x
            && y >= self.y
            && (x as i64) < self.x as i64 + self.width as i64
            && (y as i64) < self.y as i64 + self.height as i64
    }

    /// Grow the rectangle by `by` pixels on every side
    pub fn inflate(&self, by: u32) -> Self {
        Self {
            x: self.x - by as i32,
            y: self.y - by as i32,
            width: self.width + by * 2,
            height: self.height + by * 2,
        }
    }
}

/// Clockwise rotation applied to sensor frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    #[serde(rename = "0")]
    None,
    #[serde(rename = "90")]
    Cw90,
    #[serde(rename = "180")]
    Cw180,
    #[serde(rename = "270")]
    Cw270,
}

impl Rotation {
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        match degrees.rem_euclid(360) {
            0 => Some(Rotation::None),
            90 => Some(Rotation::Cw90),
            180 => Some(Rotation::Cw180),
            270 => Some(Rotation::Cw270),
            _ => None,
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Rotation::None => 0,
            Rotation::Cw90 => 90,
            Rotation::Cw180 => 180,
            Rotation::Cw270 => 270,
        }
    }
}

/// Tightly packed 8-bit RGBA image
#[derive(Clone, PartialEq, Eq)]
pub struct Bitmap {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bitmap({}x{})", self.width, self.height)
    }
}

impl Bitmap {
    /// A bitmap filled with the background colour
    pub fn new(width: u32, height: u32) -> Self {
        Self::filled(width, height, BACKGROUND)
    }

    pub fn filled(width: u32, height: u32, color: [u8; 4]) -> Self {
        let len = width as usize * height as usize;
        let mut pixels = Vec::with_capacity(len * 4);
        for _ in 0..len {
            pixels.extend_from_slice(&color);
        }
        Self { width, height, pixels }
    }

    /// Wrap existing RGBA data; `None` if the length does not match
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        if pixels.len() != width as usize * height as usize * 4 {
            return None;
        }
        Some(Self { width, height, pixels })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 4
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = self.offset(x, y);
        [self.pixels[i], self.pixels[i + 1], self.pixels[i + 2], self.pixels[i + 3]]
    }

    pub fn put_pixel(&mut self, x: u32, y: u32, color: [u8; 4]) {
        let i = self.offset(x, y);
        self.pixels[i..i + 4].copy_from_slice(&color);
    }

    pub fn fill(&mut self, color: [u8; 4]) {
        for px in self.pixels.chunks_exact_mut(4) {
            px.copy_from_slice(&color);
        }
    }

    /// Clip a rectangle to the canvas, returning (x0, y0, x1, y1)
    fn clip(&self, rect: Rect) -> Option<(u32, u32, u32, u32)> {
        let x0 = rect.x.max(0) as i64;
        let y0 = rect.y.max(0) as i64;
        let x1 = (rect.x as i64 + rect.width as i64).min(self.width as i64);
        let y1 = (rect.y as i64 + rect.height as i64).min(self.height as i64);
        if x0 >= x1 || y0 >= y1 {
            return None;
        }
        Some((x0 as u32, y0 as u32, x1 as u32, y1 as u32))
    }

    pub fn fill_rect(&mut self, rect: Rect, color: [u8; 4]) {
        let Some((x0, y0, x1, y1)) = self.clip(rect) else {
            return;
        };
        for y in y0..y1 {
            let start = self.offset(x0, y);
            let end = self.offset(x1 - 1, y) + 4;
            for px in self.pixels[start..end].chunks_exact_mut(4) {
                px.copy_from_slice(&color);
            }
        }
    }

    /// Outline `rect` with a border of `thickness` pixels drawn inside it
    pub fn stroke_rect(&mut self, rect: Rect, thickness: u32, color: [u8; 4]) {
        let t = thickness.min(rect.width).min(rect.height);
        if t == 0 {
            return;
        }
        self.fill_rect(Rect::new(rect.x, rect.y, rect.width, t), color);
        self.fill_rect(
            Rect::new(rect.x, rect.y + (rect.height - t) as i32, rect.width, t),
            color,
        );
        self.fill_rect(Rect::new(rect.x, rect.y, t, rect.height), color);
        self.fill_rect(
            Rect::new(rect.x + (rect.width - t) as i32, rect.y, t, rect.height),
            color,
        );
    }

    /// Draw `src` stretched into `dest` with nearest-neighbour sampling
    pub fn draw_scaled(&mut self, src: &Bitmap, dest: Rect) {
        if src.width == 0 || src.height == 0 || dest.width == 0 || dest.height == 0 {
            return;
        }
        let Some((x0, y0, x1, y1)) = self.clip(dest) else {
            return;
        };

        // Precompute the source column for every destination column
        let columns: Vec<usize> = (x0..x1)
            .map(|x| {
                let dx = (x as i64 - dest.x as i64) as u64;
                let sx = (dx * src.width as u64 / dest.width as u64).min(src.width as u64 - 1);
                sx as usize * 4
            })
            .collect();

        for y in y0..y1 {
            let dy = (y as i64 - dest.y as i64) as u64;
            let sy = (dy * src.height as u64 / dest.height as u64).min(src.height as u64 - 1);
            let src_row = sy as usize * src.width as usize * 4;
            let dst_row = self.offset(x0, y);
            for (i, sx) in columns.iter().enumerate() {
                let s = src_row + sx;
                let d = dst_row + i * 4;
                self.pixels[d..d + 4].copy_from_slice(&src.pixels[s..s + 4]);
            }
        }
    }

    /// A copy rotated clockwise
    pub fn rotated(&self, rotation: Rotation) -> Bitmap {
        let (w, h) = (self.width, self.height);
        match rotation {
            Rotation::None => self.clone(),
            Rotation::Cw180 => {
                let mut out = Vec::with_capacity(self.pixels.len());
                for px in self.pixels.chunks_exact(4).rev() {
                    out.extend_from_slice(px);
                }
                Bitmap { width: w, height: h, pixels: out }
            }
            Rotation::Cw90 | Rotation::Cw270 => {
                let mut out = Bitmap::filled(h, w, BACKGROUND);
                for y in 0..h {
                    for x in 0..w {
                        let (nx, ny) = if rotation == Rotation::Cw90 {
                            (h - 1 - y, x)
                        } else {
                            (y, w - 1 - x)
                        };
                        out.put_pixel(nx, ny, self.pixel(x, y));
                    }
                }
                out
            }
        }
    }

    /// A copy flipped around the vertical axis
    pub fn mirrored(&self) -> Bitmap {
        let row_len = self.width as usize * 4;
        let mut out = Vec::with_capacity(self.pixels.len());
        if row_len > 0 {
            for row in self.pixels.chunks_exact(row_len) {
                for px in row.chunks_exact(4).rev() {
                    out.extend_from_slice(px);
                }
            }
        }
        Bitmap {
            width: self.width,
            height: self.height,
            pixels: out,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: [u8; 4] = [255, 0, 0, 255];
    const GREEN: [u8; 4] = [0, 255, 0, 255];

    fn two_column() -> Bitmap {
        // 2x1: red then green
        Bitmap::from_rgba(2, 1, [RED, GREEN].concat()).unwrap()
    }

    #[test]
    fn test_from_rgba_checks_length() {
        assert!(Bitmap::from_rgba(2, 2, vec![0; 15]).is_none());
        assert!(Bitmap::from_rgba(2, 2, vec![0; 16]).is_some());
    }

    #[test]
    fn test_rotate_90_swaps_dimensions() {
        let rotated = two_column().rotated(Rotation::Cw90);
        assert_eq!((rotated.width(), rotated.height()), (1, 2));
        // Clockwise: left column ends up on top
        assert_eq!(rotated.pixel(0, 0), RED);
        assert_eq!(rotated.pixel(0, 1), GREEN);

        let back = rotated.rotated(Rotation::Cw270);
        assert_eq!(back, two_column());
    }

    #[test]
    fn test_rotate_180_and_mirror() {
        let bmp = two_column();
        assert_eq!(bmp.rotated(Rotation::Cw180).pixel(0, 0), GREEN);
        assert_eq!(bmp.mirrored().pixel(0, 0), GREEN);
        assert_eq!(bmp.mirrored().mirrored(), bmp);
    }

    #[test]
    fn test_draw_scaled_fills_destination_only() {
        let mut canvas = Bitmap::new(8, 8);
        let src = Bitmap::filled(2, 2, RED);
        canvas.draw_scaled(&src, Rect::new(2, 2, 4, 4));

        assert_eq!(canvas.pixel(2, 2), RED);
        assert_eq!(canvas.pixel(5, 5), RED);
        assert_eq!(canvas.pixel(1, 1), BACKGROUND);
        assert_eq!(canvas.pixel(6, 6), BACKGROUND);
    }

    #[test]
    fn test_draw_scaled_clips_offscreen() {
        let mut canvas = Bitmap::new(4, 4);
        let src = two_column();
        canvas.draw_scaled(&src, Rect::new(-2, -2, 4, 4));
        // Visible part is the right half of the source
        assert_eq!(canvas.pixel(0, 0), GREEN);
        assert_eq!(canvas.pixel(2, 2), BACKGROUND);
    }

    #[test]
    fn test_stroke_rect_leaves_interior() {
        let mut canvas = Bitmap::new(6, 6);
        canvas.stroke_rect(Rect::new(0, 0, 6, 6), 1, GREEN);
        assert_eq!(canvas.pixel(0, 3), GREEN);
        assert_eq!(canvas.pixel(5, 5), GREEN);
        assert_eq!(canvas.pixel(3, 3), BACKGROUND);
    }

    #[test]
    fn test_rotation_from_degrees() {
        assert_eq!(Rotation::from_degrees(-90), Some(Rotation::Cw270));
        assert_eq!(Rotation::from_degrees(450), Some(Rotation::Cw90));
        assert_eq!(Rotation::from_degrees(45), None);
    }
}
