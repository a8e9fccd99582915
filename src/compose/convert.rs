//! Raw sensor frame to RGBA conversion.
//!
//! YUV layouts use full-range BT.601 coefficients:
//! - R = Y + 1.402 * (V - 128)
//! - G = Y - 0.344 * (U - 128) - 0.714 * (V - 128)
//! - B = Y + 1.772 * (U - 128)

use super::bitmap::Bitmap;
use crate::capture::{PixelFormat, RawFrame};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("Frame has zero size")]
    Empty,

    #[error("{format:?} frame {width}x{height} needs {expected} bytes, got {actual}")]
    Truncated {
        format: PixelFormat,
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

#[inline]
fn yuv_to_rgba(y: u8, u: u8, v: u8) -> [u8; 4] {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;

    let r = y + 1.402 * v;
    let g = y - 0.344 * u - 0.714 * v;
    let b = y + 1.772 * u;

    [
        r.round().clamp(0.0, 255.0) as u8,
        g.round().clamp(0.0, 255.0) as u8,
        b.round().clamp(0.0, 255.0) as u8,
        255,
    ]
}

/// Convert a raw frame into an RGBA bitmap.
pub fn to_bitmap(frame: &RawFrame) -> Result<Bitmap, ConvertError> {
    let (width, height) = (frame.width, frame.height);
    if width == 0 || height == 0 {
        return Err(ConvertError::Empty);
    }
    let expected = frame.format.frame_len(width, height);
    if frame.data.len() < expected {
        return Err(ConvertError::Truncated {
            format: frame.format,
            width,
            height,
            expected,
            actual: frame.data.len(),
        });
    }

    let w = width as usize;
    let h = height as usize;
    let data = &frame.data;
    let mut rgba = Vec::with_capacity(w * h * 4);

    match frame.format {
        PixelFormat::Rgba => rgba.extend_from_slice(&data[..w * h * 4]),
        PixelFormat::Rgb24 => {
            for px in data[..w * h * 3].chunks_exact(3) {
                rgba.extend_from_slice(&[px[0], px[1], px[2], 255]);
            }
        }
        PixelFormat::I420 => {
            let chroma_w = w.div_ceil(2);
            let chroma_h = h.div_ceil(2);
            let (y_plane, rest) = data.split_at(w * h);
            let (u_plane, v_plane) = rest.split_at(chroma_w * chroma_h);
            for row in 0..h {
                for col in 0..w {
                    let c = (row / 2) * chroma_w + col / 2;
                    rgba.extend_from_slice(&yuv_to_rgba(y_plane[row * w + col], u_plane[c], v_plane[c]));
                }
            }
        }
        PixelFormat::Nv12 | PixelFormat::Nv21 => {
            let chroma_w = w.div_ceil(2);
            let (y_plane, uv_plane) = data.split_at(w * h);
            let swap = frame.format == PixelFormat::Nv21;
            for row in 0..h {
                for col in 0..w {
                    let c = ((row / 2) * chroma_w + col / 2) * 2;
                    let (a, b) = (uv_plane[c], uv_plane[c + 1]);
                    let (u, v) = if swap { (b, a) } else { (a, b) };
                    rgba.extend_from_slice(&yuv_to_rgba(y_plane[row * w + col], u, v));
                }
            }
        }
        PixelFormat::Yuyv => {
            let stride = w.div_ceil(2) * 4;
            for row in 0..h {
                let line = &data[row * stride..(row + 1) * stride];
                for col in 0..w {
                    let pair = &line[(col / 2) * 4..(col / 2) * 4 + 4];
                    let y = if col % 2 == 0 { pair[0] } else { pair[2] };
                    rgba.extend_from_slice(&yuv_to_rgba(y, pair[1], pair[3]));
                }
            }
        }
    }

    Bitmap::from_rgba(width, height, rgba).ok_or(ConvertError::Empty)
}
