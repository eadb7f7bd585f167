//! Conversion between [`Color`] values and packed texel bytes.
//!
//! Only `Color` and `Alpha8` have codecs. The 16-bit and block-compressed
//! formats are declared so content can name them, and fail with
//! [`RenderError::UnsupportedFormat`] everywhere texels are touched.

use crate::color::Color;
use crate::error::{RenderError, RenderResult};

/// Texel layout of a texture surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SurfaceFormat {
    /// 32-bit RGBA, bytes `[r, g, b, a]`.
    #[default]
    Color,
    Bgr565,
    Bgra4444,
    Bgra5551,
    /// 8-bit alpha only.
    Alpha8,
    Dxt1,
    Dxt3,
}

impl SurfaceFormat {
    /// Size of one texel, or `None` for block-compressed formats.
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            SurfaceFormat::Color => Some(4),
            SurfaceFormat::Bgr565 | SurfaceFormat::Bgra4444 | SurfaceFormat::Bgra5551 => Some(2),
            SurfaceFormat::Alpha8 => Some(1),
            SurfaceFormat::Dxt1 | SurfaceFormat::Dxt3 => None,
        }
    }

    pub fn has_codec(self) -> bool {
        matches!(self, SurfaceFormat::Color | SurfaceFormat::Alpha8)
    }

    /// GPU storage format for surfaces of this format.
    pub fn texture_format(self) -> RenderResult<wgpu::TextureFormat> {
        match self {
            SurfaceFormat::Color => Ok(wgpu::TextureFormat::Rgba8Unorm),
            SurfaceFormat::Alpha8 => Ok(wgpu::TextureFormat::R8Unorm),
            other => Err(RenderError::UnsupportedFormat(other)),
        }
    }

    /// Byte length of a `width x height` image in this format.
    pub fn image_len(self, width: u32, height: u32) -> RenderResult<usize> {
        if !self.has_codec() {
            return Err(RenderError::UnsupportedFormat(self));
        }
        let bpp = self.bytes_per_pixel().ok_or(RenderError::UnsupportedFormat(self))?;
        Ok(width as usize * height as usize * bpp)
    }
}

fn codec_bpp(format: SurfaceFormat) -> RenderResult<usize> {
    match format {
        SurfaceFormat::Color => Ok(4),
        SurfaceFormat::Alpha8 => Ok(1),
        other => Err(RenderError::UnsupportedFormat(other)),
    }
}

/// Write one texel of `format` into the start of `dst`.
pub fn encode_pixel(color: Color, format: SurfaceFormat, dst: &mut [u8]) -> RenderResult<()> {
    let bpp = codec_bpp(format)?;
    let available = dst.len();
    let dst = dst.get_mut(..bpp).ok_or_else(|| {
        RenderError::InvalidArgument(format!("{} byte destination for a {} byte texel", available, bpp))
    })?;
    match format {
        SurfaceFormat::Alpha8 => dst[0] = color.a,
        _ => dst.copy_from_slice(&color.to_array()),
    }
    Ok(())
}

/// Read one texel of `format` from the start of `src`.
///
/// `Alpha8` texels decode to black with the stored alpha.
pub fn decode_pixel(src: &[u8], format: SurfaceFormat) -> RenderResult<Color> {
    let bpp = codec_bpp(format)?;
    let src = src.get(..bpp).ok_or_else(|| {
        RenderError::InvalidArgument(format!("{} byte source for a {} byte texel", src.len(), bpp))
    })?;
    Ok(match format {
        SurfaceFormat::Alpha8 => Color::new(0, 0, 0, src[0]),
        _ => Color::new(src[0], src[1], src[2], src[3]),
    })
}

pub fn encode_pixels(colors: &[Color], format: SurfaceFormat) -> RenderResult<Vec<u8>> {
    let bpp = codec_bpp(format)?;
    match format {
        SurfaceFormat::Color => Ok(bytemuck::cast_slice(colors).to_vec()),
        _ => {
            let mut bytes = vec![0u8; colors.len() * bpp];
            for (color, dst) in colors.iter().zip(bytes.chunks_exact_mut(bpp)) {
                encode_pixel(*color, format, dst)?;
            }
            Ok(bytes)
        }
    }
}

/// Decode every whole texel in `bytes`. Trailing partial texels are ignored.
pub fn decode_pixels(bytes: &[u8], format: SurfaceFormat) -> RenderResult<Vec<Color>> {
    let bpp = codec_bpp(format)?;
    bytes.chunks_exact(bpp).map(|texel| decode_pixel(texel, format)).collect()
}

/// Flip an image vertically in place.
pub fn flip_rows(data: &mut [u8], width: u32, height: u32, bytes_per_pixel: usize) {
    let row = width as usize * bytes_per_pixel;
    let height = height as usize;
    if row == 0 || data.len() < row * height {
        return;
    }
    for y in 0..height / 2 {
        let (top, bottom) = data.split_at_mut((height - 1 - y) * row);
        top[y * row..(y + 1) * row].swap_with_slice(&mut bottom[..row]);
    }
}

/// Halve an image with a 2x2 box filter, for the next level of a mip chain.
///
/// Odd edges reuse their last row or column. Returns the data and the new size.
pub fn downsample(data: &[u8], width: u32, height: u32, bytes_per_pixel: usize) -> (Vec<u8>, u32, u32) {
    let (dst_width, dst_height) = ((width / 2).max(1), (height / 2).max(1));
    let (width, height) = (width as usize, height as usize);
    let mut out = vec![0u8; dst_width as usize * dst_height as usize * bytes_per_pixel];
    if width == 0 || height == 0 || data.len() < width * height * bytes_per_pixel {
        return (out, dst_width, dst_height);
    }

    let texel = |x: usize, y: usize, c: usize| data[(y * width + x) * bytes_per_pixel + c] as u32;
    for y in 0..dst_height as usize {
        let (y0, y1) = ((2 * y).min(height - 1), (2 * y + 1).min(height - 1));
        for x in 0..dst_width as usize {
            let (x0, x1) = ((2 * x).min(width - 1), (2 * x + 1).min(width - 1));
            let dst = (y * dst_width as usize + x) * bytes_per_pixel;
            for c in 0..bytes_per_pixel {
                let sum = texel(x0, y0, c) + texel(x1, y0, c) + texel(x0, y1, c) + texel(x1, y1, c);
                out[dst + c] = ((sum + 2) / 4) as u8;
            }
        }
    }
    (out, dst_width, dst_height)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_round_trip() {
        let colors = [Color::new(1, 2, 3, 4), Color::WHITE, Color::TRANSPARENT, Color::CORNFLOWER_BLUE];
        for color in colors {
            let mut texel = [0u8; 4];
            encode_pixel(color, SurfaceFormat::Color, &mut texel).unwrap();
            assert_eq!(texel, [color.r, color.g, color.b, color.a]);
            assert_eq!(decode_pixel(&texel, SurfaceFormat::Color).unwrap(), color);
        }
    }

    #[test]
    fn test_alpha8_keeps_only_alpha() {
        let bytes = encode_pixels(&[Color::new(10, 20, 30, 77)], SurfaceFormat::Alpha8).unwrap();
        assert_eq!(bytes, vec![77]);
        assert_eq!(decode_pixels(&bytes, SurfaceFormat::Alpha8).unwrap(), vec![Color::new(0, 0, 0, 77)]);

        let black = Color::new(0, 0, 0, 200);
        let bytes = encode_pixels(&[black], SurfaceFormat::Alpha8).unwrap();
        assert_eq!(decode_pixels(&bytes, SurfaceFormat::Alpha8).unwrap(), vec![black]);
    }

    #[test]
    fn test_unsupported_formats() {
        for format in [
            SurfaceFormat::Bgr565,
            SurfaceFormat::Bgra4444,
            SurfaceFormat::Bgra5551,
            SurfaceFormat::Dxt1,
            SurfaceFormat::Dxt3,
        ] {
            let err = encode_pixels(&[Color::WHITE], format).unwrap_err();
            assert!(matches!(err, RenderError::UnsupportedFormat(f) if f == format));
            assert!(decode_pixel(&[0; 4], format).is_err());
        }
    }

    #[test]
    fn test_short_buffers_are_rejected() {
        let mut dst = [0u8; 3];
        assert!(matches!(
            encode_pixel(Color::WHITE, SurfaceFormat::Color, &mut dst),
            Err(RenderError::InvalidArgument(_))
        ));
        assert!(decode_pixel(&[], SurfaceFormat::Alpha8).is_err());
    }

    #[test]
    fn test_bytes_per_pixel() {
        assert_eq!(SurfaceFormat::Color.bytes_per_pixel(), Some(4));
        assert_eq!(SurfaceFormat::Bgra5551.bytes_per_pixel(), Some(2));
        assert_eq!(SurfaceFormat::Dxt1.bytes_per_pixel(), None);
    }

    #[test]
    fn test_flip_rows() {
        // 2x3 image, one byte per pixel
        let mut data = vec![1, 2, 3, 4, 5, 6];
        flip_rows(&mut data, 2, 3, 1);
        assert_eq!(data, vec![5, 6, 3, 4, 1, 2]);

        let mut even = vec![1, 2, 3, 4];
        flip_rows(&mut even, 1, 4, 1);
        assert_eq!(even, vec![4, 3, 2, 1]);
    }

    #[test]
    fn test_downsample_averages_quads() {
        // 2x2 alpha image collapses to its rounded mean
        let (data, w, h) = downsample(&[0, 100, 200, 255], 2, 2, 1);
        assert_eq!((w, h), (1, 1));
        assert_eq!(data, vec![139]);

        let (data, w, h) = downsample(&[10, 20, 30], 3, 1, 1);
        assert_eq!((w, h), (1, 1));
        assert_eq!(data, vec![15]);
    }
}
