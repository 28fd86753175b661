//! Still image to raw pixel buffer conversion.

use image::RgbaImage;
use montage_common::{MontageError, MontageResult};

/// Pixel layout of a [`PixelBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 8-bit alpha, red, green, blue; color premultiplied by alpha.
    Argb32,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Argb32 => 4,
        }
    }
}

/// An uncompressed frame, rows stored bottom-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub bytes_per_row: usize,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl PixelBuffer {
    /// ARGB bytes of the pixel at `(x, y)`, with `y` counted from the top of the image.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let row = (self.height - 1 - y) as usize;
        let offset = row * self.bytes_per_row + x as usize * self.format.bytes_per_pixel();
        let px = self.data.get(offset..offset + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }

    /// Convert back to a top-down, straight-alpha RGBA image.
    pub fn to_rgba_image(&self) -> RgbaImage {
        RgbaImage::from_fn(self.width, self.height, |x, y| {
            let [a, r, g, b] = self.pixel(x, y).unwrap_or([0; 4]);
            image::Rgba([unpremultiply(r, a), unpremultiply(g, a), unpremultiply(b, a), a])
        })
    }
}

/// Render a still image into a freshly allocated ARGB pixel buffer.
///
/// Source images are top-down; the buffer is bottom-up, so row `0` of the
/// buffer holds the last row of the image.
pub fn rasterize(image: &RgbaImage) -> MontageResult<PixelBuffer> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(MontageError::data(format!(
            "cannot allocate a {width}x{height} pixel buffer"
        )));
    }

    let format = PixelFormat::Argb32;
    let bytes_per_row = width as usize * format.bytes_per_pixel();
    let len = bytes_per_row
        .checked_mul(height as usize)
        .ok_or_else(|| MontageError::data("pixel buffer size overflows"))?;

    let mut data = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|e| MontageError::data(format!("pixel buffer allocation failed: {e}")))?;

    for row in image.rows().rev() {
        for px in row {
            let [r, g, b, a] = px.0;
            data.extend_from_slice(&[a, premultiply(r, a), premultiply(g, a), premultiply(b, a)]);
        }
    }

    Ok(PixelBuffer {
        width,
        height,
        bytes_per_row,
        format,
        data,
    })
}

fn premultiply(channel: u8, alpha: u8) -> u8 {
    ((channel as u16 * alpha as u16 + 127) / 255) as u8
}

fn unpremultiply(channel: u8, alpha: u8) -> u8 {
    if alpha == 0 {
        return 0;
    }
    ((channel as u16 * 255 + alpha as u16 / 2) / alpha as u16).min(255) as u8
}
