//! Borrowed CPU image views handed to the pipeline.
//!
//! The pipeline never owns pixel memory: callers pass an [`ImageRef`] for the
//! source and an [`ImageMut`] for the destination, both tightly packed
//! (stride == width * bytes per pixel).

use std::fmt;

use crate::error::FilterError;

/// Pixel layouts understood by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// One 8-bit luminance channel.
    Gray8,
    /// Packed 5/6/5 RGB in a little-endian 16-bit word (two bytes per pixel).
    Rgb565,
    /// Four 8-bit channels in R, G, B, A order.
    Rgba8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb565 => 2,
            PixelFormat::Rgba8 => 4,
        }
    }

    /// Maps an 8-bit channel count onto a layout. Two channels stand for
    /// packed RGB565, matching how frame buffers describe that encoding.
    pub fn from_channels(channels: usize) -> Result<Self, FilterError> {
        match channels {
            1 => Ok(PixelFormat::Gray8),
            2 => Ok(PixelFormat::Rgb565),
            4 => Ok(PixelFormat::Rgba8),
            other => Err(FilterError::UnsupportedFormat(format!(
                "{other}-channel images are not supported (expected 1, 2, or 4 channels)"
            ))),
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelFormat::Gray8 => f.write_str("gray8"),
            PixelFormat::Rgb565 => f.write_str("rgb565"),
            PixelFormat::Rgba8 => f.write_str("rgba8"),
        }
    }
}

fn check_extent(
    width: u32,
    height: u32,
    format: PixelFormat,
    len: usize,
) -> Result<(), FilterError> {
    if width == 0 || height == 0 {
        return Err(FilterError::ContractViolation(format!(
            "image dimensions must be non-zero (got {width}x{height})"
        )));
    }
    let expected = width as usize * height as usize * format.bytes_per_pixel();
    if len != expected {
        return Err(FilterError::ContractViolation(format!(
            "{width}x{height} {format} image needs {expected} bytes but {len} were supplied"
        )));
    }
    Ok(())
}

/// Read-only view of a tightly packed CPU image.
#[derive(Clone, Copy)]
pub struct ImageRef<'a> {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: &'a [u8],
}

impl<'a> ImageRef<'a> {
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        data: &'a [u8],
    ) -> Result<Self, FilterError> {
        check_extent(width, height, format, data.len())?;
        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    /// Builds a view from an 8-bit channel count, the way camera frames
    /// usually describe themselves.
    pub fn from_channels(
        width: u32,
        height: u32,
        channels: usize,
        data: &'a [u8],
    ) -> Result<Self, FilterError> {
        Self::new(width, height, PixelFormat::from_channels(channels)?, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }
}

impl fmt::Debug for ImageRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageRef")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

impl<'a> From<&'a ::image::GrayImage> for ImageRef<'a> {
    fn from(img: &'a ::image::GrayImage) -> Self {
        Self {
            width: img.width(),
            height: img.height(),
            format: PixelFormat::Gray8,
            data: img.as_raw(),
        }
    }
}

impl<'a> From<&'a ::image::RgbaImage> for ImageRef<'a> {
    fn from(img: &'a ::image::RgbaImage) -> Self {
        Self {
            width: img.width(),
            height: img.height(),
            format: PixelFormat::Rgba8,
            data: img.as_raw(),
        }
    }
}

/// Writable view of a preallocated, tightly packed CPU image.
pub struct ImageMut<'a> {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: &'a mut [u8],
}

impl<'a> ImageMut<'a> {
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        data: &'a mut [u8],
    ) -> Result<Self, FilterError> {
        check_extent(width, height, format, data.len())?;
        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.data
    }
}

impl fmt::Debug for ImageMut<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageMut")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

impl<'a> From<&'a mut ::image::RgbaImage> for ImageMut<'a> {
    fn from(img: &'a mut ::image::RgbaImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width,
            height,
            format: PixelFormat::Rgba8,
            data: img,
        }
    }
}

/// Packs 8-bit RGB into a 5/6/5 word with round-to-nearest, the conversion a
/// GPU applies when writing normalized color into a 565 color buffer.
pub fn pack_rgb565(r: u8, g: u8, b: u8) -> u16 {
    let scale = |value: u8, max: u32| ((u32::from(value) * max + 127) / 255) as u16;
    (scale(r, 31) << 11) | (scale(g, 63) << 5) | scale(b, 31)
}

/// Expands a 5/6/5 word back to 8-bit RGB.
pub fn unpack_rgb565(word: u16) -> [u8; 3] {
    let expand = |value: u16, max: u32| ((u32::from(value) * 255 + max / 2) / max) as u8;
    [
        expand(word >> 11, 31),
        expand((word >> 5) & 0x3f, 63),
        expand(word & 0x1f, 31),
    ]
}

/// Expands little-endian RGB565 bytes into opaque RGBA8 pixels.
pub fn rgb565_to_rgba(packed: &[u8], out: &mut [u8]) {
    for (word, pixel) in packed.chunks_exact(2).zip(out.chunks_exact_mut(4)) {
        let [r, g, b] = unpack_rgb565(u16::from_le_bytes([word[0], word[1]]));
        pixel.copy_from_slice(&[r, g, b, 255]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_counts_map_to_formats() {
        assert_eq!(PixelFormat::from_channels(1).unwrap(), PixelFormat::Gray8);
        assert_eq!(PixelFormat::from_channels(2).unwrap(), PixelFormat::Rgb565);
        assert_eq!(PixelFormat::from_channels(4).unwrap(), PixelFormat::Rgba8);
        let err = PixelFormat::from_channels(3).unwrap_err();
        assert!(matches!(err, FilterError::UnsupportedFormat(_)));
    }

    #[test]
    fn rejects_short_buffers() {
        let data = vec![0u8; 15];
        let err = ImageRef::new(2, 2, PixelFormat::Rgba8, &data).unwrap_err();
        assert!(matches!(err, FilterError::ContractViolation(_)));

        let mut out = vec![0u8; 7];
        let err = ImageMut::new(2, 2, PixelFormat::Rgb565, &mut out).unwrap_err();
        assert!(matches!(err, FilterError::ContractViolation(_)));
    }

    #[test]
    fn rgb565_packs_extremes_and_midpoints() {
        assert_eq!(pack_rgb565(0, 0, 0), 0x0000);
        assert_eq!(pack_rgb565(255, 255, 255), 0xffff);
        assert_eq!(pack_rgb565(255, 0, 0), 0xf800);
        assert_eq!(pack_rgb565(0, 255, 0), 0x07e0);
        assert_eq!(pack_rgb565(0, 0, 255), 0x001f);
        // 128 * 31 / 255 = 15.56 -> 16; 128 * 63 / 255 = 31.6 -> 32
        assert_eq!(pack_rgb565(128, 128, 128), (16 << 11) | (32 << 5) | 16);
    }

    #[test]
    fn rgb565_bytes_are_little_endian() {
        let mut packed = [0u8; 4];
        packed[..2].copy_from_slice(&pack_rgb565(255, 0, 0).to_le_bytes());
        packed[2..].copy_from_slice(&pack_rgb565(0, 0, 255).to_le_bytes());
        assert_eq!(packed, [0x00, 0xf8, 0x1f, 0x00]);

        let mut expanded = [0u8; 8];
        rgb565_to_rgba(&packed, &mut expanded);
        assert_eq!(expanded, [255, 0, 0, 255, 0, 0, 255, 255]);
    }
}
