use std::fmt;

use wgpu::TextureFormat;

pub mod blit;
pub mod format;

pub use blit::{
    BlitError, BorderColor, PaddedCopy, WrapMode, fill_rect, padded_copy, supports_border_color,
};
pub use format::{FormatClass, SampleCategory, bytes_per_texel, format_class, sample_category};

/// Creation parameters of a CPU image: a 2d mip chain with array layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
    pub mip_level_count: u32,
    pub layer_count: u32,
}

impl ImageInfo {
    /// Extent of a mip level, floor-halved per level and clamped to 1.
    pub fn mip_extent(&self, level: u32) -> (u32, u32) {
        ((self.width >> level).max(1), (self.height >> level).max(1))
    }

    /// Longest mip chain the base extent supports.
    pub fn max_mip_level_count(&self) -> u32 {
        32 - self.width.max(self.height).max(1).leading_zeros()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageError {
    UnsupportedFormat(TextureFormat),
    ZeroExtent,
    ExcessiveMipCount { requested: u32, max: u32 },
    SizeOverflow,
}

impl fmt::Display for ImageError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageError::UnsupportedFormat(format) => {
                write!(formatter, "format {format:?} cannot back a cpu image")
            }
            ImageError::ZeroExtent => {
                write!(formatter, "image extent, mip count and layer count must be at least 1")
            }
            ImageError::ExcessiveMipCount { requested, max } => {
                write!(
                    formatter,
                    "mip level count {requested} exceeds the {max} levels the extent supports"
                )
            }
            ImageError::SizeOverflow => write!(formatter, "image byte size overflows"),
        }
    }
}

impl std::error::Error for ImageError {}

/// Mip window of an image participating in an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubresourceRange {
    pub base_mip_level: u32,
    pub level_count: u32,
}

impl SubresourceRange {
    pub fn is_within(&self, info: &ImageInfo) -> bool {
        self.level_count >= 1
            && self
                .base_mip_level
                .checked_add(self.level_count)
                .is_some_and(|end| end <= info.mip_level_count)
    }
}

/// A tightly packed CPU image.
///
/// Layout: mip levels in order, each level holding `layer_count` planes of
/// `w_i * h_i` texels. Texel accessors panic on out-of-range coordinates;
/// the blit entry points validate and return errors instead.
pub struct Image {
    info: ImageInfo,
    bytes_per_texel: u32,
    mip_offsets: Vec<usize>,
    data: Vec<u8>,
}

impl Image {
    pub fn new(info: ImageInfo) -> Result<Self, ImageError> {
        let bytes_per_texel = format::bytes_per_texel(info.format)
            .ok_or(ImageError::UnsupportedFormat(info.format))?;
        if info.width == 0 || info.height == 0 || info.mip_level_count == 0 || info.layer_count == 0
        {
            return Err(ImageError::ZeroExtent);
        }
        let max = info.max_mip_level_count();
        if info.mip_level_count > max {
            return Err(ImageError::ExcessiveMipCount {
                requested: info.mip_level_count,
                max,
            });
        }

        let mut mip_offsets = Vec::with_capacity(info.mip_level_count as usize);
        let mut total = 0usize;
        for level in 0..info.mip_level_count {
            mip_offsets.push(total);
            let (w, h) = info.mip_extent(level);
            let plane = (w as usize)
                .checked_mul(h as usize)
                .and_then(|texels| texels.checked_mul(bytes_per_texel as usize))
                .ok_or(ImageError::SizeOverflow)?;
            let level_size = plane
                .checked_mul(info.layer_count as usize)
                .ok_or(ImageError::SizeOverflow)?;
            total = total.checked_add(level_size).ok_or(ImageError::SizeOverflow)?;
        }

        Ok(Self {
            info,
            bytes_per_texel,
            mip_offsets,
            data: vec![0; total],
        })
    }

    pub fn info(&self) -> &ImageInfo {
        &self.info
    }

    pub fn bytes_per_texel(&self) -> u32 {
        self.bytes_per_texel
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn texel_offset(&self, level: u32, layer: u32, x: u32, y: u32) -> usize {
        let (w, h) = self.info.mip_extent(level);
        assert!(
            level < self.info.mip_level_count && layer < self.info.layer_count && x < w && y < h,
            "texel ({x}, {y}) of level {level} layer {layer} is out of bounds"
        );
        let plane = (w as usize) * (h as usize);
        let texel = (layer as usize) * plane + (y as usize) * (w as usize) + x as usize;
        self.mip_offsets[level as usize] + texel * self.bytes_per_texel as usize
    }

    pub fn texel(&self, level: u32, layer: u32, x: u32, y: u32) -> &[u8] {
        let offset = self.texel_offset(level, layer, x, y);
        &self.data[offset..offset + self.bytes_per_texel as usize]
    }

    pub fn texel_mut(&mut self, level: u32, layer: u32, x: u32, y: u32) -> &mut [u8] {
        let offset = self.texel_offset(level, layer, x, y);
        &mut self.data[offset..offset + self.bytes_per_texel as usize]
    }

    /// A run of `count` texels of one row, starting at `(x, y)`.
    pub fn texels(&self, level: u32, layer: u32, x: u32, y: u32, count: u32) -> &[u8] {
        let (w, _) = self.info.mip_extent(level);
        assert!(
            count >= 1 && x.checked_add(count).is_some_and(|end| end <= w),
            "texel run {x}+{count} exceeds level {level} width {w}"
        );
        let offset = self.texel_offset(level, layer, x, y);
        &self.data[offset..offset + (count as usize) * self.bytes_per_texel as usize]
    }

    pub fn texels_mut(&mut self, level: u32, layer: u32, x: u32, y: u32, count: u32) -> &mut [u8] {
        let (w, _) = self.info.mip_extent(level);
        assert!(
            count >= 1 && x.checked_add(count).is_some_and(|end| end <= w),
            "texel run {x}+{count} exceeds level {level} width {w}"
        );
        let offset = self.texel_offset(level, layer, x, y);
        &mut self.data[offset..offset + (count as usize) * self.bytes_per_texel as usize]
    }

    /// Reads a 4-byte texel as a native-endian u32.
    pub fn read_texel_u32(&self, level: u32, layer: u32, x: u32, y: u32) -> u32 {
        assert!(
            self.bytes_per_texel == 4,
            "u32 texel access on a {}-byte format",
            self.bytes_per_texel
        );
        bytemuck::pod_read_unaligned(self.texel(level, layer, x, y))
    }

    pub fn write_texel_u32(&mut self, level: u32, layer: u32, x: u32, y: u32, value: u32) {
        assert!(
            self.bytes_per_texel == 4,
            "u32 texel access on a {}-byte format",
            self.bytes_per_texel
        );
        self.texel_mut(level, layer, x, y)
            .copy_from_slice(&value.to_ne_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgba8(width: u32, height: u32, mips: u32) -> Image {
        Image::new(ImageInfo {
            format: TextureFormat::Rgba8Unorm,
            width,
            height,
            mip_level_count: mips,
            layer_count: 1,
        })
        .unwrap()
    }

    #[test]
    fn mip_extents_floor_halve_and_clamp() {
        let image = rgba8(300, 200, 9);
        assert_eq!(image.info().mip_extent(0), (300, 200));
        assert_eq!(image.info().mip_extent(1), (150, 100));
        assert_eq!(image.info().mip_extent(2), (75, 50));
        assert_eq!(image.info().mip_extent(8), (1, 1));
    }

    #[test]
    fn max_mip_count_matches_extent() {
        let info = ImageInfo {
            format: TextureFormat::R8Unorm,
            width: 300,
            height: 300,
            mip_level_count: 1,
            layer_count: 1,
        };
        assert_eq!(info.max_mip_level_count(), 9);
        assert!(
            Image::new(ImageInfo {
                mip_level_count: 10,
                ..info
            })
            .is_err()
        );
        assert!(
            Image::new(ImageInfo {
                mip_level_count: 9,
                ..info
            })
            .is_ok()
        );
    }

    #[test]
    fn rejects_unsupported_formats_and_zero_extents() {
        let bad = Image::new(ImageInfo {
            format: TextureFormat::Depth32Float,
            width: 4,
            height: 4,
            mip_level_count: 1,
            layer_count: 1,
        });
        assert!(matches!(bad, Err(ImageError::UnsupportedFormat(_))));

        let empty = Image::new(ImageInfo {
            format: TextureFormat::R8Unorm,
            width: 0,
            height: 4,
            mip_level_count: 1,
            layer_count: 1,
        });
        assert_eq!(empty.err(), Some(ImageError::ZeroExtent));
    }

    #[test]
    fn texels_round_trip_across_levels_and_layers() {
        let mut image = Image::new(ImageInfo {
            format: TextureFormat::R32Uint,
            width: 8,
            height: 8,
            mip_level_count: 4,
            layer_count: 3,
        })
        .unwrap();
        image.write_texel_u32(0, 0, 7, 7, 0xdead_beef);
        image.write_texel_u32(2, 1, 1, 0, 42);
        image.write_texel_u32(3, 2, 0, 0, 7);
        assert_eq!(image.read_texel_u32(0, 0, 7, 7), 0xdead_beef);
        assert_eq!(image.read_texel_u32(2, 1, 1, 0), 42);
        assert_eq!(image.read_texel_u32(3, 2, 0, 0), 7);
        assert_eq!(image.read_texel_u32(0, 1, 7, 7), 0);
    }

    #[test]
    fn subresource_validation() {
        let image = rgba8(64, 64, 7);
        let info = image.info();
        assert!(
            SubresourceRange {
                base_mip_level: 0,
                level_count: 7
            }
            .is_within(info)
        );
        assert!(
            SubresourceRange {
                base_mip_level: 6,
                level_count: 1
            }
            .is_within(info)
        );
        assert!(
            !SubresourceRange {
                base_mip_level: 0,
                level_count: 8
            }
            .is_within(info)
        );
        assert!(
            !SubresourceRange {
                base_mip_level: 7,
                level_count: 0
            }
            .is_within(info)
        );
    }
}
