use wgpu::{TextureFormat, TextureSampleType};

/// Byte-width compatibility class of an uncompressed color format.
///
/// Two formats of the same class store texels of identical size, so tiles
/// of one can live in physical storage created with the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatClass {
    B8,
    B16,
    B32,
    B64,
    B128,
}

impl FormatClass {
    pub const COUNT: usize = 5;

    pub const fn bytes_per_texel(self) -> u32 {
        match self {
            FormatClass::B8 => 1,
            FormatClass::B16 => 2,
            FormatClass::B32 => 4,
            FormatClass::B64 => 8,
            FormatClass::B128 => 16,
        }
    }

    pub const fn index(self) -> usize {
        match self {
            FormatClass::B8 => 0,
            FormatClass::B16 => 1,
            FormatClass::B32 => 2,
            FormatClass::B64 => 3,
            FormatClass::B128 => 4,
        }
    }
}

/// How a sampler reads the format: the three view classes a renderer has
/// to keep apart when binding texture arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleCategory {
    Float,
    Sint,
    Uint,
}

/// Maps a format to its storage compatibility class.
///
/// Returns `None` for compressed, depth/stencil, and other formats that
/// cannot back a tile atlas.
pub fn format_class(format: TextureFormat) -> Option<FormatClass> {
    if format.is_compressed() || format.is_depth_stencil_format() {
        return None;
    }
    match format.block_copy_size(None)? {
        1 => Some(FormatClass::B8),
        2 => Some(FormatClass::B16),
        4 => Some(FormatClass::B32),
        8 => Some(FormatClass::B64),
        16 => Some(FormatClass::B128),
        _ => None,
    }
}

/// Sampler view class of a format, `None` where `format_class` is `None`.
pub fn sample_category(format: TextureFormat) -> Option<SampleCategory> {
    format_class(format)?;
    match format.sample_type(None, None)? {
        TextureSampleType::Float { .. } => Some(SampleCategory::Float),
        TextureSampleType::Sint => Some(SampleCategory::Sint),
        TextureSampleType::Uint => Some(SampleCategory::Uint),
        TextureSampleType::Depth => None,
    }
}

pub fn bytes_per_texel(format: TextureFormat) -> Option<u32> {
    format_class(format).map(FormatClass::bytes_per_texel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_follow_texel_width() {
        assert_eq!(format_class(TextureFormat::R8Unorm), Some(FormatClass::B8));
        assert_eq!(format_class(TextureFormat::Rg8Sint), Some(FormatClass::B16));
        assert_eq!(
            format_class(TextureFormat::Rgba8Unorm),
            Some(FormatClass::B32)
        );
        assert_eq!(format_class(TextureFormat::R32Uint), Some(FormatClass::B32));
        assert_eq!(
            format_class(TextureFormat::Rgba16Float),
            Some(FormatClass::B64)
        );
        assert_eq!(
            format_class(TextureFormat::Rgba32Float),
            Some(FormatClass::B128)
        );
    }

    #[test]
    fn rejects_formats_that_cannot_back_tiles() {
        assert_eq!(format_class(TextureFormat::Bc1RgbaUnorm), None);
        assert_eq!(format_class(TextureFormat::Depth32Float), None);
        assert_eq!(format_class(TextureFormat::Depth24PlusStencil8), None);
        assert_eq!(sample_category(TextureFormat::Depth32Float), None);
    }

    #[test]
    fn categories_split_by_sample_type() {
        assert_eq!(
            sample_category(TextureFormat::Rgba8Unorm),
            Some(SampleCategory::Float)
        );
        assert_eq!(
            sample_category(TextureFormat::Rgba16Float),
            Some(SampleCategory::Float)
        );
        assert_eq!(
            sample_category(TextureFormat::R8Sint),
            Some(SampleCategory::Sint)
        );
        assert_eq!(
            sample_category(TextureFormat::Rg32Uint),
            Some(SampleCategory::Uint)
        );
    }

    #[test]
    fn class_indices_are_dense() {
        let classes = [
            FormatClass::B8,
            FormatClass::B16,
            FormatClass::B32,
            FormatClass::B64,
            FormatClass::B128,
        ];
        for (i, class) in classes.into_iter().enumerate() {
            assert_eq!(class.index(), i);
        }
    }
}
