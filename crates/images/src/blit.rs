use std::fmt;

use wgpu::TextureFormat;

use crate::{Image, format};

/// Texture coordinate wrapping applied when a padded copy samples outside
/// the source level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WrapMode {
    Repeat,
    MirroredRepeat,
    ClampToEdge,
    ClampToBorder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BorderColor {
    TransparentBlack,
    OpaqueBlack,
    OpaqueWhite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlitError {
    OutOfBounds,
    TexelSizeMismatch { expected: u32, got: usize },
    FormatClassMismatch,
    UnsupportedBorderColor(TextureFormat),
}

impl fmt::Display for BlitError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlitError::OutOfBounds => write!(formatter, "blit rectangle is out of bounds"),
            BlitError::TexelSizeMismatch { expected, got } => {
                write!(formatter, "texel value is {got} bytes, format takes {expected}")
            }
            BlitError::FormatClassMismatch => {
                write!(formatter, "source and destination formats are not byte compatible")
            }
            BlitError::UnsupportedBorderColor(format) => {
                write!(formatter, "no border color encoding for format {format:?}")
            }
        }
    }
}

impl std::error::Error for BlitError {}

/// Writes one constant texel value over a sub-rectangle of a level/layer.
pub fn fill_rect(
    image: &mut Image,
    level: u32,
    layer: u32,
    offset: (u32, u32),
    extent: (u32, u32),
    texel: &[u8],
) -> Result<(), BlitError> {
    let bytes_per_texel = image.bytes_per_texel();
    if texel.len() != bytes_per_texel as usize {
        return Err(BlitError::TexelSizeMismatch {
            expected: bytes_per_texel,
            got: texel.len(),
        });
    }
    if level >= image.info().mip_level_count || layer >= image.info().layer_count {
        return Err(BlitError::OutOfBounds);
    }
    let (w, h) = image.info().mip_extent(level);
    let fits_x = offset.0.checked_add(extent.0).is_some_and(|end| end <= w);
    let fits_y = offset.1.checked_add(extent.1).is_some_and(|end| end <= h);
    if extent.0 == 0 || extent.1 == 0 || !fits_x || !fits_y {
        return Err(BlitError::OutOfBounds);
    }

    for y in offset.1..offset.1 + extent.1 {
        let row = image.texels_mut(level, layer, offset.0, y, extent.0);
        for slot in row.chunks_exact_mut(bytes_per_texel as usize) {
            slot.copy_from_slice(texel);
        }
    }
    Ok(())
}

/// A content rectangle plus the synthesized padding ring around it.
///
/// The source rectangle `src_offset .. src_offset + extent` of
/// `src_level`/`src_layer` lands at `dst_offset + (padding, padding)`;
/// the surrounding `padding`-texel ring is filled by mapping each ring
/// texel back to source coordinates. Coordinates inside the source level
/// copy directly (neighboring tiles bleed in), coordinates outside are
/// wrapped against the source level's extent, with `ClampToBorder`
/// writing `border` instead.
#[derive(Debug, Clone, Copy)]
pub struct PaddedCopy {
    pub src_level: u32,
    pub src_layer: u32,
    pub src_offset: (u32, u32),
    pub extent: (u32, u32),
    pub dst_level: u32,
    pub dst_layer: u32,
    pub dst_offset: (u32, u32),
    pub padding: u32,
    pub wrap_u: WrapMode,
    pub wrap_v: WrapMode,
    pub border: BorderColor,
}

pub fn padded_copy(src: &Image, dst: &mut Image, copy: &PaddedCopy) -> Result<(), BlitError> {
    if format::format_class(src.info().format) != format::format_class(dst.info().format) {
        return Err(BlitError::FormatClassMismatch);
    }
    if copy.src_level >= src.info().mip_level_count
        || copy.src_layer >= src.info().layer_count
        || copy.dst_level >= dst.info().mip_level_count
        || copy.dst_layer >= dst.info().layer_count
    {
        return Err(BlitError::OutOfBounds);
    }

    let (src_w, src_h) = src.info().mip_extent(copy.src_level);
    let (dst_w, dst_h) = dst.info().mip_extent(copy.dst_level);
    let (content_w, content_h) = copy.extent;
    if content_w == 0 || content_h == 0 {
        return Err(BlitError::OutOfBounds);
    }
    let src_fits = copy
        .src_offset
        .0
        .checked_add(content_w)
        .is_some_and(|end| end <= src_w)
        && copy
            .src_offset
            .1
            .checked_add(content_h)
            .is_some_and(|end| end <= src_h);
    let ring = copy.padding.checked_mul(2).ok_or(BlitError::OutOfBounds)?;
    let (Some(padded_w), Some(padded_h)) = (content_w.checked_add(ring), content_h.checked_add(ring))
    else {
        return Err(BlitError::OutOfBounds);
    };
    let dst_fits = copy
        .dst_offset
        .0
        .checked_add(padded_w)
        .is_some_and(|end| end <= dst_w)
        && copy
            .dst_offset
            .1
            .checked_add(padded_h)
            .is_some_and(|end| end <= dst_h);
    if !src_fits || !dst_fits {
        return Err(BlitError::OutOfBounds);
    }

    let needs_border =
        copy.wrap_u == WrapMode::ClampToBorder || copy.wrap_v == WrapMode::ClampToBorder;
    let border = if needs_border {
        Some(
            border_texel(src.info().format, copy.border)
                .ok_or(BlitError::UnsupportedBorderColor(src.info().format))?,
        )
    } else {
        None
    };
    let border_bytes = border
        .as_ref()
        .map(|(texel, len)| &texel[..*len]);

    let pad = copy.padding as i64;
    for oy in 0..padded_h {
        let sy = copy.src_offset.1 as i64 + oy as i64 - pad;
        let dy = copy.dst_offset.1 + oy;
        let content_row = oy >= copy.padding && oy < copy.padding + content_h;
        if content_row {
            let row = src.texels(
                copy.src_level,
                copy.src_layer,
                copy.src_offset.0,
                sy as u32,
                content_w,
            );
            dst.texels_mut(
                copy.dst_level,
                copy.dst_layer,
                copy.dst_offset.0 + copy.padding,
                dy,
                content_w,
            )
            .copy_from_slice(row);
            for ox in (0..copy.padding).chain(copy.padding + content_w..padded_w) {
                let sx = copy.src_offset.0 as i64 + ox as i64 - pad;
                write_ring_texel(src, dst, copy, (src_w, src_h), (sx, sy), (copy.dst_offset.0 + ox, dy), border_bytes);
            }
        } else {
            for ox in 0..padded_w {
                let sx = copy.src_offset.0 as i64 + ox as i64 - pad;
                write_ring_texel(src, dst, copy, (src_w, src_h), (sx, sy), (copy.dst_offset.0 + ox, dy), border_bytes);
            }
        }
    }
    Ok(())
}

fn write_ring_texel(
    src: &Image,
    dst: &mut Image,
    copy: &PaddedCopy,
    src_extent: (u32, u32),
    src_coord: (i64, i64),
    dst_coord: (u32, u32),
    border: Option<&[u8]>,
) {
    let wrapped_x = wrap_coord(src_coord.0, src_extent.0, copy.wrap_u);
    let wrapped_y = wrap_coord(src_coord.1, src_extent.1, copy.wrap_v);
    let texel = match (wrapped_x, wrapped_y) {
        (Some(x), Some(y)) => src.texel(copy.src_level, copy.src_layer, x, y),
        _ => border.expect("clamp-to-border texel was not resolved"),
    };
    dst.texel_mut(copy.dst_level, copy.dst_layer, dst_coord.0, dst_coord.1)
        .copy_from_slice(texel);
}

fn wrap_coord(coord: i64, size: u32, mode: WrapMode) -> Option<u32> {
    let size = size as i64;
    if coord >= 0 && coord < size {
        return Some(coord as u32);
    }
    match mode {
        WrapMode::Repeat => Some(coord.rem_euclid(size) as u32),
        WrapMode::MirroredRepeat => {
            let period = 2 * size;
            let phase = coord.rem_euclid(period);
            let mirrored = if phase < size { phase } else { period - 1 - phase };
            Some(mirrored as u32)
        }
        WrapMode::ClampToEdge => Some(coord.clamp(0, size - 1) as u32),
        WrapMode::ClampToBorder => None,
    }
}

/// True when `padded_copy` can synthesize `border` texels for `format`.
pub fn supports_border_color(format: TextureFormat, border: BorderColor) -> bool {
    border_texel(format, border).is_some()
}

fn border_texel(format: TextureFormat, border: BorderColor) -> Option<([u8; 16], usize)> {
    let len = format::bytes_per_texel(format)? as usize;
    let mut texel = [0u8; 16];
    if border == BorderColor::TransparentBlack {
        return Some((texel, len));
    }

    let one = channel_one(format)?;
    let components = format.components() as usize;
    let width = len / components;
    let mut write_channel = |index: usize| match one {
        ChannelOne::U8(value) => texel[index * width] = value,
        ChannelOne::U16(value) => {
            texel[index * width..(index + 1) * width].copy_from_slice(&value.to_ne_bytes())
        }
        ChannelOne::U32(value) => {
            texel[index * width..(index + 1) * width].copy_from_slice(&value.to_ne_bytes())
        }
    };
    match border {
        BorderColor::TransparentBlack => {}
        BorderColor::OpaqueBlack => {
            // Alpha is the last channel of every supported 4-channel format.
            if components == 4 {
                write_channel(3);
            }
        }
        BorderColor::OpaqueWhite => {
            for channel in 0..components {
                write_channel(channel);
            }
        }
    }
    Some((texel, len))
}

/// The bit pattern of value 1 for a single channel of the format.
enum ChannelOne {
    U8(u8),
    U16(u16),
    U32(u32),
}

fn channel_one(format: TextureFormat) -> Option<ChannelOne> {
    use TextureFormat as F;
    match format {
        F::R8Unorm | F::Rg8Unorm | F::Rgba8Unorm | F::Rgba8UnormSrgb | F::Bgra8Unorm
        | F::Bgra8UnormSrgb => Some(ChannelOne::U8(0xff)),
        F::R8Snorm | F::Rg8Snorm | F::Rgba8Snorm => Some(ChannelOne::U8(0x7f)),
        F::R8Uint | F::Rg8Uint | F::Rgba8Uint | F::R8Sint | F::Rg8Sint | F::Rgba8Sint => {
            Some(ChannelOne::U8(1))
        }
        F::R16Uint | F::Rg16Uint | F::Rgba16Uint | F::R16Sint | F::Rg16Sint | F::Rgba16Sint => {
            Some(ChannelOne::U16(1))
        }
        F::R16Unorm | F::Rg16Unorm | F::Rgba16Unorm => Some(ChannelOne::U16(0xffff)),
        F::R16Snorm | F::Rg16Snorm | F::Rgba16Snorm => Some(ChannelOne::U16(0x7fff)),
        F::R16Float | F::Rg16Float | F::Rgba16Float => Some(ChannelOne::U16(0x3c00)),
        F::R32Uint | F::Rg32Uint | F::Rgba32Uint | F::R32Sint | F::Rg32Sint | F::Rgba32Sint => {
            Some(ChannelOne::U32(1))
        }
        F::R32Float | F::Rg32Float | F::Rgba32Float => Some(ChannelOne::U32(1.0f32.to_bits())),
        _ => None,
    }
}
