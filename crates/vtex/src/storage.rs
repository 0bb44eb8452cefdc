use bitvec::prelude::BitVec;
use images::{FormatClass, Image, ImageInfo, format_class};
use range_alloc::RangeAllocator;
use wgpu::TextureFormat;

use crate::CreateError;

/// Address of one physical tile, packed as x/y/layer bitfields.
///
/// x takes the low `tiles_per_dim_log2` bits, y the next, the layer the
/// rest. `0xffff` is reserved as the invalid sentinel, which is why a
/// storage never holds a full 65536 tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileAddress(u16);

impl TileAddress {
    pub const INVALID: TileAddress = TileAddress(0xffff);

    pub fn from_raw(raw: u16) -> TileAddress {
        TileAddress(raw)
    }

    pub fn raw(self) -> u16 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

/// One physical tile atlas and the formats it serves.
///
/// All formats must share one `FormatClass`; the first becomes the format
/// of the backing image, the others alias it through views.
#[derive(Debug, Clone)]
pub struct StorageParams {
    pub formats: Vec<TextureFormat>,
    pub tiles_per_dim_log2: u32,
    pub layer_count: u32,
}

pub(crate) struct TileLocation {
    /// Pixel coordinates of the tile content, inside the padding ring.
    pub origin: (u32, u32),
    pub layer: u32,
}

/// Physical tile atlas for one format class.
///
/// Tiles are `tile_size` texels square with a `tile_padding` ring on all
/// sides, laid out `tiles_per_dim` by `tiles_per_dim` per layer.
pub struct ResidentStorage {
    class: FormatClass,
    formats: Vec<TextureFormat>,
    image: Image,
    tiles: RangeAllocator,
    live: BitVec,
    tiles_per_dim_log2: u32,
    tile_span: u32,
    tile_padding: u32,
}

impl ResidentStorage {
    pub(crate) fn new(
        params: StorageParams,
        tile_size: u32,
        tile_padding: u32,
    ) -> Result<Self, CreateError> {
        let Some(&first) = params.formats.first() else {
            return Err(CreateError::NoStorageFormats);
        };
        let class = format_class(first).ok_or(CreateError::UnsupportedFormat(first))?;
        for &format in &params.formats {
            if format_class(format) != Some(class) {
                return Err(CreateError::MixedFormatClasses);
            }
        }

        let tiles_per_dim = 1u32
            .checked_shl(params.tiles_per_dim_log2)
            .ok_or(CreateError::InvalidStorageSize)?;
        let tile_count = (tiles_per_dim as u64)
            * (tiles_per_dim as u64)
            * (params.layer_count as u64);
        // 0xffff stays reserved for TileAddress::INVALID.
        if tile_count == 0 || tile_count > 0xffff {
            return Err(CreateError::InvalidStorageSize);
        }

        let tile_span = tile_size
            .checked_add(tile_padding.checked_mul(2).ok_or(CreateError::InvalidStorageSize)?)
            .ok_or(CreateError::InvalidStorageSize)?;
        let extent = tiles_per_dim
            .checked_mul(tile_span)
            .ok_or(CreateError::InvalidStorageSize)?;
        let image = Image::new(ImageInfo {
            format: first,
            width: extent,
            height: extent,
            mip_level_count: 1,
            layer_count: params.layer_count,
        })?;

        Ok(Self {
            class,
            formats: params.formats,
            image,
            tiles: RangeAllocator::new(tile_count as u32),
            live: BitVec::repeat(false, tile_count as usize),
            tiles_per_dim_log2: params.tiles_per_dim_log2,
            tile_span,
            tile_padding,
        })
    }

    pub fn class(&self) -> FormatClass {
        self.class
    }

    pub fn formats(&self) -> &[TextureFormat] {
        &self.formats
    }

    pub fn image(&self) -> &Image {
        &self.image
    }

    pub(crate) fn image_mut(&mut self) -> &mut Image {
        &mut self.image
    }

    pub fn tile_capacity(&self) -> u32 {
        self.tiles.capacity()
    }

    pub fn allocated_tiles(&self) -> u32 {
        self.tiles.allocated()
    }

    pub fn is_tile_live(&self, addr: TileAddress) -> bool {
        addr.is_valid()
            && (addr.raw() as u32) < self.tiles.capacity()
            && self.live[addr.raw() as usize]
    }

    /// 1 / padded atlas extent, the uv scale the renderer applies to tile
    /// pixel coordinates.
    pub fn reciprocal_extent(&self) -> [f32; 2] {
        let extent = (1u32 << self.tiles_per_dim_log2) * self.tile_span;
        [1.0 / extent as f32, 1.0 / extent as f32]
    }

    pub(crate) fn allocate_tile(&mut self) -> Option<TileAddress> {
        let index = self.tiles.allocate(1, 1)?;
        self.live.set(index as usize, true);
        Some(TileAddress(index as u16))
    }

    /// Releases a batch of tiles. Every address must be live and appear
    /// once; anything else is a caller bookkeeping bug.
    pub(crate) fn free_tiles(&mut self, addrs: &[TileAddress]) {
        for &addr in addrs {
            let index = self.flat_index(addr);
            if !self.live[index as usize] {
                panic!("resident storage: releasing tile {:#06x} that is not live", addr.raw());
            }
            self.live.set(index as usize, false);
            self.tiles.free(index, 1);
        }
    }

    pub(crate) fn tile_location(&self, addr: TileAddress) -> TileLocation {
        let index = self.flat_index(addr);
        let edge_bits = self.tiles_per_dim_log2;
        let layer_bits = edge_bits * 2;
        let layer = index >> layer_bits;
        let within_layer = index & ((1 << layer_bits) - 1);
        let y = within_layer >> edge_bits;
        let x = within_layer & ((1 << edge_bits) - 1);
        TileLocation {
            origin: (
                x * self.tile_span + self.tile_padding,
                y * self.tile_span + self.tile_padding,
            ),
            layer,
        }
    }

    fn flat_index(&self, addr: TileAddress) -> u32 {
        assert!(
            addr.is_valid() && (addr.raw() as u32) < self.tiles.capacity(),
            "tile address {:#06x} does not belong to this storage",
            addr.raw()
        );
        addr.raw() as u32
    }
}
