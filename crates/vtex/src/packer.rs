use images::{
    BorderColor, FormatClass, Image, PaddedCopy, SubresourceRange, WrapMode, format_class,
    padded_copy, supports_border_color,
};
use smallvec::SmallVec;

use crate::miptail::miptail_offsets;
use crate::page_table::{PageTable, PageTableTexel};
use crate::storage::{ResidentStorage, StorageParams, TileAddress};
use crate::texture::{LayerMeta, TextureHandle, ViewSets};
use crate::{CreateError, PackError, VirtualTextureConfig};

/// CPU-side residency manager for sparsely resident textures.
///
/// Owns the layered page table, one physical tile storage per format
/// class, and the renderer-facing metadata. `pack` makes a source image's
/// mip chain resident, `free` releases it; all other state is read-only
/// output for the renderer.
pub struct VirtualTexture {
    page_size_log2: u32,
    tile_padding: u32,
    max_size_log2: u32,
    page_table: PageTable,
    storages: Vec<ResidentStorage>,
    class_to_storage: [Option<usize>; FormatClass::COUNT],
    views: ViewSets,
    layer_meta: Vec<LayerMeta>,
    miptail_offsets: Vec<(u32, u32)>,
}

impl VirtualTexture {
    pub fn new(
        config: VirtualTextureConfig,
        storage_params: Vec<StorageParams>,
    ) -> Result<Self, CreateError> {
        config.validate()?;
        let miptail_offsets = miptail_offsets(config.page_size_log2, config.tile_padding)
            .ok_or(CreateError::TilePaddingTooLarge(config.tile_padding))?;
        let page_table = PageTable::new(
            config.max_allocatable_size_log2 - config.page_size_log2,
            config.page_table_layers,
        )?;

        let tile_size = 1u32 << config.page_size_log2;
        let mut storages = Vec::with_capacity(storage_params.len());
        let mut class_to_storage = [None; FormatClass::COUNT];
        let mut views = ViewSets::default();
        for params in storage_params {
            let storage = ResidentStorage::new(params, tile_size, config.tile_padding)?;
            let class = storage.class();
            if class_to_storage[class.index()].is_some() {
                return Err(CreateError::DuplicateFormatClass(class));
            }
            class_to_storage[class.index()] = Some(storages.len());
            for &format in storage.formats() {
                views.register(format)?;
            }
            storages.push(storage);
        }

        Ok(Self {
            page_size_log2: config.page_size_log2,
            tile_padding: config.tile_padding,
            max_size_log2: config.max_allocatable_size_log2,
            page_table,
            storages,
            class_to_storage,
            views,
            layer_meta: vec![LayerMeta::unassigned(); config.page_table_layers as usize],
            miptail_offsets,
        })
    }

    /// Makes the image's mip window resident.
    ///
    /// Claims a page-table region sized to the base level's page
    /// footprint, allocates one physical tile per page of every level that
    /// spans more than one tile's worth of texels, and copies each page's
    /// content (plus a wrap-synthesized padding ring) into the tiles.
    /// Levels small enough to fit in a tile share a single tail tile whose
    /// address rides in the high bits of the last per-page level's texel.
    ///
    /// Any allocation failure after the region claim rolls the claim back
    /// completely before the error returns; occupancy is left exactly as
    /// it was.
    pub fn pack(
        &mut self,
        image: &Image,
        range: SubresourceRange,
        wrap_u: WrapMode,
        wrap_v: WrapMode,
        border: BorderColor,
    ) -> Result<TextureHandle, PackError> {
        let format = image.info().format;
        let class = format_class(format).ok_or(PackError::UnsupportedFormat(format))?;
        let storage_index =
            self.class_to_storage[class.index()].ok_or(PackError::NoStorageForClass(class))?;
        let view_index = self
            .views
            .view_index(format)
            .ok_or(PackError::NoMatchingView(format))?;
        if (wrap_u == WrapMode::ClampToBorder || wrap_v == WrapMode::ClampToBorder)
            && !supports_border_color(format, border)
        {
            return Err(PackError::UnsupportedBorderColor(border));
        }
        if !range.is_within(image.info()) {
            return Err(PackError::InvalidSubresource);
        }

        let (base_width, base_height) = image.info().mip_extent(range.base_mip_level);
        let max_extent = 1u32 << self.max_size_log2;
        if base_width > max_extent || base_height > max_extent {
            return Err(PackError::ExtentTooLarge {
                width: base_width,
                height: base_height,
            });
        }

        let page_size = 1u32 << self.page_size_log2;
        let own_levels = levels_with_own_page(base_width, base_height, page_size);
        let levels = range
            .level_count
            .min(self.page_table.mip_count() + self.page_size_log2);
        let side_pages = region_side(base_width, base_height, page_size);

        let claim = self
            .page_table
            .allocate_region(class, side_pages)
            .ok_or(PackError::PageTableFull)?;
        if claim.fresh_layer {
            self.layer_meta[claim.layer as usize] = LayerMeta {
                storage_reciprocal: self.storages[storage_index].reciprocal_extent(),
                view_index,
                _pad: 0,
            };
        }

        let mut tail_tile = None;
        for level in 0..levels {
            let level_width = mip_dim(base_width, level);
            let level_height = mip_dim(base_height, level);
            let src_level = range.base_mip_level + level;

            if level >= own_levels {
                // Tail level: no page-table entry of its own, content goes
                // into the shared tile's slot for this level.
                let Some(tail) = tail_tile else {
                    panic!("virtual texture: tail level {level} reached without a tail tile");
                };
                let slot = self.miptail_offsets[(level - own_levels) as usize];
                let location = self.storages[storage_index].tile_location(tail);
                let copy = PaddedCopy {
                    src_level,
                    src_layer: 0,
                    src_offset: (0, 0),
                    extent: (level_width, level_height),
                    dst_level: 0,
                    dst_layer: location.layer,
                    dst_offset: (
                        location.origin.0 - self.tile_padding + slot.0,
                        location.origin.1 - self.tile_padding + slot.1,
                    ),
                    padding: self.tile_padding,
                    wrap_u,
                    wrap_v,
                    border,
                };
                if let Err(error) =
                    padded_copy(image, self.storages[storage_index].image_mut(), &copy)
                {
                    self.release_region(
                        storage_index,
                        claim.x,
                        claim.y,
                        claim.layer,
                        base_width,
                        base_height,
                    );
                    return Err(PackError::Copy(error));
                }
                continue;
            }

            let pages_x = level_width.div_ceil(page_size);
            let pages_y = level_height.div_ceil(page_size);
            for page_y in 0..pages_y {
                for page_x in 0..pages_x {
                    let Some(tile) = self.storages[storage_index].allocate_tile() else {
                        self.release_region(
                            storage_index,
                            claim.x,
                            claim.y,
                            claim.layer,
                            base_width,
                            base_height,
                        );
                        return Err(PackError::AtlasFull);
                    };
                    let texel_x = (claim.x >> level) + page_x;
                    let texel_y = (claim.y >> level) + page_y;

                    let mut texel_tail = None;
                    if level + 1 == own_levels && levels > own_levels {
                        match self.storages[storage_index].allocate_tile() {
                            Some(tail) => {
                                tail_tile = Some(tail);
                                texel_tail = Some(tail);
                            }
                            None => {
                                // Record the tile just allocated so the
                                // rollback walk reaches it.
                                self.page_table.write_texel(
                                    level,
                                    claim.layer,
                                    texel_x,
                                    texel_y,
                                    PageTableTexel::new(tile, None),
                                );
                                self.release_region(
                                    storage_index,
                                    claim.x,
                                    claim.y,
                                    claim.layer,
                                    base_width,
                                    base_height,
                                );
                                return Err(PackError::AtlasFull);
                            }
                        }
                    }
                    self.page_table.write_texel(
                        level,
                        claim.layer,
                        texel_x,
                        texel_y,
                        PageTableTexel::new(tile, texel_tail),
                    );

                    let location = self.storages[storage_index].tile_location(tile);
                    let copy = PaddedCopy {
                        src_level,
                        src_layer: 0,
                        src_offset: (page_x * page_size, page_y * page_size),
                        extent: (
                            page_size.min(level_width - page_x * page_size),
                            page_size.min(level_height - page_y * page_size),
                        ),
                        dst_level: 0,
                        dst_layer: location.layer,
                        dst_offset: (
                            location.origin.0 - self.tile_padding,
                            location.origin.1 - self.tile_padding,
                        ),
                        padding: self.tile_padding,
                        wrap_u,
                        wrap_v,
                        border,
                    };
                    if let Err(error) =
                        padded_copy(image, self.storages[storage_index].image_mut(), &copy)
                    {
                        self.release_region(
                            storage_index,
                            claim.x,
                            claim.y,
                            claim.layer,
                            base_width,
                            base_height,
                        );
                        return Err(PackError::Copy(error));
                    }
                }
            }
        }

        Ok(TextureHandle {
            page_table_x: claim.x,
            page_table_y: claim.y,
            page_table_layer: claim.layer,
            original_width: base_width,
            original_height: base_height,
            wrap_u,
            wrap_v,
        })
    }

    /// Releases everything `pack` made resident for the handle.
    ///
    /// Returns `false` without touching any state when the handle is
    /// invalid, the image's format resolves to no storage, or the handle
    /// does not describe a currently live region (double free). The image
    /// is consulted for its format only.
    pub fn free(&mut self, handle: TextureHandle, image: &Image) -> bool {
        if !handle.is_valid() {
            return false;
        }
        let format = image.info().format;
        let Some(class) = format_class(format) else {
            return false;
        };
        let Some(storage_index) = self.class_to_storage[class.index()] else {
            return false;
        };
        if handle.page_table_layer >= self.page_table.layer_count()
            || self.page_table.layer_class(handle.page_table_layer) != Some(class)
        {
            return false;
        }

        let max_extent = 1u32 << self.max_size_log2;
        if handle.original_width == 0
            || handle.original_height == 0
            || handle.original_width > max_extent
            || handle.original_height > max_extent
        {
            return false;
        }

        let page_size = 1u32 << self.page_size_log2;
        let side_pages = region_side(handle.original_width, handle.original_height, page_size);
        let extent = self.page_table.extent();
        if handle.page_table_x % side_pages != 0
            || handle.page_table_y % side_pages != 0
            || handle.page_table_x >= extent
            || handle.page_table_y >= extent
        {
            return false;
        }
        if self.page_table.region_is_free(
            handle.page_table_x,
            handle.page_table_y,
            handle.page_table_layer,
            side_pages,
        ) {
            return false;
        }

        self.release_region(
            storage_index,
            handle.page_table_x,
            handle.page_table_y,
            handle.page_table_layer,
            handle.original_width,
            handle.original_height,
        );
        true
    }

    /// Walks a region the way `pack` wrote it, collecting every tile
    /// address still recorded there, then clears the texels, batch-frees
    /// the tiles and releases the region. Texels never written still hold
    /// the invalid sentinel and are skipped, which lets a failed `pack`
    /// reuse this for its rollback.
    fn release_region(
        &mut self,
        storage_index: usize,
        region_x: u32,
        region_y: u32,
        layer: u32,
        base_width: u32,
        base_height: u32,
    ) {
        let page_size = 1u32 << self.page_size_log2;
        let own_levels = levels_with_own_page(base_width, base_height, page_size);
        let mut tiles: SmallVec<[TileAddress; 32]> = SmallVec::new();
        for level in 0..own_levels {
            let pages_x = mip_dim(base_width, level).div_ceil(page_size);
            let pages_y = mip_dim(base_height, level).div_ceil(page_size);
            for page_y in 0..pages_y {
                for page_x in 0..pages_x {
                    let texel_x = (region_x >> level) + page_x;
                    let texel_y = (region_y >> level) + page_y;
                    let texel = self.page_table.read_texel(level, layer, texel_x, texel_y);
                    if texel == PageTableTexel::INVALID {
                        continue;
                    }
                    if let Some(primary) = texel.primary() {
                        tiles.push(primary);
                    }
                    if let Some(tail) = texel.tail() {
                        tiles.push(tail);
                    }
                    self.page_table
                        .write_texel(level, layer, texel_x, texel_y, PageTableTexel::INVALID);
                }
            }
        }
        if !tiles.is_empty() {
            self.storages[storage_index].free_tiles(&tiles);
        }
        let side_pages = region_side(base_width, base_height, page_size);
        self.page_table.free_region(region_x, region_y, layer, side_pages);
    }

    pub fn page_size(&self) -> u32 {
        1 << self.page_size_log2
    }

    pub fn tile_padding(&self) -> u32 {
        self.tile_padding
    }

    /// The page table's backing image, for upload or inspection.
    pub fn page_table_image(&self) -> &Image {
        self.page_table.image()
    }

    pub fn page_table_texel(&self, level: u32, layer: u32, x: u32, y: u32) -> PageTableTexel {
        self.page_table.read_texel(level, layer, x, y)
    }

    /// Page-table layers serving a format class, in claim order.
    pub fn class_layers(&self, class: FormatClass) -> &[u16] {
        self.page_table.class_layers(class)
    }

    pub fn storage(&self, class: FormatClass) -> Option<&ResidentStorage> {
        self.class_to_storage[class.index()].map(|index| &self.storages[index])
    }

    pub fn storages(&self) -> &[ResidentStorage] {
        &self.storages
    }

    /// Per-layer metadata slice, one element per page-table layer.
    pub fn layer_meta(&self) -> &[LayerMeta] {
        &self.layer_meta
    }

    pub fn views(&self) -> &ViewSets {
        &self.views
    }
}

fn mip_dim(base: u32, level: u32) -> u32 {
    (base >> level).max(1)
}

/// Number of leading mip levels whose footprint exceeds one page on
/// either axis, plus the boundary level that closes them. The boundary
/// level always fits a single page; everything after it belongs to the
/// mip tail.
fn levels_with_own_page(width: u32, height: u32, page_size: u32) -> u32 {
    let mut levels = 1;
    let mut level = 0;
    while (width >> level) > page_size || (height >> level) > page_size {
        levels = level + 2;
        level += 1;
    }
    levels
}

/// Side of the square page-table region backing a texture, in pages:
/// next power of two of the base level's larger page count.
fn region_side(width: u32, height: u32, page_size: u32) -> u32 {
    let pages_x = width.div_ceil(page_size);
    let pages_y = height.div_ceil(page_size);
    pages_x.max(pages_y).next_power_of_two()
}
