use images::{FormatClass, Image, ImageInfo, fill_rect};
use range_alloc::RangeAllocator;
use smallvec::SmallVec;
use wgpu::TextureFormat;

use crate::CreateError;
use crate::storage::TileAddress;

/// One packed page-table texel.
///
/// Low 16 bits address the level's own tile, high 16 bits address the
/// shared mip-tail tile. The tail half is meaningful only on the mip-tail
/// boundary level; everywhere else it stays the invalid sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTableTexel(u32);

impl PageTableTexel {
    pub const INVALID: PageTableTexel = PageTableTexel(0xffff_ffff);

    pub(crate) fn new(primary: TileAddress, tail: Option<TileAddress>) -> PageTableTexel {
        let tail = tail.unwrap_or(TileAddress::INVALID);
        PageTableTexel((primary.raw() as u32) | ((tail.raw() as u32) << 16))
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn primary(self) -> Option<TileAddress> {
        let addr = TileAddress::from_raw((self.0 & 0xffff) as u16);
        addr.is_valid().then_some(addr)
    }

    pub fn tail(self) -> Option<TileAddress> {
        let addr = TileAddress::from_raw((self.0 >> 16) as u16);
        addr.is_valid().then_some(addr)
    }
}

pub(crate) struct RegionClaim {
    pub x: u32,
    pub y: u32,
    pub layer: u32,
    /// True when this claim assigned a previously unassigned layer to the
    /// format class, so per-layer metadata needs its one-time refresh.
    pub fresh_layer: bool,
}

struct LayerState {
    regions: RangeAllocator,
    assigned: Option<FormatClass>,
}

/// The layered page-table image and its per-layer region allocators.
///
/// Each layer is a square of `1 << extent_log2` texels with a full mip
/// chain. Regions are square powers of two allocated in Morton order:
/// `side * side` texels aligned to `side * side` decode to an aligned
/// `side x side` square, so a region's texels stay inside it on every
/// mip level of the table.
pub(crate) struct PageTable {
    image: Image,
    layers: Vec<LayerState>,
    groups: [SmallVec<[u16; 8]>; FormatClass::COUNT],
    extent_log2: u32,
}

impl PageTable {
    pub fn new(extent_log2: u32, layer_count: u32) -> Result<Self, CreateError> {
        let extent = 1u32 << extent_log2;
        let mip_level_count = extent_log2 + 1;
        let mut image = Image::new(ImageInfo {
            format: TextureFormat::R32Uint,
            width: extent,
            height: extent,
            mip_level_count,
            layer_count,
        })?;
        for level in 0..mip_level_count {
            let level_extent = image.info().mip_extent(level);
            for layer in 0..layer_count {
                fill_texels(&mut image, level, layer, (0, 0), level_extent, PageTableTexel::INVALID);
            }
        }

        let texel_count = extent * extent;
        let layers = (0..layer_count)
            .map(|_| LayerState {
                regions: RangeAllocator::new(texel_count),
                assigned: None,
            })
            .collect();

        Ok(Self {
            image,
            layers,
            groups: std::array::from_fn(|_| SmallVec::new()),
            extent_log2,
        })
    }

    pub fn extent(&self) -> u32 {
        1 << self.extent_log2
    }

    pub fn mip_count(&self) -> u32 {
        self.extent_log2 + 1
    }

    pub fn layer_count(&self) -> u32 {
        self.layers.len() as u32
    }

    pub fn image(&self) -> &Image {
        &self.image
    }

    /// Layers serving a format class, in the order they were claimed.
    pub fn class_layers(&self, class: FormatClass) -> &[u16] {
        &self.groups[class.index()]
    }

    pub fn layer_class(&self, layer: u32) -> Option<FormatClass> {
        self.layers[layer as usize].assigned
    }

    /// Claims an aligned `side_pages` square region for a texture of the
    /// class. Layers already serving the class are tried in claim order,
    /// first fit wins; otherwise the lowest unassigned layer is claimed
    /// for the class. Class assignments never go away.
    pub fn allocate_region(&mut self, class: FormatClass, side_pages: u32) -> Option<RegionClaim> {
        let count = side_pages * side_pages;
        for &layer in &self.groups[class.index()] {
            if let Some(base) = self.layers[layer as usize].regions.allocate(count, count) {
                let (x, y) = morton_decode(base);
                return Some(RegionClaim {
                    x,
                    y,
                    layer: layer as u32,
                    fresh_layer: false,
                });
            }
        }

        let layer = self.layers.iter().position(|state| state.assigned.is_none())?;
        let base = self.layers[layer].regions.allocate(count, count)?;
        self.layers[layer].assigned = Some(class);
        self.groups[class.index()].push(layer as u16);
        let (x, y) = morton_decode(base);
        Some(RegionClaim {
            x,
            y,
            layer: layer as u32,
            fresh_layer: true,
        })
    }

    pub fn free_region(&mut self, x: u32, y: u32, layer: u32, side_pages: u32) {
        self.layers[layer as usize]
            .regions
            .free(morton_encode(x, y), side_pages * side_pages);
    }

    pub fn region_is_free(&self, x: u32, y: u32, layer: u32, side_pages: u32) -> bool {
        self.layers[layer as usize]
            .regions
            .is_free(morton_encode(x, y), side_pages * side_pages)
    }

    pub fn read_texel(&self, level: u32, layer: u32, x: u32, y: u32) -> PageTableTexel {
        PageTableTexel(self.image.read_texel_u32(level, layer, x, y))
    }

    pub fn write_texel(&mut self, level: u32, layer: u32, x: u32, y: u32, texel: PageTableTexel) {
        fill_texels(&mut self.image, level, layer, (x, y), (1, 1), texel);
    }
}

/// Texel writes go through the fill primitive; coordinates are computed
/// by the packer and always land inside the table.
fn fill_texels(
    image: &mut Image,
    level: u32,
    layer: u32,
    offset: (u32, u32),
    extent: (u32, u32),
    texel: PageTableTexel,
) {
    if fill_rect(image, level, layer, offset, extent, &texel.raw().to_ne_bytes()).is_err() {
        panic!("page table: fill of {extent:?} texels at {offset:?} is outside the table");
    }
}

fn spread_bits(value: u32) -> u32 {
    let mut value = value & 0x0000_ffff;
    value = (value | (value << 8)) & 0x00ff_00ff;
    value = (value | (value << 4)) & 0x0f0f_0f0f;
    value = (value | (value << 2)) & 0x3333_3333;
    value = (value | (value << 1)) & 0x5555_5555;
    value
}

fn compact_bits(value: u32) -> u32 {
    let mut value = value & 0x5555_5555;
    value = (value | (value >> 1)) & 0x3333_3333;
    value = (value | (value >> 2)) & 0x0f0f_0f0f;
    value = (value | (value >> 4)) & 0x00ff_00ff;
    value = (value | (value >> 8)) & 0x0000_ffff;
    value
}

fn morton_encode(x: u32, y: u32) -> u32 {
    spread_bits(x) | (spread_bits(y) << 1)
}

fn morton_decode(address: u32) -> (u32, u32) {
    (compact_bits(address), compact_bits(address >> 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> PageTable {
        PageTable::new(3, 4).unwrap()
    }

    #[test]
    fn morton_round_trips_and_orders_squares() {
        for x in 0..16 {
            for y in 0..16 {
                assert_eq!(morton_decode(morton_encode(x, y)), (x, y));
            }
        }
        // An aligned run of 4^k addresses is an aligned 2^k square.
        for base in (0..256).step_by(16) {
            let (x0, y0) = morton_decode(base);
            assert_eq!(x0 % 4, 0);
            assert_eq!(y0 % 4, 0);
            for offset in 0..16 {
                let (x, y) = morton_decode(base + offset);
                assert!(x >= x0 && x < x0 + 4);
                assert!(y >= y0 && y < y0 + 4);
            }
        }
    }

    #[test]
    fn starts_fully_invalid() {
        let table = table();
        assert_eq!(table.extent(), 8);
        assert_eq!(table.mip_count(), 4);
        for level in 0..table.mip_count() {
            let (w, h) = table.image().info().mip_extent(level);
            for layer in 0..table.layer_count() {
                for y in 0..h {
                    for x in 0..w {
                        assert_eq!(table.read_texel(level, layer, x, y), PageTableTexel::INVALID);
                    }
                }
            }
        }
    }

    #[test]
    fn regions_are_aligned_and_disjoint() {
        let mut table = table();
        let a = table.allocate_region(FormatClass::B8, 4).unwrap();
        let b = table.allocate_region(FormatClass::B8, 2).unwrap();
        let c = table.allocate_region(FormatClass::B8, 2).unwrap();
        assert_eq!(a.layer, 0);
        assert_eq!(b.layer, 0);
        assert_eq!(c.layer, 0);
        assert_eq!(a.x % 4, 0);
        assert_eq!(a.y % 4, 0);
        assert_eq!(b.x % 2, 0);

        let covers = |claim: &RegionClaim, side: u32, x: u32, y: u32| {
            x >= claim.x && x < claim.x + side && y >= claim.y && y < claim.y + side
        };
        for x in 0..8 {
            for y in 0..8 {
                let hits = [covers(&a, 4, x, y), covers(&b, 2, x, y), covers(&c, 2, x, y)];
                assert!(hits.iter().filter(|&&hit| hit).count() <= 1, "({x}, {y}) double-claimed");
            }
        }
    }

    #[test]
    fn classes_reuse_their_layers_and_groups_grow() {
        let mut table = table();
        let a = table.allocate_region(FormatClass::B8, 2).unwrap();
        assert!(a.fresh_layer);
        assert_eq!(a.layer, 0);

        let b = table.allocate_region(FormatClass::B32, 2).unwrap();
        assert!(b.fresh_layer);
        assert_eq!(b.layer, 1);

        let c = table.allocate_region(FormatClass::B8, 2).unwrap();
        assert!(!c.fresh_layer);
        assert_eq!(c.layer, 0);

        assert_eq!(table.class_layers(FormatClass::B8), &[0]);
        assert_eq!(table.class_layers(FormatClass::B32), &[1]);
        assert_eq!(table.layer_class(0), Some(FormatClass::B8));
        assert_eq!(table.layer_class(1), Some(FormatClass::B32));
        assert_eq!(table.layer_class(2), None);
    }

    #[test]
    fn full_class_spills_to_a_fresh_layer() {
        let mut table = table();
        // Fill layer 0 with one full-extent region.
        let a = table.allocate_region(FormatClass::B8, 8).unwrap();
        assert_eq!(a.layer, 0);
        let b = table.allocate_region(FormatClass::B8, 8).unwrap();
        assert!(b.fresh_layer);
        assert_eq!(b.layer, 1);
        assert_eq!(table.class_layers(FormatClass::B8), &[0, 1]);
    }

    #[test]
    fn runs_out_when_every_layer_is_assigned() {
        let mut table = PageTable::new(2, 2).unwrap();
        assert!(table.allocate_region(FormatClass::B8, 4).is_some());
        assert!(table.allocate_region(FormatClass::B16, 4).is_some());
        assert!(table.allocate_region(FormatClass::B32, 1).is_none());
        // A full class also fails once no unassigned layer remains.
        assert!(table.allocate_region(FormatClass::B8, 4).is_none());
    }

    #[test]
    fn free_region_returns_texels_to_the_layer() {
        let mut table = table();
        let a = table.allocate_region(FormatClass::B8, 4).unwrap();
        assert!(!table.region_is_free(a.x, a.y, a.layer, 4));
        table.free_region(a.x, a.y, a.layer, 4);
        assert!(table.region_is_free(a.x, a.y, a.layer, 4));
        // The layer stays assigned to the class after its regions drain.
        assert_eq!(table.layer_class(a.layer), Some(FormatClass::B8));
    }

    #[test]
    fn texel_writes_round_trip() {
        let mut table = table();
        let texel = PageTableTexel::new(TileAddress::from_raw(7), Some(TileAddress::from_raw(9)));
        table.write_texel(1, 2, 3, 1, texel);
        assert_eq!(table.read_texel(1, 2, 3, 1), texel);
        assert_eq!(texel.primary(), Some(TileAddress::from_raw(7)));
        assert_eq!(texel.tail(), Some(TileAddress::from_raw(9)));

        let no_tail = PageTableTexel::new(TileAddress::from_raw(7), None);
        assert_eq!(no_tail.tail(), None);
        assert_eq!(PageTableTexel::INVALID.primary(), None);
    }
}
