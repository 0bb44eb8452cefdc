/// Slot origins for the mip levels that share one physical tile.
///
/// Slot `k` holds a level of at most `2^(page_size_log2 - 1 - k)` texels
/// per side plus its own `tile_padding` ring, so the padded footprint is
/// `(size + 2 * padding)` square. Slots are shelf-packed left to right,
/// top to bottom inside the padded tile span. Origins are relative to the
/// padded corner of the tile (content origin minus padding on both axes).
///
/// Returns `None` when the slots cannot all fit, which rules the
/// page-size/padding combination out at construction time.
pub(crate) fn miptail_offsets(page_size_log2: u32, tile_padding: u32) -> Option<Vec<(u32, u32)>> {
    let span = (1u32 << page_size_log2).checked_add(tile_padding.checked_mul(2)?)?;
    let mut offsets = Vec::with_capacity(page_size_log2 as usize);
    let mut x = 0u32;
    let mut y = 0u32;
    let mut shelf_height = 0u32;
    for slot in 0..page_size_log2 {
        let side = (1u32 << (page_size_log2 - 1 - slot)) + tile_padding * 2;
        if x + side > span {
            y += shelf_height;
            x = 0;
            shelf_height = 0;
        }
        if x + side > span || y.checked_add(side)? > span {
            return None;
        }
        offsets.push((x, y));
        x += side;
        shelf_height = shelf_height.max(side);
    }
    Some(offsets)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_packing(page_size_log2: u32, tile_padding: u32) {
        let span = (1 << page_size_log2) + tile_padding * 2;
        let offsets = miptail_offsets(page_size_log2, tile_padding)
            .expect("slots must fit the padded tile");
        assert_eq!(offsets.len(), page_size_log2 as usize);

        let side = |slot: usize| (1u32 << (page_size_log2 - 1 - slot as u32)) + tile_padding * 2;
        for (slot, &(x, y)) in offsets.iter().enumerate() {
            assert!(x + side(slot) <= span, "slot {slot} exceeds span");
            assert!(y + side(slot) <= span, "slot {slot} exceeds span");
        }
        for (a, &(ax, ay)) in offsets.iter().enumerate() {
            for (b, &(bx, by)) in offsets.iter().enumerate().skip(a + 1) {
                let disjoint_x = ax + side(a) <= bx || bx + side(b) <= ax;
                let disjoint_y = ay + side(a) <= by || by + side(b) <= ay;
                assert!(disjoint_x || disjoint_y, "slots {a} and {b} overlap");
            }
        }
    }

    #[test]
    fn default_tile_size_fits() {
        assert_packing(7, 9);
    }

    #[test]
    fn small_tiles_fit() {
        assert_packing(4, 1);
        assert_packing(1, 0);
    }

    #[test]
    fn oversized_padding_is_rejected() {
        // Tile span 10, but the two padded slots are 8 and 7 texels wide:
        // the second shelf starts at row 8 and cannot hold 7 more rows.
        assert_eq!(miptail_offsets(2, 3), None);
    }
}
