use std::collections::BTreeMap;

/// Best-fit range allocator over `0..capacity`.
///
/// Hands out spans of units with power-of-two alignment and coalesces
/// freed spans with their neighbors. Callers own the bookkeeping: freeing
/// a span that was never allocated is a contract violation and panics
/// rather than corrupting the free map.
pub struct RangeAllocator {
    capacity: u32,
    allocated: u32,
    // start -> length; disjoint and never adjacent (coalesced on free).
    free: BTreeMap<u32, u32>,
}

impl RangeAllocator {
    pub fn new(capacity: u32) -> Self {
        let mut free = BTreeMap::new();
        if capacity > 0 {
            free.insert(0, capacity);
        }
        Self {
            capacity,
            allocated: 0,
            free,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Units currently handed out.
    pub fn allocated(&self) -> u32 {
        self.allocated
    }

    /// Allocates `count` units at a base aligned to `alignment`.
    ///
    /// Best-fit: among free spans that can hold an aligned run of `count`
    /// units, picks the shortest (lowest base on ties). Returns `None`
    /// when no span fits.
    pub fn allocate(&mut self, count: u32, alignment: u32) -> Option<u32> {
        if count == 0 {
            panic!("range allocator: zero-length allocation");
        }
        if !alignment.is_power_of_two() {
            panic!("range allocator: alignment {alignment} is not a power of two");
        }

        let mut best: Option<(u32, u32, u32)> = None; // (len, start, aligned base)
        for (&start, &len) in &self.free {
            let Some(aligned) = start.checked_add(alignment - 1) else {
                continue;
            };
            let aligned = aligned & !(alignment - 1);
            let pad = aligned - start;
            if pad >= len || len - pad < count {
                continue;
            }
            if best.is_none_or(|(best_len, _, _)| len < best_len) {
                best = Some((len, start, aligned));
            }
        }

        let (len, start, aligned) = best?;
        self.free.remove(&start);
        if aligned > start {
            self.free.insert(start, aligned - start);
        }
        let tail = (start + len) - (aligned + count);
        if tail > 0 {
            self.free.insert(aligned + count, tail);
        }
        self.allocated += count;
        Some(aligned)
    }

    /// Returns a previously allocated span, merging it with adjacent free
    /// spans.
    pub fn free(&mut self, base: u32, count: u32) {
        if count == 0 {
            panic!("range allocator: zero-length free");
        }
        let end = base
            .checked_add(count)
            .filter(|&end| end <= self.capacity)
            .unwrap_or_else(|| {
                panic!("range allocator: freeing {base}+{count} beyond capacity {}", self.capacity)
            });

        let mut merged_base = base;
        let mut merged_end = end;

        if let Some((&prev_start, &prev_len)) = self.free.range(..=base).next_back() {
            let prev_end = prev_start + prev_len;
            if prev_end > base {
                panic!("range allocator: freeing {base}+{count} overlaps free span");
            }
            if prev_end == base {
                self.free.remove(&prev_start);
                merged_base = prev_start;
            }
        }
        if let Some((&next_start, &next_len)) = self.free.range(base..).next() {
            if next_start < end {
                panic!("range allocator: freeing {base}+{count} overlaps free span");
            }
            if next_start == end {
                self.free.remove(&next_start);
                merged_end = next_start + next_len;
            }
        }

        self.free.insert(merged_base, merged_end - merged_base);
        debug_assert!(self.allocated >= count);
        self.allocated -= count;
    }

    /// True when the whole span `base..base + count` lies inside one free
    /// span. Lets callers reject stale releases before mutating anything.
    pub fn is_free(&self, base: u32, count: u32) -> bool {
        let Some(end) = base.checked_add(count) else {
            return false;
        };
        self.free
            .range(..=base)
            .next_back()
            .is_some_and(|(&start, &len)| end <= start + len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_and_frees_round_trip() {
        let mut alloc = RangeAllocator::new(64);
        let a = alloc.allocate(10, 1).unwrap();
        let b = alloc.allocate(20, 1).unwrap();
        assert_ne!(a, b);
        assert_eq!(alloc.allocated(), 30);

        alloc.free(a, 10);
        alloc.free(b, 20);
        assert_eq!(alloc.allocated(), 0);
        // Full coalescing: the whole capacity is allocatable again.
        assert_eq!(alloc.allocate(64, 1), Some(0));
    }

    #[test]
    fn respects_alignment() {
        let mut alloc = RangeAllocator::new(64);
        alloc.allocate(3, 1).unwrap();
        let b = alloc.allocate(16, 16).unwrap();
        assert_eq!(b % 16, 0);
        let c = alloc.allocate(4, 4).unwrap();
        assert_eq!(c % 4, 0);
    }

    #[test]
    fn best_fit_prefers_tightest_span() {
        let mut alloc = RangeAllocator::new(100);
        let a = alloc.allocate(10, 1).unwrap();
        let _separator = alloc.allocate(4, 1).unwrap();
        let c = alloc.allocate(40, 1).unwrap();
        alloc.free(a, 10);
        alloc.free(c, 40);
        // Spans of 10 and 86 units are free on either side of the live
        // separator; a 4-unit request lands in the tighter one.
        assert_eq!(alloc.allocate(4, 1), Some(a));
        assert_eq!(alloc.allocate(10, 1), Some(c));
    }

    #[test]
    fn exhausts_without_overlap() {
        let mut alloc = RangeAllocator::new(8);
        let mut seen = Vec::new();
        while let Some(base) = alloc.allocate(2, 2) {
            assert!(!seen.contains(&base));
            seen.push(base);
        }
        assert_eq!(seen.len(), 4);
        assert_eq!(alloc.allocated(), 8);
        assert_eq!(alloc.allocate(1, 1), None);
    }

    #[test]
    fn aligned_squares_do_not_alias() {
        // The page table allocates s*s units aligned to s*s; distinct
        // allocations must never share units.
        let mut alloc = RangeAllocator::new(256);
        let a = alloc.allocate(16, 16).unwrap();
        let b = alloc.allocate(64, 64).unwrap();
        let c = alloc.allocate(16, 16).unwrap();
        let spans = [(a, 16u32), (b, 64), (c, 16)];
        for (i, &(base, len)) in spans.iter().enumerate() {
            assert_eq!(base % len, 0);
            for &(other, other_len) in &spans[i + 1..] {
                assert!(base + len <= other || other + other_len <= base);
            }
        }
    }

    #[test]
    fn is_free_tracks_span_state() {
        let mut alloc = RangeAllocator::new(32);
        assert!(alloc.is_free(0, 32));
        let a = alloc.allocate(8, 8).unwrap();
        assert!(!alloc.is_free(a, 8));
        alloc.free(a, 8);
        assert!(alloc.is_free(a, 8));
    }

    #[test]
    #[should_panic(expected = "overlaps free span")]
    fn double_free_panics() {
        let mut alloc = RangeAllocator::new(16);
        let a = alloc.allocate(4, 1).unwrap();
        alloc.free(a, 4);
        alloc.free(a, 4);
    }

    #[test]
    fn allocation_failure_leaves_state_intact() {
        let mut alloc = RangeAllocator::new(16);
        let a = alloc.allocate(12, 1).unwrap();
        assert_eq!(alloc.allocate(8, 1), None);
        assert_eq!(alloc.allocated(), 12);
        alloc.free(a, 12);
        assert_eq!(alloc.allocate(16, 1), Some(0));
    }
}
