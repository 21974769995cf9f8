use std::ops::Range;

use bitvec::vec::BitVec;

use crate::{HEADER_SECTORS, header::SectorRange};

/// Occupancy table over the 4096-byte sectors of a region file.
///
/// One bit per sector, `true` meaning occupied. Sectors 0 and 1 hold the
/// header and are reserved for the lifetime of the map. Sectors past the end
/// of the table are free, which is how allocations grow the file.
///
/// Never persisted. Backends rebuild it from the offset table when they open.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct SectorMap {
    bits: BitVec,
}

impl SectorMap {
    /// A map with only the header sectors occupied.
    pub fn new() -> Self {
        Self {
            bits: BitVec::repeat(true, HEADER_SECTORS),
        }
    }

    /// Reset to the header-only state, then reserve every range.
    pub fn rebuild(&mut self, ranges: impl IntoIterator<Item = SectorRange>) {
        self.bits.clear();
        self.bits.resize(HEADER_SECTORS, true);
        for range in ranges {
            self.mark_range(range.start as usize, range.count as usize, true);
        }
    }

    /// Number of sectors tracked, including trailing free ones.
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    /// Number of occupied sectors, header included.
    pub fn occupied(&self) -> usize {
        self.bits.count_ones()
    }

    pub fn is_occupied(&self, index: usize) -> bool {
        self.bits.get(index).is_some_and(|bit| *bit)
    }

    pub fn reserve(&mut self, index: usize) {
        self.mark_range(index, 1, true);
    }

    pub fn free(&mut self, index: usize) {
        self.mark_range(index, 1, false);
    }

    /// Mark `count` sectors starting at `start`.
    ///
    /// Freeing never touches the header sectors, and freeing past the end of
    /// the table is a no-op.
    pub fn mark_range(&mut self, start: usize, count: usize, occupied: bool) {
        let end = start + count;
        if occupied {
            if end > self.bits.len() {
                self.bits.resize(end, false);
            }
            self.bits[start..end].fill(true);
        } else {
            let start = start.max(HEADER_SECTORS);
            let end = end.min(self.bits.len());
            if start < end {
                self.bits[start..end].fill(false);
            }
        }
    }

    /// Whether every sector in `[start, start + count)` is free.
    pub fn is_range_free(&self, start: usize, count: usize) -> bool {
        (start..start + count).all(|i| !self.is_occupied(i))
    }

    /// First-fit search for `count` contiguous free sectors.
    ///
    /// Scans from the first sector after the header and returns the start of
    /// the first free run long enough. If none exists inside the table, the
    /// returned run begins in the trailing free space and extends past the
    /// current end.
    pub fn find_contiguous(&self, count: usize) -> usize {
        let mut start = HEADER_SECTORS;
        let mut run = 0;

        for (i, occupied) in self.bits[HEADER_SECTORS..].iter().by_vals().enumerate() {
            if occupied {
                start = HEADER_SECTORS + i + 1;
                run = 0;
            } else {
                run += 1;
                if run == count {
                    return start;
                }
            }
        }

        start
    }

    /// Free runs strictly inside the table, in sector units.
    pub fn gaps(&self) -> Vec<Range<usize>> {
        let mut gaps = Vec::new();
        let mut start = None;

        for (i, occupied) in self.bits.iter().by_vals().enumerate() {
            match (occupied, start) {
                (false, None) => start = Some(i),
                (true, Some(s)) => {
                    gaps.push(s..i);
                    start = None;
                }
                _ => {}
            }
        }

        gaps
    }
}

impl Default for SectorMap {
    fn default() -> Self {
        Self::new()
    }
}
