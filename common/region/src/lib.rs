//! Region files: up to 1024 variable-length records on a 32x32 grid, stored in
//! 4096-byte sectors behind an 8 KiB offset/timestamp header.
//!
//! Open a file with [`RegionFile::open`], choosing one of three backends
//! through [`RegionOpenOptions`]:
//!
//! - [`BackendKind::Direct`] maps the header and does positioned I/O for records.
//! - [`BackendKind::Buffered`] holds the whole file in memory until `flush`.
//! - [`BackendKind::Mapped`] maps the whole file read-only and reads without copying.

use std::fmt;

pub use crate::{
    backend::Record,
    error::{Corruption, OpenError, RegionError, Result},
    file::RegionFile,
    header::{HeaderTable, SectorRange},
    options::{Access, BackendKind, RegionOpenOptions},
    sectors::SectorMap,
};

mod backend;
pub mod error;
pub mod file;
pub mod header;
pub mod options;
pub mod sectors;

pub const SECTOR_BYTES: usize = 4096;
pub const HEADER_SECTORS: usize = 2;
pub const HEADER_BYTES: usize = HEADER_SECTORS * SECTOR_BYTES;

/// Big-endian length written in front of every record payload.
pub const LENGTH_PREFIX_BYTES: usize = 4;

/// Records per row of the grid.
pub const REGION_WIDTH: usize = 32;
pub const ENTRY_COUNT: usize = REGION_WIDTH * REGION_WIDTH;

/// Largest sector count an offset entry can hold.
pub const MAX_RECORD_SECTORS: usize = u8::MAX as usize;

/// A validated coordinate inside the region grid.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, PartialOrd, Ord)]
pub struct RegionPos {
    x: u8,
    z: u8,
}

impl RegionPos {
    pub fn new(x: i32, z: i32) -> Result<Self> {
        let width = REGION_WIDTH as i32;
        if (0..width).contains(&x) && (0..width).contains(&z) {
            Ok(Self {
                x: x as u8,
                z: z as u8,
            })
        } else {
            Err(RegionError::InvalidCoordinate { x, z })
        }
    }

    /// Inverse of [`RegionPos::index`].
    pub const fn from_index(index: usize) -> Self {
        debug_assert!(index < ENTRY_COUNT);
        Self {
            x: (index % REGION_WIDTH) as u8,
            z: (index / REGION_WIDTH) as u8,
        }
    }

    #[inline(always)]
    pub const fn x(self) -> u8 {
        self.x
    }

    #[inline(always)]
    pub const fn z(self) -> u8 {
        self.z
    }

    /// Header slot, `x + z * 32`.
    #[inline(always)]
    pub const fn index(self) -> usize {
        self.x as usize + self.z as usize * REGION_WIDTH
    }

    /// Every coordinate in header order.
    pub fn all() -> impl Iterator<Item = Self> {
        (0..ENTRY_COUNT).map(Self::from_index)
    }
}

impl fmt::Display for RegionPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

/// Sectors needed to store a payload of `len` bytes with its length prefix.
pub fn sectors_for(len: usize) -> Result<u8> {
    let sectors = (len + LENGTH_PREFIX_BYTES).div_ceil(SECTOR_BYTES);
    if sectors > MAX_RECORD_SECTORS {
        Err(RegionError::RecordTooLarge {
            len,
            sectors,
            limit: MAX_RECORD_SECTORS,
        })
    } else {
        Ok(sectors as u8)
    }
}

#[cfg(test)]
mod tests {
    use crate::{ENTRY_COUNT, RegionError, RegionPos, sectors_for};

    #[test]
    fn coordinates() {
        let pos = RegionPos::new(5, 3).unwrap();
        assert_eq!(pos.index(), 5 + 3 * 32);
        assert_eq!(RegionPos::from_index(pos.index()), pos);
        assert_eq!(pos.to_string(), "(5, 3)");

        assert_eq!(RegionPos::new(31, 31).unwrap().index(), ENTRY_COUNT - 1);
        for (x, z) in [(-1, 0), (0, -1), (32, 0), (0, 32), (i32::MAX, i32::MIN)] {
            assert!(matches!(
                RegionPos::new(x, z),
                Err(RegionError::InvalidCoordinate { .. })
            ));
        }

        assert!(RegionPos::all().enumerate().all(|(i, pos)| pos.index() == i));
        assert_eq!(RegionPos::all().count(), ENTRY_COUNT);
    }

    #[test]
    fn sector_counts() {
        assert_eq!(sectors_for(0).unwrap(), 1);
        assert_eq!(sectors_for(4092).unwrap(), 1);
        assert_eq!(sectors_for(4093).unwrap(), 2);
        assert_eq!(sectors_for(255 * 4096 - 4).unwrap(), 255);
        assert!(matches!(
            sectors_for(255 * 4096 - 3),
            Err(RegionError::RecordTooLarge { sectors: 256, .. })
        ));
    }
}
