//! The 8 KiB region header.
//!
//! - Bytes 0-4095: offset table, 1024 big-endian u32 entries packed as
//!   `(sector << 8) | count`. Zero means the record is absent.
//! - Bytes 4096-8191: timestamp table, 1024 big-endian u32 Unix seconds.
//!
//! Both tables are indexed by `x + z * 32`.

use std::ops::Range;

use bytemuck::{Pod, Zeroable};

use crate::{ENTRY_COUNT, HEADER_BYTES, HEADER_SECTORS, LENGTH_PREFIX_BYTES, SECTOR_BYTES};

/// A run of sectors owned by one record, decoded from an offset entry.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub struct SectorRange {
    /// First sector, counted from the start of the file.
    pub start: u32,

    /// Number of sectors reserved.
    pub count: u8,
}

impl SectorRange {
    /// Decode a packed offset entry. Zero means absent.
    pub const fn unpack(packed: u32) -> Option<Self> {
        if packed == 0 {
            None
        } else {
            Some(Self {
                start: packed >> 8,
                count: (packed & 0xFF) as u8,
            })
        }
    }

    pub const fn pack(self) -> u32 {
        (self.start << 8) | self.count as u32
    }

    /// An entry must point past the header and reserve at least one sector.
    pub const fn is_valid(self) -> bool {
        self.start as usize >= HEADER_SECTORS && self.count > 0
    }

    pub const fn end(self) -> u32 {
        self.start + self.count as u32
    }

    pub const fn byte_offset(self) -> u64 {
        self.start as u64 * SECTOR_BYTES as u64
    }

    pub const fn byte_len(self) -> usize {
        self.count as usize * SECTOR_BYTES
    }

    pub const fn byte_range(self) -> Range<usize> {
        let start = self.start as usize * SECTOR_BYTES;
        start..start + self.byte_len()
    }

    /// Largest payload the allocation can hold after the length prefix.
    pub const fn max_record_len(self) -> usize {
        self.byte_len().saturating_sub(LENGTH_PREFIX_BYTES)
    }
}

/// Big-endian u32 with an alignment of 1, so the header can be viewed
/// in place over any byte slice.
#[derive(Copy, Clone, Pod, Zeroable)]
#[repr(C)]
struct BeU32([u8; 4]);

impl BeU32 {
    const fn get(self) -> u32 {
        u32::from_be_bytes(self.0)
    }

    const fn new(v: u32) -> Self {
        Self(v.to_be_bytes())
    }
}

/// Size is 8192 bytes.
#[derive(Copy, Clone, Pod, Zeroable)]
#[repr(C)]
struct RawHeader {
    offsets: [BeU32; ENTRY_COUNT],
    timestamps: [BeU32; ENTRY_COUNT],
}

/// Typed view over the header bytes of whichever medium a backend uses:
/// a memory-mapped header, an in-memory buffer, or a read-only mapping.
///
/// Read accessors are available over `&[u8]`, mutators over `&mut [u8]`.
/// The slice must be at least 8192 bytes long; backends guarantee that
/// before they hand out a view.
pub struct HeaderTable<B> {
    bytes: B,
}

impl<B: AsRef<[u8]>> HeaderTable<B> {
    pub fn new(bytes: B) -> Self {
        debug_assert!(bytes.as_ref().len() >= HEADER_BYTES);
        Self { bytes }
    }

    fn raw(&self) -> &RawHeader {
        bytemuck::from_bytes(&self.bytes.as_ref()[..HEADER_BYTES])
    }

    pub fn get_offset_entry(&self, index: usize) -> Option<SectorRange> {
        SectorRange::unpack(self.raw().offsets[index].get())
    }

    pub fn get_timestamp(&self, index: usize) -> u32 {
        self.raw().timestamps[index].get()
    }

    /// Every present entry with its header index, in index order.
    pub fn entries(&self) -> impl Iterator<Item = (usize, SectorRange)> + '_ {
        self.raw()
            .offsets
            .iter()
            .enumerate()
            .filter_map(|(i, entry)| SectorRange::unpack(entry.get()).map(|range| (i, range)))
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> HeaderTable<B> {
    fn raw_mut(&mut self) -> &mut RawHeader {
        bytemuck::from_bytes_mut(&mut self.bytes.as_mut()[..HEADER_BYTES])
    }

    pub fn set_offset_entry(&mut self, index: usize, range: SectorRange) {
        self.raw_mut().offsets[index] = BeU32::new(range.pack());
    }

    pub fn clear_offset_entry(&mut self, index: usize) {
        self.raw_mut().offsets[index] = BeU32::new(0);
    }

    pub fn set_timestamp(&mut self, index: usize, time: u32) {
        self.raw_mut().timestamps[index] = BeU32::new(time);
    }
}
