//! The three I/O strategies behind a region file.
//!
//! Each backend owns its storage medium and its `SectorMap`. The facade picks
//! one at open time through `Backend`, a closed set of variants, and then only
//! talks to it through `RegionBackend`.

use std::{
    fs::File,
    io::{self, Read, Seek, SeekFrom, Write},
    ops::Deref,
};

use bytes::Bytes;
use tracing::{trace, warn};

use crate::{
    BackendKind, LENGTH_PREFIX_BYTES, RegionPos, SECTOR_BYTES,
    error::{Corruption, OpenError, RegionError, Result},
    header::{HeaderTable, SectorRange},
    sectors::SectorMap,
};

pub use buffered::BufferedBackend;
pub use direct::DirectBackend;
pub use mapped::MappedBackend;

pub mod buffered;
pub mod direct;
pub mod mapped;

/// Payload bytes returned by a read.
///
/// `Owned` records are copies and stay valid after further calls.
/// `Mapped` records borrow the read-only mapping and live no longer than the
/// region file they came from.
#[derive(Clone, Debug)]
pub enum Record<'a> {
    Owned(Bytes),
    Mapped(&'a [u8]),
}

impl Record<'_> {
    /// Detach from the backend, copying if the record is borrowed.
    pub fn into_bytes(self) -> Bytes {
        match self {
            Record::Owned(bytes) => bytes,
            Record::Mapped(slice) => Bytes::copy_from_slice(slice),
        }
    }

    pub const fn is_zero_copy(&self) -> bool {
        matches!(self, Record::Mapped(_))
    }
}

impl Deref for Record<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Record::Owned(bytes) => bytes,
            Record::Mapped(slice) => slice,
        }
    }
}

impl PartialEq for Record<'_> {
    fn eq(&self, other: &Self) -> bool {
        **self == **other
    }
}

impl Eq for Record<'_> {}

impl AsRef<[u8]> for Record<'_> {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

/// Operations every backend provides. Coordinates are already validated and
/// record sizes already checked by the facade when these are called.
pub trait RegionBackend {
    fn kind(&self) -> BackendKind;

    /// Whether this backend can mutate its medium at all.
    fn is_read_only(&self) -> bool;

    fn header(&self) -> HeaderTable<&[u8]>;

    fn sectors(&self) -> &SectorMap;

    /// Read the record stored at `range` for `pos`.
    fn read_record(&self, pos: RegionPos, range: SectorRange) -> Result<Record<'_>>;

    /// Store `payload` in `sectors` sectors, reusing the existing allocation
    /// when it has exactly that size.
    fn write_record(&mut self, pos: RegionPos, time: u32, payload: &[u8], sectors: u8)
    -> Result<()>;

    /// Overwrite the stored modification time of `pos`.
    fn set_timestamp(&mut self, pos: RegionPos, time: u32) -> Result<()>;

    /// Remove the record at `pos`, zero-filling its sectors if `erase` is set.
    fn delete_record(&mut self, pos: RegionPos, range: SectorRange, erase: bool) -> Result<()>;

    fn flush(&mut self) -> Result<()>;

    /// Release the medium. Whether pending changes are persisted first is
    /// up to the backend.
    fn close(self) -> Result<()>;

    /// Raw bytes of the medium over `range`, for inspecting freed space.
    #[cfg(test)]
    fn medium_bytes(&self, range: SectorRange) -> Vec<u8>;
}

/// The backend selected at open time.
pub enum Backend {
    Direct(DirectBackend),
    Buffered(BufferedBackend),
    Mapped(MappedBackend),
}

impl Backend {
    /// Construct the backend for `kind` over an already opened file.
    pub fn open(kind: BackendKind, file: File, read_only: bool) -> Result<Self, OpenError> {
        Ok(match kind {
            BackendKind::Direct => Backend::Direct(DirectBackend::open(file, read_only)?),
            BackendKind::Buffered => Backend::Buffered(BufferedBackend::open(file, read_only)?),
            BackendKind::Mapped => Backend::Mapped(MappedBackend::open(file)?),
        })
    }
}

macro_rules! dispatch {
    ($self:expr, $b:ident => $body:expr) => {
        match $self {
            Backend::Direct($b) => $body,
            Backend::Buffered($b) => $body,
            Backend::Mapped($b) => $body,
        }
    };
}

impl RegionBackend for Backend {
    fn kind(&self) -> BackendKind {
        dispatch!(self, b => b.kind())
    }

    fn is_read_only(&self) -> bool {
        dispatch!(self, b => b.is_read_only())
    }

    fn header(&self) -> HeaderTable<&[u8]> {
        dispatch!(self, b => b.header())
    }

    fn sectors(&self) -> &SectorMap {
        dispatch!(self, b => b.sectors())
    }

    fn read_record(&self, pos: RegionPos, range: SectorRange) -> Result<Record<'_>> {
        dispatch!(self, b => b.read_record(pos, range))
    }

    fn write_record(
        &mut self,
        pos: RegionPos,
        time: u32,
        payload: &[u8],
        sectors: u8,
    ) -> Result<()> {
        dispatch!(self, b => b.write_record(pos, time, payload, sectors))
    }

    fn set_timestamp(&mut self, pos: RegionPos, time: u32) -> Result<()> {
        dispatch!(self, b => b.set_timestamp(pos, time))
    }

    fn delete_record(&mut self, pos: RegionPos, range: SectorRange, erase: bool) -> Result<()> {
        dispatch!(self, b => b.delete_record(pos, range, erase))
    }

    fn flush(&mut self) -> Result<()> {
        dispatch!(self, b => b.flush())
    }

    fn close(self) -> Result<()> {
        dispatch!(self, b => b.close())
    }

    #[cfg(test)]
    fn medium_bytes(&self, range: SectorRange) -> Vec<u8> {
        dispatch!(self, b => b.medium_bytes(range))
    }
}

/// Rebuild the sector map from the offset table.
///
/// Invalid entries are skipped here and reported as corruption when read.
pub(crate) fn scan_header(header: &HeaderTable<&[u8]>) -> SectorMap {
    let mut map = SectorMap::new();
    map.rebuild(header.entries().filter_map(|(index, range)| {
        if range.is_valid() {
            Some(range)
        } else {
            warn!(
                "Skipping invalid offset entry at {}: sector {}, count {}",
                RegionPos::from_index(index),
                range.start,
                range.count
            );
            None
        }
    }));
    map
}

/// Where a record goes, and what it replaced.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Placement {
    pub range: SectorRange,
    pub previous: Option<SectorRange>,
    pub in_place: bool,
}

impl Placement {
    /// Reserve sectors for a record of `sectors` sectors replacing `previous`.
    ///
    /// An allocation of exactly the same size is reused. Otherwise the old
    /// range is released and the first free run that fits is reserved.
    pub fn allocate(map: &mut SectorMap, previous: Option<SectorRange>, sectors: u8) -> Self {
        let previous = previous.filter(|range| range.is_valid());

        if let Some(range) = previous
            && range.count == sectors
        {
            trace!("Reusing sectors {}..{} in place", range.start, range.end());
            return Self {
                range,
                previous,
                in_place: true,
            };
        }

        if let Some(old) = previous {
            map.mark_range(old.start as usize, old.count as usize, false);
        }

        let start = map.find_contiguous(sectors as usize);
        map.mark_range(start, sectors as usize, true);

        let range = SectorRange {
            start: start as u32,
            count: sectors,
        };
        trace!("Allocated sectors {}..{}", range.start, range.end());

        Self {
            range,
            previous,
            in_place: false,
        }
    }

    /// Undo the allocation after a failed write.
    pub fn revert(self, map: &mut SectorMap) {
        if !self.in_place {
            map.mark_range(self.range.start as usize, self.range.count as usize, false);
            if let Some(old) = self.previous {
                map.mark_range(old.start as usize, old.count as usize, true);
            }
        }
    }
}

/// Reject a payload that does not fit in `sectors` sectors.
pub(crate) fn check_fits(len: usize, sectors: u8) -> Result<()> {
    let needed = (len + LENGTH_PREFIX_BYTES).div_ceil(SECTOR_BYTES);
    if needed > sectors as usize {
        Err(RegionError::RecordTooLarge {
            len,
            sectors: needed,
            limit: sectors as usize,
        })
    } else {
        Ok(())
    }
}

/// Fill an allocation with the length prefix, the payload, and zero padding.
pub(crate) fn fill_record(dst: &mut [u8], payload: &[u8]) {
    let (prefix, rest) = dst.split_at_mut(LENGTH_PREFIX_BYTES);
    prefix.copy_from_slice(&(payload.len() as u32).to_be_bytes());
    rest[..payload.len()].copy_from_slice(payload);
    rest[payload.len()..].fill(0);
}

pub(crate) fn check_entry(pos: RegionPos, range: SectorRange) -> Result<()> {
    if range.is_valid() {
        Ok(())
    } else {
        Err(RegionError::Corrupted {
            pos,
            kind: Corruption::InvalidEntry {
                sector: range.start,
                count: range.count,
            },
        })
    }
}

/// Validate a stored length prefix against the allocation it lives in.
pub(crate) fn check_length(pos: RegionPos, range: SectorRange, length: u32) -> Result<usize> {
    let max = range.max_record_len();
    if length as usize > max {
        Err(RegionError::Corrupted {
            pos,
            kind: Corruption::LengthExceedsAllocation { length, max },
        })
    } else {
        Ok(length as usize)
    }
}

/// Check that a record ending at byte `end` lies within a medium of `len`
/// bytes. Padding after the payload may be missing.
pub(crate) fn check_bounds(pos: RegionPos, end: usize, len: usize) -> Result<()> {
    if end > len {
        Err(RegionError::Corrupted {
            pos,
            kind: Corruption::OutOfBounds {
                end: end as u64,
                file_len: len as u64,
            },
        })
    } else {
        Ok(())
    }
}

/// Locate the payload of the record at `range` inside an in-memory medium,
/// validating its length prefix against the allocation and the medium.
pub(crate) fn record_slice(medium: &[u8], pos: RegionPos, range: SectorRange) -> Result<&[u8]> {
    check_entry(pos, range)?;

    let start = range.byte_range().start;
    let payload = start + LENGTH_PREFIX_BYTES;
    check_bounds(pos, payload, medium.len())?;
    let length = check_length(pos, range, read_u32_be(&medium[start..]))?;
    check_bounds(pos, payload + length, medium.len())?;
    Ok(&medium[payload..payload + length])
}

pub(crate) fn read_u32_be(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Round a file length up to a whole number of sectors.
pub(crate) const fn sector_aligned(len: u64) -> u64 {
    len.div_ceil(SECTOR_BYTES as u64) * SECTOR_BYTES as u64
}

pub(crate) fn read_at(mut file: &File, buf: &mut [u8], pos: u64) -> io::Result<()> {
    file.seek(SeekFrom::Start(pos))?;
    file.read_exact(buf)
}

pub(crate) fn write_at(mut file: &File, buf: &[u8], pos: u64) -> io::Result<()> {
    file.seek(SeekFrom::Start(pos))?;
    file.write_all(buf)
}
