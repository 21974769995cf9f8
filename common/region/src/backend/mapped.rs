//! Read-only memory-mapped backend.
//!
//! The whole file is mapped once at open. Reads hand out slices of the mapping
//! without copying. There is no writable variant: every mutating operation
//! fails with `UnsupportedOperation`.

use std::fs::File;

use memmap2::Mmap;
use tracing::debug;

use crate::{
    BackendKind, HEADER_BYTES, RegionPos,
    backend::{
        Record, RegionBackend, record_slice, scan_header,
    },
    error::{OpenError, RegionError, Result},
    header::{HeaderTable, SectorRange},
    sectors::SectorMap,
};

pub struct MappedBackend {
    map: Mmap,
    sectors: SectorMap,
}

impl MappedBackend {
    /// Map `file`, which must already hold a complete header.
    ///
    /// The file handle is not kept; the mapping stays valid without it.
    pub fn open(file: File) -> Result<Self, OpenError> {
        let len = file.metadata()?.len();
        if len < HEADER_BYTES as u64 {
            return Err(OpenError::TruncatedHeader { len });
        }

        let map = unsafe { Mmap::map(&file)? };
        let sectors = scan_header(&HeaderTable::new(&map[..]));
        debug!(
            "Opened mapped region backend ({} bytes, {} sectors occupied)",
            map.len(),
            sectors.occupied()
        );

        Ok(Self { map, sectors })
    }

    fn unsupported(op: &'static str) -> RegionError {
        RegionError::UnsupportedOperation {
            backend: BackendKind::Mapped,
            op,
        }
    }
}

impl RegionBackend for MappedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Mapped
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn header(&self) -> HeaderTable<&[u8]> {
        HeaderTable::new(&self.map[..])
    }

    fn sectors(&self) -> &SectorMap {
        &self.sectors
    }

    /// Zero-copy: the record borrows the mapping.
    fn read_record(&self, pos: RegionPos, range: SectorRange) -> Result<Record<'_>> {
        record_slice(&self.map, pos, range).map(Record::Mapped)
    }

    fn write_record(&mut self, _: RegionPos, _: u32, _: &[u8], _: u8) -> Result<()> {
        Err(Self::unsupported("write"))
    }

    fn set_timestamp(&mut self, _: RegionPos, _: u32) -> Result<()> {
        Err(Self::unsupported("set_timestamp"))
    }

    fn delete_record(&mut self, _: RegionPos, _: SectorRange, _: bool) -> Result<()> {
        Err(Self::unsupported("delete"))
    }

    fn flush(&mut self) -> Result<()> {
        Err(Self::unsupported("flush"))
    }

    fn close(self) -> Result<()> {
        debug!("Closed mapped region backend");
        Ok(())
    }

    #[cfg(test)]
    fn medium_bytes(&self, range: SectorRange) -> Vec<u8> {
        self.map[range.byte_range()].to_vec()
    }
}
