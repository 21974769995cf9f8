//! Random-access backend.
//!
//! The 8 KiB header stays memory-mapped for the lifetime of the backend, so
//! offset and timestamp updates are plain stores into the page cache. Record
//! bytes never go through a mapping: they are read and written with positioned
//! I/O on the file, through a scratch buffer sized to the allocation. This
//! avoids mapping a region that grows with every relocation.

use std::{fs::File, io};

use bytes::Bytes;
use memmap2::{Mmap, MmapMut, MmapOptions};
use tracing::debug;

use crate::{
    BackendKind, HEADER_BYTES, LENGTH_PREFIX_BYTES, RegionPos, SECTOR_BYTES,
    backend::{
        Placement, Record, RegionBackend, check_entry, check_fits, check_length, fill_record, read_at,
        scan_header, sector_aligned, write_at,
    },
    error::{Corruption, OpenError, RegionError, Result},
    header::{HeaderTable, SectorRange},
    sectors::SectorMap,
};

/// The mapped header, writable only when the file is.
enum HeaderMap {
    ReadOnly(Mmap),
    ReadWrite(MmapMut),
}

impl HeaderMap {
    fn bytes(&self) -> &[u8] {
        match self {
            HeaderMap::ReadOnly(map) => &map[..],
            HeaderMap::ReadWrite(map) => &map[..],
        }
    }

    fn bytes_mut(&mut self) -> Result<&mut [u8]> {
        match self {
            HeaderMap::ReadOnly(_) => Err(RegionError::ReadOnlyRegion),
            HeaderMap::ReadWrite(map) => Ok(&mut map[..]),
        }
    }

    fn flush(&self) -> io::Result<()> {
        match self {
            HeaderMap::ReadOnly(_) => Ok(()),
            HeaderMap::ReadWrite(map) => map.flush(),
        }
    }
}

pub struct DirectBackend {
    file: File,
    header: HeaderMap,
    sectors: SectorMap,
}

impl DirectBackend {
    /// Prepare the file and map its header.
    ///
    /// Writable files shorter than the header get a zeroed header, and files
    /// whose length is not a multiple of 4096 are padded. Read-only files are
    /// never modified, so a truncated header is an error.
    pub fn open(file: File, read_only: bool) -> Result<Self, OpenError> {
        let len = file.metadata()?.len();

        if len < HEADER_BYTES as u64 {
            if read_only {
                return Err(OpenError::TruncatedHeader { len });
            }
            write_at(&file, &[0; HEADER_BYTES], 0)?;
        } else if !read_only && len % SECTOR_BYTES as u64 != 0 {
            file.set_len(sector_aligned(len))?;
        }

        let header = if read_only {
            HeaderMap::ReadOnly(unsafe { MmapOptions::new().len(HEADER_BYTES).map(&file)? })
        } else {
            HeaderMap::ReadWrite(unsafe { MmapOptions::new().len(HEADER_BYTES).map_mut(&file)? })
        };

        let sectors = scan_header(&HeaderTable::new(header.bytes()));
        debug!(
            "Opened direct region backend ({} of {} sectors occupied)",
            sectors.occupied(),
            sectors.len()
        );

        Ok(Self {
            file,
            header,
            sectors,
        })
    }

    /// Positioned read that reports a short file as corruption.
    fn read_within(&self, pos: RegionPos, buf: &mut [u8], offset: u64) -> Result<()> {
        match read_at(&self.file, buf, offset) {
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(RegionError::Corrupted {
                pos,
                kind: Corruption::OutOfBounds {
                    end: offset + buf.len() as u64,
                    file_len: self.file.metadata()?.len(),
                },
            }),
            result => Ok(result?),
        }
    }
}

impl RegionBackend for DirectBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Direct
    }

    fn is_read_only(&self) -> bool {
        matches!(self.header, HeaderMap::ReadOnly(_))
    }

    fn header(&self) -> HeaderTable<&[u8]> {
        HeaderTable::new(self.header.bytes())
    }

    fn sectors(&self) -> &SectorMap {
        &self.sectors
    }

    /// Reads the length prefix, then exactly the payload. Padding is skipped.
    fn read_record(&self, pos: RegionPos, range: SectorRange) -> Result<Record<'_>> {
        check_entry(pos, range)?;

        let start = range.byte_offset();
        let mut prefix = [0u8; LENGTH_PREFIX_BYTES];
        self.read_within(pos, &mut prefix, start)?;
        let length = check_length(pos, range, u32::from_be_bytes(prefix))?;

        let mut payload = vec![0u8; length];
        self.read_within(pos, &mut payload, start + LENGTH_PREFIX_BYTES as u64)?;
        Ok(Record::Owned(Bytes::from(payload)))
    }

    fn write_record(
        &mut self,
        pos: RegionPos,
        time: u32,
        payload: &[u8],
        sectors: u8,
    ) -> Result<()> {
        check_fits(payload.len(), sectors)?;
        let mut header = HeaderTable::new(self.header.bytes_mut()?);
        let placement =
            Placement::allocate(&mut self.sectors, header.get_offset_entry(pos.index()), sectors);

        let mut scratch = vec![0u8; placement.range.byte_len()];
        fill_record(&mut scratch, payload);
        if let Err(e) = write_at(&self.file, &scratch, placement.range.byte_offset()) {
            placement.revert(&mut self.sectors);
            return Err(e.into());
        }

        if !placement.in_place {
            header.set_offset_entry(pos.index(), placement.range);
        }
        header.set_timestamp(pos.index(), time);
        Ok(())
    }

    fn set_timestamp(&mut self, pos: RegionPos, time: u32) -> Result<()> {
        HeaderTable::new(self.header.bytes_mut()?).set_timestamp(pos.index(), time);
        Ok(())
    }

    fn delete_record(&mut self, pos: RegionPos, range: SectorRange, erase: bool) -> Result<()> {
        let mut header = HeaderTable::new(self.header.bytes_mut()?);
        header.clear_offset_entry(pos.index());
        header.set_timestamp(pos.index(), 0);

        if !range.is_valid() {
            return Ok(());
        }

        self.sectors
            .mark_range(range.start as usize, range.count as usize, false);

        if erase {
            // only erase what exists, never grow the file with zeros.
            let file_len = self.file.metadata()?.len();
            let start = range.byte_offset();
            let end = (start + range.byte_len() as u64).min(file_len);
            if start < end {
                write_at(&self.file, &vec![0u8; (end - start) as usize], start)?;
            }
        }

        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.header.flush()?;
        if !self.is_read_only() {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Flushes when writable, then unmaps the header and closes the file.
    fn close(mut self) -> Result<()> {
        if !self.is_read_only() {
            self.flush()?;
        }
        debug!("Closed direct region backend");
        Ok(())
    }

    #[cfg(test)]
    fn medium_bytes(&self, range: SectorRange) -> Vec<u8> {
        let mut buf = vec![0u8; range.byte_len()];
        read_at(&self.file, &mut buf, range.byte_offset()).unwrap();
        buf
    }
}
