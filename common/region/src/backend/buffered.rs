//! Fully buffered backend.
//!
//! The whole file is read into one cache-line aligned buffer at open, padded
//! to a whole number of sectors. Reads, writes and deletes only touch that
//! buffer; `flush` writes all of it back in a single call when something
//! changed.
//!
//! `close` does NOT flush. Dropping the buffer without writing it back is a
//! supported way to discard changes, so callers that want them persisted
//! must call `flush` first. This differs from the direct backend on purpose.

use std::fs::File;

use aligned_vec::{AVec, CACHELINE_ALIGN};
use bytes::Bytes;
use tracing::{debug, warn};

use crate::{
    BackendKind, HEADER_BYTES, RegionPos,
    backend::{
        Placement, Record, RegionBackend, check_fits, fill_record, read_at, record_slice,
        scan_header, sector_aligned, write_at,
    },
    error::{OpenError, RegionError, Result},
    header::{HeaderTable, SectorRange},
    sectors::SectorMap,
};

pub struct BufferedBackend {
    file: File,

    /// File contents, always a whole number of sectors long.
    buf: AVec<u8>,

    sectors: SectorMap,
    read_only: bool,

    /// Whether `buf` differs from what is on disk.
    dirty: bool,
}

impl BufferedBackend {
    pub fn open(file: File, read_only: bool) -> Result<Self, OpenError> {
        let len = file.metadata()?.len();
        let mut buf = AVec::new(CACHELINE_ALIGN);

        let dirty = if len < HEADER_BYTES as u64 {
            if read_only {
                return Err(OpenError::TruncatedHeader { len });
            }
            // a partial header is discarded, like the direct backend does.
            buf.resize(HEADER_BYTES, 0);
            true
        } else {
            let padded = sector_aligned(len) as usize;
            buf.resize(padded, 0);
            read_at(&file, &mut buf[..len as usize], 0)?;
            !read_only && padded as u64 != len
        };

        let sectors = scan_header(&HeaderTable::new(&buf[..]));
        debug!(
            "Opened buffered region backend ({} bytes, {} sectors occupied)",
            buf.len(),
            sectors.occupied()
        );

        Ok(Self {
            file,
            buf,
            sectors,
            read_only,
            dirty,
        })
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only {
            Err(RegionError::ReadOnlyRegion)
        } else {
            Ok(())
        }
    }
}

impl RegionBackend for BufferedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Buffered
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn header(&self) -> HeaderTable<&[u8]> {
        HeaderTable::new(&self.buf[..])
    }

    fn sectors(&self) -> &SectorMap {
        &self.sectors
    }

    fn read_record(&self, pos: RegionPos, range: SectorRange) -> Result<Record<'_>> {
        let payload = record_slice(&self.buf, pos, range)?;
        Ok(Record::Owned(Bytes::copy_from_slice(payload)))
    }

    fn write_record(
        &mut self,
        pos: RegionPos,
        time: u32,
        payload: &[u8],
        sectors: u8,
    ) -> Result<()> {
        self.check_writable()?;
        check_fits(payload.len(), sectors)?;

        let previous = self.header().get_offset_entry(pos.index());
        let placement = Placement::allocate(&mut self.sectors, previous, sectors);
        let range = placement.range.byte_range();

        if range.end > self.buf.len() {
            self.buf.resize(range.end, 0);
        }
        fill_record(&mut self.buf[range], payload);

        let mut header = HeaderTable::new(&mut self.buf[..]);
        if !placement.in_place {
            header.set_offset_entry(pos.index(), placement.range);
        }
        header.set_timestamp(pos.index(), time);

        self.dirty = true;
        Ok(())
    }

    fn set_timestamp(&mut self, pos: RegionPos, time: u32) -> Result<()> {
        self.check_writable()?;
        HeaderTable::new(&mut self.buf[..]).set_timestamp(pos.index(), time);
        self.dirty = true;
        Ok(())
    }

    fn delete_record(&mut self, pos: RegionPos, range: SectorRange, erase: bool) -> Result<()> {
        self.check_writable()?;

        let mut header = HeaderTable::new(&mut self.buf[..]);
        header.clear_offset_entry(pos.index());
        header.set_timestamp(pos.index(), 0);
        self.dirty = true;

        if !range.is_valid() {
            return Ok(());
        }

        self.sectors
            .mark_range(range.start as usize, range.count as usize, false);

        if erase {
            let bytes = range.byte_range();
            let end = bytes.end.min(self.buf.len());
            if bytes.start < end {
                self.buf[bytes.start..end].fill(0);
            }
        }

        Ok(())
    }

    /// Write the whole buffer back in one call, if anything changed.
    fn flush(&mut self) -> Result<()> {
        self.check_writable()?;
        if self.dirty {
            write_at(&self.file, &self.buf, 0)?;
            self.file.sync_data()?;
            self.dirty = false;
        }
        Ok(())
    }

    /// Releases the buffer without writing it back.
    fn close(self) -> Result<()> {
        if self.is_dirty() {
            warn!(
                "Closing buffered region with unflushed changes, {} bytes discarded",
                self.buf.len()
            );
        }
        debug!("Closed buffered region backend");
        Ok(())
    }

    #[cfg(test)]
    fn medium_bytes(&self, range: SectorRange) -> Vec<u8> {
        self.buf[range.byte_range()].to_vec()
    }
}
