use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use tracing::{debug, warn};

use crate::{
    Access, BackendKind, RegionOpenOptions, RegionPos,
    backend::{Backend, Record, RegionBackend},
    error::{OpenError, RegionError, Result},
    header::SectorRange,
    sectors::SectorMap,
    sectors_for,
};

/// An open region file.
///
/// Reads take `&self` and mutations take `&mut self`, so one instance is
/// used by one thread at a time. Share it behind a lock.
///
/// Closing happens on drop if [`RegionFile::close`] was not called. Errors
/// from that implicit close are only logged.
pub struct RegionFile {
    path: PathBuf,
    kind: BackendKind,

    /// Effective access. `WriteOptional` resolves to one of the other two.
    access: Access,

    /// `None` once closed.
    backend: Option<Backend>,
}

impl RegionFile {
    pub fn open(path: impl AsRef<Path>, options: RegionOpenOptions) -> Result<Self, OpenError> {
        options.validate()?;
        let path = path.as_ref().to_path_buf();

        if options.create
            && let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let (file, access) = match (options.backend, options.access) {
            (_, Access::ReadOnly) => (File::open(&path)?, Access::ReadOnly),
            // the mapped backend only ever needs a read handle.
            (BackendKind::Mapped, _) => (File::open(&path)?, Access::ReadWrite),
            (_, Access::ReadWrite) => (open_writable(&path, options.create)?, Access::ReadWrite),
            (_, Access::WriteOptional) => match open_writable(&path, options.create) {
                Ok(file) => (file, Access::ReadWrite),
                Err(e) if is_write_denied(&e) => {
                    warn!(
                        "Write access to region '{}' denied ({e}), opening read-only",
                        path.display()
                    );
                    (File::open(&path)?, Access::ReadOnly)
                }
                Err(e) => return Err(e.into()),
            },
        };

        let len = file.metadata()?.len();
        let backend = Backend::open(options.backend, file, access == Access::ReadOnly)?;
        debug!(
            "Opened region '{}' with {:?} backend, {:?} access ({len} bytes, {} sectors occupied)",
            path.display(),
            options.backend,
            access,
            backend.sectors().occupied()
        );

        Ok(Self {
            path,
            kind: options.backend,
            access,
            backend: Some(backend),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backend(&self) -> BackendKind {
        self.kind
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn is_open(&self) -> bool {
        self.backend.is_some()
    }

    /// Whether mutations are rejected. A closed file counts as read-only.
    pub fn is_read_only(&self) -> bool {
        match &self.backend {
            Some(backend) => self.access == Access::ReadOnly || backend.is_read_only(),
            None => true,
        }
    }

    /// Read the payload stored at `(x, z)`, or `None` if there is none.
    ///
    /// Mapped files return a borrow of the mapping, other backends a copy.
    pub fn read(&self, x: i32, z: i32) -> Result<Option<Record<'_>>> {
        let pos = RegionPos::new(x, z)?;
        let backend = self.open_backend()?;
        match backend.header().get_offset_entry(pos.index()) {
            Some(range) => backend.read_record(pos, range).map(Some),
            None => Ok(None),
        }
    }

    /// Store `bytes` at `(x, z)` with modification time `time` in Unix seconds.
    ///
    /// A record that keeps its sector count is rewritten in place. Otherwise
    /// it moves to the first free run that fits.
    pub fn write(&mut self, x: i32, z: i32, time: u32, bytes: &[u8]) -> Result<()> {
        let pos = RegionPos::new(x, z)?;
        let backend = self.writable_backend("write")?;
        let sectors = sectors_for(bytes.len())?;
        backend.write_record(pos, time, bytes, sectors)
    }

    /// [`RegionFile::write`] stamped with the current system time.
    pub fn write_now(&mut self, x: i32, z: i32, bytes: &[u8]) -> Result<()> {
        self.write(x, z, unix_now(), bytes)
    }

    /// Change the modification time of the record at `(x, z)` without
    /// rewriting it. Returns `false`, touching nothing, if there is no record.
    pub fn set_timestamp(&mut self, x: i32, z: i32, time: u32) -> Result<bool> {
        let pos = RegionPos::new(x, z)?;
        let backend = self.writable_backend("set_timestamp")?;
        if backend.header().get_offset_entry(pos.index()).is_none() {
            return Ok(false);
        }
        backend.set_timestamp(pos, time)?;
        Ok(true)
    }

    /// [`RegionFile::set_timestamp`] with the current system time.
    pub fn touch(&mut self, x: i32, z: i32) -> Result<bool> {
        self.set_timestamp(x, z, unix_now())
    }

    /// Write only if there is no record at `(x, z)` or it is older than `time`.
    /// Returns whether anything was written.
    pub fn write_if_newer(&mut self, x: i32, z: i32, time: u32, bytes: &[u8]) -> Result<bool> {
        if let Some(stored) = self.timestamp(x, z)?
            && stored >= time
        {
            return Ok(false);
        }
        self.write(x, z, time, bytes)?;
        Ok(true)
    }

    /// Remove the record at `(x, z)`, returning whether there was one.
    ///
    /// With `erase`, the freed sectors are zero-filled on the medium too.
    pub fn delete(&mut self, x: i32, z: i32, erase: bool) -> Result<bool> {
        let pos = RegionPos::new(x, z)?;
        let backend = self.writable_backend("delete")?;
        let entry = backend.header().get_offset_entry(pos.index());
        match entry {
            Some(range) => {
                backend.delete_record(pos, range, erase)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writable_backend("flush")?.flush()
    }

    /// Release the backend. Direct files are flushed first; buffered files
    /// are NOT, so call [`RegionFile::flush`] before closing one.
    pub fn close(&mut self) -> Result<()> {
        let backend = self.backend.take().ok_or(RegionError::ClosedRegion)?;
        debug!("Closing region '{}'", self.path.display());
        backend.close()
    }

    pub fn contains(&self, x: i32, z: i32) -> Result<bool> {
        Ok(self.entry(x, z)?.is_some())
    }

    /// Stored modification time of the record at `(x, z)`, if present.
    pub fn timestamp(&self, x: i32, z: i32) -> Result<Option<u32>> {
        let pos = RegionPos::new(x, z)?;
        let header = self.open_backend()?.header();
        Ok(header
            .get_offset_entry(pos.index())
            .map(|_| header.get_timestamp(pos.index())))
    }

    /// The raw offset entry at `(x, z)`.
    pub fn entry(&self, x: i32, z: i32) -> Result<Option<SectorRange>> {
        let pos = RegionPos::new(x, z)?;
        Ok(self.open_backend()?.header().get_offset_entry(pos.index()))
    }

    /// Snapshot of which sectors are in use.
    pub fn occupied_sectors(&self) -> Result<SectorMap> {
        Ok(self.open_backend()?.sectors().clone())
    }

    fn open_backend(&self) -> Result<&Backend> {
        self.backend.as_ref().ok_or(RegionError::ClosedRegion)
    }

    fn writable_backend(&mut self, op: &'static str) -> Result<&mut Backend> {
        let backend = self.backend.as_mut().ok_or(RegionError::ClosedRegion)?;
        if self.access == Access::ReadOnly {
            Err(RegionError::ReadOnlyRegion)
        } else if backend.is_read_only() {
            Err(RegionError::UnsupportedOperation {
                backend: backend.kind(),
                op,
            })
        } else {
            Ok(backend)
        }
    }

    #[cfg(test)]
    fn medium_bytes(&self, range: SectorRange) -> Vec<u8> {
        self.open_backend().unwrap().medium_bytes(range)
    }
}

impl Drop for RegionFile {
    fn drop(&mut self) {
        if self.is_open()
            && let Err(e) = self.close()
        {
            warn!("Failed to close region '{}': {e}", self.path.display());
        }
    }
}

fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs() as u32)
}

fn open_writable(path: &Path, create: bool) -> io::Result<File> {
    File::options()
        .read(true)
        .write(true)
        .create(create)
        .open(path)
}

fn is_write_denied(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::PermissionDenied | io::ErrorKind::ReadOnlyFilesystem
    )
}
