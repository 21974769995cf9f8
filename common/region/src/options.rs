use serde::{Deserialize, Serialize};

use crate::error::OpenError;

/// I/O strategy used for a region file.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Positioned reads and writes, with the header memory-mapped.
    #[default]
    Direct,

    /// Whole file held in memory, written back in one go on flush.
    Buffered,

    /// Whole file memory-mapped read-only. Never writes.
    Mapped,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    /// Open for reading and writing, failing if write access is denied.
    #[default]
    ReadWrite,

    /// Try read-write, fall back to read-only if the OS refuses.
    WriteOptional,

    ReadOnly,
}

/// How to open a region file.
///
/// Can be built in code or read from a TOML table:
///
/// ```toml
/// backend = "buffered"
/// access = "read_write"
/// create = true
/// ```
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionOpenOptions {
    pub backend: BackendKind,
    pub access: Access,

    /// Create the file, and its parent directories, if it does not exist.
    pub create: bool,
}

impl RegionOpenOptions {
    pub fn new(backend: BackendKind, access: Access) -> Self {
        Self {
            backend,
            access,
            create: false,
        }
    }

    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub fn from_toml(src: &str) -> Result<Self, OpenError> {
        Ok(toml::from_str(src)?)
    }

    /// Reject combinations no backend can honour.
    pub fn validate(&self) -> Result<(), OpenError> {
        let reason = if self.create && self.access == Access::ReadOnly {
            "cannot create a file that is opened read-only"
        } else if self.create && self.backend == BackendKind::Mapped {
            "the mapped backend never writes, so it cannot create files"
        } else {
            return Ok(());
        };

        Err(OpenError::UnsupportedOpenMode {
            backend: self.backend,
            access: self.access,
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::error::OpenError;

    use super::{Access, BackendKind, RegionOpenOptions};

    #[test]
    fn defaults() {
        let options = RegionOpenOptions::default();
        assert_eq!(options.backend, BackendKind::Direct);
        assert_eq!(options.access, Access::ReadWrite);
        assert!(!options.create);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn from_toml() {
        let options = RegionOpenOptions::from_toml(
            r#"
            backend = "buffered"
            access = "write_optional"
            create = true
            "#,
        )
        .unwrap();
        assert_eq!(
            options,
            RegionOpenOptions::new(BackendKind::Buffered, Access::WriteOptional).create(true)
        );

        // missing keys fall back to defaults
        let options = RegionOpenOptions::from_toml(r#"backend = "mapped""#).unwrap();
        assert_eq!(options.backend, BackendKind::Mapped);
        assert_eq!(options.access, Access::ReadWrite);

        assert!(matches!(
            RegionOpenOptions::from_toml(r#"backend = "tape""#),
            Err(OpenError::Config(_))
        ));
    }

    #[test]
    fn invalid_combinations() {
        let create_ro = RegionOpenOptions::default()
            .access(Access::ReadOnly)
            .create(true);
        assert!(matches!(
            create_ro.validate(),
            Err(OpenError::UnsupportedOpenMode { .. })
        ));

        let create_mapped = RegionOpenOptions::default()
            .backend(BackendKind::Mapped)
            .create(true);
        assert!(matches!(
            create_mapped.validate(),
            Err(OpenError::UnsupportedOpenMode { .. })
        ));

        assert!(
            RegionOpenOptions::new(BackendKind::Mapped, Access::ReadWrite)
                .validate()
                .is_ok()
        );
    }
}
