//! Traits, structs, and functions relating to 1541 disk images.

mod bam;
mod block;
mod d64;
mod error;
mod format;
mod geometry;
mod header;
mod image;
mod pattern;
mod validation;

pub mod chain;
pub mod directory;

use std::fmt;

use crate::petscii::Petscii;

pub use self::bam::{Bam, BamEntry, BamFormat};
pub use self::block::{
    Block, BlockDevice, ChainLink, ImageBlockDevice, Location, Position, PositionedData, BLOCK_SIZE,
    PAYLOAD_SIZE,
};
pub use self::d64::{DiskImage, DiskOptions};
pub use self::directory::{Directory, DirectoryEntry, FileType};
pub use self::error::{BamError, ChainError, DiskError, GeometryError, Inconsistency, WriteError};
pub use self::format::DiskFormat;
pub use self::geometry::{Geometry, GeometryVariant, LocationIterator, Track};
pub use self::header::{Header, HeaderFormat};
pub use self::image::Image;
pub use self::pattern::Pattern;
pub use self::validation::ValidationError;

pub(crate) const PADDING_BYTE: u8 = 0xa0; // For padding filenames, disk name, etc.
pub(crate) const DISK_NAME_SIZE: usize = 16;

/// Various fields in CBM DOS are two-byte identifiers which are frequently
/// shown as Petscii strings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Id([u8; 2]);

impl Id {
    /// Best-effort only.  Use the first two bytes for the Id, using zeros
    /// for any byte not present.
    pub fn from_bytes(bytes: &[u8]) -> Id {
        Id([
            bytes.first().copied().unwrap_or(0),
            bytes.get(1).copied().unwrap_or(0),
        ])
    }
}

impl From<Id> for Petscii {
    fn from(id: Id) -> Petscii {
        Petscii::from_bytes(&id.0)
    }
}

impl AsRef<[u8]> for Id {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl<'a> From<&'a [u8]> for Id {
    fn from(bytes: &[u8]) -> Id {
        Id::from_bytes(bytes)
    }
}

impl From<Petscii> for Id {
    fn from(petscii: Petscii) -> Id {
        Id::from_bytes(petscii.as_bytes())
    }
}

impl<'a> From<&'a str> for Id {
    fn from(string: &str) -> Id {
        Petscii::from(string).into()
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", Petscii::from_bytes(&self.0))
    }
}
