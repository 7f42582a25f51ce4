use std::io;

use thiserror::Error;

use crate::disk::block::Location;
use crate::disk::directory::FileType;
use crate::petscii::Petscii;

/// Addressing errors: a track or sector that doesn't exist in the image's
/// geometry, or a buffer whose length matches no supported geometry.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum GeometryError {
    /// Track 0, or a track beyond the last track of the geometry.
    #[error("track {track} out of range (1..={max})")]
    TrackOutOfRange { track: u8, max: u8 },
    /// A sector number at or beyond the number of sectors on its track.
    #[error("sector {sector} out of range for track {track} ({sectors} sectors)")]
    SectorOutOfRange { track: u8, sector: u8, sectors: u8 },
    /// The backing buffer has the wrong length for the requested geometry.
    #[error("image is {actual} bytes, expected {expected}")]
    BufferSizeMismatch { expected: usize, actual: usize },
}

/// Errors found while following a sector chain.  These are local to the
/// chain being followed: a broken file never prevents reading other files.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum ChainError {
    /// The chain's first location lies outside the geometry.
    #[error("chain starts outside the disk at {0}")]
    InvalidStart(Location),
    /// A block links to a location outside the geometry.
    #[error("broken chain link from {from} to {to}")]
    BrokenLink { from: Location, to: Location },
    /// A location was visited twice in the same traversal.
    #[error("chain loop detected at {0}")]
    Cycle(Location),
    /// A tail block whose used-bytes field is zero.
    #[error("invalid chain terminator {byte:#04x} at {location}")]
    InvalidTerminator { location: Location, byte: u8 },
}

/// The reason a BAM was rejected as inconsistent.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum Inconsistency {
    /// These tracks have a free counter that disagrees with their bitmap.
    #[error("free sector count disagrees with bitmap on tracks {tracks:?}")]
    FreeCountMismatch { tracks: Vec<u8> },
    /// The directory root pointer is not a valid location.
    #[error("directory root {0} is outside the disk")]
    DirectoryRoot(Location),
}

#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum BamError {
    #[error("inconsistent BAM: {0}")]
    Inconsistent(Inconsistency),
    #[error("disk full")]
    Full,
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

/// Errors from operations that modify the image.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum WriteError {
    /// No free directory slot exists and the directory track is full.
    #[error("directory full")]
    DirectoryFull,
    #[error("filename exceeds 16 bytes")]
    FilenameTooLong,
    #[error("a file named \"{0}\" already exists")]
    FileExists(Petscii),
    #[error("cannot write files of type {0}")]
    UnsupportedFileType(FileType),
    #[error("write access attempted to read-only media")]
    ReadOnly,
    /// More data than fits in one block after its link.
    #[error("payload of {0} bytes exceeds the 254 bytes of a block")]
    PayloadTooLong(usize),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Bam(#[from] BamError),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

/// The error type for `DiskImage` operations which may fail for several
/// reasons at once.
#[derive(Error, Debug)]
pub enum DiskError {
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Bam(#[from] BamError),
    #[error(transparent)]
    Write(#[from] WriteError),
    /// No directory entry carries the requested name.
    #[error("file not found: \"{0}\"")]
    NotFound(Petscii),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl DiskError {
    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, DiskError::NotFound(_))
    }
}

impl From<ChainError> for io::Error {
    fn from(error: ChainError) -> io::Error {
        io::Error::new(io::ErrorKind::InvalidData, error)
    }
}

impl From<DiskError> for io::Error {
    fn from(error: DiskError) -> io::Error {
        use std::io::ErrorKind::*;
        match error {
            DiskError::Io(e) => e,
            DiskError::NotFound(_) => io::Error::new(NotFound, error),
            DiskError::Geometry(_) => io::Error::new(InvalidInput, error),
            DiskError::Chain(_) | DiskError::Bam(BamError::Inconsistent(_)) => {
                io::Error::new(InvalidData, error)
            }
            DiskError::Write(WriteError::ReadOnly) => io::Error::new(PermissionDenied, error),
            DiskError::Bam(_) | DiskError::Write(_) => io::Error::new(Other, error),
        }
    }
}
