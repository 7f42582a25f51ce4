use std::fmt;
use std::io;
use std::path::Path;

use log::debug;

use crate::disk::bam::{Bam, BamFormat};
use crate::disk::block::{Block, BlockDevice, ImageBlockDevice, Location, PAYLOAD_SIZE};
use crate::disk::chain::{self, ChainReader};
use crate::disk::directory::{
    self, Directory, DirectoryEntry, DirectoryIterator, Extra, FileAttributes, FileType, GlobIterator,
};
use crate::disk::error::{ChainError, DiskError, GeometryError, WriteError};
use crate::disk::format::DiskFormat;
use crate::disk::geometry::{Geometry, GeometryVariant, TRACKS};
use crate::disk::header::{Header, HeaderFormat};
use crate::disk::image::Image;
use crate::disk::validation::{self, ValidationError};
use crate::disk::Id;
use crate::petscii::Petscii;

/// A description of the header format for 1541 disk images.
static HEADER_FORMAT: HeaderFormat = HeaderFormat {
    location: Location(18, 0),
    first_directory_offset: 0x00,
    dos_version_offset: 0x02,
    disk_name_offset: 0x90,
    disk_id_offset: 0xA2,
    dos_type_offset: 0xA5,
    padding_offsets: &[0xA0, 0xA1, 0xA4, 0xA7, 0xA8, 0xA9, 0xAA],
};

/// A description of the BAM format for 1541 disk images.
static BAM_FORMAT: BamFormat = BamFormat {
    location: Location(18, 0),
    entries_offset: 0x04,
    entry_stride: 4,
    bitmap_size: 3,
    tracks: 35,
};

/// A description of the disk format for 1541 disk images.
pub(crate) static DISK_FORMAT: DiskFormat = DiskFormat {
    directory_track: 18,
    first_directory_sector: 1,
    first_track: 1,
    last_track: 35,
    interleave: 10,
    directory_interleave: 3,
    tracks: &TRACKS,
    header: &HEADER_FORMAT,
    bam: &BAM_FORMAT,
};

/// Options which control how a disk image is opened.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DiskOptions {
    /// The expected layout of the image.
    pub geometry: GeometryVariant,
    /// The number of tracks whose BAM free sector counter may disagree with
    /// its bitmap before the image is rejected.
    pub bam_tolerance: usize,
}

impl DiskOptions {
    pub fn new() -> DiskOptions {
        DiskOptions::default()
    }

    pub fn geometry(mut self, geometry: GeometryVariant) -> DiskOptions {
        self.geometry = geometry;
        self
    }

    pub fn bam_tolerance(mut self, tracks: usize) -> DiskOptions {
        self.bam_tolerance = tracks;
        self
    }
}

/// A 1541 disk image in D64 format, along with its in-memory BAM.
///
/// All reads borrow the image, and everything that modifies it (writing,
/// deleting or renaming files, or changing the BAM) needs exclusive access.
/// BAM changes made through the file operations are written back to the
/// image before they return; changes made directly through `bam_mut()` are
/// only written by `flush()`.
pub struct DiskImage {
    blocks: ImageBlockDevice,
    bam: Bam,
}

impl DiskImage {
    fn new(image: Image, options: DiskOptions) -> Result<DiskImage, DiskError> {
        let blocks = ImageBlockDevice::new(image, options.geometry.geometry())?;
        let bam = Bam::load(&blocks, &DISK_FORMAT, options.bam_tolerance)?;
        debug!(
            "opened {}-track image {:?}, {} blocks free",
            blocks.geometry().tracks(),
            bam.header().disk_name,
            bam.blocks_free()
        );
        Ok(DiskImage { blocks, bam })
    }

    /// Open an in-memory image.  The buffer length must match the geometry.
    pub fn open(buffer: Vec<u8>, geometry: GeometryVariant) -> Result<DiskImage, DiskError> {
        Self::open_with_options(buffer, DiskOptions::new().geometry(geometry))
    }

    pub fn open_with_options(buffer: Vec<u8>, options: DiskOptions) -> Result<DiskImage, DiskError> {
        Self::new(Image::from_vec(buffer), options)
    }

    /// Open an existing disk image file as read-only (if `writable` is false)
    /// or read-write (if `writable` is true).  The geometry is chosen by the
    /// file size; `options.geometry` only applies when the size matches no
    /// known layout, and so produces a size mismatch error.
    pub fn open_path<P: AsRef<Path>>(
        path: P,
        writable: bool,
        options: DiskOptions,
    ) -> Result<DiskImage, DiskError> {
        let image = if writable {
            Image::open_read_write(path)?
        } else {
            Image::open_read_only(path)?
        };
        let geometry = GeometryVariant::from_size(image.len()).unwrap_or(options.geometry);
        Self::new(image, options.geometry(geometry))
    }

    #[inline]
    pub fn geometry(&self) -> &'static Geometry {
        self.blocks.geometry()
    }

    #[inline]
    pub fn format(&self) -> &'static DiskFormat {
        self.bam.format()
    }

    #[inline]
    pub fn blocks(&self) -> &dyn BlockDevice {
        &self.blocks
    }

    #[inline]
    pub fn bam(&self) -> &Bam {
        &self.bam
    }

    #[inline]
    pub fn bam_mut(&mut self) -> &mut Bam {
        &mut self.bam
    }

    #[inline]
    pub fn header(&self) -> &Header {
        self.bam.header()
    }

    /// Return the name of this disk as found in the disk header.
    #[inline]
    pub fn name(&self) -> &Petscii {
        &self.header().disk_name
    }

    #[inline]
    pub fn id(&self) -> Id {
        self.header().disk_id
    }

    #[inline]
    pub fn dos_type(&self) -> Id {
        self.header().dos_type
    }

    /// Return the blocks free based on the BAM free sector counts.
    /// (Not based on the BAM bitmaps, nor on the file sizes in the directory
    /// entries.)
    #[inline]
    pub fn blocks_free(&self) -> usize {
        self.bam.blocks_free()
    }

    pub fn directory(&self) -> Directory<'_> {
        Directory::open(&self.blocks, &self.bam)
    }

    /// Return an iterator of directory entries found on this disk image.
    pub fn iterdir(&self, include_deleted: bool) -> DirectoryIterator<'_> {
        self.directory().iter(include_deleted)
    }

    pub fn glob(&self, pattern: &str, include_deleted: bool) -> GlobIterator<'_> {
        self.directory().glob(pattern, include_deleted)
    }

    /// Locate a live file based on its filename.
    pub fn path<N: Into<Petscii>>(&self, name: N) -> Result<DirectoryEntry, DiskError> {
        self.directory().path(name)
    }

    pub fn read_file(&self, entry: &DirectoryEntry) -> Result<Vec<u8>, ChainError> {
        chain::read_all(&self.blocks, entry.first_sector)
    }

    /// Stream a file's contents rather than reading it all at once.
    pub fn reader(&self, entry: &DirectoryEntry) -> ChainReader<'_> {
        ChainReader::new(&self.blocks, entry.first_sector)
    }

    pub fn size_bytes(&self, entry: &DirectoryEntry) -> Result<usize, ChainError> {
        self.directory().size_bytes(entry)
    }

    /// Confirm that no live directory entry currently exists with the
    /// provided filename.
    fn check_filename_availability(&self, filename: &Petscii) -> Result<(), WriteError> {
        for entry in self.iterdir(false) {
            if entry?.filename == *filename {
                return Err(WriteError::FileExists(filename.clone()));
            }
        }
        Ok(())
    }

    /// Create a new file containing `data`.  The data chain is written first,
    /// then a directory slot is claimed; if no slot can be found, the data
    /// blocks are released again.  The BAM is flushed on success.
    pub fn write_file<N: Into<Petscii>>(
        &mut self,
        name: N,
        file_type: FileType,
        data: &[u8],
    ) -> Result<DirectoryEntry, WriteError> {
        let name = name.into();
        self.blocks.check_writability()?;
        match file_type {
            FileType::SEQ | FileType::PRG | FileType::USR => {}
            other => return Err(WriteError::UnsupportedFileType(other)),
        }
        directory::check_filename_validity(&name)?;
        self.check_filename_availability(&name)?;

        let first_sector = chain::write_all(&mut self.blocks, &mut self.bam, data)?;
        let mut entry = match directory::next_free_directory_entry(&mut self.blocks, &mut self.bam) {
            Ok(entry) => entry,
            Err(e) => {
                chain::remove_chain(&self.blocks, &mut self.bam, first_sector)?;
                return Err(e);
            }
        };

        let blocks = std::cmp::max(1, (data.len() + PAYLOAD_SIZE - 1) / PAYLOAD_SIZE);
        entry.file_attributes = FileAttributes::new(file_type);
        entry.first_sector = first_sector;
        entry.filename = name;
        entry.extra = Extra::default();
        entry.file_size = blocks as u16;
        self.blocks.positioned_write(&entry)?;
        self.bam.flush(&mut self.blocks)?;
        debug!(
            "wrote {:?}: {} bytes in {} blocks from {}",
            entry.filename,
            data.len(),
            blocks,
            first_sector
        );
        Ok(entry)
    }

    /// Delete ("scratch") a file.  Its blocks are returned to the BAM and its
    /// file type byte is cleared, but the rest of the entry is left in place,
    /// so it is still listed when deleted entries are requested.
    pub fn delete<N: Into<Petscii>>(&mut self, name: N) -> Result<(), DiskError> {
        self.blocks.check_writability()?;
        let mut entry = self.path(name)?;
        let mut starts = vec![entry.first_sector];
        starts.extend(entry.extra.side_sectors());
        let freed = chain::remove_chains(&self.blocks, &mut self.bam, &starts)?;
        entry.file_attributes = FileAttributes::from_byte(0);
        self.blocks.positioned_write(&entry)?;
        self.bam.flush(&mut self.blocks)?;
        debug!("deleted {:?}, {} blocks freed", entry.filename, freed);
        Ok(())
    }

    /// Rename a file.
    pub fn rename<N: Into<Petscii>, M: Into<Petscii>>(&mut self, original: N, new: M) -> Result<(), DiskError> {
        self.blocks.check_writability()?;
        let new = new.into();
        let mut entry = self.path(original)?;
        directory::check_filename_validity(&new)?;
        self.check_filename_availability(&new)?;

        debug!("renaming {:?} to {:?}", entry.filename, new);
        entry.filename = new;
        self.blocks.positioned_write(&entry)?;
        Ok(())
    }

    /// Check the consistency of the disk image.  Unlike the "validate" ("v0:")
    /// command in CBM DOS, this is a read-only operation and does not
    /// attempt any repairs.  A list of validation errors is returned.
    pub fn validate(&self) -> Vec<ValidationError> {
        validation::validate(&self.blocks, &self.bam)
    }

    /// Write the BAM back to the image, and flush a memory-mapped file.
    pub fn flush(&mut self) -> Result<(), DiskError> {
        self.bam.flush(&mut self.blocks)?;
        self.blocks.flush()
    }

    /// The raw image, e.g. for saving an in-memory image to a file.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        self.blocks.image().as_slice()
    }

    pub fn block(&self, location: Location) -> Result<Block<&[u8]>, GeometryError> {
        Block::at(&self.blocks, location)
    }

    pub fn block_mut(&mut self, location: Location) -> Result<Block<&mut [u8]>, WriteError> {
        Block::at_mut(&mut self.blocks, location)
    }

    /// Write a hex dump of the disk image to the provided writer.
    pub fn dump(&self, writer: &mut dyn io::Write) -> io::Result<()> {
        self.blocks.dump(writer)
    }
}

impl fmt::Display for DiskImage {
    /// The header line of a directory listing.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let header = self.header();
        write!(
            f,
            "{} \"{:16}\" {} {}",
            0, header.disk_name, header.disk_id, header.dos_type
        )
    }
}

impl fmt::Debug for DiskImage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{:?}", self.header())?;
        write!(f, "{:?}", self.bam)
    }
}
