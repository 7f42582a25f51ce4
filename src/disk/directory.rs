//! CBM DOS directories

use std::fmt;
use std::fmt::Write;

use log::debug;

use crate::disk::bam::Bam;
use crate::disk::block::{Block, BlockDevice, Location, Position, PositionedData, PAYLOAD_SIZE};
use crate::disk::chain::{self, ChainIterator};
use crate::disk::error::{BamError, ChainError, DiskError, WriteError};
use crate::disk::pattern::Pattern;
use crate::disk::PADDING_BYTE;
use crate::petscii::Petscii;

const FILE_TYPE_DEL: u8 = 0x00;
const FILE_TYPE_SEQ: u8 = 0x01;
const FILE_TYPE_PRG: u8 = 0x02;
const FILE_TYPE_USR: u8 = 0x03;
const FILE_TYPE_REL: u8 = 0x04;
const FILE_ATTRIB_FILE_TYPE_MASK: u8 = 0x0F;
const FILE_ATTRIB_UNUSED_MASK: u8 = 0x10;
const FILE_ATTRIB_SAVE_WITH_REPLACE_MASK: u8 = 0x20;
const FILE_ATTRIB_LOCKED_MASK: u8 = 0x40;
const FILE_ATTRIB_CLOSED_MASK: u8 = 0x80;

/// A directory entry categorizes files as SEQ, PRG, USR, or REL, along with a
/// pseudo-file-type of DEL to indicate deleted files.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum FileType {
    DEL,
    SEQ,
    PRG,
    USR,
    REL,
    Unknown(u8),
}

impl FileType {
    /// Parse a file type name such as "prg" (in either case).
    pub fn from_string(string: &str) -> Option<FileType> {
        match string.to_uppercase().as_str() {
            "DEL" => Some(FileType::DEL),
            "SEQ" => Some(FileType::SEQ),
            "PRG" => Some(FileType::PRG),
            "USR" => Some(FileType::USR),
            "REL" => Some(FileType::REL),
            _ => None,
        }
    }

    /// Parse the single-letter form used in patterns like `"*=S"`.
    pub fn from_letter(letter: u8) -> Option<FileType> {
        match letter.to_ascii_uppercase() {
            b'D' => Some(FileType::DEL),
            b'S' => Some(FileType::SEQ),
            b'P' => Some(FileType::PRG),
            b'U' => Some(FileType::USR),
            b'R' => Some(FileType::REL),
            _ => None,
        }
    }

    pub fn letter(&self) -> u8 {
        match self {
            FileType::DEL => b'D',
            FileType::SEQ => b'S',
            FileType::PRG => b'P',
            FileType::USR => b'U',
            FileType::REL => b'R',
            FileType::Unknown(_) => b'?',
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            FileType::DEL => "del",
            FileType::SEQ => "seq",
            FileType::PRG => "prg",
            FileType::USR => "usr",
            FileType::REL => "rel",
            FileType::Unknown(_) => "unk",
        })
    }
}

/// We introduce the term "file attributes" to refer to the full 8-bit
/// directory entry field which contains the file type along with several flags.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FileAttributes {
    /// Bits 0-3 indicate the file type.
    pub file_type: FileType,
    /// Bit 4 is unused, but we store it anyway so we can reproduce this field
    /// verbatim.
    pub unused_bit: bool,
    /// Bit 5 is the "save with replace" flag.
    pub save_with_replace_flag: bool,
    /// Bit 6 is the "locked" flag, indicated by a "<" in directory listings.
    pub locked_flag: bool,
    /// Bit 7 is the "closed" flag.  Files are normally closed, so this bit is
    /// normally set. Unclosed files are indicated in directory listings
    /// with a "*", leading to such files being known as "splat files".
    pub closed_flag: bool,
}

impl FileAttributes {
    /// The attributes of a freshly written, closed file.
    pub fn new(file_type: FileType) -> FileAttributes {
        FileAttributes {
            file_type,
            unused_bit: false,
            save_with_replace_flag: false,
            locked_flag: false,
            closed_flag: true,
        }
    }

    /// Parse a byte into a `FileAttributes` struct.
    pub fn from_byte(byte: u8) -> FileAttributes {
        let file_type = match byte & FILE_ATTRIB_FILE_TYPE_MASK {
            FILE_TYPE_DEL => FileType::DEL,
            FILE_TYPE_SEQ => FileType::SEQ,
            FILE_TYPE_PRG => FileType::PRG,
            FILE_TYPE_USR => FileType::USR,
            FILE_TYPE_REL => FileType::REL,
            b => FileType::Unknown(b),
        };
        FileAttributes {
            file_type,
            unused_bit: byte & FILE_ATTRIB_UNUSED_MASK != 0,
            save_with_replace_flag: byte & FILE_ATTRIB_SAVE_WITH_REPLACE_MASK != 0,
            locked_flag: byte & FILE_ATTRIB_LOCKED_MASK != 0,
            closed_flag: byte & FILE_ATTRIB_CLOSED_MASK != 0,
        }
    }

    /// Generate the byte which encodes this `FileAttributes` struct.
    pub fn to_byte(&self) -> u8 {
        let mut byte = match self.file_type {
            FileType::DEL => FILE_TYPE_DEL,
            FileType::SEQ => FILE_TYPE_SEQ,
            FileType::PRG => FILE_TYPE_PRG,
            FileType::USR => FILE_TYPE_USR,
            FileType::REL => FILE_TYPE_REL,
            FileType::Unknown(b) => b & FILE_ATTRIB_FILE_TYPE_MASK,
        };
        if self.unused_bit {
            byte |= FILE_ATTRIB_UNUSED_MASK;
        }
        if self.save_with_replace_flag {
            byte |= FILE_ATTRIB_SAVE_WITH_REPLACE_MASK;
        }
        if self.locked_flag {
            byte |= FILE_ATTRIB_LOCKED_MASK;
        }
        if self.closed_flag {
            byte |= FILE_ATTRIB_CLOSED_MASK;
        }
        byte
    }

    /// A file-type byte of zero marks a slot with no live file in it.
    #[inline]
    pub fn is_scratched(&self) -> bool {
        self.to_byte() == 0
    }
}

impl fmt::Display for FileAttributes {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            if self.closed_flag { ' ' } else { '*' },
            self.file_type,
            match (self.locked_flag, self.save_with_replace_flag) {
                (true, false) => "<",
                (false, true) => "@",
                (true, true) => "<@",
                (false, false) => " ",
            },
        )
    }
}

impl fmt::Debug for FileAttributes {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // This is different from the Display impl in that there is no padding.
        if !self.closed_flag {
            f.write_char('*')?;
        }
        <FileType as fmt::Debug>::fmt(&self.file_type, f)?;
        f.write_str(match (self.locked_flag, self.save_with_replace_flag) {
            (true, false) => "<",
            (false, true) => "@",
            (true, true) => "<@",
            (false, false) => "",
        })
    }
}

pub(crate) const ENTRY_SIZE: usize = 32;
const ENTRIES_PER_SECTOR: usize = 8;
const ENTRY_FILE_ATTRIBUTE_OFFSET: usize = 0x02;
const ENTRY_FIRST_SECTOR_OFFSET: usize = 0x03;
const ENTRY_FILENAME_OFFSET: usize = 0x05;
pub(crate) const ENTRY_FILENAME_LENGTH: usize = 16;
const ENTRY_EXTRA_OFFSET: usize = 0x15;
const EXTRA_SIZE: usize = 9;
const ENTRY_FILE_SIZE_OFFSET: usize = 0x1E;

/// The nine directory entry bytes 0x15..0x1E mean different things to
/// relative files and to everything else.
///
/// NOTE: Technically, the two bytes @ 0x1C..0x1E are used in "save and
/// replace" operations.  In regular files they should normally be 0x00 unless
/// a save-and-replace operation is in progress, so they are simply preserved.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Extra {
    Linear(LinearExtra),
    Relative(RelativeExtra),
}

impl Default for Extra {
    fn default() -> Extra {
        Extra::Linear(LinearExtra {
            unused: [0u8; EXTRA_SIZE],
        })
    }
}

impl Extra {
    pub fn from_bytes(file_type: FileType, bytes: &[u8]) -> Extra {
        match file_type {
            FileType::REL => Extra::Relative(RelativeExtra::from_bytes(bytes)),
            _ => Extra::Linear(LinearExtra::from_bytes(bytes)),
        }
    }

    pub fn to_bytes(&self, bytes: &mut [u8]) {
        match self {
            Extra::Linear(e) => e.to_bytes(bytes),
            Extra::Relative(e) => e.to_bytes(bytes),
        }
    }

    /// The start of the side sector chain, for relative files.
    pub fn side_sectors(&self) -> Option<Location> {
        match self {
            Extra::Relative(e) if e.first_side_sector.0 != 0 => Some(e.first_side_sector),
            _ => None,
        }
    }
}

impl fmt::Debug for Extra {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Extra::Linear(_) => write!(f, "REGULAR"),
            Extra::Relative(e) => write!(
                f,
                "REL(side={} rec_len={})",
                e.first_side_sector, e.record_length
            ),
        }
    }
}

/// The extra directory entry bytes used in regular files.  These should all be
/// unused, so we simply preserve whatever bytes are present.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinearExtra {
    pub unused: [u8; EXTRA_SIZE],
}

impl LinearExtra {
    pub fn from_bytes(bytes: &[u8]) -> LinearExtra {
        let mut unused = [0u8; EXTRA_SIZE];
        unused.copy_from_slice(&bytes[..EXTRA_SIZE]);
        LinearExtra { unused }
    }

    pub fn to_bytes(&self, bytes: &mut [u8]) {
        bytes[..EXTRA_SIZE].copy_from_slice(&self.unused);
    }
}

/// The extra directory entry bytes used in relative files: the location of
/// the first side sector and the record length.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelativeExtra {
    pub first_side_sector: Location,
    pub record_length: u8,
    pub unused: [u8; 6],
}

impl RelativeExtra {
    const FIRST_SIDE_SECTOR_OFFSET: usize = 0x00;
    const RECORD_LENGTH_OFFSET: usize = 0x02;
    const UNUSED_OFFSET: usize = 0x03;

    pub fn from_bytes(bytes: &[u8]) -> RelativeExtra {
        let mut unused = [0u8; 6];
        unused.copy_from_slice(&bytes[Self::UNUSED_OFFSET..EXTRA_SIZE]);
        RelativeExtra {
            first_side_sector: Location::from_bytes(&bytes[Self::FIRST_SIDE_SECTOR_OFFSET..]),
            record_length: bytes[Self::RECORD_LENGTH_OFFSET],
            unused,
        }
    }

    pub fn to_bytes(&self, bytes: &mut [u8]) {
        self.first_side_sector
            .write_bytes(&mut bytes[Self::FIRST_SIDE_SECTOR_OFFSET..]);
        bytes[Self::RECORD_LENGTH_OFFSET] = self.record_length;
        bytes[Self::UNUSED_OFFSET..EXTRA_SIZE].copy_from_slice(&self.unused);
    }
}

/// A CBM DOS directory entry, along with the position of the 32-byte record
/// it was read from.
#[derive(Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub file_attributes: FileAttributes,
    pub first_sector: Location,
    pub filename: Petscii,
    pub extra: Extra,
    /// The file size in blocks, as recorded by DOS.
    pub file_size: u16,
    pub position: Position,
}

impl DirectoryEntry {
    pub fn from_bytes(bytes: &[u8], position: Position) -> DirectoryEntry {
        let file_attributes = FileAttributes::from_byte(bytes[ENTRY_FILE_ATTRIBUTE_OFFSET]);
        DirectoryEntry {
            file_attributes,
            first_sector: Location::from_bytes(&bytes[ENTRY_FIRST_SECTOR_OFFSET..]),
            filename: Petscii::from_padded_bytes(
                &bytes[ENTRY_FILENAME_OFFSET..ENTRY_FILENAME_OFFSET + ENTRY_FILENAME_LENGTH],
                PADDING_BYTE,
            ),
            extra: Extra::from_bytes(
                file_attributes.file_type,
                &bytes[ENTRY_EXTRA_OFFSET..ENTRY_EXTRA_OFFSET + EXTRA_SIZE],
            ),
            file_size: u16::from_le_bytes([
                bytes[ENTRY_FILE_SIZE_OFFSET],
                bytes[ENTRY_FILE_SIZE_OFFSET + 1],
            ]),
            position,
        }
    }

    /// Write the serialized directory entry to the provided mutable byte
    /// slice.  This operation preserves any existing "next directory sector"
    /// field in the first two bytes.
    pub fn to_bytes(&self, bytes: &mut [u8]) -> Result<(), WriteError> {
        self.filename.write_bytes_with_padding(
            &mut bytes[ENTRY_FILENAME_OFFSET..ENTRY_FILENAME_OFFSET + ENTRY_FILENAME_LENGTH],
            PADDING_BYTE,
        )?;
        bytes[ENTRY_FILE_ATTRIBUTE_OFFSET] = self.file_attributes.to_byte();
        self.first_sector
            .write_bytes(&mut bytes[ENTRY_FIRST_SECTOR_OFFSET..]);
        self.extra
            .to_bytes(&mut bytes[ENTRY_EXTRA_OFFSET..ENTRY_EXTRA_OFFSET + EXTRA_SIZE]);
        bytes[ENTRY_FILE_SIZE_OFFSET..ENTRY_FILE_SIZE_OFFSET + 2]
            .copy_from_slice(&self.file_size.to_le_bytes());
        Ok(())
    }

    /// True if this slot holds no live file, whether it was never used or
    /// its file was deleted.  Such slots may be reused.
    #[inline]
    pub fn is_free_slot(&self) -> bool {
        self.file_attributes.is_scratched()
    }

    /// A deleted file keeps its start location, which tells it apart from a
    /// slot that was never used.
    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.is_free_slot() && self.first_sector.0 != 0
    }

    #[inline]
    pub fn is_empty_slot(&self) -> bool {
        self.is_free_slot() && self.first_sector.0 == 0
    }
}

impl PositionedData for DirectoryEntry {
    fn position(&self) -> Position {
        self.position
    }

    fn positioned_read(&mut self, buffer: &[u8]) {
        *self = DirectoryEntry::from_bytes(buffer, self.position);
    }

    fn positioned_write(&self, buffer: &mut [u8]) -> Result<(), WriteError> {
        self.to_bytes(buffer)
    }
}

impl fmt::Display for DirectoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:<4} {:18}{}",
            self.file_size,
            format!("\"{}\"", self.filename),
            self.file_attributes
        )?;
        if f.alternate() {
            // verbose
            write!(f, " {:?}", self.extra)?;
        }
        Ok(())
    }
}

impl fmt::Debug for DirectoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:?},{},{:?} @ {}",
            self.filename, self.file_size, self.file_attributes, self.position
        )
    }
}

fn entry_position(location: Location, slot: usize) -> Position {
    Position {
        location,
        offset: (slot * ENTRY_SIZE) as u8,
        size: ENTRY_SIZE as u8,
    }
}

/// Iterate over the entries of a directory, one sector at a time.  Sectors
/// are only read as the iteration reaches them.  Never-used slots are always
/// skipped; deleted entries only appear if requested.
pub struct DirectoryIterator<'a> {
    chain: ChainIterator<'a>,
    sector: Option<(Location, &'a [u8])>,
    slot: usize,
    include_deleted: bool,
}

impl<'a> DirectoryIterator<'a> {
    fn new(blocks: &'a dyn BlockDevice, root: Location, include_deleted: bool) -> DirectoryIterator<'a> {
        DirectoryIterator {
            chain: ChainIterator::links_only(blocks, root),
            sector: None,
            slot: 0,
            include_deleted,
        }
    }
}

impl<'a> Iterator for DirectoryIterator<'a> {
    type Item = Result<DirectoryEntry, ChainError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((location, data)) = self.sector {
                while self.slot < ENTRIES_PER_SECTOR {
                    let position = entry_position(location, self.slot);
                    self.slot += 1;
                    let offset = position.offset as usize;
                    let entry = DirectoryEntry::from_bytes(&data[offset..offset + ENTRY_SIZE], position);
                    if entry.is_empty_slot() || (entry.is_deleted() && !self.include_deleted) {
                        continue;
                    }
                    return Some(Ok(entry));
                }
            }
            match self.chain.next()? {
                Ok(block) => {
                    self.sector = Some((block.location(), block.into_data()));
                    self.slot = 0;
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// The entries of a `DirectoryIterator` which match a pattern.  Errors are
/// passed through.
pub struct GlobIterator<'a> {
    entries: DirectoryIterator<'a>,
    pattern: Pattern,
}

impl<'a> Iterator for GlobIterator<'a> {
    type Item = Result<DirectoryEntry, ChainError>;

    fn next(&mut self) -> Option<Self::Item> {
        let pattern = &self.pattern;
        self.entries.find(|result| match result {
            Ok(entry) => pattern.matches(entry),
            Err(_) => true,
        })
    }
}

/// A read-only view of the directory chain of a disk image.
pub struct Directory<'a> {
    blocks: &'a dyn BlockDevice,
    root: Location,
}

impl<'a> Directory<'a> {
    /// The directory is rooted where the header sector says it is.  Nothing is
    /// read until iteration begins.
    pub fn open(blocks: &'a dyn BlockDevice, bam: &Bam) -> Directory<'a> {
        Directory {
            blocks,
            root: bam.header().first_directory_sector,
        }
    }

    #[inline]
    pub fn root(&self) -> Location {
        self.root
    }

    /// Each call starts a fresh walk from the root.
    pub fn iter(&self, include_deleted: bool) -> DirectoryIterator<'a> {
        DirectoryIterator::new(self.blocks, self.root, include_deleted)
    }

    pub fn glob(&self, pattern: &str, include_deleted: bool) -> GlobIterator<'a> {
        self.glob_pattern(Pattern::new(pattern), include_deleted)
    }

    pub fn glob_pattern(&self, pattern: Pattern, include_deleted: bool) -> GlobIterator<'a> {
        GlobIterator {
            entries: self.iter(include_deleted),
            pattern,
        }
    }

    /// Find a live file by exact name.  The first of several entries with the
    /// same name wins.
    pub fn path<N: Into<Petscii>>(&self, name: N) -> Result<DirectoryEntry, DiskError> {
        let name = name.into();
        for entry in self.iter(false) {
            let entry = entry?;
            if entry.filename == name {
                return Ok(entry);
            }
        }
        Err(DiskError::NotFound(name))
    }

    /// The size recorded in the directory, in blocks.
    #[inline]
    pub fn size_blocks(entry: &DirectoryEntry) -> u16 {
        entry.file_size
    }

    /// The size in bytes, which can only be found by following the file's
    /// chain to its last block.
    pub fn size_bytes(&self, entry: &DirectoryEntry) -> Result<usize, ChainError> {
        chain::payload_size(self.blocks, entry.first_sector)
    }
}

/// Return a `DirectoryEntry` for the first free slot in the directory chain,
/// extending the chain by one sector if every slot is taken.  The caller fills
/// in the entry and writes it back with `BlockDevice::positioned_write`.
pub(crate) fn next_free_directory_entry(
    blocks: &mut dyn BlockDevice,
    bam: &mut Bam,
) -> Result<DirectoryEntry, WriteError> {
    blocks.check_writability()?;
    let root = bam.header().first_directory_sector;
    let mut last_sector = root;

    // Search the existing directory chain for a free slot.
    for block in ChainIterator::links_only(&*blocks, root) {
        let block = block?;
        last_sector = block.location();
        let data = block.data();
        for slot in 0..ENTRIES_PER_SECTOR {
            let position = entry_position(last_sector, slot);
            let offset = position.offset as usize;
            let entry = DirectoryEntry::from_bytes(&data[offset..offset + ENTRY_SIZE], position);
            if entry.is_free_slot() {
                return Ok(entry);
            }
        }
    }

    // No free slots are available in the currently allocated directory
    // sectors, so link a new one from the last sector.
    let new_sector = match bam.allocate_next_directory_block(last_sector) {
        Ok(location) => location,
        Err(BamError::Full) => return Err(WriteError::DirectoryFull),
        Err(e) => return Err(e.into()),
    };
    {
        let mut block = Block::at_mut(&mut *blocks, new_sector)?;
        block.clear();
        block.set_tail(PAYLOAD_SIZE);
    }
    Block::at_mut(&mut *blocks, last_sector)?.set_link(new_sector);
    debug!("extended directory from {} to {}", last_sector, new_sector);

    Ok(DirectoryEntry::from_bytes(
        &[0u8; ENTRY_SIZE],
        entry_position(new_sector, 0),
    ))
}

/// Confirm that the specified filename is valid.  A filename is considered
/// valid if it is 16 characters or fewer.
pub(crate) fn check_filename_validity(filename: &Petscii) -> Result<(), WriteError> {
    if filename.len() > ENTRY_FILENAME_LENGTH {
        return Err(WriteError::FilenameTooLong);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::test_support::blank_device;

    const POSITION: Position = Position {
        location: Location(18, 1),
        offset: 0x20,
        size: ENTRY_SIZE as u8,
    };

    fn round_trip(buffer: &[u8; ENTRY_SIZE]) -> DirectoryEntry {
        let entry = DirectoryEntry::from_bytes(buffer, POSITION);
        let mut output = [0u8; ENTRY_SIZE];
        // to_bytes() doesn't touch the first two bytes
        output[..2].copy_from_slice(&buffer[..2]);
        entry.to_bytes(&mut output).unwrap();
        assert_eq!(&output, buffer);
        entry
    }

    #[test]
    fn test_directory_entry() {
        // All bits cleared
        let entry = round_trip(&[0u8; ENTRY_SIZE]);
        assert_eq!(entry.file_attributes.file_type, FileType::DEL);
        assert!(!entry.file_attributes.closed_flag);
        assert_eq!(entry.first_sector, Location(0, 0));
        assert_eq!(entry.filename, Petscii::from_bytes(&[0; ENTRY_FILENAME_LENGTH]));
        assert_eq!(entry.extra, Extra::default());
        assert_eq!(entry.file_size, 0);
        assert!(entry.is_empty_slot());
        assert!(!entry.is_deleted());

        // All padding bytes
        let entry = round_trip(&[PADDING_BYTE; ENTRY_SIZE]);
        assert_eq!(entry.file_attributes.file_type, FileType::DEL);
        assert!(!entry.file_attributes.unused_bit);
        assert!(entry.file_attributes.save_with_replace_flag);
        assert!(!entry.file_attributes.locked_flag);
        assert!(entry.file_attributes.closed_flag);
        assert_eq!(entry.first_sector, Location(PADDING_BYTE, PADDING_BYTE));
        assert!(entry.filename.is_empty());
        assert_eq!(entry.file_size, 0xA0A0);
        // A closed DEL file is a live entry.
        assert!(!entry.is_free_slot());

        // All bits set
        let entry = round_trip(&[0xFFu8; ENTRY_SIZE]);
        assert_eq!(entry.file_attributes.file_type, FileType::Unknown(0x0F));
        assert!(entry.file_attributes.unused_bit);
        assert!(entry.file_attributes.locked_flag);
        assert_eq!(entry.first_sector, Location(0xFF, 0xFF));
        assert_eq!(entry.file_size, 0xFFFF);

        // A real world example, the second entry of a first directory sector.
        // 00016620: 5347 8211 0541 5343 4949 2043 4f44 4553  SG...ASCII CODES
        // 00016630: a0a0 a0a0 a000 0000 0000 0000 0000 0600  ................
        static BUFFER: [u8; ENTRY_SIZE] = [
            0x53, 0x47, 0x82, 0x11, 0x05, 0x41, 0x53, 0x43, 0x49, 0x49, 0x20, 0x43, 0x4f, 0x44,
            0x45, 0x53, 0xa0, 0xa0, 0xa0, 0xa0, 0xa0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x06, 0x00,
        ];
        let entry = round_trip(&BUFFER);
        assert_eq!(entry.file_attributes, FileAttributes::new(FileType::PRG));
        assert_eq!(entry.first_sector, Location(0x11, 0x05));
        assert_eq!(entry.filename, Petscii::from("ascii codes"));
        assert_eq!(entry.extra, Extra::default());
        assert_eq!(entry.file_size, 0x0006);
        assert_eq!(entry.to_string(), "6    \"ASCII CODES\"      prg ");
    }

    #[test]
    fn test_relative_extra() {
        let mut buffer = [0u8; ENTRY_SIZE];
        buffer[ENTRY_FILE_ATTRIBUTE_OFFSET] = 0x84;
        buffer[ENTRY_FIRST_SECTOR_OFFSET] = 17;
        buffer[ENTRY_EXTRA_OFFSET] = 17;
        buffer[ENTRY_EXTRA_OFFSET + 1] = 3;
        buffer[ENTRY_EXTRA_OFFSET + 2] = 64;
        let entry = round_trip(&buffer);
        assert_eq!(entry.file_attributes.file_type, FileType::REL);
        assert_eq!(entry.extra.side_sectors(), Some(Location(17, 3)));
        assert_eq!(format!("{:?}", entry.extra), "REL(side=(17,3) rec_len=64)");
    }

    #[test]
    fn test_attributes() {
        let attributes = FileAttributes::from_byte(0x42);
        assert_eq!(attributes.to_string(), "*prg<");
        assert_eq!(format!("{:?}", attributes), "*PRG<");
        assert_eq!(FileAttributes::from_byte(0x81).to_string(), " seq ");
        assert_eq!(FileType::from_letter(b's'), Some(FileType::SEQ));
        assert_eq!(FileType::from_string("usr"), Some(FileType::USR));
        assert_eq!(FileType::from_letter(b'X'), None);
    }

    #[test]
    fn test_next_free_directory_entry() {
        const MAX_NEW_ENTRIES: usize = 1000;
        const MAX_DIRECTORY_ENTRIES: usize = 144;
        let (mut blocks, mut bam) = blank_device();
        let mut entries_written: usize = 0;
        loop {
            let mut entry = match next_free_directory_entry(&mut blocks, &mut bam) {
                Ok(entry) => entry,
                Err(WriteError::DirectoryFull) => break,
                Err(e) => panic!("error: {}", e),
            };
            entry.file_attributes = FileAttributes::new(FileType::PRG);
            entry.first_sector = Location(1, 0);
            entry.filename = format!("file{}", entries_written).into();
            blocks.positioned_write(&entry).unwrap();
            entries_written += 1;
            assert!(entries_written <= MAX_NEW_ENTRIES);
        }
        assert_eq!(entries_written, MAX_DIRECTORY_ENTRIES);
        assert_eq!(bam.free_map(18), 0);

        let directory = Directory::open(&blocks, &bam);
        assert_eq!(directory.iter(false).count(), MAX_DIRECTORY_ENTRIES);
        assert_eq!(directory.path("file143").unwrap().position.offset, 0xE0);
        // The second directory sector follows the first at interleave 3.
        assert_eq!(directory.path("file8").unwrap().position.location, Location(18, 4));
    }

    #[test]
    fn test_free_slots_are_reused() {
        let (mut blocks, mut bam) = blank_device();
        for (i, name) in ["one", "two", "three"].iter().enumerate() {
            let mut entry = next_free_directory_entry(&mut blocks, &mut bam).unwrap();
            assert_eq!(entry.position.offset as usize, i * ENTRY_SIZE);
            entry.file_attributes = FileAttributes::new(FileType::SEQ);
            entry.first_sector = Location(1, i as u8);
            entry.filename = (*name).into();
            blocks.positioned_write(&entry).unwrap();
        }

        // Scratch "two", keeping its start location.
        let mut two = Directory::open(&blocks, &bam).path("two").unwrap();
        two.file_attributes = FileAttributes::from_byte(0);
        blocks.positioned_write(&two).unwrap();

        let directory = Directory::open(&blocks, &bam);
        assert_eq!(directory.iter(false).count(), 2);
        let all: Vec<DirectoryEntry> = directory.iter(true).map(|e| e.unwrap()).collect();
        assert_eq!(all.len(), 3);
        assert!(all[1].is_deleted());
        assert_eq!(all[1].filename, Petscii::from("two"));
        assert!(directory.path("two").unwrap_err().is_not_found());

        let entry = next_free_directory_entry(&mut blocks, &mut bam).unwrap();
        assert_eq!(entry.position, two.position);
    }

    #[test]
    fn test_glob() {
        let (mut blocks, mut bam) = blank_device();
        let files = [
            ("TETRIS", FileType::PRG),
            ("TOOLS", FileType::SEQ),
            ("GAME", FileType::PRG),
            ("TEXT", FileType::USR),
        ];
        for (name, file_type) in files.iter() {
            let mut entry = next_free_directory_entry(&mut blocks, &mut bam).unwrap();
            entry.file_attributes = FileAttributes::new(*file_type);
            entry.first_sector = Location(1, 0);
            entry.filename = (*name).into();
            blocks.positioned_write(&entry).unwrap();
        }
        let directory = Directory::open(&blocks, &bam);
        let names = |pattern: &str| -> Vec<String> {
            directory
                .glob(pattern, false)
                .map(|e| e.unwrap().filename.to_string())
                .collect()
        };
        assert_eq!(names("T*"), vec!["TETRIS", "TOOLS", "TEXT"]);
        assert_eq!(names("*=S"), vec!["TOOLS"]);
        assert_eq!(names("T*=P"), vec!["TETRIS"]);
        assert_eq!(names("?AME"), vec!["GAME"]);
        assert!(names("X*").is_empty());
    }

    #[test]
    fn test_broken_directory() {
        let (mut blocks, bam) = blank_device();
        // Link the first directory sector to a sector that doesn't exist.
        blocks.sector_mut(Location(18, 1)).unwrap()[..2].copy_from_slice(&[18, 30]);
        let directory = Directory::open(&blocks, &bam);
        let results: Vec<_> = directory.iter(true).collect();
        assert_eq!(
            results,
            vec![Err(ChainError::BrokenLink {
                from: Location(18, 1),
                to: Location(18, 30)
            })]
        );
        assert!(matches!(
            directory.path("anything"),
            Err(DiskError::Chain(ChainError::BrokenLink { .. }))
        ));
    }

    #[test]
    fn test_directory_sector_with_null_terminator() {
        let (mut blocks, mut bam) = blank_device();
        let mut entry = next_free_directory_entry(&mut blocks, &mut bam).unwrap();
        entry.file_attributes = FileAttributes::new(FileType::PRG);
        entry.first_sector = Location(1, 0);
        entry.filename = "a".into();
        blocks.positioned_write(&entry).unwrap();
        // Some tools end the directory chain with 00 00 rather than 00 FF.
        blocks.sector_mut(Location(18, 1)).unwrap()[..2].copy_from_slice(&[0x00, 0x00]);

        let directory = Directory::open(&blocks, &bam);
        let names: Vec<String> = directory
            .iter(false)
            .map(|e| e.unwrap().filename.to_string())
            .collect();
        assert_eq!(names, vec!["A"]);
        assert_eq!(directory.path("a").unwrap().position, entry.position);

        // The next slot is still found in the same sector.
        let next = next_free_directory_entry(&mut blocks, &mut bam).unwrap();
        assert_eq!(next.position.location, Location(18, 1));
        assert_eq!(next.position.offset as usize, ENTRY_SIZE);
        let errors = crate::disk::validation::validate(&blocks, &bam);
        assert!(!errors
            .iter()
            .any(|e| matches!(e, crate::disk::ValidationError::DirectoryScanError(_))));
    }

    #[test]
    fn test_filename_validity() {
        assert!(check_filename_validity(&"sixteen chars ok".into()).is_ok());
        assert_eq!(
            check_filename_validity(&"seventeen chars!!".into()),
            Err(WriteError::FilenameTooLong)
        );
    }
}
