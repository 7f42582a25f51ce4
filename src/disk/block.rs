use std::fmt;
use std::io::{self, Write};

use crate::disk::error::{ChainError, DiskError, GeometryError, WriteError};
use crate::disk::geometry::Geometry;
use crate::disk::image::Image;
use crate::util;

pub const BLOCK_SIZE: usize = 256;
/// Bytes available for data in each block, after the two-byte link.
pub const PAYLOAD_SIZE: usize = BLOCK_SIZE - LINK_SIZE;
const LINK_SIZE: usize = 2;

/// Sector-level access to a disk image.  Every access is validated against
/// the geometry; a bad location is an error, never a wrapped offset.
pub trait BlockDevice {
    fn geometry(&self) -> &'static Geometry;
    fn check_writability(&self) -> Result<(), WriteError>;
    fn sector(&self, location: Location) -> Result<&[u8], GeometryError>;
    fn sector_mut(&mut self, location: Location) -> Result<&mut [u8], WriteError>;
    fn flush(&mut self) -> Result<(), DiskError>;

    fn positioned_read(&self, positioned_data: &mut dyn PositionedData) -> Result<(), GeometryError> {
        let position = positioned_data.position();
        let block = self.sector(position.location)?;
        positioned_data.positioned_read(&block[position.range()]);
        Ok(())
    }

    fn positioned_write(&mut self, positioned_data: &dyn PositionedData) -> Result<(), WriteError> {
        let position = positioned_data.position();
        let block = self.sector_mut(position.location)?;
        positioned_data.positioned_write(&mut block[position.range()])
    }

    fn dump(&self, writer: &mut dyn Write) -> io::Result<()> {
        for location in self.geometry().locations() {
            writeln!(writer)?;
            writeln!(writer, "track {:02} sector {:02}", location.0, location.1)?;
            let block = self.sector(location).map_err(DiskError::from)?;
            writeln!(writer, "{}", util::hex(block))?;
        }
        Ok(())
    }
}

pub struct ImageBlockDevice {
    image: Image,
    geometry: &'static Geometry,
}

impl ImageBlockDevice {
    /// The image length must match the geometry exactly.
    pub fn new(image: Image, geometry: &'static Geometry) -> Result<ImageBlockDevice, GeometryError> {
        geometry.check_size(image.len())?;
        Ok(ImageBlockDevice { image, geometry })
    }

    #[inline]
    pub fn image(&self) -> &Image {
        &self.image
    }
}

impl BlockDevice for ImageBlockDevice {
    #[inline]
    fn geometry(&self) -> &'static Geometry {
        self.geometry
    }

    #[inline]
    fn check_writability(&self) -> Result<(), WriteError> {
        self.image.check_writability()
    }

    fn sector(&self, location: Location) -> Result<&[u8], GeometryError> {
        let offset = self.geometry.sector_offset(location)?;
        Ok(&self.image.as_slice()[offset..offset + BLOCK_SIZE])
    }

    fn sector_mut(&mut self, location: Location) -> Result<&mut [u8], WriteError> {
        let offset = self.geometry.sector_offset(location)?;
        Ok(&mut self.image.as_mut_slice()?[offset..offset + BLOCK_SIZE])
    }

    fn flush(&mut self) -> Result<(), DiskError> {
        self.image.flush()
    }
}

#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug, PartialOrd, Ord)]
pub struct Location(pub u8, pub u8); // Track and sector

impl Location {
    #[inline]
    pub fn new(track: u8, sector: u8) -> Location {
        Location(track, sector)
    }

    #[inline]
    pub fn from_bytes(bytes: &[u8]) -> Location {
        Location(bytes[0], bytes[1])
    }

    #[inline]
    pub fn write_bytes(&self, bytes: &mut [u8]) {
        bytes[0] = self.0;
        bytes[1] = self.1;
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({},{})", self.0, self.1)
    }
}

/// Where a small structure (e.g. a directory entry) lives within the image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Position {
    pub location: Location,
    pub offset: u8,
    pub size: u8,
}

impl Position {
    #[inline]
    fn range(&self) -> std::ops::Range<usize> {
        self.offset as usize..self.offset as usize + self.size as usize
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "({},{}@0x{:02x})",
            self.location.0, self.location.1, self.offset
        )
    }
}

/// Data which remembers its own position, so it can be re-read or written
/// back in place.
pub trait PositionedData {
    fn position(&self) -> Position;
    fn positioned_read(&mut self, buffer: &[u8]);
    fn positioned_write(&self, buffer: &mut [u8]) -> Result<(), WriteError>;
}

/// The decoded two-byte link at the start of every chained block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainLink {
    Next(Location),
    /// The last block of a chain, with the number of payload bytes in use.
    Tail(usize),
}

impl ChainLink {
    /// Decode the link bytes of the block at `location`.  A tail whose
    /// used-bytes field is zero doesn't even cover the link itself.
    pub fn new(location: Location, block: &[u8]) -> Result<ChainLink, ChainError> {
        match (block[0], block[1]) {
            (0x00, 0x00) => Err(ChainError::InvalidTerminator { location, byte: 0 }),
            (0x00, last) => Ok(ChainLink::Tail(last as usize - 1)), // 0..=254
            (track, sector) => Ok(ChainLink::Next(Location(track, sector))),
        }
    }

    pub fn to_bytes(&self, bytes: &mut [u8]) {
        match self {
            ChainLink::Next(location) => location.write_bytes(bytes),
            ChainLink::Tail(size) => {
                bytes[0] = 0x00;
                bytes[1] = ((*size).min(PAYLOAD_SIZE) + 1) as u8;
            }
        }
    }
}

/// A view of one 256-byte sector.  `Block<&[u8]>` is obtained for reading and
/// `Block<&mut [u8]>` for writing; neither owns the sector's bytes.
pub struct Block<T> {
    location: Location,
    data: T,
}

impl<'a> Block<&'a [u8]> {
    pub fn at(blocks: &'a dyn BlockDevice, location: Location) -> Result<Block<&'a [u8]>, GeometryError> {
        Ok(Block {
            location,
            data: blocks.sector(location)?,
        })
    }

    #[inline]
    pub fn into_data(self) -> &'a [u8] {
        self.data
    }

    /// Like `payload`, but borrowing from the device rather than the view.
    pub fn into_payload(self) -> Result<&'a [u8], ChainError> {
        let len = self.payload_len()?;
        let data: &'a [u8] = self.data;
        Ok(&data[LINK_SIZE..LINK_SIZE + len])
    }
}

impl<'a> Block<&'a mut [u8]> {
    pub fn at_mut(
        blocks: &'a mut dyn BlockDevice,
        location: Location,
    ) -> Result<Block<&'a mut [u8]>, WriteError> {
        Ok(Block {
            location,
            data: blocks.sector_mut(location)?,
        })
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut *self.data
    }

    /// The payload bytes currently in use, per the link.
    pub fn payload_mut(&mut self) -> Result<&mut [u8], ChainError> {
        let len = self.payload_len()?;
        Ok(&mut self.data[LINK_SIZE..LINK_SIZE + len])
    }

    /// Point this block at the next block of its chain.
    pub fn set_link(&mut self, next: Location) {
        ChainLink::Next(next).to_bytes(&mut *self.data);
    }

    /// Mark this block as the end of its chain, with `len` payload bytes used.
    pub fn set_tail(&mut self, len: usize) {
        ChainLink::Tail(len).to_bytes(&mut *self.data);
    }

    /// Write `payload` after the link and zero the remainder of the block.
    /// A payload longer than `PAYLOAD_SIZE` is refused and the block is left
    /// unchanged.
    pub fn write_payload(&mut self, payload: &[u8]) -> Result<(), WriteError> {
        if payload.len() > PAYLOAD_SIZE {
            return Err(WriteError::PayloadTooLong(payload.len()));
        }
        let (head, tail) = self.data[LINK_SIZE..].split_at_mut(payload.len());
        head.copy_from_slice(payload);
        tail.iter_mut().for_each(|b| *b = 0);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.data.iter_mut().for_each(|b| *b = 0);
    }
}

impl<T: AsRef<[u8]>> Block<T> {
    #[inline]
    pub fn location(&self) -> Location {
        self.location
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    /// Return the linked location, or `None` for the last block of a chain.
    /// The location is not validated here.
    #[inline]
    pub fn next(&self) -> Option<Location> {
        match self.data()[0] {
            0x00 => None,
            track => Some(Location(track, self.data()[1])),
        }
    }

    #[inline]
    pub fn link(&self) -> Result<ChainLink, ChainError> {
        ChainLink::new(self.location, self.data())
    }

    pub fn payload_len(&self) -> Result<usize, ChainError> {
        match self.link()? {
            ChainLink::Next(_) => Ok(PAYLOAD_SIZE),
            ChainLink::Tail(len) => Ok(len),
        }
    }

    pub fn payload(&self) -> Result<&[u8], ChainError> {
        let len = self.payload_len()?;
        Ok(&self.data()[LINK_SIZE..LINK_SIZE + len])
    }
}

impl<T: AsRef<[u8]>> fmt::Debug for Block<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "block {}:", self.location)?;
        util::hexdump(f, "  ", self.data())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::geometry::GeometryVariant;

    fn memory_device() -> ImageBlockDevice {
        let geometry = GeometryVariant::Tracks35.geometry();
        ImageBlockDevice::new(Image::from_vec(vec![0; geometry.size()]), geometry).unwrap()
    }

    #[test]
    fn test_size_mismatch() {
        let geometry = GeometryVariant::Tracks35.geometry();
        assert!(matches!(
            ImageBlockDevice::new(Image::from_vec(vec![0; 1000]), geometry),
            Err(GeometryError::BufferSizeMismatch { actual: 1000, .. })
        ));
    }

    #[test]
    fn test_block_bounds() {
        let device = memory_device();
        assert!(Block::at(&device, Location(17, 20)).is_ok());
        assert_eq!(
            Block::at(&device, Location(18, 19)).err(),
            Some(GeometryError::SectorOutOfRange {
                track: 18,
                sector: 19,
                sectors: 19
            })
        );
        assert!(Block::at(&device, Location(0, 0)).is_err());
    }

    #[test]
    fn test_links() {
        let mut device = memory_device();
        {
            let mut block = Block::at_mut(&mut device, Location(1, 0)).unwrap();
            block.set_link(Location(40, 3));
            block.write_payload(&[0x55; PAYLOAD_SIZE]).unwrap();
        }
        {
            let mut block = Block::at_mut(&mut device, Location(1, 1)).unwrap();
            block.write_payload(b"hello").unwrap();
            block.set_tail(5);
        }
        let block = Block::at(&device, Location(1, 0)).unwrap();
        // next() reports the raw link, even when it is off the disk.
        assert_eq!(block.next(), Some(Location(40, 3)));
        assert_eq!(block.payload_len(), Ok(PAYLOAD_SIZE));

        let block = Block::at(&device, Location(1, 1)).unwrap();
        assert_eq!(block.data()[..2], [0x00, 0x06]);
        assert_eq!(block.next(), None);
        assert_eq!(block.payload().unwrap(), b"hello");
    }

    #[test]
    fn test_payload_too_long() {
        let mut device = memory_device();
        let mut block = Block::at_mut(&mut device, Location(4, 0)).unwrap();
        block.write_payload(&[0x11; PAYLOAD_SIZE]).unwrap();
        assert_eq!(
            block.write_payload(&[0x22; PAYLOAD_SIZE + 1]),
            Err(WriteError::PayloadTooLong(255))
        );
        assert!(block.data()[LINK_SIZE..].iter().all(|b| *b == 0x11));
    }

    #[test]
    fn test_terminators() {
        let mut device = memory_device();
        Block::at_mut(&mut device, Location(2, 0)).unwrap().set_tail(0);
        assert_eq!(
            Block::at(&device, Location(2, 0)).unwrap().payload_len(),
            Ok(0)
        );
        Block::at_mut(&mut device, Location(2, 0)).unwrap().set_tail(PAYLOAD_SIZE);
        assert_eq!(
            Block::at(&device, Location(2, 0)).unwrap().data()[1],
            0xFF
        );
        // (0,0) is not a valid terminator.
        let block = Block::at(&device, Location(3, 0)).unwrap();
        assert_eq!(
            block.payload(),
            Err(ChainError::InvalidTerminator {
                location: Location(3, 0),
                byte: 0
            })
        );
    }

    #[test]
    fn test_positioned_data() {
        struct Pair(Position, [u8; 2]);
        impl PositionedData for Pair {
            fn position(&self) -> Position {
                self.0
            }
            fn positioned_read(&mut self, buffer: &[u8]) {
                self.1.copy_from_slice(buffer);
            }
            fn positioned_write(&self, buffer: &mut [u8]) -> Result<(), WriteError> {
                buffer.copy_from_slice(&self.1);
                Ok(())
            }
        }

        let mut device = memory_device();
        let position = Position {
            location: Location(5, 5),
            offset: 0x20,
            size: 2,
        };
        device.positioned_write(&Pair(position, [1, 2])).unwrap();
        assert_eq!(device.sector(Location(5, 5)).unwrap()[0x20..0x23], [1, 2, 0]);
        let mut pair = Pair(position, [0, 0]);
        device.positioned_read(&mut pair).unwrap();
        assert_eq!(pair.1, [1, 2]);
        assert_eq!(position.to_string(), "(5,5@0x20)");
    }
}
