use std::io;

use bit_vec::BitVec;
use log::{debug, trace};

use crate::disk::bam::Bam;
use crate::disk::block::{Block, BlockDevice, Location, PAYLOAD_SIZE};
use crate::disk::error::{BamError, ChainError, WriteError};

/// Iterate over the blocks of a chain, starting at `start`.  Every link is
/// validated before it is followed, and a location seen twice ends the walk
/// with `ChainError::Cycle`, so a corrupt image can't cause an endless loop.
/// After an error the iterator is exhausted.
pub struct ChainIterator<'a> {
    blocks: &'a dyn BlockDevice,
    next_sector: Option<Location>,
    previous: Option<Location>,
    visited_sectors: BitVec,
    check_terminators: bool,
}

impl<'a> ChainIterator<'a> {
    /// Create a new chain iterator starting at the specified location.
    pub fn new(blocks: &'a dyn BlockDevice, start: Location) -> ChainIterator<'a> {
        ChainIterator {
            blocks,
            next_sector: Some(start),
            previous: None,
            visited_sectors: BitVec::from_elem(blocks.geometry().total_sectors(), false),
            check_terminators: true,
        }
    }

    /// Like `new`, but only the links are followed: the used-bytes field of
    /// the last block is not checked.  Directory sectors hold fixed-size
    /// records, so a last sector linked `00 00` is still readable.
    pub fn links_only(blocks: &'a dyn BlockDevice, start: Location) -> ChainIterator<'a> {
        ChainIterator {
            check_terminators: false,
            ..ChainIterator::new(blocks, start)
        }
    }

    /// Read the entire chain and return a list of locations.
    pub fn locations(self) -> Result<Vec<Location>, ChainError> {
        self.map(|r| r.map(|block| block.location())).collect()
    }

    fn invalid_link(&self, to: Location) -> ChainError {
        match self.previous {
            Some(from) => ChainError::BrokenLink { from, to },
            None => ChainError::InvalidStart(to),
        }
    }
}

impl<'a> Iterator for ChainIterator<'a> {
    type Item = Result<Block<&'a [u8]>, ChainError>;

    fn next(&mut self) -> Option<Self::Item> {
        let location = self.next_sector.take()?;

        let block = match Block::at(self.blocks, location) {
            Ok(block) => block,
            Err(_) => return Some(Err(self.invalid_link(location))),
        };

        // Loop detection.  Block::at succeeded, so the index is in range.
        let index = match self.blocks.geometry().sector_index(location) {
            Ok(index) => index,
            Err(_) => return Some(Err(self.invalid_link(location))),
        };
        if self.visited_sectors.get(index) == Some(true) {
            return Some(Err(ChainError::Cycle(location)));
        }
        self.visited_sectors.set(index, true);

        if self.check_terminators {
            if let Err(e) = block.link() {
                return Some(Err(e));
            }
        }
        self.previous = Some(location);
        self.next_sector = block.next();
        Some(Ok(block))
    }
}

/// Read a whole chain into memory.
pub fn read_all(blocks: &dyn BlockDevice, start: Location) -> Result<Vec<u8>, ChainError> {
    let mut data = Vec::new();
    for block in ChainIterator::new(blocks, start) {
        data.extend_from_slice(block?.payload()?);
    }
    Ok(data)
}

/// Count the payload bytes of a chain without copying them.
pub fn payload_size(blocks: &dyn BlockDevice, start: Location) -> Result<usize, ChainError> {
    ChainIterator::new(blocks, start).try_fold(0, |size, block| Ok(size + block?.payload_len()?))
}

/// ChainReader objects implement the Read trait and are used to read a byte
/// stream represented as a series of chained sectors on the disk image.
pub struct ChainReader<'a> {
    chain: ChainIterator<'a>,
    payload: &'a [u8],
}

impl<'a> ChainReader<'a> {
    pub fn new(blocks: &'a dyn BlockDevice, start: Location) -> ChainReader<'a> {
        ChainReader {
            chain: ChainIterator::new(blocks, start),
            payload: &[],
        }
    }
}

impl<'a> io::Read for ChainReader<'a> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        // Skip over empty tail blocks until data or the end of the chain.
        while self.payload.is_empty() {
            match self.chain.next() {
                Some(block) => self.payload = block?.into_payload()?,
                None => return Ok(0),
            }
        }
        let nbytes = self.payload.len().min(buf.len());
        buf[..nbytes].copy_from_slice(&self.payload[..nbytes]);
        self.payload = &self.payload[nbytes..];
        Ok(nbytes)
    }
}

/// Write `data` as a new chain and return its first location.
///
/// Data is split into 254-byte pages, one block per page; empty data still
/// occupies a single block.  Every block is allocated before anything is
/// written, and if allocation or writing fails the blocks allocated by this
/// call are released, leaving the BAM as it was.  The BAM is not flushed.
pub fn write_all(blocks: &mut dyn BlockDevice, bam: &mut Bam, data: &[u8]) -> Result<Location, WriteError> {
    blocks.check_writability()?;

    let pages: Vec<&[u8]> = if data.is_empty() {
        vec![data]
    } else {
        data.chunks(PAYLOAD_SIZE).collect()
    };

    let mut locations: Vec<Location> = Vec::with_capacity(pages.len());
    for _ in 0..pages.len() {
        match bam.allocate_next(locations.last().copied()) {
            Ok(location) => locations.push(location),
            Err(e) => {
                debug!(
                    "rolling back {} blocks after allocation failure: {}",
                    locations.len(),
                    e
                );
                release(bam, &locations)?;
                return Err(e.into());
            }
        }
    }

    if let Err(e) = write_pages(blocks, &pages, &locations) {
        release(bam, &locations)?;
        return Err(e);
    }
    trace!("wrote {} bytes in {} blocks from {}", data.len(), locations.len(), locations[0]);
    Ok(locations[0])
}

fn write_pages(blocks: &mut dyn BlockDevice, pages: &[&[u8]], locations: &[Location]) -> Result<(), WriteError> {
    for (i, (page, location)) in pages.iter().zip(locations).enumerate() {
        let mut block = Block::at_mut(&mut *blocks, *location)?;
        block.write_payload(page)?;
        match locations.get(i + 1) {
            Some(next) => block.set_link(*next),
            None => block.set_tail(page.len()),
        }
    }
    Ok(())
}

fn release(bam: &mut Bam, locations: &[Location]) -> Result<(), BamError> {
    for location in locations {
        bam.free(*location)?;
    }
    Ok(())
}

/// Free every block of a chain in the BAM.  The whole chain is walked first,
/// so a broken chain frees nothing.  Returns the number of blocks freed.
pub fn remove_chain(blocks: &dyn BlockDevice, bam: &mut Bam, start: Location) -> Result<usize, WriteError> {
    remove_chains(blocks, bam, &[start])
}

/// Free the blocks of several chains, e.g. a relative file's data and side
/// sectors.  Every chain is walked before any block is freed, so if one of
/// them is broken the BAM is left untouched.
pub fn remove_chains(blocks: &dyn BlockDevice, bam: &mut Bam, starts: &[Location]) -> Result<usize, WriteError> {
    let mut managed: Vec<Location> = vec![];
    for start in starts {
        let locations = ChainIterator::new(blocks, *start).locations()?;
        managed.extend(locations.into_iter().filter(|l| bam.covers(l.0)));
    }
    release(bam, &managed)?;
    Ok(managed.len())
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;
    use crate::disk::test_support::blank_device;

    fn write_raw(blocks: &mut dyn BlockDevice, location: Location, link: [u8; 2], fill: u8) {
        let sector = blocks.sector_mut(location).unwrap();
        sector.iter_mut().for_each(|b| *b = fill);
        sector[..2].copy_from_slice(&link);
    }

    #[test]
    fn test_read_hand_built_chain() {
        let (mut blocks, _bam) = blank_device();
        write_raw(&mut blocks, Location(1, 0), [1, 5], b'a');
        write_raw(&mut blocks, Location(1, 5), [2, 0], b'b');
        // Tail: terminator 11 means payload bytes 2..=10 are valid.
        write_raw(&mut blocks, Location(2, 0), [0, 11], b'c');

        let data = read_all(&blocks, Location(1, 0)).unwrap();
        let mut expected = vec![b'a'; 254];
        expected.extend(vec![b'b'; 254]);
        expected.extend(vec![b'c'; 10]);
        assert_eq!(data, expected);
        assert_eq!(payload_size(&blocks, Location(1, 0)), Ok(518));
        assert_eq!(
            ChainIterator::new(&blocks, Location(1, 0)).locations(),
            Ok(vec![Location(1, 0), Location(1, 5), Location(2, 0)])
        );
    }

    #[test]
    fn test_round_trip() {
        for &len in &[0usize, 1, 253, 254, 255, 508, 10000] {
            let (mut blocks, mut bam) = blank_device();
            let data: Vec<u8> = (0..len).map(|i| (i * 7 % 251) as u8).collect();
            let start = write_all(&mut blocks, &mut bam, &data).unwrap();
            assert_eq!(read_all(&blocks, start).unwrap(), data, "length {}", len);

            let expected_blocks = std::cmp::max(1, (len + PAYLOAD_SIZE - 1) / PAYLOAD_SIZE);
            let locations = ChainIterator::new(&blocks, start).locations().unwrap();
            assert_eq!(locations.len(), expected_blocks, "length {}", len);
            assert_eq!(bam.blocks_free(), 664 - expected_blocks);
            for location in locations {
                assert!(!bam.is_free(location));
            }
        }
    }

    #[test]
    fn test_terminator_bytes() {
        let (mut blocks, mut bam) = blank_device();
        let start = write_all(&mut blocks, &mut bam, &[]).unwrap();
        assert_eq!(blocks.sector(start).unwrap()[..2], [0x00, 0x01]);
        let start = write_all(&mut blocks, &mut bam, &[0x42; 254]).unwrap();
        assert_eq!(blocks.sector(start).unwrap()[..2], [0x00, 0xFF]);
        let start = write_all(&mut blocks, &mut bam, &[0x42; 255]).unwrap();
        let next = Block::at(&blocks, start).unwrap().next().unwrap();
        assert_eq!(blocks.sector(next).unwrap()[..2], [0x00, 0x02]);
    }

    #[test]
    fn test_sixteen_blocks() {
        let (mut blocks, mut bam) = blank_device();
        let data = vec![0xEE; 15 * 254 + 200];
        let start = write_all(&mut blocks, &mut bam, &data).unwrap();
        assert_eq!(ChainIterator::new(&blocks, start).count(), 16);
        assert_eq!(payload_size(&blocks, start), Ok(15 * 254 + 200));
    }

    #[test]
    fn test_cycle() {
        let (mut blocks, _bam) = blank_device();
        write_raw(&mut blocks, Location(3, 0), [3, 1], 0);
        write_raw(&mut blocks, Location(3, 1), [3, 2], 0);
        write_raw(&mut blocks, Location(3, 2), [3, 0], 0);
        assert_eq!(
            read_all(&blocks, Location(3, 0)),
            Err(ChainError::Cycle(Location(3, 0)))
        );
        // A block linking to itself.
        write_raw(&mut blocks, Location(4, 4), [4, 4], 0);
        let mut chain = ChainIterator::new(&blocks, Location(4, 4));
        assert!(chain.next().unwrap().is_ok());
        assert_eq!(chain.next().unwrap().err(), Some(ChainError::Cycle(Location(4, 4))));
        assert!(chain.next().is_none());
    }

    #[test]
    fn test_broken_chains() {
        let (mut blocks, _bam) = blank_device();
        write_raw(&mut blocks, Location(5, 0), [36, 0], 0);
        assert_eq!(
            read_all(&blocks, Location(5, 0)),
            Err(ChainError::BrokenLink {
                from: Location(5, 0),
                to: Location(36, 0)
            })
        );
        write_raw(&mut blocks, Location(5, 1), [5, 21], 0);
        assert!(matches!(
            read_all(&blocks, Location(5, 1)),
            Err(ChainError::BrokenLink { .. })
        ));
        assert_eq!(
            read_all(&blocks, Location(0, 0)),
            Err(ChainError::InvalidStart(Location(0, 0)))
        );
        write_raw(&mut blocks, Location(5, 2), [0, 0], 0);
        assert_eq!(
            read_all(&blocks, Location(5, 2)),
            Err(ChainError::InvalidTerminator {
                location: Location(5, 2),
                byte: 0
            })
        );
    }

    #[test]
    fn test_rollback_when_full() {
        let (mut blocks, mut bam) = blank_device();
        // Leave exactly two free blocks.
        let mut previous = None;
        for _ in 0..662 {
            previous = Some(bam.allocate_next(previous).unwrap());
        }
        let free_before = bam.free_sectors();
        assert_eq!(
            write_all(&mut blocks, &mut bam, &[0u8; 3 * 254]),
            Err(WriteError::Bam(BamError::Full))
        );
        assert_eq!(bam.free_sectors(), free_before);
        assert_eq!(bam.blocks_free(), 2);
        // Two blocks still fit.
        assert!(write_all(&mut blocks, &mut bam, &[0u8; 2 * 254]).is_ok());
        assert_eq!(bam.blocks_free(), 0);
    }

    #[test]
    fn test_reader() {
        let (mut blocks, mut bam) = blank_device();
        let data: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();
        let start = write_all(&mut blocks, &mut bam, &data).unwrap();

        let mut reader = ChainReader::new(&blocks, start);
        let mut output = Vec::new();
        let mut buf = [0u8; 100];
        loop {
            let n = reader.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            assert!(n <= 100);
            output.extend_from_slice(&buf[..n]);
        }
        assert_eq!(output, data);

        let empty = write_all(&mut blocks, &mut bam, &[]).unwrap();
        let mut output = Vec::new();
        ChainReader::new(&blocks, empty).read_to_end(&mut output).unwrap();
        assert!(output.is_empty());
    }

    #[test]
    fn test_reader_error() {
        let (mut blocks, _bam) = blank_device();
        write_raw(&mut blocks, Location(6, 0), [6, 0], 0);
        let mut output = Vec::new();
        let e = ChainReader::new(&blocks, Location(6, 0))
            .read_to_end(&mut output)
            .unwrap_err();
        assert_eq!(e.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_remove_chain() {
        let (mut blocks, mut bam) = blank_device();
        let start = write_all(&mut blocks, &mut bam, &[1u8; 600]).unwrap();
        assert_eq!(bam.blocks_free(), 661);
        assert_eq!(remove_chain(&blocks, &mut bam, start), Ok(3));
        assert_eq!(bam.blocks_free(), 664);
    }

    #[test]
    fn test_remove_chains_all_or_nothing() {
        let (mut blocks, mut bam) = blank_device();
        let first = write_all(&mut blocks, &mut bam, &[1u8; 600]).unwrap();
        let second = write_all(&mut blocks, &mut bam, &[2u8; 10]).unwrap();
        assert_eq!(bam.blocks_free(), 660);
        assert_eq!(
            remove_chains(&blocks, &mut bam, &[first, Location(36, 0)]),
            Err(WriteError::Chain(ChainError::InvalidStart(Location(36, 0))))
        );
        assert_eq!(bam.blocks_free(), 660);
        assert!(!bam.is_free(first));
        assert_eq!(remove_chains(&blocks, &mut bam, &[first, second]), Ok(4));
        assert_eq!(bam.blocks_free(), 664);
    }
}
