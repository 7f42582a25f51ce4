use std::fmt;
use std::fmt::Write;

use log::{trace, warn};

use crate::disk::block::{BlockDevice, Location};
use crate::disk::error::{BamError, GeometryError, Inconsistency, WriteError};
use crate::disk::format::DiskFormat;
use crate::disk::header::Header;

/// A BamFormat describes how BAM information is stored for a particular disk
/// image format.
pub struct BamFormat {
    /// The track and sector where the BAM entries are stored.
    pub location: Location,
    /// The offset within the block where entries start.
    pub entries_offset: usize,
    /// How many bytes apart are the BAM entries?  Each entry is a free sector
    /// count followed by the bitmap.
    pub entry_stride: usize,
    /// The size in bytes of the bitmap.  (E.g. 3 in 1541 BAM entries.)
    pub bitmap_size: usize,
    /// The total number of tracks (and hence entries).
    pub tracks: u8,
}

/// One track's worth of BAM: a free sector counter and a bitmap in which a set
/// bit marks a free sector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BamEntry {
    pub free_sectors: u8,
    pub sector_map: u32,
}

impl BamEntry {
    /// Parse the counter byte and the little-endian bitmap bytes that follow
    /// it.
    pub fn from_bytes(bytes: &[u8]) -> BamEntry {
        let sector_map = bytes[1..]
            .iter()
            .rev()
            .fold(0u32, |map, b| (map << 8) | *b as u32);
        BamEntry {
            free_sectors: bytes[0],
            sector_map,
        }
    }

    pub fn write_bytes(&self, bytes: &mut [u8]) {
        bytes[0] = self.free_sectors;
        let mut sector_map = self.sector_map;
        for byte in bytes[1..].iter_mut() {
            *byte = (sector_map & 0xFF) as u8;
            sector_map >>= 8;
        }
    }

    /// The bitmap restricted to sectors that exist on a track of `sectors`
    /// sectors.  Bits beyond the last sector are ignored.
    #[inline]
    pub fn free_map(&self, sectors: u8) -> u32 {
        self.sector_map & ((1u32 << sectors) - 1)
    }

    #[inline]
    pub fn is_consistent(&self, sectors: u8) -> bool {
        self.free_map(sectors).count_ones() == self.free_sectors as u32
    }

    /// Set or clear one sector's bit, keeping the counter in step.
    fn set(&mut self, sector: u8, free: bool, sectors: u8) {
        if free {
            self.sector_map |= 1u32 << sector;
        } else {
            self.sector_map &= !(1u32 << sector);
        }
        self.free_sectors = self.free_map(sectors).count_ones() as u8;
    }
}

/// The in-memory Block Availability Map, along with the disk header that
/// shares its sector.  Changes are only written to the image by `flush`.
pub struct Bam {
    format: &'static DiskFormat,
    header: Header,
    entries: Vec<BamEntry>,
}

impl Bam {
    /// Read the BAM sector.  Up to `tolerance` tracks may have a free counter
    /// that disagrees with their bitmap; more than that is an error.
    pub fn load(
        blocks: &dyn BlockDevice,
        format: &'static DiskFormat,
        tolerance: usize,
    ) -> Result<Bam, BamError> {
        let block = blocks.sector(format.bam.location)?;
        let header = Header::read(block, format.header);
        if !blocks.geometry().contains(header.first_directory_sector) {
            return Err(BamError::Inconsistent(Inconsistency::DirectoryRoot(
                header.first_directory_sector,
            )));
        }

        let bam_format = format.bam;
        let entries = (0..bam_format.tracks as usize)
            .map(|i| {
                let offset = bam_format.entries_offset + i * bam_format.entry_stride;
                BamEntry::from_bytes(&block[offset..offset + 1 + bam_format.bitmap_size])
            })
            .collect();
        let bam = Bam {
            format,
            header,
            entries,
        };

        let tracks = bam.inconsistent_tracks();
        if tracks.len() > tolerance {
            return Err(BamError::Inconsistent(Inconsistency::FreeCountMismatch { tracks }));
        }
        for track in tracks {
            let entry = &bam.entries[track as usize - 1];
            warn!(
                "BAM track {} claims {} free sectors but its bitmap has {}",
                track,
                entry.free_sectors,
                entry.free_map(format.sectors_in_track(track)).count_ones()
            );
        }
        Ok(bam)
    }

    #[inline]
    pub fn format(&self) -> &'static DiskFormat {
        self.format
    }

    #[inline]
    pub fn header(&self) -> &Header {
        &self.header
    }

    #[inline]
    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    /// Return true if this BAM has an entry for `track`.
    #[inline]
    pub fn covers(&self, track: u8) -> bool {
        track >= 1 && track <= self.format.bam.tracks
    }

    pub fn entry(&self, track: u8) -> Result<&BamEntry, GeometryError> {
        if !self.covers(track) {
            return Err(GeometryError::TrackOutOfRange {
                track,
                max: self.format.bam.tracks,
            });
        }
        Ok(&self.entries[track as usize - 1])
    }

    /// The free sectors of `track` as a bitmap, or 0 for a track the BAM
    /// doesn't cover.
    pub fn free_map(&self, track: u8) -> u32 {
        match self.entry(track) {
            Ok(entry) => entry.free_map(self.format.sectors_in_track(track)),
            Err(_) => 0,
        }
    }

    /// Sectors outside the BAM's coverage are never free.
    pub fn is_free(&self, location: Location) -> bool {
        location.1 < 32 && self.free_map(location.0) >> location.1 & 1 == 1
    }

    fn check(&self, location: Location) -> Result<(), GeometryError> {
        self.entry(location.0)?;
        let sectors = self.format.sectors_in_track(location.0);
        if location.1 >= sectors {
            return Err(GeometryError::SectorOutOfRange {
                track: location.0,
                sector: location.1,
                sectors,
            });
        }
        Ok(())
    }

    /// Mark one sector free or used.  The track's free counter is recomputed
    /// from its bitmap in the same step.
    pub fn mark(&mut self, location: Location, free: bool) -> Result<(), BamError> {
        self.check(location)?;
        let sectors = self.format.sectors_in_track(location.0);
        self.entries[location.0 as usize - 1].set(location.1, free, sectors);
        Ok(())
    }

    #[inline]
    pub fn allocate(&mut self, location: Location) -> Result<(), BamError> {
        self.mark(location, false)
    }

    #[inline]
    pub fn free(&mut self, location: Location) -> Result<(), BamError> {
        self.mark(location, true)
    }

    #[inline]
    pub fn next_free_block(&self, previous: Option<Location>) -> Result<Location, BamError> {
        self.format.next_free_block(self, previous)
    }

    /// Choose and allocate a data block near `previous`.
    pub fn allocate_next(&mut self, previous: Option<Location>) -> Result<Location, BamError> {
        let location = self.next_free_block(previous)?;
        self.allocate(location)?;
        trace!("allocated {} after {:?}", location, previous);
        Ok(location)
    }

    /// Choose and allocate a directory block following `previous`.
    pub fn allocate_next_directory_block(&mut self, previous: Location) -> Result<Location, BamError> {
        let location = self.format.next_free_directory_block(self, previous)?;
        self.allocate(location)?;
        trace!("allocated directory block {}", location);
        Ok(location)
    }

    /// Return the number of blocks free on the disk image, sans any
    /// unallocated directory blocks. This is equivalent to the "blocks
    /// free" output at the bottom of a directory listing, and is based on
    /// the free sector counters rather than the bitmaps.
    pub fn blocks_free(&self) -> usize {
        (1..=self.format.bam.tracks)
            .filter(|t| *t != self.format.directory_track)
            .map(|t| self.entries[t as usize - 1].free_sectors as usize)
            .sum()
    }

    /// Write the BAM and header back to their sector.
    pub fn flush(&self, blocks: &mut dyn BlockDevice) -> Result<(), WriteError> {
        let bam_format = self.format.bam;
        let block = blocks.sector_mut(bam_format.location)?;
        self.header.write(block, self.format.header)?;
        for (i, entry) in self.entries.iter().enumerate() {
            let offset = bam_format.entries_offset + i * bam_format.entry_stride;
            entry.write_bytes(&mut block[offset..offset + 1 + bam_format.bitmap_size]);
        }
        Ok(())
    }

    /// Return the tracks whose free counter disagrees with their bitmap.
    pub fn inconsistent_tracks(&self) -> Vec<u8> {
        (1..=self.format.bam.tracks)
            .filter(|t| !self.entries[*t as usize - 1].is_consistent(self.format.sectors_in_track(*t)))
            .collect()
    }

    fn sectors_where(&self, free: bool) -> Vec<Location> {
        let mut locations = vec![];
        for track in 1..=self.format.bam.tracks {
            let map = self.free_map(track);
            for sector in 0..self.format.sectors_in_track(track) {
                if (map >> sector & 1 == 1) == free {
                    locations.push(Location(track, sector));
                }
            }
        }
        locations
    }

    pub fn allocated_sectors(&self) -> Vec<Location> {
        self.sectors_where(false)
    }

    pub fn free_sectors(&self) -> Vec<Location> {
        self.sectors_where(true)
    }
}

impl fmt::Debug for Bam {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for track in 1..=self.format.bam.tracks {
            let sectors = self.format.sectors_in_track(track);
            let entry = &self.entries[track as usize - 1];
            write!(f, "t{:02}: [{:02}/{:02}] ", track, entry.free_sectors, sectors)?;
            let map = entry.free_map(sectors);
            for sector in 0..sectors {
                f.write_char(if map >> sector & 1 == 1 { '.' } else { 'x' })?;
            }
            f.write_char('\n')?;
        }
        writeln!(f, "{} blocks free.", self.blocks_free())
    }
}
