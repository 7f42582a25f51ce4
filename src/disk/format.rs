use crate::disk::bam::{Bam, BamFormat};
use crate::disk::block::{Location, BLOCK_SIZE};
use crate::disk::directory::ENTRY_SIZE;
use crate::disk::error::{BamError, GeometryError};
use crate::disk::geometry::Track;
use crate::disk::header::HeaderFormat;

// The "next track" routines reflect the information in Peter Schepers'
// DISK.TXT document found at:
// http://ist.uwaterloo.ca/~schepers/formats/DISK.TXT

/// A DiskFormat describes the logical layout CBM DOS imposes on the raw
/// geometry: where the directory lives, which tracks hold files, and how new
/// blocks are chosen.
pub struct DiskFormat {
    pub directory_track: u8,
    /// This should be pointed to from the header sector, but the various image
    /// format documents say not to trust it.
    pub first_directory_sector: u8,
    pub first_track: u8,
    /// The last track in normal use.  (I.e., inclusive -- not the last track
    /// plus one.)  Extended 40-track images have tracks beyond this one, but
    /// CBM DOS never allocates them.
    pub last_track: u8,
    /// Sectors skipped between consecutive blocks of a file.
    pub interleave: u8,
    /// Directory sectors are read back-to-back without host I/O in between,
    /// so they use a tighter interleave.
    pub directory_interleave: u8,
    pub tracks: &'static [Track],
    pub header: &'static HeaderFormat,
    pub bam: &'static BamFormat,
}

impl DiskFormat {
    #[inline]
    pub fn sectors_in_track(&self, track: u8) -> u8 {
        self.tracks[track as usize].sectors
    }

    #[inline]
    pub fn first_directory_location(&self) -> Location {
        Location(self.directory_track, self.first_directory_sector)
    }

    /// Is this track one that files may be allocated on?
    #[inline]
    pub fn is_data_track(&self, track: u8) -> bool {
        track >= self.first_track && track <= self.last_track && track != self.directory_track
    }

    /// Return the locations reserved by CBM DOS on a freshly formatted disk.
    pub fn system_locations(&self) -> Vec<Location> {
        let mut locations = vec![
            self.header.location,
            self.bam.location,
            self.first_directory_location(),
        ];
        // On the 1541 the BAM sector and header sector are the same.
        locations.sort();
        locations.dedup();
        locations
    }

    /// Return the maximum number of directory entries that are possible for
    /// this format.
    pub fn max_directory_entries(&self) -> usize {
        let total_sectors = self.sectors_in_track(self.directory_track) as usize;
        // -1 because system_locations includes the first directory sector.
        let used_sectors = self
            .system_locations()
            .iter()
            .filter(|Location(t, _)| *t == self.directory_track)
            .count()
            - 1;
        (total_sectors - used_sectors) * BLOCK_SIZE / ENTRY_SIZE
    }

    /// Return the total number of data blocks available for files on a freshly
    /// formatted disk. This is the equivalent of the listed "blocks free"
    /// on a blank disk.
    pub fn total_data_blocks(&self) -> usize {
        (self.first_track..=self.last_track)
            .filter(|t| self.is_data_track(*t))
            .map(|t| self.sectors_in_track(t) as usize)
            .sum()
    }

    /// Pick the block for a new file: the first free sector on the free track
    /// nearest the directory, trying the track above before the one below.
    fn first_free_block(&self, bam: &Bam) -> Result<Location, BamError> {
        let max_distance = ::std::cmp::max(
            self.directory_track - self.first_track,
            self.last_track - self.directory_track,
        );
        for distance in 1..=max_distance {
            let above = self.directory_track + distance;
            let candidates = [
                Some(above).filter(|t| *t <= self.last_track),
                self.directory_track
                    .checked_sub(distance)
                    .filter(|t| *t >= self.first_track),
            ];
            for track in candidates.iter().flatten() {
                let map = bam.free_map(*track);
                if map != 0 {
                    return Ok(Location(*track, map.trailing_zeros() as u8));
                }
            }
        }
        Err(BamError::Full)
    }

    // If a free track is successfully found, return (track, reset_sector).
    fn next_free_track(&self, bam: &Bam, previous_track: u8) -> Result<(u8, bool), BamError> {
        // The CBM algorithm is to grow files away from the central directory
        // track.  Three passes fully scan the disk: the first covers the
        // current half from the current track outward, the second the other
        // half in its entirety, and the third the original half in its
        // entirety, catching any inward availability the first pass missed.
        const NUM_PASSES: usize = 3;
        let mut passes = NUM_PASSES;
        let mut reset_sector = false;
        let mut track = previous_track;

        while passes > 0 {
            if bam.free_map(track) != 0 {
                return Ok((track, reset_sector));
            }

            if track < self.directory_track {
                // Bottom half: Scan downwards.
                track -= 1;
                if track < self.first_track {
                    track = self.directory_track + 1;
                    passes -= 1;
                    reset_sector = true;
                }
            } else {
                // Top half: Scan upwards.
                track += 1;
                if track > self.last_track {
                    track = self.directory_track - 1;
                    passes -= 1;
                    reset_sector = true;
                }
            }
        }
        Err(BamError::Full)
    }

    /// Advance `sector` by `interleave` and scan forward (wrapping) for a free
    /// sector on `track`.
    fn free_sector_after(&self, bam: &Bam, track: u8, sector: u8, interleave: u8) -> Result<Location, BamError> {
        let num_sectors = self.sectors_in_track(track);
        let map = bam.free_map(track);
        if map == 0 {
            return Err(BamError::Full);
        }

        let mut sector = sector + interleave;
        while sector >= num_sectors {
            sector -= num_sectors;
            // From DISK.TXT:
            // "Empirical optimization, get one sector backwards if beyond sector zero"
            if sector > 0 {
                sector -= 1;
            }
        }

        // A non-empty masked map guarantees a hit within one revolution.
        let start_sector = sector;
        loop {
            if map >> sector & 1 == 1 {
                return Ok(Location(track, sector));
            }
            sector += 1;
            if sector >= num_sectors {
                sector = 0;
            }
            if sector == start_sector {
                return Err(BamError::Full);
            }
        }
    }

    fn next_free_block_from_previous(&self, bam: &Bam, previous: Location) -> Result<Location, BamError> {
        let (track, reset_sector) = self.next_free_track(bam, previous.0)?;
        if reset_sector {
            self.free_sector_after(bam, track, 0, 0)
        } else {
            self.free_sector_after(bam, track, previous.1, self.interleave)
        }
    }

    /// Reject a sector beyond the end of a track this format manages.
    fn check_sector(&self, location: Location) -> Result<(), GeometryError> {
        let sectors = self.sectors_in_track(location.0);
        if location.1 >= sectors {
            return Err(GeometryError::SectorOutOfRange {
                track: location.0,
                sector: location.1,
                sectors,
            });
        }
        Ok(())
    }

    /// Choose the next block for a file, given the previous block of the same
    /// file (or `None` for the file's first block).  The BAM is not modified.
    ///
    /// A file's first block goes above the directory track before below it,
    /// but later blocks continue away from the directory track, as CBM DOS
    /// does, so a file started below track 18 keeps growing downwards.
    pub fn next_free_block(&self, bam: &Bam, previous: Option<Location>) -> Result<Location, BamError> {
        match previous {
            Some(previous) if self.is_data_track(previous.0) => {
                self.check_sector(previous)?;
                self.next_free_block_from_previous(bam, previous)
            }
            _ => self.first_free_block(bam),
        }
    }

    /// Choose the next directory block.  Directory sectors are only ever
    /// allocated on the directory track.
    pub fn next_free_directory_block(&self, bam: &Bam, previous: Location) -> Result<Location, BamError> {
        let sector = if previous.0 == self.directory_track {
            self.check_sector(previous)?;
            previous.1
        } else {
            self.first_directory_sector
        };
        self.free_sector_after(bam, self.directory_track, sector, self.directory_interleave)
    }
}
