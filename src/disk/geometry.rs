use crate::disk::block::{Location, BLOCK_SIZE};
use crate::disk::error::GeometryError;

/// Per-track layout parameters.
pub struct Track {
    pub sectors: u8,
    pub sector_offset: u16,
    pub byte_offset: u32,
}

#[rustfmt::skip]
pub(crate) static TRACKS: [Track; 41] = [
    Track { sectors: 0,  sector_offset: 0,   byte_offset: 0, }, // There is no track 0.
    Track { sectors: 21, sector_offset: 0,   byte_offset: 0x00000, }, // 1
    Track { sectors: 21, sector_offset: 21,  byte_offset: 0x01500, }, // 2
    Track { sectors: 21, sector_offset: 42,  byte_offset: 0x02A00, }, // 3
    Track { sectors: 21, sector_offset: 63,  byte_offset: 0x03F00, }, // 4
    Track { sectors: 21, sector_offset: 84,  byte_offset: 0x05400, }, // 5
    Track { sectors: 21, sector_offset: 105, byte_offset: 0x06900, }, // 6
    Track { sectors: 21, sector_offset: 126, byte_offset: 0x07E00, }, // 7
    Track { sectors: 21, sector_offset: 147, byte_offset: 0x09300, }, // 8
    Track { sectors: 21, sector_offset: 168, byte_offset: 0x0A800, }, // 9
    Track { sectors: 21, sector_offset: 189, byte_offset: 0x0BD00, }, // 10
    Track { sectors: 21, sector_offset: 210, byte_offset: 0x0D200, }, // 11
    Track { sectors: 21, sector_offset: 231, byte_offset: 0x0E700, }, // 12
    Track { sectors: 21, sector_offset: 252, byte_offset: 0x0FC00, }, // 13
    Track { sectors: 21, sector_offset: 273, byte_offset: 0x11100, }, // 14
    Track { sectors: 21, sector_offset: 294, byte_offset: 0x12600, }, // 15
    Track { sectors: 21, sector_offset: 315, byte_offset: 0x13B00, }, // 16
    Track { sectors: 21, sector_offset: 336, byte_offset: 0x15000, }, // 17
    Track { sectors: 19, sector_offset: 357, byte_offset: 0x16500, }, // 18
    Track { sectors: 19, sector_offset: 376, byte_offset: 0x17800, }, // 19
    Track { sectors: 19, sector_offset: 395, byte_offset: 0x18B00, }, // 20
    Track { sectors: 19, sector_offset: 414, byte_offset: 0x19E00, }, // 21
    Track { sectors: 19, sector_offset: 433, byte_offset: 0x1B100, }, // 22
    Track { sectors: 19, sector_offset: 452, byte_offset: 0x1C400, }, // 23
    Track { sectors: 19, sector_offset: 471, byte_offset: 0x1D700, }, // 24
    Track { sectors: 18, sector_offset: 490, byte_offset: 0x1EA00, }, // 25
    Track { sectors: 18, sector_offset: 508, byte_offset: 0x1FC00, }, // 26
    Track { sectors: 18, sector_offset: 526, byte_offset: 0x20E00, }, // 27
    Track { sectors: 18, sector_offset: 544, byte_offset: 0x22000, }, // 28
    Track { sectors: 18, sector_offset: 562, byte_offset: 0x23200, }, // 29
    Track { sectors: 18, sector_offset: 580, byte_offset: 0x24400, }, // 30
    Track { sectors: 17, sector_offset: 598, byte_offset: 0x25600, }, // 31
    Track { sectors: 17, sector_offset: 615, byte_offset: 0x26700, }, // 32
    Track { sectors: 17, sector_offset: 632, byte_offset: 0x27800, }, // 33
    Track { sectors: 17, sector_offset: 649, byte_offset: 0x28900, }, // 34
    Track { sectors: 17, sector_offset: 666, byte_offset: 0x29A00, }, // 35
    Track { sectors: 17, sector_offset: 683, byte_offset: 0x2AB00, }, // 36
    Track { sectors: 17, sector_offset: 700, byte_offset: 0x2BC00, }, // 37
    Track { sectors: 17, sector_offset: 717, byte_offset: 0x2CD00, }, // 38
    Track { sectors: 17, sector_offset: 734, byte_offset: 0x2DE00, }, // 39
    Track { sectors: 17, sector_offset: 751, byte_offset: 0x2EF00, }, // 40
];

static GEOMETRY_35: Geometry = Geometry {
    track_layouts: &TRACKS,
    tracks: 35,
};

static GEOMETRY_40: Geometry = Geometry {
    track_layouts: &TRACKS,
    tracks: 40,
};

/// The two supported 1541 layouts.  Extended 40-track images are addressable
/// in full, but CBM DOS (and so the BAM) only manages the first 35 tracks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GeometryVariant {
    #[default]
    Tracks35,
    Tracks40,
}

impl GeometryVariant {
    #[inline]
    pub fn geometry(self) -> &'static Geometry {
        match self {
            GeometryVariant::Tracks35 => &GEOMETRY_35,
            GeometryVariant::Tracks40 => &GEOMETRY_40,
        }
    }

    /// Given a disk image file size, return the matching variant.
    pub fn from_size(size: usize) -> Option<GeometryVariant> {
        [GeometryVariant::Tracks35, GeometryVariant::Tracks40]
            .into_iter()
            .find(|v| v.geometry().size() == size)
    }
}

/// A `Geometry` specifies the track and sector layout of a disk image.  All
/// addressing goes through here, so an out-of-range track or sector is
/// reported rather than wrapped.
pub struct Geometry {
    pub track_layouts: &'static [Track],
    pub tracks: u8,
}

impl Geometry {
    #[inline]
    pub fn tracks(&self) -> u8 {
        self.tracks
    }

    pub fn sectors_for(&self, track: u8) -> Result<u8, GeometryError> {
        if track < 1 || track > self.tracks {
            return Err(GeometryError::TrackOutOfRange {
                track,
                max: self.tracks,
            });
        }
        Ok(self.track_layouts[track as usize].sectors)
    }

    pub fn check(&self, location: Location) -> Result<(), GeometryError> {
        let sectors = self.sectors_for(location.0)?;
        if location.1 >= sectors {
            return Err(GeometryError::SectorOutOfRange {
                track: location.0,
                sector: location.1,
                sectors,
            });
        }
        Ok(())
    }

    #[inline]
    pub fn contains(&self, location: Location) -> bool {
        self.check(location).is_ok()
    }

    /// Return the byte offset of a sector within the image.
    pub fn sector_offset(&self, location: Location) -> Result<usize, GeometryError> {
        self.check(location)?;
        let track = &self.track_layouts[location.0 as usize];
        Ok(track.byte_offset as usize + location.1 as usize * BLOCK_SIZE)
    }

    /// Return the zero-based linear index of a sector, counting from (1,0).
    pub fn sector_index(&self, location: Location) -> Result<usize, GeometryError> {
        self.check(location)?;
        Ok(self.track_layouts[location.0 as usize].sector_offset as usize + location.1 as usize)
    }

    pub fn total_sectors(&self) -> usize {
        self.track_layouts[1..=self.tracks as usize]
            .iter()
            .map(|t| t.sectors as usize)
            .sum()
    }

    /// Return the total number of bytes in a disk image of this geometry.
    #[inline]
    pub fn size(&self) -> usize {
        self.total_sectors() * BLOCK_SIZE
    }

    pub fn check_size(&self, size: usize) -> Result<(), GeometryError> {
        if size != self.size() {
            return Err(GeometryError::BufferSizeMismatch {
                expected: self.size(),
                actual: size,
            });
        }
        Ok(())
    }

    #[inline]
    pub fn locations(&self) -> LocationIterator {
        LocationIterator::new(self)
    }
}

/// Iterate over every location in a geometry, in track/sector order.
pub struct LocationIterator {
    last_track: u8,
    tracks: &'static [Track],
    next: Option<Location>,
}

impl LocationIterator {
    fn new(geometry: &Geometry) -> LocationIterator {
        LocationIterator {
            last_track: geometry.tracks,
            tracks: geometry.track_layouts,
            next: Some(Location::new(1, 0)),
        }
    }
}

impl Iterator for LocationIterator {
    type Item = Location;

    fn next(&mut self) -> Option<Location> {
        let location = self.next?;
        let mut next = Location(location.0, location.1 + 1);
        if next.1 >= self.tracks[next.0 as usize].sectors {
            next = Location(next.0 + 1, 0);
        }
        self.next = if next.0 > self.last_track {
            None
        } else {
            Some(next)
        };
        Some(location)
    }
}
