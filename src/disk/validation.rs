use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::disk::bam::Bam;
use crate::disk::block::{BlockDevice, Location};
use crate::disk::chain::ChainIterator;
use crate::disk::directory::{Directory, DirectoryEntry};
use crate::disk::error::ChainError;
use crate::petscii::Petscii;

/// A validation error represents an inconsistency in the disk image found by
/// `validate()`.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("system sector not allocated: {0}")]
    SystemSectorNotAllocated(Location),
    #[error("sector misallocated: {0}")]
    SectorMisallocated(Location),
    #[error("sector {0} misoccupied by file: {1:?}")]
    SectorMisoccupied(Location, Petscii),
    #[error("sector {0} occupied by multiple files, including at least: {1:?} {2:?}")]
    SectorOveroccupied(Location, Petscii, Petscii),
    #[error("track {0} free sector count disagrees with its bitmap")]
    FreeCountMismatch(u8),
    #[error("error scanning {1:?}: {0}")]
    FileScanError(ChainError, Petscii),
    #[error("error scanning directory: {0}")]
    DirectoryScanError(ChainError),
}

/// Return every sector a file occupies: its data chain and, for relative
/// files, its side sector chain.
fn scan_file(blocks: &dyn BlockDevice, entry: &DirectoryEntry) -> Result<Vec<Location>, ChainError> {
    let mut locations = ChainIterator::new(blocks, entry.first_sector).locations()?;
    if let Some(side_sectors) = entry.extra.side_sectors() {
        locations.extend(ChainIterator::new(blocks, side_sectors).locations()?);
    }
    Ok(locations)
}

/// Check the consistency of the provided disk.  Unlike the "validate" ("v0:")
/// command in CBM DOS, this is a read-only operation and does not attempt any
/// repairs.  A list of validation errors is returned.
pub fn validate(blocks: &dyn BlockDevice, bam: &Bam) -> Vec<ValidationError> {
    static SYSTEM_OWNER: &str = "CBM DOS";
    let format = bam.format();
    let mut errors: Vec<ValidationError> = vec![];
    let system_sectors: HashSet<Location> = format.system_locations().into_iter().collect();
    let allocated_sectors: HashSet<Location> = bam.allocated_sectors().into_iter().collect();
    let free_sectors: HashSet<Location> = bam.free_sectors().into_iter().collect();

    errors.extend(
        bam.inconsistent_tracks()
            .into_iter()
            .map(ValidationError::FreeCountMismatch),
    );

    // Build a list of all occupied sectors and their owners
    // 1. System sectors
    let mut occupied_sector_map: HashMap<Location, Petscii> = system_sectors
        .iter()
        .map(|location| (*location, SYSTEM_OWNER.into()))
        .collect();

    // 2. The directory chain
    let directory = Directory::open(blocks, bam);
    match ChainIterator::links_only(blocks, directory.root()).locations() {
        Ok(locations) => {
            for location in locations {
                occupied_sector_map.insert(location, SYSTEM_OWNER.into());
            }
        }
        Err(e) => errors.push(ValidationError::DirectoryScanError(e)),
    }

    // 3. All files
    for entry in directory.iter(false) {
        let entry = match entry {
            Ok(entry) => entry,
            // Already reported above.
            Err(_) => break,
        };
        let file_occupied_sectors = match scan_file(blocks, &entry) {
            Ok(locations) => locations,
            Err(e) => {
                errors.push(ValidationError::FileScanError(e, entry.filename.clone()));
                continue;
            }
        };
        for location in file_occupied_sectors {
            match occupied_sector_map.entry(location) {
                Entry::Occupied(owner) => {
                    errors.push(ValidationError::SectorOveroccupied(
                        location,
                        owner.get().clone(),
                        entry.filename.clone(),
                    ));
                }
                Entry::Vacant(v) => {
                    v.insert(entry.filename.clone());
                }
            };
        }
    }

    // Confirm all system sectors are still allocated
    let mut system_sectors: Vec<Location> = system_sectors.into_iter().collect();
    system_sectors.sort();
    for location in system_sectors.iter() {
        if !allocated_sectors.contains(location) {
            errors.push(ValidationError::SystemSectorNotAllocated(*location));
        }
    }

    // Look for sectors that are allocated but not occupied.
    let mut misallocated: Vec<Location> = allocated_sectors
        .iter()
        .filter(|location| !occupied_sector_map.contains_key(*location))
        .cloned()
        .collect();
    misallocated.sort();
    errors.extend(misallocated.into_iter().map(ValidationError::SectorMisallocated));

    // Look for sectors that are occupied but not allocated.  System sector
    // misoccupation was handled with SystemSectorNotAllocated above.
    let mut misoccupied: Vec<(Location, Petscii)> = occupied_sector_map
        .iter()
        .filter(|(location, _)| free_sectors.contains(*location) && !system_sectors.contains(*location))
        .map(|(location, owner)| (*location, owner.clone()))
        .collect();
    misoccupied.sort();
    errors.extend(
        misoccupied
            .into_iter()
            .map(|(location, owner)| ValidationError::SectorMisoccupied(location, owner)),
    );

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::chain;
    use crate::disk::test_support::blank_device;

    #[test]
    fn test_blank_disk_is_valid() {
        let (blocks, bam) = blank_device();
        assert_eq!(validate(&blocks, &bam), vec![]);
    }

    #[test]
    fn test_orphaned_chain() {
        let (mut blocks, mut bam) = blank_device();
        let start = chain::write_all(&mut blocks, &mut bam, &[0x11; 300]).unwrap();
        let second = ChainIterator::new(&blocks, start).locations().unwrap()[1];
        let mut expected = vec![
            ValidationError::SectorMisallocated(start),
            ValidationError::SectorMisallocated(second),
        ];
        expected.sort_by_key(|e| match e {
            ValidationError::SectorMisallocated(l) => *l,
            _ => Location(0, 0),
        });
        assert_eq!(validate(&blocks, &bam), expected);
    }

    #[test]
    fn test_system_sector_freed() {
        let (blocks, mut bam) = blank_device();
        bam.free(Location(18, 0)).unwrap();
        assert_eq!(
            validate(&blocks, &bam),
            vec![ValidationError::SystemSectorNotAllocated(Location(18, 0))]
        );
    }
}
