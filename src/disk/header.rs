use std::fmt;

use crate::disk::block::Location;
use crate::disk::error::WriteError;
use crate::disk::{Id, DISK_NAME_SIZE, PADDING_BYTE};
use crate::petscii::Petscii;

/// A HeaderFormat describes where header information is stored within the
/// header sector.
pub struct HeaderFormat {
    pub location: Location,
    // offsets
    pub first_directory_offset: usize,
    pub dos_version_offset: usize,
    pub disk_name_offset: usize,
    pub disk_id_offset: usize,
    pub dos_type_offset: usize,
    pub padding_offsets: &'static [u8],
}

/// The disk-wide fields held in the header sector, which on the 1541 is the
/// BAM sector.
#[derive(Clone, PartialEq, Eq)]
pub struct Header {
    // http://unusedino.de/ec64/technical/formats/d64.html
    // says to not trust this field.
    pub first_directory_sector: Location,
    pub dos_version: u8,
    pub disk_name: Petscii,
    pub disk_id: Id,
    pub dos_type: Id,
}

impl Header {
    /// Parse a header from the contents of the header sector.  No particular
    /// values are enforced for the DOS version or type.
    pub fn read(block: &[u8], format: &HeaderFormat) -> Header {
        let name = &block[format.disk_name_offset..format.disk_name_offset + DISK_NAME_SIZE];
        Header {
            first_directory_sector: Location::from_bytes(&block[format.first_directory_offset..]),
            dos_version: block[format.dos_version_offset],
            disk_name: Petscii::from_padded_bytes(name, PADDING_BYTE),
            disk_id: Id::from_bytes(&block[format.disk_id_offset..format.disk_id_offset + 2]),
            dos_type: Id::from_bytes(&block[format.dos_type_offset..format.dos_type_offset + 2]),
        }
    }

    /// Render the header into the header sector.  Only the known fields are
    /// written, so anything else in the sector (such as the BAM) is preserved.
    pub fn write(&self, block: &mut [u8], format: &HeaderFormat) -> Result<(), WriteError> {
        self.disk_name.write_bytes_with_padding(
            &mut block[format.disk_name_offset..format.disk_name_offset + DISK_NAME_SIZE],
            PADDING_BYTE,
        )?;
        self.first_directory_sector
            .write_bytes(&mut block[format.first_directory_offset..]);
        block[format.dos_version_offset] = self.dos_version;
        block[format.disk_id_offset..format.disk_id_offset + 2].copy_from_slice(self.disk_id.as_ref());
        block[format.dos_type_offset..format.dos_type_offset + 2].copy_from_slice(self.dos_type.as_ref());

        // Without these, CBM DOS garbles the header line of a directory listing.
        for padding_offset in format.padding_offsets {
            block[*padding_offset as usize] = PADDING_BYTE;
        }
        Ok(())
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "disk name: {:?}", self.disk_name)?;
        writeln!(f, "disk id: {}", self.disk_id)?;
        writeln!(f, "directory: {}", self.first_directory_sector)?;
        writeln!(
            f,
            "dos version and type: {} {}",
            Petscii::from_bytes(&[self.dos_version]),
            self.dos_type
        )
    }
}
