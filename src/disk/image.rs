use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use memmap::{Mmap, MmapMut, MmapOptions};

use crate::disk::error::{DiskError, WriteError};

/// Provide backing storage (file or memory) for disk images.
pub enum Image {
    ReadOnlyMap(Mmap),
    ReadWriteMap(MmapMut),
    Memory(Box<[u8]>),
}

impl Image {
    pub fn from_vec(buffer: Vec<u8>) -> Image {
        Image::Memory(buffer.into_boxed_slice())
    }

    pub fn open_read_only<P: AsRef<Path>>(path: P) -> io::Result<Image> {
        let file = File::open(path)?;
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        Ok(Image::ReadOnlyMap(mmap))
    }

    pub fn open_read_write<P: AsRef<Path>>(path: P) -> io::Result<Image> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let mmap = unsafe { MmapOptions::new().map_mut(&file)? };
        Ok(Image::ReadWriteMap(mmap))
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            Image::ReadOnlyMap(mmap) => &mmap[..],
            Image::ReadWriteMap(mmap) => &mmap[..],
            Image::Memory(array) => &array[..],
        }
    }

    pub fn as_mut_slice(&mut self) -> Result<&mut [u8], WriteError> {
        match self {
            Image::ReadOnlyMap(_) => Err(WriteError::ReadOnly),
            Image::ReadWriteMap(mmap) => Ok(&mut mmap[..]),
            Image::Memory(array) => Ok(&mut array[..]),
        }
    }

    pub fn check_writability(&self) -> Result<(), WriteError> {
        match self {
            Image::ReadOnlyMap(_) => Err(WriteError::ReadOnly),
            Image::ReadWriteMap(_) | Image::Memory(_) => Ok(()),
        }
    }

    pub fn flush(&mut self) -> Result<(), DiskError> {
        match self {
            Image::ReadOnlyMap(_) => Err(WriteError::ReadOnly.into()),
            Image::ReadWriteMap(mmap) => Ok(mmap.flush()?),
            Image::Memory(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_image() {
        let mut image = Image::from_vec(vec![0u8; 512]);
        assert_eq!(image.len(), 512);
        image.as_mut_slice().unwrap()[300] = 0x42;
        assert_eq!(image.as_slice()[300], 0x42);
        assert!(image.check_writability().is_ok());
        assert!(image.flush().is_ok());
    }
}
