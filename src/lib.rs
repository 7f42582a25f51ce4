//! This is a Rust library for working with Commodore 1541 disk images in the
//! "D64" format: a flat byte array holding every sector of a 35-track (or
//! 40-track) floppy disk.
//!
//! Features:
//!
//! * Address any track and sector as a 256-byte block, with every access
//! checked against the disk geometry.
//! * Follow sector chains into byte streams, with loop detection so that a
//! corrupt image can't hang the reader.
//! * Iterate directory entries, including deleted ones on request, and look
//! files up by name or by CBM DOS wildcard pattern (`"T*"`, `"*=S"`).
//! * Read, write, delete, and rename files.
//! * Emulate the 1541 CBM DOS's "next available track and sector" algorithm
//! as closely as possible when writing files.
//! * Validate the consistency of disk images.
//! * Convert between Petscii and Unicode.
//!
//! Current shortcomings:
//!
//! * Disk images can't be formatted from scratch.
//! * Error tables appended to disk images are not supported.
//! * Relative (REL) files can be listed, read as a raw chain, and deleted,
//! but not written.
//!
//! # Example
//!
//! The following example opens a disk image and prints the directory
//! entries of all sequential files whose name starts with "T":
//!
//! ```no_run
//! use d64::disk::{DiskError, DiskImage, DiskOptions};
//! # fn list_files(disk_image_filename: &str) -> Result<(), DiskError> {
//!
//! // Open the disk image read-only
//! let disk = DiskImage::open_path(disk_image_filename, false, DiskOptions::new())?;
//!
//! println!("{}", disk);
//! for entry in disk.glob("T*=S", false) {
//!     println!("{}", entry?);
//! }
//! println!("{} blocks free.", disk.blocks_free());
//! # Ok(())
//! # }
//! ```
//!
//! # Design of disk image access
//!
//! Support for disk images was built using a layered scheme:
//!
//! 1. `Image` provides access to the underlying storage containing the disk
//!    image -- either a memory-mapped disk image file or an in-memory array.
//! 2. `BlockDevice` divides the image into tracks and sectors according to
//!    a `Geometry`.
//! 3. `DiskFormat` describes how the 1541 uses the tracks and sectors to store
//!    the disk header, Block Availability Map (BAM), and directory, and how
//!    it picks the next block of a file.
//! 4. `DiskImage` owns the block device and the BAM, and exposes high-level
//!    functionality such as listing, reading, and writing files.
//!
//! Blocks, chains, and directories are views borrowed from the `DiskImage`,
//! so sector data is handed to callers without copying, and the borrow
//! checker rules out modifying an image while something is reading it.
//!
//! CBM DOS tracks start at 1 instead of 0.  The API provided by this crate
//! reflects this 1-based indexing, and so does `Geometry.track_layouts` (with
//! the zeroth track unused), while the array of BAM entries is 0-based.

pub mod disk;

mod petscii;
mod util;

pub use crate::petscii::Petscii;
