use std::fmt;

use crate::disk::directory::{DirectoryEntry, FileType};
use crate::petscii::Petscii;

const WILDCARD_REST: u8 = b'*';
const WILDCARD_ONE: u8 = b'?';
const TYPE_SEPARATOR: u8 = b'=';

/// A CBM DOS filename pattern.
///
/// `*` matches the remainder of the name (anything after it in the pattern is
/// ignored), and `?` matches any single character.  A trailing `=X`, where X
/// is one of the type letters D, S, P, U or R, restricts matches to that file
/// type.  Without a `*`, the pattern must match the whole name.
#[derive(Clone, PartialEq, Eq)]
pub struct Pattern {
    name: Petscii,
    file_type: Option<FileType>,
}

impl Pattern {
    pub fn new(pattern: &str) -> Pattern {
        Self::from_petscii(Petscii::from(pattern))
    }

    pub fn from_petscii(pattern: Petscii) -> Pattern {
        let bytes = pattern.as_bytes();
        if bytes.len() >= 2 && bytes[bytes.len() - 2] == TYPE_SEPARATOR {
            if let Some(file_type) = FileType::from_letter(bytes[bytes.len() - 1]) {
                let name = &bytes[..bytes.len() - 2];
                // "=S" on its own selects every file of that type.
                let name = if name.is_empty() { &[WILDCARD_REST][..] } else { name };
                return Pattern {
                    name: Petscii::from_bytes(name),
                    file_type: Some(file_type),
                };
            }
        }
        Pattern {
            name: pattern,
            file_type: None,
        }
    }

    #[inline]
    pub fn file_type(&self) -> Option<FileType> {
        self.file_type
    }

    /// Match a filename with its 0xA0 padding already removed.
    pub fn matches_name(&self, name: &[u8]) -> bool {
        let pattern = self.name.as_bytes();
        for (i, p) in pattern.iter().enumerate() {
            match *p {
                WILDCARD_REST => return true,
                WILDCARD_ONE if i < name.len() => {}
                c if name.get(i) == Some(&c) => {}
                _ => return false,
            }
        }
        pattern.len() == name.len()
    }

    pub fn matches(&self, entry: &DirectoryEntry) -> bool {
        if let Some(file_type) = self.file_type {
            if entry.file_attributes.file_type != file_type {
                return false;
            }
        }
        self.matches_name(entry.filename.as_bytes())
    }
}

impl From<&str> for Pattern {
    fn from(pattern: &str) -> Pattern {
        Pattern::new(pattern)
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.name)?;
        if let Some(file_type) = self.file_type {
            write!(f, "={}", file_type.letter() as char)?;
        }
        Ok(())
    }
}
