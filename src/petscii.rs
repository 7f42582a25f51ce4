//! PETSCII strings.
//!
//! Filenames and disk labels on CBM media are PETSCII, not ASCII.  A
//! `Petscii` value holds the raw bytes exactly as found on disk, so names
//! containing graphics characters survive a read/write round trip.  Converting
//! to and from Unicode is explicit and uses the unshifted (upper-case and
//! graphics) character set, which is what a 1541 directory listing shows by
//! default.
//!
//! Bytes without a printable equivalent are rendered as `{$xx}` escapes, and
//! the same escapes are accepted when converting from a string.

use std::fmt;

use crate::disk::WriteError;

const ESCAPE_START: &str = "{$";
const ESCAPE_END: char = '}';
const SUBSTITUTE: u8 = b'?';

#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Petscii(Vec<u8>);

impl Petscii {
    pub fn from_bytes(bytes: &[u8]) -> Petscii {
        Petscii(bytes.to_vec())
    }

    /// Build from a fixed-size field, discarding any trailing padding bytes.
    pub fn from_padded_bytes(bytes: &[u8], padding: u8) -> Petscii {
        let end = bytes
            .iter()
            .rposition(|&b| b != padding)
            .map_or(0, |p| p + 1);
        Petscii(bytes[..end].to_vec())
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Write into a fixed-size field, filling the remainder with `padding`.
    pub fn write_bytes_with_padding(&self, bytes: &mut [u8], padding: u8) -> Result<(), WriteError> {
        if self.0.len() > bytes.len() {
            return Err(WriteError::FilenameTooLong);
        }
        let (head, tail) = bytes.split_at_mut(self.0.len());
        head.copy_from_slice(&self.0);
        tail.iter_mut().for_each(|b| *b = padding);
        Ok(())
    }

    /// Render as a Unicode string, escaping bytes that have no printable
    /// equivalent.
    pub fn to_escaped_string(&self) -> String {
        let mut string = String::with_capacity(self.0.len());
        for &byte in &self.0 {
            match decode(byte) {
                Some(c) => string.push(c),
                None => string.push_str(&format!("{}{:02x}{}", ESCAPE_START, byte, ESCAPE_END)),
            }
        }
        string
    }

    fn encode_str(string: &str) -> Petscii {
        let mut bytes = Vec::with_capacity(string.len());
        let mut rest = string;
        while let Some(c) = rest.chars().next() {
            if let Some((byte, len)) = parse_escape(rest) {
                bytes.push(byte);
                rest = &rest[len..];
                continue;
            }
            bytes.push(encode(c).unwrap_or(SUBSTITUTE));
            rest = &rest[c.len_utf8()..];
        }
        Petscii(bytes)
    }
}

/// Decode one byte using the unshifted character set.
fn decode(byte: u8) -> Option<char> {
    match byte {
        0x20..=0x5B | 0x5D => Some(byte as char),
        0x5C => Some('£'),
        0x5E => Some('↑'),
        0x5F => Some('←'),
        _ => None,
    }
}

fn encode(c: char) -> Option<u8> {
    match c {
        ' '..='[' | ']' => Some(c as u8),
        'a'..='z' => Some(c.to_ascii_uppercase() as u8),
        '£' => Some(0x5C),
        '↑' => Some(0x5E),
        '←' => Some(0x5F),
        _ => None,
    }
}

/// Parse a leading `{$xx}` escape, returning the byte and the escape length.
fn parse_escape(s: &str) -> Option<(u8, usize)> {
    let digits = s.strip_prefix(ESCAPE_START)?.get(..3)?;
    if !digits.ends_with(ESCAPE_END) {
        return None;
    }
    let byte = u8::from_str_radix(&digits[..2], 16).ok()?;
    Some((byte, ESCAPE_START.len() + 3))
}

impl AsRef<[u8]> for Petscii {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl<'a> From<&'a str> for Petscii {
    fn from(string: &str) -> Petscii {
        Petscii::encode_str(string)
    }
}

impl From<String> for Petscii {
    fn from(string: String) -> Petscii {
        Petscii::encode_str(&string)
    }
}

impl<'a> From<&'a String> for Petscii {
    fn from(string: &String) -> Petscii {
        Petscii::encode_str(string)
    }
}

impl<'a> From<&'a [u8]> for Petscii {
    fn from(bytes: &[u8]) -> Petscii {
        Petscii::from_bytes(bytes)
    }
}

impl From<Vec<u8>> for Petscii {
    fn from(bytes: Vec<u8>) -> Petscii {
        Petscii(bytes)
    }
}

impl<'a> From<&'a Petscii> for Petscii {
    fn from(petscii: &Petscii) -> Petscii {
        petscii.clone()
    }
}

impl From<Petscii> for String {
    fn from(petscii: Petscii) -> String {
        petscii.to_escaped_string()
    }
}

impl fmt::Display for Petscii {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // Honor width and alignment, e.g. "{:16}" in directory listings.
        f.pad(&self.to_escaped_string())
    }
}

impl fmt::Debug for Petscii {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "\"{}\"", self.to_escaped_string())
    }
}
