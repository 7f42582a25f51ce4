use std::fmt;

/// Write a hexdump of the provided byte slice, one 16-byte row per line.
pub fn hexdump(f: &mut fmt::Formatter, prefix: &str, buffer: &[u8]) -> fmt::Result {
    const COLUMNS: usize = 16;
    if buffer.is_empty() {
        // Print at least an offset for a zero-length buffer.
        return write!(f, "{}{:04x}: ", prefix, 0);
    }
    for (row_index, row) in buffer.chunks(COLUMNS).enumerate() {
        if row_index > 0 {
            writeln!(f)?;
        }
        write!(f, "{}{:04x}: ", prefix, row_index * COLUMNS)?;

        for b in row {
            write!(f, "{:02x} ", b)?;
        }
        for _ in row.len()..COLUMNS {
            f.write_str("   ")?;
        }

        // ASCII column
        for b in row {
            let c = match *b {
                c @ 0x20..=0x7E => c as char,
                _ => '.',
            };
            write!(f, "{}", c)?;
        }
    }
    Ok(())
}

pub struct Hex<'a>(pub &'a [u8]);

impl<'a> fmt::Display for Hex<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        hexdump(f, "", self.0)
    }
}

pub fn hex(bytes: &[u8]) -> Hex {
    Hex(bytes)
}
