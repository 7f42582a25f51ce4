use d64::disk::{DiskImage, GeometryVariant, BLOCK_SIZE};

const BAM_OFFSET: usize = 0x16500;
const DIRECTORY_OFFSET: usize = 0x16600;
const PADDING_BYTE: u8 = 0xA0;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// The bytes of a freshly formatted 35-track image, as CBM DOS leaves it
/// after "N:name,id".
pub fn blank_image_bytes(name: &[u8], id: &[u8; 2]) -> Vec<u8> {
    let geometry = GeometryVariant::Tracks35.geometry();
    let mut bytes = vec![0u8; geometry.size()];
    let bam = &mut bytes[BAM_OFFSET..BAM_OFFSET + BLOCK_SIZE];
    bam[..3].copy_from_slice(&[18, 1, b'A']);
    for track in 1..=35u8 {
        let sectors = geometry.sectors_for(track).unwrap();
        let mut map: u32 = (1 << sectors) - 1;
        if track == 18 {
            // The BAM and the first directory sector.
            map &= !0b11;
        }
        let offset = 4 + (track as usize - 1) * 4;
        bam[offset] = map.count_ones() as u8;
        bam[offset + 1..offset + 4].copy_from_slice(&map.to_le_bytes()[..3]);
    }
    bam[0x90..0xAB].copy_from_slice(&[PADDING_BYTE; 0x1B]);
    bam[0x90..0x90 + name.len()].copy_from_slice(name);
    bam[0xA2..0xA4].copy_from_slice(id);
    bam[0xA5..0xA7].copy_from_slice(b"2A");
    bytes[DIRECTORY_OFFSET + 1] = 0xFF;
    bytes
}

pub fn blank_disk() -> DiskImage {
    DiskImage::open(blank_image_bytes(b"FIXTURE", b"01"), GeometryVariant::Tracks35).unwrap()
}
