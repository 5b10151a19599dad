//! Field layout of the NOFF executable header.
//!
//! Parsing an actual NOFF binary is explicitly out of scope (§1); this
//! crate only needs the three segment descriptors to know how many pages
//! an address space requires and where each segment's bytes live in the
//! program image.

/// Magic number identifying a valid NOFF header.
pub const NOFF_MAGIC: i32 = 0xBADFAD_i32;

const HEADER_LEN: usize = 4 * (1 + 3 * 3);

/// One of a NOFF file's three segment descriptors.
#[derive(Debug, Clone, Copy, Default)]
pub struct Segment {
    /// Offset of this segment's first byte within the program image.
    pub virtual_addr: u32,
    /// Offset of this segment's first byte within the NOFF file.
    pub in_file_addr: u32,
    /// Length of the segment in bytes.
    pub size: u32,
}

/// The fixed-layout header at the start of a NOFF executable: a magic
/// number followed by code, initialized-data, and uninitialized-data
/// segment descriptors.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoffHeader {
    pub magic: i32,
    pub code: Segment,
    pub init_data: Segment,
    pub uninit_data: Segment,
}

/// Errors parsing a NOFF header.
#[derive(Debug, thiserror::Error)]
pub enum NoffError {
    #[error("program image too short to contain a NOFF header: {0} bytes")]
    TooShort(usize),
    #[error("bad NOFF magic number: {0:#x}")]
    BadMagic(i32),
}

fn read_i32(bytes: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
}

fn read_segment(bytes: &[u8], offset: usize) -> Segment {
    Segment {
        virtual_addr: read_i32(bytes, offset) as u32,
        in_file_addr: read_i32(bytes, offset + 4) as u32,
        size: read_i32(bytes, offset + 8) as u32,
    }
}

impl NoffHeader {
    /// Parses a NOFF header from the start of a program image.
    pub fn parse(bytes: &[u8]) -> Result<NoffHeader, NoffError> {
        if bytes.len() < HEADER_LEN {
            return Err(NoffError::TooShort(bytes.len()));
        }
        let magic = read_i32(bytes, 0);
        if magic != NOFF_MAGIC {
            return Err(NoffError::BadMagic(magic));
        }
        Ok(NoffHeader {
            magic,
            code: read_segment(bytes, 4),
            init_data: read_segment(bytes, 16),
            uninit_data: read_segment(bytes, 28),
        })
    }

    /// Total bytes of program image described by this header (the three
    /// segments, back to back in virtual-address order).
    pub fn image_size(&self) -> u32 {
        self.code.size + self.init_data.size + self.uninit_data.size
    }
}
