//! Disk layout constants (§6).
//!
//! `SECTOR_SIZE` fixes everything else: a `FileHeader` must fit in
//! exactly one sector, which in turn fixes `NUM_DIRECT` (and so
//! `NUM_FIRST_LEVEL_DIRECT`) and `NUM_INDEX_DIRECT`.

/// Bytes per disk sector. The original's "typical" value (§6); a
/// `FileHeader` is sized to fit exactly one.
pub const SECTOR_SIZE: usize = 128;

/// Total sectors on the simulated disk.
pub const NUM_SECTORS: u32 = 512;

/// `NumDirect = (SectorSize - 6*sizeof(int)) / sizeof(int)`: how many
/// data-sector slots fit in a `FileHeader` once its six scalar fields
/// (numBytes, numSectors, flag, and three timestamps) are accounted for.
pub const NUM_DIRECT: usize = (SECTOR_SIZE - 6 * 4) / 4;

/// `NumFirstLevelDirect = NumDirect - 2`: two of those slots are spent on
/// the single- and double-indirect sector numbers instead of direct data.
pub const NUM_FIRST_LEVEL_DIRECT: usize = NUM_DIRECT - 2;

/// `NumIndexDirect = SectorSize / sizeof(int)`: how many sector numbers
/// fit in one index sector (single- or double-indirect).
pub const NUM_INDEX_DIRECT: usize = SECTOR_SIZE / 4;

/// Largest file, in sectors, addressable via direct + single-indirect +
/// double-indirect indexing.
pub const MAX_FILE_SECTORS: usize =
    NUM_FIRST_LEVEL_DIRECT + NUM_INDEX_DIRECT + NUM_INDEX_DIRECT * NUM_INDEX_DIRECT;

/// Sector holding the free-map file's `FileHeader` (well-known, §4.8).
pub const FREE_MAP_SECTOR: u32 = 0;
/// Sector holding the root directory file's `FileHeader` (well-known).
pub const DIRECTORY_SECTOR: u32 = 1;

/// Number of entries the root directory (and every directory created
/// after it) starts with before it needs to grow.
pub const NUM_DIR_ENTRIES: usize = 10;

/// Longest filename storable in a single (non-continuation) directory
/// entry, not counting the trailing NUL.
pub const FILE_NAME_MAX_LEN: usize = 9;

/// Longest filename tail storable in a `LONG_NAME` continuation entry.
pub const EXTENDED_FILE_NAME_MAX_LEN: usize = 14;

/// `FreeMapFileSize = NumSectors / BitsInByte`: the free-map file's fixed
/// size in bytes, one bit per sector.
pub const fn free_map_file_size() -> u32 {
    NUM_SECTORS / 8
}

pub(crate) fn div_round_up(n: u32, d: u32) -> u32 {
    (n + d - 1) / d
}
