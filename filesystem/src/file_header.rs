//! The on-disk inode (§4.6, §6).
//!
//! A `FileHeader` occupies exactly one sector and maps a file's logical
//! blocks to data sectors through up to three levels of indexing: direct,
//! single-indirect, double-indirect. The double-indirect level is
//! implemented in full rather than left as a growth ceiling, and every
//! index sector touched by `allocate`/`append_one_sector` is written
//! back before returning.

use crate::bitmap::Bitmap;
use crate::config::{
    div_round_up, NUM_DIRECT, NUM_FIRST_LEVEL_DIRECT, NUM_INDEX_DIRECT, SECTOR_SIZE,
};
use crate::error::Error;
use crate::synch_disk::SynchDisk;

/// Whether a file header describes a plain file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    User,
    Directory,
}

/// The on-disk inode: length, kind, timestamps, and the block map.
#[derive(Debug, Clone)]
pub struct FileHeader {
    pub num_bytes: u32,
    pub num_sectors: u32,
    pub kind: FileKind,
    pub create_time: u32,
    pub last_modified_time: u32,
    pub last_access_time: u32,
    direct: [i32; NUM_FIRST_LEVEL_DIRECT],
    single_indirect_sector: i32,
    double_indirect_sector: i32,
}

fn read_index_sector(disk: &dyn SynchDisk, sector: u32) -> [i32; NUM_INDEX_DIRECT] {
    let mut buf = vec![0u8; SECTOR_SIZE];
    disk.read_sector(sector, &mut buf);
    let mut out = [0i32; NUM_INDEX_DIRECT];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = i32::from_le_bytes(buf[i * 4..i * 4 + 4].try_into().unwrap());
    }
    out
}

fn write_index_sector(disk: &dyn SynchDisk, sector: u32, block: &[i32; NUM_INDEX_DIRECT]) {
    let mut buf = vec![0u8; SECTOR_SIZE];
    for (i, v) in block.iter().enumerate() {
        buf[i * 4..i * 4 + 4].copy_from_slice(&v.to_le_bytes());
    }
    disk.write_sector(sector, &buf);
}

impl FileHeader {
    /// A freshly constructed, empty header of the given kind, stamped
    /// with `now` as its creation/modification/access time.
    pub fn new(kind: FileKind, now: u32) -> Self {
        FileHeader {
            num_bytes: 0,
            num_sectors: 0,
            kind,
            create_time: now,
            last_modified_time: now,
            last_access_time: now,
            direct: [-1; NUM_FIRST_LEVEL_DIRECT],
            single_indirect_sector: -1,
            double_indirect_sector: -1,
        }
    }

    pub fn file_length(&self) -> u32 {
        self.num_bytes
    }

    /// Initializes a fresh header for a newly created file: computes
    /// `num_sectors` from `file_size` and allocates that many data
    /// sectors (plus whatever index sectors are needed) out of
    /// `free_map`. Every index sector touched is written back to `disk`
    /// before returning.
    pub fn allocate(
        &mut self,
        disk: &dyn SynchDisk,
        free_map: &mut Bitmap,
        file_size: u32,
    ) -> Result<(), Error> {
        self.num_bytes = file_size;
        let needed = div_round_up(file_size, SECTOR_SIZE as u32) as usize;
        if free_map.num_clear() < needed {
            return Err(Error::OutOfSpace { needed, available: free_map.num_clear() });
        }

        let mut remaining = needed;
        let first_level = remaining.min(NUM_FIRST_LEVEL_DIRECT);
        for slot in self.direct.iter_mut().take(first_level) {
            *slot = free_map.find().expect("space checked above") as i32;
        }
        remaining -= first_level;

        if remaining > 0 {
            let single_sector = free_map.find().expect("space checked above") as u32;
            self.single_indirect_sector = single_sector as i32;
            let mut single_block = [-1i32; NUM_INDEX_DIRECT];
            let single_count = remaining.min(NUM_INDEX_DIRECT);
            for slot in single_block.iter_mut().take(single_count) {
                *slot = free_map.find().expect("space checked above") as i32;
            }
            remaining -= single_count;

            if remaining > 0 {
                let double_sector = free_map.find().expect("space checked above") as u32;
                self.double_indirect_sector = double_sector as i32;
                let mut double_block = [-1i32; NUM_INDEX_DIRECT];
                let groups = div_round_up(remaining as u32, NUM_INDEX_DIRECT as u32) as usize;
                for group in double_block.iter_mut().take(groups) {
                    let group_sector = free_map.find().expect("space checked above") as u32;
                    *group = group_sector as i32;
                    let mut inner = [-1i32; NUM_INDEX_DIRECT];
                    let count = remaining.min(NUM_INDEX_DIRECT);
                    for slot in inner.iter_mut().take(count) {
                        *slot = free_map.find().expect("space checked above") as i32;
                    }
                    write_index_sector(disk, group_sector, &inner);
                    remaining -= count;
                }
                write_index_sector(disk, double_sector, &double_block);
            }
            write_index_sector(disk, single_sector, &single_block);
        }

        self.num_sectors = needed as u32;
        Ok(())
    }

    /// Extends the file by exactly one sector, lazily allocating whatever
    /// index sector the new block index newly requires.
    ///
    /// # Panics
    ///
    /// Panics if the file would grow beyond the three-level indexing
    /// limit — a contract violation (§7), not a recoverable condition.
    pub fn append_one_sector(
        &mut self,
        disk: &dyn SynchDisk,
        free_map: &mut Bitmap,
    ) -> Result<u32, Error> {
        let idx = self.num_sectors as usize;
        assert!(
            idx < crate::config::MAX_FILE_SECTORS,
            "file index {idx} beyond the three-level indexing limit"
        );

        let crosses_into_single = idx >= NUM_FIRST_LEVEL_DIRECT
            && idx < NUM_FIRST_LEVEL_DIRECT + NUM_INDEX_DIRECT
            && self.single_indirect_sector < 0;
        let beyond_single = idx >= NUM_FIRST_LEVEL_DIRECT + NUM_INDEX_DIRECT;
        let needs_double_index = beyond_single && self.double_indirect_sector < 0;
        let needs_double_group = beyond_single
            && (self.double_indirect_sector < 0 || {
                let beyond = idx - NUM_FIRST_LEVEL_DIRECT - NUM_INDEX_DIRECT;
                let group = beyond / NUM_INDEX_DIRECT;
                read_index_sector(disk, self.double_indirect_sector as u32)[group] < 0
            });

        // The data sector plus whatever index sector(s) this append newly
        // requires — checked as one atomic reservation, the same way
        // `allocate` does, so a shortfall never leaves a sector marked
        // with nothing yet pointing at it (§7).
        let needed = 1
            + crosses_into_single as usize
            + needs_double_index as usize
            + needs_double_group as usize;
        if free_map.num_clear() < needed {
            return Err(Error::OutOfSpace { needed, available: free_map.num_clear() });
        }

        let sector = free_map.find().expect("space checked above");

        if idx < NUM_FIRST_LEVEL_DIRECT {
            self.direct[idx] = sector as i32;
        } else if idx < NUM_FIRST_LEVEL_DIRECT + NUM_INDEX_DIRECT {
            if self.single_indirect_sector < 0 {
                let s = free_map.find().expect("space checked above");
                self.single_indirect_sector = s as i32;
                write_index_sector(disk, s as u32, &[-1i32; NUM_INDEX_DIRECT]);
            }
            let slot = idx - NUM_FIRST_LEVEL_DIRECT;
            let mut block = read_index_sector(disk, self.single_indirect_sector as u32);
            block[slot] = sector as i32;
            write_index_sector(disk, self.single_indirect_sector as u32, &block);
        } else {
            let beyond = idx - NUM_FIRST_LEVEL_DIRECT - NUM_INDEX_DIRECT;
            let group = beyond / NUM_INDEX_DIRECT;
            let slot = beyond % NUM_INDEX_DIRECT;

            if self.double_indirect_sector < 0 {
                let s = free_map.find().expect("space checked above");
                self.double_indirect_sector = s as i32;
                write_index_sector(disk, s as u32, &[-1i32; NUM_INDEX_DIRECT]);
            }
            let mut double_block = read_index_sector(disk, self.double_indirect_sector as u32);
            if double_block[group] < 0 {
                let s = free_map.find().expect("space checked above");
                double_block[group] = s as i32;
                write_index_sector(disk, s, &[-1i32; NUM_INDEX_DIRECT]);
                write_index_sector(disk, self.double_indirect_sector as u32, &double_block);
            }
            let mut single_block = read_index_sector(disk, double_block[group] as u32);
            single_block[slot] = sector as i32;
            write_index_sector(disk, double_block[group] as u32, &single_block);
        }

        self.num_sectors += 1;
        Ok(sector as u32)
    }

    /// Frees every data sector and index sector this header references.
    ///
    /// # Panics
    ///
    /// Panics (via [`Bitmap::clear`]) if any referenced sector was not
    /// marked in `free_map` — a contract violation (§7).
    pub fn deallocate(&mut self, disk: &dyn SynchDisk, free_map: &mut Bitmap) {
        let total = self.num_sectors as usize;
        let first_level = total.min(NUM_FIRST_LEVEL_DIRECT);
        for slot in self.direct.iter().take(first_level) {
            free_map.clear(*slot as usize);
        }

        let mut remaining = total.saturating_sub(first_level);
        if remaining > 0 {
            let single_block = read_index_sector(disk, self.single_indirect_sector as u32);
            let single_count = remaining.min(NUM_INDEX_DIRECT);
            for slot in single_block.iter().take(single_count) {
                free_map.clear(*slot as usize);
            }
            free_map.clear(self.single_indirect_sector as usize);
            self.single_indirect_sector = -1;
            remaining -= single_count;

            if remaining > 0 {
                let double_block = read_index_sector(disk, self.double_indirect_sector as u32);
                let groups = div_round_up(remaining as u32, NUM_INDEX_DIRECT as u32) as usize;
                for group_sector in double_block.iter().take(groups) {
                    let single = read_index_sector(disk, *group_sector as u32);
                    let count = remaining.min(NUM_INDEX_DIRECT);
                    for slot in single.iter().take(count) {
                        free_map.clear(*slot as usize);
                    }
                    free_map.clear(*group_sector as usize);
                    remaining -= count;
                }
                free_map.clear(self.double_indirect_sector as usize);
                self.double_indirect_sector = -1;
            }
        }

        self.num_sectors = 0;
        self.num_bytes = 0;
    }

    /// Maps a byte offset within the file to the data sector holding it.
    /// Pure lookup; may read the single- and/or double-indirect sectors.
    pub fn byte_to_sector(&self, disk: &dyn SynchDisk, offset: u32) -> u32 {
        let mut block_index = offset as usize / SECTOR_SIZE;
        if block_index < NUM_FIRST_LEVEL_DIRECT {
            return self.direct[block_index] as u32;
        }
        block_index -= NUM_FIRST_LEVEL_DIRECT;
        if block_index < NUM_INDEX_DIRECT {
            let single_block = read_index_sector(disk, self.single_indirect_sector as u32);
            return single_block[block_index] as u32;
        }
        block_index -= NUM_INDEX_DIRECT;
        let group = block_index / NUM_INDEX_DIRECT;
        let slot = block_index % NUM_INDEX_DIRECT;
        let double_block = read_index_sector(disk, self.double_indirect_sector as u32);
        let single_block = read_index_sector(disk, double_block[group] as u32);
        single_block[slot] as u32
    }

    /// Reads this header from `sector`.
    pub fn fetch_from(disk: &dyn SynchDisk, sector: u32) -> Self {
        let mut buf = vec![0u8; SECTOR_SIZE];
        disk.read_sector(sector, &mut buf);
        Self::from_bytes(&buf)
    }

    /// Writes this header back to `sector`.
    pub fn write_back(&self, disk: &dyn SynchDisk, sector: u32) {
        disk.write_sector(sector, &self.to_bytes());
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; SECTOR_SIZE];
        let kind = match self.kind {
            FileKind::User => 0i32,
            FileKind::Directory => 1i32,
        };
        let mut off = 0;
        for value in [
            self.num_bytes as i32,
            self.num_sectors as i32,
            kind,
            self.create_time as i32,
            self.last_modified_time as i32,
            self.last_access_time as i32,
        ] {
            buf[off..off + 4].copy_from_slice(&value.to_le_bytes());
            off += 4;
        }
        for d in self.direct.iter() {
            buf[off..off + 4].copy_from_slice(&d.to_le_bytes());
            off += 4;
        }
        buf[off..off + 4].copy_from_slice(&self.single_indirect_sector.to_le_bytes());
        off += 4;
        buf[off..off + 4].copy_from_slice(&self.double_indirect_sector.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8]) -> Self {
        let read = |off: usize| i32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        let num_bytes = read(0) as u32;
        let num_sectors = read(4) as u32;
        let kind = if read(8) == 1 { FileKind::Directory } else { FileKind::User };
        let create_time = read(12) as u32;
        let last_modified_time = read(16) as u32;
        let last_access_time = read(20) as u32;
        let mut direct = [-1i32; NUM_FIRST_LEVEL_DIRECT];
        let mut off = 24;
        for d in direct.iter_mut() {
            *d = read(off);
            off += 4;
        }
        let single_indirect_sector = read(off);
        off += 4;
        let double_indirect_sector = read(off);
        FileHeader {
            num_bytes,
            num_sectors,
            kind,
            create_time,
            last_modified_time,
            last_access_time,
            direct,
            single_indirect_sector,
            double_indirect_sector,
        }
    }
}

// `NUM_DIRECT` is only used to document (and statically check) that the
// three scalar-plus-index layout this module assumes actually fits in
// one sector; it isn't read anywhere at runtime.
const _: () = assert!(NUM_FIRST_LEVEL_DIRECT + 2 == NUM_DIRECT);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synch_disk::MemDisk;

    #[test]
    fn allocate_then_fetch_round_trips() {
        let disk = MemDisk::new(64);
        let mut free_map = Bitmap::new(64);
        let mut header = FileHeader::new(FileKind::User, 0);
        header.allocate(&disk, &mut free_map, 3 * SECTOR_SIZE as u32).unwrap();
        header.write_back(&disk, 10);

        let fetched = FileHeader::fetch_from(&disk, 10);
        assert_eq!(fetched.num_bytes, header.num_bytes);
        assert_eq!(fetched.num_sectors, header.num_sectors);
        for b in 0..3u32 {
            assert_eq!(
                fetched.byte_to_sector(&disk, b * SECTOR_SIZE as u32),
                header.byte_to_sector(&disk, b * SECTOR_SIZE as u32)
            );
        }
    }

    #[test]
    fn byte_to_sector_is_injective_across_levels() {
        let disk = MemDisk::new(NUM_INDEX_DIRECT as u32 + NUM_FIRST_LEVEL_DIRECT as u32 + 8);
        let mut free_map = Bitmap::new(disk.num_sectors());
        let mut header = FileHeader::new(FileKind::User, 0);

        for _ in 0..(NUM_FIRST_LEVEL_DIRECT + NUM_INDEX_DIRECT - 4) {
            header.append_one_sector(&disk, &mut free_map).unwrap();
        }

        let mut seen = std::collections::HashSet::new();
        for b in 0..header.num_sectors {
            let sector = header.byte_to_sector(&disk, b * SECTOR_SIZE as u32);
            assert!(seen.insert(sector), "sector {sector} reused for block {b}");
        }
    }

    #[test]
    fn allocate_deallocate_is_a_no_op_on_the_bitmap() {
        let disk = MemDisk::new(64);
        let mut free_map = Bitmap::new(64);
        let before = free_map.num_clear();

        let mut header = FileHeader::new(FileKind::User, 0);
        header.allocate(&disk, &mut free_map, 5 * SECTOR_SIZE as u32).unwrap();
        header.deallocate(&disk, &mut free_map);

        assert_eq!(free_map.num_clear(), before);
    }

    #[test]
    fn allocate_fails_when_bitmap_has_insufficient_space() {
        let disk = MemDisk::new(4);
        let mut free_map = Bitmap::new(4);
        free_map.mark(0);
        free_map.mark(1);
        free_map.mark(2);

        let mut header = FileHeader::new(FileKind::User, 0);
        let err = header.allocate(&disk, &mut free_map, 2 * SECTOR_SIZE as u32).unwrap_err();
        assert!(matches!(err, Error::OutOfSpace { .. }));
    }

    #[test]
    fn append_exercises_all_three_index_levels() {
        // NUM_FIRST_LEVEL_DIRECT=24, NUM_INDEX_DIRECT=32 at SECTOR_SIZE=128,
        // so 40 appends crosses into single-indirect territory (§8 S3).
        let total_sectors = NUM_FIRST_LEVEL_DIRECT + NUM_INDEX_DIRECT + 16 + 8;
        let disk = MemDisk::new(total_sectors as u32);
        let mut free_map = Bitmap::new(total_sectors as u32);
        let mut header = FileHeader::new(FileKind::User, 0);

        let mut appended = Vec::new();
        for _ in 0..40 {
            appended.push(header.append_one_sector(&disk, &mut free_map).unwrap());
        }
        assert_eq!(header.num_sectors, 40);

        for b in [0usize, 23, 24, 39] {
            let sector = header.byte_to_sector(&disk, (b * SECTOR_SIZE) as u32);
            assert_eq!(sector, appended[b]);
        }
    }

    #[test]
    fn append_crossing_into_single_indirect_leaks_nothing_on_failure() {
        // Fill the header up to the direct-block boundary, then leave the
        // bitmap exactly one sector short of what crossing into
        // single-indirect territory needs (the data sector plus the new
        // index sector): the whole append must fail atomically, marking
        // neither sector, not just the data sector (§7).
        let total = NUM_FIRST_LEVEL_DIRECT + 1;
        let disk = MemDisk::new(total as u32);
        let mut free_map = Bitmap::new(total);
        let mut header = FileHeader::new(FileKind::User, 0);

        for _ in 0..NUM_FIRST_LEVEL_DIRECT {
            header.append_one_sector(&disk, &mut free_map).unwrap();
        }
        assert_eq!(free_map.num_clear(), 1);

        let err = header.append_one_sector(&disk, &mut free_map).unwrap_err();
        assert!(matches!(err, Error::OutOfSpace { needed: 2, .. }));
        assert_eq!(free_map.num_clear(), 1, "a failed append must not mark any sector");
        assert_eq!(header.num_sectors as usize, NUM_FIRST_LEVEL_DIRECT);
    }
}
