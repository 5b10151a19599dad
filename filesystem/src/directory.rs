//! Directories: a flat, growable table of name-to-sector entries (§4.7).
//!
//! Mirrors the original's short/long-name split: a name up to
//! [`crate::config::FILE_NAME_MAX_LEN`] bytes occupies a single slot; a
//! longer one spills its tail into a second, paired continuation slot.
//! Unlike the original (which simply refuses once its fixed-size table
//! is full), [`Directory::add`] grows the table by pushing new slots,
//! relying on the backing [`crate::open_file::OpenFile`] to extend the
//! directory's own file by a sector whenever that growth needs one
//! (§9 Open Question).

use crate::config::{EXTENDED_FILE_NAME_MAX_LEN, FILE_NAME_MAX_LEN};
use crate::error::Error;
use crate::open_file::OpenFile;
use bitflags::bitflags;

bitflags! {
    /// The flags stored in a directory slot's single flag byte.
    struct SlotFlags: u8 {
        /// The slot holds a live entry rather than a free one.
        const IN_USE = 1 << 0;
        /// The slot is the head of a long-name pair; the following slot
        /// holds the name's tail rather than an entry of its own.
        const LONG_NAME = 1 << 1;
    }
}

const NAME_FIELD_LEN: usize = EXTENDED_FILE_NAME_MAX_LEN;
/// flag (1) + sector (4) + name field (14).
pub const RECORD_SIZE: usize = 1 + 4 + NAME_FIELD_LEN;

#[derive(Debug, Clone)]
struct Slot {
    flags: SlotFlags,
    sector: i32,
    name: [u8; NAME_FIELD_LEN],
}

impl Slot {
    fn free() -> Self {
        Slot { flags: SlotFlags::empty(), sector: -1, name: [0; NAME_FIELD_LEN] }
    }

    fn in_use(&self) -> bool {
        self.flags.contains(SlotFlags::IN_USE)
    }

    fn is_long_head(&self) -> bool {
        self.flags.contains(SlotFlags::LONG_NAME)
    }

    fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut out = [0u8; RECORD_SIZE];
        out[0] = self.flags.bits();
        out[1..5].copy_from_slice(&self.sector.to_le_bytes());
        out[5..5 + NAME_FIELD_LEN].copy_from_slice(&self.name);
        out
    }

    fn from_bytes(buf: &[u8]) -> Self {
        let flags = SlotFlags::from_bits_truncate(buf[0]);
        let sector = i32::from_le_bytes(buf[1..5].try_into().unwrap());
        let mut name = [0u8; NAME_FIELD_LEN];
        name.copy_from_slice(&buf[5..5 + NAME_FIELD_LEN]);
        Slot { flags, sector, name }
    }
}

/// A directory's in-memory table, loaded from (and written back to) a
/// backing [`OpenFile`] one record at a time.
pub struct Directory {
    slots: Vec<Slot>,
}

impl Directory {
    /// A fresh directory of `num_entries` empty slots (§4.8's initial
    /// allocation for a newly formatted or newly created directory).
    pub fn new(num_entries: usize) -> Self {
        Directory { slots: vec![Slot::free(); num_entries] }
    }

    /// Loads a directory's full table from its backing file.
    pub fn fetch_from(file: &OpenFile) -> Self {
        let len = file.length() as usize;
        let count = len / RECORD_SIZE;
        let mut slots = Vec::with_capacity(count);
        let mut buf = vec![0u8; RECORD_SIZE];
        for i in 0..count {
            file.read_at(&mut buf, (i * RECORD_SIZE) as u32);
            slots.push(Slot::from_bytes(&buf));
        }
        Directory { slots }
    }

    /// Writes the full table back to its backing file.
    pub fn write_back(&self, file: &OpenFile) -> Result<(), Error> {
        for (i, slot) in self.slots.iter().enumerate() {
            file.write_at(&slot.to_bytes(), (i * RECORD_SIZE) as u32)?;
        }
        Ok(())
    }

    fn full_name(&self, index: usize) -> String {
        let head = &self.slots[index];
        if head.is_long_head() {
            let tail = &self.slots[index + 1];
            let mut bytes = head.name.to_vec();
            bytes.extend_from_slice(&tail.name);
            let nul = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
            String::from_utf8_lossy(&bytes[..nul]).into_owned()
        } else {
            let nul = head.name.iter().position(|b| *b == 0).unwrap_or(FILE_NAME_MAX_LEN);
            String::from_utf8_lossy(&head.name[..nul.min(FILE_NAME_MAX_LEN)]).into_owned()
        }
    }

    /// Finds `name`'s slot index, if present.
    fn find_index(&self, name: &str) -> Option<usize> {
        let mut i = 0;
        while i < self.slots.len() {
            if self.slots[i].in_use() && self.full_name(i) == name {
                return Some(i);
            }
            i += if self.slots[i].is_long_head() { 2 } else { 1 };
        }
        None
    }

    /// Looks up `name`'s file header sector.
    pub fn find(&self, name: &str) -> Option<u32> {
        self.find_index(name).map(|i| self.slots[i].sector as u32)
    }

    fn encode_name(name: &str) -> ([u8; FILE_NAME_MAX_LEN], Option<[u8; EXTENDED_FILE_NAME_MAX_LEN]>) {
        let bytes = name.as_bytes();
        let mut head = [0u8; FILE_NAME_MAX_LEN];
        if bytes.len() <= FILE_NAME_MAX_LEN {
            head[..bytes.len()].copy_from_slice(bytes);
            return (head, None);
        }
        head.copy_from_slice(&bytes[..FILE_NAME_MAX_LEN]);
        let rest = &bytes[FILE_NAME_MAX_LEN..];
        assert!(
            rest.len() <= EXTENDED_FILE_NAME_MAX_LEN,
            "name {name} exceeds the maximum of {} bytes",
            FILE_NAME_MAX_LEN + EXTENDED_FILE_NAME_MAX_LEN
        );
        let mut tail = [0u8; EXTENDED_FILE_NAME_MAX_LEN];
        tail[..rest.len()].copy_from_slice(rest);
        (head, Some(tail))
    }

    /// Adds `name` -> `sector`. Reuses a free slot (or pair of adjacent
    /// free slots, for a long name) if one exists; otherwise grows the
    /// table.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyExists`] if `name` is already present.
    pub fn add(&mut self, name: &str, sector: u32) -> Result<(), Error> {
        if self.find_index(name).is_some() {
            return Err(Error::AlreadyExists);
        }
        let (head_name, tail_name) = Self::encode_name(name);

        if let Some(tail) = tail_name {
            let head_slot = Slot {
                flags: SlotFlags::IN_USE | SlotFlags::LONG_NAME,
                sector: sector as i32,
                name: Self::pad(&head_name),
            };
            let tail_slot = Slot { flags: SlotFlags::IN_USE, sector: -1, name: tail };
            if let Some(i) = self.find_free_pair() {
                self.slots[i] = head_slot;
                self.slots[i + 1] = tail_slot;
            } else {
                self.slots.push(head_slot);
                self.slots.push(tail_slot);
            }
        } else if let Some(i) = self.slots.iter().position(|s| !s.in_use()) {
            self.slots[i] = Slot { flags: SlotFlags::IN_USE, sector: sector as i32, name: Self::pad(&head_name) };
        } else {
            self.slots.push(Slot { flags: SlotFlags::IN_USE, sector: sector as i32, name: Self::pad(&head_name) });
        }
        Ok(())
    }

    fn pad(head: &[u8; FILE_NAME_MAX_LEN]) -> [u8; NAME_FIELD_LEN] {
        let mut out = [0u8; NAME_FIELD_LEN];
        out[..FILE_NAME_MAX_LEN].copy_from_slice(head);
        out
    }

    fn find_free_pair(&self) -> Option<usize> {
        if self.slots.is_empty() {
            return None;
        }
        (0..self.slots.len() - 1).find(|&i| !self.slots[i].in_use() && !self.slots[i + 1].in_use())
    }

    /// Removes `name`. Returns the sector its header occupied, so the
    /// caller can deallocate it.
    pub fn remove(&mut self, name: &str) -> Option<u32> {
        let i = self.find_index(name)?;
        let sector = self.slots[i].sector as u32;
        let is_long = self.slots[i].is_long_head();
        self.slots[i] = Slot::free();
        if is_long {
            self.slots[i + 1] = Slot::free();
        }
        Some(sector)
    }

    /// Every name currently stored, in table order.
    pub fn list(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut i = 0;
        while i < self.slots.len() {
            if self.slots[i].in_use() {
                names.push(self.full_name(i));
            }
            i += if self.slots[i].is_long_head() { 2 } else { 1 };
        }
        names
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| !s.in_use())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::Bitmap;
    use crate::file_header::{FileHeader, FileKind};
    use crate::synch_disk::{MemDisk, SynchDisk};
    use std::sync::{Arc, Mutex};

    fn backing(num_entries: usize) -> OpenFile {
        let disk: Arc<dyn SynchDisk> = Arc::new(MemDisk::new(64));
        let mut free_map = Bitmap::new(64);
        let header_sector = free_map.find().unwrap() as u32;
        let mut header = FileHeader::new(FileKind::Directory, 0);
        header.allocate(disk.as_ref(), &mut free_map, (num_entries * RECORD_SIZE) as u32).unwrap();
        header.write_back(disk.as_ref(), header_sector);
        OpenFile::new(disk, Arc::new(Mutex::new(free_map)), header_sector)
    }

    #[test]
    fn add_find_remove_a_short_name() {
        let mut dir = Directory::new(10);
        dir.add("foo.txt", 5).unwrap();
        assert_eq!(dir.find("foo.txt"), Some(5));
        assert_eq!(dir.remove("foo.txt"), Some(5));
        assert_eq!(dir.find("foo.txt"), None);
    }

    #[test]
    fn add_rejects_a_duplicate_name() {
        let mut dir = Directory::new(4);
        dir.add("a", 1).unwrap();
        assert!(matches!(dir.add("a", 2), Err(Error::AlreadyExists)));
    }

    #[test]
    fn long_names_round_trip_through_the_paired_entry() {
        let mut dir = Directory::new(4);
        let long = "a-rather-long-file-name.dat";
        dir.add(long, 9).unwrap();
        assert_eq!(dir.find(long), Some(9));
        assert_eq!(dir.list(), vec![long.to_string()]);
    }

    #[test]
    fn add_grows_the_table_once_every_slot_is_in_use() {
        let mut dir = Directory::new(1);
        dir.add("one", 1).unwrap();
        dir.add("two", 2).unwrap();
        assert_eq!(dir.find("one"), Some(1));
        assert_eq!(dir.find("two"), Some(2));
    }

    #[test]
    fn write_back_then_fetch_from_round_trips_through_a_file() {
        let file = backing(4);
        let mut dir = Directory::new(4);
        dir.add("x", 3).unwrap();
        dir.write_back(&file).unwrap();

        let reloaded = Directory::fetch_from(&file);
        assert_eq!(reloaded.find("x"), Some(3));
    }
}
