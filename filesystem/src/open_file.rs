//! A seekable, growable view onto a file's data sectors (§4.7).
//!
//! `OpenFile` is the only thing that ever reads or writes file *content*
//! sectors directly; [`crate::directory::Directory`] and the free-map
//! bitmap both persist themselves through one, exactly as regular files
//! do, so directory/bitmap growth and user-file growth share the same
//! `AppendOneSector` machinery (§4.8, §9 Open Question).

use std::sync::{Arc, Mutex};

use crate::bitmap::Bitmap;
use crate::config::{FREE_MAP_SECTOR, SECTOR_SIZE};
use crate::error::Error;
use crate::file_header::FileHeader;
use crate::synch_disk::SynchDisk;

/// An open file handle: a cached [`FileHeader`], a seek cursor, and
/// shared access to the disk and free-sector map needed to grow it.
pub struct OpenFile {
    disk: Arc<dyn SynchDisk>,
    free_map: Arc<Mutex<Bitmap>>,
    header_sector: u32,
    header: Mutex<FileHeader>,
    seek_position: Mutex<u32>,
}

impl OpenFile {
    pub fn new(
        disk: Arc<dyn SynchDisk>,
        free_map: Arc<Mutex<Bitmap>>,
        header_sector: u32,
    ) -> Self {
        let header = FileHeader::fetch_from(disk.as_ref(), header_sector);
        OpenFile {
            disk,
            free_map,
            header_sector,
            header: Mutex::new(header),
            seek_position: Mutex::new(0),
        }
    }

    pub fn header_sector(&self) -> u32 {
        self.header_sector
    }

    pub fn length(&self) -> u32 {
        self.header.lock().unwrap().file_length()
    }

    pub fn seek(&self, position: u32) {
        *self.seek_position.lock().unwrap() = position;
    }

    /// Reads starting at the cursor, advancing it by the number of bytes
    /// actually read (clipped to the file's length).
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let position = *self.seek_position.lock().unwrap();
        let read = self.read_at(buf, position);
        *self.seek_position.lock().unwrap() += read as u32;
        read
    }

    /// Writes starting at the cursor, advancing it by the number of
    /// bytes written, growing the file as needed.
    pub fn write(&self, data: &[u8]) -> Result<usize, Error> {
        let position = *self.seek_position.lock().unwrap();
        let written = self.write_at(data, position)?;
        *self.seek_position.lock().unwrap() += written as u32;
        Ok(written)
    }

    /// Reads up to `buf.len()` bytes starting at `offset`, clipped to the
    /// file's length. Returns the number of bytes actually read.
    pub fn read_at(&self, buf: &mut [u8], offset: u32) -> usize {
        let header = self.header.lock().unwrap();
        let file_len = header.file_length();
        if offset >= file_len {
            return 0;
        }
        let to_read = buf.len().min((file_len - offset) as usize);
        let mut sector_buf = vec![0u8; SECTOR_SIZE];
        let mut done = 0;
        while done < to_read {
            let abs = offset as usize + done;
            let sector = header.byte_to_sector(self.disk.as_ref(), abs as u32);
            self.disk.read_sector(sector, &mut sector_buf);
            let within = abs % SECTOR_SIZE;
            let chunk = (SECTOR_SIZE - within).min(to_read - done);
            buf[done..done + chunk].copy_from_slice(&sector_buf[within..within + chunk]);
            done += chunk;
        }
        to_read
    }

    /// Writes `data` starting at `offset`, growing the file one sector at
    /// a time (via [`FileHeader::append_one_sector`]) whenever `offset +
    /// data.len()` runs past the current allocation.
    ///
    /// Growth that fails partway (e.g. the third of four needed sectors
    /// has no room) rolls both the header and the free map back to their
    /// pre-growth state rather than leaving sectors marked but unreferenced
    /// on disk (§7). A growth that succeeds persists the free map to disk
    /// immediately, matching `AllocateOneMoreSector`'s contract (§4.8) —
    /// this file may never pass back through a `FileSystem`-level
    /// operation that would otherwise flush it.
    pub fn write_at(&self, data: &[u8], offset: u32) -> Result<usize, Error> {
        let mut header = self.header.lock().unwrap();
        let mut free_map = self.free_map.lock().unwrap();

        let needed_end = offset as usize + data.len();
        if (header.num_sectors as usize * SECTOR_SIZE) < needed_end {
            let header_snapshot = header.clone();
            let free_map_snapshot = free_map.clone();
            while (header.num_sectors as usize * SECTOR_SIZE) < needed_end {
                if let Err(e) = header.append_one_sector(self.disk.as_ref(), &mut free_map) {
                    *header = header_snapshot;
                    *free_map = free_map_snapshot;
                    return Err(e);
                }
            }
            self.persist_free_map(&free_map);
        }

        let mut sector_buf = vec![0u8; SECTOR_SIZE];
        let mut done = 0;
        while done < data.len() {
            let abs = offset as usize + done;
            let sector = header.byte_to_sector(self.disk.as_ref(), abs as u32);
            let within = abs % SECTOR_SIZE;
            let chunk = (SECTOR_SIZE - within).min(data.len() - done);
            if within != 0 || chunk != SECTOR_SIZE {
                self.disk.read_sector(sector, &mut sector_buf);
            }
            sector_buf[within..within + chunk].copy_from_slice(&data[done..done + chunk]);
            self.disk.write_sector(sector, &sector_buf);
            done += chunk;
        }

        if needed_end as u32 > header.num_bytes {
            header.num_bytes = needed_end as u32;
        }
        header.write_back(self.disk.as_ref(), self.header_sector);
        Ok(data.len())
    }

    /// Writes the free map's current bytes straight into the free-map
    /// file's own data sectors, bypassing `OpenFile::write_at` so this
    /// can run from inside a growth that may itself be what just changed
    /// the map, without recursing back into this same path. A no-op if
    /// this handle *is* the free-map file (its size is fixed; it never
    /// grows through this path).
    fn persist_free_map(&self, free_map: &Bitmap) {
        if self.header_sector == FREE_MAP_SECTOR {
            return;
        }
        let map_header = FileHeader::fetch_from(self.disk.as_ref(), FREE_MAP_SECTOR);
        let bytes = free_map.to_bytes();
        let mut sector_buf = vec![0u8; SECTOR_SIZE];
        let mut done = 0;
        while done < bytes.len() {
            let abs = done;
            let sector = map_header.byte_to_sector(self.disk.as_ref(), abs as u32);
            let within = abs % SECTOR_SIZE;
            let chunk = (SECTOR_SIZE - within).min(bytes.len() - done);
            if within != 0 || chunk != SECTOR_SIZE {
                self.disk.read_sector(sector, &mut sector_buf);
            }
            sector_buf[within..within + chunk].copy_from_slice(&bytes[done..done + chunk]);
            self.disk.write_sector(sector, &sector_buf);
            done += chunk;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_header::FileKind;
    use crate::synch_disk::MemDisk;

    fn fresh(num_sectors: u32) -> (Arc<dyn SynchDisk>, Arc<Mutex<Bitmap>>, u32) {
        let disk: Arc<dyn SynchDisk> = Arc::new(MemDisk::new(num_sectors));
        let mut free_map = Bitmap::new(num_sectors as usize);
        let header_sector = free_map.find().unwrap() as u32;
        let mut header = FileHeader::new(FileKind::User, 0);
        header.allocate(disk.as_ref(), &mut free_map, 0).unwrap();
        header.write_back(disk.as_ref(), header_sector);
        (disk, Arc::new(Mutex::new(free_map)), header_sector)
    }

    #[test]
    fn write_then_read_round_trips() {
        let (disk, free_map, sector) = fresh(64);
        let file = OpenFile::new(disk, free_map, sector);
        file.write_at(b"hello world", 0).unwrap();
        let mut buf = [0u8; 11];
        assert_eq!(file.read_at(&mut buf, 0), 11);
        assert_eq!(&buf, b"hello world");
    }

    #[test]
    fn write_past_current_allocation_grows_the_file() {
        let (disk, free_map, sector) = fresh(64);
        let file = OpenFile::new(disk, free_map, sector);
        let data = vec![42u8; SECTOR_SIZE * 3 + 5];
        file.write_at(&data, 0).unwrap();
        assert_eq!(file.length(), data.len() as u32);

        let mut out = vec![0u8; data.len()];
        assert_eq!(file.read_at(&mut out, 0), data.len());
        assert_eq!(out, data);
    }

    #[test]
    fn seek_read_write_advance_the_cursor() {
        let (disk, free_map, sector) = fresh(64);
        let file = OpenFile::new(disk, free_map, sector);
        file.write(b"abc").unwrap();
        file.write(b"def").unwrap();
        let mut buf = [0u8; 6];
        file.seek(0);
        assert_eq!(file.read(&mut buf), 6);
        assert_eq!(&buf, b"abcdef");
    }
}
