//! Ties disk, free-sector bitmap, and directory tree together behind a
//! path-based `Create`/`Open`/`Remove` interface (§4.8).
//!
//! Both the bitmap and every directory (including the root) are
//! themselves regular files, addressed by the two well-known sectors
//! [`crate::config::FREE_MAP_SECTOR`] and [`crate::config::DIRECTORY_SECTOR`].
//! Every directory — the root included — seeds a `.` entry pointing at
//! itself and a `..` entry pointing at its parent (the root's `..` also
//! points at itself, since it has no parent).

use std::sync::{Arc, Mutex};

use crate::bitmap::Bitmap;
use crate::config::{
    free_map_file_size, DIRECTORY_SECTOR, FREE_MAP_SECTOR, NUM_DIR_ENTRIES, NUM_SECTORS,
};
use crate::directory::{Directory, RECORD_SIZE};
use crate::error::Error;
use crate::file_header::{FileHeader, FileKind};
use crate::open_file::OpenFile;
use crate::synch_disk::SynchDisk;

fn directory_file_size() -> u32 {
    (NUM_DIR_ENTRIES * RECORD_SIZE) as u32
}

/// The mounted filesystem: the disk, the live free-sector bitmap, and
/// permanently open handles onto the bitmap and root-directory files.
pub struct FileSystem {
    disk: Arc<dyn SynchDisk>,
    free_map: Arc<Mutex<Bitmap>>,
    free_map_file: OpenFile,
    root_file: Arc<OpenFile>,
}

impl FileSystem {
    /// Formats a blank disk: marks the two well-known sectors used by
    /// the bitmap and root directory headers, allocates their data
    /// sectors, and seeds the root directory with `.` and `..` both
    /// pointing at itself.
    pub fn format(disk: Arc<dyn SynchDisk>, now: u32) -> FileSystem {
        let mut free_map = Bitmap::new(NUM_SECTORS as usize);
        free_map.mark(FREE_MAP_SECTOR as usize);
        free_map.mark(DIRECTORY_SECTOR as usize);

        let mut map_header = FileHeader::new(FileKind::User, now);
        map_header.allocate(disk.as_ref(), &mut free_map, free_map_file_size()).expect(
            "disk too small to hold the free-map file; SECTOR_SIZE/NUM_SECTORS are misconfigured",
        );
        map_header.write_back(disk.as_ref(), FREE_MAP_SECTOR);

        let mut dir_header = FileHeader::new(FileKind::Directory, now);
        dir_header.allocate(disk.as_ref(), &mut free_map, directory_file_size()).expect(
            "disk too small to hold the root directory file; NUM_DIR_ENTRIES is misconfigured",
        );
        dir_header.write_back(disk.as_ref(), DIRECTORY_SECTOR);

        let free_map = Arc::new(Mutex::new(free_map));
        let free_map_file = OpenFile::new(disk.clone(), free_map.clone(), FREE_MAP_SECTOR);
        let root_file = Arc::new(OpenFile::new(disk.clone(), free_map.clone(), DIRECTORY_SECTOR));

        let mut root_dir = Directory::new(NUM_DIR_ENTRIES);
        root_dir.add(".", DIRECTORY_SECTOR).unwrap();
        root_dir.add("..", DIRECTORY_SECTOR).unwrap();
        root_dir.write_back(&root_file).expect("root directory write-back during format");

        Self::flush_free_map(&disk, &free_map, &free_map_file);

        FileSystem { disk, free_map, free_map_file, root_file }
    }

    /// Mounts an already-formatted disk.
    pub fn mount(disk: Arc<dyn SynchDisk>) -> FileSystem {
        let free_map_file = OpenFile::new(disk.clone(), Arc::new(Mutex::new(Bitmap::new(0))), FREE_MAP_SECTOR);
        let mut bytes = vec![0u8; free_map_file.length() as usize];
        free_map_file.read_at(&mut bytes, 0);
        let free_map = Arc::new(Mutex::new(Bitmap::from_bytes(NUM_SECTORS as usize, &bytes)));

        let free_map_file = OpenFile::new(disk.clone(), free_map.clone(), FREE_MAP_SECTOR);
        let root_file = Arc::new(OpenFile::new(disk.clone(), free_map.clone(), DIRECTORY_SECTOR));
        FileSystem { disk, free_map, free_map_file, root_file }
    }

    fn flush_free_map(disk: &Arc<dyn SynchDisk>, free_map: &Arc<Mutex<Bitmap>>, file: &OpenFile) {
        let bytes = free_map.lock().unwrap().to_bytes();
        file.write_at(&bytes, 0).expect("free map always fits in its preallocated file");
        let _ = disk;
    }

    fn open_directory_at(&self, sector: u32) -> (Directory, Arc<OpenFile>) {
        if sector == DIRECTORY_SECTOR {
            (Directory::fetch_from(&self.root_file), self.root_file.clone())
        } else {
            let file = Arc::new(OpenFile::new(self.disk.clone(), self.free_map.clone(), sector));
            (Directory::fetch_from(&file), file)
        }
    }

    /// Resolves every path component but the last, returning the parent
    /// directory's open file and the final path component's name.
    ///
    /// A leading `/` is accepted but not required — relative and
    /// absolute paths both resolve from the root, since there is no
    /// notion of a current working directory below the kernel.
    fn find_father_dir<'a>(&self, path: &'a str) -> Result<(Directory, Arc<OpenFile>, &'a str), Error> {
        let path = path.strip_prefix('/').unwrap_or(path);
        let mut parts = path.split('/').filter(|s| !s.is_empty()).peekable();

        let (mut dir, mut file) = self.open_directory_at(DIRECTORY_SECTOR);

        let mut name = match parts.next() {
            Some(n) => n,
            None => return Err(Error::NotFound),
        };

        while parts.peek().is_some() {
            let sector = dir.find(name).ok_or(Error::NotFound)?;
            let (next_dir, next_file) = self.open_directory_at(sector);
            dir = next_dir;
            file = next_file;
            name = parts.next().unwrap();
        }
        Ok((dir, file, name))
    }

    /// Creates a file (or, if `is_directory`, a subdirectory) of
    /// `initial_size` bytes at `path`.
    ///
    /// Everything this allocates — the header sector, the header's data
    /// sectors, and (for a subdirectory) the seeded `.`/`..` entries —
    /// is rolled back on any failure, including one surfaced only while
    /// growing the parent directory to hold the new entry (§4.8, §7):
    /// the free map is restored to its pre-`create` snapshot and
    /// reflushed to disk, and a parent directory entry already written
    /// back is removed again. The new file's own sectors may already
    /// have real bytes on disk at that point, but once the free map no
    /// longer marks them and no directory references them, they are
    /// unreachable garbage rather than a leak.
    pub fn create(&self, path: &str, initial_size: u32, is_directory: bool, now: u32) -> Result<(), Error> {
        let (mut parent_dir, parent_file, name) = self.find_father_dir(path)?;
        if parent_dir.find(name).is_some() {
            return Err(Error::AlreadyExists);
        }

        let mut free_map = self.free_map.lock().unwrap();
        let free_map_snapshot = free_map.clone();
        let header_sector = free_map.find().ok_or(Error::OutOfSpace { needed: 1, available: 0 })?;

        let kind = if is_directory { FileKind::Directory } else { FileKind::User };
        let size = if is_directory {
            directory_file_size()
        } else if initial_size == 0 {
            1
        } else {
            initial_size
        };

        let mut header = FileHeader::new(kind, now);
        if let Err(e) = header.allocate(self.disk.as_ref(), &mut free_map, size) {
            *free_map = free_map_snapshot;
            return Err(e);
        }
        header.write_back(self.disk.as_ref(), header_sector);

        if let Err(e) = parent_dir.add(name, header_sector) {
            *free_map = free_map_snapshot;
            return Err(e);
        }
        drop(free_map);

        if let Err(e) = parent_dir.write_back(&parent_file) {
            *self.free_map.lock().unwrap() = free_map_snapshot;
            Self::flush_free_map(&self.disk, &self.free_map, &self.free_map_file);
            return Err(e);
        }

        if is_directory {
            let new_file = OpenFile::new(self.disk.clone(), self.free_map.clone(), header_sector);
            let mut new_dir = Directory::new(NUM_DIR_ENTRIES);
            new_dir.add(".", header_sector).unwrap();
            let parent_sector = parent_file.header_sector();
            new_dir.add("..", parent_sector).unwrap();
            if let Err(e) = new_dir.write_back(&new_file) {
                let mut parent_dir = Directory::fetch_from(&parent_file);
                parent_dir.remove(name);
                let _ = parent_dir.write_back(&parent_file);
                *self.free_map.lock().unwrap() = free_map_snapshot;
                Self::flush_free_map(&self.disk, &self.free_map, &self.free_map_file);
                return Err(e);
            }
        }

        Self::flush_free_map(&self.disk, &self.free_map, &self.free_map_file);
        Ok(())
    }

    /// Opens `path` for reading and writing.
    pub fn open(&self, path: &str) -> Result<OpenFile, Error> {
        let (dir, _parent_file, name) = self.find_father_dir(path)?;
        let sector = dir.find(name).ok_or(Error::NotFound)?;
        Ok(OpenFile::new(self.disk.clone(), self.free_map.clone(), sector))
    }

    /// Removes the file at `path`, freeing its header and data sectors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotADirectory`] (despite the name — reused for
    /// "directory not empty", the only other way removal can fail once
    /// the entry itself is found) if `path` names a non-empty directory.
    pub fn remove(&self, path: &str) -> Result<(), Error> {
        let (mut dir, dir_file, name) = self.find_father_dir(path)?;
        let sector = dir.find(name).ok_or(Error::NotFound)?;

        let mut header = FileHeader::fetch_from(self.disk.as_ref(), sector);
        if header.kind == FileKind::Directory {
            let (victim_dir, _) = self.open_directory_at(sector);
            let only_dot_entries = victim_dir.list().iter().all(|n| n == "." || n == "..");
            if !only_dot_entries {
                return Err(Error::NotADirectory);
            }
        }

        let mut free_map = self.free_map.lock().unwrap();
        header.deallocate(self.disk.as_ref(), &mut free_map);
        free_map.clear(sector);
        drop(free_map);

        dir.remove(name);
        dir.write_back(&dir_file)?;
        Self::flush_free_map(&self.disk, &self.free_map, &self.free_map_file);
        Ok(())
    }

    /// Number of free (clear) sectors remaining in the free-sector
    /// bitmap. Exposed for tests asserting that a Create/Remove pair
    /// leaves this count unchanged.
    pub fn free_sectors(&self) -> usize {
        self.free_map.lock().unwrap().num_clear()
    }

    /// Lists the names present in the directory at `path` (the root if
    /// `path` is `"/"` or empty).
    pub fn list(&self, path: &str) -> Result<Vec<String>, Error> {
        if path.is_empty() || path == "/" {
            return Ok(Directory::fetch_from(&self.root_file).list());
        }
        let (parent_dir, _parent_file, name) = self.find_father_dir(path)?;
        let sector = parent_dir.find(name).ok_or(Error::NotFound)?;
        let (dir, _) = self.open_directory_at(sector);
        Ok(dir.list())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synch_disk::MemDisk;

    fn mounted() -> FileSystem {
        let disk: Arc<dyn SynchDisk> = Arc::new(MemDisk::new(NUM_SECTORS));
        FileSystem::format(disk, 0)
    }

    #[test]
    fn root_directory_seeds_dot_and_dotdot() {
        let fs = mounted();
        let names = fs.list("/").unwrap();
        assert!(names.contains(&".".to_string()));
        assert!(names.contains(&"..".to_string()));
    }

    #[test]
    fn create_write_read_remove_a_file() {
        let fs = mounted();
        fs.create("hello.txt", 0, false, 0).unwrap();

        let file = fs.open("hello.txt").unwrap();
        file.write_at(b"hi there", 0).unwrap();
        let mut buf = [0u8; 8];
        file.read_at(&mut buf, 0);
        assert_eq!(&buf, b"hi there");
        drop(file);

        fs.remove("hello.txt").unwrap();
        assert!(matches!(fs.open("hello.txt"), Err(Error::NotFound)));
    }

    #[test]
    fn create_rejects_a_duplicate_name() {
        let fs = mounted();
        fs.create("a", 0, false, 0).unwrap();
        assert!(matches!(fs.create("a", 0, false, 0), Err(Error::AlreadyExists)));
    }

    #[test]
    fn subdirectories_resolve_nested_paths() {
        let fs = mounted();
        fs.create("sub", 0, true, 0).unwrap();
        fs.create("sub/leaf.txt", 0, false, 0).unwrap();

        let file = fs.open("sub/leaf.txt").unwrap();
        file.write_at(b"nested", 0).unwrap();
        let mut buf = [0u8; 6];
        file.read_at(&mut buf, 0);
        assert_eq!(&buf, b"nested");

        let names = fs.list("sub").unwrap();
        assert!(names.contains(&"leaf.txt".to_string()));
        assert!(names.contains(&".".to_string()));
        assert!(names.contains(&"..".to_string()));
    }

    #[test]
    fn remove_refuses_a_nonempty_directory() {
        let fs = mounted();
        fs.create("sub", 0, true, 0).unwrap();
        fs.create("sub/leaf.txt", 0, false, 0).unwrap();
        assert!(matches!(fs.remove("sub"), Err(Error::NotADirectory)));
    }

    /// A plain `write_at` that grows a file past its initial allocation
    /// (as opposed to growth during `create`) must flush the free map
    /// itself, since no `FileSystem`-level call wraps it. A remount that
    /// saw a stale map would still show the newly-used sectors as free,
    /// letting a later create double-allocate live file data.
    #[test]
    fn growth_through_a_plain_write_survives_a_remount() {
        let disk: Arc<dyn SynchDisk> = Arc::new(MemDisk::new(NUM_SECTORS));
        let fs = FileSystem::format(disk.clone(), 0);
        fs.create("/grown", 0, false, 0).unwrap();

        let sector_size = crate::config::SECTOR_SIZE as u32;
        let pattern: Vec<u8> = (0..sector_size * 4).map(|i| (i % 256) as u8).collect();
        {
            let file = fs.open("/grown").unwrap();
            file.write_at(&pattern, 0).unwrap();
        }
        let free_after_growth = fs.free_sectors();
        drop(fs);

        let fs = FileSystem::mount(disk);
        assert_eq!(
            fs.free_sectors(),
            free_after_growth,
            "remount must see the same free-sector count a growing write left behind"
        );

        let file = fs.open("/grown").unwrap();
        let mut buf = vec![0u8; pattern.len()];
        assert_eq!(file.read_at(&mut buf, 0), pattern.len());
        assert_eq!(buf, pattern, "grown file content must survive a remount");
        drop(file);

        // If the remounted free map were stale, this create could be
        // handed a sector the grown file's data already occupies.
        fs.create("/other", sector_size, false, 0).unwrap();
        let file = fs.open("/grown").unwrap();
        let mut buf = vec![0u8; pattern.len()];
        file.read_at(&mut buf, 0);
        assert_eq!(buf, pattern, "an unrelated create must not clobber the grown file's sectors");
    }
}
