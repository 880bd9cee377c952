use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

use cooldb_common::{CoolDbError, FileId, FilePage, PageBuf, PAGE_SIZE};

struct OpenFile {
    handle: File,
    num_pages: u32,
}

/// Maps `(fileId, pageId)` to fixed-size page reads/writes against raw
/// files. Safe for concurrent callers on distinct pages; overlapping access
/// to the same page is the buffer pool's responsibility to arbitrate, not
/// this layer's.
pub struct FileManager {
    files: Mutex<HashMap<FileId, OpenFile>>,
}

impl FileManager {
    pub fn new() -> Self {
        Self { files: Mutex::new(HashMap::new()) }
    }

    pub fn add_file(&self, id: FileId, path: &Path) -> Result<(), CoolDbError> {
        let handle = OpenOptions::new().create(true).read(true).write(true).open(path)?;
        let len = handle.metadata()?.len();
        let num_pages = (len / PAGE_SIZE as u64) as u32;
        self.files.lock().unwrap().insert(id, OpenFile { handle, num_pages });
        Ok(())
    }

    pub fn extend(&self, id: FileId, n_pages: u32) -> Result<FilePage, CoolDbError> {
        let mut files = self.files.lock().unwrap();
        let entry = files
            .get_mut(&id)
            .ok_or_else(|| CoolDbError::BufferNotFound(FilePage::new(id, 0)))?;
        let start = entry.num_pages;
        let new_len = (start as u64 + n_pages as u64) * PAGE_SIZE as u64;
        entry.handle.set_len(new_len)?;
        entry.num_pages += n_pages;
        Ok(FilePage::new(id, start))
    }

    pub fn num_pages(&self, id: FileId) -> Result<u32, CoolDbError> {
        let files = self.files.lock().unwrap();
        files
            .get(&id)
            .map(|f| f.num_pages)
            .ok_or_else(|| CoolDbError::BufferNotFound(FilePage::new(id, 0)))
    }

    pub fn fetch(&self, page: FilePage, buf: &mut PageBuf) -> Result<(), CoolDbError> {
        let mut files = self.files.lock().unwrap();
        let entry = files.get_mut(&page.file_id).ok_or(CoolDbError::BufferNotFound(page))?;
        if page.page_num >= entry.num_pages {
            return Err(CoolDbError::BufferNotFound(page));
        }
        entry.handle.seek(SeekFrom::Start(page.page_num as u64 * PAGE_SIZE as u64))?;
        entry.handle.read_exact(buf)?;
        Ok(())
    }

    pub fn flush(&self, page: FilePage, buf: &PageBuf, force_sync: bool) -> Result<(), CoolDbError> {
        let mut files = self.files.lock().unwrap();
        let entry = files.get_mut(&page.file_id).ok_or(CoolDbError::BufferNotFound(page))?;
        entry.handle.seek(SeekFrom::Start(page.page_num as u64 * PAGE_SIZE as u64))?;
        entry.handle.write_all(buf)?;
        if force_sync {
            entry.handle.sync_data()?;
        }
        Ok(())
    }

    pub fn force(&self, id: FileId) -> Result<(), CoolDbError> {
        let mut files = self.files.lock().unwrap();
        let entry = files.get_mut(&id).ok_or(CoolDbError::BufferNotFound(FilePage::new(id, 0)))?;
        entry.handle.sync_all()?;
        Ok(())
    }

    pub fn get_page_size(&self) -> usize {
        PAGE_SIZE
    }
}

impl Default for FileManager {
    fn default() -> Self {
        Self::new()
    }
}
