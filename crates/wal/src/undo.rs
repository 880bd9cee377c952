use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use cooldb_common::{CoolDbError, FilePage, Lsn, UndoPointer, PAGE_SIZE, UNDO_LOG_FILE_ID};

use crate::record::LogRecord;

struct WriterState {
    file: File,
    /// Next write position, as a raw byte offset from the start of the file.
    tail: u64,
}

/// Append-only, non-circular undo log. Addressed as a sequence of logical
/// `PAGE_SIZE`-byte pages under the dedicated `UNDO_LOG_FILE_ID` namespace so
/// that `UndoPointer.page` is a real `FilePage` rather than a bare byte
/// offset: `page.page_num = offset / PAGE_SIZE`, `offset = offset % PAGE_SIZE`.
///
/// Unlike the redo log, this file is purged rather than wrapped: once every
/// transaction whose undo records it holds has ended, `purge` rewrites it
/// from the lowest retained record forward.
pub struct UndoLogWriter {
    state: Mutex<WriterState>,
    path: PathBuf,
}

fn pointer_for(offset: u64, lsn: Lsn) -> UndoPointer {
    UndoPointer {
        page: FilePage::new(UNDO_LOG_FILE_ID, (offset / PAGE_SIZE as u64) as u32),
        offset: (offset % PAGE_SIZE as u64) as u16,
        lsn,
    }
}

fn pointer_to_offset(ptr: &UndoPointer) -> u64 {
    ptr.page.page_num as u64 * PAGE_SIZE as u64 + ptr.offset as u64
}

impl UndoLogWriter {
    pub fn create(path: &Path) -> Result<Self, CoolDbError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(path)?;
        Ok(Self { state: Mutex::new(WriterState { file, tail: 0 }), path: path.to_path_buf() })
    }

    pub fn open(path: &Path) -> Result<Self, CoolDbError> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let tail = file.seek(SeekFrom::End(0))?;
        Ok(Self { state: Mutex::new(WriterState { file, tail }), path: path.to_path_buf() })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an undo record carrying the redo CLR's LSN that would
    /// re-establish it on replay, returning its `UndoPointer`.
    pub fn write(&self, record: &LogRecord, clr_lsn: Lsn) -> Result<UndoPointer, CoolDbError> {
        let bytes = record.encode();
        let mut st = self.state.lock().unwrap();
        let offset = st.tail;
        st.file.seek(SeekFrom::Start(offset))?;
        st.file.write_all(&bytes)?;
        st.tail += bytes.len() as u64;
        Ok(pointer_for(offset, clr_lsn))
    }

    pub fn read(&self, ptr: &UndoPointer) -> Result<LogRecord, CoolDbError> {
        let offset = pointer_to_offset(ptr);
        let mut st = self.state.lock().unwrap();
        st.file.seek(SeekFrom::Start(offset))?;
        let mut header = [0u8; 2];
        st.file.read_exact(&mut header)?;
        let len = u16::from_be_bytes(header) as usize;
        let mut buf = vec![0u8; len];
        buf[0..2].copy_from_slice(&header);
        st.file.read_exact(&mut buf[2..])?;
        let (rec, _) = LogRecord::decode(&buf)?;
        Ok(rec)
    }

    /// Physically rewrite the file, dropping every record whose `UndoPointer`
    /// byte offset is below `retain_from`'s offset. Used once the lowest
    /// `firstLSN` among active transactions has advanced past it.
    pub fn purge(&self, retain_from: &UndoPointer) -> Result<(), CoolDbError> {
        let keep_from = pointer_to_offset(retain_from);
        let mut st = self.state.lock().unwrap();
        let old_len = st.tail;
        if keep_from == 0 || keep_from >= old_len {
            return Ok(());
        }
        let mut kept = vec![0u8; (old_len - keep_from) as usize];
        st.file.seek(SeekFrom::Start(keep_from))?;
        st.file.read_exact(&mut kept)?;
        st.file.set_len(0)?;
        st.file.seek(SeekFrom::Start(0))?;
        st.file.write_all(&kept)?;
        st.tail = kept.len() as u64;
        Ok(())
    }

    pub fn tail_pointer(&self) -> UndoPointer {
        let st = self.state.lock().unwrap();
        pointer_for(st.tail, 0)
    }
}
