use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use cooldb_common::{decode_u64, encode_u64, CoolDbError, Lsn, TransId};
use crc32fast::Hasher;

const MAGIC: u32 = 0xC001_DB00;
const VERSION: u32 = 1;
const SLOT_SIZE: u64 = 64;

/// The persistent "master record": two checksummed 64-byte slots written
/// alternately so a crash mid-write never leaves both slots corrupt. The
/// valid slot is whichever has the higher `next_trans_id` *and* a matching
/// checksum; if both fail their checksum, opening the database fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SystemKey {
    pub next_trans_id: TransId,
    pub master_lsn: Lsn,
}

fn encode_slot(key: &SystemKey) -> [u8; SLOT_SIZE as usize] {
    let mut buf = [0u8; SLOT_SIZE as usize];
    buf[0..4].copy_from_slice(&MAGIC.to_be_bytes());
    buf[4..8].copy_from_slice(&VERSION.to_be_bytes());
    buf[8..16].copy_from_slice(&encode_u64(key.next_trans_id));
    buf[16..24].copy_from_slice(&encode_u64(key.master_lsn));
    let mut hasher = Hasher::new();
    hasher.update(&buf[0..24]);
    let checksum = hasher.finalize();
    buf[24..28].copy_from_slice(&checksum.to_be_bytes());
    buf
}

fn decode_slot(buf: &[u8]) -> Option<SystemKey> {
    if buf.len() < SLOT_SIZE as usize {
        return None;
    }
    let magic = u32::from_be_bytes(buf[0..4].try_into().unwrap());
    if magic != MAGIC {
        return None;
    }
    let checksum = u32::from_be_bytes(buf[24..28].try_into().unwrap());
    let mut hasher = Hasher::new();
    hasher.update(&buf[0..24]);
    if hasher.finalize() != checksum {
        return None;
    }
    Some(SystemKey {
        next_trans_id: decode_u64(&buf[8..16]),
        master_lsn: decode_u64(&buf[16..24]),
    })
}

/// Two-slot on-disk master record, alternated on every write.
pub struct SystemKeyFile {
    file: std::fs::File,
    next_slot: u8,
}

impl SystemKeyFile {
    pub fn create(path: &Path, initial: SystemKey) -> Result<Self, CoolDbError> {
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(path)?;
        file.set_len(SLOT_SIZE * 2)?;
        let mut me = Self { file, next_slot: 0 };
        me.write(initial)?;
        Ok(me)
    }

    /// Open an existing system key file and return the winning slot's value.
    pub fn open(path: &Path) -> Result<(Self, SystemKey), CoolDbError> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let mut buf = vec![0u8; (SLOT_SIZE * 2) as usize];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut buf)?;

        let slot0 = decode_slot(&buf[0..SLOT_SIZE as usize]);
        let slot1 = decode_slot(&buf[SLOT_SIZE as usize..]);

        let (winner, next_slot) = match (slot0, slot1) {
            (Some(a), Some(b)) => {
                if b.next_trans_id >= a.next_trans_id {
                    (b, 0)
                } else {
                    (a, 1)
                }
            }
            (Some(a), None) => (a, 1),
            (None, Some(b)) => (b, 0),
            (None, None) => {
                return Err(CoolDbError::Recovery(
                    "both system key slots failed checksum validation".into(),
                ))
            }
        };

        Ok((Self { file, next_slot }, winner))
    }

    /// Persist `key` to the slot not currently holding the winning value,
    /// then flip which slot is "next".
    pub fn write(&mut self, key: SystemKey) -> Result<(), CoolDbError> {
        let slot_bytes = encode_slot(&key);
        let offset = self.next_slot as u64 * SLOT_SIZE;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&slot_bytes)?;
        self.file.sync_data()?;
        self.next_slot = 1 - self.next_slot;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn round_trip() {
        let tmp = NamedTempFile::new().unwrap();
        let key = SystemKey { next_trans_id: 1, master_lsn: 0 };
        SystemKeyFile::create(tmp.path(), key).unwrap();
        let (_, read_back) = SystemKeyFile::open(tmp.path()).unwrap();
        assert_eq!(read_back, key);
    }

    #[test]
    fn higher_trans_id_wins() {
        let tmp = NamedTempFile::new().unwrap();
        let mut skf = SystemKeyFile::create(tmp.path(), SystemKey { next_trans_id: 1, master_lsn: 10 }).unwrap();
        skf.write(SystemKey { next_trans_id: 2, master_lsn: 20 }).unwrap();
        drop(skf);
        let (_, read_back) = SystemKeyFile::open(tmp.path()).unwrap();
        assert_eq!(read_back.next_trans_id, 2);
        assert_eq!(read_back.master_lsn, 20);
    }

    #[test]
    fn alternates_slots_across_writes() {
        let tmp = NamedTempFile::new().unwrap();
        let mut skf = SystemKeyFile::create(tmp.path(), SystemKey { next_trans_id: 1, master_lsn: 0 }).unwrap();
        for i in 2..6 {
            skf.write(SystemKey { next_trans_id: i, master_lsn: i * 10 }).unwrap();
        }
        drop(skf);
        let (_, read_back) = SystemKeyFile::open(tmp.path()).unwrap();
        assert_eq!(read_back.next_trans_id, 5);
    }
}
