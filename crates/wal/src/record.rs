use cooldb_common::{decode_u32, decode_u64, encode_u32, encode_u64, CoolDbError, FilePage, LogData, Lsn, RecordType, TransId, UndoPointer};

/// Reserved `LogData.id` under which `writeUndoRedo` embeds the paired
/// `UndoPointer` in a redo record, so the analyze pass can reconstruct a
/// transaction's undo chain without a second on-disk index. Client payload
/// entries always use ids `>= 1`.
pub const UNDO_POINTER_DATA_ID: u8 = 0;

/// Prepend the paired `UndoPointer` to a redo record's payload as a
/// reserved `LogData` entry.
pub fn with_undo_pointer(ptr: UndoPointer, mut data: Vec<LogData>) -> Vec<LogData> {
    let mut bytes = Vec::with_capacity(8);
    bytes.extend_from_slice(&ptr.page.file_id.to_be_bytes());
    bytes.extend_from_slice(&encode_u32(ptr.page.page_num));
    bytes.extend_from_slice(&ptr.offset.to_be_bytes());
    bytes.extend_from_slice(&encode_u64(ptr.lsn));
    data.insert(0, LogData { id: UNDO_POINTER_DATA_ID, bytes });
    data
}

/// Recover the `UndoPointer` embedded by `with_undo_pointer`, if present.
pub fn extract_undo_pointer(data: &[LogData]) -> Option<UndoPointer> {
    let entry = data.iter().find(|d| d.id == UNDO_POINTER_DATA_ID)?;
    if entry.bytes.len() != 16 {
        return None;
    }
    let file_id = u16::from_be_bytes(entry.bytes[0..2].try_into().unwrap());
    let page_num = decode_u32(&entry.bytes[2..6]);
    let offset = u16::from_be_bytes(entry.bytes[6..8].try_into().unwrap());
    let lsn = decode_u64(&entry.bytes[8..16]);
    Some(UndoPointer { page: FilePage::new(file_id, page_num), offset, lsn })
}

/// Fixed portion of the on-disk framing shared by redo and undo records:
/// `length(2) + type(1) + transId(8) + fileId(2) + pageId(4) + pageType(1)
/// + undoNxtLsn(8) + dataCount(1)`.
pub const RECORD_HEADER_SIZE: usize = 2 + 1 + 8 + 2 + 4 + 1 + 8 + 1;

/// One redo or undo log record body. Shared between the redo and undo
/// writers since the wire framing is identical; only the address that
/// locates a record (an `Lsn` for redo, an `UndoPointer` for undo) differs
/// and is tracked by the respective writer, not embedded here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRecord {
    pub rec_type: RecordType,
    pub trans_id: TransId,
    pub page: FilePage,
    pub page_type: u8,
    pub undo_nxt_lsn: Lsn,
    pub data: Vec<LogData>,
}

impl LogRecord {
    /// Total encoded length, including the 2-byte length prefix itself.
    pub fn encoded_len(&self) -> usize {
        let data_len: usize = self.data.iter().map(|d| 1 + 2 + d.bytes.len()).sum();
        RECORD_HEADER_SIZE + data_len
    }

    pub fn encode(&self) -> Vec<u8> {
        let len = self.encoded_len();
        let mut buf = Vec::with_capacity(len);
        buf.extend_from_slice(&(len as u16).to_be_bytes());
        buf.push(self.rec_type as u8);
        buf.extend_from_slice(&encode_u64(self.trans_id));
        buf.extend_from_slice(&self.page.file_id.to_be_bytes());
        buf.extend_from_slice(&encode_u32(self.page.page_num));
        buf.push(self.page_type);
        buf.extend_from_slice(&encode_u64(self.undo_nxt_lsn));
        buf.push(self.data.len() as u8);
        for d in &self.data {
            buf.push(d.id);
            buf.extend_from_slice(&(d.bytes.len() as u16).to_be_bytes());
            buf.extend_from_slice(&d.bytes);
        }
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<(Self, usize), CoolDbError> {
        if buf.len() < 2 {
            return Err(CoolDbError::Corruption("record shorter than length prefix".into()));
        }
        let len = u16::from_be_bytes(buf[0..2].try_into().unwrap()) as usize;
        if buf.len() < len {
            return Err(CoolDbError::Corruption("record truncated".into()));
        }
        if len < RECORD_HEADER_SIZE {
            return Err(CoolDbError::Corruption("record shorter than fixed header".into()));
        }
        let rec_type = RecordType::from_u8(buf[2])
            .ok_or_else(|| CoolDbError::Corruption(format!("unknown record type {}", buf[2])))?;
        let trans_id = decode_u64(&buf[3..11]);
        let file_id = u16::from_be_bytes(buf[11..13].try_into().unwrap());
        let page_num = decode_u32(&buf[13..17]);
        let page_type = buf[17];
        let undo_nxt_lsn = decode_u64(&buf[18..26]);
        let data_count = buf[26] as usize;

        let mut pos = RECORD_HEADER_SIZE;
        let mut data = Vec::with_capacity(data_count);
        for _ in 0..data_count {
            if pos + 3 > len {
                return Err(CoolDbError::Corruption("truncated LogData entry".into()));
            }
            let id = buf[pos];
            let dlen = u16::from_be_bytes(buf[pos + 1..pos + 3].try_into().unwrap()) as usize;
            pos += 3;
            if pos + dlen > len {
                return Err(CoolDbError::Corruption("truncated LogData payload".into()));
            }
            data.push(LogData { id, bytes: buf[pos..pos + dlen].to_vec() });
            pos += dlen;
        }

        Ok((
            LogRecord {
                rec_type,
                trans_id,
                page: FilePage::new(file_id, page_num),
                page_type,
                undo_nxt_lsn,
                data,
            },
            len,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LogRecord {
        LogRecord {
            rec_type: RecordType::Update,
            trans_id: 7,
            page: FilePage::new(3, 42),
            page_type: 1,
            undo_nxt_lsn: 99,
            data: vec![
                LogData { id: 1, bytes: vec![0xAB, 0xCD] },
                LogData { id: 2, bytes: vec![] },
            ],
        }
    }

    #[test]
    fn round_trip() {
        let rec = sample();
        let bytes = rec.encode();
        let (decoded, len) = LogRecord::decode(&bytes).unwrap();
        assert_eq!(len, bytes.len());
        assert_eq!(decoded, rec);
    }

    #[test]
    fn undo_pointer_round_trip() {
        let ptr = UndoPointer { page: FilePage::new(5, 9), offset: 12, lsn: 77 };
        let data = with_undo_pointer(ptr, vec![LogData { id: 1, bytes: vec![1, 2, 3] }]);
        assert_eq!(extract_undo_pointer(&data), Some(ptr));
        assert_eq!(data.len(), 2);
    }

    #[test]
    fn rejects_truncated() {
        let rec = sample();
        let mut bytes = rec.encode();
        bytes.truncate(bytes.len() - 1);
        assert!(LogRecord::decode(&bytes).is_err());
    }
}
