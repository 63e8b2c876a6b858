//! Append-only record file for one table (`t<id>.kdt`).
//!
//! # Layout
//!
//! A 64-byte header (magic, format version, table id, unique-id counter and a
//! crc32 over those fields) followed by frames:
//!
//! ```text
//! [u32 len][u64 slot][u16 state][payload: len bytes][u32 crc32(payload)]
//! ```
//!
//! Slot 0 holds the table schema; data row `r` lives in slot `r + 1`. The state
//! field is rewritten in place. A later frame for a slot supersedes an earlier
//! one, and a torn frame at the end of the file is truncated on open.

use crate::record::RecordState;
use keel_core::{Error, Result, RowIndex, TableId};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Magic number for record files.
const RECORD_MAGIC: u32 = 0x4B44_5431; // "KDT1"

/// Magic number prefixing the schema payload in slot 0.
const SCHEMA_MAGIC: u32 = 0x4B53_4348; // "KSCH"

/// Version of the record file format.
const RECORD_VERSION: u32 = 1;

/// Size of the reserved file header.
pub const HEADER_SIZE: u64 = 64;

/// Bytes before the payload: len + slot + state.
const FRAME_HEAD: u64 = 4 + 8 + 2;

/// Bytes after the payload: crc.
const FRAME_TAIL: u64 = 4;

/// Offset of the state field within a frame.
const STATE_OFFSET: u64 = 4 + 8;

/// Upper bound on a single payload, guarding against garbage lengths.
const MAX_PAYLOAD: u32 = 256 * 1024 * 1024;

/// Slot holding the schema.
const SCHEMA_SLOT: u64 = 0;

/// Location and state of the live frame of one slot.
#[derive(Clone, Copy, Debug)]
struct SlotEntry {
    offset: u64,
    len: u32,
    state: RecordState,
}

#[derive(Debug)]
struct Inner {
    file: File,
    end: u64,
    slots: Vec<Option<SlotEntry>>,
    unique_id: u64,
}

/// Converts a row index to its slot.
#[inline]
pub fn slot_of(row: RowIndex) -> u64 {
    row + 1
}

/// A table's record file.
#[derive(Debug)]
pub struct RecordFile {
    path: PathBuf,
    table_id: TableId,
    inner: Mutex<Inner>,
}

impl RecordFile {
    /// Creates a new record file holding `schema`. Fails if the file exists.
    pub fn create(path: impl AsRef<Path>, table_id: TableId, schema: &[u8]) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;

        let records = Self {
            path,
            table_id,
            inner: Mutex::new(Inner {
                file,
                end: HEADER_SIZE,
                slots: Vec::new(),
                unique_id: 1,
            }),
        };
        {
            let mut inner = records.inner.lock();
            Self::write_header(&mut inner, table_id)?;
        }

        let mut payload = Vec::with_capacity(schema.len() + 4);
        payload.extend_from_slice(&SCHEMA_MAGIC.to_le_bytes());
        payload.extend_from_slice(schema);
        records.append(SCHEMA_SLOT, RecordState::CommittedAdded, &payload)?;
        records.sync()?;
        Ok(records)
    }

    /// Opens an existing record file and returns it with the stored schema.
    pub fn open(path: impl AsRef<Path>) -> Result<(Self, Vec<u8>)> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        let mut header = [0u8; HEADER_SIZE as usize];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header).map_err(|e| {
            Error::format(format!("record file {} header unreadable: {}", path.display(), e))
        })?;
        let (table_id, unique_id) = Self::parse_header(&header)?;

        let (slots, end) = Self::scan_frames(&mut file, &path)?;
        let records = Self {
            path,
            table_id,
            inner: Mutex::new(Inner {
                file,
                end,
                slots,
                unique_id,
            }),
        };

        let payload = records.read_slot(SCHEMA_SLOT)?;
        if payload.len() < 4 || payload[0..4] != SCHEMA_MAGIC.to_le_bytes() {
            return Err(Error::format(format!(
                "record file {} has no schema frame",
                records.path.display()
            )));
        }
        Ok((records, payload[4..].to_vec()))
    }

    fn write_header(inner: &mut Inner, table_id: TableId) -> Result<()> {
        let mut buf = [0u8; HEADER_SIZE as usize];
        buf[0..4].copy_from_slice(&RECORD_MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&RECORD_VERSION.to_le_bytes());
        buf[8..12].copy_from_slice(&table_id.to_le_bytes());
        buf[16..24].copy_from_slice(&inner.unique_id.to_le_bytes());
        let checksum = crc32fast::hash(&buf[0..24]);
        buf[24..28].copy_from_slice(&checksum.to_le_bytes());

        inner.file.seek(SeekFrom::Start(0))?;
        inner.file.write_all(&buf)?;
        Ok(())
    }

    fn parse_header(buf: &[u8]) -> Result<(TableId, u64)> {
        let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if magic != RECORD_MAGIC {
            return Err(Error::format(format!(
                "invalid record file magic: expected {:08x}, got {:08x}",
                RECORD_MAGIC, magic
            )));
        }
        let version = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        if version != RECORD_VERSION {
            return Err(Error::format(format!(
                "unsupported record file version: {}",
                version
            )));
        }
        let stored = u32::from_le_bytes([buf[24], buf[25], buf[26], buf[27]]);
        let computed = crc32fast::hash(&buf[0..24]);
        if stored != computed {
            return Err(Error::format(format!(
                "record file header checksum mismatch: expected {:08x}, got {:08x}",
                stored, computed
            )));
        }
        let table_id = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
        let mut id = [0u8; 8];
        id.copy_from_slice(&buf[16..24]);
        Ok((table_id, u64::from_le_bytes(id)))
    }

    /// Scans every frame, truncating a torn tail.
    fn scan_frames(file: &mut File, path: &Path) -> Result<(Vec<Option<SlotEntry>>, u64)> {
        let file_len = file.metadata()?.len();
        let mut slots: Vec<Option<SlotEntry>> = Vec::new();
        let mut pos = HEADER_SIZE;
        file.seek(SeekFrom::Start(pos))?;
        let mut reader = BufReader::new(&mut *file);
        let mut head = [0u8; FRAME_HEAD as usize];
        let mut payload = Vec::new();

        while pos + FRAME_HEAD + FRAME_TAIL <= file_len {
            reader.read_exact(&mut head)?;
            let len = u32::from_le_bytes([head[0], head[1], head[2], head[3]]);
            let mut slot_bytes = [0u8; 8];
            slot_bytes.copy_from_slice(&head[4..12]);
            let slot = u64::from_le_bytes(slot_bytes);
            let code = u16::from_le_bytes([head[12], head[13]]);

            let frame_end = pos + FRAME_HEAD + len as u64 + FRAME_TAIL;
            if len > MAX_PAYLOAD || frame_end > file_len {
                break;
            }
            payload.resize(len as usize, 0);
            reader.read_exact(&mut payload)?;
            let mut crc = [0u8; 4];
            reader.read_exact(&mut crc)?;
            if u32::from_le_bytes(crc) != crc32fast::hash(&payload) {
                if frame_end == file_len {
                    break;
                }
                return Err(Error::format(format!(
                    "{}: checksum mismatch in frame at offset {}",
                    path.display(),
                    pos
                )));
            }
            let state = RecordState::from_code(code)?;

            let idx = slot as usize;
            if idx >= slots.len() {
                slots.resize(idx + 1, None);
            }
            slots[idx] = Some(SlotEntry {
                offset: pos,
                len,
                state,
            });
            pos = frame_end;
        }
        drop(reader);

        if pos < file_len {
            warn!(
                path = %path.display(),
                valid = pos,
                file_len,
                "truncating torn frame at end of record file"
            );
            file.set_len(pos)?;
            file.sync_all()?;
        }
        debug!(path = %path.display(), slots = slots.len(), "scanned record file");
        Ok((slots, pos))
    }

    /// Returns the table id stored in the header.
    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of data rows ever allocated.
    pub fn row_capacity(&self) -> u64 {
        (self.inner.lock().slots.len() as u64).saturating_sub(1)
    }

    /// Returns the size of the file in bytes.
    pub fn len_bytes(&self) -> u64 {
        self.inner.lock().end
    }

    /// Appends a frame for `slot`, superseding any earlier frame.
    pub fn append(&self, slot: u64, state: RecordState, payload: &[u8]) -> Result<()> {
        if payload.len() as u64 > MAX_PAYLOAD as u64 {
            return Err(Error::invalid_operation(format!(
                "record of {} bytes exceeds the frame limit",
                payload.len()
            )));
        }
        let mut frame = Vec::with_capacity(payload.len() + (FRAME_HEAD + FRAME_TAIL) as usize);
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&slot.to_le_bytes());
        frame.extend_from_slice(&state.code().to_le_bytes());
        frame.extend_from_slice(payload);
        frame.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());

        let mut inner = self.inner.lock();
        let offset = inner.end;
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(&frame)?;
        inner.end = offset + frame.len() as u64;

        let idx = slot as usize;
        if idx >= inner.slots.len() {
            inner.slots.resize(idx + 1, None);
        }
        inner.slots[idx] = Some(SlotEntry {
            offset,
            len: payload.len() as u32,
            state,
        });
        Ok(())
    }

    fn read_slot(&self, slot: u64) -> Result<Vec<u8>> {
        let mut inner = self.inner.lock();
        let entry = inner
            .slots
            .get(slot as usize)
            .copied()
            .flatten()
            .ok_or_else(|| {
                Error::consistency(format!(
                    "slot {} does not exist in table {}",
                    slot, self.table_id
                ))
            })?;
        let mut payload = vec![0u8; entry.len as usize];
        inner.file.seek(SeekFrom::Start(entry.offset + FRAME_HEAD))?;
        inner.file.read_exact(&mut payload)?;
        Ok(payload)
    }

    /// Reads the payload of a data row.
    pub fn read_row(&self, row: RowIndex) -> Result<Vec<u8>> {
        self.read_slot(slot_of(row))
    }

    /// Returns the state of a data row, if the row exists.
    pub fn state(&self, row: RowIndex) -> Option<RecordState> {
        self.inner
            .lock()
            .slots
            .get(slot_of(row) as usize)
            .copied()
            .flatten()
            .map(|e| e.state)
    }

    /// Rewrites the state of a data row in place.
    pub fn write_state(&self, row: RowIndex, state: RecordState) -> Result<()> {
        let mut inner = self.inner.lock();
        let slot = slot_of(row) as usize;
        let Some(entry) = inner.slots.get(slot).copied().flatten() else {
            return Err(Error::consistency(format!(
                "row {} does not exist in table {}",
                row, self.table_id
            )));
        };
        inner.file.seek(SeekFrom::Start(entry.offset + STATE_OFFSET))?;
        inner.file.write_all(&state.code().to_le_bytes())?;
        if let Some(Some(e)) = inner.slots.get_mut(slot) {
            e.state = state;
        }
        Ok(())
    }

    /// Returns every data row with its state.
    pub fn rows(&self) -> Vec<(RowIndex, RecordState)> {
        self.inner
            .lock()
            .slots
            .iter()
            .enumerate()
            .skip(1)
            .filter_map(|(slot, e)| e.map(|e| (slot as u64 - 1, e.state)))
            .collect()
    }

    /// Returns the next value of the unique-id counter and persists it.
    pub fn next_unique_id(&self, sync: bool) -> Result<u64> {
        let mut inner = self.inner.lock();
        let id = inner.unique_id;
        inner.unique_id = id + 1;
        Self::write_header(&mut inner, self.table_id)?;
        if sync {
            inner.file.sync_data()?;
        }
        Ok(id)
    }

    /// Returns the current value of the unique-id counter without advancing it.
    pub fn peek_unique_id(&self) -> u64 {
        self.inner.lock().unique_id
    }

    /// Flushes all writes to disk.
    pub fn sync(&self) -> Result<()> {
        let inner = self.inner.lock();
        inner.file.sync_data()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn new_file(dir: &TempDir) -> (RecordFile, PathBuf) {
        let path = dir.path().join("t7.kdt");
        (RecordFile::create(&path, 7, b"schema-bytes").unwrap(), path)
    }

    #[test]
    fn test_create_and_reopen() {
        let dir = TempDir::new().unwrap();
        let (records, path) = new_file(&dir);
        records.append(slot_of(0), RecordState::Uncommitted, b"row zero").unwrap();
        records.append(slot_of(1), RecordState::Uncommitted, b"row one").unwrap();
        records.write_state(0, RecordState::CommittedAdded).unwrap();
        records.sync().unwrap();
        drop(records);

        let (records, schema) = RecordFile::open(&path).unwrap();
        assert_eq!(schema, b"schema-bytes");
        assert_eq!(records.table_id(), 7);
        assert_eq!(records.row_capacity(), 2);
        assert_eq!(records.read_row(1).unwrap(), b"row one");
        assert_eq!(records.state(0), Some(RecordState::CommittedAdded));
        assert_eq!(records.state(1), Some(RecordState::Uncommitted));
        assert_eq!(records.state(2), None);
    }

    #[test]
    fn test_later_frame_supersedes() {
        let dir = TempDir::new().unwrap();
        let (records, path) = new_file(&dir);
        records.append(slot_of(0), RecordState::Reclaimed, b"old").unwrap();
        records.append(slot_of(0), RecordState::Uncommitted, b"new").unwrap();
        drop(records);

        let (records, _) = RecordFile::open(&path).unwrap();
        assert_eq!(records.read_row(0).unwrap(), b"new");
        assert_eq!(records.rows(), vec![(0, RecordState::Uncommitted)]);
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = TempDir::new().unwrap();
        let (records, path) = new_file(&dir);
        records.append(slot_of(0), RecordState::Uncommitted, b"kept").unwrap();
        let good_len = records.len_bytes();
        records.append(slot_of(1), RecordState::Uncommitted, b"torn away").unwrap();
        drop(records);

        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(good_len + 9).unwrap();
        drop(file);

        let (records, _) = RecordFile::open(&path).unwrap();
        assert_eq!(records.len_bytes(), good_len);
        assert_eq!(records.row_capacity(), 1);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), good_len);
    }

    #[test]
    fn test_unique_id_persists() {
        let dir = TempDir::new().unwrap();
        let (records, path) = new_file(&dir);
        assert_eq!(records.next_unique_id(true).unwrap(), 1);
        assert_eq!(records.next_unique_id(true).unwrap(), 2);
        drop(records);

        let (records, _) = RecordFile::open(&path).unwrap();
        assert_eq!(records.next_unique_id(false).unwrap(), 3);
    }

    #[test]
    fn test_missing_row_is_assertion() {
        let dir = TempDir::new().unwrap();
        let (records, _) = new_file(&dir);
        assert!(matches!(
            records.read_row(4),
            Err(Error::ConsistencyAssertion { .. })
        ));
        assert!(records.write_state(4, RecordState::CommittedAdded).is_err());
    }

    #[test]
    fn test_bad_magic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("junk.kdt");
        std::fs::write(&path, vec![0u8; 128]).unwrap();
        assert!(matches!(RecordFile::open(&path), Err(Error::Format { .. })));
    }
}
