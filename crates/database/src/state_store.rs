//! Sector-based state file holding the conglomerate catalog.
//!
//! The file is a sequence of 128-byte sectors. Sector 0 carries two 64-byte
//! header slots used in ping-pong fashion:
//!
//! ```text
//! [u32 magic][u32 version][u64 seq][u64 visible][u64 dropped][u64 scalar][u32 crc32]
//! ```
//!
//! Every other sector is `[u64 next][120 bytes payload]`, and a chain of them
//! carries one stream `[u32 version][u32 len][data]`. A head of 0 is an empty
//! chain. An update writes fresh chains into free sectors, syncs, then writes
//! the inactive header slot with `seq + 1`. Until that header lands the old
//! chains stay reachable, so a crash leaves either catalog intact.

use keel_core::codec::{ByteReader, ByteWriter};
use keel_core::{Error, Result};
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the state file inside the database directory.
pub const STATE_FILE: &str = "keel.state";

const STATE_MAGIC: u32 = 0x4B53_5431;
const STATE_VERSION: u32 = 1;
const CHAIN_VERSION: u32 = 1;
const SECTOR_SIZE: u64 = 128;
const HEADER_SLOT: usize = 64;
const HEADER_CRC_OFFSET: usize = 40;
const SECTOR_PAYLOAD: usize = SECTOR_SIZE as usize - 8;

/// The three chains referenced from a state header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateChain {
    Visible = 0,
    Dropped = 1,
    Scalar = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct StateHeader {
    seq: u64,
    heads: [u64; 3],
}

impl StateHeader {
    fn encode(&self) -> [u8; HEADER_SLOT] {
        let mut buf = [0u8; HEADER_SLOT];
        buf[0..4].copy_from_slice(&STATE_MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&STATE_VERSION.to_le_bytes());
        buf[8..16].copy_from_slice(&self.seq.to_le_bytes());
        for (i, head) in self.heads.iter().enumerate() {
            let at = 16 + i * 8;
            buf[at..at + 8].copy_from_slice(&head.to_le_bytes());
        }
        let crc = crc32fast::hash(&buf[..HEADER_CRC_OFFSET]);
        buf[HEADER_CRC_OFFSET..HEADER_CRC_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Returns `None` for a slot that is blank, torn or from another format.
    fn decode(buf: &[u8]) -> Option<Self> {
        let word = |at: usize| u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
        let long = |at: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&buf[at..at + 8]);
            u64::from_le_bytes(b)
        };
        if word(0) != STATE_MAGIC || word(4) != STATE_VERSION {
            return None;
        }
        if word(HEADER_CRC_OFFSET) != crc32fast::hash(&buf[..HEADER_CRC_OFFSET]) {
            return None;
        }
        Some(Self {
            seq: long(8),
            heads: [long(16), long(24), long(32)],
        })
    }
}

/// Crash-safe store for three small blobs.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    file: File,
    sync_writes: bool,
    header: StateHeader,
    active_slot: usize,
    sector_count: u64,
    used: [Vec<u64>; 3],
    free: BTreeSet<u64>,
}

impl StateStore {
    /// Creates a new state file with three empty chains.
    pub fn create(path: &Path, sync_writes: bool) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        let header = StateHeader {
            seq: 1,
            heads: [0; 3],
        };
        let mut sector = [0u8; SECTOR_SIZE as usize];
        sector[..HEADER_SLOT].copy_from_slice(&header.encode());
        file.write_all(&sector)?;
        if sync_writes {
            file.sync_all()?;
            sync_parent(path)?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            file,
            sync_writes,
            header,
            active_slot: 0,
            sector_count: 1,
            used: Default::default(),
            free: BTreeSet::new(),
        })
    }

    /// Opens an existing state file, selecting the newest valid header.
    pub fn open(path: &Path, sync_writes: bool) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        if len < SECTOR_SIZE {
            return Err(Error::format(format!(
                "state file {} is {} bytes, shorter than one sector",
                path.display(),
                len
            )));
        }
        let sector_count = len / SECTOR_SIZE;
        let mut sector = [0u8; SECTOR_SIZE as usize];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut sector)?;

        let slots = [
            StateHeader::decode(&sector[..HEADER_SLOT]),
            StateHeader::decode(&sector[HEADER_SLOT..]),
        ];
        let (active_slot, header) = match slots {
            [Some(a), Some(b)] if b.seq > a.seq => (1, b),
            [Some(a), _] => (0, a),
            [None, Some(b)] => (1, b),
            [None, None] => {
                return Err(Error::format(format!(
                    "state file {} has no valid header",
                    path.display()
                )))
            }
        };

        let mut store = Self {
            path: path.to_path_buf(),
            file,
            sync_writes,
            header,
            active_slot,
            sector_count,
            used: Default::default(),
            free: BTreeSet::new(),
        };
        let mut reachable = BTreeSet::new();
        for chain in [StateChain::Visible, StateChain::Dropped, StateChain::Scalar] {
            let sectors = store.walk(header.heads[chain as usize], &mut reachable)?;
            store.used[chain as usize] = sectors;
        }
        store.free = (1..sector_count).filter(|s| !reachable.contains(s)).collect();
        debug!(
            path = %path.display(),
            seq = header.seq,
            free = store.free.len(),
            "opened state file"
        );
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sequence number of the active header.
    pub fn sequence(&self) -> u64 {
        self.header.seq
    }

    /// Number of sectors not referenced by the active header.
    pub fn free_sectors(&self) -> usize {
        self.free.len()
    }

    /// Reads the data stored in one chain. An empty chain reads as empty.
    pub fn read(&mut self, chain: StateChain) -> Result<Vec<u8>> {
        let sectors = self.used[chain as usize].clone();
        if sectors.is_empty() {
            return Ok(Vec::new());
        }
        let mut stream = Vec::with_capacity(sectors.len() * SECTOR_PAYLOAD);
        for sector in sectors {
            let buf = self.read_sector(sector)?;
            stream.extend_from_slice(&buf[8..]);
        }
        let mut reader = ByteReader::new(&stream);
        let version = reader.get_u32()?;
        if version != CHAIN_VERSION {
            return Err(Error::format(format!(
                "unsupported state chain version {}",
                version
            )));
        }
        let len = reader.get_u32()? as usize;
        Ok(reader.get_raw(len)?.to_vec())
    }

    /// Atomically replaces all three chains.
    pub fn write(&mut self, visible: &[u8], dropped: &[u8], scalar: &[u8]) -> Result<()> {
        let mut heads = [0u64; 3];
        let mut written: [Vec<u64>; 3] = Default::default();
        for (i, data) in [visible, dropped, scalar].into_iter().enumerate() {
            let sectors = self.write_chain(data)?;
            heads[i] = sectors.first().copied().unwrap_or(0);
            written[i] = sectors;
        }
        if self.sync_writes {
            self.file.sync_data()?;
        }

        let header = StateHeader {
            seq: self.header.seq + 1,
            heads,
        };
        let slot = 1 - self.active_slot;
        self.file
            .seek(SeekFrom::Start((slot * HEADER_SLOT) as u64))?;
        self.file.write_all(&header.encode())?;
        if self.sync_writes {
            self.file.sync_data()?;
        }

        let superseded = std::mem::replace(&mut self.used, written);
        for sectors in superseded {
            self.free.extend(sectors);
        }
        self.header = header;
        self.active_slot = slot;
        Ok(())
    }

    fn write_chain(&mut self, data: &[u8]) -> Result<Vec<u64>> {
        let mut stream = ByteWriter::with_capacity(data.len() + 8);
        stream.put_u32(CHAIN_VERSION);
        stream.put_u32(data.len() as u32);
        stream.put_raw(data);
        let stream = stream.into_inner();

        let count = stream.len().div_ceil(SECTOR_PAYLOAD);
        let sectors: Vec<u64> = (0..count).map(|_| self.allocate()).collect();
        for (i, chunk) in stream.chunks(SECTOR_PAYLOAD).enumerate() {
            let next = sectors.get(i + 1).copied().unwrap_or(0);
            let mut buf = [0u8; SECTOR_SIZE as usize];
            buf[..8].copy_from_slice(&next.to_le_bytes());
            buf[8..8 + chunk.len()].copy_from_slice(chunk);
            self.file
                .seek(SeekFrom::Start(sectors[i] * SECTOR_SIZE))?;
            self.file.write_all(&buf)?;
        }
        Ok(sectors)
    }

    fn allocate(&mut self) -> u64 {
        match self.free.pop_first() {
            Some(sector) => sector,
            None => {
                let sector = self.sector_count;
                self.sector_count += 1;
                sector
            }
        }
    }

    fn walk(&mut self, head: u64, reachable: &mut BTreeSet<u64>) -> Result<Vec<u64>> {
        let mut sectors = Vec::new();
        let mut next = head;
        while next != 0 {
            if next >= self.sector_count || !reachable.insert(next) {
                return Err(Error::format(format!(
                    "state chain link to sector {} is out of range or shared",
                    next
                )));
            }
            sectors.push(next);
            let buf = self.read_sector(next)?;
            let mut link = [0u8; 8];
            link.copy_from_slice(&buf[..8]);
            next = u64::from_le_bytes(link);
        }
        Ok(sectors)
    }

    fn read_sector(&mut self, sector: u64) -> Result<[u8; SECTOR_SIZE as usize]> {
        let mut buf = [0u8; SECTOR_SIZE as usize];
        self.file.seek(SeekFrom::Start(sector * SECTOR_SIZE))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

fn sync_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            dir.sync_all()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_chains() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(STATE_FILE);
        drop(StateStore::create(&path, false).unwrap());
        let mut store = StateStore::open(&path, false).unwrap();
        assert!(store.read(StateChain::Visible).unwrap().is_empty());
        assert_eq!(store.sequence(), 1);
    }

    #[test]
    fn test_write_reopen_and_reuse_sectors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(STATE_FILE);
        let mut store = StateStore::create(&path, false).unwrap();
        let big = vec![7u8; 500];
        store.write(&big, b"d", b"s1").unwrap();
        store.write(b"v2", b"", b"s2").unwrap();
        assert!(store.free_sectors() >= 5);

        let mut store = StateStore::open(&path, false).unwrap();
        assert_eq!(store.sequence(), 3);
        assert_eq!(store.read(StateChain::Visible).unwrap(), b"v2");
        assert!(store.read(StateChain::Dropped).unwrap().is_empty());
        assert_eq!(store.read(StateChain::Scalar).unwrap(), b"s2");

        let len_before = std::fs::metadata(&path).unwrap().len();
        store.write(b"v3", b"", b"s3").unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), len_before);
    }

    #[test]
    fn test_torn_header_falls_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(STATE_FILE);
        let mut store = StateStore::create(&path, false).unwrap();
        store.write(b"old", b"", b"").unwrap();
        store.write(b"new", b"", b"").unwrap();
        drop(store);

        // The newest header lives in slot 0 after two writes; tear it.
        let mut file = OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(20)).unwrap();
        file.write_all(&[0xFF; 4]).unwrap();
        drop(file);

        let mut store = StateStore::open(&path, false).unwrap();
        assert_eq!(store.read(StateChain::Visible).unwrap(), b"old");
    }

    #[test]
    fn test_no_valid_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(STATE_FILE);
        std::fs::write(&path, [0u8; 128]).unwrap();
        assert!(matches!(
            StateStore::open(&path, false),
            Err(Error::Format { .. })
        ));
    }
}
