//! Versioned index file for one table (`t<id>.kix`).
//!
//! ```text
//! [u32 magic][u64 version][u32 count][len-prefixed SortedIndex]*[u32 crc32]
//! ```
//!
//! The first index is the master index; one index per column follows. A new
//! version is written to `t<id>.kix.tmp`, synced, and renamed into place after
//! the current file is moved to `t<id>.kix.prev`. The version is the commit id
//! that produced the state, so after a crash between a table write and the
//! conglomerate commit point the newer file is ignored.

use crate::index_set::IndexSet;
use keel_core::codec::{ByteReader, ByteWriter};
use keel_core::{CommitId, Error, Result, TableId};
use keel_index::SortedIndex;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Magic number for index files.
const INDEX_MAGIC: u32 = 0x4B49_5831; // "KIX1"

/// Returns the path of a table's index file.
pub fn index_path(dir: &Path, table_id: TableId) -> PathBuf {
    dir.join(format!("t{}.kix", table_id))
}

fn tmp_path(dir: &Path, table_id: TableId) -> PathBuf {
    dir.join(format!("t{}.kix.tmp", table_id))
}

fn prev_path(dir: &Path, table_id: TableId) -> PathBuf {
    dir.join(format!("t{}.kix.prev", table_id))
}

/// Writes and loads the index versions of one table.
#[derive(Debug)]
pub struct IndexFile {
    dir: PathBuf,
    table_id: TableId,
    sync_writes: bool,
}

impl IndexFile {
    pub fn new(dir: impl AsRef<Path>, table_id: TableId, sync_writes: bool) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            table_id,
            sync_writes,
        }
    }

    fn encode(version: CommitId, set: &IndexSet) -> Vec<u8> {
        let mut out = ByteWriter::new();
        out.put_u32(INDEX_MAGIC);
        out.put_u64(version);
        out.put_u32(set.column_count() as u32 + 1);
        let mut part = ByteWriter::new();
        set.master().write_to(&mut part);
        out.put_bytes(part.as_slice());
        for column in set.columns() {
            let mut part = ByteWriter::new();
            column.write_to(&mut part);
            out.put_bytes(part.as_slice());
        }
        let checksum = crc32fast::hash(out.as_slice());
        out.put_u32(checksum);
        out.into_inner()
    }

    fn decode(&self, data: &[u8], column_count: usize) -> Result<(CommitId, IndexSet)> {
        if data.len() < 4 {
            return Err(Error::format("index file too short"));
        }
        let (body, tail) = data.split_at(data.len() - 4);
        let stored = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
        let computed = crc32fast::hash(body);
        if stored != computed {
            return Err(Error::format(format!(
                "index file checksum mismatch: expected {:08x}, got {:08x}",
                stored, computed
            )));
        }

        let mut reader = ByteReader::new(body);
        let magic = reader.get_u32()?;
        if magic != INDEX_MAGIC {
            return Err(Error::format(format!(
                "invalid index file magic: expected {:08x}, got {:08x}",
                INDEX_MAGIC, magic
            )));
        }
        let version = reader.get_u64()?;
        let count = reader.get_u32()? as usize;
        if count != column_count + 1 {
            return Err(Error::format(format!(
                "index file of table {} holds {} indices, expected {}",
                self.table_id,
                count,
                column_count + 1
            )));
        }

        let mut part = ByteReader::new(reader.get_bytes()?);
        let master = SortedIndex::read_from(&mut part, None)?;
        let rows = master.len();
        let mut columns = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            let mut part = ByteReader::new(reader.get_bytes()?);
            columns.push(SortedIndex::read_from(&mut part, Some(rows))?);
        }
        if reader.remaining() != 0 {
            return Err(Error::format("trailing bytes in index file"));
        }
        Ok((version, IndexSet::new(self.table_id, master, columns)))
    }

    fn write_file(&self, path: &Path, data: &[u8]) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all(data)?;
        if self.sync_writes {
            file.sync_all()?;
        }
        Ok(())
    }

    fn sync_dir(&self) -> Result<()> {
        if self.sync_writes {
            File::open(&self.dir)?.sync_all()?;
        }
        Ok(())
    }

    /// Durably writes `set` as version `version`, keeping the current file as
    /// the previous version.
    pub fn write(&self, version: CommitId, set: &IndexSet) -> Result<()> {
        let data = Self::encode(version, set);
        let current = index_path(&self.dir, self.table_id);
        let tmp = tmp_path(&self.dir, self.table_id);

        self.write_file(&tmp, &data)?;
        if current.exists() {
            fs::rename(&current, prev_path(&self.dir, self.table_id))?;
        }
        fs::rename(&tmp, &current)?;
        self.sync_dir()?;
        debug!(table_id = self.table_id, version, rows = set.row_count(), "wrote index file");
        Ok(())
    }

    /// Loads the newest index version not beyond `durable`.
    ///
    /// The chosen version becomes the only file on disk. Fails with `Format` if
    /// no candidate is usable.
    pub fn load(&self, durable: CommitId, column_count: usize) -> Result<(CommitId, IndexSet)> {
        let current = index_path(&self.dir, self.table_id);
        let candidates = [
            current.clone(),
            tmp_path(&self.dir, self.table_id),
            prev_path(&self.dir, self.table_id),
        ];

        let mut best: Option<(usize, CommitId, IndexSet)> = None;
        for (i, path) in candidates.iter().enumerate() {
            let data = match fs::read(path) {
                Ok(data) => data,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            match self.decode(&data, column_count) {
                Ok((version, _)) if version > durable => {
                    warn!(
                        path = %path.display(),
                        version,
                        durable,
                        "discarding index version beyond the durable commit"
                    );
                }
                Ok((version, set)) => {
                    if best.as_ref().map_or(true, |(_, v, _)| version > *v) {
                        best = Some((i, version, set));
                    }
                }
                Err(e) => warn!(path = %path.display(), error = %e, "unreadable index file"),
            }
        }

        let Some((chosen, version, set)) = best else {
            return Err(Error::format(format!(
                "no usable index file for table {}",
                self.table_id
            )));
        };

        if chosen != 0 {
            warn!(table_id = self.table_id, version, "restoring earlier index version");
            let tmp = tmp_path(&self.dir, self.table_id);
            self.write_file(&tmp, &Self::encode(version, &set))?;
            fs::rename(&tmp, &current)?;
        }
        for path in &candidates[1..] {
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        self.sync_dir()?;
        Ok((version, set))
    }

    /// Removes every index file of the table.
    pub fn delete(&self) -> Result<()> {
        for path in [
            index_path(&self.dir, self.table_id),
            tmp_path(&self.dir, self.table_id),
            prev_path(&self.dir, self.table_id),
        ] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_index::RowOrder;
    use tempfile::TempDir;

    fn set_with_rows(rows: &[u64]) -> IndexSet {
        let mut set = IndexSet::empty(5, 1);
        for row in rows {
            set.master_mut().insert(*row, &RowOrder).unwrap();
            set.column_mut(0).unwrap().insert(*row, &RowOrder).unwrap();
        }
        set
    }

    #[test]
    fn test_write_and_load() {
        let dir = TempDir::new().unwrap();
        let file = IndexFile::new(dir.path(), 5, true);
        file.write(0, &IndexSet::empty(5, 1)).unwrap();
        file.write(3, &set_with_rows(&[1, 2, 7])).unwrap();

        let (version, set) = file.load(3, 1).unwrap();
        assert_eq!(version, 3);
        assert_eq!(set.rows(), vec![1, 2, 7]);
        assert_eq!(set.column(0).unwrap().to_vec(), vec![1, 2, 7]);
        assert!(!prev_path(dir.path(), 5).exists());
    }

    #[test]
    fn test_version_beyond_durable_falls_back() {
        let dir = TempDir::new().unwrap();
        let file = IndexFile::new(dir.path(), 5, true);
        file.write(2, &set_with_rows(&[1])).unwrap();
        file.write(3, &set_with_rows(&[1, 4])).unwrap();

        let (version, set) = file.load(2, 1).unwrap();
        assert_eq!(version, 2);
        assert_eq!(set.rows(), vec![1]);

        // The restored version is now the current file.
        let (version, _) = file.load(10, 1).unwrap();
        assert_eq!(version, 2);
    }

    #[test]
    fn test_corrupt_current_uses_prev() {
        let dir = TempDir::new().unwrap();
        let file = IndexFile::new(dir.path(), 5, false);
        file.write(1, &set_with_rows(&[3])).unwrap();
        file.write(2, &set_with_rows(&[3, 8])).unwrap();
        let path = index_path(dir.path(), 5);
        let mut data = fs::read(&path).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xff;
        fs::write(&path, data).unwrap();

        let (version, set) = file.load(2, 1).unwrap();
        assert_eq!(version, 1);
        assert_eq!(set.rows(), vec![3]);
    }

    #[test]
    fn test_column_count_mismatch() {
        let dir = TempDir::new().unwrap();
        let file = IndexFile::new(dir.path(), 5, false);
        file.write(1, &set_with_rows(&[3])).unwrap();
        assert!(matches!(file.load(1, 2), Err(Error::Format { .. })));
    }

    #[test]
    fn test_delete() {
        let dir = TempDir::new().unwrap();
        let file = IndexFile::new(dir.path(), 5, false);
        file.write(1, &set_with_rows(&[3])).unwrap();
        file.write(2, &set_with_rows(&[3])).unwrap();
        file.delete().unwrap();
        assert!(!index_path(dir.path(), 5).exists());
        assert!(!prev_path(dir.path(), 5).exists());
    }
}
