//! Persistent catalog of visible and dropped tables.

use crate::state_store::{StateChain, StateStore};
use keel_core::codec::{ByteReader, ByteWriter};
use keel_core::{CommitId, Error, Result, TableId};

/// One table as recorded in the catalog.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableEntry {
    pub table_id: TableId,
    pub name: String,
}

impl TableEntry {
    pub fn new(table_id: TableId, name: impl Into<String>) -> Self {
        Self {
            table_id,
            name: name.into(),
        }
    }
}

/// Catalog contents: visible tables, tables awaiting file cleanup, and the
/// conglomerate's scalar state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Catalog {
    pub visible: Vec<TableEntry>,
    pub dropped: Vec<TableEntry>,
    pub commit_id: CommitId,
    pub next_table_id: TableId,
}

impl Catalog {
    /// Loads the catalog from the state file.
    pub fn load(store: &mut StateStore) -> Result<Self> {
        let visible = decode_entries(&store.read(StateChain::Visible)?)?;
        let dropped = decode_entries(&store.read(StateChain::Dropped)?)?;
        let scalar = store.read(StateChain::Scalar)?;
        if scalar.is_empty() {
            return Err(Error::format("state file has no scalar state"));
        }
        let mut reader = ByteReader::new(&scalar);
        let commit_id = reader.get_u64()?;
        let next_table_id = reader.get_u32()?;
        Ok(Self {
            visible,
            dropped,
            commit_id,
            next_table_id,
        })
    }

    /// Writes the catalog. This is the commit point of a transaction.
    pub fn store(&self, store: &mut StateStore) -> Result<()> {
        let mut scalar = ByteWriter::with_capacity(12);
        scalar.put_u64(self.commit_id);
        scalar.put_u32(self.next_table_id);
        store.write(
            &encode_entries(&self.visible),
            &encode_entries(&self.dropped),
            scalar.as_slice(),
        )
    }

    pub fn find_visible(&self, name: &str) -> Option<&TableEntry> {
        self.visible.iter().find(|e| e.name == name)
    }
}

fn encode_entries(entries: &[TableEntry]) -> Vec<u8> {
    let mut out = ByteWriter::new();
    out.put_u32(entries.len() as u32);
    for entry in entries {
        out.put_u32(entry.table_id);
        out.put_str(&entry.name);
    }
    out.into_inner()
}

fn decode_entries(data: &[u8]) -> Result<Vec<TableEntry>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let mut reader = ByteReader::new(data);
    let count = reader.get_u32()? as usize;
    let mut entries = Vec::with_capacity(count.min(reader.remaining()));
    for _ in 0..count {
        let table_id = reader.get_u32()?;
        let name = reader.get_str()?;
        entries.push(TableEntry { table_id, name });
    }
    Ok(entries)
}
