//! Auxiliary data referenced by `file` directives.

use crate::source::{LoadError, Loader};

/// Combined capacity of one object's auxiliary data.
pub const DATA_LIMIT: usize = 0x20000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataEntry {
    pub filename: String,
    pub offset: usize,
    pub len: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("cannot find/open dat file: {0}")]
    Load(#[from] LoadError),

    #[error("data files exceed {limit} bytes")]
    Capacity { limit: usize },
}

/// Raw bytes of every data file of the current object, back to back.
///
/// Offsets are contiguous and strictly increasing in append order.
#[derive(Debug, Clone)]
pub struct DataSegment {
    pub bytes: Vec<u8>,
    pub entries: Vec<DataEntry>,
    limit: usize,
}

impl Default for DataSegment {
    fn default() -> Self {
        Self::new(DATA_LIMIT)
    }
}

impl DataSegment {
    pub fn new(limit: usize) -> Self {
        Self {
            bytes: vec![],
            entries: vec![],
            limit,
        }
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
        self.entries.clear();
    }

    pub fn append(&mut self, filename: &str, bytes: &[u8]) -> Result<&DataEntry, DataError> {
        let offset = self.bytes.len();
        if offset + bytes.len() > self.limit {
            return Err(DataError::Capacity { limit: self.limit });
        }
        self.bytes.extend_from_slice(bytes);
        self.entries.push(DataEntry {
            filename: filename.to_owned(),
            offset,
            len: bytes.len(),
        });
        Ok(&self.entries[self.entries.len() - 1])
    }

    pub fn load(&mut self, loader: &mut Loader, filename: &str) -> Result<&DataEntry, DataError> {
        let (bytes, _) = loader.read(filename)?;
        self.append(filename, &bytes)
    }

    pub fn slice(&self, entry: &DataEntry) -> &[u8] {
        &self.bytes[entry.offset..entry.offset + entry.len]
    }
}
