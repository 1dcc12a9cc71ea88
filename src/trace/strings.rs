use std::collections::HashMap;

use crate::{Error, Result};

/// Identifier of an interned string. Equal to the byte offset of the entry
/// in the serialized pool.
pub type StrId = u32;

const LEN_PREFIX: usize = 4;

/// Append-only string interner shared by the recorder and the replayer.
///
/// Each entry is serialized as a 4-byte little-endian length followed by the
/// UTF-8 bytes, and its id is the offset at which that entry starts, so a
/// pool can be read back without a separate index.
#[derive(Debug, Default, Clone)]
pub struct StringTable {
    ids: HashMap<String, StrId>,
    by_id: HashMap<StrId, usize>,
    strings: Vec<String>,
    pool: Vec<u8>,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id of `s`, appending it to the pool on first sight.
    pub fn intern(&mut self, s: &str) -> StrId {
        if let Some(&id) = self.ids.get(s) {
            return id;
        }
        let id = self.pool.len() as StrId;
        self.pool.extend_from_slice(&(s.len() as u32).to_le_bytes());
        self.pool.extend_from_slice(s.as_bytes());
        self.by_id.insert(id, self.strings.len());
        self.strings.push(s.to_owned());
        self.ids.insert(s.to_owned(), id);
        id
    }

    pub fn resolve(&self, id: StrId) -> Result<&str> {
        self.by_id
            .get(&id)
            .map(|&i| self.strings[i].as_str())
            .ok_or(Error::OutOfRange(id))
    }

    pub fn get(&self, s: &str) -> Option<StrId> {
        self.ids.get(s).copied()
    }

    /// Strings in id order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.strings.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Serialized pool bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.pool
    }

    pub fn serialize(&self) -> Vec<u8> {
        self.pool.clone()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let mut table = StringTable::new();
        let mut offset = 0;
        while offset < bytes.len() {
            let header = bytes
                .get(offset..offset + LEN_PREFIX)
                .ok_or(Error::CorruptStringPool { offset })?;
            let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
            let start = offset + LEN_PREFIX;
            let body = bytes
                .get(start..start + len)
                .ok_or(Error::CorruptStringPool { offset })?;
            let s = std::str::from_utf8(body).map_err(|_| Error::CorruptStringPool { offset })?;
            // A pool written by the recorder never repeats a string, so a
            // duplicate would shift every later id.
            if table.get(s).is_some() {
                return Err(Error::CorruptStringPool { offset });
            }
            table.intern(s);
            offset = start + len;
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn ids_are_byte_offsets() {
        let mut table = StringTable::new();
        assert_eq!(table.intern("a"), 0);
        assert_eq!(table.intern("bcd"), 5);
        assert_eq!(table.intern("a"), 0);
        assert_eq!(table.intern(""), 12);
        assert_eq!(table.as_bytes().len(), 16);
    }

    #[test]
    fn unknown_id_is_out_of_range() {
        let mut table = StringTable::new();
        table.intern("hello");
        assert!(matches!(table.resolve(1), Err(Error::OutOfRange(1))));
        assert!(matches!(table.resolve(9), Err(Error::OutOfRange(9))));
    }

    #[test]
    fn pool_survives_serialization() {
        let mut table = StringTable::new();
        let a = table.intern("dir/file.txt");
        let b = table.intern("ünïcödé");
        let restored = StringTable::deserialize(&table.serialize()).unwrap();
        assert_eq!(restored.resolve(a).unwrap(), "dir/file.txt");
        assert_eq!(restored.resolve(b).unwrap(), "ünïcödé");
        assert_eq!(restored.len(), 2);
    }

    #[test]
    fn truncated_pool_is_rejected() {
        let mut table = StringTable::new();
        table.intern("abcdef");
        let bytes = table.serialize();
        let err = StringTable::deserialize(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, Error::CorruptStringPool { offset: 0 }));
        let err = StringTable::deserialize(&bytes[..2]).unwrap_err();
        assert!(matches!(err, Error::CorruptStringPool { offset: 0 }));
    }

    #[quickcheck]
    fn intern_is_idempotent(s: String, others: Vec<String>) -> bool {
        let mut table = StringTable::new();
        for other in &others {
            table.intern(other);
        }
        let first = table.intern(&s);
        let size = table.as_bytes().len();
        let second = table.intern(&s);
        first == second && size == table.as_bytes().len() && table.resolve(first).unwrap() == s
    }
}
