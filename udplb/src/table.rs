use std::borrow::BorrowMut;
use std::collections::BTreeMap;

use aya::maps::{HashMap as BpfHashMap, MapData};
use udplb_common::{KEY_LEN, VALUE_LEN};

use crate::error::TableError;

/// Entries of `upstreams` in the TC program.
pub const DEFAULT_CAPACITY: usize = 256;

pub type Row = (Vec<u8>, Vec<u8>);

pub trait UpstreamTable {
    /// Creates or overwrites the row stored under `key`.
    fn write(&mut self, key: &[u8; KEY_LEN], value: &[u8; VALUE_LEN]) -> Result<(), TableError>;

    /// Every row currently in the table, in no particular order.
    fn rows(&self) -> Result<Vec<Row>, TableError>;
}

impl<T> UpstreamTable for BpfHashMap<T, [u8; KEY_LEN], [u8; VALUE_LEN]>
where
    T: BorrowMut<MapData>,
{
    fn write(&mut self, key: &[u8; KEY_LEN], value: &[u8; VALUE_LEN]) -> Result<(), TableError> {
        self.insert(key, value, 0)?;
        Ok(())
    }

    fn rows(&self) -> Result<Vec<Row>, TableError> {
        self.iter()
            .map(|row| -> Result<Row, TableError> {
                let (key, value) = row?;
                Ok((key.to_vec(), value.to_vec()))
            })
            .collect()
    }
}

/// An in-process table with the same overwrite and capacity rules as a BPF
/// hash map.
#[derive(Debug, Clone)]
pub struct MemoryTable {
    rows: BTreeMap<Vec<u8>, Vec<u8>>,
    capacity: usize,
}

impl Default for MemoryTable {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl MemoryTable {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rows: BTreeMap::new(),
            capacity,
        }
    }

    /// Stores a row without any width check.
    pub fn insert_raw(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.rows.insert(key, value);
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.rows.get(key).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl UpstreamTable for MemoryTable {
    fn write(&mut self, key: &[u8; KEY_LEN], value: &[u8; VALUE_LEN]) -> Result<(), TableError> {
        if !self.rows.contains_key(key.as_slice()) && self.rows.len() >= self.capacity {
            return Err(TableError::Full {
                capacity: self.capacity,
            });
        }
        self.rows.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn rows(&self) -> Result<Vec<Row>, TableError> {
        Ok(self
            .rows
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
