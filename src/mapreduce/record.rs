//! Rows, group keys and hash surrogates
//!
//! The first [`KEY_COLUMNS`] fields of a row are its grouping dimension; the
//! rest are integer metrics. A [`HashSurrogate`] orders rows cheaply through
//! sort and merge, but grouping always compares the literal [`GroupKey`].

use crate::error::{PipelineError, Result};
use csv::StringRecord;
use std::fmt;
use std::path::Path;

/// Number of leading columns that form the grouping dimension
pub const KEY_COLUMNS: usize = 3;

const FNV1A64_OFFSET: u64 = 0xcbf29ce484222325;
const FNV1A64_PRIME: u64 = 0x100000001b3;
const KEY_SEPARATOR: u8 = b':';

/// 64-bit FNV-1a over a byte slice, continuing from `hash`
fn fnv1a_64_extend(mut hash: u64, bytes: &[u8]) -> u64 {
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV1A64_PRIME);
    }
    hash
}

/// 64-bit FNV-1a of a byte slice
pub fn fnv1a_64(bytes: &[u8]) -> u64 {
    fnv1a_64_extend(FNV1A64_OFFSET, bytes)
}

/// Ordering key derived from a [`GroupKey`]; distinct keys may collide
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HashSurrogate(pub u64);

impl HashSurrogate {
    /// Hash the canonical `dim0:dim1:dim2` form of the leading fields without allocating
    pub fn of_fields<'a>(fields: impl IntoIterator<Item = &'a str>) -> Self {
        let mut hash = FNV1A64_OFFSET;
        for (i, field) in fields.into_iter().enumerate() {
            if i > 0 {
                hash = fnv1a_64_extend(hash, &[KEY_SEPARATOR]);
            }
            hash = fnv1a_64_extend(hash, field.as_bytes());
        }
        Self(hash)
    }

    /// Surrogate of a row's grouping fields
    pub fn of_record(record: &StringRecord) -> Self {
        Self::of_fields(record.iter().take(KEY_COLUMNS))
    }
}

impl fmt::Display for HashSurrogate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// The literal grouping dimension of a row
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey([String; KEY_COLUMNS]);

impl GroupKey {
    pub fn new(a: impl Into<String>, b: impl Into<String>, c: impl Into<String>) -> Self {
        Self([a.into(), b.into(), c.into()])
    }

    /// Key of a row; `None` if the row is shorter than the key
    pub fn from_record(record: &StringRecord) -> Option<Self> {
        if record.len() < KEY_COLUMNS {
            return None;
        }
        Some(Self::new(&record[0], &record[1], &record[2]))
    }

    pub fn fields(&self) -> &[String; KEY_COLUMNS] {
        &self.0
    }

    /// Canonical joined form fed to the hash
    pub fn canonical(&self) -> String {
        self.0.join(":")
    }

    pub fn surrogate(&self) -> HashSurrogate {
        HashSurrogate::of_fields(self.0.iter().map(String::as_str))
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// Column layout of a dataset, taken from its header row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    columns: Vec<String>,
}

impl Header {
    /// Build a header, requiring at least the grouping columns
    pub fn new(columns: Vec<String>, path: &Path) -> Result<Self> {
        if columns.len() < KEY_COLUMNS {
            return Err(PipelineError::MalformedRow {
                path: path.to_path_buf(),
                line: 1,
                reason: format!(
                    "header has {} columns, at least {} grouping columns are required",
                    columns.len(),
                    KEY_COLUMNS
                ),
            });
        }
        Ok(Self { columns })
    }

    pub fn from_record(record: &StringRecord, path: &Path) -> Result<Self> {
        Self::new(record.iter().map(str::to_string).collect(), path)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Names of the metric columns, in order
    pub fn metric_columns(&self) -> &[String] {
        &self.columns[KEY_COLUMNS..]
    }

    pub fn metric_count(&self) -> usize {
        self.columns.len() - KEY_COLUMNS
    }

    pub fn to_record(&self) -> StringRecord {
        StringRecord::from(self.columns.clone())
    }
}

/// Line number of a record for error messages
pub(crate) fn record_line(record: &StringRecord) -> u64 {
    record.position().map(|p| p.line()).unwrap_or(0)
}
