use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of live datasets kept per owner
pub const HISTORY_LIMIT: usize = 5;

/// Number of cleaned rows kept in a summary preview
pub const PREVIEW_ROWS: usize = 5;

/// Identifier of a dataset record, assigned monotonically by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetId(pub u64);

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identity of the user owning a dataset
///
/// Supplied by the authentication layer and trusted as-is.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Owner(String);

impl Owner {
    pub fn new(name: impl Into<String>) -> Self {
        Owner(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle to raw uploaded bytes held by a [`crate::storage::BlobStorage`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobRef(String);

impl BlobRef {
    pub fn new(reference: impl Into<String>) -> Self {
        BlobRef(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Mean of each numeric parameter over the cleaned rows
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Averages {
    pub flowrate: f64,
    pub pressure: f64,
    pub temperature: f64,
}

impl Averages {
    /// Parameter name and value pairs, in display order.
    pub fn entries(&self) -> [(&'static str, f64); 3] {
        [
            ("Flowrate", self.flowrate),
            ("Pressure", self.pressure),
            ("Temperature", self.temperature),
        ]
    }
}

/// One preview row: column name to cell value, in original column order
pub type PreviewRow = serde_json::Map<String, serde_json::Value>;

/// Aggregate statistics computed once per upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total_records: u64,
    pub averages: Averages,
    pub type_distribution: IndexMap<String, u64>,
    pub data_preview: Vec<PreviewRow>,
}

/// Metadata of one successfully processed upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub id: DatasetId,
    pub owner: Owner,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub summary: Summary,
    pub storage_reference: BlobRef,
}

impl DatasetRecord {
    /// Key used to order records newest first.
    pub(crate) fn recency(&self) -> (DateTime<Utc>, DatasetId) {
        (self.created_at, self.id)
    }
}
