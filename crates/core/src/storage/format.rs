use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::CoreError;

/// Format tag identifying a PaperTrade store file.
pub const FORMAT_NAME: &str = "papertrade-store";

/// Current store format version.
pub const CURRENT_VERSION: u16 = 1;

/// On-disk document of a [`FileStore`](super::file::FileStore).
///
/// Layout:
/// ```text
/// { "format": "papertrade-store", "version": 1, "entries": { "<key>": "<value>", ... } }
/// ```
/// Values are the same strings a browser would keep in local storage
/// (mostly JSON documents themselves).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreDocument {
    pub format: String,
    pub version: u16,
    #[serde(default)]
    pub entries: BTreeMap<String, String>,
}

impl StoreDocument {
    pub fn new(entries: BTreeMap<String, String>) -> Self {
        Self {
            format: FORMAT_NAME.to_string(),
            version: CURRENT_VERSION,
            entries,
        }
    }
}

/// Serialize entries into a complete store document.
pub fn write_document(entries: &BTreeMap<String, String>) -> Result<Vec<u8>, CoreError> {
    let doc = StoreDocument::new(entries.clone());
    serde_json::to_vec_pretty(&doc)
        .map_err(|e| CoreError::Serialization(format!("Failed to serialize store: {e}")))
}

/// Parse and validate a store document, returning its entries.
pub fn read_document(data: &[u8]) -> Result<BTreeMap<String, String>, CoreError> {
    if data.iter().all(u8::is_ascii_whitespace) {
        return Err(CoreError::InvalidFileFormat("Store file is empty".into()));
    }

    let doc: StoreDocument = serde_json::from_slice(data)
        .map_err(|e| CoreError::InvalidFileFormat(format!("Not a store document: {e}")))?;

    if doc.format != FORMAT_NAME {
        return Err(CoreError::InvalidFileFormat(format!(
            "Unexpected format tag '{}' (expected '{FORMAT_NAME}')",
            doc.format
        )));
    }

    if doc.version == 0 || doc.version > CURRENT_VERSION {
        return Err(CoreError::UnsupportedVersion(doc.version));
    }

    Ok(doc.entries)
}
