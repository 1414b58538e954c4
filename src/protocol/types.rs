use crate::protocol::error::{ProtocolError, ProtocolResult};
use crate::protocol::{DEFAULT_INFO, MAX_FILENAME_LEN};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 32-byte transaction identifier in display/lookup byte order.
///
/// Reference records store ids byte-reversed; use [`TxId::to_wire`] and
/// [`TxId::from_wire`] at that boundary.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TxId([u8; 32]);

impl TxId {
    pub const LEN: usize = 32;

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(array))
    }

    pub fn from_hex(s: &str) -> ProtocolResult<Self> {
        let bytes = hex::decode(s).map_err(|e| ProtocolError::InvalidTxId(format!("{s}: {e}")))?;
        Self::from_slice(&bytes).ok_or_else(|| {
            ProtocolError::InvalidTxId(format!("expected 32 bytes, got {}", bytes.len()))
        })
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Byte-reversed form as written into a reference record
    pub fn to_wire(&self) -> [u8; 32] {
        let mut reversed = self.0;
        reversed.reverse();
        reversed
    }

    /// Recover an id from its byte-reversed record form
    pub fn from_wire(bytes: &[u8]) -> Option<Self> {
        let mut id = Self::from_slice(bytes)?;
        id.0.reverse();
        Some(id)
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({})", self.to_hex())
    }
}

impl FromStr for TxId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl TryFrom<String> for TxId {
    type Error = ProtocolError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_hex(&s)
    }
}

impl From<TxId> for String {
    fn from(id: TxId) -> Self {
        id.to_hex()
    }
}

/// File metadata carried in the fixed-position fields of a reference record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub info: String,
    pub mime_type: String,
    pub charset: Option<String>,
    pub filename: Option<String>,
    pub flag: Option<String>,
}

impl FileMetadata {
    pub fn new(mime_type: impl Into<String>) -> Self {
        Self {
            info: DEFAULT_INFO.to_string(),
            mime_type: mime_type.into(),
            charset: None,
            filename: None,
            flag: None,
        }
    }

    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = info.into();
        self
    }

    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = Some(charset.into());
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.flag = Some(flag.into());
        self
    }

    /// Check the metadata can be written into a reference record
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.mime_type.trim().is_empty() {
            return Err(ProtocolError::InvalidMetadata(
                "MIME type must not be empty".into(),
            ));
        }

        if let Some(filename) = &self.filename {
            if filename.len() > MAX_FILENAME_LEN {
                return Err(ProtocolError::InvalidMetadata(format!(
                    "filename is {} bytes, maximum is {MAX_FILENAME_LEN}",
                    filename.len()
                )));
            }
        }

        Ok(())
    }
}

/// Decoded form of a BCAT reference record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceRecord {
    pub metadata: FileMetadata,
    /// Chunk transactions in reassembly order
    pub chunk_txids: Vec<TxId>,
}

impl ReferenceRecord {
    pub fn chunk_count(&self) -> usize {
        self.chunk_txids.len()
    }
}
