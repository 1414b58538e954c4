//! BCAT wire format
//!
//! Byte-level codecs for the two on-chain record kinds: the chunk-part record
//! carrying one slice of a file, and the reference record listing the chunk
//! transactions in reassembly order together with file metadata.

pub mod chunk_part;
pub mod error;
pub mod push;
pub mod reference;
pub mod script;
pub mod types;

pub use chunk_part::{build_chunk_part, parse_chunk_part};
pub use error::{ProtocolError, ProtocolResult};
pub use push::{decode_push, encode_push, encoded_push_len, read_pushes};
pub use reference::{build_reference_record, parse_reference_record};
pub use script::{data_output_script, data_payload, is_data_output};
pub use types::{FileMetadata, ReferenceRecord, TxId};

/// Namespace address of the BCAT reference record.
pub const BCAT_NAMESPACE: &[u8] = b"15DHFxWZJT58f9nhyGnsRBqrgwK4W6h4Up";

/// Namespace address of a BCAT chunk-part record.
pub const BCAT_PART_NAMESPACE: &[u8] = b"1ChDHzdd1H4wSjgGMHyndZm6qxEDGjqpJL";

/// Default value written into the reference record's info field.
pub const DEFAULT_INFO: &str = "bcatstream";

/// Filenames longer than this are rejected when building a reference record.
pub const MAX_FILENAME_LEN: usize = 255;
