//! Reference record:
//! `[namespace][info][mime][charset][filename][flag]([32-byte reversed txid])*`
//!
//! The five metadata fields are positional and always present; an absent
//! optional field is a zero-length push. Only pushes after the metadata are
//! considered as chunk ids.

use crate::protocol::push::{read_pushes, write_push};
use crate::protocol::types::{FileMetadata, ReferenceRecord, TxId};
use crate::protocol::BCAT_NAMESPACE;

/// Namespace plus the five metadata fields
const FIXED_PUSHES: usize = 6;

/// Build the reference record payload.
///
/// `chunk_txids` must already be in reassembly order.
pub fn build_reference_record(metadata: &FileMetadata, chunk_txids: &[TxId]) -> Vec<u8> {
    let mut payload = Vec::new();

    write_push(&mut payload, BCAT_NAMESPACE);
    write_push(&mut payload, metadata.info.as_bytes());
    write_push(&mut payload, metadata.mime_type.as_bytes());
    write_push(&mut payload, optional_bytes(&metadata.charset));
    write_push(&mut payload, optional_bytes(&metadata.filename));
    write_push(&mut payload, optional_bytes(&metadata.flag));

    for txid in chunk_txids {
        write_push(&mut payload, &txid.to_wire());
    }

    payload
}

/// Parse a reference record payload.
///
/// Returns `None` if the payload is not a BCAT reference record.
pub fn parse_reference_record(payload: &[u8]) -> Option<ReferenceRecord> {
    let pushes = read_pushes(payload);

    if pushes.len() < FIXED_PUSHES || pushes[0] != BCAT_NAMESPACE {
        return None;
    }

    let metadata = FileMetadata {
        info: text(pushes[1]),
        mime_type: text(pushes[2]),
        charset: optional_text(pushes[3]),
        filename: optional_text(pushes[4]),
        flag: optional_text(pushes[5]),
    };

    // Pushes of any other length are protocol extensions and are skipped
    let chunk_txids = pushes[FIXED_PUSHES..]
        .iter()
        .filter_map(|push| TxId::from_wire(push))
        .collect();

    Some(ReferenceRecord {
        metadata,
        chunk_txids,
    })
}

fn optional_bytes(field: &Option<String>) -> &[u8] {
    field.as_deref().map(str::as_bytes).unwrap_or_default()
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn optional_text(bytes: &[u8]) -> Option<String> {
    if bytes.is_empty() {
        None
    } else {
        Some(text(bytes))
    }
}
