//! Chunk-part record: `[namespace push][chunk bytes push]`

use crate::protocol::push::{decode_push, encoded_push_len, write_push};
use crate::protocol::BCAT_PART_NAMESPACE;

/// Build the record payload carrying one chunk
pub fn build_chunk_part(chunk: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(chunk_part_len(chunk.len()));
    write_push(&mut payload, BCAT_PART_NAMESPACE);
    write_push(&mut payload, chunk);
    payload
}

/// Encoded size of a chunk-part payload for a chunk of `chunk_len` bytes
pub fn chunk_part_len(chunk_len: usize) -> usize {
    encoded_push_len(BCAT_PART_NAMESPACE.len()) + encoded_push_len(chunk_len)
}

/// Extract the chunk bytes from a chunk-part payload.
///
/// Returns `None` when the payload is not a chunk-part record.
pub fn parse_chunk_part(payload: &[u8]) -> Option<&[u8]> {
    let (namespace, next) = decode_push(payload, 0).ok()?;
    if namespace != BCAT_PART_NAMESPACE {
        return None;
    }

    match decode_push(payload, next) {
        Ok((chunk, _)) => Some(chunk),
        Err(e) => {
            tracing::debug!("Chunk-part body did not decode: {}", e);
            None
        }
    }
}
