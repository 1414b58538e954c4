use crate::chunk::{decompress, CompressionMode};
use crate::decode::error::{DecodeError, DecodeResult};
use crate::ledger::TransactionLookup;
use crate::metrics;
use crate::protocol::{parse_chunk_part, parse_reference_record, ReferenceRecord, TxId};
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use tracing::{debug, info};

/// A file read back from chain
#[derive(Debug, Clone)]
pub struct DecodedFile {
    pub record: ReferenceRecord,
    /// File contents, decompressed when the record's flag asks for it
    pub data: Bytes,
}

/// Reads BCAT records back through a transaction lookup
pub struct BcatDecoder {
    lookup: Arc<dyn TransactionLookup>,
}

impl BcatDecoder {
    pub fn new(lookup: Arc<dyn TransactionLookup>) -> Self {
        Self { lookup }
    }

    /// Parse the reference record carried by `txid`.
    ///
    /// The first data output that parses wins. A transaction with no parsable
    /// record is `NotBcat`, including one whose payload opens with the BCAT
    /// namespace but is cut short before the fixed metadata fields.
    pub async fn decode_reference(&self, txid: &TxId) -> DecodeResult<ReferenceRecord> {
        let tx = self.lookup.fetch_transaction(txid).await?;

        let record = tx.data_payloads().find_map(parse_reference_record);
        match record {
            Some(record) => {
                debug!(
                    "Reference {} lists {} chunks ({})",
                    txid,
                    record.chunk_count(),
                    record.metadata.mime_type
                );
                Ok(record)
            }
            None => Err(DecodeError::NotBcat(*txid)),
        }
    }

    /// Concatenate chunk payloads in record order.
    ///
    /// `on_progress(done, total)` runs after each chunk. The bytes are returned
    /// exactly as stored; no decompression happens here.
    pub async fn reassemble<F>(
        &self,
        record: &ReferenceRecord,
        mut on_progress: F,
    ) -> DecodeResult<Bytes>
    where
        F: FnMut(usize, usize) + Send,
    {
        let total = record.chunk_count();
        let mut data = BytesMut::new();

        for (index, txid) in record.chunk_txids.iter().enumerate() {
            let tx = self.lookup.fetch_transaction(txid).await?;
            let chunk = tx
                .data_payloads()
                .find_map(parse_chunk_part)
                .ok_or(DecodeError::CorruptChunk { index, txid: *txid })?;

            data.extend_from_slice(chunk);
            on_progress(index + 1, total);
        }

        Ok(data.freeze())
    }

    /// Decode the reference, reassemble and undo compression
    pub async fn fetch_file(&self, txid: &TxId) -> DecodeResult<DecodedFile> {
        let record = self.decode_reference(txid).await?;
        let stored = self.reassemble(&record, |_, _| {}).await?;

        let data = match CompressionMode::from_flag(record.metadata.flag.as_deref()) {
            CompressionMode::None => stored,
            mode => decompress(&stored, mode)?,
        };

        info!(
            "Decoded {} bytes from {} ({} chunks)",
            data.len(),
            txid,
            record.chunk_count()
        );
        metrics::record_file_decoded(data.len());

        Ok(DecodedFile { record, data })
    }
}
