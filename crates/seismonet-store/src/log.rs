//! Log file format: header record + length-prefixed JSON records.

use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use seismonet_models::{ClassifiedEvent, SeismoError, SeismoResult};

pub const MAGIC: &str = "SNETEVT1";
pub const FORMAT_VERSION: u32 = 1;

/// First record of every log file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogHeader {
    pub magic: String,
    pub version: u32,
    pub schema_id: String,
    /// High-water mark for storage-id assignment. Rewritten by compaction
    /// so ids of swept records are never reissued, which would alias
    /// subscriber cursors.
    #[serde(default)]
    pub next_storage_id: u64,
}

/// One stored record: the event, its stable storage id, and its content
/// digest. The digest lets open() distinguish a torn tail from silent
/// payload damage. The storage id is the public cursor: it is assigned
/// once at append and survives compaction, unlike the record's byte
/// offset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub storage_id: u64,
    pub event: ClassifiedEvent,
    pub digest: String,
}

impl LogRecord {
    pub fn new(storage_id: u64, event: ClassifiedEvent) -> SeismoResult<Self> {
        let payload = serde_json::to_vec(&event)
            .map_err(|e| SeismoError::Internal(format!("event serialize: {}", e)))?;
        Ok(Self {
            storage_id,
            event,
            digest: hex::encode(Sha256::digest(&payload)),
        })
    }

    pub fn verify(&self) -> bool {
        serde_json::to_vec(&self.event)
            .map(|payload| hex::encode(Sha256::digest(&payload)) == self.digest)
            .unwrap_or(false)
    }
}

/// Frame a record (or the header) for appending.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 4);
    let mut len = [0u8; 4];
    BigEndian::write_u32(&mut len, payload.len() as u32);
    out.extend_from_slice(&len);
    out.extend_from_slice(payload);
    out
}

/// Outcome of scanning an existing log.
pub struct ScanResult {
    pub header: LogHeader,
    /// (byte offset of the length prefix, record)
    pub records: Vec<(u64, LogRecord)>,
    /// Offset to truncate to when the tail was torn
    pub valid_len: u64,
}

/// Read and verify the whole log. A clean EOF or a torn trailing record
/// ends the scan; damage before the tail is `Corruption`.
pub fn scan(path: &Path) -> SeismoResult<ScanResult> {
    let mut file = std::fs::File::open(path)
        .map_err(|e| SeismoError::Corruption(format!("open log {:?}: {}", path, e)))?;
    let file_len = file
        .metadata()
        .map_err(|e| SeismoError::Corruption(format!("stat log: {}", e)))?
        .len();

    // Header record.
    let (header_bytes, mut offset) = match read_frame(&mut file, 0, file_len) {
        FrameRead::Ok(bytes, next) => (bytes, next),
        _ => {
            return Err(SeismoError::Corruption(
                "log header missing or torn".to_string(),
            ))
        }
    };
    let header: LogHeader = serde_json::from_slice(&header_bytes)
        .map_err(|e| SeismoError::Corruption(format!("log header parse: {}", e)))?;
    if header.magic != MAGIC {
        return Err(SeismoError::Corruption(format!(
            "bad log magic {:?}",
            header.magic
        )));
    }
    if header.version != FORMAT_VERSION {
        return Err(SeismoError::Corruption(format!(
            "unsupported log version {}",
            header.version
        )));
    }

    let mut records = Vec::new();
    loop {
        match read_frame(&mut file, offset, file_len) {
            FrameRead::Eof => break,
            FrameRead::Torn => {
                // A torn tail is the expected crash signature; anything
                // before it committed and stays.
                warn!(offset, "torn trailing record, truncating");
                break;
            }
            FrameRead::Ok(bytes, next) => {
                let record: LogRecord = match serde_json::from_slice(&bytes) {
                    Ok(r) => r,
                    Err(e) => {
                        if next >= file_len {
                            warn!(offset, "unparseable trailing record, truncating: {}", e);
                            break;
                        }
                        return Err(SeismoError::Corruption(format!(
                            "unparseable record at offset {}: {}",
                            offset, e
                        )));
                    }
                };
                if !record.verify() {
                    if next >= file_len {
                        warn!(offset, "trailing record digest mismatch, truncating");
                        break;
                    }
                    return Err(SeismoError::Corruption(format!(
                        "digest mismatch at offset {}",
                        offset
                    )));
                }
                records.push((offset, record));
                offset = next;
            }
        }
    }

    Ok(ScanResult {
        header,
        records,
        valid_len: offset,
    })
}

enum FrameRead {
    Ok(Vec<u8>, u64),
    Torn,
    Eof,
}

fn read_frame(file: &mut std::fs::File, offset: u64, file_len: u64) -> FrameRead {
    if offset >= file_len {
        return FrameRead::Eof;
    }
    if file_len - offset < 4 {
        return FrameRead::Torn;
    }
    let mut len_buf = [0u8; 4];
    if file.seek(SeekFrom::Start(offset)).is_err() || file.read_exact(&mut len_buf).is_err() {
        return FrameRead::Torn;
    }
    let len = BigEndian::read_u32(&len_buf) as u64;
    if file_len - offset - 4 < len {
        return FrameRead::Torn;
    }
    let mut payload = vec![0u8; len as usize];
    if file.read_exact(&mut payload).is_err() {
        return FrameRead::Torn;
    }
    FrameRead::Ok(payload, offset + 4 + len)
}

/// Read one record at a known offset.
pub fn read_record_at(path: &Path, offset: u64) -> SeismoResult<LogRecord> {
    let mut file = std::fs::File::open(path)
        .map_err(|e| SeismoError::Internal(format!("open log: {}", e)))?;
    let file_len = file
        .metadata()
        .map_err(|e| SeismoError::Internal(format!("stat log: {}", e)))?
        .len();
    match read_frame(&mut file, offset, file_len) {
        FrameRead::Ok(bytes, _) => serde_json::from_slice(&bytes)
            .map_err(|e| SeismoError::Corruption(format!("record parse at {}: {}", offset, e))),
        _ => Err(SeismoError::Corruption(format!(
            "no record at offset {}",
            offset
        ))),
    }
}
