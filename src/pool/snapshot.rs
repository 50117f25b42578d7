//! Durable snapshot of proxy health records
//!
//! A fixed binary encoding written to one primary path, with the previous
//! file rotated to `<path>.old` immediately before each overwrite. A missing
//! file is an empty pool; a present-but-undecodable file is a startup error,
//! the process must not continue with ambiguous pool state.

use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::DateTime;
use tokio::sync::Mutex;
use tracing::debug;

use super::record::ProxyRecord;
use crate::error::{CarouselError, Result};

const MAGIC: &[u8; 4] = b"CPXS";
const VERSION: u8 = 1;

/// Encode records into the snapshot wire format
fn encode<'a>(records: impl IntoIterator<Item = &'a ProxyRecord>) -> Bytes {
    let records: Vec<&ProxyRecord> = records.into_iter().collect();

    let mut buf = BytesMut::with_capacity(16 + records.len() * 48);
    buf.put_slice(MAGIC);
    buf.put_u8(VERSION);
    buf.put_u32(records.len() as u32);
    for record in records {
        buf.put_u16(record.address.len() as u16);
        buf.put_slice(record.address.as_bytes());
        buf.put_i64(record.last_check.timestamp_millis());
        buf.put_u32(record.fail_counter);
    }
    buf.freeze()
}

/// Decode the snapshot wire format, with the failure reason on corruption
fn decode(data: &[u8]) -> std::result::Result<Vec<ProxyRecord>, String> {
    let mut buf = data;

    if buf.remaining() < MAGIC.len() + 1 + 4 {
        return Err("truncated header".into());
    }
    let mut magic = [0u8; 4];
    buf.copy_to_slice(&mut magic);
    if &magic != MAGIC {
        return Err("bad magic".into());
    }
    let version = buf.get_u8();
    if version != VERSION {
        return Err(format!("unsupported version {}", version));
    }

    let count = buf.get_u32() as usize;
    // The count is untrusted input; truncation checks below bound the loop.
    let mut records = Vec::with_capacity(count.min(1024));
    for i in 0..count {
        if buf.remaining() < 2 {
            return Err(format!("truncated record {}", i));
        }
        let addr_len = buf.get_u16() as usize;
        if buf.remaining() < addr_len + 8 + 4 {
            return Err(format!("truncated record {}", i));
        }
        let address = String::from_utf8(buf.copy_to_bytes(addr_len).to_vec())
            .map_err(|_| format!("record {} address is not UTF-8", i))?;
        let millis = buf.get_i64();
        let last_check = DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| format!("record {} timestamp out of range", i))?;
        let fail_counter = buf.get_u32();

        records.push(ProxyRecord {
            address,
            last_check,
            fail_counter,
        });
    }

    if buf.has_remaining() {
        return Err("trailing bytes after last record".into());
    }
    Ok(records)
}

/// Loads and saves the durable snapshot at a fixed path
pub struct SnapshotStore {
    path: PathBuf,
    save_lock: Mutex<()>,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            save_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".old");
        PathBuf::from(name)
    }

    /// Load the snapshot, sorted by address for binary-search merging
    ///
    /// A missing file yields an empty list; an undecodable file is fatal.
    pub async fn load(&self) -> Result<Vec<ProxyRecord>> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = decode(&data).map_err(|reason| CarouselError::SnapshotCorrupt {
            path: self.path.display().to_string(),
            reason,
        })?;
        records.sort_by(|a, b| a.address.cmp(&b.address));

        debug!("Loaded {} records from {}", records.len(), self.path.display());
        Ok(records)
    }

    /// Write all records, rotating the previous file to `<path>.old` first
    pub async fn save(&self, records: &[ProxyRecord]) -> Result<()> {
        let _guard = self.save_lock.lock().await;

        if tokio::fs::metadata(&self.path).await.is_ok() {
            tokio::fs::rename(&self.path, self.backup_path()).await?;
        }

        let data = encode(records.iter());
        tokio::fs::write(&self.path, &data).await?;

        debug!("Saved {} records to {}", records.len(), self.path.display());
        Ok(())
    }
}
