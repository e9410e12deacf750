use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_to_vec};
use common::{DbError, DbResult, Lsn, PageId, TxnId};
use serde::{Deserialize, Serialize};

fn bincode_config() -> impl Config {
    config::legacy()
}

/// WAL record kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalRecordType {
    Begin = 1,
    Commit = 2,
    Abort = 3,
    Insert = 4,
    Update = 5,
    Delete = 6,
    Checkpoint = 7,
}

impl TryFrom<u8> for WalRecordType {
    type Error = DbError;

    fn try_from(tag: u8) -> DbResult<Self> {
        Ok(match tag {
            1 => WalRecordType::Begin,
            2 => WalRecordType::Commit,
            3 => WalRecordType::Abort,
            4 => WalRecordType::Insert,
            5 => WalRecordType::Update,
            6 => WalRecordType::Delete,
            7 => WalRecordType::Checkpoint,
            other => {
                return Err(DbError::Corruption(format!(
                    "unknown WAL record type {other}"
                )))
            }
        })
    }
}

impl WalRecordType {
    /// Insert/Update/Delete carry page images; the rest are control records.
    pub fn is_data(&self) -> bool {
        matches!(
            self,
            WalRecordType::Insert | WalRecordType::Update | WalRecordType::Delete
        )
    }
}

/// The opaque data carried by a record, bincode-encoded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum WalPayload {
    /// Full-page write: the page before the mutation (None when the page
    /// was freshly allocated) and after it.
    PageWrite {
        page_id: PageId,
        before: Option<Vec<u8>>,
        after: Vec<u8>,
    },
    /// Transactions still active at checkpoint time.
    Checkpoint { active: Vec<TxnId> },
}

impl WalPayload {
    pub fn encode(&self) -> DbResult<Vec<u8>> {
        encode_to_vec(self, bincode_config())
            .map_err(|e| DbError::Wal(format!("failed to encode payload: {e}")))
    }

    pub fn decode(bytes: &[u8]) -> DbResult<Self> {
        let (payload, _) = decode_from_slice(bytes, bincode_config())
            .map_err(|e| DbError::Wal(format!("failed to decode payload: {e}")))?;
        Ok(payload)
    }
}

/// One framed log record.
#[derive(Clone, Debug, PartialEq)]
pub struct WalRecord {
    pub lsn: Lsn,
    pub rtype: WalRecordType,
    pub txn_id: TxnId,
    pub data: Vec<u8>,
}

pub(crate) const WAL_HEADER_SIZE: usize = 8 + 1 + 8 + 4 + 2;

impl WalRecord {
    /// CRC32 over `{type, txn_id, data_size, data}`.
    pub fn checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&[self.rtype as u8]);
        hasher.update(&self.txn_id.0.to_le_bytes());
        hasher.update(&(self.data.len() as u16).to_le_bytes());
        hasher.update(&self.data);
        hasher.finalize()
    }

    pub fn encode(&self) -> DbResult<Vec<u8>> {
        if self.data.len() > u16::MAX as usize {
            return Err(DbError::Wal(format!(
                "record data of {} bytes exceeds frame limit",
                self.data.len()
            )));
        }
        let mut out = Vec::with_capacity(WAL_HEADER_SIZE + self.data.len());
        out.extend_from_slice(&self.lsn.0.to_le_bytes());
        out.push(self.rtype as u8);
        out.extend_from_slice(&self.txn_id.0.to_le_bytes());
        out.extend_from_slice(&self.checksum().to_le_bytes());
        out.extend_from_slice(&(self.data.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.data);
        Ok(out)
    }

    /// Decode one record from the front of `bytes`, returning it and the
    /// number of bytes consumed. Verifies the checksum.
    pub fn decode(bytes: &[u8]) -> DbResult<(Self, usize)> {
        if bytes.len() < WAL_HEADER_SIZE {
            return Err(DbError::Corruption("truncated WAL record header".into()));
        }
        let u64_at = |off: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[off..off + 8]);
            u64::from_le_bytes(buf)
        };
        let lsn = Lsn(u64_at(0));
        let rtype = WalRecordType::try_from(bytes[8])?;
        let txn_id = TxnId(u64_at(9));
        let checksum = u32::from_le_bytes([bytes[17], bytes[18], bytes[19], bytes[20]]);
        let data_size = u16::from_le_bytes([bytes[21], bytes[22]]) as usize;

        let total = WAL_HEADER_SIZE + data_size;
        if bytes.len() < total {
            return Err(DbError::Corruption("truncated WAL record data".into()));
        }
        let record = Self {
            lsn,
            rtype,
            txn_id,
            data: bytes[WAL_HEADER_SIZE..total].to_vec(),
        };
        if record.checksum() != checksum {
            return Err(DbError::Corruption(format!(
                "WAL checksum mismatch at lsn {}",
                lsn.0
            )));
        }
        Ok((record, total))
    }
}
