use common::{DbError, DbResult, RowId, TxnId, INVALID_TXN_ID};

use crate::page::{Page, PAGE_HEADER_SIZE, PAGE_SIZE};

/// Slot directory entry. Slots grow downward from the end of the page;
/// tuple bytes grow upward from the header.
///
/// Layout (little-endian): `offset: u16 | len: u16 | flags: u16`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Slot {
    pub offset: u16,
    pub len: u16,
    pub tombstone: bool,
}

pub const SLOT_SIZE: usize = 6;

const FLAG_TOMBSTONE: u16 = 0x0001;

/// Per-record header preceding the serialized column values.
///
/// Layout (little-endian):
/// `row_id: u64 | create_txn: u64 | delete_txn: u64 | size: u32`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordHeader {
    pub row_id: RowId,
    pub create_txn: TxnId,
    pub delete_txn: TxnId,
    pub size: u32,
}

pub const RECORD_HEADER_SIZE: usize = 28;

impl RecordHeader {
    pub fn is_deleted(&self) -> bool {
        self.delete_txn.is_valid()
    }

    fn encode(&self, out: &mut [u8]) {
        out[0..8].copy_from_slice(&self.row_id.0.to_le_bytes());
        out[8..16].copy_from_slice(&self.create_txn.0.to_le_bytes());
        out[16..24].copy_from_slice(&self.delete_txn.0.to_le_bytes());
        out[24..28].copy_from_slice(&self.size.to_le_bytes());
    }

    fn decode(bytes: &[u8]) -> DbResult<Self> {
        if bytes.len() < RECORD_HEADER_SIZE {
            return Err(DbError::Corruption("truncated record header".into()));
        }
        let u64_at = |off: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[off..off + 8]);
            u64::from_le_bytes(buf)
        };
        let mut size = [0u8; 4];
        size.copy_from_slice(&bytes[24..28]);
        Ok(Self {
            row_id: RowId(u64_at(0)),
            create_txn: TxnId(u64_at(8)),
            delete_txn: TxnId(u64_at(16)),
            size: u32::from_le_bytes(size),
        })
    }
}

/// Slotted table-page operations layered over a raw [`Page`].
impl Page {
    fn slot_dir_start(&self) -> usize {
        PAGE_SIZE - self.slot_count() as usize * SLOT_SIZE
    }

    /// Bytes available for one more tuple plus its slot entry.
    pub fn free_space(&self) -> usize {
        self.slot_dir_start()
            .saturating_sub(self.free_space_ptr() as usize)
    }

    pub fn read_slot(&self, slot_idx: u16) -> DbResult<Slot> {
        if slot_idx >= self.slot_count() {
            return Err(DbError::Storage(format!(
                "slot {slot_idx} out of range (page has {})",
                self.slot_count()
            )));
        }
        let start = PAGE_SIZE - (slot_idx as usize + 1) * SLOT_SIZE;
        let u16_at = |off: usize| u16::from_le_bytes([self.data[off], self.data[off + 1]]);
        let flags = u16_at(start + 4);
        Ok(Slot {
            offset: u16_at(start),
            len: u16_at(start + 2),
            tombstone: flags & FLAG_TOMBSTONE != 0,
        })
    }

    fn write_slot(&mut self, slot_idx: u16, slot: Slot) {
        let start = PAGE_SIZE - (slot_idx as usize + 1) * SLOT_SIZE;
        self.data[start..start + 2].copy_from_slice(&slot.offset.to_le_bytes());
        self.data[start + 2..start + 4].copy_from_slice(&slot.len.to_le_bytes());
        let flags = if slot.tombstone { FLAG_TOMBSTONE } else { 0 };
        self.data[start + 4..start + 6].copy_from_slice(&flags.to_le_bytes());
    }

    /// Insert a record (header + serialized payload). Returns the slot index
    /// or `None` when the page lacks room.
    pub fn insert_record(
        &mut self,
        row_id: RowId,
        create_txn: TxnId,
        payload: &[u8],
    ) -> DbResult<Option<u16>> {
        let tuple_len = RECORD_HEADER_SIZE + payload.len();
        if tuple_len > u16::MAX as usize {
            return Err(DbError::Storage("record exceeds maximum tuple size".into()));
        }
        if self.free_space() < tuple_len + SLOT_SIZE {
            return Ok(None);
        }

        let offset = self.free_space_ptr() as usize;
        let header = RecordHeader {
            row_id,
            create_txn,
            delete_txn: INVALID_TXN_ID,
            size: payload.len() as u32,
        };
        header.encode(&mut self.data[offset..offset + RECORD_HEADER_SIZE]);
        self.data[offset + RECORD_HEADER_SIZE..offset + tuple_len].copy_from_slice(payload);

        let slot_idx = self.slot_count();
        self.set_slot_count(slot_idx + 1);
        self.write_slot(
            slot_idx,
            Slot {
                offset: offset as u16,
                len: tuple_len as u16,
                tombstone: false,
            },
        );
        self.set_free_space_ptr((offset + tuple_len) as u16);
        Ok(Some(slot_idx))
    }

    pub fn record_header(&self, slot_idx: u16) -> DbResult<RecordHeader> {
        let slot = self.read_slot(slot_idx)?;
        if slot.tombstone {
            return Err(DbError::Storage(format!("slot {slot_idx} is a tombstone")));
        }
        RecordHeader::decode(&self.data[slot.offset as usize..])
    }

    /// The serialized column values of a live record.
    pub fn record_payload(&self, slot_idx: u16) -> DbResult<&[u8]> {
        let slot = self.read_slot(slot_idx)?;
        if slot.tombstone {
            return Err(DbError::Storage(format!("slot {slot_idx} is a tombstone")));
        }
        let header = RecordHeader::decode(&self.data[slot.offset as usize..])?;
        let start = slot.offset as usize + RECORD_HEADER_SIZE;
        let end = start + header.size as usize;
        if end > PAGE_SIZE {
            return Err(DbError::Corruption("record payload overruns page".into()));
        }
        Ok(&self.data[start..end])
    }

    /// Overwrite a record's payload in place. Fails with `Ok(false)` when the
    /// new payload does not fit in the slot's existing allocation.
    pub fn update_record(
        &mut self,
        slot_idx: u16,
        payload: &[u8],
        update_txn: TxnId,
    ) -> DbResult<bool> {
        let slot = self.read_slot(slot_idx)?;
        if slot.tombstone {
            return Err(DbError::Storage(format!("slot {slot_idx} is a tombstone")));
        }
        if RECORD_HEADER_SIZE + payload.len() > slot.len as usize {
            return Ok(false);
        }
        let mut header = RecordHeader::decode(&self.data[slot.offset as usize..])?;
        header.size = payload.len() as u32;
        header.create_txn = update_txn;
        let offset = slot.offset as usize;
        header.encode(&mut self.data[offset..offset + RECORD_HEADER_SIZE]);
        self.data[offset + RECORD_HEADER_SIZE..offset + RECORD_HEADER_SIZE + payload.len()]
            .copy_from_slice(payload);
        Ok(true)
    }

    /// Logical delete: stamp the deleting transaction into the record header.
    /// Physical reclamation happens at VACUUM.
    pub fn delete_record(&mut self, slot_idx: u16, delete_txn: TxnId) -> DbResult<()> {
        let slot = self.read_slot(slot_idx)?;
        if slot.tombstone {
            return Err(DbError::Storage(format!("slot {slot_idx} is a tombstone")));
        }
        let offset = slot.offset as usize + 16;
        self.data[offset..offset + 8].copy_from_slice(&delete_txn.0.to_le_bytes());
        Ok(())
    }

    /// Undo helper: clear a logical delete.
    pub fn undelete_record(&mut self, slot_idx: u16) -> DbResult<()> {
        self.delete_record(slot_idx, INVALID_TXN_ID)
    }

    /// Undo helper for aborted inserts: turn the slot into a tombstone so the
    /// record disappears immediately.
    pub fn tombstone_record(&mut self, slot_idx: u16) -> DbResult<()> {
        let mut slot = self.read_slot(slot_idx)?;
        slot.tombstone = true;
        self.write_slot(slot_idx, slot);
        Ok(())
    }

    /// Slots holding live (non-tombstone) records, in slot order. Records
    /// logically deleted by a transaction still appear; visibility is the
    /// caller's concern.
    pub fn live_slots(&self) -> DbResult<Vec<u16>> {
        let mut slots = Vec::new();
        for idx in 0..self.slot_count() {
            if !self.read_slot(idx)?.tombstone {
                slots.push(idx);
            }
        }
        Ok(slots)
    }

    /// Physically reclaim tombstones and records deleted before the given
    /// transaction horizon, rewriting tuple storage and the slot directory.
    /// Returns the number of records removed.
    pub fn compact(&mut self, horizon: TxnId) -> DbResult<usize> {
        let mut kept: Vec<(RecordHeader, Vec<u8>)> = Vec::new();
        let mut removed = 0usize;

        for idx in 0..self.slot_count() {
            let slot = self.read_slot(idx)?;
            if slot.tombstone {
                removed += 1;
                continue;
            }
            let header = RecordHeader::decode(&self.data[slot.offset as usize..])?;
            if header.is_deleted() && header.delete_txn < horizon {
                removed += 1;
                continue;
            }
            kept.push((header, self.record_payload(idx)?.to_vec()));
        }

        // Rewrite the body from scratch.
        self.set_slot_count(0);
        self.set_free_space_ptr(PAGE_HEADER_SIZE as u16);
        for byte in self.body_mut() {
            *byte = 0;
        }
        for (header, payload) in kept {
            let offset = self.free_space_ptr() as usize;
            let tuple_len = RECORD_HEADER_SIZE + payload.len();
            header.encode(&mut self.data[offset..offset + RECORD_HEADER_SIZE]);
            self.data[offset + RECORD_HEADER_SIZE..offset + tuple_len].copy_from_slice(&payload);
            let slot_idx = self.slot_count();
            self.set_slot_count(slot_idx + 1);
            self.write_slot(
                slot_idx,
                Slot {
                    offset: offset as u16,
                    len: tuple_len as u16,
                    tombstone: false,
                },
            );
            self.set_free_space_ptr((offset + tuple_len) as u16);
        }
        Ok(removed)
    }
}
