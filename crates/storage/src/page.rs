use common::{DbError, DbResult, Lsn, PageId, INVALID_PAGE_ID};

/// Fixed page size in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Byte layout of the page header (all integers little-endian):
///
/// ```text
/// offset  field
/// 0..8    page_id: u64
/// 8       page_type: u8
/// 16..24  next_page_id: u64
/// 24..26  slot_count: u16
/// 26..28  free_space_ptr: u16
/// 28..36  lsn: u64
/// ```
///
/// Bytes 9..16 and 36..40 are reserved.
pub const PAGE_HEADER_SIZE: usize = 40;

/// Usable bytes after the header.
pub const PAGE_BODY_SIZE: usize = PAGE_SIZE - PAGE_HEADER_SIZE;

const OFF_PAGE_ID: usize = 0;
const OFF_PAGE_TYPE: usize = 8;
const OFF_NEXT_PAGE: usize = 16;
const OFF_SLOT_COUNT: usize = 24;
const OFF_FREE_PTR: usize = 26;
const OFF_LSN: usize = 28;

/// Page type tag stored in the header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageType {
    Free = 0,
    Table = 1,
    InternalIndex = 2,
    LeafIndex = 3,
    Meta = 4,
}

impl TryFrom<u8> for PageType {
    type Error = DbError;

    fn try_from(tag: u8) -> DbResult<Self> {
        Ok(match tag {
            0 => PageType::Free,
            1 => PageType::Table,
            2 => PageType::InternalIndex,
            3 => PageType::LeafIndex,
            4 => PageType::Meta,
            other => return Err(DbError::Corruption(format!("unknown page type {other}"))),
        })
    }
}

/// A raw page: one `PAGE_SIZE` buffer plus typed accessors over the header.
#[derive(Clone, Debug)]
pub struct Page {
    pub data: Vec<u8>,
}

impl Page {
    /// A zeroed page with its id written and the free pointer at the start
    /// of the body.
    pub fn new(id: PageId) -> Self {
        let mut page = Self {
            data: vec![0u8; PAGE_SIZE],
        };
        page.set_page_id(id);
        page.set_next_page_id(INVALID_PAGE_ID);
        page.set_free_space_ptr(PAGE_HEADER_SIZE as u16);
        page
    }

    /// Wrap bytes read from disk. The caller guarantees `data.len() == PAGE_SIZE`.
    pub fn from_bytes(data: Vec<u8>) -> DbResult<Self> {
        if data.len() != PAGE_SIZE {
            return Err(DbError::Corruption(format!(
                "page buffer is {} bytes, expected {PAGE_SIZE}",
                data.len()
            )));
        }
        Ok(Self { data })
    }

    pub fn page_id(&self) -> PageId {
        PageId(self.read_u64(OFF_PAGE_ID))
    }

    pub fn set_page_id(&mut self, id: PageId) {
        self.write_u64(OFF_PAGE_ID, id.0);
    }

    pub fn page_type(&self) -> DbResult<PageType> {
        PageType::try_from(self.data[OFF_PAGE_TYPE])
    }

    pub fn set_page_type(&mut self, ty: PageType) {
        self.data[OFF_PAGE_TYPE] = ty as u8;
    }

    pub fn next_page_id(&self) -> PageId {
        PageId(self.read_u64(OFF_NEXT_PAGE))
    }

    pub fn set_next_page_id(&mut self, id: PageId) {
        self.write_u64(OFF_NEXT_PAGE, id.0);
    }

    pub fn slot_count(&self) -> u16 {
        self.read_u16(OFF_SLOT_COUNT)
    }

    pub fn set_slot_count(&mut self, count: u16) {
        self.write_u16(OFF_SLOT_COUNT, count);
    }

    pub fn free_space_ptr(&self) -> u16 {
        self.read_u16(OFF_FREE_PTR)
    }

    pub fn set_free_space_ptr(&mut self, ptr: u16) {
        self.write_u16(OFF_FREE_PTR, ptr);
    }

    pub fn lsn(&self) -> Lsn {
        Lsn(self.read_u64(OFF_LSN))
    }

    pub fn set_lsn(&mut self, lsn: Lsn) {
        self.write_u64(OFF_LSN, lsn.0);
    }

    /// The page body (everything after the header).
    pub fn body(&self) -> &[u8] {
        &self.data[PAGE_HEADER_SIZE..]
    }

    pub fn body_mut(&mut self) -> &mut [u8] {
        &mut self.data[PAGE_HEADER_SIZE..]
    }

    fn read_u16(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.data[offset], self.data[offset + 1]])
    }

    fn write_u16(&mut self, offset: usize, value: u16) {
        self.data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn read_u64(&self, offset: usize) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.data[offset..offset + 8]);
        u64::from_le_bytes(buf)
    }

    fn write_u64(&mut self, offset: usize, value: u64) {
        self.data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }
}
