//! The header page: index name to root page id records.

use std::sync::Arc;

use lodestone_buffer::BufferPoolManager;
use lodestone_common::{PageId, Result, PAGE_SIZE};

/// Maximum length of an index name in a header record.
pub const MAX_INDEX_NAME_LEN: usize = 32;

/// Bytes per record: NUL-padded name plus root page id.
const RECORD_LEN: usize = MAX_INDEX_NAME_LEN + 4;

/// Offset of the first record, after the record count.
const RECORDS_START: usize = 4;

/// Decoded view of the header page (page 0).
///
/// Layout: record count (u32), then records of a 32-byte NUL-padded
/// index name followed by the root page id (u32).
pub struct HeaderPage {
    records: Vec<(String, PageId)>,
}

impl HeaderPage {
    /// Maximum number of records a header page holds.
    pub const MAX_RECORDS: usize = (PAGE_SIZE - RECORDS_START) / RECORD_LEN;

    /// Creates an empty header page.
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    /// Allocates and initializes page 0 of a fresh database.
    ///
    /// Must be the first allocation against the pool's disk manager.
    pub fn create(pool: &Arc<BufferPoolManager>) -> Result<()> {
        let (page_id, frame) = pool.new_page()?;
        debug_assert_eq!(page_id, PageId::HEADER);
        HeaderPage::new().store(&mut frame.write_data()[..]);
        pool.unpin_page(page_id, true);
        Ok(())
    }

    /// Decodes the header page from page bytes.
    pub fn load(buf: &[u8]) -> Self {
        let count = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        let count = count.min(Self::MAX_RECORDS);

        let mut records = Vec::with_capacity(count);
        for i in 0..count {
            let offset = RECORDS_START + i * RECORD_LEN;
            let name_bytes = &buf[offset..offset + MAX_INDEX_NAME_LEN];
            let name_len = name_bytes
                .iter()
                .position(|&b| b == 0)
                .unwrap_or(MAX_INDEX_NAME_LEN);
            let name = String::from_utf8_lossy(&name_bytes[..name_len]).into_owned();
            let root = PageId(u32::from_le_bytes([
                buf[offset + MAX_INDEX_NAME_LEN],
                buf[offset + MAX_INDEX_NAME_LEN + 1],
                buf[offset + MAX_INDEX_NAME_LEN + 2],
                buf[offset + MAX_INDEX_NAME_LEN + 3],
            ]));
            records.push((name, root));
        }
        Self { records }
    }

    /// Encodes the header page into page bytes.
    pub fn store(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&(self.records.len() as u32).to_le_bytes());
        for (i, (name, root)) in self.records.iter().enumerate() {
            let offset = RECORDS_START + i * RECORD_LEN;
            let name_field = &mut buf[offset..offset + MAX_INDEX_NAME_LEN];
            name_field.fill(0);
            name_field[..name.len()].copy_from_slice(name.as_bytes());
            buf[offset + MAX_INDEX_NAME_LEN..offset + RECORD_LEN]
                .copy_from_slice(&root.0.to_le_bytes());
        }
    }

    /// Returns the number of records.
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Adds a record. Returns false if the name already exists, is too
    /// long, or the page is full.
    pub fn insert_record(&mut self, name: &str, root_page_id: PageId) -> bool {
        if name.len() > MAX_INDEX_NAME_LEN
            || self.records.len() >= Self::MAX_RECORDS
            || self.find(name).is_some()
        {
            return false;
        }
        self.records.push((name.to_string(), root_page_id));
        true
    }

    /// Updates the root page id of an existing record. Returns false if
    /// the name is absent.
    pub fn update_record(&mut self, name: &str, root_page_id: PageId) -> bool {
        match self.find(name) {
            Some(idx) => {
                self.records[idx].1 = root_page_id;
                true
            }
            None => false,
        }
    }

    /// Removes a record. Returns false if the name is absent.
    pub fn delete_record(&mut self, name: &str) -> bool {
        match self.find(name) {
            Some(idx) => {
                self.records.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Looks up the root page id recorded for `name`.
    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        self.find(name).map(|idx| self.records[idx].1)
    }

    fn find(&self, name: &str) -> Option<usize> {
        self.records.iter().position(|(n, _)| n == name)
    }
}

impl Default for HeaderPage {
    fn default() -> Self {
        Self::new()
    }
}
