//! Record identifiers.

use crate::page::PageId;
use serde::{Deserialize, Serialize};

/// Identifies a record by the heap page holding it and its slot number.
///
/// This is the value type stored in index leaves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rid {
    /// Page holding the record.
    pub page_id: u32,
    /// Slot number within the page.
    pub slot: u32,
}

impl Rid {
    /// Encoded size on a page in bytes.
    pub const ENCODED_LEN: usize = 8;

    /// Creates a new record ID.
    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self {
            page_id: page_id.0,
            slot,
        }
    }

    /// Serializes into the first `ENCODED_LEN` bytes of `buf`.
    pub fn write_to(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.page_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.slot.to_le_bytes());
    }

    /// Deserializes from the first `ENCODED_LEN` bytes of `buf`.
    pub fn read_from(buf: &[u8]) -> Self {
        Self {
            page_id: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            slot: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }
}

impl std::fmt::Display for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.page_id, self.slot)
    }
}
