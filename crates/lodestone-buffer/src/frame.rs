//! Buffer frame management.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::latch::RwLatch;
use lodestone_common::{FrameId, PageId, PAGE_SIZE};

/// A frame in the buffer pool holding a single page.
///
/// Each frame contains:
/// - The page data (PAGE_SIZE bytes) behind a short-term RwLock
/// - The crabbing latch callers take while working on the page
/// - Metadata for buffer management (page id, pin count, dirty flag)
///
/// Frames are allocated once at pool construction and never move; the
/// pool hands them out as `Arc<PageFrame>`.
pub struct PageFrame {
    /// Frame identifier (index into the pool's frame array).
    frame_id: FrameId,
    /// Id of the page currently held, `PageId::INVALID` when empty.
    page_id: AtomicU32,
    /// Number of users currently pinning this page.
    pin_count: AtomicU32,
    /// Whether the page has been modified since it was last written out.
    is_dirty: AtomicBool,
    /// Reader/writer latch serializing logical access to the page.
    latch: RwLatch,
    /// Page data buffer.
    data: RwLock<Box<[u8; PAGE_SIZE]>>,
}

impl PageFrame {
    /// Creates a new empty buffer frame.
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            page_id: AtomicU32::new(PageId::INVALID.0),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
            latch: RwLatch::new(),
            data: RwLock::new(Box::new([0u8; PAGE_SIZE])),
        }
    }

    /// Returns the frame ID.
    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Returns the id of the page currently held by this frame.
    #[inline]
    pub fn page_id(&self) -> PageId {
        PageId(self.page_id.load(Ordering::Acquire))
    }

    /// Binds this frame to a page id.
    #[inline]
    pub fn set_page_id(&self, page_id: PageId) {
        self.page_id.store(page_id.0, Ordering::Release);
    }

    /// Returns the current pin count.
    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Increments the pin count.
    #[inline]
    pub fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrements the pin count, clamping at zero. Returns the new count.
    #[inline]
    pub fn unpin(&self) -> u32 {
        let prev = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        if prev == 0 {
            debug_assert!(false, "pin count underflow on {}", self.frame_id);
            self.pin_count.store(0, Ordering::Release);
            return 0;
        }
        prev - 1
    }

    /// Returns true if this frame is pinned.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    /// Returns true if this frame is dirty.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    /// Sets the dirty flag.
    #[inline]
    pub fn set_dirty(&self, dirty: bool) {
        self.is_dirty.store(dirty, Ordering::Release);
    }

    /// ORs `dirty` into the dirty flag.
    #[inline]
    pub fn mark_dirty(&self, dirty: bool) {
        if dirty {
            self.is_dirty.store(true, Ordering::Release);
        }
    }

    /// Returns true if no page is loaded.
    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.page_id().is_valid()
    }

    /// Takes the frame latch. `exclusive` selects writer mode.
    #[inline]
    pub fn latch(&self, exclusive: bool) {
        self.latch.lock(exclusive);
    }

    /// Releases the frame latch. `exclusive` must match the lock mode.
    #[inline]
    pub fn unlatch(&self, exclusive: bool) {
        self.latch.unlock(exclusive);
    }

    /// Reads the page data.
    #[inline]
    pub fn read_data(&self) -> parking_lot::RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.read()
    }

    /// Writes to the page data.
    #[inline]
    pub fn write_data(&self) -> parking_lot::RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.write()
    }

    /// Copies data into the frame.
    #[inline]
    pub fn copy_from(&self, src: &[u8]) {
        let mut data = self.data.write();
        let len = src.len().min(PAGE_SIZE);
        data[..len].copy_from_slice(&src[..len]);
    }

    /// Zeroes the page data.
    pub fn zero_data(&self) {
        self.data.write().fill(0);
    }

    /// Resets the frame to its empty state.
    pub fn reset(&self) {
        self.page_id.store(PageId::INVALID.0, Ordering::Release);
        self.pin_count.store(0, Ordering::Release);
        self.is_dirty.store(false, Ordering::Release);
        self.zero_data();
    }
}

impl std::fmt::Debug for PageFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageFrame")
            .field("frame_id", &self.frame_id)
            .field("page_id", &self.page_id())
            .field("pin_count", &self.pin_count())
            .field("is_dirty", &self.is_dirty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_new() {
        let frame = PageFrame::new(FrameId(0));

        assert_eq!(frame.frame_id(), FrameId(0));
        assert_eq!(frame.page_id(), PageId::INVALID);
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());
        assert!(frame.is_empty());
    }

    #[test]
    fn test_frame_pin_unpin() {
        let frame = PageFrame::new(FrameId(0));

        assert!(!frame.is_pinned());
        assert_eq!(frame.pin(), 1);
        assert_eq!(frame.pin(), 2);
        assert!(frame.is_pinned());

        assert_eq!(frame.unpin(), 1);
        assert_eq!(frame.unpin(), 0);
        assert!(!frame.is_pinned());
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn test_frame_unpin_underflow_clamps() {
        let frame = PageFrame::new(FrameId(0));
        assert_eq!(frame.unpin(), 0);
        assert_eq!(frame.pin_count(), 0);
    }

    #[test]
    fn test_frame_dirty_flags() {
        let frame = PageFrame::new(FrameId(0));

        frame.mark_dirty(false);
        assert!(!frame.is_dirty());

        frame.mark_dirty(true);
        assert!(frame.is_dirty());

        // mark_dirty never clears
        frame.mark_dirty(false);
        assert!(frame.is_dirty());

        frame.set_dirty(false);
        assert!(!frame.is_dirty());
    }

    #[test]
    fn test_frame_page_id() {
        let frame = PageFrame::new(FrameId(0));

        frame.set_page_id(PageId(100));
        assert_eq!(frame.page_id(), PageId(100));
        assert!(!frame.is_empty());

        frame.set_page_id(PageId::INVALID);
        assert!(frame.is_empty());
    }

    #[test]
    fn test_frame_data_access() {
        let frame = PageFrame::new(FrameId(0));

        {
            let mut data = frame.write_data();
            data[0] = 0xAB;
            data[PAGE_SIZE - 1] = 0xCD;
        }
        {
            let data = frame.read_data();
            assert_eq!(data[0], 0xAB);
            assert_eq!(data[PAGE_SIZE - 1], 0xCD);
        }
    }

    #[test]
    fn test_frame_copy_from() {
        let frame = PageFrame::new(FrameId(0));
        frame.copy_from(&[1u8, 2, 3]);

        let data = frame.read_data();
        assert_eq!(&data[..3], &[1, 2, 3]);
        assert_eq!(data[3], 0);
    }

    #[test]
    fn test_frame_reset() {
        let frame = PageFrame::new(FrameId(0));

        frame.set_page_id(PageId(1));
        frame.pin();
        frame.set_dirty(true);
        frame.write_data()[0] = 0xFF;

        frame.reset();

        assert!(frame.is_empty());
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());
        assert_eq!(frame.read_data()[0], 0);
    }

    #[test]
    fn test_frame_latch_modes() {
        let frame = PageFrame::new(FrameId(0));
        frame.latch(false);
        frame.unlatch(false);
        frame.latch(true);
        frame.unlatch(true);
    }

    #[test]
    fn test_frame_debug() {
        let frame = PageFrame::new(FrameId(5));
        frame.set_page_id(PageId(10));
        frame.pin();

        let debug_str = format!("{:?}", frame);
        assert!(debug_str.contains("PageFrame"));
        assert!(debug_str.contains("pin_count"));
    }
}
