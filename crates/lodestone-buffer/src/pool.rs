//! Buffer pool manager.

use parking_lot::Mutex;
use std::sync::Arc;
use sysinfo::System;
use tracing::{debug, trace};

use crate::extendible::ExtendibleHashTable;
use crate::frame::PageFrame;
use crate::lru::{LruReplacer, Replacer};
use lodestone_common::{FrameId, LodeError, PageId, Result, PAGE_SIZE};
use lodestone_disk::{DiskManager, LogManager};

/// Buffer pool manager.
///
/// Owns a fixed array of page frames and mediates every read and write of
/// a disk page through them:
/// - Extendible hash directory mapping resident page ids to frames
/// - Free list of empty frames, preferred over eviction
/// - LRU replacement over unpinned frames
/// - Pin counting; a pinned frame is never evicted
/// - Flush-on-evict for dirty victims, with an optional write-ahead-log
///   notification beforehand
///
/// A single pool mutex serializes directory, free-list, and LRU
/// transitions within each public call; it is held across disk I/O only
/// for the one write-back during eviction. The frame bytes themselves are
/// guarded by each frame's own latch and data lock, not by the pool
/// mutex.
pub struct BufferPoolManager {
    /// Array of buffer frames, allocated once.
    frames: Vec<Arc<PageFrame>>,
    /// Page id to frame id directory.
    page_table: ExtendibleHashTable<PageId, FrameId>,
    /// Eviction candidates (unpinned resident frames).
    replacer: LruReplacer<FrameId>,
    /// Pool latch; also owns the free list.
    latch: Mutex<Vec<FrameId>>,
    /// Disk manager for page I/O.
    disk: Arc<DiskManager>,
    /// Optional write-ahead-log hook, notified before dirty evictions.
    log: Option<Arc<dyn LogManager>>,
}

impl BufferPoolManager {
    /// Creates a buffer pool with `pool_size` frames.
    pub fn new(pool_size: usize, disk: Arc<DiskManager>) -> Self {
        Self::build(pool_size, disk, None)
    }

    /// Creates a buffer pool that notifies `log` before dirty evictions.
    pub fn with_log_manager(
        pool_size: usize,
        disk: Arc<DiskManager>,
        log: Arc<dyn LogManager>,
    ) -> Self {
        Self::build(pool_size, disk, Some(log))
    }

    /// Creates a buffer pool sized to 25% of available system RAM, with a
    /// floor of 1024 frames.
    pub fn auto_sized(disk: Arc<DiskManager>) -> Self {
        let mut sys = System::new();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let pool_size = (available_bytes / 4 / PAGE_SIZE).max(1024);
        Self::build(pool_size, disk, None)
    }

    fn build(
        pool_size: usize,
        disk: Arc<DiskManager>,
        log: Option<Arc<dyn LogManager>>,
    ) -> Self {
        assert!(pool_size > 0, "buffer pool needs at least one frame");

        let frames: Vec<_> = (0..pool_size)
            .map(|i| Arc::new(PageFrame::new(FrameId(i as u32))))
            .collect();

        // All frames start on the free list.
        let free_list: Vec<_> = (0..pool_size).map(|i| FrameId(i as u32)).collect();

        Self {
            frames,
            page_table: ExtendibleHashTable::new(),
            replacer: LruReplacer::new(),
            latch: Mutex::new(free_list),
            disk,
            log,
        }
    }

    /// Returns the number of frames in the pool.
    pub fn pool_size(&self) -> usize {
        self.frames.len()
    }

    /// Returns the disk manager backing this pool.
    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.latch.lock().len()
    }

    /// Checks if a page is resident.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.page_table.find(&page_id).is_some()
    }

    fn frame(&self, frame_id: FrameId) -> &Arc<PageFrame> {
        &self.frames[frame_id.0 as usize]
    }

    /// Picks a frame for reuse: the free list first, then the LRU victim.
    ///
    /// A dirty victim is written back to disk (after notifying the log
    /// manager) before its frame is handed out. Returns `BufferPoolFull`
    /// when every frame is pinned.
    fn take_victim(&self, free_list: &mut Vec<FrameId>) -> Result<FrameId> {
        if let Some(frame_id) = free_list.pop() {
            let frame = self.frame(frame_id);
            debug_assert!(frame.is_empty());
            debug_assert!(!frame.is_dirty());
            return Ok(frame_id);
        }

        let Some(frame_id) = self.replacer.victim() else {
            return Err(LodeError::BufferPoolFull);
        };
        let frame = self.frame(frame_id);
        debug_assert_eq!(frame.pin_count(), 0);

        if frame.is_dirty() {
            let page_id = frame.page_id();
            if let Some(log) = &self.log {
                log.on_evict_flush(page_id);
            }
            debug!(%page_id, %frame_id, "evicting dirty page, writing back");
            let data = frame.read_data();
            if let Err(e) = self.disk.write_page(page_id, &data[..]) {
                drop(data);
                // Write-back failed; the frame keeps its page and stays
                // an eviction candidate.
                self.replacer.insert(frame_id);
                return Err(e);
            }
            frame.set_dirty(false);
        }
        Ok(frame_id)
    }

    /// Fetches a page, reading it from disk if it is not resident.
    ///
    /// The returned frame is pinned (pin count >= 1) and out of LRU
    /// candidacy; every fetch must be paired with exactly one
    /// `unpin_page`. Fails with `BufferPoolFull` when all frames are
    /// pinned and the free list is empty.
    pub fn fetch_page(&self, page_id: PageId) -> Result<Arc<PageFrame>> {
        let mut free_list = self.latch.lock();

        if let Some(frame_id) = self.page_table.find(&page_id) {
            let frame = self.frame(frame_id);
            frame.pin();
            self.replacer.erase(&frame_id);
            return Ok(Arc::clone(frame));
        }

        let frame_id = self.take_victim(&mut free_list)?;
        let frame = self.frame(frame_id);

        let old_page_id = frame.page_id();
        if old_page_id.is_valid() {
            self.page_table.remove(&old_page_id);
        }

        {
            let mut data = frame.write_data();
            if let Err(e) = self.disk.read_page(page_id, &mut data[..]) {
                drop(data);
                frame.reset();
                free_list.push(frame_id);
                return Err(e);
            }
        }

        frame.set_page_id(page_id);
        frame.set_dirty(false);
        frame.pin();
        self.page_table.insert(page_id, frame_id);
        trace!(%page_id, %frame_id, "page loaded into pool");

        Ok(Arc::clone(frame))
    }

    /// Allocates a fresh page on disk and binds it to a pinned frame.
    ///
    /// The frame bytes are zeroed and the frame is pinned (pin count 1).
    pub fn new_page(&self) -> Result<(PageId, Arc<PageFrame>)> {
        let mut free_list = self.latch.lock();

        let frame_id = self.take_victim(&mut free_list)?;
        let frame = self.frame(frame_id);

        let old_page_id = frame.page_id();
        if old_page_id.is_valid() {
            self.page_table.remove(&old_page_id);
        }

        let page_id = match self.disk.allocate_page() {
            Ok(id) => id,
            Err(e) => {
                frame.reset();
                free_list.push(frame_id);
                return Err(e);
            }
        };

        frame.zero_data();
        frame.set_page_id(page_id);
        frame.set_dirty(false);
        frame.pin();
        self.page_table.insert(page_id, frame_id);
        trace!(%page_id, %frame_id, "new page bound");

        Ok((page_id, Arc::clone(frame)))
    }

    /// Unpins a page, ORing `is_dirty` into its dirty flag.
    ///
    /// When the pin count reaches zero the frame becomes an LRU
    /// candidate. Returns false if the page is not resident or was not
    /// pinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let _free_list = self.latch.lock();

        let Some(frame_id) = self.page_table.find(&page_id) else {
            return false;
        };
        let frame = self.frame(frame_id);
        frame.mark_dirty(is_dirty);

        if frame.pin_count() == 0 {
            return false;
        }
        if frame.unpin() == 0 {
            self.replacer.insert(frame_id);
        }
        true
    }

    /// Writes a resident page to disk if dirty and clears its dirty flag.
    ///
    /// Returns Ok(false) if the page is not resident or the frame holds
    /// no valid page.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let _free_list = self.latch.lock();

        let Some(frame_id) = self.page_table.find(&page_id) else {
            return Ok(false);
        };
        let frame = self.frame(frame_id);
        if !frame.page_id().is_valid() {
            return Ok(false);
        }

        if frame.is_dirty() {
            let data = frame.read_data();
            self.disk.write_page(page_id, &data[..])?;
            drop(data);
            frame.set_dirty(false);
        }
        Ok(true)
    }

    /// Flushes every dirty resident page. Returns the number written.
    pub fn flush_all(&self) -> Result<usize> {
        let _free_list = self.latch.lock();

        let mut flushed = 0;
        for frame in &self.frames {
            let page_id = frame.page_id();
            if page_id.is_valid() && frame.is_dirty() {
                let data = frame.read_data();
                self.disk.write_page(page_id, &data[..])?;
                drop(data);
                frame.set_dirty(false);
                flushed += 1;
            }
        }
        Ok(flushed)
    }

    /// Deletes a page, returning its frame to the free list and its disk
    /// page to the disk manager.
    ///
    /// Returns Ok(false) if the page is resident and pinned. A page that
    /// is not resident is still deallocated on disk.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut free_list = self.latch.lock();

        if let Some(frame_id) = self.page_table.find(&page_id) {
            let frame = self.frame(frame_id);
            if frame.is_pinned() {
                return Ok(false);
            }
            self.page_table.remove(&page_id);
            self.replacer.erase(&frame_id);
            frame.reset();
            free_list.push(frame_id);
        }

        self.disk.deallocate_page(page_id);
        trace!(%page_id, "page deleted");
        Ok(true)
    }

    /// Returns statistics about the buffer pool.
    pub fn stats(&self) -> BufferPoolStats {
        let free_frames = self.free_count();
        let mut used_frames = 0;
        let mut pinned_frames = 0;
        let mut dirty_frames = 0;

        for frame in &self.frames {
            if frame.page_id().is_valid() {
                used_frames += 1;
                if frame.is_pinned() {
                    pinned_frames += 1;
                }
                if frame.is_dirty() {
                    dirty_frames += 1;
                }
            }
        }

        BufferPoolStats {
            total_frames: self.frames.len(),
            free_frames,
            used_frames,
            pinned_frames,
            dirty_frames,
        }
    }
}

/// Statistics about the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolStats {
    /// Total number of frames.
    pub total_frames: usize,
    /// Number of free frames.
    pub free_frames: usize,
    /// Number of frames holding a page.
    pub used_frames: usize,
    /// Number of pinned frames.
    pub pinned_frames: usize,
    /// Number of dirty frames.
    pub dirty_frames: usize,
}
