//! Disk manager for page-level file I/O.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use lodestone_common::{LodeError, PageId, Result, StorageConfig, PAGE_SIZE};

/// Name of the single data file under the configured data directory.
const DATA_FILE_NAME: &str = "lodestone.dat";

/// Manages reading and writing pages against the data file.
///
/// Page ids are allocated sequentially; deallocated ids are kept in a
/// free set and handed out again before the file is extended.
pub struct DiskManager {
    /// Open data file plus allocation state.
    inner: Mutex<DiskInner>,
    /// Path to the data file.
    path: PathBuf,
    /// Whether writes are followed by fsync.
    fsync_enabled: bool,
}

struct DiskInner {
    /// The data file handle.
    file: File,
    /// Number of pages the file currently holds.
    num_pages: u32,
    /// Deallocated page ids available for reuse.
    free_pages: Vec<PageId>,
}

impl DiskManager {
    /// Opens (or creates) the data file under the config's data directory.
    pub fn new(config: &StorageConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let path = config.data_dir.join(DATA_FILE_NAME);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        Ok(Self {
            inner: Mutex::new(DiskInner {
                file,
                num_pages,
                free_pages: Vec::new(),
            }),
            path,
            fsync_enabled: config.fsync_enabled,
        })
    }

    /// Returns the path to the data file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of pages in the data file.
    pub fn num_pages(&self) -> u32 {
        self.inner.lock().num_pages
    }

    /// Allocates a new page and returns its ID.
    ///
    /// Prefers a previously deallocated page; otherwise extends the file
    /// by one zeroed page.
    pub fn allocate_page(&self) -> Result<PageId> {
        let mut inner = self.inner.lock();

        if let Some(page_id) = inner.free_pages.pop() {
            return Ok(page_id);
        }

        let page_id = PageId(inner.num_pages);
        let offset = (page_id.0 as u64) * (PAGE_SIZE as u64);
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(&[0u8; PAGE_SIZE])?;
        if self.fsync_enabled {
            inner.file.sync_all()?;
        }
        inner.num_pages += 1;

        Ok(page_id)
    }

    /// Returns a page to the free set for later reuse.
    ///
    /// Page bytes are left in place; the id simply becomes available to
    /// `allocate_page` again.
    pub fn deallocate_page(&self, page_id: PageId) {
        if !page_id.is_valid() {
            return;
        }
        let mut inner = self.inner.lock();
        if page_id.0 < inner.num_pages && !inner.free_pages.contains(&page_id) {
            inner.free_pages.push(page_id);
        }
    }

    /// Reads a page into the provided buffer.
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        assert_eq!(buf.len(), PAGE_SIZE);
        let mut inner = self.inner.lock();

        if page_id.0 >= inner.num_pages {
            return Err(LodeError::PageOutOfBounds {
                page_id: page_id.0,
                num_pages: inner.num_pages,
            });
        }

        let offset = (page_id.0 as u64) * (PAGE_SIZE as u64);
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.read_exact(buf)?;
        Ok(())
    }

    /// Writes a page from the provided buffer.
    pub fn write_page(&self, page_id: PageId, buf: &[u8]) -> Result<()> {
        assert_eq!(buf.len(), PAGE_SIZE);
        let mut inner = self.inner.lock();

        let offset = (page_id.0 as u64) * (PAGE_SIZE as u64);
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(buf)?;
        if self.fsync_enabled {
            inner.file.sync_all()?;
        }

        // Writing past the end extends the file.
        if page_id.0 >= inner.num_pages {
            inner.num_pages = page_id.0 + 1;
        }
        Ok(())
    }

    /// Flushes pending writes to disk.
    pub fn sync(&self) -> Result<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }
}
