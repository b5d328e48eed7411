//! Write-ahead-log notification seam.

use lodestone_common::PageId;

/// Receives notifications from the buffer pool.
///
/// When a log manager is attached to the pool, it is told about every
/// dirty page about to be written back during eviction, so that it can
/// enforce the write-ahead rule before the page bytes hit the data file.
/// The pool works fine without one; tests usually run bare.
pub trait LogManager: Send + Sync {
    /// Called immediately before a dirty victim page is written to disk.
    fn on_evict_flush(&self, page_id: PageId);
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct RecordingLog {
        flushed: Mutex<Vec<PageId>>,
    }

    impl LogManager for RecordingLog {
        fn on_evict_flush(&self, page_id: PageId) {
            self.flushed.lock().push(page_id);
        }
    }

    #[test]
    fn test_log_manager_records_notifications() {
        let log = RecordingLog {
            flushed: Mutex::new(Vec::new()),
        };
        log.on_evict_flush(PageId(3));
        log.on_evict_flush(PageId(9));
        assert_eq!(*log.flushed.lock(), vec![PageId(3), PageId(9)]);
    }

    #[test]
    fn test_log_manager_is_object_safe() {
        fn takes_dyn(_: &dyn LogManager) {}
        let log = RecordingLog {
            flushed: Mutex::new(Vec::new()),
        };
        takes_dyn(&log);
    }
}
