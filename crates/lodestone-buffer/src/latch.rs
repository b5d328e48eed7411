//! Reader/writer latch with explicit lock and unlock.

use parking_lot::{Condvar, Mutex};

/// A reader/writer latch whose acquire and release are separate calls.
///
/// Latch crabbing acquires a child's latch in one stack frame and releases
/// it in another (the centralized traversal release), which RAII lock
/// guards cannot express. State is a single counter: -1 while a writer
/// holds the latch, otherwise the number of readers.
///
/// Every `lock_read`/`lock_write` must be paired with exactly one
/// `unlock_read`/`unlock_write` in the same mode.
pub struct RwLatch {
    state: Mutex<i32>,
    cond: Condvar,
}

impl RwLatch {
    /// Creates an unlocked latch.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(0),
            cond: Condvar::new(),
        }
    }

    /// Acquires the latch in shared mode, blocking while a writer holds it.
    pub fn lock_read(&self) {
        let mut state = self.state.lock();
        while *state < 0 {
            self.cond.wait(&mut state);
        }
        *state += 1;
    }

    /// Acquires the latch in exclusive mode, blocking until it is free.
    pub fn lock_write(&self) {
        let mut state = self.state.lock();
        while *state != 0 {
            self.cond.wait(&mut state);
        }
        *state = -1;
    }

    /// Acquires in the given mode. `exclusive` selects writer mode.
    pub fn lock(&self, exclusive: bool) {
        if exclusive {
            self.lock_write();
        } else {
            self.lock_read();
        }
    }

    /// Releases a shared hold.
    pub fn unlock_read(&self) {
        let mut state = self.state.lock();
        debug_assert!(*state > 0, "unlock_read without a reader");
        *state -= 1;
        if *state == 0 {
            self.cond.notify_all();
        }
    }

    /// Releases the exclusive hold.
    pub fn unlock_write(&self) {
        let mut state = self.state.lock();
        debug_assert!(*state == -1, "unlock_write without the writer");
        *state = 0;
        self.cond.notify_all();
    }

    /// Releases in the given mode. `exclusive` selects writer mode.
    pub fn unlock(&self, exclusive: bool) {
        if exclusive {
            self.unlock_write();
        } else {
            self.unlock_read();
        }
    }
}

impl Default for RwLatch {
    fn default() -> Self {
        Self::new()
    }
}
