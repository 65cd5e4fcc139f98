use std::sync::atomic::{AtomicUsize, Ordering};

use crate::sync::lock_word::LockWord;

/// Header carried by every object the monitor subsystem manages. The lock
/// word is the only field this crate needs; a runtime embeds the header at
/// a known offset in its own object layout. Freshly zeroed memory reads as
/// unlocked.
#[repr(C)]
pub struct HeapObjectHeader {
    lock_word: AtomicUsize,
}

impl HeapObjectHeader {
    pub const fn new() -> Self {
        Self {
            lock_word: AtomicUsize::new(0),
        }
    }

    pub fn lock_word(&self) -> LockWord {
        LockWord::from_raw(self.lock_word.load(Ordering::Acquire))
    }

    /// Publishes `new` if the word still equals `expected`. This is the only
    /// way a non-owner may mutate the word.
    pub fn cas_lock_word(&self, expected: LockWord, new: LockWord) -> bool {
        self.lock_word
            .compare_exchange(expected.raw(), new.raw(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Plain store, permitted only for owner-verified transitions that no
    /// concurrent CAS can interleave with (recursion count adjustments and
    /// the final release).
    pub fn set_lock_word(&self, new: LockWord) {
        self.lock_word.store(new.raw(), Ordering::Release);
    }
}

impl Default for HeapObjectHeader {
    fn default() -> Self {
        Self::new()
    }
}
