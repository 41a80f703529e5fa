use std::ptr::null_mut;
use std::sync::atomic::{AtomicPtr, Ordering};

//------------ OnceBox -------------------------------------------------------
//
// A heap slot that is filled at most once and then stays put for the life
// of the arena. Racing initializers are resolved by a compare-exchange; the
// loser frees its own allocation. Holds the chunks of a `ChunkedArena`.

#[derive(Debug, Default)]
pub struct OnceBox<T> {
    ptr: AtomicPtr<T>,
}

impl<T> OnceBox<T> {
    pub fn new() -> Self {
        Self {
            ptr: AtomicPtr::new(null_mut()),
        }
    }

    // Acquire pairs with the release in `get_or_init`, so a reader that
    // sees the pointer also sees the initialized pointee.
    pub fn get(&self) -> Option<&T> {
        let ptr = self.ptr.load(Ordering::Acquire);
        if ptr.is_null() {
            None
        } else {
            Some(unsafe { &*ptr })
        }
    }

    /// Returns the value, creating it first if it wasn't there. The boolean
    /// is true if this call created it.
    pub fn get_or_init(&self, create: impl FnOnce() -> T) -> (&T, bool) {
        if let Some(res) = self.get() {
            return (res, false);
        }
        let ptr = Box::leak(Box::new(create()));
        match self.ptr.compare_exchange(
            null_mut(),
            ptr,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => (unsafe { &*ptr }, true),
            Err(current) => {
                // Lost the race.
                let _ = unsafe { Box::from_raw(ptr) };
                (unsafe { &*current }, false)
            }
        }
    }
}

impl<T> Drop for OnceBox<T> {
    fn drop(&mut self) {
        let ptr = self.ptr.swap(null_mut(), Ordering::Relaxed);
        if !ptr.is_null() {
            let _ = unsafe { Box::from_raw(ptr) };
        }
    }
}
