//! One owned instance per thread, created lazily from a factory captured at
//! holder construction and destroyed when the thread exits.
//!
//! Built directly on the platform thread-local key API because the standard
//! `thread_local!` macro is a static: it cannot give each holder instance
//! its own key and captured constructor arguments.

use core::ffi::c_void;
use core::mem::{align_of, size_of};
use std::process;

use crate::error::Error;

/// Factory captured once at holder construction; runs on each thread's
/// first `get`.
pub type Factory<T> = Box<dyn Fn() -> Result<T, Error> + Send + Sync>;

// The key rides along in the per-thread slot so the exit destructor can
// restore the slot for the duration of the value's drop.
struct Slot<T> {
    value: T,
    key: libc::pthread_key_t,
}

/// Holder of one `T` per accessing thread.
///
/// The first `get` on a thread runs the factory; later calls return the
/// same instance until the thread exits, at which point the instance is
/// dropped. Dropping the holder drops the calling thread's instance and
/// releases the key; instances of other threads must already be gone.
pub struct ThreadObject<T> {
    key: libc::pthread_key_t,
    factory: Factory<T>,
}

impl<T> ThreadObject<T> {
    /// Register a thread-local key whose destructor tears down per-thread
    /// instances at thread exit.
    pub fn new(factory: Factory<T>) -> Result<Self, Error> {
        let mut key: libc::pthread_key_t = 0;
        // SAFETY: `key` is a valid out-pointer and the destructor matches
        // the slot type stored under this key.
        let rc = unsafe { libc::pthread_key_create(&mut key, Some(destroy::<T>)) };
        if rc != 0 {
            return Err(slot_error::<T>(rc));
        }
        Ok(Self { key, factory })
    }

    /// The calling thread's instance, created on first use.
    pub fn get(&self) -> Result<&T, Error> {
        // SAFETY: the key is live for the lifetime of the holder.
        let slot = unsafe { libc::pthread_getspecific(self.key) } as *mut Slot<T>;
        if !slot.is_null() {
            // SAFETY: stored by `create_and_get` on this thread; valid
            // until thread exit, which cannot preempt this borrow.
            return Ok(unsafe { &(*slot).value });
        }
        self.create_and_get()
    }

    #[cold]
    fn create_and_get(&self) -> Result<&T, Error> {
        let value = (self.factory)()?;
        let slot = Box::into_raw(Box::new(Slot {
            value,
            key: self.key,
        }));
        // SAFETY: `slot` is a valid pointer; on success the key owns it.
        let rc = unsafe { libc::pthread_setspecific(self.key, slot as *const c_void) };
        if rc != 0 {
            // SAFETY: the key did not take ownership; reclaim and drop.
            drop(unsafe { Box::from_raw(slot) });
            return Err(slot_error::<T>(rc));
        }
        // SAFETY: freshly stored; see `get`.
        Ok(unsafe { &(*slot).value })
    }

    /// Drop the calling thread's instance now, if one exists.
    ///
    /// For teardown that must happen while collaborators are still running
    /// rather than at an arbitrary point of thread exit.
    pub fn destroy_current(&self) {
        // SAFETY: the key is live; the slot, if any, was stored by this
        // thread.
        let slot = unsafe { libc::pthread_getspecific(self.key) } as *mut Slot<T>;
        if slot.is_null() {
            return;
        }
        // The slot stays registered while the value drops, so a `get`
        // reached from the drop sees the dying instance, as at thread exit.
        // SAFETY: this thread stored `slot` via Box::into_raw.
        drop(unsafe { Box::from_raw(slot) });
        // SAFETY: clearing a live key.
        unsafe { libc::pthread_setspecific(self.key, core::ptr::null()) };
    }
}

impl<T> Drop for ThreadObject<T> {
    fn drop(&mut self) {
        self.destroy_current();
        // SAFETY: exclusive access; no `get` can race a &mut drop.
        let rc = unsafe { libc::pthread_key_delete(self.key) };
        debug_assert_eq!(rc, 0);
    }
}

/// Map a pthread thread-local failure: out of memory reports the per-thread
/// slot the holder was provisioning, anything else surfaces the raw code.
fn slot_error<T>(code: i32) -> Error {
    if code == libc::ENOMEM {
        Error::Allocation {
            size: size_of::<Slot<T>>(),
            alignment: align_of::<Slot<T>>(),
        }
    } else {
        Error::System(code)
    }
}

/// Thread-exit destructor.
///
/// pthread clears the slot before invoking this, so a `get` reached from the
/// value's drop would create a fresh instance mid-teardown. Restore the slot
/// for the duration of the drop, then clear it again.
extern "C" fn destroy<T>(p: *mut c_void) {
    if p.is_null() {
        return;
    }
    let slot = p as *mut Slot<T>;
    // SAFETY: `p` was stored under this key by `create_and_get` on this
    // thread.
    let key = unsafe { (*slot).key };
    // SAFETY: restoring the value just observed for a live key.
    if unsafe { libc::pthread_setspecific(key, p) } != 0 {
        // Thread teardown with the thread-local table out of memory: there
        // is no caller left to report to, and leaking would hide failures
        // that surface much later.
        process::abort();
    }
    // SAFETY: sole owner; the slot is dropped exactly once.
    drop(unsafe { Box::from_raw(slot) });
    // SAFETY: clear again so pthread does not re-run this destructor for an
    // already-dead slot.
    unsafe { libc::pthread_setspecific(key, core::ptr::null()) };
}
