//! Per-thread input ring: variable-size aligned frames under single-producer
//! / single-consumer discipline.
//!
//! - The owning thread allocates frames, writes them, and publishes commit
//!   extents through its sink.
//! - The output thread dispatches frames, handles the wraparound sentinel,
//!   and reclaims space with [`discard_input_frame`].
//! - Head and tail always point strictly inside the buffer; `head == tail`
//!   means empty. Allocation refuses equality, so one alignment unit of
//!   capacity is never usable and "completely full" cannot alias "empty".
//!
//! [`discard_input_frame`]: ThreadInputBuffer::discard_input_frame

use core::cell::UnsafeCell;
use core::mem::size_of;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::align::{align_up, is_aligned, AlignedBuffer};
use crate::error::Error;
use crate::event::Event;
use crate::record::WRAPAROUND_MARKER;

/// A committed span of one ring: frames up to `commit_end` are visible to
/// the output thread.
#[derive(Clone, Copy, Debug)]
pub struct CommitExtent {
    /// Ring the span belongs to. Null is the output thread's stop message.
    pub ring: *const ThreadInputBuffer,
    /// Byte offset one past the last committed frame.
    pub commit_end: usize,
}

impl CommitExtent {
    /// The in-band stop message for the output thread.
    pub fn terminate() -> Self {
        Self {
            ring: core::ptr::null(),
            commit_end: 0,
        }
    }

    /// Is this the stop message?
    #[inline]
    pub fn is_terminate(&self) -> bool {
        self.ring.is_null()
    }
}

// SAFETY: an extent is a message to the output thread. The ring it points to
// stays alive until that thread has drained it: the drop-drain of a ring can
// only complete after the FIFO queue has yielded every extent of that ring
// (see `output`).
unsafe impl Send for CommitExtent {}

/// Where a ring publishes its commit extents: the one operation the ring
/// requires of the log front end.
///
/// `publish` must order all frame writes that precede it before the
/// consumer's matching pop (a release/acquire pair; a FIFO queue push/pop
/// provides it).
pub trait ExtentSink: Send + Sync {
    /// Hand a committed span to the consumer.
    fn publish(&self, extent: CommitExtent);
}

/// The per-thread input ring.
///
/// Exactly two threads touch a ring: the owning thread (allocate, commit,
/// drop) and the output thread (discard, wraparound). The field split
/// mirrors that: `input_start` is the shared atomic head, `input_end` and
/// `commit_end` are private to the owning thread.
pub struct ThreadInputBuffer {
    sink: Arc<dyn ExtentSink>,
    buffer: AlignedBuffer,
    alignment_mask: usize,
    // Head: earliest unconsumed byte. Stored by the output thread, read by
    // both sides.
    input_start: AtomicUsize,
    // Tail: one past the last allocated byte. Owning thread only; the output
    // thread learns of tail movement through commit extents, never by
    // reading this field.
    input_end: UnsafeCell<usize>,
    // Watermark of published frames. Owning thread only.
    commit_end: UnsafeCell<usize>,
    input_consumed: Event,
}

// SAFETY: `input_end` and `commit_end` are written and read only by the
// owning thread, `input_start` is atomic, and the buffer region between them
// is handed over with a release/acquire edge through the sink. The SPSC
// discipline itself is the construction contract.
unsafe impl Send for ThreadInputBuffer {}
unsafe impl Sync for ThreadInputBuffer {}

impl ThreadInputBuffer {
    /// Create a ring of `size` bytes whose frames start on `frame_alignment`
    /// boundaries.
    ///
    /// `frame_alignment` must be a power of two no smaller than a machine
    /// word (the wraparound sentinel must fit in one alignment unit), and
    /// `size` a nonzero multiple of it.
    pub fn new(
        sink: Arc<dyn ExtentSink>,
        size: usize,
        frame_alignment: usize,
    ) -> Result<Self, Error> {
        assert!(frame_alignment.is_power_of_two());
        assert!(
            frame_alignment >= size_of::<usize>(),
            "frame alignment must hold a dispatch word"
        );
        assert!(size > 0 && is_aligned(size, frame_alignment));
        Ok(Self {
            sink,
            buffer: AlignedBuffer::new(size, frame_alignment)?,
            alignment_mask: frame_alignment - 1,
            input_start: AtomicUsize::new(0),
            input_end: UnsafeCell::new(0),
            commit_end: UnsafeCell::new(0),
            input_consumed: Event::new(),
        })
    }

    /// Ring length in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    /// Frame alignment in bytes.
    #[inline]
    pub fn frame_alignment(&self) -> usize {
        self.alignment_mask + 1
    }

    /// Address of the byte at `offset`.
    #[inline]
    pub fn frame_ptr(&self, offset: usize) -> *mut u8 {
        debug_assert!(offset < self.size());
        // SAFETY: in-bounds of the backing allocation.
        unsafe { self.buffer.as_ptr().add(offset) }
    }

    /// Current head offset: the earliest unconsumed byte.
    #[inline]
    pub fn head(&self) -> usize {
        self.input_start.load(Ordering::Relaxed)
    }

    /// Current tail offset: one past the last allocated byte. Meaningful
    /// only on the owning thread.
    #[inline]
    pub fn tail(&self) -> usize {
        // SAFETY: single-writer field; see struct invariants.
        unsafe { *self.input_end.get() }
    }

    #[inline]
    fn set_tail(&self, offset: usize) {
        // SAFETY: owning thread only.
        unsafe { *self.input_end.get() = offset }
    }

    /// Move an offset forward by `distance`, wrapping exactly at the buffer
    /// end. Frames never straddle the end, so overshooting it is a caller
    /// bug.
    #[inline]
    fn advance(&self, offset: usize, distance: usize) -> usize {
        let next = offset + distance;
        debug_assert!(next <= self.size());
        if next == self.size() {
            0
        } else {
            next
        }
    }

    /// Allocate a fresh frame of `size` bytes rounded up to the frame
    /// alignment, blocking while the ring is too full. Owning thread only.
    ///
    /// The returned frame is contiguous, owned by the caller until written
    /// and committed. A request that can never fit blocks forever; the
    /// front end rejects those up front.
    pub fn allocate_input_frame(&self, size: usize) -> *mut u8 {
        debug_assert!(size > 0);
        let n = align_up(size, self.frame_alignment());
        loop {
            let end = self.tail();
            debug_assert!(end < self.size() && is_aligned(end, self.frame_alignment()));
            // A stale head only understates the free space: the producer
            // blocks spuriously, it never overflows. The event wait that
            // follows a refusal is a full barrier and refreshes the head.
            let start = self.input_start.load(Ordering::Relaxed);
            if end < start {
                // Used region wraps; the free space is the single gap
                // between tail and head.
                let free = start - end;
                if n < free {
                    let frame = self.frame_ptr(end);
                    self.set_tail(self.advance(end, n));
                    return frame;
                }
            } else {
                // Free space is split: after the tail, then before the head.
                let free_tail = self.size() - end;
                if n < free_tail {
                    let frame = self.frame_ptr(end);
                    self.set_tail(self.advance(end, n));
                    return frame;
                }
                let free_base = start;
                if n < free_base {
                    // No contiguous room at the tail; leave the skip
                    // sentinel there and restart at the base. One alignment
                    // unit is guaranteed to hold the sentinel word.
                    // SAFETY: `end` is in-bounds and word-aligned.
                    unsafe { (self.frame_ptr(end) as *mut usize).write(WRAPAROUND_MARKER) };
                    self.set_tail(self.advance(0, n));
                    return self.frame_ptr(0);
                }
            }
            self.wait_input_consumed();
        }
    }

    /// Publish every frame written so far. Idempotent when nothing new was
    /// allocated since the previous call. Owning thread only.
    pub fn commit(&self) {
        let end = self.tail();
        // SAFETY: owning thread only.
        let committed = unsafe { &mut *self.commit_end.get() };
        if *committed != end {
            *committed = end;
            self.sink.publish(CommitExtent {
                ring: self as *const _,
                commit_end: end,
            });
        }
    }

    /// Block until the output thread reclaims space.
    ///
    /// If everything published so far is already consumed, the missing space
    /// is held by frames this thread wrote but never committed; publish them
    /// first, or the wait below could never be satisfied.
    fn wait_input_consumed(&self) {
        // SAFETY: owning thread only.
        let committed = unsafe { *self.commit_end.get() };
        if committed == self.input_start.load(Ordering::Relaxed) {
            self.commit();
        }
        self.input_consumed.wait();
    }

    /// Reclaim `size` bytes (rounded up to the frame alignment) at the head
    /// after processing a frame, and wake the producer. Output thread only.
    ///
    /// Returns the new head, computed before the wake-up: the producer may
    /// free the ring the instant the signal lands, so after its final
    /// discard for a ring the caller must use the returned offset and not
    /// touch the ring again.
    pub fn discard_input_frame(&self, size: usize) -> usize {
        let n = align_up(size, self.frame_alignment());
        // The store reclaims space, it publishes no data, so relaxed is
        // enough; the event supplies the barrier that pairs with a blocked
        // producer.
        let head = self.input_start.load(Ordering::Relaxed);
        let next = self.advance(head, n);
        self.input_start.store(next, Ordering::Relaxed);
        self.input_consumed.signal();
        next
    }

    /// Skip the head back to the ring base after reading the wraparound
    /// sentinel. Output thread only. Returns the new head.
    pub fn wraparound(&self) -> usize {
        #[cfg(debug_assertions)]
        {
            let head = self.input_start.load(Ordering::Relaxed);
            // SAFETY: head is in-bounds and word-aligned.
            let marker = unsafe { (self.frame_ptr(head) as *const usize).read() };
            debug_assert_eq!(marker, WRAPAROUND_MARKER);
        }
        self.input_start.store(0, Ordering::Relaxed);
        0
    }
}

impl Drop for ThreadInputBuffer {
    fn drop(&mut self) {
        // Flush whatever the owning thread wrote, then hold the thread until
        // the output side has drained it. Nothing is lost at thread exit.
        self.commit();
        while self.input_start.load(Ordering::Relaxed) != self.tail() {
            self.wait_input_consumed();
        }
    }
}
