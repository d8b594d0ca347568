//! The output side: a FIFO channel of commit extents and the single worker
//! thread that drains them.

use std::sync::Arc;

use crossbeam_queue::SegQueue;
use smallvec::SmallVec;

use crate::event::Event;
use crate::input::{CommitExtent, ExtentSink};
use crate::record::{DispatchFn, WRAPAROUND_MARKER};

/// Producer-to-consumer channel: a FIFO of commit extents plus a wake-up for
/// the idle worker. The queue's push/pop pair is the release/acquire edge
/// that makes committed frame bytes visible to the worker.
pub(crate) struct Channel {
    queue: SegQueue<CommitExtent>,
    ready: Event,
}

impl Channel {
    pub(crate) fn new() -> Self {
        Self {
            queue: SegQueue::new(),
            ready: Event::new(),
        }
    }
}

impl ExtentSink for Channel {
    fn publish(&self, extent: CommitExtent) {
        self.queue.push(extent);
        self.ready.signal();
    }
}

/// Worker loop: drain extents in bounded batches, walk each committed span,
/// stop at the terminate message.
pub(crate) fn run(channel: Arc<Channel>, burst: usize) {
    let mut batch: SmallVec<[CommitExtent; 16]> = SmallVec::new();
    loop {
        batch.clear();
        while batch.len() < burst {
            match channel.queue.pop() {
                Some(extent) => batch.push(extent),
                None => break,
            }
        }
        if batch.is_empty() {
            idle(&channel);
            continue;
        }
        for extent in batch.drain(..) {
            if extent.is_terminate() {
                return;
            }
            process_extent(extent);
        }
    }
}

/// Stay hot briefly in case a publish is imminent, then park on the ready
/// event until one arrives.
fn idle(channel: &Channel) {
    for round in 0..96 {
        if !channel.queue.is_empty() {
            return;
        }
        if round < 64 {
            core::hint::spin_loop();
        } else {
            std::thread::yield_now();
        }
    }
    channel.ready.wait();
}

/// Walk one committed span, dispatching every frame.
///
/// The head is carried locally from the offsets the ring hands back: the
/// discard that completes a drop-drain lets the producer free the ring, so
/// the ring must not be touched after it.
fn process_extent(extent: CommitExtent) {
    // SAFETY: the FIFO queue yields every extent of a ring before the drain
    // in the ring's destructor can observe head == tail, so the pointer is
    // live for the whole walk.
    let ring = unsafe { &*extent.ring };
    let mut head = ring.head();
    while head != extent.commit_end {
        let frame = ring.frame_ptr(head);
        // SAFETY: a committed frame starts with a dispatch word written
        // before its extent was published.
        let word = unsafe { (frame as *const usize).read() };
        head = if word == WRAPAROUND_MARKER {
            ring.wraparound()
        } else {
            // SAFETY: every non-sentinel dispatch word is the address of a
            // shim stored by the frame encoder; the frame is complete and
            // unconsumed.
            let dispatch: DispatchFn = unsafe { core::mem::transmute(word) };
            let used = unsafe { dispatch(frame) };
            ring.discard_input_frame(used)
        };
    }
}
