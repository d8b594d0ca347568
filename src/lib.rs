#![forbid(unsafe_op_in_unsafe_fn)]
#![deny(missing_docs)]
//! Asynchronous logging core: producer threads write records into private
//! input rings; one background output thread consumes and reclaims them.
//!
//! - Posting a record is a frame allocation in a thread-local ring, a move
//!   of the payload, and a word store; no locks on the common path.
//! - `commit` publishes written frames to the output thread through a FIFO
//!   queue; per-thread record order is preserved.
//! - A full ring blocks the producer until the output thread reclaims
//!   space; records are never dropped and never torn.
//! - Ring teardown at thread exit drains the ring first; nothing a thread
//!   logged is lost when it exits.

mod align;
mod error;
mod event;
mod input;
mod output;
mod record;
mod thread_object;

pub use align::{align_up, is_aligned, AlignedBuffer};
pub use error::Error;
pub use event::Event;
pub use input::{CommitExtent, ExtentSink, ThreadInputBuffer};
pub use record::{DispatchFn, Record, WRAPAROUND_MARKER};
pub use thread_object::{Factory, ThreadObject};

use std::sync::Arc;
use std::thread;

use output::Channel;

/// Tuning for a [`Log`].
#[derive(Clone, Copy, Debug)]
pub struct Config {
    ring_size: usize,
    frame_alignment: usize,
    burst: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ring_size: 64 * 1024,
            frame_alignment: 64,
            burst: 64,
        }
    }
}

impl Config {
    /// Default configuration: 64 KiB rings, cacheline frame alignment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Byte size of each thread's input ring; a multiple of the frame
    /// alignment.
    pub fn with_ring_size(mut self, bytes: usize) -> Self {
        self.ring_size = bytes;
        self
    }

    /// Frame alignment: a power of two, at least one machine word.
    pub fn with_frame_alignment(mut self, alignment: usize) -> Self {
        self.frame_alignment = alignment;
        self
    }

    /// Upper bound on commit extents the output thread drains per round.
    pub fn with_burst(mut self, burst: usize) -> Self {
        self.burst = burst;
        self
    }
}

/// The log front end. Cheap to call from any thread; owns the output
/// thread.
///
/// Every posting thread gets its own input ring, created on first use and
/// drained-then-dropped when the thread exits. The log must outlive its
/// producer threads: by the time it is dropped, every thread that posted
/// (other than the dropping thread itself) must have exited.
pub struct Log {
    channel: Arc<Channel>,
    rings: ThreadObject<ThreadInputBuffer>,
    worker: Option<thread::JoinHandle<()>>,
}

impl Log {
    /// Start a log: registers the per-thread ring holder and spawns the
    /// output thread.
    pub fn new(config: Config) -> Result<Self, Error> {
        let channel = Arc::new(Channel::new());
        let sink: Arc<dyn ExtentSink> = channel.clone();
        let (size, alignment) = (config.ring_size, config.frame_alignment);
        let rings = ThreadObject::new(Box::new(move || {
            ThreadInputBuffer::new(sink.clone(), size, alignment)
        }))?;
        let worker = thread::Builder::new()
            .name("scriv-output".into())
            .spawn({
                let channel = channel.clone();
                let burst = config.burst.max(1);
                move || output::run(channel, burst)
            })
            .map_err(|e| Error::System(e.raw_os_error().unwrap_or(-1)))?;
        Ok(Self {
            channel,
            rings,
            worker: Some(worker),
        })
    }

    /// Write `record` into the calling thread's ring without publishing it.
    ///
    /// Blocks while the ring is full. The record is emitted on the output
    /// thread after the next [`commit`](Self::commit). Errors only on a
    /// thread's first post, when its ring is created.
    pub fn post<R: Record>(&self, record: R) -> Result<(), Error> {
        let ring = self.rings.get()?;
        assert!(
            core::mem::align_of::<R>() <= ring.frame_alignment(),
            "record alignment exceeds the frame alignment"
        );
        let padded = align_up(record::frame_bytes::<R>(), ring.frame_alignment());
        assert!(padded < ring.size(), "record can never fit the input ring");
        let frame = ring.allocate_input_frame(record::frame_bytes::<R>());
        // SAFETY: the frame is owned by this thread until committed, and is
        // large and aligned enough for R.
        unsafe { record::encode(frame, record) };
        Ok(())
    }

    /// Publish all frames the calling thread has written so far.
    pub fn commit(&self) -> Result<(), Error> {
        self.rings.get()?.commit();
        Ok(())
    }

    /// Post and publish in one call.
    pub fn write<R: Record>(&self, record: R) -> Result<(), Error> {
        self.post(record)?;
        self.commit()
    }
}

impl Drop for Log {
    fn drop(&mut self) {
        // Drain and drop the calling thread's ring while the output thread
        // still runs, then stop the worker. The queue is FIFO, so the stop
        // message is handled only after every prior extent.
        self.rings.destroy_current();
        self.channel.publish(CommitExtent::terminate());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
