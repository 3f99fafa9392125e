//! The frame job queue (§4.1).
//!
//! Two single-producer/single-consumer FIFOs connect the session's
//! producer thread to the dedicated encoder worker: `to_proc` carries
//! [`EncJob`]s into the worker, `processed` carries [`EncResult`]s back
//! out. The teacher crate reaches for `crossbeam_channel::unbounded`
//! whenever it needs exactly this shape (see `compositor/rdp_bridge.rs`'s
//! `RdpBridge`/`RdpBridgeClient` split) — an unbounded channel *is*
//! "append + wake a waiter" with no separate mutex or wake object
//! needed, and `Select` over the job channel and a termination channel
//! gives the composite wait in §4.2/§5 for free.

use crossbeam_channel::{Receiver, Select, Sender};

use crate::rect::{EgfxRect, EncJobFlags, Rect};

/// Raw surface pixels plus the rect lists describing what changed,
/// destined for the H.264, RFX or JPEG path (§3.2).
#[derive(Debug)]
pub struct SurfaceJob {
    /// Raw (or, if `flags.ALREADY_COMPRESSED`, pre-compressed) pixel data.
    pub data: Vec<u8>,
    pub width: u16,
    pub height: u16,
    /// Regions that changed since the previous frame, 64px-tile aligned
    /// for the RFX path.
    pub drects: Vec<Rect>,
    /// Regions whose contents were copied from elsewhere on the surface.
    pub crects: Vec<Rect>,
    pub frame_id: Option<u32>,
    pub flags: EncJobFlags,
}

impl SurfaceJob {
    pub fn num_drects(&self) -> usize {
        self.drects.len()
    }

    pub fn num_crects(&self) -> usize {
        self.crects.len()
    }
}

/// An opaque RDPGFX command stream handed to the GFX multiplexer (§4.6).
///
/// `bytes` must be `<= 32 KiB` per command per the wire framing in §6.2;
/// the multiplexer enforces this when it parses the stream, not here.
#[derive(Debug)]
pub struct GfxJob {
    pub stream: Vec<u8>,
}

/// A unit of work submitted to the encoder worker (§3.2).
#[derive(Debug)]
pub enum EncJob {
    Surface(SurfaceJob),
    Gfx(GfxJob),
}

/// One encoded tile-set/slice/NAL-stream ready to be spliced onto the
/// wire (§3.3).
#[derive(Debug)]
pub struct EncResult {
    /// `PAD_BYTES` zero/garbage bytes reserved ahead of the real payload
    /// so the caller can splice RDP/MCS headers in place without a copy.
    pub comp_pad_data: Vec<u8>,
    /// Number of meaningful bytes in `comp_pad_data`, starting after `pad_bytes`.
    pub comp_bytes: usize,
    /// Always [`crate::config::PAD_BYTES`].
    pub pad_bytes: usize,
    pub frame_id: Option<u32>,
    /// True on the final result pushed for the originating job.
    pub last: bool,
    /// True if this is not the first tile-set of its frame (RFX multi-pass).
    pub continuation: bool,
    pub rect: Rect,
    pub flags: EncJobFlags,
}

impl EncResult {
    /// A zero-length `last=true` result, pushed on error so the
    /// driver's credit accounting still sees exactly one ACK per job
    /// (§7 key invariant).
    pub fn empty(frame_id: Option<u32>) -> Self {
        Self {
            comp_pad_data: vec![0u8; crate::config::PAD_BYTES],
            comp_bytes: 0,
            pad_bytes: crate::config::PAD_BYTES,
            frame_id,
            last: true,
            continuation: false,
            rect: Rect::new(0, 0, 0, 0),
            flags: EncJobFlags::empty(),
        }
    }

    /// The encoded payload, i.e. `comp_pad_data[pad_bytes..pad_bytes+comp_bytes]`.
    pub fn payload(&self) -> &[u8] {
        &self.comp_pad_data[self.pad_bytes..self.pad_bytes + self.comp_bytes]
    }
}

impl From<EgfxRect> for Rect {
    fn from(r: EgfxRect) -> Self {
        r.to_rect()
    }
}

/// The producer side of a [`FrameQueue`]: `submit` never blocks.
#[derive(Clone)]
pub struct QueueProducer {
    to_proc_tx: Sender<EncJob>,
    processed_rx: Receiver<EncResult>,
}

impl QueueProducer {
    /// Append a job to `to_proc`. Never blocks — the channel is unbounded.
    pub fn submit(&self, job: EncJob) {
        // A closed channel means the worker has exited; the job is simply
        // dropped, freeing its buffers through ordinary `Drop`.
        let _ = self.to_proc_tx.send(job);
    }

    /// Non-blocking pop from `processed`.
    pub fn poll_result(&self) -> Option<EncResult> {
        self.processed_rx.try_recv().ok()
    }
}

/// The worker side of a [`FrameQueue`].
pub struct QueueConsumer {
    to_proc_rx: Receiver<EncJob>,
    processed_tx: Sender<EncResult>,
    term_rx: Receiver<()>,
}

/// Outcome of [`QueueConsumer::wait_for_work`].
pub enum WorkerEvent {
    /// A job is ready; completing the `Select` operation already popped
    /// it off `to_proc`, so it's handed back here rather than silently
    /// dropped. Any further queued jobs are picked up by `drain_jobs`.
    WorkAvailable(EncJob),
    /// `term_global` or `term_local` fired; the worker should exit.
    Terminate,
}

impl QueueConsumer {
    /// Block until either a job arrives or termination is requested —
    /// the composite wait described in §4.1/§5. There is no timeout:
    /// the worker is expected to live for the life of the session.
    pub fn wait_for_work(&self) -> WorkerEvent {
        let mut select = Select::new();
        let work_idx = select.recv(&self.to_proc_rx);
        let term_idx = select.recv(&self.term_rx);
        let op = select.select();
        match op.index() {
            i if i == term_idx => {
                let _ = op.recv(&self.term_rx);
                WorkerEvent::Terminate
            }
            i if i == work_idx => {
                // Completing the selected operation performs the actual
                // recv on `to_proc_rx` — there is no peek-only form in
                // `Select`, so the popped job must be returned here
                // rather than discarded, or it would vanish from the
                // queue on every wake.
                match op.recv(&self.to_proc_rx) {
                    Ok(job) => WorkerEvent::WorkAvailable(job),
                    Err(_) => WorkerEvent::Terminate,
                }
            }
            _ => unreachable!(),
        }
    }

    /// Pop every job currently queued on `to_proc` beyond the one
    /// already returned by `wait_for_work`, without blocking.
    pub fn drain_jobs(&self) -> Vec<EncJob> {
        self.to_proc_rx.try_iter().collect()
    }

    /// Push one result. Results for one job are always pushed
    /// contiguously with `last=true` on the final push (§4.1, §4.3).
    pub fn push_result(&self, result: EncResult) {
        let _ = self.processed_tx.send(result);
    }
}

/// Construct a [`FrameQueue`]'s two ends plus the termination channel
/// the worker selects on.
pub fn channel() -> (QueueProducer, QueueConsumer, Sender<()>) {
    let (to_proc_tx, to_proc_rx) = crossbeam_channel::unbounded();
    let (processed_tx, processed_rx) = crossbeam_channel::unbounded();
    let (term_tx, term_rx) = crossbeam_channel::unbounded();

    (
        QueueProducer {
            to_proc_tx,
            processed_rx,
        },
        QueueConsumer {
            to_proc_rx,
            processed_tx,
            term_rx,
        },
        term_tx,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_then_poll_round_trips_a_result() {
        let (producer, consumer, _term_tx) = channel();
        producer.submit(EncJob::Gfx(GfxJob { stream: vec![1, 2, 3] }));

        match consumer.wait_for_work() {
            WorkerEvent::WorkAvailable(EncJob::Gfx(GfxJob { stream })) => {
                assert_eq!(stream, vec![1, 2, 3]);
            }
            WorkerEvent::WorkAvailable(_) => panic!("unexpected job shape"),
            WorkerEvent::Terminate => panic!("unexpected terminate"),
        }
        assert!(consumer.drain_jobs().is_empty());

        consumer.push_result(EncResult::empty(Some(7)));
        let result = producer.poll_result().expect("result should be ready");
        assert!(result.last);
        assert_eq!(result.frame_id, Some(7));
    }

    #[test]
    fn poll_result_is_non_blocking_when_empty() {
        let (producer, _consumer, _term_tx) = channel();
        assert!(producer.poll_result().is_none());
    }

    #[test]
    fn terminate_wakes_the_consumer_even_with_no_work() {
        let (_producer, consumer, term_tx) = channel();
        term_tx.send(()).unwrap();
        match consumer.wait_for_work() {
            WorkerEvent::Terminate => {}
            WorkerEvent::WorkAvailable(_) => panic!("expected terminate"),
        }
    }

    #[test]
    fn drain_jobs_returns_everything_submitted_before_the_wake() {
        let (producer, consumer, _term_tx) = channel();
        for i in 0..5 {
            producer.submit(EncJob::Gfx(GfxJob {
                stream: vec![i as u8],
            }));
        }
        // `wait_for_work` pops one job to confirm readiness; the other
        // four are still sitting on `to_proc` for `drain_jobs`.
        let first = match consumer.wait_for_work() {
            WorkerEvent::WorkAvailable(job) => job,
            WorkerEvent::Terminate => panic!("unexpected terminate"),
        };
        let mut all = vec![first];
        all.extend(consumer.drain_jobs());
        assert_eq!(all.len(), 5);
    }

    #[test]
    fn empty_result_always_has_pad_bytes_256() {
        let r = EncResult::empty(None);
        assert_eq!(r.pad_bytes, crate::config::PAD_BYTES);
        assert_eq!(r.comp_bytes, 0);
        assert!(r.last);
    }
}
