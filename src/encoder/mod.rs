//! The per-session encoder worker (§3.4, §4.2): a dedicated thread that
//! drains [`crate::queue::EncJob`]s and dispatches them to one of four
//! encode paths.
//!
//! The worker-thread lifecycle — spawn at construction, signal +
//! bounded-wait + `Drop` — is the same shape the teacher uses for its
//! PipeWire capture thread: spawn eagerly, shut down with a timeout
//! rather than blocking forever on a wedged native call.

pub mod gfx;
pub mod h264;
pub mod jpeg;
pub mod rfx;
pub mod worker;

use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use tracing::warn;

use crate::codecs::rfx::ConnectionTier;
use crate::codecs::CodecAdapter;
use crate::config;
use crate::queue::{self, EncJob, EncResult, QueueProducer};

/// How the worker's `process_enc` is chosen at construction (§4.2, §9
/// Design Notes — sealed variant, not a function pointer or vtable).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    H264,
    Rfx,
    Jpeg,
    Gfx,
}

/// Capture color space the producer hands the worker (§3.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpace {
    Nv12,
    Yuv444,
    Bgra,
}

/// Construction-time parameters for one session's [`Encoder`] (§3.4).
#[derive(Clone)]
pub struct EncoderConfig {
    pub codec: CodecKind,
    pub color_space: ColorSpace,
    /// RFX quant indices `(y, cb, cr)` for this connection tier.
    pub quant: (u8, u8, u8),
    pub connection_tier: ConnectionTier,
    pub frames_in_flight: u32,
    pub max_compressed_bytes: u32,
}

impl EncoderConfig {
    /// Build a config from the environment (§6.5), given the codec and
    /// color space negotiated during capability exchange.
    pub fn new(codec: CodecKind, color_space: ColorSpace, connection_tier: ConnectionTier) -> Self {
        Self {
            codec,
            color_space,
            quant: *crate::codecs::rfx::quant_table_for_tier(connection_tier)
                .first()
                .unwrap_or(&(4, 4, 4)),
            connection_tier,
            frames_in_flight: config::frames_in_flight_from_env(),
            max_compressed_bytes: config::max_compressed_bytes_from_env(),
        }
    }
}

/// One session's encoder: owns the job queue's producer half and the
/// dedicated worker thread that drains it.
pub struct Encoder {
    producer: QueueProducer,
    term_tx: Sender<()>,
    term_done_rx: Receiver<()>,
    worker_handle: Option<JoinHandle<()>>,
    config: EncoderConfig,
}

impl Encoder {
    /// Spawn the worker thread and return the session-facing handle.
    /// `h264_adapter` is `None` for sessions negotiated as RFX/JPEG/GFX
    /// only — the worker never touches it unless `config.codec ==
    /// CodecKind::H264` or a GFX stream dispatches into the H.264 path.
    pub fn new(config: EncoderConfig, h264_adapter: Box<dyn CodecAdapter + Send>) -> Self {
        let (producer, consumer, term_tx) = queue::channel();
        let (term_done_tx, term_done_rx) = crossbeam_channel::bounded(1);
        let worker_config = config.clone();

        let worker_handle = std::thread::Builder::new()
            .name("xrdp-gfx-encoder".to_string())
            .spawn(move || worker::run(consumer, worker_config, h264_adapter, term_done_tx))
            .expect("failed to spawn encoder worker thread");

        Self {
            producer,
            term_tx,
            term_done_rx,
            worker_handle: Some(worker_handle),
            config,
        }
    }

    /// Append a job to the queue. Never blocks (§4.1).
    pub fn submit(&self, job: EncJob) {
        self.producer.submit(job);
    }

    /// Non-blocking pop of the next completed result.
    pub fn poll_result(&self) -> Option<EncResult> {
        self.producer.poll_result()
    }

    pub fn frames_in_flight(&self) -> u32 {
        self.config.frames_in_flight
    }

    pub fn max_compressed_bytes(&self) -> u32 {
        self.config.max_compressed_bytes
    }
}

impl Drop for Encoder {
    /// Signal termination and wait up to 5 seconds for the worker's ack
    /// (§3.4, §5 Cancellation). Exceeding the deadline is a degraded
    /// path: the thread is abandoned, matching §9's note that this is a
    /// documented limitation, not a bug to paper over with a forced
    /// abort of an in-flight FFI call.
    fn drop(&mut self) {
        let _ = self.term_tx.send(());
        match self.term_done_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(()) => {
                if let Some(handle) = self.worker_handle.take() {
                    let _ = handle.join();
                }
            }
            Err(_) => {
                warn!("encoder worker did not acknowledge termination within 5s, abandoning thread");
            }
        }
    }
}
