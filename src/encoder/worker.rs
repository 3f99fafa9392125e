//! Worker thread body: wait, drain, dispatch, repeat (§4.2).

use std::collections::HashMap;

use crossbeam_channel::Sender;
use tracing::{error, trace};

use crate::codecs::rfx::RfxEncoder;
use crate::codecs::CodecAdapter;
use crate::encoder::{gfx, h264, jpeg, rfx, CodecKind, ColorSpace, EncoderConfig};
use crate::queue::{EncJob, EncResult, QueueConsumer, WorkerEvent};

/// Mutable state the worker carries across jobs within one session:
/// lazily-opened per-monitor RFX handles and the (optional) H.264
/// adapter chosen at construction.
pub(crate) struct WorkerState {
    pub config: EncoderConfig,
    pub h264_adapter: Box<dyn CodecAdapter + Send>,
    pub rfx_surface_handles: HashMap<u8, RfxEncoder>,
    pub rfx_gfx_handles: HashMap<u8, RfxEncoder>,
}

impl WorkerState {
    pub(crate) fn new(config: EncoderConfig, h264_adapter: Box<dyn CodecAdapter + Send>) -> Self {
        Self {
            config,
            h264_adapter,
            rfx_surface_handles: HashMap::new(),
            rfx_gfx_handles: HashMap::new(),
        }
    }

    /// Dispatch one job to this session's chosen codec path, returning
    /// at least one result — the key invariant in §7: every accepted
    /// job produces exactly one `last=true` result, even on error.
    fn process(&mut self, job: EncJob) -> Vec<EncResult> {
        let frame_id = match &job {
            EncJob::Surface(s) => s.frame_id,
            EncJob::Gfx(_) => None,
        };

        let outcome = match (self.config.codec, &job) {
            (CodecKind::H264, EncJob::Surface(surface)) => {
                // AVC444v2's dual YUV420/chroma-444 view is only meaningful
                // when the capture path negotiated full 4:4:4 chroma (§4.4);
                // everything else rides the single-stream AVC420 metablock.
                if self.config.color_space == ColorSpace::Yuv444 {
                    h264::process_avc444(self, surface)
                } else {
                    h264::process(self, surface)
                }
            }
            (CodecKind::Rfx, EncJob::Surface(surface)) => rfx::process(self, surface),
            (CodecKind::Jpeg, EncJob::Surface(surface)) => jpeg::process(surface),
            (CodecKind::Gfx, EncJob::Gfx(stream)) => gfx::process(self, stream),
            (kind, _) => {
                error!(?kind, "job shape does not match configured codec kind");
                Err(crate::error::EncodeError::MalformedFrame(
                    "job shape does not match the session's configured codec",
                ))
            }
        };

        match outcome {
            Ok(results) if !results.is_empty() => results,
            Ok(_) => vec![EncResult::empty(frame_id)],
            Err(e) => {
                trace!(error = ?e, "encode job failed, pushing empty result so the driver can ACK");
                vec![EncResult::empty(frame_id)]
            }
        }
    }
}

/// The worker thread's whole run: block for work or termination, drain,
/// dispatch, repeat; on termination, signal `term_done` and return.
pub fn run(
    consumer: QueueConsumer,
    config: EncoderConfig,
    h264_adapter: Box<dyn CodecAdapter + Send>,
    term_done: Sender<()>,
) {
    let mut state = WorkerState::new(config, h264_adapter);
    loop {
        match consumer.wait_for_work() {
            WorkerEvent::Terminate => {
                let _ = term_done.send(());
                return;
            }
            WorkerEvent::WorkAvailable(first) => {
                let mut jobs = vec![first];
                jobs.extend(consumer.drain_jobs());
                for job in jobs {
                    for result in state.process(job) {
                        consumer.push_result(result);
                    }
                }
            }
        }
    }
}
