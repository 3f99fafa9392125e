//! H.264 path (§4.4): AVC420 metablock framing plus either codec
//! invocation or an already-compressed bypass.

use crate::codecs::{round_up_16, ForceIdr, PixelFormat, SessionIndex, SourcePicture};
use crate::config::{self, MAX_METABLOCK_RECTS};
use crate::encoder::worker::WorkerState;
use crate::encoder::ColorSpace;
use crate::error::EncodeError;
use crate::queue::{EncResult, SurfaceJob};
use crate::rect::{EncJobFlags, Rect};
use crate::wire::{encode_avc420_metablock, Avc420QuantQuality};

/// Pick the rect list for the metablock: prefer dirty-rects unless they
/// exceed the 15-rect MS-RDPEGFX limit, in which case fall back to
/// copied-rects (§4.4, §8 Boundary behaviors). Rejects either list if it
/// exceeds the `16·1024` hard cap (§8 Boundary behaviors: `num_rects ∈
/// {…, 16·1024, 16·1024+1}`: reject above `16·1024`).
fn select_rects(job: &SurfaceJob) -> Result<&[Rect], EncodeError> {
    if job.drects.len() > config::MAX_RECTS || job.crects.len() > config::MAX_RECTS {
        return Err(EncodeError::MalformedFrame("rect array exceeds 16384-rect limit"));
    }
    if job.drects.len() <= MAX_METABLOCK_RECTS {
        Ok(&job.drects)
    } else {
        Ok(&job.crects)
    }
}

fn bounding_rect(rects: &[Rect]) -> Rect {
    rects
        .iter()
        .copied()
        .reduce(|acc, r| acc.union(&r))
        .unwrap_or(Rect::new(0, 0, 0, 0))
}

/// Session index used on single-monitor H.264 sessions. Multi-monitor
/// GFX streams pass their own index (§4.6); the plain surface-command
/// path always targets session 0.
const DEFAULT_SESSION: SessionIndex = 0;

fn pixel_format_for(color_space: ColorSpace) -> PixelFormat {
    match color_space {
        ColorSpace::Nv12 => PixelFormat::Nv12,
        ColorSpace::Yuv444 | ColorSpace::Bgra => PixelFormat::I420,
    }
}

/// Split a tightly-packed planar buffer into the 2 (NV12) or 3 (I420)
/// plane slices an adapter expects, for the padded picture dimensions.
fn planes_for<'a>(format: PixelFormat, data: &'a [u8], width: u32, height: u32) -> Vec<&'a [u8]> {
    let luma_len = (width * height) as usize;
    match format {
        PixelFormat::Nv12 => {
            let chroma_len = luma_len / 2;
            vec![&data[..luma_len.min(data.len())], &data[luma_len.min(data.len())..(luma_len + chroma_len).min(data.len())]]
        }
        PixelFormat::I420 => {
            let chroma_len = luma_len / 4;
            let u_start = luma_len.min(data.len());
            let v_start = (luma_len + chroma_len).min(data.len());
            let v_end = (luma_len + 2 * chroma_len).min(data.len());
            vec![&data[..u_start], &data[u_start..v_start], &data[v_start..v_end]]
        }
    }
}

/// Process one surface job through the H.264 path (§4.4).
pub fn process(state: &mut WorkerState, job: &SurfaceJob) -> Result<Vec<EncResult>, EncodeError> {
    let rects = select_rects(job)?;
    let rect = bounding_rect(rects);

    let mut payload = Vec::new();

    if job.flags.contains(crate::rect::EncJobFlags::ALREADY_COMPRESSED) {
        if job.data.len() < 4 {
            return Err(EncodeError::MalformedFrame("already-compressed job missing length prefix"));
        }
        let len = u32::from_le_bytes([job.data[0], job.data[1], job.data[2], job.data[3]]) as usize;
        if len < 1 || len > state.config.max_compressed_bytes as usize {
            return Err(EncodeError::MalformedFrame("already-compressed length prefix out of range"));
        }
        if job.data.len() < 4 + len {
            return Err(EncodeError::MalformedFrame("already-compressed payload shorter than length prefix"));
        }
        encode_avc420_metablock(rects, Avc420QuantQuality::DEFAULT, &mut payload);
        payload.extend_from_slice(&job.data[4..4 + len]);
    } else {
        let padded_w = crate::codecs::round_up_16(job.width as u32);
        let padded_h = crate::codecs::round_up_16(job.height as u32);
        let format = pixel_format_for(state.config.color_space);
        let planes = planes_for(format, &job.data, padded_w, padded_h);
        let plane_refs: Vec<&[u8]> = planes.iter().map(|p| *p).collect();
        let picture = SourcePicture {
            format,
            width: job.width as u32,
            height: job.height as u32,
            planes: &plane_refs,
        };
        let force_idr = crate::codecs::ForceIdr(
            job.flags.contains(crate::rect::EncJobFlags::KEY_FRAME_REQUESTED),
        );

        encode_avc420_metablock(rects, Avc420QuantQuality::DEFAULT, &mut payload);
        state
            .h264_adapter
            .encode(DEFAULT_SESSION, &picture, force_idr, &mut payload)
            .map_err(EncodeError::Codec)?;
    }

    let mut comp_pad_data = vec![0u8; config::PAD_BYTES];
    comp_pad_data.extend_from_slice(&payload);

    Ok(vec![EncResult {
        comp_bytes: payload.len(),
        pad_bytes: config::PAD_BYTES,
        comp_pad_data,
        frame_id: job.frame_id,
        last: true,
        continuation: false,
        rect,
        flags: job.flags,
    }])
}

/// Session index for the chroma-444 auxiliary view of an AVC444v2
/// stream; the main YUV420 view always uses [`DEFAULT_SESSION`].
const AUX_SESSION: SessionIndex = 1;

/// Encode one AVC420 metablock + NAL sub-stream against the given
/// codec session, used for both the AVC444v2 main and auxiliary views.
fn encode_stream(
    state: &mut WorkerState,
    session: SessionIndex,
    rects: &[Rect],
    picture: &SourcePicture<'_>,
    force_idr: ForceIdr,
) -> Result<Vec<u8>, EncodeError> {
    let mut payload = Vec::new();
    encode_avc420_metablock(rects, Avc420QuantQuality::DEFAULT, &mut payload);
    state
        .h264_adapter
        .encode(session, picture, force_idr, &mut payload)
        .map_err(EncodeError::Codec)?;
    Ok(payload)
}

/// Process one surface job through the AVC444v2 dual-stream path
/// (§4.4, §6.4): a YUV420 main view plus a chroma-444 auxiliary view,
/// each framed as its own AVC420 metablock, concatenated behind the
/// `u32` length/LC header.
///
/// §9 Open Questions flags a source bug where the output buffer is
/// allocated from a byte count that isn't assigned until after the
/// allocation. Here the `max_compressed_bytes` cap is fixed up front
/// and both sub-streams are checked against it before concatenation,
/// so there's no allocate-before-size ordering to get wrong.
pub fn process_avc444(state: &mut WorkerState, job: &SurfaceJob) -> Result<Vec<EncResult>, EncodeError> {
    let rects = select_rects(job)?;
    let rect = bounding_rect(rects);
    let cap = state.config.max_compressed_bytes as usize;

    let padded_w = round_up_16(job.width as u32);
    let padded_h = round_up_16(job.height as u32);
    let planes = planes_for(PixelFormat::I420, &job.data, padded_w, padded_h);
    let plane_refs: Vec<&[u8]> = planes.iter().map(|p| *p).collect();
    let picture = SourcePicture {
        format: PixelFormat::I420,
        width: job.width as u32,
        height: job.height as u32,
        planes: &plane_refs,
    };
    let force_idr = ForceIdr(job.flags.contains(EncJobFlags::KEY_FRAME_REQUESTED));

    let stream1 = encode_stream(state, DEFAULT_SESSION, rects, &picture, force_idr)?;
    let stream2 = encode_stream(state, AUX_SESSION, rects, &picture, force_idr)?;

    if stream1.len() > cap || stream2.len() > cap {
        return Err(EncodeError::MalformedFrame("avc444 sub-stream exceeds max_compressed_bytes"));
    }

    let header = crate::wire::encode_avc444v2_header(stream1.len() as u32, crate::wire::LumaChroma::BothPresent)?;

    let mut payload = Vec::with_capacity(4 + stream1.len() + stream2.len());
    payload.extend_from_slice(&header.to_le_bytes());
    payload.extend_from_slice(&stream1);
    payload.extend_from_slice(&stream2);

    let mut comp_pad_data = vec![0u8; config::PAD_BYTES];
    comp_pad_data.extend_from_slice(&payload);

    Ok(vec![EncResult {
        comp_bytes: payload.len(),
        pad_bytes: config::PAD_BYTES,
        comp_pad_data,
        frame_id: job.frame_id,
        last: true,
        continuation: false,
        rect,
        flags: job.flags,
    }])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codecs::{CodecAdapter, ForceIdr};
    use crate::encoder::{CodecKind, EncoderConfig};
    use crate::error::CodecError;
    use crate::rect::EncJobFlags;

    struct DummyAdapter;
    impl CodecAdapter for DummyAdapter {
        fn name(&self) -> &'static str {
            "dummy"
        }
        fn encode(
            &mut self,
            _session: SessionIndex,
            _picture: &SourcePicture<'_>,
            _force_idr: ForceIdr,
            out: &mut Vec<u8>,
        ) -> Result<usize, CodecError> {
            out.extend_from_slice(&[0, 0, 0, 1, 0x67]);
            Ok(5)
        }
        fn close_session(&mut self, _session: SessionIndex) {}
    }

    fn test_state() -> WorkerState {
        let config = EncoderConfig::new(
            CodecKind::H264,
            ColorSpace::Nv12,
            crate::codecs::rfx::ConnectionTier::Lan,
        );
        WorkerState::new(config, Box::new(DummyAdapter))
    }

    #[test]
    fn select_rects_falls_back_to_crects_over_15_drects() {
        let mut job = SurfaceJob {
            data: vec![],
            width: 800,
            height: 600,
            drects: (0..16).map(|i| Rect::new(i, 0, 10, 10)).collect(),
            crects: vec![Rect::new(0, 0, 800, 600)],
            frame_id: None,
            flags: EncJobFlags::empty(),
        };
        assert_eq!(select_rects(&job).unwrap(), job.crects.as_slice());
        job.drects.truncate(15);
        assert_eq!(select_rects(&job).unwrap(), job.drects.as_slice());
    }

    #[test]
    fn select_rects_accepts_16384_rejects_16385() {
        let job_at_cap = SurfaceJob {
            data: vec![],
            width: 800,
            height: 600,
            drects: vec![Rect::new(0, 0, 1, 1); config::MAX_RECTS],
            crects: vec![Rect::new(0, 0, 1, 1); config::MAX_RECTS],
            frame_id: None,
            flags: EncJobFlags::empty(),
        };
        assert!(select_rects(&job_at_cap).is_ok());

        let job_over_cap = SurfaceJob {
            crects: vec![Rect::new(0, 0, 1, 1); config::MAX_RECTS + 1],
            ..job_at_cap
        };
        assert!(select_rects(&job_over_cap).is_err());
    }

    #[test]
    fn scenario_s1_single_frame_fresh_encoder() {
        let mut state = test_state();
        let job = SurfaceJob {
            data: vec![0u8; 800 * 600 * 2],
            width: 800,
            height: 600,
            drects: vec![Rect::new(0, 0, 800, 600)],
            crects: vec![],
            frame_id: None,
            flags: EncJobFlags::empty(),
        };
        let results = process(&mut state, &job).unwrap();
        assert_eq!(results.len(), 1);
        let r = &results[0];
        assert!(r.last);
        assert!(!r.continuation);
        assert_eq!(r.pad_bytes, config::PAD_BYTES);
        let payload = r.payload();
        assert_eq!(&payload[0..4], &1u32.to_le_bytes());
        assert_eq!(payload[12], 22);
        assert_eq!(payload[13], 100);
    }

    #[test]
    fn scenario_s5_already_compressed_bypasses_codec() {
        let mut state = test_state();
        let mut data = 5000u32.to_le_bytes().to_vec();
        data.extend(std::iter::repeat(0xABu8).take(5000));
        let job = SurfaceJob {
            data,
            width: 64,
            height: 64,
            drects: vec![Rect::new(0, 0, 64, 64)],
            crects: vec![],
            frame_id: Some(1),
            flags: EncJobFlags::ALREADY_COMPRESSED,
        };
        let results = process(&mut state, &job).unwrap();
        let payload = results[0].payload();
        let metablock_header_len = 4 + 8 + 2;
        assert_eq!(&payload[metablock_header_len..], &[0xABu8; 5000][..]);
    }

    #[test]
    fn already_compressed_rejects_length_prefix_over_max() {
        let mut state = test_state();
        let mut data = (500_000_000u32).to_le_bytes().to_vec();
        data.extend(std::iter::repeat(0xABu8).take(10));
        let job = SurfaceJob {
            data,
            width: 64,
            height: 64,
            drects: vec![Rect::new(0, 0, 64, 64)],
            crects: vec![],
            frame_id: Some(1),
            flags: EncJobFlags::ALREADY_COMPRESSED,
        };
        assert!(process(&mut state, &job).is_err());
    }

    #[test]
    fn avc444_header_encodes_stream1_length_and_both_present() {
        let config = EncoderConfig::new(
            CodecKind::H264,
            ColorSpace::Yuv444,
            crate::codecs::rfx::ConnectionTier::Lan,
        );
        let mut state = WorkerState::new(config, Box::new(DummyAdapter));
        let job = SurfaceJob {
            data: vec![0u8; 64 * 64 * 2],
            width: 64,
            height: 64,
            drects: vec![Rect::new(0, 0, 64, 64)],
            crects: vec![],
            frame_id: Some(3),
            flags: EncJobFlags::empty(),
        };
        let results = process_avc444(&mut state, &job).unwrap();
        assert_eq!(results.len(), 1);
        let payload = results[0].payload();

        let header = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let (len_stream1, lc) = crate::wire::decode_avc444v2_header(header).unwrap();
        assert!(matches!(lc, crate::wire::LumaChroma::BothPresent));

        // Testable Property 6: (bitstream & 0x3FFFFFFF) == len(stream1),
        // (bitstream >> 30) in {0,1,2}.
        assert_eq!(header & 0x3FFF_FFFF, len_stream1);
        assert!(header >> 30 <= 2);

        let stream1_start = 4usize;
        let stream2_start = stream1_start + len_stream1 as usize;
        assert_eq!(payload.len(), stream2_start + len_stream1 as usize);
    }
}
