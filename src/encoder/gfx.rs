//! GFX multiplexer (§4.6): parses an inbound stream of RDPGFX commands
//! and dispatches each to the H.264 path, the progressive-RFX path, or
//! straight-through forwarding.

use crate::codecs::rfx::{populate_tile_quants, RfxEncoder, RFX_FLAGS_PRO_KEY};
use crate::config;
use crate::encoder::worker::WorkerState;
use crate::error::EncodeError;
use crate::queue::{EncResult, GfxJob, SurfaceJob};
use crate::rect::{EgfxRect, EncJobFlags, Rect};
use crate::wire::CmdHeader;

/// `WireToSurface1` body, parsed out of the command stream: surface and
/// codec identifiers, the dirty/copied-rect arrays and destination
/// rect, followed by the raw source picture bytes that fill out the
/// rest of the command.
struct WireToSurface1<'a> {
    surface_id: u16,
    codec_id: u16,
    pixel_format: u8,
    flags: u8,
    drects: Vec<Rect>,
    crects: Vec<Rect>,
    dest: Rect,
    picture: &'a [u8],
}

fn read_u16(buf: &[u8], offset: &mut usize) -> Result<u16, EncodeError> {
    if buf.len() < *offset + 2 {
        return Err(EncodeError::MalformedFrame("command body truncated reading u16"));
    }
    let v = u16::from_le_bytes([buf[*offset], buf[*offset + 1]]);
    *offset += 2;
    Ok(v)
}

fn read_u8(buf: &[u8], offset: &mut usize) -> Result<u8, EncodeError> {
    if buf.len() < *offset + 1 {
        return Err(EncodeError::MalformedFrame("command body truncated reading u8"));
    }
    let v = buf[*offset];
    *offset += 1;
    Ok(v)
}

fn read_rect_array(buf: &[u8], offset: &mut usize) -> Result<Vec<Rect>, EncodeError> {
    let count = read_u16(buf, offset)? as usize;
    if count > config::MAX_RECTS {
        return Err(EncodeError::MalformedFrame("rect array exceeds 16384-rect limit"));
    }
    let mut rects = Vec::with_capacity(count);
    for _ in 0..count {
        let x1 = read_u16(buf, offset)? as i16;
        let y1 = read_u16(buf, offset)? as i16;
        let x2 = read_u16(buf, offset)? as i16;
        let y2 = read_u16(buf, offset)? as i16;
        rects.push(EgfxRect { x1, y1, x2, y2 }.to_rect());
    }
    Ok(rects)
}

impl<'a> WireToSurface1<'a> {
    fn parse(body: &'a [u8]) -> Result<Self, EncodeError> {
        let mut offset = 0usize;
        let surface_id = read_u16(body, &mut offset)?;
        let codec_id = read_u16(body, &mut offset)?;
        let pixel_format = read_u8(body, &mut offset)?;
        let flags = read_u8(body, &mut offset)?;
        let drects = read_rect_array(body, &mut offset)?;
        let crects = read_rect_array(body, &mut offset)?;
        let x1 = read_u16(body, &mut offset)? as i16;
        let y1 = read_u16(body, &mut offset)? as i16;
        let x2 = read_u16(body, &mut offset)? as i16;
        let y2 = read_u16(body, &mut offset)? as i16;
        let dest = EgfxRect { x1, y1, x2, y2 }.to_rect();
        Ok(Self {
            surface_id,
            codec_id,
            pixel_format,
            flags,
            drects,
            crects,
            dest,
            picture: &body[offset..],
        })
    }
}

/// Pull the destination width/height and raw picture bytes out of a
/// `WireToSurface1` command body, for callers that need to speculatively
/// encode without going through the full job queue (§4.7, used by the
/// `accel-assist` binary's [`crate::splicer::messages::SpeculativeEncoder`]).
pub fn wire_to_surface1_picture(body: &[u8]) -> Result<(u16, u16, &[u8]), EncodeError> {
    let parsed = WireToSurface1::parse(body)?;
    let width = (parsed.dest.right() - parsed.dest.x as i32) as u16;
    let height = (parsed.dest.bottom() - parsed.dest.y as i32) as u16;
    Ok((width, height, parsed.picture))
}

struct WireToSurface2<'a> {
    surface_id: u16,
    codec_id: u16,
    mon_index: u8,
    width: u16,
    height: u16,
    picture: &'a [u8],
}

impl<'a> WireToSurface2<'a> {
    fn parse(body: &'a [u8], flags: u16) -> Result<Self, EncodeError> {
        let mut offset = 0usize;
        let surface_id = read_u16(body, &mut offset)?;
        let codec_id = read_u16(body, &mut offset)?;
        let width = read_u16(body, &mut offset)?;
        let height = read_u16(body, &mut offset)?;
        // Per-monitor RFX handle index, top four bits of the command's
        // flags word (§4.6).
        let mon_index = ((flags >> 12) & 0xF) as u8;
        Ok(Self {
            surface_id,
            codec_id,
            mon_index,
            width,
            height,
            picture: &body[offset..],
        })
    }
}

/// Forward a command verbatim: its entire header+body becomes one
/// result's payload, unmodified (SolidFill, SurfaceToSurface,
/// CreateSurface, DeleteSurface, StartFrame, EndFrame, ResetGraphics,
/// MapSurfaceToOutput).
fn forward_verbatim(raw: &[u8], frame_id: Option<u32>, last: bool) -> EncResult {
    let mut comp_pad_data = vec![0u8; config::PAD_BYTES];
    comp_pad_data.extend_from_slice(raw);
    EncResult {
        comp_bytes: raw.len(),
        pad_bytes: config::PAD_BYTES,
        comp_pad_data,
        frame_id,
        last,
        continuation: false,
        rect: Rect::new(0, 0, 0, 0),
        flags: EncJobFlags::empty(),
    }
}

fn process_wire_to_surface1(
    state: &mut WorkerState,
    body: &[u8],
    last: bool,
) -> Result<Vec<EncResult>, EncodeError> {
    let parsed = WireToSurface1::parse(body)?;
    let job = SurfaceJob {
        data: parsed.picture.to_vec(),
        width: (parsed.dest.right() - parsed.dest.x as i32) as u16,
        height: (parsed.dest.bottom() - parsed.dest.y as i32) as u16,
        drects: if parsed.drects.len() <= config::MAX_METABLOCK_RECTS {
            parsed.drects
        } else {
            parsed.crects.clone()
        },
        crects: parsed.crects,
        frame_id: None,
        flags: EncJobFlags::empty(),
    };
    let _ = (parsed.surface_id, parsed.codec_id, parsed.pixel_format, parsed.flags);
    let mut results = super::h264::process(state, &job)?;
    if let Some(result) = results.last_mut() {
        result.last = last;
    }
    Ok(results)
}

fn process_wire_to_surface2(
    state: &mut WorkerState,
    body: &[u8],
    flags: u16,
) -> Result<Vec<EncResult>, EncodeError> {
    let parsed = WireToSurface2::parse(body, flags)?;
    let _ = (parsed.surface_id, parsed.codec_id);

    if !state.rfx_gfx_handles.contains_key(&parsed.mon_index) {
        let handle = RfxEncoder::create(parsed.width, parsed.height, true).map_err(EncodeError::Codec)?;
        state.rfx_gfx_handles.insert(parsed.mon_index, handle);
    }
    let handle = state.rfx_gfx_handles.get_mut(&parsed.mon_index).expect("just inserted");

    let whole = Rect::new(0, 0, parsed.width as i16, parsed.height as i16);
    let tiles = populate_tile_quants(&whole.iter_tiles(64).collect::<Vec<_>>(), state.config.quant);
    let quants = [state.config.quant];
    let dirty = [whole];

    let mut results = Vec::new();
    let mut remaining = tiles.as_slice();
    let mut pass = 0usize;
    loop {
        let mut out_buf = vec![0u8; state.config.max_compressed_bytes as usize];
        let (tiles_written, bytes_written) = handle.encode(
            &mut out_buf,
            parsed.picture,
            parsed.width,
            parsed.height,
            &dirty,
            remaining,
            &quants,
            if pass == 0 { RFX_FLAGS_PRO_KEY } else { 0 },
        )?;
        if tiles_written <= 0 {
            break;
        }
        let written = tiles_written as usize;
        let is_last = written >= remaining.len();

        let mut comp_pad_data = vec![0u8; config::PAD_BYTES];
        comp_pad_data.extend_from_slice(&out_buf[..bytes_written]);
        results.push(EncResult {
            comp_bytes: bytes_written,
            pad_bytes: config::PAD_BYTES,
            comp_pad_data,
            frame_id: None,
            last: is_last,
            continuation: pass > 0,
            rect: whole,
            flags: EncJobFlags::empty(),
        });
        pass += 1;
        if is_last {
            break;
        }
        remaining = &remaining[written..];
    }
    Ok(results)
}

/// Process one inbound RDPGFX command stream (§4.6).
pub fn process(state: &mut WorkerState, job: &GfxJob) -> Result<Vec<EncResult>, EncodeError> {
    let mut results = Vec::new();
    let mut offset = 0usize;
    let mut end_frame_id: Option<u32> = None;

    while offset < job.stream.len() {
        let header = CmdHeader::decode(&job.stream[offset..])?;
        let total = header.cmd_bytes as usize;
        if job.stream.len() < offset + total {
            return Err(EncodeError::MalformedFrame("command body shorter than cmd_bytes"));
        }
        let body = &job.stream[offset + CmdHeader::WIRE_LEN..offset + total];
        let is_last_command = offset + total >= job.stream.len();

        match crate::wire::CmdId::from(header.cmd_id) {
            crate::wire::CmdId::WireToSurface1 => {
                results.extend(process_wire_to_surface1(state, body, is_last_command)?);
            }
            crate::wire::CmdId::WireToSurface2 => {
                results.extend(process_wire_to_surface2(state, body, header.flags)?);
            }
            crate::wire::CmdId::EndFrame => {
                if body.len() >= 4 {
                    end_frame_id = Some(u32::from_le_bytes([body[0], body[1], body[2], body[3]]));
                }
                results.push(forward_verbatim(&job.stream[offset..offset + total], end_frame_id, is_last_command));
            }
            crate::wire::CmdId::SolidFill
            | crate::wire::CmdId::SurfaceToSurface
            | crate::wire::CmdId::CreateSurface
            | crate::wire::CmdId::DeleteSurface
            | crate::wire::CmdId::StartFrame
            | crate::wire::CmdId::ResetGraphics
            | crate::wire::CmdId::MapSurfaceToOutput => {
                results.push(forward_verbatim(&job.stream[offset..offset + total], None, is_last_command));
            }
            crate::wire::CmdId::Unrecognized(id) => {
                tracing::trace!(cmd_id = id, "skipping unrecognized gfx command");
            }
        }

        offset += total;
    }

    if let Some(last) = results.last_mut() {
        last.last = true;
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::CmdId;

    fn forward_only_command(cmd_id: u16, body_extra: &[u8]) -> Vec<u8> {
        let body_len = body_extra.len();
        let mut stream = Vec::new();
        let header = CmdHeader {
            cmd_id,
            flags: 0,
            cmd_bytes: (CmdHeader::WIRE_LEN + body_len) as u32,
        };
        header.encode(&mut stream);
        stream.extend_from_slice(body_extra);
        stream
    }

    #[test]
    fn cmd_id_mapping_matches_table() {
        assert!(matches!(CmdId::from(0x0001), CmdId::WireToSurface1));
        assert!(matches!(CmdId::from(0x000C), CmdId::EndFrame));
        assert!(matches!(CmdId::from(0x000E), CmdId::ResetGraphics));
        assert!(matches!(CmdId::from(0xFFFF), CmdId::Unrecognized(0xFFFF)));
    }

    #[test]
    fn scenario_s2_start_wire_end_frame_sequence() {
        use crate::codecs::{CodecAdapter, ForceIdr, SessionIndex, SourcePicture};
        use crate::encoder::worker::WorkerState;
        use crate::encoder::{CodecKind, EncoderConfig};
        use crate::error::CodecError;

        struct DummyAdapter;
        impl CodecAdapter for DummyAdapter {
            fn name(&self) -> &'static str {
                "dummy"
            }
            fn encode(
                &mut self,
                _s: SessionIndex,
                _p: &SourcePicture<'_>,
                _f: ForceIdr,
                out: &mut Vec<u8>,
            ) -> Result<usize, CodecError> {
                out.extend_from_slice(&[0, 0, 0, 1, 0x67]);
                Ok(5)
            }
            fn close_session(&mut self, _s: SessionIndex) {}
        }

        let config = EncoderConfig::new(
            CodecKind::Gfx,
            crate::encoder::ColorSpace::Nv12,
            crate::codecs::rfx::ConnectionTier::Lan,
        );
        let mut state = WorkerState::new(config, Box::new(DummyAdapter));

        let start_frame = forward_only_command(0x000B, &[]);

        let mut w2s1_body = Vec::new();
        w2s1_body.extend_from_slice(&1u16.to_le_bytes()); // surface_id
        w2s1_body.extend_from_slice(&3u16.to_le_bytes()); // codec_id
        w2s1_body.push(0); // pixel_format
        w2s1_body.push(0); // flags
        w2s1_body.extend_from_slice(&1u16.to_le_bytes()); // num drects
        w2s1_body.extend_from_slice(&0u16.to_le_bytes());
        w2s1_body.extend_from_slice(&0u16.to_le_bytes());
        w2s1_body.extend_from_slice(&64u16.to_le_bytes());
        w2s1_body.extend_from_slice(&64u16.to_le_bytes());
        w2s1_body.extend_from_slice(&0u16.to_le_bytes()); // num crects
        w2s1_body.extend_from_slice(&0u16.to_le_bytes()); // dest x1
        w2s1_body.extend_from_slice(&0u16.to_le_bytes()); // dest y1
        w2s1_body.extend_from_slice(&64u16.to_le_bytes()); // dest x2
        w2s1_body.extend_from_slice(&64u16.to_le_bytes()); // dest y2
        w2s1_body.extend(std::iter::repeat(0u8).take(64 * 64 * 2));
        let wire_to_surface1 = forward_only_command(0x0001, &w2s1_body);

        let mut end_body = Vec::new();
        end_body.extend_from_slice(&42u32.to_le_bytes());
        let end_frame = forward_only_command(0x000C, &end_body);

        let mut stream = Vec::new();
        stream.extend(start_frame);
        stream.extend(wire_to_surface1);
        stream.extend(end_frame);

        let results = process(&mut state, &GfxJob { stream }).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[2].frame_id, Some(42));
        assert!(results[2].last);
    }

    #[test]
    fn wire_to_surface1_picture_extracts_dest_dims_and_bytes() {
        let mut body = Vec::new();
        body.extend_from_slice(&1u16.to_le_bytes()); // surface_id
        body.extend_from_slice(&3u16.to_le_bytes()); // codec_id
        body.push(0); // pixel_format
        body.push(0); // flags
        body.extend_from_slice(&0u16.to_le_bytes()); // num drects
        body.extend_from_slice(&0u16.to_le_bytes()); // num crects
        body.extend_from_slice(&0u16.to_le_bytes()); // dest x1
        body.extend_from_slice(&0u16.to_le_bytes()); // dest y1
        body.extend_from_slice(&32u16.to_le_bytes()); // dest x2
        body.extend_from_slice(&16u16.to_le_bytes()); // dest y2
        body.extend_from_slice(&[0xAB; 6]);

        let (width, height, picture) = wire_to_surface1_picture(&body).unwrap();
        assert_eq!((width, height), (32, 16));
        assert_eq!(picture, &[0xAB; 6]);
    }

    #[test]
    fn read_rect_array_accepts_16384_rejects_16385() {
        let mut at_cap = (config::MAX_RECTS as u16).to_le_bytes().to_vec();
        at_cap.extend(std::iter::repeat(0u8).take(config::MAX_RECTS * 8));
        let mut offset = 0usize;
        assert_eq!(read_rect_array(&at_cap, &mut offset).unwrap().len(), config::MAX_RECTS);

        let over_cap = (config::MAX_RECTS as u16 + 1).to_le_bytes().to_vec();
        let mut offset = 0usize;
        assert!(read_rect_array(&over_cap, &mut offset).is_err());
    }
}
