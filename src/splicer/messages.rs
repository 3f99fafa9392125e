//! Message type/subtype dispatch (§4.7).
//!
//! The splicer re-parses both socket directions' outer framing and
//! acts on a small set of recognized (type, subtype) pairs; everything
//! else is forwarded byte-for-byte.

use crate::error::SpliceError;
use crate::rect::Rect;
use crate::splicer::{ResizeState, XiState};

/// X-driver → RDP outer header: `{type, num, size}` (§6.1, §4.7).
#[derive(Debug, Clone, Copy)]
pub struct XorgOuterHeader {
    pub msg_type: u16,
    pub num: u16,
    pub size: u32,
}

impl XorgOuterHeader {
    pub fn decode(buf: &[u8]) -> Result<Self, SpliceError> {
        if buf.len() < 8 {
            return Err(SpliceError::MalformedFrame("xorg outer header truncated"));
        }
        Ok(Self {
            msg_type: u16::from_le_bytes([buf[0], buf[1]]),
            num: u16::from_le_bytes([buf[2], buf[3]]),
            size: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }
}

/// One X-driver sub-message: `{subtype, subsize, body}`.
#[derive(Debug, Clone, Copy)]
pub struct XorgSubHeader {
    pub subtype: u16,
    pub subsize: u16,
}

impl XorgSubHeader {
    pub const WIRE_LEN: usize = 4;

    pub fn decode(buf: &[u8]) -> Result<Self, SpliceError> {
        if buf.len() < Self::WIRE_LEN {
            return Err(SpliceError::MalformedFrame("xorg sub-message header truncated"));
        }
        Ok(Self {
            subtype: u16::from_le_bytes([buf[0], buf[1]]),
            subsize: u16::from_le_bytes([buf[2], buf[3]]),
        })
    }
}

/// RDP → X-driver outer header: `{len, msg1, msg2}` (§6.1, §4.7).
#[derive(Debug, Clone, Copy)]
pub struct RdpOuterHeader {
    pub len: u32,
    pub msg1: u16,
    pub msg2: u32,
}

impl RdpOuterHeader {
    pub fn decode(buf: &[u8]) -> Result<Self, SpliceError> {
        if buf.len() < 10 {
            return Err(SpliceError::MalformedFrame("rdp outer header truncated"));
        }
        Ok(Self {
            len: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            msg1: u16::from_le_bytes([buf[4], buf[5]]),
            msg2: u32::from_le_bytes([buf[6], buf[7], buf[8], buf[9]]),
        })
    }
}

/// Arbitrary cushion added to `xrdp_invalidate` so at least one key
/// frame reaches the client (§4.7).
const INVALIDATE_CUSHION: u32 = 10;

/// Handle one message travelling RDP → X-driver. Advances the resize
/// state machine and the invalidate counter; never produces output of
/// its own (this direction is always forwarded verbatim upstream).
pub fn handle_rdp_to_xorg(state: &XiState, header: RdpOuterHeader) {
    const MSG1_CLIENT: u16 = 103;
    const MSG2_INVALIDATE: u32 = 200;
    const MSG2_RESIZE: u32 = 300;

    if header.msg1 != MSG1_CLIENT {
        return;
    }
    match header.msg2 {
        MSG2_INVALIDATE => state.increment_invalidate(INVALIDATE_CUSHION),
        MSG2_RESIZE => state.begin_resize(),
        _ => {}
    }
}

/// Outcome of handling one X-driver sub-message: whether (and how) to
/// forward it to the RDP socket.
pub enum SubMessageAction {
    /// Forward the sub-message's bytes unchanged.
    ForwardVerbatim,
    /// Forward a rewritten body (flags/byte-count patched in place).
    ForwardRewritten(Vec<u8>),
    /// Drop the message: do not forward, do not advance any fd.
    Drop,
}

/// Speculative encode hook the splicer calls for subtype 62/64 paint
/// messages; implemented against the real GPU pipeline in the
/// `accel-assist` binary, and by a stub in tests.
pub trait SpeculativeEncoder {
    /// Encode the inner WireToSurface1 command's picture, returning the
    /// compressed byte count and whether the result is a key frame.
    fn encode(&mut self, inner_cmd_body: &[u8]) -> Result<(usize, bool), SpliceError>;
}

/// Bit 0 ("already compressed") and bit 1 (key-frame) of a rewritten
/// message's flags word (§4.7).
const FLAG_ALREADY_COMPRESSED: u16 = 1 << 0;
const FLAG_KEY_FRAME: u16 = 1 << 1;

/// Handle type 3 subtype 62 ("EGFX-with-shmfd"): re-parse the inner
/// RDPGFX stream and, for WireToSurface1, speculatively encode and set
/// the already-compressed flag.
pub fn handle_egfx_with_shmfd(
    encoder: &mut dyn SpeculativeEncoder,
    body: &mut [u8],
) -> Result<SubMessageAction, SpliceError> {
    let header = crate::wire::CmdHeader::decode(body)?;
    if !matches!(crate::wire::CmdId::from(header.cmd_id), crate::wire::CmdId::WireToSurface1) {
        return Ok(SubMessageAction::ForwardVerbatim);
    }

    let cmd_body = &body[crate::wire::CmdHeader::WIRE_LEN..header.cmd_bytes as usize];
    let (encoded_bytes, is_key_frame) = encoder.encode(cmd_body)?;

    let mut flags = header.flags;
    flags |= FLAG_ALREADY_COMPRESSED;
    if is_key_frame {
        flags |= FLAG_KEY_FRAME;
    }

    let mut rewritten = body.to_vec();
    rewritten[2..4].copy_from_slice(&flags.to_le_bytes());
    rewritten[4..8].copy_from_slice(&(encoded_bytes as u32).to_le_bytes());
    Ok(SubMessageAction::ForwardRewritten(rewritten))
}

/// Handle type 100 subtype 1 ("delete-all-pixmaps"): advance resize
/// state 1 → 2.
pub fn handle_delete_all_pixmaps(state: &XiState) {
    state.advance_resize_on_delete_pixmaps();
}

/// Handle type 100 subtype 2 ("create-pixmap"): advance resize state
/// 2 → 3.
pub fn handle_create_pixmap(state: &XiState) {
    state.advance_resize_on_create_pixmap();
}

/// Decide whether a type 3 subtype 64 paint-rect message should be
/// dropped because a resize is in progress (§4.7: "while resizing > 0,
/// paint-rect messages are dropped, except the gating frame-1
/// transition").
pub fn should_drop_paint_rect(state: &XiState, frame_id: Option<u32>) -> bool {
    if state.resize_state() == ResizeState::Idle {
        return false;
    }
    if state.resize_state() == ResizeState::AwaitingInvalidateGate
        && frame_id == Some(1)
        && state.invalidate_pending() > 0
    {
        return false;
    }
    true
}

/// Decode the rect lists carried by a type 3 subtype 64 body, ahead of
/// the embedded fd (§4.7).
pub fn decode_paint_rect_lists(body: &[u8]) -> Result<(Vec<Rect>, usize), SpliceError> {
    if body.len() < 2 {
        return Err(SpliceError::MalformedFrame("paint-rect body missing rect count"));
    }
    let count = u16::from_le_bytes([body[0], body[1]]) as usize;
    let needed = 2 + count * 8;
    if body.len() < needed {
        return Err(SpliceError::MalformedFrame("paint-rect body shorter than rect count implies"));
    }
    let mut rects = Vec::with_capacity(count);
    for i in 0..count {
        let base = 2 + i * 8;
        let x1 = i16::from_le_bytes([body[base], body[base + 1]]);
        let y1 = i16::from_le_bytes([body[base + 2], body[base + 3]]);
        let x2 = i16::from_le_bytes([body[base + 4], body[base + 5]]);
        let y2 = i16::from_le_bytes([body[base + 6], body[base + 7]]);
        rects.push(crate::rect::EgfxRect { x1, y1, x2, y2 }.to_rect());
    }
    Ok((rects, needed))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubEncoder {
        bytes: usize,
        key_frame: bool,
    }
    impl SpeculativeEncoder for StubEncoder {
        fn encode(&mut self, _inner: &[u8]) -> Result<(usize, bool), SpliceError> {
            Ok((self.bytes, self.key_frame))
        }
    }

    fn wire_to_surface1_command() -> Vec<u8> {
        let header = crate::wire::CmdHeader {
            cmd_id: 0x0001,
            flags: 0,
            cmd_bytes: 12,
        };
        let mut buf = Vec::new();
        header.encode(&mut buf);
        buf.extend_from_slice(&[0, 0, 0, 0]);
        buf
    }

    #[test]
    fn egfx_with_shmfd_sets_already_compressed_and_byte_count() {
        let mut body = wire_to_surface1_command();
        let mut encoder = StubEncoder { bytes: 777, key_frame: true };
        let action = handle_egfx_with_shmfd(&mut encoder, &mut body).unwrap();
        match action {
            SubMessageAction::ForwardRewritten(rewritten) => {
                let flags = u16::from_le_bytes([rewritten[2], rewritten[3]]);
                assert_eq!(flags & FLAG_ALREADY_COMPRESSED, FLAG_ALREADY_COMPRESSED);
                assert_eq!(flags & FLAG_KEY_FRAME, FLAG_KEY_FRAME);
                let bytes = u32::from_le_bytes([rewritten[4], rewritten[5], rewritten[6], rewritten[7]]);
                assert_eq!(bytes, 777);
            }
            _ => panic!("expected rewritten message"),
        }
    }

    #[test]
    fn non_wire_to_surface1_command_is_forwarded_verbatim() {
        let header = crate::wire::CmdHeader {
            cmd_id: 0x0004,
            flags: 0,
            cmd_bytes: 8,
        };
        let mut buf = Vec::new();
        header.encode(&mut buf);
        let mut encoder = StubEncoder { bytes: 0, key_frame: false };
        assert!(matches!(
            handle_egfx_with_shmfd(&mut encoder, &mut buf).unwrap(),
            SubMessageAction::ForwardVerbatim
        ));
    }

    #[test]
    fn decode_paint_rect_lists_parses_n_rects() {
        let mut body = 2u16.to_le_bytes().to_vec();
        body.extend_from_slice(&0u16.to_le_bytes());
        body.extend_from_slice(&0u16.to_le_bytes());
        body.extend_from_slice(&64u16.to_le_bytes());
        body.extend_from_slice(&64u16.to_le_bytes());
        body.extend_from_slice(&64u16.to_le_bytes());
        body.extend_from_slice(&0u16.to_le_bytes());
        body.extend_from_slice(&128u16.to_le_bytes());
        body.extend_from_slice(&64u16.to_le_bytes());

        let (rects, consumed) = decode_paint_rect_lists(&body).unwrap();
        assert_eq!(rects.len(), 2);
        assert_eq!(consumed, body.len());
    }

    #[test]
    fn paint_rect_dropped_while_resizing_except_gate() {
        let state = XiState::new();
        state.begin_resize();
        assert!(should_drop_paint_rect(&state, Some(7)));

        state.advance_resize_on_delete_pixmaps();
        state.advance_resize_on_create_pixmap();
        state.increment_invalidate(10);
        assert!(!should_drop_paint_rect(&state, Some(1)));
        assert!(should_drop_paint_rect(&state, Some(2)));
    }
}
