//! RDPGFX wire framing: command headers, AVC420 metablocks and the
//! AVC444v2 dual-stream header (§6.2–§6.4).
//!
//! These are pure encode/decode functions over `&[u8]`/`Vec<u8>` — no
//! I/O, no state — exactly the shape the teacher uses for its own
//! protocol structs (see `protocol/pdu.rs`'s read/write pairs).

use crate::error::EncodeError;
use crate::rect::Rect;

/// Minimum and maximum `cmd_bytes` for one RDPGFX command (§4.6, §6.2).
pub const CMD_BYTES_MIN: u32 = 8;
pub const CMD_BYTES_MAX: u32 = 32768;

/// `{cmd_id: u16 LE, flags: u16 LE, cmd_bytes: u32 LE}` header, §6.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmdHeader {
    pub cmd_id: u16,
    pub flags: u16,
    /// Total bytes covered by this command, header included.
    pub cmd_bytes: u32,
}

impl CmdHeader {
    pub const WIRE_LEN: usize = 8;

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.cmd_id.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.cmd_bytes.to_le_bytes());
    }

    /// Parse one header from the front of `buf`, validating `cmd_bytes`
    /// against the `[8, 32768]` range from §6.2/§8 (Boundary behaviors).
    pub fn decode(buf: &[u8]) -> Result<Self, EncodeError> {
        if buf.len() < Self::WIRE_LEN {
            return Err(EncodeError::MalformedFrame("command header truncated"));
        }
        let cmd_id = u16::from_le_bytes([buf[0], buf[1]]);
        let flags = u16::from_le_bytes([buf[2], buf[3]]);
        let cmd_bytes = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        if !(CMD_BYTES_MIN..=CMD_BYTES_MAX).contains(&cmd_bytes) {
            return Err(EncodeError::MalformedFrame("cmd_bytes out of [8, 32768]"));
        }
        Ok(Self {
            cmd_id,
            flags,
            cmd_bytes,
        })
    }
}

/// Recognized RDPGFX command IDs (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdId {
    WireToSurface1,
    WireToSurface2,
    SolidFill,
    SurfaceToSurface,
    CreateSurface,
    DeleteSurface,
    StartFrame,
    EndFrame,
    ResetGraphics,
    MapSurfaceToOutput,
    Unrecognized(u16),
}

impl From<u16> for CmdId {
    fn from(id: u16) -> Self {
        match id {
            0x0001 => Self::WireToSurface1,
            0x0002 => Self::WireToSurface2,
            0x0004 => Self::SolidFill,
            0x0005 => Self::SurfaceToSurface,
            0x0009 => Self::CreateSurface,
            0x000A => Self::DeleteSurface,
            0x000B => Self::StartFrame,
            0x000C => Self::EndFrame,
            0x000E => Self::ResetGraphics,
            0x000F => Self::MapSurfaceToOutput,
            other => Self::Unrecognized(other),
        }
    }
}

/// Per-rect QP/quality byte pair: `p<<7 | r<<6 | qp[6]` then a separate
/// quality byte (§4.4). The spec's default encode always uses p=0, r=0,
/// qp=22, quality=100.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Avc420QuantQuality {
    pub progressive: bool,
    pub reserved_r: bool,
    pub qp: u8,
    pub quality: u8,
}

impl Avc420QuantQuality {
    /// The fixed quant/quality pair the spec uses for every region rect.
    pub const DEFAULT: Self = Self {
        progressive: false,
        reserved_r: false,
        qp: 22,
        quality: 100,
    };

    fn encode_byte(&self) -> u8 {
        let p = if self.progressive { 1u8 } else { 0 };
        let r = if self.reserved_r { 1u8 } else { 0 };
        (p << 7) | (r << 6) | (self.qp & 0x3F)
    }

    fn decode_byte(byte: u8) -> Self {
        Self {
            progressive: byte & 0x80 != 0,
            reserved_r: byte & 0x40 != 0,
            qp: byte & 0x3F,
            quality: 0,
        }
    }
}

/// Encode the AVC420 metablock header (§6.3): rect count, two-corner
/// rects, then quant/quality byte pairs. The NAL stream itself is
/// appended by the caller.
pub fn encode_avc420_metablock(rects: &[Rect], quant: Avc420QuantQuality, out: &mut Vec<u8>) {
    out.extend_from_slice(&(rects.len() as u32).to_le_bytes());
    for rect in rects {
        let e = rect.to_egfx();
        out.extend_from_slice(&e.x1.to_le_bytes());
        out.extend_from_slice(&e.y1.to_le_bytes());
        out.extend_from_slice(&e.x2.to_le_bytes());
        out.extend_from_slice(&e.y2.to_le_bytes());
    }
    for _ in rects {
        out.push(quant.encode_byte());
        out.push(quant.quality);
    }
}

/// Decoded metablock: the rect list plus quant/quality per rect, and
/// the byte offset where the NAL stream begins.
pub struct Avc420Metablock {
    pub rects: Vec<(Rect, Avc420QuantQuality)>,
    pub nal_offset: usize,
}

/// Decode a metablock previously produced by [`encode_avc420_metablock`].
pub fn decode_avc420_metablock(buf: &[u8]) -> Result<Avc420Metablock, EncodeError> {
    if buf.len() < 4 {
        return Err(EncodeError::MalformedFrame("metablock truncated"));
    }
    let n = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    let rects_start = 4;
    let rects_len = n * 8;
    let quant_start = rects_start + rects_len;
    let quant_len = n * 2;
    let nal_offset = quant_start + quant_len;
    if buf.len() < nal_offset {
        return Err(EncodeError::MalformedFrame("metablock rect/quant region truncated"));
    }

    let mut rects = Vec::with_capacity(n);
    for i in 0..n {
        let base = rects_start + i * 8;
        let x1 = i16::from_le_bytes([buf[base], buf[base + 1]]);
        let y1 = i16::from_le_bytes([buf[base + 2], buf[base + 3]]);
        let x2 = i16::from_le_bytes([buf[base + 4], buf[base + 5]]);
        let y2 = i16::from_le_bytes([buf[base + 6], buf[base + 7]]);
        let rect = crate::rect::EgfxRect { x1, y1, x2, y2 }.to_rect();

        let qbase = quant_start + i * 2;
        let mut quant = Avc420QuantQuality::decode_byte(buf[qbase]);
        quant.quality = buf[qbase + 1];

        rects.push((rect, quant));
    }

    Ok(Avc420Metablock { rects, nal_offset })
}

/// `LC` field of the AVC444v2 header (§6.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LumaChroma {
    BothPresent,
    LumaOnly,
    ChromaOnly,
}

impl LumaChroma {
    fn bits(self) -> u32 {
        match self {
            Self::BothPresent => 0,
            Self::LumaOnly => 1,
            Self::ChromaOnly => 2,
        }
    }

    fn from_bits(bits: u32) -> Result<Self, EncodeError> {
        match bits {
            0 => Ok(Self::BothPresent),
            1 => Ok(Self::LumaOnly),
            2 => Ok(Self::ChromaOnly),
            _ => Err(EncodeError::MalformedFrame("AVC444v2 LC field not in {0,1,2}")),
        }
    }
}

/// Encode the AVC444v2 leading `u32`: `(len_stream1 & 0x3FFFFFFF) | (LC << 30)`.
pub fn encode_avc444v2_header(len_stream1: u32, lc: LumaChroma) -> Result<u32, EncodeError> {
    if len_stream1 > 0x3FFF_FFFF {
        return Err(EncodeError::MalformedFrame("stream1 length exceeds 30 bits"));
    }
    Ok((len_stream1 & 0x3FFF_FFFF) | (lc.bits() << 30))
}

/// Decode the AVC444v2 leading `u32` back into `(len_stream1, LC)`.
pub fn decode_avc444v2_header(word: u32) -> Result<(u32, LumaChroma), EncodeError> {
    let len = word & 0x3FFF_FFFF;
    let lc = LumaChroma::from_bits(word >> 30)?;
    Ok((len, lc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmd_header_round_trips() {
        let h = CmdHeader {
            cmd_id: 0x0001,
            flags: 0,
            cmd_bytes: 128,
        };
        let mut buf = Vec::new();
        h.encode(&mut buf);
        assert_eq!(CmdHeader::decode(&buf).unwrap(), h);
    }

    #[test]
    fn cmd_bytes_boundaries_per_testable_property() {
        let mut buf = vec![0u8; 8];
        buf[4..8].copy_from_slice(&7u32.to_le_bytes());
        assert!(CmdHeader::decode(&buf).is_err());
        buf[4..8].copy_from_slice(&8u32.to_le_bytes());
        assert!(CmdHeader::decode(&buf).is_ok());
        buf[4..8].copy_from_slice(&32768u32.to_le_bytes());
        assert!(CmdHeader::decode(&buf).is_ok());
        buf[4..8].copy_from_slice(&32769u32.to_le_bytes());
        assert!(CmdHeader::decode(&buf).is_err());
    }

    #[test]
    fn metablock_round_trip_preserves_rects_and_quant() {
        let rects = vec![Rect::new(0, 0, 800, 600), Rect::new(10, 10, 64, 64)];
        let mut buf = Vec::new();
        encode_avc420_metablock(&rects, Avc420QuantQuality::DEFAULT, &mut buf);
        buf.extend_from_slice(&[0x00, 0x00, 0x00, 0x01, 0x67]);

        let decoded = decode_avc420_metablock(&buf).unwrap();
        let got: Vec<Rect> = decoded.rects.iter().map(|(r, _)| *r).collect();
        assert_eq!(got, rects);
        for (_, q) in &decoded.rects {
            assert_eq!(q.qp, 22);
            assert_eq!(q.quality, 100);
        }
        assert_eq!(&buf[decoded.nal_offset..decoded.nal_offset + 4], &[0, 0, 0, 1]);
    }

    #[test]
    fn avc444v2_header_round_trips_all_lc_values() {
        for (lc, bits) in [
            (LumaChroma::BothPresent, 0u32),
            (LumaChroma::LumaOnly, 1),
            (LumaChroma::ChromaOnly, 2),
        ] {
            let word = encode_avc444v2_header(12345, lc).unwrap();
            let (len, got_lc) = decode_avc444v2_header(word).unwrap();
            assert_eq!(len, 12345);
            assert_eq!(got_lc, lc);
            assert_eq!(word >> 30, bits);
        }
    }

    #[test]
    fn avc444v2_rejects_stream1_length_over_30_bits() {
        assert!(encode_avc444v2_header(0x4000_0000, LumaChroma::BothPresent).is_err());
    }

    #[test]
    fn single_rect_default_quant_matches_scenario_s1() {
        let rects = vec![Rect::new(0, 0, 800, 600)];
        let mut buf = Vec::new();
        encode_avc420_metablock(&rects, Avc420QuantQuality::DEFAULT, &mut buf);
        assert_eq!(&buf[0..4], &1u32.to_le_bytes());
        assert_eq!(&buf[4..12], &[0, 0, 0, 0, 800u16.to_le_bytes()[0], 800u16.to_le_bytes()[1], 600u16.to_le_bytes()[0], 600u16.to_le_bytes()[1]]);
        assert_eq!(buf[12], 22);
        assert_eq!(buf[13], 100);
    }
}
