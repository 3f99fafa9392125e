//! RemoteFX "calling contract" (§3.6, §4.8): hand-written FFI bindings
//! to `librfxcodec`, linked via `pkg-config` in `build.rs`.
//!
//! No maintained pure-Rust RemoteFX encoder exists in the ecosystem, so
//! (per the grounding rule that forbids fabricating dependencies) this
//! binds the real C library's actual entry points, named and shaped
//! exactly as `rfxcodec_encode_create`/`_encode_ex`/`_destroy` in
//! `examples/original_source/xrdp/xrdp_encoder.c`.

use std::os::raw::{c_char, c_int, c_void};

use crate::error::CodecError;
use crate::rect::Rect;

/// `RFX_FORMAT_YUV`, the only source format the encoder worker feeds in.
pub const RFX_FORMAT_YUV: c_int = 1;
/// Progressive key-frame flag, set on at most one pass per job (§4.3).
pub const RFX_FLAGS_PRO_KEY: c_int = 1 << 0;
pub const RFX_FLAGS_RLGR1: c_int = 1 << 1;
pub const RFX_FLAGS_PRO1: c_int = 1 << 2;

#[repr(C)]
struct RfxRect {
    x: i16,
    y: i16,
    cx: i16,
    cy: i16,
}

#[repr(C)]
struct RfxTile {
    x: i16,
    y: i16,
    quant_y: c_int,
    quant_cb: c_int,
    quant_cr: c_int,
}

#[allow(non_camel_case_types)]
type rfx_encoder_handle = *mut c_void;

extern "C" {
    fn rfxcodec_encode_create(
        width: c_int,
        height: c_int,
        format: c_int,
        flags: c_int,
    ) -> rfx_encoder_handle;

    fn rfxcodec_encode_destroy(handle: rfx_encoder_handle);

    fn rfxcodec_encode_ex(
        handle: rfx_encoder_handle,
        out_data: *mut c_char,
        out_data_bytes: *mut c_int,
        in_data: *const c_char,
        width: c_int,
        height: c_int,
        stride: c_int,
        rects: *const RfxRect,
        num_rects: c_int,
        tiles: *const RfxTile,
        num_tiles: c_int,
        quants: *const c_char,
        num_quants: c_int,
        flags: c_int,
    ) -> c_int;
}

/// Ultra-low, low and standard quantization tables selected from the
/// connection tier (§3.6). Values mirror the source's three fixed
/// tables; each row is `(y, cb, cr)` applied per tile.
pub const QUANT_ULTRA_LOW: [(u8, u8, u8); 1] = [(6, 7, 7)];
pub const QUANT_LOW: [(u8, u8, u8); 1] = [(5, 6, 6)];
pub const QUANT_STANDARD: [(u8, u8, u8); 1] = [(4, 4, 4)];

/// A connection tier as named in §3.6's mapping table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionTier {
    Modem,
    BroadbandLow,
    Satellite,
    BroadbandHigh,
    Wan,
    Lan,
    Autodetect,
}

/// Map a connection tier to its quantization table (§3.6).
pub fn quant_table_for_tier(tier: ConnectionTier) -> &'static [(u8, u8, u8)] {
    match tier {
        ConnectionTier::Modem | ConnectionTier::BroadbandLow | ConnectionTier::Satellite => &QUANT_ULTRA_LOW,
        ConnectionTier::BroadbandHigh | ConnectionTier::Wan => &QUANT_LOW,
        ConnectionTier::Lan | ConnectionTier::Autodetect => &QUANT_STANDARD,
    }
}

/// One tile-quant triple, paired with its tile rect for
/// `rfxcodec_encode_ex`'s `tiles` argument (§4.3 step 2).
#[derive(Debug, Clone, Copy)]
pub struct TileQuant {
    pub tile: Rect,
    pub quant_y: u8,
    pub quant_cb: u8,
    pub quant_cr: u8,
}

/// Populate tile-quant triples for every tile in `copied_tiles`, using
/// the session's quant indices (§4.3 step 2).
pub fn populate_tile_quants(copied_tiles: &[Rect], quant: (u8, u8, u8)) -> Vec<TileQuant> {
    copied_tiles
        .iter()
        .map(|&tile| TileQuant {
            tile,
            quant_y: quant.0,
            quant_cb: quant.1,
            quant_cr: quant.2,
        })
        .collect()
}

/// Safe wrapper over one `rfxcodec_encode_create`/`_destroy` pair.
/// Not `Send`/`Sync`: the session's single worker thread owns it
/// exclusively, consistent with §5's "codec adapters are not
/// thread-safe across sessions".
pub struct RfxEncoder {
    handle: rfx_encoder_handle,
}

impl RfxEncoder {
    /// Create a RemoteFX encoder for a surface/monitor of the given
    /// dimensions. `pro1` selects the progressive variant used by the
    /// GFX WireToSurface2 path (§4.6); the surface-command RFX path
    /// (§4.3) passes `pro1=false`.
    pub fn create(width: u16, height: u16, pro1: bool) -> Result<Self, CodecError> {
        let flags = if pro1 { RFX_FLAGS_RLGR1 | RFX_FLAGS_PRO1 } else { 0 };
        let handle = unsafe { rfxcodec_encode_create(width as c_int, height as c_int, RFX_FORMAT_YUV, flags) };
        if handle.is_null() {
            return Err(CodecError::InitFailed {
                backend: "rfx",
                reason: "rfxcodec_encode_create returned NULL".to_string(),
            });
        }
        Ok(Self { handle })
    }

    /// Encode one pass. `out_buf` must already be sized to the
    /// per-pass budget (§4.3 step 1); returns `(tiles_written,
    /// bytes_written)`, where `tiles_written == 0` means the output
    /// buffer was exhausted before any tile was written and a negative
    /// `tiles_written` is a hard codec error.
    #[allow(clippy::too_many_arguments)]
    pub fn encode(
        &mut self,
        out_buf: &mut [u8],
        in_data: &[u8],
        width: u16,
        height: u16,
        dirty_rects: &[Rect],
        tile_quants: &[TileQuant],
        quants: &[(u8, u8, u8)],
        flags: c_int,
    ) -> Result<(i32, usize), CodecError> {
        let stride = (((width as i32 + 63) & !63) * 4) as c_int;
        let rfx_rects: Vec<RfxRect> = dirty_rects
            .iter()
            .map(|r| RfxRect {
                x: r.x,
                y: r.y,
                cx: r.cx,
                cy: r.cy,
            })
            .collect();
        let rfx_tiles: Vec<RfxTile> = tile_quants
            .iter()
            .map(|t| RfxTile {
                x: t.tile.x,
                y: t.tile.y,
                quant_y: t.quant_y as c_int,
                quant_cb: t.quant_cb as c_int,
                quant_cr: t.quant_cr as c_int,
            })
            .collect();
        let flat_quants: Vec<c_char> = quants
            .iter()
            .flat_map(|&(y, cb, cr)| [y as c_char, cb as c_char, cr as c_char])
            .collect();

        let mut out_bytes = out_buf.len() as c_int;
        let tiles_written = unsafe {
            rfxcodec_encode_ex(
                self.handle,
                out_buf.as_mut_ptr() as *mut c_char,
                &mut out_bytes,
                in_data.as_ptr() as *const c_char,
                width as c_int,
                height as c_int,
                stride,
                rfx_rects.as_ptr(),
                rfx_rects.len() as c_int,
                rfx_tiles.as_ptr(),
                rfx_tiles.len() as c_int,
                flat_quants.as_ptr(),
                quants.len() as c_int,
                flags,
            )
        };
        if tiles_written < 0 {
            return Err(CodecError::EncodeFailed {
                backend: "rfx",
                status: tiles_written,
            });
        }
        let bytes_written = (out_bytes.max(0) as usize).min(out_buf.len());
        Ok((tiles_written, bytes_written))
    }
}

impl Drop for RfxEncoder {
    fn drop(&mut self) {
        unsafe { rfxcodec_encode_destroy(self.handle) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quant_table_mapping_matches_tier_table() {
        assert_eq!(quant_table_for_tier(ConnectionTier::Modem), &QUANT_ULTRA_LOW);
        assert_eq!(quant_table_for_tier(ConnectionTier::Satellite), &QUANT_ULTRA_LOW);
        assert_eq!(quant_table_for_tier(ConnectionTier::Wan), &QUANT_LOW);
        assert_eq!(quant_table_for_tier(ConnectionTier::Lan), &QUANT_STANDARD);
        assert_eq!(quant_table_for_tier(ConnectionTier::Autodetect), &QUANT_STANDARD);
    }

    #[test]
    fn populate_tile_quants_pairs_every_tile() {
        let tiles = vec![Rect::new(0, 0, 64, 64), Rect::new(64, 0, 64, 64)];
        let out = populate_tile_quants(&tiles, (4, 4, 4));
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|t| (t.quant_y, t.quant_cb, t.quant_cr) == (4, 4, 4)));
    }
}
