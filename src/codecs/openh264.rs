//! Software H.264 via the `openh264` crate (§4.8).
//!
//! Picture geometry rounded to 16, I420, single spatial layer,
//! `SCREEN_CONTENT_REAL_TIME` usage, bitrate-mode rate control at
//! 2 Mbit/s, max-ref=1. Sub-16 dimensions are rejected outright (the
//! encoder cannot produce a valid picture below one macroblock).
//!
//! Grounded in the teacher's `egfx/encoder.rs` `Avc420Encoder`, which
//! wraps the same crate with the same per-session reopen-on-resize
//! behavior; this adapter generalizes it to the multi-session handle
//! shape §4.8 requires.

use std::collections::HashMap;

use openh264::encoder::{EncoderConfig, RateControlMode, UsageType};
use openh264::formats::YUVSource;

use crate::codecs::nal::rewrite_annex_b;
use crate::codecs::{round_up_16, CodecAdapter, ForceIdr, PixelFormat, SessionIndex, SourcePicture};
use crate::error::CodecError;

const BITRATE_BPS: u32 = 2_000_000;

struct SubEncoder {
    inner: openh264::encoder::Encoder,
    width: u32,
    height: u32,
}

/// One `OpenH264Adapter` holds up to 16 per-session sub-encoders, one
/// per monitor, opened lazily on first use (§4.8).
#[derive(Default)]
pub struct OpenH264Adapter {
    sessions: HashMap<SessionIndex, SubEncoder>,
}

impl OpenH264Adapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn open(&self, width: u32, height: u32) -> Result<SubEncoder, CodecError> {
        if width < 16 || height < 16 {
            return Err(CodecError::InvalidDimensions {
                backend: "openh264",
                width,
                height,
            });
        }
        let padded_w = round_up_16(width);
        let padded_h = round_up_16(height);
        let config = EncoderConfig::new()
            .usage_type(UsageType::ScreenContentRealTime)
            .rate_control_mode(RateControlMode::Bitrate)
            .bitrate(openh264::encoder::BitRate::from_bps(BITRATE_BPS))
            .max_frame_rate(openh264::encoder::FrameRate::from_hz(24.0));
        let inner = openh264::encoder::Encoder::with_api_config(openh264::OpenH264API::from_source(), config)
            .map_err(|e| CodecError::InitFailed {
                backend: "openh264",
                reason: format!("{e:?}"),
            })?;
        Ok(SubEncoder {
            inner,
            width: padded_w,
            height: padded_h,
        })
    }
}

/// Adapts a borrowed I420 [`SourcePicture`] to the `YUVSource` trait
/// the `openh264` crate's encoder expects.
struct I420Source<'a> {
    width: u32,
    height: u32,
    planes: &'a [&'a [u8]],
}

impl<'a> YUVSource for I420Source<'a> {
    fn width(&self) -> i32 {
        self.width as i32
    }
    fn height(&self) -> i32 {
        self.height as i32
    }
    fn y(&self) -> &[u8] {
        self.planes[0]
    }
    fn u(&self) -> &[u8] {
        self.planes[1]
    }
    fn v(&self) -> &[u8] {
        self.planes[2]
    }
    fn y_stride(&self) -> i32 {
        self.width as i32
    }
    fn u_stride(&self) -> i32 {
        (self.width as i32 + 1) / 2
    }
    fn v_stride(&self) -> i32 {
        (self.width as i32 + 1) / 2
    }
}

impl CodecAdapter for OpenH264Adapter {
    fn name(&self) -> &'static str {
        "openh264"
    }

    fn encode(
        &mut self,
        session: SessionIndex,
        picture: &SourcePicture<'_>,
        force_idr: ForceIdr,
        out: &mut Vec<u8>,
    ) -> Result<usize, CodecError> {
        if picture.format != PixelFormat::I420 {
            return Err(CodecError::InitFailed {
                backend: "openh264",
                reason: "only I420 input is supported".to_string(),
            });
        }

        let needs_reopen = match self.sessions.get(&session) {
            Some(sub) => sub.width != round_up_16(picture.width) || sub.height != round_up_16(picture.height),
            None => true,
        };
        if needs_reopen {
            let sub = self.open(picture.width, picture.height)?;
            self.sessions.insert(session, sub);
        }
        let sub = self.sessions.get_mut(&session).expect("just inserted");

        if force_idr.0 {
            sub.inner.force_intra_frame();
        }

        let source = I420Source {
            width: sub.width,
            height: sub.height,
            planes: picture.planes,
        };
        let bitstream = sub.inner.encode(&source).map_err(|e| {
            tracing::trace!(error = ?e, "openh264 encode failed");
            CodecError::EncodeFailed {
                backend: "openh264",
                status: -1,
            }
        })?;

        let mut raw = Vec::new();
        bitstream.write_vec(&mut raw);
        Ok(rewrite_annex_b(&raw, out))
    }

    fn close_session(&mut self, session: SessionIndex) {
        self.sessions.remove(&session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_sub_16_dimensions() {
        let adapter = OpenH264Adapter::new();
        assert!(adapter.open(8, 8).is_err());
    }

    #[test]
    fn pads_dimensions_up_to_multiple_of_16() {
        // Construction of a real sub-encoder requires the native library;
        // this only checks the pure rounding logic `open` applies before
        // reaching the FFI boundary.
        assert_eq!(round_up_16(17), 32);
    }
}
