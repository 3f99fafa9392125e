//! Software H.264 via the `x264` crate (§4.8).
//!
//! `preset=veryfast`, `tune=zerolatency`, `profile=high`, 24 fps,
//! single thread. Accepts NV12 (stride `round_up(width,16)`) or I420
//! (chroma stride `width/2`).

use std::collections::HashMap;

use crate::codecs::nal::rewrite_annex_b;
use crate::codecs::{round_up_16, CodecAdapter, ForceIdr, PixelFormat, SessionIndex, SourcePicture};
use crate::error::CodecError;

struct SubEncoder {
    inner: x264::Encoder,
    width: u32,
    height: u32,
    format: PixelFormat,
}

/// One `X264Adapter` holds up to 16 per-session sub-encoders (§4.8).
#[derive(Default)]
pub struct X264Adapter {
    sessions: HashMap<SessionIndex, SubEncoder>,
}

impl X264Adapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn colorspace(format: PixelFormat) -> x264::Colorspace {
        match format {
            PixelFormat::Nv12 => x264::Colorspace::NV12,
            PixelFormat::I420 => x264::Colorspace::I420,
        }
    }

    fn open(&self, width: u32, height: u32, format: PixelFormat) -> Result<SubEncoder, CodecError> {
        let padded_w = round_up_16(width);
        let padded_h = round_up_16(height);
        let inner = x264::Setup::preset(x264::Preset::VeryFast, x264::Tune::ZeroLatency, false, false)
            .fps(24, 1)
            .profile("high")
            .build(Self::colorspace(format), padded_w as i32, padded_h as i32)
            .map_err(|e| CodecError::InitFailed {
                backend: "x264",
                reason: format!("{e:?}"),
            })?;
        Ok(SubEncoder {
            inner,
            width: padded_w,
            height: padded_h,
            format,
        })
    }
}

impl CodecAdapter for X264Adapter {
    fn name(&self) -> &'static str {
        "x264"
    }

    fn encode(
        &mut self,
        session: SessionIndex,
        picture: &SourcePicture<'_>,
        force_idr: ForceIdr,
        out: &mut Vec<u8>,
    ) -> Result<usize, CodecError> {
        let needs_reopen = match self.sessions.get(&session) {
            Some(sub) => {
                sub.width != round_up_16(picture.width)
                    || sub.height != round_up_16(picture.height)
                    || sub.format != picture.format
            }
            None => true,
        };
        if needs_reopen {
            let sub = self.open(picture.width, picture.height, picture.format)?;
            self.sessions.insert(session, sub);
        }
        let sub = self.sessions.get_mut(&session).expect("just inserted");

        let image = x264::Image::new(Self::colorspace(sub.format), sub.width as i32, sub.height as i32, picture.planes);
        let (data, _picture_info) = sub
            .inner
            .encode(if force_idr.0 { Some(x264::NalType::SliceIdr) } else { None }, image)
            .map_err(|_| {
                tracing::trace!(backend = "x264", "encode failed");
                CodecError::EncodeFailed {
                    backend: "x264",
                    status: -1,
                }
            })?;

        Ok(rewrite_annex_b(data.entirety(), out))
    }

    fn close_session(&mut self, session: SessionIndex) {
        self.sessions.remove(&session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colorspace_mapping_matches_pixel_format() {
        assert_eq!(X264Adapter::colorspace(PixelFormat::Nv12), x264::Colorspace::NV12);
        assert_eq!(X264Adapter::colorspace(PixelFormat::I420), x264::Colorspace::I420);
    }
}
