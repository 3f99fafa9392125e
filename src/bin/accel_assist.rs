//! `accel-assist`: the splicer process that sits between the X display
//! driver and the RDP session (§3.5, §4.7).
//!
//! Spawned by xorgxrdp with two inherited socket fds
//! (`XORGXRDP_XORG_FD`, `XORGXRDP_XRDP_FD`); everything else about its
//! configuration — log level, log path — comes from the environment
//! too, since there is no parent process around to hand it CLI flags.

use std::io::{Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::os::unix::net::UnixStream;

use tracing::{error, info, trace, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use xrdp_gfx_encoder::codecs::{CodecAdapter, ForceIdr, PixelFormat, SourcePicture};
use xrdp_gfx_encoder::encoder::gfx::wire_to_surface1_picture;
use xrdp_gfx_encoder::error::SpliceError;
use xrdp_gfx_encoder::splicer::messages::{
    handle_create_pixmap, handle_delete_all_pixmaps, handle_egfx_with_shmfd, handle_rdp_to_xorg,
    should_drop_paint_rect, RdpOuterHeader, SpeculativeEncoder, SubMessageAction, XorgOuterHeader,
    XorgSubHeader,
};
use xrdp_gfx_encoder::splicer::transport::{read_xorg_message, send_with_fd, write_rdp_message};
use xrdp_gfx_encoder::splicer::{fds_from_env, log_protocol_violation, wait_on_sockets, XiState};
use xrdp_gfx_encoder::codecs::round_up_16;
use xrdp_gfx_encoder::config;

/// Xorg sub-message type/subtype pairs the splicer recognizes; every
/// other combination is forwarded unexamined (§4.7).
const TYPE_EGFX: u16 = 3;
const SUBTYPE_EGFX_WITH_SHMFD: u16 = 62;
const SUBTYPE_POINTER_SHMFD: u16 = 63;
const SUBTYPE_PAINT_RECT: u16 = 64;
const TYPE_RESIZE: u16 = 100;
const SUBTYPE_DELETE_ALL_PIXMAPS: u16 = 1;
const SUBTYPE_CREATE_PIXMAP: u16 = 2;

/// The one `CodecAdapter` backend the splicer speculatively encodes
/// against. Picked at compile time from the same feature set as the
/// library; NVENC first since it is the accelerated path this process
/// exists for, falling back to the software backends when built
/// without it (§4.8).
fn build_adapter() -> Box<dyn CodecAdapter + Send> {
    #[cfg(feature = "nvenc")]
    {
        match xrdp_gfx_encoder::codecs::nvenc::NvencAdapter::new() {
            Ok(adapter) => return Box::new(adapter),
            Err(e) => warn!(error = %e, "NVENC unavailable, falling back to software encoder"),
        }
    }
    #[cfg(feature = "x264")]
    {
        return Box::new(xrdp_gfx_encoder::codecs::x264::X264Adapter::new());
    }
    #[cfg(feature = "openh264")]
    {
        return Box::new(xrdp_gfx_encoder::codecs::openh264::OpenH264Adapter::new());
    }
    #[allow(unreachable_code)]
    {
        panic!("accel-assist needs at least one of the nvenc/x264/openh264 features enabled");
    }
}

/// Session index the speculative path always encodes against; the
/// splicer handles exactly one surface, unlike the per-monitor encoder
/// worker (§4.8).
const SPECULATIVE_SESSION: xrdp_gfx_encoder::codecs::SessionIndex = 0;

/// Real [`SpeculativeEncoder`] wired to a `CodecAdapter` and the
/// splicer's resize/invalidate state (§4.7).
struct GpuSpeculativeEncoder<'a> {
    adapter: Box<dyn CodecAdapter + Send>,
    state: &'a XiState,
    max_compressed_bytes: usize,
    frame_count: u64,
}

impl<'a> GpuSpeculativeEncoder<'a> {
    fn new(adapter: Box<dyn CodecAdapter + Send>, state: &'a XiState) -> Self {
        Self {
            adapter,
            state,
            max_compressed_bytes: config::max_compressed_bytes_from_env() as usize,
            frame_count: 0,
        }
    }

    /// Split a packed NV12 buffer into its Y and interleaved-UV planes,
    /// the layout the GPU capture path hands off (§4.4).
    fn nv12_planes(data: &[u8], padded_w: u32, padded_h: u32) -> [&[u8]; 2] {
        let y_size = (padded_w * padded_h) as usize;
        let uv_size = (padded_w * padded_h / 2) as usize;
        let y_end = y_size.min(data.len());
        let uv_end = (y_size + uv_size).min(data.len());
        [&data[..y_end], &data[y_end..uv_end]]
    }

    fn contains_idr(nal_stream: &[u8]) -> bool {
        const NAL_TYPE_SLICE_IDR: u8 = 5;
        nal_stream
            .windows(4)
            .enumerate()
            .filter(|(_, w)| *w == [0, 0, 0, 1])
            .any(|(i, _)| nal_stream.get(i + 4).map(|b| b & 0x1F) == Some(NAL_TYPE_SLICE_IDR))
    }
}

impl<'a> SpeculativeEncoder for GpuSpeculativeEncoder<'a> {
    fn encode(&mut self, inner_cmd_body: &[u8]) -> Result<(usize, bool), SpliceError> {
        let (width, height, picture) =
            wire_to_surface1_picture(inner_cmd_body).map_err(SpliceError::Encode)?;
        let padded_w = round_up_16(width as u32);
        let padded_h = round_up_16(height as u32);
        let planes = Self::nv12_planes(picture, padded_w, padded_h);
        let source = SourcePicture {
            format: PixelFormat::Nv12,
            width: width as u32,
            height: height as u32,
            planes: &planes,
        };

        let force_idr = ForceIdr(self.state.force_idr_for_next_frame(self.frame_count));
        let mut nal_out = Vec::new();
        self.adapter
            .encode(SPECULATIVE_SESSION, &source, force_idr, &mut nal_out)
            .map_err(|e| SpliceError::Encode(xrdp_gfx_encoder::error::EncodeError::Codec(e)))?;

        if nal_out.len() > self.max_compressed_bytes {
            return Err(SpliceError::Encode(
                xrdp_gfx_encoder::error::EncodeError::MalformedFrame(
                    "speculative encode exceeds max_compressed_bytes",
                ),
            ));
        }

        self.frame_count += 1;
        if self.state.invalidate_pending() > 0 {
            self.state.decrement_invalidate();
        }
        let is_key_frame = force_idr.0 || Self::contains_idr(&nal_out);
        Ok((nal_out.len(), is_key_frame))
    }
}

fn init_logging() -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    let log_path = config::resolve_log_path();
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file_name = log_path
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("resolved log path has no file name: {log_path:?}"))?;
    let dir = log_path.parent().unwrap_or_else(|| std::path::Path::new("."));
    let file_appender = tracing_appender::rolling::never(dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::new(config::LogLevel::from_env().as_env_filter());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();
    Ok(guard)
}

/// Handle one ready X-driver sub-message, returning what to forward.
fn dispatch_xorg_submessage(
    encoder: &mut dyn SpeculativeEncoder,
    state: &XiState,
    header: XorgSubHeader,
    body: &mut [u8],
) -> Result<SubMessageAction, SpliceError> {
    match header.subtype {
        SUBTYPE_EGFX_WITH_SHMFD => handle_egfx_with_shmfd(encoder, body),
        // Pointer shmfd: hold-and-forward, no body rewrite (§4.7). The fd
        // itself is carried on `msg.fd` and forwarded by the
        // `ForwardVerbatim` arm in `relay_xorg_to_rdp`.
        SUBTYPE_POINTER_SHMFD => Ok(SubMessageAction::ForwardVerbatim),
        SUBTYPE_PAINT_RECT => {
            let (_rects, consumed) = xrdp_gfx_encoder::splicer::messages::decode_paint_rect_lists(body)?;
            let frame_id = body
                .get(consumed..consumed + 4)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]));
            if should_drop_paint_rect(state, frame_id) {
                Ok(SubMessageAction::Drop)
            } else {
                // The gating frame that let `should_drop_paint_rect` return
                // false is exactly the `3 -> 0` transition condition.
                if let Some(frame_id) = frame_id {
                    state.clear_resize_on_invalidate_gate(frame_id);
                }
                Ok(SubMessageAction::ForwardVerbatim)
            }
        }
        _ => Ok(SubMessageAction::ForwardVerbatim),
    }
}

/// Relay one message from the X driver to the RDP session, updating
/// resize state on the recognized sub-message types along the way.
fn relay_xorg_to_rdp(
    xorg: &mut UnixStream,
    rdp: &mut UnixStream,
    xorg_fd: RawFd,
    encoder: &mut dyn SpeculativeEncoder,
    state: &XiState,
) -> Result<(), SpliceError> {
    // The transport-level length prefix (8 bytes) is followed by the
    // outer header (8 bytes) and then the first sub-message's header
    // (4 bytes); peeking all of that up front is how the caller learns
    // whether this particular message carries an fd before committing
    // to `read_xorg_message`'s expect_fd choice (§4.7, §6.1).
    const PEEK_LEN: usize = 8 + 8 + XorgSubHeader::WIRE_LEN;
    let mut peek_buf = [0u8; PEEK_LEN];
    let peeked = xorg.peek(&mut peek_buf).map_err(SpliceError::Io)?;
    if peeked < PEEK_LEN {
        return Err(SpliceError::MalformedFrame("xorg message too short to peek outer+sub header"));
    }
    let outer = XorgOuterHeader::decode(&peek_buf[8..16])?;
    let first_subtype = u16::from_le_bytes([peek_buf[16], peek_buf[17]]);
    let expect_fd = outer.msg_type == TYPE_EGFX
        && matches!(first_subtype, SUBTYPE_EGFX_WITH_SHMFD | SUBTYPE_POINTER_SHMFD | SUBTYPE_PAINT_RECT);

    let msg = read_xorg_message(xorg, xorg_fd, expect_fd)?;
    if msg.payload.len() < 8 + XorgSubHeader::WIRE_LEN {
        return Err(SpliceError::MalformedFrame("xorg message shorter than outer+sub header"));
    }
    let sub_header = XorgSubHeader::decode(&msg.payload[8..])?;
    let mut body = msg.payload[8 + XorgSubHeader::WIRE_LEN..].to_vec();

    if outer.msg_type == TYPE_RESIZE {
        match sub_header.subtype {
            SUBTYPE_DELETE_ALL_PIXMAPS => handle_delete_all_pixmaps(state),
            SUBTYPE_CREATE_PIXMAP => handle_create_pixmap(state),
            _ => {}
        }
    }

    let action = if outer.msg_type == TYPE_EGFX {
        dispatch_xorg_submessage(encoder, state, sub_header, &mut body)?
    } else {
        SubMessageAction::ForwardVerbatim
    };

    match action {
        SubMessageAction::Drop => {
            trace!("dropped paint-rect message while resizing");
        }
        SubMessageAction::ForwardVerbatim => {
            write_rdp_message(rdp, &msg.payload)?;
            forward_fd_if_present(rdp, msg.fd)?;
        }
        SubMessageAction::ForwardRewritten(rewritten) => {
            let mut out = Vec::with_capacity(8 + XorgSubHeader::WIRE_LEN + rewritten.len());
            out.extend_from_slice(&msg.payload[..8]);
            out.extend_from_slice(&sub_header.subtype.to_le_bytes());
            out.extend_from_slice(&sub_header.subsize.to_le_bytes());
            out.extend_from_slice(&rewritten);
            write_rdp_message(rdp, &out)?;
            forward_fd_if_present(rdp, msg.fd)?;
        }
    }
    Ok(())
}

fn forward_fd_if_present(rdp: &mut UnixStream, fd: Option<std::os::fd::OwnedFd>) -> Result<(), SpliceError> {
    if let Some(fd) = fd {
        send_with_fd(rdp.as_raw_fd(), &[0u8], fd)?;
    }
    Ok(())
}

/// Relay one message from the RDP session back to the X driver. This
/// direction only updates the resize/invalidate state machine; the
/// bytes always go through unmodified (§4.7).
fn relay_rdp_to_xorg(rdp: &mut UnixStream, xorg: &mut UnixStream, state: &XiState) -> Result<(), SpliceError> {
    let mut len_buf = [0u8; 4];
    rdp.read_exact(&mut len_buf).map_err(SpliceError::Io)?;
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    rdp.read_exact(&mut payload).map_err(SpliceError::Io)?;

    let header = RdpOuterHeader::decode(&payload)?;
    handle_rdp_to_xorg(state, header);

    xorg.write_all(&len_buf).map_err(SpliceError::Io)?;
    xorg.write_all(&payload).map_err(SpliceError::Io)?;
    Ok(())
}

fn run(xorg_fd: RawFd, rdp_fd: RawFd) -> Result<(), SpliceError> {
    // SAFETY: `xorg_fd`/`rdp_fd` are inherited, open connected sockets
    // handed to this process by xorgxrdp via the environment; ownership
    // transfers here for the life of the process.
    let mut xorg = unsafe { UnixStream::from_raw_fd(xorg_fd) };
    let mut rdp = unsafe { UnixStream::from_raw_fd(rdp_fd) };

    let state = XiState::new();
    let adapter = build_adapter();
    let mut encoder = GpuSpeculativeEncoder::new(adapter, &state);

    info!("accel-assist splicer starting");
    loop {
        let (xorg_ready, rdp_ready) = wait_on_sockets(xorg_fd, rdp_fd)?;
        if xorg_ready {
            if let Err(e) = relay_xorg_to_rdp(&mut xorg, &mut rdp, xorg_fd, &mut encoder, &state) {
                log_protocol_violation("xorg-to-rdp", &e);
            }
        }
        if rdp_ready {
            if let Err(e) = relay_rdp_to_xorg(&mut rdp, &mut xorg, &state) {
                log_protocol_violation("rdp-to-xorg", &e);
            }
        }
    }
}

fn main() -> anyhow::Result<()> {
    let _log_guard = init_logging()?;
    let (xorg_fd, rdp_fd) = fds_from_env()?;

    if let Err(e) = run(xorg_fd, rdp_fd) {
        error!(error = %e, "accel-assist terminating on unrecoverable error");
        return Err(e.into());
    }
    Ok(())
}
