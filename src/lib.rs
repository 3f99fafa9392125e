//! # xrdp-gfx-encoder
//!
//! Server-side RDPGFX encoding pipeline for an RDP server: a dedicated
//! encoder worker per session, plus the accel-assist splicer that sits
//! on the Unix-socket splice between an X display driver and the RDP
//! session.
//!
//! This crate does not own session/user management, authentication,
//! connection setup, channel negotiation, the MCS/T.125 connection
//! sequence, or TOML-style configuration loading — those are external
//! collaborators. What lives here is everything downstream of "a frame
//! was captured": turning screen-surface deltas into wire-ready H.264
//! (AVC420/AVC444v2), RemoteFX, RemoteFX-Progressive or JPEG RDPGFX
//! command streams.
//!
//! # Architecture
//!
//! ```text
//!   X driver ──► Splicer ──► Session socket ──► Encoder Worker ──► RDP client
//!                   │                                │
//!                   ▼                                ▼
//!             GPU pixmaps                    RDPGFX byte stream
//!             & NVENC encode                 (Annex-B + MetaBlock)
//! ```
//!
//! [`rect`] and [`wire`] are the leaf modules everything else builds on:
//! coordinate/region math and pure wire encode/decode functions. [`queue`]
//! connects a session's producer thread to its [`encoder::Encoder`]'s
//! dedicated worker thread. [`codecs`] holds the per-backend x264,
//! OpenH264, NVENC and RemoteFX adapters behind one calling contract.
//! [`splicer`] is the separate accel-assist process's relay state and
//! message dispatch, used by the `accel-assist` binary.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Environment-variable configuration (§6.5 of the design spec): credit
/// caps, output buffer sizing, NVENC rate control, log level/path.
pub mod config;

/// Errors raised at each stage of the pipeline: queue submission, job
/// encoding, per-codec adapters, and the splicer's message handling.
pub mod error;

/// Rectangles, points, regions and per-job flags shared by every module.
pub mod rect;

/// The frame job queue: producer/consumer channel pair plus the
/// request/ack termination handshake between a session and its worker.
pub mod queue;

/// RDPGFX wire framing: command headers, the AVC420 metablock and the
/// AVC444v2 dual-stream header.
pub mod wire;

/// Per-codec encoder adapters (x264, OpenH264, NVENC, RemoteFX) behind
/// one `create`/`encode`/`delete` contract.
pub mod codecs;

/// The per-session encoder worker: dispatch to the H.264, RFX, JPEG or
/// GFX-multiplexer path, and the [`encoder::Encoder`] handle sessions hold.
pub mod encoder;

/// The accel-assist splicer: resize state machine, invalidate counter,
/// and socket transport/message framing shared with the `accel-assist`
/// binary.
pub mod splicer;

pub use encoder::{ColorSpace, Encoder, EncoderConfig};
pub use error::{CodecError, EncodeError, QueueError, SpliceError};
pub use queue::{EncJob, EncResult, GfxJob, SurfaceJob};
pub use rect::{EgfxRect, EncJobFlags, MonitorInfo, Point, Rect, Region};
