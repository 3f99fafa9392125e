//! Error taxonomy for the encoding pipeline.
//!
//! Each stage of the pipeline gets its own error enum rather than one
//! god-error — `QueueError`, `EncodeError`, `CodecError` and
//! `SpliceError` map 1:1 onto the error table in the design spec
//! (§7 Error Handling Design). The `accel-assist` binary aggregates
//! these with `#[from]` at its edge; the library itself never reaches
//! for `anyhow`.

use thiserror::Error;

/// Errors raised while submitting to or draining the frame job queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The worker thread has already terminated; the channel is closed.
    #[error("encoder worker is no longer running")]
    WorkerGone,
}

/// Errors raised while turning an [`crate::queue::EncJob`] into an
/// [`crate::queue::EncResult`].
///
/// Every variant here is recoverable from the queue's point of view:
/// per the key invariant in §7, the worker always pushes exactly one
/// `last=true` result, even when encoding fails.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// Allocation of an output or scratch buffer failed.
    #[error("out of memory allocating {0} bytes")]
    OutOfMemory(usize),

    /// The job's header or length-prefix bounds were inconsistent.
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),

    /// The underlying codec adapter returned a non-zero status.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Errors surfaced by a per-codec encoder adapter (§4.8).
#[derive(Debug, Error)]
pub enum CodecError {
    /// Backend failed to open or reopen a per-session sub-encoder.
    #[error("{backend} init failed: {reason}")]
    InitFailed {
        /// Name of the backend (`x264`, `openh264`, `nvenc`, `rfx`).
        backend: &'static str,
        /// Backend-reported reason.
        reason: String,
    },

    /// The backend's `encode` call returned a non-zero status.
    #[error("{backend} encode failed (status {status})")]
    EncodeFailed {
        /// Name of the backend.
        backend: &'static str,
        /// Raw status code returned by the FFI call.
        status: i32,
    },

    /// Frame dimensions are incompatible with the backend (e.g. below
    /// the minimum tile size OpenH264 requires after 16px rounding).
    #[error("invalid dimensions {width}x{height} for {backend}")]
    InvalidDimensions {
        /// Name of the backend.
        backend: &'static str,
        width: u32,
        height: u32,
    },
}

/// Errors raised by the accel-assist splicer while relaying one message.
///
/// A `SpliceError` is fatal to the *message* being processed, not to the
/// session: the splicer logs it and returns to reading the next header.
#[derive(Debug, Error)]
pub enum SpliceError {
    /// A length prefix or outer/inner frame header was out of bounds.
    #[error("malformed splicer frame: {0}")]
    MalformedFrame(&'static str),

    /// `recvmsg` with `SCM_RIGHTS` failed, or returned a file descriptor
    /// count other than exactly one.
    #[error("shared-memory fd transfer failed: {0}")]
    ShmFd(String),

    /// The peer socket did not become readable within the 5 second
    /// probe window before an expected `SCM_RIGHTS` receive.
    #[error("timed out waiting for readability on {0}")]
    Timeout(&'static str),

    /// Wrapped I/O error from the underlying socket.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Wrapped encode failure while speculatively encoding a paint rect.
    #[error(transparent)]
    Encode(#[from] EncodeError),
}
