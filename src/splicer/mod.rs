//! Accel-Assist Splicer (§3.5, §4.7): a single-threaded relay process
//! on the Unix-socket splice between the X display driver and the RDP
//! session.
//!
//! Deliberately synchronous, not tokio-based — the teacher's own
//! capture path is async because it owns GPU texture acquisition
//! end-to-end, but this process mirrors the original single-threaded
//! poll loop; pulling in an async runtime here would be a redesign
//! nobody asked for (§5 "single-threaded event loop in a separate
//! process").

pub mod messages;
pub mod transport;

use std::cell::Cell;
use std::os::fd::RawFd;
use std::time::Duration;

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::{debug, warn};

use crate::error::SpliceError;

/// Resize handshake state (§3.5, §8 Testable Property 7): isomorphic
/// to `0..=3`, reachable only via `1 → 2 → 3 → 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeState {
    Idle,
    AwaitingDeletePixmaps,
    AwaitingCreatePixmap,
    AwaitingInvalidateGate,
}

impl ResizeState {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::AwaitingDeletePixmaps => 1,
            Self::AwaitingCreatePixmap => 2,
            Self::AwaitingInvalidateGate => 3,
        }
    }
}

/// Splicer process state (§3.5). `xrdp_invalidate` and `resizing` are
/// plain `Cell`s: the splicer is single-threaded, so no lock is needed
/// (§5, §9 Design Notes — do not reintroduce a cross-process global).
pub struct XiState {
    shmem_fd: Cell<Option<RawFd>>,
    shmem_bytes_ret: Cell<usize>,
    resizing: Cell<ResizeState>,
    xrdp_invalidate: Cell<u32>,
}

impl XiState {
    pub fn new() -> Self {
        Self {
            shmem_fd: Cell::new(None),
            shmem_bytes_ret: Cell::new(0),
            resizing: Cell::new(ResizeState::Idle),
            xrdp_invalidate: Cell::new(0),
        }
    }

    pub fn resize_state(&self) -> ResizeState {
        self.resizing.get()
    }

    pub fn invalidate_pending(&self) -> u32 {
        self.xrdp_invalidate.get()
    }

    /// The shmem fd currently being forwarded, if any (`-1`/`None`
    /// when idle, §3.5).
    pub fn shmem_fd(&self) -> Option<RawFd> {
        self.shmem_fd.get()
    }

    pub fn set_shmem_fd(&self, fd: Option<RawFd>) {
        self.shmem_fd.set(fd);
    }

    pub fn shmem_bytes_ret(&self) -> usize {
        self.shmem_bytes_ret.get()
    }

    pub fn set_shmem_bytes_ret(&self, bytes: usize) {
        self.shmem_bytes_ret.set(bytes);
    }

    /// `0 → 1` on a driver-initiated resize.
    pub fn begin_resize(&self) {
        if self.resizing.get() == ResizeState::Idle {
            self.resizing.set(ResizeState::AwaitingDeletePixmaps);
        }
    }

    /// `1 → 2` when delete-all-pixmaps is observed.
    pub fn advance_resize_on_delete_pixmaps(&self) {
        if self.resizing.get() == ResizeState::AwaitingDeletePixmaps {
            self.resizing.set(ResizeState::AwaitingCreatePixmap);
        }
    }

    /// `2 → 3` when create-pixmap is observed.
    pub fn advance_resize_on_create_pixmap(&self) {
        if self.resizing.get() == ResizeState::AwaitingCreatePixmap {
            self.resizing.set(ResizeState::AwaitingInvalidateGate);
        }
    }

    /// `3 → 0` once `xrdp_invalidate > 0` and the gating frame (id==1)
    /// has been observed.
    pub fn clear_resize_on_invalidate_gate(&self, frame_id: u32) {
        if self.resizing.get() == ResizeState::AwaitingInvalidateGate
            && frame_id == 1
            && self.xrdp_invalidate.get() > 0
        {
            self.resizing.set(ResizeState::Idle);
        }
    }

    /// Add `amount` to the invalidate counter (§4.7: +10 cushion per
    /// client invalidate request).
    pub fn increment_invalidate(&self, amount: u32) {
        self.xrdp_invalidate.set(self.xrdp_invalidate.get().saturating_add(amount));
    }

    /// Consume one pending invalidate, saturating at 0 (§8 Testable
    /// Property 8). Called once per encoded frame while the counter is
    /// positive.
    pub fn decrement_invalidate(&self) {
        self.xrdp_invalidate.set(self.xrdp_invalidate.get().saturating_sub(1));
    }

    /// Whether the *next* encoded frame must be forced to an IDR: the
    /// invalidate counter is positive, or (unconditionally) this is the
    /// very first frame of a freshly (re)opened encoder (§4.7).
    pub fn force_idr_for_next_frame(&self, frame_count: u64) -> bool {
        frame_count == 0 || self.xrdp_invalidate.get() > 0
    }
}

impl Default for XiState {
    fn default() -> Self {
        Self::new()
    }
}

/// Block until either socket fd is readable, with no timeout — the
/// "unified wait on both socket fds" from §5. Returns which fds are
/// ready.
pub fn wait_on_sockets(xorg_fd: RawFd, rdp_fd: RawFd) -> Result<(bool, bool), SpliceError> {
    let xorg_borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(xorg_fd) };
    let rdp_borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(rdp_fd) };
    let mut fds = [
        PollFd::new(xorg_borrowed, PollFlags::POLLIN),
        PollFd::new(rdp_borrowed, PollFlags::POLLIN),
    ];
    poll(&mut fds, PollTimeout::NONE).map_err(|e| SpliceError::Io(std::io::Error::from(e)))?;

    let xorg_ready = fds[0]
        .revents()
        .map(|r| r.contains(PollFlags::POLLIN))
        .unwrap_or(false);
    let rdp_ready = fds[1]
        .revents()
        .map(|r| r.contains(PollFlags::POLLIN))
        .unwrap_or(false);
    Ok((xorg_ready, rdp_ready))
}

/// Read the inherited socket fds from the environment (§6.5).
pub fn fds_from_env() -> Result<(RawFd, RawFd), SpliceError> {
    let xorg = std::env::var("XORGXRDP_XORG_FD")
        .ok()
        .and_then(|s| s.parse::<RawFd>().ok())
        .ok_or_else(|| SpliceError::MalformedFrame("XORGXRDP_XORG_FD missing or not an integer"))?;
    let rdp = std::env::var("XORGXRDP_XRDP_FD")
        .ok()
        .and_then(|s| s.parse::<RawFd>().ok())
        .ok_or_else(|| SpliceError::MalformedFrame("XORGXRDP_XRDP_FD missing or not an integer"))?;
    Ok((xorg, rdp))
}

/// One iteration of dispatch for a single ready direction; factored out
/// of the `accel-assist` binary's main loop so it can be exercised
/// without real sockets.
pub fn log_protocol_violation(context: &'static str, err: &SpliceError) {
    match err {
        SpliceError::MalformedFrame(_) => warn!(context, error = %err, "malformed splicer frame, dropping message"),
        SpliceError::Timeout(_) => warn!(context, error = %err, "readability timeout"),
        SpliceError::ShmFd(_) => warn!(context, error = %err, "shared-memory fd transfer failed"),
        other => debug!(context, error = %other, "splicer message error"),
    }
}

/// Degraded-path log helper mirroring the worker's 5s termination
/// deadline handling (§5 Cancellation & timeouts), reused here for
/// symmetry in log phrasing.
pub fn log_timeout_budget() -> Duration {
    Duration::from_secs(5)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_state_machine_only_reaches_idle_through_full_sequence() {
        let state = XiState::new();
        assert_eq!(state.resize_state(), ResizeState::Idle);

        state.begin_resize();
        assert_eq!(state.resize_state(), ResizeState::AwaitingDeletePixmaps);

        // Out-of-order events are no-ops.
        state.advance_resize_on_create_pixmap();
        assert_eq!(state.resize_state(), ResizeState::AwaitingDeletePixmaps);

        state.advance_resize_on_delete_pixmaps();
        assert_eq!(state.resize_state(), ResizeState::AwaitingCreatePixmap);

        state.advance_resize_on_create_pixmap();
        assert_eq!(state.resize_state(), ResizeState::AwaitingInvalidateGate);

        state.clear_resize_on_invalidate_gate(2);
        assert_eq!(state.resize_state(), ResizeState::AwaitingInvalidateGate);

        state.increment_invalidate(10);
        state.clear_resize_on_invalidate_gate(1);
        assert_eq!(state.resize_state(), ResizeState::Idle);
    }

    #[test]
    fn invalidate_counter_is_monotonically_non_increasing_between_increments() {
        let state = XiState::new();
        state.increment_invalidate(10);
        assert_eq!(state.invalidate_pending(), 10);
        for expected in (0..10).rev() {
            state.decrement_invalidate();
            assert_eq!(state.invalidate_pending(), expected);
        }
        state.decrement_invalidate();
        assert_eq!(state.invalidate_pending(), 0);
    }

    #[test]
    fn force_idr_unconditional_on_first_frame() {
        let state = XiState::new();
        assert!(state.force_idr_for_next_frame(0));
        assert!(!state.force_idr_for_next_frame(1));
        state.increment_invalidate(1);
        assert!(state.force_idr_for_next_frame(1));
    }

    #[test]
    fn resize_state_u8_mapping_is_0_through_3() {
        assert_eq!(ResizeState::Idle.as_u8(), 0);
        assert_eq!(ResizeState::AwaitingDeletePixmaps.as_u8(), 1);
        assert_eq!(ResizeState::AwaitingCreatePixmap.as_u8(), 2);
        assert_eq!(ResizeState::AwaitingInvalidateGate.as_u8(), 3);
    }
}
