//! Length-prefixed framing for the splicer's two socket directions
//! (§6.1), plus SCM_RIGHTS file-descriptor passing.

use std::io::{Read, Write};
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::time::Duration;

use nix::sys::socket::{recvmsg, sendmsg, ControlMessage, ControlMessageOwned, MsgFlags};
use nix::sys::uio::IoSlice;

use crate::error::SpliceError;

/// 5-second readability probe before an expected SCM_RIGHTS receive
/// (§5 Cancellation & timeouts).
const FD_RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// One message read off the X-driver socket: `{total_len, len,
/// payload}` with an optional fd received via SCM_RIGHTS (§6.1).
pub struct XorgMessage {
    pub payload: Vec<u8>,
    pub fd: Option<std::os::fd::OwnedFd>,
}

/// Read one length-prefixed X-driver message. `expect_fd` is set by
/// the caller once it has inspected the outer header and knows this
/// subtype carries an fd (type 3, subtype 62/63/64, §4.7).
pub fn read_xorg_message(socket: &mut impl Read, fd_source: RawFd, expect_fd: bool) -> Result<XorgMessage, SpliceError> {
    let mut len_buf = [0u8; 8];
    socket.read_exact(&mut len_buf)?;
    let _total_len = u32::from_le_bytes([len_buf[0], len_buf[1], len_buf[2], len_buf[3]]);
    let len = u32::from_le_bytes([len_buf[4], len_buf[5], len_buf[6], len_buf[7]]) as usize;

    let mut payload = vec![0u8; len];
    socket.read_exact(&mut payload)?;

    let fd = if expect_fd {
        Some(recv_one_fd(fd_source)?)
    } else {
        None
    };

    Ok(XorgMessage { payload, fd })
}

/// Write one length-prefixed RDP-session message: `{len, payload}` (§6.1).
pub fn write_rdp_message(socket: &mut impl Write, payload: &[u8]) -> Result<(), SpliceError> {
    socket.write_all(&(payload.len() as u32).to_le_bytes())?;
    socket.write_all(payload)?;
    Ok(())
}

/// Receive exactly one file descriptor via SCM_RIGHTS, with a 5-second
/// readability probe first (§5, §7 `ShmfdError`).
pub fn recv_one_fd(socket_fd: RawFd) -> Result<std::os::fd::OwnedFd, SpliceError> {
    wait_readable(socket_fd, FD_RECV_TIMEOUT)?;

    let iobuf = [0u8; 1];
    let iov = [IoSlice::new(&iobuf)];
    let mut cmsg_buf = nix::cmsg_space!([RawFd; 1]);

    let borrowed = unsafe { BorrowedFd::borrow_raw(socket_fd) };
    let msg = recvmsg::<()>(borrowed.as_raw_fd(), &iov, Some(&mut cmsg_buf), MsgFlags::empty())
        .map_err(|e| SpliceError::ShmFd(format!("recvmsg failed: {e}")))?;

    let mut received_fd = None;
    for cmsg in msg.cmsgs().map_err(|e| SpliceError::ShmFd(format!("cmsg parse failed: {e}")))? {
        if let ControlMessageOwned::ScmRights(fds) = cmsg {
            if fds.len() != 1 {
                return Err(SpliceError::ShmFd(format!("expected exactly 1 fd, got {}", fds.len())));
            }
            received_fd = Some(fds[0]);
        }
    }

    let raw = received_fd.ok_or_else(|| SpliceError::ShmFd("no SCM_RIGHTS control message present".to_string()))?;
    Ok(unsafe { std::os::fd::OwnedFd::from_raw_fd(raw) })
}

/// Send `payload` plus one file descriptor via SCM_RIGHTS, closing the
/// local handle afterward (§4.7 Shmfd propagation).
pub fn send_with_fd(socket_fd: RawFd, payload: &[u8], fd: std::os::fd::OwnedFd) -> Result<(), SpliceError> {
    let iov = [IoSlice::new(payload)];
    let cmsg = [ControlMessage::ScmRights(&[fd.as_raw_fd()])];
    sendmsg::<()>(socket_fd, &iov, &cmsg, MsgFlags::empty(), None)
        .map_err(|e| SpliceError::ShmFd(format!("sendmsg failed: {e}")))?;
    drop(fd);
    Ok(())
}

fn wait_readable(fd: RawFd, timeout: Duration) -> Result<(), SpliceError> {
    use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    let mut fds = [PollFd::new(borrowed, PollFlags::POLLIN)];
    let timeout_ms = PollTimeout::try_from(timeout.as_millis() as u16).unwrap_or(PollTimeout::MAX);
    let n = poll(&mut fds, timeout_ms).map_err(|e| SpliceError::Io(std::io::Error::from(e)))?;
    if n == 0 {
        return Err(SpliceError::Timeout("peer socket did not become readable"));
    }
    Ok(())
}
