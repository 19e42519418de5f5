//! UDP socket tuning.

use tokio::net::UdpSocket;

/// Send and receive buffer size requested for probe sockets. Bursts of
/// full-size datagrams at millisecond spacing overflow the kernel default
/// buffers long before the burst ends.
pub const SOCKET_BUFFER_BYTES: usize = 1024 * 1024;

/// Raises `SO_RCVBUF` and `SO_SNDBUF` to [`SOCKET_BUFFER_BYTES`].
///
/// Best effort: kernels clamp or refuse these requests, so a failure is
/// logged and the test proceeds with whatever the socket already has.
#[cfg(unix)]
pub fn tune_buffers(socket: &UdpSocket) {
    use log::{debug, warn};
    use std::os::unix::io::AsRawFd;

    let fd = socket.as_raw_fd();
    let size = SOCKET_BUFFER_BYTES as libc::c_int;

    for (opt, name) in [
        (libc::SO_RCVBUF, "SO_RCVBUF"),
        (libc::SO_SNDBUF, "SO_SNDBUF"),
    ] {
        let rc = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                opt,
                &size as *const libc::c_int as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            warn!(
                "setsockopt {name} failed: {}",
                std::io::Error::last_os_error()
            );
        } else {
            debug!("{name} set to {SOCKET_BUFFER_BYTES} bytes");
        }
    }
}

#[cfg(not(unix))]
pub fn tune_buffers(_socket: &UdpSocket) {}
