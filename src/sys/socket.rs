//! Listening-socket setup: address resolution, `SO_REUSEADDR`/`SO_REUSEPORT`,
//! non-blocking mode and backlog sizing.
//!
//! The teacher's own `lib.rs` reached for `net2` (`extern crate net2;`) for
//! exactly this job; `net2` is unmaintained so this module uses its
//! maintained successor, `socket2`, to the same effect. Backlog sizing and
//! the `SO_REUSEADDR`+`SO_REUSEPORT` sequence are grounded on the original's
//! `internal/reuseport/tcp.go` (`tcpReusablePort`) and
//! `internal/reuseport/reuseport_linux.go` (`maxListenerBacklog`).

use std::fs;
use std::io;
use std::net::{SocketAddr, TcpListener as StdTcpListener, ToSocketAddrs};

use socket2::{Domain, Protocol, Socket, Type};

/// Mirrors `maxListenerBacklog`: read `/proc/sys/net/core/somaxconn`, falling
/// back to a conservative default if it can't be read or parsed.
pub fn max_listener_backlog() -> i32 {
    const FALLBACK: i32 = 1024;

    let contents = match fs::read_to_string("/proc/sys/net/core/somaxconn") {
        Ok(c) => c,
        Err(_) => return FALLBACK,
    };

    match contents.trim().parse::<i64>() {
        Ok(n) if n > 0 => n.min((1 << 16) - 1) as i32,
        _ => FALLBACK,
    }
}

/// Resolves `addr`, creates a non-blocking `SOCK_STREAM` socket, applies
/// `SO_REUSEADDR` (always) and `SO_REUSEPORT` (when `reuse_port`), binds and
/// listens with the OS-reported max backlog.
pub fn bind_tcp_listener(addr: &str, reuse_port: bool) -> io::Result<(StdTcpListener, SocketAddr)> {
    let sock_addr = addr
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no address resolved"))?;

    let domain = if sock_addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    socket.set_reuse_address(true)?;
    if reuse_port {
        socket.set_reuse_port(true)?;
    }
    socket.set_nonblocking(true)?;

    socket.bind(&sock_addr.into())?;
    socket.listen(max_listener_backlog())?;

    let listener: StdTcpListener = socket.into();
    let local_addr = listener.local_addr()?;
    Ok((listener, local_addr))
}

/// Sets `TCP_NODELAY`, mirroring `internal/netpoll/netpoll_posix.go`'s `SetNoDelay`.
pub fn set_nodelay(stream: &std::net::TcpStream, enable: bool) -> io::Result<()> {
    stream.set_nodelay(enable)
}

/// Sets `SO_KEEPALIVE` plus the idle/interval timers, mirroring
/// `internal/netpoll/netpoll_unix.go`'s `SetKeepAlive`.
pub fn set_keepalive(stream: &std::net::TcpStream, duration: std::time::Duration) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    if duration.is_zero() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "invalid keepalive duration"));
    }

    let secs = duration.as_secs().max(1) as libc::c_int;
    let fd = stream.as_raw_fd();

    unsafe {
        setsockopt_int(fd, libc::SOL_SOCKET, libc::SO_KEEPALIVE, 1)?;
        setsockopt_int(fd, libc::IPPROTO_TCP, libc::TCP_KEEPINTVL, secs)?;
        setsockopt_int(fd, libc::IPPROTO_TCP, libc::TCP_KEEPIDLE, secs)?;
    }

    Ok(())
}

unsafe fn setsockopt_int(fd: libc::c_int, level: libc::c_int, name: libc::c_int, value: libc::c_int) -> io::Result<()> {
    let ret = libc::setsockopt(
        fd,
        level,
        name,
        &value as *const _ as *const libc::c_void,
        std::mem::size_of::<libc::c_int>() as libc::socklen_t,
    );
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bind_ephemeral_port() {
        let (listener, addr) = bind_tcp_listener("127.0.0.1:0", false).unwrap();
        assert_eq!(addr.port() != 0, true);
        drop(listener);
    }

    #[test]
    fn backlog_is_positive() {
        assert!(max_listener_backlog() > 0);
    }
}
